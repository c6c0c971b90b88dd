//! Fortran namelist access and namelist templates
//!
//! Only what case management needs: scalar `key = value` entries inside
//! `&group ... /` blocks, read case-insensitively and patched line by line
//! so comments and layout of the file survive a rewrite.

use crate::errors::{NoahMpError, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

/// Group holding the run configuration of the offline driver.
pub const OFFLINE_GROUP: &str = "noahlsm_offline";

#[derive(Debug, Clone, PartialEq)]
pub enum NamelistValue {
    Int(i64),
    Real(f64),
    Bool(bool),
    Str(String),
}

impl NamelistValue {
    /// Parses the right-hand side of an assignment.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim().trim_end_matches(',').trim();
        if let Some(quote) = raw.chars().next().filter(|c| *c == '\'' || *c == '"') {
            let body = &raw[1..];
            let doubled = format!("{quote}{quote}");
            let mut text = String::new();
            let mut rest = body;
            while let Some(pos) = rest.find(quote) {
                text.push_str(&rest[..pos]);
                if rest[pos..].starts_with(&doubled) {
                    text.push(quote);
                    rest = &rest[pos + 2..];
                } else {
                    return NamelistValue::Str(text);
                }
            }
            text.push_str(rest);
            return NamelistValue::Str(text);
        }
        match raw.to_lowercase().as_str() {
            ".true." | ".t." | "t" | "true" => return NamelistValue::Bool(true),
            ".false." | ".f." | "f" | "false" => return NamelistValue::Bool(false),
            _ => {}
        }
        if let Ok(v) = raw.parse::<i64>() {
            return NamelistValue::Int(v);
        }
        if let Ok(v) = raw.replace(['d', 'D'], "e").parse::<f64>() {
            return NamelistValue::Real(v);
        }
        NamelistValue::Str(raw.to_string())
    }
}

impl fmt::Display for NamelistValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamelistValue::Int(v) => write!(f, "{}", v),
            NamelistValue::Real(v) => write!(f, "{:?}", v),
            NamelistValue::Bool(true) => write!(f, ".true."),
            NamelistValue::Bool(false) => write!(f, ".false."),
            NamelistValue::Str(s) => write!(f, "\"{}\"", s.replace('"', "\"\"")),
        }
    }
}

impl From<i64> for NamelistValue {
    fn from(v: i64) -> Self {
        NamelistValue::Int(v)
    }
}

impl From<&str> for NamelistValue {
    fn from(v: &str) -> Self {
        NamelistValue::Str(v.to_string())
    }
}

impl From<String> for NamelistValue {
    fn from(v: String) -> Self {
        NamelistValue::Str(v)
    }
}

/// Drops a trailing `!` comment that is not inside a string.
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    for (i, c) in line.char_indices() {
        match (quote, c) {
            (None, '\'' | '"') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, '!') => return &line[..i],
            _ => {}
        }
    }
    line
}

fn group_start(line: &str) -> Option<String> {
    let code = strip_comment(line).trim();
    let name = code.strip_prefix('&')?;
    let name = name.split_whitespace().next()?;
    (!name.eq_ignore_ascii_case("end")).then(|| name.to_lowercase())
}

fn group_end(line: &str) -> bool {
    let code = strip_comment(line).trim();
    code.starts_with('/') || code.eq_ignore_ascii_case("&end")
}

fn assignment(line: &str) -> Option<(String, &str)> {
    let code = strip_comment(line);
    let (key, value) = code.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key.to_lowercase(), value))
}

/// A namelist file kept as text lines.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Namelist {
    lines: Vec<String>,
}

impl Namelist {
    pub fn parse(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    pub fn read(path: &Path) -> Result<Self> {
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_string())?;
        Ok(())
    }

    /// Line range `(start, end)` of a group, `end` being its terminator.
    fn group_span(&self, group: &str) -> Option<(usize, usize)> {
        let group = group.to_lowercase();
        let start = self
            .lines
            .iter()
            .position(|l| group_start(l).as_deref() == Some(group.as_str()))?;
        let end = self.lines[start + 1..]
            .iter()
            .position(|l| group_end(l))
            .map(|i| start + 1 + i)?;
        Some((start, end))
    }

    fn find(&self, group: &str, key: &str) -> Option<usize> {
        let (start, end) = self.group_span(group)?;
        let key = key.to_lowercase();
        (start + 1..end).find(|&i| matches!(assignment(&self.lines[i]), Some((k, _)) if k == key))
    }

    pub fn get(&self, group: &str, key: &str) -> Option<NamelistValue> {
        let line = &self.lines[self.find(group, key)?];
        assignment(line).map(|(_, raw)| NamelistValue::parse(raw))
    }

    pub fn get_int(&self, group: &str, key: &str) -> Result<i64> {
        match self.get(group, key) {
            Some(NamelistValue::Int(v)) => Ok(v),
            Some(other) => Err(NoahMpError::Namelist {
                message: format!("{}%{} is not an integer: {}", group, key, other),
            }),
            None => Err(NoahMpError::Namelist {
                message: format!("{}%{} not found", group, key),
            }),
        }
    }

    pub fn get_str(&self, group: &str, key: &str) -> Option<String> {
        match self.get(group, key)? {
            NamelistValue::Str(s) => Some(s),
            other => Some(other.to_string()),
        }
    }

    /// Sets `key`, replacing its line or adding one before the group
    /// terminator.
    pub fn set(&mut self, group: &str, key: &str, value: impl Into<NamelistValue>) -> Result<()> {
        let value = value.into();
        if let Some(i) = self.find(group, key) {
            let line = &self.lines[i];
            let indent: String = line.chars().take_while(|c| c.is_whitespace()).collect();
            let name = strip_comment(line)
                .split_once('=')
                .map(|(k, _)| k.trim().to_string())
                .unwrap_or_else(|| key.to_string());
            self.lines[i] = format!("{}{} = {}", indent, name, value);
            return Ok(());
        }
        let (_, end) = self.group_span(group).ok_or_else(|| NoahMpError::Namelist {
            message: format!("group &{} not found", group),
        })?;
        self.lines.insert(end, format!("  {} = {}", key, value));
        Ok(())
    }

    /// `start_year` .. `start_min` of the offline driver.
    pub fn start_datetime(&self) -> Result<NaiveDateTime> {
        let g = OFFLINE_GROUP;
        let field = |key: &str| -> Result<u32> {
            u32::try_from(self.get_int(g, key)?).map_err(|_| NoahMpError::Namelist {
                message: format!("{}%{} is negative", g, key),
            })
        };
        let year = self.get_int(g, "start_year")? as i32;
        NaiveDate::from_ymd_opt(year, field("start_month")?, field("start_day")?)
            .and_then(|d| d.and_hms_opt(field("start_hour").ok()?, field("start_min").ok()?, 0))
            .ok_or_else(|| NoahMpError::Namelist {
                message: "invalid start date".to_string(),
            })
    }

    /// Start plus `kday` days.
    pub fn end_datetime(&self) -> Result<NaiveDateTime> {
        Ok(self.start_datetime()? + Duration::days(self.get_int(OFFLINE_GROUP, "kday")?))
    }

    /// Points the offline driver at a new start time.
    pub fn set_start(&mut self, start: NaiveDateTime) -> Result<()> {
        use chrono::{Datelike, Timelike};
        let g = OFFLINE_GROUP;
        self.set(g, "start_year", start.year() as i64)?;
        self.set(g, "start_month", start.month() as i64)?;
        self.set(g, "start_day", start.day() as i64)?;
        self.set(g, "start_hour", start.hour() as i64)?;
        self.set(g, "start_min", start.minute() as i64)?;
        Ok(())
    }
}

impl fmt::Display for Namelist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

/// Replaces `$NAME` and `${NAME}` with values from `vars`; `$$` is a
/// literal `$` and unknown names are left untouched.
pub fn template_substitute(template: &str, vars: &HashMap<&str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];
        if let Some(after) = tail.strip_prefix('$') {
            out.push('$');
            rest = after;
            continue;
        }
        let (name, consumed) = if let Some(braced) = tail.strip_prefix('{') {
            match braced.find('}') {
                Some(close) => (&braced[..close], close + 2),
                None => ("", 0),
            }
        } else {
            let len = identifier_len(tail);
            (&tail[..len], len)
        };
        match vars.get(name) {
            Some(value) if identifier_len(name) == name.len() && !name.is_empty() => {
                out.push_str(value);
                rest = &tail[consumed..];
            }
            _ => {
                out.push('$');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

fn identifier_len(s: &str) -> usize {
    let mut len = 0;
    for (i, c) in s.char_indices() {
        let ok = c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit());
        if !ok {
            break;
        }
        len = i + c.len_utf8();
    }
    len
}
