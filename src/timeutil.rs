//! Timestamps in file names, user input and CF time coordinates.

use crate::errors::{NoahMpError, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::path::Path;

/// Units written to every time coordinate this crate creates.
pub const CF_TIME_UNITS: &str = "hours since 1900-01-01";

/// Timestamp layout of per-timestep model output and restart file names.
pub const FILENAME_TIME_FORMAT: &str = "%Y%m%d%H";

/// Timestamp layout of the WRF `Times` character variable.
pub const WRF_TIME_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

/// Length of one WRF `Times` record.
pub const WRF_TIME_LEN: usize = 19;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    fn seconds(self) -> f64 {
        match self {
            TimeUnit::Seconds => 1.0,
            TimeUnit::Minutes => 60.0,
            TimeUnit::Hours => 3600.0,
            TimeUnit::Days => 86400.0,
        }
    }
}

/// A parsed CF `units` string such as `hours since 1900-01-01 00:00:00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeUnits {
    pub unit: TimeUnit,
    pub base: NaiveDateTime,
}

impl TimeUnits {
    pub fn parse(units: &str) -> Result<Self> {
        let invalid = || NoahMpError::InvalidTime {
            input: units.to_string(),
        };
        let (unit, base) = units.split_once(" since ").ok_or_else(invalid)?;
        let unit = match unit.trim().to_lowercase().as_str() {
            "seconds" | "second" | "secs" | "sec" | "s" => TimeUnit::Seconds,
            "minutes" | "minute" | "mins" | "min" => TimeUnit::Minutes,
            "hours" | "hour" | "hrs" | "hr" | "h" => TimeUnit::Hours,
            "days" | "day" | "d" => TimeUnit::Days,
            _ => return Err(invalid()),
        };
        // Trailing zone designators ("UTC", "Z") are accepted and ignored.
        let base = base
            .trim()
            .trim_end_matches(" UTC")
            .trim_end_matches('Z');
        let base = parse_datetime(base).map_err(|_| invalid())?;
        Ok(Self { unit, base })
    }

    /// Decodes a coordinate value (num2date). Fill values and anything
    /// outside the representable date range are rejected.
    pub fn to_datetime(&self, value: f64) -> Result<NaiveDateTime> {
        let millis = (value * self.unit.seconds() * 1000.0).round();
        if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
            return Err(NoahMpError::InvalidTime {
                input: value.to_string(),
            });
        }
        Duration::try_milliseconds(millis as i64)
            .and_then(|offset| self.base.checked_add_signed(offset))
            .ok_or_else(|| NoahMpError::InvalidTime {
                input: value.to_string(),
            })
    }

    /// Encodes a timestamp as a coordinate value (date2num).
    pub fn from_datetime(&self, dt: NaiveDateTime) -> f64 {
        let seconds = (dt - self.base).num_milliseconds() as f64 / 1000.0;
        seconds / self.unit.seconds()
    }
}

/// Parses begin/end times given on the command line.
pub fn parse_datetime(input: &str) -> Result<NaiveDateTime> {
    let s = input.trim();
    const FORMATS: [&str; 6] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d_%H:%M:%S",
        "%Y%m%d%H%M%S",
    ];
    for format in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(dt);
        }
    }
    if s.len() == 10 && s.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&format!("{s}0000"), "%Y%m%d%H%M%S") {
            return Ok(dt);
        }
    }
    for format in ["%Y-%m-%d", "%Y%m%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                return Ok(dt);
            }
        }
    }
    Err(NoahMpError::InvalidTime {
        input: input.to_string(),
    })
}

/// Timestamp encoded as the leading `YYYYMMDDHH` token of a file name,
/// e.g. `2010010103.LDASOUT_DOMAIN1`.
pub fn datetime_from_filename(path: &Path) -> Result<NaiveDateTime> {
    let name = file_name(path);
    let token = name.split('.').next().unwrap_or_default();
    parse_hourly(token).ok_or_else(|| NoahMpError::InvalidTime { input: name })
}

/// Timestamp of a `RESTART.YYYYMMDDHH_DOMAINn` file.
pub fn datetime_from_restart(path: &Path) -> Result<NaiveDateTime> {
    let name = file_name(path);
    name.get(8..18)
        .and_then(parse_hourly)
        .ok_or_else(|| NoahMpError::InvalidTime { input: name })
}

/// Formats a timestamp the way model output files are named.
pub fn filename_stamp(dt: NaiveDateTime) -> String {
    dt.format(FILENAME_TIME_FORMAT).to_string()
}

/// Decodes a flattened WRF `Times` character array, one record per
/// [`WRF_TIME_LEN`] bytes.
pub fn parse_wrf_times(bytes: &[u8]) -> Result<Vec<NaiveDateTime>> {
    bytes
        .chunks(WRF_TIME_LEN)
        .map(|chunk| {
            let text: String = chunk
                .iter()
                .take_while(|&&b| b != 0)
                .map(|&b| b as char)
                .collect();
            NaiveDateTime::parse_from_str(text.trim(), WRF_TIME_FORMAT)
                .map_err(|_| NoahMpError::InvalidTime { input: text })
        })
        .collect()
}

fn parse_hourly(token: &str) -> Option<NaiveDateTime> {
    if token.len() != 10 || !token.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(&format!("{token}0000"), "%Y%m%d%H%M%S").ok()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
