//! Invocation of the NCO command-line operators
//!
//! Dimension permutation, renaming and variable removal are delegated to
//! `ncpdq`, `ncrename` and `ncks`. Every call blocks until the operator
//! exits, and a nonzero exit is reported as [`NoahMpError::NcoFailed`].

use crate::errors::{NoahMpError, Result};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Runner for NCO operators with a fixed set of common options.
#[derive(Debug, Clone)]
pub struct Nco {
    /// Directory holding the operators; `None` searches `PATH`.
    pub bindir: Option<PathBuf>,
    /// Write `netcdf4_classic` output.
    pub netcdf4_classic: bool,
    /// Deflate level passed as `-L`.
    pub deflate_level: Option<u32>,
}

impl Default for Nco {
    fn default() -> Self {
        Self {
            bindir: None,
            netcdf4_classic: true,
            deflate_level: Some(6),
        }
    }
}

impl Nco {
    /// Overwrite and no-history only, keeping the input format.
    pub fn plain() -> Self {
        Self {
            bindir: None,
            netcdf4_classic: false,
            deflate_level: None,
        }
    }

    pub fn with_bindir(mut self, bindir: Option<PathBuf>) -> Self {
        self.bindir = bindir;
        self
    }

    fn program(&self, tool: &str) -> PathBuf {
        match &self.bindir {
            Some(dir) => dir.join(tool),
            None => PathBuf::from(tool),
        }
    }

    fn common_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-O".into(), "-h".into()];
        if self.netcdf4_classic {
            args.push("--fl_fmt=netcdf4_classic".into());
        }
        if let Some(level) = self.deflate_level {
            args.push("-L".into());
            args.push(level.to_string().into());
        }
        args
    }

    /// Arguments of `ncks` dropping `vars` from `input` into `output`.
    pub fn exclude_args(&self, vars: &[&str], input: &Path, output: &Path) -> Vec<OsString> {
        let mut args = self.common_args();
        args.extend([OsString::from("-x"), OsString::from("-v"), OsString::from(vars.join(","))]);
        args.push(input.into());
        args.push(output.into());
        args
    }

    /// Arguments of `ncpdq` permuting dimensions of `input` into `output`.
    pub fn permute_args(&self, order: &[&str], input: &Path, output: &Path) -> Vec<OsString> {
        let mut args = self.common_args();
        args.extend([OsString::from("-a"), OsString::from(order.join(","))]);
        args.push(input.into());
        args.push(output.into());
        args
    }

    /// Arguments of `ncrename` renaming dimension `old` to `new` in `file`.
    pub fn rename_dimension_args(&self, old: &str, new: &str, file: &Path) -> Vec<OsString> {
        let mut args = self.common_args();
        args.extend([OsString::from("-d"), OsString::from(format!("{},{}", old, new))]);
        args.push(file.into());
        args
    }

    pub fn exclude_variables(&self, vars: &[&str], input: &Path, output: &Path) -> Result<()> {
        self.run("ncks", self.exclude_args(vars, input, output))
    }

    pub fn permute(&self, order: &[&str], input: &Path, output: &Path) -> Result<()> {
        self.run("ncpdq", self.permute_args(order, input, output))
    }

    pub fn rename_dimension(&self, old: &str, new: &str, file: &Path) -> Result<()> {
        self.run("ncrename", self.rename_dimension_args(old, new, file))
    }

    /// `ncks -x` rewriting `file` through a scratch copy in its directory.
    pub fn exclude_variables_in_place(&self, vars: &[&str], file: &Path) -> Result<()> {
        self.in_place(file, |tmp| self.exclude_variables(vars, file, tmp))
    }

    /// `ncpdq -a` rewriting `file` through a scratch copy in its directory.
    pub fn permute_in_place(&self, order: &[&str], file: &Path) -> Result<()> {
        self.in_place(file, |tmp| self.permute(order, file, tmp))
    }

    fn in_place<F>(&self, file: &Path, op: F) -> Result<()>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        let dir = file
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let tmp = tempfile::Builder::new().suffix(".nc").tempfile_in(dir)?;
        op(tmp.path())?;
        fs::copy(tmp.path(), file)?;
        Ok(())
    }

    fn run(&self, tool: &str, args: Vec<OsString>) -> Result<()> {
        let program = self.program(tool);
        debug!("{} {:?}", program.display(), args);
        let status = Command::new(&program)
            .args(&args)
            .status()
            .map_err(|e| NoahMpError::NcoFailed {
                tool: tool.to_string(),
                status: format!("could not start {}: {}", program.display(), e),
            })?;
        if !status.success() {
            return Err(NoahMpError::NcoFailed {
                tool: tool.to_string(),
                status: status.to_string(),
            });
        }
        Ok(())
    }
}
