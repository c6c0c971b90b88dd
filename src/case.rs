//! Case directory creation
//!
//! A case is a directory holding the model executable, its parameter
//! tables and a `namelist.hrldas` rendered from a template. Spinup runs
//! live in `spinup-NNN` subdirectories that link back to the case's
//! tables and hand their final restart to the next stage.

use crate::errors::{NoahMpError, Result};
use crate::namelist::template_substitute;
use crate::timeutil::filename_stamp;
use chrono::{Datelike, NaiveDateTime, Timelike};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const NOAHMP_TABLES: [&str; 4] = ["GENPARM.TBL", "MPTABLE.TBL", "SOILPARM.TBL", "VEGPARM.TBL"];
pub const NOAHMP_EXE: &str = "noahmp_hrldas.exe";
pub const NAMELIST: &str = "namelist.hrldas";
pub const NAMELIST_TEMPLATE: &str = "namelist.hrldas.template";

/// Everything needed to lay out a case.
#[derive(Debug, Clone)]
pub struct CaseConfig {
    pub modelroot: PathBuf,
    pub caseroot: PathBuf,
    /// Defaults to `<modelroot>/namelist.hrldas.template`.
    pub namelist_template: Option<PathBuf>,
    /// Defaults to `<caseroot>/ldasin`.
    pub forcing: Option<PathBuf>,
    /// Defaults to `<caseroot>/wrfinput_d01`.
    pub wrfinput: Option<PathBuf>,
    pub begin: NaiveDateTime,
    pub end: NaiveDateTime,
    pub begin_spinup: Option<NaiveDateTime>,
    pub nloop: u32,
    pub delete: bool,
}

impl CaseConfig {
    pub fn has_spinup(&self) -> bool {
        self.begin_spinup.map_or(false, |bs| bs < self.begin)
    }
}

pub fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Name of the restart file written at `time`.
pub fn restart_name(time: NaiveDateTime) -> String {
    format!("RESTART.{}_DOMAIN1", filename_stamp(time))
}

/// Substitution values of one namelist; `restart` switches the restart
/// entry on.
pub fn namelist_vars(
    begin: NaiveDateTime,
    end: NaiveDateTime,
    indir: &Path,
    outdir: &Path,
    wrfinput: &Path,
    restart: Option<&str>,
) -> HashMap<&'static str, String> {
    let mut vars = HashMap::new();
    vars.insert("START_YEAR", begin.year().to_string());
    vars.insert("START_MONTH", begin.month().to_string());
    vars.insert("START_DAY", begin.day().to_string());
    vars.insert("START_HOUR", begin.hour().to_string());
    vars.insert("START_MIN", begin.minute().to_string());
    vars.insert("KDAY", (end - begin).num_days().to_string());
    vars.insert("INDIR", indir.display().to_string());
    vars.insert("OUTDIR", outdir.display().to_string());
    vars.insert("WRFINPUT", wrfinput.display().to_string());
    match restart {
        Some(resfile) => {
            vars.insert("RESON", String::new());
            vars.insert("RESFILE", resfile.to_string());
        }
        None => {
            vars.insert("RESON", "!".to_string());
        }
    }
    vars
}

#[cfg(unix)]
fn link(target: &Path, link: &Path) -> Result<()> {
    if link.symlink_metadata().is_ok() {
        fs::remove_file(link)?;
    }
    std::os::unix::fs::symlink(target, link)?;
    Ok(())
}

#[cfg(not(unix))]
fn link(target: &Path, link: &Path) -> Result<()> {
    if link.symlink_metadata().is_ok() {
        fs::remove_file(link)?;
    }
    fs::copy(target, link)?;
    Ok(())
}

/// Creates the case and returns its run directories in execution order,
/// spinup loops first.
pub fn create_case(config: &CaseConfig) -> Result<Vec<PathBuf>> {
    let caseroot = absolute(&config.caseroot)?;
    let forcing = match &config.forcing {
        Some(dir) => absolute(dir)?,
        None => caseroot.join("ldasin"),
    };
    let wrfinput = match &config.wrfinput {
        Some(file) => absolute(file)?,
        None => caseroot.join("wrfinput_d01"),
    };
    let template_path = config
        .namelist_template
        .clone()
        .unwrap_or_else(|| config.modelroot.join(NAMELIST_TEMPLATE));
    if !template_path.is_file() {
        return Err(NoahMpError::MissingFile {
            path: template_path,
        });
    }

    if config.delete && caseroot.is_dir() {
        info!("deleting {}", caseroot.display());
        fs::remove_dir_all(&caseroot)?;
    }
    fs::create_dir_all(&caseroot)?;
    fs::create_dir_all(&forcing)?;
    let template = fs::read_to_string(&template_path)?;

    for name in NOAHMP_TABLES.iter().chain([&NOAHMP_EXE]) {
        fs::copy(config.modelroot.join(name), caseroot.join(name))?;
    }

    let spinup = config.begin_spinup.filter(|_| config.has_spinup());
    let main_restart = spinup.map(|_| restart_name(config.begin));
    let vars = namelist_vars(
        config.begin,
        config.end,
        &forcing,
        &caseroot,
        &wrfinput,
        main_restart.as_deref(),
    );
    fs::write(caseroot.join(NAMELIST), template_substitute(&template, &vars))?;
    info!("{}", caseroot.display());

    let mut rundirs = Vec::new();
    if let Some(begin_spinup) = spinup {
        let nloop = config.nloop.max(1);
        let loop_restart = restart_name(begin_spinup);
        for iloop in 1..=nloop {
            let dir = caseroot.join(format!("spinup-{:03}", iloop));
            fs::create_dir_all(&dir)?;
            for name in NOAHMP_TABLES.iter().chain([&NOAHMP_EXE]) {
                link(&caseroot.join(name), &dir.join(name))?;
            }
            let restart = (iloop > 1).then_some(loop_restart.as_str());
            let vars = namelist_vars(begin_spinup, config.begin, &forcing, &dir, &wrfinput, restart);
            fs::write(dir.join(NAMELIST), template_substitute(&template, &vars))?;
            info!("{}", dir.display());
            rundirs.push(dir);
        }
    }
    rundirs.push(caseroot);
    Ok(rundirs)
}
