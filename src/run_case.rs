//! Running a case: spinup loops first, then the main period
//!
//! Each run directory is either started fresh, resumed from its newest
//! restart file, or skipped when a restart at the end of its period
//! already exists. The final restart of one stage seeds the next.

use crate::case::{restart_name, NAMELIST, NOAHMP_EXE};
use crate::errors::{NoahMpError, Result};
use crate::namelist::{Namelist, OFFLINE_GROUP};
use crate::netcdf_io::{put_text_record, variable_mut};
use crate::timeutil::{datetime_from_restart, WRF_TIME_FORMAT};
use chrono::NaiveDateTime;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Suffix of the namelist backup kept while a run is resumed.
pub const RESUME_BACKUP_SUFFIX: &str = "-orig-before-resume";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunAction {
    Skip,
    Run,
    Resume(PathBuf),
}

/// Chooses what to do in a run directory.
///
/// `restarts` must be sorted; `requested` is the restart named in the
/// namelist, resolved against the run directory.
pub fn decide_action(restarts: &[PathBuf], requested: Option<&Path>, end: NaiveDateTime) -> Result<RunAction> {
    let Some(latest) = restarts.last() else {
        return Ok(RunAction::Run);
    };
    if datetime_from_restart(latest)? == end {
        return Ok(RunAction::Skip);
    }
    if restarts.len() == 1 && requested == Some(latest.as_path()) {
        return Ok(RunAction::Run);
    }
    Ok(RunAction::Resume(latest.clone()))
}

/// `RESTART.*_DOMAINn` files of a run directory, sorted.
pub fn restart_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = dir.join("RESTART.*_DOMAIN[0-9]");
    let mut files: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())?
        .filter_map(|entry| entry.ok())
        .collect();
    files.sort();
    Ok(files)
}

/// Runs the model executable inside `dir` and waits for it.
pub fn run_model(dir: &Path) -> Result<()> {
    let exe = dir.join(NOAHMP_EXE);
    info!("RUN_CASE: {}", dir.display());
    debug!("{}", exe.display());
    let status = Command::new(&exe).current_dir(dir).status()?;
    if !status.success() {
        return Err(NoahMpError::ModelFailed {
            status: status.to_string(),
        });
    }
    Ok(())
}

/// Runs, resumes or skips one directory; returns whether the model ran.
pub fn run_resume_skip(dir: &Path) -> Result<bool> {
    let namelist_path = dir.join(NAMELIST);
    let mut nml = Namelist::read(&namelist_path)?;
    let end = nml.end_datetime()?;
    let requested = nml
        .get_str(OFFLINE_GROUP, "restart_filename_requested")
        .map(|name| dir.join(name));

    match decide_action(&restart_files(dir)?, requested.as_deref(), end)? {
        RunAction::Skip => {
            info!("{}: restart at {} exists, skipped", dir.display(), end);
            Ok(false)
        }
        RunAction::Run => {
            run_model(dir)?;
            Ok(true)
        }
        RunAction::Resume(restart) => {
            let resumed = datetime_from_restart(&restart)?;
            info!("{}: resuming from {}", dir.display(), restart.display());
            let backup = dir.join(format!("{}{}", NAMELIST, RESUME_BACKUP_SUFFIX));
            fs::rename(&namelist_path, &backup)?;

            nml.set_start(resumed)?;
            nml.set(
                OFFLINE_GROUP,
                "restart_filename_requested",
                restart.display().to_string(),
            )?;
            nml.set(OFFLINE_GROUP, "kday", (end - resumed).num_days())?;
            nml.write(&namelist_path)?;

            let outcome = run_model(dir);
            fs::remove_file(&namelist_path)?;
            fs::rename(&backup, &namelist_path)?;
            outcome.map(|_| true)
        }
    }
}

/// Seeds `current` with the final restart of `previous`, stamped with the
/// start time of `current`.
pub fn process_restart(previous: &Path, current: &Path) -> Result<()> {
    let pre = Namelist::read(&previous.join(NAMELIST))?;
    let cur = Namelist::read(&current.join(NAMELIST))?;
    let source = previous.join(restart_name(pre.end_datetime()?));
    let requested = cur
        .get_str(OFFLINE_GROUP, "restart_filename_requested")
        .ok_or_else(|| NoahMpError::Namelist {
            message: format!(
                "{} has no restart_filename_requested",
                current.join(NAMELIST).display()
            ),
        })?;
    let target = current.join(requested);
    if !source.is_file() {
        return Err(NoahMpError::MissingFile { path: source });
    }
    info!("{} -> {}", source.display(), target.display());
    fs::copy(&source, &target)?;
    let stamp = cur.start_datetime()?.format(WRF_TIME_FORMAT).to_string();
    let mut file = netcdf::append(&target)?;
    let mut times = variable_mut(&mut file, "Times")?;
    put_text_record(&mut times, 0, &stamp)
}

/// Spinup directories of a case in execution order.
pub fn spinup_dirs(caseroot: &Path) -> Result<Vec<PathBuf>> {
    let pattern = caseroot.join("spinup-*");
    let mut dirs: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())?
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

/// Runs every stage of a case. With `fresh`, or once a stage had to be
/// resumed, later stages run from scratch without checking restarts.
pub fn run_case(caseroot: &Path, fresh: bool) -> Result<()> {
    if !caseroot.is_dir() {
        return Err(NoahMpError::MissingFile {
            path: caseroot.to_path_buf(),
        });
    }
    let caseroot = crate::case::absolute(caseroot)?;
    info!("{}", caseroot.display());

    let mut stages = spinup_dirs(&caseroot)?;
    stages.push(caseroot);
    let mut previous: Option<&Path> = None;
    let mut resumed = false;
    for dir in &stages {
        if let Some(prev) = previous {
            process_restart(prev, dir)?;
        }
        if fresh || resumed {
            run_model(dir)?;
        } else {
            resumed = run_resume_skip(dir)?;
        }
        previous = Some(dir);
    }
    Ok(())
}
