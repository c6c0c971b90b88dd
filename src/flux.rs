//! Accumulated variables to instantaneous fluxes
//!
//! Noah-MP writes snowfall, snowmelt and runoff as running totals since the
//! start of the simulation. A rate is recovered by differencing consecutive
//! records and dividing by the elapsed time; the first record of a series
//! has no predecessor and is defined as zero flux.

use crate::errors::{NoahMpError, Result};
use crate::netcdf_io::{put_array, read_array, read_array_f64, required_string, variable, variable_mut};
use crate::timeutil::{datetime_from_filename, TimeUnits};
use chrono::Duration;
use ndarray::{ArrayD, ArrayViewD, Axis, Zip};
use netcdf::VariableMut;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// An accumulated model variable and the description of its flux.
#[derive(Debug, Clone, Copy)]
pub struct AccVar {
    pub name: &'static str,
    pub description: &'static str,
}

pub const ACC_VARS: [AccVar; 4] = [
    AccVar {
        name: "ACSNOW",
        description: "snow fall",
    },
    AccVar {
        name: "ACSNOM",
        description: "melting water out of snow bottom",
    },
    AccVar {
        name: "SFCRNOFF",
        description: "surface runoff",
    },
    AccVar {
        name: "UGDRNOFF",
        description: "underground runoff",
    },
];

pub const FLUX_UNITS: &str = "mm s-1";

/// Output cadence of per-timestep LDASOUT files.
pub const LDASOUT_CADENCE_HOURS: i64 = 3;

pub fn is_accumulated(name: &str) -> bool {
    ACC_VARS.iter().any(|v| v.name.eq_ignore_ascii_case(name))
}

/// `(current - previous) / dt`, element-wise.
pub fn difference_flux(
    current: &ArrayViewD<f32>,
    previous: &ArrayViewD<f32>,
    dt_seconds: f64,
) -> ArrayD<f32> {
    let dt = dt_seconds as f32;
    let mut flux = current.to_owned();
    Zip::from(&mut flux)
        .and(previous)
        .par_for_each(|c, &p| *c = (*c - p) / dt);
    flux
}

/// Converts a series along axis 0 into fluxes: record 0 is zero, record t
/// is `(v[t] - v[t-1]) / dt`.
pub fn accumulated_to_flux(series: &ArrayD<f32>, dt_seconds: f64) -> ArrayD<f32> {
    let mut flux = ArrayD::<f32>::zeros(series.raw_dim());
    if series.ndim() == 0 {
        return flux;
    }
    for t in 1..series.len_of(Axis(0)) {
        let rate = difference_flux(
            &series.index_axis(Axis(0), t),
            &series.index_axis(Axis(0), t - 1),
            dt_seconds,
        );
        flux.index_axis_mut(Axis(0), t).assign(&rate);
    }
    flux
}

fn set_flux_attributes(var: &mut VariableMut, acc: &AccVar) -> Result<()> {
    var.put_attribute("units", FLUX_UNITS)?;
    var.put_attribute("description", acc.description)?;
    Ok(())
}

/// Rewrites the accumulated variables of one merged file in place.
///
/// The timestep is taken from the last two `time` values.
pub fn acc2flx_file(path: &Path) -> Result<()> {
    let mut file = netcdf::append(path)?;
    let dt_seconds = {
        let time = variable(&file, "time")?;
        let units = TimeUnits::parse(&required_string(&time, "units")?)?;
        let values = read_array_f64(&time)?.into_raw_vec();
        match values.len() {
            0 | 1 => {
                warn!("{}: fewer than two records, fluxes set to zero", path.display());
                1.0
            }
            n => {
                let last = units.to_datetime(values[n - 1])?;
                let prev = units.to_datetime(values[n - 2])?;
                (last - prev).num_milliseconds() as f64 / 1000.0
            }
        }
    };
    for acc in &ACC_VARS {
        let series = read_array(&variable(&file, acc.name)?)?;
        let flux = accumulated_to_flux(&series, dt_seconds);
        let mut var = variable_mut(&mut file, acc.name)?;
        put_array(&mut var, &flux)?;
        set_flux_attributes(&mut var, acc)?;
    }
    Ok(())
}

/// Per-timestep `*.LDASOUT_DOMAIN1` files of a case, oldest first.
pub fn ldasout_files(caseroot: &Path) -> Result<Vec<PathBuf>> {
    let pattern = caseroot.join("*.LDASOUT_DOMAIN1");
    let mut files: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())?
        .filter_map(|entry| entry.ok())
        .collect();
    files.sort();
    Ok(files)
}

/// Converts every per-timestep output file of a case in place.
///
/// Files are visited newest first so each predecessor is still accumulated
/// when it is read. A gap in the 3-hourly cadence stops the run; files
/// already converted stay converted.
pub fn ldasout_diff(caseroot: &Path) -> Result<()> {
    let mut files = ldasout_files(caseroot)?;
    files.reverse();
    let Some(oldest) = files.last().cloned() else {
        return Err(NoahMpError::MissingFile {
            path: caseroot.join("*.LDASOUT_DOMAIN1"),
        });
    };
    let cadence = Duration::hours(LDASOUT_CADENCE_HOURS);

    for pair in files.windows(2) {
        let (current, previous) = (&pair[0], &pair[1]);
        let tc = datetime_from_filename(current)?;
        let tp = datetime_from_filename(previous)?;
        info!("{}", current.display());
        if tc - tp != cadence {
            let missing = (tc - cadence).format("%Y-%m-%d %H:%M:%S").to_string();
            return Err(NoahMpError::IrregularTimestep { missing });
        }
        let dt_seconds = (tc - tp).num_seconds() as f64;

        let fp = netcdf::open(previous)?;
        let mut fc = netcdf::append(current)?;
        for acc in &ACC_VARS {
            let prev = read_array(&variable(&fp, acc.name)?)?;
            let curr = read_array(&variable(&fc, acc.name)?)?;
            let flux = difference_flux(&curr.view(), &prev.view(), dt_seconds);
            let mut var = variable_mut(&mut fc, acc.name)?;
            put_array(&mut var, &flux)?;
            set_flux_attributes(&mut var, acc)?;
        }
    }

    info!("{}", oldest.display());
    let mut fc = netcdf::append(&oldest)?;
    for acc in &ACC_VARS {
        let zeros = ArrayD::<f32>::zeros(read_array(&variable(&fc, acc.name)?)?.raw_dim());
        let mut var = variable_mut(&mut fc, acc.name)?;
        put_array(&mut var, &zeros)?;
        set_flux_attributes(&mut var, acc)?;
    }
    Ok(())
}
