//! Merging per-timestep model output into one CF time series
//!
//! The per-timestep `YYYYMMDDHH.LDASOUT_DOMAIN1` files of a case are
//! stacked along an unlimited `time` axis. Grid fields are copied with
//! their vertical axis moved next to time, and the accumulated water
//! budget terms are differenced into fluxes on the way.

use crate::errors::{NoahMpError, Result};
use crate::flux::{is_accumulated, ACC_VARS};
use crate::netcdf_io::{
    copy_attributes, define_variable, put_block_f64, put_series, put_series_f32, read_array_f64,
    string_value, variable, variable_mut, ValueKind, DEFLATE_LEVEL,
};
use crate::normalize::{wrfinput_latlon, MISSING_THRESHOLD};
use crate::timeutil::{datetime_from_filename, filename_stamp, TimeUnits, CF_TIME_UNITS};
use chrono::{Duration, NaiveDateTime};
use ndarray::ArrayD;
use netcdf::{File, FileMut};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const TIME_DIM: &str = "time";
const X_DIM: &str = "west_east";
const Y_DIM: &str = "south_north";
const TIME_VAR: &str = "TIMES";

/// Files selected for a merge and whether they cover the window.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub files: Vec<PathBuf>,
    pub timestep: Duration,
    pub integrity: bool,
}

/// Selects `*.LDASOUT_DOMAIN1` files of `dir` with `begin <= t < end`.
pub fn source_info(dir: &Path, begin: NaiveDateTime, end: NaiveDateTime) -> Result<SourceInfo> {
    let pattern = dir.join("*.LDASOUT_DOMAIN1");
    let mut stamped = Vec::new();
    for path in glob::glob(&pattern.to_string_lossy())?.filter_map(|e| e.ok()) {
        let t = datetime_from_filename(&path)?;
        if t >= begin && t < end {
            stamped.push((t, path));
        }
    }
    stamped.sort();
    Ok(check_series(stamped, begin, end))
}

/// Integrity of a sorted, stamped file list: at least two files, one
/// unique step, and no gap of a full step at either end of the window.
pub fn check_series(
    stamped: Vec<(NaiveDateTime, PathBuf)>,
    begin: NaiveDateTime,
    end: NaiveDateTime,
) -> SourceInfo {
    let steps: BTreeSet<Duration> = stamped.windows(2).map(|w| w[1].0 - w[0].0).collect();
    let timestep = steps.iter().next().copied().unwrap_or_else(Duration::zero);
    let integrity = match (stamped.first(), stamped.last()) {
        (Some((first, _)), Some((last, _))) if stamped.len() > 1 && steps.len() == 1 => {
            *first - begin < timestep && end - *last <= timestep
        }
        _ => false,
    };
    SourceInfo {
        files: stamped.into_iter().map(|(_, p)| p).collect(),
        timestep,
        integrity,
    }
}

/// Where one source variable lands in the merged file.
#[derive(Debug, Clone)]
struct VarPlan {
    name: String,
    kind: ValueKind,
    /// Output dimension names, `(time, z, south_north, west_east)` subset.
    dims: Vec<String>,
    /// Source axis feeding each output axis.
    perm: Vec<usize>,
    accumulated: bool,
}

impl VarPlan {
    fn has_time(&self) -> bool {
        self.dims.first().map(String::as_str) == Some(TIME_DIM)
    }

    /// Source values with axes in output order.
    fn read(&self, file: &File) -> Result<ArrayD<f64>> {
        let values = read_array_f64(&variable(file, &self.name)?)?;
        Ok(values.permuted_axes(self.perm.clone()).as_standard_layout().into_owned())
    }

    fn write(&self, out: &mut FileMut, index: usize, values: &ArrayD<f64>) -> Result<()> {
        let mut start = vec![0; values.ndim()];
        if self.has_time() {
            start[0] = index;
        }
        let flat: Vec<f64> = values.iter().copied().collect();
        let mut var = variable_mut(out, &self.name)?;
        put_block_f64(&mut var, &start, values.shape(), &flat)
    }
}

fn plan_variable(file: &File, name: &str) -> Result<Option<VarPlan>> {
    let var = variable(file, name)?;
    let kind = ValueKind::of(&var);
    if !matches!(
        kind,
        ValueKind::Float | ValueKind::Double | ValueKind::Int | ValueKind::Short | ValueKind::Byte
    ) {
        warn!("skipped non-numeric variable {}", name);
        return Ok(None);
    }
    let source: Vec<String> = var
        .dimensions()
        .iter()
        .map(|d| d.name().to_lowercase())
        .collect();
    let mut zdims: Vec<&String> = source
        .iter()
        .filter(|d| !matches!(d.as_str(), TIME_DIM | Y_DIM | X_DIM))
        .collect();
    if zdims.len() > 1 {
        return Err(NoahMpError::UnsupportedLayout {
            message: format!("don't support multiple z-axis: {:?} of {}", zdims, name),
        });
    }

    let mut dims = Vec::new();
    if source.iter().any(|d| d == TIME_DIM) {
        dims.push(TIME_DIM.to_string());
    }
    if let Some(z) = zdims.pop() {
        dims.push(z.clone());
    }
    for d in [Y_DIM, X_DIM] {
        if source.iter().any(|s| s == d) {
            dims.push(d.to_string());
        }
    }
    let perm = dims
        .iter()
        .map(|d| source.iter().position(|s| s == d).unwrap_or_default())
        .collect();
    Ok(Some(VarPlan {
        name: name.to_string(),
        kind,
        dims,
        perm,
        accumulated: is_accumulated(name),
    }))
}

fn is_grid_placeholder(name: &str) -> bool {
    let upper = name.to_uppercase();
    upper == TIME_VAR || upper == X_DIM.to_uppercase() || upper == Y_DIM.to_uppercase()
}

/// Flux wording of an accumulated variable's description.
pub fn flux_description(description: &str) -> String {
    description
        .to_lowercase()
        .replace("accumulated ", "")
        .replace("accumulatetd ", "")
}

fn define_output(wrfinput: &Path, fi: &File, fo: &mut FileMut) -> Result<Vec<VarPlan>> {
    let latlon = wrfinput_latlon(&netcdf::open(wrfinput)?)?;

    let lengths: HashMap<String, usize> = fi
        .dimensions()
        .map(|d| (d.name().to_lowercase(), d.len()))
        .collect();
    let mut names: Vec<String> = fi.variables().map(|v| v.name()).collect();
    names.sort();
    let mut plans = Vec::new();
    for name in names.iter().filter(|n| !is_grid_placeholder(n)) {
        if let Some(plan) = plan_variable(fi, name)? {
            plans.push(plan);
        }
    }

    let used: BTreeSet<&String> = plans.iter().flat_map(|p| p.dims.iter()).collect();
    for dim in used {
        if dim == TIME_DIM {
            fo.add_unlimited_dimension(dim)?;
        } else {
            let len = lengths
                .get(dim)
                .copied()
                .ok_or_else(|| NoahMpError::DimensionNotFound { dim: dim.clone() })?;
            fo.add_dimension(dim, len)?;
        }
    }
    if fo.dimension(TIME_DIM).is_none() {
        fo.add_unlimited_dimension(TIME_DIM)?;
    }

    for (dim, standard_name, units, axis) in [
        (X_DIM, "longitude", "degree_east", "X"),
        (Y_DIM, "latitude", "degree_north", "Y"),
    ] {
        let len = lengths.get(dim).copied().unwrap_or_default();
        if fo.dimension(dim).is_none() {
            fo.add_dimension(dim, len)?;
        }
        let values = match (&latlon, dim) {
            (Some(grid), X_DIM) => grid.lon.clone(),
            (Some(grid), _) => grid.lat.clone(),
            (None, _) => vec![f32::NAN; len],
        };
        if values.len() != len {
            return Err(NoahMpError::UnsupportedLayout {
                message: format!("{} has {} points but the WRF input has {}", dim, len, values.len()),
            });
        }
        let mut var = fo.add_variable::<f32>(dim, &[dim])?;
        var.set_compression(DEFLATE_LEVEL, false)?;
        var.put_attribute("standard_name", standard_name)?;
        var.put_attribute("units", units)?;
        var.put_attribute("axis", axis)?;
        put_series_f32(&mut var, &values)?;
    }

    let mut time = fo.add_variable::<f64>(TIME_DIM, &[TIME_DIM])?;
    time.set_compression(DEFLATE_LEVEL, false)?;
    time.put_attribute("standard_name", "time")?;
    time.put_attribute("units", CF_TIME_UNITS)?;
    time.put_attribute("calendar", "standard")?;
    time.put_attribute("axis", "T")?;

    for plan in &plans {
        let src = variable(fi, &plan.name)?;
        let dims: Vec<&str> = plan.dims.iter().map(String::as_str).collect();
        let mut var = define_variable(fo, plan.kind, &plan.name, &dims)?;
        var.set_compression(DEFLATE_LEVEL, false)?;
        match plan.kind {
            ValueKind::Float => var.set_fill_value(f32::NAN)?,
            ValueKind::Double => var.set_fill_value(f64::NAN)?,
            _ => {}
        }
        if plan.accumulated {
            copy_attributes(&src, &mut var, &["_FillValue", "units", "description"])?;
            if let Some(units) = string_value(src.attribute("units")) {
                var.put_attribute("units", format!("{} s-1", units))?;
            }
            if let Some(description) = string_value(src.attribute("description")) {
                var.put_attribute("description", flux_description(&description))?;
            }
        } else {
            copy_attributes(&src, &mut var, &["_FillValue"])?;
        }
    }

    for attr in fi.attributes() {
        match attr.value() {
            Ok(value) => {
                fo.add_attribute(attr.name(), value)?;
            }
            Err(e) => warn!("skipped unreadable global attribute '{}': {}", attr.name(), e),
        }
    }
    Ok(plans)
}

fn mask_invalid(values: &mut ArrayD<f64>) {
    values.par_mapv_inplace(|v| if v <= MISSING_THRESHOLD { f64::NAN } else { v });
}

/// `(current - previous) / dt` of an accumulated variable, both masked.
fn flux_record(plan: &VarPlan, current: &File, previous: &File, dt_seconds: f64) -> Result<ArrayD<f64>> {
    let mut c = plan.read(current)?;
    let mut p = plan.read(previous)?;
    mask_invalid(&mut c);
    mask_invalid(&mut p);
    if c.shape() != p.shape() {
        return Err(NoahMpError::UnsupportedLayout {
            message: format!("{} changes shape between files", plan.name),
        });
    }
    Ok((c - p) / dt_seconds)
}

/// Merges the per-timestep files of `dir` in `[begin, end)` into `out`.
///
/// Without `partially` the window must be fully covered (see
/// [`check_series`]).
pub fn merge_ldasout(
    wrfinput: &Path,
    dir: &Path,
    out: &Path,
    begin: NaiveDateTime,
    end: NaiveDateTime,
    partially: bool,
) -> Result<()> {
    let info = source_info(dir, begin, end)?;
    if !info.integrity && !partially {
        return Err(NoahMpError::IncompleteSeries {
            message: "not enough files (try --partially)".to_string(),
        });
    }
    let Some(first) = info.files.first() else {
        return Err(NoahMpError::IncompleteSeries {
            message: format!("no output files in {}", dir.display()),
        });
    };
    let dt_seconds = info.timestep.num_seconds() as f64;
    let units = TimeUnits::parse(CF_TIME_UNITS)?;

    if out.exists() {
        std::fs::remove_file(out)?;
    }
    let mut fo = netcdf::create(out)?;
    let plans = define_output(wrfinput, &netcdf::open(first)?, &mut fo)?;
    let acc_plans: Vec<&VarPlan> = plans.iter().filter(|p| p.accumulated).collect();
    let mut times = Vec::with_capacity(info.files.len());
    let mut second_record: HashMap<String, ArrayD<f64>> = HashMap::new();

    for (index, path) in info.files.iter().enumerate() {
        info!("{}", path.display());
        let fi = netcdf::open(path)?;
        times.push(units.from_datetime(datetime_from_filename(path)?));
        for plan in plans.iter().filter(|p| !p.accumulated) {
            if !plan.has_time() && index > 0 {
                continue;
            }
            let mut values = plan.read(&fi)?;
            if plan.kind.is_floating() {
                mask_invalid(&mut values);
            }
            plan.write(&mut fo, index, &values)?;
        }
        if index > 0 {
            let fp = netcdf::open(&info.files[index - 1])?;
            for plan in &acc_plans {
                let flux = flux_record(plan, &fi, &fp, dt_seconds)?;
                plan.write(&mut fo, index, &flux)?;
                if index == 1 {
                    second_record.insert(plan.name.clone(), flux);
                }
            }
        }
    }
    {
        let mut time = variable_mut(&mut fo, TIME_DIM)?;
        put_series(&mut time, &times)?;
    }

    info!("acc to flux");
    let start = datetime_from_filename(first)? - info.timestep;
    let startfile = dir.join(format!("{}.LDASOUT_DOMAIN1", filename_stamp(start)));
    if info.files.len() > 1 && startfile.exists() {
        let fc = netcdf::open(first)?;
        let fp = netcdf::open(&startfile)?;
        for plan in &acc_plans {
            let flux = flux_record(plan, &fc, &fp, dt_seconds)?;
            plan.write(&mut fo, 0, &flux)?;
        }
    } else {
        let fc = netcdf::open(first)?;
        for plan in &acc_plans {
            let record = match second_record.remove(&plan.name) {
                Some(record) => record,
                None => ArrayD::zeros(plan.read(&fc)?.raw_dim()),
            };
            plan.write(&mut fo, 0, &record)?;
        }
    }

    let missing: Vec<&str> = ACC_VARS
        .iter()
        .map(|a| a.name)
        .filter(|name| !plans.iter().any(|p| p.name.eq_ignore_ascii_case(name)))
        .collect();
    if !missing.is_empty() {
        warn!("accumulated variables not found: {}", missing.join(", "));
    }
    Ok(())
}
