//! Normalizers that bring model files closer to CF conventions
//!
//! `ldasout2cf` and `ldasout_tocf` rename the WRF-style dimensions, put
//! them in `time, z, lat, lon` order, replace missing values with NaN and
//! attach a numeric `time` coordinate. `strip_output` trims static soil
//! parameters from finished cases and `wrfinput_subset` extracts the few
//! WRF input fields the tools downstream need.

use crate::errors::Result;
use crate::nco::Nco;
use crate::netcdf_io::{
    copy_attributes, copy_global_attributes, dimension_names, numeric_value, put_array_f64,
    put_series, put_series_f32, read_array, read_array_f64, shape, variable, variable_mut,
    GridValues, ValueKind, DEFLATE_LEVEL,
};
use crate::timeutil::{datetime_from_filename, parse_wrf_times, TimeUnits, CF_TIME_UNITS};
use ndarray::{Array2, ArrayD, Axis, Ix2};
use netcdf::{File, FileMut, Options};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Values at or below this are treated as missing regardless of attributes.
pub const MISSING_THRESHOLD: f64 = -1.0e10;

/// Coordinate-like variables that are never masked.
pub const FIXED_VARS: [&str; 7] = ["time", "south_north", "west_east", "lat", "lon", "xlat", "xlon"];

const CF_ORDER: [&str; 5] = ["time", "snow_layers", "soil_layers_stag", "lat", "lon"];
const WRF_ORDER: [&str; 5] = ["Time", "snow_layers", "soil_layers_stag", "south_north", "west_east"];
const DIM_RENAMES: [(&str, &str); 3] = [("west_east", "lon"), ("south_north", "lat"), ("Time", "time")];

/// Static soil parameters dropped by [`strip_output`].
pub const STATIC_SOIL_VARS: [&str; 6] = ["BBXY", "SATPSIXY", "SATDKXY", "MAXSMCXY", "REFSMCXY", "WLTSMCXY"];

pub const SUBSET_DIMS: [&str; 3] = ["Time", "south_north", "west_east"];
pub const SUBSET_VARS: [&str; 9] = [
    "HGT", "ISLTYP", "IVGTYP", "TMN", "XLAT", "XLONG", "XLAND", "MAPFAC_MX", "MAPFAC_MY",
];
pub const SUBSET_GLOBAL_ATTRS: [&str; 12] = [
    "DX", "DY", "GRID_ID", "TRUELAT1", "TRUELAT2", "STAND_LON", "MAP_PROJ", "MMINLU", "ISWATER",
    "ISURBAN", "ISICE", "ISOILWATER",
];

/// WRF map projection code of a regular lat/lon grid.
pub const MAP_PROJ_LATLON: i32 = 6;

pub fn is_fixed_var(name: &str) -> bool {
    FIXED_VARS.iter().any(|v| v.eq_ignore_ascii_case(name))
}

pub fn is_missing(value: f64, missing_value: Option<f64>) -> bool {
    value <= MISSING_THRESHOLD || missing_value.map_or(false, |mv| value == mv)
}

/// Replaces missing values with NaN.
pub fn mask_missing(values: &mut ArrayD<f64>, missing_value: Option<f64>) {
    values.par_mapv_inplace(|v| if is_missing(v, missing_value) { f64::NAN } else { v });
}

/// 1-D latitude and longitude of a regular lat/lon WRF grid.
#[derive(Debug, Clone, PartialEq)]
pub struct LatLon {
    pub lat: Vec<f32>,
    pub lon: Vec<f32>,
}

/// Reads `XLAT[:,0]` and `XLONG[0,:]` when the WRF input uses a regular
/// lat/lon projection; `None` otherwise.
pub fn wrfinput_latlon(wrfinput: &File) -> Result<Option<LatLon>> {
    let map_proj = numeric_value(wrfinput.attribute("MAP_PROJ")).map(|v| v as i32);
    if map_proj != Some(MAP_PROJ_LATLON) {
        return Ok(None);
    }
    let xlat = last_plane(read_array(&variable(wrfinput, "XLAT")?)?)?;
    let xlong = last_plane(read_array(&variable(wrfinput, "XLONG")?)?)?;
    Ok(Some(LatLon {
        lat: xlat.column(0).to_vec(),
        lon: xlong.row(0).to_vec(),
    }))
}

/// First `(y, x)` plane of an array with leading singleton dimensions.
fn last_plane(mut values: ArrayD<f32>) -> Result<Array2<f32>> {
    while values.ndim() > 2 {
        values = values.index_axis_move(Axis(0), 0);
    }
    Ok(values.into_dimensionality::<Ix2>()?)
}

#[derive(Debug, Default)]
struct Layout {
    renames: Vec<(&'static str, &'static str)>,
    has_times: bool,
}

fn inspect(path: &Path) -> Result<Layout> {
    let file = netcdf::open(path)?;
    Ok(Layout {
        renames: DIM_RENAMES
            .iter()
            .copied()
            .filter(|(old, _)| file.dimension(old).is_some())
            .collect(),
        has_times: file.variable("Times").is_some(),
    })
}

/// Masks every floating, non-coordinate variable of an open file.
fn mask_file(file: &mut FileMut) -> Result<()> {
    let missing_value = numeric_value(file.attribute("missing_value"));
    let names: Vec<String> = file
        .variables()
        .filter(|v| !is_fixed_var(&v.name()) && ValueKind::of(v).is_floating())
        .map(|v| v.name())
        .collect();
    for name in names {
        let mut values = read_array_f64(&variable(file, &name)?)?;
        mask_missing(&mut values, missing_value);
        let mut var = variable_mut(file, &name)?;
        put_array_f64(&mut var, &values)?;
    }
    Ok(())
}

fn define_time(file: &mut FileMut) -> Result<()> {
    let mut var = file.add_variable::<f64>("time", &["time"])?;
    var.set_compression(DEFLATE_LEVEL, false)?;
    Ok(())
}

fn set_time(file: &mut FileMut, values: &[f64]) -> Result<()> {
    let mut var = variable_mut(file, "time")?;
    var.put_attribute("units", CF_TIME_UNITS)?;
    var.put_attribute("calendar", "standard")?;
    put_series(&mut var, values)
}

/// Normalizes per-timestep output files in place, taking each file's
/// time from its name.
pub fn ldasout2cf(files: &[PathBuf], nco: &Nco) -> Result<()> {
    let units = TimeUnits::parse(CF_TIME_UNITS)?;
    for path in files {
        info!("{}", path.display());
        let layout = inspect(path)?;
        nco.permute_in_place(&CF_ORDER, path)?;
        for (old, new) in &layout.renames {
            nco.rename_dimension(old, new, path)?;
        }
        if layout.has_times {
            nco.exclude_variables_in_place(&["Times"], path)?;
        }

        let time = units.from_datetime(datetime_from_filename(path)?);
        let mut file = netcdf::append(path)?;
        mask_file(&mut file)?;
        if file.variable("time").is_none() {
            define_time(&mut file)?;
        }
        set_time(&mut file, &[time])?;
    }
    Ok(())
}

/// Normalizes model output files in place using the WRF input for grid
/// coordinates and the `Times` variable for the time axis.
pub fn ldasout_tocf(wrfinput: &Path, files: &[PathBuf], nco: &Nco) -> Result<()> {
    let latlon = wrfinput_latlon(&netcdf::open(wrfinput)?)?;
    let units = TimeUnits::parse(CF_TIME_UNITS)?;
    let rename = Nco::plain().with_bindir(nco.bindir.clone());

    for path in files {
        info!("{}", path.display());
        let layout = inspect(path)?;
        for (old, new) in &layout.renames {
            rename.rename_dimension(old, new, path)?;
        }
        nco.permute_in_place(&CF_ORDER, path)?;

        {
            let mut file = netcdf::append(path)?;
            mask_file(&mut file)?;
            if let Some(grid) = &latlon {
                append_axis(&mut file, "lat", &grid.lat, "degree_north", "latitude")?;
                append_axis(&mut file, "lon", &grid.lon, "degree_east", "longitude")?;
            }
            if file.variable("time").is_none() && layout.has_times {
                let raw = variable(&file, "Times")?.get_raw_values(..)?;
                let values: Vec<f64> = parse_wrf_times(&raw)?
                    .into_iter()
                    .map(|dt| units.from_datetime(dt))
                    .collect();
                define_time(&mut file)?;
                set_time(&mut file, &values)?;
            }
        }

        if layout.has_times {
            nco.exclude_variables_in_place(&["Times"], path)?;
        }
    }
    Ok(())
}

fn append_axis(
    file: &mut FileMut,
    name: &str,
    values: &[f32],
    units: &str,
    standard_name: &str,
) -> Result<()> {
    if file.variable(name).is_some() {
        return Ok(());
    }
    let mut var = file.add_variable::<f32>(name, &[name])?;
    var.set_compression(DEFLATE_LEVEL, false)?;
    var.put_attribute("units", units)?;
    var.put_attribute("standard_name", standard_name)?;
    put_series_f32(&mut var, values)
}

/// Per-timestep output files of a case directory, any domain.
pub fn output_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = dir.join("*.LDASOUT_DOMAIN[0-9]");
    let mut files: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())?
        .filter_map(|entry| entry.ok())
        .collect();
    files.sort();
    Ok(files)
}

/// Drops static soil parameters from every output file of `dirs` and
/// restores the WRF dimension order.
pub fn strip_output(dirs: &[PathBuf], nco: &Nco) -> Result<usize> {
    let nco = Nco {
        deflate_level: None,
        ..nco.clone()
    };
    let mut count = 0;
    for dir in dirs {
        for path in output_files(dir)? {
            info!("{}", path.display());
            nco.exclude_variables_in_place(&STATIC_SOIL_VARS, &path)?;
            nco.permute_in_place(&WRF_ORDER, &path)?;
            count += 1;
        }
    }
    Ok(count)
}

/// Copies the grid description fields of a WRF input file into a compact
/// NetCDF-4 classic file.
pub fn wrfinput_subset(nc4: &Path, nc3: &Path) -> Result<()> {
    info!("{} -> {}", nc4.display(), nc3.display());
    let src = netcdf::open(nc4)?;
    let mut dst = netcdf::create_with(nc3, Options::NETCDF4 | Options::CLASSIC)?;

    for name in SUBSET_DIMS {
        match src.dimension(name) {
            Some(dim) if dim.is_unlimited() => {
                dst.add_unlimited_dimension(name)?;
            }
            Some(dim) => {
                dst.add_dimension(name, dim.len())?;
            }
            None => warn!("unknown dimension name: {}", name),
        }
    }

    for name in SUBSET_VARS {
        let Some(var) = src.variable(name) else {
            warn!("unknown variable name: {}", name);
            continue;
        };
        let values = GridValues::read(&var)?;
        let dims = dimension_names(&var);
        let dims: Vec<&str> = dims.iter().map(String::as_str).collect();
        let count = shape(&var);
        let fill = numeric_value(var.attribute("_FillValue"))
            .or_else(|| numeric_value(var.attribute("missing_value")));

        let mut out = values.define(&mut dst, name, &dims)?;
        out.set_compression(DEFLATE_LEVEL, false)?;
        if let Some(fill) = fill {
            values.set_fill(&mut out, fill)?;
        }
        copy_attributes(&var, &mut out, &["_FillValue"])?;
        values.put(&mut out, &vec![0; count.len()], &count)?;
    }

    copy_global_attributes(&src, &mut dst, &SUBSET_GLOBAL_ATTRS)?;
    Ok(())
}
