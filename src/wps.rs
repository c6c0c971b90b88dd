//! WPS intermediate-format writer for gridded forcing
//!
//! Each 2-D field is written as five Fortran unformatted sequential
//! records (big-endian, every record framed by its byte length): version,
//! header, lat/lon projection, wind rotation flag and the data block in
//! column-major order. Files are named `<prefix>:YYYY-MM-DD_HH` and hold
//! every field valid at that time.

use crate::errors::{NoahMpError, Result};
use crate::netcdf_io::{dimension_len, read_array, read_array_f64, required_string, string_value, variable};
use crate::timeutil::TimeUnits;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use chrono::NaiveDateTime;
use ndarray::{ArrayView2, Axis, Ix2};
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};
use tracing::info;

pub const WPS_VERSION: i32 = 5;
pub const EARTH_RADIUS_KM: f32 = 6371.229004;
/// Projection code of a cylindrical equidistant (lat/lon) grid.
pub const IPROJ_LATLON: i32 = 0;

pub const HDATE_FORMAT: &str = "%Y:%m:%d_%H:%M:%S";
pub const OUTPUT_TIME_FORMAT: &str = "%Y-%m-%d_%H";

/// Forcing variables recognised in input files, one per file.
pub const FORCING_VARS: [&str; 7] = ["dswrf", "dlwrf", "wind", "tas", "shum", "pres", "prcp"];

/// Header of one lat/lon field.
#[derive(Debug, Clone, PartialEq)]
pub struct WpsField {
    pub hdate: NaiveDateTime,
    pub xfcst: f32,
    pub map_source: String,
    pub field: String,
    pub units: String,
    pub desc: String,
    pub xlvl: f32,
    pub startloc: String,
    pub startlat: f32,
    pub startlon: f32,
    pub deltalat: f32,
    pub deltalon: f32,
    pub is_wind_grid_rel: bool,
}

/// Left-justifies `text` in a field of `width` bytes, truncating overflow.
pub fn pad(text: &str, width: usize) -> Vec<u8> {
    let mut bytes: Vec<u8> = text.bytes().take(width).collect();
    bytes.resize(width, b' ');
    bytes
}

/// Writes one Fortran sequential record.
fn write_record<W: Write>(w: &mut W, payload: &[u8]) -> Result<()> {
    w.write_u32::<BigEndian>(payload.len() as u32)?;
    w.write_all(payload)?;
    w.write_u32::<BigEndian>(payload.len() as u32)?;
    Ok(())
}

/// Writes one level of a field. `data` is indexed `(x, y)`; `nx` and `ny`
/// in the header are its two extents.
pub fn write_latlon_field<W: Write>(w: &mut W, field: &WpsField, data: ArrayView2<f32>) -> Result<()> {
    let (nx, ny) = data.dim();

    let mut version = Vec::with_capacity(4);
    version.write_i32::<BigEndian>(WPS_VERSION)?;
    write_record(w, &version)?;

    let mut header = Vec::with_capacity(156);
    header.extend(pad(&field.hdate.format(HDATE_FORMAT).to_string(), 24));
    header.write_f32::<BigEndian>(field.xfcst)?;
    header.extend(pad(&field.map_source, 32));
    header.extend(pad(&field.field, 9));
    header.extend(pad(&field.units, 25));
    header.extend(pad(&field.desc, 46));
    header.write_f32::<BigEndian>(field.xlvl)?;
    header.write_i32::<BigEndian>(nx as i32)?;
    header.write_i32::<BigEndian>(ny as i32)?;
    header.write_i32::<BigEndian>(IPROJ_LATLON)?;
    write_record(w, &header)?;

    let mut proj = Vec::with_capacity(28);
    proj.extend(pad(&field.startloc, 8));
    for v in [
        field.startlat,
        field.startlon,
        field.deltalat,
        field.deltalon,
        EARTH_RADIUS_KM,
    ] {
        proj.write_f32::<BigEndian>(v)?;
    }
    write_record(w, &proj)?;

    let mut wind = Vec::with_capacity(4);
    wind.write_u32::<BigEndian>(field.is_wind_grid_rel as u32)?;
    write_record(w, &wind)?;

    // Fortran order: first index fastest.
    let mut block = Vec::with_capacity(nx * ny * 4);
    for v in data.t().iter() {
        block.write_f32::<BigEndian>(*v)?;
    }
    write_record(w, &block)
}

/// `<prefix>:YYYY-MM-DD_HH`
pub fn output_path(prefix: &str, time: NaiveDateTime) -> PathBuf {
    PathBuf::from(format!("{}:{}", prefix, time.format(OUTPUT_TIME_FORMAT)))
}

fn in_window(t: NaiveDateTime, begin: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> bool {
    begin.map_or(true, |b| t >= b) && end.map_or(true, |e| t < e)
}

fn file_times(file: &netcdf::File) -> Result<Vec<NaiveDateTime>> {
    let time = variable(file, "time")?;
    let units = TimeUnits::parse(&required_string(&time, "units")?)?;
    read_array_f64(&time)?
        .iter()
        .map(|&v| units.to_datetime(v))
        .collect()
}

/// First two values of a 1-D coordinate as `(start, delta)`.
fn start_delta(file: &netcdf::File, name: &str) -> Result<(f32, f32)> {
    let values = read_array(&variable(file, name)?)?;
    match values.as_slice() {
        Some([first, second, ..]) => Ok((*first, second - first)),
        _ => Err(NoahMpError::UnsupportedLayout {
            message: format!("coordinate '{}' needs at least two points", name),
        }),
    }
}

/// Converts forcing files to intermediate files and returns the files
/// written, in order of first write.
pub fn ungrib(
    files: &[PathBuf],
    prefix: &str,
    append: bool,
    begin: Option<NaiveDateTime>,
    end: Option<NaiveDateTime>,
) -> Result<Vec<PathBuf>> {
    let mut dates = BTreeSet::new();
    for path in files {
        if !path.is_file() {
            return Err(NoahMpError::MissingFile { path: path.clone() });
        }
        dates.extend(file_times(&netcdf::open(path)?)?);
    }
    if !append {
        for date in dates.into_iter().filter(|&d| in_window(d, begin, end)) {
            let out = output_path(prefix, date);
            if out.is_file() {
                fs::remove_file(&out)?;
            }
        }
    }

    let mut written = Vec::new();
    for path in files {
        let file = netcdf::open(path)?;
        let name = FORCING_VARS
            .iter()
            .copied()
            .find(|v| file.variable(v).is_some())
            .ok_or_else(|| NoahMpError::VariableNotFound {
                var: format!("one of {} in {}", FORCING_VARS.join(" "), path.display()),
            })?;
        let var = variable(&file, name)?;
        let values = read_array(&var)?;
        if values.ndim() != 4 {
            return Err(NoahMpError::UnsupportedLayout {
                message: format!("{} must be (time, z, latitude, longitude)", name),
            });
        }
        let levels = read_array(&variable(&file, "z")?)?;
        let (startlat, deltalat) = start_delta(&file, "latitude")?;
        let (startlon, deltalon) = start_delta(&file, "longitude")?;
        let nx = dimension_len(&file, "latitude")?;
        let ny = dimension_len(&file, "longitude")?;

        let map_source = string_value(var.attribute("source")).unwrap_or_default();
        let units = string_value(var.attribute("units")).unwrap_or_default();
        let desc = string_value(var.attribute("title")).unwrap_or_default();

        for (it, date) in file_times(&file)?.into_iter().enumerate() {
            if !in_window(date, begin, end) {
                continue;
            }
            let out = output_path(prefix, date);
            info!("{}", out.display());
            let handle = OpenOptions::new().create(true).append(true).open(&out)?;
            let mut w = BufWriter::new(handle);
            let mut field = WpsField {
                hdate: date,
                xfcst: 0.0,
                map_source: map_source.clone(),
                field: name.to_uppercase(),
                units: units.clone(),
                desc: desc.clone(),
                xlvl: 0.0,
                startloc: "SWCORNER".to_string(),
                startlat,
                startlon,
                deltalat,
                deltalon,
                is_wind_grid_rel: false,
            };
            let record = values.index_axis(Axis(0), it);
            for (iz, &xlvl) in levels.iter().enumerate() {
                field.xlvl = xlvl;
                let level = record.index_axis(Axis(0), iz).into_dimensionality::<Ix2>()?;
                if level.dim() != (nx, ny) {
                    return Err(NoahMpError::UnsupportedLayout {
                        message: format!("{} level is not latitude x longitude", name),
                    });
                }
                write_latlon_field(&mut w, &field, level)?;
            }
            w.flush()?;
            if !written.contains(&out) {
                written.push(out);
            }
        }
    }
    Ok(written)
}

/// Reads back the field names and levels stored in an intermediate file.
pub fn list_fields(path: &Path) -> Result<Vec<(String, f32)>> {
    let bytes = fs::read(path)?;
    let total = bytes.len() as u64;
    let mut cursor = Cursor::new(bytes.as_slice());
    let mut records = Vec::new();
    while cursor.position() + 4 <= total {
        let len = cursor.read_u32::<BigEndian>()? as usize;
        let start = cursor.position() as usize;
        let payload = bytes.get(start..start + len).ok_or_else(|| truncated(path))?;
        records.push(payload);
        cursor.set_position((start + len + 4) as u64);
    }
    let mut fields = Vec::new();
    for chunk in records.chunks(5) {
        let header = chunk.get(1).ok_or_else(|| truncated(path))?;
        if header.len() != 156 {
            return Err(truncated(path));
        }
        let name = String::from_utf8_lossy(&header[60..69]).trim_end().to_string();
        let mut level = Cursor::new(&header[140..144]);
        fields.push((name, level.read_f32::<BigEndian>()?));
    }
    Ok(fields)
}

fn truncated(path: &Path) -> NoahMpError {
    NoahMpError::UnsupportedLayout {
        message: format!("{} is not a complete intermediate file", path.display()),
    }
}
