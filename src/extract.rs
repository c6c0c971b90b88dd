//! Grid extractors: derived water and energy budget terms
//!
//! Each extractor reads every `*.nc` file of an input directory (model output
//! already converted to `(time, [z,] south_north, west_east)` layout), derives
//! its fields record by record and writes `<outdir>/<prefix>.<basename>` as a
//! CF-1.8 file with `time`, `lat` and `lon` coordinates.

use crate::errors::{NoahMpError, Result};
use crate::netcdf_io::{
    dimension_len, read_array, read_array_f64, required_string, variable, CfWriter, FieldSpec,
    DEFLATE_LEVEL,
};
use ndarray::{concatenate, Array2, ArrayD, ArrayView3, ArrayViewD, Axis};
use netcdf::File;
use std::path::{Path, PathBuf};
use tracing::info;

const INSTITUTION: &str = "Institute of Atmospheric Physics, Chinese Academy of Sciences";
const SOURCE: &str = "Noah-MP v3.6 driven by NLDAS-2";

/// Layer weights of the 0-2 m soil column (layers 0.1, 0.3, 0.6, 1.0 m thick).
pub const SOIL_WEIGHTS_2M: [f32; 4] = [0.05, 0.15, 0.3, 0.5];
/// Layer weights of the top 1 m of soil.
pub const SOIL_WEIGHTS_1M: [f32; 4] = [0.1, 0.3, 0.6, 0.0];
/// Depth of the soil column the 2 m mean refers to, in mm of water per unit fraction.
pub const SOIL_COLUMN_MM: f32 = 2000.0;

/// Depth coordinate of the extended SOIL_M output: four model layers, then
/// the 1 m and 2 m column means.
pub const DEPTH: [f32; 6] = [0.05, 0.25, 0.7, 1.5, 0.5, 1.0];
pub const DEPTH_BOUNDS: [[f32; 2]; 6] = [
    [0.0, 0.1],
    [0.1, 0.4],
    [0.4, 1.0],
    [1.0, 2.0],
    [0.0, 1.0],
    [0.0, 2.0],
];

/// The available extractors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extractor {
    Et,
    Rad,
    Runoff,
    Tws,
}

impl Extractor {
    /// File name prefix of the outputs.
    pub fn prefix(self) -> &'static str {
        match self {
            Extractor::Et => "et",
            Extractor::Rad => "rad",
            Extractor::Runoff => "run",
            Extractor::Tws => "tws",
        }
    }

    pub fn run(self, infile: &Path, outfile: &Path) -> Result<()> {
        match self {
            Extractor::Et => extract_et(infile, outfile),
            Extractor::Rad => extract_rad(infile, outfile),
            Extractor::Runoff => extract_runoff(infile, outfile),
            Extractor::Tws => extract_tws(infile, outfile),
        }
    }
}

/// Output paths for a sorted list of inputs.
pub fn output_paths(infiles: &[PathBuf], outdir: &Path, prefix: &str) -> Vec<PathBuf> {
    infiles
        .iter()
        .map(|f| {
            let base = f
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            outdir.join(format!("{}.{}", prefix, base))
        })
        .collect()
}

/// Runs one extractor over every `*.nc` file in `indir`.
pub fn extract_dir(extractor: Extractor, indir: &Path, outdir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = indir.join("*.nc");
    let mut infiles: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())?
        .filter_map(|entry| entry.ok())
        .collect();
    infiles.sort();
    std::fs::create_dir_all(outdir)?;
    let outfiles = output_paths(&infiles, outdir, extractor.prefix());
    for (infile, outfile) in infiles.iter().zip(&outfiles) {
        info!("{} -> {}", infile.display(), outfile.display());
        extractor.run(infile, outfile)?;
    }
    Ok(outfiles)
}

/// ET = canopy evaporation + soil evaporation + transpiration.
pub fn total_et(ecan: &ArrayViewD<f32>, edir: &ArrayViewD<f32>, etran: &ArrayViewD<f32>) -> ArrayD<f32> {
    ecan.to_owned() + edir + etran
}

/// Upward shortwave (SWFORC - FSA) and longwave (LWFORC + FIRA) radiation.
///
/// FIRA is the net longwave flux leaving the surface, so absorbed longwave is
/// `-FIRA` and the upward component is `LWFORC - (-FIRA)`.
pub fn upward_radiation(
    swforc: &ArrayViewD<f32>,
    fsa: &ArrayViewD<f32>,
    lwforc: &ArrayViewD<f32>,
    fira: &ArrayViewD<f32>,
) -> (ArrayD<f32>, ArrayD<f32>) {
    let swu = swforc.to_owned() - fsa;
    let lwu = lwforc.to_owned() + fira;
    (swu, lwu)
}

/// Total runoff = surface + subsurface.
pub fn total_runoff(sfc: &ArrayViewD<f32>, ugd: &ArrayViewD<f32>) -> ArrayD<f32> {
    sfc.to_owned() + ugd
}

/// Weighted mean over the layer axis (axis 0) of a `(layer, lat, lon)` block.
pub fn weighted_layer_mean(layers: &ArrayView3<f32>, weights: &[f32]) -> Result<Array2<f32>> {
    let nlayer = layers.len_of(Axis(0));
    if nlayer != weights.len() {
        return Err(NoahMpError::UnsupportedLayout {
            message: format!("{} soil layers but {} weights", nlayer, weights.len()),
        });
    }
    let total: f32 = weights.iter().sum();
    let (_, ny, nx) = layers.dim();
    let mut mean = Array2::<f32>::zeros((ny, nx));
    for (layer, &w) in layers.axis_iter(Axis(0)).zip(weights) {
        mean.scaled_add(w, &layer);
    }
    mean /= total;
    Ok(mean)
}

/// TWS = soil moisture + groundwater + snow water equivalent.
pub fn total_water_storage(smc: &ArrayViewD<f32>, gw: &ArrayViewD<f32>, snw: &ArrayViewD<f32>) -> ArrayD<f32> {
    smc.to_owned() + gw + snw
}

fn global_attributes(w: &mut CfWriter, title: &str) -> Result<()> {
    w.global_attributes(&[
        ("Conventions", "CF-1.8"),
        ("title", title),
        ("institution", INSTITUTION),
        ("source", SOURCE),
        ("references", ""),
        ("comment", ""),
    ])
}

fn axis_attr(
    mut attrs: Vec<(&'static str, String)>,
    axis: &str,
    enabled: bool,
) -> Vec<(&'static str, String)> {
    if enabled {
        attrs.push(("axis", axis.to_string()));
    }
    attrs
}

/// Defines `time`, `lat`, `lon` from the input's `time`, `south_north` and
/// `west_east` and writes the horizontal coordinates. Returns the time values.
fn define_grid(fi: &File, w: &mut CfWriter, with_axis: bool) -> Result<Vec<f64>> {
    let time = variable(fi, "time")?;
    let lat = variable(fi, "south_north")?;
    let lon = variable(fi, "west_east")?;
    let times = time.get_values::<f64, _>(..)?;
    let lat_values = lat.get_values::<f64, _>(..)?;
    let lon_values = lon.get_values::<f64, _>(..)?;

    w.dimension("time", None)?;
    w.dimension("lat", Some(dimension_len(fi, "south_north")?))?;
    w.dimension("lon", Some(dimension_len(fi, "west_east")?))?;

    let time_attrs = vec![
        ("units", required_string(&time, "units")?),
        ("standard_name", "time".to_string()),
    ];
    let lat_attrs = vec![
        ("units", required_string(&lat, "units")?),
        ("standard_name", required_string(&lat, "standard_name")?),
    ];
    let lon_attrs = vec![
        ("units", required_string(&lon, "units")?),
        ("standard_name", required_string(&lon, "standard_name")?),
    ];
    w.coordinate("time", &["time"], &axis_attr(time_attrs, "T", with_axis), None)?;
    w.coordinate("lat", &["lat"], &axis_attr(lat_attrs, "Y", with_axis), Some(lat_values.as_slice()))?;
    w.coordinate("lon", &["lon"], &axis_attr(lon_attrs, "X", with_axis), Some(lon_values.as_slice()))?;
    Ok(times)
}

const ET_FIELDS: [FieldSpec; 4] = [
    FieldSpec {
        name: "ET",
        units: "kg m-2 s-1",
        standard_name: Some("water_evapotranspiration_flux"),
        long_name: "evapotranspiration",
    },
    FieldSpec {
        name: "ETRAN",
        units: "kg m-2 s-1",
        standard_name: Some("transpiration_flux"),
        long_name: "transpiration",
    },
    FieldSpec {
        name: "ECAN",
        units: "kg m-2 s-1",
        standard_name: Some("water_evaporation_flux_from_canopy"),
        long_name: "canopy evaporation",
    },
    FieldSpec {
        name: "EDIR",
        units: "kg m-2 s-1",
        standard_name: Some("water_evaporation_flux_from_soil"),
        long_name: "soil evaporation",
    },
];

/// Evapotranspiration and its components.
pub fn extract_et(infile: &Path, outfile: &Path) -> Result<()> {
    let fi = netcdf::open(infile)?;
    let mut w = CfWriter::create(outfile)?;
    global_attributes(&mut w, "NLDAS-NoahMP evapotranspiration and its components")?;
    let times = define_grid(&fi, &mut w, true)?;
    for spec in &ET_FIELDS {
        w.field(spec, &["time", "lat", "lon"])?;
    }

    let ecan = read_array(&variable(&fi, "ECAN")?)?;
    let edir = read_array(&variable(&fi, "EDIR")?)?;
    let etran = read_array(&variable(&fi, "ETRAN")?)?;
    for (itim, &t) in times.iter().enumerate() {
        w.put_time(itim, t)?;
        let ec = ecan.index_axis(Axis(0), itim);
        let eg = edir.index_axis(Axis(0), itim);
        let ev = etran.index_axis(Axis(0), itim);
        w.put_record("ET", itim, &total_et(&ec, &eg, &ev))?;
        w.put_record("ECAN", itim, &ec.to_owned())?;
        w.put_record("EDIR", itim, &eg.to_owned())?;
        w.put_record("ETRAN", itim, &ev.to_owned())?;
    }
    Ok(())
}

const RAD_FIELDS: [FieldSpec; 2] = [
    FieldSpec {
        name: "SWU",
        units: "W m-2",
        standard_name: None,
        long_name: "upward_solar_radiation",
    },
    FieldSpec {
        name: "LWU",
        units: "W m-2",
        standard_name: None,
        long_name: "upward_longwave_radiation",
    },
];

/// Upward shortwave and longwave radiation.
pub fn extract_rad(infile: &Path, outfile: &Path) -> Result<()> {
    let fi = netcdf::open(infile)?;
    let mut w = CfWriter::create(outfile)?;
    let times = define_grid(&fi, &mut w, false)?;
    for spec in &RAD_FIELDS {
        w.field(spec, &["time", "lat", "lon"])?;
    }

    let swforc = read_array(&variable(&fi, "SWFORC")?)?;
    let fsa = read_array(&variable(&fi, "FSA")?)?;
    let lwforc = read_array(&variable(&fi, "LWFORC")?)?;
    let fira = read_array(&variable(&fi, "FIRA")?)?;
    for (itim, &t) in times.iter().enumerate() {
        w.put_time(itim, t)?;
        let (swu, lwu) = upward_radiation(
            &swforc.index_axis(Axis(0), itim),
            &fsa.index_axis(Axis(0), itim),
            &lwforc.index_axis(Axis(0), itim),
            &fira.index_axis(Axis(0), itim),
        );
        w.put_record("SWU", itim, &swu)?;
        w.put_record("LWU", itim, &lwu)?;
    }
    Ok(())
}

const RUNOFF_FIELDS: [FieldSpec; 3] = [
    FieldSpec {
        name: "RUNOFF",
        units: "kg m-2 s-1",
        standard_name: Some("runoff_flux"),
        long_name: "runoff",
    },
    FieldSpec {
        name: "SFCRNOFF",
        units: "kg m-2 s-1",
        standard_name: Some("surface_runoff_flux"),
        long_name: "surface runoff",
    },
    FieldSpec {
        name: "UGDRNOFF",
        units: "kg m-2 s-1",
        standard_name: Some("subsurface_runoff_flux"),
        long_name: "subsurface runoff",
    },
];

/// Total runoff and its surface and subsurface components.
pub fn extract_runoff(infile: &Path, outfile: &Path) -> Result<()> {
    let fi = netcdf::open(infile)?;
    let mut w = CfWriter::create(outfile)?;
    global_attributes(&mut w, "NLDAS-NoahMP runoff and its components")?;
    let times = define_grid(&fi, &mut w, true)?;
    for spec in &RUNOFF_FIELDS {
        w.field(spec, &["time", "lat", "lon"])?;
    }

    let sfc = read_array(&variable(&fi, "SFCRNOFF")?)?;
    let ugd = read_array(&variable(&fi, "UGDRNOFF")?)?;
    for (itim, &t) in times.iter().enumerate() {
        w.put_time(itim, t)?;
        let runs = sfc.index_axis(Axis(0), itim);
        let rung = ugd.index_axis(Axis(0), itim);
        w.put_record("RUNOFF", itim, &total_runoff(&runs, &rung))?;
        w.put_record("SFCRNOFF", itim, &runs.to_owned())?;
        w.put_record("UGDRNOFF", itim, &rung.to_owned())?;
    }
    Ok(())
}

const TWS_FIELDS: [FieldSpec; 6] = [
    FieldSpec {
        name: "TWS",
        units: "kg m-2",
        standard_name: Some("land_water_amount"),
        long_name: "terrestrial water storage",
    },
    FieldSpec {
        name: "SMC",
        units: "kg m-2",
        standard_name: Some("mass_content_of_water_in_soil"),
        long_name: "soil moisture content",
    },
    FieldSpec {
        name: "SNW",
        units: "kg m-2",
        standard_name: Some("surface_snow_amount"),
        long_name: "snow water equivalent",
    },
    FieldSpec {
        name: "GW",
        units: "kg m-2",
        standard_name: None,
        long_name: "groundwater storage",
    },
    FieldSpec {
        name: "SOIL_M",
        units: "m3 m-3",
        standard_name: Some("volume_fraction_of_condensed_water_in_soil"),
        long_name: "volumetric soil water content",
    },
    FieldSpec {
        name: "ZWT",
        units: "m",
        standard_name: Some("water_table_depth"),
        long_name: "water table depth",
    },
];

/// Terrestrial water storage and its components, plus soil moisture
/// extended with 1 m and 2 m column means.
pub fn extract_tws(infile: &Path, outfile: &Path) -> Result<()> {
    let fi = netcdf::open(infile)?;
    let mut w = CfWriter::create(outfile)?;
    global_attributes(
        &mut w,
        "NLDAS-NoahMP terrestrial water storage and its components",
    )?;
    let times = define_grid(&fi, &mut w, true)?;
    define_depth(&mut w)?;
    for spec in &TWS_FIELDS {
        if spec.name == "SOIL_M" {
            w.field(spec, &["time", "depth", "lat", "lon"])?;
        } else {
            w.field(spec, &["time", "lat", "lon"])?;
        }
    }

    let soil_m = read_array(&variable(&fi, "SOIL_M")?)?;
    let sneqv = read_array(&variable(&fi, "SNEQV")?)?;
    let wa = read_array(&variable(&fi, "WA")?)?;
    let zwt = read_array(&variable(&fi, "ZWT")?)?;
    if soil_m.ndim() != 4 {
        return Err(NoahMpError::UnsupportedLayout {
            message: format!("SOIL_M has {} dimensions, expected 4", soil_m.ndim()),
        });
    }
    for (itim, &t) in times.iter().enumerate() {
        w.put_time(itim, t)?;
        let sm = soil_m
            .index_axis(Axis(0), itim)
            .into_dimensionality::<ndarray::Ix3>()?;
        let sm1m = weighted_layer_mean(&sm, &SOIL_WEIGHTS_1M)?;
        let sm2m = weighted_layer_mean(&sm, &SOIL_WEIGHTS_2M)?;
        let smc = (&sm2m * SOIL_COLUMN_MM).into_dyn();
        let snw = sneqv.index_axis(Axis(0), itim);
        let gw = wa.index_axis(Axis(0), itim);
        let tws = total_water_storage(&smc.view(), &gw, &snw);

        let extended = concatenate(
            Axis(0),
            &[sm.view(), sm1m.view().insert_axis(Axis(0)), sm2m.view().insert_axis(Axis(0))],
        )?;

        w.put_record("TWS", itim, &tws)?;
        w.put_record("SMC", itim, &smc)?;
        w.put_record("SNW", itim, &snw.to_owned())?;
        w.put_record("GW", itim, &gw.to_owned())?;
        w.put_record("SOIL_M", itim, &extended.into_dyn())?;
        w.put_record("ZWT", itim, &zwt.index_axis(Axis(0), itim).to_owned())?;
    }
    Ok(())
}

fn define_depth(w: &mut CfWriter) -> Result<()> {
    w.dimension("depth", Some(DEPTH.len()))?;
    w.dimension("bnd", Some(2))?;
    let file = w.file_mut();
    {
        let mut depth = file.add_variable::<f32>("depth", &["depth"])?;
        depth.set_compression(DEFLATE_LEVEL, false)?;
        depth.put_attribute("units", "m")?;
        depth.put_attribute("standard_name", "depth")?;
        depth.put_attribute("positive", "down")?;
        depth.put_attribute("axis", "Z")?;
        depth.put_attribute("bounds", "depth_bnds")?;
        depth.put_values(&DEPTH[..], ..)?;
    }
    {
        let mut bounds = file.add_variable::<f32>("depth_bnds", &["depth", "bnd"])?;
        bounds.set_compression(DEFLATE_LEVEL, false)?;
        let flat: Vec<f32> = DEPTH_BOUNDS.iter().flatten().copied().collect();
        bounds.put_values(flat.as_slice(), ..)?;
    }
    Ok(())
}

/// Reads the `time` coordinate of an extractor output (used by tests and
/// callers chaining extractors).
pub fn read_times(path: &Path) -> Result<Vec<f64>> {
    let f = netcdf::open(path)?;
    Ok(read_array_f64(&variable(&f, "time")?)?.into_raw_vec())
}
