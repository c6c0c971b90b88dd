//! Copy land state from a Noah-MP restart into a WRF input file

use crate::errors::{NoahMpError, Result};
use crate::netcdf_io::{put_array_f64, read_array_f64, variable, variable_mut};
use ndarray::{ArrayD, Zip};
use std::path::Path;
use tracing::info;

/// Restart values at or beyond this magnitude are fill values.
pub const ABSMAX: f64 = 1.0e20;

/// 2-D state: restart name, WRF name.
pub const NMP2WRF_2D: [(&str, &str); 29] = [
    ("QSNOW", "QSNOWXY"),
    ("FWET", "FWET"),
    ("SNEQVO", "SNEQVO"),
    ("EAH", "EAH"),
    ("TAH", "TAH"),
    ("ALBOLD", "ALBOLD"),
    ("CM", "CM"),
    ("CH", "CH"),
    ("ISNOW", "ISNOW"),
    ("CANLIQ", "CANLIQ"),
    ("CANICE", "CANICE"),
    ("SNOWH", "SNOWH"),
    ("TV", "TV"),
    ("TG", "TG"),
    ("ZWT", "ZWT"),
    ("WA", "WA"),
    ("WT", "WT"),
    ("WSLAKE", "WSLAKE"),
    ("LFMASS", "LFMASS"),
    ("RTMASS", "RTMASS"),
    ("STMASS", "STMASS"),
    ("WOOD", "WOOD"),
    ("STBLCP", "STBLCP"),
    ("FASTCP", "FASTCP"),
    ("FDEPTHXY", "FDEPTH"),
    ("RIVERBEDXY", "RIVERBED"),
    ("EQZWT", "EQZWT"),
    ("RIVERCONDXY", "RIVERCOND"),
    ("PEXPXY", "PEXP"),
];

/// Layered state, stored `(Time, y, z, x)` in the restart and
/// `(Time, z, y, x)` in WRF.
pub const NMP2WRF_3D: [(&str, &str); 7] = [
    ("SOIL_T", "TSLB"),
    ("SNOW_T", "TSNO"),
    ("SMC", "SMOIS"),
    ("SH2O", "SH2O"),
    ("ZSNSO", "ZSNSO"),
    ("SNICE", "SNICE"),
    ("SNLIQ", "SNLIQ"),
];

/// Restart value where valid, WRF value where the restart holds a fill.
pub fn merge_state(restart: &ArrayD<f64>, wrf: &ArrayD<f64>) -> Result<ArrayD<f64>> {
    if restart.shape() != wrf.shape() {
        return Err(NoahMpError::UnsupportedLayout {
            message: format!("restart shape {:?} != WRF shape {:?}", restart.shape(), wrf.shape()),
        });
    }
    let mut merged = restart.clone();
    Zip::from(&mut merged).and(wrf).for_each(|m, &w| {
        if m.abs() >= ABSMAX {
            *m = w;
        }
    });
    Ok(merged)
}

/// Moves the layer axis of a restart field in front of `y`.
pub fn layers_first(restart: ArrayD<f64>) -> Result<ArrayD<f64>> {
    if restart.ndim() < 3 {
        return Err(NoahMpError::UnsupportedLayout {
            message: format!("layered field has {} dimensions", restart.ndim()),
        });
    }
    let mut swapped = restart;
    swapped.swap_axes(1, 2);
    Ok(swapped.as_standard_layout().into_owned())
}

/// Writes the restart state of `nmpfile` into `wrffile` in place.
pub fn towrf(nmpfile: &Path, wrffile: &Path) -> Result<()> {
    let fi = netcdf::open(nmpfile)?;
    let mut fo = netcdf::append(wrffile)?;

    let layered = NMP2WRF_3D.iter().map(|pair| (pair, true));
    for (&(from, to), swap) in NMP2WRF_2D.iter().map(|pair| (pair, false)).chain(layered) {
        info!("{} {}", from, to);
        let mut restart = read_array_f64(&variable(&fi, from)?)?;
        if swap {
            restart = layers_first(restart)?;
        }
        let wrf = read_array_f64(&variable(&fo, to)?)?;
        let merged = merge_state(&restart, &wrf)?;
        put_array_f64(&mut variable_mut(&mut fo, to)?, &merged)?;
    }

    let snowh = read_array_f64(&variable(&fo, "FNDSNOWH")?)?;
    let ones = ArrayD::<f64>::ones(snowh.raw_dim());
    put_array_f64(&mut variable_mut(&mut fo, "FNDSNOWH")?, &ones)?;
    Ok(())
}
