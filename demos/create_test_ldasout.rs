//! Creates a small case directory of per-timestep model output for trying
//! the noahmp-tools subcommands.
//!
//! Writes `demo_case/` with eight 3-hourly `*.LDASOUT_DOMAIN1` files and a
//! matching `wrfinput_d01` on a regular lat/lon grid.

use chrono::{Duration, NaiveDate};
use ndarray::Array3;
use netcdf::create;
use std::path::Path;

const NY: usize = 4;
const NX: usize = 5;
const NSOIL: usize = 4;
const ACC_VARS: [(&str, &str, f32); 4] = [
    ("ACSNOW", "accumulated snow fall", 0.2),
    ("ACSNOM", "accumulated melting water out of snow bottom", 0.1),
    ("SFCRNOFF", "Accumulated surface runoff", 0.5),
    ("UGDRNOFF", "Accumulated underground runoff", 0.3),
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let case_dir = Path::new("demo_case");
    std::fs::create_dir_all(case_dir)?;

    println!("Creating demo case in {}", case_dir.display());
    write_wrfinput(&case_dir.join("wrfinput_d01"))?;

    let start = NaiveDate::from_ymd_opt(2010, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or("invalid start date")?;
    for step in 0..8 {
        let time = start + Duration::hours(3 * step);
        let path = case_dir.join(format!("{}.LDASOUT_DOMAIN1", time.format("%Y%m%d%H")));
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        let mut file = create(&path)?;
        file.add_attribute("TITLE", "OUTPUT FROM HRLDAS demo")?;
        file.add_attribute("MAP_PROJ", 6i32)?;
        file.add_dimension("Time", 1)?;
        file.add_dimension("south_north", NY)?;
        file.add_dimension("west_east", NX)?;
        file.add_dimension("soil_layers_stag", NSOIL)?;

        // Accumulations grow linearly, so every flux is constant.
        for (name, description, rate) in ACC_VARS {
            let mut var = file.add_variable::<f32>(name, &["Time", "south_north", "west_east"])?;
            var.put_attribute("units", "mm")?;
            var.put_attribute("description", description)?;
            let seconds = (3 * 3600 * step) as f32;
            let data = Array3::from_elem((1, NY, NX), rate * seconds / 3600.0);
            var.put(data.view(), ..)?;
        }

        {
            let mut var = file.add_variable::<f32>(
                "SOIL_M",
                &["Time", "south_north", "soil_layers_stag", "west_east"],
            )?;
            var.put_attribute("units", "m3 m-3")?;
            var.put_attribute("description", "volumetric soil moisture")?;
            let mut data = ndarray::Array4::from_shape_fn((1, NY, NSOIL, NX), |(_, _, z, _)| {
                0.2 + 0.05 * z as f32
            });
            // One sea point.
            data[[0, 0, 0, 0]] = -1.0e33;
            var.put(data.view(), ..)?;
        }

        {
            let mut var = file.add_variable::<f32>("SNEQV", &["Time", "south_north", "west_east"])?;
            var.put_attribute("units", "mm")?;
            var.put_attribute("description", "snow water equivalent")?;
            let data = Array3::from_shape_fn((1, NY, NX), |(_, y, x)| (y * NX + x) as f32);
            var.put(data.view(), ..)?;
        }
        println!("   {}", path.display());
    }

    println!("Try:");
    println!(
        "   cargo run -- merge demo_case/wrfinput_d01 demo_case merged.nc 2010-01-01T00:00 2010-01-02T00:00"
    );
    Ok(())
}

fn write_wrfinput(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let mut file = create(path)?;
    file.add_attribute("TITLE", "OUTPUT FROM REAL_EM demo")?;
    file.add_attribute("MAP_PROJ", 6i32)?;
    file.add_attribute("DX", 0.125f32)?;
    file.add_attribute("DY", 0.125f32)?;
    file.add_dimension("Time", 1)?;
    file.add_dimension("south_north", NY)?;
    file.add_dimension("west_east", NX)?;

    let lat = Array3::from_shape_fn((1, NY, NX), |(_, y, _)| 30.0 + 0.125 * y as f32);
    let lon = Array3::from_shape_fn((1, NY, NX), |(_, _, x)| 100.0 + 0.125 * x as f32);
    for (name, units, data) in [("XLAT", "degree_north", lat), ("XLONG", "degree_east", lon)] {
        let mut var = file.add_variable::<f32>(name, &["Time", "south_north", "west_east"])?;
        var.put_attribute("units", units)?;
        var.put(data.view(), ..)?;
    }
    println!("   {}", path.display());
    Ok(())
}
