//! Unit tests for the pure parts of noahmp_tools
//!
//! Kernels, time handling, the WPS record layout, namelist patching and the
//! decision logic of case runs. Nothing here needs NCO or the model.

use chrono::{NaiveDate, NaiveDateTime};
use ndarray::{arr2, Array3, ArrayD, IxDyn};
use noahmp_tools::{
    errors::NoahMpError,
    extract::{total_et, total_runoff, total_water_storage, upward_radiation, weighted_layer_mean, SOIL_WEIGHTS_2M},
    flux::{accumulated_to_flux, difference_flux, is_accumulated},
    merge::{check_series, flux_description, source_info},
    namelist::{template_substitute, Namelist, NamelistValue, OFFLINE_GROUP},
    nco::Nco,
    normalize::{is_fixed_var, mask_missing},
    parallel::ParallelConfig,
    run_case::{decide_action, RunAction},
    timeutil::{
        datetime_from_filename, datetime_from_restart, parse_datetime, parse_wrf_times, TimeUnits,
    },
    towrf::{layers_first, merge_state},
    wps::{list_fields, pad, write_latlon_field, WpsField, EARTH_RADIUS_KM},
};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn dt(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .and_then(|d| d.and_hms_opt(h, 0, 0))
        .expect("valid test date")
}

#[test]
fn test_error_types() {
    let var_err = NoahMpError::VariableNotFound {
        var: "ACSNOW".to_string(),
    };
    assert!(format!("{}", var_err).contains("Variable 'ACSNOW' not found"));

    let gap = NoahMpError::IrregularTimestep {
        missing: "2010-01-01 03:00:00".to_string(),
    };
    assert_eq!(format!("{}", gap), "missing file for 2010-01-01 03:00:00");

    let incomplete = NoahMpError::IncompleteSeries {
        message: "not enough files (try --partially)".to_string(),
    };
    assert_eq!(format!("{}", incomplete), "not enough files (try --partially)");

    let generic: NoahMpError = "Test error".into();
    assert_eq!(format!("{}", generic), "Test error");
}

#[test]
fn test_parallel_config() {
    let default_config = ParallelConfig::default();
    assert!(default_config.num_threads.is_none());

    let config_4 = ParallelConfig::with_threads(4);
    assert_eq!(config_4.num_threads, Some(4));

    let all_cores_config = ParallelConfig::all_cores();
    assert!(all_cores_config.num_threads.unwrap() > 0);

    assert!(default_config.current_threads() > 0);
}

#[test]
fn test_parse_datetime_formats() {
    let expected = dt(2010, 1, 2, 3);
    assert_eq!(parse_datetime("2010-01-02 03:00:00").unwrap(), expected);
    assert_eq!(parse_datetime("2010-01-02T03:00").unwrap(), expected);
    assert_eq!(parse_datetime("2010-01-02_03:00:00").unwrap(), expected);
    assert_eq!(parse_datetime("2010010203").unwrap(), expected);
    assert_eq!(parse_datetime("2010-01-02").unwrap(), dt(2010, 1, 2, 0));
    assert!(matches!(
        parse_datetime("yesterday"),
        Err(NoahMpError::InvalidTime { .. })
    ));
}

#[test]
fn test_time_units() {
    let units = TimeUnits::parse("hours since 1900-01-01").unwrap();
    assert_eq!(units.from_datetime(dt(1900, 1, 2, 3)), 27.0);
    assert_eq!(units.to_datetime(27.0).unwrap(), dt(1900, 1, 2, 3));

    let seconds = TimeUnits::parse("seconds since 2010-01-01 00:00:00 UTC").unwrap();
    assert_eq!(seconds.to_datetime(10800.0).unwrap(), dt(2010, 1, 1, 3));

    assert!(TimeUnits::parse("fortnights since 2010-01-01").is_err());
    assert!(TimeUnits::parse("hours").is_err());
}

#[test]
fn test_file_name_timestamps() {
    let out = Path::new("/case/2010010103.LDASOUT_DOMAIN1");
    assert_eq!(datetime_from_filename(out).unwrap(), dt(2010, 1, 1, 3));

    let restart = Path::new("/case/RESTART.2010020100_DOMAIN1");
    assert_eq!(datetime_from_restart(restart).unwrap(), dt(2010, 2, 1, 0));

    assert!(datetime_from_filename(Path::new("notes.txt")).is_err());
}

#[test]
fn test_parse_wrf_times() {
    let mut bytes = b"2010-01-01_00:00:00".to_vec();
    bytes.extend_from_slice(b"2010-01-01_03:00:00");
    let times = parse_wrf_times(&bytes).unwrap();
    assert_eq!(times, vec![dt(2010, 1, 1, 0), dt(2010, 1, 1, 3)]);

    assert!(parse_wrf_times(b"not a timestamp at all").is_err());
}

#[test]
fn test_budget_kernels() {
    let a = ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![1.0f32, 2.0, 3.0, 4.0]).unwrap();
    let b = ArrayD::from_elem(IxDyn(&[2, 2]), 10.0f32);
    let c = ArrayD::from_elem(IxDyn(&[2, 2]), 0.5f32);

    let et = total_et(&a.view(), &b.view(), &c.view());
    assert_eq!(et[[1, 1]], 14.5);

    let runoff = total_runoff(&a.view(), &b.view());
    assert_eq!(runoff[[0, 1]], 12.0);

    let tws = total_water_storage(&a.view(), &b.view(), &c.view());
    assert_eq!(tws[[1, 0]], 13.5);

    let (swu, lwu) = upward_radiation(&b.view(), &a.view(), &b.view(), &c.view());
    assert_eq!(swu[[0, 0]], 9.0);
    assert_eq!(lwu[[0, 0]], 10.5);
}

#[test]
fn test_weighted_layer_mean() {
    // Layer k holds the value k + 1 everywhere.
    let layers = Array3::from_shape_fn((4, 2, 3), |(k, _, _)| (k + 1) as f32);
    let mean = weighted_layer_mean(&layers.view(), &SOIL_WEIGHTS_2M).unwrap();
    // 0.05 * 1 + 0.15 * 2 + 0.3 * 3 + 0.5 * 4
    assert!((mean[[1, 2]] - 3.25).abs() < 1e-5);

    let err = weighted_layer_mean(&layers.view(), &[1.0, 1.0]);
    assert!(matches!(err, Err(NoahMpError::UnsupportedLayout { .. })));
}

#[test]
fn test_accumulated_to_flux() {
    let series =
        ArrayD::from_shape_vec(IxDyn(&[3, 2]), vec![0.0f32, 0.0, 3.0, 6.0, 9.0, 12.0]).unwrap();
    let flux = accumulated_to_flux(&series, 3.0);
    assert_eq!(flux.as_slice().unwrap(), &[0.0, 0.0, 1.0, 2.0, 2.0, 2.0]);

    let rate = difference_flux(
        &series.index_axis(ndarray::Axis(0), 2),
        &series.index_axis(ndarray::Axis(0), 0),
        6.0,
    );
    assert_eq!(rate.as_slice().unwrap(), &[1.5, 2.0]);

    assert!(is_accumulated("ACSNOW"));
    assert!(is_accumulated("ugdrnoff"));
    assert!(!is_accumulated("SOIL_M"));
}

#[test]
fn test_mask_missing() {
    let mut values =
        ArrayD::from_shape_vec(IxDyn(&[4]), vec![-999.0, 1.0, -2.0e10, 3.0]).unwrap();
    mask_missing(&mut values, Some(-999.0));
    assert!(values[0].is_nan());
    assert_eq!(values[1], 1.0);
    assert!(values[2].is_nan());
    assert_eq!(values[3], 3.0);

    let mut untouched = ArrayD::from_shape_vec(IxDyn(&[2]), vec![-999.0, -1.0e10]).unwrap();
    mask_missing(&mut untouched, None);
    assert_eq!(untouched[0], -999.0);
    assert!(untouched[1].is_nan());

    assert!(is_fixed_var("XLAT"));
    assert!(is_fixed_var("time"));
    assert!(!is_fixed_var("SOIL_M"));
}

#[test]
fn test_merge_state_keeps_wrf_where_restart_is_fill() {
    let restart = ArrayD::from_shape_vec(IxDyn(&[4]), vec![1.0, 1.0e20, -1.0e21, 2.0]).unwrap();
    let wrf = ArrayD::from_elem(IxDyn(&[4]), 9.0);
    let merged = merge_state(&restart, &wrf).unwrap();
    assert_eq!(merged.as_slice().unwrap(), &[1.0, 9.0, 9.0, 2.0]);

    let short = ArrayD::from_elem(IxDyn(&[3]), 0.0);
    assert!(merge_state(&short, &wrf).is_err());
}

#[test]
fn test_merge_state_copies_nan_from_restart() {
    let restart = ArrayD::from_shape_vec(IxDyn(&[3]), vec![f64::NAN, 1.0e20, 4.0]).unwrap();
    let wrf = ArrayD::from_elem(IxDyn(&[3]), 9.0);
    let merged = merge_state(&restart, &wrf).unwrap();
    assert!(merged[0].is_nan());
    assert_eq!(merged[1], 9.0);
    assert_eq!(merged[2], 4.0);
}

#[test]
fn test_time_units_reject_fill_values() {
    let units = TimeUnits::parse("hours since 1900-01-01").unwrap();
    for value in [9.969_209_968_386_869e36, -1.0e30, f64::NAN, f64::INFINITY, 1.0e11, 1.0e12] {
        assert!(
            matches!(units.to_datetime(value), Err(NoahMpError::InvalidTime { .. })),
            "{} should not decode",
            value
        );
    }
}

#[test]
fn test_layers_first() {
    let restart = ArrayD::from_shape_fn(IxDyn(&[1, 2, 3, 4]), |ix| {
        (ix[1] * 100 + ix[2] * 10 + ix[3]) as f64
    });
    let swapped = layers_first(restart).unwrap();
    assert_eq!(swapped.shape(), &[1, 3, 2, 4]);
    // (time, z, y, x) picks restart (time, y, z, x)
    assert_eq!(swapped[[0, 2, 1, 3]], 123.0);
}

#[test]
fn test_flux_description() {
    assert_eq!(flux_description("Accumulated surface runoff"), "surface runoff");
    assert_eq!(flux_description("accumulatetd snow melt"), "snow melt");
    assert_eq!(flux_description("Snow fall"), "snow fall");
}

fn stamped(hours: &[u32]) -> Vec<(NaiveDateTime, PathBuf)> {
    hours
        .iter()
        .map(|&h| {
            let t = dt(2010, 1, 1, h);
            (t, PathBuf::from(format!("{}.LDASOUT_DOMAIN1", t.format("%Y%m%d%H"))))
        })
        .collect()
}

#[test]
fn test_series_integrity() {
    let begin = dt(2010, 1, 1, 0);
    let end = dt(2010, 1, 1, 9);

    let full = check_series(stamped(&[0, 3, 6]), begin, end);
    assert!(full.integrity);
    assert_eq!(full.timestep, chrono::Duration::hours(3));
    assert_eq!(full.files.len(), 3);

    // A whole step is missing at the start of the window.
    assert!(!check_series(stamped(&[3, 6]), begin, end).integrity);
    // Two different steps.
    assert!(!check_series(stamped(&[0, 3, 8]), begin, end).integrity);
    // One file is never enough.
    assert!(!check_series(stamped(&[0]), begin, end).integrity);
    assert!(!check_series(Vec::new(), begin, end).integrity);
}

#[test]
fn test_source_info_selects_window() {
    let dir = tempdir().unwrap();
    for name in [
        "2009123121.LDASOUT_DOMAIN1",
        "2010010100.LDASOUT_DOMAIN1",
        "2010010103.LDASOUT_DOMAIN1",
        "2010010106.LDASOUT_DOMAIN1",
        "2010010109.LDASOUT_DOMAIN1",
        "2010010100.LDASOUT_DOMAIN2",
    ] {
        fs::write(dir.path().join(name), b"").unwrap();
    }
    let info = source_info(dir.path(), dt(2010, 1, 1, 0), dt(2010, 1, 1, 9)).unwrap();
    let names: Vec<String> = info
        .files
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        vec![
            "2010010100.LDASOUT_DOMAIN1",
            "2010010103.LDASOUT_DOMAIN1",
            "2010010106.LDASOUT_DOMAIN1"
        ]
    );
    assert!(info.integrity);
}

#[test]
fn test_nco_arguments() {
    let input = Path::new("in.nc");
    let output = Path::new("out.nc");

    let args = Nco::default().exclude_args(&["Times"], input, output);
    let expected: Vec<OsString> = [
        "-O",
        "-h",
        "--fl_fmt=netcdf4_classic",
        "-L",
        "6",
        "-x",
        "-v",
        "Times",
        "in.nc",
        "out.nc",
    ]
    .iter()
    .map(OsString::from)
    .collect();
    assert_eq!(args, expected);

    let args = Nco::plain().rename_dimension_args("west_east", "lon", input);
    let expected: Vec<OsString> = ["-O", "-h", "-d", "west_east,lon", "in.nc"]
        .iter()
        .map(OsString::from)
        .collect();
    assert_eq!(args, expected);

    let args = Nco::plain().permute_args(&["time", "lat", "lon"], input, output);
    assert!(args.contains(&OsString::from("time,lat,lon")));
}

#[test]
fn test_wps_padding() {
    assert_eq!(pad("abc", 5), b"abc  ".to_vec());
    assert_eq!(pad("SWCORNER-EXTRA", 8), b"SWCORNER".to_vec());
    assert_eq!(pad("", 3), b"   ".to_vec());
}

fn sample_field() -> WpsField {
    WpsField {
        hdate: dt(2010, 1, 1, 3),
        xfcst: 0.0,
        map_source: "Princeton".to_string(),
        field: "DSWRF".to_string(),
        units: "W/m2".to_string(),
        desc: "downward shortwave radiation".to_string(),
        xlvl: 200100.0,
        startloc: "SWCORNER".to_string(),
        startlat: -89.5,
        startlon: 0.5,
        deltalat: 1.0,
        deltalon: 1.0,
        is_wind_grid_rel: false,
    }
}

fn be_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes(bytes[at..at + 4].try_into().unwrap())
}

fn be_f32(bytes: &[u8], at: usize) -> f32 {
    f32::from_be_bytes(bytes[at..at + 4].try_into().unwrap())
}

#[test]
fn test_wps_record_layout() {
    let data = arr2(&[[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]]);
    let mut bytes = Vec::new();
    write_latlon_field(&mut bytes, &sample_field(), data.view()).unwrap();

    assert_eq!(bytes.len(), 12 + 164 + 36 + 12 + 32);

    // version
    assert_eq!(be_u32(&bytes, 0), 4);
    assert_eq!(be_u32(&bytes, 4), 5);
    assert_eq!(be_u32(&bytes, 8), 4);

    // header
    let h = 16;
    assert_eq!(be_u32(&bytes, 12), 156);
    assert_eq!(&bytes[h..h + 24], b"2010:01:01_03:00:00     ");
    assert_eq!(&bytes[h + 28..h + 60], pad("Princeton", 32).as_slice());
    assert_eq!(&bytes[h + 60..h + 69], b"DSWRF    ");
    assert_eq!(be_f32(&bytes, h + 140), 200100.0);
    assert_eq!(be_u32(&bytes, h + 144), 2);
    assert_eq!(be_u32(&bytes, h + 148), 3);
    assert_eq!(be_u32(&bytes, h + 152), 0);
    assert_eq!(be_u32(&bytes, h + 156), 156);

    // projection
    let p = 12 + 164;
    assert_eq!(be_u32(&bytes, p), 28);
    assert_eq!(&bytes[p + 4..p + 12], b"SWCORNER");
    assert_eq!(be_f32(&bytes, p + 12), -89.5);
    assert_eq!(be_f32(&bytes, p + 28), EARTH_RADIUS_KM);
    assert_eq!(be_u32(&bytes, p + 32), 28);

    // wind flag
    let w = p + 36;
    assert_eq!(be_u32(&bytes, w), 4);
    assert_eq!(be_u32(&bytes, w + 4), 0);

    // data, first index fastest
    let d = w + 12;
    assert_eq!(be_u32(&bytes, d), 24);
    let values: Vec<f32> = (0..6).map(|i| be_f32(&bytes, d + 4 + 4 * i)).collect();
    assert_eq!(values, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    assert_eq!(be_u32(&bytes, d + 28), 24);
}

#[test]
fn test_wps_fields_listed_back() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("FILE:2010-01-01_03");
    let data = arr2(&[[1.0f32, 2.0], [3.0, 4.0]]);
    let mut bytes = Vec::new();
    let mut field = sample_field();
    write_latlon_field(&mut bytes, &field, data.view()).unwrap();
    field.field = "TAS".to_string();
    field.xlvl = 2.0;
    write_latlon_field(&mut bytes, &field, data.view()).unwrap();
    fs::write(&path, &bytes).unwrap();

    let fields = list_fields(&path).unwrap();
    assert_eq!(
        fields,
        vec![("DSWRF".to_string(), 200100.0), ("TAS".to_string(), 2.0)]
    );

    // Cut inside the second field's data record.
    let cut = dir.path().join("FILE:2010-01-01_06");
    fs::write(&cut, &bytes[..bytes.len() - 10]).unwrap();
    assert!(matches!(
        list_fields(&cut),
        Err(NoahMpError::UnsupportedLayout { .. })
    ));
}

const NAMELIST: &str = "&NOAHLSM_OFFLINE
 HRLDAS_SETUP_FILE = './wrfinput_d01'
 INDIR = './ldasin'
 START_YEAR  = 2010
 START_MONTH = 01
 START_DAY   = 01
 START_HOUR  = 00
 START_MIN   = 00
 KDAY = 31 ! one month
 RESTART_FILENAME_REQUESTED = \"RESTART.2010010100_DOMAIN1\"
 ! SPINUP_LOOPS = 2
/

&WRF_HYDRO_OFFLINE
 FINEGRID_FLAG = .false.
/
";

#[test]
fn test_namelist_reading() {
    let nml = Namelist::parse(NAMELIST);
    assert_eq!(nml.get_int(OFFLINE_GROUP, "start_month").unwrap(), 1);
    assert_eq!(nml.get_int(OFFLINE_GROUP, "KDAY").unwrap(), 31);
    assert_eq!(
        nml.get_str(OFFLINE_GROUP, "restart_filename_requested"),
        Some("RESTART.2010010100_DOMAIN1".to_string())
    );
    assert_eq!(nml.get_str(OFFLINE_GROUP, "indir"), Some("./ldasin".to_string()));
    assert_eq!(nml.get(OFFLINE_GROUP, "spinup_loops"), None);
    assert_eq!(
        nml.get("wrf_hydro_offline", "finegrid_flag"),
        Some(NamelistValue::Bool(false))
    );
    assert_eq!(nml.start_datetime().unwrap(), dt(2010, 1, 1, 0));
    assert_eq!(nml.end_datetime().unwrap(), dt(2010, 2, 1, 0));
    assert!(matches!(
        nml.get_int(OFFLINE_GROUP, "indir"),
        Err(NoahMpError::Namelist { .. })
    ));
}

#[test]
fn test_namelist_patching() {
    let mut nml = Namelist::parse(NAMELIST);
    nml.set_start(dt(2010, 1, 15, 6)).unwrap();
    nml.set(OFFLINE_GROUP, "kday", 17i64).unwrap();
    nml.set(OFFLINE_GROUP, "restart_filename_requested", "/case/RESTART.2010011506_DOMAIN1")
        .unwrap();
    nml.set(OFFLINE_GROUP, "khour", 3i64).unwrap();

    let reparsed = Namelist::parse(&nml.to_string());
    assert_eq!(reparsed.start_datetime().unwrap(), dt(2010, 1, 15, 6));
    assert_eq!(reparsed.end_datetime().unwrap(), dt(2010, 2, 1, 6));
    assert_eq!(reparsed.get_int(OFFLINE_GROUP, "khour").unwrap(), 3);
    assert_eq!(
        reparsed.get_str(OFFLINE_GROUP, "restart_filename_requested"),
        Some("/case/RESTART.2010011506_DOMAIN1".to_string())
    );
    // The other group is untouched.
    assert!(reparsed.get("wrf_hydro_offline", "khour").is_none());
    assert!(nml.set("no_such_group", "x", 1i64).is_err());
}

#[test]
fn test_template_substitute() {
    let mut vars = HashMap::new();
    vars.insert("A", "1".to_string());
    vars.insert("RESON", "!".to_string());
    let text = template_substitute("a=$A b=${A}x c=$C $$ ${D ${RESON}RESTART", &vars);
    assert_eq!(text, "a=1 b=1x c=$C $ ${D !RESTART");
}

#[test]
fn test_decide_action() {
    let end = dt(2010, 2, 1, 0);
    let first = PathBuf::from("/case/RESTART.2010010100_DOMAIN1");
    let middle = PathBuf::from("/case/RESTART.2010011500_DOMAIN1");
    let last = PathBuf::from("/case/RESTART.2010020100_DOMAIN1");

    assert_eq!(decide_action(&[], None, end).unwrap(), RunAction::Run);
    assert_eq!(
        decide_action(&[first.clone(), last.clone()], None, end).unwrap(),
        RunAction::Skip
    );
    assert_eq!(
        decide_action(&[first.clone()], Some(first.as_path()), end).unwrap(),
        RunAction::Run
    );
    assert_eq!(
        decide_action(&[first.clone()], None, end).unwrap(),
        RunAction::Resume(first.clone())
    );
    assert_eq!(
        decide_action(&[first.clone(), middle.clone()], Some(first.as_path()), end).unwrap(),
        RunAction::Resume(middle)
    );
}
