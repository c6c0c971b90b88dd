//! noahmp_tools: conversion and case management for Noah-MP land-surface output
//!
//! A Rust library and command-line tool for the chores around running the
//! Noah-MP land-surface model offline: turning its per-timestep NetCDF output
//! into CF-style time series, deriving fluxes from accumulated variables,
//! preparing WRF and WPS inputs, and laying out and running model cases with
//! spinup and restart handling.
//!
//! ## Module Organization
//!
//! - [`extract`]: derived grids (evapotranspiration, radiation, runoff, water storage)
//! - [`flux`]: accumulated variables to fluxes
//! - [`normalize`]: CF renaming, masking and subsetting of model files
//! - [`merge`]: per-timestep output to a single time series
//! - [`wps`]: WPS intermediate-format writer
//! - [`towrf`]: restart state to WRF input
//! - [`namelist`], [`case`], [`run_case`]: case creation and execution
//! - [`netcdf_io`], [`nco`], [`timeutil`]: shared NetCDF, NCO and time helpers
//! - [`parallel`]: thread pool configuration
//! - [`errors`]: centralized error handling
//!
//! ## Usage Examples
//!
//! ```rust,no_run
//! use noahmp_tools::prelude::*;
//! use std::path::Path;
//!
//! // Total evapotranspiration for every file of a directory
//! extract_dir(Extractor::Et, Path::new("ldasout"), Path::new("et")).unwrap();
//!
//! // Differencing of accumulated runoff in a merged file
//! acc2flx_file(Path::new("merged.nc")).unwrap();
//! ```

pub mod case;
pub mod errors;
pub mod extract;
pub mod flux;
pub mod merge;
pub mod namelist;
pub mod nco;
pub mod netcdf_io;
pub mod normalize;
pub mod parallel;
pub mod run_case;
pub mod timeutil;
pub mod towrf;
pub mod wps;

pub mod prelude {
    //! Commonly used imports for convenience
    pub use crate::case::{create_case, CaseConfig};
    pub use crate::errors::{NoahMpError, Result};
    pub use crate::extract::{extract_dir, Extractor};
    pub use crate::flux::{acc2flx_file, ldasout_diff, ACC_VARS};
    pub use crate::merge::{merge_ldasout, source_info, SourceInfo};
    pub use crate::namelist::Namelist;
    pub use crate::nco::Nco;
    pub use crate::parallel::ParallelConfig;
    pub use crate::run_case::{decide_action, run_case, RunAction};
    pub use crate::wps::{ungrib, write_latlon_field, WpsField};
}
