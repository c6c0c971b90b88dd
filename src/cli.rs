//! Defines command-line interface options using `clap` for the noahmp-tools application.

use noahmp_tools::timeutil::parse_datetime;
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Conversion and case-management tools for Noah-MP output
#[derive(Parser, Debug)]
#[command(
    version,
    name = "noahmp-tools",
    about = "Convert Noah-MP / NLDAS / WRF land-surface files and run Noah-MP cases"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output (debug logging).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Number of threads for grid kernels. Defaults to number of CPU cores.
    #[arg(short = 't', long, global = true)]
    pub threads: Option<usize>,

    /// Directory holding the NCO operators. Defaults to PATH.
    #[arg(long, global = true)]
    pub nco_bindir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Total evapotranspiration from every *.nc file of INDIR
    ExtractEt { indir: PathBuf, outdir: PathBuf },

    /// Upward shortwave and longwave radiation
    ExtractRad { indir: PathBuf, outdir: PathBuf },

    /// Total, surface and subsurface runoff
    ExtractRunoff { indir: PathBuf, outdir: PathBuf },

    /// Total water storage and its components
    ExtractTws { indir: PathBuf, outdir: PathBuf },

    /// Convert accumulated variables of merged files to fluxes, in place
    Acc2flx {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Convert accumulated variables of per-timestep case output to fluxes, in place
    LdasoutDiff { caseroot: PathBuf },

    /// Normalize per-timestep output files to CF layout, in place
    Ldasout2cf {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Normalize output files to CF layout using WRF input coordinates, in place
    LdasoutTocf {
        wrfinput: PathBuf,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Drop static soil parameters from case output and restore WRF dimension order
    StripOutput {
        #[arg(required = true)]
        dirs: Vec<PathBuf>,
    },

    /// Copy the grid description subset of a WRF input file to NetCDF-4 classic
    WrfinputSubset { nc4: PathBuf, nc3: PathBuf },

    /// Merge per-timestep output into one CF time series
    Merge {
        wrfinput: PathBuf,
        /// Root directory of raw output
        datadir: PathBuf,
        /// CF-compatible output file
        outfile: PathBuf,
        /// Begin time (inclusive)
        #[arg(value_parser = parse_time)]
        begtime: NaiveDateTime,
        /// End time (exclusive)
        #[arg(value_parser = parse_time)]
        endtime: NaiveDateTime,
        /// Merge whatever files exist in the window
        #[arg(long)]
        partially: bool,
    },

    /// Convert gridded forcing to WPS intermediate files
    Ungrib {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Prefix of resulting intermediate file names
        #[arg(short, long, default_value = "FILE")]
        prefix: String,
        /// Append data to existing files instead of creating new ones
        #[arg(short, long)]
        append: bool,
        /// Begin date and time
        #[arg(short, long, value_parser = parse_time)]
        begtime: Option<NaiveDateTime>,
        /// End date and time (exclusive)
        #[arg(short, long, value_parser = parse_time)]
        endtime: Option<NaiveDateTime>,
    },

    /// Create a case directory
    CreateCase {
        caseroot: PathBuf,
        /// Model root directory
        #[arg(short, long, default_value = "noahmp")]
        modelroot: PathBuf,
        /// Namelist template (default: MODELROOT/namelist.hrldas.template)
        #[arg(short, long)]
        namelist: Option<PathBuf>,
        /// Forcing directory (default: CASEROOT/ldasin)
        #[arg(short, long)]
        forcing: Option<PathBuf>,
        /// WRF input file (default: CASEROOT/wrfinput_d01)
        #[arg(short = 'i', long)]
        wrfinput: Option<PathBuf>,
        /// Start date and time
        #[arg(short, long, value_parser = parse_time)]
        begtime: NaiveDateTime,
        /// End date and time (exclusive)
        #[arg(short, long, value_parser = parse_time)]
        endtime: NaiveDateTime,
        /// Start date and time of spinup
        #[arg(short = 's', long, value_parser = parse_time)]
        begtimespinup: Option<NaiveDateTime>,
        /// Number of spinup loops
        #[arg(short = 'l', long, default_value_t = 1)]
        nloop: u32,
        /// Delete an existing case first
        #[arg(short, long)]
        delete: bool,
    },

    /// Run a case: spinup loops, then the main period
    RunCase {
        caseroot: PathBuf,
        /// Treat as a fresh case
        #[arg(short, long)]
        fresh: bool,
    },

    /// Copy land state from a restart file to a WRF input file
    Towrf { nmpfile: PathBuf, wrffile: PathBuf },
}

fn parse_time(s: &str) -> Result<NaiveDateTime, String> {
    parse_datetime(s).map_err(|e| e.to_string())
}
