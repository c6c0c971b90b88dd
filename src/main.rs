//! Entry point for the noahmp-tools application.
//! Handles CLI parsing and logging setup, then dispatches to the selected tool.

use clap::Parser;
use noahmp_tools::case::{create_case, CaseConfig};
use noahmp_tools::errors::Result;
use noahmp_tools::extract::{extract_dir, Extractor};
use noahmp_tools::flux::{acc2flx_file, ldasout_diff};
use noahmp_tools::merge::merge_ldasout;
use noahmp_tools::nco::Nco;
use noahmp_tools::normalize::{ldasout2cf, ldasout_tocf, strip_output, wrfinput_subset};
use noahmp_tools::parallel::ParallelConfig;
use noahmp_tools::run_case::run_case;
use noahmp_tools::towrf::towrf;
use noahmp_tools::wps::ungrib;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

mod cli;

use cli::{Args, Command};

fn main() {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level))
    };
    fmt().with_env_filter(filter).with_target(false).init();

    if let Err(e) = run(args) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let parallel = match args.threads {
        Some(n) => ParallelConfig::with_threads(n),
        None => ParallelConfig::all_cores(),
    };
    parallel.setup_global_pool()?;
    let nco = Nco::default().with_bindir(args.nco_bindir);

    match args.command {
        Command::ExtractEt { indir, outdir } => {
            extract_dir(Extractor::Et, &indir, &outdir)?;
        }
        Command::ExtractRad { indir, outdir } => {
            extract_dir(Extractor::Rad, &indir, &outdir)?;
        }
        Command::ExtractRunoff { indir, outdir } => {
            extract_dir(Extractor::Runoff, &indir, &outdir)?;
        }
        Command::ExtractTws { indir, outdir } => {
            extract_dir(Extractor::Tws, &indir, &outdir)?;
        }
        Command::Acc2flx { files } => {
            for file in &files {
                info!("{}", file.display());
                acc2flx_file(file)?;
            }
        }
        Command::LdasoutDiff { caseroot } => ldasout_diff(&caseroot)?,
        Command::Ldasout2cf { files } => ldasout2cf(&files, &nco)?,
        Command::LdasoutTocf { wrfinput, files } => ldasout_tocf(&wrfinput, &files, &nco)?,
        Command::StripOutput { dirs } => {
            let count = strip_output(&dirs, &nco)?;
            info!("stripped {} files", count);
        }
        Command::WrfinputSubset { nc4, nc3 } => wrfinput_subset(&nc4, &nc3)?,
        Command::Merge {
            wrfinput,
            datadir,
            outfile,
            begtime,
            endtime,
            partially,
        } => merge_ldasout(&wrfinput, &datadir, &outfile, begtime, endtime, partially)?,
        Command::Ungrib {
            files,
            prefix,
            append,
            begtime,
            endtime,
        } => {
            let written = ungrib(&files, &prefix, append, begtime, endtime)?;
            info!("wrote {} intermediate files", written.len());
        }
        Command::CreateCase {
            caseroot,
            modelroot,
            namelist,
            forcing,
            wrfinput,
            begtime,
            endtime,
            begtimespinup,
            nloop,
            delete,
        } => {
            let config = CaseConfig {
                modelroot,
                caseroot,
                namelist_template: namelist,
                forcing,
                wrfinput,
                begin: begtime,
                end: endtime,
                begin_spinup: begtimespinup,
                nloop,
                delete,
            };
            create_case(&config)?;
        }
        Command::RunCase { caseroot, fresh } => run_case(&caseroot, fresh)?,
        Command::Towrf { nmpfile, wrffile } => towrf(&nmpfile, &wrffile)?,
    }
    Ok(())
}
