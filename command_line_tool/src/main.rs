use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use log::{info, warn};

use ifssolver::config::SolverConfig;
use ifssolver::{Method, Solver, SolverError};

/// Feature backend selectable on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Multi-scale FAST corners and a k-d tree matcher.
    Cpu,
    /// wgpu compute shaders; needs the `gpu` build feature.
    Gpu,
}

impl From<Backend> for Method {
    fn from(backend: Backend) -> Method {
        match backend {
            Backend::Cpu => Method::Cpu,
            Backend::Gpu => Method::Gpu,
        }
    }
}

/// Command line arguments structure.
#[derive(Parser, Debug)]
#[command(author, version, about = "Locate portal photos in an IFS picture and draw the passcode.")]
struct Args {
    /// Configuration file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Split the IFS picture only
    #[arg(long, conflicts_with_all = ["draw", "auto"])]
    split: bool,

    /// Draw the passcode from an earlier split only
    #[arg(long, conflicts_with = "auto")]
    draw: bool,

    /// Split, then draw
    #[arg(long)]
    auto: bool,

    /// Feature backend
    #[arg(long, value_enum, default_value_t = Backend::Cpu)]
    method: Backend,

    /// Reuse portal features cached by earlier runs
    #[arg(long)]
    no_clean: bool,

    /// Do not save or resume progress; removes any saved progress
    #[arg(long)]
    no_progress: bool,

    /// Metadata CSV to read instead of the one in the output directory
    #[arg(long)]
    metadata: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if !(args.split || args.draw || args.auto) {
        bail!("nothing to do, pass one of --split, --draw or --auto");
    }
    let method = Method::from(args.method);

    let config = SolverConfig::load(&args.config)
        .with_context(|| format!("failed to load configuration {}", args.config.display()))?;
    if args.auto {
        info!("Processing automatically with {}", args.config.display());
    }

    let interrupt = Arc::new(AtomicBool::new(false));
    {
        let interrupt = Arc::clone(&interrupt);
        ctrlc::set_handler(move || {
            warn!("Interrupt received, stopping after the current portal");
            interrupt.store(true, Ordering::SeqCst);
        })
        .context("failed to install the Ctrl-C handler")?;
    }

    let mut solver = Solver::new(config)
        .with_no_clean(args.no_clean)
        .with_save_progress(!args.no_progress)
        .with_interrupt(interrupt);
    if let Some(metadata) = args.metadata {
        solver = solver.with_metadata(metadata);
    }

    let mut counts = None;
    if args.split || args.auto {
        info!("Locating portal photos in the IFS picture");
        match solver.split_picture(method) {
            Ok(report) => counts = Some(report.column_counts()),
            Err(SolverError::Interrupted) => {
                warn!("Interrupted; run the same command again to resume");
                std::process::exit(130);
            }
            Err(e) => return Err(e).context("split failed"),
        }
    }
    if args.draw || args.auto {
        info!("Drawing the passcode");
        let columns = solver.draw_passcode().context("drawing the passcode failed")?;
        let num_columns = columns.iter().map(|(n, _)| n + 1).max().unwrap_or(0);
        let mut per_column = vec![0; num_columns];
        for (n, points) in &columns {
            per_column[*n] = points.len();
        }
        counts = Some(per_column);
    }

    if let Some(counts) = counts {
        println!(
            "Results written to {}, compare them with the IFS picture to correct the records:",
            solver.config().output_sub_dir().display()
        );
        for (n, count) in counts.iter().enumerate() {
            println!(" column {:2} matches: {count:2}", n + 1);
        }
    }
    Ok(())
}
