use std::io;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use fitsphot::{Aperture, PhotometryPipeline, Session};
use log::{info, warn};

/// Command line arguments for fitsphot
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Aperture photometry over a sequence of FITS images",
    long_about = "Measures background-subtracted flux and Poisson error for each aperture \
        on each image, in order. Apertures and files can come from a session file, the \
        command line, or both (session entries first).\n\n\
        Output has one row per image and a flux/error column pair per aperture, preceded \
        by a '#' header comment naming the columns."
)]
struct Args {
    #[arg(help = "FITS images to measure, in order")]
    files: Vec<PathBuf>,

    #[arg(
        short,
        long,
        help = "Session file supplying files and apertures",
        long_help = "JSON session file. Its 'files' list is measured before any files given \
            on the command line and its 'apertures' come before any --aperture options."
    )]
    session: Option<PathBuf>,

    #[arg(
        short,
        long = "aperture",
        value_name = "X,Y,R,BR[,NAME]",
        help = "Add an aperture (repeatable)",
        long_help = "Aperture centre (column, row, 0-based pixels), inner radius and \
            background radius, optionally followed by a name. The background radius must \
            be at least the inner radius plus one."
    )]
    apertures: Vec<Aperture>,

    #[arg(short, long, help = "Write the table here instead of stdout")]
    output: Option<PathBuf>,

    #[arg(short, long, default_value_t = ',', help = "Column delimiter")]
    delimiter: char,

    #[arg(long, help = "Worker threads (default: all cores)")]
    threads: Option<usize>,

    #[arg(long, help = "Measure images one at a time on the main thread")]
    sequential: bool,

    #[arg(long, value_name = "FILE", help = "Save the combined files and apertures as a session")]
    save_session: Option<PathBuf>,

    #[arg(short, long, action = ArgAction::Count, help = "More logging (-v info, -vv debug)")]
    verbose: u8,
}

fn main() {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(args) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    if !args.delimiter.is_ascii() {
        bail!("Delimiter must be a single ASCII character");
    }
    let delimiter = args.delimiter as u8;

    let mut session = match &args.session {
        Some(path) => Session::load(path)
            .with_context(|| format!("Failed to load session {}", path.display()))?,
        None => Session::default(),
    };
    session.files.extend(args.files);
    session.apertures.extend(args.apertures);

    if session.files.is_empty() {
        bail!("No input files given");
    }
    if session.apertures.is_empty() {
        bail!("No apertures given (use --aperture or --session)");
    }

    if let Some(path) = &args.save_session {
        session
            .save(path)
            .with_context(|| format!("Failed to save session {}", path.display()))?;
    }

    let mut pipeline = PhotometryPipeline::new();
    if args.sequential {
        if args.threads.is_some() {
            warn!("--threads has no effect with --sequential");
        }
        pipeline = pipeline.sequential();
    } else if let Some(n) = args.threads {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build()
            .context("Failed to build thread pool")?;
        pipeline = pipeline.with_thread_pool(Arc::new(pool));
    }

    let table = pipeline
        .run(&session.files, &session.apertures)
        .context("Photometry failed")?;
    info!(
        "Measured {} images x {} apertures",
        table.shape().0,
        session.apertures.len()
    );

    match &args.output {
        Some(path) => table
            .export(path, delimiter)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => table
            .write_delimited(io::stdout().lock(), delimiter)
            .context("Failed to write table")?,
    }

    Ok(())
}
