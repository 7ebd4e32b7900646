use clap::error::ErrorKind;
use clap::Parser;
use snafu::{Report, ResultExt, Snafu, Whatever};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn, Level};

use nifti_stats::errors::ReportError;
use nifti_stats::file::{sorted_paths, SourceFileOperations, VolumeFileOperations};
use nifti_stats::{
    extract_with_progress, BatchOutcome, ExtractConfig, OutputFormat, DEFAULT_HISTOGRAM_BINS,
};

const DEFAULT_OUTPUT_FILENAME: &str = "summary.csv";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("Invalid source path: {}", path.display()))]
    InvalidSourcePath { path: PathBuf },

    #[snafu(display("Invalid output path: {}", path.display()))]
    InvalidOutputPath { path: PathBuf },

    #[snafu(display("Error listing sources in {}: {:?}", path.display(), source))]
    ListSources {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("{} file(s) failed and --strict is set, no report written", count))]
    Strict { count: usize },

    #[snafu(display("Error writing report: {}", source))]
    WriteReport {
        #[snafu(source(from(ReportError, Box::new)))]
        source: Box<ReportError>,
    },
}

fn parse_threshold(s: &str) -> Result<f64, clap::Error> {
    match s.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(clap::Error::raw(
            ErrorKind::InvalidValue,
            "Threshold must be a finite number",
        )),
    }
}

#[derive(Parser, Debug)]
#[command(
    version = env!("CARGO_PKG_VERSION"),
    about = "Compute per-subject intensity statistics for NIfTI volumes and write them to a table",
    long_about = None
)]
struct Args {
    #[arg(help = "Source path. Can be a directory of volumes or a text file with volume paths")]
    source: PathBuf,

    #[arg(help = format!("Output filepath, extension determines format: .csv or .parquet (default: <source>/{DEFAULT_OUTPUT_FILENAME})"))]
    output: Option<PathBuf>,

    #[arg(
        help = "Only include voxels with intensity strictly above this value",
        long = "threshold",
        short = 't',
        allow_negative_numbers = true,
        value_parser = parse_threshold
    )]
    threshold: Option<f64>,

    #[arg(
        help = "Number of histogram bins used to find the histogram peak",
        long = "bins",
        short = 'b',
        default_value_t = DEFAULT_HISTOGRAM_BINS
    )]
    bins: NonZeroUsize,

    #[arg(
        help = "Search subdirectories of the source directory",
        long = "recursive",
        short = 'r',
        default_value_t = false
    )]
    recursive: bool,

    #[arg(
        help = "Process files in parallel",
        long = "parallel",
        short = 'p',
        default_value_t = false
    )]
    parallel: bool,

    #[arg(
        help = "Fail without writing a report if any file cannot be processed",
        long = "strict",
        default_value_t = false
    )]
    strict: bool,

    #[arg(
        help = "Enable verbose logging",
        long = "verbose",
        short = 'v',
        default_value_t = false
    )]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .finish(),
    )
    .whatever_context("Could not set up global logging subscriber")
    .unwrap_or_else(|e: Whatever| {
        eprintln!("[ERROR] {}", Report::from_error(e));
    });

    run(args).unwrap_or_else(|e| {
        error!("{}", Report::from_error(e));
        std::process::exit(-1);
    });
}

/// List the volumes to process. Directory listings are sorted by path, path lists
/// keep the order of the file.
fn load_source_files(source: &Path, recursive: bool) -> Result<Vec<PathBuf>, Error> {
    let files = if source.is_dir() {
        sorted_paths(
            source
                .find_volumes_with_spinner(recursive)
                .context(ListSourcesSnafu { path: source })?,
        )
    } else if source.is_path_list() {
        source
            .read_volume_paths_with_bar()
            .context(ListSourcesSnafu { path: source })?
            .collect()
    } else {
        return InvalidSourcePathSnafu { path: source }.fail();
    };

    if files.is_empty() {
        warn!("No volume files found in {}", source.display());
    } else {
        info!("Number of sources found: {}", files.len());
    }
    Ok(files)
}

fn output_path(source: &Path, output: Option<PathBuf>) -> Result<PathBuf, Error> {
    match output {
        Some(output) if output.is_dir() => InvalidOutputPathSnafu { path: output }.fail(),
        Some(output) => Ok(output),
        None if source.is_dir() => Ok(source.join(DEFAULT_OUTPUT_FILENAME)),
        None => Ok(source
            .parent()
            .unwrap_or(Path::new("."))
            .join(DEFAULT_OUTPUT_FILENAME)),
    }
}

fn run(args: Args) -> Result<BatchOutcome, Error> {
    let dest = output_path(&args.source, args.output)?;
    // Reject unsupported formats before any file is processed
    OutputFormat::from_extension(&dest).context(WriteReportSnafu)?;

    let sources = load_source_files(&args.source, args.recursive)?;
    let config = ExtractConfig {
        threshold: args.threshold,
        bins: args.bins,
        parallel: args.parallel,
    };
    info!("Masking {}, {} histogram bins", config.mask(), config.bins);

    let outcome = extract_with_progress(&sources, &config);
    if !outcome.failures.is_empty() {
        if args.strict {
            return StrictSnafu {
                count: outcome.failures.len(),
            }
            .fail();
        }
        warn!(
            "{} of {} file(s) skipped",
            outcome.failures.len(),
            sources.len()
        );
    }

    outcome.report.write(&dest).context(WriteReportSnafu)?;
    Ok(outcome)
}
