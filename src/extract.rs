use indicatif::{ParallelProgressIterator, ProgressBar, ProgressFinish, ProgressIterator};
use itertools::Itertools;
use rayon::prelude::*;
use snafu::{OptionExt, Report, ResultExt};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::errors::{DecodeSnafu, MissingSubjectIdSnafu, RowSnafu, StatisticsSnafu, SubjectError};
use crate::file::{default_bar, VolumeFileOperations};
use crate::mask::IntensityMask;
use crate::report::{SubjectStatisticsRow, SummaryReport};
use crate::stats::{IntensityStatistics, DEFAULT_HISTOGRAM_BINS};
use crate::volume::VolumetricImage;

/// Settings shared by every subject of a batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractConfig {
    /// Voxels at or below this intensity are excluded. `None` keeps every voxel.
    pub threshold: Option<f64>,
    /// Number of histogram bins used for the histogram peak.
    pub bins: NonZeroUsize,
    /// Process files on the rayon thread pool. Output order is unaffected.
    pub parallel: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            threshold: None,
            bins: DEFAULT_HISTOGRAM_BINS,
            parallel: false,
        }
    }
}

impl ExtractConfig {
    pub fn mask(&self) -> IntensityMask {
        IntensityMask::from_threshold(self.threshold)
    }
}

/// A file that contributed no row to the report.
#[derive(Debug)]
pub struct SubjectFailure {
    pub path: PathBuf,
    pub subject: Option<String>,
    pub error: SubjectError,
}

/// Result of a batch: the report plus every file that was skipped.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub report: SummaryReport,
    pub failures: Vec<SubjectFailure>,
}

impl BatchOutcome {
    /// Fold the result of one file into the outcome.
    fn record(
        mut self,
        path: PathBuf,
        result: Result<SubjectStatisticsRow, SubjectError>,
    ) -> Self {
        match result {
            Ok(row) => {
                debug!(
                    "{}: {} voxel(s), mean {}",
                    row.subject(),
                    row.voxel_count(),
                    row.mean_intensity()
                );
                self.report.push(row);
            }
            Err(error) => {
                let subject = path.subject_id();
                warn!(
                    "Skipping {}: {}",
                    subject.as_deref().unwrap_or("<unknown>"),
                    Report::from_error(&error)
                );
                self.failures.push(SubjectFailure {
                    path,
                    subject,
                    error,
                });
            }
        }
        self
    }
}

/// Decode one file and compute its report row.
pub fn process_subject<P: AsRef<Path>>(
    path: P,
    config: &ExtractConfig,
) -> Result<SubjectStatisticsRow, SubjectError> {
    let path = path.as_ref();
    let subject = path.subject_id().context(MissingSubjectIdSnafu { path })?;

    let image = VolumetricImage::open(path).context(DecodeSnafu)?;
    debug!(
        "Decoded {} with shape {:?} from {}",
        subject,
        image.shape(),
        path.display()
    );
    let stats = IntensityStatistics::compute(image.voxels(), &config.mask(), config.bins)
        .context(StatisticsSnafu)?;
    drop(image);

    SubjectStatisticsRow::try_new(subject, &stats).context(RowSnafu)
}

/// Subject identifiers that appear on more than one row. Such rows are all kept.
fn duplicate_subjects(report: &SummaryReport) -> Vec<&str> {
    report.iter().map(|row| row.subject()).duplicates().collect()
}

fn fold_results<I>(results: I) -> BatchOutcome
where
    I: IntoIterator<Item = (PathBuf, Result<SubjectStatisticsRow, SubjectError>)>,
{
    let outcome = results
        .into_iter()
        .fold(BatchOutcome::default(), |outcome, (path, result)| {
            outcome.record(path, result)
        });

    let duplicates = duplicate_subjects(&outcome.report);
    if !duplicates.is_empty() {
        warn!("Duplicate subject identifiers: {}", duplicates.join(", "));
    }
    info!(
        "Processed {} subject(s), skipped {}",
        outcome.report.len(),
        outcome.failures.len()
    );
    outcome
}

fn run_batch(paths: &[PathBuf], config: &ExtractConfig, pb: ProgressBar) -> BatchOutcome {
    let process = |path: &PathBuf| (path.clone(), process_subject(path, config));
    if config.parallel {
        // Indexed collection keeps results in input order
        let results = paths
            .par_iter()
            .progress_with(pb)
            .map(process)
            .collect::<Vec<_>>();
        fold_results(results)
    } else {
        fold_results(paths.iter().progress_with(pb).map(process))
    }
}

/// Compute one report row per file, in the order given.
///
/// Files that cannot be decoded, or whose mask selects no voxels, are logged and
/// recorded as failures. They never stop the batch.
pub fn extract(paths: &[PathBuf], config: &ExtractConfig) -> BatchOutcome {
    run_batch(paths, config, ProgressBar::hidden())
}

/// Like `extract`, but with a progress bar.
pub fn extract_with_progress(paths: &[PathBuf], config: &ExtractConfig) -> BatchOutcome {
    let pb = default_bar(paths.len() as u64).with_finish(ProgressFinish::AndLeave);
    pb.set_message("Computing statistics");
    run_batch(paths, config, pb)
}
