pub mod report;
pub mod stats;
pub mod volume;

pub use report::ReportError;
pub use snafu::Snafu;
pub use stats::StatsError;
pub use volume::VolumeError;

use std::path::PathBuf;

/// Reasons a single subject is skipped. None of these abort the batch.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SubjectError {
    #[snafu(display("cannot derive a subject identifier from {}", path.display()))]
    MissingSubjectId { path: PathBuf },

    #[snafu(display("decode failed: {}", source))]
    Decode {
        #[snafu(source(from(VolumeError, Box::new)))]
        source: Box<VolumeError>,
    },

    #[snafu(display("statistics undefined: {}", source))]
    Statistics { source: StatsError },

    #[snafu(display("{}", source))]
    Row {
        #[snafu(source(from(ReportError, Box::new)))]
        source: Box<ReportError>,
    },
}
