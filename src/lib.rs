pub mod errors;
pub mod extract;
pub mod file;
pub mod mask;
pub mod report;
pub mod stats;
pub mod volume;

#[cfg(test)]
mod testing;

pub use extract::*;
pub use mask::IntensityMask;
pub use report::{OutputFormat, SubjectStatisticsRow, SummaryReport};
pub use stats::{IntensityStatistics, DEFAULT_HISTOGRAM_BINS};
pub use volume::VolumetricImage;
