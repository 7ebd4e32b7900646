use arrow::error::ArrowError;
use parquet::errors::ParquetError;
pub use snafu::Snafu;
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ReportError {
    #[snafu(display("invalid row for subject '{}': {}", subject, reason))]
    InvalidRow { subject: String, reason: &'static str },

    #[snafu(display("invalid output path: {}", path.display()))]
    InvalidOutputPath { path: PathBuf },

    #[snafu(display(
        "invalid output extension for {}, supported extensions: {}",
        path.display(),
        supported.join(", ")
    ))]
    InvalidOutputExtension {
        path: PathBuf,
        supported: Vec<&'static str>,
    },

    #[snafu(display("unable to create temporary report file in {}: {}", dir.display(), source))]
    CreateTemp {
        dir: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("error writing CSV report: {}", source))]
    Csv {
        #[snafu(source(from(csv::Error, Box::new)))]
        source: Box<csv::Error>,
    },

    #[snafu(display("IO error writing report: {}", source))]
    Io {
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("Arrow error: {:?}", source))]
    Arrow {
        #[snafu(source(from(ArrowError, Box::new)))]
        source: Box<ArrowError>,
    },

    #[snafu(display("Parquet error: {:?}", source))]
    Parquet {
        #[snafu(source(from(ParquetError, Box::new)))]
        source: Box<ParquetError>,
    },

    #[snafu(display("unable to move report into place at {}: {}", path.display(), source))]
    Persist {
        path: PathBuf,
        #[snafu(source(from(tempfile::PersistError, Box::new)))]
        source: Box<tempfile::PersistError>,
    },
}
