use arrow::array::{ArrayRef, Float64Array, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::file::properties::WriterProperties;
use snafu::{ensure, ResultExt};
use std::fs::Permissions;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::errors::report::{
    ArrowSnafu, CreateTempSnafu, CsvSnafu, InvalidOutputExtensionSnafu, InvalidOutputPathSnafu,
    InvalidRowSnafu, IoSnafu, ParquetSnafu, PersistSnafu,
};
use crate::errors::ReportError;
use crate::stats::IntensityStatistics;

/// Report columns, in output order.
pub const COLUMNS: [&str; 7] = [
    "subject",
    "mean_intensity",
    "median_intensity",
    "max_intensity",
    "min_intensity",
    "voxel_count",
    "hist_peak",
];

pub const SUPPORTED_EXTENSIONS: [&str; 2] = ["csv", "parquet"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    Parquet,
}

impl OutputFormat {
    pub fn from_extension(path: &Path) -> Result<Self, ReportError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => Ok(OutputFormat::Csv),
            Some(ext) if ext.eq_ignore_ascii_case("parquet") => Ok(OutputFormat::Parquet),
            _ => InvalidOutputExtensionSnafu {
                path,
                supported: SUPPORTED_EXTENSIONS.to_vec(),
            }
            .fail(),
        }
    }
}

/// Statistics of one subject, as written to the report.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectStatisticsRow {
    subject: String,
    mean_intensity: f64,
    median_intensity: f64,
    max_intensity: f64,
    min_intensity: f64,
    voxel_count: u64,
    histogram_peak_intensity: f64,
}

impl SubjectStatisticsRow {
    /// Build a row, checking that the identifier is non-empty, every intensity is finite
    /// and that mean, median and histogram peak all lie within `[min, max]`.
    pub fn try_new<S: Into<String>>(
        subject: S,
        stats: &IntensityStatistics,
    ) -> Result<Self, ReportError> {
        let subject = subject.into();
        let invalid = |reason: &'static str| {
            InvalidRowSnafu {
                subject: subject.clone(),
                reason,
            }
            .fail()
        };

        if subject.is_empty() {
            return invalid("empty subject identifier");
        }
        let values = [
            stats.mean,
            stats.median,
            stats.min,
            stats.max,
            stats.histogram_peak,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return invalid("non-finite intensity");
        }
        if stats.voxel_count == 0 {
            return invalid("no voxels");
        }
        let within = |v: f64| stats.min <= v && v <= stats.max;
        if !within(stats.mean) {
            return invalid("mean outside [min, max]");
        }
        if !within(stats.median) {
            return invalid("median outside [min, max]");
        }
        if !within(stats.histogram_peak) {
            return invalid("histogram peak outside [min, max]");
        }

        Ok(Self {
            subject,
            mean_intensity: stats.mean,
            median_intensity: stats.median,
            max_intensity: stats.max,
            min_intensity: stats.min,
            voxel_count: stats.voxel_count,
            histogram_peak_intensity: stats.histogram_peak,
        })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn mean_intensity(&self) -> f64 {
        self.mean_intensity
    }

    pub fn median_intensity(&self) -> f64 {
        self.median_intensity
    }

    pub fn max_intensity(&self) -> f64 {
        self.max_intensity
    }

    pub fn min_intensity(&self) -> f64 {
        self.min_intensity
    }

    pub fn voxel_count(&self) -> u64 {
        self.voxel_count
    }

    pub fn histogram_peak_intensity(&self) -> f64 {
        self.histogram_peak_intensity
    }

    /// Fields in `COLUMNS` order. Floats use plain decimal notation.
    fn record(&self) -> [String; 7] {
        [
            self.subject.clone(),
            self.mean_intensity.to_string(),
            self.median_intensity.to_string(),
            self.max_intensity.to_string(),
            self.min_intensity.to_string(),
            self.voxel_count.to_string(),
            self.histogram_peak_intensity.to_string(),
        ]
    }
}

/// Ordered rows of a batch, one per processed subject.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryReport {
    rows: Vec<SubjectStatisticsRow>,
}

impl SummaryReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: SubjectStatisticsRow) {
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[SubjectStatisticsRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubjectStatisticsRow> {
        self.rows.iter()
    }

    /// Write the report as CSV: a header row followed by one line per subject.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), ReportError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(COLUMNS).context(CsvSnafu)?;
        for row in self.iter() {
            csv_writer.write_record(row.record()).context(CsvSnafu)?;
        }
        csv_writer.flush().context(IoSnafu)?;
        Ok(())
    }

    pub fn schema() -> Schema {
        Schema::new(vec![
            Field::new(COLUMNS[0], DataType::Utf8, false),
            Field::new(COLUMNS[1], DataType::Float64, false),
            Field::new(COLUMNS[2], DataType::Float64, false),
            Field::new(COLUMNS[3], DataType::Float64, false),
            Field::new(COLUMNS[4], DataType::Float64, false),
            Field::new(COLUMNS[5], DataType::UInt64, false),
            Field::new(COLUMNS[6], DataType::Float64, false),
        ])
    }

    fn record_batch(&self) -> Result<RecordBatch, ReportError> {
        let floats = |f: fn(&SubjectStatisticsRow) -> f64| -> ArrayRef {
            Arc::new(Float64Array::from(self.iter().map(f).collect::<Vec<_>>()))
        };
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(
                self.iter().map(|r| r.subject()).collect::<Vec<_>>(),
            )),
            floats(SubjectStatisticsRow::mean_intensity),
            floats(SubjectStatisticsRow::median_intensity),
            floats(SubjectStatisticsRow::max_intensity),
            floats(SubjectStatisticsRow::min_intensity),
            Arc::new(UInt64Array::from(
                self.iter().map(|r| r.voxel_count()).collect::<Vec<_>>(),
            )),
            floats(SubjectStatisticsRow::histogram_peak_intensity),
        ];
        RecordBatch::try_new(Arc::new(Self::schema()), columns).context(ArrowSnafu)
    }

    /// Write the report as a single Parquet row group.
    pub fn write_parquet<W: Write + Send>(&self, writer: W) -> Result<(), ReportError> {
        let batch = self.record_batch()?;
        let props = WriterProperties::builder().build();
        let mut writer =
            ArrowWriter::try_new(writer, batch.schema(), Some(props)).context(ParquetSnafu)?;
        writer.write(&batch).context(ParquetSnafu)?;
        writer.close().context(ParquetSnafu)?;
        Ok(())
    }

    /// Write the report to `dest`, picking the format from its extension.
    ///
    /// The report is written to a temporary file next to `dest` and moved into place
    /// once complete, so `dest` either holds the full report or is left as it was.
    pub fn write<P: AsRef<Path>>(&self, dest: P) -> Result<(), ReportError> {
        let dest = dest.as_ref();
        ensure!(!dest.is_dir(), InvalidOutputPathSnafu { path: dest });
        let format = OutputFormat::from_extension(dest)?;

        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = tempfile::Builder::new()
            .prefix(".nifti-stats-")
            .suffix(".tmp")
            .permissions(Permissions::from_mode(0o644))
            .tempfile_in(&dir)
            .context(CreateTempSnafu { dir: &dir })?;

        match format {
            OutputFormat::Csv => self.write_csv(tmp.as_file_mut())?,
            OutputFormat::Parquet => self.write_parquet(tmp.as_file_mut())?,
        }
        tmp.as_file().sync_all().context(IoSnafu)?;
        tmp.persist(dest).context(PersistSnafu { path: dest })?;

        info!("Wrote {} row(s) to {}", self.len(), dest.display());
        Ok(())
    }
}

impl<'a> IntoIterator for &'a SummaryReport {
    type Item = &'a SubjectStatisticsRow;
    type IntoIter = std::slice::Iter<'a, SubjectStatisticsRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

impl FromIterator<SubjectStatisticsRow> for SummaryReport {
    fn from_iter<I: IntoIterator<Item = SubjectStatisticsRow>>(iter: I) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}
