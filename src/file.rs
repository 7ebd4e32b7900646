use indicatif::ParallelProgressIterator;
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use rayon::iter::IntoParallelIterator;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::path::PathBuf;
use tracing::warn;
use walkdir::WalkDir;

/// Recognized volume suffixes, lowercase. Longer suffixes come first so that
/// `.nii.gz` wins over a bare `.gz` style match.
pub const VOLUME_SUFFIXES: [&str; 4] = [".nii.gz", ".hdr.gz", ".nii", ".hdr"];

type IOResult<T> = Result<T, std::io::Error>;

pub fn default_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{msg} {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta} @ {per_sec})",
            )
            .unwrap(),
    );
    pb
}

pub fn default_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.blue} {msg}")
            .unwrap(),
    );
    spinner
}

/// Filter map function for boolean tuple results with the following logic:
/// - Boolean true results are propagated
/// - Boolean false results are filtered
/// - Errors are propagated
fn filter_fn_bool_tuple<T, E>(r: Result<(bool, T), E>) -> Option<Result<T, E>> {
    match r {
        Ok((true, p)) => Some(Ok(p)),
        Ok((false, _)) => None,
        Err(e) => Some(Err(e)),
    }
}

/// Sort paths lexicographically. This is the listing order used for every batch,
/// independent of the order the filesystem walker yields entries.
pub fn sorted_paths<I: IntoIterator<Item = PathBuf>>(paths: I) -> Vec<PathBuf> {
    paths.into_iter().sorted().collect()
}

pub trait SourceFileOperations
where
    Self: AsRef<Path>,
{
    /// Read a file containing a list of paths and return an iterator of results.
    /// Blank lines are skipped.
    fn read_paths(&self) -> IOResult<impl Iterator<Item = IOResult<PathBuf>>> {
        let reader = BufReader::new(File::open(self.as_ref())?);
        let result = reader.lines().filter_map(|line| match line {
            Ok(s) if s.trim().is_empty() => None,
            Ok(s) => Some(Ok(PathBuf::from(s.trim()))),
            Err(e) => Some(Err(e)),
        });
        Ok(result)
    }

    /// Check if the path looks like a list of paths rather than a volume or directory.
    fn is_path_list(&self) -> bool {
        let path = self.as_ref();
        path.is_file()
            && path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("txt"))
                .unwrap_or(false)
    }
}

impl<P: AsRef<Path>> SourceFileOperations for P {}

pub trait VolumeFileOperations
where
    Self: AsRef<Path>,
{
    /// Matching volume suffix of the file name, if any, as a lowercase string.
    fn volume_suffix(&self) -> Option<&'static str> {
        let name = self.as_ref().file_name()?.to_str()?.to_ascii_lowercase();
        VOLUME_SUFFIXES
            .iter()
            .find(|suffix| name.ends_with(*suffix) && name.len() > suffix.len())
            .copied()
    }

    /// Check if a file has a NIfTI or Analyze header extension.
    fn has_volume_extension(&self) -> bool {
        self.volume_suffix().is_some()
    }

    /// Check if a path is a volume file. Only the extension and existence are checked,
    /// a corrupt file with a volume extension is still a volume file here.
    fn is_volume_file(&self) -> IOResult<bool> {
        Ok(self.as_ref().is_file() && self.has_volume_extension())
    }

    /// Similar to `is_volume_file`, but returns a default value if an error occurs.
    fn is_volume_file_or(&self, default: bool) -> bool {
        self.is_volume_file().unwrap_or(default)
    }

    /// Subject identifier of a volume: the file name with its volume suffix removed.
    /// Paths without a volume suffix fall back to the file stem.
    fn subject_id(&self) -> Option<String> {
        let name = self.as_ref().file_name()?.to_string_lossy();
        let id = match self.volume_suffix() {
            Some(suffix) => name[..name.len() - suffix.len()].to_string(),
            None => self.as_ref().file_stem()?.to_string_lossy().to_string(),
        };
        (!id.is_empty()).then_some(id)
    }

    /// Find all volume files in a directory. Without `recursive` only the direct
    /// children of the directory are considered. Results are not ordered.
    ///
    /// Hidden and git-ignored files are included. Symbolic links are followed.
    /// Entries that cannot be read are logged and skipped.
    fn find_volumes(&self, recursive: bool) -> IOResult<impl Iterator<Item = PathBuf>> {
        let dir = self.as_ref();
        if !dir.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Not a directory",
            ));
        }
        let max_depth = if recursive { usize::MAX } else { 1 };
        let result = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(max_depth)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry.into_path()),
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|file| file.is_volume_file_or(false));
        Ok(result)
    }

    /// Find all volume files in a directory, with a progress spinner.
    fn find_volumes_with_spinner(
        &self,
        recursive: bool,
    ) -> IOResult<impl Iterator<Item = PathBuf>> {
        let spinner = default_spinner();
        spinner.set_message("Searching for volume files");
        let result = self.find_volumes(recursive)?.inspect(move |_| {
            spinner.tick();
        });
        Ok(result)
    }

    /// Read volume paths from a text file. Propagates any errors encountered in opening the
    /// text file or in reading its lines. Paths are filtered using `is_volume_file`.
    fn read_volume_paths(&self) -> IOResult<impl Iterator<Item = PathBuf>>
    where
        Self: SourceFileOperations,
    {
        let result = self
            .read_paths()?
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|r| r.and_then(|p| p.is_volume_file().map(|is_volume| (is_volume, p))))
            .filter_map(filter_fn_bool_tuple)
            .collect::<IOResult<Vec<_>>>()?
            .into_iter();
        Ok(result)
    }

    /// Like `read_volume_paths`, but with a progress bar.
    fn read_volume_paths_with_bar(&self) -> IOResult<impl Iterator<Item = PathBuf>>
    where
        Self: SourceFileOperations,
    {
        let paths = self.read_paths()?.collect::<Vec<_>>();

        let pb = default_bar(paths.len() as u64);
        pb.set_message("Reading volume paths from text file");

        let result = paths
            .into_par_iter()
            .progress_with(pb)
            .map(|r| r.and_then(|p| p.is_volume_file().map(|is_volume| (is_volume, p))))
            .filter_map(filter_fn_bool_tuple)
            .collect::<IOResult<Vec<_>>>()?
            .into_iter();
        Ok(result)
    }
}

impl<P: AsRef<Path>> VolumeFileOperations for P {}
