use nifti::NiftiError;
pub use snafu::Snafu;
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum VolumeError {
    #[snafu(display("error reading volume {}: {}", path.display(), source))]
    Read {
        path: PathBuf,
        #[snafu(source(from(NiftiError, Box::new)))]
        source: Box<NiftiError>,
    },

    #[snafu(display("error converting voxel data of {}: {}", path.display(), source))]
    Convert {
        path: PathBuf,
        #[snafu(source(from(NiftiError, Box::new)))]
        source: Box<NiftiError>,
    },

    #[snafu(display(
        "volume {} has {} dimension(s), at least 3 are required",
        path.display(),
        ndim
    ))]
    Dimensionality { path: PathBuf, ndim: usize },
}
