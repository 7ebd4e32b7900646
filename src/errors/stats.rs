pub use snafu::Snafu;

#[derive(Debug, Snafu, PartialEq)]
#[snafu(visibility(pub))]
pub enum StatsError {
    #[snafu(display("no voxels selected (threshold: {:?})", threshold))]
    EmptySelection { threshold: Option<f64> },
}
