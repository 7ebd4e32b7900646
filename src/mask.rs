use std::fmt;

/// Predicate deciding which voxels take part in the statistics.
///
/// Non-finite intensities are never included.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum IntensityMask {
    /// Every finite voxel is included.
    #[default]
    All,
    /// Only voxels strictly above the threshold are included.
    Threshold(f64),
}

impl IntensityMask {
    pub fn from_threshold(threshold: Option<f64>) -> Self {
        match threshold {
            Some(t) => Self::Threshold(t),
            None => Self::All,
        }
    }

    pub fn threshold(&self) -> Option<f64> {
        match self {
            Self::All => None,
            Self::Threshold(t) => Some(*t),
        }
    }

    pub fn includes(&self, value: f64) -> bool {
        match self {
            _ if !value.is_finite() => false,
            Self::All => true,
            Self::Threshold(t) => value > *t,
        }
    }

    /// Collect the included voxels, keeping their order.
    pub fn select<I: IntoIterator<Item = f64>>(&self, voxels: I) -> Vec<f64> {
        voxels.into_iter().filter(|&v| self.includes(v)).collect()
    }
}

impl fmt::Display for IntensityMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all voxels"),
            Self::Threshold(t) => write!(f, "voxels > {t}"),
        }
    }
}
