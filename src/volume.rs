use ndarray::{arr2, Array2, ArrayD};
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use snafu::{ensure, ResultExt};
use std::path::Path;

use crate::errors::volume::{ConvertSnafu, DimensionalitySnafu, ReadSnafu};
use crate::errors::VolumeError;

/// Minimum number of dimensions a volume must have.
pub const MIN_DIMENSIONS: usize = 3;

/// A decoded volumetric image: voxel intensities, the voxel-to-world affine and
/// the header it was decoded from.
///
/// Intensities are scaled by the header's `scl_slope`/`scl_inter` and stored as
/// `f64` in the axis order of the file (x, y, z, then any further dimensions).
#[derive(Debug, Clone)]
pub struct VolumetricImage {
    header: NiftiHeader,
    affine: Array2<f64>,
    data: ArrayD<f64>,
}

impl VolumetricImage {
    /// Decode a NIfTI-1 or Analyze volume. Gzip compressed files are handled
    /// based on their extension.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VolumeError> {
        let path = path.as_ref();
        let obj = ReaderOptions::new()
            .read_file(path)
            .context(ReadSnafu { path })?;
        let header = obj.header().clone();
        let data = obj
            .into_volume()
            .into_ndarray::<f64>()
            .context(ConvertSnafu { path })?;
        ensure!(
            data.ndim() >= MIN_DIMENSIONS,
            DimensionalitySnafu {
                path,
                ndim: data.ndim()
            }
        );
        let affine = affine_from_header(&header);
        Ok(Self {
            header,
            affine,
            data,
        })
    }

    pub fn header(&self) -> &NiftiHeader {
        &self.header
    }

    /// 4x4 matrix mapping voxel indices to world coordinates.
    pub fn affine(&self) -> &Array2<f64> {
        &self.affine
    }

    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    /// Total number of voxels across all dimensions.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterate over every voxel intensity.
    pub fn voxels(&self) -> impl Iterator<Item = f64> + '_ {
        self.data.iter().copied()
    }
}

/// Resolve the voxel-to-world affine of a header.
///
/// The sform is used when `sform_code > 0`, then the qform when `qform_code > 0`.
/// Otherwise the affine is a diagonal of the voxel sizes.
pub fn affine_from_header(header: &NiftiHeader) -> Array2<f64> {
    if header.sform_code > 0 {
        sform_affine(header)
    } else if header.qform_code > 0 {
        qform_affine(header)
    } else {
        fallback_affine(header)
    }
}

fn sform_affine(header: &NiftiHeader) -> Array2<f64> {
    let row = |r: [f32; 4]| [r[0] as f64, r[1] as f64, r[2] as f64, r[3] as f64];
    arr2(&[
        row(header.srow_x),
        row(header.srow_y),
        row(header.srow_z),
        [0.0, 0.0, 0.0, 1.0],
    ])
}

fn qform_affine(header: &NiftiHeader) -> Array2<f64> {
    let mut b = header.quatern_b as f64;
    let mut c = header.quatern_c as f64;
    let mut d = header.quatern_d as f64;
    let a_sq = 1.0 - (b * b + c * c + d * d);
    let a = if a_sq < 1e-7 {
        // 180 degree rotation, renormalize (b, c, d)
        let norm = (b * b + c * c + d * d).sqrt();
        b /= norm;
        c /= norm;
        d /= norm;
        0.0
    } else {
        a_sq.sqrt()
    };

    let qfac = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
    let dx = header.pixdim[1] as f64;
    let dy = header.pixdim[2] as f64;
    let dz = header.pixdim[3] as f64 * qfac;

    arr2(&[
        [
            (a * a + b * b - c * c - d * d) * dx,
            2.0 * (b * c - a * d) * dy,
            2.0 * (b * d + a * c) * dz,
            header.quatern_x as f64,
        ],
        [
            2.0 * (b * c + a * d) * dx,
            (a * a + c * c - b * b - d * d) * dy,
            2.0 * (c * d - a * b) * dz,
            header.quatern_y as f64,
        ],
        [
            2.0 * (b * d - a * c) * dx,
            2.0 * (c * d + a * b) * dy,
            (a * a + d * d - b * b - c * c) * dz,
            header.quatern_z as f64,
        ],
        [0.0, 0.0, 0.0, 1.0],
    ])
}

fn fallback_affine(header: &NiftiHeader) -> Array2<f64> {
    let size = |i: usize| {
        let v = header.pixdim[i] as f64;
        if v.is_finite() && v > 0.0 {
            v
        } else {
            1.0
        }
    };
    Array2::from_diag(&ndarray::arr1(&[size(1), size(2), size(3), 1.0]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{reference_header, write_corrupt, write_volume};
    use ndarray::{Array2, Array3, Array4};
    use rstest::rstest;
    use tempfile::TempDir;

    const TOLERANCE: f64 = 1e-5;

    fn assert_affine_eq(actual: &Array2<f64>, expected: &Array2<f64>) {
        assert_eq!(actual.shape(), &[4, 4]);
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert!((a - e).abs() < TOLERANCE, "{actual} != {expected}");
        }
    }

    #[rstest]
    #[case::nii("sub-01.nii")]
    #[case::gzip("sub-01.nii.gz")]
    fn test_open_3d(#[case] filename: &str) {
        let tmp_dir = TempDir::new().unwrap();
        let path = tmp_dir.path().join(filename);
        let array = Array3::<f32>::from_shape_fn((4, 3, 2), |(i, j, k)| (i + j + k) as f32);
        write_volume(&path, &array, &reference_header());

        let image = VolumetricImage::open(&path).unwrap();
        assert_eq!(image.shape(), &[4, 3, 2]);
        assert_eq!(image.ndim(), 3);
        assert_eq!(image.len(), 24);
        assert!(!image.is_empty());
        assert_eq!(image.data()[&[3, 2, 1][..]], 6.0);

        let total: f64 = image.voxels().sum();
        let expected: f64 = array.iter().map(|&v| v as f64).sum();
        assert!((total - expected).abs() < TOLERANCE);
    }

    #[test]
    fn test_open_4d() {
        let tmp_dir = TempDir::new().unwrap();
        let path = tmp_dir.path().join("bold.nii");
        let array = Array4::<f32>::from_elem((2, 2, 2, 3), 7.0);
        write_volume(&path, &array, &reference_header());

        let image = VolumetricImage::open(&path).unwrap();
        assert_eq!(image.ndim(), 4);
        assert_eq!(image.len(), 24);
        assert!(image.voxels().all(|v| v == 7.0));
    }

    #[test]
    fn test_open_2d_rejected() {
        let tmp_dir = TempDir::new().unwrap();
        let path = tmp_dir.path().join("slice.nii");
        let array = Array2::<f32>::from_elem((4, 4), 1.0);
        write_volume(&path, &array, &reference_header());

        let result = VolumetricImage::open(&path);
        assert!(matches!(
            result,
            Err(VolumeError::Dimensionality { ndim: 2, .. })
        ));
    }

    #[test]
    fn test_open_corrupt() {
        let tmp_dir = TempDir::new().unwrap();
        let path = tmp_dir.path().join("subjectC.nii");
        write_corrupt(&path);

        let result = VolumetricImage::open(&path);
        assert!(matches!(result, Err(VolumeError::Read { .. })));
    }

    #[test]
    fn test_open_missing() {
        let tmp_dir = TempDir::new().unwrap();
        let result = VolumetricImage::open(tmp_dir.path().join("missing.nii"));
        match result {
            Err(VolumeError::Read { path, .. }) => assert!(path.ends_with("missing.nii")),
            other => panic!("expected read error, got {other:?}"),
        }
    }

    #[test]
    fn test_sform_affine() {
        let tmp_dir = TempDir::new().unwrap();
        let path = tmp_dir.path().join("sform.nii");
        let mut header = reference_header();
        header.sform_code = 1;
        header.srow_x = [2.0, 0.0, 0.0, -90.0];
        header.srow_y = [0.0, 2.0, 0.0, -126.0];
        header.srow_z = [0.0, 0.0, 2.0, -72.0];
        write_volume(&path, &Array3::<f32>::zeros((2, 2, 2)), &header);

        let image = VolumetricImage::open(&path).unwrap();
        let expected = arr2(&[
            [2.0, 0.0, 0.0, -90.0],
            [0.0, 2.0, 0.0, -126.0],
            [0.0, 0.0, 2.0, -72.0],
            [0.0, 0.0, 0.0, 1.0],
        ]);
        assert_affine_eq(image.affine(), &expected);
    }

    #[rstest]
    #[case::identity(0.0, 1.0, [1.0, 2.0, 3.0])]
    #[case::flipped_z(0.0, -1.0, [1.0, 2.0, -3.0])]
    fn test_qform_affine_identity_rotation(
        #[case] quatern_b: f32,
        #[case] qfac: f32,
        #[case] diag: [f64; 3],
    ) {
        let mut header = reference_header();
        header.sform_code = 0;
        header.qform_code = 1;
        header.quatern_b = quatern_b;
        header.quatern_x = 10.0;
        header.quatern_y = 20.0;
        header.quatern_z = 30.0;
        header.pixdim = [qfac, 1.0, 2.0, 3.0, 1.0, 1.0, 1.0, 1.0];

        let expected = arr2(&[
            [diag[0], 0.0, 0.0, 10.0],
            [0.0, diag[1], 0.0, 20.0],
            [0.0, 0.0, diag[2], 30.0],
            [0.0, 0.0, 0.0, 1.0],
        ]);
        assert_affine_eq(&affine_from_header(&header), &expected);
    }

    #[test]
    fn test_qform_affine_180_degree_rotation() {
        // Rotation of 180 degrees about x: (b, c, d) = (1, 0, 0)
        let mut header = reference_header();
        header.sform_code = 0;
        header.qform_code = 1;
        header.quatern_b = 1.0;
        header.pixdim = [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0];

        let expected = arr2(&[
            [1.0, 0.0, 0.0, 0.0],
            [0.0, -1.0, 0.0, 0.0],
            [0.0, 0.0, -1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ]);
        assert_affine_eq(&affine_from_header(&header), &expected);
    }

    #[test]
    fn test_fallback_affine() {
        let mut header = reference_header();
        header.sform_code = 0;
        header.qform_code = 0;
        header.pixdim = [1.0, 2.0, 3.0, 0.0, 1.0, 1.0, 1.0, 1.0];

        let expected = arr2(&[
            [2.0, 0.0, 0.0, 0.0],
            [0.0, 3.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ]);
        assert_affine_eq(&affine_from_header(&header), &expected);
    }
}
