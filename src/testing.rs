//! Fixtures shared by the unit tests.

use ndarray::{Array3, ArrayBase, Data, Dimension, RemoveAxis};
use nifti::writer::WriterOptions;
use nifti::NiftiHeader;
use std::path::Path;

/// Header template for written fixtures, with identity intensity scaling.
pub fn reference_header() -> NiftiHeader {
    NiftiHeader {
        scl_slope: 1.0,
        scl_inter: 0.0,
        ..NiftiHeader::default()
    }
}

pub fn write_volume<S, D>(path: &Path, data: &ArrayBase<S, D>, header: &NiftiHeader)
where
    S: Data<Elem = f32>,
    D: Dimension + RemoveAxis,
{
    WriterOptions::new(path)
        .reference_header(header)
        .write_nifti(data)
        .unwrap();
}

pub fn write_corrupt(path: &Path) {
    std::fs::write(path, b"this is not a volume").unwrap();
}

/// Cube of side `size` whose voxel at (i, j, k) holds `(i + j + k) % (max + 1)`.
pub fn ramp_volume(size: usize, max: usize) -> Array3<f32> {
    Array3::from_shape_fn((size, size, size), |(i, j, k)| ((i + j + k) % (max + 1)) as f32)
}

/// Write an 8x8x8 ramp with values in 0..=20 and a 4x4x4 volume of constant 5.
pub fn write_scenario(dir: &Path) {
    write_volume(
        &dir.join("subjectA.nii"),
        &ramp_volume(8, 20),
        &reference_header(),
    );
    write_volume(
        &dir.join("subjectB.nii"),
        &Array3::<f32>::from_elem((4, 4, 4), 5.0),
        &reference_header(),
    );
}
