//! NIfTI loading.
//!
//! The rendering core only needs shape, voxel sizes, the voxel-to-world
//! affine and the voxel data. The loader normalises the header's orientation
//! fields into a single column-vector affine (`world = A * [i, j, k, 1]`).

use std::io::{Cursor, Read};
use std::path::Path;

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use nalgebra::Matrix4;
use ndarray::{ArrayD, Ix3, Ix4};
use nifti::{InMemNiftiVolume, IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::volume::Volume;

/// Build the voxel-to-world affine from sform, qform, or pixdims.
pub fn header_affine(hdr: &NiftiHeader) -> Matrix4<f64> {
    let pixdim = header_pixdim(hdr);
    if hdr.sform_code > 0 {
        let rows = [hdr.srow_x, hdr.srow_y, hdr.srow_z];
        let mut m = Matrix4::identity();
        for (r, row) in rows.iter().enumerate() {
            for c in 0..4 {
                m[(r, c)] = row[c] as f64;
            }
        }
        m
    } else if hdr.qform_code > 0 {
        let b = hdr.quatern_b as f64;
        let c = hdr.quatern_c as f64;
        let d = hdr.quatern_d as f64;
        let a = (1.0 - b * b - c * c - d * d).max(0.0).sqrt();
        let r = [
            [
                a * a + b * b - c * c - d * d,
                2.0 * (b * c - a * d),
                2.0 * (b * d + a * c),
            ],
            [
                2.0 * (b * c + a * d),
                a * a + c * c - b * b - d * d,
                2.0 * (c * d - a * b),
            ],
            [
                2.0 * (b * d - a * c),
                2.0 * (c * d + a * b),
                a * a + d * d - b * b - c * c,
            ],
        ];
        let qfac = if hdr.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let scale = [pixdim[0], pixdim[1], pixdim[2] * qfac];
        let offset = [
            hdr.quatern_x as f64,
            hdr.quatern_y as f64,
            hdr.quatern_z as f64,
        ];
        let mut m = Matrix4::identity();
        for row in 0..3 {
            for col in 0..3 {
                m[(row, col)] = r[row][col] * scale[col];
            }
            m[(row, 3)] = offset[row];
        }
        m
    } else {
        // No orientation info: scale by voxel sizes
        Matrix4::from_diagonal(&nalgebra::Vector4::new(
            pixdim[0], pixdim[1], pixdim[2], 1.0,
        ))
    }
}

pub fn header_pixdim(hdr: &NiftiHeader) -> [f64; 3] {
    let fix = |d: f32| {
        let d = d.abs() as f64;
        if d > 0.0 && d.is_finite() {
            d
        } else {
            1.0
        }
    };
    [fix(hdr.pixdim[1]), fix(hdr.pixdim[2]), fix(hdr.pixdim[3])]
}

fn into_volume(name: &str, hdr: &NiftiHeader, data: ArrayD<f32>) -> Result<Volume> {
    let data = match data.ndim() {
        3 => data
            .into_dimensionality::<Ix3>()?
            .insert_axis(ndarray::Axis(3)),
        4 => data.into_dimensionality::<Ix4>()?,
        n => bail!("{name}: {n}-dimensional images are not supported"),
    };
    Volume::new(name, data, header_pixdim(hdr), header_affine(hdr))
}

pub fn load_nifti(path: impl AsRef<Path>) -> Result<Volume> {
    let path = path.as_ref();
    let name = display_name(path);
    let obj = ReaderOptions::new()
        .read_file(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let header = obj.header().clone();
    let data = obj.into_volume().into_ndarray::<f32>()?;
    log::debug!("Loaded {} with shape {:?}", name, data.shape());
    into_volume(&name, &header, data)
}

/// Load a (possibly gzipped) NIfTI image held in memory.
pub fn load_nifti_bytes(name: &str, bytes: &[u8]) -> Result<Volume> {
    let is_gz = bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b;
    let cursor = Cursor::new(bytes);
    if is_gz {
        load_nifti_reader(name, GzDecoder::new(cursor))
    } else {
        load_nifti_reader(name, cursor)
    }
}

fn load_nifti_reader<R: Read>(name: &str, mut reader: R) -> Result<Volume> {
    let header = NiftiHeader::from_reader(&mut reader)?;
    let vox_offset = header.vox_offset.max(348.0) as usize;
    let skip = vox_offset.saturating_sub(348);
    if skip > 0 {
        let mut discard = vec![0u8; skip];
        reader.read_exact(&mut discard)?;
    }
    let volume = InMemNiftiVolume::from_reader(reader, &header)?;
    let data = volume.into_ndarray::<f32>()?;
    into_volume(name, &header, data)
}

/// File name with any `.nii` / `.nii.gz` suffix removed.
pub fn display_name(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    name.trim_end_matches(".gz")
        .trim_end_matches(".nii")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_strips_suffixes() {
        assert_eq!(display_name(Path::new("/data/T1.nii.gz")), "T1");
        assert_eq!(display_name(Path::new("mask.nii")), "mask");
    }

    #[test]
    fn sform_is_used_verbatim() {
        let mut hdr = NiftiHeader::default();
        hdr.sform_code = 1;
        hdr.srow_x = [2.0, 0.0, 0.0, -90.0];
        hdr.srow_y = [0.0, 2.0, 0.0, -126.0];
        hdr.srow_z = [0.0, 0.0, 2.0, -72.0];
        let m = header_affine(&hdr);
        assert_eq!(m[(0, 0)], 2.0);
        assert_eq!(m[(1, 3)], -126.0);
        assert_eq!(m[(3, 3)], 1.0);
    }

    #[test]
    fn bytes_load_plain_and_gzipped() {
        use std::io::Write;

        use flate2::write::GzEncoder;
        use flate2::Compression;
        use ndarray::Array3;
        use nifti::writer::WriterOptions;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.nii");
        let data = Array3::from_shape_fn((3, 4, 5), |(x, y, z)| (x + 10 * y + 100 * z) as f32);
        WriterOptions::new(&path).write_nifti(&data).unwrap();
        let plain = std::fs::read(&path).unwrap();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&plain).unwrap();
        let gzipped = encoder.finish().unwrap();

        for bytes in [&plain, &gzipped] {
            let volume = load_nifti_bytes("ramp", bytes).unwrap();
            assert_eq!(volume.shape(), [3, 4, 5]);
            assert_eq!(volume.nvols(), 1);
            assert_eq!(volume.value_at([2.0, 3.0, 4.0]), Some(432.0));
            assert_eq!(volume.value_at([1.2, 0.9, 0.0]), Some(11.0));
            assert_eq!(volume.value_at([3.0, 0.0, 0.0]), None);
        }
        assert_eq!(load_nifti(&path).unwrap().data_range(), (0.0, 432.0));
    }
}
