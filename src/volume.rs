use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Result};
use nalgebra::Matrix4;
use ndarray::{s, Array3, Array4, ArrayView3, Axis};

use crate::observable::Observable;

static NEXT_VOLUME_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a loaded volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VolumeId(u64);

impl VolumeId {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// A 3D or 4D image, stored as `(x, y, z, t)`.
///
/// The data, voxel sizes and voxel-to-world affine never change after
/// construction. The only mutable piece is the selector of the volume that is
/// currently displayed along the fourth axis.
pub struct Volume {
    id: VolumeId,
    name: String,
    data: Array4<f32>,
    pixdim: [f64; 3],
    /// Voxel coordinates (column vector, voxel centres at integers) to world.
    affine: Matrix4<f64>,
    data_range: (f64, f64),
    current: Observable<usize>,
}

impl Volume {
    pub fn new(
        name: impl Into<String>,
        data: Array4<f32>,
        pixdim: [f64; 3],
        affine: Matrix4<f64>,
    ) -> Result<Self> {
        let name = name.into();
        if pixdim.iter().any(|d| !d.is_finite() || *d <= 0.0) {
            bail!("{name}: voxel dimensions must be positive, got {pixdim:?}");
        }
        if affine.try_inverse().is_none() {
            bail!("{name}: voxel-to-world affine is singular");
        }
        if data.len_of(Axis(3)) == 0 {
            bail!("{name}: image has no volumes");
        }

        let data_range = data
            .iter()
            .filter(|v| v.is_finite())
            .fold(None, |acc: Option<(f64, f64)>, &v| {
                let v = v as f64;
                Some(match acc {
                    None => (v, v),
                    Some((lo, hi)) => (lo.min(v), hi.max(v)),
                })
            })
            .unwrap_or((0.0, 0.0));

        Ok(Self {
            id: VolumeId(NEXT_VOLUME_ID.fetch_add(1, Ordering::Relaxed)),
            name,
            data,
            pixdim,
            affine,
            data_range,
            current: Observable::new(0),
        })
    }

    /// A 3D image with a pixdim-scaling affine.
    pub fn from_3d(name: impl Into<String>, data: Array3<f32>, pixdim: [f64; 3]) -> Result<Self> {
        let affine = Matrix4::from_diagonal(&nalgebra::Vector4::new(
            pixdim[0], pixdim[1], pixdim[2], 1.0,
        ));
        Self::new(name, data.insert_axis(Axis(3)), pixdim, affine)
    }

    pub fn id(&self) -> VolumeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> [usize; 3] {
        let s = self.data.shape();
        [s[0], s[1], s[2]]
    }

    pub fn nvols(&self) -> usize {
        self.data.len_of(Axis(3))
    }

    /// A three-volume image can be displayed as a vector field.
    pub fn is_vector(&self) -> bool {
        self.nvols() == 3
    }

    pub fn pixdim(&self) -> [f64; 3] {
        self.pixdim
    }

    pub fn affine(&self) -> &Matrix4<f64> {
        &self.affine
    }

    pub fn data(&self) -> &Array4<f32> {
        &self.data
    }

    /// Minimum and maximum finite value over all volumes.
    pub fn data_range(&self) -> (f64, f64) {
        self.data_range
    }

    /// Selector of the volume displayed along the fourth axis.
    pub fn current_volume(&self) -> &Observable<usize> {
        &self.current
    }

    /// Select the displayed volume, clamped to the available range.
    pub fn set_current_volume(&self, index: usize) {
        self.current.set(index.min(self.nvols() - 1));
    }

    pub fn volume(&self, index: usize) -> ArrayView3<'_, f32> {
        self.data.slice(s![.., .., .., index.min(self.nvols() - 1)])
    }

    pub fn current_data(&self) -> ArrayView3<'_, f32> {
        self.volume(self.current.get())
    }

    /// Value of the current volume at the voxel nearest to `voxel`, or
    /// `None` outside the image.
    pub fn value_at(&self, voxel: [f64; 3]) -> Option<f32> {
        let shape = self.shape();
        let mut idx = [0usize; 3];
        for ax in 0..3 {
            let i = voxel[ax].round();
            if i < 0.0 || i >= shape[ax] as f64 {
                return None;
            }
            idx[ax] = i as usize;
        }
        Some(self.current_data()[idx])
    }

    /// The three vector components at a voxel, for vector images.
    pub fn vector_at(&self, idx: [usize; 3]) -> [f32; 3] {
        let [x, y, z] = idx;
        [
            self.data[[x, y, z, 0]],
            self.data[[x, y, z, 1]],
            self.data[[x, y, z, 2]],
        ]
    }
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("shape", &self.data.shape())
            .field("pixdim", &self.pixdim)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_range_ignores_non_finite() {
        let mut data = Array3::<f32>::zeros((2, 2, 2));
        data[[0, 0, 0]] = -3.0;
        data[[1, 1, 1]] = 7.0;
        data[[1, 0, 1]] = f32::NAN;
        let vol = Volume::from_3d("v", data, [1.0, 1.0, 1.0]).unwrap();
        assert_eq!(vol.data_range(), (-3.0, 7.0));
    }

    #[test]
    fn rejects_bad_pixdim() {
        let data = Array3::<f32>::zeros((2, 2, 2));
        assert!(Volume::from_3d("v", data, [1.0, 0.0, 1.0]).is_err());
    }

    #[test]
    fn current_volume_is_clamped() {
        let data = Array4::<f32>::zeros((2, 2, 2, 3));
        let vol = Volume::new("v", data, [1.0; 3], Matrix4::identity()).unwrap();
        vol.set_current_volume(10);
        assert_eq!(vol.current_volume().get(), 2);
        assert!(vol.is_vector());
    }
}
