//! Coordinate systems and the per-overlay transform catalogue.
//!
//! Three concrete spaces exist for every image:
//!
//! | space          | tokens                    | definition                      |
//! |----------------|---------------------------|---------------------------------|
//! | voxel          | `id`, `voxel`             | array indices, centres at ints  |
//! | scaled voxel   | `pixdim`, `scaled-voxel`  | voxel * pixdim                  |
//! | world          | `affine`, `world`         | the image affine                |
//!
//! plus `display`, which resolves to whichever of the three is selected by the
//! overlay's [`TransformMode`]. All matrices act on column vectors.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use nalgebra::{Matrix4, Vector4};
use serde::{Deserialize, Serialize};

/// Which concrete space is used as the display space.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum TransformMode {
    #[value(name = "id")]
    Id,
    #[default]
    #[value(name = "pixdim")]
    Pixdim,
    #[value(name = "affine")]
    Affine,
}

impl TransformMode {
    pub const ALL: [TransformMode; 3] = [TransformMode::Id, TransformMode::Pixdim, TransformMode::Affine];

    fn index(self) -> usize {
        match self {
            TransformMode::Id => 0,
            TransformMode::Pixdim => 1,
            TransformMode::Affine => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransformMode::Id => "id",
            TransformMode::Pixdim => "pixdim",
            TransformMode::Affine => "affine",
        }
    }
}

impl fmt::Display for TransformMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A coordinate space, as accepted by [`TransformCatalogue::transform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Space {
    Voxel,
    ScaledVoxel,
    World,
    Display,
}

impl Space {
    fn resolve(self, display: TransformMode) -> TransformMode {
        match self {
            Space::Voxel => TransformMode::Id,
            Space::ScaledVoxel => TransformMode::Pixdim,
            Space::World => TransformMode::Affine,
            Space::Display => display,
        }
    }
}

impl FromStr for Space {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "id" | "voxel" => Ok(Space::Voxel),
            "pixdim" | "scaled-voxel" => Ok(Space::ScaledVoxel),
            "affine" | "world" => Ok(Space::World),
            "display" => Ok(Space::Display),
            other => Err(anyhow!("unknown coordinate space '{other}'")),
        }
    }
}

/// Precomputed 3x3 table of transforms between the concrete spaces of one
/// image. The table is only rebuilt through [`TransformCatalogue::rebuild`];
/// lookups never recompute anything.
#[derive(Debug, Clone)]
pub struct TransformCatalogue {
    mode: TransformMode,
    xforms: [[Matrix4<f64>; 3]; 3],
    rebuilds: usize,
}

impl TransformCatalogue {
    pub fn new(pixdim: [f64; 3], affine: &Matrix4<f64>, mode: TransformMode) -> Self {
        let mut cat = Self {
            mode,
            xforms: [[Matrix4::identity(); 3]; 3],
            rebuilds: 0,
        };
        cat.rebuild(pixdim, affine, mode);
        cat
    }

    /// Regenerate every matrix. One-hop transforms come from the image
    /// geometry, their reverses from explicit inversion, and the cross
    /// transforms from concatenating one-hop transforms through voxel space.
    pub fn rebuild(&mut self, pixdim: [f64; 3], affine: &Matrix4<f64>, mode: TransformMode) {
        let vox_to_pixdim = Matrix4::from_diagonal(&Vector4::new(pixdim[0], pixdim[1], pixdim[2], 1.0));
        let vox_to_affine = *affine;
        let pixdim_to_vox = invert(&vox_to_pixdim);
        let affine_to_vox = invert(&vox_to_affine);

        let (id, px, af) = (0, 1, 2);
        let eye = Matrix4::identity();
        let mut x = [[eye; 3]; 3];
        x[id][px] = vox_to_pixdim;
        x[id][af] = vox_to_affine;
        x[px][id] = pixdim_to_vox;
        x[af][id] = affine_to_vox;
        x[px][af] = vox_to_affine * pixdim_to_vox;
        x[af][px] = vox_to_pixdim * affine_to_vox;

        self.xforms = x;
        self.mode = mode;
        self.rebuilds += 1;
        log::debug!("Transform catalogue rebuilt (display = {mode})");
    }

    pub fn mode(&self) -> TransformMode {
        self.mode
    }

    /// Number of times the table has been generated.
    pub fn rebuild_count(&self) -> usize {
        self.rebuilds
    }

    pub fn transform(&self, from: Space, to: Space) -> Matrix4<f64> {
        self.transform_with(from, to, None)
    }

    /// As [`TransformCatalogue::transform`], resolving `display` to
    /// `override_mode` when one is given.
    pub fn transform_with(
        &self,
        from: Space,
        to: Space,
        override_mode: Option<TransformMode>,
    ) -> Matrix4<f64> {
        let display = override_mode.unwrap_or(self.mode);
        let from = from.resolve(display).index();
        let to = to.resolve(display).index();
        self.xforms[from][to]
    }

    /// Look up a transform by space tokens. Unknown tokens are an error.
    pub fn transform_by_name(&self, from: &str, to: &str) -> Result<Matrix4<f64>> {
        Ok(self.transform(from.parse()?, to.parse()?))
    }

    /// Bounding box, in display space, of an image of the given shape. Voxel
    /// `i` covers `[i - 0.5, i + 0.5]`.
    pub fn display_bounds(&self, shape: [usize; 3]) -> ([f64; 3], [f64; 3]) {
        let xform = self.transform(Space::Voxel, Space::Display);
        voxel_box_bounds(shape, &xform)
    }
}

/// Invert an affine. The geometry of a [`crate::volume::Volume`] is validated
/// as invertible on construction, so failure here is a broken invariant.
pub fn invert(m: &Matrix4<f64>) -> Matrix4<f64> {
    m.try_inverse()
        .unwrap_or_else(|| panic!("non-invertible transform {m}"))
}

pub fn transform_point(m: &Matrix4<f64>, p: [f64; 3]) -> [f64; 3] {
    let v = m * Vector4::new(p[0], p[1], p[2], 1.0);
    [v[0], v[1], v[2]]
}

/// Axis-aligned bounds of the eight corners of a voxel grid after `xform`.
pub fn voxel_box_bounds(shape: [usize; 3], xform: &Matrix4<f64>) -> ([f64; 3], [f64; 3]) {
    let mut lo = [f64::INFINITY; 3];
    let mut hi = [f64::NEG_INFINITY; 3];
    for corner in 0..8 {
        let p = [
            if corner & 1 == 0 { -0.5 } else { shape[0] as f64 - 0.5 },
            if corner & 2 == 0 { -0.5 } else { shape[1] as f64 - 0.5 },
            if corner & 4 == 0 { -0.5 } else { shape[2] as f64 - 0.5 },
        ];
        let q = transform_point(xform, p);
        for ax in 0..3 {
            lo[ax] = lo[ax].min(q[ax]);
            hi[ax] = hi[ax].max(q[ax]);
        }
    }
    (lo, hi)
}

/// Translation-only matrix.
pub fn translation(offset: [f64; 3]) -> Matrix4<f64> {
    Matrix4::new_translation(&nalgebra::Vector3::new(offset[0], offset[1], offset[2]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_eq::assert_float_eq;
    use rstest::rstest;

    fn oblique() -> Matrix4<f64> {
        let (s, c) = 0.3_f64.sin_cos();
        Matrix4::new(
            2.0 * c, -2.0 * s, 0.0, -90.0,
            2.0 * s, 2.0 * c, 0.0, -126.0,
            0.0, 0.0, 2.5, -72.0,
            0.0, 0.0, 0.0, 1.0,
        )
    }

    #[rstest(
        from, to,
        case(Space::Voxel, Space::Voxel),
        case(Space::World, Space::World),
        case(Space::Display, Space::Display),
        case(Space::ScaledVoxel, Space::ScaledVoxel)
    )]
    fn same_space_is_identity(from: Space, to: Space) {
        let cat = TransformCatalogue::new([2.0, 2.0, 2.5], &oblique(), TransformMode::Affine);
        assert_eq!(cat.transform(from, to), Matrix4::identity());
    }

    #[test]
    fn display_follows_mode_and_override() {
        let cat = TransformCatalogue::new([2.0, 3.0, 4.0], &oblique(), TransformMode::Pixdim);
        let d = cat.transform(Space::Voxel, Space::Display);
        assert_eq!(d, cat.transform(Space::Voxel, Space::ScaledVoxel));
        let o = cat.transform_with(Space::Voxel, Space::Display, Some(TransformMode::Affine));
        assert_eq!(o, oblique());
    }

    #[test]
    fn unknown_token_is_an_error() {
        let cat = TransformCatalogue::new([1.0; 3], &Matrix4::identity(), TransformMode::Id);
        assert!(cat.transform_by_name("voxel", "mni152").is_err());
        assert!(cat.transform_by_name("world", "scaled-voxel").is_ok());
    }

    #[test]
    fn lookups_do_not_rebuild() {
        let cat = TransformCatalogue::new([1.0; 3], &Matrix4::identity(), TransformMode::Id);
        for _ in 0..10 {
            cat.transform(Space::World, Space::Display);
        }
        assert_eq!(cat.rebuild_count(), 1);
    }

    #[test]
    fn pixdim_bounds_cover_scaled_voxels() {
        let cat = TransformCatalogue::new([2.0, 1.0, 1.0], &Matrix4::identity(), TransformMode::Pixdim);
        let (lo, hi) = cat.display_bounds([10, 4, 1]);
        assert_float_eq!(lo, [-1.0, -0.5, -0.5], abs_all <= 1e-12);
        assert_float_eq!(hi, [19.0, 3.5, 0.5], abs_all <= 1e-12);
    }
}
