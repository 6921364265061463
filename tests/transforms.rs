use float_eq::assert_float_eq;
use nalgebra::{Matrix4, Rotation3, Vector3};
use proptest::prelude::*;

use nifti_slice_viewer::colourmaps::{bricon_to_display_range, display_range_to_bricon};
use nifti_slice_viewer::gl::textures::display_range_xform;
use nifti_slice_viewer::transform::{transform_point, Space, TransformCatalogue, TransformMode};

const SPACES: [Space; 4] = [Space::Voxel, Space::ScaledVoxel, Space::World, Space::Display];

fn affine(scale: [f64; 3], angle: f64, shift: [f64; 3]) -> Matrix4<f64> {
    let rotation = Rotation3::from_axis_angle(&Vector3::z_axis(), angle).to_homogeneous();
    let scaling = Matrix4::new_nonuniform_scaling(&Vector3::from(scale));
    Matrix4::new_translation(&Vector3::from(shift)) * rotation * scaling
}

fn mode() -> impl Strategy<Value = TransformMode> {
    prop_oneof![
        Just(TransformMode::Id),
        Just(TransformMode::Pixdim),
        Just(TransformMode::Affine)
    ]
}

proptest! {
    #[test]
    fn every_pair_of_spaces_round_trips(
        pixdim in prop::array::uniform3(0.25..4.0f64),
        scale  in prop::array::uniform3(0.25..4.0f64),
        angle  in -3.1..3.1f64,
        shift  in prop::array::uniform3(-100.0..100.0f64),
        point  in prop::array::uniform3(-50.0..50.0f64),
        mode   in mode(),
    ) {
        let cat = TransformCatalogue::new(pixdim, &affine(scale, angle, shift), mode);
        for from in SPACES {
            for to in SPACES {
                let there = transform_point(&cat.transform(from, to), point);
                let back = transform_point(&cat.transform(to, from), there);
                for ax in 0..3 {
                    prop_assert!((back[ax] - point[ax]).abs() <= 1e-5, "{from:?} -> {to:?}: {back:?} vs {point:?}");
                }
            }
        }
    }

    #[test]
    fn display_range_survives_bricon(
        lo    in -100.0..100.0f64,
        width in 1.0..300.0f64,
    ) {
        let data = (0.0, 100.0);
        let (b, c) = display_range_to_bricon(data, (lo, lo + width));
        let (rlo, rhi) = bricon_to_display_range(data, b, c);
        prop_assert!((rlo - lo).abs() <= 1e-6);
        prop_assert!((rhi - (lo + width)).abs() <= 1e-6);
    }
}

#[test]
fn display_space_follows_mode() {
    let pixdim = [2.0, 3.0, 4.0];
    let m = affine([1.0; 3], 0.5, [10.0, 0.0, 0.0]);
    let cat = TransformCatalogue::new(pixdim, &m, TransformMode::Pixdim);
    assert_eq!(cat.transform(Space::Voxel, Space::Display), cat.transform(Space::Voxel, Space::ScaledVoxel));
    let p = transform_point(&cat.transform(Space::Voxel, Space::Display), [1.0, 1.0, 1.0]);
    assert_float_eq!(p[0], 2.0, abs <= 1e-12);
    assert_float_eq!(p[2], 4.0, abs <= 1e-12);
}

#[test]
fn colour_map_coordinates_are_unclamped() {
    let (scale, offset) = display_range_xform(0.0, 100.0);
    let t = |v: f64| v * scale + offset;
    assert_float_eq!(t(0.0), 0.0, abs <= 1e-12);
    assert_float_eq!(t(100.0), 1.0, abs <= 1e-12);
    assert_float_eq!(t(50.0), 0.5, abs <= 1e-12);
    assert_float_eq!(t(-50.0), -0.5, abs <= 1e-12);
    assert_float_eq!(t(150.0), 1.5, abs <= 1e-12);
}

#[test]
fn bricon_of_a_narrowed_range() {
    let (b, c) = display_range_to_bricon((0.0, 100.0), (20.0, 80.0));
    let (lo, hi) = bricon_to_display_range((0.0, 100.0), b, c);
    assert_float_eq!(lo, 20.0, abs <= 1e-9);
    assert_float_eq!(hi, 80.0, abs <= 1e-9);
}
