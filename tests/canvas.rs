use std::rc::Rc;

use nalgebra::Matrix4;
use ndarray::Array3;
use pretty_assertions::assert_eq;
use rstest::rstest;

use nifti_slice_viewer::canvas::{LightBoxCanvas, SliceCanvas};
use nifti_slice_viewer::config::{RenderConfig, RenderMode};
use nifti_slice_viewer::display::OverlayType;
use nifti_slice_viewer::gl::context::ResourceStats;
use nifti_slice_viewer::gl::routines::generate_slice_vertices;
use nifti_slice_viewer::gl::software::SoftwareContext;
use nifti_slice_viewer::gl::RenderContext;
use nifti_slice_viewer::overlay::{Overlay, OverlayList};
use nifti_slice_viewer::volume::Volume;

fn context(width: usize, height: usize) -> RenderContext {
    RenderContext::new(Box::new(SoftwareContext::new(width, height)), RenderConfig::default())
}

/// 10x10x10 volume whose value is ten times the index along `axis`.
fn ramp(name: &str, axis: usize) -> Rc<Volume> {
    let data = Array3::from_shape_fn((10, 10, 10), |(x, y, z)| [x, y, z][axis] as f32 * 10.0);
    Rc::new(Volume::from_3d(name, data, [1.0; 3]).unwrap())
}

fn slice_canvas(list: &OverlayList, mode: RenderMode) -> SliceCanvas {
    let mut canvas = SliceCanvas::new(list.clone(), 2, mode);
    canvas.set_viewport(0, 0, 40, 40);
    canvas.set_pos([4.5, 4.5, 4.0]);
    canvas.set_show_cursor(false);
    canvas
}

fn lightbox(list: &OverlayList, mode: RenderMode) -> LightBoxCanvas {
    let mut canvas = LightBoxCanvas::new(list.clone(), 2, mode);
    canvas.set_viewport(0, 0, 100, 40);
    canvas.set_ncols(5);
    canvas.set_nrows(2);
    canvas.set_show_cursor(false);
    canvas.set_show_grid_lines(false);
    canvas
}

#[test]
fn slice_geometry_follows_resolution() {
    let identity = Matrix4::identity();
    let full = generate_slice_vertices([10, 10, 10], 0, 1, 0.0, &identity, &identity, 1.0);
    assert_eq!(full.len(), 600);
    let coarse = generate_slice_vertices([10, 10, 10], 0, 1, 0.0, &identity, &identity, 2.0);
    assert_eq!(coarse.len() / 6, 25);
}

#[rstest(mode, case(RenderMode::Offscreen), case(RenderMode::Prerender))]
fn slice_canvas_modes_agree(mode: RenderMode) {
    let list = OverlayList::new();
    list.push(Overlay::image(ramp("ramp", 0), "greyscale"));

    let mut ctx = context(40, 40);
    let mut onscreen = slice_canvas(&list, RenderMode::Onscreen);
    onscreen.draw(&mut ctx);
    let expected = ctx.gl.read_pixels();
    assert_eq!(expected.get_pixel(0, 20).0, [0, 0, 0, 255]);
    assert_eq!(expected.get_pixel(39, 20).0, [255, 255, 255, 255]);
    onscreen.destroy(&mut ctx);

    let mut ctx = context(40, 40);
    let mut canvas = slice_canvas(&list, mode);
    canvas.draw(&mut ctx);
    assert_eq!(canvas.compositor().render_target_count(), 1);
    assert_eq!(ctx.gl.read_pixels(), expected);
    canvas.destroy(&mut ctx);
}

#[test]
fn switching_to_offscreen_creates_one_target_per_overlay() {
    let list = OverlayList::new();
    list.push(Overlay::image(ramp("a", 0), "greyscale"));
    list.push(Overlay::image(ramp("b", 1), "hot"));

    let mut ctx = context(40, 40);
    let mut canvas = slice_canvas(&list, RenderMode::Onscreen);
    canvas.draw(&mut ctx);
    assert_eq!(canvas.compositor().object_count(), 2);
    assert_eq!(canvas.compositor().render_target_count(), 0);

    canvas.set_render_mode(&mut ctx, RenderMode::Offscreen);
    assert!(canvas.needs_redraw());
    canvas.draw(&mut ctx);
    assert_eq!(canvas.compositor().render_target_count(), 2);
    assert_eq!(ctx.gl.stats().framebuffers, 2);

    canvas.set_render_mode(&mut ctx, RenderMode::Onscreen);
    assert_eq!(canvas.compositor().render_target_count(), 0);
    assert_eq!(ctx.gl.stats().framebuffers, 0);

    canvas.set_render_mode(&mut ctx, RenderMode::Offscreen);
    canvas.draw(&mut ctx);
    canvas.destroy(&mut ctx);
    assert_eq!(canvas.compositor().render_target_count(), 0);
    assert!(ctx.resources.is_empty());
    assert_eq!(ctx.gl.stats(), ResourceStats::default());
}

#[test]
fn type_change_replaces_the_object() {
    let list = OverlayList::new();
    let overlay = list.push(Overlay::image(ramp("a", 0), "greyscale"));
    let mut ctx = context(40, 40);
    let mut canvas = slice_canvas(&list, RenderMode::Onscreen);
    canvas.draw(&mut ctx);
    assert_eq!(canvas.compositor().lifecycle_counts(), (1, 0));

    overlay.set_overlay_type(OverlayType::Mask).unwrap();
    assert!(canvas.needs_redraw());
    canvas.draw(&mut ctx);
    assert_eq!(canvas.compositor().lifecycle_counts(), (2, 1));
    let object = canvas.compositor().object(overlay.id()).unwrap();
    assert_eq!(object.overlay_type(), OverlayType::Mask);
    assert!(object.ready());
    canvas.destroy(&mut ctx);
}

#[test]
fn removed_overlays_release_their_resources() {
    let list = OverlayList::new();
    let a = list.push(Overlay::image(ramp("a", 0), "greyscale"));
    let mut ctx = context(40, 40);
    let mut canvas = slice_canvas(&list, RenderMode::Offscreen);
    canvas.draw(&mut ctx);
    assert!(!ctx.resources.is_empty());

    list.remove(a.id());
    assert!(canvas.needs_redraw());
    canvas.draw(&mut ctx);
    assert_eq!(canvas.compositor().object_count(), 0);
    assert_eq!(canvas.compositor().lifecycle_counts(), (1, 1));
    assert_eq!(canvas.compositor().render_target_count(), 0);
    assert!(ctx.resources.is_empty());
    assert_eq!(ctx.gl.stats().textures, 0);
}

#[rstest(mode, case(RenderMode::Onscreen), case(RenderMode::Offscreen), case(RenderMode::Prerender))]
fn lightbox_releases_the_last_removed_overlay(mode: RenderMode) {
    let list = OverlayList::new();
    let a = list.push(Overlay::image(ramp("a", 2), "greyscale"));
    let mut ctx = context(100, 40);
    let mut canvas = lightbox(&list, mode);
    canvas.draw(&mut ctx);
    assert_eq!(canvas.compositor().object_count(), 1);
    assert!(ctx.gl.stats().textures > 0);

    list.remove(a.id());
    canvas.draw(&mut ctx);
    assert_eq!(canvas.compositor().object_count(), 0);
    assert_eq!(canvas.compositor().lifecycle_counts(), (1, 1));
    assert_eq!(canvas.compositor().render_target_count(), 0);
    assert!(ctx.resources.is_empty());
    assert!(ctx.stacks.is_empty());
    assert_eq!(ctx.gl.stats(), ResourceStats::default());
    canvas.destroy(&mut ctx);
}

#[test]
fn disabled_overlays_are_not_drawn() {
    let list = OverlayList::new();
    let a = list.push(Overlay::image(ramp("a", 0), "greyscale"));
    let mut ctx = context(40, 40);
    let mut canvas = slice_canvas(&list, RenderMode::Onscreen);

    a.display().enabled.set(false);
    canvas.draw(&mut ctx);
    let img = ctx.gl.read_pixels();
    assert!(img.pixels().all(|p| p.0 == [0, 0, 0, 255]));
    canvas.destroy(&mut ctx);
}

#[test]
fn prerendered_slices_are_reused_until_content_changes() {
    let list = OverlayList::new();
    let a = list.push(Overlay::image(ramp("a", 0), "greyscale"));
    let mut ctx = context(40, 40);
    let mut canvas = slice_canvas(&list, RenderMode::Prerender);

    let renders = |ctx: &RenderContext| {
        let key = ctx.stacks.keys().next().unwrap().to_string();
        ctx.stacks.get(ctx.gl.as_ref(), &key).unwrap().render_count()
    };

    canvas.draw(&mut ctx);
    assert_eq!(ctx.stacks.len(), 1);
    assert_eq!(renders(&ctx), 1);

    canvas.draw(&mut ctx);
    assert_eq!(renders(&ctx), 1);

    canvas.set_pos([4.5, 4.5, 7.0]);
    canvas.draw(&mut ctx);
    assert_eq!(renders(&ctx), 2);

    a.display().volume.cmap.set("hot".to_string());
    canvas.draw(&mut ctx);
    assert_eq!(renders(&ctx), 3);

    canvas.destroy(&mut ctx);
    assert!(ctx.stacks.is_empty());
    assert_eq!(ctx.gl.stats(), ResourceStats::default());
}

#[rstest(
    mode,
    case(RenderMode::Onscreen),
    case(RenderMode::Offscreen),
    case(RenderMode::Prerender)
)]
fn lightbox_draws_one_cell_per_slice(mode: RenderMode) {
    let list = OverlayList::new();
    list.push(Overlay::image(ramp("depth", 2), "greyscale"));
    let mut ctx = context(100, 40);
    let mut canvas = lightbox(&list, mode);
    assert_eq!(canvas.visible_slices(), 0..10);

    canvas.draw(&mut ctx);
    let img = ctx.gl.read_pixels();
    let centre = |slice: u32| img.get_pixel((slice % 5) * 20 + 10, (slice / 5) * 20 + 10).0;
    assert_eq!(centre(0), [0, 0, 0, 255]);
    assert_eq!(centre(5), [142, 142, 142, 255]);
    assert_eq!(centre(9), [255, 255, 255, 255]);
    for slice in 1..10 {
        assert!(centre(slice)[0] > centre(slice - 1)[0], "slice {slice}");
    }
    canvas.destroy(&mut ctx);
    assert_eq!(ctx.gl.stats().textures, 0);
}

#[test]
fn canvases_share_a_surface_through_viewports() {
    let list = OverlayList::new();
    list.push(Overlay::image(ramp("a", 0), "greyscale"));
    let mut ctx = context(80, 40);

    let mut left = slice_canvas(&list, RenderMode::Onscreen);
    let mut right = slice_canvas(&list, RenderMode::Offscreen);
    right.set_viewport(40, 0, 40, 40);
    left.draw(&mut ctx);
    right.draw(&mut ctx);

    let img = ctx.gl.read_pixels();
    for y in 0..40 {
        for x in 0..40 {
            assert_eq!(img.get_pixel(x, y), img.get_pixel(x + 40, y), "({x}, {y})");
        }
    }
    left.destroy(&mut ctx);
    right.destroy(&mut ctx);
}
