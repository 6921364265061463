use ndarray::Array3;
use rstest::rstest;

use super::*;
use crate::config::RenderConfig;
use crate::gl::context::ortho;
use crate::gl::software::SoftwareContext;
use crate::gl::textures::target_view;
use crate::gl::Tier;
use crate::overlay::Mesh;

const BACKGROUND: [f32; 4] = [0.0, 0.0, 1.0, 1.0];
const BLUE: [u8; 4] = [0, 0, 255, 255];
const BLACK: [u8; 4] = [0, 0, 0, 255];
const WHITE: [u8; 4] = [255, 255, 255, 255];
const RED: [u8; 4] = [255, 0, 0, 255];

fn context(performance: u8) -> RenderContext {
    let config = RenderConfig {
        performance,
        ..RenderConfig::default()
    };
    RenderContext::new(Box::new(SoftwareContext::new(4, 4)), config)
}

/// 4x4x1 image: 0 in the left half, 100 in the right half.
fn halves() -> Rc<Volume> {
    let data = Array3::from_shape_fn((4, 4, 1), |(x, _, _)| if x >= 2 { 100.0 } else { 0.0 });
    Rc::new(Volume::from_3d("halves", data, [1.0; 3]).unwrap())
}

fn image_overlay(volume: &Rc<Volume>) -> (OverlayList, Rc<Overlay>) {
    let list = OverlayList::new();
    let overlay = list.push(Overlay::image(Rc::clone(volume), "greyscale"));
    (list, overlay)
}

fn object(ctx: &RenderContext, list: &OverlayList, overlay: &Rc<Overlay>) -> GlObject {
    GlObject::new(Rc::clone(overlay), list.clone(), ctx.renderer(), 0, 1, DirtyFlag::new(false))
}

fn look_at_slice(gl: &mut dyn GlContext) {
    gl.set_projection(ortho(-0.5, 3.5, -0.5, 3.5));
    gl.set_modelview(target_view(2));
    gl.clear(BACKGROUND);
}

fn render(ctx: &mut RenderContext, obj: &mut GlObject) -> image::RgbaImage {
    look_at_slice(ctx.gl.as_mut());
    assert!(obj.pre_draw(ctx));
    obj.draw(ctx.gl.as_mut(), 0.0, None);
    obj.post_draw(ctx.gl.as_mut());
    ctx.gl.read_pixels()
}

#[test]
fn init_then_destroy() {
    let mut ctx = context(3);
    let vol = halves();
    let (list, overlay) = image_overlay(&vol);
    let mut obj = object(&ctx, &list, &overlay);

    assert_eq!(obj.state(), ObjectState::Uninitialized);
    assert_eq!(obj.overlay_type(), OverlayType::Volume);
    assert_eq!(obj.axes(), (0, 1, 2));
    assert!(obj.init(&mut ctx));
    assert!(obj.ready());
    assert!(obj.program().is_some());
    assert_eq!(ctx.gl.stats().programs, 1);

    obj.destroy(&mut ctx);
    assert_eq!(obj.state(), ObjectState::Destroyed);
    assert_eq!(ctx.gl.stats().programs, 0);
}

#[test]
fn init_waits_for_a_current_context() {
    let mut gl = SoftwareContext::new(4, 4);
    gl.set_current(false);
    let mut ctx = RenderContext::new(Box::new(gl), RenderConfig::default());
    let vol = halves();
    let (list, overlay) = image_overlay(&vol);
    let mut obj = object(&ctx, &list, &overlay);

    assert!(!obj.init(&mut ctx));
    assert_eq!(obj.state(), ObjectState::Uninitialized);
    assert_eq!(ctx.gl.stats().programs, 0);

    obj.destroy(&mut ctx);
    assert_eq!(obj.state(), ObjectState::Destroyed);
}

#[rstest(performance, tier, case(3, Tier::Glsl), case(2, Tier::Arb), case(1, Tier::FixedFunction))]
fn volume_slice_pixels(performance: u8, tier: Tier) {
    let mut ctx = context(performance);
    assert_eq!(ctx.tier(), tier);
    let vol = halves();
    let (list, overlay) = image_overlay(&vol);
    let mut obj = object(&ctx, &list, &overlay);
    assert!(obj.init(&mut ctx));

    let img = render(&mut ctx, &mut obj);
    for y in 0..4 {
        assert_eq!(img.get_pixel(0, y).0, BLACK);
        assert_eq!(img.get_pixel(1, y).0, BLACK);
        assert_eq!(img.get_pixel(2, y).0, WHITE);
        assert_eq!(img.get_pixel(3, y).0, WHITE);
    }
    obj.destroy(&mut ctx);
    assert!(ctx.resources.is_empty());
}

#[rstest(performance, case(3), case(1))]
fn clipped_values_are_transparent(performance: u8) {
    let mut ctx = context(performance);
    let vol = halves();
    let (list, overlay) = image_overlay(&vol);
    overlay.display().volume.clipping_range.set((50.0, 200.0));
    let mut obj = object(&ctx, &list, &overlay);
    assert!(obj.init(&mut ctx));

    let img = render(&mut ctx, &mut obj);
    assert_eq!(img.get_pixel(0, 0).0, BLUE);
    assert_eq!(img.get_pixel(3, 0).0, WHITE);

    overlay.display().volume.invert_clipping.set(true);
    let img = render(&mut ctx, &mut obj);
    assert_eq!(img.get_pixel(0, 0).0, BLACK);
    assert_eq!(img.get_pixel(3, 0).0, BLUE);
}

#[rstest(performance, case(3), case(1))]
fn mask_colours_voxels_inside_threshold(performance: u8) {
    let mut ctx = context(performance);
    let vol = halves();
    let (list, overlay) = image_overlay(&vol);
    overlay.set_overlay_type(OverlayType::Mask).unwrap();
    let mut obj = object(&ctx, &list, &overlay);
    assert!(matches!(obj, GlObject::Mask(_)));
    assert!(obj.init(&mut ctx));

    let img = render(&mut ctx, &mut obj);
    assert_eq!(img.get_pixel(0, 2).0, BLUE);
    assert_eq!(img.get_pixel(3, 2).0, RED);

    overlay.display().mask.invert.set(true);
    let img = render(&mut ctx, &mut obj);
    assert_eq!(img.get_pixel(0, 2).0, RED);
    assert_eq!(img.get_pixel(3, 2).0, BLUE);
    obj.destroy(&mut ctx);
}

#[test]
fn option_changes_raise_redraw() {
    let mut ctx = context(3);
    let vol = halves();
    let (list, overlay) = image_overlay(&vol);
    let redraw = DirtyFlag::new(false);
    let mut obj = GlObject::new(Rc::clone(&overlay), list.clone(), ctx.renderer(), 0, 1, redraw.clone());

    overlay.display().volume.cmap.set("hot".to_string());
    assert!(!redraw.is_raised(), "not listening before init");

    assert!(obj.init(&mut ctx));
    overlay.display().volume.cmap.set("red".to_string());
    assert!(redraw.take());
    overlay.display().alpha.set(50.0);
    assert!(redraw.take());

    obj.destroy(&mut ctx);
    overlay.display().alpha.set(20.0);
    assert!(!redraw.is_raised());
}

#[test]
fn software_mode_switch_recompiles() {
    let config = RenderConfig {
        software_mode: Some(false),
        ..RenderConfig::default()
    };
    let mut ctx = RenderContext::new(Box::new(SoftwareContext::new(4, 4)), config);
    let vol = halves();
    let (list, overlay) = image_overlay(&vol);
    let mut obj = object(&ctx, &list, &overlay);
    assert!(obj.init(&mut ctx));
    assert!(!obj.software_mode());
    let first = obj.program();

    overlay.display().software_mode.set(true);
    render(&mut ctx, &mut obj);
    assert!(obj.software_mode());
    assert_ne!(obj.program(), first);
    assert_eq!(ctx.gl.stats().programs, 1);

    ctx.set_software_mode(true);
    overlay.display().software_mode.set(false);
    render(&mut ctx, &mut obj);
    assert!(obj.software_mode(), "the context setting still applies");
    obj.destroy(&mut ctx);
}

#[test]
fn image_textures_are_shared_between_overlays() {
    let mut ctx = context(3);
    let vol = halves();
    let list = OverlayList::new();
    let a = list.push(Overlay::image(Rc::clone(&vol), "greyscale"));
    let b = list.push(Overlay::image(Rc::clone(&vol), "hot"));
    let mut objs = [object(&ctx, &list, &a), object(&ctx, &list, &b)];
    for obj in &mut objs {
        assert!(obj.init(&mut ctx));
        render(&mut ctx, obj);
    }

    assert_eq!(ctx.resources.images.len(), 1);
    let key = ctx.resources.images.keys().next().unwrap().to_string();
    assert_eq!(ctx.resources.images.refs(&key), 2);
    assert_eq!(ctx.resources.images.generation_count(&key), 1);
    // One positive and one negative map per overlay.
    assert_eq!(ctx.resources.colour_maps.len(), 4);

    objs[0].destroy(&mut ctx);
    assert_eq!(ctx.resources.images.refs(&key), 1);
    objs[1].destroy(&mut ctx);
    assert!(ctx.resources.is_empty());
    assert_eq!(ctx.gl.stats().textures, 0);
    assert_eq!(ctx.gl.stats().programs, 0);
}

#[test]
fn colour_map_is_regenerated_only_on_change() {
    let mut ctx = context(3);
    let vol = halves();
    let (list, overlay) = image_overlay(&vol);
    let mut obj = object(&ctx, &list, &overlay);
    assert!(obj.init(&mut ctx));
    let key = format!("ColourMapTexture_{}", overlay.id());

    render(&mut ctx, &mut obj);
    render(&mut ctx, &mut obj);
    assert_eq!(ctx.resources.colour_maps.generation_count(&key), 1);

    overlay.display().volume.display_range.set((0.0, 200.0));
    let img = render(&mut ctx, &mut obj);
    assert_eq!(ctx.resources.colour_maps.generation_count(&key), 2);
    let grey = img.get_pixel(3, 0).0;
    assert!(grey[0] > 100 && grey[0] < 160, "{grey:?}");
    obj.destroy(&mut ctx);
}

#[test]
fn content_hash_follows_display_options() {
    let ctx = context(3);
    let vol = halves();
    let (list, overlay) = image_overlay(&vol);
    let obj = object(&ctx, &list, &overlay);

    let before = obj.content_hash();
    assert_eq!(before, obj.content_hash());
    overlay.display().volume.cmap.set("hot".to_string());
    assert_ne!(before, obj.content_hash());
}

#[test]
fn set_axes_moves_the_depth_axis() {
    let ctx = context(3);
    let vol = halves();
    let (list, overlay) = image_overlay(&vol);
    let mut obj = object(&ctx, &list, &overlay);
    obj.set_axes(1, 2);
    assert_eq!(obj.axes(), (1, 2, 0));
}

#[test]
fn slice_buffers_are_refilled_in_place() {
    let mut ctx = context(3);
    let vol = halves();
    let (list, overlay) = image_overlay(&vol);
    let mut obj = object(&ctx, &list, &overlay);
    assert!(obj.init(&mut ctx));

    let before = render(&mut ctx, &mut obj);
    assert_eq!(ctx.gl.stats().buffers, 1);
    render(&mut ctx, &mut obj);
    assert_eq!(ctx.gl.stats().buffers, 1);

    overlay.display().resolution.set(2.0);
    assert_eq!(render(&mut ctx, &mut obj), before);
    assert_eq!(ctx.gl.stats().buffers, 1);

    obj.destroy(&mut ctx);
    assert_eq!(ctx.gl.stats().buffers, 0);
}

#[test]
fn model_draws_plane_outline() {
    let mut ctx = context(3);
    let mesh = Mesh::new(
        vec![[0.0, 0.0, -1.0], [3.0, 0.0, 1.0], [0.0, 3.0, 1.0], [3.0, 3.0, -1.0]],
        vec![[0, 1, 2], [1, 3, 2]],
    )
    .unwrap();
    let list = OverlayList::new();
    let overlay = list.push(Overlay::model("mesh", Rc::new(mesh)));
    let mut obj = object(&ctx, &list, &overlay);
    assert!(matches!(obj, GlObject::Model(_)));
    assert!(obj.init(&mut ctx));

    let img = render(&mut ctx, &mut obj);
    let red = img.pixels().filter(|p| p.0 == RED).count();
    assert!(red > 0);
    assert!(red < 16);
    obj.destroy(&mut ctx);
}

#[test]
fn draw_all_applies_each_transform() {
    let mut ctx = SoftwareContext::new(8, 4);
    ctx.set_projection(ortho(-0.5, 7.5, -0.5, 3.5));
    let mut ctx = RenderContext::new(Box::new(ctx), RenderConfig::default());
    let vol = halves();
    let (list, overlay) = image_overlay(&vol);
    let mut obj = object(&ctx, &list, &overlay);
    assert!(obj.init(&mut ctx));

    ctx.gl.set_modelview(target_view(2));
    ctx.gl.clear(BACKGROUND);
    assert!(obj.pre_draw(&mut ctx));
    let shifted = crate::transform::translation([4.0, 0.0, 0.0]);
    obj.draw_all(ctx.gl.as_mut(), &[0.0, 0.0], &[Matrix4::identity(), shifted]);
    obj.post_draw(ctx.gl.as_mut());

    let img = ctx.gl.read_pixels();
    assert_eq!(img.get_pixel(0, 0).0, BLACK);
    assert_eq!(img.get_pixel(3, 0).0, WHITE);
    assert_eq!(img.get_pixel(4, 0).0, BLACK);
    assert_eq!(img.get_pixel(7, 0).0, WHITE);
    obj.destroy(&mut ctx);
}
