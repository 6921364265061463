use nalgebra::Matrix4;

use super::{display_to_pixel, fill, fit_aspect, overlay_bounds, pixel_to_display, Compositor, Frame};
use crate::config::RenderMode;
use crate::gl::annotations::Annotations;
use crate::gl::context::ortho;
use crate::gl::textures::{target_view, Rect};
use crate::gl::RenderContext;
use crate::observable::DirtyFlag;
use crate::overlay::OverlayList;

const MIN_ZOOM: f64 = 1.0;
const MAX_ZOOM: f64 = 50.0;

/// One slice through the overlays, with zoom and pan.
pub struct SliceCanvas {
    compositor: Compositor,
    viewport: (i32, i32, usize, usize),
    pos: [f64; 3],
    zoom: f64,
    centre: Option<[f64; 2]>,
    show_cursor: bool,
    invert_x: bool,
    invert_y: bool,
    annotations: Annotations,
    redraw: DirtyFlag,
}

impl SliceCanvas {
    pub fn new(overlays: OverlayList, zax: usize, mode: RenderMode) -> Self {
        let redraw = DirtyFlag::new(true);
        Self {
            compositor: Compositor::new(overlays, zax, mode, redraw.clone()),
            viewport: (0, 0, 1, 1),
            pos: [0.0; 3],
            zoom: 1.0,
            centre: None,
            show_cursor: true,
            invert_x: false,
            invert_y: false,
            annotations: Annotations::new(),
            redraw,
        }
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    pub fn annotations(&mut self) -> &mut Annotations {
        &mut self.annotations
    }

    pub fn axes(&self) -> (usize, usize, usize) {
        self.compositor.axes()
    }

    /// Whether anything the canvas shows changed since the last draw.
    pub fn needs_redraw(&self) -> bool {
        self.redraw.is_raised()
    }

    /// Draw into `width` by `height` pixels at `x`, `y` of the default
    /// framebuffer.
    pub fn set_viewport(&mut self, x: i32, y: i32, width: usize, height: usize) {
        if self.viewport != (x, y, width, height) {
            self.viewport = (x, y, width, height);
            self.redraw.raise();
        }
    }

    pub fn size(&self) -> (usize, usize) {
        (self.viewport.2, self.viewport.3)
    }

    pub fn pos(&self) -> [f64; 3] {
        self.pos
    }

    /// Move the cursor. The slice drawn is the one through `pos`.
    pub fn set_pos(&mut self, pos: [f64; 3]) {
        if pos != self.pos {
            self.pos = pos;
            self.redraw.raise();
        }
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    /// Magnification relative to showing every overlay, between 1 and 50.
    pub fn set_zoom(&mut self, zoom: f64) {
        let zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
        if zoom != self.zoom {
            self.zoom = zoom;
            self.redraw.raise();
        }
    }

    pub fn set_show_cursor(&mut self, show: bool) {
        self.show_cursor = show;
        self.redraw.raise();
    }

    pub fn set_inverted(&mut self, invert_x: bool, invert_y: bool) {
        self.invert_x = invert_x;
        self.invert_y = invert_y;
        self.redraw.raise();
    }

    pub fn set_render_mode(&mut self, ctx: &mut RenderContext, mode: RenderMode) {
        self.compositor.set_render_mode(ctx, mode);
    }

    /// Look down a different axis. The cursor keeps its position.
    pub fn set_zax(&mut self, ctx: &mut RenderContext, zax: usize) {
        self.compositor.set_zax(ctx, zax);
        self.centre = None;
    }

    /// Every overlay, fitted to the viewport's aspect ratio.
    fn full_bounds(&self) -> Option<Rect> {
        let (xax, yax, _) = self.axes();
        let (lo, hi) = overlay_bounds(self.compositor.overlays())?;
        let (_, _, w, h) = self.viewport;
        Some(fit_aspect(Rect::new(lo[xax], hi[xax], lo[yax], hi[yax]), w, h))
    }

    /// The display area shown: the fitted overlay bounds shrunk by the zoom
    /// factor around the pan centre. The area never leaves the overlays
    /// along an axis where it is smaller than them.
    pub fn display_bounds(&self) -> Option<Rect> {
        let full = self.full_bounds()?;
        let (xlen, ylen) = (full.width() / self.zoom, full.height() / self.zoom);
        let [cx, cy] = self.centre.unwrap_or([0.5 * (full.xlo + full.xhi), 0.5 * (full.ylo + full.yhi)]);

        let (xax, yax, _) = self.axes();
        let (lo, hi) = overlay_bounds(self.compositor.overlays())?;
        let clamp = |centre: f64, len: f64, lo: f64, hi: f64, flo: f64, fhi: f64| {
            let (mut a, mut b) = (centre - 0.5 * len, centre + 0.5 * len);
            if len >= hi - lo {
                let mid = 0.5 * (flo + fhi);
                a = mid - 0.5 * len;
                b = mid + 0.5 * len;
            } else if a < lo {
                a = lo;
                b = lo + len;
            } else if b > hi {
                b = hi;
                a = hi - len;
            }
            (a, b)
        };
        let (xlo, xhi) = clamp(cx, xlen, lo[xax], hi[xax], full.xlo, full.xhi);
        let (ylo, yhi) = clamp(cy, ylen, lo[yax], hi[yax], full.ylo, full.yhi);
        Some(Rect::new(xlo, xhi, ylo, yhi))
    }

    /// Pan by an offset in display units.
    pub fn pan_by(&mut self, dx: f64, dy: f64) {
        let Some(b) = self.display_bounds() else {
            return;
        };
        self.centre = Some([0.5 * (b.xlo + b.xhi) + dx, 0.5 * (b.ylo + b.yhi) + dy]);
        if let Some(b) = self.display_bounds() {
            self.centre = Some([0.5 * (b.xlo + b.xhi), 0.5 * (b.ylo + b.yhi)]);
        }
        self.redraw.raise();
    }

    /// Pan so `(x, y)` is in the middle, as far as the overlays allow.
    pub fn centre_at(&mut self, x: f64, y: f64) {
        let Some(b) = self.display_bounds() else {
            return;
        };
        self.pan_by(x - 0.5 * (b.xlo + b.xhi), y - 0.5 * (b.ylo + b.yhi));
    }

    /// Pan the least distance that brings `(x, y)` into view.
    pub fn pan_to_show(&mut self, x: f64, y: f64) {
        let Some(b) = self.display_bounds() else {
            return;
        };
        let offset = |v: f64, lo: f64, hi: f64| {
            if v < lo {
                v - lo
            } else if v > hi {
                v - hi
            } else {
                0.0
            }
        };
        let (dx, dy) = (offset(x, b.xlo, b.xhi), offset(y, b.ylo, b.yhi));
        if dx != 0.0 || dy != 0.0 {
            self.pan_by(dx, dy);
        }
    }

    /// Display coordinates of a pixel measured from the bottom left corner.
    /// The depth coordinate is the current slice.
    pub fn canvas_to_world(&self, px: f64, py: f64) -> Option<[f64; 3]> {
        let (_, _, w, h) = self.viewport;
        let px = if self.invert_x { w as f64 - px } else { px };
        let py = if self.invert_y { h as f64 - py } else { py };
        let (x, y) = pixel_to_display(self.display_bounds()?, w, h, px, py)?;
        let (xax, yax, zax) = self.axes();
        let mut pos = [0.0; 3];
        pos[xax] = x;
        pos[yax] = y;
        pos[zax] = self.pos[zax];
        Some(pos)
    }

    pub fn world_to_canvas(&self, pos: [f64; 3]) -> Option<(f64, f64)> {
        let (xax, yax, _) = self.axes();
        let (_, _, w, h) = self.viewport;
        let (px, py) = display_to_pixel(self.display_bounds()?, w, h, pos[xax], pos[yax])?;
        let px = if self.invert_x { w as f64 - px } else { px };
        let py = if self.invert_y { h as f64 - py } else { py };
        Some((px, py))
    }

    pub fn draw(&mut self, ctx: &mut RenderContext) {
        if !ctx.gl.is_current() {
            return;
        }
        let (x, y, w, h) = self.viewport;
        let (xax, yax, zax) = self.axes();
        let zpos = self.pos[zax];
        let background = ctx.config().background;
        let cursor = ctx.config().cursor_colour;

        ctx.gl.viewport(x, y, w, h);
        let Some(view) = self.display_bounds() else {
            self.compositor.reconcile(ctx);
            ctx.gl.set_projection(ortho(0.0, 1.0, 0.0, 1.0));
            ctx.gl.set_modelview(target_view(zax));
            fill(ctx.gl.as_mut(), zax, Rect::new(0.0, 1.0, 0.0, 1.0), 0.0, background);
            self.redraw.take();
            return;
        };
        let (xlo, xhi) = if self.invert_x { (view.xhi, view.xlo) } else { (view.xlo, view.xhi) };
        let (ylo, yhi) = if self.invert_y { (view.yhi, view.ylo) } else { (view.ylo, view.yhi) };
        ctx.gl.set_projection(ortho(xlo, xhi, ylo, yhi));
        ctx.gl.set_modelview(target_view(zax));
        fill(ctx.gl.as_mut(), zax, view, zpos, background);

        let frame = Frame {
            zposes: &[zpos],
            xforms: &[Matrix4::identity()],
            view,
            target_bounds: None,
        };
        self.compositor.draw(ctx, &frame);

        if self.show_cursor {
            let mut from = self.pos;
            let mut to = self.pos;
            from[xax] = view.xlo;
            to[xax] = view.xhi;
            self.annotations.line(from, to, cursor, 1.0);
            let mut from = self.pos;
            let mut to = self.pos;
            from[yax] = view.ylo;
            to[yax] = view.yhi;
            self.annotations.line(from, to, cursor, 1.0);
        }
        self.annotations.draw(ctx.gl.as_mut(), xax, yax, zpos);
        self.redraw.take();
    }

    /// Release everything the canvas holds on the device.
    pub fn destroy(&mut self, ctx: &mut RenderContext) {
        self.compositor.destroy(ctx);
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use float_eq::assert_float_eq;
    use ndarray::Array3;

    use super::*;
    use crate::config::RenderConfig;
    use crate::gl::software::SoftwareContext;
    use crate::overlay::Overlay;
    use crate::volume::Volume;

    fn overlays(shape: [usize; 3]) -> OverlayList {
        let list = OverlayList::new();
        let data = Array3::<f32>::zeros((shape[0], shape[1], shape[2]));
        let volume = Volume::from_3d("img", data, [1.0; 3]).unwrap();
        list.push(Overlay::image(Rc::new(volume), "greyscale"));
        list
    }

    fn canvas(shape: [usize; 3], size: (usize, usize)) -> SliceCanvas {
        let mut c = SliceCanvas::new(overlays(shape), 2, RenderMode::Onscreen);
        c.set_viewport(0, 0, size.0, size.1);
        c
    }

    #[test]
    fn bounds_fit_the_viewport() {
        let c = canvas([10, 10, 10], (200, 100));
        let b = c.display_bounds().unwrap();
        assert_float_eq!(b.width() / b.height(), 2.0, abs <= 1e-9);
        assert_float_eq!(b.height(), 10.0, abs <= 1e-9);
    }

    #[test]
    fn zoom_and_pan_stay_inside_the_overlays() {
        let mut c = canvas([10, 10, 10], (100, 100));
        let full = c.display_bounds().unwrap();
        c.set_zoom(2.0);
        let b = c.display_bounds().unwrap();
        assert_float_eq!(b.width(), full.width() / 2.0, abs <= 1e-9);

        c.pan_by(100.0, 0.0);
        let b = c.display_bounds().unwrap();
        assert_float_eq!(b.xhi, full.xhi, abs <= 1e-9);

        c.centre_at(full.xlo, full.ylo);
        let b = c.display_bounds().unwrap();
        assert_float_eq!(b.xlo, full.xlo, abs <= 1e-9);
        assert_float_eq!(b.ylo, full.ylo, abs <= 1e-9);

        c.set_zoom(1000.0);
        assert_eq!(c.zoom(), MAX_ZOOM);
    }

    #[test]
    fn pan_to_show_moves_the_least_distance() {
        let mut c = canvas([10, 10, 10], (100, 100));
        c.set_zoom(2.0);
        c.centre_at(2.0, 2.0);
        let before = c.display_bounds().unwrap();

        c.pan_to_show(3.0, 3.0);
        assert_eq!(c.display_bounds().unwrap(), before);

        c.pan_to_show(7.0, 3.0);
        let b = c.display_bounds().unwrap();
        assert_float_eq!(b.xhi, 7.0, abs <= 1e-9);
        assert_float_eq!(b.ylo, before.ylo, abs <= 1e-9);
    }

    #[test]
    fn canvas_and_world_coordinates_agree() {
        let mut c = canvas([10, 10, 10], (100, 100));
        c.set_pos([1.0, 2.0, 3.0]);
        let b = c.display_bounds().unwrap();
        let world = c.canvas_to_world(50.0, 25.0).unwrap();
        assert_float_eq!(world[0], b.xlo + 0.5 * b.width(), abs <= 1e-9);
        assert_float_eq!(world[1], b.ylo + 0.25 * b.height(), abs <= 1e-9);
        assert_eq!(world[2], 3.0);
        let (px, py) = c.world_to_canvas(world).unwrap();
        assert_float_eq!(px, 50.0, abs <= 1e-9);
        assert_float_eq!(py, 25.0, abs <= 1e-9);

        c.set_inverted(true, false);
        let flipped = c.canvas_to_world(25.0, 25.0).unwrap();
        assert_float_eq!(flipped[0], b.xlo + 0.75 * b.width(), abs <= 1e-9);
    }

    #[test]
    fn draw_clears_the_redraw_flag_and_shows_the_cursor() {
        let mut ctx = RenderContext::new(Box::new(SoftwareContext::new(10, 10)), RenderConfig::default());
        let mut c = canvas([10, 10, 10], (10, 10));
        c.set_pos([4.5, 4.5, 4.5]);
        assert!(c.needs_redraw());
        c.draw(&mut ctx);
        assert!(!c.needs_redraw());
        assert_eq!(c.compositor().object_count(), 1);

        let img = ctx.gl.read_pixels();
        let green = [0, 255, 0, 255];
        assert!(img.pixels().any(|p| p.0 == green));
        c.set_show_cursor(false);
        c.draw(&mut ctx);
        assert!(!ctx.gl.read_pixels().pixels().any(|p| p.0 == green));
    }

    #[test]
    fn empty_list_has_no_bounds() {
        let c = SliceCanvas::new(OverlayList::new(), 0, RenderMode::Onscreen);
        assert!(c.display_bounds().is_none());
        assert!(c.canvas_to_world(1.0, 1.0).is_none());
    }
}
