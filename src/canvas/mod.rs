//! Canvases: draw the overlay list, one or many slices at a time.
//!
//! Both canvas shapes hand their slices to a [`Compositor`], which keeps one
//! [`GlObject`] per overlay and draws them in overlay order using the
//! configured [`RenderMode`].

mod lightbox;
mod slice;

use std::collections::HashMap;
use std::rc::Rc;

use nalgebra::{Matrix4, Vector3};

use crate::config::RenderMode;
use crate::gl::context::{BlendMode, GlContext, Primitive, Vertex};
use crate::gl::globject::{GlObject, ObjectState};
use crate::gl::resources::{CacheSlot, GlResource};
use crate::gl::routines::screen_axes;
use crate::gl::textures::{Rect, RenderTexture, RenderTextureStack};
use crate::gl::RenderContext;
use crate::observable::{DirtyFlag, Subscriptions};
use crate::overlay::{Overlay, OverlayId, OverlayList};

pub use self::lightbox::LightBoxCanvas;
pub use self::slice::SliceCanvas;

/// One redraw's worth of slices.
pub struct Frame<'a> {
    /// Slice positions along the depth axis.
    pub zposes: &'a [f64],
    /// One display-space transform per slice.
    pub xforms: &'a [Matrix4<f64>],
    /// The display rectangle mapped onto the viewport.
    pub view: Rect,
    /// Area covered by off-screen targets. Each overlay's own bounds when
    /// `None`.
    pub target_bounds: Option<Rect>,
}

/// Keeps a GL object per overlay and draws them.
pub struct Compositor {
    overlays: OverlayList,
    xax: usize,
    yax: usize,
    zax: usize,
    mode: RenderMode,
    objects: HashMap<OverlayId, GlObject>,
    targets: HashMap<OverlayId, RenderTexture>,
    stacks: HashMap<OverlayId, CacheSlot>,
    redraw: DirtyFlag,
    list_subs: Subscriptions,
    overlay_subs: HashMap<OverlayId, Subscriptions>,
    created: usize,
    destroyed: usize,
}

impl Compositor {
    pub fn new(overlays: OverlayList, zax: usize, mode: RenderMode, redraw: DirtyFlag) -> Self {
        assert!(zax < 3, "depth axis must be 0, 1 or 2");
        let (xax, yax) = screen_axes(zax);
        let mut list_subs = Subscriptions::new();
        list_subs.raise_on(overlays.observable(), &redraw);
        Self {
            overlays,
            xax,
            yax,
            zax,
            mode,
            objects: HashMap::new(),
            targets: HashMap::new(),
            stacks: HashMap::new(),
            redraw,
            list_subs,
            overlay_subs: HashMap::new(),
            created: 0,
            destroyed: 0,
        }
    }

    pub fn overlays(&self) -> &OverlayList {
        &self.overlays
    }

    pub fn axes(&self) -> (usize, usize, usize) {
        (self.xax, self.yax, self.zax)
    }

    pub fn render_mode(&self) -> RenderMode {
        self.mode
    }

    pub fn object(&self, id: OverlayId) -> Option<&GlObject> {
        self.objects.get(&id)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// GL objects created and destroyed so far.
    pub fn lifecycle_counts(&self) -> (usize, usize) {
        (self.created, self.destroyed)
    }

    /// Off-screen targets and pre-render stacks currently held.
    pub fn render_target_count(&self) -> usize {
        self.targets.len() + self.stacks.len()
    }

    /// Switch compositing mode. Everything the previous mode rendered into
    /// is thrown away and rebuilt on the next draw.
    pub fn set_render_mode(&mut self, ctx: &mut RenderContext, mode: RenderMode) {
        if mode == self.mode {
            return;
        }
        log::debug!("Render mode {:?} -> {mode:?}", self.mode);
        self.release_targets(ctx);
        self.mode = mode;
        self.redraw.raise();
    }

    /// Look down a different display axis.
    pub fn set_zax(&mut self, ctx: &mut RenderContext, zax: usize) {
        assert!(zax < 3, "depth axis must be 0, 1 or 2");
        if zax == self.zax {
            return;
        }
        let (xax, yax) = screen_axes(zax);
        self.xax = xax;
        self.yax = yax;
        self.zax = zax;
        for object in self.objects.values_mut() {
            object.set_axes(xax, yax);
        }
        self.release_targets(ctx);
        self.redraw.raise();
    }

    fn release_targets(&mut self, ctx: &mut RenderContext) {
        let gl = ctx.gl.as_mut();
        for (_, mut target) in self.targets.drain() {
            target.destroy(gl);
        }
        for (_, mut slot) in self.stacks.drain() {
            slot.release(&mut ctx.stacks, gl);
        }
    }

    fn discard(&mut self, ctx: &mut RenderContext, id: OverlayId) {
        if let Some(mut object) = self.objects.remove(&id) {
            object.destroy(ctx);
            self.destroyed += 1;
        }
        if let Some(mut target) = self.targets.remove(&id) {
            target.destroy(ctx.gl.as_mut());
        }
        if let Some(mut slot) = self.stacks.remove(&id) {
            slot.release(&mut ctx.stacks, ctx.gl.as_mut());
        }
    }

    /// Bring the object set in line with the overlay list: objects of removed
    /// overlays, and of overlays whose type changed, are destroyed; missing
    /// ones are created; uninitialised ones are initialised if the context
    /// allows it.
    pub fn reconcile(&mut self, ctx: &mut RenderContext) {
        let overlays = self.overlays.snapshot();

        let stale: Vec<OverlayId> = self
            .objects
            .iter()
            .filter(|(id, object)| {
                overlays
                    .iter()
                    .find(|o| o.id() == **id)
                    .map_or(true, |o| o.overlay_type() != object.overlay_type())
            })
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            self.discard(ctx, id);
        }
        self.overlay_subs
            .retain(|id, _| overlays.iter().any(|o| o.id() == *id));

        for overlay in &overlays {
            let id = overlay.id();
            self.overlay_subs.entry(id).or_insert_with(|| {
                let mut subs = Subscriptions::new();
                subs.raise_on(&overlay.display().overlay_type, &self.redraw);
                subs.raise_on(&overlay.display().enabled, &self.redraw);
                subs
            });
            let object = self.objects.entry(id).or_insert_with(|| {
                self.created += 1;
                GlObject::new(
                    Rc::clone(overlay),
                    self.overlays.clone(),
                    ctx.renderer(),
                    self.xax,
                    self.yax,
                    self.redraw.clone(),
                )
            });
            if object.state() == ObjectState::Uninitialized && !object.init(ctx) {
                log::debug!("{}: no current context, initialisation deferred", overlay.name());
            }
        }
    }

    /// Overlays to draw this frame, in overlay order.
    fn drawable(&self) -> Vec<Rc<Overlay>> {
        self.overlays
            .snapshot()
            .into_iter()
            .filter(|o| o.display().enabled.get())
            .filter(|o| self.objects.get(&o.id()).is_some_and(GlObject::ready))
            .collect()
    }

    /// Draw every enabled overlay for the slices of `frame`.
    pub fn draw(&mut self, ctx: &mut RenderContext, frame: &Frame<'_>) {
        debug_assert_eq!(frame.zposes.len(), frame.xforms.len());
        self.reconcile(ctx);
        if !ctx.gl.is_current() {
            return;
        }
        match self.mode {
            RenderMode::Onscreen => self.draw_onscreen(ctx, frame),
            RenderMode::Offscreen => self.draw_offscreen(ctx, frame),
            RenderMode::Prerender => self.draw_prerendered(ctx, frame),
        }
    }

    fn draw_onscreen(&mut self, ctx: &mut RenderContext, frame: &Frame<'_>) {
        for overlay in self.drawable() {
            let Some(object) = self.objects.get_mut(&overlay.id()) else {
                continue;
            };
            if !object.pre_draw(ctx) {
                continue;
            }
            object.draw_all(ctx.gl.as_mut(), frame.zposes, frame.xforms);
            object.post_draw(ctx.gl.as_mut());
        }
    }

    fn draw_offscreen(&mut self, ctx: &mut RenderContext, frame: &Frame<'_>) {
        let (_, _, vw, vh) = ctx.gl.viewport_rect();
        let max_size = ctx.config().max_render_texture_size;
        let mut drawn = Vec::new();

        for overlay in self.drawable() {
            let id = overlay.id();
            let Some(object) = self.objects.get_mut(&id) else {
                continue;
            };
            let bounds = frame.target_bounds.unwrap_or_else(|| {
                let (lo, hi) = object.display_bounds();
                Rect::new(lo[self.xax], hi[self.xax], lo[self.yax], hi[self.yax])
            });
            if bounds.is_empty() || frame.view.is_empty() {
                continue;
            }
            let pixels = |len: f64, view: f64, screen: usize| {
                ((len / view * screen as f64).ceil() as usize).clamp(1, max_size)
            };
            let width = pixels(bounds.width(), frame.view.width(), vw);
            let height = pixels(bounds.height(), frame.view.height(), vh);

            if !object.pre_draw(ctx) {
                continue;
            }
            let gl = ctx.gl.as_mut();
            let target = self
                .targets
                .entry(id)
                .or_insert_with(|| RenderTexture::new(gl, width, height));
            target.resize(gl, width, height);
            target.set_bounds(bounds);

            let saved = target.bind_as_target(gl);
            object.draw_all(gl, frame.zposes, frame.xforms);
            target.unbind_as_target(gl, saved);
            object.post_draw(gl);
            drawn.push(id);
        }

        let zpos = frame.zposes.first().copied().unwrap_or(0.0);
        let gl = ctx.gl.as_mut();
        for id in drawn {
            if let Some(target) = self.targets.get(&id) {
                target.draw(gl, self.zax, zpos, None);
            }
        }
    }

    fn draw_prerendered(&mut self, ctx: &mut RenderContext, frame: &Frame<'_>) {
        let max_slices = ctx.config().max_prerender_slices;
        let max_size = ctx.config().max_render_texture_size;
        let zax = self.zax;

        for overlay in self.drawable() {
            let id = overlay.id();
            let Some(object) = self.objects.get_mut(&id) else {
                continue;
            };
            let key = format!("RenderTextureStack_{id}_{zax}");
            let slot = self.stacks.entry(id).or_default();
            if !slot.hold(&mut ctx.stacks, ctx.gl.as_mut(), key.clone(), |_| {
                RenderTextureStack::new(zax, max_slices, max_size)
            }) {
                continue;
            }
            if !object.pre_draw(ctx) {
                continue;
            }
            let Some(stack) = ctx.stacks.get_mut(ctx.gl.as_ref(), &key) else {
                continue;
            };
            let gl = ctx.gl.as_mut();
            stack.configure(gl, object);
            let rendered = stack.refresh(gl, object, frame.zposes);
            object.post_draw(gl);
            if rendered > 0 {
                log::debug!("{}: pre-rendered {rendered} slices", overlay.name());
            }
            for (zpos, xform) in frame.zposes.iter().zip(frame.xforms) {
                stack.draw(gl, *zpos, Some(xform));
            }
        }
    }

    /// Destroy every object and render target and stop listening.
    pub fn destroy(&mut self, ctx: &mut RenderContext) {
        let ids: Vec<OverlayId> = self.objects.keys().copied().collect();
        for id in ids {
            self.discard(ctx, id);
        }
        self.release_targets(ctx);
        self.overlay_subs.clear();
        self.list_subs.clear();
    }
}

/// Union of the display bounds of every overlay, or `None` for an empty
/// list.
pub fn overlay_bounds(overlays: &OverlayList) -> Option<([f64; 3], [f64; 3])> {
    overlays.snapshot().iter().fold(None, |acc, overlay| {
        let (lo, hi) = overlay.display().display_bounds();
        Some(match acc {
            None => (lo, hi),
            Some((alo, ahi)) => {
                let mut out = (alo, ahi);
                for ax in 0..3 {
                    out.0[ax] = alo[ax].min(lo[ax]);
                    out.1[ax] = ahi[ax].max(hi[ax]);
                }
                out
            }
        })
    })
}

/// Grow `rect` along one axis so it has the aspect ratio of a `width` by
/// `height` viewport, keeping it centred.
pub fn fit_aspect(rect: Rect, width: usize, height: usize) -> Rect {
    if width == 0 || height == 0 || rect.is_empty() {
        return rect;
    }
    let screen = width as f64 / height as f64;
    let (xmid, ymid) = (0.5 * (rect.xlo + rect.xhi), 0.5 * (rect.ylo + rect.yhi));
    let (mut w, mut h) = (rect.width(), rect.height());
    if w / h < screen {
        w = h * screen;
    } else {
        h = w / screen;
    }
    Rect::new(xmid - 0.5 * w, xmid + 0.5 * w, ymid - 0.5 * h, ymid + 0.5 * h)
}

/// Display coordinates of a pixel, measured from the bottom left corner of
/// a `width` by `height` viewport showing `view`.
pub fn pixel_to_display(view: Rect, width: usize, height: usize, px: f64, py: f64) -> Option<(f64, f64)> {
    if width == 0 || height == 0 || view.is_empty() {
        return None;
    }
    Some((
        view.xlo + px / width as f64 * view.width(),
        view.ylo + py / height as f64 * view.height(),
    ))
}

pub fn display_to_pixel(view: Rect, width: usize, height: usize, x: f64, y: f64) -> Option<(f64, f64)> {
    if width == 0 || height == 0 || view.is_empty() {
        return None;
    }
    Some((
        (x - view.xlo) / view.width() * width as f64,
        (y - view.ylo) / view.height() * height as f64,
    ))
}

/// Translation by `dx` along `xax` and `dy` along `yax`.
pub fn screen_translation(xax: usize, yax: usize, dx: f64, dy: f64) -> Matrix4<f64> {
    let mut t = Vector3::zeros();
    t[xax] = dx;
    t[yax] = dy;
    Matrix4::new_translation(&t)
}

/// Fill `view` with a flat colour on the plane `zax = zpos`.
fn fill(gl: &mut dyn GlContext, zax: usize, view: Rect, zpos: f64, colour: [f32; 4]) {
    let (xax, yax) = screen_axes(zax);
    let corner = |x: f64, y: f64| {
        let mut p = [0.0f32; 3];
        p[xax] = x as f32;
        p[yax] = y as f32;
        p[zax] = zpos as f32;
        Vertex::coloured(p, colour)
    };
    let (bl, br) = (corner(view.xlo, view.ylo), corner(view.xhi, view.ylo));
    let (tl, tr) = (corner(view.xlo, view.yhi), corner(view.xhi, view.yhi));
    gl.use_program(None);
    gl.bind_texture(0, None);
    gl.set_blend(BlendMode::Replace);
    gl.draw(Primitive::Triangles, &[bl, br, tr, bl, tr, tl]);
}
