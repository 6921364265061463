//! Per-overlay renderables.
//!
//! A [`GlObject`] knows how to draw one overlay, one 2D slice at a time. It
//! has one variant per overlay type; each variant pulls its textures from
//! the shared resource caches in [`GlObject::pre_draw`] and leaves colouring
//! to the [`Renderer`] chosen for the device.
//!
//! Lifecycle: `Uninitialized -> Ready -> Destroyed`. The compositor calls
//! [`GlObject::init`] once a context is current, then for every frame
//! `pre_draw`, one or more `draw`s and `post_draw`, and finally `destroy`.

mod label;
mod linevector;
mod mask;
mod model;
mod rgbvector;
mod volume;

use std::collections::HashMap;
use std::rc::Rc;

use nalgebra::Matrix4;
use ordered_float::OrderedFloat;

use crate::colourmaps::ColourMap;
use crate::display::{to_args, DisplayOptions, Interpolation, OverlayType};
use crate::observable::{DirtyFlag, Observable, Subscriptions};
use crate::overlay::{Overlay, OverlayList};
use crate::transform::{Space, TransformMode};
use crate::volume::Volume;

use super::backend::Renderer;
use super::context::{BufferId, Filter, GlContext, Primitive, ProgramId, TextureId};
use super::resources::CacheSlot;
use super::routines::{clamp_resolution, depth_axis, generate_slice_vertices, subsample_steps};
use super::shaders::{Param, ShaderKind};
use super::textures::{ColourMapSettings, ColourMapTexture, ImageRepr, ImageTexture};
use super::{content_hash, RenderContext};

pub use self::label::GlLabel;
pub use self::linevector::GlLineVector;
pub use self::mask::GlMask;
pub use self::model::GlModel;
pub use self::rgbvector::GlRgbVector;
pub use self::volume::GlVolume;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    Uninitialized,
    Ready,
    Destroyed,
}

/// Slices kept per object before the geometry cache is flushed.
const MAX_CACHED_SLICES: usize = 64;

/// State shared by every variant.
struct ObjectBase {
    overlay: Rc<Overlay>,
    overlays: OverlayList,
    renderer: Rc<dyn Renderer>,
    state: ObjectState,
    xax: usize,
    yax: usize,
    zax: usize,
    program: Option<ProgramId>,
    software_mode: bool,
    resolution: f64,
    /// Raised by options that change slice geometry.
    geometry_dirty: DirtyFlag,
    /// The owning canvas's redraw flag.
    redraw: DirtyFlag,
    subs: Subscriptions,
    /// Textures bound by the last `pre_draw`.
    units: Vec<(usize, TextureId)>,
}

impl ObjectBase {
    fn opts(&self) -> &DisplayOptions {
        self.overlay.display()
    }

    fn watch<T: Clone + PartialEq + 'static>(&mut self, obs: &Observable<T>) {
        self.subs.raise_on(obs, &self.redraw);
    }

    fn watch_geometry<T: Clone + PartialEq + 'static>(&mut self, obs: &Observable<T>) {
        self.subs.raise_on(obs, &self.geometry_dirty);
        self.subs.raise_on(obs, &self.redraw);
    }

    fn vox_to_display(&self) -> Matrix4<f64> {
        self.opts().get_transform(Space::Voxel, Space::Display, None)
    }

    fn display_to_vox(&self) -> Matrix4<f64> {
        self.opts().get_transform(Space::Display, Space::Voxel, None)
    }

    /// Texture and line subsampling for the current resolution.
    fn steps(&self) -> [usize; 3] {
        let opts = self.opts();
        let dims = match opts.transform.get() {
            TransformMode::Id => [1.0; 3],
            TransformMode::Pixdim | TransformMode::Affine => opts.pixdim(),
        };
        subsample_steps(self.resolution, dims)
    }

    fn alpha(&self) -> f32 {
        (self.opts().alpha.get() / 100.0) as f32
    }

    fn set_params(&self, gl: &mut dyn GlContext, params: &[(Param, [f32; 4])]) {
        if let Some(program) = self.program {
            self.renderer.set_params(gl, program, params);
        }
    }

    fn set_matrix(&self, gl: &mut dyn GlContext, param: Param, m: &Matrix4<f64>) {
        if let Some(program) = self.program {
            self.renderer.set_matrix(gl, program, param, &m.cast::<f32>());
        }
    }

    /// A point on the current slice plane, centred on the overlay.
    fn slice_centre(&self, zpos: f64) -> [f64; 3] {
        let (lo, hi) = self.opts().display_bounds();
        let mut centre = [0.0; 3];
        for ax in 0..3 {
            centre[ax] = 0.5 * (lo[ax] + hi[ax]);
        }
        centre[self.zax] = zpos;
        centre
    }
}

fn filter_for(interpolation: Interpolation) -> Filter {
    match interpolation {
        Interpolation::None => Filter::Nearest,
        Interpolation::Linear | Interpolation::Spline => Filter::Linear,
    }
}

/// Hash of shader parameters, for gating CPU colouring.
fn params_hash(params: &[(Param, [f32; 4])]) -> u64 {
    let bits: Vec<_> = params.iter().map(|(p, v)| (*p, v.map(f32::to_bits))).collect();
    content_hash(&bits)
}

/// Vertex buffers of slice quads keyed by slice position. Buffers from an
/// older generation are refilled in place the next time they are drawn.
#[derive(Default)]
struct SliceGeometry {
    slices: HashMap<OrderedFloat<f64>, (BufferId, u64)>,
    generation: u64,
}

impl SliceGeometry {
    fn invalidate(&mut self) {
        self.generation += 1;
    }

    fn clear(&mut self, gl: &mut dyn GlContext) {
        for (_, (buffer, _)) in self.slices.drain() {
            gl.delete_buffer(buffer);
        }
    }

    fn draw(&mut self, gl: &mut dyn GlContext, base: &ObjectBase, shape: [usize; 3], zpos: f64) {
        let key = OrderedFloat(zpos);
        if self.slices.len() >= MAX_CACHED_SLICES && !self.slices.contains_key(&key) {
            self.clear(gl);
        }
        let generate = || {
            generate_slice_vertices(
                shape,
                base.xax,
                base.yax,
                zpos,
                &base.vox_to_display(),
                &base.display_to_vox(),
                base.resolution,
            )
            .to_vertices()
        };
        let buffer = match self.slices.get_mut(&key) {
            Some((buffer, generation)) => {
                if *generation != self.generation {
                    gl.update_buffer(*buffer, &generate());
                    *generation = self.generation;
                }
                *buffer
            }
            None => {
                let buffer = gl.create_buffer(&generate());
                self.slices.insert(key, (buffer, self.generation));
                buffer
            }
        };
        gl.draw_buffer(Primitive::Triangles, buffer);
    }
}

fn image_key(volume: &Volume, repr: ImageRepr, steps: [usize; 3]) -> String {
    let [sx, sy, sz] = steps;
    format!("ImageTexture_{}_{}_{sx}x{sy}x{sz}", volume.id().get(), repr.as_str())
}

/// Hold the raw scalar texture of `volume` and bring it up to date with the
/// current 4D index.
fn scalar_texture(
    ctx: &mut RenderContext,
    slot: &mut CacheSlot,
    volume: &Volume,
    steps: [usize; 3],
    filter: Filter,
) -> Option<TextureId> {
    let key = image_key(volume, ImageRepr::Scalar, steps);
    let gl = ctx.gl.as_mut();
    let images = &mut ctx.resources.images;
    if !slot.hold(images, gl, key.clone(), |gl| ImageTexture::new(gl, ImageRepr::Scalar)) {
        return None;
    }
    let index = volume.current_volume().get();
    images.refresh(gl, &key, content_hash(&index), |tex, gl| {
        tex.upload_scalar(gl, volume.current_data(), steps)
    });
    let tex = images.get(gl, &key)?;
    tex.set_filter(gl, filter);
    Some(tex.texture())
}

/// Hold the three-channel texture of a vector image.
fn vector_texture(
    ctx: &mut RenderContext,
    slot: &mut CacheSlot,
    volume: &Volume,
    steps: [usize; 3],
    filter: Filter,
) -> Option<TextureId> {
    let key = image_key(volume, ImageRepr::Vector, steps);
    let gl = ctx.gl.as_mut();
    let images = &mut ctx.resources.images;
    if !slot.hold(images, gl, key.clone(), |gl| ImageTexture::new(gl, ImageRepr::Vector)) {
        return None;
    }
    images.refresh(gl, &key, 0, |tex, gl| tex.upload_vector(gl, volume.data().view(), steps));
    let tex = images.get(gl, &key)?;
    tex.set_filter(gl, filter);
    Some(tex.texture())
}

/// Hold an overlay's private pre-coloured texture, recolouring it when
/// `hash` changes.
#[allow(clippy::too_many_arguments)]
fn coloured_texture(
    ctx: &mut RenderContext,
    slot: &mut CacheSlot,
    base: &ObjectBase,
    volume: &Volume,
    steps: [usize; 3],
    filter: Filter,
    hash: u64,
    colour: impl Fn([usize; 3]) -> Option<[f32; 4]>,
) -> Option<TextureId> {
    let [sx, sy, sz] = steps;
    let key = format!(
        "ImageTexture_{}_rgba_{}_{sx}x{sy}x{sz}",
        volume.id().get(),
        base.overlay.id()
    );
    let gl = ctx.gl.as_mut();
    let images = &mut ctx.resources.images;
    if !slot.hold(images, gl, key.clone(), |gl| ImageTexture::new(gl, ImageRepr::Rgba)) {
        return None;
    }
    images.refresh(gl, &key, hash, |tex, gl| {
        tex.upload_coloured(gl, volume.shape(), steps, colour)
    });
    let tex = images.get(gl, &key)?;
    tex.set_filter(gl, filter);
    Some(tex.texture())
}

/// A colour map texture as of this frame.
struct CmapState {
    texture: TextureId,
    xform: (f64, f64),
    table: Vec<[f32; 4]>,
    hash: u64,
}

/// Colour map settings of a volume overlay. The negative map shares the
/// display range and never clips.
fn colour_map_settings(ctx: &RenderContext, opts: &DisplayOptions, alpha: f32, negative: bool) -> ColourMapSettings {
    let name = if negative {
        opts.volume.negative_cmap.get()
    } else {
        opts.volume.cmap.get()
    };
    let cmap = match ctx.colours.colour_map(&name) {
        Ok(c) => c.clone(),
        Err(e) => {
            log::warn!("{e:#}, using greyscale");
            ctx.colours
                .colour_map("greyscale")
                .cloned()
                .unwrap_or_else(|_| ColourMap::from_colours("greyscale", &[[0.0; 3], [1.0; 3]]))
        }
    };
    let display_range = opts.volume.display_range.get();
    let (clo, chi) = opts.volume.clipping_range.get();
    let invert_clipping = opts.volume.invert_clipping.get();
    ColourMapSettings {
        cmap,
        invert: opts.volume.invert.get(),
        alpha,
        display_range,
        clip_below: !negative && !invert_clipping && clo > display_range.0,
        clip_above: !negative && !invert_clipping && chi < display_range.1,
        resolution: ctx.config().colour_resolution,
    }
}

fn colour_map(
    ctx: &mut RenderContext,
    slot: &mut CacheSlot,
    key: String,
    settings: &ColourMapSettings,
) -> Option<CmapState> {
    let gl = ctx.gl.as_mut();
    let cmaps = &mut ctx.resources.colour_maps;
    if !slot.hold(cmaps, gl, key.clone(), ColourMapTexture::new) {
        return None;
    }
    let hash = settings.hash();
    cmaps.refresh(gl, &key, hash, |tex, gl| tex.update(gl, settings));
    let tex = cmaps.get(gl, &key)?;
    Some(CmapState {
        texture: tex.texture(),
        xform: tex.coord_xform(),
        table: tex.table().to_vec(),
        hash,
    })
}

/// The variant half of a GL object.
trait Renderable {
    fn base(&self) -> &ObjectBase;

    fn base_mut(&mut self) -> &mut ObjectBase;

    fn shader_kind(&self) -> ShaderKind;

    /// Subscribe to the options this variant reads.
    fn subscribe(&mut self);

    /// Slice geometry is stale.
    fn geometry_changed(&mut self) {}

    /// Bring textures and parameters up to date and fill `units`. `None`
    /// skips this frame.
    fn prepare(&mut self, ctx: &mut RenderContext) -> Option<()>;

    fn draw_slice(&mut self, gl: &mut dyn GlContext, zpos: f64);

    /// Release cached resources.
    fn release(&mut self, ctx: &mut RenderContext);
}

/// One overlay's renderable.
pub enum GlObject {
    Volume(GlVolume),
    Mask(GlMask),
    RgbVector(GlRgbVector),
    LineVector(GlLineVector),
    Label(GlLabel),
    Model(GlModel),
}

impl GlObject {
    /// Create the renderable for the overlay's current type, drawing the
    /// display axes `xax`/`yax`. Raises `redraw` whenever something it
    /// depends on changes.
    ///
    /// # Panics
    ///
    /// If the overlay's data cannot be shown as its type.
    pub fn new(
        overlay: Rc<Overlay>,
        overlays: OverlayList,
        renderer: Rc<dyn Renderer>,
        xax: usize,
        yax: usize,
        redraw: DirtyFlag,
    ) -> Self {
        let overlay_type = overlay.overlay_type();
        let base = ObjectBase {
            overlay: Rc::clone(&overlay),
            overlays,
            renderer,
            state: ObjectState::Uninitialized,
            xax,
            yax,
            zax: depth_axis(xax, yax),
            program: None,
            software_mode: false,
            resolution: 1.0,
            geometry_dirty: DirtyFlag::new(true),
            redraw,
            subs: Subscriptions::new(),
            units: Vec::new(),
        };
        let object = match (overlay_type, overlay.volume(), overlay.mesh()) {
            (OverlayType::Volume, Some(v), _) => GlObject::Volume(GlVolume::new(base, Rc::clone(v))),
            (OverlayType::Mask, Some(v), _) => GlObject::Mask(GlMask::new(base, Rc::clone(v))),
            (OverlayType::RgbVector, Some(v), _) => GlObject::RgbVector(GlRgbVector::new(base, Rc::clone(v))),
            (OverlayType::LineVector, Some(v), _) => {
                GlObject::LineVector(GlLineVector::new(base, Rc::clone(v)))
            }
            (OverlayType::Label, Some(v), _) => GlObject::Label(GlLabel::new(base, Rc::clone(v))),
            (OverlayType::Model, _, Some(m)) => GlObject::Model(GlModel::new(base, Rc::clone(m))),
            (t, ..) => panic!("{} cannot be drawn as {t}", overlay.name()),
        };
        log::debug!("Created {overlay_type} GL object for {}", overlay.name());
        object
    }

    fn inner(&self) -> &dyn Renderable {
        match self {
            GlObject::Volume(o) => o,
            GlObject::Mask(o) => o,
            GlObject::RgbVector(o) => o,
            GlObject::LineVector(o) => o,
            GlObject::Label(o) => o,
            GlObject::Model(o) => o,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Renderable {
        match self {
            GlObject::Volume(o) => o,
            GlObject::Mask(o) => o,
            GlObject::RgbVector(o) => o,
            GlObject::LineVector(o) => o,
            GlObject::Label(o) => o,
            GlObject::Model(o) => o,
        }
    }

    pub fn overlay(&self) -> &Rc<Overlay> {
        &self.inner().base().overlay
    }

    /// The type this object draws, which may lag behind the overlay's type
    /// until the compositor replaces the object.
    pub fn overlay_type(&self) -> OverlayType {
        match self {
            GlObject::Volume(_) => OverlayType::Volume,
            GlObject::Mask(_) => OverlayType::Mask,
            GlObject::RgbVector(_) => OverlayType::RgbVector,
            GlObject::LineVector(_) => OverlayType::LineVector,
            GlObject::Label(_) => OverlayType::Label,
            GlObject::Model(_) => OverlayType::Model,
        }
    }

    pub fn state(&self) -> ObjectState {
        self.inner().base().state
    }

    pub fn ready(&self) -> bool {
        self.state() == ObjectState::Ready
    }

    pub fn axes(&self) -> (usize, usize, usize) {
        let b = self.inner().base();
        (b.xax, b.yax, b.zax)
    }

    pub fn program(&self) -> Option<ProgramId> {
        self.inner().base().program
    }

    pub fn software_mode(&self) -> bool {
        self.inner().base().software_mode
    }

    /// Sampling resolution used by the last `pre_draw`.
    pub fn resolution(&self) -> f64 {
        self.inner().base().resolution
    }

    /// Compile the program and subscribe to option changes. Returns
    /// `false`, leaving the object uninitialised, while no context is
    /// current.
    pub fn init(&mut self, ctx: &mut RenderContext) -> bool {
        assert_eq!(self.state(), ObjectState::Uninitialized, "GL object initialised twice");
        if !ctx.gl.is_current() {
            return false;
        }
        let overlay = Rc::clone(self.overlay());
        let opts = overlay.display();
        let software = ctx.software_mode() || opts.software_mode.get();
        {
            let base = self.inner_mut().base_mut();
            base.software_mode = software;
            base.watch_geometry(&opts.transform);
            base.watch_geometry(&opts.resolution);
            base.watch(&opts.software_mode);
            base.watch(&opts.alpha);
            if let Some(volume) = overlay.volume() {
                base.watch(volume.current_volume());
            }
        }
        let inner = self.inner_mut();
        inner.subscribe();
        let kind = inner.shader_kind();
        let base = inner.base_mut();
        base.program = base.renderer.compile(ctx.gl.as_mut(), kind);
        base.state = ObjectState::Ready;
        log::debug!("{}: GL object ready ({kind:?})", overlay.name());
        true
    }

    /// Change the display axes drawn. Slice geometry is regenerated.
    pub fn set_axes(&mut self, xax: usize, yax: usize) {
        let base = self.inner_mut().base_mut();
        if (base.xax, base.yax) == (xax, yax) {
            return;
        }
        base.xax = xax;
        base.yax = yax;
        base.zax = depth_axis(xax, yax);
        base.geometry_dirty.raise();
        base.redraw.raise();
    }

    /// Bind programs and textures for the draws of this frame. Returns
    /// `false` when nothing can be drawn this frame.
    pub fn pre_draw(&mut self, ctx: &mut RenderContext) -> bool {
        debug_assert!(self.ready(), "pre_draw on a GL object that is not ready");

        let software = ctx.software_mode() || self.overlay().display().software_mode.get();
        if software != self.software_mode() {
            let inner = self.inner_mut();
            inner.base_mut().software_mode = software;
            let kind = inner.shader_kind();
            let base = inner.base_mut();
            if let Some(old) = base.program.take() {
                ctx.gl.delete_program(old);
            }
            base.program = base.renderer.compile(ctx.gl.as_mut(), kind);
            base.geometry_dirty.raise();
            log::debug!(
                "{}: software mode {}, recompiled as {kind:?}",
                base.overlay.name(),
                if software { "on" } else { "off" }
            );
        }

        let limit = ctx.config().resolution_limit;
        let inner = self.inner_mut();
        {
            let base = inner.base_mut();
            let opts = base.opts();
            let resolution = clamp_resolution(opts.resolution.get(), opts.display_voxel_size(), limit);
            if resolution != base.resolution {
                base.resolution = resolution;
                base.geometry_dirty.raise();
            }
        }
        if inner.base().geometry_dirty.take() {
            inner.geometry_changed();
        }

        inner.base_mut().units.clear();
        if inner.prepare(ctx).is_none() {
            return false;
        }
        let base = inner.base();
        base.renderer.bind(ctx.gl.as_mut(), base.program, &base.units);
        true
    }

    /// Draw the slice at `zpos` along the depth axis, with `xform` applied
    /// on top of the current modelview.
    pub fn draw(&mut self, gl: &mut dyn GlContext, zpos: f64, xform: Option<&Matrix4<f64>>) {
        debug_assert!(self.ready(), "draw on a GL object that is not ready");
        let saved = gl.modelview();
        if let Some(xform) = xform {
            gl.set_modelview(saved * xform);
        }
        self.inner_mut().draw_slice(gl, zpos);
        gl.set_modelview(saved);
    }

    /// Draw several slices, each with its own transform.
    pub fn draw_all(&mut self, gl: &mut dyn GlContext, zposes: &[f64], xforms: &[Matrix4<f64>]) {
        debug_assert_eq!(zposes.len(), xforms.len());
        for (zpos, xform) in zposes.iter().zip(xforms) {
            self.draw(gl, *zpos, Some(xform));
        }
    }

    pub fn post_draw(&mut self, gl: &mut dyn GlContext) {
        let base = self.inner().base();
        base.renderer.unbind(gl, &base.units);
    }

    /// Release programs and cached resources and stop listening. Objects
    /// that never became ready just stop listening.
    pub fn destroy(&mut self, ctx: &mut RenderContext) {
        if self.state() == ObjectState::Ready {
            let inner = self.inner_mut();
            inner.release(ctx);
            if let Some(program) = inner.base_mut().program.take() {
                ctx.gl.delete_program(program);
            }
        }
        let base = self.inner_mut().base_mut();
        base.subs.clear();
        base.units.clear();
        base.state = ObjectState::Destroyed;
        log::debug!("{}: GL object destroyed", base.overlay.name());
    }

    /// Bounding box in display space.
    pub fn display_bounds(&self) -> ([f64; 3], [f64; 3]) {
        self.overlay().display().display_bounds()
    }

    /// Size of one sample in display units.
    pub fn sample_size(&self) -> f64 {
        let base = self.inner().base();
        base.resolution.max(base.opts().display_voxel_size())
    }

    /// Hash of everything the drawn pixels depend on. Pre-rendered slices
    /// are rebuilt when it changes.
    pub fn content_hash(&self) -> u64 {
        let base = self.inner().base();
        let overlay = &base.overlay;
        let volume = overlay.volume().map(|v| v.current_volume().get());
        let modulation = base
            .opts()
            .vector
            .modulate
            .get()
            .and_then(|name| base.overlays.find_by_name(&name))
            .and_then(|o| o.volume().map(|v| (v.id().get(), v.current_volume().get())));
        content_hash(&(
            overlay.id(),
            self.overlay_type(),
            to_args(base.opts()),
            volume,
            modulation,
            (base.xax, base.yax),
            base.software_mode,
            OrderedFloat(base.resolution),
        ))
    }
}

#[cfg(test)]
mod tests;
