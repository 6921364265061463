use std::rc::Rc;

use super::{
    coloured_texture, content_hash, filter_for, params_hash, scalar_texture, vector_texture, ObjectBase,
    Renderable, SliceGeometry,
};
use crate::gl::backend::ImageMode;
use crate::gl::context::GlContext;
use crate::gl::resources::CacheSlot;
use crate::gl::shaders::{units, ShaderKind, VectorShading};
use crate::gl::RenderContext;
use crate::volume::Volume;

/// The image named by the `modulate` option, if it exists and matches the
/// shape of `volume`.
pub(super) fn modulation_volume(base: &ObjectBase, volume: &Volume) -> Option<Rc<Volume>> {
    let name = base.opts().vector.modulate.get()?;
    let Some(overlay) = base.overlays.find_by_name(&name) else {
        log::debug!("Modulation image {name} is not loaded");
        return None;
    };
    let modulation = overlay.volume()?;
    if modulation.shape() != volume.shape() {
        log::debug!("Modulation image {name} does not match {}", volume.name());
        return None;
    }
    Some(Rc::clone(modulation))
}

pub(super) fn vector_shading(base: &ObjectBase, modulation: Option<&Volume>) -> VectorShading {
    let opts = &base.opts().vector;
    let axis = |colour: [f32; 3], suppress: bool| if suppress { [0.0; 3] } else { colour };
    VectorShading {
        colours: [
            axis(opts.x_colour.get(), opts.suppress_x.get()),
            axis(opts.y_colour.get(), opts.suppress_y.get()),
            axis(opts.z_colour.get(), opts.suppress_z.get()),
        ],
        alpha: base.alpha(),
        modulate: modulation.map(|m| {
            let (lo, hi) = m.data_range();
            (lo as f32, hi as f32)
        }),
        mod_threshold: (opts.mod_threshold.get() / 100.0) as f32,
    }
}

/// Subscribe to the options shared by both vector variants.
pub(super) fn watch_vector_options(base: &mut ObjectBase) {
    let overlay = Rc::clone(&base.overlay);
    let opts = &overlay.display().vector;
    base.watch(&opts.x_colour);
    base.watch(&opts.y_colour);
    base.watch(&opts.z_colour);
    base.watch(&opts.suppress_x);
    base.watch(&opts.suppress_y);
    base.watch(&opts.suppress_z);
    base.watch(&opts.modulate);
    base.watch(&opts.mod_threshold);
}

/// A three-component vector image shown as colour: each axis contributes
/// its colour scaled by the magnitude of that component.
pub struct GlRgbVector {
    base: ObjectBase,
    volume: Rc<Volume>,
    image: CacheSlot,
    modulation: CacheSlot,
    geometry: SliceGeometry,
}

impl GlRgbVector {
    pub(super) fn new(base: ObjectBase, volume: Rc<Volume>) -> Self {
        Self {
            base,
            volume,
            image: CacheSlot::default(),
            modulation: CacheSlot::default(),
            geometry: SliceGeometry::default(),
        }
    }
}

impl Renderable for GlRgbVector {
    fn base(&self) -> &ObjectBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ObjectBase {
        &mut self.base
    }

    fn shader_kind(&self) -> ShaderKind {
        ShaderKind::RgbVector
    }

    fn subscribe(&mut self) {
        watch_vector_options(&mut self.base);
        let overlay = Rc::clone(&self.base.overlay);
        self.base.watch(&overlay.display().volume.interpolation);
    }

    fn geometry_changed(&mut self) {
        self.geometry.invalidate();
    }

    fn prepare(&mut self, ctx: &mut RenderContext) -> Option<()> {
        let modulation = modulation_volume(&self.base, &self.volume);
        let shading = vector_shading(&self.base, modulation.as_deref());
        let steps = self.base.steps();
        let filter = filter_for(self.base.opts().volume.interpolation.get());

        match self.base.renderer.image_mode() {
            ImageMode::Raw => {
                let image = vector_texture(ctx, &mut self.image, &self.volume, steps, filter)?;
                self.base.units = vec![(units::DATA, image)];
                match &modulation {
                    Some(m) => {
                        let texture = scalar_texture(ctx, &mut self.modulation, m, steps, filter)?;
                        self.base.units.push((units::MODULATION, texture));
                    }
                    None => self.modulation.release(&mut ctx.resources.images, ctx.gl.as_mut()),
                }
                self.base.set_params(ctx.gl.as_mut(), &shading.params());
            }
            ImageMode::Precoloured => {
                let modulation_state = modulation
                    .as_ref()
                    .map(|m| (m.id().get(), m.current_volume().get()));
                let hash = content_hash(&(modulation_state, params_hash(&shading.params())));
                let modulation_data = modulation.as_ref().map(|m| m.current_data());
                let volume = &self.volume;
                let image = coloured_texture(
                    ctx,
                    &mut self.image,
                    &self.base,
                    volume,
                    steps,
                    filter,
                    hash,
                    |v| shading.colour(volume.vector_at(v), modulation_data.as_ref().map(|m| m[v])),
                )?;
                self.base.units = vec![(units::DATA, image)];
            }
        }
        Some(())
    }

    fn draw_slice(&mut self, gl: &mut dyn GlContext, zpos: f64) {
        self.geometry.draw(gl, &self.base, self.volume.shape(), zpos);
    }

    fn release(&mut self, ctx: &mut RenderContext) {
        let gl = ctx.gl.as_mut();
        self.image.release(&mut ctx.resources.images, gl);
        self.modulation.release(&mut ctx.resources.images, gl);
        self.geometry.clear(gl);
    }
}
