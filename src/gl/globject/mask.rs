use std::rc::Rc;

use super::{coloured_texture, content_hash, params_hash, scalar_texture, ObjectBase, Renderable, SliceGeometry};
use crate::gl::backend::ImageMode;
use crate::gl::context::{Filter, GlContext};
use crate::gl::resources::CacheSlot;
use crate::gl::shaders::{units, MaskShading, ShaderKind};
use crate::gl::RenderContext;
use crate::volume::Volume;

/// A binary view of a scalar image: voxels inside the threshold range are
/// drawn in one colour.
pub struct GlMask {
    base: ObjectBase,
    volume: Rc<Volume>,
    image: CacheSlot,
    geometry: SliceGeometry,
}

impl GlMask {
    pub(super) fn new(base: ObjectBase, volume: Rc<Volume>) -> Self {
        Self {
            base,
            volume,
            image: CacheSlot::default(),
            geometry: SliceGeometry::default(),
        }
    }

    fn shading(&self) -> MaskShading {
        let opts = &self.base.opts().mask;
        let (lo, hi) = opts.threshold.get();
        let [r, g, b, a] = opts.colour.get();
        MaskShading {
            lo: lo as f32,
            hi: hi as f32,
            invert: opts.invert.get(),
            colour: [r, g, b, a * self.base.alpha()],
        }
    }
}

impl Renderable for GlMask {
    fn base(&self) -> &ObjectBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ObjectBase {
        &mut self.base
    }

    fn shader_kind(&self) -> ShaderKind {
        ShaderKind::Mask
    }

    fn subscribe(&mut self) {
        let overlay = Rc::clone(&self.base.overlay);
        let opts = &overlay.display().mask;
        self.base.watch(&opts.threshold);
        self.base.watch(&opts.invert);
        self.base.watch(&opts.colour);
    }

    fn geometry_changed(&mut self) {
        self.geometry.invalidate();
    }

    fn prepare(&mut self, ctx: &mut RenderContext) -> Option<()> {
        let shading = self.shading();
        let steps = self.base.steps();
        let image = match self.base.renderer.image_mode() {
            ImageMode::Raw => {
                let image = scalar_texture(ctx, &mut self.image, &self.volume, steps, Filter::Nearest)?;
                self.base.set_params(ctx.gl.as_mut(), &shading.params());
                image
            }
            ImageMode::Precoloured => {
                let index = self.volume.current_volume().get();
                let hash = content_hash(&(index, params_hash(&shading.params())));
                let data = self.volume.current_data();
                coloured_texture(
                    ctx,
                    &mut self.image,
                    &self.base,
                    &self.volume,
                    steps,
                    Filter::Nearest,
                    hash,
                    |v| shading.colour(data[v]),
                )?
            }
        };
        self.base.units = vec![(units::DATA, image)];
        Some(())
    }

    fn draw_slice(&mut self, gl: &mut dyn GlContext, zpos: f64) {
        self.geometry.draw(gl, &self.base, self.volume.shape(), zpos);
    }

    fn release(&mut self, ctx: &mut RenderContext) {
        let gl = ctx.gl.as_mut();
        self.image.release(&mut ctx.resources.images, gl);
        self.geometry.clear(gl);
    }
}
