use std::rc::Rc;

use super::{
    coloured_texture, colour_map, colour_map_settings, content_hash, filter_for, params_hash,
    scalar_texture, ObjectBase, Renderable, SliceGeometry,
};
use crate::gl::backend::ImageMode;
use crate::gl::context::GlContext;
use crate::gl::resources::CacheSlot;
use crate::gl::shaders::{lookup_nearest, units, ShaderKind, VolumeShading};
use crate::gl::RenderContext;
use crate::volume::Volume;

/// A scalar image coloured through a colour map, with an optional second
/// map for negative values.
pub struct GlVolume {
    base: ObjectBase,
    volume: Rc<Volume>,
    image: CacheSlot,
    cmap: CacheSlot,
    negative_cmap: CacheSlot,
    geometry: SliceGeometry,
}

impl GlVolume {
    pub(super) fn new(base: ObjectBase, volume: Rc<Volume>) -> Self {
        Self {
            base,
            volume,
            image: CacheSlot::default(),
            cmap: CacheSlot::default(),
            negative_cmap: CacheSlot::default(),
            geometry: SliceGeometry::default(),
        }
    }

    fn shading(&self, xform: (f64, f64)) -> VolumeShading {
        let opts = &self.base.opts().volume;
        let (clip_lo, clip_hi) = opts.clipping_range.get();
        VolumeShading {
            clip_lo: clip_lo as f32,
            clip_hi: clip_hi as f32,
            invert_clip: opts.invert_clipping.get(),
            scale: xform.0 as f32,
            offset: xform.1 as f32,
            use_negative: opts.use_negative_cmap.get(),
        }
    }
}

impl Renderable for GlVolume {
    fn base(&self) -> &ObjectBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ObjectBase {
        &mut self.base
    }

    fn shader_kind(&self) -> ShaderKind {
        ShaderKind::Volume
    }

    fn subscribe(&mut self) {
        let overlay = Rc::clone(&self.base.overlay);
        let opts = &overlay.display().volume;
        self.base.watch(&opts.display_range);
        self.base.watch(&opts.clipping_range);
        self.base.watch(&opts.invert_clipping);
        self.base.watch(&opts.cmap);
        self.base.watch(&opts.negative_cmap);
        self.base.watch(&opts.use_negative_cmap);
        self.base.watch(&opts.interpolation);
        self.base.watch(&opts.invert);
    }

    fn geometry_changed(&mut self) {
        self.geometry.invalidate();
    }

    fn prepare(&mut self, ctx: &mut RenderContext) -> Option<()> {
        let id = self.base.overlay.id();
        let alpha = self.base.alpha();
        let settings = colour_map_settings(ctx, self.base.opts(), alpha, false);
        let negative = colour_map_settings(ctx, self.base.opts(), alpha, true);
        let pos = colour_map(ctx, &mut self.cmap, format!("ColourMapTexture_{id}"), &settings)?;
        let neg = colour_map(ctx, &mut self.negative_cmap, format!("ColourMapTexture_{id}_neg"), &negative)?;

        let shading = self.shading(pos.xform);
        let steps = self.base.steps();
        let filter = filter_for(self.base.opts().volume.interpolation.get());

        match self.base.renderer.image_mode() {
            ImageMode::Raw => {
                let image = scalar_texture(ctx, &mut self.image, &self.volume, steps, filter)?;
                self.base.set_params(ctx.gl.as_mut(), &shading.params());
                self.base.units = vec![
                    (units::DATA, image),
                    (units::COLOUR_MAP, pos.texture),
                    (units::NEGATIVE_COLOUR_MAP, neg.texture),
                ];
            }
            ImageMode::Precoloured => {
                let index = self.volume.current_volume().get();
                let hash = content_hash(&(index, pos.hash, neg.hash, params_hash(&shading.params())));
                let data = self.volume.current_data();
                let image = coloured_texture(
                    ctx,
                    &mut self.image,
                    &self.base,
                    &self.volume,
                    steps,
                    filter,
                    hash,
                    |v| {
                        shading.colour(
                            data[v],
                            |t| lookup_nearest(&pos.table, t),
                            |t| lookup_nearest(&neg.table, t),
                        )
                    },
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
        self.cmap.release(&mut ctx.resources.colour_maps, gl);
        self.negative_cmap.release(&mut ctx.resources.colour_maps, gl);
        self.geometry.clear(gl);
    }
}
