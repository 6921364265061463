use std::rc::Rc;

use super::{coloured_texture, content_hash, params_hash, scalar_texture, ObjectBase, Renderable, SliceGeometry};
use crate::gl::backend::ImageMode;
use crate::gl::context::{Filter, GlContext, TextureId};
use crate::gl::resources::CacheSlot;
use crate::gl::routines::aligned_voxel_axis;
use crate::gl::shaders::{lookup_nearest, units, LabelShading, ShaderKind};
use crate::gl::textures::{lut_hash, LookupTableTexture};
use crate::gl::RenderContext;
use crate::volume::Volume;

/// An integer label image coloured through a lookup table, optionally
/// showing only the outline of each region.
pub struct GlLabel {
    base: ObjectBase,
    volume: Rc<Volume>,
    image: CacheSlot,
    lut: CacheSlot,
    geometry: SliceGeometry,
}

impl GlLabel {
    pub(super) fn new(base: ObjectBase, volume: Rc<Volume>) -> Self {
        Self {
            base,
            volume,
            image: CacheSlot::default(),
            lut: CacheSlot::default(),
            geometry: SliceGeometry::default(),
        }
    }

    /// Hold and refresh the lookup table texture. Falls back to the
    /// `random` table when the named one does not exist.
    fn lookup_table(&mut self, ctx: &mut RenderContext) -> Option<(TextureId, Vec<[f32; 4]>, u64)> {
        let name = self.base.opts().label.lut.get();
        let alpha = self.base.alpha();
        let lut = match ctx.colours.lookup_table(&name) {
            Ok(lut) => lut,
            Err(e) => {
                log::warn!("{e:#}, using random");
                ctx.colours.lookup_table("random").ok()?
            }
        };
        let key = format!("LookupTableTexture_{}", self.base.overlay.id());
        let gl = ctx.gl.as_mut();
        let luts = &mut ctx.resources.luts;
        if !self.lut.hold(luts, gl, key.clone(), LookupTableTexture::new) {
            return None;
        }
        let hash = lut_hash(lut, alpha);
        luts.refresh(gl, &key, hash, |tex, gl| tex.update(gl, lut, alpha));
        let tex = luts.get(gl, &key)?;
        Some((tex.texture(), tex.table().to_vec(), hash))
    }
}

impl Renderable for GlLabel {
    fn base(&self) -> &ObjectBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ObjectBase {
        &mut self.base
    }

    fn shader_kind(&self) -> ShaderKind {
        ShaderKind::Label
    }

    fn subscribe(&mut self) {
        let overlay = Rc::clone(&self.base.overlay);
        let opts = &overlay.display().label;
        self.base.watch(&opts.lut);
        self.base.watch(&opts.outline);
        self.base.watch(&opts.outline_width);
    }

    fn geometry_changed(&mut self) {
        self.geometry.invalidate();
    }

    fn prepare(&mut self, ctx: &mut RenderContext) -> Option<()> {
        let (lut_texture, table, lut_hash) = self.lookup_table(ctx)?;
        let opts = &self.base.opts().label;
        let outline = opts.outline.get() && self.base.renderer.supports_outline();
        let display_to_vox = self.base.display_to_vox();
        let shading = LabelShading {
            lut_size: table.len(),
            outline,
            outline_width: opts.outline_width.get() as f32,
            xax: aligned_voxel_axis(&display_to_vox, self.base.xax),
            yax: aligned_voxel_axis(&display_to_vox, self.base.yax),
            shape: self.volume.shape(),
        };
        let steps = self.base.steps();

        match self.base.renderer.image_mode() {
            ImageMode::Raw => {
                let image = scalar_texture(ctx, &mut self.image, &self.volume, steps, Filter::Nearest)?;
                self.base.set_params(ctx.gl.as_mut(), &shading.params());
                self.base.units = vec![(units::DATA, image), (units::COLOUR_MAP, lut_texture)];
            }
            ImageMode::Precoloured => {
                let index = self.volume.current_volume().get();
                let hash = content_hash(&(index, lut_hash, params_hash(&shading.params())));
                let data = self.volume.current_data();
                let shape = self.volume.shape();
                let label_at = |tc: [f32; 3]| {
                    let mut idx = [0usize; 3];
                    for ax in 0..3 {
                        let i = (tc[ax] * shape[ax] as f32).floor().max(0.0) as usize;
                        idx[ax] = i.min(shape[ax].saturating_sub(1));
                    }
                    data[idx]
                };
                let image = coloured_texture(
                    ctx,
                    &mut self.image,
                    &self.base,
                    &self.volume,
                    steps,
                    Filter::Nearest,
                    hash,
                    |v| {
                        let tc = [0, 1, 2].map(|ax| (v[ax] as f32 + 0.5) / shape[ax] as f32);
                        shading.colour(tc, &label_at, |t| lookup_nearest(&table, t))
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
        self.lut.release(&mut ctx.resources.luts, gl);
        self.geometry.clear(gl);
    }
}
