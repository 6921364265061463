//! 1D colour map textures and the value to texture coordinate transform.

use ordered_float::OrderedFloat;

use crate::colourmaps::{ColourMap, Rgba};
use crate::gl::content_hash;
use crate::gl::context::{Filter, GlContext, TexData, TexDims, TexFormat, TextureDesc, TextureId, Wrap};
use crate::gl::resources::GlResource;
use crate::gl::shaders::lookup_nearest;

/// Scale and offset taking `lo` to 0 and `hi` to 1. Values outside the range
/// map outside `[0, 1]`; clamping is left to texture sampling. An empty
/// range is treated as a tiny one.
pub fn display_range_xform(lo: f64, hi: f64) -> (f64, f64) {
    let span = if hi == lo { 1e-12 } else { hi - lo };
    let scale = 1.0 / span;
    (scale, -lo * scale)
}

/// Everything the content of a colour map texture depends on.
#[derive(Debug, Clone, PartialEq)]
pub struct ColourMapSettings {
    pub cmap: ColourMap,
    pub invert: bool,
    /// `[0, 1]`.
    pub alpha: f32,
    pub display_range: (f64, f64),
    /// Make the first texel transparent.
    pub clip_below: bool,
    /// Make the last texel transparent.
    pub clip_above: bool,
    pub resolution: usize,
}

impl ColourMapSettings {
    pub fn hash(&self) -> u64 {
        content_hash(&(
            self.cmap.name(),
            self.invert,
            OrderedFloat(self.alpha),
            OrderedFloat(self.display_range.0),
            OrderedFloat(self.display_range.1),
            self.clip_below,
            self.clip_above,
            self.resolution,
        ))
    }

    pub fn table(&self) -> Vec<Rgba> {
        let n = self.resolution.max(2);
        let mut table: Vec<Rgba> = self
            .cmap
            .samples(n, self.invert)
            .into_iter()
            .map(|[r, g, b]| [r, g, b, self.alpha])
            .collect();
        if self.clip_below {
            table[0][3] = 0.0;
        }
        if self.clip_above {
            table[n - 1][3] = 0.0;
        }
        table
    }
}

pub struct ColourMapTexture {
    texture: TextureId,
    table: Vec<Rgba>,
    xform: (f64, f64),
}

impl ColourMapTexture {
    pub fn new(gl: &mut dyn GlContext) -> Self {
        let texture = gl.create_texture(&TextureDesc {
            dims: TexDims::D1(1),
            format: TexFormat::Rgba8,
            filter: Filter::Nearest,
            wrap: Wrap::ClampToEdge,
        });
        Self {
            texture,
            table: vec![[0.0; 4]],
            xform: (1.0, 0.0),
        }
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    /// Voxel value to texture coordinate, as `(scale, offset)`.
    pub fn coord_xform(&self) -> (f64, f64) {
        self.xform
    }

    /// Colour for a texture coordinate, as the device would sample it.
    pub fn table(&self) -> &[Rgba] {
        &self.table
    }

    pub fn lookup(&self, t: f32) -> Rgba {
        lookup_nearest(&self.table, t)
    }

    pub fn update(&mut self, gl: &mut dyn GlContext, settings: &ColourMapSettings) {
        let table = settings.table();
        if table.len() != self.table.len() {
            gl.resize_texture(self.texture, TexDims::D1(table.len()), TexFormat::Rgba8);
        }
        let texels: Vec<u8> = table
            .iter()
            .flat_map(|c| c.map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8))
            .collect();
        gl.upload_texture(self.texture, TexData::U8(&texels));
        self.table = table;
        let (lo, hi) = settings.display_range;
        self.xform = display_range_xform(lo, hi);
        log::debug!(
            "{}: colour map {} over {:?}",
            self.texture,
            settings.cmap.name(),
            settings.display_range
        );
    }
}

impl GlResource for ColourMapTexture {
    fn destroy(&mut self, gl: &mut dyn GlContext) {
        gl.delete_texture(self.texture);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::colourmaps::ColourMapRegistry;
    use crate::gl::software::SoftwareContext;

    fn settings() -> ColourMapSettings {
        ColourMapSettings {
            cmap: ColourMapRegistry::builtin().colour_map("greyscale").unwrap().clone(),
            invert: false,
            alpha: 1.0,
            display_range: (0.0, 100.0),
            clip_below: false,
            clip_above: false,
            resolution: 256,
        }
    }

    #[test]
    fn empty_range_does_not_divide_by_zero() {
        let (scale, offset) = display_range_xform(5.0, 5.0);
        assert!(scale.is_finite() && offset.is_finite());
        assert!(6.0 * scale + offset > 1.0);
    }

    #[test]
    fn clipped_edges_are_transparent() {
        let mut s = settings();
        s.clip_below = true;
        let table = s.table();
        assert_eq!(table[0][3], 0.0);
        assert_eq!(table[255][3], 1.0);
    }

    #[test]
    fn update_uploads_table_and_xform() {
        let mut gl = SoftwareContext::new(1, 1);
        let mut tex = ColourMapTexture::new(&mut gl);
        let mut s = settings();
        s.invert = true;
        tex.update(&mut gl, &s);
        assert_eq!(gl.texture_desc(tex.texture()).unwrap().dims, TexDims::D1(256));
        assert_eq!(tex.lookup(0.0), [1.0, 1.0, 1.0, 1.0]);
        assert_eq!(tex.coord_xform(), (0.01, 0.0));
        assert_ne!(s.hash(), settings().hash());
    }
}
