use ordered_float::OrderedFloat;

use crate::colourmaps::{LookupTable, Rgba};
use crate::gl::content_hash;
use crate::gl::context::{Filter, GlContext, TexData, TexDims, TexFormat, TextureDesc, TextureId, Wrap};
use crate::gl::resources::GlResource;
use crate::gl::shaders::lookup_nearest;

/// Texel `i` holds the colour of label `i`. Missing and disabled labels are
/// transparent.
pub struct LookupTableTexture {
    texture: TextureId,
    table: Vec<Rgba>,
}

pub fn lut_hash(lut: &LookupTable, alpha: f32) -> u64 {
    let labels: Vec<_> = lut
        .labels()
        .map(|l| (l.value, l.colour.map(OrderedFloat), l.enabled))
        .collect();
    content_hash(&(lut.name(), labels, OrderedFloat(alpha)))
}

impl LookupTableTexture {
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
        }
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    /// Number of texels.
    pub fn size(&self) -> usize {
        self.table.len()
    }

    pub fn table(&self) -> &[Rgba] {
        &self.table
    }

    pub fn lookup(&self, t: f32) -> Rgba {
        lookup_nearest(&self.table, t)
    }

    pub fn update(&mut self, gl: &mut dyn GlContext, lut: &LookupTable, alpha: f32) {
        let n = lut.max() as usize + 1;
        let mut table = vec![[0.0f32; 4]; n];
        for label in lut.labels().filter(|l| l.enabled) {
            let [r, g, b] = label.colour;
            table[label.value as usize] = [r, g, b, alpha];
        }
        if n != self.table.len() {
            gl.resize_texture(self.texture, TexDims::D1(n), TexFormat::Rgba8);
        }
        let texels: Vec<u8> = table
            .iter()
            .flat_map(|c| c.map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8))
            .collect();
        gl.upload_texture(self.texture, TexData::U8(&texels));
        self.table = table;
        log::debug!("{}: lookup table {} with {n} entries", self.texture, lut.name());
    }
}

impl GlResource for LookupTableTexture {
    fn destroy(&mut self, gl: &mut dyn GlContext) {
        gl.delete_texture(self.texture);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::software::SoftwareContext;

    #[test]
    fn disabled_labels_are_transparent() {
        let mut gl = SoftwareContext::new(1, 1);
        let mut lut = LookupTable::new("test");
        lut.set(1, "a", [1.0, 0.0, 0.0], true);
        lut.set(3, "b", [0.0, 1.0, 0.0], false);
        let mut tex = LookupTableTexture::new(&mut gl);
        tex.update(&mut gl, &lut, 1.0);
        assert_eq!(tex.size(), 4);
        assert_eq!(tex.lookup(1.5 / 4.0), [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(tex.lookup(3.5 / 4.0)[3], 0.0);
        assert_eq!(tex.lookup(0.5 / 4.0)[3], 0.0);

        let before = lut_hash(&lut, 1.0);
        lut.set_enabled(3, true);
        assert_ne!(before, lut_hash(&lut, 1.0));
    }
}
