//! Pre-rendered slices of one overlay along one depth axis.

use nalgebra::Matrix4;

use super::render_texture::{target_view, Rect, RenderTexture};
use crate::gl::context::GlContext;
use crate::gl::globject::GlObject;
use crate::gl::resources::GlResource;
use crate::gl::routines::screen_axes;

/// A stack of render textures, one per slice position, filled lazily and
/// kept until the object's content changes.
pub struct RenderTextureStack {
    zax: usize,
    max_slices: usize,
    max_size: usize,
    slices: Vec<Option<RenderTexture>>,
    dirty: Vec<bool>,
    zrange: (f64, f64),
    bounds: Rect,
    size: (usize, usize),
    content: Option<u64>,
    renders: usize,
}

impl RenderTextureStack {
    pub fn new(zax: usize, max_slices: usize, max_size: usize) -> Self {
        Self {
            zax,
            max_slices: max_slices.max(1),
            max_size: max_size.max(1),
            slices: Vec::new(),
            dirty: Vec::new(),
            zrange: (0.0, 0.0),
            bounds: Rect::new(0.0, 1.0, 0.0, 1.0),
            size: (1, 1),
            content: None,
            renders: 0,
        }
    }

    pub fn zax(&self) -> usize {
        self.zax
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// Slices rendered since the stack was created.
    pub fn render_count(&self) -> usize {
        self.renders
    }

    /// Lay the stack out over the object's display bounds, one slice per
    /// sample along the depth axis up to the slice limit. Every slice is
    /// marked dirty when the layout or the object's content changes.
    pub fn configure(&mut self, gl: &mut dyn GlContext, object: &GlObject) {
        let (lo, hi) = object.display_bounds();
        let sample = object.sample_size().max(f64::EPSILON);
        let (xax, yax) = screen_axes(self.zax);
        let zax = self.zax;

        let extent = hi[zax] - lo[zax];
        let count = ((extent / sample).ceil() as usize).clamp(1, self.max_slices);
        let pixels = |len: f64| ((len / sample).ceil() as usize).clamp(1, self.max_size);
        let size = (pixels(hi[xax] - lo[xax]), pixels(hi[yax] - lo[yax]));
        let bounds = Rect::new(lo[xax], hi[xax], lo[yax], hi[yax]);
        let zrange = (lo[zax], hi[zax]);

        if count != self.slices.len() || size != self.size || bounds != self.bounds || zrange != self.zrange {
            self.destroy(gl);
            self.slices = (0..count).map(|_| None).collect();
            self.dirty = vec![true; count];
            self.size = size;
            self.bounds = bounds;
            self.zrange = zrange;
            log::debug!("Render texture stack on axis {zax}: {count} slices of {}x{}", size.0, size.1);
        }

        let content = object.content_hash();
        if self.content != Some(content) {
            self.dirty.iter_mut().for_each(|d| *d = true);
            self.content = Some(content);
        }
    }

    /// Slice holding `zpos`, or `None` outside the stack.
    pub fn index_of(&self, zpos: f64) -> Option<usize> {
        let n = self.slices.len();
        let (lo, hi) = self.zrange;
        if n == 0 || zpos < lo || zpos > hi {
            return None;
        }
        if hi <= lo {
            return Some(0);
        }
        let i = ((zpos - lo) / (hi - lo) * n as f64).floor() as usize;
        Some(i.min(n - 1))
    }

    /// Centre of slice `index` along the depth axis.
    pub fn zpos_of(&self, index: usize) -> f64 {
        let n = self.slices.len().max(1) as f64;
        let (lo, hi) = self.zrange;
        lo + (index as f64 + 0.5) * (hi - lo) / n
    }

    /// Render the dirty slices among `zposes`. The object must have been
    /// prepared with `pre_draw`. Returns the number of slices rendered.
    pub fn refresh(&mut self, gl: &mut dyn GlContext, object: &mut GlObject, zposes: &[f64]) -> usize {
        let mut rendered = 0;
        for &zpos in zposes {
            let Some(index) = self.index_of(zpos) else {
                continue;
            };
            if !self.dirty[index] && self.slices[index].is_some() {
                continue;
            }
            let slice_z = self.zpos_of(index);
            let (width, height) = self.size;
            let bounds = self.bounds;
            let texture = self.slices[index].get_or_insert_with(|| RenderTexture::new(gl, width, height));
            texture.set_bounds(bounds);

            let saved = texture.bind_as_target(gl);
            let modelview = gl.modelview();
            gl.set_modelview(target_view(self.zax));
            object.draw(gl, slice_z, None);
            gl.set_modelview(modelview);
            texture.unbind_as_target(gl, saved);

            self.dirty[index] = false;
            self.renders += 1;
            rendered += 1;
        }
        rendered
    }

    /// Draw the slice holding `zpos` at `zpos`. Returns `false` when that
    /// slice has not been rendered.
    pub fn draw(&self, gl: &mut dyn GlContext, zpos: f64, xform: Option<&Matrix4<f64>>) -> bool {
        let Some(texture) = self.index_of(zpos).and_then(|i| self.slices[i].as_ref()) else {
            return false;
        };
        texture.draw(gl, self.zax, zpos, xform);
        true
    }
}

impl GlResource for RenderTextureStack {
    fn destroy(&mut self, gl: &mut dyn GlContext) {
        for mut texture in self.slices.iter_mut().filter_map(Option::take) {
            texture.destroy(gl);
        }
        self.dirty.iter_mut().for_each(|d| *d = true);
    }
}
