//! Off-screen render targets.

use nalgebra::Matrix4;

use crate::gl::context::{
    axis_view, ortho, BlendMode, Filter, FramebufferId, GlContext, Primitive, TexDims, TexFormat,
    TextureDesc, TextureId, Vertex, Wrap,
};
use crate::gl::resources::GlResource;

/// A display-space rectangle on the two screen axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub xlo: f64,
    pub xhi: f64,
    pub ylo: f64,
    pub yhi: f64,
}

impl Rect {
    pub fn new(xlo: f64, xhi: f64, ylo: f64, yhi: f64) -> Self {
        Self { xlo, xhi, ylo, yhi }
    }

    pub fn width(&self) -> f64 {
        self.xhi - self.xlo
    }

    pub fn height(&self) -> f64 {
        self.yhi - self.ylo
    }

    pub fn is_empty(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
    }
}

/// Device state saved while drawing into a render texture.
pub struct SavedTarget {
    viewport: (i32, i32, usize, usize),
    projection: Matrix4<f64>,
}

/// An RGBA texture with a framebuffer drawing into it, covering `bounds`
/// in display space.
pub struct RenderTexture {
    texture: TextureId,
    framebuffer: FramebufferId,
    size: (usize, usize),
    bounds: Rect,
}

impl RenderTexture {
    pub fn new(gl: &mut dyn GlContext, width: usize, height: usize) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        let texture = gl.create_texture(&TextureDesc {
            dims: TexDims::D2(width, height),
            format: TexFormat::Rgba8,
            filter: Filter::Nearest,
            wrap: Wrap::ClampToEdge,
        });
        let framebuffer = gl.create_framebuffer(texture);
        log::debug!("{framebuffer}: render texture {width}x{height}");
        Self {
            texture,
            framebuffer,
            size: (width, height),
            bounds: Rect::new(0.0, 1.0, 0.0, 1.0),
        }
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    pub fn size(&self) -> (usize, usize) {
        self.size
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn set_bounds(&mut self, bounds: Rect) {
        self.bounds = bounds;
    }

    pub fn resize(&mut self, gl: &mut dyn GlContext, width: usize, height: usize) {
        let size = (width.max(1), height.max(1));
        if size != self.size {
            gl.resize_texture(self.texture, TexDims::D2(size.0, size.1), TexFormat::Rgba8);
            self.size = size;
        }
    }

    /// Redirect drawing into this texture and clear it. The projection maps
    /// `bounds` onto the whole texture.
    pub fn bind_as_target(&self, gl: &mut dyn GlContext) -> SavedTarget {
        let saved = SavedTarget {
            viewport: gl.viewport_rect(),
            projection: gl.projection(),
        };
        gl.bind_framebuffer(Some(self.framebuffer));
        gl.viewport(0, 0, self.size.0, self.size.1);
        let b = self.bounds;
        gl.set_projection(ortho(b.xlo, b.xhi, b.ylo, b.yhi));
        gl.clear([0.0; 4]);
        saved
    }

    /// Go back to the default framebuffer.
    pub fn unbind_as_target(&self, gl: &mut dyn GlContext, saved: SavedTarget) {
        gl.bind_framebuffer(None);
        let (x, y, w, h) = saved.viewport;
        gl.viewport(x, y, w, h);
        gl.set_projection(saved.projection);
    }

    /// Draw the texture as a quad covering its bounds on the plane
    /// `zax = zpos`, with `xform` applied on top of the current modelview.
    pub fn draw(&self, gl: &mut dyn GlContext, zax: usize, zpos: f64, xform: Option<&Matrix4<f64>>) {
        let (xax, yax) = crate::gl::routines::screen_axes(zax);
        let b = self.bounds;
        let corner = |x: f64, y: f64, u: f32, v: f32| {
            let mut p = [0.0f32; 3];
            p[xax] = x as f32;
            p[yax] = y as f32;
            p[zax] = zpos as f32;
            Vertex::textured(p, [u, v, 0.5])
        };
        let quad = [
            corner(b.xlo, b.ylo, 0.0, 0.0),
            corner(b.xhi, b.ylo, 1.0, 0.0),
            corner(b.xhi, b.yhi, 1.0, 1.0),
            corner(b.xlo, b.ylo, 0.0, 0.0),
            corner(b.xhi, b.yhi, 1.0, 1.0),
            corner(b.xlo, b.yhi, 0.0, 1.0),
        ];

        let saved = gl.modelview();
        if let Some(xform) = xform {
            gl.set_modelview(saved * xform);
        }
        gl.use_program(None);
        gl.bind_texture(0, Some(self.texture));
        gl.set_blend(BlendMode::Alpha);
        gl.draw(Primitive::Triangles, &quad);
        gl.bind_texture(0, None);
        gl.set_modelview(saved);
    }
}

/// The modelview a render texture expects when it is drawn looking down
/// `zax`.
pub fn target_view(zax: usize) -> Matrix4<f64> {
    let (xax, yax) = crate::gl::routines::screen_axes(zax);
    axis_view(xax, yax, zax)
}

impl GlResource for RenderTexture {
    fn destroy(&mut self, gl: &mut dyn GlContext) {
        log::debug!("{}: render texture destroyed", self.framebuffer);
        gl.delete_framebuffer(self.framebuffer);
        gl.delete_texture(self.texture);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::software::SoftwareContext;

    #[test]
    fn draw_into_and_composite() {
        let mut gl = SoftwareContext::new(4, 4);
        gl.set_projection(ortho(0.0, 4.0, 0.0, 4.0));
        gl.set_modelview(target_view(2));

        let mut rt = RenderTexture::new(&mut gl, 2, 2);
        rt.set_bounds(Rect::new(0.0, 4.0, 0.0, 4.0));
        let saved = rt.bind_as_target(&mut gl);
        let red = [1.0, 0.0, 0.0, 1.0];
        let v = |x, y| Vertex::coloured([x, y, 0.0], red);
        gl.draw(
            Primitive::Triangles,
            &[v(0.0, 0.0), v(4.0, 0.0), v(4.0, 4.0), v(0.0, 0.0), v(4.0, 4.0), v(0.0, 4.0)],
        );
        rt.unbind_as_target(&mut gl, saved);
        assert_eq!(gl.viewport_rect(), (0, 0, 4, 4));

        rt.draw(&mut gl, 2, 0.0, None);
        assert!(gl.read_pixels().pixels().all(|p| p.0 == [255, 0, 0, 255]));

        rt.destroy(&mut gl);
        assert_eq!(gl.stats().framebuffers, 0);
        assert_eq!(gl.stats().textures, 0);
    }
}
