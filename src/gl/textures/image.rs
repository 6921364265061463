//! 3D textures holding image data.
//!
//! Shader backends sample raw values (one float channel for scalar images,
//! three for vector images). The fixed-function backend cannot run per-pixel
//! colour maths, so it gets an RGBA8 texture that was coloured on the CPU.

use ndarray::{s, ArrayView3, ArrayView4};

use crate::colourmaps::Rgba;
use crate::gl::context::{Filter, GlContext, TexData, TexDims, TexFormat, TextureDesc, TextureId, Wrap};
use crate::gl::resources::GlResource;

/// How an image is stored on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageRepr {
    Scalar,
    Vector,
    /// Pre-coloured texels, private to one overlay.
    Rgba,
}

impl ImageRepr {
    fn format(self) -> TexFormat {
        match self {
            ImageRepr::Scalar => TexFormat::R32F,
            ImageRepr::Vector => TexFormat::Rgb32F,
            ImageRepr::Rgba => TexFormat::Rgba8,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImageRepr::Scalar => "scalar",
            ImageRepr::Vector => "vector",
            ImageRepr::Rgba => "rgba",
        }
    }
}

pub struct ImageTexture {
    texture: TextureId,
    repr: ImageRepr,
    dims: [usize; 3],
}

impl ImageTexture {
    pub fn new(gl: &mut dyn GlContext, repr: ImageRepr) -> Self {
        let texture = gl.create_texture(&TextureDesc {
            dims: TexDims::D3(1, 1, 1),
            format: repr.format(),
            filter: Filter::Nearest,
            wrap: Wrap::ClampToEdge,
        });
        Self {
            texture,
            repr,
            dims: [1, 1, 1],
        }
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    pub fn repr(&self) -> ImageRepr {
        self.repr
    }

    /// Size of the texture, after subsampling.
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn set_filter(&self, gl: &mut dyn GlContext, filter: Filter) {
        gl.set_texture_params(self.texture, filter, Wrap::ClampToEdge);
    }

    fn reshape(&mut self, gl: &mut dyn GlContext, dims: [usize; 3]) {
        if dims != self.dims {
            let [x, y, z] = dims;
            gl.resize_texture(self.texture, TexDims::D3(x, y, z), self.repr.format());
            self.dims = dims;
        }
    }

    /// Upload every `steps`-th voxel of a scalar volume.
    pub fn upload_scalar(&mut self, gl: &mut dyn GlContext, data: ArrayView3<'_, f32>, steps: [usize; 3]) {
        debug_assert_eq!(self.repr, ImageRepr::Scalar);
        let [sx, sy, sz] = steps.map(|s| s.max(1) as isize);
        let sampled = data.slice(s![..;sx, ..;sy, ..;sz]);
        let dims = [sampled.shape()[0], sampled.shape()[1], sampled.shape()[2]];
        let texels: Vec<f32> = sampled.reversed_axes().iter().copied().collect();
        self.reshape(gl, dims);
        gl.upload_texture(self.texture, TexData::F32(&texels));
        log::debug!("{}: uploaded {dims:?} scalar texels", self.texture);
    }

    /// Upload every `steps`-th voxel of an `(x, y, z, 3)` vector image.
    pub fn upload_vector(&mut self, gl: &mut dyn GlContext, data: ArrayView4<'_, f32>, steps: [usize; 3]) {
        debug_assert_eq!(self.repr, ImageRepr::Vector);
        let [sx, sy, sz] = steps.map(|s| s.max(1) as isize);
        let sampled = data.slice(s![..;sx, ..;sy, ..;sz, 0..3]);
        let dims = [sampled.shape()[0], sampled.shape()[1], sampled.shape()[2]];
        let texels: Vec<f32> = sampled.permuted_axes([2, 1, 0, 3]).iter().copied().collect();
        self.reshape(gl, dims);
        gl.upload_texture(self.texture, TexData::F32(&texels));
        log::debug!("{}: uploaded {dims:?} vector texels", self.texture);
    }

    /// Colour every `steps`-th voxel on the CPU. `colour` gets the voxel
    /// index and returns `None` for transparent texels.
    pub fn upload_coloured(
        &mut self,
        gl: &mut dyn GlContext,
        shape: [usize; 3],
        steps: [usize; 3],
        colour: impl Fn([usize; 3]) -> Option<Rgba>,
    ) {
        debug_assert_eq!(self.repr, ImageRepr::Rgba);
        let dims = [0, 1, 2].map(|ax| shape[ax].div_ceil(steps[ax].max(1)));
        let mut texels = Vec::with_capacity(dims.iter().product::<usize>() * 4);
        for k in 0..dims[2] {
            for j in 0..dims[1] {
                for i in 0..dims[0] {
                    let voxel = [i * steps[0], j * steps[1], k * steps[2]];
                    let rgba = colour(voxel).unwrap_or([0.0; 4]);
                    texels.extend(rgba.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8));
                }
            }
        }
        self.reshape(gl, dims);
        gl.upload_texture(self.texture, TexData::U8(&texels));
        log::debug!("{}: uploaded {dims:?} pre-coloured texels", self.texture);
    }
}

impl GlResource for ImageTexture {
    fn destroy(&mut self, gl: &mut dyn GlContext) {
        gl.delete_texture(self.texture);
    }
}
