//! The device interface every renderer talks to.
//!
//! `GlContext` mirrors the small slice of OpenGL the slice renderer needs:
//! 1D/2D/3D textures, programs in one of two dialects, vertex buffers,
//! framebuffer objects and the fixed-function matrix stack. Handles are
//! plain integers owned by whoever created them.

use std::fmt;

use bytemuck::{Pod, Zeroable};
use nalgebra::Matrix4;

use super::shaders::{FragmentStage, ParamBinding, ParamValue, VertexStage};

macro_rules! handle {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

handle!(TextureId);
handle!(ProgramId);
handle!(BufferId);
handle!(FramebufferId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TexFormat {
    /// One float channel.
    R32F,
    /// Three float channels.
    Rgb32F,
    /// Four 8-bit channels, normalised to `[0, 1]` when sampled.
    Rgba8,
}

impl TexFormat {
    pub fn channels(self) -> usize {
        match self {
            TexFormat::R32F => 1,
            TexFormat::Rgb32F => 3,
            TexFormat::Rgba8 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Wrap {
    ClampToEdge,
    ClampToBorder([f32; 4]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TexDims {
    D1(usize),
    D2(usize, usize),
    D3(usize, usize, usize),
}

impl TexDims {
    /// Size along each of three axes, 1 for unused axes.
    pub fn extent(self) -> [usize; 3] {
        match self {
            TexDims::D1(x) => [x, 1, 1],
            TexDims::D2(x, y) => [x, y, 1],
            TexDims::D3(x, y, z) => [x, y, z],
        }
    }

    pub fn texel_count(self) -> usize {
        self.extent().iter().product()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureDesc {
    pub dims: TexDims,
    pub format: TexFormat,
    pub filter: Filter,
    pub wrap: Wrap,
}

/// Texel data for an upload, laid out x-fastest.
#[derive(Debug, Clone, Copy)]
pub enum TexData<'a> {
    F32(&'a [f32]),
    U8(&'a [u8]),
}

impl TexData<'_> {
    pub fn len(&self) -> usize {
        match self {
            TexData::F32(d) => d.len(),
            TexData::U8(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Program dialects. ARB programs address parameters by local index and
/// only accept four-component values; GLSL programs use named uniforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Arb,
    Glsl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Triangles,
    Lines,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    Replace,
    /// Source-over alpha blending.
    Alpha,
}

/// One vertex as fed to the pipeline. Without a program, `colour` is
/// multiplied with the texture bound to unit 0 (if any). Programs may treat
/// `texcoord` and `colour` as generic attributes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub texcoord: [f32; 3],
    pub colour: [f32; 4],
}

impl Vertex {
    pub fn new(position: [f32; 3], texcoord: [f32; 3], colour: [f32; 4]) -> Self {
        Self {
            position,
            texcoord,
            colour,
        }
    }

    pub fn coloured(position: [f32; 3], colour: [f32; 4]) -> Self {
        Self::new(position, [0.0; 3], colour)
    }

    pub fn textured(position: [f32; 3], texcoord: [f32; 3]) -> Self {
        Self::new(position, texcoord, [1.0; 4])
    }
}

/// What the driver reports about itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Capabilities {
    pub version: String,
    pub renderer: String,
    pub extensions: Vec<String>,
    pub max_texture_size: usize,
}

impl Capabilities {
    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|e| e == name)
    }

    /// `(major, minor)` parsed from the leading digits of the version string.
    pub fn version_number(&self) -> Option<(u32, u32)> {
        parse_version(&self.version)
    }
}

pub fn parse_version(version: &str) -> Option<(u32, u32)> {
    let mut parts = version
        .split(|c: char| !c.is_ascii_digit())
        .filter(|p| !p.is_empty());
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    Some((major, minor))
}

/// Live object counts, used to check for leaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceStats {
    pub textures: usize,
    pub programs: usize,
    pub buffers: usize,
    pub framebuffers: usize,
}

pub trait GlContext {
    fn capabilities(&self) -> &Capabilities;

    /// Whether calls can be issued right now. Nothing may be created or
    /// drawn while this is `false`.
    fn is_current(&self) -> bool;

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureId;
    /// Replace the whole content of a texture. `data` must hold exactly
    /// `texel_count * channels` values.
    fn upload_texture(&mut self, texture: TextureId, data: TexData<'_>);
    /// Reallocate with new dimensions or format. Content becomes zero.
    fn resize_texture(&mut self, texture: TextureId, dims: TexDims, format: TexFormat);
    fn set_texture_params(&mut self, texture: TextureId, filter: Filter, wrap: Wrap);
    fn texture_desc(&self, texture: TextureId) -> Option<TextureDesc>;
    fn delete_texture(&mut self, texture: TextureId);
    fn bind_texture(&mut self, unit: usize, texture: Option<TextureId>);

    fn create_program(
        &mut self,
        dialect: Dialect,
        vertex: Box<dyn VertexStage>,
        fragment: Box<dyn FragmentStage>,
    ) -> ProgramId;
    fn use_program(&mut self, program: Option<ProgramId>);
    fn set_param(&mut self, program: ProgramId, binding: ParamBinding, value: ParamValue);
    fn delete_program(&mut self, program: ProgramId);

    fn create_buffer(&mut self, vertices: &[Vertex]) -> BufferId;
    fn update_buffer(&mut self, buffer: BufferId, vertices: &[Vertex]);
    fn delete_buffer(&mut self, buffer: BufferId);

    /// A framebuffer rendering into `colour`, which must be an RGBA8 2D
    /// texture.
    fn create_framebuffer(&mut self, colour: TextureId) -> FramebufferId;
    /// Bind a framebuffer, or the default (window) framebuffer for `None`.
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>);
    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);

    fn viewport(&mut self, x: i32, y: i32, width: usize, height: usize);
    fn viewport_rect(&self) -> (i32, i32, usize, usize);
    fn set_projection(&mut self, m: Matrix4<f64>);
    fn projection(&self) -> Matrix4<f64>;
    fn set_modelview(&mut self, m: Matrix4<f64>);
    fn modelview(&self) -> Matrix4<f64>;
    fn set_blend(&mut self, mode: BlendMode);
    fn set_line_width(&mut self, width: f32);
    /// Clear the whole bound framebuffer.
    fn clear(&mut self, colour: [f32; 4]);

    fn draw(&mut self, primitive: Primitive, vertices: &[Vertex]);
    fn draw_buffer(&mut self, primitive: Primitive, buffer: BufferId);

    /// RGBA8 pixels of the bound framebuffer, top row first.
    fn read_pixels(&self) -> image::RgbaImage;

    fn stats(&self) -> ResourceStats;
}

/// Orthographic projection mapping `lo..hi` on x and y to the viewport.
pub fn ortho(xlo: f64, xhi: f64, ylo: f64, yhi: f64) -> Matrix4<f64> {
    let sx = 2.0 / (xhi - xlo);
    let sy = 2.0 / (yhi - ylo);
    Matrix4::new(
        sx, 0.0, 0.0, -(xhi + xlo) * 0.5 * sx,
        0.0, sy, 0.0, -(yhi + ylo) * 0.5 * sy,
        0.0, 0.0, 1.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
    )
}

/// Modelview that puts display axes `xax` and `yax` on screen x and y.
pub fn axis_view(xax: usize, yax: usize, zax: usize) -> Matrix4<f64> {
    let mut m = Matrix4::zeros();
    m[(0, xax)] = 1.0;
    m[(1, yax)] = 1.0;
    m[(2, zax)] = 1.0;
    m[(3, 3)] = 1.0;
    m
}
