//! A CPU reference implementation of [`GlContext`].
//!
//! Textures are stored as `f32` texels, triangles are rasterised with edge
//! functions and a top-left fill rule, lines are stepped one pixel at a time
//! and widened to a square brush. The default framebuffer is just another
//! RGBA texture of the surface size.

use std::collections::HashMap;

use nalgebra::{Matrix4, Vector4};

use super::context::{
    BlendMode, BufferId, Capabilities, Dialect, Filter, FramebufferId, GlContext, Primitive,
    ProgramId, ResourceStats, TexData, TexDims, TexFormat, TextureDesc, TextureId, Vertex, Wrap,
};
use super::shaders::{FragmentStage, Param, ParamBinding, ParamValue, ShaderInputs, VertexStage};

const MAX_UNITS: usize = 8;

struct Texture {
    desc: TextureDesc,
    data: Vec<f32>,
}

impl Texture {
    fn zeroed(desc: TextureDesc) -> Self {
        let len = desc.dims.texel_count() * desc.format.channels();
        Self {
            desc,
            data: vec![0.0; len],
        }
    }

    fn surface(width: usize, height: usize) -> Self {
        Self::zeroed(TextureDesc {
            dims: TexDims::D2(width, height),
            format: TexFormat::Rgba8,
            filter: Filter::Nearest,
            wrap: Wrap::ClampToEdge,
        })
    }

    fn size2d(&self) -> (usize, usize) {
        let [w, h, _] = self.desc.dims.extent();
        (w, h)
    }

    fn texel(&self, idx: [usize; 3]) -> [f32; 4] {
        let [nx, ny, _] = self.desc.dims.extent();
        let c = self.desc.format.channels();
        let off = ((idx[2] * ny + idx[1]) * nx + idx[0]) * c;
        let d = &self.data[off..off + c];
        match c {
            1 => [d[0], 0.0, 0.0, 1.0],
            3 => [d[0], d[1], d[2], 1.0],
            _ => [d[0], d[1], d[2], d[3]],
        }
    }

    fn used_axes(&self) -> usize {
        match self.desc.dims {
            TexDims::D1(_) => 1,
            TexDims::D2(..) => 2,
            TexDims::D3(..) => 3,
        }
    }

    fn sample(&self, coord: [f32; 3]) -> [f32; 4] {
        let extent = self.desc.dims.extent();
        let axes = self.used_axes();
        if let Wrap::ClampToBorder(border) = self.desc.wrap {
            if coord[..axes].iter().any(|c| !(0.0..=1.0).contains(c)) {
                return border;
            }
        }
        if coord[..axes].iter().any(|c| c.is_nan()) {
            return [0.0; 4];
        }

        match self.desc.filter {
            Filter::Nearest => {
                let mut idx = [0usize; 3];
                for ax in 0..axes {
                    let n = extent[ax];
                    let i = (coord[ax] * n as f32).floor();
                    idx[ax] = (i.max(0.0) as usize).min(n - 1);
                }
                self.texel(idx)
            }
            Filter::Linear => {
                let mut lo = [0usize; 3];
                let mut hi = [0usize; 3];
                let mut frac = [0.0f32; 3];
                for ax in 0..axes {
                    let n = extent[ax];
                    let u = coord[ax] * n as f32 - 0.5;
                    let f = u.floor();
                    frac[ax] = u - f;
                    let clamp = |v: f32| (v.max(0.0) as usize).min(n - 1);
                    lo[ax] = clamp(f);
                    hi[ax] = clamp(f + 1.0);
                }
                let mut out = [0.0f32; 4];
                for corner in 0..8usize {
                    let mut weight = 1.0;
                    let mut idx = [0usize; 3];
                    for ax in 0..3 {
                        let upper = corner & (1 << ax) != 0;
                        idx[ax] = if upper { hi[ax] } else { lo[ax] };
                        weight *= if upper { frac[ax] } else { 1.0 - frac[ax] };
                    }
                    if weight == 0.0 {
                        continue;
                    }
                    let t = self.texel(idx);
                    for ch in 0..4 {
                        out[ch] += weight * t[ch];
                    }
                }
                out
            }
        }
    }

    /// Write one pixel of a 2D RGBA target.
    fn blend_pixel(&mut self, x: usize, y: usize, src: [f32; 4], mode: BlendMode) {
        let (w, _) = self.size2d();
        let off = (y * w + x) * 4;
        let dst = &mut self.data[off..off + 4];
        match mode {
            BlendMode::Replace => dst.copy_from_slice(&src),
            BlendMode::Alpha => {
                let sa = src[3].clamp(0.0, 1.0);
                for ch in 0..3 {
                    dst[ch] = src[ch] * sa + dst[ch] * (1.0 - sa);
                }
                dst[3] = sa + dst[3] * (1.0 - sa);
            }
        }
    }
}

struct Program {
    dialect: Dialect,
    vertex: Box<dyn VertexStage>,
    fragment: Box<dyn FragmentStage>,
    params: HashMap<ParamBinding, ParamValue>,
}

/// Parameter and texture access for the stages of the active program.
struct Inputs<'a> {
    program: Option<&'a Program>,
    textures: &'a HashMap<TextureId, Texture>,
    units: &'a [Option<TextureId>; MAX_UNITS],
}

impl ShaderInputs for Inputs<'_> {
    fn param(&self, p: Param) -> [f32; 4] {
        self.program
            .and_then(|prog| prog.params.get(&p.binding(prog.dialect)))
            .map(|v| v.as_vec4())
            .unwrap_or([0.0; 4])
    }

    fn matrix(&self, p: Param) -> Matrix4<f32> {
        let Some(prog) = self.program else {
            return Matrix4::identity();
        };
        match prog.dialect {
            Dialect::Glsl => match prog.params.get(&p.binding(Dialect::Glsl)) {
                Some(ParamValue::Mat4(m)) => *m,
                _ => Matrix4::identity(),
            },
            Dialect::Arb => {
                let mut m = Matrix4::identity();
                for row in 0..4 {
                    if let Some(v) = prog.params.get(&ParamBinding::Local(p.local() + row)) {
                        let v = v.as_vec4();
                        for col in 0..4 {
                            m[(row, col)] = v[col];
                        }
                    }
                }
                m
            }
        }
    }

    fn sample(&self, unit: usize, coord: [f32; 3]) -> [f32; 4] {
        self.units
            .get(unit)
            .copied()
            .flatten()
            .and_then(|id| self.textures.get(&id))
            .map(|t| t.sample(coord))
            .unwrap_or([0.0, 0.0, 0.0, 1.0])
    }
}

/// A vertex after the vertex stage, in window coordinates.
#[derive(Clone, Copy)]
struct WinVertex {
    x: f32,
    y: f32,
    texcoord: [f32; 3],
    colour: [f32; 4],
}

struct Raster<'a> {
    inputs: Inputs<'a>,
    mvp: Matrix4<f64>,
    viewport: (i32, i32, usize, usize),
    blend: BlendMode,
    line_width: f32,
}

impl Raster<'_> {
    fn to_window(&self, v: &Vertex) -> WinVertex {
        let v = match self.inputs.program {
            Some(p) => p.vertex.process(v, &self.inputs),
            None => *v,
        };
        let [x, y, z] = v.position.map(f64::from);
        let clip = self.mvp * Vector4::new(x, y, z, 1.0);
        let w = if clip[3] != 0.0 { clip[3] } else { 1.0 };
        let (vx, vy, vw, vh) = self.viewport;
        WinVertex {
            x: (vx as f64 + (clip[0] / w + 1.0) * 0.5 * vw as f64) as f32,
            y: (vy as f64 + (clip[1] / w + 1.0) * 0.5 * vh as f64) as f32,
            texcoord: v.texcoord,
            colour: v.colour,
        }
    }

    fn fragment(&self, texcoord: [f32; 3], colour: [f32; 4]) -> Option<[f32; 4]> {
        match self.inputs.program {
            Some(p) => p.fragment.shade(texcoord, colour, &self.inputs),
            None => {
                let bound = self.inputs.units[0].is_some();
                let mut c = colour;
                if bound {
                    let t = self.inputs.sample(0, texcoord);
                    for ch in 0..4 {
                        c[ch] *= t[ch];
                    }
                }
                (c[3] > 0.0).then_some(c)
            }
        }
    }

    /// Pixel range covered by the viewport and the target.
    fn bounds(&self, target: &Texture) -> (i64, i64, i64, i64) {
        let (tw, th) = target.size2d();
        let (vx, vy, vw, vh) = self.viewport;
        let x0 = (vx as i64).max(0);
        let y0 = (vy as i64).max(0);
        let x1 = (vx as i64 + vw as i64).min(tw as i64);
        let y1 = (vy as i64 + vh as i64).min(th as i64);
        (x0, y0, x1, y1)
    }

    fn triangle(&self, target: &mut Texture, tri: [WinVertex; 3]) {
        let [mut a, mut b, c] = tri;
        let mut area = edge(&a, &b, c.x, c.y);
        if area == 0.0 || !area.is_finite() {
            return;
        }
        if area < 0.0 {
            std::mem::swap(&mut a, &mut b);
            area = -area;
        }

        let (bx0, by0, bx1, by1) = self.bounds(target);
        let xmin = (a.x.min(b.x).min(c.x).floor() as i64).max(bx0);
        let xmax = (a.x.max(b.x).max(c.x).ceil() as i64).min(bx1);
        let ymin = (a.y.min(b.y).min(c.y).floor() as i64).max(by0);
        let ymax = (a.y.max(b.y).max(c.y).ceil() as i64).min(by1);

        for py in ymin..ymax {
            for px in xmin..xmax {
                let (sx, sy) = (px as f32 + 0.5, py as f32 + 0.5);
                let w0 = edge(&b, &c, sx, sy);
                let w1 = edge(&c, &a, sx, sy);
                let w2 = edge(&a, &b, sx, sy);
                if !covers(w0, &b, &c) || !covers(w1, &c, &a) || !covers(w2, &a, &b) {
                    continue;
                }
                let (l0, l1, l2) = (w0 / area, w1 / area, w2 / area);
                let tc = lerp3(a.texcoord, b.texcoord, c.texcoord, l0, l1, l2);
                let col = lerp3(a.colour, b.colour, c.colour, l0, l1, l2);
                if let Some(out) = self.fragment(tc, col) {
                    target.blend_pixel(px as usize, py as usize, out, self.blend);
                }
            }
        }
    }

    fn line(&self, target: &mut Texture, a: WinVertex, b: WinVertex) {
        let (dx, dy) = (b.x - a.x, b.y - a.y);
        let steps = dx.abs().max(dy.abs()).ceil().max(1.0) as usize;
        if !dx.is_finite() || !dy.is_finite() {
            return;
        }
        let (bx0, by0, bx1, by1) = self.bounds(target);
        let width = self.line_width.max(1.0).round() as i64;
        let half = (width - 1) / 2;

        for i in 0..=steps {
            let t = i as f32 / steps as f32;
            let (x, y) = (a.x + dx * t, a.y + dy * t);
            let tc = lerp2(a.texcoord, b.texcoord, t);
            let col = lerp2(a.colour, b.colour, t);
            let Some(out) = self.fragment(tc, col) else {
                continue;
            };
            let (cx, cy) = (x.floor() as i64, y.floor() as i64);
            for py in (cy - half)..(cy - half + width) {
                for px in (cx - half)..(cx - half + width) {
                    if px >= bx0 && px < bx1 && py >= by0 && py < by1 {
                        target.blend_pixel(px as usize, py as usize, out, self.blend);
                    }
                }
            }
        }
    }
}

fn edge(a: &WinVertex, b: &WinVertex, x: f32, y: f32) -> f32 {
    (b.x - a.x) * (y - a.y) - (b.y - a.y) * (x - a.x)
}

/// Inclusion test for one edge of a counter-clockwise triangle. Pixels
/// exactly on an edge belong to top and left edges only.
fn covers(w: f32, a: &WinVertex, b: &WinVertex) -> bool {
    if w > 0.0 {
        return true;
    }
    if w < 0.0 {
        return false;
    }
    let left = b.y < a.y;
    let top = b.y == a.y && b.x < a.x;
    left || top
}

fn lerp3<const N: usize>(a: [f32; N], b: [f32; N], c: [f32; N], l0: f32, l1: f32, l2: f32) -> [f32; N] {
    let mut out = [0.0; N];
    for i in 0..N {
        out[i] = a[i] * l0 + b[i] * l1 + c[i] * l2;
    }
    out
}

fn lerp2<const N: usize>(a: [f32; N], b: [f32; N], t: f32) -> [f32; N] {
    let mut out = [0.0; N];
    for i in 0..N {
        out[i] = a[i] + (b[i] - a[i]) * t;
    }
    out
}

pub struct SoftwareContext {
    caps: Capabilities,
    current: bool,
    next_id: u32,
    textures: HashMap<TextureId, Texture>,
    programs: HashMap<ProgramId, Program>,
    buffers: HashMap<BufferId, Vec<Vertex>>,
    framebuffers: HashMap<FramebufferId, TextureId>,
    surface: Texture,
    units: [Option<TextureId>; MAX_UNITS],
    program: Option<ProgramId>,
    framebuffer: Option<FramebufferId>,
    viewport: (i32, i32, usize, usize),
    projection: Matrix4<f64>,
    modelview: Matrix4<f64>,
    blend: BlendMode,
    line_width: f32,
    draw_calls: usize,
}

impl SoftwareContext {
    /// A GL 2.1 class device with ARB programs and framebuffer objects.
    pub fn new(width: usize, height: usize) -> Self {
        Self::with_capabilities(width, height, Self::default_capabilities())
    }

    pub fn default_capabilities() -> Capabilities {
        Capabilities {
            version: "2.1 Software".to_string(),
            renderer: "Software Rasterizer".to_string(),
            extensions: [
                "GL_ARB_vertex_program",
                "GL_ARB_fragment_program",
                "GL_EXT_framebuffer_object",
                "GL_ARB_texture_float",
                "GL_EXT_texture3D",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_texture_size: 2048,
        }
    }

    pub fn with_capabilities(width: usize, height: usize, caps: Capabilities) -> Self {
        Self {
            caps,
            current: true,
            next_id: 1,
            textures: HashMap::new(),
            programs: HashMap::new(),
            buffers: HashMap::new(),
            framebuffers: HashMap::new(),
            surface: Texture::surface(width, height),
            units: [None; MAX_UNITS],
            program: None,
            framebuffer: None,
            viewport: (0, 0, width, height),
            projection: Matrix4::identity(),
            modelview: Matrix4::identity(),
            blend: BlendMode::Replace,
            line_width: 1.0,
            draw_calls: 0,
        }
    }

    /// Simulate the context being made (or released as) current.
    pub fn set_current(&mut self, current: bool) {
        self.current = current;
    }

    /// Resize the default framebuffer. Content becomes transparent black.
    pub fn resize(&mut self, width: usize, height: usize) {
        self.surface = Texture::surface(width, height);
    }

    pub fn draw_calls(&self) -> usize {
        self.draw_calls
    }

    fn next(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn texture_mut(&mut self, id: TextureId) -> &mut Texture {
        match self.textures.get_mut(&id) {
            Some(t) => t,
            None => panic!("{id} does not exist"),
        }
    }

    fn target_texture(&self) -> Option<TextureId> {
        self.framebuffer.map(|fb| self.framebuffers[&fb])
    }

    fn with_target(&mut self, f: impl FnOnce(&Self, &mut Texture)) {
        match self.target_texture() {
            Some(id) => {
                let Some(mut target) = self.textures.remove(&id) else {
                    return;
                };
                f(self, &mut target);
                self.textures.insert(id, target);
            }
            None => {
                let mut target = std::mem::replace(&mut self.surface, Texture::surface(0, 0));
                f(self, &mut target);
                self.surface = target;
            }
        }
    }

    fn raster(&self) -> Raster<'_> {
        Raster {
            inputs: Inputs {
                program: self.program.and_then(|p| self.programs.get(&p)),
                textures: &self.textures,
                units: &self.units,
            },
            mvp: self.projection * self.modelview,
            viewport: self.viewport,
            blend: self.blend,
            line_width: self.line_width,
        }
    }

    fn supports(&self, dialect: Dialect) -> bool {
        match dialect {
            Dialect::Arb => {
                self.caps.has_extension("GL_ARB_vertex_program")
                    && self.caps.has_extension("GL_ARB_fragment_program")
            }
            Dialect::Glsl => self.caps.version_number().is_some_and(|v| v >= (2, 0)),
        }
    }
}

impl GlContext for SoftwareContext {
    fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    fn is_current(&self) -> bool {
        self.current
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureId {
        let id = TextureId(self.next());
        self.textures.insert(id, Texture::zeroed(*desc));
        id
    }

    fn upload_texture(&mut self, texture: TextureId, data: TexData<'_>) {
        let tex = self.texture_mut(texture);
        let expected = tex.desc.dims.texel_count() * tex.desc.format.channels();
        assert_eq!(data.len(), expected, "{texture}: upload size mismatch");
        match (tex.desc.format, data) {
            (TexFormat::Rgba8, TexData::U8(d)) => {
                tex.data = d.iter().map(|&b| b as f32 / 255.0).collect();
            }
            (TexFormat::R32F | TexFormat::Rgb32F, TexData::F32(d)) => {
                tex.data = d.to_vec();
            }
            (format, _) => panic!("{texture}: data type does not match {format:?}"),
        }
    }

    fn resize_texture(&mut self, texture: TextureId, dims: TexDims, format: TexFormat) {
        let tex = self.texture_mut(texture);
        *tex = Texture::zeroed(TextureDesc {
            dims,
            format,
            ..tex.desc
        });
    }

    fn set_texture_params(&mut self, texture: TextureId, filter: Filter, wrap: Wrap) {
        let tex = self.texture_mut(texture);
        tex.desc.filter = filter;
        tex.desc.wrap = wrap;
    }

    fn texture_desc(&self, texture: TextureId) -> Option<TextureDesc> {
        self.textures.get(&texture).map(|t| t.desc)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
        for unit in self.units.iter_mut() {
            if *unit == Some(texture) {
                *unit = None;
            }
        }
    }

    fn bind_texture(&mut self, unit: usize, texture: Option<TextureId>) {
        assert!(unit < MAX_UNITS, "texture unit {unit} out of range");
        self.units[unit] = texture;
    }

    fn create_program(
        &mut self,
        dialect: Dialect,
        vertex: Box<dyn VertexStage>,
        fragment: Box<dyn FragmentStage>,
    ) -> ProgramId {
        assert!(self.supports(dialect), "{dialect:?} programs are not supported by this context");
        let id = ProgramId(self.next());
        self.programs.insert(
            id,
            Program {
                dialect,
                vertex,
                fragment,
                params: HashMap::new(),
            },
        );
        id
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        if let Some(p) = program {
            assert!(self.programs.contains_key(&p), "{p} does not exist");
        }
        self.program = program;
    }

    fn set_param(&mut self, program: ProgramId, binding: ParamBinding, value: ParamValue) {
        let Some(prog) = self.programs.get_mut(&program) else {
            panic!("{program} does not exist");
        };
        if prog.dialect == Dialect::Arb {
            assert!(
                matches!(binding, ParamBinding::Local(_)) && matches!(value, ParamValue::Vec4(_)),
                "ARB programs only take vec4 locals, got {binding:?} = {value:?}"
            );
        } else {
            assert!(matches!(binding, ParamBinding::Named(_)), "GLSL programs take named uniforms");
        }
        prog.params.insert(binding, value);
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
        if self.program == Some(program) {
            self.program = None;
        }
    }

    fn create_buffer(&mut self, vertices: &[Vertex]) -> BufferId {
        let id = BufferId(self.next());
        self.buffers.insert(id, vertices.to_vec());
        id
    }

    fn update_buffer(&mut self, buffer: BufferId, vertices: &[Vertex]) {
        match self.buffers.get_mut(&buffer) {
            Some(b) => *b = vertices.to_vec(),
            None => panic!("{buffer} does not exist"),
        }
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer);
    }

    fn create_framebuffer(&mut self, colour: TextureId) -> FramebufferId {
        let desc = self.texture_desc(colour);
        assert!(
            matches!(
                desc,
                Some(TextureDesc {
                    dims: TexDims::D2(..),
                    format: TexFormat::Rgba8,
                    ..
                })
            ),
            "{colour} cannot be a colour attachment"
        );
        let id = FramebufferId(self.next());
        self.framebuffers.insert(id, colour);
        id
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        if let Some(fb) = framebuffer {
            assert!(self.framebuffers.contains_key(&fb), "{fb} does not exist");
        }
        self.framebuffer = framebuffer;
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.framebuffers.remove(&framebuffer);
        if self.framebuffer == Some(framebuffer) {
            self.framebuffer = None;
        }
    }

    fn viewport(&mut self, x: i32, y: i32, width: usize, height: usize) {
        self.viewport = (x, y, width, height);
    }

    fn viewport_rect(&self) -> (i32, i32, usize, usize) {
        self.viewport
    }

    fn set_projection(&mut self, m: Matrix4<f64>) {
        self.projection = m;
    }

    fn projection(&self) -> Matrix4<f64> {
        self.projection
    }

    fn set_modelview(&mut self, m: Matrix4<f64>) {
        self.modelview = m;
    }

    fn modelview(&self) -> Matrix4<f64> {
        self.modelview
    }

    fn set_blend(&mut self, mode: BlendMode) {
        self.blend = mode;
    }

    fn set_line_width(&mut self, width: f32) {
        self.line_width = width;
    }

    fn clear(&mut self, colour: [f32; 4]) {
        self.with_target(|_, target| {
            for px in target.data.chunks_exact_mut(4) {
                px.copy_from_slice(&colour);
            }
        });
    }

    fn draw(&mut self, primitive: Primitive, vertices: &[Vertex]) {
        if vertices.is_empty() {
            return;
        }
        self.draw_calls += 1;
        self.with_target(|ctx, target| {
            let raster = ctx.raster();
            match primitive {
                Primitive::Triangles => {
                    for tri in vertices.chunks_exact(3) {
                        let win = [
                            raster.to_window(&tri[0]),
                            raster.to_window(&tri[1]),
                            raster.to_window(&tri[2]),
                        ];
                        raster.triangle(target, win);
                    }
                }
                Primitive::Lines => {
                    for seg in vertices.chunks_exact(2) {
                        let (a, b) = (raster.to_window(&seg[0]), raster.to_window(&seg[1]));
                        raster.line(target, a, b);
                    }
                }
            }
        });
    }

    fn draw_buffer(&mut self, primitive: Primitive, buffer: BufferId) {
        let vertices = match self.buffers.get(&buffer) {
            Some(v) => v.clone(),
            None => panic!("{buffer} does not exist"),
        };
        self.draw(primitive, &vertices);
    }

    fn read_pixels(&self) -> image::RgbaImage {
        let target = match self.target_texture() {
            Some(id) => &self.textures[&id],
            None => &self.surface,
        };
        let (w, h) = target.size2d();
        image::RgbaImage::from_fn(w as u32, h as u32, |x, y| {
            let row = h - 1 - y as usize;
            let off = (row * w + x as usize) * 4;
            let px = &target.data[off..off + 4];
            let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
            image::Rgba([q(px[0]), q(px[1]), q(px[2]), q(px[3])])
        })
    }

    fn stats(&self) -> ResourceStats {
        ResourceStats {
            textures: self.textures.len(),
            programs: self.programs.len(),
            buffers: self.buffers.len(),
            framebuffers: self.framebuffers.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::context::ortho;
    use crate::gl::shaders::ShaderKind;

    fn quad(lo: f32, hi: f32, colour: [f32; 4]) -> Vec<Vertex> {
        let v = |x, y| Vertex::coloured([x, y, 0.0], colour);
        vec![v(lo, lo), v(hi, lo), v(hi, hi), v(lo, lo), v(hi, hi), v(lo, hi)]
    }

    fn context(size: usize) -> SoftwareContext {
        let mut gl = SoftwareContext::new(size, size);
        gl.set_projection(ortho(0.0, size as f64, 0.0, size as f64));
        gl
    }

    #[test]
    fn adjacent_triangles_cover_each_pixel_once() {
        let mut gl = context(4);
        gl.set_blend(BlendMode::Alpha);
        gl.draw(Primitive::Triangles, &quad(0.0, 4.0, [1.0, 1.0, 1.0, 0.5]));
        let img = gl.read_pixels();
        assert!(img.pixels().all(|p| p.0 == [128, 128, 128, 128]));
    }

    #[test]
    fn framebuffer_target_and_readback_orientation() {
        let mut gl = context(4);
        let tex = gl.create_texture(&TextureDesc {
            dims: TexDims::D2(4, 4),
            format: TexFormat::Rgba8,
            filter: Filter::Nearest,
            wrap: Wrap::ClampToEdge,
        });
        let fb = gl.create_framebuffer(tex);
        gl.bind_framebuffer(Some(fb));
        gl.clear([0.0; 4]);
        gl.draw(Primitive::Triangles, &quad(0.0, 1.0, [1.0, 0.0, 0.0, 1.0]));
        let img = gl.read_pixels();
        // bottom-left pixel is the last row of the image
        assert_eq!(img.get_pixel(0, 3).0, [255, 0, 0, 255]);
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 0, 0]);

        gl.bind_framebuffer(None);
        assert!(gl.read_pixels().pixels().all(|p| p.0 == [0, 0, 0, 0]));
    }

    #[test]
    fn nearest_and_linear_sampling() {
        let mut tex = Texture::zeroed(TextureDesc {
            dims: TexDims::D1(2),
            format: TexFormat::R32F,
            filter: Filter::Nearest,
            wrap: Wrap::ClampToEdge,
        });
        tex.data = vec![0.0, 1.0];
        assert_eq!(tex.sample([0.4, 0.5, 0.5])[0], 0.0);
        assert_eq!(tex.sample([0.6, 0.5, 0.5])[0], 1.0);
        tex.desc.filter = Filter::Linear;
        assert!((tex.sample([0.5, 0.5, 0.5])[0] - 0.5).abs() < 1e-6);
        tex.desc.wrap = Wrap::ClampToBorder([9.0; 4]);
        assert_eq!(tex.sample([1.5, 0.5, 0.5]), [9.0; 4]);
    }

    #[test]
    fn lines_respect_width() {
        let mut gl = context(8);
        gl.set_line_width(3.0);
        let c = [0.0, 1.0, 0.0, 1.0];
        gl.draw(
            Primitive::Lines,
            &[Vertex::coloured([0.0, 4.5, 0.0], c), Vertex::coloured([8.0, 4.5, 0.0], c)],
        );
        let img = gl.read_pixels();
        let lit = (0..8).filter(|&y| img.get_pixel(4, y).0[1] == 255).count();
        assert_eq!(lit, 3);
    }

    #[test]
    fn stats_track_live_objects() {
        let mut gl = context(2);
        let (v, f) = ShaderKind::VertexColour.stages();
        let p = gl.create_program(Dialect::Glsl, v, f);
        let b = gl.create_buffer(&quad(0.0, 1.0, [1.0; 4]));
        assert_eq!(gl.stats().programs, 1);
        assert_eq!(gl.stats().buffers, 1);
        gl.delete_program(p);
        gl.delete_buffer(b);
        assert_eq!(gl.stats(), ResourceStats::default());
    }

    #[test]
    #[should_panic]
    fn arb_programs_reject_named_uniforms() {
        let mut gl = context(2);
        let (v, f) = ShaderKind::Volume.stages();
        let p = gl.create_program(Dialect::Arb, v, f);
        gl.set_param(p, ParamBinding::Named("clipping"), ParamValue::Vec4([0.0; 4]));
    }

    #[test]
    #[should_panic]
    fn unsupported_dialect_panics() {
        let mut caps = SoftwareContext::default_capabilities();
        caps.extensions.clear();
        let mut gl = SoftwareContext::with_capabilities(2, 2, caps);
        let (v, f) = ShaderKind::Volume.stages();
        gl.create_program(Dialect::Arb, v, f);
    }
}
