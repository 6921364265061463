//! Shader programs.
//!
//! A program is a pair of stages written in Rust. The stages read their
//! parameters through [`ShaderInputs`] using a logical [`Param`]; how that
//! parameter is addressed on the device depends on the program dialect
//! (ARB local index or GLSL uniform name, see [`Param::binding`]).
//!
//! The colour computations live in plain `*Shading` structs so that the
//! fixed-function backend can run exactly the same maths on the CPU when it
//! pre-colours textures.

use nalgebra::{Matrix4, Vector4};

use super::context::{Dialect, Vertex};
use crate::colourmaps::Rgba;

/// Logical shader parameters. Every parameter is a four-component vector,
/// except [`Param::VoxToDisplay`], which is a matrix occupying four ARB
/// locals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Param {
    /// `[low, high, invert, 0]` clipping range.
    Clip,
    /// `[scale, offset, use negative colour map, 0]`.
    CmapXform,
    /// `[low, high, invert, 0]` mask threshold.
    Threshold,
    Colour,
    /// Data texture size in texels.
    Shape,
    /// `[enabled, width, x axis, y axis]`.
    Outline,
    /// `[lookup table texels, 0, 0, 0]`.
    LutSize,
    XColour,
    YColour,
    ZColour,
    /// `[enabled, low, high, threshold]`.
    Modulate,
    Alpha,
    /// Per-axis divisor applied to unit line vectors.
    LineScale,
    VoxToDisplay,
}

impl Param {
    pub fn local(self) -> usize {
        match self {
            Param::Clip => 0,
            Param::CmapXform => 1,
            Param::Threshold => 2,
            Param::Colour => 3,
            Param::Shape => 4,
            Param::Outline => 5,
            Param::LutSize => 6,
            Param::XColour => 7,
            Param::YColour => 8,
            Param::ZColour => 9,
            Param::Modulate => 10,
            Param::Alpha => 11,
            Param::LineScale => 12,
            Param::VoxToDisplay => 13,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Param::Clip => "clipping",
            Param::CmapXform => "cmapXform",
            Param::Threshold => "threshold",
            Param::Colour => "colour",
            Param::Shape => "imageShape",
            Param::Outline => "outline",
            Param::LutSize => "lutSize",
            Param::XColour => "xColour",
            Param::YColour => "yColour",
            Param::ZColour => "zColour",
            Param::Modulate => "modulate",
            Param::Alpha => "alpha",
            Param::LineScale => "lineScale",
            Param::VoxToDisplay => "voxToDisplay",
        }
    }

    pub fn binding(self, dialect: Dialect) -> ParamBinding {
        match dialect {
            Dialect::Arb => ParamBinding::Local(self.local()),
            Dialect::Glsl => ParamBinding::Named(self.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamBinding {
    Named(&'static str),
    Local(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Float(f32),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat4(Matrix4<f32>),
}

impl ParamValue {
    pub fn as_vec4(&self) -> [f32; 4] {
        match *self {
            ParamValue::Float(v) => [v, 0.0, 0.0, 0.0],
            ParamValue::Vec3([x, y, z]) => [x, y, z, 0.0],
            ParamValue::Vec4(v) => v,
            ParamValue::Mat4(m) => [m[(0, 0)], m[(0, 1)], m[(0, 2)], m[(0, 3)]],
        }
    }
}

/// Parameter and texture access available to a running stage.
pub trait ShaderInputs {
    fn param(&self, p: Param) -> [f32; 4];
    fn matrix(&self, p: Param) -> Matrix4<f32>;
    /// Sample the texture bound to `unit` at normalised coordinates.
    fn sample(&self, unit: usize, coord: [f32; 3]) -> [f32; 4];
}

pub trait VertexStage {
    /// Returns the vertex with its position in display space.
    fn process(&self, vertex: &Vertex, inputs: &dyn ShaderInputs) -> Vertex;
}

pub trait FragmentStage {
    /// `None` discards the fragment.
    fn shade(&self, texcoord: [f32; 3], colour: [f32; 4], inputs: &dyn ShaderInputs) -> Option<[f32; 4]>;
}

/// Texture units used by the image programs.
pub mod units {
    pub const DATA: usize = 0;
    pub const COLOUR_MAP: usize = 1;
    pub const NEGATIVE_COLOUR_MAP: usize = 2;
    pub const MODULATION: usize = 3;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    Volume,
    Mask,
    Label,
    RgbVector,
    /// Line vectors whose endpoints are computed in the vertex stage.
    LineVector,
    /// Pre-computed geometry coloured per vertex.
    VertexColour,
}

impl ShaderKind {
    pub fn stages(self) -> (Box<dyn VertexStage>, Box<dyn FragmentStage>) {
        match self {
            ShaderKind::Volume => (Box::new(PassThrough), Box::new(VolumeFragment)),
            ShaderKind::Mask => (Box::new(PassThrough), Box::new(MaskFragment)),
            ShaderKind::Label => (Box::new(PassThrough), Box::new(LabelFragment)),
            ShaderKind::RgbVector => (Box::new(PassThrough), Box::new(RgbVectorFragment)),
            ShaderKind::LineVector => (Box::new(LineVectorVertex), Box::new(VertexColour)),
            ShaderKind::VertexColour => (Box::new(PassThrough), Box::new(VertexColour)),
        }
    }
}

fn flag(v: f32) -> bool {
    v > 0.5
}

fn bit(b: bool) -> f32 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn in_unit_cube(tc: [f32; 3]) -> bool {
    tc.iter().all(|c| (0.0..=1.0).contains(c))
}

/// Nearest lookup into a colour table, clamped at the edges. Matches
/// sampling a 1D texture of the same table with nearest filtering.
pub fn lookup_nearest(table: &[Rgba], t: f32) -> Rgba {
    if table.is_empty() {
        return [0.0; 4];
    }
    let n = table.len();
    let i = if t.is_nan() { 0.0 } else { (t * n as f32).floor() };
    table[(i.max(0.0) as usize).min(n - 1)]
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeShading {
    pub clip_lo: f32,
    pub clip_hi: f32,
    pub invert_clip: bool,
    /// Voxel value to colour map coordinate.
    pub scale: f32,
    pub offset: f32,
    pub use_negative: bool,
}

impl VolumeShading {
    pub fn params(&self) -> Vec<(Param, [f32; 4])> {
        vec![
            (Param::Clip, [self.clip_lo, self.clip_hi, bit(self.invert_clip), 0.0]),
            (Param::CmapXform, [self.scale, self.offset, bit(self.use_negative), 0.0]),
        ]
    }

    pub fn from_inputs(inputs: &dyn ShaderInputs) -> Self {
        let [clip_lo, clip_hi, inv, _] = inputs.param(Param::Clip);
        let [scale, offset, neg, _] = inputs.param(Param::CmapXform);
        Self {
            clip_lo,
            clip_hi,
            invert_clip: flag(inv),
            scale,
            offset,
            use_negative: flag(neg),
        }
    }

    pub fn colour(
        &self,
        value: f32,
        cmap: impl Fn(f32) -> Rgba,
        negative: impl Fn(f32) -> Rgba,
    ) -> Option<Rgba> {
        if value.is_nan() {
            return None;
        }
        let clipped = value < self.clip_lo || value > self.clip_hi;
        if clipped != self.invert_clip {
            return None;
        }
        if self.use_negative && value < 0.0 {
            Some(negative(-value * self.scale + self.offset))
        } else {
            Some(cmap(value * self.scale + self.offset))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskShading {
    pub lo: f32,
    pub hi: f32,
    pub invert: bool,
    pub colour: Rgba,
}

impl MaskShading {
    pub fn params(&self) -> Vec<(Param, [f32; 4])> {
        vec![
            (Param::Threshold, [self.lo, self.hi, bit(self.invert), 0.0]),
            (Param::Colour, self.colour),
        ]
    }

    pub fn from_inputs(inputs: &dyn ShaderInputs) -> Self {
        let [lo, hi, inv, _] = inputs.param(Param::Threshold);
        Self {
            lo,
            hi,
            invert: flag(inv),
            colour: inputs.param(Param::Colour),
        }
    }

    pub fn colour(&self, value: f32) -> Option<Rgba> {
        if value.is_nan() {
            return None;
        }
        let inside = value >= self.lo && value <= self.hi;
        (inside != self.invert).then_some(self.colour)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelShading {
    pub lut_size: usize,
    pub outline: bool,
    /// Fraction of a voxel.
    pub outline_width: f32,
    pub xax: usize,
    pub yax: usize,
    pub shape: [usize; 3],
}

impl LabelShading {
    pub fn params(&self) -> Vec<(Param, [f32; 4])> {
        let [nx, ny, nz] = self.shape.map(|s| s as f32);
        vec![
            (Param::LutSize, [self.lut_size as f32, 0.0, 0.0, 0.0]),
            (
                Param::Outline,
                [bit(self.outline), self.outline_width, self.xax as f32, self.yax as f32],
            ),
            (Param::Shape, [nx, ny, nz, 0.0]),
        ]
    }

    pub fn from_inputs(inputs: &dyn ShaderInputs) -> Self {
        let [n, ..] = inputs.param(Param::LutSize);
        let [outline, width, xax, yax] = inputs.param(Param::Outline);
        let [nx, ny, nz, _] = inputs.param(Param::Shape);
        Self {
            lut_size: n as usize,
            outline: flag(outline),
            outline_width: width,
            xax: xax as usize,
            yax: yax as usize,
            shape: [nx as usize, ny as usize, nz as usize],
        }
    }

    /// Colour of the label at `texcoord`. `label_at` samples label values,
    /// `lut` samples the lookup table at a normalised coordinate.
    pub fn colour(
        &self,
        texcoord: [f32; 3],
        label_at: impl Fn([f32; 3]) -> f32,
        lut: impl Fn(f32) -> Rgba,
    ) -> Option<Rgba> {
        let value = label_at(texcoord);
        if value.is_nan() {
            return None;
        }
        let label = value.round();
        if label < 0.0 || label >= self.lut_size as f32 {
            return None;
        }
        let colour = lut((label + 0.5) / self.lut_size as f32);
        if colour[3] <= 0.0 {
            return None;
        }
        if self.outline {
            let edge = [self.xax, self.yax].iter().any(|&ax| {
                let n = self.shape[ax].max(1) as f32;
                let step = self.outline_width.max(1e-3) / n;
                [-step, step].iter().any(|d| {
                    let mut tc = texcoord;
                    tc[ax] += d;
                    in_unit_cube(tc) && label_at(tc).round() != label
                })
            });
            if !edge {
                return None;
            }
        }
        Some(colour)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorShading {
    /// Axis colours, zero for suppressed axes.
    pub colours: [[f32; 3]; 3],
    pub alpha: f32,
    /// `(low, high)` of the modulation image.
    pub modulate: Option<(f32, f32)>,
    /// Fraction of the modulation range.
    pub mod_threshold: f32,
}

impl VectorShading {
    pub fn params(&self) -> Vec<(Param, [f32; 4])> {
        let c = |i: usize| [self.colours[i][0], self.colours[i][1], self.colours[i][2], 0.0];
        let (on, lo, hi) = match self.modulate {
            Some((lo, hi)) => (1.0, lo, hi),
            None => (0.0, 0.0, 1.0),
        };
        vec![
            (Param::XColour, c(0)),
            (Param::YColour, c(1)),
            (Param::ZColour, c(2)),
            (Param::Alpha, [self.alpha, 0.0, 0.0, 0.0]),
            (Param::Modulate, [on, lo, hi, self.mod_threshold]),
        ]
    }

    pub fn from_inputs(inputs: &dyn ShaderInputs) -> Self {
        let rgb = |p| {
            let [r, g, b, _] = inputs.param(p);
            [r, g, b]
        };
        let [on, lo, hi, thr] = inputs.param(Param::Modulate);
        Self {
            colours: [rgb(Param::XColour), rgb(Param::YColour), rgb(Param::ZColour)],
            alpha: inputs.param(Param::Alpha)[0],
            modulate: flag(on).then_some((lo, hi)),
            mod_threshold: thr,
        }
    }

    /// Colour of a vector, optionally modulated by `modulation`.
    pub fn colour(&self, vector: [f32; 3], modulation: Option<f32>) -> Option<Rgba> {
        if vector.iter().any(|v| v.is_nan()) {
            return None;
        }
        let mut rgb = [0.0f32; 3];
        for (axis, component) in vector.iter().enumerate() {
            for ch in 0..3 {
                rgb[ch] += self.colours[axis][ch] * component.abs();
            }
        }
        if let (Some((lo, hi)), Some(m)) = (self.modulate, modulation) {
            let span = if hi > lo { hi - lo } else { 1.0 };
            let m = ((m - lo) / span).clamp(0.0, 1.0);
            if m < self.mod_threshold {
                return None;
            }
            rgb = rgb.map(|c| c * m);
        }
        let [r, g, b] = rgb.map(|c| c.clamp(0.0, 1.0));
        Some([r, g, b, self.alpha])
    }
}

struct PassThrough;

impl VertexStage for PassThrough {
    fn process(&self, vertex: &Vertex, _inputs: &dyn ShaderInputs) -> Vertex {
        *vertex
    }
}

struct VertexColour;

impl FragmentStage for VertexColour {
    fn shade(&self, _tc: [f32; 3], colour: [f32; 4], _inputs: &dyn ShaderInputs) -> Option<[f32; 4]> {
        (colour[3] > 0.0).then_some(colour)
    }
}

struct VolumeFragment;

impl FragmentStage for VolumeFragment {
    fn shade(&self, tc: [f32; 3], _c: [f32; 4], inputs: &dyn ShaderInputs) -> Option<[f32; 4]> {
        if !in_unit_cube(tc) {
            return None;
        }
        let value = inputs.sample(units::DATA, tc)[0];
        VolumeShading::from_inputs(inputs).colour(
            value,
            |t| inputs.sample(units::COLOUR_MAP, [t, 0.5, 0.5]),
            |t| inputs.sample(units::NEGATIVE_COLOUR_MAP, [t, 0.5, 0.5]),
        )
    }
}

struct MaskFragment;

impl FragmentStage for MaskFragment {
    fn shade(&self, tc: [f32; 3], _c: [f32; 4], inputs: &dyn ShaderInputs) -> Option<[f32; 4]> {
        if !in_unit_cube(tc) {
            return None;
        }
        MaskShading::from_inputs(inputs).colour(inputs.sample(units::DATA, tc)[0])
    }
}

struct LabelFragment;

impl FragmentStage for LabelFragment {
    fn shade(&self, tc: [f32; 3], _c: [f32; 4], inputs: &dyn ShaderInputs) -> Option<[f32; 4]> {
        if !in_unit_cube(tc) {
            return None;
        }
        LabelShading::from_inputs(inputs).colour(
            tc,
            |at| inputs.sample(units::DATA, at)[0],
            |t| inputs.sample(units::COLOUR_MAP, [t, 0.5, 0.5]),
        )
    }
}

struct RgbVectorFragment;

impl FragmentStage for RgbVectorFragment {
    fn shade(&self, tc: [f32; 3], _c: [f32; 4], inputs: &dyn ShaderInputs) -> Option<[f32; 4]> {
        if !in_unit_cube(tc) {
            return None;
        }
        let [x, y, z, _] = inputs.sample(units::DATA, tc);
        let shading = VectorShading::from_inputs(inputs);
        let modulation = shading
            .modulate
            .map(|_| inputs.sample(units::MODULATION, tc)[0]);
        shading.colour([x, y, z], modulation)
    }
}

/// Vertices arrive at voxel centres (voxel coordinates) with the endpoint
/// selector in `colour[0]`: -1 or 0 for the start, +1 for the end.
struct LineVectorVertex;

impl VertexStage for LineVectorVertex {
    fn process(&self, vertex: &Vertex, inputs: &dyn ShaderInputs) -> Vertex {
        let tc = vertex.texcoord;
        let [x, y, z, _] = inputs.sample(units::DATA, tc);
        let len = (x * x + y * y + z * z).sqrt();
        let scale = inputs.param(Param::LineScale);
        let sel = vertex.colour[0];
        let mut voxel = vertex.position;
        if len > 0.0 && len.is_finite() {
            for (ax, comp) in [x, y, z].iter().enumerate() {
                voxel[ax] += sel * 0.5 * comp / len / scale[ax].max(1e-6);
            }
        }
        let shading = VectorShading::from_inputs(inputs);
        let modulation = shading
            .modulate
            .map(|_| inputs.sample(units::MODULATION, tc)[0]);
        let colour = shading.colour([x, y, z], modulation).unwrap_or([0.0; 4]);

        let m = inputs.matrix(Param::VoxToDisplay);
        let p = m * Vector4::new(voxel[0], voxel[1], voxel[2], 1.0);
        Vertex::new([p[0], p[1], p[2]], tc, colour)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest(
        value, invert, expected,
        case(5.0, false, true),
        case(-1.0, false, false),
        case(11.0, false, false),
        case(5.0, true, false),
        case(11.0, true, true)
    )]
    fn volume_clipping(value: f32, invert: bool, expected: bool) {
        let shading = VolumeShading {
            clip_lo: 0.0,
            clip_hi: 10.0,
            invert_clip: invert,
            scale: 0.1,
            offset: 0.0,
            use_negative: false,
        };
        let c = shading.colour(value, |t| [t, t, t, 1.0], |_| [0.0; 4]);
        assert_eq!(c.is_some(), expected);
    }

    #[test]
    fn negative_values_use_second_map() {
        let shading = VolumeShading {
            clip_lo: -10.0,
            clip_hi: 10.0,
            invert_clip: false,
            scale: 0.1,
            offset: 0.0,
            use_negative: true,
        };
        let c = shading.colour(-5.0, |_| [1.0, 0.0, 0.0, 1.0], |t| [0.0, 0.0, t, 1.0]).unwrap();
        assert_eq!(c, [0.0, 0.0, 0.5, 1.0]);
    }

    #[test]
    fn mask_threshold_and_invert() {
        let mut m = MaskShading {
            lo: 1.0,
            hi: 2.0,
            invert: false,
            colour: [1.0, 0.0, 0.0, 1.0],
        };
        assert!(m.colour(1.5).is_some());
        assert!(m.colour(0.5).is_none());
        m.invert = true;
        assert!(m.colour(0.5).is_some());
    }

    #[test]
    fn vector_colour_uses_absolute_components() {
        let v = VectorShading {
            colours: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0; 3]],
            alpha: 0.5,
            modulate: None,
            mod_threshold: 0.0,
        };
        assert_eq!(v.colour([-0.5, 0.25, 1.0], None), Some([0.5, 0.25, 0.0, 0.5]));
    }

    #[test]
    fn modulation_hides_below_threshold() {
        let v = VectorShading {
            colours: [[1.0; 3], [0.0; 3], [0.0; 3]],
            alpha: 1.0,
            modulate: Some((0.0, 10.0)),
            mod_threshold: 0.5,
        };
        assert!(v.colour([1.0, 0.0, 0.0], Some(2.0)).is_none());
        assert_eq!(v.colour([1.0, 0.0, 0.0], Some(10.0)), Some([1.0, 1.0, 1.0, 1.0]));
    }

    #[test]
    fn label_outline_only_keeps_edges() {
        // 4 voxels along x: labels 1 1 1 2
        let labels = [1.0, 1.0, 1.0, 2.0];
        let label_at = |tc: [f32; 3]| labels[((tc[0] * 4.0) as usize).min(3)];
        let lut = |_t: f32| [1.0, 1.0, 1.0, 1.0];
        let shading = LabelShading {
            lut_size: 3,
            outline: true,
            outline_width: 1.0,
            xax: 0,
            yax: 1,
            shape: [4, 1, 1],
        };
        let centre = |i: usize| [(i as f32 + 0.5) / 4.0, 0.5, 0.5];
        assert!(shading.colour(centre(0), label_at, lut).is_none());
        assert!(shading.colour(centre(2), label_at, lut).is_some());
        assert!(shading.colour(centre(3), label_at, lut).is_some());
    }

    #[test]
    fn lookup_clamps() {
        let table = [[0.0; 4], [1.0; 4]];
        assert_eq!(lookup_nearest(&table, -3.0), [0.0; 4]);
        assert_eq!(lookup_nearest(&table, 0.49), [0.0; 4]);
        assert_eq!(lookup_nearest(&table, 0.5), [1.0; 4]);
        assert_eq!(lookup_nearest(&table, 7.0), [1.0; 4]);
    }

    #[test]
    fn bindings_follow_dialect() {
        assert_eq!(Param::Clip.binding(Dialect::Arb), ParamBinding::Local(0));
        assert_eq!(Param::Clip.binding(Dialect::Glsl), ParamBinding::Named("clipping"));
    }
}
