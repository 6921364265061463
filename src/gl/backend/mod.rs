//! Renderer backends, one per capability tier.
//!
//! A backend decides how image data reaches the device (raw values for the
//! program tiers, CPU-coloured texels for fixed function), compiles the
//! program for each kind of overlay and knows how its dialect addresses
//! parameters. It is chosen once, in [`crate::gl::RenderContext::new`], and
//! shared by every GL object.

mod arb;
mod fixed;
mod glsl;

use std::rc::Rc;

use nalgebra::Matrix4;

use super::context::{BlendMode, Dialect, GlContext, ProgramId, TextureId};
use super::shaders::{Param, ShaderKind};
use super::Tier;

pub use arb::ArbRenderer;
pub use fixed::FixedFunctionRenderer;
pub use glsl::GlslRenderer;

/// What image textures hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageMode {
    /// Data values, coloured by a program.
    Raw,
    /// RGBA texels coloured on the CPU.
    Precoloured,
}

pub trait Renderer {
    fn tier(&self) -> Tier;

    fn image_mode(&self) -> ImageMode;

    /// Whether label outlines can be drawn.
    fn supports_outline(&self) -> bool;

    /// Compile the program for `kind`, or `None` when this tier draws
    /// without programs.
    fn compile(&self, gl: &mut dyn GlContext, kind: ShaderKind) -> Option<ProgramId>;

    fn set_params(&self, gl: &mut dyn GlContext, program: ProgramId, params: &[(Param, [f32; 4])]);

    fn set_matrix(&self, gl: &mut dyn GlContext, program: ProgramId, param: Param, m: &Matrix4<f32>);

    /// Make `program` current and bind `textures` to their units. Overlays
    /// blend over whatever is below them.
    fn bind(&self, gl: &mut dyn GlContext, program: Option<ProgramId>, textures: &[(usize, TextureId)]) {
        gl.set_blend(BlendMode::Alpha);
        gl.use_program(program);
        for &(unit, texture) in textures {
            gl.bind_texture(unit, Some(texture));
        }
    }

    fn unbind(&self, gl: &mut dyn GlContext, textures: &[(usize, TextureId)]) {
        for &(unit, _) in textures {
            gl.bind_texture(unit, None);
        }
        gl.use_program(None);
    }
}

pub fn renderer_for(tier: Tier) -> Rc<dyn Renderer> {
    match tier {
        Tier::FixedFunction => Rc::new(FixedFunctionRenderer),
        Tier::Arb => Rc::new(ArbRenderer),
        Tier::Glsl => Rc::new(GlslRenderer),
    }
}

fn compile_program(gl: &mut dyn GlContext, dialect: Dialect, kind: ShaderKind) -> ProgramId {
    let (vertex, fragment) = kind.stages();
    let program = gl.create_program(dialect, vertex, fragment);
    log::debug!("Compiled {dialect:?} program {program} for {kind:?}");
    program
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::software::SoftwareContext;

    #[test]
    fn fixed_function_has_no_programs() {
        let mut gl = SoftwareContext::new(1, 1);
        let r = renderer_for(Tier::FixedFunction);
        assert_eq!(r.image_mode(), ImageMode::Precoloured);
        assert!(r.compile(&mut gl, ShaderKind::Volume).is_none());
        assert_eq!(gl.stats().programs, 0);
    }

    #[test]
    fn program_tiers_compile() {
        let mut gl = SoftwareContext::new(1, 1);
        for tier in [Tier::Arb, Tier::Glsl] {
            let r = renderer_for(tier);
            assert_eq!(r.image_mode(), ImageMode::Raw);
            let p = r.compile(&mut gl, ShaderKind::Volume).unwrap();
            r.set_params(&mut gl, p, &[(Param::Clip, [0.0, 1.0, 0.0, 0.0])]);
            r.set_matrix(&mut gl, p, Param::VoxToDisplay, &Matrix4::identity());
        }
        assert_eq!(gl.stats().programs, 2);
    }

    #[test]
    fn outlines_need_programs() {
        assert!(!renderer_for(Tier::FixedFunction).supports_outline());
        assert!(renderer_for(Tier::Arb).supports_outline());
        assert!(renderer_for(Tier::Glsl).supports_outline());
    }
}
