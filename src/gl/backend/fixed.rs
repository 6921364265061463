use nalgebra::Matrix4;

use super::{ImageMode, Renderer};
use crate::gl::context::{GlContext, ProgramId};
use crate::gl::shaders::{Param, ShaderKind};
use crate::gl::Tier;

/// No programs: images are coloured on the CPU and drawn as plain textured
/// geometry, line vectors always take the CPU path.
#[derive(Debug, Default)]
pub struct FixedFunctionRenderer;

impl Renderer for FixedFunctionRenderer {
    fn tier(&self) -> Tier {
        Tier::FixedFunction
    }

    fn image_mode(&self) -> ImageMode {
        ImageMode::Precoloured
    }

    fn supports_outline(&self) -> bool {
        false
    }

    fn compile(&self, _gl: &mut dyn GlContext, _kind: ShaderKind) -> Option<ProgramId> {
        None
    }

    fn set_params(&self, _gl: &mut dyn GlContext, _program: ProgramId, _params: &[(Param, [f32; 4])]) {}

    fn set_matrix(&self, _gl: &mut dyn GlContext, _program: ProgramId, _param: Param, _m: &Matrix4<f32>) {}
}
