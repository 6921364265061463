use nalgebra::Matrix4;

use super::{compile_program, ImageMode, Renderer};
use crate::gl::context::{Dialect, GlContext, ProgramId};
use crate::gl::shaders::{Param, ParamValue, ShaderKind};
use crate::gl::Tier;

/// GLSL programs with named uniforms.
#[derive(Debug, Default)]
pub struct GlslRenderer;

impl Renderer for GlslRenderer {
    fn tier(&self) -> Tier {
        Tier::Glsl
    }

    fn image_mode(&self) -> ImageMode {
        ImageMode::Raw
    }

    fn supports_outline(&self) -> bool {
        true
    }

    fn compile(&self, gl: &mut dyn GlContext, kind: ShaderKind) -> Option<ProgramId> {
        Some(compile_program(gl, Dialect::Glsl, kind))
    }

    fn set_params(&self, gl: &mut dyn GlContext, program: ProgramId, params: &[(Param, [f32; 4])]) {
        for &(param, value) in params {
            gl.set_param(program, param.binding(Dialect::Glsl), ParamValue::Vec4(value));
        }
    }

    fn set_matrix(&self, gl: &mut dyn GlContext, program: ProgramId, param: Param, m: &Matrix4<f32>) {
        gl.set_param(program, param.binding(Dialect::Glsl), ParamValue::Mat4(*m));
    }
}
