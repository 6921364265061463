use nalgebra::Matrix4;

use super::{compile_program, ImageMode, Renderer};
use crate::gl::context::{Dialect, GlContext, ProgramId};
use crate::gl::shaders::{Param, ParamBinding, ParamValue, ShaderKind};
use crate::gl::Tier;

/// ARB assembly programs. Parameters are four-component program locals; a
/// matrix takes four consecutive locals, one per row.
#[derive(Debug, Default)]
pub struct ArbRenderer;

impl Renderer for ArbRenderer {
    fn tier(&self) -> Tier {
        Tier::Arb
    }

    fn image_mode(&self) -> ImageMode {
        ImageMode::Raw
    }

    fn supports_outline(&self) -> bool {
        true
    }

    fn compile(&self, gl: &mut dyn GlContext, kind: ShaderKind) -> Option<ProgramId> {
        Some(compile_program(gl, Dialect::Arb, kind))
    }

    fn set_params(&self, gl: &mut dyn GlContext, program: ProgramId, params: &[(Param, [f32; 4])]) {
        for &(param, value) in params {
            gl.set_param(program, param.binding(Dialect::Arb), ParamValue::Vec4(value));
        }
    }

    fn set_matrix(&self, gl: &mut dyn GlContext, program: ProgramId, param: Param, m: &Matrix4<f32>) {
        for row in 0..4 {
            let value = [m[(row, 0)], m[(row, 1)], m[(row, 2)], m[(row, 3)]];
            gl.set_param(program, ParamBinding::Local(param.local() + row), ParamValue::Vec4(value));
        }
    }
}
