use std::rc::Rc;

use super::{ObjectBase, Renderable};
use crate::gl::context::{GlContext, Primitive, Vertex};
use crate::gl::routines::plane_intersection;
use crate::gl::shaders::ShaderKind;
use crate::gl::RenderContext;
use crate::overlay::Mesh;

/// A triangle mesh, drawn as the outline where it crosses the slice plane.
pub struct GlModel {
    base: ObjectBase,
    mesh: Rc<Mesh>,
}

impl GlModel {
    pub(super) fn new(base: ObjectBase, mesh: Rc<Mesh>) -> Self {
        Self { base, mesh }
    }

    /// Line width in pixels for the current outline width.
    fn line_width(&self) -> f32 {
        let opts = &self.base.opts().model;
        if opts.outline.get() {
            (opts.outline_width.get() * 10.0).round().max(1.0) as f32
        } else {
            1.0
        }
    }
}

impl Renderable for GlModel {
    fn base(&self) -> &ObjectBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ObjectBase {
        &mut self.base
    }

    fn shader_kind(&self) -> ShaderKind {
        ShaderKind::VertexColour
    }

    fn subscribe(&mut self) {
        let overlay = Rc::clone(&self.base.overlay);
        let opts = &overlay.display().model;
        self.base.watch(&opts.colour);
        self.base.watch(&opts.outline);
        self.base.watch(&opts.outline_width);
    }

    fn prepare(&mut self, _ctx: &mut RenderContext) -> Option<()> {
        (!self.mesh.triangles.is_empty()).then_some(())
    }

    fn draw_slice(&mut self, gl: &mut dyn GlContext, zpos: f64) {
        let [r, g, b, a] = self.base.opts().model.colour.get();
        let colour = [r, g, b, a * self.base.alpha()];
        let segments = plane_intersection(&self.mesh.vertices, &self.mesh.triangles, self.base.zax, zpos as f32);
        let vertices: Vec<Vertex> = segments
            .iter()
            .flat_map(|(p, q)| [Vertex::coloured(*p, colour), Vertex::coloured(*q, colour)])
            .collect();
        gl.set_line_width(self.line_width());
        gl.draw(Primitive::Lines, &vertices);
        gl.set_line_width(1.0);
    }

    fn release(&mut self, _ctx: &mut RenderContext) {}
}
