use std::rc::Rc;

use super::rgbvector::{modulation_volume, vector_shading, watch_vector_options};
use super::{content_hash, scalar_texture, vector_texture, ObjectBase, Renderable};
use crate::gl::context::{Filter, GlContext, Primitive, Vertex};
use crate::gl::resources::CacheSlot;
use crate::gl::routines::{generate_line_vertices, line_scale, line_seed_vertices, slice_voxel_index, LineVertices};
use crate::gl::shaders::{units, Param, ShaderKind, VectorShading};
use crate::gl::{RenderContext, VertexCache};
use crate::volume::Volume;

/// Lines computed on the CPU, with what is needed to colour them.
struct CpuLines {
    lines: Rc<LineVertices>,
    shading: VectorShading,
    modulation: Option<Rc<Volume>>,
}

/// A vector image drawn as one line per voxel.
///
/// In software mode, or without programs, the lines are computed on the CPU
/// once and shared through the vertex cache. Otherwise the vertex stage
/// displaces voxel centres along the vectors read from a texture.
pub struct GlLineVector {
    base: ObjectBase,
    volume: Rc<Volume>,
    vectors: CacheSlot,
    modulation: CacheSlot,
    lines: CacheSlot,
    cpu: Option<CpuLines>,
    steps: [usize; 3],
}

impl GlLineVector {
    pub(super) fn new(base: ObjectBase, volume: Rc<Volume>) -> Self {
        Self {
            base,
            volume,
            vectors: CacheSlot::default(),
            modulation: CacheSlot::default(),
            lines: CacheSlot::default(),
            cpu: None,
            steps: [1; 3],
        }
    }

    fn uses_cpu(&self) -> bool {
        self.base.software_mode || self.base.program.is_none()
    }

    fn prepare_cpu(&mut self, ctx: &mut RenderContext, shading: VectorShading, modulation: Option<Rc<Volume>>) -> Option<()> {
        let gl = ctx.gl.as_mut();
        self.vectors.release(&mut ctx.resources.images, gl);
        self.modulation.release(&mut ctx.resources.images, gl);

        let key = format!("LineVertices_{}", self.base.overlay.id());
        let cache = &mut ctx.resources.vertices;
        let created = self.lines.hold(cache, gl, key.clone(), |_| VertexCache {
            lines: Rc::new(LineVertices::default()),
        });
        if !created {
            return None;
        }

        let opts = self.base.opts();
        let directed = opts.line_vector.directed.get();
        let steps = self.steps;
        let hash = content_hash(&(opts.transform.get(), steps, directed));
        let vox_to_display = self.base.vox_to_display();
        let volume = &self.volume;
        cache.refresh(gl, &key, hash, |entry, _| {
            let lines = generate_line_vertices(volume.data().view(), volume.pixdim(), &vox_to_display, directed, steps);
            log::debug!("{key}: generated {} lines", lines.lines());
            entry.lines = Rc::new(lines);
        });
        let lines = Rc::clone(&cache.get(gl, &key)?.lines);
        self.cpu = Some(CpuLines {
            lines,
            shading,
            modulation,
        });
        Some(())
    }

    fn prepare_gpu(&mut self, ctx: &mut RenderContext, shading: VectorShading, modulation: Option<Rc<Volume>>) -> Option<()> {
        self.cpu = None;
        self.lines.release(&mut ctx.resources.vertices, ctx.gl.as_mut());

        let steps = self.steps;
        let vectors = vector_texture(ctx, &mut self.vectors, &self.volume, steps, Filter::Nearest)?;
        self.base.units = vec![(units::DATA, vectors)];
        match &modulation {
            Some(m) => {
                let texture = scalar_texture(ctx, &mut self.modulation, m, steps, Filter::Nearest)?;
                self.base.units.push((units::MODULATION, texture));
            }
            None => self.modulation.release(&mut ctx.resources.images, ctx.gl.as_mut()),
        }

        let [sx, sy, sz] = line_scale(self.volume.pixdim());
        let mut params = shading.params();
        params.push((Param::LineScale, [sx, sy, sz, 0.0]));
        let gl = ctx.gl.as_mut();
        self.base.set_params(gl, &params);
        self.base.set_matrix(gl, Param::VoxToDisplay, &self.base.vox_to_display());
        Some(())
    }
}

impl Renderable for GlLineVector {
    fn base(&self) -> &ObjectBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ObjectBase {
        &mut self.base
    }

    fn shader_kind(&self) -> ShaderKind {
        if self.base.software_mode {
            ShaderKind::VertexColour
        } else {
            ShaderKind::LineVector
        }
    }

    fn subscribe(&mut self) {
        watch_vector_options(&mut self.base);
        let overlay = Rc::clone(&self.base.overlay);
        let opts = &overlay.display().line_vector;
        self.base.watch_geometry(&opts.directed);
        self.base.watch(&opts.line_width);
    }

    fn prepare(&mut self, ctx: &mut RenderContext) -> Option<()> {
        let modulation = modulation_volume(&self.base, &self.volume);
        let shading = vector_shading(&self.base, modulation.as_deref());
        self.steps = self.base.steps();
        if self.uses_cpu() {
            self.prepare_cpu(ctx, shading, modulation)
        } else {
            self.prepare_gpu(ctx, shading, modulation)
        }
    }

    fn draw_slice(&mut self, gl: &mut dyn GlContext, zpos: f64) {
        let shape = self.volume.shape();
        let centre = self.base.slice_centre(zpos);
        let Some((axis, index)) = slice_voxel_index(&self.base.display_to_vox(), self.base.zax, centre, shape) else {
            return;
        };
        let step = self.steps[axis].max(1);
        let index = index - index % step;

        gl.set_line_width(self.base.opts().line_vector.line_width.get() as f32);
        match &self.cpu {
            Some(cpu) => {
                let lines = &cpu.lines;
                let modulation = cpu.modulation.as_ref().map(|m| m.current_data());
                let mut vertices = Vec::new();
                for (i, voxel) in lines.voxels.iter().enumerate() {
                    if voxel[axis] != index {
                        continue;
                    }
                    let value = modulation.as_ref().map(|m| m[*voxel]);
                    let Some(colour) = cpu.shading.colour(lines.vectors[i], value) else {
                        continue;
                    };
                    vertices.push(Vertex::coloured(lines.positions[2 * i], colour));
                    vertices.push(Vertex::coloured(lines.positions[2 * i + 1], colour));
                }
                gl.draw(Primitive::Lines, &vertices);
            }
            None => {
                let directed = self.base.opts().line_vector.directed.get();
                let seeds = line_seed_vertices(shape, axis, index, directed, self.steps);
                gl.draw(Primitive::Lines, &seeds);
            }
        }
        gl.set_line_width(1.0);
    }

    fn release(&mut self, ctx: &mut RenderContext) {
        let gl = ctx.gl.as_mut();
        self.vectors.release(&mut ctx.resources.images, gl);
        self.modulation.release(&mut ctx.resources.images, gl);
        self.lines.release(&mut ctx.resources.vertices, gl);
        self.cpu = None;
    }
}
