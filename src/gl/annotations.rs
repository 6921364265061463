//! Lines, rectangles and voxel highlights drawn over the overlays.
//!
//! Annotations queued with [`Annotations::line`], [`Annotations::rect`] or
//! [`Annotations::grid`] are drawn once, on the next frame. Persistent ones
//! stay until removed.

use nalgebra::Matrix4;

use crate::colourmaps::Rgba;
use crate::gl::context::{BlendMode, GlContext, Primitive, Vertex};
use crate::gl::routines::depth_axis;
use crate::transform::transform_point;

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// A segment between two display-space points.
    Line { from: [f64; 3], to: [f64; 3] },
    /// An axis-aligned rectangle on the screen axes, `[xlo, ylo]` to
    /// `[xhi, yhi]`, drawn on the current slice.
    Rect { lo: [f64; 2], hi: [f64; 2] },
    /// The outlines of the given voxels that intersect the current slice.
    VoxelGrid {
        voxels: Vec<[usize; 3]>,
        vox_to_display: Matrix4<f64>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub shape: Shape,
    pub colour: Rgba,
    pub width: f32,
}

impl Annotation {
    pub fn new(shape: Shape, colour: Rgba, width: f32) -> Self {
        Self { shape, colour, width }
    }

    /// Line vertices for the slice at `zpos` looking down the depth axis of
    /// `xax`/`yax`.
    fn vertices(&self, xax: usize, yax: usize, zpos: f64) -> Vec<Vertex> {
        let zax = depth_axis(xax, yax);
        let point = |x: f64, y: f64| {
            let mut p = [0.0f32; 3];
            p[xax] = x as f32;
            p[yax] = y as f32;
            p[zax] = zpos as f32;
            Vertex::coloured(p, self.colour)
        };
        let rect = |out: &mut Vec<Vertex>, lo: [f64; 2], hi: [f64; 2]| {
            let (bl, br) = (point(lo[0], lo[1]), point(hi[0], lo[1]));
            let (tl, tr) = (point(lo[0], hi[1]), point(hi[0], hi[1]));
            out.extend([bl, br, tl, tr, bl, tl, br, tr]);
        };

        let mut out = Vec::new();
        match &self.shape {
            Shape::Line { from, to } => {
                out.push(Vertex::coloured(from.map(|v| v as f32), self.colour));
                out.push(Vertex::coloured(to.map(|v| v as f32), self.colour));
            }
            Shape::Rect { lo, hi } => rect(&mut out, *lo, *hi),
            Shape::VoxelGrid { voxels, vox_to_display } => {
                for voxel in voxels {
                    let (lo, hi) = voxel_display_box(*voxel, vox_to_display);
                    if zpos < lo[zax] || zpos >= hi[zax] {
                        continue;
                    }
                    rect(&mut out, [lo[xax], lo[yax]], [hi[xax], hi[yax]]);
                }
            }
        }
        out
    }
}

/// Display-space bounding box of one voxel, whose centre sits at its
/// integer coordinates.
fn voxel_display_box(voxel: [usize; 3], vox_to_display: &Matrix4<f64>) -> ([f64; 3], [f64; 3]) {
    let mut lo = [f64::INFINITY; 3];
    let mut hi = [f64::NEG_INFINITY; 3];
    for corner in 0..8 {
        let mut p = [0.0; 3];
        for ax in 0..3 {
            let offset = if corner & (1 << ax) == 0 { -0.5 } else { 0.5 };
            p[ax] = voxel[ax] as f64 + offset;
        }
        let d = transform_point(vox_to_display, p);
        for ax in 0..3 {
            lo[ax] = lo[ax].min(d[ax]);
            hi[ax] = hi[ax].max(d[ax]);
        }
    }
    (lo, hi)
}

#[derive(Debug, Default)]
pub struct Annotations {
    transient: Vec<Annotation>,
    persistent: Vec<Annotation>,
}

impl Annotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&mut self, from: [f64; 3], to: [f64; 3], colour: Rgba, width: f32) {
        self.transient.push(Annotation::new(Shape::Line { from, to }, colour, width));
    }

    pub fn rect(&mut self, lo: [f64; 2], hi: [f64; 2], colour: Rgba, width: f32) {
        self.transient.push(Annotation::new(Shape::Rect { lo, hi }, colour, width));
    }

    pub fn grid(&mut self, voxels: Vec<[usize; 3]>, vox_to_display: Matrix4<f64>, colour: Rgba, width: f32) {
        let shape = Shape::VoxelGrid { voxels, vox_to_display };
        self.transient.push(Annotation::new(shape, colour, width));
    }

    /// Keep `annotation` until [`Annotations::remove`] or
    /// [`Annotations::clear`].
    pub fn persist(&mut self, annotation: Annotation) {
        self.persistent.push(annotation);
    }

    /// Remove a persistent annotation. Returns `false` if it was not there.
    pub fn remove(&mut self, annotation: &Annotation) -> bool {
        let before = self.persistent.len();
        self.persistent.retain(|a| a != annotation);
        self.persistent.len() != before
    }

    pub fn clear(&mut self) {
        self.transient.clear();
        self.persistent.clear();
    }

    /// Queued annotations, transient and persistent.
    pub fn len(&self) -> usize {
        self.transient.len() + self.persistent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Draw every annotation on the slice at `zpos` and drop the transient
    /// ones.
    pub fn draw(&mut self, gl: &mut dyn GlContext, xax: usize, yax: usize, zpos: f64) {
        gl.use_program(None);
        gl.bind_texture(0, None);
        gl.set_blend(BlendMode::Alpha);
        for annotation in self.persistent.iter().chain(&self.transient) {
            let vertices = annotation.vertices(xax, yax, zpos);
            gl.set_line_width(annotation.width);
            gl.draw(Primitive::Lines, &vertices);
        }
        gl.set_line_width(1.0);
        self.transient.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::context::ortho;
    use crate::gl::software::SoftwareContext;

    fn context() -> SoftwareContext {
        let mut gl = SoftwareContext::new(10, 10);
        gl.set_projection(ortho(0.0, 10.0, 0.0, 10.0));
        gl
    }

    #[test]
    fn transient_annotations_last_one_frame() {
        let mut gl = context();
        let mut ann = Annotations::new();
        ann.line([0.0, 5.5, 0.0], [10.0, 5.5, 0.0], [1.0, 0.0, 0.0, 1.0], 1.0);
        ann.persist(Annotation::new(
            Shape::Rect { lo: [1.0, 1.0], hi: [3.0, 3.0] },
            [0.0, 1.0, 0.0, 1.0],
            1.0,
        ));
        assert_eq!(ann.len(), 2);

        ann.draw(&mut gl, 0, 1, 0.0);
        assert_eq!(ann.len(), 1);
        let img = gl.read_pixels();
        assert_eq!(img.get_pixel(5, 4).0, [255, 0, 0, 255]);
    }

    #[test]
    fn voxel_grid_only_outlines_the_current_slice() {
        let grid = Annotation::new(
            Shape::VoxelGrid {
                voxels: vec![[1, 1, 1], [1, 1, 4]],
                vox_to_display: Matrix4::identity(),
            },
            [1.0; 4],
            1.0,
        );
        assert_eq!(grid.vertices(0, 1, 1.2).len(), 8);
        assert_eq!(grid.vertices(0, 1, 2.6).len(), 0);
    }

    #[test]
    fn remove_persistent() {
        let mut ann = Annotations::new();
        let a = Annotation::new(Shape::Rect { lo: [0.0; 2], hi: [1.0; 2] }, [1.0; 4], 2.0);
        ann.persist(a.clone());
        assert!(ann.remove(&a));
        assert!(!ann.remove(&a));
        assert!(ann.is_empty());
    }
}
