//! Slice and line geometry.

use nalgebra::Matrix4;
use ndarray::ArrayView4;

use super::context::Vertex;
use crate::transform::{transform_point, voxel_box_bounds};

/// The display axis perpendicular to `xax` and `yax`.
pub fn depth_axis(xax: usize, yax: usize) -> usize {
    debug_assert!(xax != yax && xax < 3 && yax < 3);
    3 - xax - yax
}

/// Screen axes for a canvas looking down `zax`.
pub fn screen_axes(zax: usize) -> (usize, usize) {
    match zax {
        0 => (1, 2),
        1 => (0, 2),
        _ => (0, 1),
    }
}

/// Vertices of one slice through a volume, six per sample cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SliceVertices {
    /// Display-space quad corners.
    pub positions: Vec<[f32; 3]>,
    /// Voxel coordinates of the sample point of each vertex's cell.
    pub voxels: Vec<[f32; 3]>,
    pub texcoords: Vec<[f32; 3]>,
}

impl SliceVertices {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn to_vertices(&self) -> Vec<Vertex> {
        self.positions
            .iter()
            .zip(&self.texcoords)
            .map(|(p, t)| Vertex::textured(*p, *t))
            .collect()
    }
}

/// Tile the display-space footprint of a volume on the plane at `zpos` with
/// cells of size `resolution`.
///
/// Every cell samples the volume at its centre: all six vertices of a cell
/// carry the texture coordinate of that point, so each cell shows one
/// texel. A zero extent along either screen axis gives no vertices.
pub fn generate_slice_vertices(
    shape: [usize; 3],
    xax: usize,
    yax: usize,
    zpos: f64,
    vox_to_display: &Matrix4<f64>,
    display_to_vox: &Matrix4<f64>,
    resolution: f64,
) -> SliceVertices {
    let zax = depth_axis(xax, yax);
    let mut out = SliceVertices::default();
    if shape.iter().any(|&s| s == 0) || !(resolution > 0.0) {
        return out;
    }

    let (lo, hi) = voxel_box_bounds(shape, vox_to_display);
    let (xlo, ylo) = (lo[xax], lo[yax]);
    let (xlen, ylen) = (hi[xax] - xlo, hi[yax] - ylo);
    let nx = (xlen / resolution).round() as usize;
    let ny = (ylen / resolution).round() as usize;
    if nx == 0 || ny == 0 {
        return out;
    }
    let (dx, dy) = (xlen / nx as f64, ylen / ny as f64);

    let point = |x: f64, y: f64| {
        let mut p = [0.0; 3];
        p[xax] = x;
        p[yax] = y;
        p[zax] = zpos;
        p
    };
    let f32s = |p: [f64; 3]| p.map(|v| v as f32);

    out.positions.reserve(nx * ny * 6);
    out.voxels.reserve(nx * ny * 6);
    out.texcoords.reserve(nx * ny * 6);

    for j in 0..ny {
        for i in 0..nx {
            let x0 = xlo + i as f64 * dx;
            let y0 = ylo + j as f64 * dy;
            let (x1, y1) = (x0 + dx, y0 + dy);

            let voxel = transform_point(display_to_vox, point(x0 + 0.5 * dx, y0 + 0.5 * dy));
            let mut texcoord = [0.0f32; 3];
            for ax in 0..3 {
                texcoord[ax] = ((voxel[ax] + 0.5) / shape[ax] as f64) as f32;
            }

            for (x, y) in [(x0, y0), (x1, y0), (x1, y1), (x0, y0), (x1, y1), (x0, y1)] {
                out.positions.push(f32s(point(x, y)));
                out.voxels.push(f32s(voxel));
                out.texcoords.push(texcoord);
            }
        }
    }
    out
}

/// The sampling resolution actually used: never finer than the finest voxel
/// dimension, unless a resolution limit allows going below it.
pub fn clamp_resolution(requested: f64, voxel_size: f64, limit: Option<f64>) -> f64 {
    let floor = limit.unwrap_or(voxel_size);
    if requested.is_finite() && requested > floor {
        requested
    } else {
        floor
    }
}

/// Per-axis subsampling step for image textures and line vectors.
pub fn subsample_steps(resolution: f64, voxel_dims: [f64; 3]) -> [usize; 3] {
    voxel_dims.map(|d| {
        let step = (resolution / d).floor();
        if step.is_finite() && step >= 1.0 {
            step as usize
        } else {
            1
        }
    })
}

/// One line per sampled voxel of a vector image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineVertices {
    /// Display-space endpoints, two per line.
    pub positions: Vec<[f32; 3]>,
    /// Voxel index of each line.
    pub voxels: Vec<[usize; 3]>,
    /// Raw vector of each line.
    pub vectors: Vec<[f32; 3]>,
}

impl LineVertices {
    pub fn lines(&self) -> usize {
        self.voxels.len()
    }
}

/// Scale applied to unit vectors so that lines span one voxel along the
/// voxel axis with the finest dimension.
pub fn line_scale(pixdim: [f64; 3]) -> [f32; 3] {
    let min = pixdim.iter().cloned().fold(f64::INFINITY, f64::min);
    pixdim.map(|d| (d / min) as f32)
}

/// Line endpoints in voxel coordinates for a vector at `voxel`. Directed
/// lines start at the voxel centre, others are centred on it.
pub fn line_endpoints(voxel: [usize; 3], vector: [f32; 3], scale: [f32; 3], directed: bool) -> Option<([f32; 3], [f32; 3])> {
    let len = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if !(len > 0.0) || !len.is_finite() {
        return None;
    }
    let centre = voxel.map(|v| v as f32);
    let mut offset = [0.0f32; 3];
    for ax in 0..3 {
        offset[ax] = 0.5 * vector[ax] / len / scale[ax];
    }
    let end = [centre[0] + offset[0], centre[1] + offset[1], centre[2] + offset[2]];
    let start = if directed {
        centre
    } else {
        [centre[0] - offset[0], centre[1] - offset[1], centre[2] - offset[2]]
    };
    Some((start, end))
}

/// Lines for every sampled voxel of `data`, an `(x, y, z, 3)` vector image.
/// Zero and non-finite vectors produce no line.
pub fn generate_line_vertices(
    data: ArrayView4<'_, f32>,
    pixdim: [f64; 3],
    vox_to_display: &Matrix4<f64>,
    directed: bool,
    steps: [usize; 3],
) -> LineVertices {
    let mut out = LineVertices::default();
    let shape = data.shape();
    if shape.len() != 4 || shape[3] < 3 {
        return out;
    }
    let scale = line_scale(pixdim);
    let to_display = |p: [f32; 3]| transform_point(vox_to_display, p.map(f64::from)).map(|v| v as f32);

    for z in (0..shape[2]).step_by(steps[2].max(1)) {
        for y in (0..shape[1]).step_by(steps[1].max(1)) {
            for x in (0..shape[0]).step_by(steps[0].max(1)) {
                let vector = [data[[x, y, z, 0]], data[[x, y, z, 1]], data[[x, y, z, 2]]];
                let Some((start, end)) = line_endpoints([x, y, z], vector, scale, directed) else {
                    continue;
                };
                out.positions.push(to_display(start));
                out.positions.push(to_display(end));
                out.voxels.push([x, y, z]);
                out.vectors.push(vector);
            }
        }
    }
    out
}

/// Voxel centres of the slice through a vector image at voxel index
/// `index` along voxel axis `axis`, two vertices per voxel for the vertex
/// stage to displace. Positions are voxel coordinates, `colour[0]` selects
/// the endpoint.
pub fn line_seed_vertices(shape: [usize; 3], axis: usize, index: usize, directed: bool, steps: [usize; 3]) -> Vec<Vertex> {
    let mut out = Vec::new();
    if index >= shape[axis] {
        return out;
    }
    let (a, b) = match axis {
        0 => (1, 2),
        1 => (0, 2),
        _ => (0, 1),
    };
    let start = if directed { 0.0 } else { -1.0 };
    for j in (0..shape[b]).step_by(steps[b].max(1)) {
        for i in (0..shape[a]).step_by(steps[a].max(1)) {
            let mut voxel = [0usize; 3];
            voxel[axis] = index;
            voxel[a] = i;
            voxel[b] = j;
            let position = voxel.map(|v| v as f32);
            let mut texcoord = [0.0f32; 3];
            for ax in 0..3 {
                texcoord[ax] = (voxel[ax] as f32 + 0.5) / shape[ax] as f32;
            }
            out.push(Vertex::new(position, texcoord, [start, 0.0, 0.0, 1.0]));
            out.push(Vertex::new(position, texcoord, [1.0, 0.0, 0.0, 1.0]));
        }
    }
    out
}

/// Segments where the plane `axis = pos` cuts a triangle mesh.
pub fn plane_intersection(vertices: &[[f32; 3]], triangles: &[[u32; 3]], axis: usize, pos: f32) -> Vec<([f32; 3], [f32; 3])> {
    let mut segments = Vec::new();
    for tri in triangles {
        let p = tri.map(|i| vertices[i as usize]);
        let mut hits: Vec<[f32; 3]> = Vec::with_capacity(2);
        for (a, b) in [(0, 1), (1, 2), (2, 0)] {
            let (da, db) = (p[a][axis] - pos, p[b][axis] - pos);
            if (da < 0.0) == (db < 0.0) || da == db {
                continue;
            }
            let t = da / (da - db);
            let mut hit = [0.0f32; 3];
            for ax in 0..3 {
                hit[ax] = p[a][ax] + (p[b][ax] - p[a][ax]) * t;
            }
            hits.push(hit);
        }
        if hits.len() == 2 {
            segments.push((hits[0], hits[1]));
        }
    }
    segments
}

/// The voxel axis that moves most along display axis `axis`.
pub fn aligned_voxel_axis(display_to_vox: &Matrix4<f64>, axis: usize) -> usize {
    let weight = |a: usize| display_to_vox[(a, axis)].abs();
    (0..3)
        .max_by(|&a, &b| weight(a).total_cmp(&weight(b)))
        .unwrap_or(axis)
}

/// The voxel axis most closely aligned with display axis `zax`, and the
/// index along it of the slice through the display point `centre`. `None`
/// when the slice lies outside the image.
pub fn slice_voxel_index(
    display_to_vox: &Matrix4<f64>,
    zax: usize,
    centre: [f64; 3],
    shape: [usize; 3],
) -> Option<(usize, usize)> {
    let axis = aligned_voxel_axis(display_to_vox, zax);
    let index = transform_point(display_to_vox, centre)[axis].round();
    if index < 0.0 || index >= shape[axis] as f64 {
        return None;
    }
    Some((axis, index as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    #[test]
    fn zero_extent_is_empty() {
        let id = Matrix4::identity();
        assert!(generate_slice_vertices([0, 10, 10], 0, 1, 0.0, &id, &id, 1.0).is_empty());
    }

    #[test]
    fn texcoords_sample_cell_centres() {
        let id = Matrix4::identity();
        let verts = generate_slice_vertices([2, 2, 2], 0, 1, 1.0, &id, &id, 1.0);
        assert_eq!(verts.len(), 24);
        assert_eq!(verts.texcoords[0], [0.25, 0.25, 0.75]);
        assert_eq!(verts.positions[0], [-0.5, -0.5, 1.0]);
        assert_eq!(verts.voxels[0], [0.0, 0.0, 1.0]);
    }

    #[test]
    fn resolution_clamping() {
        assert_eq!(clamp_resolution(0.5, 2.0, None), 2.0);
        assert_eq!(clamp_resolution(3.0, 2.0, None), 3.0);
        assert_eq!(clamp_resolution(0.5, 2.0, Some(0.25)), 0.5);
        assert_eq!(subsample_steps(4.0, [1.0, 2.0, 5.0]), [4, 2, 1]);
    }

    #[test]
    fn line_lengths_follow_pixdim() {
        let (start, end) = line_endpoints([0, 0, 0], [1.0, 0.0, 0.0], [2.0, 1.0, 1.0], false).unwrap();
        assert_eq!(start, [-0.25, 0.0, 0.0]);
        assert_eq!(end, [0.25, 0.0, 0.0]);
        let (start, _) = line_endpoints([1, 1, 1], [0.0, 3.0, 0.0], [1.0; 3], true).unwrap();
        assert_eq!(start, [1.0, 1.0, 1.0]);
        assert!(line_endpoints([0, 0, 0], [0.0; 3], [1.0; 3], true).is_none());
    }

    #[test]
    fn line_vertices_skip_empty_voxels_and_subsample() {
        let mut data = Array4::<f32>::zeros((4, 4, 1, 3));
        for x in 0..4 {
            for y in 0..4 {
                data[[x, y, 0, 0]] = 1.0;
            }
        }
        data[[0, 0, 0, 0]] = 0.0;
        let lines = generate_line_vertices(data.view(), [1.0; 3], &Matrix4::identity(), false, [1, 1, 1]);
        assert_eq!(lines.lines(), 15);
        assert_eq!(lines.positions.len(), 30);
        let lines = generate_line_vertices(data.view(), [1.0; 3], &Matrix4::identity(), false, [2, 2, 1]);
        assert_eq!(lines.lines(), 3);
    }

    #[test]
    fn mesh_plane_cut() {
        let vertices = [[0.0, 0.0, 0.0], [2.0, 0.0, 0.0], [0.0, 2.0, 2.0]];
        let segs = plane_intersection(&vertices, &[[0, 1, 2]], 2, 1.0);
        assert_eq!(segs.len(), 1);
        let (a, b) = segs[0];
        assert_eq!(a[2], 1.0);
        assert_eq!(b[2], 1.0);
        assert!(plane_intersection(&vertices, &[[0, 1, 2]], 2, 5.0).is_empty());
    }

    #[test]
    fn slice_index_picks_aligned_axis() {
        let m = crate::gl::context::axis_view(2, 0, 1);
        assert_eq!(slice_voxel_index(&m, 0, [3.0, 0.0, 0.0], [4, 4, 4]), Some((1, 3)));
        assert_eq!(slice_voxel_index(&m, 0, [9.0, 0.0, 0.0], [4, 4, 4]), None);
    }
}
