use nalgebra::Matrix4;

use super::{
    display_to_pixel, fill, fit_aspect, overlay_bounds, pixel_to_display, screen_translation, Compositor,
    Frame,
};
use crate::config::RenderMode;
use crate::gl::annotations::Annotations;
use crate::gl::context::ortho;
use crate::gl::textures::{target_view, Rect};
use crate::gl::RenderContext;
use crate::observable::DirtyFlag;
use crate::overlay::OverlayList;

const GRID_COLOUR: [f32; 4] = [0.3, 0.9, 1.0, 0.8];
const GRID_WIDTH: f32 = 2.0;

/// Slice grid geometry for the current overlays and settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Layout {
    /// Overlay bounds on the screen axes; the size of one grid cell.
    pub cell: Rect,
    /// Depth range the slices are taken from.
    pub zrange: (f64, f64),
    pub nslices: usize,
    pub total_rows: usize,
}

/// Many evenly spaced slices laid out in a grid, `ncols` across, of which
/// `nrows` rows are on screen starting at `top_row`.
pub struct LightBoxCanvas {
    compositor: Compositor,
    viewport: (i32, i32, usize, usize),
    pos: [f64; 3],
    slice_spacing: f64,
    ncols: usize,
    nrows: usize,
    top_row: usize,
    zrange: Option<(f64, f64)>,
    show_grid_lines: bool,
    show_cursor: bool,
    annotations: Annotations,
    redraw: DirtyFlag,
}

impl LightBoxCanvas {
    pub fn new(overlays: OverlayList, zax: usize, mode: RenderMode) -> Self {
        let redraw = DirtyFlag::new(true);
        Self {
            compositor: Compositor::new(overlays, zax, mode, redraw.clone()),
            viewport: (0, 0, 1, 1),
            pos: [0.0; 3],
            slice_spacing: 1.0,
            ncols: 5,
            nrows: 4,
            top_row: 0,
            zrange: None,
            show_grid_lines: false,
            show_cursor: true,
            annotations: Annotations::new(),
            redraw,
        }
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    pub fn annotations(&mut self) -> &mut Annotations {
        &mut self.annotations
    }

    pub fn axes(&self) -> (usize, usize, usize) {
        self.compositor.axes()
    }

    pub fn needs_redraw(&self) -> bool {
        self.redraw.is_raised()
    }

    pub fn set_viewport(&mut self, x: i32, y: i32, width: usize, height: usize) {
        if self.viewport != (x, y, width, height) {
            self.viewport = (x, y, width, height);
            self.redraw.raise();
        }
    }

    pub fn slice_spacing(&self) -> f64 {
        self.slice_spacing
    }

    /// Distance between slices in display units, between 0.1 and 30.
    pub fn set_slice_spacing(&mut self, spacing: f64) {
        self.slice_spacing = spacing.clamp(0.1, 30.0);
        self.clamp_top_row();
        self.redraw.raise();
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn set_ncols(&mut self, ncols: usize) {
        self.ncols = ncols.clamp(1, 20);
        self.clamp_top_row();
        self.redraw.raise();
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn set_nrows(&mut self, nrows: usize) {
        self.nrows = nrows.clamp(1, 20);
        self.clamp_top_row();
        self.redraw.raise();
    }

    pub fn top_row(&self) -> usize {
        self.top_row
    }

    /// Scroll so `row` is the first row on screen.
    pub fn set_top_row(&mut self, row: usize) {
        self.top_row = row;
        self.clamp_top_row();
        self.redraw.raise();
    }

    /// Restrict the slices to a depth range. `None` covers every overlay.
    pub fn set_zrange(&mut self, zrange: Option<(f64, f64)>) {
        self.zrange = zrange;
        self.clamp_top_row();
        self.redraw.raise();
    }

    pub fn set_show_grid_lines(&mut self, show: bool) {
        self.show_grid_lines = show;
        self.redraw.raise();
    }

    pub fn set_show_cursor(&mut self, show: bool) {
        self.show_cursor = show;
        self.redraw.raise();
    }

    pub fn set_render_mode(&mut self, ctx: &mut RenderContext, mode: RenderMode) {
        self.compositor.set_render_mode(ctx, mode);
    }

    pub fn set_zax(&mut self, ctx: &mut RenderContext, zax: usize) {
        self.compositor.set_zax(ctx, zax);
        self.top_row = 0;
        self.clamp_top_row();
    }

    pub fn pos(&self) -> [f64; 3] {
        self.pos
    }

    /// Move the cursor. When its slice is scrolled out of view, the row
    /// holding it becomes the top row.
    pub fn set_pos(&mut self, pos: [f64; 3]) {
        if pos == self.pos {
            return;
        }
        let (_, _, zax) = self.axes();
        let moved_z = pos[zax] != self.pos[zax];
        self.pos = pos;
        if moved_z {
            if let Some(slice) = self.slice_at(pos[zax]) {
                if !self.visible_slices().contains(&slice) {
                    self.top_row = slice / self.ncols;
                    self.clamp_top_row();
                }
            }
        }
        self.redraw.raise();
    }

    /// Grid geometry, or `None` with no overlays.
    pub fn layout(&self) -> Option<Layout> {
        let (xax, yax, zax) = self.axes();
        let (lo, hi) = overlay_bounds(self.compositor.overlays())?;
        let zrange = match self.zrange {
            None => (lo[zax], hi[zax]),
            Some((zlo, zhi)) => {
                let zlo = zlo.clamp(lo[zax], hi[zax]);
                (zlo, zhi.clamp(zlo, hi[zax]))
            }
        };
        let nslices = ((zrange.1 - zrange.0) / self.slice_spacing).floor().max(0.0) as usize;
        Some(Layout {
            cell: Rect::new(lo[xax], hi[xax], lo[yax], hi[yax]),
            zrange,
            nslices,
            total_rows: nslices.div_ceil(self.ncols),
        })
    }

    fn clamp_top_row(&mut self) {
        let max = self
            .layout()
            .map_or(0, |l| l.total_rows.saturating_sub(self.nrows));
        self.top_row = self.top_row.min(max);
    }

    /// Depth of slice `index`.
    pub fn slice_zpos(&self, index: usize) -> Option<f64> {
        let layout = self.layout()?;
        (index < layout.nslices).then(|| layout.zrange.0 + self.slice_spacing * (index as f64 + 0.5))
    }

    /// Slice holding depth `zpos`.
    pub fn slice_at(&self, zpos: f64) -> Option<usize> {
        let layout = self.layout()?;
        if zpos < layout.zrange.0 {
            return None;
        }
        let index = ((zpos - layout.zrange.0) / self.slice_spacing).floor() as usize;
        (index < layout.nslices).then_some(index)
    }

    /// Slices on screen.
    pub fn visible_slices(&self) -> std::ops::Range<usize> {
        let Some(layout) = self.layout() else {
            return 0..0;
        };
        let start = (self.ncols * self.top_row).min(layout.nslices);
        start..(start + self.nrows * self.ncols).min(layout.nslices)
    }

    /// Grid row and column of a slice.
    fn cell_of(&self, index: usize) -> (usize, usize) {
        (index / self.ncols, index % self.ncols)
    }

    /// Offset moving a slice from its own position to its grid cell.
    fn cell_offset(&self, layout: &Layout, index: usize) -> (f64, f64) {
        let (row, col) = self.cell_of(index);
        let dx = layout.cell.width() * col as f64;
        let dy = layout.cell.height() * (layout.total_rows - row - 1) as f64;
        (dx, dy)
    }

    /// Display-space transform placing slice `index` in its cell.
    pub fn slice_xform(&self, index: usize) -> Option<Matrix4<f64>> {
        let layout = self.layout()?;
        if index >= layout.nslices {
            return None;
        }
        let (xax, yax, _) = self.axes();
        let (dx, dy) = self.cell_offset(&layout, index);
        Some(screen_translation(xax, yax, dx, dy))
    }

    /// The visible rows of the grid, before fitting to the viewport.
    fn grid_bounds(&self, layout: &Layout) -> Rect {
        let cell = layout.cell;
        let offset = layout.total_rows as f64 - self.nrows as f64 - self.top_row as f64;
        let ylo = cell.ylo + cell.height() * offset;
        Rect::new(
            cell.xlo,
            cell.xlo + cell.width() * self.ncols as f64,
            ylo,
            ylo + cell.height() * self.nrows as f64,
        )
    }

    /// The display area shown, fitted to the viewport.
    pub fn display_bounds(&self) -> Option<Rect> {
        let layout = self.layout()?;
        let (_, _, w, h) = self.viewport;
        Some(fit_aspect(self.grid_bounds(&layout), w, h))
    }

    /// The position in the overlays under a pixel, measured from the bottom
    /// left corner, or `None` off the grid.
    pub fn canvas_to_world(&self, px: f64, py: f64) -> Option<[f64; 3]> {
        let layout = self.layout()?;
        let (_, _, w, h) = self.viewport;
        let (x, y) = pixel_to_display(self.display_bounds()?, w, h, px, py)?;
        let cell = layout.cell;
        if cell.is_empty() || x < cell.xlo || x >= cell.xlo + cell.width() * self.ncols as f64 {
            return None;
        }
        let col = ((x - cell.xlo) / cell.width()).floor() as usize;
        let from_bottom = ((y - cell.ylo) / cell.height()).floor();
        if from_bottom < 0.0 || from_bottom >= layout.total_rows as f64 {
            return None;
        }
        let row = layout.total_rows - 1 - from_bottom as usize;
        let index = row * self.ncols + col;
        let zpos = self.slice_zpos(index)?;
        let (dx, dy) = self.cell_offset(&layout, index);

        let (xax, yax, zax) = self.axes();
        let mut pos = [0.0; 3];
        pos[xax] = x - dx;
        pos[yax] = y - dy;
        pos[zax] = zpos;
        Some(pos)
    }

    /// Pixel showing `pos`, or `None` when its slice is not in the grid.
    pub fn world_to_canvas(&self, pos: [f64; 3]) -> Option<(f64, f64)> {
        let layout = self.layout()?;
        let (xax, yax, zax) = self.axes();
        let index = self.slice_at(pos[zax])?;
        let (dx, dy) = self.cell_offset(&layout, index);
        let (_, _, w, h) = self.viewport;
        display_to_pixel(self.display_bounds()?, w, h, pos[xax] + dx, pos[yax] + dy)
    }

    fn queue_grid_lines(&mut self, layout: &Layout, view: Rect) {
        let (xax, yax, zax) = self.axes();
        let grid = self.grid_bounds(layout);
        let slices = self.visible_slices();
        if slices.is_empty() {
            return;
        }
        let point = |x: f64, y: f64| {
            let mut p = [0.0; 3];
            p[xax] = x;
            p[yax] = y;
            p[zax] = self.pos[zax];
            p
        };
        let cell = layout.cell;
        let rows = slices.len().div_ceil(self.ncols);
        let cols = self.ncols.min(slices.len());
        let top = grid.yhi;
        let bottom = top - cell.height() * rows as f64;
        let right = grid.xlo + cell.width() * cols as f64;

        let mut lines = Vec::new();
        for r in 1..rows {
            let y = top - cell.height() * r as f64;
            lines.push((point(grid.xlo, y), point(right.min(view.xhi), y)));
        }
        for c in 1..cols {
            let x = grid.xlo + cell.width() * c as f64;
            lines.push((point(x, bottom), point(x, top)));
        }
        for (from, to) in lines {
            self.annotations.line(from, to, GRID_COLOUR, GRID_WIDTH);
        }
    }

    /// Crosshair limited to the cell showing the cursor's slice.
    fn queue_cursor(&mut self, layout: &Layout, colour: [f32; 4]) {
        let (xax, yax, zax) = self.axes();
        let Some(index) = self.slice_at(self.pos[zax]) else {
            return;
        };
        if !self.visible_slices().contains(&index) {
            return;
        }
        let (dx, dy) = self.cell_offset(layout, index);
        let cell = layout.cell;
        let (x, y) = (self.pos[xax] + dx, self.pos[yax] + dy);
        let point = |x: f64, y: f64| {
            let mut p = [0.0; 3];
            p[xax] = x;
            p[yax] = y;
            p[zax] = self.pos[zax];
            p
        };
        let horizontal = (point(cell.xlo + dx, y), point(cell.xhi + dx, y));
        let vertical = (point(x, cell.ylo + dy), point(x, cell.yhi + dy));
        self.annotations.line(horizontal.0, horizontal.1, colour, 1.0);
        self.annotations.line(vertical.0, vertical.1, colour, 1.0);
    }

    pub fn draw(&mut self, ctx: &mut RenderContext) {
        if !ctx.gl.is_current() {
            return;
        }
        let (x, y, w, h) = self.viewport;
        let (xax, yax, zax) = self.axes();
        let background = ctx.config().background;
        let cursor = ctx.config().cursor_colour;
        ctx.gl.viewport(x, y, w, h);

        let (Some(layout), Some(view)) = (self.layout(), self.display_bounds()) else {
            self.compositor.reconcile(ctx);
            ctx.gl.set_projection(ortho(0.0, 1.0, 0.0, 1.0));
            ctx.gl.set_modelview(target_view(zax));
            fill(ctx.gl.as_mut(), zax, Rect::new(0.0, 1.0, 0.0, 1.0), 0.0, background);
            self.redraw.take();
            return;
        };
        ctx.gl.set_projection(ortho(view.xlo, view.xhi, view.ylo, view.yhi));
        ctx.gl.set_modelview(target_view(zax));
        fill(ctx.gl.as_mut(), zax, view, self.pos[zax], background);

        let slices = self.visible_slices();
        let zposes: Vec<f64> = slices.clone().filter_map(|i| self.slice_zpos(i)).collect();
        let xforms: Vec<Matrix4<f64>> = slices.filter_map(|i| self.slice_xform(i)).collect();
        let frame = Frame {
            zposes: &zposes,
            xforms: &xforms,
            view,
            target_bounds: Some(view),
        };
        self.compositor.draw(ctx, &frame);

        if self.show_grid_lines {
            self.queue_grid_lines(&layout, view);
        }
        if self.show_cursor {
            self.queue_cursor(&layout, cursor);
        }
        self.annotations.draw(ctx.gl.as_mut(), xax, yax, self.pos[zax]);
        self.redraw.take();
    }

    pub fn destroy(&mut self, ctx: &mut RenderContext) {
        self.compositor.destroy(ctx);
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use float_eq::assert_float_eq;
    use ndarray::Array3;
    use rstest::rstest;

    use super::*;
    use crate::overlay::Overlay;
    use crate::volume::Volume;

    /// A 10x10x10 image, bounds -0.5..9.5 on every axis.
    fn lightbox() -> LightBoxCanvas {
        let list = OverlayList::new();
        let volume = Volume::from_3d("img", Array3::zeros((10, 10, 10)), [1.0; 3]).unwrap();
        list.push(Overlay::image(Rc::new(volume), "greyscale"));
        let mut lb = LightBoxCanvas::new(list, 2, RenderMode::Onscreen);
        lb.set_viewport(0, 0, 100, 100);
        lb
    }

    #[test]
    fn layout_counts_slices_and_rows() {
        let mut lb = lightbox();
        let layout = lb.layout().unwrap();
        assert_eq!(layout.nslices, 10);
        assert_eq!(layout.total_rows, 2);

        lb.set_slice_spacing(3.0);
        assert_eq!(lb.layout().unwrap().nslices, 3);
        assert_eq!(lb.layout().unwrap().total_rows, 1);

        lb.set_slice_spacing(100.0);
        assert_eq!(lb.slice_spacing(), 30.0);
        lb.set_ncols(0);
        assert_eq!(lb.ncols(), 1);
    }

    #[test]
    fn slices_sit_at_their_centres() {
        let lb = lightbox();
        assert_float_eq!(lb.slice_zpos(0).unwrap(), 0.0, abs <= 1e-9);
        assert_float_eq!(lb.slice_zpos(9).unwrap(), 9.0, abs <= 1e-9);
        assert!(lb.slice_zpos(10).is_none());
        assert_eq!(lb.slice_at(3.2), Some(3));
        assert_eq!(lb.slice_at(-1.0), None);
    }

    #[test]
    fn zrange_limits_the_slices() {
        let mut lb = lightbox();
        lb.set_zrange(Some((2.5, 6.5)));
        assert_eq!(lb.layout().unwrap().nslices, 4);
        assert_float_eq!(lb.slice_zpos(0).unwrap(), 3.0, abs <= 1e-9);
        assert_eq!(lb.slice_at(2.0), None);

        lb.set_zrange(Some((-20.0, 3.5)));
        assert_eq!(lb.layout().unwrap().zrange, (-0.5, 3.5));
        assert_float_eq!(lb.slice_zpos(0).unwrap(), 0.0, abs <= 1e-9);

        lb.set_zrange(None);
        assert_eq!(lb.layout().unwrap().nslices, 10);
    }

    #[rstest(index, dx, dy, case(0, 0.0, 10.0), case(4, 40.0, 10.0), case(5, 0.0, 0.0), case(7, 20.0, 0.0))]
    fn slices_are_translated_into_their_cells(index: usize, dx: f64, dy: f64) {
        let lb = lightbox();
        let m = lb.slice_xform(index).unwrap();
        assert_float_eq!(m[(0, 3)], dx, abs <= 1e-9);
        assert_float_eq!(m[(1, 3)], dy, abs <= 1e-9);
        assert_float_eq!(m[(2, 3)], 0.0, abs <= 1e-9);
    }

    #[test]
    fn visible_rows_follow_scrolling() {
        let mut lb = lightbox();
        lb.set_nrows(1);
        assert_eq!(lb.visible_slices(), 0..5);
        lb.set_top_row(1);
        assert_eq!(lb.visible_slices(), 5..10);
        lb.set_top_row(7);
        assert_eq!(lb.top_row(), 1);

        let b = lb.display_bounds().unwrap();
        assert_float_eq!(b.width(), 50.0, abs <= 1e-9);
        assert_float_eq!(b.height(), 50.0, abs <= 1e-9);
    }

    #[test]
    fn top_row_follows_the_cursor() {
        let mut lb = lightbox();
        lb.set_nrows(1);
        lb.set_pos([1.0, 1.0, 8.0]);
        assert_eq!(lb.top_row(), 1);
        lb.set_pos([1.0, 1.0, 0.0]);
        assert_eq!(lb.top_row(), 0);
        lb.set_pos([1.0, 1.0, 3.0]);
        assert_eq!(lb.top_row(), 0);
    }

    #[test]
    fn canvas_and_world_coordinates_agree() {
        let mut lb = lightbox();
        lb.set_nrows(2);
        lb.set_pos([2.0, 3.0, 7.0]);
        let (px, py) = lb.world_to_canvas([2.0, 3.0, 7.0]).unwrap();
        let world = lb.canvas_to_world(px, py).unwrap();
        assert_float_eq!(world[0], 2.0, abs <= 1e-9);
        assert_float_eq!(world[1], 3.0, abs <= 1e-9);
        assert_float_eq!(world[2], 7.0, abs <= 1e-9);

        assert!(lb.canvas_to_world(-10.0, 50.0).is_none());
    }
}
