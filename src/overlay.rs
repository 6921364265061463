//! Overlays and the ordered overlay list.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Result};

use crate::colourmaps::ColourMapRegistry;
use crate::display::{DisplayOptions, DisplayUpdate, OverlayType};
use crate::observable::Observable;
use crate::volume::Volume;

static NEXT_OVERLAY_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverlayId(u64);

impl fmt::Display for OverlayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A triangle mesh, with vertices already in display space.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<[f32; 3]>,
    pub triangles: Vec<[u32; 3]>,
}

impl Mesh {
    pub fn new(vertices: Vec<[f32; 3]>, triangles: Vec<[u32; 3]>) -> Result<Self> {
        let n = vertices.len() as u32;
        if let Some(t) = triangles.iter().find(|t| t.iter().any(|&i| i >= n)) {
            bail!("triangle {t:?} refers to a vertex beyond {n}");
        }
        Ok(Self { vertices, triangles })
    }

    pub fn bounds(&self) -> ([f64; 3], [f64; 3]) {
        let mut lo = [f64::INFINITY; 3];
        let mut hi = [f64::NEG_INFINITY; 3];
        for v in &self.vertices {
            for ax in 0..3 {
                lo[ax] = lo[ax].min(v[ax] as f64);
                hi[ax] = hi[ax].max(v[ax] as f64);
            }
        }
        if self.vertices.is_empty() {
            ([0.0; 3], [0.0; 3])
        } else {
            (lo, hi)
        }
    }
}

pub enum OverlayData {
    Image(Rc<Volume>),
    Model(Rc<Mesh>),
}

pub struct Overlay {
    id: OverlayId,
    data: OverlayData,
    display: DisplayOptions,
}

impl Overlay {
    pub fn image(volume: Rc<Volume>, cmap: &str) -> Self {
        let display = DisplayOptions::for_image(&volume, cmap);
        Self::with_data(OverlayData::Image(volume), display)
    }

    pub fn model(name: &str, mesh: Rc<Mesh>) -> Self {
        let (lo, hi) = mesh.bounds();
        let display = DisplayOptions::for_mesh(name, lo, hi);
        Self::with_data(OverlayData::Model(mesh), display)
    }

    fn with_data(data: OverlayData, display: DisplayOptions) -> Self {
        Self {
            id: OverlayId(NEXT_OVERLAY_ID.fetch_add(1, Ordering::Relaxed)),
            data,
            display,
        }
    }

    pub fn id(&self) -> OverlayId {
        self.id
    }

    pub fn name(&self) -> String {
        self.display.name.get()
    }

    pub fn data(&self) -> &OverlayData {
        &self.data
    }

    pub fn volume(&self) -> Option<&Rc<Volume>> {
        match &self.data {
            OverlayData::Image(v) => Some(v),
            OverlayData::Model(_) => None,
        }
    }

    pub fn mesh(&self) -> Option<&Rc<Mesh>> {
        match &self.data {
            OverlayData::Model(m) => Some(m),
            OverlayData::Image(_) => None,
        }
    }

    pub fn display(&self) -> &DisplayOptions {
        &self.display
    }

    pub fn overlay_type(&self) -> OverlayType {
        self.display.overlay_type.get()
    }

    fn nvols(&self) -> Option<usize> {
        self.volume().map(|v| v.nvols())
    }

    /// Change how the overlay is displayed. Fails when the data cannot be
    /// shown as `overlay_type`.
    pub fn set_overlay_type(&self, overlay_type: OverlayType) -> Result<()> {
        if !overlay_type.accepts(self.nvols()) {
            bail!("{} cannot be displayed as {overlay_type}", self.name());
        }
        self.display.overlay_type.set(overlay_type);
        Ok(())
    }

    /// Apply a batch of display changes, validating the overlay type first.
    pub fn apply(&self, update: &DisplayUpdate) -> Result<()> {
        if let Some(t) = update.overlay_type {
            if !t.accepts(self.nvols()) {
                bail!("{} cannot be displayed as {t}", self.name());
            }
        }
        self.display.apply(update);
        Ok(())
    }
}

impl PartialEq for Overlay {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for Overlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Overlay")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("type", &self.overlay_type())
            .finish()
    }
}

/// The ordered set of overlays shown by every canvas. Index 0 is drawn
/// first, so later overlays appear on top.
#[derive(Clone, Default)]
pub struct OverlayList {
    overlays: Observable<Vec<Rc<Overlay>>>,
}

impl OverlayList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observable list, for subscribing to additions, removals and reorders.
    pub fn observable(&self) -> &Observable<Vec<Rc<Overlay>>> {
        &self.overlays
    }

    pub fn len(&self) -> usize {
        self.overlays.with(|o| o.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Rc<Overlay>> {
        self.overlays.with(|o| o.get(index).cloned())
    }

    pub fn snapshot(&self) -> Vec<Rc<Overlay>> {
        self.overlays.get()
    }

    pub fn find(&self, id: OverlayId) -> Option<Rc<Overlay>> {
        self.overlays
            .with(|o| o.iter().find(|ov| ov.id() == id).cloned())
    }

    pub fn find_by_name(&self, name: &str) -> Option<Rc<Overlay>> {
        self.overlays
            .with(|o| o.iter().find(|ov| ov.name() == name).cloned())
    }

    pub fn push(&self, overlay: Overlay) -> Rc<Overlay> {
        let overlay = Rc::new(overlay);
        let mut list = self.overlays.get();
        list.push(Rc::clone(&overlay));
        log::debug!("Overlay added: {:?}", overlay);
        self.overlays.set(list);
        overlay
    }

    /// Add an image. The first image is shown in greyscale, later ones
    /// take the next colour map from `colours`.
    pub fn add_image(&self, volume: Rc<Volume>, colours: &mut ColourMapRegistry) -> Rc<Overlay> {
        let cmap = if self.is_empty() {
            "greyscale"
        } else {
            colours.next_auto_cmap()
        };
        self.push(Overlay::image(volume, cmap))
    }

    pub fn remove(&self, id: OverlayId) -> Option<Rc<Overlay>> {
        let mut list = self.overlays.get();
        let idx = list.iter().position(|o| o.id() == id)?;
        let removed = list.remove(idx);
        log::debug!("Overlay removed: {:?}", removed);
        self.overlays.set(list);
        Some(removed)
    }

    /// Move an overlay to `index` in the drawing order.
    pub fn move_to(&self, id: OverlayId, index: usize) -> bool {
        let mut list = self.overlays.get();
        let Some(from) = list.iter().position(|o| o.id() == id) else {
            return false;
        };
        let overlay = list.remove(from);
        list.insert(index.min(list.len()), overlay);
        self.overlays.set(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Array4};

    fn scalar(name: &str) -> Rc<Volume> {
        Rc::new(Volume::from_3d(name, Array3::zeros((2, 2, 2)), [1.0; 3]).unwrap())
    }

    #[test]
    fn add_assigns_round_robin_cmaps() {
        let list = OverlayList::new();
        let mut colours = ColourMapRegistry::builtin();
        let a = list.add_image(scalar("a"), &mut colours);
        let b = list.add_image(scalar("b"), &mut colours);
        assert_eq!(a.display().volume.cmap.get(), "greyscale");
        assert_eq!(b.display().volume.cmap.get(), "red-yellow");
    }

    #[test]
    fn reorder_and_remove() {
        let list = OverlayList::new();
        let a = list.push(Overlay::image(scalar("a"), "greyscale"));
        let b = list.push(Overlay::image(scalar("b"), "greyscale"));
        assert!(list.move_to(b.id(), 0));
        assert_eq!(list.get(0).unwrap().id(), b.id());
        assert!(list.remove(a.id()).is_some());
        assert_eq!(list.len(), 1);
        assert!(list.remove(a.id()).is_none());
    }

    #[test]
    fn vector_types_need_three_volumes() {
        let scalar = Overlay::image(scalar("s"), "greyscale");
        assert!(scalar.set_overlay_type(OverlayType::RgbVector).is_err());
        assert!(scalar.set_overlay_type(OverlayType::Mask).is_ok());

        let data = Array4::<f32>::zeros((2, 2, 2, 3));
        let vol = Volume::new("v", data, [1.0; 3], nalgebra::Matrix4::identity()).unwrap();
        let vec = Overlay::image(Rc::new(vol), "greyscale");
        assert!(vec.set_overlay_type(OverlayType::LineVector).is_ok());
    }

    #[test]
    fn mesh_rejects_bad_indices() {
        assert!(Mesh::new(vec![[0.0; 3]; 3], vec![[0, 1, 3]]).is_err());
        let mesh = Mesh::new(vec![[0.0, 0.0, 0.0], [1.0, 2.0, 3.0], [0.0, 1.0, 0.0]], vec![[0, 1, 2]]).unwrap();
        assert_eq!(mesh.bounds(), ([0.0; 3], [1.0, 2.0, 3.0]));
    }
}
