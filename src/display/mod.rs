//! Per-overlay display settings.
//!
//! Every field is an [`Observable`], so the rendering core can subscribe to
//! exactly the settings it depends on. Display range and brightness/contrast
//! are kept consistent with each other by a two-way link set up in
//! [`DisplayOptions::for_image`].

mod args;

use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};

use crate::colourmaps::{bricon_to_display_range, display_range_to_bricon, Rgb, Rgba};
use crate::observable::{Observable, Subscriptions};
use crate::transform::{Space, TransformCatalogue, TransformMode};
use crate::volume::Volume;

pub use args::{to_args, DisplayUpdate};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum OverlayType {
    Volume,
    Mask,
    #[value(name = "rgbvector")]
    RgbVector,
    #[value(name = "linevector")]
    LineVector,
    Label,
    Model,
}

impl OverlayType {
    /// Whether an overlay of this type can display an image with `nvols`
    /// volumes (`None` for a mesh).
    pub fn accepts(self, nvols: Option<usize>) -> bool {
        match (self, nvols) {
            (OverlayType::Model, None) => true,
            (OverlayType::Model, Some(_)) | (_, None) => false,
            (OverlayType::RgbVector | OverlayType::LineVector, Some(n)) => n == 3,
            (_, Some(_)) => true,
        }
    }
}

impl fmt::Display for OverlayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OverlayType::Volume => "volume",
            OverlayType::Mask => "mask",
            OverlayType::RgbVector => "rgbvector",
            OverlayType::LineVector => "linevector",
            OverlayType::Label => "label",
            OverlayType::Model => "model",
        };
        f.write_str(s)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    #[default]
    None,
    Linear,
    Spline,
}

/// What the display bounds are derived from.
#[derive(Debug, Clone)]
enum Geometry {
    Image {
        shape: [usize; 3],
        pixdim: [f64; 3],
        affine: Matrix4<f64>,
    },
    Mesh {
        lo: [f64; 3],
        hi: [f64; 3],
    },
}

pub struct VolumeOpts {
    pub display_range: Observable<(f64, f64)>,
    pub clipping_range: Observable<(f64, f64)>,
    pub invert_clipping: Observable<bool>,
    pub cmap: Observable<String>,
    pub negative_cmap: Observable<String>,
    pub use_negative_cmap: Observable<bool>,
    pub interpolation: Observable<Interpolation>,
    pub invert: Observable<bool>,
}

pub struct MaskOpts {
    pub threshold: Observable<(f64, f64)>,
    pub invert: Observable<bool>,
    pub colour: Observable<Rgba>,
}

pub struct VectorOpts {
    pub x_colour: Observable<Rgb>,
    pub y_colour: Observable<Rgb>,
    pub z_colour: Observable<Rgb>,
    pub suppress_x: Observable<bool>,
    pub suppress_y: Observable<bool>,
    pub suppress_z: Observable<bool>,
    /// Name of an overlay whose values modulate vector brightness.
    pub modulate: Observable<Option<String>>,
    /// Percentage of the modulation range below which voxels are hidden.
    pub mod_threshold: Observable<f64>,
}

pub struct LineVectorOpts {
    pub line_width: Observable<u32>,
    pub directed: Observable<bool>,
}

pub struct LabelOpts {
    pub lut: Observable<String>,
    pub outline: Observable<bool>,
    /// Fraction of a voxel, in `[0, 1]`.
    pub outline_width: Observable<f64>,
    pub show_names: Observable<bool>,
}

pub struct ModelOpts {
    pub colour: Observable<Rgba>,
    pub outline: Observable<bool>,
    pub outline_width: Observable<f64>,
    pub show_name: Observable<bool>,
}

/// The display settings of one overlay.
pub struct DisplayOptions {
    pub name: Observable<String>,
    pub overlay_type: Observable<OverlayType>,
    pub enabled: Observable<bool>,
    /// Percent.
    pub alpha: Observable<f64>,
    /// Percent, 50 is neutral.
    pub brightness: Observable<f64>,
    /// Percent, 50 is neutral.
    pub contrast: Observable<f64>,
    pub software_mode: Observable<bool>,
    pub transform: Observable<TransformMode>,
    /// Sampling resolution in display units.
    pub resolution: Observable<f64>,

    pub volume: VolumeOpts,
    pub mask: MaskOpts,
    pub vector: VectorOpts,
    pub line_vector: LineVectorOpts,
    pub label: LabelOpts,
    pub model: ModelOpts,

    geometry: Geometry,
    data_range: (f64, f64),
    catalogue: Rc<RefCell<TransformCatalogue>>,
    _links: Subscriptions,
}

impl DisplayOptions {
    fn base(
        name: &str,
        overlay_type: OverlayType,
        geometry: Geometry,
        data_range: (f64, f64),
        cmap: &str,
        resolution: f64,
    ) -> Self {
        let (pixdim, affine) = match &geometry {
            Geometry::Image { pixdim, affine, .. } => (*pixdim, *affine),
            Geometry::Mesh { .. } => ([1.0; 3], Matrix4::identity()),
        };
        let mode = TransformMode::default();
        let catalogue = Rc::new(RefCell::new(TransformCatalogue::new(pixdim, &affine, mode)));
        let (dmin, dmax) = data_range;

        Self {
            name: Observable::new(name.to_string()),
            overlay_type: Observable::new(overlay_type),
            enabled: Observable::new(true),
            alpha: Observable::new(100.0),
            brightness: Observable::new(50.0),
            contrast: Observable::new(50.0),
            software_mode: Observable::new(false),
            transform: Observable::new(mode),
            resolution: Observable::new(resolution),
            volume: VolumeOpts {
                display_range: Observable::new(data_range),
                clipping_range: Observable::new(data_range),
                invert_clipping: Observable::new(false),
                cmap: Observable::new(cmap.to_string()),
                negative_cmap: Observable::new("blue-lightblue".to_string()),
                use_negative_cmap: Observable::new(false),
                interpolation: Observable::new(Interpolation::None),
                invert: Observable::new(false),
            },
            mask: MaskOpts {
                threshold: Observable::new((dmin + 0.1 * (dmax - dmin), dmax)),
                invert: Observable::new(false),
                colour: Observable::new([1.0, 0.0, 0.0, 1.0]),
            },
            vector: VectorOpts {
                x_colour: Observable::new([1.0, 0.0, 0.0]),
                y_colour: Observable::new([0.0, 1.0, 0.0]),
                z_colour: Observable::new([0.0, 0.0, 1.0]),
                suppress_x: Observable::new(false),
                suppress_y: Observable::new(false),
                suppress_z: Observable::new(false),
                modulate: Observable::new(None),
                mod_threshold: Observable::new(0.0),
            },
            line_vector: LineVectorOpts {
                line_width: Observable::new(1),
                directed: Observable::new(false),
            },
            label: LabelOpts {
                lut: Observable::new("random".to_string()),
                outline: Observable::new(false),
                outline_width: Observable::new(0.25),
                show_names: Observable::new(false),
            },
            model: ModelOpts {
                colour: Observable::new([1.0, 0.0, 0.0, 1.0]),
                outline: Observable::new(false),
                outline_width: Observable::new(0.25),
                show_name: Observable::new(false),
            },
            geometry,
            data_range,
            catalogue,
            _links: Subscriptions::new(),
        }
    }

    /// Display settings for an image, shown as a volume with `cmap`.
    pub fn for_image(volume: &Volume, cmap: &str) -> Self {
        let geometry = Geometry::Image {
            shape: volume.shape(),
            pixdim: volume.pixdim(),
            affine: *volume.affine(),
        };
        let min_pixdim = volume.pixdim().iter().cloned().fold(f64::INFINITY, f64::min);
        let mut opts = Self::base(
            volume.name(),
            OverlayType::Volume,
            geometry,
            volume.data_range(),
            cmap,
            min_pixdim,
        );
        opts.link();
        opts
    }

    /// Display settings for a mesh whose vertices span `lo..hi`.
    pub fn for_mesh(name: &str, lo: [f64; 3], hi: [f64; 3]) -> Self {
        let mut opts = Self::base(
            name,
            OverlayType::Model,
            Geometry::Mesh { lo, hi },
            (0.0, 0.0),
            "greyscale",
            1.0,
        );
        opts.link();
        opts
    }

    /// Wire up the catalogue rebuild and the bricon/display range link.
    fn link(&mut self) {
        let mut subs = Subscriptions::new();

        if let Geometry::Image { pixdim, affine, .. } = &self.geometry {
            let (pixdim, affine) = (*pixdim, *affine);
            let catalogue = Rc::downgrade(&self.catalogue);
            subs.watch(&self.transform, move |mode| {
                if let Some(cat) = catalogue.upgrade() {
                    cat.borrow_mut().rebuild(pixdim, &affine, *mode);
                }
            });
        }

        let guard = Rc::new(Cell::new(false));
        let data_range = self.data_range;

        {
            let guard = Rc::clone(&guard);
            let brightness = self.brightness.downgrade();
            let contrast = self.contrast.downgrade();
            subs.watch(&self.volume.display_range, move |&(lo, hi)| {
                if guard.replace(true) {
                    return;
                }
                let (b, c) = display_range_to_bricon(data_range, (lo, hi));
                if let (Some(bo), Some(co)) = (brightness.upgrade(), contrast.upgrade()) {
                    bo.set(100.0 * b);
                    co.set(100.0 * c);
                }
                guard.set(false);
            });
        }

        for source in [&self.brightness, &self.contrast] {
            let guard = Rc::clone(&guard);
            let brightness = self.brightness.downgrade();
            let contrast = self.contrast.downgrade();
            let display_range = self.volume.display_range.downgrade();
            subs.watch(source, move |_| {
                if guard.replace(true) {
                    return;
                }
                if let (Some(bo), Some(co), Some(dr)) =
                    (brightness.upgrade(), contrast.upgrade(), display_range.upgrade())
                {
                    let range = bricon_to_display_range(data_range, bo.get() / 100.0, co.get() / 100.0);
                    dr.set(range);
                }
                guard.set(false);
            });
        }

        self._links = subs;
    }

    /// Minimum and maximum of the underlying image data.
    pub fn data_range(&self) -> (f64, f64) {
        self.data_range
    }

    /// Image shape, `None` for meshes.
    pub fn shape(&self) -> Option<[usize; 3]> {
        match self.geometry {
            Geometry::Image { shape, .. } => Some(shape),
            Geometry::Mesh { .. } => None,
        }
    }

    pub fn pixdim(&self) -> [f64; 3] {
        match self.geometry {
            Geometry::Image { pixdim, .. } => pixdim,
            Geometry::Mesh { .. } => [1.0; 3],
        }
    }

    pub fn transform_catalogue(&self) -> Ref<'_, TransformCatalogue> {
        self.catalogue.borrow()
    }

    pub fn get_transform(
        &self,
        from: Space,
        to: Space,
        override_mode: Option<TransformMode>,
    ) -> Matrix4<f64> {
        self.catalogue.borrow().transform_with(from, to, override_mode)
    }

    /// Bounding box of the overlay in display space.
    pub fn display_bounds(&self) -> ([f64; 3], [f64; 3]) {
        match &self.geometry {
            Geometry::Image { shape, .. } => self.catalogue.borrow().display_bounds(*shape),
            Geometry::Mesh { lo, hi } => (*lo, *hi),
        }
    }

    /// Size of the smallest voxel edge in display units.
    pub fn display_voxel_size(&self) -> f64 {
        match &self.geometry {
            Geometry::Mesh { .. } => 1.0,
            Geometry::Image { pixdim, affine, .. } => match self.transform.get() {
                TransformMode::Id => 1.0,
                TransformMode::Pixdim => pixdim.iter().cloned().fold(f64::INFINITY, f64::min),
                TransformMode::Affine => (0..3)
                    .map(|c| affine.fixed_view::<3, 1>(0, c).norm())
                    .fold(f64::INFINITY, f64::min),
            },
        }
    }

    /// Apply a batch of changes. When a batch carries both a display range
    /// and brightness/contrast, the display range wins.
    pub fn apply(&self, update: &DisplayUpdate) {
        let set = |obs: &Observable<f64>, v: Option<f64>, lo: f64, hi: f64| {
            if let Some(v) = v {
                obs.set(v.clamp(lo, hi));
            }
        };
        fn set_opt<T: Clone + PartialEq + 'static>(obs: &Observable<T>, v: &Option<T>) {
            if let Some(v) = v {
                obs.set(v.clone());
            }
        }

        set_opt(&self.name, &update.name);
        set_opt(&self.overlay_type, &update.overlay_type);
        set_opt(&self.enabled, &update.enabled);
        set(&self.alpha, update.alpha, 0.0, 100.0);
        set_opt(&self.software_mode, &update.software_mode);
        set_opt(&self.transform, &update.transform);
        if let Some(res) = update.resolution {
            if res > 0.0 {
                self.resolution.set(res);
            }
        }

        let bricon_given = update.brightness.is_some() || update.contrast.is_some();
        if bricon_given && update.display_range.is_some() {
            log::warn!(
                "{}: display range and brightness/contrast set together, using the display range",
                self.name.get()
            );
        }
        set(&self.brightness, update.brightness, 0.0, 100.0);
        set(&self.contrast, update.contrast, 0.0, 100.0);
        set_opt(&self.volume.display_range, &update.display_range.map(ordered));
        set_opt(&self.volume.clipping_range, &update.clipping_range.map(ordered));
        set_opt(&self.volume.invert_clipping, &update.invert_clipping);
        set_opt(&self.volume.cmap, &update.cmap);
        set_opt(&self.volume.negative_cmap, &update.negative_cmap);
        set_opt(&self.volume.use_negative_cmap, &update.use_negative_cmap);
        set_opt(&self.volume.interpolation, &update.interpolation);
        set_opt(&self.volume.invert, &update.invert);

        set_opt(&self.mask.threshold, &update.threshold.map(ordered));
        set_opt(&self.mask.invert, &update.mask_invert);
        set_opt(&self.mask.colour, &update.mask_colour);

        set_opt(&self.vector.x_colour, &update.x_colour);
        set_opt(&self.vector.y_colour, &update.y_colour);
        set_opt(&self.vector.z_colour, &update.z_colour);
        set_opt(&self.vector.suppress_x, &update.suppress_x);
        set_opt(&self.vector.suppress_y, &update.suppress_y);
        set_opt(&self.vector.suppress_z, &update.suppress_z);
        if let Some(m) = &update.modulate {
            let m = if m.is_empty() || m == "none" { None } else { Some(m.clone()) };
            self.vector.modulate.set(m);
        }
        set(&self.vector.mod_threshold, update.mod_threshold, 0.0, 100.0);

        if let Some(w) = update.line_width {
            self.line_vector.line_width.set(w.clamp(1, 10));
        }
        set_opt(&self.line_vector.directed, &update.directed);

        set_opt(&self.label.lut, &update.lut);
        set_opt(&self.label.outline, &update.label_outline);
        set(&self.label.outline_width, update.label_outline_width, 0.0, 1.0);
        set_opt(&self.label.show_names, &update.show_names);

        set_opt(&self.model.colour, &update.model_colour);
        set_opt(&self.model.outline, &update.model_outline);
        set(&self.model.outline_width, update.model_outline_width, 0.0, 1.0);
        set_opt(&self.model.show_name, &update.show_name);
    }
}

fn ordered((a, b): (f64, f64)) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl fmt::Debug for DisplayOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayOptions")
            .field("name", &self.name.get())
            .field("overlay_type", &self.overlay_type.get())
            .field("transform", &self.transform.get())
            .finish_non_exhaustive()
    }
}

/// Pick a single display-space location from optional world and voxel
/// inputs. A world location takes precedence over a voxel location.
pub fn resolve_location(
    opts: &DisplayOptions,
    world: Option<[f64; 3]>,
    voxel: Option<[f64; 3]>,
) -> Option<[f64; 3]> {
    use crate::transform::transform_point;
    if world.is_some() && voxel.is_some() {
        log::warn!("Both world and voxel locations given, using the world location");
    }
    match (world, voxel) {
        (Some(w), _) => Some(transform_point(
            &opts.get_transform(Space::World, Space::Display, None),
            w,
        )),
        (None, Some(v)) => Some(transform_point(
            &opts.get_transform(Space::Voxel, Space::Display, None),
            v,
        )),
        (None, None) => None,
    }
}
