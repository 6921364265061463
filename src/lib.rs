//! Slice rendering for NIfTI volumes and triangle meshes.
//!
//! Overlays are held in an [`overlay::OverlayList`], each with observable
//! [`display::DisplayOptions`]. Canvases in [`canvas`] draw them through the
//! device abstraction in [`gl`], which caches textures and geometry and
//! regenerates them only when the options they depend on change.

pub mod canvas;
pub mod colourmaps;
pub mod config;
pub mod display;
pub mod gl;
pub mod io;
pub mod observable;
pub mod overlay;
pub mod transform;
pub mod volume;
