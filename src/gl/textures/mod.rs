//! Texture types: image data, colour maps, label lookup tables and render
//! targets.

mod colourmap;
mod image;
mod lut;
mod render_texture;
mod stack;

pub use self::colourmap::{display_range_xform, ColourMapSettings, ColourMapTexture};
pub use self::image::{ImageRepr, ImageTexture};
pub use self::lut::{lut_hash, LookupTableTexture};
pub use self::render_texture::{target_view, Rect, RenderTexture, SavedTarget};
pub use self::stack::RenderTextureStack;
