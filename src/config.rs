//! Rendering configuration, read from a TOML file.
//!
//! ```toml
//! performance = 2
//! render_mode = "offscreen"
//! background = [0.0, 0.0, 0.0, 1.0]
//!
//! [colour_maps]
//! ice = [[0.0, 0.0, 0.2], [0.0, 0.6, 1.0], [1.0, 1.0, 1.0]]
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// How a canvas composites its overlays.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Every overlay draws straight into the canvas framebuffer.
    #[default]
    Onscreen,
    /// Every overlay draws into its own render texture, composited afterwards.
    Offscreen,
    /// Slices are pre-rendered into a shared texture stack and reused.
    Prerender,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    /// 1 = fixed function, 2 = ARB programs, 3 = GLSL. Caps the backend tier.
    pub performance: u8,

    /// Overrides the version string reported by the context.
    pub gl_version: Option<String>,

    /// Forces software mode on or off. Detected from the renderer string
    /// when unset.
    pub software_mode: Option<bool>,

    pub render_mode: RenderMode,

    /// Finest sampling resolution allowed, in display units. Defaults to the
    /// finest voxel dimension of each image.
    pub resolution_limit: Option<f64>,

    /// Number of entries in colour map textures.
    pub colour_resolution: usize,

    pub background: [f32; 4],

    pub cursor_colour: [f32; 4],

    /// Largest width or height of an off-screen render texture.
    pub max_render_texture_size: usize,

    /// Largest number of slices in a pre-rendered texture stack.
    pub max_prerender_slices: usize,

    /// Extra colour maps, as evenly spaced RGB colours. A name matching a
    /// built-in map replaces it.
    pub colour_maps: BTreeMap<String, Vec<[f32; 3]>>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            performance: 3,
            gl_version: None,
            software_mode: None,
            render_mode: RenderMode::Onscreen,
            resolution_limit: None,
            colour_resolution: 256,
            background: [0.0, 0.0, 0.0, 1.0],
            cursor_colour: [0.0, 1.0, 0.0, 1.0],
            max_render_texture_size: 2048,
            max_prerender_slices: 256,
            colour_maps: BTreeMap::new(),
        }
    }
}

impl RenderConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=3).contains(&self.performance) {
            bail!("performance must be 1, 2 or 3, got {}", self.performance);
        }
        if self.colour_resolution < 2 {
            bail!("colour_resolution must be at least 2");
        }
        if self.max_render_texture_size == 0 || self.max_prerender_slices == 0 {
            bail!("render texture limits must be positive");
        }
        if let Some((name, _)) = self.colour_maps.iter().find(|(_, c)| c.is_empty()) {
            bail!("colour map {name} has no colours");
        }
        if let Some(limit) = self.resolution_limit {
            if !(limit > 0.0) {
                bail!("resolution_limit must be positive, got {limit}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(RenderConfig::from_toml_str("").unwrap(), RenderConfig::default());
    }

    #[test]
    fn partial_file_overrides() {
        let config = RenderConfig::from_toml_str(
            "performance = 1\nrender_mode = \"prerender\"\nsoftware_mode = true\n",
        )
        .unwrap();
        assert_eq!(config.performance, 1);
        assert_eq!(config.render_mode, RenderMode::Prerender);
        assert_eq!(config.software_mode, Some(true));
        assert_eq!(config.colour_resolution, 256);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(RenderConfig::from_toml_str("performance = 7").is_err());
        assert!(RenderConfig::from_toml_str("no_such_key = 1").is_err());
        assert!(RenderConfig::from_toml_str("resolution_limit = -1.0").is_err());
        assert!(RenderConfig::from_toml_str("[colour_maps]\nempty = []").is_err());
    }

    #[test]
    fn colour_maps_table() {
        let config = RenderConfig::from_toml_str(
            "[colour_maps]\nice = [[0.0, 0.0, 0.2], [1.0, 1.0, 1.0]]\n",
        )
        .unwrap();
        assert_eq!(config.colour_maps["ice"], vec![[0.0, 0.0, 0.2], [1.0, 1.0, 1.0]]);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_prerender_slices = 12").unwrap();
        let config = RenderConfig::load(file.path()).unwrap();
        assert_eq!(config.max_prerender_slices, 12);
    }
}
