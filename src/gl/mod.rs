//! The rendering core: device abstraction, capability bootstrap, resource
//! caches and everything that draws overlays.

pub mod annotations;
pub mod backend;
pub mod context;
pub mod globject;
pub mod resources;
pub mod routines;
pub mod shaders;
pub mod software;
pub mod textures;

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::colourmaps::{ColourMap, ColourMapRegistry};
use crate::config::RenderConfig;

use self::backend::Renderer;
use self::context::{parse_version, Capabilities, GlContext};
use self::resources::{GlResource, ResourceCache};
use self::routines::LineVertices;
use self::textures::{ColourMapTexture, ImageTexture, LookupTableTexture, RenderTextureStack};

/// Rendering capability tiers, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    FixedFunction,
    Arb,
    Glsl,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tier::FixedFunction => "fixed-function",
            Tier::Arb => "ARB program",
            Tier::Glsl => "GLSL",
        })
    }
}

/// Pick the best tier the device supports, capped by the user's
/// performance setting (1 = fixed function, 2 = ARB, 3 = GLSL).
pub fn select_tier(caps: &Capabilities, version_override: Option<&str>, performance: u8) -> Tier {
    let version = version_override
        .and_then(parse_version)
        .or_else(|| caps.version_number())
        .unwrap_or((1, 0));
    let fbo = version >= (3, 0) || caps.has_extension("GL_EXT_framebuffer_object");
    let arb = version >= (1, 4)
        && caps.has_extension("GL_ARB_vertex_program")
        && caps.has_extension("GL_ARB_fragment_program");

    let supported = if version >= (2, 1) && fbo {
        Tier::Glsl
    } else if arb {
        Tier::Arb
    } else {
        Tier::FixedFunction
    };
    let cap = match performance {
        0 | 1 => Tier::FixedFunction,
        2 => Tier::Arb,
        _ => Tier::Glsl,
    };
    if cap < supported {
        log::info!("Performance setting {performance} limits rendering to {cap} (device supports {supported})");
    }
    supported.min(cap)
}

/// Stable hash of anything hashable, used to gate cache regeneration.
pub fn content_hash<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// CPU-side line vectors, cached like any other resource.
pub struct VertexCache {
    pub lines: Rc<LineVertices>,
}

impl GlResource for VertexCache {
    fn destroy(&mut self, _gl: &mut dyn GlContext) {}
}

/// The shared resource caches.
#[derive(Default)]
pub struct Resources {
    pub images: ResourceCache<ImageTexture>,
    pub colour_maps: ResourceCache<ColourMapTexture>,
    pub luts: ResourceCache<LookupTableTexture>,
    pub vertices: ResourceCache<VertexCache>,
}

impl Resources {
    pub fn len(&self) -> usize {
        self.images.len() + self.colour_maps.len() + self.luts.len() + self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self, gl: &mut dyn GlContext) {
        self.images.clear(gl);
        self.colour_maps.clear(gl);
        self.luts.clear(gl);
        self.vertices.clear(gl);
    }
}

/// Everything shared by the canvases drawing into one device: the device
/// itself, the renderer chosen for it, the resource caches and settings.
pub struct RenderContext {
    pub gl: Box<dyn GlContext>,
    pub resources: Resources,
    pub stacks: ResourceCache<RenderTextureStack>,
    pub colours: ColourMapRegistry,
    config: RenderConfig,
    renderer: Rc<dyn Renderer>,
    software_mode: bool,
}

impl RenderContext {
    pub fn new(gl: Box<dyn GlContext>, config: RenderConfig) -> Self {
        let caps = gl.capabilities();
        let tier = select_tier(caps, config.gl_version.as_deref(), config.performance);
        let software_mode = config
            .software_mode
            .unwrap_or_else(|| caps.renderer.to_lowercase().contains("software"));
        log::info!(
            "{} ({}): using {tier} rendering, software mode {}",
            caps.renderer,
            caps.version,
            if software_mode { "on" } else { "off" }
        );
        let mut colours = ColourMapRegistry::builtin();
        for (name, points) in &config.colour_maps {
            colours.register_colour_map(ColourMap::from_colours(name.as_str(), points));
        }
        Self {
            gl,
            resources: Resources::default(),
            stacks: ResourceCache::new(),
            colours,
            config,
            renderer: backend::renderer_for(tier),
            software_mode,
        }
    }

    pub fn tier(&self) -> Tier {
        self.renderer.tier()
    }

    pub fn renderer(&self) -> Rc<dyn Renderer> {
        Rc::clone(&self.renderer)
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Software mode trades quality for speed: line vectors are computed
    /// on the CPU.
    pub fn software_mode(&self) -> bool {
        self.software_mode
    }

    pub fn set_software_mode(&mut self, on: bool) {
        if on != self.software_mode {
            log::debug!("Software mode {}", if on { "on" } else { "off" });
            self.software_mode = on;
        }
    }

    /// Destroy every cached resource.
    pub fn release_all(&mut self) {
        let gl = self.gl.as_mut();
        self.resources.clear(gl);
        self.stacks.clear(gl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::software::SoftwareContext;
    use rstest::rstest;

    fn caps(version: &str, extensions: &[&str]) -> Capabilities {
        Capabilities {
            version: version.to_string(),
            renderer: "test".to_string(),
            extensions: extensions.iter().map(|s| s.to_string()).collect(),
            max_texture_size: 1024,
        }
    }

    const ARB: &[&str] = &["GL_ARB_vertex_program", "GL_ARB_fragment_program"];
    const ALL: &[&str] = &[
        "GL_ARB_vertex_program",
        "GL_ARB_fragment_program",
        "GL_EXT_framebuffer_object",
    ];

    #[rstest(
        version, extensions, performance, expected,
        case("2.1", ALL, 3, Tier::Glsl),
        case("2.1", ALL, 2, Tier::Arb),
        case("2.1", ALL, 1, Tier::FixedFunction),
        case("2.1", ARB, 3, Tier::Arb),
        case("1.4", ARB, 3, Tier::Arb),
        case("1.3", ARB, 3, Tier::FixedFunction),
        case("3.3", &[], 3, Tier::Glsl),
        case("1.1", &[], 3, Tier::FixedFunction)
    )]
    fn tier_selection(version: &str, extensions: &[&str], performance: u8, expected: Tier) {
        assert_eq!(select_tier(&caps(version, extensions), None, performance), expected);
    }

    #[test]
    fn version_override_wins() {
        assert_eq!(select_tier(&caps("2.1", ALL), Some("1.4"), 3), Tier::Arb);
    }

    #[test]
    fn software_renderer_enables_software_mode() {
        let ctx = RenderContext::new(Box::new(SoftwareContext::new(1, 1)), RenderConfig::default());
        assert!(ctx.software_mode());
        assert_eq!(ctx.tier(), Tier::Glsl);

        let config = RenderConfig {
            software_mode: Some(false),
            performance: 2,
            ..RenderConfig::default()
        };
        let ctx = RenderContext::new(Box::new(SoftwareContext::new(1, 1)), config);
        assert!(!ctx.software_mode());
        assert_eq!(ctx.tier(), Tier::Arb);
    }

    #[test]
    fn content_hash_is_stable() {
        assert_eq!(content_hash(&("a", 1u32)), content_hash(&("a", 1u32)));
        assert_ne!(content_hash(&("a", 1u32)), content_hash(&("a", 2u32)));
    }
}
