//! Colour curves, label lookup tables and brightness/contrast maths.
//!
//! Colour maps are piecewise-linear RGB curves over `[0, 1]`. Lookup tables
//! map integer label values to colours. Both are registered by name in a
//! [`ColourMapRegistry`], which also hands out colour maps round-robin for
//! successively added images.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

pub type Rgb = [f32; 3];
pub type Rgba = [f32; 4];

/// A named colour curve.
#[derive(Debug, Clone, PartialEq)]
pub struct ColourMap {
    name: String,
    /// Sorted `(position, colour)` control points spanning `[0, 1]`.
    points: Vec<(f32, Rgb)>,
}

impl ColourMap {
    /// Evenly spaced control points.
    pub fn from_colours(name: impl Into<String>, colours: &[Rgb]) -> Self {
        assert!(!colours.is_empty(), "a colour map needs at least one colour");
        let n = colours.len();
        let points = colours
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let t = if n == 1 { 0.0 } else { i as f32 / (n - 1) as f32 };
                (t, *c)
            })
            .collect();
        Self {
            name: name.into(),
            points,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Colour at `t`, clamped to `[0, 1]`.
    pub fn sample(&self, t: f32) -> Rgb {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        let pts = &self.points;
        if pts.len() == 1 {
            return pts[0].1;
        }
        let i = pts
            .windows(2)
            .position(|w| t <= w[1].0)
            .unwrap_or(pts.len() - 2);
        let (t0, c0) = pts[i];
        let (t1, c1) = pts[i + 1];
        let f = if t1 > t0 { (t - t0) / (t1 - t0) } else { 0.0 };
        [
            c0[0] + (c1[0] - c0[0]) * f,
            c0[1] + (c1[1] - c0[1]) * f,
            c0[2] + (c1[2] - c0[2]) * f,
        ]
    }

    /// `n` evenly spaced samples, reversed when `invert` is set.
    pub fn samples(&self, n: usize, invert: bool) -> Vec<Rgb> {
        (0..n)
            .map(|i| {
                let t = if n <= 1 { 0.0 } else { i as f32 / (n - 1) as f32 };
                self.sample(if invert { 1.0 - t } else { t })
            })
            .collect()
    }
}

/// One entry in a [`LookupTable`].
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub value: u32,
    pub name: String,
    pub colour: Rgb,
    pub enabled: bool,
}

/// Integer label value to colour mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupTable {
    name: String,
    labels: BTreeMap<u32, Label>,
}

impl LookupTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
        }
    }

    /// `count` labels with bright colours drawn from a seeded generator.
    pub fn random(name: impl Into<String>, count: u32, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut lut = Self::new(name);
        for value in 1..=count {
            let colour = random_bright_colour(&mut rng);
            lut.set(value, format!("Label {value}"), colour, true);
        }
        lut
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Largest label value, 0 for an empty table.
    pub fn max(&self) -> u32 {
        self.labels.keys().next_back().copied().unwrap_or(0)
    }

    pub fn get(&self, value: u32) -> Option<&Label> {
        self.labels.get(&value)
    }

    pub fn set(&mut self, value: u32, name: impl Into<String>, colour: Rgb, enabled: bool) {
        self.labels.insert(
            value,
            Label {
                value,
                name: name.into(),
                colour,
                enabled,
            },
        );
    }

    pub fn set_enabled(&mut self, value: u32, enabled: bool) -> bool {
        match self.labels.get_mut(&value) {
            Some(label) => {
                label.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn delete(&mut self, value: u32) -> Option<Label> {
        self.labels.remove(&value)
    }

    pub fn labels(&self) -> impl Iterator<Item = &Label> {
        self.labels.values()
    }
}

/// Name-indexed set of colour maps and lookup tables, plus the round-robin
/// cursor used to pick colour maps for newly added images.
#[derive(Debug, Clone)]
pub struct ColourMapRegistry {
    cmaps: Vec<ColourMap>,
    luts: Vec<LookupTable>,
    next_auto: usize,
}

/// Colour maps handed out in turn by [`ColourMapRegistry::next_auto_cmap`].
const AUTO_CMAPS: [&str; 5] = ["red-yellow", "blue-lightblue", "green", "pink", "hot"];

impl Default for ColourMapRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ColourMapRegistry {
    pub fn builtin() -> Self {
        let cmaps = vec![
            ColourMap::from_colours("greyscale", &[[0.0; 3], [1.0; 3]]),
            ColourMap::from_colours("red-yellow", &[[1.0, 0.0, 0.0], [1.0, 1.0, 0.0]]),
            ColourMap::from_colours("blue-lightblue", &[[0.0, 0.0, 1.0], [0.0, 1.0, 1.0]]),
            ColourMap::from_colours("red", &[[0.0; 3], [1.0, 0.0, 0.0]]),
            ColourMap::from_colours("green", &[[0.0; 3], [0.0, 1.0, 0.0]]),
            ColourMap::from_colours("blue", &[[0.0; 3], [0.0, 0.0, 1.0]]),
            ColourMap::from_colours(
                "hot",
                &[[0.0; 3], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [1.0, 1.0, 1.0]],
            ),
            ColourMap::from_colours("cool", &[[0.0, 1.0, 1.0], [1.0, 0.0, 1.0]]),
            ColourMap::from_colours("copper", &[[0.0; 3], [1.0, 0.63, 0.4]]),
            ColourMap::from_colours("pink", &[[0.12, 0.0, 0.0], [0.85, 0.55, 0.55], [1.0; 3]]),
        ];
        let luts = vec![LookupTable::random("random", 64, 0x5eed)];
        Self {
            cmaps,
            luts,
            next_auto: 0,
        }
    }

    pub fn colour_map(&self, name: &str) -> Result<&ColourMap> {
        self.cmaps
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| anyhow!("unknown colour map '{name}'"))
    }

    pub fn lookup_table(&self, name: &str) -> Result<&LookupTable> {
        self.luts
            .iter()
            .find(|l| l.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| anyhow!("unknown lookup table '{name}'"))
    }

    /// Add or replace a colour map.
    pub fn register_colour_map(&mut self, cmap: ColourMap) {
        log::debug!("Registering colour map {}", cmap.name);
        match self.cmaps.iter_mut().find(|c| c.name == cmap.name) {
            Some(existing) => *existing = cmap,
            None => self.cmaps.push(cmap),
        }
    }

    pub fn register_lookup_table(&mut self, lut: LookupTable) {
        log::debug!("Registering lookup table {}", lut.name);
        match self.luts.iter_mut().find(|l| l.name == lut.name) {
            Some(existing) => *existing = lut,
            None => self.luts.push(lut),
        }
    }

    /// The next colour map in the round-robin sequence.
    pub fn next_auto_cmap(&mut self) -> &'static str {
        let name = AUTO_CMAPS[self.next_auto % AUTO_CMAPS.len()];
        self.next_auto += 1;
        name
    }
}

/// Scale and offset applied to a display range of size `drange`.
fn bricon_to_scale_offset(brightness: f64, contrast: f64, drange: f64) -> (f64, f64) {
    let offset = (brightness * 2.0 - 1.0) * drange;
    let scale = if contrast <= 0.5 {
        contrast * 2.0
    } else {
        20.0 * contrast.powi(4) - 0.25
    };
    (scale, offset)
}

/// Display range for the given brightness and contrast, both in `[0, 1]`.
/// `(0.5, 0.5)` gives back the data range.
pub fn bricon_to_display_range(data_range: (f64, f64), brightness: f64, contrast: f64) -> (f64, f64) {
    let (dmin, dmax) = data_range;
    let drange = dmax - dmin;
    let dmid = dmin + 0.5 * drange;
    let (scale, offset) = bricon_to_scale_offset(1.0 - brightness, 1.0 - contrast, drange);
    let centre = dmid + offset;
    (centre - 0.5 * drange * scale, centre + 0.5 * drange * scale)
}

/// Inverse of [`bricon_to_display_range`]. A zero data range yields
/// `(0.5, 0.5)`.
pub fn display_range_to_bricon(data_range: (f64, f64), display_range: (f64, f64)) -> (f64, f64) {
    let (dmin, dmax) = data_range;
    let (dlo, dhi) = display_range;
    let drange = dmax - dmin;
    if drange == 0.0 {
        return (0.5, 0.5);
    }
    let dmid = dmin + 0.5 * drange;
    let offset = dlo + 0.5 * (dhi - dlo) - dmid;
    let scale = (dhi - dlo) / drange;

    let brightness = 0.5 * (offset / drange + 1.0);
    let contrast = if scale <= 1.0 {
        scale / 2.0
    } else {
        ((scale + 0.25) / 20.0).powf(0.25)
    };
    (1.0 - brightness, 1.0 - contrast)
}

/// Apply brightness/contrast to a colour. `(0.5, 0.5)` leaves it unchanged.
pub fn apply_bricon(rgb: Rgb, brightness: f64, contrast: f64) -> Rgb {
    let (scale, offset) = bricon_to_scale_offset(brightness, contrast, 1.0);
    rgb.map(|c| {
        let c = (c as f64 + offset).clamp(0.0, 1.0);
        (((c - 0.5) * scale + 0.5).clamp(0.0, 1.0)) as f32
    })
}

/// A saturated colour: one channel at 1, one at 0, one random.
pub fn random_bright_colour(rng: &mut impl Rng) -> Rgb {
    let mut colour = [1.0, 0.0, rng.gen::<f32>()];
    colour.shuffle(rng);
    colour
}

/// A colour of opposite hue and lightness, used to keep annotations visible
/// over a given colour.
pub fn complementary_colour(rgba: Rgba) -> Rgba {
    let [r, g, b, a] = rgba;
    let (h, l, s) = rgb_to_hls(r, g, b);
    let nh = 1.0 - h;
    let mut nl = 1.0 - l;
    if (nl - l).abs() < 0.3 {
        nl = if l > 0.5 { 0.0 } else { 1.0 };
    }
    let [nr, ng, nb] = hls_to_rgb(nh, nl, s);
    [nr, ng, nb, a]
}

fn rgb_to_hls(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) / 2.0;
    if max == min {
        return (0.0, l, 0.0);
    }
    let d = max - min;
    let s = if l <= 0.5 { d / (max + min) } else { d / (2.0 - max - min) };
    let rc = (max - r) / d;
    let gc = (max - g) / d;
    let bc = (max - b) / d;
    let h = if r == max {
        bc - gc
    } else if g == max {
        2.0 + rc - bc
    } else {
        4.0 + gc - rc
    };
    ((h / 6.0).rem_euclid(1.0), l, s)
}

fn hls_to_rgb(h: f32, l: f32, s: f32) -> Rgb {
    if s == 0.0 {
        return [l, l, l];
    }
    let m2 = if l <= 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let m1 = 2.0 * l - m2;
    let v = |hue: f32| {
        let hue = hue.rem_euclid(1.0);
        if hue < 1.0 / 6.0 {
            m1 + (m2 - m1) * hue * 6.0
        } else if hue < 0.5 {
            m2
        } else if hue < 2.0 / 3.0 {
            m1 + (m2 - m1) * (2.0 / 3.0 - hue) * 6.0
        } else {
            m1
        }
    };
    [v(h + 1.0 / 3.0), v(h), v(h - 1.0 / 3.0)]
}

impl fmt::Display for ColourMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_eq::assert_float_eq;
    use rstest::rstest;

    #[test]
    fn bricon_from_display_range() {
        let (b, c) = display_range_to_bricon((0.0, 100.0), (20.0, 80.0));
        assert_float_eq!(b, 0.5, abs <= 1e-9);
        assert_float_eq!(c, 0.7, abs <= 1e-9);
    }

    #[rstest(
        lo, hi,
        case(20.0, 80.0),
        case(-10.0, 40.0),
        case(0.0, 100.0),
        case(-50.0, 250.0)
    )]
    fn bricon_round_trip(lo: f64, hi: f64) {
        let data = (0.0, 100.0);
        let (b, c) = display_range_to_bricon(data, (lo, hi));
        let (rlo, rhi) = bricon_to_display_range(data, b, c);
        assert_float_eq!(rlo, lo, abs <= 1e-6);
        assert_float_eq!(rhi, hi, abs <= 1e-6);
    }

    #[test]
    fn neutral_bricon_is_data_range() {
        let (lo, hi) = bricon_to_display_range((-5.0, 15.0), 0.5, 0.5);
        assert_float_eq!(lo, -5.0, abs <= 1e-12);
        assert_float_eq!(hi, 15.0, abs <= 1e-12);
        assert_eq!(apply_bricon([0.2, 0.4, 0.9], 0.5, 0.5), [0.2, 0.4, 0.9]);
    }

    #[test]
    fn colour_map_sampling() {
        let reg = ColourMapRegistry::builtin();
        let hot = reg.colour_map("HOT").unwrap();
        assert_eq!(hot.sample(0.0), [0.0; 3]);
        assert_eq!(hot.sample(1.0), [1.0; 3]);
        let grey = reg.colour_map("greyscale").unwrap();
        let s = grey.samples(3, true);
        assert_eq!(s[0], [1.0; 3]);
        assert_float_eq!(s[1][0], 0.5, abs <= 1e-6);
        assert!(reg.colour_map("viridis-ish").is_err());
    }

    #[test]
    fn registration_adds_or_replaces() {
        let mut reg = ColourMapRegistry::builtin();
        reg.register_colour_map(ColourMap::from_colours("ice", &[[0.0, 0.0, 0.2], [1.0; 3]]));
        assert_eq!(reg.colour_map("ice").unwrap().sample(0.0), [0.0, 0.0, 0.2]);
        reg.register_colour_map(ColourMap::from_colours("hot", &[[0.0, 1.0, 0.0]]));
        assert_eq!(reg.colour_map("hot").unwrap().sample(1.0), [0.0, 1.0, 0.0]);

        let mut lut = LookupTable::new("tissue");
        lut.set(3, "grey matter", [0.5; 3], true);
        reg.register_lookup_table(lut.clone());
        assert_eq!(reg.lookup_table("tissue").unwrap(), &lut);
        reg.register_lookup_table(LookupTable::new("tissue"));
        assert!(reg.lookup_table("tissue").unwrap().is_empty());
    }

    #[test]
    fn auto_cmaps_cycle() {
        let mut reg = ColourMapRegistry::builtin();
        let first: Vec<_> = (0..AUTO_CMAPS.len()).map(|_| reg.next_auto_cmap()).collect();
        assert_eq!(first, AUTO_CMAPS.to_vec());
        assert_eq!(reg.next_auto_cmap(), AUTO_CMAPS[0]);
    }

    #[test]
    fn random_lut_is_seeded() {
        let a = LookupTable::random("a", 10, 7);
        let b = LookupTable::random("b", 10, 7);
        assert_eq!(a.max(), 10);
        for v in 1..=10 {
            assert_eq!(a.get(v).unwrap().colour, b.get(v).unwrap().colour);
        }
    }

    #[test]
    fn complementary_of_black_is_light() {
        let c = complementary_colour([0.0, 0.0, 0.0, 0.7]);
        assert_eq!(c, [1.0, 1.0, 1.0, 0.7]);
    }
}
