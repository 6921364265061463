//! Command-line form of [`DisplayOptions`].
//!
//! Every setting serialises to a `--name=value` argument so that a scene can
//! be handed to another process (for example an off-screen screenshot
//! renderer) and rebuilt exactly.

use anyhow::Result;
use clap::{ArgAction, Parser};

use super::{DisplayOptions, Interpolation, OverlayType};
use crate::colourmaps::{Rgb, Rgba};
use crate::transform::TransformMode;

/// A batch of display changes. Unset fields are left alone by
/// [`DisplayOptions::apply`].
#[derive(Debug, Clone, Default, PartialEq, Parser)]
#[command(name = "overlay", no_binary_name = true, disable_help_flag = true)]
pub struct DisplayUpdate {
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long, value_enum)]
    pub overlay_type: Option<OverlayType>,
    #[arg(long, action = ArgAction::Set)]
    pub enabled: Option<bool>,
    #[arg(long)]
    pub alpha: Option<f64>,
    #[arg(long)]
    pub brightness: Option<f64>,
    #[arg(long)]
    pub contrast: Option<f64>,
    #[arg(long, action = ArgAction::Set)]
    pub software_mode: Option<bool>,
    #[arg(long, value_enum)]
    pub transform: Option<TransformMode>,
    #[arg(long)]
    pub resolution: Option<f64>,

    #[arg(long, allow_hyphen_values = true, value_parser = parse_pair)]
    pub display_range: Option<(f64, f64)>,
    #[arg(long, allow_hyphen_values = true, value_parser = parse_pair)]
    pub clipping_range: Option<(f64, f64)>,
    #[arg(long, action = ArgAction::Set)]
    pub invert_clipping: Option<bool>,
    #[arg(long)]
    pub cmap: Option<String>,
    #[arg(long)]
    pub negative_cmap: Option<String>,
    #[arg(long, action = ArgAction::Set)]
    pub use_negative_cmap: Option<bool>,
    #[arg(long, value_enum)]
    pub interpolation: Option<Interpolation>,
    #[arg(long, action = ArgAction::Set)]
    pub invert: Option<bool>,

    #[arg(long, allow_hyphen_values = true, value_parser = parse_pair)]
    pub threshold: Option<(f64, f64)>,
    #[arg(long, action = ArgAction::Set)]
    pub mask_invert: Option<bool>,
    #[arg(long, value_parser = parse_rgba)]
    pub mask_colour: Option<Rgba>,

    #[arg(long, value_parser = parse_rgb)]
    pub x_colour: Option<Rgb>,
    #[arg(long, value_parser = parse_rgb)]
    pub y_colour: Option<Rgb>,
    #[arg(long, value_parser = parse_rgb)]
    pub z_colour: Option<Rgb>,
    #[arg(long, action = ArgAction::Set)]
    pub suppress_x: Option<bool>,
    #[arg(long, action = ArgAction::Set)]
    pub suppress_y: Option<bool>,
    #[arg(long, action = ArgAction::Set)]
    pub suppress_z: Option<bool>,
    /// Overlay name, or `none`.
    #[arg(long)]
    pub modulate: Option<String>,
    #[arg(long)]
    pub mod_threshold: Option<f64>,

    #[arg(long)]
    pub line_width: Option<u32>,
    #[arg(long, action = ArgAction::Set)]
    pub directed: Option<bool>,

    #[arg(long)]
    pub lut: Option<String>,
    #[arg(long, action = ArgAction::Set)]
    pub label_outline: Option<bool>,
    #[arg(long)]
    pub label_outline_width: Option<f64>,
    #[arg(long, action = ArgAction::Set)]
    pub show_names: Option<bool>,

    #[arg(long, value_parser = parse_rgba)]
    pub model_colour: Option<Rgba>,
    #[arg(long, action = ArgAction::Set)]
    pub model_outline: Option<bool>,
    #[arg(long)]
    pub model_outline_width: Option<f64>,
    #[arg(long, action = ArgAction::Set)]
    pub show_name: Option<bool>,
}

fn parse_floats<const N: usize, T: std::str::FromStr>(s: &str) -> Result<[T; N], String> {
    let parts: Vec<T> = s
        .split(',')
        .map(|p| p.trim().parse::<T>().map_err(|_| format!("invalid number '{p}'")))
        .collect::<Result<_, _>>()?;
    parts
        .try_into()
        .map_err(|_| format!("expected {N} comma-separated values, got '{s}'"))
}

fn parse_pair(s: &str) -> Result<(f64, f64), String> {
    let [a, b] = parse_floats::<2, f64>(s)?;
    Ok((a, b))
}

fn parse_rgb(s: &str) -> Result<Rgb, String> {
    parse_floats::<3, f32>(s)
}

fn parse_rgba(s: &str) -> Result<Rgba, String> {
    parse_floats::<4, f32>(s)
}

fn join<T: ToString>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn enum_name<T: clap::ValueEnum>(value: Option<T>) -> Option<String> {
    value
        .and_then(|v| v.to_possible_value())
        .map(|p| p.get_name().to_string())
}

impl DisplayUpdate {
    /// Every current setting of `opts`.
    pub fn snapshot(opts: &DisplayOptions) -> Self {
        Self {
            name: Some(opts.name.get()),
            overlay_type: Some(opts.overlay_type.get()),
            enabled: Some(opts.enabled.get()),
            alpha: Some(opts.alpha.get()),
            brightness: Some(opts.brightness.get()),
            contrast: Some(opts.contrast.get()),
            software_mode: Some(opts.software_mode.get()),
            transform: Some(opts.transform.get()),
            resolution: Some(opts.resolution.get()),
            display_range: Some(opts.volume.display_range.get()),
            clipping_range: Some(opts.volume.clipping_range.get()),
            invert_clipping: Some(opts.volume.invert_clipping.get()),
            cmap: Some(opts.volume.cmap.get()),
            negative_cmap: Some(opts.volume.negative_cmap.get()),
            use_negative_cmap: Some(opts.volume.use_negative_cmap.get()),
            interpolation: Some(opts.volume.interpolation.get()),
            invert: Some(opts.volume.invert.get()),
            threshold: Some(opts.mask.threshold.get()),
            mask_invert: Some(opts.mask.invert.get()),
            mask_colour: Some(opts.mask.colour.get()),
            x_colour: Some(opts.vector.x_colour.get()),
            y_colour: Some(opts.vector.y_colour.get()),
            z_colour: Some(opts.vector.z_colour.get()),
            suppress_x: Some(opts.vector.suppress_x.get()),
            suppress_y: Some(opts.vector.suppress_y.get()),
            suppress_z: Some(opts.vector.suppress_z.get()),
            modulate: Some(opts.vector.modulate.get().unwrap_or_else(|| "none".to_string())),
            mod_threshold: Some(opts.vector.mod_threshold.get()),
            line_width: Some(opts.line_vector.line_width.get()),
            directed: Some(opts.line_vector.directed.get()),
            lut: Some(opts.label.lut.get()),
            label_outline: Some(opts.label.outline.get()),
            label_outline_width: Some(opts.label.outline_width.get()),
            show_names: Some(opts.label.show_names.get()),
            model_colour: Some(opts.model.colour.get()),
            model_outline: Some(opts.model.outline.get()),
            model_outline_width: Some(opts.model.outline_width.get()),
            show_name: Some(opts.model.show_name.get()),
        }
    }

    /// Parse an argument list produced by [`to_args`].
    pub fn from_args<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::try_parse_from(args)?)
    }

    /// The set fields as `--name=value` arguments.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        let mut push = |name: &str, value: Option<String>| {
            if let Some(value) = value {
                args.push(format!("--{name}={value}"));
            }
        };
        let pair = |p: Option<(f64, f64)>| p.map(|(a, b)| format!("{a},{b}"));

        push("name", self.name.clone());
        push("overlay-type", enum_name(self.overlay_type));
        push("enabled", self.enabled.map(|v| v.to_string()));
        push("alpha", self.alpha.map(|v| v.to_string()));
        push("brightness", self.brightness.map(|v| v.to_string()));
        push("contrast", self.contrast.map(|v| v.to_string()));
        push("software-mode", self.software_mode.map(|v| v.to_string()));
        push("transform", enum_name(self.transform));
        push("resolution", self.resolution.map(|v| v.to_string()));
        push("display-range", pair(self.display_range));
        push("clipping-range", pair(self.clipping_range));
        push("invert-clipping", self.invert_clipping.map(|v| v.to_string()));
        push("cmap", self.cmap.clone());
        push("negative-cmap", self.negative_cmap.clone());
        push("use-negative-cmap", self.use_negative_cmap.map(|v| v.to_string()));
        push("interpolation", enum_name(self.interpolation));
        push("invert", self.invert.map(|v| v.to_string()));
        push("threshold", pair(self.threshold));
        push("mask-invert", self.mask_invert.map(|v| v.to_string()));
        push("mask-colour", self.mask_colour.map(|c| join(&c)));
        push("x-colour", self.x_colour.map(|c| join(&c)));
        push("y-colour", self.y_colour.map(|c| join(&c)));
        push("z-colour", self.z_colour.map(|c| join(&c)));
        push("suppress-x", self.suppress_x.map(|v| v.to_string()));
        push("suppress-y", self.suppress_y.map(|v| v.to_string()));
        push("suppress-z", self.suppress_z.map(|v| v.to_string()));
        push("modulate", self.modulate.clone());
        push("mod-threshold", self.mod_threshold.map(|v| v.to_string()));
        push("line-width", self.line_width.map(|v| v.to_string()));
        push("directed", self.directed.map(|v| v.to_string()));
        push("lut", self.lut.clone());
        push("label-outline", self.label_outline.map(|v| v.to_string()));
        push("label-outline-width", self.label_outline_width.map(|v| v.to_string()));
        push("show-names", self.show_names.map(|v| v.to_string()));
        push("model-colour", self.model_colour.map(|c| join(&c)));
        push("model-outline", self.model_outline.map(|v| v.to_string()));
        push("model-outline-width", self.model_outline_width.map(|v| v.to_string()));
        push("show-name", self.show_name.map(|v| v.to_string()));
        args
    }
}

/// Serialise every setting of `opts` to arguments.
pub fn to_args(opts: &DisplayOptions) -> Vec<String> {
    DisplayUpdate::snapshot(opts).to_args()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::Volume;
    use ndarray::Array3;
    use pretty_assertions::assert_eq;

    fn opts() -> DisplayOptions {
        let mut data = Array3::<f32>::zeros((3, 3, 3));
        data[[1, 1, 1]] = 250.0;
        let vol = Volume::from_3d("T1 brain", data, [1.0, 1.5, 2.0]).unwrap();
        DisplayOptions::for_image(&vol, "greyscale")
    }

    #[test]
    fn round_trip_is_exact() {
        let src = opts();
        src.apply(&DisplayUpdate {
            display_range: Some((-12.25, 0.1 + 0.2)),
            alpha: Some(33.3),
            transform: Some(TransformMode::Affine),
            interpolation: Some(Interpolation::Spline),
            mask_colour: Some([0.1, 0.2, 0.3, 0.4]),
            modulate: Some("fa".into()),
            line_width: Some(3),
            ..Default::default()
        });

        let args = to_args(&src);
        let parsed = DisplayUpdate::from_args(&args).unwrap();
        assert_eq!(parsed, DisplayUpdate::snapshot(&src));

        let dst = opts();
        dst.apply(&parsed);
        assert_eq!(DisplayUpdate::snapshot(&dst), DisplayUpdate::snapshot(&src));
    }

    #[test]
    fn negative_ranges_parse() {
        let u = DisplayUpdate::from_args(["--clipping-range=-5,-1", "--enabled=false"]).unwrap();
        assert_eq!(u.clipping_range, Some((-5.0, -1.0)));
        assert_eq!(u.enabled, Some(false));
    }

    #[test]
    fn unknown_arguments_are_rejected() {
        assert!(DisplayUpdate::from_args(["--colour-of-sky=blue"]).is_err());
        assert!(DisplayUpdate::from_args(["--display-range=1"]).is_err());
    }
}
