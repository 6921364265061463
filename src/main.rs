use std::io::Read;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use eframe::egui;

use nifti_slice_viewer::canvas::{overlay_bounds, LightBoxCanvas, SliceCanvas};
use nifti_slice_viewer::config::{RenderConfig, RenderMode};
use nifti_slice_viewer::display::DisplayUpdate;
use nifti_slice_viewer::gl::software::SoftwareContext;
use nifti_slice_viewer::gl::RenderContext;
use nifti_slice_viewer::io::{load_nifti, load_nifti_bytes};
use nifti_slice_viewer::overlay::OverlayList;
use nifti_slice_viewer::transform::{transform_point, Space};
use nifti_slice_viewer::volume::Volume;

/// Pixels per side of each view.
const TILE: usize = 384;

#[derive(Parser, Debug)]
#[command(about = "Triple-axis NIfTI slice viewer")]
struct Cli {
    /// Images to open, drawn in order. `-` reads one from stdin.
    files: Vec<PathBuf>,

    /// Rendering configuration (TOML).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the configured compositing mode.
    #[arg(long, value_enum)]
    mode: Option<RenderMode>,

    /// Display options applied to every image, e.g. "--cmap hot --alpha 50".
    #[arg(long, allow_hyphen_values = true)]
    display: Option<String>,

    /// Render one view to a PNG and exit.
    #[arg(long)]
    render: Option<PathBuf>,

    /// Depth axis of the rendered view.
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u8).range(0..3))]
    zax: u8,

    /// Render a lightbox instead of a single slice.
    #[arg(long)]
    lightbox: bool,

    /// Width and height of the rendered image.
    #[arg(long, default_value_t = 512)]
    size: usize,
}

fn load_config(cli: &Cli) -> Result<RenderConfig> {
    let mut config = match &cli.config {
        Some(path) => RenderConfig::load(path)?,
        None => RenderConfig::default(),
    };
    if let Some(mode) = cli.mode {
        config.render_mode = mode;
    }
    Ok(config)
}

fn read_image(path: &Path) -> Result<Volume> {
    if path != Path::new("-") {
        return load_nifti(path);
    }
    let mut bytes = Vec::new();
    std::io::stdin()
        .read_to_end(&mut bytes)
        .context("reading stdin")?;
    load_nifti_bytes("stdin", &bytes)
}

fn open_images(ctx: &mut RenderContext, overlays: &OverlayList, files: &[PathBuf], display: Option<&str>) -> Result<()> {
    let update = display
        .map(|args| DisplayUpdate::from_args(args.split_whitespace()))
        .transpose()
        .context("parsing --display")?;
    for path in files {
        let volume = read_image(path)?;
        let overlay = overlays.add_image(Rc::new(volume), &mut ctx.colours);
        if let Some(update) = &update {
            overlay.apply(update)?;
        }
    }
    Ok(())
}

fn centre_of(overlays: &OverlayList) -> [f64; 3] {
    overlay_bounds(overlays).map_or([0.0; 3], |(lo, hi)| {
        [0.5 * (lo[0] + hi[0]), 0.5 * (lo[1] + hi[1]), 0.5 * (lo[2] + hi[2])]
    })
}

fn render_to_file(cli: &Cli, config: RenderConfig, out: &Path) -> Result<()> {
    if cli.files.is_empty() {
        bail!("--render needs at least one image");
    }
    let size = cli.size.max(1);
    let mode = config.render_mode;
    let mut ctx = RenderContext::new(Box::new(SoftwareContext::new(size, size)), config);
    let overlays = OverlayList::new();
    open_images(&mut ctx, &overlays, &cli.files, cli.display.as_deref())?;
    let pos = centre_of(&overlays);
    let zax = cli.zax as usize;

    if cli.lightbox {
        let mut canvas = LightBoxCanvas::new(overlays, zax, mode);
        canvas.set_viewport(0, 0, size, size);
        canvas.set_pos(pos);
        canvas.draw(&mut ctx);
        canvas.destroy(&mut ctx);
    } else {
        let mut canvas = SliceCanvas::new(overlays, zax, mode);
        canvas.set_viewport(0, 0, size, size);
        canvas.set_pos(pos);
        canvas.draw(&mut ctx);
        canvas.destroy(&mut ctx);
    }
    ctx.gl
        .read_pixels()
        .save(out)
        .with_context(|| format!("writing {}", out.display()))?;
    ctx.release_all();
    log::info!("Wrote {} ({:?})", out.display(), ctx.gl.stats());
    Ok(())
}

/// Which display axis each view looks down, with its label and colour.
const VIEWS: [(usize, &str, egui::Color32); 3] = [
    (2, "Axial", egui::Color32::YELLOW),
    (1, "Coronal", egui::Color32::GREEN),
    (0, "Sagittal", egui::Color32::RED),
];

struct NiftiViewer {
    ctx: RenderContext,
    overlays: OverlayList,
    canvases: Vec<SliceCanvas>,
    pos: [f64; 3],
    scroll_accum: [f32; 3],
    textures: Vec<Option<egui::TextureHandle>>,
    error_msg: Option<String>,
}

impl NiftiViewer {
    fn new(config: RenderConfig) -> Self {
        let mode = config.render_mode;
        let gl = SoftwareContext::new(TILE * VIEWS.len(), TILE);
        let ctx = RenderContext::new(Box::new(gl), config);
        let overlays = OverlayList::new();
        let canvases = VIEWS
            .iter()
            .enumerate()
            .map(|(i, (zax, ..))| {
                let mut canvas = SliceCanvas::new(overlays.clone(), *zax, mode);
                canvas.set_viewport((i * TILE) as i32, 0, TILE, TILE);
                canvas
            })
            .collect();
        Self {
            ctx,
            overlays,
            canvases,
            pos: [0.0; 3],
            scroll_accum: [0.0; 3],
            textures: vec![None; VIEWS.len()],
            error_msg: None,
        }
    }

    fn load_from_path(&mut self, path: &Path) {
        match open_images(&mut self.ctx, &self.overlays, &[path.to_path_buf()], None) {
            Ok(()) => {
                self.set_pos(centre_of(&self.overlays));
                self.error_msg = None;
            }
            Err(e) => {
                log::warn!("{e:#}");
                self.error_msg = Some(format!("Failed to load: {e:#}"));
            }
        }
    }

    fn set_pos(&mut self, pos: [f64; 3]) {
        self.pos = pos;
        for canvas in &mut self.canvases {
            let (xax, yax, _) = canvas.axes();
            canvas.set_pos(pos);
            canvas.pan_to_show(pos[xax], pos[yax]);
        }
    }

    /// Value of the bottom image under the cursor.
    fn cursor_value(&self) -> Option<f32> {
        let overlay = self.overlays.get(0)?;
        let to_voxel = overlay.display().get_transform(Space::Display, Space::Voxel, None);
        overlay.volume()?.value_at(transform_point(&to_voxel, self.pos))
    }

    /// Redraw the views that changed and refresh their egui textures.
    fn refresh(&mut self, ui: &egui::Ui) {
        if !self.canvases.iter().any(SliceCanvas::needs_redraw) && self.textures.iter().all(Option::is_some) {
            return;
        }
        for canvas in &mut self.canvases {
            canvas.draw(&mut self.ctx);
        }
        let surface = self.ctx.gl.read_pixels();
        for (i, texture) in self.textures.iter_mut().enumerate() {
            let tile = image::imageops::crop_imm(&surface, (i * TILE) as u32, 0, TILE as u32, TILE as u32).to_image();
            let image = egui::ColorImage::from_rgba_unmultiplied([TILE, TILE], tile.as_raw());
            match texture {
                Some(handle) => handle.set(image, egui::TextureOptions::NEAREST),
                None => {
                    *texture = Some(ui.ctx().load_texture(VIEWS[i].1, image, egui::TextureOptions::NEAREST));
                }
            }
        }
    }

    fn view_ui(&mut self, ui: &mut egui::Ui, index: usize, cell: egui::Vec2) {
        let (zax, label, colour) = VIEWS[index];
        let (cell_rect, response) = ui.allocate_exact_size(cell, egui::Sense::click_and_drag());
        let side = cell.x.min(cell.y);
        let img_rect = egui::Rect::from_center_size(cell_rect.center(), egui::vec2(side, side));
        if let Some(texture) = &self.textures[index] {
            let uv = egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0));
            ui.painter().image(texture.id(), img_rect, uv, egui::Color32::WHITE);
        }

        let value = self.cursor_value().map(|v| format!("  [{v:.2}]")).unwrap_or_default();
        let overlay_bg = egui::Color32::from_black_alpha(160);
        let strip = egui::Rect::from_min_size(cell_rect.min, egui::vec2(cell_rect.width(), 22.0));
        ui.painter().rect_filled(strip, 0.0, overlay_bg);
        ui.painter().text(
            strip.left_center() + egui::vec2(6.0, 0.0),
            egui::Align2::LEFT_CENTER,
            format!("{label}  {:.1}{value}", self.pos[zax]),
            egui::FontId::proportional(14.0),
            colour,
        );

        // Click or drag moves the cursor within the slice.
        if let Some(pointer) = response.interact_pointer_pos().filter(|p| img_rect.contains(*p)) {
            let px = (pointer.x - img_rect.min.x) / side * TILE as f32;
            let py = (img_rect.max.y - pointer.y) / side * TILE as f32;
            if let Some(pos) = self.canvases[index].canvas_to_world(px as f64, py as f64) {
                self.set_pos(pos);
            }
        }

        if ui.rect_contains_pointer(cell_rect) {
            self.scroll_accum[index] += ui.input(|i| i.raw_scroll_delta.y);
            let step = 30.0_f32;
            let voxel = self
                .overlays
                .get(0)
                .map_or(1.0, |o| o.display().display_voxel_size());
            let mut pos = self.pos;
            while self.scroll_accum[index] >= step {
                self.scroll_accum[index] -= step;
                pos[zax] += voxel;
            }
            while self.scroll_accum[index] <= -step {
                self.scroll_accum[index] += step;
                pos[zax] -= voxel;
            }
            if let Some((lo, hi)) = overlay_bounds(&self.overlays) {
                pos[zax] = pos[zax].clamp(lo[zax], hi[zax]);
            }
            if pos != self.pos {
                self.set_pos(pos);
            }
        }
    }
}

impl eframe::App for NiftiViewer {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            egui::MenuBar::new().ui(ui, |ui| {
                ui.menu_button("File", |ui| {
                    if ui.button("Load NIfTI…").clicked() {
                        ui.close();
                        if let Some(path) = rfd::FileDialog::new()
                            .add_filter("NIfTI", &["nii", "gz"])
                            .pick_file()
                        {
                            self.load_from_path(&path);
                        }
                    }
                });
                ui.menu_button("Render", |ui| {
                    for mode in [RenderMode::Onscreen, RenderMode::Offscreen, RenderMode::Prerender] {
                        if ui.button(format!("{mode:?}")).clicked() {
                            ui.close();
                            for canvas in &mut self.canvases {
                                canvas.set_render_mode(&mut self.ctx, mode);
                            }
                        }
                    }
                });
            });
            if let Some(ref msg) = self.error_msg {
                ui.colored_label(egui::Color32::RED, msg);
            }
        });

        let frame = egui::Frame::new().fill(egui::Color32::BLACK).inner_margin(0.0);
        egui::CentralPanel::default().frame(frame).show(ctx, |ui| {
            if self.overlays.is_empty() {
                ui.centered_and_justified(|ui| {
                    ui.label(
                        egui::RichText::new("No volume loaded.\nUse File > Load NIfTI… to open a file.")
                            .color(egui::Color32::GRAY)
                            .size(20.0),
                    );
                });
                return;
            }
            self.refresh(ui);

            let avail = ui.available_size();
            let spacing = ui.spacing().item_spacing;
            let cell = egui::vec2((avail.x - spacing.x) / 2.0, (avail.y - spacing.y) / 2.0);
            ui.horizontal(|ui| {
                self.view_ui(ui, 0, cell);
                ui.allocate_ui(cell, |_ui| {});
            });
            ui.horizontal(|ui| {
                self.view_ui(ui, 1, cell);
                self.view_ui(ui, 2, cell);
            });
        });
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    if let Some(out) = &cli.render {
        return render_to_file(&cli, config, out);
    }

    let mut app = NiftiViewer::new(config);
    open_images(&mut app.ctx, &app.overlays, &cli.files, cli.display.as_deref())?;
    app.set_pos(centre_of(&app.overlays));

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([800.0, 800.0]),
        ..Default::default()
    };
    eframe::run_native(
        "Rust NIfTI Triple Axis Viewer",
        native_options,
        Box::new(|_cc| Ok(Box::new(app))),
    )
    .map_err(|e| anyhow::anyhow!("{e}"))
}
