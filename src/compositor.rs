// Compositing engine: frames + template -> printable strip

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageOutputFormat, Pixel, Rgba, RgbaImage};
use imageproc::drawing::draw_text_mut;
use rusttype::{point, Font, Scale};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::errors::ComposeError;
use crate::templates::{HorizontalAlign, PhotoSlot, Template, TextElement};

/// Font preferred when a requested family is unknown or generic.
const FALLBACK_FAMILY: &str = "dejavusans";

/// A rendered strip. Replaced wholesale, never edited after composition.
#[derive(Debug, Clone)]
pub struct ComposedArtifact {
    pub id: Uuid,
    pub image: RgbaImage,
    pub path: Option<PathBuf>,
    pub template: String,
    pub shots: usize,
}

impl ComposedArtifact {
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn encode_png(&self) -> Result<Vec<u8>, image::ImageError> {
        encode_png(&self.image)
    }
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, image::ImageError> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(image.clone())
        .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)?;
    Ok(bytes)
}

/// Fonts keyed by a normalized family name ("DejaVu Sans" and
/// "DejaVuSans.ttf" both map to `dejavusans`).
#[derive(Default)]
pub struct FontBook {
    fonts: BTreeMap<String, Font<'static>>,
}

impl FontBook {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Recursively loads every .ttf/.otf under `dir`. Unreadable files are
    /// skipped; a missing directory yields an empty book. Symlinked font
    /// files are read but symlinked directories are never descended.
    pub fn load_dir(dir: &Path) -> Self {
        let mut book = Self::empty();

        for entry in WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                !e.file_type().is_dir() && e.path().is_file() && is_font_file(e.path())
            })
        {
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match std::fs::read(path) {
                Ok(data) => {
                    if !book.insert(stem, data) {
                        warn!("Failed to parse font {:?}", path);
                    }
                }
                Err(e) => warn!("Failed to read font {:?}: {}", path, e),
            }
        }

        info!("Loaded {} fonts from {:?}", book.len(), dir);
        book
    }

    pub fn insert(&mut self, family: &str, data: Vec<u8>) -> bool {
        match Font::try_from_vec(data) {
            Some(font) => {
                self.fonts.insert(normalize_family(family), font);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.fonts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fonts.is_empty()
    }

    /// Resolves a CSS-style family list ("Georgia, serif"). Unknown and
    /// generic families fall back deterministically.
    pub fn resolve(&self, families: &str) -> Option<&Font<'static>> {
        families
            .split(',')
            .map(normalize_family)
            .find_map(|key| self.fonts.get(&key))
            .or_else(|| self.fonts.get(FALLBACK_FAMILY))
            .or_else(|| self.fonts.values().next())
    }
}

fn is_font_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("ttf") || ext.eq_ignore_ascii_case("otf"))
}

fn normalize_family(family: &str) -> String {
    family
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[derive(Clone, Default)]
pub struct Compositor {
    fonts: Arc<FontBook>,
}

impl Compositor {
    pub fn new(fonts: FontBook) -> Self {
        Self {
            fonts: Arc::new(fonts),
        }
    }

    /// Renders `frames` into `template`. Draw order is background, then each
    /// slot's photo followed by its border, then text in declared order.
    ///
    /// A single frame is repeated into every slot. Otherwise slot `i` takes
    /// `frames[i]` and slots without a frame keep the background.
    pub fn compose(
        &self,
        template: &Template,
        frames: &[DynamicImage],
    ) -> Result<ComposedArtifact, ComposeError> {
        if template.canvas_width == 0 || template.canvas_height == 0 {
            return Err(ComposeError::InvalidDimensions {
                width: template.canvas_width,
                height: template.canvas_height,
            });
        }

        let mut canvas = RgbaImage::from_pixel(
            template.canvas_width,
            template.canvas_height,
            template.background().to_rgba(),
        );

        let repeat = frames.len() == 1;
        for (index, slot) in template.photo_slots.iter().enumerate() {
            let frame = if repeat {
                &frames[0]
            } else {
                match frames.get(index) {
                    Some(frame) => frame,
                    None => {
                        debug!("No frame for slot {}, leaving background", index);
                        continue;
                    }
                }
            };

            draw_photo(&mut canvas, frame, slot);
            if let Some(border) = &slot.border {
                stroke_rect(&mut canvas, slot, border.stroke_width, border.color.to_rgba());
            }
        }

        for text in &template.text_elements {
            self.draw_text(&mut canvas, text);
        }

        Ok(ComposedArtifact {
            id: Uuid::new_v4(),
            image: canvas,
            path: None,
            template: template.name.clone(),
            shots: frames.len(),
        })
    }

    fn draw_text(&self, canvas: &mut RgbaImage, text: &TextElement) {
        if text.content.is_empty() || text.font_size <= 0.0 {
            return;
        }
        let Some(font) = self.fonts.resolve(&text.font_family) else {
            warn!("No fonts available, skipping text '{}'", text.content);
            return;
        };

        let scale = Scale::uniform(text.font_size);
        let width = measure_text_width(font, &text.content, scale);
        let left = match text.horizontal_align {
            HorizontalAlign::Left | HorizontalAlign::Start => text.x as f32,
            HorizontalAlign::Center => text.x as f32 - width / 2.0,
            HorizontalAlign::Right | HorizontalAlign::End => text.x as f32 - width,
        };
        // draw_text_mut positions by the top of the line box
        let top = text.y as f32 - font.v_metrics(scale).ascent;

        draw_text_mut(
            canvas,
            text.color.to_rgba(),
            left.round() as i32,
            top.round() as i32,
            scale,
            font,
            &text.content,
        );
    }
}

/// Stretches `frame` to exactly the slot size; aspect ratio is not kept.
fn draw_photo(canvas: &mut RgbaImage, frame: &DynamicImage, slot: &PhotoSlot) {
    if slot.width == 0 || slot.height == 0 || frame.width() == 0 || frame.height() == 0 {
        return;
    }
    let scaled = imageops::resize(frame, slot.width, slot.height, FilterType::Triangle);
    imageops::replace(canvas, &scaled, i64::from(slot.x), i64::from(slot.y));
}

/// Strokes the slot outline with the line centered on the slot edge.
fn stroke_rect(canvas: &mut RgbaImage, slot: &PhotoSlot, stroke: u32, color: Rgba<u8>) {
    if stroke == 0 {
        return;
    }
    let half = i64::from(stroke / 2);
    let ox = i64::from(slot.x) - half;
    let oy = i64::from(slot.y) - half;
    let outer_w = slot.width + stroke;
    let outer_h = slot.height + stroke;
    let side_h = outer_h.saturating_sub(2 * stroke);

    fill_rect(canvas, ox, oy, outer_w, stroke, color);
    fill_rect(canvas, ox, oy + i64::from(outer_h - stroke), outer_w, stroke, color);
    fill_rect(canvas, ox, oy + i64::from(stroke), stroke, side_h, color);
    fill_rect(
        canvas,
        ox + i64::from(outer_w - stroke),
        oy + i64::from(stroke),
        stroke,
        side_h,
        color,
    );
}

fn fill_rect(canvas: &mut RgbaImage, x: i64, y: i64, width: u32, height: u32, color: Rgba<u8>) {
    let (canvas_w, canvas_h) = canvas.dimensions();
    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = (x + i64::from(width)).min(i64::from(canvas_w));
    let y1 = (y + i64::from(height)).min(i64::from(canvas_h));

    let opaque = color[3] == u8::MAX;
    for py in y0..y1 {
        for px in x0..x1 {
            let pixel = canvas.get_pixel_mut(px as u32, py as u32);
            if opaque {
                *pixel = color;
            } else {
                pixel.blend(&color);
            }
        }
    }
}

fn measure_text_width(font: &Font, text: &str, scale: Scale) -> f32 {
    font.layout(text, scale, point(0.0, 0.0))
        .last()
        .map(|g| g.position().x + g.unpositioned().h_metrics().advance_width)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::{Border, Color};
    use image::Rgb;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);
    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    fn solid_frame(rgb: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(image::RgbImage::from_pixel(64, 48, Rgb(rgb)))
    }

    fn two_slot_template() -> Template {
        Template {
            name: "test".to_string(),
            canvas_width: 200,
            canvas_height: 100,
            background_color: None,
            photo_slots: vec![
                PhotoSlot {
                    x: 10,
                    y: 10,
                    width: 80,
                    height: 80,
                    border: None,
                },
                PhotoSlot {
                    x: 110,
                    y: 10,
                    width: 80,
                    height: 80,
                    border: None,
                },
            ],
            text_elements: vec![],
        }
    }

    #[test]
    fn test_output_matches_canvas_size() {
        let compositor = Compositor::default();
        let template = Template::classic_strip();
        let frames: Vec<_> = (0..4).map(|_| solid_frame([1, 2, 3])).collect();
        let artifact = compositor.compose(&template, &frames).unwrap();
        assert_eq!(artifact.dimensions(), (600, 1800));
        assert_eq!(artifact.template, "classic_strip");
        assert_eq!(artifact.shots, 4);
        assert!(artifact.path.is_none());
    }

    #[test]
    fn test_frames_land_in_slot_order() {
        let compositor = Compositor::default();
        let frames = vec![solid_frame([255, 0, 0]), solid_frame([0, 0, 255])];
        let artifact = compositor.compose(&two_slot_template(), &frames).unwrap();

        assert_eq!(*artifact.image.get_pixel(50, 50), RED);
        assert_eq!(*artifact.image.get_pixel(150, 50), BLUE);
        // gap between slots and the margin keep the default background
        assert_eq!(*artifact.image.get_pixel(100, 50), WHITE);
        assert_eq!(*artifact.image.get_pixel(5, 5), WHITE);
    }

    #[test]
    fn test_missing_frames_leave_background() {
        let compositor = Compositor::default();
        let mut template = two_slot_template();
        template.photo_slots.push(PhotoSlot {
            x: 0,
            y: 0,
            width: 5,
            height: 5,
            border: Some(Border {
                color: Color::BLACK,
                stroke_width: 2,
            }),
        });
        let frames = vec![solid_frame([255, 0, 0]), solid_frame([0, 0, 255])];
        let artifact = compositor.compose(&template, &frames).unwrap();

        // third slot has no frame, so neither photo nor border is drawn
        assert_eq!(*artifact.image.get_pixel(0, 0), WHITE);
        assert_eq!(*artifact.image.get_pixel(4, 4), WHITE);
    }

    #[test]
    fn test_no_frames_renders_background_only() {
        let compositor = Compositor::default();
        let mut template = two_slot_template();
        template.background_color = Some(Color([10, 20, 30, 255]));
        let artifact = compositor.compose(&template, &[]).unwrap();
        assert!(artifact
            .image
            .pixels()
            .all(|p| *p == Rgba([10, 20, 30, 255])));
    }

    #[test]
    fn test_single_frame_repeats_into_every_slot() {
        let compositor = Compositor::default();
        let template = Template::classic_strip();
        let artifact = compositor
            .compose(&template, &[solid_frame([255, 0, 0])])
            .unwrap();

        for slot in &template.photo_slots {
            let cx = slot.x + slot.width / 2;
            let cy = slot.y + slot.height / 2;
            assert_eq!(*artifact.image.get_pixel(cx, cy), RED);
        }
        assert_eq!(artifact.shots, 1);
    }

    #[test]
    fn test_border_drawn_over_photo() {
        let compositor = Compositor::default();
        let mut template = two_slot_template();
        template.photo_slots[0].border = Some(Border {
            color: Color([0, 255, 0, 255]),
            stroke_width: 4,
        });
        let frames = vec![solid_frame([255, 0, 0]), solid_frame([0, 0, 255])];
        let artifact = compositor.compose(&template, &frames).unwrap();
        let green = Rgba([0, 255, 0, 255]);

        // stroke straddles the edge at x=10: 8..12
        assert_eq!(*artifact.image.get_pixel(8, 50), green);
        assert_eq!(*artifact.image.get_pixel(11, 50), green);
        assert_eq!(*artifact.image.get_pixel(12, 50), RED);
        assert_eq!(*artifact.image.get_pixel(7, 50), WHITE);
        // right edge at x=90: 88..92
        assert_eq!(*artifact.image.get_pixel(89, 50), green);
        assert_eq!(*artifact.image.get_pixel(87, 50), RED);
        // bottom edge at y=90
        assert_eq!(*artifact.image.get_pixel(50, 91), green);
        // unbordered slot keeps its photo to the edge
        assert_eq!(*artifact.image.get_pixel(110, 50), BLUE);
    }

    #[test]
    fn test_slot_outside_canvas_is_clipped() {
        let compositor = Compositor::default();
        let mut template = two_slot_template();
        template.photo_slots[1] = PhotoSlot {
            x: 180,
            y: 80,
            width: 100,
            height: 100,
            border: Some(Border {
                color: Color::BLACK,
                stroke_width: 6,
            }),
        };
        let frames = vec![solid_frame([255, 0, 0]), solid_frame([0, 0, 255])];
        let artifact = compositor.compose(&template, &frames).unwrap();
        assert_eq!(artifact.dimensions(), (200, 100));
        assert_eq!(*artifact.image.get_pixel(199, 99), BLUE);
    }

    #[test]
    fn test_invalid_dimensions() {
        let compositor = Compositor::default();
        let mut template = two_slot_template();
        template.canvas_width = 0;
        assert!(matches!(
            compositor.compose(&template, &[]),
            Err(ComposeError::InvalidDimensions { width: 0, .. })
        ));
    }

    #[test]
    fn test_compose_is_deterministic() {
        let compositor = Compositor::default();
        let template = Template::classic_strip();
        let frames: Vec<_> = [[200, 10, 10], [10, 200, 10], [10, 10, 200], [90, 90, 90]]
            .into_iter()
            .map(solid_frame)
            .collect();

        let first = compositor.compose(&template, &frames).unwrap();
        let second = compositor.compose(&template, &frames).unwrap();
        assert_eq!(first.encode_png().unwrap(), second.encode_png().unwrap());
    }

    #[test]
    fn test_text_without_fonts_is_skipped() {
        let compositor = Compositor::new(FontBook::empty());
        let template = Template::classic_strip();
        let artifact = compositor.compose(&template, &[]).unwrap();
        assert!(artifact.image.pixels().all(|p| *p == WHITE));
    }

    #[test]
    fn test_text_drawn_when_font_available() {
        let Ok(data) = std::fs::read("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf") else {
            return;
        };
        let mut fonts = FontBook::empty();
        assert!(fonts.insert("DejaVuSans", data));
        let compositor = Compositor::new(fonts);

        let mut template = two_slot_template();
        template.photo_slots.clear();
        template.text_elements.push(TextElement {
            content: "HELLO".to_string(),
            x: 100,
            y: 60,
            font_size: 40.0,
            font_family: "Nonexistent, sans-serif".to_string(),
            color: Color::BLACK,
            horizontal_align: HorizontalAlign::Center,
        });
        let artifact = compositor.compose(&template, &[]).unwrap();

        let inked: Vec<u32> = artifact
            .image
            .enumerate_pixels()
            .filter(|(_, _, p)| **p != WHITE)
            .map(|(x, _, _)| x)
            .collect();
        assert!(!inked.is_empty());
        // centered on x=100
        let min = *inked.iter().min().unwrap();
        let max = *inked.iter().max().unwrap();
        assert!(min < 100 && max > 100);
        assert!((i64::from(min) + i64::from(max) - 200).abs() < 10);
    }

    #[test]
    fn test_font_file_extensions() {
        assert!(is_font_file(Path::new("fonts/DejaVuSans.ttf")));
        assert!(is_font_file(Path::new("fonts/Lobster.OTF")));
        assert!(!is_font_file(Path::new("fonts/README.txt")));
        assert!(!is_font_file(Path::new("fonts/ttf")));
    }

    #[test]
    fn test_load_dir_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FontBook::load_dir(&dir.path().join("nope")).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_load_dir_does_not_follow_symlink_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        for name in ["a", "b", "c"] {
            std::os::unix::fs::symlink(dir.path(), nested.join(name)).unwrap();
        }
        std::fs::write(nested.join("broken.ttf"), b"not a font").unwrap();

        let book = FontBook::load_dir(dir.path());
        assert!(book.is_empty());

        // with a real font present the walk still finishes and finds it once
        let Ok(data) = std::fs::read("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf") else {
            return;
        };
        std::fs::write(nested.join("DejaVuSans.ttf"), data).unwrap();
        let book = FontBook::load_dir(dir.path());
        assert_eq!(book.len(), 1);
        assert!(book.resolve("DejaVu Sans").is_some());
    }

    #[test]
    fn test_font_resolution() {
        assert_eq!(normalize_family("DejaVu Sans"), "dejavusans");
        assert_eq!(normalize_family("'Open-Sans'"), "opensans");
        assert!(FontBook::empty().resolve("Arial").is_none());
    }
}
