// Declarative strip layouts and where they come from

use async_trait::async_trait;
use image::Rgba;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info};

use crate::errors::TemplateError;

/// Name of the layout used for multi-shot sessions.
pub const CLASSIC_STRIP: &str = "classic_strip";

/// Straight (non-premultiplied) RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color(pub [u8; 4]);

impl Color {
    pub const WHITE: Color = Color([255, 255, 255, 255]);
    pub const BLACK: Color = Color([0, 0, 0, 255]);

    pub fn to_rgba(self) -> Rgba<u8> {
        Rgba(self.0)
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::BLACK
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b, a] = self.0;
        if a == 255 {
            write!(f, "#{:02x}{:02x}{:02x}", r, g, b)
        } else {
            write!(f, "#{:02x}{:02x}{:02x}{:02x}", r, g, b, a)
        }
    }
}

impl FromStr for Color {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim().to_ascii_lowercase();
        let invalid = || TemplateError::InvalidColor(s.to_string());

        if let Some(hex) = raw.strip_prefix('#') {
            return parse_hex(hex).ok_or_else(invalid);
        }

        if let Some(args) = raw
            .strip_prefix("rgba(")
            .or_else(|| raw.strip_prefix("rgb("))
            .and_then(|rest| rest.strip_suffix(')'))
        {
            return parse_rgb_function(args).ok_or_else(invalid);
        }

        named_color(&raw).ok_or_else(invalid)
    }
}

fn parse_hex(hex: &str) -> Option<Color> {
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let nibble = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok().map(|v| v * 17);
    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();

    match hex.len() {
        3 => Some(Color([nibble(0)?, nibble(1)?, nibble(2)?, 255])),
        4 => Some(Color([nibble(0)?, nibble(1)?, nibble(2)?, nibble(3)?])),
        6 => Some(Color([byte(0)?, byte(2)?, byte(4)?, 255])),
        8 => Some(Color([byte(0)?, byte(2)?, byte(4)?, byte(6)?])),
        _ => None,
    }
}

fn parse_rgb_function(args: &str) -> Option<Color> {
    let parts: Vec<&str> = args.split(',').map(str::trim).collect();
    if parts.len() != 3 && parts.len() != 4 {
        return None;
    }
    let channel = |p: &str| p.parse::<f32>().ok().map(|v| v.round().clamp(0.0, 255.0) as u8);
    let alpha = match parts.get(3) {
        Some(a) => (a.parse::<f32>().ok()?.clamp(0.0, 1.0) * 255.0).round() as u8,
        None => 255,
    };
    Some(Color([
        channel(parts[0])?,
        channel(parts[1])?,
        channel(parts[2])?,
        alpha,
    ]))
}

fn named_color(name: &str) -> Option<Color> {
    let rgb = match name {
        "white" => [255, 255, 255],
        "black" => [0, 0, 0],
        "red" => [255, 0, 0],
        "green" => [0, 128, 0],
        "blue" => [0, 0, 255],
        "yellow" => [255, 255, 0],
        "orange" => [255, 165, 0],
        "pink" => [255, 192, 203],
        "purple" => [128, 0, 128],
        "gold" => [255, 215, 0],
        "silver" => [192, 192, 192],
        "gray" | "grey" => [128, 128, 128],
        "transparent" => return Some(Color([0, 0, 0, 0])),
        _ => return None,
    };
    Some(Color([rgb[0], rgb[1], rgb[2], 255]))
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HorizontalAlign {
    #[default]
    Left,
    Center,
    Right,
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Border {
    pub color: Color,
    #[serde(alias = "width")]
    pub stroke_width: u32,
}

/// Rectangle a frame is stretched into. Bounds are not checked against the
/// canvas; anything outside is clipped when drawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoSlot {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub border: Option<Border>,
}

/// Text drawn on top of the photos. `y` is the baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextElement {
    pub content: String,
    pub x: i32,
    pub y: i32,
    #[serde(alias = "size", default = "default_font_size")]
    pub font_size: f32,
    #[serde(alias = "font", default = "default_font_family")]
    pub font_family: String,
    #[serde(default)]
    pub color: Color,
    #[serde(alias = "align", default)]
    pub horizontal_align: HorizontalAlign,
}

fn default_font_size() -> f32 {
    16.0
}

fn default_font_family() -> String {
    "sans-serif".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    /// Set by the source from the requested name, not read from the document.
    #[serde(skip)]
    pub name: String,
    #[serde(alias = "width")]
    pub canvas_width: u32,
    #[serde(alias = "height")]
    pub canvas_height: u32,
    #[serde(default)]
    pub background_color: Option<Color>,
    #[serde(default)]
    pub photo_slots: Vec<PhotoSlot>,
    #[serde(alias = "texts", default)]
    pub text_elements: Vec<TextElement>,
}

impl Template {
    pub fn from_json(name: &str, json: &str) -> Result<Self, TemplateError> {
        let mut template: Template =
            serde_json::from_str(json).map_err(|source| TemplateError::Parse {
                name: name.to_string(),
                source,
            })?;
        template.name = name.to_string();
        template.validate()?;
        Ok(template)
    }

    pub fn validate(&self) -> Result<(), TemplateError> {
        if self.canvas_width == 0 || self.canvas_height == 0 {
            return Err(TemplateError::Invalid {
                name: self.name.clone(),
                reason: format!(
                    "canvas must be positive, got {}x{}",
                    self.canvas_width, self.canvas_height
                ),
            });
        }
        Ok(())
    }

    pub fn background(&self) -> Color {
        self.background_color.unwrap_or(Color::WHITE)
    }

    /// Four stacked 520x390 slots on a 600x1800 strip with a caption.
    pub fn classic_strip() -> Self {
        const SLOT_WIDTH: u32 = 520;
        const SLOT_HEIGHT: u32 = 390;
        const MARGIN: u32 = 40;
        const GAP: u32 = 30;

        let border = Border {
            color: Color([34, 34, 34, 255]),
            stroke_width: 4,
        };
        let photo_slots = (0..4)
            .map(|i| PhotoSlot {
                x: MARGIN,
                y: MARGIN + i * (SLOT_HEIGHT + GAP),
                width: SLOT_WIDTH,
                height: SLOT_HEIGHT,
                border: Some(border.clone()),
            })
            .collect();

        Template {
            name: CLASSIC_STRIP.to_string(),
            canvas_width: 600,
            canvas_height: 1800,
            background_color: Some(Color::WHITE),
            photo_slots,
            text_elements: vec![TextElement {
                content: "PHOTO BOOTH".to_string(),
                x: 300,
                y: 1760,
                font_size: 48.0,
                font_family: "DejaVu Sans".to_string(),
                color: Color([51, 51, 51, 255]),
                horizontal_align: HorizontalAlign::Center,
            }],
        }
    }
}

// Template Source capability
#[async_trait]
pub trait TemplateSource: Send + Sync {
    async fn load_template(&self, name: &str) -> Result<Template, TemplateError>;
    async fn list(&self) -> Result<Vec<String>, TemplateError>;
}

/// Reads `<dir>/<name>.json`. The classic strip is always available, from
/// disk when present and built in otherwise.
pub struct DirectoryTemplateSource {
    dir: PathBuf,
}

impl DirectoryTemplateSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl TemplateSource for DirectoryTemplateSource {
    async fn load_template(&self, name: &str) -> Result<Template, TemplateError> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(TemplateError::NotFound {
                name: name.to_string(),
            });
        }

        let path = self.dir.join(format!("{}.json", name));
        match tokio::fs::read_to_string(&path).await {
            Ok(json) => {
                info!("Loaded template {} from {:?}", name, path);
                Template::from_json(name, &json)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if name == CLASSIC_STRIP {
                    debug!("No {:?} on disk, using built-in classic strip", path);
                    Ok(Template::classic_strip())
                } else {
                    Err(TemplateError::NotFound {
                        name: name.to_string(),
                    })
                }
            }
            Err(e) => Err(TemplateError::Io(e)),
        }
    }

    async fn list(&self) -> Result<Vec<String>, TemplateError> {
        let mut names = vec![CLASSIC_STRIP.to_string()];

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(TemplateError::Io(e)),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }

        names.sort();
        names.dedup();
        Ok(names)
    }
}
