use std::collections::{BTreeMap, HashMap};

use raqote::{LineCap, LineJoin, SolidSource, Source, StrokeStyle};
use serde::{de, Deserialize, Deserializer};

use crate::data::osm::{sorted_tags, Tags, SPECIAL_TAG};

macro_rules! rgb {
    ($r:expr, $g:expr, $b:expr) => {
        Color { r: $r as f32 / 255.0, g: $g as f32 / 255.0, b: $b as f32 / 255.0, a: 1.0 }
    };
}

pub const LIGHT_GREY: Color = rgb!(0x3B, 0x3F, 0x46);
pub const DARK_YELLOW: Color = rgb!(0xEC, 0x9C, 0x04);
pub const LIGHT_YELLOW: Color = rgb!(0xFE, 0xD0, 0x53);

/// Unpremultiplied RGBA, every channel in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

fn channel_to_byte(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

impl Color {
    pub fn rgb(r: u8, g: u8, b: u8) -> Color {
        rgb!(r, g, b)
    }

    /// Parses `#rgb`, `#rrggbb` or `#rrggbbaa`.
    pub fn from_hex(string: &str) -> Option<Color> {
        let digits = string.strip_prefix('#')?;
        // from_str_radix would also take a sign.
        if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let byte = |at: usize| u8::from_str_radix(&digits[at..at + 2], 16).ok();
        let nibble = |at: usize| u8::from_str_radix(&digits[at..at + 1], 16).ok().map(|v| v * 17);

        let (r, g, b, a) = match digits.len() {
            3 => (nibble(0)?, nibble(1)?, nibble(2)?, 0xff),
            6 => (byte(0)?, byte(2)?, byte(4)?, 0xff),
            8 => (byte(0)?, byte(2)?, byte(4)?, byte(6)?),
            _ => return None,
        };
        Some(Color {
            a: a as f32 / 255.0,
            ..Color::rgb(r, g, b)
        })
    }

    pub fn to_source(&self) -> Source<'static> {
        Source::Solid(SolidSource::from_unpremultiplied_argb(
            channel_to_byte(self.a),
            channel_to_byte(self.r),
            channel_to_byte(self.g),
            channel_to_byte(self.b),
        ))
    }
}

struct ColorVisitor;

impl<'de> de::Visitor<'de> for ColorVisitor {
    type Value = Color;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(formatter, "a colour string like '#rgb', '#rrggbb' or '#rrggbbaa'")
    }

    fn visit_str<E>(self, string: &str) -> Result<Self::Value, E> where E: de::Error {
        Color::from_hex(string)
            .ok_or_else(|| de::Error::invalid_value(de::Unexpected::Str(string), &self))
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error> where D: Deserializer<'de> {
        deserializer.deserialize_str(ColorVisitor)
    }
}

#[derive(Deserialize)]
struct StyleDef {
    color: Color,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    dash: f32,
    #[serde(default)]
    opacity: f32,
}

/// Stroke definition. `opacity` scales the colour's alpha; zero or less
/// counts as fully opaque.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(from = "StyleDef")]
pub struct Style {
    pub color: Color,
    pub width: u32,
    pub dash: Option<f32>,
}

impl From<StyleDef> for Style {
    fn from(def: StyleDef) -> Self {
        let opacity = if def.opacity <= 0.0 { 1.0 } else { def.opacity.min(1.0) };
        Style {
            color: Color { a: def.color.a * opacity, ..def.color },
            width: def.width,
            dash: Some(def.dash).filter(|dash| *dash > 0.0),
        }
    }
}

impl Style {
    pub fn new(color: Color, width: u32) -> Self {
        Style { color, width, dash: None }
    }

    pub fn with_width(self, width: Option<&u32>) -> Self {
        match width {
            Some(width) => Style { width: *width, ..self },
            None => self,
        }
    }

    pub fn stroke_style(&self) -> StrokeStyle {
        StrokeStyle {
            cap: LineCap::Round,
            join: LineJoin::Round,
            width: self.width as f32,
            miter_limit: 2.0,
            dash_array: match self.dash {
                Some(dash) => vec![256.0 * dash, 512.0 * dash],
                None => Vec::new(),
            },
            dash_offset: 0.0,
        }
    }
}

/// Zoom → stroke width, replacing the width of the resolved style.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ZoomWidths {
    /// Used when a tag matched the style table.
    pub styled: BTreeMap<u8, u32>,
    /// Used for the default style.
    pub default: BTreeMap<u8, u32>,
}

impl Default for ZoomWidths {
    fn default() -> Self {
        ZoomWidths {
            styled: BTreeMap::from([(13, 8), (14, 8), (15, 6), (16, 6), (17, 4), (18, 4)]),
            default: BTreeMap::from([(13, 5), (14, 5), (15, 4), (16, 4), (17, 3), (18, 3)]),
        }
    }
}

/// Tag key → tag value → style, plus the fallback style.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StyleTable {
    pub default: Style,
    pub tags: HashMap<String, HashMap<String, Style>>,
    pub zoom_widths: ZoomWidths,
}

impl Default for StyleTable {
    fn default() -> Self {
        let mut tags: HashMap<String, HashMap<String, Style>> = HashMap::new();
        tags.entry(SPECIAL_TAG.to_string()).or_default()
            .insert(SPECIAL_TAG.to_string(), Style::new(DARK_YELLOW, 5));
        tags.entry("boundary".to_string()).or_default()
            .insert("administrative".to_string(), Style::new(LIGHT_YELLOW, 3));

        StyleTable {
            default: Style::new(LIGHT_GREY, 2),
            tags,
            zoom_widths: ZoomWidths::default(),
        }
    }
}

impl StyleTable {
    /// Effective style of a way at `zoom`. Tags are visited in ascending key
    /// order and the last matching entry wins.
    pub fn resolve(&self, tags: &Tags, zoom: u8) -> Style {
        let matched = sorted_tags(tags).into_iter()
            .filter_map(|(key, value)| self.tags.get(key)?.get(value))
            .last();

        match matched {
            Some(style) => style.with_width(self.zoom_widths.styled.get(&zoom)),
            None => self.default.with_width(self.zoom_widths.default.get(&zoom)),
        }
    }
}
