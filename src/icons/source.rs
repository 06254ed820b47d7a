use serde::{Deserialize, Serialize};

use crate::core::constants::{DEFAULT_ICON_SIZE, DEFAULT_MARKER_COLOR, MAX_ICON_DIMENSION};

/// Where a marker's icon artwork comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IconSource {
    NetworkUrl,
    AssetPath,
    Base64,
    #[default]
    DefaultIcon,
}

impl IconSource {
    /// Parse the wire name, returning `None` for unknown values
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "networkUrl" => Some(Self::NetworkUrl),
            "assetPath" => Some(Self::AssetPath),
            "base64" => Some(Self::Base64),
            "defaultIcon" => Some(Self::DefaultIcon),
            _ => None,
        }
    }

    /// Whether this source needs a payload (URL, path or encoded string)
    pub fn needs_payload(&self) -> bool {
        !matches!(self, Self::DefaultIcon)
    }
}

/// Packed 0xRRGGBB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarkerColor(pub u32);

impl MarkerColor {
    pub fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self(((r as u32) << 16) | ((g as u32) << 8) | b as u32)
    }

    /// Build from an ARGB or RGB integer; alpha is discarded
    pub fn from_packed(value: u64) -> Self {
        Self((value & 0x00FF_FFFF) as u32)
    }

    /// Parse `#RRGGBB` or `#AARRGGBB`
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.trim().trim_start_matches('#');
        if digits.len() != 6 && digits.len() != 8 {
            return None;
        }
        u64::from_str_radix(digits, 16).ok().map(Self::from_packed)
    }

    pub fn red(&self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub fn green(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn blue(&self) -> u8 {
        self.0 as u8
    }

    pub fn to_rgba(&self) -> image::Rgba<u8> {
        image::Rgba([self.red(), self.green(), self.blue(), 255])
    }
}

impl Default for MarkerColor {
    fn default() -> Self {
        Self(DEFAULT_MARKER_COLOR)
    }
}

/// Bound an icon edge to `1..=MAX_ICON_DIMENSION`
pub fn clamp_dimension(value: u32) -> u32 {
    value.clamp(1, MAX_ICON_DIMENSION)
}

/// A request for icon artwork at a given size
#[derive(Debug, Clone, PartialEq)]
pub struct IconRequest {
    pub source: IconSource,
    pub data: Option<String>,
    pub width: u32,
    pub height: u32,
    pub color: Option<MarkerColor>,
}

impl IconRequest {
    pub fn new(source: IconSource, data: Option<String>) -> Self {
        Self {
            source,
            data,
            width: DEFAULT_ICON_SIZE.0,
            height: DEFAULT_ICON_SIZE.1,
            color: None,
        }
    }

    /// Default colored dot of the given size
    pub fn default_dot(width: u32, height: u32, color: Option<MarkerColor>) -> Self {
        Self {
            source: IconSource::DefaultIcon,
            data: None,
            width: clamp_dimension(width),
            height: clamp_dimension(height),
            color,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = clamp_dimension(width);
        self.height = clamp_dimension(height);
        self
    }

    pub fn with_color(mut self, color: Option<MarkerColor>) -> Self {
        self.color = color;
        self
    }

    pub fn key(&self) -> IconKey {
        IconKey {
            source: self.source,
            data: self.data.clone(),
            width: self.width,
            height: self.height,
            color: self.color,
        }
    }
}

/// Icon cache key: (source, data, width, height, color)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IconKey {
    pub source: IconSource,
    pub data: Option<String>,
    pub width: u32,
    pub height: u32,
    pub color: Option<MarkerColor>,
}

/// Avatar cache key: (url, size, color). Color is baked into the bitmap.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AvatarKey {
    pub url: String,
    pub size: u32,
    pub color: MarkerColor,
}
