use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque-or-translucent color with 16-bit channels and an optional float alpha.
///
/// This is the value space the compositor works in: channels range over
/// `0..=65535`, alpha over `0.0..=1.0`, and a missing alpha means fully opaque.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u16,
    pub g: u16,
    pub b: u16,
    pub a: Option<f32>,
}

impl Color {
    /// Create an opaque color from 16-bit channels.
    pub const fn rgb16(r: u16, g: u16, b: u16) -> Self {
        Self { r, g, b, a: None }
    }

    /// Create a color from 16-bit channels and an explicit alpha.
    pub fn rgba16(r: u16, g: u16, b: u16, a: f32) -> Self {
        Self {
            r,
            g,
            b,
            a: Some(a.clamp(0.0, 1.0)),
        }
    }

    /// Widen an 8-bit channel into the 16-bit range (`0xAB` becomes `0xABAB`).
    pub fn widen(v: u8) -> u16 {
        (v as u16) * 257
    }

    /// Narrow a 16-bit channel to 8 bits with rounding.
    pub fn narrow(v: u16) -> u8 {
        ((v as u32 * 255 + 32767) / 65535) as u8
    }

    /// Parse `#RRGGBB`, `#RRGGBBAA` (8-bit digits) or `#RRRRGGGGBBBB` (16-bit digits).
    pub fn from_hex(hex: &str) -> Result<Self, ColorError> {
        let hex = hex.trim_start_matches('#');
        let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| ColorError::InvalidHex);
        let word = |i: usize| u16::from_str_radix(&hex[i..i + 4], 16).map_err(|_| ColorError::InvalidHex);
        if !hex.is_ascii() {
            return Err(ColorError::InvalidHex);
        }
        match hex.len() {
            6 => Ok(Self::rgb16(
                Self::widen(byte(0)?),
                Self::widen(byte(2)?),
                Self::widen(byte(4)?),
            )),
            8 => Ok(Self::rgba16(
                Self::widen(byte(0)?),
                Self::widen(byte(2)?),
                Self::widen(byte(4)?),
                byte(6)? as f32 / 255.0,
            )),
            12 => Ok(Self::rgb16(word(0)?, word(4)?, word(8)?)),
            _ => Err(ColorError::InvalidHex),
        }
    }

    /// Effective alpha, treating a missing alpha as opaque.
    pub fn alpha(&self) -> f32 {
        self.a.unwrap_or(1.0)
    }

    pub fn to_rgb8(&self) -> [u8; 3] {
        [Self::narrow(self.r), Self::narrow(self.g), Self::narrow(self.b)]
    }

    pub const BLACK: Color = Color::rgb16(0, 0, 0);
    pub const WHITE: Color = Color::rgb16(65535, 65535, 65535);
    pub const RED: Color = Color::rgb16(65535, 0, 0);
    pub const GREEN: Color = Color::rgb16(0, 65535, 0);
    pub const BLUE: Color = Color::rgb16(0, 0, 65535);
}

impl Default for Color {
    fn default() -> Self {
        Color::BLACK
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.a {
            None => write!(f, "#{:04X}{:04X}{:04X}", self.r, self.g, self.b),
            Some(a) => {
                let [r, g, b] = self.to_rgb8();
                write!(
                    f,
                    "#{:02X}{:02X}{:02X}{:02X}",
                    r,
                    g,
                    b,
                    (a.clamp(0.0, 1.0) * 255.0).round() as u8
                )
            }
        }
    }
}

impl TryFrom<String> for Color {
    type Error = ColorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Color::from_hex(&value)
    }
}

impl From<Color> for String {
    fn from(value: Color) -> Self {
        value.to_string()
    }
}

/// Errors related to color parsing.
#[derive(Debug, thiserror::Error)]
pub enum ColorError {
    #[error("invalid hex color string")]
    InvalidHex,
}
