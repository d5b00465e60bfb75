//! Fixed 256-entry color palette.
//!
//! Indices 0-15 are the ANSI colors, 16-231 a 6x6x6 color cube and
//! 232-255 a 24-step grayscale ramp.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// An RGB triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Rgb {
    /// Red component
    pub r: u8,
    /// Green component
    pub g: u8,
    /// Blue component
    pub b: u8,
}

impl Rgb {
    /// Create a new RGB triple.
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Foreground used for cells without an explicit color.
pub const DEFAULT_FOREGROUND: Rgb = Rgb::new(255, 255, 255);

/// Background used for cells without an explicit color.
pub const DEFAULT_BACKGROUND: Rgb = Rgb::new(0, 0, 0);

const ANSI: [Rgb; 16] = [
    Rgb::new(0, 0, 0),
    Rgb::new(255, 0, 0),
    Rgb::new(0, 255, 0),
    Rgb::new(255, 255, 0),
    Rgb::new(0, 0, 255),
    Rgb::new(255, 0, 255),
    Rgb::new(0, 255, 255),
    Rgb::new(255, 255, 255),
    Rgb::new(68, 68, 68),
    Rgb::new(255, 85, 85),
    Rgb::new(85, 255, 85),
    Rgb::new(255, 255, 85),
    Rgb::new(85, 85, 255),
    Rgb::new(255, 85, 255),
    Rgb::new(85, 255, 255),
    Rgb::new(255, 255, 255),
];

/// Resolve a 256-color palette index.
pub fn indexed(index: u8) -> Rgb {
    match index {
        0..=15 => ANSI[index as usize],
        16..=231 => {
            let i = index - 16;
            Rgb::new((i / 36) * 51, ((i / 6) % 6) * 51, (i % 6) * 51)
        }
        _ => {
            let gray = (index - 232) * 10 + 8;
            Rgb::new(gray, gray, gray)
        }
    }
}
