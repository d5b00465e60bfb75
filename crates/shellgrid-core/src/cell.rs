//! Cell and color types for terminal grid rendering.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::palette::{self, Rgb};

/// Terminal color supporting the ANSI palette, the 256-color palette and true RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    /// Default foreground color (SGR 39)
    Foreground,
    /// Default background color (SGR 49)
    Background,

    /// Standard ANSI colors (0-7)
    Black,
    /// ANSI Red
    Red,
    /// ANSI Green
    Green,
    /// ANSI Yellow
    Yellow,
    /// ANSI Blue
    Blue,
    /// ANSI Magenta
    Magenta,
    /// ANSI Cyan
    Cyan,
    /// ANSI White
    White,

    /// Bright ANSI colors (8-15)
    BrightBlack,
    /// Bright Red
    BrightRed,
    /// Bright Green
    BrightGreen,
    /// Bright Yellow
    BrightYellow,
    /// Bright Blue
    BrightBlue,
    /// Bright Magenta
    BrightMagenta,
    /// Bright Cyan
    BrightCyan,
    /// Bright White
    BrightWhite,

    /// 256-color palette index (0-255)
    Indexed(u8),

    /// True color RGB (24-bit)
    Rgb {
        /// Red component
        r: u8,
        /// Green component
        g: u8,
        /// Blue component
        b: u8,
    },
}

impl Color {
    /// Standard ANSI color for an SGR offset (0-7). Out of range maps to white.
    pub fn ansi(index: u16) -> Self {
        match index {
            0 => Color::Black,
            1 => Color::Red,
            2 => Color::Green,
            3 => Color::Yellow,
            4 => Color::Blue,
            5 => Color::Magenta,
            6 => Color::Cyan,
            _ => Color::White,
        }
    }

    /// Bright ANSI color for an SGR offset (0-7). Out of range maps to bright white.
    pub fn bright(index: u16) -> Self {
        match index {
            0 => Color::BrightBlack,
            1 => Color::BrightRed,
            2 => Color::BrightGreen,
            3 => Color::BrightYellow,
            4 => Color::BrightBlue,
            5 => Color::BrightMagenta,
            6 => Color::BrightCyan,
            _ => Color::BrightWhite,
        }
    }

    /// Resolve to an RGB triple for painting.
    pub fn to_rgb(self) -> Rgb {
        match self {
            Color::Foreground => palette::DEFAULT_FOREGROUND,
            Color::Background => palette::DEFAULT_BACKGROUND,
            Color::Black => palette::indexed(0),
            Color::Red => palette::indexed(1),
            Color::Green => palette::indexed(2),
            Color::Yellow => palette::indexed(3),
            Color::Blue => palette::indexed(4),
            Color::Magenta => palette::indexed(5),
            Color::Cyan => palette::indexed(6),
            Color::White => palette::indexed(7),
            Color::BrightBlack => palette::indexed(8),
            Color::BrightRed => palette::indexed(9),
            Color::BrightGreen => palette::indexed(10),
            Color::BrightYellow => palette::indexed(11),
            Color::BrightBlue => palette::indexed(12),
            Color::BrightMagenta => palette::indexed(13),
            Color::BrightCyan => palette::indexed(14),
            Color::BrightWhite => palette::indexed(15),
            Color::Indexed(idx) => palette::indexed(idx),
            Color::Rgb { r, g, b } => Rgb::new(r, g, b),
        }
    }
}

/// Text attributes for a terminal cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CellAttributes {
    /// Bold/bright text
    pub bold: bool,
    /// Underlined text
    pub underline: bool,
    /// Reverse video (fg/bg were swapped when the cell was written)
    pub reverse: bool,
}

impl CellAttributes {
    /// Check if attributes are all default (no formatting).
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Create attributes with bold enabled.
    pub fn with_bold(mut self) -> Self {
        self.bold = true;
        self
    }

    /// Create attributes with reverse video enabled.
    pub fn with_reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Create attributes with underline enabled.
    pub fn with_underline(mut self) -> Self {
        self.underline = true;
        self
    }
}

/// Single character cell in the terminal grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    /// Unicode character (space if empty)
    pub character: char,
    /// Foreground color
    pub fg: Color,
    /// Background color
    pub bg: Color,
    /// Text attributes
    pub attrs: CellAttributes,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            character: ' ',
            fg: Color::Foreground,
            bg: Color::Background,
            attrs: CellAttributes::default(),
        }
    }
}

impl Cell {
    /// Create a new cell with a character and default styling.
    pub fn new(character: char) -> Self {
        Self {
            character,
            ..Default::default()
        }
    }

    /// Create a cell with character and foreground color.
    pub fn with_fg(character: char, fg: Color) -> Self {
        Self {
            character,
            fg,
            ..Default::default()
        }
    }

    /// Check if cell is empty (space with default attributes and colors).
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
