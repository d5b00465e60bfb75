//! ANSI/VT escape sequence parser using the VTE crate.
//!
//! `vte` owns the byte-level state machine (ground, escape, CSI, OSC and
//! string states, including UTF-8 decoding across calls). [`Performer`]
//! applies the dispatched actions to a [`Grid`].

use tracing::{debug, trace};
use vte::{Params, Perform};

use shellgrid_core::{CellAttributes, Color, Position};

use crate::grid::Grid;

/// Notification raised while processing output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalEvent {
    /// BEL (0x07) received
    Bell,
    /// Window title set through OSC 0, 1 or 2
    TitleChanged(String),
}

/// Applies parsed actions to the grid.
#[derive(Debug)]
pub struct Performer {
    /// Terminal grid state
    grid: Grid,
    /// Last title set by OSC
    title: Option<String>,
    /// Events raised since the last drain
    events: Vec<TerminalEvent>,
}

impl Performer {
    /// Create a new performer owning the given grid.
    pub fn new(grid: Grid) -> Self {
        Self {
            grid,
            title: None,
            events: Vec::new(),
        }
    }

    /// Get a reference to the grid.
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Get a mutable reference to the grid.
    pub fn grid_mut(&mut self) -> &mut Grid {
        &mut self.grid
    }

    /// Last title set by the remote side.
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Take the events raised since the last call.
    pub fn take_events(&mut self) -> Vec<TerminalEvent> {
        std::mem::take(&mut self.events)
    }

    /// Process SGR (Select Graphic Rendition) parameters.
    fn process_sgr(&mut self, params: &Params) {
        let mut iter = params.iter();

        while let Some(param) = iter.next() {
            let code = param[0];

            match code {
                // Reset
                0 => self.grid.reset_attributes(),

                1 => self.update_attrs(|attrs| attrs.bold = true),
                4 => self.update_attrs(|attrs| attrs.underline = true),
                7 => self.update_attrs(|attrs| attrs.reverse = true),
                22 => self.update_attrs(|attrs| attrs.bold = false),
                24 => self.update_attrs(|attrs| attrs.underline = false),
                27 => self.update_attrs(|attrs| attrs.reverse = false),

                30..=37 => self.grid.set_current_fg(Color::ansi(code - 30)),
                39 => self.grid.set_current_fg(Color::Foreground),
                40..=47 => self.grid.set_current_bg(Color::ansi(code - 40)),
                49 => self.grid.set_current_bg(Color::Background),
                90..=97 => self.grid.set_current_fg(Color::bright(code - 90)),
                100..=107 => self.grid.set_current_bg(Color::bright(code - 100)),

                // Extended colors: 38;5;n / 38;2;r;g;b or the colon form 38:5:n
                38 | 48 => {
                    let color = if param.len() > 1 {
                        extended_color_from_subparams(&param[1..])
                    } else {
                        extended_color(&mut iter)
                    };
                    match color {
                        Some(color) if code == 38 => self.grid.set_current_fg(color),
                        Some(color) => self.grid.set_current_bg(color),
                        None => trace!("Incomplete extended color for SGR {}", code),
                    }
                }

                _ => trace!("Ignoring SGR {}", code),
            }
        }
    }

    fn update_attrs(&mut self, f: impl FnOnce(&mut CellAttributes)) {
        let mut attrs = *self.grid.current_attrs();
        f(&mut attrs);
        self.grid.set_current_attrs(attrs);
    }

    /// Handle DEC private mode set/reset. Only cursor visibility is tracked.
    fn set_private_mode(&mut self, params: &Params, enable: bool) {
        for param in params.iter() {
            match param[0] {
                25 => self.grid.cursor_mut().visible = enable,
                mode => trace!("Ignoring private mode {} (set={})", mode, enable),
            }
        }
    }
}

/// Color following 38/48 in semicolon form, consuming its parameters.
fn extended_color<'a>(iter: &mut impl Iterator<Item = &'a [u16]>) -> Option<Color> {
    match iter.next()?[0] {
        5 => {
            let index = iter.next()?[0];
            Some(Color::Indexed(index.min(255) as u8))
        }
        2 => {
            let r = iter.next()?[0];
            let g = iter.next()?[0];
            let b = iter.next()?[0];
            Some(rgb(r, g, b))
        }
        _ => None,
    }
}

/// Color following 38/48 in colon form (`38:5:n`, `38:2:r:g:b`, `38:2:cs:r:g:b`).
fn extended_color_from_subparams(sub: &[u16]) -> Option<Color> {
    match sub {
        [5, index, ..] => Some(Color::Indexed((*index).min(255) as u8)),
        [2, _, r, g, b, ..] => Some(rgb(*r, *g, *b)),
        [2, r, g, b] => Some(rgb(*r, *g, *b)),
        _ => None,
    }
}

fn rgb(r: u16, g: u16, b: u16) -> Color {
    Color::Rgb {
        r: r.min(255) as u8,
        g: g.min(255) as u8,
        b: b.min(255) as u8,
    }
}

/// Numeric parameter at `index`; missing or zero values yield `default`.
fn param(params: &Params, index: usize, default: u16) -> u16 {
    match params.iter().nth(index).map(|p| p[0]) {
        Some(0) | None => default,
        Some(value) => value,
    }
}

impl Perform for Performer {
    /// Print a character to the terminal.
    fn print(&mut self, c: char) {
        self.grid.put_char(c);
    }

    /// Execute a control character.
    fn execute(&mut self, byte: u8) {
        match byte {
            // Bell (BEL)
            0x07 => self.events.push(TerminalEvent::Bell),

            // Backspace (BS)
            0x08 => self.grid.backspace(),

            // Horizontal Tab (HT)
            0x09 => self.grid.tab(),

            // Line Feed (LF)
            0x0A => self.grid.line_feed(),

            // Carriage Return (CR)
            0x0D => self.grid.carriage_return(),

            _ => trace!("Ignoring control byte {:#04x}", byte),
        }
    }

    /// OSC (Operating System Command) dispatch.
    fn osc_dispatch(&mut self, params: &[&[u8]], _bell_terminated: bool) {
        let Some(code) = params.first() else {
            return;
        };

        match std::str::from_utf8(code).ok().and_then(|c| c.parse::<u16>().ok()) {
            Some(0..=2) if params.len() > 1 => {
                let title = params[1..]
                    .iter()
                    .map(|part| String::from_utf8_lossy(part))
                    .collect::<Vec<_>>()
                    .join(";");
                self.title = Some(title.clone());
                self.events.push(TerminalEvent::TitleChanged(title));
            }
            Some(code) => trace!("Ignoring OSC {}", code),
            None => debug!(
                "Malformed OSC sequence: {:?}",
                String::from_utf8_lossy(code)
            ),
        }
    }

    /// CSI (Control Sequence Introducer) dispatch.
    fn csi_dispatch(&mut self, params: &Params, intermediates: &[u8], ignore: bool, c: char) {
        if ignore {
            debug!("Dropping oversized CSI sequence ending in {:?}", c);
            return;
        }

        let private = intermediates.first() == Some(&b'?');
        let dims = self.grid.dimensions();

        match (private, c) {
            // Cursor Up (CUU)
            (false, 'A') => self.grid.cursor_up(param(params, 0, 1)),

            // Cursor Down (CUD)
            (false, 'B') => self.grid.cursor_down(param(params, 0, 1)),

            // Cursor Forward (CUF)
            (false, 'C') => self.grid.cursor_forward(param(params, 0, 1)),

            // Cursor Backward (CUB)
            (false, 'D') => self.grid.cursor_backward(param(params, 0, 1)),

            // Cursor Next Line (CNL)
            (false, 'E') => {
                self.grid.cursor_down(param(params, 0, 1));
                self.grid.carriage_return();
            }

            // Cursor Previous Line (CPL)
            (false, 'F') => {
                self.grid.cursor_up(param(params, 0, 1));
                self.grid.carriage_return();
            }

            // Cursor Horizontal Absolute (CHA)
            (false, 'G') => self.grid.set_cursor_col(param(params, 0, 1) - 1),

            // Cursor Position (CUP / HVP)
            (false, 'H') | (false, 'f') => {
                let row = param(params, 0, 1) - 1;
                let col = param(params, 1, 1) - 1;
                self.grid.move_cursor_to(Position::new(row, col));
            }

            // Line Position Absolute (VPA)
            (false, 'd') => self.grid.set_cursor_row(param(params, 0, 1) - 1),

            // Erase in Display (ED)
            (false, 'J') => self.grid.erase_display(param(params, 0, 0)),

            // Erase in Line (EL)
            (false, 'K') => self.grid.erase_line(param(params, 0, 0)),

            // Insert / Delete Lines (IL / DL)
            (false, 'L') => self.grid.insert_lines(param(params, 0, 1)),
            (false, 'M') => self.grid.delete_lines(param(params, 0, 1)),

            // Delete / Insert Characters (DCH / ICH)
            (false, 'P') => self.grid.delete_chars(param(params, 0, 1)),
            (false, '@') => self.grid.insert_chars(param(params, 0, 1)),

            // Scroll Up / Down (SU / SD)
            (false, 'S') => self.grid.scroll_up(param(params, 0, 1)),
            (false, 'T') => self.grid.scroll_down(param(params, 0, 1)),

            // SGR (Select Graphic Rendition)
            (false, 'm') => self.process_sgr(params),

            // Set Top and Bottom Margins (DECSTBM)
            (false, 'r') => {
                let top = param(params, 0, 1);
                let bottom = param(params, 1, dims.rows);
                self.grid.set_scroll_region(top, bottom);
            }

            // Save / Restore Cursor Position (SCP / RCP)
            (false, 's') => self.grid.save_cursor(),
            (false, 'u') => self.grid.restore_cursor(),

            // Set / Reset Mode
            (true, 'h') => self.set_private_mode(params, true),
            (true, 'l') => self.set_private_mode(params, false),
            (false, 'h') | (false, 'l') => trace!("Ignoring ANSI mode change"),

            _ => trace!("Ignoring CSI {:?} (private={})", c, private),
        }
    }

    /// ESC (Escape) dispatch.
    fn esc_dispatch(&mut self, intermediates: &[u8], _ignore: bool, byte: u8) {
        if !intermediates.is_empty() {
            trace!("Ignoring ESC with intermediates {:?}", intermediates);
            return;
        }

        match byte {
            // Save / Restore Cursor (DECSC / DECRC)
            b'7' => self.grid.save_cursor(),
            b'8' => self.grid.restore_cursor(),

            // Index (IND)
            b'D' => self.grid.line_feed(),

            // Reverse Index (RI)
            b'M' => self.grid.reverse_line_feed(),

            // Full Reset (RIS)
            b'c' => {
                self.grid.reset();
                self.title = None;
            }

            _ => trace!("Ignoring ESC {:?}", byte as char),
        }
    }
}

/// ANSI parser: a persistent VTE state machine driving a [`Performer`].
///
/// The state machine survives across [`Parser::process`] calls, so a
/// sequence split over two reads is interpreted as one.
pub struct Parser {
    machine: vte::Parser,
    performer: Performer,
}

impl Parser {
    /// Create a new parser with the given grid.
    pub fn new(grid: Grid) -> Self {
        Self {
            machine: vte::Parser::new(),
            performer: Performer::new(grid),
        }
    }

    /// Get a reference to the grid.
    pub fn grid(&self) -> &Grid {
        self.performer.grid()
    }

    /// Get a mutable reference to the grid.
    pub fn grid_mut(&mut self) -> &mut Grid {
        self.performer.grid_mut()
    }

    /// Consume the parser and return the grid.
    pub fn into_grid(self) -> Grid {
        self.performer.grid
    }

    /// Get the performer.
    pub fn performer(&self) -> &Performer {
        &self.performer
    }

    /// Take the events raised since the last call.
    pub fn take_events(&mut self) -> Vec<TerminalEvent> {
        self.performer.take_events()
    }

    /// Process bytes through the VTE parser.
    ///
    /// Returns the number of bytes consumed.
    pub fn process(&mut self, bytes: &[u8]) -> usize {
        for byte in bytes {
            self.machine.advance(&mut self.performer, *byte);
        }
        bytes.len()
    }

    /// Drop any half-parsed sequence and reset the grid (RIS).
    pub fn reset(&mut self) {
        self.machine = vte::Parser::new();
        self.performer.grid.reset();
        self.performer.title = None;
    }
}

impl std::fmt::Debug for Parser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parser")
            .field("performer", &self.performer)
            .finish_non_exhaustive()
    }
}
