//! Thread-safe terminal emulator facade.
//!
//! The byte-consuming path (a session's read pump) and any number of
//! renderers share one [`Terminal`]. Mutation takes the write lock for the
//! duration of one `process` call; renderer reads copy cells out under the
//! read lock, and the `try_*` variants give up after a bounded wait.

use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use shellgrid_core::{Cell, Dimensions, Position, TerminalSettings};

use crate::grid::{DirtyRegion, Grid, DEFAULT_SCROLLBACK};
use crate::parser::{Parser, TerminalEvent};

/// Longest a renderer read waits for the grid lock by default.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Bell/title events buffered per subscriber by default.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Copy of the visible screen taken under a single read lock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenSnapshot {
    /// Grid dimensions
    pub dimensions: Dimensions,
    /// Cursor position
    pub cursor: Position,
    /// Whether the cursor is shown
    pub cursor_visible: bool,
    /// Visible rows, top to bottom
    pub rows: Vec<Vec<Cell>>,
    /// Rows held in scrollback
    pub scrollback_len: usize,
    /// Last title set by the remote side
    pub title: Option<String>,
}

impl ScreenSnapshot {
    /// Screen text, one line per row, trailing blanks trimmed.
    pub fn text(&self) -> String {
        self.rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|c| c.character)
                    .collect::<String>()
                    .trim_end()
                    .to_string()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A terminal emulator: grid, parser state and event channel.
pub struct Terminal {
    parser: RwLock<Parser>,
    events: broadcast::Sender<TerminalEvent>,
    read_timeout: Duration,
}

impl Terminal {
    /// Create a terminal with default scrollback and read timeout.
    pub fn new(dimensions: Dimensions) -> Self {
        Self::with_options(dimensions, DEFAULT_SCROLLBACK, DEFAULT_READ_TIMEOUT)
    }

    /// Create a terminal from configuration.
    pub fn from_settings(settings: &TerminalSettings) -> Self {
        Self::with_options(
            settings.dimensions(),
            settings.scrollback_lines,
            settings.read_timeout(),
        )
    }

    /// Create a terminal with explicit scrollback capacity and read timeout.
    pub fn with_options(
        dimensions: Dimensions,
        scrollback_lines: usize,
        read_timeout: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        Self {
            parser: RwLock::new(Parser::new(Grid::with_scrollback(
                dimensions,
                scrollback_lines,
            ))),
            events,
            read_timeout,
        }
    }

    /// Replace the event channel with one buffering `capacity` events per
    /// subscriber. Call before subscribing; existing receivers are
    /// disconnected.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        self.events = events;
        self
    }

    /// Subscribe to bell and title events.
    ///
    /// Receivers only see events raised after they subscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<TerminalEvent> {
        self.events.subscribe()
    }

    /// Feed remote output through the emulator.
    ///
    /// Bytes are applied in order under the write lock; events are
    /// published after the lock is released.
    pub fn process(&self, bytes: &[u8]) {
        let events = {
            let mut parser = self.parser.write();
            parser.process(bytes);
            parser.take_events()
        };
        self.publish(events);
    }

    fn publish(&self, events: Vec<TerminalEvent>) {
        for event in events {
            // No receivers is fine; events are advisory.
            let _ = self.events.send(event);
        }
    }

    /// Resize the grid. Zero or unchanged dimensions are ignored.
    pub fn resize(&self, dimensions: Dimensions) {
        let mut parser = self.parser.write();
        let before = parser.grid().dimensions();
        parser.grid_mut().resize(dimensions);
        debug!(
            "Terminal resized: {}x{} -> {}x{}",
            before.rows,
            before.cols,
            parser.grid().dimensions().rows,
            parser.grid().dimensions().cols
        );
    }

    /// Full reset, dropping any partially received sequence.
    pub fn reset(&self) {
        self.parser.write().reset();
    }

    /// Current grid dimensions.
    pub fn dimensions(&self) -> Dimensions {
        self.parser.read().grid().dimensions()
    }

    /// Current cursor position.
    pub fn cursor(&self) -> Position {
        self.parser.read().grid().cursor().position
    }

    /// Whether the cursor is shown.
    pub fn cursor_visible(&self) -> bool {
        self.parser.read().grid().cursor_visible()
    }

    /// Move the cursor, clamped into the grid.
    pub fn set_cursor(&self, position: Position) {
        self.parser.write().grid_mut().move_cursor_to(position);
    }

    /// Copy of the cell at (row, col).
    pub fn cell(&self, row: u16, col: u16) -> Option<Cell> {
        self.parser.read().grid().cell(row, col).copied()
    }

    /// Copy of a visible row.
    pub fn row(&self, row: u16) -> Option<Vec<Cell>> {
        self.parser.read().grid().row(row).map(<[Cell]>::to_vec)
    }

    /// Copy of a visible row, waiting at most the read timeout for the lock.
    ///
    /// Returns None when the row is out of bounds or the grid is busy; a
    /// renderer should skip this redraw and wait for the next dirty event.
    pub fn try_row(&self, row: u16) -> Option<Vec<Cell>> {
        let parser = self.parser.try_read_for(self.read_timeout)?;
        parser.grid().row(row).map(<[Cell]>::to_vec)
    }

    /// Copy of a scrollback row; index 0 is the most recently evicted.
    pub fn scrollback_row(&self, index: usize) -> Option<Vec<Cell>> {
        self.parser
            .read()
            .grid()
            .scrollback_row(index)
            .map(<[Cell]>::to_vec)
    }

    /// Rows held in scrollback.
    pub fn scrollback_len(&self) -> usize {
        self.parser.read().grid().scrollback_len()
    }

    /// Last title set by the remote side.
    pub fn title(&self) -> Option<String> {
        self.parser.read().performer().title().map(str::to_string)
    }

    /// Copy the whole visible screen.
    pub fn screen(&self) -> ScreenSnapshot {
        Self::snapshot_of(&self.parser.read())
    }

    /// Copy the whole visible screen, waiting at most the read timeout.
    pub fn try_screen(&self) -> Option<ScreenSnapshot> {
        let parser = self.parser.try_read_for(self.read_timeout)?;
        Some(Self::snapshot_of(&parser))
    }

    fn snapshot_of(parser: &Parser) -> ScreenSnapshot {
        let grid = parser.grid();
        let dimensions = grid.dimensions();
        ScreenSnapshot {
            dimensions,
            cursor: grid.cursor().position,
            cursor_visible: grid.cursor_visible(),
            rows: (0..dimensions.rows)
                .filter_map(|row| grid.row(row).map(<[Cell]>::to_vec))
                .collect(),
            scrollback_len: grid.scrollback_len(),
            title: parser.performer().title().map(str::to_string),
        }
    }

    /// Full screen text, one line per row, trailing blanks kept.
    pub fn screen_text(&self) -> String {
        self.parser.read().grid().screen_text()
    }

    /// Screen text with trailing blanks trimmed from each line.
    pub fn to_plain_text(&self) -> String {
        self.parser.read().grid().to_plain_text()
    }

    /// Text-only snapshot of the visible screen.
    ///
    /// Colors and attributes are not included.
    pub fn save_snapshot(&self) -> String {
        self.screen_text()
    }

    /// Write a text snapshot back onto the screen, starting at the top-left.
    pub fn restore_snapshot(&self, data: &str) {
        self.parser.write().grid_mut().restore_text(data);
    }

    /// Changed area since the last [`Terminal::clear_dirty`].
    pub fn dirty_region(&self) -> Option<DirtyRegion> {
        self.parser.read().grid().dirty_region()
    }

    /// Forget the dirty area after a redraw.
    pub fn clear_dirty(&self) {
        self.parser.write().grid_mut().clear_dirty();
    }
}

impl std::fmt::Debug for Terminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terminal")
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}
