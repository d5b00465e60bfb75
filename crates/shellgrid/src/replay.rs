//! Offline replay of captured terminal output.
//!
//! A capture (for example from `script -q` or a session log) is fed through
//! the emulator in transport-sized chunks, the same way a read pump would,
//! and the resulting screen is reported.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use shellgrid_core::{Dimensions, Position, TerminalSettings};
use shellgrid_emulator::{Terminal, TerminalEvent};
use tokio::sync::broadcast::error::TryRecvError;
use tracing::debug;

/// Bytes handed to the emulator at a time.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// How to replay a capture.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Terminal settings (dimensions, scrollback, read timeout)
    pub terminal: TerminalSettings,
    /// Bytes per `process` call
    pub chunk_size: usize,
}

impl ReplayOptions {
    /// Replay with the given settings and the default chunk size.
    pub fn new(terminal: TerminalSettings) -> Self {
        Self {
            terminal,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Final state of the emulator after a replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ReplayReport {
    /// Bytes processed
    pub bytes: usize,

    /// Grid size
    pub dimensions: Dimensions,

    /// Final cursor position
    pub cursor: Position,

    /// Whether the cursor was left visible
    pub cursor_visible: bool,

    /// Last title set by the stream
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Number of BEL characters seen
    pub bells: usize,

    /// Rows pushed into scrollback
    pub scrollback_len: usize,

    /// Visible rows with trailing blanks trimmed
    pub screen: Vec<String>,
}

impl ReplayReport {
    /// Human-readable rendering: a short header, then the screen without
    /// trailing empty rows.
    pub fn render_text(&self) -> String {
        let mut out = format!(
            "# {}x{} cursor=({}, {}) scrollback={} bytes={}\n",
            self.dimensions.cols,
            self.dimensions.rows,
            self.cursor.row,
            self.cursor.col,
            self.scrollback_len,
            self.bytes
        );
        if let Some(title) = &self.title {
            out.push_str(&format!("# title: {title}\n"));
        }
        if self.bells > 0 {
            out.push_str(&format!("# bells: {}\n", self.bells));
        }

        let used = self
            .screen
            .iter()
            .rposition(|line| !line.is_empty())
            .map_or(0, |last| last + 1);
        for line in &self.screen[..used] {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

/// Feed `bytes` through a fresh terminal and report the final screen.
pub fn replay(bytes: &[u8], options: &ReplayOptions) -> ReplayReport {
    let chunk_size = options.chunk_size.max(1);
    // One chunk raises at most one event per byte.
    let terminal = Terminal::from_settings(&options.terminal).with_event_capacity(chunk_size);
    let mut events = terminal.subscribe();
    let mut bells = 0;

    for chunk in bytes.chunks(chunk_size) {
        terminal.process(chunk);
        loop {
            match events.try_recv() {
                Ok(TerminalEvent::Bell) => bells += 1,
                Ok(TerminalEvent::TitleChanged(title)) => debug!("Title changed: {}", title),
                Err(TryRecvError::Lagged(skipped)) => {
                    debug!("Skipped {} terminal events", skipped);
                }
                Err(_) => break,
            }
        }
    }

    let screen = terminal.screen();
    ReplayReport {
        bytes: bytes.len(),
        dimensions: screen.dimensions,
        cursor: screen.cursor,
        cursor_visible: screen.cursor_visible,
        title: screen.title.clone(),
        bells,
        scrollback_len: screen.scrollback_len,
        screen: screen
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| cell.character)
                    .collect::<String>()
                    .trim_end()
                    .to_string()
            })
            .collect(),
    }
}
