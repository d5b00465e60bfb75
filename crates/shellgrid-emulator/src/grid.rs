//! Terminal grid state buffer, cursor, scroll region and scrollback.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use shellgrid_core::{Cell, CellAttributes, Color, Dimensions, Position};

/// Default number of rows kept in scrollback.
pub const DEFAULT_SCROLLBACK: usize = 10_000;

/// Cursor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    /// Current position.
    ///
    /// The column may equal the column count after the last column of a row
    /// is written; the wrap happens on the next printed character.
    pub position: Position,
    /// Visibility (DECTCEM)
    pub visible: bool,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            position: Position::origin(),
            visible: true,
        }
    }
}

impl Cursor {
    /// Create a new cursor at origin.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create cursor at specific position.
    pub fn at(position: Position) -> Self {
        Self {
            position,
            visible: true,
        }
    }
}

/// Rectangle of cells changed since the consumer last cleared it.
///
/// Bounds are inclusive and 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirtyRegion {
    /// Leftmost dirty column
    pub min_x: u16,
    /// Rightmost dirty column
    pub max_x: u16,
    /// Topmost dirty row
    pub min_y: u16,
    /// Bottommost dirty row
    pub max_y: u16,
}

impl DirtyRegion {
    fn point(x: u16, y: u16) -> Self {
        Self {
            min_x: x,
            max_x: x,
            min_y: y,
            max_y: y,
        }
    }

    fn union(self, other: DirtyRegion) -> Self {
        Self {
            min_x: self.min_x.min(other.min_x),
            max_x: self.max_x.max(other.max_x),
            min_y: self.min_y.min(other.min_y),
            max_y: self.max_y.max(other.max_y),
        }
    }

    fn clamped(self, dims: Dimensions) -> Self {
        let last_col = dims.cols.saturating_sub(1);
        let last_row = dims.rows.saturating_sub(1);
        Self {
            min_x: self.min_x.min(last_col),
            max_x: self.max_x.min(last_col),
            min_y: self.min_y.min(last_row),
            max_y: self.max_y.min(last_row),
        }
    }

    /// Number of dirty columns.
    pub fn width(&self) -> u16 {
        self.max_x - self.min_x + 1
    }

    /// Number of dirty rows.
    pub fn height(&self) -> u16 {
        self.max_y - self.min_y + 1
    }

    /// Whether the cell at (row, col) lies inside the region.
    pub fn contains(&self, row: u16, col: u16) -> bool {
        (self.min_y..=self.max_y).contains(&row) && (self.min_x..=self.max_x).contains(&col)
    }
}

/// Terminal grid state buffer.
#[derive(Debug)]
pub struct Grid {
    /// Cell storage (row-major order)
    cells: Vec<Cell>,
    /// Grid dimensions
    dimensions: Dimensions,
    /// Cursor state
    cursor: Cursor,
    /// Position stored by DECSC / CSI s
    saved_cursor: Position,
    /// Scroll region (top, bottom) - 0-indexed, inclusive
    scroll_region: (u16, u16),
    /// Evicted rows, most recent first
    scrollback: VecDeque<Vec<Cell>>,
    /// Maximum rows held in scrollback
    scrollback_capacity: usize,
    /// Current cell attributes for new characters
    current_attrs: CellAttributes,
    /// Current foreground color
    current_fg: Color,
    /// Current background color
    current_bg: Color,
    /// Changed area since the last `clear_dirty`
    dirty: Option<DirtyRegion>,
}

impl Grid {
    /// Create a new grid with the given dimensions and default scrollback.
    ///
    /// All cells are initialized to default (empty space). Zero dimensions
    /// are raised to one row or column.
    pub fn new(dimensions: Dimensions) -> Self {
        Self::with_scrollback(dimensions, DEFAULT_SCROLLBACK)
    }

    /// Create a new grid with an explicit scrollback capacity.
    pub fn with_scrollback(dimensions: Dimensions, scrollback_capacity: usize) -> Self {
        let dimensions = Dimensions::new(dimensions.rows.max(1), dimensions.cols.max(1));
        Self {
            cells: vec![Cell::default(); dimensions.cell_count()],
            dimensions,
            cursor: Cursor::default(),
            saved_cursor: Position::origin(),
            scroll_region: (0, dimensions.rows - 1),
            scrollback: VecDeque::new(),
            scrollback_capacity,
            current_attrs: CellAttributes::default(),
            current_fg: Color::Foreground,
            current_bg: Color::Background,
            dirty: None,
        }
    }

    fn index(&self, row: u16, col: u16) -> usize {
        row as usize * self.dimensions.cols as usize + col as usize
    }

    /// Get cell at position (immutable).
    ///
    /// Returns None if position is out of bounds.
    pub fn cell(&self, row: u16, col: u16) -> Option<&Cell> {
        if row < self.dimensions.rows && col < self.dimensions.cols {
            self.cells.get(self.index(row, col))
        } else {
            None
        }
    }

    /// Get mutable cell at position.
    ///
    /// Returns None if position is out of bounds. The caller is responsible
    /// for marking the cell dirty.
    pub fn cell_mut(&mut self, row: u16, col: u16) -> Option<&mut Cell> {
        if row < self.dimensions.rows && col < self.dimensions.cols {
            let idx = self.index(row, col);
            self.cells.get_mut(idx)
        } else {
            None
        }
    }

    /// Get entire row as a slice.
    ///
    /// Returns None if row is out of bounds.
    pub fn row(&self, row: u16) -> Option<&[Cell]> {
        if row < self.dimensions.rows {
            let start = self.index(row, 0);
            let end = start + self.dimensions.cols as usize;
            Some(&self.cells[start..end])
        } else {
            None
        }
    }

    /// Row evicted into scrollback; index 0 is the most recent.
    pub fn scrollback_row(&self, index: usize) -> Option<&[Cell]> {
        self.scrollback.get(index).map(Vec::as_slice)
    }

    /// Number of rows held in scrollback.
    pub fn scrollback_len(&self) -> usize {
        self.scrollback.len()
    }

    /// Maximum rows held in scrollback.
    pub fn scrollback_capacity(&self) -> usize {
        self.scrollback_capacity
    }

    /// Full screen text, one line per row, trailing blanks kept.
    pub fn screen_text(&self) -> String {
        let mut text = String::with_capacity(self.cells.len() + self.dimensions.rows as usize);
        for row in 0..self.dimensions.rows {
            if row > 0 {
                text.push('\n');
            }
            if let Some(cells) = self.row(row) {
                text.extend(cells.iter().map(|c| c.character));
            }
        }
        text
    }

    /// Convert entire grid to plain text.
    ///
    /// Trailing whitespace is trimmed from each line.
    pub fn to_plain_text(&self) -> String {
        self.screen_text()
            .lines()
            .map(|l| l.trim_end())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Write text row by row starting at the top-left corner.
    ///
    /// Characters land with default colors and attributes. Lines and
    /// characters beyond the grid are dropped; cells not covered by the
    /// text keep their content.
    pub fn restore_text(&mut self, text: &str) {
        for (row, line) in text.split('\n').enumerate() {
            if row >= self.dimensions.rows as usize {
                break;
            }
            for (col, ch) in line.chars().enumerate() {
                if col >= self.dimensions.cols as usize {
                    break;
                }
                if let Some(cell) = self.cell_mut(row as u16, col as u16) {
                    *cell = Cell::new(ch);
                }
            }
        }
        self.mark_full_dirty();
    }

    /// Get cursor reference.
    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// Get mutable cursor reference.
    pub fn cursor_mut(&mut self) -> &mut Cursor {
        &mut self.cursor
    }

    /// Get dimensions.
    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Check if cursor is visible.
    pub fn cursor_visible(&self) -> bool {
        self.cursor.visible
    }

    /// Scroll region as (top, bottom), inclusive.
    pub fn scroll_region(&self) -> (u16, u16) {
        self.scroll_region
    }

    /// Get current cell attributes.
    pub fn current_attrs(&self) -> &CellAttributes {
        &self.current_attrs
    }

    /// Set current cell attributes.
    pub fn set_current_attrs(&mut self, attrs: CellAttributes) {
        self.current_attrs = attrs;
    }

    /// Get current foreground color.
    pub fn current_fg(&self) -> Color {
        self.current_fg
    }

    /// Set current foreground color.
    pub fn set_current_fg(&mut self, color: Color) {
        self.current_fg = color;
    }

    /// Get current background color.
    pub fn current_bg(&self) -> Color {
        self.current_bg
    }

    /// Set current background color.
    pub fn set_current_bg(&mut self, color: Color) {
        self.current_bg = color;
    }

    /// Reset colors and attributes to defaults (SGR 0).
    pub fn reset_attributes(&mut self) {
        self.current_attrs = CellAttributes::default();
        self.current_fg = Color::Foreground;
        self.current_bg = Color::Background;
    }

    // Dirty tracking

    /// Changed area since the last [`Grid::clear_dirty`], or None if
    /// nothing needs redrawing.
    pub fn dirty_region(&self) -> Option<DirtyRegion> {
        self.dirty.map(|region| region.clamped(self.dimensions))
    }

    /// Forget the dirty area after a redraw.
    pub fn clear_dirty(&mut self) {
        self.dirty = None;
    }

    fn mark(&mut self, region: DirtyRegion) {
        self.dirty = Some(match self.dirty {
            Some(existing) => existing.union(region),
            None => region,
        });
    }

    fn mark_dirty(&mut self, row: u16, col: u16) {
        self.mark(DirtyRegion::point(col, row));
    }

    fn mark_rows_dirty(&mut self, top: u16, bottom: u16) {
        self.mark(DirtyRegion {
            min_x: 0,
            max_x: self.dimensions.cols - 1,
            min_y: top,
            max_y: bottom,
        });
    }

    /// Mark the whole screen dirty.
    pub fn mark_full_dirty(&mut self) {
        self.mark_rows_dirty(0, self.dimensions.rows - 1);
    }

    // Printing and control characters

    /// Write a character at the cursor and advance.
    ///
    /// A cursor parked past the last column wraps to the next line first.
    /// Reverse video swaps the colors stored in the cell.
    pub fn put_char(&mut self, c: char) {
        if self.cursor.position.col >= self.dimensions.cols {
            self.cursor.position.col = 0;
            self.line_feed();
        }

        let Position { row, col } = self.cursor.position;
        let attrs = self.current_attrs;
        let (fg, bg) = if attrs.reverse {
            (self.current_bg, self.current_fg)
        } else {
            (self.current_fg, self.current_bg)
        };

        if let Some(cell) = self.cell_mut(row, col) {
            *cell = Cell {
                character: c,
                fg,
                bg,
                attrs,
            };
        }
        self.mark_dirty(row, col);
        self.cursor.position.col += 1;
    }

    /// Move down one line, scrolling the region when at its bottom.
    pub fn line_feed(&mut self) {
        let (_, bottom) = self.scroll_region;
        if self.cursor.position.row == bottom {
            self.scroll_up(1);
        } else if self.cursor.position.row < self.dimensions.rows - 1 {
            self.cursor.position.row += 1;
        }
    }

    /// Move up one line, scrolling the region down when at its top.
    pub fn reverse_line_feed(&mut self) {
        let (top, _) = self.scroll_region;
        if self.cursor.position.row == top {
            self.scroll_down(1);
        } else {
            self.cursor.position.row = self.cursor.position.row.saturating_sub(1);
        }
    }

    /// Carriage return.
    pub fn carriage_return(&mut self) {
        self.cursor.position.col = 0;
    }

    /// Backspace: one column left, stopping at column 0.
    pub fn backspace(&mut self) {
        self.cursor_backward(1);
    }

    /// Advance to the next multiple-of-8 column, stopping at the last column.
    pub fn tab(&mut self) {
        let next_tab = (self.cursor.position.col / 8 + 1) * 8;
        self.cursor.position.col = next_tab.min(self.dimensions.cols - 1);
    }

    // Cursor movement

    /// Move cursor up by n rows.
    pub fn cursor_up(&mut self, n: u16) {
        self.cursor.position.row = self.cursor.position.row.saturating_sub(n);
    }

    /// Move cursor down by n rows.
    pub fn cursor_down(&mut self, n: u16) {
        let last = self.dimensions.rows - 1;
        self.cursor.position.row = self.cursor.position.row.saturating_add(n).min(last);
    }

    /// Move cursor forward by n columns.
    pub fn cursor_forward(&mut self, n: u16) {
        let last = self.dimensions.cols - 1;
        self.cursor.position.col = self.cursor.position.col.saturating_add(n).min(last);
    }

    /// Move cursor backward by n columns.
    pub fn cursor_backward(&mut self, n: u16) {
        let last = self.dimensions.cols - 1;
        self.cursor.position.col = self.cursor.position.col.min(last + 1).saturating_sub(n);
    }

    /// Move to an absolute position, clamped into the grid.
    pub fn move_cursor_to(&mut self, position: Position) {
        self.cursor.position = position.clamped(self.dimensions);
    }

    /// Move to an absolute row, keeping the column.
    pub fn set_cursor_row(&mut self, row: u16) {
        self.cursor.position.row = row.min(self.dimensions.rows - 1);
    }

    /// Move to an absolute column, keeping the row.
    pub fn set_cursor_col(&mut self, col: u16) {
        self.cursor.position.col = col.min(self.dimensions.cols - 1);
    }

    /// Save current cursor position.
    pub fn save_cursor(&mut self) {
        self.saved_cursor = self.cursor.position;
    }

    /// Restore the saved cursor position (origin if never saved).
    pub fn restore_cursor(&mut self) {
        self.cursor.position = self.saved_cursor.clamped(self.dimensions);
    }

    // Scrolling

    /// Set the scroll region from 1-based, inclusive bounds and home the cursor.
    pub fn set_scroll_region(&mut self, top: u16, bottom: u16) {
        let last = self.dimensions.rows - 1;
        let top = top.saturating_sub(1).min(last);
        let bottom = bottom.saturating_sub(1).min(last);
        if top <= bottom {
            self.scroll_region = (top, bottom);
        } else {
            self.scroll_region = (0, last);
        }
        self.cursor.position = Position::origin();
    }

    /// Shift the scroll region up by `lines`, clearing rows at its bottom.
    ///
    /// The evicted top row goes to scrollback only when the region starts
    /// at row 0 and scrollback still has room.
    pub fn scroll_up(&mut self, lines: u16) {
        let (top, bottom) = self.scroll_region;
        let cols = self.dimensions.cols as usize;
        let lines = lines.min(bottom - top + 1);

        for _ in 0..lines {
            if top == 0 && self.scrollback.len() < self.scrollback_capacity {
                let start = self.index(top, 0);
                self.scrollback
                    .push_front(self.cells[start..start + cols].to_vec());
            }
            let src = self.index(top + 1, 0)..self.index(bottom + 1, 0);
            let dest = self.index(top, 0);
            self.cells.copy_within(src, dest);
            self.clear_row(bottom);
        }
        self.mark_rows_dirty(top, bottom);
    }

    /// Shift the scroll region down by `lines`, clearing rows at its top.
    pub fn scroll_down(&mut self, lines: u16) {
        let (top, bottom) = self.scroll_region;
        let lines = lines.min(bottom - top + 1);

        for _ in 0..lines {
            let src = self.index(top, 0)..self.index(bottom, 0);
            let dest = self.index(top + 1, 0);
            self.cells.copy_within(src, dest);
            self.clear_row(top);
        }
        self.mark_rows_dirty(top, bottom);
    }

    /// Insert blank lines at the cursor row, pushing rows down within the
    /// scroll region.
    pub fn insert_lines(&mut self, count: u16) {
        let row = self.cursor.position.row;
        let (_, bottom) = self.scroll_region;
        if row > bottom {
            return;
        }
        let count = count.min(bottom - row + 1);
        for _ in 0..count {
            let src = self.index(row, 0)..self.index(bottom, 0);
            let dest = self.index(row + 1, 0);
            self.cells.copy_within(src, dest);
            self.clear_row(row);
        }
        self.mark_rows_dirty(row, bottom);
    }

    /// Delete lines at the cursor row, pulling rows up within the scroll
    /// region.
    pub fn delete_lines(&mut self, count: u16) {
        let row = self.cursor.position.row;
        let (_, bottom) = self.scroll_region;
        if row > bottom {
            return;
        }
        let count = count.min(bottom - row + 1);
        for _ in 0..count {
            let src = self.index(row + 1, 0)..self.index(bottom + 1, 0);
            let dest = self.index(row, 0);
            self.cells.copy_within(src, dest);
            self.clear_row(bottom);
        }
        self.mark_rows_dirty(row, bottom);
    }

    /// Insert blank cells at the cursor, shifting the rest of the row right.
    pub fn insert_chars(&mut self, count: u16) {
        let Position { row, col } = self.cursor.position;
        let cols = self.dimensions.cols;
        if col >= cols {
            return;
        }
        let count = count.min(cols - col);
        let start = self.index(row, col);
        let end = self.index(row, cols);
        self.cells
            .copy_within(start..end - count as usize, start + count as usize);
        self.cells[start..start + count as usize].fill(Cell::default());
        self.mark_rows_dirty(row, row);
    }

    /// Delete cells at the cursor, shifting the rest of the row left.
    pub fn delete_chars(&mut self, count: u16) {
        let Position { row, col } = self.cursor.position;
        let cols = self.dimensions.cols;
        if col >= cols {
            return;
        }
        let count = count.min(cols - col);
        let start = self.index(row, col);
        let end = self.index(row, cols);
        self.cells.copy_within(start + count as usize..end, start);
        self.cells[end - count as usize..end].fill(Cell::default());
        self.mark_rows_dirty(row, row);
    }

    // Erasing

    fn clear_row(&mut self, row: u16) {
        let start = self.index(row, 0);
        let end = start + self.dimensions.cols as usize;
        self.cells[start..end].fill(Cell::default());
    }

    fn clear_cols(&mut self, row: u16, from: u16, to: u16) {
        if from > to {
            return;
        }
        let start = self.index(row, from);
        let end = self.index(row, to) + 1;
        self.cells[start..end].fill(Cell::default());
        self.mark(DirtyRegion {
            min_x: from,
            max_x: to,
            min_y: row,
            max_y: row,
        });
    }

    /// Erase in display: 0 = cursor to end, 1 = start to cursor, 2/3 = all.
    pub fn erase_display(&mut self, mode: u16) {
        let row = self.cursor.position.row;
        match mode {
            0 => {
                self.erase_line(0);
                for r in row + 1..self.dimensions.rows {
                    self.clear_row(r);
                }
                if row + 1 < self.dimensions.rows {
                    self.mark_rows_dirty(row + 1, self.dimensions.rows - 1);
                }
            }
            1 => {
                self.erase_line(1);
                for r in 0..row {
                    self.clear_row(r);
                }
                if row > 0 {
                    self.mark_rows_dirty(0, row - 1);
                }
            }
            2 | 3 => self.clear(),
            _ => {}
        }
    }

    /// Erase in line: 0 = cursor to end, 1 = start to cursor, 2 = whole line.
    pub fn erase_line(&mut self, mode: u16) {
        let Position { row, col } = self.cursor.position;
        let last = self.dimensions.cols - 1;
        match mode {
            0 => {
                if col <= last {
                    self.clear_cols(row, col, last);
                }
            }
            1 => self.clear_cols(row, 0, col.min(last)),
            2 => self.clear_cols(row, 0, last),
            _ => {}
        }
    }

    /// Clear the entire grid.
    pub fn clear(&mut self) {
        self.cells.fill(Cell::default());
        self.mark_full_dirty();
    }

    /// Full reset (RIS): blank screen, cursor home, full scroll region,
    /// default attributes. Scrollback is kept.
    pub fn reset(&mut self) {
        self.cells.fill(Cell::default());
        self.cursor = Cursor::default();
        self.saved_cursor = Position::origin();
        self.scroll_region = (0, self.dimensions.rows - 1);
        self.reset_attributes();
        self.mark_full_dirty();
    }

    /// Resize grid, preserving content where possible.
    ///
    /// Content from the top-left corner is preserved up to the smaller of
    /// old and new dimensions. Cursor is clamped to new bounds and the
    /// scroll region reset to the full screen. Zero or unchanged
    /// dimensions are ignored.
    pub fn resize(&mut self, new_dimensions: Dimensions) {
        if new_dimensions.is_empty() || new_dimensions == self.dimensions {
            return;
        }

        let mut new_cells = vec![Cell::default(); new_dimensions.cell_count()];

        let copy_rows = self.dimensions.rows.min(new_dimensions.rows) as usize;
        let copy_cols = self.dimensions.cols.min(new_dimensions.cols) as usize;
        let old_cols = self.dimensions.cols as usize;
        let new_cols = new_dimensions.cols as usize;

        for row in 0..copy_rows {
            let old_start = row * old_cols;
            let new_start = row * new_cols;
            new_cells[new_start..new_start + copy_cols]
                .copy_from_slice(&self.cells[old_start..old_start + copy_cols]);
        }

        self.cells = new_cells;
        self.dimensions = new_dimensions;
        self.scroll_region = (0, new_dimensions.rows - 1);
        self.cursor.position = self.cursor.position.clamped(new_dimensions);
        self.saved_cursor = self.saved_cursor.clamped(new_dimensions);
        self.dirty = None;
        self.mark_full_dirty();
    }
}
