//! Text-mode display surface
//!
//! A grid of character/attribute cells with a teletype cursor. Rendering is
//! someone else's job: every cell write and every clear is forwarded, in
//! order, to a [`DisplaySink`].

use emu_core::logging::{log, LogCategory, LogLevel};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Default attribute: light grey on black
pub const DEFAULT_ATTRIBUTE: u8 = 0x07;

/// One character cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayCell {
    pub ch: u8,
    pub attr: u8,
}

impl DisplayCell {
    pub fn blank(attr: u8) -> Self {
        Self { ch: b' ', attr }
    }
}

/// Output event delivered to a [`DisplaySink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayEvent {
    Write {
        row: usize,
        col: usize,
        ch: u8,
        attr: u8,
    },
    Clear,
}

/// Presentation collaborator (terminal, window, test recorder)
pub trait DisplaySink: Send {
    fn write_cell(&mut self, row: usize, col: usize, ch: u8, attr: u8);
    fn clear(&mut self);
}

/// Discards all output
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DisplaySink for NullSink {
    fn write_cell(&mut self, _row: usize, _col: usize, _ch: u8, _attr: u8) {}
    fn clear(&mut self) {}
}

/// Records events; clones share the same log
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<DisplayEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DisplayEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn push(&self, event: DisplayEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}

impl DisplaySink for RecordingSink {
    fn write_cell(&mut self, row: usize, col: usize, ch: u8, attr: u8) {
        self.push(DisplayEvent::Write { row, col, ch, attr });
    }

    fn clear(&mut self) {
        self.push(DisplayEvent::Clear);
    }
}

/// Display grid shared with a host render thread
pub type SharedDisplay = Arc<Mutex<TextDisplay>>;

/// Character grid plus teletype cursor
#[derive(Debug, Clone)]
pub struct TextDisplay {
    width: usize,
    height: usize,
    attr: u8,
    cells: Vec<DisplayCell>,
    row: usize,
    col: usize,
}

impl Default for TextDisplay {
    fn default() -> Self {
        Self::new(80, 25, DEFAULT_ATTRIBUTE)
    }
}

impl TextDisplay {
    /// Blank `width` x `height` grid; both dimensions are at least 1
    pub fn new(width: usize, height: usize, attr: u8) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            width,
            height,
            attr,
            cells: vec![DisplayCell::blank(attr); width * height],
            row: 0,
            col: 0,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Cursor as (row, column)
    pub fn cursor(&self) -> (usize, usize) {
        (self.row, self.col)
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<DisplayCell> {
        if row < self.height && col < self.width {
            Some(self.cells[row * self.width + col])
        } else {
            None
        }
    }

    /// Move the cursor, clamped to the grid
    pub fn set_cursor(&mut self, row: usize, col: usize) {
        self.row = row.min(self.height - 1);
        self.col = col.min(self.width - 1);
    }

    /// Store one cell and forward it to the sink
    pub fn put_char(&mut self, row: usize, col: usize, ch: u8, sink: &mut dyn DisplaySink) {
        if row >= self.height || col >= self.width {
            return;
        }
        let attr = self.attr;
        self.cells[row * self.width + col] = DisplayCell { ch, attr };
        sink.write_cell(row, col, ch, attr);
    }

    /// Blank the grid and home the cursor
    pub fn clear(&mut self, sink: &mut dyn DisplaySink) {
        self.cells.fill(DisplayCell::blank(self.attr));
        self.row = 0;
        self.col = 0;
        sink.clear();
    }

    /// BIOS teletype output at the cursor.
    ///
    /// `\n` starts a new line, `\r` returns to column 0, `\b` backs up one
    /// column and blanks it. Anything else is written and the cursor
    /// advances, wrapping at the right edge and scrolling at the bottom.
    pub fn teletype(&mut self, ch: u8, sink: &mut dyn DisplaySink) {
        match ch {
            b'\n' => {
                self.col = 0;
                self.row += 1;
            }
            b'\r' => self.col = 0,
            0x08 => {
                if self.col > 0 {
                    self.col -= 1;
                    self.put_char(self.row, self.col, b' ', sink);
                }
            }
            _ => {
                self.put_char(self.row, self.col, ch, sink);
                self.col += 1;
                if self.col >= self.width {
                    self.col = 0;
                    self.row += 1;
                }
            }
        }
        if self.row >= self.height {
            self.scroll(sink);
        }
    }

    /// Move every row up by one and blank the bottom row.
    ///
    /// Only cells that change are re-sent to the sink.
    fn scroll(&mut self, sink: &mut dyn DisplaySink) {
        log(LogCategory::Video, LogLevel::Trace, || "Video: scroll".to_string());

        let blank = DisplayCell::blank(self.attr);
        for row in 0..self.height {
            for col in 0..self.width {
                let next = if row + 1 < self.height {
                    self.cells[(row + 1) * self.width + col]
                } else {
                    blank
                };
                let idx = row * self.width + col;
                if self.cells[idx] != next {
                    self.cells[idx] = next;
                    sink.write_cell(row, col, next.ch, next.attr);
                }
            }
        }
        self.row = self.height - 1;
    }

    /// One row as text, trailing blanks trimmed
    pub fn row_text(&self, row: usize) -> String {
        if row >= self.height {
            return String::new();
        }
        let start = row * self.width;
        self.cells[start..start + self.width]
            .iter()
            .map(|c| c.ch as char)
            .collect::<String>()
            .trim_end()
            .to_string()
    }

    /// Whole screen as text, one line per row
    pub fn to_text(&self) -> String {
        (0..self.height)
            .map(|row| self.row_text(row))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn type_str(display: &mut TextDisplay, s: &str, sink: &mut dyn DisplaySink) {
        for b in s.bytes() {
            display.teletype(b, sink);
        }
    }

    #[test]
    fn test_display_creation() {
        let display = TextDisplay::default();
        assert_eq!(display.width(), 80);
        assert_eq!(display.height(), 25);
        assert_eq!(display.cursor(), (0, 0));
        assert_eq!(display.cell(24, 79), Some(DisplayCell { ch: b' ', attr: 0x07 }));
        assert_eq!(display.cell(25, 0), None);
    }

    #[test]
    fn test_teletype_writes_at_cursor() {
        let mut display = TextDisplay::default();
        let mut sink = RecordingSink::new();

        display.teletype(b'A', &mut sink);

        assert_eq!(
            sink.events(),
            vec![DisplayEvent::Write { row: 0, col: 0, ch: b'A', attr: 0x07 }]
        );
        assert_eq!(display.cursor(), (0, 1));
    }

    #[test]
    fn test_newline_and_carriage_return() {
        let mut display = TextDisplay::default();
        let mut sink = NullSink;

        type_str(&mut display, "ab\ncd\rX", &mut sink);

        assert_eq!(display.row_text(0), "ab");
        assert_eq!(display.row_text(1), "Xd");
        assert_eq!(display.cursor(), (1, 1));
    }

    #[test]
    fn test_backspace() {
        let mut display = TextDisplay::default();
        let mut sink = RecordingSink::new();

        type_str(&mut display, "ab\x08", &mut sink);

        assert_eq!(display.row_text(0), "a");
        assert_eq!(display.cursor(), (0, 1));
        assert_eq!(
            sink.events().last(),
            Some(&DisplayEvent::Write { row: 0, col: 1, ch: b' ', attr: 0x07 })
        );

        // Backspace at column 0 does nothing
        display.set_cursor(1, 0);
        let before = sink.events().len();
        display.teletype(0x08, &mut sink);
        assert_eq!(display.cursor(), (1, 0));
        assert_eq!(sink.events().len(), before);
    }

    #[test]
    fn test_wrap_at_right_edge() {
        let mut display = TextDisplay::new(4, 3, 0x07);
        let mut sink = NullSink;

        type_str(&mut display, "abcde", &mut sink);

        assert_eq!(display.row_text(0), "abcd");
        assert_eq!(display.row_text(1), "e");
        assert_eq!(display.cursor(), (1, 1));
    }

    #[test]
    fn test_scroll_at_bottom() {
        let mut display = TextDisplay::new(4, 2, 0x07);
        let mut sink = RecordingSink::new();

        type_str(&mut display, "one\ntwo\nxy", &mut sink);

        assert_eq!(display.row_text(0), "two");
        assert_eq!(display.row_text(1), "xy");
        assert_eq!(display.cursor(), (1, 2));
    }

    #[test]
    fn test_set_cursor_clamps() {
        let mut display = TextDisplay::default();
        display.set_cursor(100, 200);
        assert_eq!(display.cursor(), (24, 79));
    }

    #[test]
    fn test_clear() {
        let mut display = TextDisplay::new(10, 2, 0x1F);
        let mut sink = RecordingSink::new();
        type_str(&mut display, "hello", &mut sink);

        display.clear(&mut sink);

        assert_eq!(display.to_text(), "\n");
        assert_eq!(display.cursor(), (0, 0));
        assert_eq!(sink.events().last(), Some(&DisplayEvent::Clear));
        assert_eq!(display.cell(0, 0).map(|c| c.attr), Some(0x1F));
    }

    #[test]
    fn test_recording_sink_clones_share_events() {
        let sink = RecordingSink::new();
        let mut writer = sink.clone();
        writer.write_cell(2, 3, b'z', 0x07);
        assert_eq!(sink.events().len(), 1);
    }
}
