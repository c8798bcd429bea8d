//! Positions, ranges, and the line-addressed view of a document.
//!
//! Columns are UTF-8 byte offsets into a line. Rows are zero-based. A document
//! always has at least one row; a trailing newline produces a final empty row.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// A point in a document. Ordered by row, then column.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Position {
    pub row: usize,
    pub column: usize,
}

impl Position {
    pub const fn new(row: usize, column: usize) -> Self {
        Self { row, column }
    }

    /// Shift by signed row/column deltas, saturating at zero.
    pub fn translate(self, rows: isize, columns: isize) -> Self {
        Self {
            row: self.row.saturating_add_signed(rows),
            column: self.column.saturating_add_signed(columns),
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.row, self.column)
    }
}

/// A half-open span `[start, end)` in row-major order.
///
/// `start <= end` always holds; constructors normalize reversed endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(a: Position, b: Position) -> Self {
        if a <= b {
            Self { start: a, end: b }
        } else {
            Self { start: b, end: a }
        }
    }

    /// An empty range at `p`.
    pub const fn point(p: Position) -> Self {
        Self { start: p, end: p }
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Number of rows touched by the range.
    pub fn row_span(&self) -> usize {
        self.end.row - self.start.row + 1
    }

    /// Translate start and end independently by `(rows, columns)` deltas.
    pub fn translate(&self, start_delta: (isize, isize), end_delta: (isize, isize)) -> Self {
        Self::new(
            self.start.translate(start_delta.0, start_delta.1),
            self.end.translate(end_delta.0, end_delta.1),
        )
    }

    /// `self` fully contains `other`.
    pub fn contains(&self, other: &Range) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// `p` lies in `[start, end)`. An empty range contains only its own point.
    pub fn contains_point(&self, p: Position) -> bool {
        if self.is_empty() {
            return p == self.start;
        }
        self.start <= p && p < self.end
    }

    /// The ranges share at least one character. An empty range intersects a
    /// non-empty one when its point falls inside it.
    pub fn intersects(&self, other: &Range) -> bool {
        match (self.is_empty(), other.is_empty()) {
            (true, true) => self.start == other.start,
            (true, false) => other.contains_point(self.start),
            (false, true) => self.contains_point(other.start),
            (false, false) => self.start < other.end && other.start < self.end,
        }
    }

    /// Compare ranges by start, then end.
    pub fn compare(&self, other: &Range) -> Ordering {
        self.start
            .cmp(&other.start)
            .then_with(|| self.end.cmp(&other.end))
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} - {})", self.start, self.end)
    }
}

/// Line-addressed read access to a document.
///
/// Implementors supply `line_count` and `line_text`; everything else is
/// derived. The change-notification side of a live document lives with the
/// editable implementation, not here.
pub trait TextAddress {
    /// Number of rows. Always at least one.
    fn line_count(&self) -> usize;

    /// Text of `row` without its line terminator. Out-of-range rows are empty.
    fn line_text(&self, row: usize) -> &str;

    fn last_row(&self) -> usize {
        self.line_count().saturating_sub(1)
    }

    fn line_len(&self, row: usize) -> usize {
        self.line_text(row).len()
    }

    fn first_position(&self) -> Position {
        Position::new(0, 0)
    }

    fn end_position(&self) -> Position {
        let row = self.last_row();
        Position::new(row, self.line_len(row))
    }

    /// Whole-document range.
    fn full_range(&self) -> Range {
        Range::new(self.first_position(), self.end_position())
    }

    /// Whether `row` holds only spaces and tabs.
    fn is_row_blank(&self, row: usize) -> bool {
        self.line_text(row).chars().all(|c| c == ' ' || c == '\t')
    }

    /// Clamp `p` into the document, snapping the column back to a char
    /// boundary.
    fn clip_position(&self, p: Position) -> Position {
        if p.row > self.last_row() {
            return self.end_position();
        }
        let line = self.line_text(p.row);
        let mut column = p.column.min(line.len());
        while column > 0 && !line.is_char_boundary(column) {
            column -= 1;
        }
        Position::new(p.row, column)
    }

    fn clip_range(&self, range: Range) -> Range {
        Range::new(
            self.clip_position(range.start),
            self.clip_position(range.end),
        )
    }

    /// Text covered by `range`, rows joined with `\n`.
    fn text_in_range(&self, range: Range) -> String {
        let range = self.clip_range(range);
        let (start, end) = (range.start, range.end);
        if start.row == end.row {
            return self.line_text(start.row)[start.column..end.column].to_string();
        }
        let mut out = String::new();
        out.push_str(&self.line_text(start.row)[start.column..]);
        for row in start.row + 1..end.row {
            out.push('\n');
            out.push_str(self.line_text(row));
        }
        out.push('\n');
        out.push_str(&self.line_text(end.row)[..end.column]);
        out
    }
}

/// Immutable line store built from a string.
///
/// `\r\n` line endings are accepted; the `\r` is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextBuffer {
    lines: Vec<String>,
}

impl TextBuffer {
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: split_lines(text),
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl Default for TextBuffer {
    fn default() -> Self {
        Self::from_text("")
    }
}

impl TextAddress for TextBuffer {
    fn line_count(&self) -> usize {
        self.lines.len()
    }

    fn line_text(&self, row: usize) -> &str {
        self.lines.get(row).map(String::as_str).unwrap_or("")
    }
}

/// Split text into rows the way [`TextBuffer`] stores them.
pub fn split_lines(text: &str) -> Vec<String> {
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect()
}
