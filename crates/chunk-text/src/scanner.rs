//! Delimiter grammar and the bidirectional delimiter scanner.
//!
//! A delimiter always starts at column 0 of a blank line. Paragraph delimiters
//! are just that blank line. Cell delimiters are a blank line immediately
//! followed by a marker: a doubled comment token, a heading block, or a `%%`
//! magic line.
//!
//! Scanning is line oriented. The raw matcher looks at whole rows, so it will
//! happily report a delimiter on the boundary row even when the delimiter
//! starts before (or exactly at) the scan position; the scanner filters those
//! against the scan window.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::text::{Position, Range, TextAddress};
use crate::ChunkError;

/// A delimiter is identified by the range it occupies.
pub type Delimiter = Range;

/// Which delimiter grammar splits the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    /// Chunks are separated by blank lines.
    #[default]
    Paragraph,
    /// Chunks are separated by comment markers (`##`, headings, `%%`).
    Cell,
}

impl std::fmt::Display for ChunkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkType::Paragraph => write!(f, "paragraph"),
            ChunkType::Cell => write!(f, "cell"),
        }
    }
}

impl std::str::FromStr for ChunkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "paragraph" | "para" | "p" => Ok(ChunkType::Paragraph),
            "cell" | "c" => Ok(ChunkType::Cell),
            _ => Err(format!("Unknown chunk type: {}", s)),
        }
    }
}

/// Scan direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Next,
    Previous,
}

/// Per-line regexes for one chunk type.
#[derive(Debug, Clone)]
pub struct DelimiterGrammar {
    chunk_type: ChunkType,
    blank: Regex,
    markers: Option<CellMarkers>,
}

#[derive(Debug, Clone)]
struct CellMarkers {
    double: Regex,
    heading_text: Regex,
    heading_end: Regex,
    magic: Regex,
}

const BLANK_LINE: &str = r"^[ \t]*$";

impl DelimiterGrammar {
    pub fn paragraph() -> Result<Self, ChunkError> {
        Ok(Self {
            chunk_type: ChunkType::Paragraph,
            blank: Regex::new(BLANK_LINE)?,
            markers: None,
        })
    }

    pub fn cell(comment_token: &str) -> Result<Self, ChunkError> {
        if comment_token.is_empty() {
            return Err(ChunkError::NoCommentToken);
        }
        let tok = regex::escape(comment_token);
        Ok(Self {
            chunk_type: ChunkType::Cell,
            blank: Regex::new(BLANK_LINE)?,
            markers: Some(CellMarkers {
                double: Regex::new(&format!(r"^{tok}{tok}.*$"))?,
                heading_text: Regex::new(&format!(r"^{tok}[ \t]*\S.*$"))?,
                heading_end: Regex::new(&format!(r"^{tok}[ \t]*$"))?,
                magic: Regex::new(r"^%%.*$")?,
            }),
        })
    }

    /// Grammar for `chunk_type`. Cell grammars need a comment token.
    pub fn for_type(chunk_type: ChunkType, comment_token: Option<&str>) -> Result<Self, ChunkError> {
        match chunk_type {
            ChunkType::Paragraph => Self::paragraph(),
            ChunkType::Cell => Self::cell(comment_token.ok_or(ChunkError::NoCommentToken)?),
        }
    }

    pub fn chunk_type(&self) -> ChunkType {
        self.chunk_type
    }

    fn is_blank(&self, line: &str) -> bool {
        self.blank.is_match(line)
    }

    /// Raw match of a delimiter whose blank line is `row`.
    pub fn match_at<T: TextAddress + ?Sized>(&self, text: &T, row: usize) -> Option<Delimiter> {
        if row > text.last_row() || !self.is_blank(text.line_text(row)) {
            return None;
        }
        let start = Position::new(row, 0);
        let Some(markers) = &self.markers else {
            return Some(Range::new(start, Position::new(row, text.line_len(row))));
        };

        let marker_row = row + 1;
        if marker_row > text.last_row() {
            return None;
        }
        let marker = text.line_text(marker_row);
        if markers.double.is_match(marker) || markers.magic.is_match(marker) {
            return Some(Range::new(
                start,
                Position::new(marker_row, marker.len()),
            ));
        }

        // Heading: `<tok> text` lines, a bare `<tok>` line, then a blank line.
        let mut cursor = marker_row;
        while cursor <= text.last_row() && markers.heading_text.is_match(text.line_text(cursor)) {
            cursor += 1;
        }
        if cursor == marker_row || cursor > text.last_row() {
            return None;
        }
        if !markers.heading_end.is_match(text.line_text(cursor)) {
            return None;
        }
        let trailing = cursor + 1;
        if trailing > text.last_row() || !self.is_blank(text.line_text(trailing)) {
            return None;
        }
        Some(Range::new(
            start,
            Position::new(trailing, text.line_len(trailing)),
        ))
    }
}

/// Scans one document for delimiters of one grammar.
pub struct ChunkScanner<'a, T: TextAddress + ?Sized> {
    text: &'a T,
    grammar: DelimiterGrammar,
    blank_lines: DelimiterGrammar,
}

impl<'a, T: TextAddress + ?Sized> ChunkScanner<'a, T> {
    pub fn new(text: &'a T, grammar: DelimiterGrammar) -> Result<Self, ChunkError> {
        Ok(Self {
            text,
            grammar,
            blank_lines: DelimiterGrammar::paragraph()?,
        })
    }

    /// Build a scanner for `chunk_type`, resolving the Cell grammar from
    /// `comment_token`.
    pub fn for_type(
        text: &'a T,
        chunk_type: ChunkType,
        comment_token: Option<&str>,
    ) -> Result<Self, ChunkError> {
        Self::new(text, DelimiterGrammar::for_type(chunk_type, comment_token)?)
    }

    pub fn text(&self) -> &'a T {
        self.text
    }

    pub fn chunk_type(&self) -> ChunkType {
        self.grammar.chunk_type()
    }

    /// Lazily yield delimiters between `from` and `to` in scan order.
    ///
    /// For `Next`, `to` is the far bound (inclusive); for `Previous`, `to` is
    /// the lower bound and must not be after `from`.
    pub fn scan(&self, direction: Direction, from: Position, to: Position) -> Delimiters<'_, 'a, T> {
        scan_with(self.text, &self.grammar, &self.blank_lines, direction, from, to)
    }

    /// Scan to the document boundary in `direction`.
    pub fn scan_from(&self, direction: Direction, from: Position) -> Delimiters<'_, 'a, T> {
        let to = match direction {
            Direction::Next => self.text.end_position(),
            Direction::Previous => self.text.first_position(),
        };
        self.scan(direction, from, to)
    }

    /// Sentinel used when no delimiter exists in `direction`.
    pub fn sentinel(&self, direction: Direction) -> Delimiter {
        match direction {
            Direction::Next => Range::point(self.text.end_position()),
            Direction::Previous => Range::point(self.text.first_position()),
        }
    }

    /// The delimiter that bounds the chunk holding `point` on the `direction`
    /// side, or the document-boundary sentinel.
    ///
    /// The delimiter a point sits on opens that point's chunk: `Previous`
    /// looks from the start of the following row so it is included, and
    /// `Next` skips delimiters that start on the point's own row.
    pub fn enclosing_delimiter(&self, direction: Direction, point: Position) -> Delimiter {
        let point = self.text.clip_position(point);
        let found = match direction {
            Direction::Previous => {
                let from = if point.row < self.text.last_row() {
                    Position::new(point.row + 1, 0)
                } else {
                    self.text.end_position()
                };
                self.scan_from(Direction::Previous, from).next()
            }
            Direction::Next => self
                .scan_from(Direction::Next, point)
                .find(|d| d.start.row > point.row),
        };
        found.unwrap_or_else(|| self.sentinel(direction))
    }
}

fn scan_with<'s, 'a, T: TextAddress + ?Sized>(
    text: &'a T,
    grammar: &'s DelimiterGrammar,
    blank_lines: &'s DelimiterGrammar,
    direction: Direction,
    from: Position,
    to: Position,
) -> Delimiters<'s, 'a, T> {
    let from = text.clip_position(from);
    let to = text.clip_position(to);

    let boundary = match direction {
        Direction::Next => {
            // A scan starting on a blank row would miss the delimiter that row
            // opens; step back to the end of the previous row.
            if from.row > 0 && text.is_row_blank(from.row) {
                Position::new(from.row - 1, text.line_len(from.row - 1))
            } else {
                from
            }
        }
        Direction::Previous => {
            let at_delimiter_start =
                from.column == 0 && from.row > 0 && text.is_row_blank(from.row - 1);
            if at_delimiter_start {
                from
            } else {
                // Move forward to the next blank line so that a scan from
                // inside a delimiter lands on that delimiter's start.
                let next_blank = scan_with(
                    text,
                    blank_lines,
                    blank_lines,
                    Direction::Next,
                    from,
                    text.end_position(),
                )
                .next();
                match next_blank {
                    Some(blank) => from.max(blank.start),
                    None => text.end_position(),
                }
            }
        }
    };

    let (row, stop_row) = match direction {
        Direction::Next => (boundary.row, to.row.max(boundary.row)),
        Direction::Previous => (boundary.row, to.row.min(boundary.row)),
    };

    Delimiters {
        text,
        grammar,
        direction,
        boundary,
        limit: to,
        row: Some(row),
        stop_row,
    }
}

/// Lazy, restartable delimiter sequence. Clone it to restart from the same
/// point.
pub struct Delimiters<'s, 'a, T: TextAddress + ?Sized> {
    text: &'a T,
    grammar: &'s DelimiterGrammar,
    direction: Direction,
    boundary: Position,
    limit: Position,
    row: Option<usize>,
    stop_row: usize,
}

impl<T: TextAddress + ?Sized> Clone for Delimiters<'_, '_, T> {
    fn clone(&self) -> Self {
        Self {
            text: self.text,
            grammar: self.grammar,
            direction: self.direction,
            boundary: self.boundary,
            limit: self.limit,
            row: self.row,
            stop_row: self.stop_row,
        }
    }
}

impl<T: TextAddress + ?Sized> Delimiters<'_, '_, T> {
    fn advance_row(&mut self, row: usize) {
        self.row = match self.direction {
            Direction::Next if row < self.stop_row => Some(row + 1),
            Direction::Previous if row > self.stop_row => Some(row - 1),
            _ => None,
        };
    }

    fn in_window(&self, delimiter: &Delimiter) -> bool {
        // The line matcher echoes a match sitting exactly on the boundary.
        if *delimiter == Range::point(self.boundary) {
            return false;
        }
        // Delimiters starting at either end of the document coincide with
        // the sentinels; neither direction reports them.
        if delimiter.start == self.text.first_position()
            || delimiter.start == self.text.end_position()
        {
            return false;
        }
        match self.direction {
            Direction::Next => delimiter.start >= self.boundary && delimiter.start <= self.limit,
            Direction::Previous => delimiter.start < self.boundary && delimiter.start >= self.limit,
        }
    }
}

impl<T: TextAddress + ?Sized> Iterator for Delimiters<'_, '_, T> {
    type Item = Delimiter;

    fn next(&mut self) -> Option<Delimiter> {
        while let Some(row) = self.row {
            self.advance_row(row);
            if let Some(delimiter) = self.grammar.match_at(self.text, row) {
                if self.in_window(&delimiter) {
                    return Some(delimiter);
                }
                log::trace!(
                    "[scanner] Discarding {} outside window at {}",
                    delimiter,
                    self.boundary
                );
            }
        }
        None
    }
}
