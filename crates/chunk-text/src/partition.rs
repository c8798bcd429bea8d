//! Partition a document into chunks and select chunks relative to a range.

use serde::{Deserialize, Serialize};

use crate::scanner::{ChunkScanner, ChunkType, Direction};
use crate::text::{Position, Range, TextAddress};
use crate::ChunkError;

/// Which chunks `chunks_for_range` keeps, relative to the reference range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    /// Every chunk in the document.
    All,
    /// Chunks ending at or before the reference start.
    Above,
    /// Chunks starting at or after the reference end.
    Below,
    /// Chunks lying inside the reference range.
    Selected,
}

impl SelectionMode {
    /// Whether `chunk` is kept for the expanded reference range.
    pub fn matches(self, chunk: &Range, reference: &Range) -> bool {
        match self {
            SelectionMode::All => true,
            SelectionMode::Above => chunk.end <= reference.start,
            SelectionMode::Below => reference.end <= chunk.start,
            SelectionMode::Selected => reference.contains(chunk),
        }
    }
}

impl std::fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionMode::All => write!(f, "all"),
            SelectionMode::Above => write!(f, "above"),
            SelectionMode::Below => write!(f, "below"),
            SelectionMode::Selected => write!(f, "selected"),
        }
    }
}

impl std::str::FromStr for SelectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(SelectionMode::All),
            "above" => Ok(SelectionMode::Above),
            "below" => Ok(SelectionMode::Below),
            "selected" | "selection" => Ok(SelectionMode::Selected),
            _ => Err(format!("Unknown selection mode: {}", s)),
        }
    }
}

/// Chunk queries over one document and one chunk type.
pub struct ChunkPartitioner<'a, T: TextAddress + ?Sized> {
    scanner: ChunkScanner<'a, T>,
}

impl<'a, T: TextAddress + ?Sized> ChunkPartitioner<'a, T> {
    pub fn new(scanner: ChunkScanner<'a, T>) -> Self {
        Self { scanner }
    }

    pub fn for_type(
        text: &'a T,
        chunk_type: ChunkType,
        comment_token: Option<&str>,
    ) -> Result<Self, ChunkError> {
        Ok(Self::new(ChunkScanner::for_type(text, chunk_type, comment_token)?))
    }

    pub fn chunk_type(&self) -> ChunkType {
        self.scanner.chunk_type()
    }

    /// Every chunk in document order.
    ///
    /// Each chunk runs from one delimiter's start to the next, so the chunks
    /// tile the document: the first starts at the document start, the last
    /// ends at the document end, and each ends where the next begins. A
    /// delimiter's own lines belong to the chunk that follows it.
    pub fn all_chunks(&self) -> Vec<Range> {
        let text = self.scanner.text();
        let starts: Vec<Position> = std::iter::once(self.scanner.sentinel(Direction::Previous))
            .chain(self.scanner.scan_from(Direction::Next, text.first_position()))
            .chain(std::iter::once(self.scanner.sentinel(Direction::Next)))
            .map(|d| d.start)
            .collect();

        let mut chunks = Vec::with_capacity(starts.len());
        for pair in starts.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            debug_assert!(a <= b, "delimiters out of order: {} > {}", a, b);
            if a == b {
                continue;
            }
            chunks.push(Range::new(a, b));
        }
        chunks
    }

    /// The chunk holding `point`, ending on the row before the next
    /// delimiter.
    pub fn chunk_containing_point(&self, point: Position) -> Range {
        let text = self.scanner.text();
        let previous = self.scanner.enclosing_delimiter(Direction::Previous, point);
        let next = self.scanner.enclosing_delimiter(Direction::Next, point);

        let start = previous.start;
        let mut end = next.start;
        if end.row > start.row && end.row < text.last_row() {
            let row = end.row - 1;
            end = Position::new(row, text.line_len(row));
        }
        debug_assert!(start <= end, "chunk start {} after end {}", start, end);
        Range::new(start, end)
    }

    /// Chunks kept by any of `modes` relative to `range`.
    ///
    /// `range` is first widened to the delimiters enclosing it, so a
    /// selection that touches part of a chunk counts as covering it.
    pub fn chunks_for_range(&self, range: Range, modes: &[SelectionMode]) -> Vec<Range> {
        let text = self.scanner.text();
        let range = text.clip_range(range);
        // A linewise selection ends at column 0 of the row after it
        let linewise =
            !range.is_empty() && range.end.column == 0 && range.end.row > range.start.row;
        let end = if linewise {
            let row = range.end.row - 1;
            Position::new(row, text.line_len(row))
        } else {
            range.end
        };
        let reference = Range::new(
            self.scanner
                .enclosing_delimiter(Direction::Previous, range.start)
                .start,
            self.scanner.enclosing_delimiter(Direction::Next, end).start,
        );

        let last_row = text.last_row();
        let mut chunks = Vec::new();
        let mut row = 0;
        loop {
            let chunk = self.chunk_containing_point(Position::new(row, 0));
            if modes.iter().any(|mode| mode.matches(&chunk, &reference)) {
                chunks.push(chunk);
            }
            if chunk.end.row >= last_row {
                break;
            }
            row = chunk.end.row + 1;
        }
        chunks
    }
}
