//! Strip leading and trailing blank lines from a range.

use crate::text::{Position, Range, TextAddress};

/// Shrink `range` so its text neither starts nor ends with a newline.
///
/// The range is clipped to the document first. Trimming is idempotent, and a
/// range covering only newlines collapses to an empty range.
pub fn trim_range<T: TextAddress + ?Sized>(text: &T, range: Range) -> Range {
    let range = text.clip_range(range);
    let (mut start, mut end) = (range.start, range.end);

    while start < end {
        if start.row < end.row && start.column >= text.line_len(start.row) {
            start = Position::new(start.row + 1, 0);
        } else if end.row > start.row && end.column == 0 {
            let row = end.row - 1;
            end = Position::new(row, text.line_len(row));
        } else {
            break;
        }
    }
    Range::new(start, end.max(start))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::TextBuffer;

    fn p(row: usize, column: usize) -> Position {
        Position::new(row, column)
    }

    #[test]
    fn test_trims_leading_and_trailing_newlines() {
        let doc = TextBuffer::from_text("\n\nx = 1\ny = 2\n\n");
        let trimmed = trim_range(&doc, doc.full_range());
        assert_eq!(trimmed, Range::new(p(2, 0), p(3, 5)));
        assert_eq!(doc.text_in_range(trimmed), "x = 1\ny = 2");
    }

    #[test]
    fn test_start_at_end_of_line_moves_to_next_row() {
        let doc = TextBuffer::from_text("abc\ndef");
        let trimmed = trim_range(&doc, Range::new(p(0, 3), p(1, 3)));
        assert_eq!(trimmed, Range::new(p(1, 0), p(1, 3)));
    }

    #[test]
    fn test_keeps_whitespace_only_interior_lines() {
        let doc = TextBuffer::from_text("a\n  \nb");
        let trimmed = trim_range(&doc, doc.full_range());
        assert_eq!(doc.text_in_range(trimmed), "a\n  \nb");
    }

    #[test]
    fn test_all_blank_range_collapses() {
        let doc = TextBuffer::from_text("a\n\n\n\nb");
        let trimmed = trim_range(&doc, Range::new(p(1, 0), p(4, 0)));
        assert!(trimmed.is_empty());
        assert_eq!(doc.text_in_range(trimmed), "");
    }

    #[test]
    fn test_idempotent() {
        let doc = TextBuffer::from_text("\nfoo\n\nbar\n\n\n");
        let once = trim_range(&doc, doc.full_range());
        assert_eq!(trim_range(&doc, once), once);

        let empty = trim_range(&doc, Range::new(p(4, 0), p(6, 0)));
        assert_eq!(trim_range(&doc, empty), empty);
    }

    #[test]
    fn test_out_of_range_input_is_clipped() {
        let doc = TextBuffer::from_text("x\n");
        let trimmed = trim_range(&doc, Range::new(p(0, 0), p(40, 9)));
        assert_eq!(trimmed, Range::new(p(0, 0), p(0, 1)));
    }
}
