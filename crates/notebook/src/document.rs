//! Editable text documents with markers and debounced change notification.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chunk_text::text::split_lines;
use chunk_text::{Position, Range, TextAddress};
use tokio::sync::watch;

use crate::marker::{InvalidationPolicy, MarkerId, MarkerLayer};

/// A live document: line storage, markers, and a revision counter that ticks
/// on every edit.
#[derive(Debug)]
pub struct TextDocument {
    lines: Vec<String>,
    markers: MarkerLayer,
    language: Option<String>,
    path: Option<PathBuf>,
    revision: watch::Sender<u64>,
}

impl TextDocument {
    pub fn new(text: &str) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            lines: split_lines(text),
            markers: MarkerLayer::new(),
            language: None,
            path: None,
            revision,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Replace `range` with `text`. Returns the range of the inserted text
    /// and the markers the edit invalidated.
    pub fn edit(&mut self, range: Range, text: &str) -> (Range, Vec<MarkerId>) {
        let range = self.clip_range(range);
        let (start, end) = (range.start, range.end);

        let prefix = self.lines[start.row][..start.column].to_string();
        let suffix = self.lines[end.row][end.column..].to_string();
        let mut inserted = split_lines(text);
        let last = inserted.len() - 1;

        let new_end = if last == 0 {
            Position::new(start.row, start.column + inserted[0].len())
        } else {
            Position::new(start.row + last, inserted[last].len())
        };

        inserted[0].insert_str(0, &prefix);
        inserted[last].push_str(&suffix);
        self.lines.splice(start.row..=end.row, inserted);

        let invalidated = self.markers.apply_edit(range, new_end);
        self.revision.send_modify(|rev| *rev += 1);
        log::trace!("[document] Replaced {} (now ends at {})", range, new_end);
        (Range::new(start, new_end), invalidated)
    }

    pub fn add_marker(&mut self, range: Range, policy: InvalidationPolicy) -> MarkerId {
        let range = self.clip_range(range);
        self.markers.add_marker(range, policy)
    }

    pub fn markers(&self) -> &MarkerLayer {
        &self.markers
    }

    pub fn markers_mut(&mut self) -> &mut MarkerLayer {
        &mut self.markers
    }

    /// Watch edits to this document.
    pub fn subscribe(&self) -> ChangeWatcher {
        ChangeWatcher {
            revision: self.revision.subscribe(),
        }
    }
}

impl TextAddress for TextDocument {
    fn line_count(&self) -> usize {
        self.lines.len()
    }

    fn line_text(&self, row: usize) -> &str {
        self.lines.get(row).map(String::as_str).unwrap_or("")
    }
}

/// Debounced view of a document's edits.
#[derive(Debug, Clone)]
pub struct ChangeWatcher {
    revision: watch::Receiver<u64>,
}

impl ChangeWatcher {
    /// Wait for at least one edit, then until no edit arrives for `quiet`.
    /// Returns the settled revision, or `None` once the document is gone.
    pub async fn settled(&mut self, quiet: Duration) -> Option<u64> {
        self.revision.changed().await.ok()?;
        loop {
            match tokio::time::timeout(quiet, self.revision.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return None,
                Err(_) => return Some(*self.revision.borrow_and_update()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(row: usize, column: usize) -> Position {
        Position::new(row, column)
    }

    #[test]
    fn test_edit_single_line() {
        let mut doc = TextDocument::new("a = 1\nb = 2");
        let (inserted, _) = doc.edit(Range::new(p(0, 4), p(0, 5)), "42");
        assert_eq!(doc.text(), "a = 42\nb = 2");
        assert_eq!(inserted, Range::new(p(0, 4), p(0, 6)));
        assert_eq!(doc.revision(), 1);
    }

    #[test]
    fn test_edit_inserts_lines() {
        let mut doc = TextDocument::new("a\nd");
        let (inserted, _) = doc.edit(Range::point(p(0, 1)), "\nb\nc");
        assert_eq!(doc.text(), "a\nb\nc\nd");
        assert_eq!(inserted, Range::new(p(0, 1), p(2, 1)));
        assert_eq!(doc.line_count(), 4);
    }

    #[test]
    fn test_edit_joins_lines() {
        let mut doc = TextDocument::new("one\ntwo\nthree");
        doc.edit(Range::new(p(0, 2), p(2, 1)), "");
        assert_eq!(doc.text(), "onhree");
    }

    #[test]
    fn test_edit_moves_and_invalidates_markers() {
        let mut doc = TextDocument::new("x = 1\n\ny = 2\nz = 3");
        let kept = doc.add_marker(Range::new(p(2, 0), p(2, 5)), InvalidationPolicy::Surround);
        let gone = doc.add_marker(Range::new(p(0, 0), p(0, 5)), InvalidationPolicy::Surround);

        let (_, invalidated) = doc.edit(Range::new(p(0, 0), p(1, 0)), "");
        assert_eq!(invalidated, vec![gone]);
        assert_eq!(
            doc.markers().current_range(kept),
            Some(Range::new(p(1, 0), p(1, 5)))
        );
        assert!(doc.markers().is_valid(kept));
    }

    #[tokio::test]
    async fn test_changes_settle_after_quiet_period() {
        let mut doc = TextDocument::new("");
        let mut watcher = doc.subscribe();

        doc.edit(Range::point(p(0, 0)), "a");
        doc.edit(Range::point(p(0, 1)), "b");
        doc.edit(Range::point(p(0, 2)), "c");

        let settled = watcher.settled(Duration::from_millis(50)).await;
        assert_eq!(settled, Some(3));
    }

    #[tokio::test]
    async fn test_watcher_ends_with_document() {
        let doc = TextDocument::new("");
        let mut watcher = doc.subscribe();
        drop(doc);
        assert_eq!(watcher.settled(Duration::from_millis(10)).await, None);
    }
}
