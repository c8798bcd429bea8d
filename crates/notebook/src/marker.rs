//! Document markers: ranges that follow edits and report invalidation.

use std::collections::BTreeMap;

use chunk_text::{Position, Range};
use serde::{Deserialize, Serialize};

pub type MarkerId = u64;

/// When an edit invalidates a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationPolicy {
    Never,
    /// An edit that spans the whole marker.
    #[default]
    Surround,
    /// An edit that spans the marker's start or end.
    Overlap,
    /// An edit that reaches inside the marker.
    Inside,
    /// An edit that touches the marker, boundaries included.
    Touch,
}

impl InvalidationPolicy {
    fn invalidated_by(self, marker: &Range, edit: &Range) -> bool {
        let surrounds = !edit.is_empty() && edit.start <= marker.start && marker.end <= edit.end;
        match self {
            InvalidationPolicy::Never => false,
            InvalidationPolicy::Surround => surrounds,
            InvalidationPolicy::Overlap => {
                surrounds
                    || (edit.start < marker.start && marker.start < edit.end)
                    || (edit.start < marker.end && marker.end < edit.end)
            }
            InvalidationPolicy::Inside => edit.start < marker.end && marker.start < edit.end,
            InvalidationPolicy::Touch => edit.start <= marker.end && marker.start <= edit.end,
        }
    }
}

#[derive(Debug, Clone)]
struct Marker {
    range: Range,
    policy: InvalidationPolicy,
    valid: bool,
}

/// Markers for one document, in creation order.
#[derive(Debug, Default)]
pub struct MarkerLayer {
    markers: BTreeMap<MarkerId, Marker>,
    next_id: MarkerId,
}

impl MarkerLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_marker(&mut self, range: Range, policy: InvalidationPolicy) -> MarkerId {
        let id = self.next_id;
        self.next_id += 1;
        self.markers.insert(
            id,
            Marker {
                range,
                policy,
                valid: true,
            },
        );
        id
    }

    pub fn current_range(&self, id: MarkerId) -> Option<Range> {
        self.markers.get(&id).map(|m| m.range)
    }

    pub fn is_valid(&self, id: MarkerId) -> bool {
        self.markers.get(&id).is_some_and(|m| m.valid)
    }

    pub fn destroy(&mut self, id: MarkerId) -> bool {
        self.markers.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Valid markers whose range intersects `range`.
    pub fn intersecting(&self, range: &Range) -> Vec<MarkerId> {
        self.markers
            .iter()
            .filter(|(_, m)| m.valid && m.range.intersects(range))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Move markers for an edit that replaced `old` with text ending at
    /// `new_end`. Returns the markers this edit invalidated.
    pub fn apply_edit(&mut self, old: Range, new_end: Position) -> Vec<MarkerId> {
        let mut invalidated = Vec::new();
        for (id, marker) in self.markers.iter_mut() {
            if marker.valid && marker.policy.invalidated_by(&marker.range, &old) {
                marker.valid = false;
                invalidated.push(*id);
            }
            let start = shift(marker.range.start, &old, new_end, false);
            let end = shift(marker.range.end, &old, new_end, true);
            marker.range = Range::new(start, end.max(start));
        }
        invalidated
    }
}

/// Where `p` lands after `old` is replaced by text ending at `new_end`.
///
/// Insertions exactly at a marker's end grow the marker; insertions at its
/// start do not move it.
fn shift(p: Position, old: &Range, new_end: Position, is_end: bool) -> Position {
    let insertion_at_end = is_end && old.is_empty() && p == old.start;
    if p < old.start || (p == old.start && !insertion_at_end) {
        return p;
    }
    if p >= old.end {
        if p.row == old.end.row {
            return Position::new(new_end.row, new_end.column + (p.column - old.end.column));
        }
        let rows = new_end.row as isize - old.end.row as isize;
        return p.translate(rows, 0);
    }
    new_end
}
