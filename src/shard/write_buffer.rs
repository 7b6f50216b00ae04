//! In-memory staging area for records not yet flushed to column blocks.
//!
//! Unlike an upsert-keyed memtable, this log is a plain append-only run:
//! PAM records are written once, in ascending `Coord` order, and never
//! updated. A single [`RecordLog`] backs every kept field so append-order
//! records aren't duplicated per field, but each field flushes
//! independently (§4.2): a [`FieldCursor`] tracks how far that field alone
//! has been flushed and how many pending bytes it has accumulated since, so
//! one field crossing its flush threshold doesn't force every other field
//! to flush early too.

use crate::field::{Field, Record};

/// Records pending flush, addressed by an absolute index that only grows:
/// `compact` can drop a prefix once every field has flushed past it, but
/// never renumbers the records that remain.
#[derive(Debug, Default)]
pub struct RecordLog {
    records: Vec<Record>,
    base_index: usize,
}

impl RecordLog {
    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    /// Absolute index one past the last pushed record.
    pub fn len(&self) -> usize {
        self.base_index + self.records.len()
    }

    /// The records spanning absolute indices `[start, end)`. Both bounds
    /// must fall within `[base_index, len()]`.
    pub fn slice(&self, start: usize, end: usize) -> &[Record] {
        &self.records[start - self.base_index..end - self.base_index]
    }

    /// Drop every record before absolute index `through`, advancing
    /// `base_index` so indices already handed out elsewhere stay valid.
    /// Called once per write, after every field due to flush has flushed,
    /// with `through` the minimum `flushed_through` across all kept fields'
    /// cursors — so the log only ever holds records at least one field
    /// still needs.
    pub fn compact(&mut self, through: usize) {
        let drop_count = through.saturating_sub(self.base_index);
        if drop_count == 0 {
            return;
        }
        self.records.drain(0..drop_count);
        self.base_index = through;
    }
}

/// Rough per-field byte-size estimate used to decide when that field alone
/// should flush, cheaper than encoding eagerly. Exactness doesn't matter
/// since flush boundaries carry no semantic meaning.
pub fn estimate_field_bytes(field: Field, record: &Record) -> usize {
    match field {
        Field::Coord => 4 + 4,
        Field::Flags => 2,
        Field::MapQ => 1,
        Field::Cigar => record.cigar.as_ref().map_or(1, |c| 4 + c.len() * 4),
        Field::MateRefId => 4,
        Field::MatePos => 4,
        Field::TempLen => 4,
        Field::Name => record.name.as_ref().map_or(1, |v| v.len()),
        Field::Seq => record.seq.as_ref().map_or(1, |v| v.len().div_ceil(2)),
        Field::Qual => record.qual.as_ref().map_or(1, |v| v.len()),
        Field::Aux => record.aux.as_ref().map_or(1, |tags| tags.iter().map(|t| 3 + t.payload.len()).sum()),
    }
}

/// One kept field's independent flush state: how far into the shared
/// [`RecordLog`] this field has already flushed, and how many bytes of
/// pending (not yet flushed) records it has accumulated since.
#[derive(Debug, Default)]
pub struct FieldCursor {
    flushed_through: usize,
    pending_bytes: usize,
}

impl FieldCursor {
    pub fn note_push(&mut self, field: Field, record: &Record) {
        self.pending_bytes += estimate_field_bytes(field, record);
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    pub fn flushed_through(&self) -> usize {
        self.flushed_through
    }

    pub fn mark_flushed(&mut self, through: usize) {
        self.flushed_through = through;
        self.pending_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::Coord;

    fn record(pos: i32) -> Record {
        Record {
            coord: Coord::new(0, pos, 0),
            flags: 0,
            mapq: 0,
            cigar: None,
            mate_ref_id: -1,
            mate_pos: -1,
            temp_len: 0,
            name: None,
            seq: None,
            qual: None,
            aux: None,
        }
    }

    #[test]
    fn push_tracks_absolute_length() {
        let mut log = RecordLog::default();
        log.push(record(1));
        log.push(record(2));
        assert_eq!(log.len(), 2);
        assert_eq!(log.slice(0, 2).len(), 2);
    }

    #[test]
    fn compact_preserves_absolute_indexing_of_remaining_records() {
        let mut log = RecordLog::default();
        for pos in 0..5 {
            log.push(record(pos));
        }
        log.compact(3);
        assert_eq!(log.len(), 5);
        let tail = log.slice(3, 5);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].coord.pos, 3);
    }

    #[test]
    fn field_cursor_accumulates_and_resets_on_flush() {
        let mut cursor = FieldCursor::default();
        cursor.note_push(Field::MapQ, &record(0));
        cursor.note_push(Field::MapQ, &record(1));
        assert_eq!(cursor.pending_bytes(), 2);
        assert_eq!(cursor.flushed_through(), 0);
        cursor.mark_flushed(2);
        assert_eq!(cursor.pending_bytes(), 0);
        assert_eq!(cursor.flushed_through(), 2);
    }
}
