//! Shard reader: range-seek over independently block-boundaried fields.
//!
//! Field files are opened read-only via `memmap2`, matching the mmap
//! segment-reader idiom. Because the writer flushes each field on its own
//! schedule (see [`crate::shard::writer`]), a given absolute record index
//! can land in a different block number, and a different local offset
//! within that block, for every field. The reader resolves that with one
//! shared "current record" counter — an index into the shard's global
//! append order, the one thing every field agrees on — and, for each
//! field independently, a cumulative per-block record-count table built at
//! `open` time that turns that counter into "which block, which offset"
//! for that field alone via binary search. `seq`, the coord column's
//! tie-breaker, is never stored on disk either; every decoded coord block
//! is patched back to its true `seq` from the block's `first_seq` index
//! metadata plus the decoded `(ref_id, pos)` stream (see
//! `coord::SeqAssigner::regenerate`).

use crate::codec::{self, FieldValue};
use crate::coord::{Coord, CoordRange, SeqAssigner};
use crate::error::{PamError, Result};
use crate::field::{Field, Record};
use crate::path::{field_path, Basename};
use crate::shard::index::{BlockEntry, FieldIndex, ShardIndexFile};
use memmap2::Mmap;
use std::collections::HashMap;
use std::fs::File;
use std::io::Cursor;
use std::path::Path;

struct FieldColumn {
    mmap: Mmap,
    index: FieldIndex,
    /// `record_offsets[i]` is the absolute record index of block `i`'s first
    /// record; `record_offsets[blocks.len()]` is the field's total record
    /// count. Built once at open so locating a block for a given absolute
    /// index is a binary search rather than a scan.
    record_offsets: Vec<usize>,
    /// Cache of the most recently decoded block, so sequential reads within
    /// a block don't re-decode on every record.
    cached_block: Option<(usize, Vec<FieldValue>)>,
}

impl FieldColumn {
    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let index = FieldIndex::read_trailer(&mut Cursor::new(&mmap[..]))?;
        let mut record_offsets = Vec::with_capacity(index.blocks.len() + 1);
        let mut total = 0usize;
        record_offsets.push(0);
        for block in &index.blocks {
            total += block.record_count as usize;
            record_offsets.push(total);
        }
        Ok(FieldColumn { mmap, index, record_offsets, cached_block: None })
    }

    fn total_records(&self) -> usize {
        *self.record_offsets.last().unwrap_or(&0)
    }

    /// The `(block_idx, local_offset)` covering absolute record `index`, or
    /// `None` once `index` is past this field's last record.
    fn locate(&self, index: usize) -> Option<(usize, usize)> {
        if index >= self.total_records() {
            return None;
        }
        let block_idx = self.record_offsets.partition_point(|&o| o <= index) - 1;
        Some((block_idx, index - self.record_offsets[block_idx]))
    }

    fn block_bytes(&self, entry: &BlockEntry) -> &[u8] {
        &self.mmap[entry.offset as usize..(entry.offset + entry.length) as usize]
    }

    fn decode_block(&mut self, field: Field, block_idx: usize) -> Result<&[FieldValue]> {
        if self.cached_block.as_ref().map(|(i, _)| *i) != Some(block_idx) {
            let entry = *self.index.blocks.get(block_idx).ok_or_else(|| PamError::out_of_range("block index past end of shard"))?;
            if entry.length == 0 && entry.record_count > 0 {
                tracing::warn!(?field, block_idx, entry.record_count, "zero-byte trailing block in field index, likely a writer crashed mid-flush");
            }
            let bytes = self.block_bytes(&entry).to_vec();
            let mut values = codec::decode_column(field, &bytes)?;
            if field == Field::Coord {
                patch_coord_seq(&mut values, entry.first_seq);
            }
            self.cached_block = Some((block_idx, values));
        }
        Ok(&self.cached_block.as_ref().unwrap().1)
    }
}

/// A decoded coord block carries `ref_id`/`pos` but `seq == 0` for every
/// record (see `codec::block`'s `Field::Coord` arm — `seq` is never
/// written). Regenerate it deterministically from the block's own
/// `(ref_id, pos)` stream, seeded by the block index's `first_seq`, and
/// write the real values back in place.
fn patch_coord_seq(values: &mut [FieldValue], first_seq: i32) {
    let ref_ids: Vec<i32> = values
        .iter()
        .map(|v| match v {
            FieldValue::Coord(c) => c.ref_id,
            _ => unreachable!("coord column decodes to FieldValue::Coord"),
        })
        .collect();
    let pos: Vec<i32> = values
        .iter()
        .map(|v| match v {
            FieldValue::Coord(c) => c.pos,
            _ => unreachable!("coord column decodes to FieldValue::Coord"),
        })
        .collect();
    let seq = SeqAssigner::regenerate(&ref_ids, &pos, first_seq);
    for (value, s) in values.iter_mut().zip(seq) {
        if let FieldValue::Coord(c) = value {
            c.seq = s;
        }
    }
}

pub struct ShardReader {
    range: CoordRange,
    requested_range: CoordRange,
    header: Vec<u8>,
    columns: HashMap<Field, FieldColumn>,
    /// The next record to hand out, as an absolute index into the shard's
    /// global append order — the index space every field's blocks are
    /// sub-ranges of, regardless of how those fields are individually
    /// blocked.
    current_index: usize,
    total_records: u64,
}

impl ShardReader {
    pub fn open(dir: &Path, shard_range: CoordRange, options: crate::config::ReaderOptions) -> Result<Self> {
        let _span = tracing::info_span!("shard_reader_open", shard = %shard_range, dir = %dir.display()).entered();
        tracing::debug!(range = ?options.range, drop_fields = options.drop_fields.len(), "opening shard reader");
        if !options.wants(Field::Coord) {
            return Err(PamError::invalid_opts("coord field cannot be dropped from a reader"));
        }
        let index_path = field_path(dir, shard_range, Basename::Index);
        let shard_index = ShardIndexFile::read(&mut std::io::BufReader::new(File::open(&index_path)?), shard_range)?;

        let mut columns = HashMap::new();
        for field in &shard_index.fields {
            if !options.wants(*field) {
                continue;
            }
            let path = field_path(dir, shard_range, Basename::Field(*field));
            columns.insert(*field, FieldColumn::open(&path)?);
        }
        if !columns.contains_key(&Field::Coord) {
            return Err(PamError::format("shard has no coord column; cannot read"));
        }

        let mut reader = ShardReader {
            range: shard_range,
            requested_range: options.range.unwrap_or(shard_range),
            header: shard_index.header,
            columns,
            current_index: 0,
            total_records: shard_index.record_count,
        };
        let start = reader.requested_range.start;
        reader.seek(start)?;
        Ok(reader)
    }

    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    /// The source BAM's SAM header bytes, copied verbatim into this
    /// shard's index file by the writer that produced it.
    pub fn header(&self) -> &[u8] {
        &self.header
    }

    pub fn range(&self) -> CoordRange {
        self.range
    }

    /// Position the reader so the next call to [`Self::next_record`]
    /// returns the first record with `coord >= target`, or exhausts the
    /// shard if no such record exists.
    ///
    /// 1. Binary search the coord field's own block index for the first
    ///    block whose span could contain `target`.
    /// 2. Decode that block's coord column (patching in regenerated `seq`).
    /// 3. Linear-scan within the block for the first record `>= target`.
    /// 4. Convert that block-local position to an absolute record index —
    ///    every other field locates its own block from this same index,
    ///    independently, on the next [`Self::next_record`] call.
    pub fn seek(&mut self, target: Coord) -> Result<()> {
        tracing::debug!(%target, "shard reader seek");
        let coord_column = self.columns.get_mut(&Field::Coord).unwrap();
        let block_idx = coord_column.index.blocks.partition_point(|b| b.last_coord() < target);
        if block_idx >= coord_column.index.blocks.len() {
            self.current_index = coord_column.total_records();
            return Ok(());
        }
        let block_start = coord_column.record_offsets[block_idx];
        let values = coord_column.decode_block(Field::Coord, block_idx)?;
        let within = values.iter().position(|v| matches!(v, FieldValue::Coord(c) if *c >= target)).unwrap_or(values.len());
        self.current_index = block_start + within;
        Ok(())
    }

    /// Read the next record, or `None` at end of shard / end of the
    /// requested range.
    pub fn next_record(&mut self) -> Option<Result<Record>> {
        let coord_column = self.columns.get_mut(&Field::Coord).unwrap();
        let (coord_block, coord_local) = coord_column.locate(self.current_index)?;
        let coord = match coord_column.decode_block(Field::Coord, coord_block) {
            Ok(values) => match &values[coord_local] {
                FieldValue::Coord(c) => *c,
                _ => unreachable!("coord column decodes to FieldValue::Coord"),
            },
            Err(e) => return Some(Err(e)),
        };
        if coord >= self.requested_range.limit {
            return None;
        }

        let mut flags = 0u16;
        let mut mapq = 0u8;
        let mut cigar = None;
        let mut mate_ref_id = -1i32;
        let mut mate_pos = -1i32;
        let mut temp_len = 0i32;
        let mut name = None;
        let mut seq = None;
        let mut qual = None;
        let mut aux = None;

        for field in Field::ALL {
            if field == Field::Coord {
                continue;
            }
            let Some(column) = self.columns.get_mut(&field) else { continue };
            let Some((block_idx, local)) = column.locate(self.current_index) else { continue };
            let values = match column.decode_block(field, block_idx) {
                Ok(v) => v,
                Err(e) => return Some(Err(e)),
            };
            match &values[local] {
                FieldValue::Flags(v) => flags = *v,
                FieldValue::MapQ(v) => mapq = *v,
                FieldValue::Cigar(v) => cigar = v.clone(),
                FieldValue::MateRefId(v) => mate_ref_id = *v,
                FieldValue::MatePos(v) => mate_pos = *v,
                FieldValue::TempLen(v) => temp_len = *v,
                FieldValue::Name(v) => name = v.clone(),
                FieldValue::Seq(v) => seq = v.clone(),
                FieldValue::Qual(v) => qual = v.clone(),
                FieldValue::Aux(v) => aux = v.clone(),
                FieldValue::Coord(_) => unreachable!(),
            }
        }

        self.current_index += 1;
        Some(Ok(Record { coord, flags, mapq, cigar, mate_ref_id, mate_pos, temp_len, name, seq, qual, aux }))
    }
}

impl Iterator for ShardReader {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record()
    }
}
