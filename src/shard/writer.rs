//! Shard writer: accumulates records and flushes per-field column blocks.
//!
//! Mirrors the segment-writer-plus-trailer idiom: each field file is a
//! sequence of independently flushed blocks followed by a [`FieldIndex`]
//! trailer (see [`crate::shard::index`]). Flush boundaries are genuinely
//! *not* aligned across fields (§4.2): every kept field owns a
//! [`FieldCursor`] tracking its own pending-byte estimate against a shared
//! [`RecordLog`], and a field only flushes once its own estimate crosses
//! `max_buf_size` — a large field like `seq` can flush several times while
//! a small, constant-width field like `mapq` is still accumulating its
//! first block.

use crate::cancel::CancelToken;
use crate::codec;
use crate::config::WriterOptions;
use crate::coord::{Coord, CoordRange};
use crate::error::{PamError, Result};
use crate::field::{Field, Record};
use crate::path::{field_path, Basename};
use crate::shard::index::{BlockEntry, FieldIndex, ShardIndexFile};
use crate::shard::write_buffer::{FieldCursor, RecordLog};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Bounded pool of reusable byte buffers backing the writer's per-field
/// flush path, implemented with a `crossbeam-channel` bounded channel —
/// acquiring blocks (providing backpressure) when every buffer is in use
/// by an in-flight background flush.
struct BufferPool {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl BufferPool {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        for _ in 0..capacity {
            tx.send(Vec::new()).expect("pool just created, cannot be full");
        }
        BufferPool { tx, rx }
    }

    fn acquire(&self) -> Vec<u8> {
        self.rx.recv().expect("pool sender outlives receiver for writer lifetime")
    }

    fn release(&self, mut buf: Vec<u8>) {
        buf.clear();
        let _ = self.tx.send(buf);
    }
}

struct FieldFile {
    writer: BufWriter<File>,
    offset: u64,
    index: FieldIndex,
}

pub struct ShardWriter {
    dir: PathBuf,
    range: CoordRange,
    header: Vec<u8>,
    options: WriterOptions,
    log: RecordLog,
    cursors: HashMap<Field, FieldCursor>,
    kept_fields: Vec<Field>,
    files: HashMap<Field, FieldFile>,
    pool: rayon::ThreadPool,
    buffers: BufferPool,
    total_records: u64,
    last_coord: Option<Coord>,
    closed: bool,
    cancel: CancelToken,
}

impl ShardWriter {
    /// Open a new shard for writing at `dir`, creating one field file per
    /// kept field. The directory must not already contain a shard with this
    /// exact range (existing files for the same range are truncated,
    /// matching the "no multi-writer concurrency on a single shard"
    /// non-goal: callers are responsible for not opening the same shard
    /// twice concurrently).
    pub fn open(dir: &Path, range: CoordRange, header: &[u8], options: WriterOptions) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let kept_fields: Vec<Field> = Field::ALL.into_iter().filter(|f| options.keeps(*f)).collect();
        if kept_fields.is_empty() {
            return Err(PamError::invalid_opts("cannot drop every field"));
        }
        let mut files = HashMap::new();
        let mut cursors = HashMap::new();
        for field in &kept_fields {
            let path = field_path(dir, range, Basename::Field(*field));
            let file = File::create(path)?;
            files.insert(
                *field,
                FieldFile { writer: BufWriter::new(file), offset: 0, index: FieldIndex { blocks: Vec::new() } },
            );
            cursors.insert(*field, FieldCursor::default());
        }
        let parallelism = options.write_parallelism.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallelism)
            .build()
            .map_err(|e| PamError::format(format!("failed to build writer thread pool: {e}")))?;
        tracing::info!(shard = %range, fields = kept_fields.len(), "opened shard writer");
        Ok(ShardWriter {
            dir: dir.to_path_buf(),
            range,
            header: header.to_vec(),
            options,
            log: RecordLog::default(),
            cursors,
            kept_fields,
            files,
            pool,
            // One buffer is acquired per field flushed in a given
            // `flush_fields` call (at most `kept_fields.len()`), and all of
            // them are held until that call's files are written and the
            // buffers released back — flushes never overlap (`flush_fields`
            // fully drains before returning), so a pool sized to the field
            // count never blocks.
            buffers: BufferPool::new(kept_fields.len()),
            total_records: 0,
            last_coord: None,
            closed: false,
            cancel: CancelToken::new(),
        })
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn header(&self) -> &[u8] {
        &self.header
    }

    /// Append one record. Records must arrive in non-decreasing `Coord`
    /// order and within the shard's range; violating either is an
    /// `OutOfRange` error, since a shard's on-disk invariants (ascending
    /// order, no gaps) can't be repaired after the fact.
    pub fn write(&mut self, record: Record) -> Result<()> {
        if self.closed {
            return Err(PamError::invalid_opts("write after close"));
        }
        self.cancel.check()?;
        if !self.range.contains(record.coord) {
            return Err(PamError::out_of_range(format!("{} not in shard range {}", record.coord, self.range)));
        }
        if let Some(last) = self.last_coord {
            if record.coord < last {
                return Err(PamError::out_of_range(format!("record {} precedes previous {}", record.coord, last)));
            }
        }
        self.last_coord = Some(record.coord);
        for field in &self.kept_fields {
            self.cursors.get_mut(field).expect("cursor opened for every kept field").note_push(*field, &record);
        }
        self.log.push(record);
        self.total_records += 1;
        self.flush_due_fields()
    }

    /// Flush every kept field whose own pending-byte estimate has crossed
    /// `max_buf_size`. Fields below their threshold are left untouched —
    /// this is the independent-flush-timing behavior of §4.2.
    fn flush_due_fields(&mut self) -> Result<()> {
        let due: Vec<Field> =
            self.kept_fields.iter().copied().filter(|f| self.cursors[f].pending_bytes() >= self.options.max_buf_size).collect();
        self.flush_fields(&due)
    }

    /// Force-flush every kept field that has any unflushed record, whether
    /// or not it has crossed its own threshold yet. Used by [`Self::close`]
    /// to drain the tail of every column.
    pub fn flush(&mut self) -> Result<()> {
        let log_len = self.log.len();
        let due: Vec<Field> = self.kept_fields.iter().copied().filter(|f| self.cursors[f].flushed_through() < log_len).collect();
        self.flush_fields(&due)
    }

    /// Encode and append each of `fields`' own pending records — each
    /// field's own slice of the shared log, from where it last flushed
    /// through the log's current end — to that field's file, in parallel
    /// across fields. Fields not named in `fields` are left exactly as they
    /// were.
    fn flush_fields(&mut self, fields: &[Field]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        self.cancel.check()?;
        let compression = self.options.compression;
        let log_len = self.log.len();

        let jobs: Vec<(Field, usize, Vec<u8>)> =
            fields.iter().map(|&field| (field, self.cursors[&field].flushed_through(), self.buffers.acquire())).collect();

        let log = &self.log;
        let encoded: Vec<(Field, usize, usize, Result<Vec<u8>>)> = self.pool.install(|| {
            use rayon::prelude::*;
            jobs.into_par_iter()
                .map(|(field, start, buf)| {
                    let records = log.slice(start, log_len);
                    (field, start, log_len, codec::encode_column_into(field, records, compression, buf))
                })
                .collect()
        });

        for (field, start, end, result) in encoded {
            let bytes = result?;
            let records = self.log.slice(start, end);
            let first_coord = records.first().map(|r| r.coord).expect("flush_fields only called for fields with pending records");
            let last_coord = records.last().map(|r| r.coord).expect("just checked non-empty");
            let file = self.files.get_mut(&field).expect("field file opened for every kept field");
            let entry = BlockEntry {
                offset: file.offset,
                length: bytes.len() as u64,
                record_count: (end - start) as u32,
                first_ref_id: first_coord.ref_id,
                first_pos: first_coord.pos,
                first_seq: first_coord.seq,
                last_ref_id: last_coord.ref_id,
                last_pos: last_coord.pos,
                last_seq: last_coord.seq,
            };
            file.writer.write_all(&bytes)?;
            file.offset += bytes.len() as u64;
            file.index.blocks.push(entry);
            self.buffers.release(bytes);
            self.cursors.get_mut(&field).expect("cursor opened for every kept field").mark_flushed(end);
        }

        let min_flushed = self.kept_fields.iter().map(|f| self.cursors[f].flushed_through()).min().unwrap_or(log_len);
        self.log.compact(min_flushed);
        Ok(())
    }

    /// Flush any remaining buffered records, write every field's trailer,
    /// and write the shard index file. After `close`, the writer can no
    /// longer accept writes.
    pub fn close(mut self) -> Result<()> {
        self.close_mut()
    }

    fn close_mut(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.flush()?;
        for field in &self.kept_fields {
            let file = self.files.get_mut(field).expect("field file opened for every kept field");
            file.index.write_trailer(&mut file.writer)?;
            file.writer.flush()?;
        }
        let index_path = field_path(&self.dir, self.range, Basename::Index);
        let shard_index =
            ShardIndexFile { range: self.range, record_count: self.total_records, fields: self.kept_fields.clone(), header: self.header.clone() };
        let mut f = BufWriter::new(File::create(index_path)?);
        shard_index.write(&mut f)?;
        f.flush()?;
        self.closed = true;
        tracing::info!(shard = %self.range, records = self.total_records, "closed shard writer");
        Ok(())
    }
}

impl Drop for ShardWriter {
    /// Best-effort flush on drop without panicking; callers that want write
    /// errors surfaced must call [`ShardWriter::close`] explicitly. A shard
    /// abandoned via `Drop` without `close` is left without valid trailers,
    /// matching the "not guaranteed to be valid" partial-write invariant.
    fn drop(&mut self) {
        if !self.closed {
            tracing::warn!(shard = %self.range, "shard writer dropped without close; trailers not written");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::Coord;
    use crate::shard::index::FieldIndex as FieldIndexTrailer;
    use std::io::Cursor;

    fn record(pos: i32) -> Record {
        Record {
            coord: Coord::new(0, pos, 0),
            flags: 0,
            mapq: 30,
            cigar: None,
            mate_ref_id: -1,
            mate_pos: -1,
            temp_len: 0,
            name: Some(format!("r{pos}").into_bytes()),
            seq: Some(b"ACGT".to_vec()),
            qual: Some(vec![30; 4]),
            aux: None,
        }
    }

    #[test]
    fn writes_in_order_and_closes_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let range = CoordRange::new(Coord::new(0, 0, 0), Coord::new(1, 0, 0));
        let mut writer = ShardWriter::open(dir.path(), range, b"", WriterOptions::default()).unwrap();
        for pos in [0, 10, 20, 20, 30] {
            writer.write(record(pos)).unwrap();
        }
        writer.close().unwrap();

        let index_path = field_path(dir.path(), range, Basename::Index);
        assert!(index_path.exists());
        for field in Field::ALL {
            assert!(field_path(dir.path(), range, Basename::Field(field)).exists());
        }
    }

    #[test]
    fn out_of_order_write_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let range = CoordRange::new(Coord::new(0, 0, 0), Coord::new(1, 0, 0));
        let mut writer = ShardWriter::open(dir.path(), range, b"", WriterOptions::default()).unwrap();
        writer.write(record(100)).unwrap();
        assert!(writer.write(record(50)).is_err());
    }

    #[test]
    fn out_of_range_write_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let range = CoordRange::new(Coord::new(0, 0, 0), Coord::new(1, 0, 0));
        let mut writer = ShardWriter::open(dir.path(), range, b"", WriterOptions::default()).unwrap();
        assert!(writer.write(record(0).tap_coord(Coord::new(5, 0, 0))).is_err());
    }

    #[test]
    fn dropped_fields_write_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let range = CoordRange::new(Coord::new(0, 0, 0), Coord::new(1, 0, 0));
        let options = WriterOptions { drop_fields: vec![Field::Qual], ..WriterOptions::default() };
        let mut writer = ShardWriter::open(dir.path(), range, b"", options).unwrap();
        writer.write(record(5)).unwrap();
        writer.close().unwrap();
        assert!(!field_path(dir.path(), range, Basename::Field(Field::Qual)).exists());
        assert!(field_path(dir.path(), range, Basename::Field(Field::Seq)).exists());
    }

    /// A small `qual` payload (4 bytes/record) crosses `max_buf_size` far
    /// more often than a single-byte `mapq`, so the two fields must end up
    /// with different numbers of on-disk blocks — direct evidence that a
    /// flush in one field doesn't force a flush in another (§4.2).
    #[test]
    fn fields_flush_independently_producing_different_block_counts() {
        let dir = tempfile::tempdir().unwrap();
        let range = CoordRange::new(Coord::new(0, 0, 0), Coord::new(1, 0, 0));
        let options = WriterOptions { max_buf_size: 40, ..WriterOptions::default() };
        let mut writer = ShardWriter::open(dir.path(), range, b"", options).unwrap();
        for i in 0..20 {
            writer.write(record(i * 10)).unwrap();
        }
        writer.close().unwrap();

        let mapq_bytes = std::fs::read(field_path(dir.path(), range, Basename::Field(Field::MapQ))).unwrap();
        let qual_bytes = std::fs::read(field_path(dir.path(), range, Basename::Field(Field::Qual))).unwrap();
        let mapq_index = FieldIndexTrailer::read_trailer(&mut Cursor::new(mapq_bytes)).unwrap();
        let qual_index = FieldIndexTrailer::read_trailer(&mut Cursor::new(qual_bytes)).unwrap();

        assert!(qual_index.blocks.len() > mapq_index.blocks.len());
        assert_eq!(mapq_index.record_count(), 20);
        assert_eq!(qual_index.record_count(), 20);
    }

    trait TapCoord {
        fn tap_coord(self, c: Coord) -> Record;
    }

    impl TapCoord for Record {
        fn tap_coord(mut self, c: Coord) -> Record {
            self.coord = c;
            self
        }
    }
}
