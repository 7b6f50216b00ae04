//! Option structs configuring the writer, reader, planner, and pair-join
//! iterators. Each is a plain `Copy`/`Clone` struct with a `Default` impl
//! carrying the values the design calls out as defaults, the same shape as
//! the teacher's `CompactionConfig`.

use crate::coord::CoordRange;
use crate::field::Field;

/// 8 MiB — the default flush threshold for a field's in-memory write
/// buffer before it is handed off for block encoding + compression.
pub const DEFAULT_MAX_BUF_SIZE: usize = 8 * 1024 * 1024;

/// Default number of background flush/compression workers when the caller
/// doesn't ask [`crate::resource::ResourceManager`] to pick one.
pub const DEFAULT_WRITE_PARALLELISM: usize = 4;

/// Default maximum genomic distance (in bp) a bounded-span pair join will
/// wait for a mate before giving up and reporting `MissingMate`.
pub const DEFAULT_MAX_PAIR_SPAN: i32 = 1000;

#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Bytes of buffered (pre-compression) column data per field before an
    /// automatic flush.
    pub max_buf_size: usize,
    /// Number of background threads performing block compression + I/O.
    pub write_parallelism: usize,
    /// Fields to omit entirely from this shard (e.g. dropping `qual` for an
    /// alignment-only view). Dropped fields are not written to disk at all;
    /// a later reader sees them as absent (`None`), not a literal file.
    pub drop_fields: Vec<Field>,
    /// Whether block streams are zstd-compressed, and at what level.
    pub compression: crate::codec::Compression,
    /// Restrict the write to this coordinate range; records outside it are
    /// an `OutOfRange` error rather than silently dropped.
    pub range: Option<CoordRange>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        WriterOptions {
            max_buf_size: DEFAULT_MAX_BUF_SIZE,
            write_parallelism: DEFAULT_WRITE_PARALLELISM,
            drop_fields: Vec::new(),
            compression: crate::codec::Compression::Zstd { level: 3 },
            range: None,
        }
    }
}

impl WriterOptions {
    pub fn keeps(&self, field: Field) -> bool {
        !self.drop_fields.contains(&field)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReaderOptions {
    /// Fields the caller doesn't need decoded; skips I/O and CPU for those
    /// columns entirely. Decodes to `None` on every returned record.
    pub drop_fields: Vec<Field>,
    /// Restrict iteration to this range; `None` means the shard's full
    /// range.
    pub range: Option<CoordRange>,
}

impl ReaderOptions {
    pub fn wants(&self, field: Field) -> bool {
        !self.drop_fields.contains(&field)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PlannerOptions {
    /// Target shard size in bytes; mutually exclusive with `num_shards`
    /// (whichever is `Some` wins; `num_shards` takes priority if both are
    /// set, since it's the more specific request).
    pub bytes_per_shard: Option<u64>,
    pub num_shards: Option<usize>,
    /// Never place a (refID,pos) coordinate cluster across a shard
    /// boundary. Default `true` — this is the no-split-by-default
    /// guarantee the design calls out.
    pub split_mapped_coords: bool,
    pub split_unmapped_coords: bool,
    /// Always place a boundary between the last mapped and first unmapped
    /// record, regardless of byte-weight balance.
    pub always_split_mapped_and_unmapped: bool,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        PlannerOptions {
            bytes_per_shard: None,
            num_shards: None,
            split_mapped_coords: false,
            split_unmapped_coords: false,
            always_split_mapped_and_unmapped: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PairOptions {
    /// Maximum genomic span (bp) between a record and its mate for the
    /// bounded-span join; mates farther apart are reported as
    /// `MissingMate` rather than being searched for indefinitely.
    pub max_pair_span: i32,
    /// Whether a read whose mate crossed into a different shard should be
    /// emitted twice (once per shard) or suppressed in the shard that
    /// doesn't "own" the pair.
    pub duplicate_shard_crossers: bool,
}

impl Default for PairOptions {
    fn default() -> Self {
        PairOptions { max_pair_span: DEFAULT_MAX_PAIR_SPAN, duplicate_shard_crossers: false }
    }
}
