//! `Provider`: opens every shard of a dataset directory and yields a single
//! ordered iterator (or a per-shard iterator for parallel consumption).
//!
//! A `Provider` is safe to share across threads (`Send + Sync`): it holds no
//! mutable state itself, only the dataset directory and the discovered
//! shard ranges. Each call to [`Provider::iter`]/[`Provider::iter_shard`]
//! opens an independent [`ShardReader`], so multiple iterators may be live
//! concurrently over the same `Provider`.

use crate::config::ReaderOptions;
use crate::coord::CoordRange;
use crate::error::{PamError, Result};
use crate::field::Record;
use crate::path::discover_shards;
use crate::shard::ShardReader;
use std::path::{Path, PathBuf};

#[derive(Clone)]
pub struct Provider {
    dir: PathBuf,
    shards: Vec<CoordRange>,
}

impl Provider {
    /// Open a dataset directory, discovering its shards by scanning for
    /// `<range>.index` files. Returns `NoDataset` if the directory has no
    /// shards at all.
    pub fn open(dir: &Path) -> Result<Self> {
        let shards = discover_shards(dir)?;
        if shards.is_empty() {
            return Err(PamError::NoDataset(dir.display().to_string()));
        }
        Ok(Provider { dir: dir.to_path_buf(), shards })
    }

    /// The dataset's shards, in ascending coordinate order. Shards tile the
    /// universal range without gaps or overlaps by construction (the
    /// planner guarantees this on write).
    pub fn shards(&self) -> &[CoordRange] {
        &self.shards
    }

    /// The dataset's backing directory. Used internally by the planner,
    /// which needs direct file access to read block byte weights; other
    /// callers should go through [`Self::iter`]/[`Self::open_shard`].
    pub(crate) fn dataset_dir(&self) -> &Path {
        &self.dir
    }

    /// Every shard whose range overlaps `range`.
    pub fn shards_overlapping(&self, range: CoordRange) -> Vec<CoordRange> {
        self.shards.iter().copied().filter(|s| s.overlaps(&range)).collect()
    }

    /// Open a single shard's reader directly.
    pub fn open_shard(&self, shard: CoordRange, options: ReaderOptions) -> Result<ShardReader> {
        ShardReader::open(&self.dir, shard, options)
    }

    /// The dataset's reference-table-defining BAM header bytes, read from
    /// whichever shard happens to sort first. Every shard in a dataset
    /// shares the same source header, so any one of them is authoritative.
    pub fn header(&self) -> Result<Vec<u8>> {
        let first = *self.shards.first().expect("Provider::open rejects empty datasets");
        let reader = self.open_shard(first, ReaderOptions::default())?;
        Ok(reader.header().to_vec())
    }

    /// An iterator over every record in the dataset (optionally restricted
    /// to `options.range`), reading shards one at a time in coordinate
    /// order. For parallel consumption, use [`Self::shards_overlapping`]
    /// plus [`Self::open_shard`] directly, one reader per worker thread.
    pub fn iter(&self, options: ReaderOptions) -> Result<DatasetIter> {
        let requested = options.range.unwrap_or_else(CoordRange::universal);
        let shards = self.shards_overlapping(requested);
        Ok(DatasetIter { provider: self.clone(), options, shards, next_shard: 0, current: None })
    }
}

pub struct DatasetIter {
    provider: Provider,
    options: ReaderOptions,
    shards: Vec<CoordRange>,
    next_shard: usize,
    current: Option<ShardReader>,
}

impl Iterator for DatasetIter {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(reader) = self.current.as_mut() {
                if let Some(item) = reader.next_record() {
                    return Some(item);
                }
                self.current = None;
            }
            if self.next_shard >= self.shards.len() {
                return None;
            }
            let shard = self.shards[self.next_shard];
            self.next_shard += 1;
            match self.provider.open_shard(shard, self.options.clone()) {
                Ok(reader) => self.current = Some(reader),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
