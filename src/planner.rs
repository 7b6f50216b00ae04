//! Read-shard planner: partitions a dataset's existing blocks into
//! byte-weight-balanced `CoordRange`s for parallel consumption.
//!
//! Adapted from the directory-hash shard assignment pattern (deterministic,
//! every input block lands in exactly one output partition, assignment is
//! exhaustive and provably tiles the input) but generalized from hashing a
//! directory name to sweeping block byte weights along the coordinate axis.

use crate::config::PlannerOptions;
use crate::coord::{Coord, CoordRange};
use crate::error::Result;
use crate::field::Field;
use crate::path::{field_path, Basename};
use crate::provider::Provider;
use crate::resource::ResourceManager;
use crate::shard::index::{BlockEntry, FieldIndex, ShardIndexFile};
use std::io::BufReader;
use std::path::Path;

/// One dataset block, with its coordinate span, total on-disk byte weight
/// summed across every kept field, and the index of the physical on-disk
/// shard (a `.index` file) it came from. A read-shard boundary must always
/// land between blocks with different `shard_index`es — never inside one
/// physical shard's run — since a read-shard crossing that boundary would
/// have to open two `ShardReader`s to serve one contiguous range, defeating
/// the point of planning contiguous ranges at all (§4.4).
#[derive(Debug, Clone, Copy)]
struct WeightedBlock {
    first: Coord,
    last: Coord,
    bytes: u64,
    shard_index: usize,
}

fn read_shard_blocks(dir: &Path, shard_range: CoordRange, shard_index: usize) -> Result<Vec<WeightedBlock>> {
    let index_path = field_path(dir, shard_range, Basename::Index);
    let shard_index = ShardIndexFile::read(&mut BufReader::new(std::fs::File::open(&index_path)?), shard_range)?;

    let mut per_field: Vec<Vec<BlockEntry>> = Vec::new();
    for field in &shard_index.fields {
        let path = field_path(dir, shard_range, Basename::Field(*field));
        let mut f = BufReader::new(std::fs::File::open(path)?);
        let index = FieldIndex::read_trailer(&mut f)?;
        per_field.push(index.blocks);
    }

    let coord_field_pos = shard_index.fields.iter().position(|f| *f == Field::Coord).expect("shard always has a coord field");
    let coord_blocks = &per_field[coord_field_pos];

    let mut blocks = Vec::with_capacity(coord_blocks.len());
    for (i, coord_entry) in coord_blocks.iter().enumerate() {
        let total: u64 = per_field.iter().map(|blocks| blocks[i].length).sum();
        blocks.push(WeightedBlock { first: coord_entry.first_coord(), last: coord_entry.last_coord(), bytes: total, shard_index });
    }
    Ok(blocks)
}

/// Whether `a` and `b` belong to the same (refID,pos) coordinate cluster —
/// the unit a read-shard boundary must not split unless the caller allows
/// it via `SplitMappedCoords`/`SplitUnmappedCoords`. Unmapped records
/// (`ref_id < 0`) are one shared cluster per spec §4.4, distinguished from
/// mapped clusters only by sign.
fn same_cluster(a: Coord, b: Coord) -> bool {
    if a.ref_id < 0 || b.ref_id < 0 {
        a.ref_id < 0 && b.ref_id < 0
    } else {
        a.ref_id == b.ref_id && a.pos == b.pos
    }
}

fn split_allowed(boundary: Coord, options: &PlannerOptions) -> bool {
    if boundary.ref_id < 0 {
        options.split_unmapped_coords
    } else {
        options.split_mapped_coords
    }
}

/// Compute a balanced set of read-shard [`CoordRange`]s covering every
/// block in `provider`'s dataset.
///
/// 1. Collect every block across every shard, in ascending coordinate order
///    (shards are already non-overlapping and sorted; blocks within a shard
///    were written in ascending order).
/// 2. Determine a target byte weight per output partition, from
///    `options.bytes_per_shard`, `options.num_shards`, or (if neither is
///    set) an auto-tuned default shard count.
/// 3. Sweep blocks accumulating weight; cut a new read-shard boundary once
///    the running total reaches the target, at the next block's
///    `startCoord`. If that boundary would split a (refID,pos) cluster and
///    the caller didn't allow it (`split_mapped_coords`/
///    `split_unmapped_coords`), the cut is deferred to the next block
///    whose `startCoord` starts a fresh cluster.
/// 4. If `options.always_split_mapped_and_unmapped`, force an additional
///    boundary exactly at the mapped/unmapped transition even if that
///    leaves the surrounding partitions unevenly sized.
/// 5. Regardless of byte-weight balance or split options, always cut at
///    every physical on-disk shard boundary: a planned read-shard range
///    never spans two `.index` files (§4.4).
pub fn plan(provider: &Provider, options: PlannerOptions) -> Result<Vec<CoordRange>> {
    tracing::debug!(bytes_per_shard = ?options.bytes_per_shard, num_shards = ?options.num_shards, "planning read-shards");
    let mut blocks = Vec::new();
    for (shard_index, shard_range) in provider.shards().iter().enumerate() {
        blocks.extend(read_shard_blocks(provider_dir(provider), *shard_range, shard_index)?);
    }
    if blocks.is_empty() {
        return Ok(Vec::new());
    }

    let total_bytes: u64 = blocks.iter().map(|b| b.bytes).sum();
    let target_bytes = match (options.bytes_per_shard, options.num_shards) {
        (_, Some(n)) if n > 0 => (total_bytes / n as u64).max(1),
        (Some(b), _) if b > 0 => b,
        _ => {
            let tuning = ResourceManager::auto_tune();
            (total_bytes / tuning.planner_shard_count.max(1) as u64).max(1)
        }
    };

    let mut ranges = Vec::new();
    let mut current_start = blocks[0].first;
    let mut running = 0u64;

    for (i, block) in blocks.iter().enumerate() {
        let was_mapped = i > 0 && blocks[i - 1].last.is_mapped();
        let crossing_mapped_boundary = was_mapped && !block.first.is_mapped();
        if options.always_split_mapped_and_unmapped && crossing_mapped_boundary && running > 0 {
            ranges.push(CoordRange::new(current_start, block.first));
            current_start = block.first;
            running = 0;
        }

        running += block.bytes;
        let is_last = i + 1 == blocks.len();
        let next_start = if is_last { None } else { Some(blocks[i + 1].first) };

        // A physical shard-index file boundary is always a valid — and
        // mandatory — cut point: blocks on either side of it were never
        // written by the same `ShardWriter`, so there is no cluster to
        // split and no reason to defer (unlike the byte-weight cut below,
        // which must respect `split_mapped_coords`/`split_unmapped_coords`).
        let crosses_physical_shard = !is_last && blocks[i + 1].shard_index != block.shard_index;
        if crosses_physical_shard && running > 0 {
            let limit = next_start.unwrap();
            tracing::debug!(%limit, "planner boundary: physical shard-index file edge");
            ranges.push(CoordRange::new(current_start, limit));
            current_start = limit;
            running = 0;
            continue;
        }

        if running >= target_bytes && !is_last {
            let limit = next_start.unwrap();
            let splits_a_cluster = same_cluster(block.last, limit);
            if splits_a_cluster && !split_allowed(limit, &options) {
                // Defer the cut: keep accumulating until a block boundary
                // that starts a fresh (refID,pos) cluster.
                continue;
            }
            tracing::debug!(%limit, running, target_bytes, "planner boundary: byte-weight target reached");
            ranges.push(CoordRange::new(current_start, limit));
            current_start = limit;
            running = 0;
        }
    }
    let overall_limit = blocks.last().unwrap().last;
    let final_limit = bump(overall_limit);
    if current_start < final_limit {
        ranges.push(CoordRange::new(current_start, final_limit));
    }
    tracing::debug!(ranges = ranges.len(), "planning complete");
    Ok(ranges)
}

/// The smallest coordinate strictly greater than `c`, used to build a
/// half-open limit covering the last block inclusively.
fn bump(c: Coord) -> Coord {
    Coord::new(c.ref_id, c.pos, c.seq + 1)
}

/// `Provider` doesn't expose its directory publicly since callers should go
/// through its shard/iterator API; the planner is the one caller that needs
/// direct file access to read block weights, so it reaches in via this
/// crate-private accessor.
fn provider_dir(provider: &Provider) -> &Path {
    provider.dataset_dir()
}
