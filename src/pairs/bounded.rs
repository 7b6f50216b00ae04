//! Shard-local, span-bounded pair join (§4.5.2).
//!
//! No cross-shard synchronization: a shard is read in isolation, so a mate
//! that lies outside `MaxPairSpan` or across a shard boundary is dropped
//! rather than chased down. This trades completeness (cross-shard and
//! distant pairs are lost) for the ability to run one worker per shard with
//! no shared state at all, unlike [`super::unrestricted::UnrestrictedPairJoiner`].

use super::{order_pair, PairOutcome};
use crate::coord::CoordRange;
use crate::error::{PamError, Result};
use crate::field::{CigarOp, Record};
use std::collections::HashMap;

/// Reference-consuming CIGAR op codes (M, D, N, =, X in BAM's op numbering),
/// the ops that advance a read's span along the reference.
const REF_CONSUMING_OPS: [u8; 5] = [0, 2, 3, 7, 8];

fn ref_span(cigar: &[CigarOp]) -> i32 {
    cigar.iter().filter(|op| REF_CONSUMING_OPS.contains(&op.op)).map(|op| op.len as i32).sum()
}

fn pair_span(first: &Record, second: &Record) -> i32 {
    let first_end = first.coord.pos + first.cigar.as_deref().map(ref_span).unwrap_or(0);
    let second_end = second.coord.pos + second.cigar.as_deref().map(ref_span).unwrap_or(0);
    first_end.max(second_end) - first.coord.pos.min(second.coord.pos)
}

pub struct BoundedSpanPairJoiner<I> {
    inner: I,
    shard_range: CoordRange,
    max_pair_span: i32,
    duplicate_shard_crossers: bool,
    pending: HashMap<Vec<u8>, Record>,
    draining: Option<std::vec::IntoIter<Record>>,
}

impl<I: Iterator<Item = Result<Record>>> BoundedSpanPairJoiner<I> {
    /// `shard_range` must be the exact range the underlying reader was
    /// opened with — it is the only context this joiner has for telling a
    /// genuinely corrupt dataset (a mate that should have been buffered but
    /// wasn't) from an ordinary cross-shard pair the adjacent shard already
    /// emitted.
    pub fn new(inner: I, shard_range: CoordRange, options: crate::config::PairOptions) -> Self {
        BoundedSpanPairJoiner {
            inner,
            shard_range,
            max_pair_span: options.max_pair_span,
            duplicate_shard_crossers: options.duplicate_shard_crossers,
            pending: HashMap::new(),
            draining: None,
        }
    }
}

impl<I: Iterator<Item = Result<Record>>> Iterator for BoundedSpanPairJoiner<I> {
    type Item = Result<PairOutcome>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(draining) = self.draining.as_mut() {
                return match draining.next() {
                    Some(record) => {
                        let name = record.name.as_deref().map(|n| String::from_utf8_lossy(n).into_owned()).unwrap_or_else(|| "?".to_string());
                        Some(Err(PamError::MissingMate(name)))
                    }
                    None => None,
                };
            }

            match self.inner.next() {
                Some(Ok(record)) => {
                    if !record.is_paired() || !record.is_primary() {
                        return Some(Ok(PairOutcome::Unpaired(Box::new(record))));
                    }
                    if record.mate_ref_id != record.coord.ref_id || record.mate_pos > record.coord.pos + self.max_pair_span {
                        continue;
                    }
                    let Some(name) = record.name.clone() else {
                        return Some(Err(PamError::format("cannot pair records with no name")));
                    };

                    if record.mate_pos < record.coord.pos {
                        // Second arrival: the earlier mate should already be
                        // buffered under this name.
                        if let Some(first) = self.pending.remove(&name) {
                            if pair_span(&first, &record) > self.max_pair_span {
                                continue;
                            }
                            let (a, b) = order_pair(first, record);
                            return Some(Ok(PairOutcome::Paired(Box::new(a), Box::new(b))));
                        }
                        let first_coord = crate::coord::Coord::new(record.mate_ref_id, record.mate_pos, 0);
                        if self.shard_range.contains(first_coord) {
                            return Some(Err(PamError::MissingMate(String::from_utf8_lossy(&name).into_owned())));
                        }
                        if self.duplicate_shard_crossers {
                            return Some(Ok(PairOutcome::Unpaired(Box::new(record))));
                        }
                        continue;
                    }

                    self.pending.insert(name, record);
                }
                Some(Err(e)) => return Some(Err(e)),
                None => {
                    let leftover: Vec<Record> = self.pending.drain().map(|(_, r)| r).collect();
                    self.draining = Some(leftover.into_iter());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::Coord;
    use crate::field::{FLAG_FIRST_IN_PAIR, FLAG_PAIRED};

    fn shard() -> CoordRange {
        CoordRange::new(Coord::new(0, 0, 0), Coord::new(1, 0, 0))
    }

    fn record(name: &str, pos: i32, mate_pos: i32, flags: u16) -> Result<Record> {
        Ok(Record {
            coord: Coord::new(0, pos, 0),
            flags,
            mapq: 40,
            cigar: Some(vec![CigarOp { op: 0, len: 36 }]),
            mate_ref_id: 0,
            mate_pos,
            temp_len: 0,
            name: Some(name.as_bytes().to_vec()),
            seq: None,
            qual: None,
            aux: None,
        })
    }

    #[test]
    fn joins_nearby_mates_within_one_shard() {
        let input = vec![record("r1", 100, 250, FLAG_PAIRED | FLAG_FIRST_IN_PAIR), record("r1", 250, 100, FLAG_PAIRED)];
        let mut joiner = BoundedSpanPairJoiner::new(input.into_iter(), shard(), crate::config::PairOptions::default());
        assert!(matches!(joiner.next().unwrap().unwrap(), PairOutcome::Paired(..)));
        assert!(joiner.next().is_none());
    }

    #[test]
    fn mate_beyond_max_span_is_discarded_on_first_sight() {
        let opts = crate::config::PairOptions { max_pair_span: 50, ..Default::default() };
        let input = vec![record("r1", 100, 500, FLAG_PAIRED | FLAG_FIRST_IN_PAIR)];
        let mut joiner = BoundedSpanPairJoiner::new(input.into_iter(), shard(), opts);
        assert!(joiner.next().is_none());
    }

    #[test]
    fn second_arrival_missing_local_mate_within_shard_is_fatal() {
        // mate_pos (50) falls inside this shard's range, but no matching
        // first arrival was ever buffered under this name.
        let input = vec![record("r1", 100, 50, FLAG_PAIRED)];
        let mut joiner = BoundedSpanPairJoiner::new(input.into_iter(), shard(), crate::config::PairOptions::default());
        assert!(matches!(joiner.next().unwrap(), Err(PamError::MissingMate(_))));
    }

    #[test]
    fn second_arrival_whose_mate_is_in_an_earlier_shard_is_silently_discarded() {
        let narrow_shard = CoordRange::new(Coord::new(0, 80, 0), Coord::new(1, 0, 0));
        let input = vec![record("r1", 100, 50, FLAG_PAIRED)];
        let mut joiner = BoundedSpanPairJoiner::new(input.into_iter(), narrow_shard, crate::config::PairOptions::default());
        assert!(joiner.next().is_none());
    }

    #[test]
    fn unpaired_record_passes_through() {
        let input = vec![record("solo", 10, -1, 0)];
        let mut joiner = BoundedSpanPairJoiner::new(input.into_iter(), shard(), crate::config::PairOptions::default());
        assert!(matches!(joiner.next().unwrap().unwrap(), PairOutcome::Unpaired(_)));
    }

    #[test]
    fn leftover_pending_at_end_of_shard_is_reported_missing() {
        let input = vec![record("r1", 100, 250, FLAG_PAIRED | FLAG_FIRST_IN_PAIR)];
        let mut joiner = BoundedSpanPairJoiner::new(input.into_iter(), shard(), crate::config::PairOptions::default());
        assert!(matches!(joiner.next().unwrap(), Err(PamError::MissingMate(_))));
        assert!(joiner.next().is_none());
    }
}
