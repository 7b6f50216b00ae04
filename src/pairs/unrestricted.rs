//! Distant-mate-permitting pair join over a striped concurrent map.
//!
//! Records are keyed by read name (`QNAME`) across a fixed 1024-way stripe
//! of mutex-guarded hash maps — the same "lock one partition at a time"
//! shape used throughout the storage engine for shared mutable state,
//! generalized here to an explicit stripe count since a pair join must
//! hold a mate across arbitrarily many records read from arbitrarily many
//! shards before it arrives.

use super::{order_pair, PairOutcome};
use crate::error::{PamError, Result};
use crate::field::Record;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

pub const STRIPE_COUNT: usize = 1024;

#[derive(Default)]
pub struct StripedMateMap {
    stripes: Vec<Mutex<HashMap<Vec<u8>, Record>>>,
}

impl StripedMateMap {
    pub fn new() -> Arc<Self> {
        let mut stripes = Vec::with_capacity(STRIPE_COUNT);
        stripes.resize_with(STRIPE_COUNT, || Mutex::new(HashMap::new()));
        Arc::new(StripedMateMap { stripes })
    }

    fn stripe_for(&self, name: &[u8]) -> &Mutex<HashMap<Vec<u8>, Record>> {
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % STRIPE_COUNT]
    }

    /// If `name`'s mate is already waiting, remove it and return both
    /// records (earlier arrival first). Otherwise stash `record` under
    /// `name` and return `None`.
    fn join_or_stash(&self, name: Vec<u8>, record: Record) -> Option<(Record, Record)> {
        let stripe = self.stripe_for(&name);
        let mut guard = stripe.lock().expect("mate map mutex poisoned");
        if let Some(first) = guard.remove(&name) {
            Some((first, record))
        } else {
            guard.insert(name, record);
            None
        }
    }

    /// Drain every still-waiting record across all stripes, in arbitrary
    /// order — called once every worker consuming this map is exhausted,
    /// since anything left behind has no mate coming.
    fn drain(&self) -> Vec<Record> {
        self.stripes.iter().flat_map(|s| s.lock().expect("mate map mutex poisoned").drain().map(|(_, r)| r)).collect()
    }
}

/// Report every mate left unjoined once every shard worker sharing `mates`
/// has finished reading. Must be called exactly once per [`StripedMateMap`],
/// after all [`UnrestrictedPairJoiner`]s built over it have been fully
/// drained — calling it earlier (while a worker still has records left to
/// read) would wrongly report mates that simply haven't arrived yet.
pub fn finish_pair_iterators(mates: &StripedMateMap) -> Result<()> {
    let leftover = mates.drain();
    if let Some(record) = leftover.into_iter().next() {
        let name = record.name.as_deref().map(|n| String::from_utf8_lossy(n).into_owned()).unwrap_or_else(|| "?".to_string());
        return Err(PamError::MissingMate(name));
    }
    Ok(())
}

pub struct UnrestrictedPairJoiner<I> {
    inner: I,
    mates: Arc<StripedMateMap>,
}

impl<I: Iterator<Item = Result<Record>>> UnrestrictedPairJoiner<I> {
    pub fn new(inner: I) -> Self {
        UnrestrictedPairJoiner { inner, mates: StripedMateMap::new() }
    }

    /// Construct a joiner sharing an existing [`StripedMateMap`] with other
    /// shard workers, so a mate found in one worker's shard can join a
    /// record read by another. Callers must invoke [`finish_pair_iterators`]
    /// on the shared map once, after every worker's iterator is exhausted.
    pub fn with_shared_map(inner: I, mates: Arc<StripedMateMap>) -> Self {
        UnrestrictedPairJoiner { inner, mates }
    }

    /// The shared mate map backing this joiner, for callers that need to
    /// hand it to sibling workers or to [`finish_pair_iterators`].
    pub fn mates(&self) -> Arc<StripedMateMap> {
        Arc::clone(&self.mates)
    }
}

impl<I: Iterator<Item = Result<Record>>> Iterator for UnrestrictedPairJoiner<I> {
    type Item = Result<PairOutcome>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next() {
                Some(Ok(record)) => {
                    if !record.is_paired() || !record.is_primary() {
                        return Some(Ok(PairOutcome::Unpaired(Box::new(record))));
                    }
                    let Some(name) = record.name.clone() else {
                        return Some(Err(PamError::format("cannot pair records with no name")));
                    };
                    match self.mates.join_or_stash(name, record) {
                        Some((first, second)) => {
                            let (a, b) = order_pair(first, second);
                            return Some(Ok(PairOutcome::Paired(Box::new(a), Box::new(b))));
                        }
                        None => continue,
                    }
                }
                Some(Err(e)) => return Some(Err(e)),
                None => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::Coord;
    use crate::field::FLAG_FIRST_IN_PAIR;
    use crate::field::{FLAG_PAIRED, FLAG_SECONDARY};

    fn record(name: &str, flags: u16) -> Result<Record> {
        Ok(Record {
            coord: Coord::new(0, 0, 0),
            flags,
            mapq: 0,
            cigar: None,
            mate_ref_id: -1,
            mate_pos: -1,
            temp_len: 0,
            name: Some(name.as_bytes().to_vec()),
            seq: None,
            qual: None,
            aux: None,
        })
    }

    #[test]
    fn joins_two_records_sharing_a_name() {
        let input = vec![record("r1", FLAG_PAIRED | FLAG_FIRST_IN_PAIR), record("r1", FLAG_PAIRED)];
        let mut joiner = UnrestrictedPairJoiner::new(input.into_iter());
        match joiner.next().unwrap().unwrap() {
            PairOutcome::Paired(a, b) => {
                assert_eq!(a.flags & FLAG_FIRST_IN_PAIR, FLAG_FIRST_IN_PAIR);
                assert_eq!(b.flags & FLAG_FIRST_IN_PAIR, 0);
            }
            PairOutcome::Unpaired(_) => panic!("expected a joined pair"),
        }
        assert!(joiner.next().is_none());
    }

    #[test]
    fn unpaired_flag_passes_through_immediately() {
        let input = vec![record("solo", 0)];
        let mut joiner = UnrestrictedPairJoiner::new(input.into_iter());
        match joiner.next().unwrap().unwrap() {
            PairOutcome::Unpaired(r) => assert_eq!(r.name.as_deref(), Some(b"solo".as_slice())),
            PairOutcome::Paired(..) => panic!("solo record should not pair"),
        }
    }

    #[test]
    fn secondary_alignment_passes_through_unpaired() {
        let input = vec![record("r1", FLAG_PAIRED | FLAG_SECONDARY)];
        let mut joiner = UnrestrictedPairJoiner::new(input.into_iter());
        assert!(matches!(joiner.next().unwrap().unwrap(), PairOutcome::Unpaired(_)));
    }

    #[test]
    fn finish_reports_unjoined_mate() {
        let mates = StripedMateMap::new();
        let input = vec![record("r1", FLAG_PAIRED)];
        let mut joiner = UnrestrictedPairJoiner::with_shared_map(input.into_iter(), Arc::clone(&mates));
        assert!(joiner.next().is_none());
        assert!(matches!(finish_pair_iterators(&mates), Err(PamError::MissingMate(_))));
    }

    #[test]
    fn finish_is_ok_when_everything_joined() {
        let mates = StripedMateMap::new();
        let input = vec![record("r1", FLAG_PAIRED), record("r1", FLAG_PAIRED)];
        let mut joiner = UnrestrictedPairJoiner::with_shared_map(input.into_iter(), Arc::clone(&mates));
        assert!(joiner.next().unwrap().is_ok());
        assert!(joiner.next().is_none());
        assert!(finish_pair_iterators(&mates).is_ok());
    }
}
