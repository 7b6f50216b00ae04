//! Region-specification parsing (§6):
//!
//! ```text
//! region := ref ( ":" pos1based ( "-" pos1based )? )?
//!        | ref ":" pos0based ":" seq "-" ref ":" pos0based ":" seq
//! ```
//!
//! The first form is the familiar samtools-style `chr1:1000-2000` (1-based,
//! inclusive); the second is PAM-native and names an exact half-open
//! `CoordRange` by its two endpoints' 0-based `(pos, seq)` pairs. Resolving
//! `ref` to a `refID` requires the dataset's [`crate::refs::ReferenceTable`],
//! since a name alone has no fixed integer id.

use crate::coord::{Coord, CoordRange};
use crate::error::{PamError, Result};
use crate::refs::ReferenceTable;

fn resolve_ref(refs: &ReferenceTable, name: &str) -> Result<i32> {
    refs.ref_id(name).ok_or_else(|| PamError::format(format!("unknown reference '{name}'")))
}

/// Parse one `ref:pos0based:seq` endpoint of the PAM-native two-coordinate
/// form.
fn parse_exact_endpoint(refs: &ReferenceTable, s: &str) -> Result<Coord> {
    let mut parts = s.splitn(3, ':');
    let ref_name = parts.next().ok_or_else(|| PamError::format(format!("malformed region endpoint '{s}'")))?;
    let pos_str = parts.next().ok_or_else(|| PamError::format(format!("malformed region endpoint '{s}'")))?;
    let seq_str = parts.next().ok_or_else(|| PamError::format(format!("malformed region endpoint '{s}'")))?;
    let ref_id = resolve_ref(refs, ref_name)?;
    let pos: i32 = pos_str.parse().map_err(|_| PamError::format(format!("bad 0-based position in '{s}'")))?;
    let seq: i32 = seq_str.parse().map_err(|_| PamError::format(format!("bad seq in '{s}'")))?;
    Ok(Coord::new(ref_id, pos, seq))
}

/// Parse a region specification into the [`CoordRange`] it names.
///
/// `"chr1"` alone means the whole reference sequence (`[chr1:0, chr2:0)`,
/// or `[chr1:0, limit)` if `chr1` is the last reference, where `limit` is
/// the dataset's `InfinityPos` sentinel on that ref). `"chr1:100"` is the
/// single base at 1-based position 100. `"chr1:100-200"` is the inclusive
/// 1-based span `[100,200]`, converted to the half-open 0-based
/// `[99,200)`.
pub fn parse_region(s: &str, refs: &ReferenceTable, n_refs: i32) -> Result<CoordRange> {
    if let Some((left, right)) = s.split_once('-') {
        if left.matches(':').count() == 2 {
            let start = parse_exact_endpoint(refs, left)?;
            let limit = parse_exact_endpoint(refs, right)?;
            return Ok(CoordRange::new(start, limit));
        }
    }

    let mut parts = s.splitn(2, ':');
    let ref_name = parts.next().ok_or_else(|| PamError::format(format!("empty region '{s}'")))?;
    let ref_id = resolve_ref(refs, ref_name)?;

    let Some(pos_spec) = parts.next() else {
        let start = Coord::new(ref_id, 0, 0);
        let limit = Coord::new(ref_id + 1, 0, 0);
        return Ok(CoordRange::new(start, limit.min(Coord::new(n_refs, 0, 0))));
    };

    let (start_1based, end_1based) = match pos_spec.split_once('-') {
        Some((a, b)) => (
            a.parse::<i32>().map_err(|_| PamError::format(format!("bad start position in '{s}'")))?,
            b.parse::<i32>().map_err(|_| PamError::format(format!("bad end position in '{s}'")))?,
        ),
        None => {
            let p = pos_spec.parse::<i32>().map_err(|_| PamError::format(format!("bad position in '{s}'")))?;
            (p, p)
        }
    };
    if start_1based < 1 || end_1based < start_1based {
        return Err(PamError::format(format!("invalid 1-based span in '{s}'")));
    }
    let start = Coord::new(ref_id, start_1based - 1, 0);
    let limit = Coord::new(ref_id, end_1based, 0);
    Ok(CoordRange::new(start, limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs() -> ReferenceTable {
        let header = "@HD\tVN:1.6\n@SQ\tSN:chr1\tLN:1000\n@SQ\tSN:chr2\tLN:2000\n";
        ReferenceTable::from_header_bytes(header.as_bytes()).unwrap()
    }

    #[test]
    fn whole_reference() {
        let r = parse_region("chr1", &refs(), 2).unwrap();
        assert_eq!(r, CoordRange::new(Coord::new(0, 0, 0), Coord::new(1, 0, 0)));
    }

    #[test]
    fn single_one_based_position() {
        let r = parse_region("chr1:100", &refs(), 2).unwrap();
        assert_eq!(r, CoordRange::new(Coord::new(0, 99, 0), Coord::new(0, 100, 0)));
    }

    #[test]
    fn one_based_inclusive_span() {
        let r = parse_region("chr1:100-200", &refs(), 2).unwrap();
        assert_eq!(r, CoordRange::new(Coord::new(0, 99, 0), Coord::new(0, 200, 0)));
    }

    #[test]
    fn exact_coord_to_coord_form() {
        let r = parse_region("chr1:0:0-chr2:0:0", &refs(), 2).unwrap();
        assert_eq!(r, CoordRange::new(Coord::new(0, 0, 0), Coord::new(1, 0, 0)));
    }

    #[test]
    fn unknown_reference_is_an_error() {
        assert!(parse_region("chrX:1-10", &refs(), 2).is_err());
    }
}
