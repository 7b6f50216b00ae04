//! Coord-path filename grammar: `<startCoord>,<limitCoord>.<field|index>`.
//!
//! ```text
//! coord       := refid ":" pos [ ":" seq ]
//! refid       := int32 | "-"
//! pos         := int32 | "-"
//! range       := coord "," coord
//! basename    := range "." (field-name | "index")
//! ```
//!
//! A `-` refid/pos stands for the unmapped sentinel on the wire; it is never
//! written for `seq`, which is always a concrete integer.

use crate::coord::{Coord, CoordRange};
use crate::error::{PamError, Result};
use crate::field::Field;
use std::path::{Path, PathBuf};

/// What a field-grammar basename names: either one field's column file or
/// the shard index file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Basename {
    Field(Field),
    Index,
}

fn format_coord_component(ref_id: i32, pos: i32) -> String {
    // The unmapped sentinel is written as "-" for both refid and pos.
    if ref_id < 0 {
        "-:-".to_string()
    } else {
        format!("{ref_id}:{pos}")
    }
}

pub fn format_coord(c: Coord) -> String {
    // §3/§6: seq defaults to 0 and is elided from the path when zero.
    let head = format_coord_component(c.ref_id, c.pos);
    if c.seq == 0 {
        head
    } else {
        format!("{head}:{}", c.seq)
    }
}

pub fn format_range(r: CoordRange) -> String {
    format!("{},{}", format_coord(r.start), format_coord(r.limit))
}

/// Build the full basename `<range>.<suffix>` for a field file or index.
pub fn field_basename(range: CoordRange, what: Basename) -> String {
    let suffix = match what {
        Basename::Field(f) => f.file_name(),
        Basename::Index => "index",
    };
    format!("{}.{}", format_range(range), suffix)
}

pub fn field_path(dir: &Path, range: CoordRange, what: Basename) -> PathBuf {
    dir.join(field_basename(range, what))
}

fn parse_coord_component(s: &str) -> Result<(i32, i32)> {
    if s == "-" {
        return Ok((-1, -1));
    }
    let mut parts = s.splitn(2, ':');
    let ref_id: i32 = parts
        .next()
        .ok_or_else(|| PamError::format(format!("malformed coord component '{s}'")))?
        .parse()
        .map_err(|_| PamError::format(format!("bad refid in '{s}'")))?;
    let pos: i32 = parts
        .next()
        .ok_or_else(|| PamError::format(format!("malformed coord component '{s}'")))?
        .parse()
        .map_err(|_| PamError::format(format!("bad pos in '{s}'")))?;
    Ok((ref_id, pos))
}

/// Parse a single `refid:pos[:seq]` token into a [`Coord`]. `seq` defaults
/// to 0 when elided (§3/§6).
pub fn parse_coord(s: &str) -> Result<Coord> {
    let parts: Vec<&str> = s.split(':').collect();
    let (head, seq) = match parts.len() {
        2 => (s, 0),
        3 => (
            &s[..s.len() - parts[2].len() - 1],
            parts[2]
                .parse()
                .map_err(|_| PamError::format(format!("bad seq in '{s}'")))?,
        ),
        _ => return Err(PamError::format(format!("malformed coord '{s}'"))),
    };
    let (ref_id, pos) = parse_coord_component(head)?;
    Ok(Coord::new(ref_id, pos, seq))
}

/// Parse a `<range>.<suffix>` basename into its [`CoordRange`] and
/// [`Basename`] kind. Returns `None` (not an error) if the name doesn't
/// match the grammar at all, since callers discover field files by scanning
/// a directory and must silently skip unrelated entries.
pub fn parse_basename(name: &str) -> Option<(CoordRange, Basename)> {
    let (range_part, suffix) = name.rsplit_once('.')?;
    let (start_str, limit_str) = range_part.split_once(',')?;
    let start = parse_coord(start_str).ok()?;
    let limit = parse_coord(limit_str).ok()?;
    if start >= limit {
        return None;
    }
    let range = CoordRange::new(start, limit);
    let what = if suffix == "index" {
        Basename::Index
    } else {
        Basename::Field(Field::from_file_name(suffix)?)
    };
    Some((range, what))
}

/// Discover every shard (by its distinct [`CoordRange`]) present in `dir` by
/// scanning for files matching the coord-path grammar. A shard is "present"
/// if at least its index file exists; callers validate completeness (all
/// eleven field files) when actually opening it.
pub fn discover_shards(dir: &Path) -> Result<Vec<CoordRange>> {
    let mut ranges = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some((range, Basename::Index)) = parse_basename(name) {
            ranges.push(range);
        }
    }
    ranges.sort_by_key(|r| r.start);
    Ok(ranges)
}
