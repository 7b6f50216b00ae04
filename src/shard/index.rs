//! Shard-index file and per-field-file trailer formats.
//!
//! Every field file ends with a [`FieldIndex`] trailer describing its
//! blocks (offset, length, record count, and the `Coord` span the block
//! covers — copied from the coord field so every column's index can be
//! binary-searched the same way). The shard as a whole has one
//! `<range>.index` file, a [`ShardIndexFile`], naming which fields are
//! present and the shard's total record count.
//!
//! Magic numbers and version strings are fixed by the external wire format:
//! `FIELD_INDEX_MAGIC` / `SHARD_INDEX_MAGIC` never change across PAM
//! versions; `VERSION_WRITE` is stamped on every file this crate writes,
//! while `VERSION_READ_ACCEPT` lists every version byte string a reader
//! tolerates (older-but-compatible layouts).

use crate::coord::{Coord, CoordRange};
use crate::error::{PamError, Result};
use crate::field::Field;
use serde::{Deserialize, Serialize};
use std::io::{Read, Seek, SeekFrom, Write};

pub const SHARD_INDEX_MAGIC: u64 = 0x725c_7226_be79_4c60;
pub const FIELD_INDEX_MAGIC: u64 = 0xe360_ac90_2605_2aca;

pub const VERSION_WRITE: &[u8; 4] = b"PAM2";
pub const VERSION_READ_ACCEPT: &[&[u8; 4]] = &[b"PAM2", b"PAM1"];

/// One block's worth of a field file: its byte span plus the `Coord` range
/// its records span, enabling binary search for range-seek.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockEntry {
    pub offset: u64,
    pub length: u64,
    pub record_count: u32,
    pub first_ref_id: i32,
    pub first_pos: i32,
    pub first_seq: i32,
    pub last_ref_id: i32,
    pub last_pos: i32,
    pub last_seq: i32,
}

impl BlockEntry {
    pub fn first_coord(&self) -> Coord {
        Coord::new(self.first_ref_id, self.first_pos, self.first_seq)
    }

    pub fn last_coord(&self) -> Coord {
        Coord::new(self.last_ref_id, self.last_pos, self.last_seq)
    }
}

/// Trailer appended to every field file: the list of [`BlockEntry`] plus a
/// small fixed footer so a reader can find the trailer without scanning the
/// whole file.
///
/// | Offset (from end) | Size | Field                |
/// |--------------------|------|----------------------|
/// | -20                | 4    | version               |
/// | -16                | 8    | trailer_offset        |
/// | -8                 | 8    | FIELD_INDEX_MAGIC     |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldIndex {
    pub blocks: Vec<BlockEntry>,
}

const FIELD_FOOTER_SIZE: u64 = 20;

impl FieldIndex {
    pub fn record_count(&self) -> u64 {
        self.blocks.iter().map(|b| b.record_count as u64).sum()
    }

    pub fn write_trailer<W: Write + Seek>(&self, w: &mut W) -> Result<()> {
        let trailer_offset = w.stream_position()?;
        let body = bincode::serialize(&self.blocks)?;
        w.write_all(&body)?;
        w.write_all(VERSION_WRITE)?;
        w.write_all(&trailer_offset.to_le_bytes())?;
        w.write_all(&FIELD_INDEX_MAGIC.to_le_bytes())?;
        Ok(())
    }

    pub fn read_trailer<R: Read + Seek>(r: &mut R) -> Result<Self> {
        let end = r.seek(SeekFrom::End(0))?;
        if end < FIELD_FOOTER_SIZE {
            return Err(PamError::format("field file too small for a trailer"));
        }
        r.seek(SeekFrom::End(-(FIELD_FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; FIELD_FOOTER_SIZE as usize];
        r.read_exact(&mut footer)?;
        let version: [u8; 4] = footer[0..4].try_into().unwrap();
        if !VERSION_READ_ACCEPT.iter().any(|v| **v == version) {
            return Err(PamError::format(format!("unsupported field file version {version:?}")));
        }
        let trailer_offset = u64::from_le_bytes(footer[4..12].try_into().unwrap());
        let magic = u64::from_le_bytes(footer[12..20].try_into().unwrap());
        if magic != FIELD_INDEX_MAGIC {
            return Err(PamError::format("bad field index magic"));
        }
        let body_len = end - FIELD_FOOTER_SIZE - trailer_offset;
        r.seek(SeekFrom::Start(trailer_offset))?;
        let mut body = vec![0u8; body_len as usize];
        r.read_exact(&mut body)?;
        let blocks: Vec<BlockEntry> = bincode::deserialize(&body)?;
        Ok(FieldIndex { blocks })
    }
}

/// The `<range>.index` shard-level manifest: which fields are present, how
/// many records the shard holds, and the opaque source-BAM header bytes
/// (SAM header text) that define the reference table every field in this
/// shard refers to by integer id.
///
/// | Offset | Size | Field              |
/// |--------|------|--------------------|
/// | 0      | 8    | SHARD_INDEX_MAGIC  |
/// | 8      | 4    | version            |
/// | 12     | 8    | record_count       |
/// | 20     | 8    | fields body length |
/// | ...    | ...  | json(field names)  |
/// | ...    | 8    | header body length |
/// | ...    | ...  | header bytes       |
#[derive(Debug, Clone)]
pub struct ShardIndexFile {
    pub range: CoordRange,
    pub record_count: u64,
    pub fields: Vec<Field>,
    /// Opaque SAM header text copied verbatim from the source BAM. Every
    /// reader's reference table (`refID -> name`) comes from here; PAM
    /// itself never interprets it beyond storing and returning it.
    pub header: Vec<u8>,
}

impl ShardIndexFile {
    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&SHARD_INDEX_MAGIC.to_le_bytes())?;
        w.write_all(VERSION_WRITE)?;
        w.write_all(&self.record_count.to_le_bytes())?;
        let field_names: Vec<&str> = self.fields.iter().map(|f| f.file_name()).collect();
        let body = serde_json::to_vec(&field_names)?;
        w.write_all(&(body.len() as u64).to_le_bytes())?;
        w.write_all(&body)?;
        w.write_all(&(self.header.len() as u64).to_le_bytes())?;
        w.write_all(&self.header)?;
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R, range: CoordRange) -> Result<Self> {
        let mut magic_buf = [0u8; 8];
        r.read_exact(&mut magic_buf)?;
        if u64::from_le_bytes(magic_buf) != SHARD_INDEX_MAGIC {
            return Err(PamError::format("bad shard index magic"));
        }
        let mut version = [0u8; 4];
        r.read_exact(&mut version)?;
        if !VERSION_READ_ACCEPT.iter().any(|v| **v == version) {
            return Err(PamError::format(format!("unsupported shard index version {version:?}")));
        }
        let mut count_buf = [0u8; 8];
        r.read_exact(&mut count_buf)?;
        let record_count = u64::from_le_bytes(count_buf);
        let mut len_buf = [0u8; 8];
        r.read_exact(&mut len_buf)?;
        let body_len = u64::from_le_bytes(len_buf) as usize;
        let mut body = vec![0u8; body_len];
        r.read_exact(&mut body)?;
        let field_names: Vec<String> = serde_json::from_slice(&body)?;
        let fields = field_names
            .iter()
            .map(|n| Field::from_file_name(n).ok_or_else(|| PamError::format(format!("unknown field '{n}' in shard index"))))
            .collect::<Result<Vec<_>>>()?;
        // Older ("PAM1") shard index files predate the embedded header and
        // simply end here; treat a short read as an empty header rather
        // than a format error, matching the mixed-version tolerance policy
        // (DESIGN.md Open Question 2).
        let mut header_len_buf = [0u8; 8];
        let header = match r.read_exact(&mut header_len_buf) {
            Ok(()) => {
                let header_len = u64::from_le_bytes(header_len_buf) as usize;
                let mut header = vec![0u8; header_len];
                r.read_exact(&mut header)?;
                header
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(ShardIndexFile { range, record_count, fields, header })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn entry(first: i32, last: i32) -> BlockEntry {
        BlockEntry {
            offset: 0,
            length: 100,
            record_count: 10,
            first_ref_id: 0,
            first_pos: first,
            first_seq: 0,
            last_ref_id: 0,
            last_pos: last,
            last_seq: 0,
        }
    }

    #[test]
    fn field_index_trailer_roundtrips() {
        let index = FieldIndex { blocks: vec![entry(0, 99), entry(100, 199)] };
        let mut buf = Cursor::new(Vec::new());
        buf.write_all(b"prefix-block-bytes").unwrap();
        index.write_trailer(&mut buf).unwrap();
        let read = FieldIndex::read_trailer(&mut buf).unwrap();
        assert_eq!(read.blocks.len(), 2);
        assert_eq!(read.record_count(), 20);
    }

    #[test]
    fn shard_index_roundtrips() {
        let range = CoordRange::new(Coord::new(0, 0, 0), Coord::new(1, 0, 0));
        let index = ShardIndexFile { range, record_count: 42, fields: Field::ALL.to_vec(), header: b"@HD\tVN:1.6\n".to_vec() };
        let mut buf = Vec::new();
        index.write(&mut buf).unwrap();
        let read = ShardIndexFile::read(&mut Cursor::new(buf), range).unwrap();
        assert_eq!(read.record_count, 42);
        assert_eq!(read.fields, Field::ALL.to_vec());
        assert_eq!(read.header, b"@HD\tVN:1.6\n");
    }

    #[test]
    fn bad_magic_is_rejected() {
        let buf = vec![0u8; 64];
        assert!(ShardIndexFile::read(&mut Cursor::new(buf), CoordRange::universal()).is_err());
    }

    #[test]
    fn missing_trailing_header_defaults_to_empty() {
        // A PAM1-era shard index file ends right after the field-names body,
        // with no header section at all.
        let range = CoordRange::new(Coord::new(0, 0, 0), Coord::new(1, 0, 0));
        let mut buf = Vec::new();
        buf.extend_from_slice(&SHARD_INDEX_MAGIC.to_le_bytes());
        buf.extend_from_slice(b"PAM1");
        buf.extend_from_slice(&7u64.to_le_bytes());
        let field_names: Vec<&str> = vec![Field::Coord.file_name()];
        let body = serde_json::to_vec(&field_names).unwrap();
        buf.extend_from_slice(&(body.len() as u64).to_le_bytes());
        buf.extend_from_slice(&body);
        let read = ShardIndexFile::read(&mut Cursor::new(buf), range).unwrap();
        assert_eq!(read.record_count, 7);
        assert!(read.header.is_empty());
    }
}
