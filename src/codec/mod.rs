//! Per-field column block codec.
//!
//! Each of the eleven fields is encoded independently into its own block: a
//! `default_stream` of fixed-width or delta-coded values and a `blob_stream`
//! of variable-length payloads, concatenated behind a small header
//! (`varint(header_len) BlockHeader default_stream blob_stream`). See
//! [`block::encode_column`]/[`block::decode_column`].
//!
//! | Field      | default_stream                                         | blob_stream                              |
//! |------------|----------------------------------------------------------|--------------------------------------------|
//! | coord      | ref_id (delta varint)                                   | pos (delta varint); `seq` is never stored, see coord.rs |
//! | flags      | uint16 per record (varint)                              | —                                           |
//! | mapq       | uint8 per record                                        | —                                           |
//! | cigar      | op count, then every packed (len,type) op (varint)     | —                                           |
//! | materefid  | int32 per record (varint delta)                         | —                                           |
//! | matepos    | int32 per record (varint delta)                         | —                                           |
//! | templen    | int32 per record (varint)                               | —                                           |
//! | name       | shared-prefix len, suffix len per record (varint)       | suffix bytes                                |
//! | seq        | base count per record (varint)                          | 4-bit packed bases                          |
//! | qual       | byte length per record (varint)                         | raw bytes                                   |
//! | aux        | tag count, then a varint length per variable-type tag   | 3-byte header then payload, each in tag order, per record |
//!
//! A length/count of `u32::MAX` in the default stream marks a field the
//! writer dropped for that record (see `WriterOptions::drop_fields`); it
//! decodes to `None` rather than a literal dummy payload.

pub mod aux;
pub mod block;
pub mod varint;

pub use block::{decode_column, encode_column, encode_column_into, Compression, FieldValue};
