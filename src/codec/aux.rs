//! Auxiliary-tag type codes and their payload-length rule.
//!
//! Mirrors the BAM `aux` type-code table, restricted to the closed set §4.1
//! actually stores: fixed-width numeric types report a static length; `Z`/`H`
//! (null-terminated string/hex-string) are variable length and carry their
//! own length prefix. `B` (numeric array) is BAM-legal but outside this
//! closed set — `is_known_type` rejects it, and a tag carrying it is a fatal
//! conversion error rather than silently stored. Per §4.1, the length prefix
//! lives in the field's `default` stream (alongside the tag count) while the
//! 3-byte tag headers and payload bytes are grouped separately in the `blob`
//! stream, each in tag order; see `block::encode_streams`/`decode_streams`'s
//! `Field::Aux` arm, which is where those two streams are actually assembled.

/// Static payload length for a fixed-width aux type code, or `None` if the
/// type is variable length (`Z`, `H`, `B`).
pub fn fixed_len(type_code: u8) -> Option<usize> {
    match type_code {
        b'A' => Some(1), // printable character
        b'c' | b'C' => Some(1), // int8 / uint8
        b's' | b'S' => Some(2), // int16 / uint16
        b'i' | b'I' | b'f' => Some(4), // int32 / uint32 / float32
        _ => None,
    }
}

pub fn is_known_type(type_code: u8) -> bool {
    matches!(type_code, b'A' | b'c' | b'C' | b's' | b'S' | b'i' | b'I' | b'f' | b'Z' | b'H')
}
