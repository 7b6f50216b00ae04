//! Thin wrappers around `integer-encoding`'s `VarInt` trait for the default
//! stream's zigzag-signed and unsigned LEB128 integers.

use integer_encoding::VarInt;

pub fn write_i32(out: &mut Vec<u8>, v: i32) {
    let mut buf = [0u8; 10];
    let n = (v as i64).encode_var(&mut buf);
    out.extend_from_slice(&buf[..n]);
}

pub fn write_u32(out: &mut Vec<u8>, v: u32) {
    let mut buf = [0u8; 10];
    let n = (v as u64).encode_var(&mut buf);
    out.extend_from_slice(&buf[..n]);
}

pub fn write_u64(out: &mut Vec<u8>, v: u64) {
    let mut buf = [0u8; 10];
    let n = v.encode_var(&mut buf);
    out.extend_from_slice(&buf[..n]);
}

/// Read a zigzag-signed varint; returns the value and the number of bytes
/// consumed.
pub fn read_i32(buf: &[u8]) -> Option<(i32, usize)> {
    let (v, n): (i64, usize) = i64::decode_var(buf)?;
    Some((v as i32, n))
}

pub fn read_u32(buf: &[u8]) -> Option<(u32, usize)> {
    let (v, n): (u64, usize) = u64::decode_var(buf)?;
    Some((v as u32, n))
}

pub fn read_u64(buf: &[u8]) -> Option<(u64, usize)> {
    u64::decode_var(buf)
}

/// Delta-encode an ascending sequence of positions as varints: the first
/// value is written absolute, every subsequent value as the (non-negative)
/// delta from its predecessor. Used for the `coord` field's `ref_id` (default
/// stream) and `pos` (blob stream), both non-decreasing across a shard.
pub fn write_delta_i32(out: &mut Vec<u8>, values: &[i32]) {
    let mut prev = 0i32;
    for &v in values {
        write_i32(out, v - prev);
        prev = v;
    }
}

pub fn read_delta_i32(buf: &[u8], count: usize) -> Option<Vec<i32>> {
    let mut out = Vec::with_capacity(count);
    let mut offset = 0;
    let mut prev = 0i32;
    for _ in 0..count {
        let (delta, n) = read_i32(buf.get(offset..)?)?;
        prev += delta;
        out.push(prev);
        offset += n;
    }
    Some(out)
}
