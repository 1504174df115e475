//! Presence bitsets for the positional (tuple) scheme.
//!
//! A bitset of `width` bits occupies `ceil(width / 8)` raw bytes; bit `i`
//! lives in byte `len - 1 - i / 8`, so the lowest field index ends up in the
//! last byte.

use crate::error::Result;

use super::WireCodec;

fn byte_len(width: usize) -> usize {
    width.div_ceil(8)
}

pub fn write_bitset(codec: &mut dyn WireCodec, bits: &[bool]) -> Result<()> {
    let len = byte_len(bits.len());
    let mut out = vec![0u8; len];
    for (i, set) in bits.iter().enumerate() {
        if *set {
            if let Some(b) = out.get_mut(len - 1 - i / 8) {
                *b |= 1 << (i % 8);
            }
        }
    }
    codec.transport().write(&out)
}

pub fn read_bitset(codec: &mut dyn WireCodec, width: usize) -> Result<Vec<bool>> {
    let len = byte_len(width);
    let mut raw = vec![0u8; len];
    codec.transport().read_all(&mut raw)?;
    Ok((0..width)
        .map(|i| {
            raw.get(len - 1 - i / 8)
                .map(|b| b & (1 << (i % 8)) != 0)
                .unwrap_or(false)
        })
        .collect())
}
