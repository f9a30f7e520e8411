//! ZigZag and unsigned-varint codecs for delta-compressed neighbor lists.
//!
//! Pure functions, no shared state. Targets are stored as zig-zag encoded
//! deltas so that small forward and backward jumps both stay short under
//! varint encoding. Decoding panics on malformed input: the only bytes ever
//! decoded are bytes this module produced, so a decode failure is a bug,
//! not a runtime condition.

/// Maximum number of bytes a varint-encoded `u64` occupies.
pub const MAX_VLONG_BYTES: usize = 10;

/// Maps a signed delta into the unsigned domain.
///
/// Small-magnitude negative and positive values both map to small unsigned
/// values: `0 -> 0`, `-1 -> 1`, `1 -> 2`, `-2 -> 3`, ...
#[inline]
pub fn zigzag(delta: i64) -> u64 {
    ((delta << 1) ^ (delta >> 63)) as u64
}

/// Inverse of [`zigzag`].
#[inline]
pub fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ (-((value & 1) as i64))
}

/// Number of bytes [`encode_vlong`] emits for `value`.
#[inline]
pub fn encoded_vlong_size(value: u64) -> usize {
    // bits_needed / 7, rounded up; zero still takes one byte
    let bits = 64 - (value | 1).leading_zeros() as usize;
    (bits + 6) / 7
}

/// Encodes a `u64` as an unsigned varint, 7 bits per byte with a
/// continuation bit.
pub fn encode_vlong(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Encodes a run of values with [`encode_vlong`].
pub fn encode_vlongs(values: &[u64], out: &mut Vec<u8>) {
    for &value in values {
        encode_vlong(value, out);
    }
}

/// Decodes a varint from `src`, advancing `off` past the consumed bytes.
///
/// # Panics
///
/// Panics if the input is truncated or encodes more than 64 bits.
pub fn decode_vlong(src: &[u8], off: &mut usize) -> u64 {
    let mut result = 0u64;
    let mut shift = 0u32;
    for i in 0..MAX_VLONG_BYTES {
        let idx = *off;
        assert!(idx < src.len(), "varint decode truncated at byte {i}");
        let byte = src[idx];
        *off += 1;
        let payload = (byte & 0x7f) as u64;
        result |= payload << shift;
        if byte & 0x80 == 0 {
            assert!(
                i < MAX_VLONG_BYTES - 1 || payload <= 1,
                "varint overflow (more than 64 bits)"
            );
            return result;
        }
        shift += 7;
    }
    panic!("varint too long (exceeded {MAX_VLONG_BYTES} bytes)");
}
