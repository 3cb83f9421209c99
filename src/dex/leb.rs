//! LEB128 variable-length integers as used throughout the DEX format.
//!
//! Each byte carries 7 value bits, least significant group first; the high bit
//! marks that another byte follows. DEX values are at most 32 bits wide, so a
//! valid encoding is never longer than 5 bytes. The 64-bit helpers exist for
//! callers that need wider counters and cap at 10 bytes.

use crate::dex::error::DexError;

/// Longest valid encoding of a 32-bit value.
pub const MAX_LEB128_LEN_32: usize = 5;

/// Longest valid encoding of a 64-bit value.
pub const MAX_LEB128_LEN_64: usize = 10;

pub fn encode_uleb128(value: u32) -> Vec<u8> {
    encode_uleb128_u64(value as u64)
}

pub fn encode_uleb128_u64(value: u64) -> Vec<u8> {
    let mut result = Vec::with_capacity(uleb128_len_u64(value));
    let mut remaining = value;

    loop {
        let mut byte = (remaining & 0x7F) as u8;
        remaining >>= 7;

        if remaining != 0 {
            byte |= 0x80;
        }

        result.push(byte);

        if remaining == 0 {
            break;
        }
    }

    result
}

/// Size in bytes of the minimal encoding of `value`.
pub fn uleb128_len(value: u32) -> usize {
    uleb128_len_u64(value as u64)
}

pub fn uleb128_len_u64(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    std::cmp::max(1, bits.div_ceil(7))
}

pub fn sleb128_len(value: i32) -> usize {
    encode_sleb128(value).len()
}

fn decode_unsigned(encoded: &[u8], max_len: usize) -> Result<(u64, usize), DexError> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;

    for (count, &byte) in encoded.iter().enumerate() {
        if count == max_len {
            fail!(MalformedVarint, "continuation past {} bytes", max_len);
        }

        let low = (byte & 0x7F) as u64;
        if shift < 64 {
            value |= low.wrapping_shl(shift);
        }

        if (byte & 0x80) == 0 {
            return Ok((value, count + 1));
        }
        shift += 7;
    }

    if encoded.len() >= max_len {
        fail!(MalformedVarint, "continuation past {} bytes", max_len);
    }
    fail!(TruncatedInput, "varint runs past end of input after {} bytes", encoded.len())
}

/// Decode an unsigned 32-bit value, returning it with the number of bytes consumed.
pub fn decode_uleb128(encoded: &[u8]) -> Result<(u32, usize), DexError> {
    let (value, count) = decode_unsigned(encoded, MAX_LEB128_LEN_32)?;
    // bits beyond 32 in the fifth byte are ignored, as the platform reader does
    Ok((value as u32, count))
}

pub fn decode_uleb128_u64(encoded: &[u8]) -> Result<(u64, usize), DexError> {
    decode_unsigned(encoded, MAX_LEB128_LEN_64)
}

pub fn encode_sleb128(value: i32) -> Vec<u8> {
    let mut result = Vec::new();
    let mut remaining = value;

    loop {
        let mut byte = (remaining & 0x7F) as u8;
        remaining >>= 7;

        let is_more =
            !((remaining == 0 && (byte & 0x40) == 0) || (remaining == -1 && (byte & 0x40) != 0));
        if is_more {
            byte |= 0x80;
        }

        result.push(byte);

        if !is_more {
            break;
        }
    }

    result
}

pub fn decode_sleb128(encoded: &[u8]) -> Result<(i32, usize), DexError> {
    let (raw, count) = decode_unsigned(encoded, MAX_LEB128_LEN_32)?;
    let bits = (count * 7) as u32;
    let value = if bits < 32 {
        // sign-extend from the last group's top bit
        let shift = 32 - bits;
        ((raw as u32) << shift) as i32 >> shift
    } else {
        raw as u32 as i32
    };
    Ok((value, count))
}

/// ULEB128p1 stores `value + 1` so that `-1` (NO_INDEX) encodes as a single zero byte.
pub fn encode_uleb128p1(value: i32) -> Vec<u8> {
    encode_uleb128(value.wrapping_add(1) as u32)
}

pub fn decode_uleb128p1(encoded: &[u8]) -> Result<(i32, usize), DexError> {
    let (v, c) = decode_uleb128(encoded)?;
    Ok(((v as i32).wrapping_sub(1), c))
}
