#[macro_use]
pub mod error;

pub mod leb;
pub mod reader;
pub mod block;
pub mod section;
pub mod reference;
pub mod key;
pub mod header;
pub mod ids;
pub mod class_data;
pub mod code;
pub mod instructions;
pub mod try_block;
pub mod debug_info;
pub mod values;
pub mod encoded_array;
pub mod annotations;
pub mod map_list;
pub mod layout;
pub mod text;
pub mod dex_file;

pub use crate::dex::block::{Block, BlockArray, ReadBlock};
pub use crate::dex::dex_file::{DexFile, ReadOptions};
pub use crate::dex::error::{DexError, DexErrorKind};
pub use crate::dex::reader::{BlockReader, ByteSource, DexReader};
pub use crate::dex::reference::{DataRef, IdRef, ReferenceHolder, UsedId};
pub use crate::dex::section::{Section, SectionRegistry, SectionType, UsageMarker};

use crate::dex::leb::{encode_sleb128, encode_uleb128, encode_uleb128p1};

/// Index value meaning "no reference" in fixed-width u4 index fields.
pub const NO_INDEX: u32 = 0xffffffff;

// Basic type writing, always little-endian

pub(crate) fn write_u1(buffer: &mut Vec<u8>, val: u8) -> usize
{
    buffer.push(val);
    1
}

pub(crate) fn write_u2(buffer: &mut Vec<u8>, val: u16) -> usize
{
    buffer.extend_from_slice(&val.to_le_bytes());
    2
}

pub(crate) fn write_u4(buffer: &mut Vec<u8>, val: u32) -> usize
{
    buffer.extend_from_slice(&val.to_le_bytes());
    4
}

pub(crate) fn write_uleb128(buffer: &mut Vec<u8>, val: u32) -> usize
{
    let encoded = encode_uleb128(val);
    let c = encoded.len();
    buffer.extend(encoded);
    c
}

pub(crate) fn write_sleb128(buffer: &mut Vec<u8>, val: i32) -> usize
{
    let encoded = encode_sleb128(val);
    let c = encoded.len();
    buffer.extend(encoded);
    c
}

pub(crate) fn write_uleb128p1(buffer: &mut Vec<u8>, val: i32) -> usize
{
    let encoded = encode_uleb128p1(val);
    let c = encoded.len();
    buffer.extend(encoded);
    c
}

pub(crate) fn write_x(buffer: &mut Vec<u8>, val: &[u8]) -> usize
{
    buffer.extend_from_slice(val);
    val.len()
}

/// Pad `buffer` with zeros up to the next multiple of `alignment`, returning the pad size.
pub(crate) fn write_padding(buffer: &mut Vec<u8>, alignment: usize) -> usize
{
    let pad = padding_for(buffer.len(), alignment);
    buffer.resize(buffer.len() + pad, 0);
    pad
}

pub(crate) fn padding_for(offset: usize, alignment: usize) -> usize
{
    if alignment <= 1 { 0 } else { (alignment - offset % alignment) % alignment }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_width_writes_are_little_endian() {
        let mut b = vec![];
        assert_eq!(write_u2(&mut b, 0x1234), 2);
        assert_eq!(write_u4(&mut b, 0x12345678), 4);
        assert_eq!(b, vec![0x34, 0x12, 0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn padding_rounds_to_alignment() {
        let mut b = vec![1, 2, 3];
        assert_eq!(write_padding(&mut b, 4), 1);
        assert_eq!(b.len(), 4);
        assert_eq!(write_padding(&mut b, 4), 0);
        assert_eq!(padding_for(5, 1), 0);
    }
}
