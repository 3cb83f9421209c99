//! Positioned byte sources.
//!
//! [`BlockReader`] is the plain cursor over a byte range handed in by the caller.
//! [`DexReader`] layers the pool registry on top so that data items referenced by
//! file offset are read once, on first reference, and thereafter addressed by
//! their pool index.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use crate::dex::block::ReadBlock;
use crate::dex::error::{DexError, ResultExt};
use crate::dex::leb::{decode_sleb128, decode_uleb128, decode_uleb128p1};
use crate::dex::reference::DataRef;
use crate::dex::section::{SectionItem, SectionRegistry, SectionType, UsageMarker};

/// The capabilities the engine needs from its input.
pub trait ByteSource
{
    fn read(&mut self, n: usize) -> Result<&[u8], DexError>;
    fn position(&self) -> usize;
    fn seek(&mut self, offset: usize) -> Result<(), DexError>;
    fn remaining(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct BlockReader<'a>
{
    bytes: &'a [u8],
    pos: usize,
    big_endian: bool,
}

impl<'a> BlockReader<'a>
{
    pub fn new(bytes: &'a [u8]) -> Self
    {
        BlockReader { bytes, pos: 0, big_endian: false }
    }

    pub fn len(&self) -> usize
    {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &'a [u8]
    {
        self.bytes
    }

    pub fn is_big_endian(&self) -> bool
    {
        self.big_endian
    }

    /// Switch fixed-width reads to big-endian, for files carrying the reverse endian tag.
    pub fn set_big_endian(&mut self, big_endian: bool)
    {
        self.big_endian = big_endian;
    }

    pub fn read_slice(&mut self, n: usize) -> Result<&'a [u8], DexError>
    {
        if self.bytes.len() < self.pos || self.bytes.len() - self.pos < n
        {
            fail!(TruncatedInput, "need {} bytes at 0x{:x}, {} available", n, self.pos, self.remaining());
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u1(&mut self) -> Result<u8, DexError>
    {
        Ok(self.read_slice(1)?[0])
    }

    pub fn read_u2(&mut self) -> Result<u16, DexError>
    {
        let b = self.read_slice(2)?;
        let raw = [b[0], b[1]];
        Ok(if self.big_endian { u16::from_be_bytes(raw) } else { u16::from_le_bytes(raw) })
    }

    pub fn read_u4(&mut self) -> Result<u32, DexError>
    {
        let b = self.read_slice(4)?;
        let raw = [b[0], b[1], b[2], b[3]];
        Ok(if self.big_endian { u32::from_be_bytes(raw) } else { u32::from_le_bytes(raw) })
    }

    pub fn read_x(&mut self, length: usize) -> Result<Vec<u8>, DexError>
    {
        Ok(self.read_slice(length)?.to_vec())
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DexError>
    {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_slice(N)?);
        Ok(out)
    }

    pub fn read_uleb128(&mut self) -> Result<u32, DexError>
    {
        let at = self.pos;
        let (val, size) = decode_uleb128(self.tail()).context(|| format!("uleb128 at 0x{:x}", at))?;
        self.pos += size;
        Ok(val)
    }

    pub fn read_uleb128p1(&mut self) -> Result<i32, DexError>
    {
        let at = self.pos;
        let (val, size) = decode_uleb128p1(self.tail()).context(|| format!("uleb128p1 at 0x{:x}", at))?;
        self.pos += size;
        Ok(val)
    }

    pub fn read_sleb128(&mut self) -> Result<i32, DexError>
    {
        let at = self.pos;
        let (val, size) = decode_sleb128(self.tail()).context(|| format!("sleb128 at 0x{:x}", at))?;
        self.pos += size;
        Ok(val)
    }

    pub fn peek_u1(&self) -> Option<u8>
    {
        self.bytes.get(self.pos).copied()
    }

    fn tail(&self) -> &'a [u8]
    {
        self.bytes.get(self.pos..).unwrap_or(&[])
    }
}

impl ByteSource for BlockReader<'_>
{
    fn read(&mut self, n: usize) -> Result<&[u8], DexError>
    {
        self.read_slice(n)
    }

    fn position(&self) -> usize
    {
        self.pos
    }

    fn seek(&mut self, offset: usize) -> Result<(), DexError>
    {
        if offset > self.bytes.len()
        {
            fail!(TruncatedInput, "seek to 0x{:x} beyond end 0x{:x}", offset, self.bytes.len());
        }
        self.pos = offset;
        Ok(())
    }

    fn remaining(&self) -> usize
    {
        self.bytes.len().saturating_sub(self.pos)
    }
}

/// A [`BlockReader`] that also populates a [`SectionRegistry`] while reading.
pub struct DexReader<'a>
{
    reader: BlockReader<'a>,
    sections: SectionRegistry,
    loaded: HashMap<(SectionType, u32), u32>,
    strict: bool,
}

impl<'a> DexReader<'a>
{
    pub fn new(bytes: &'a [u8]) -> Self
    {
        DexReader::with_reader(BlockReader::new(bytes))
    }

    pub fn with_reader(reader: BlockReader<'a>) -> Self
    {
        DexReader { reader, sections: SectionRegistry::default(), loaded: HashMap::new(), strict: false }
    }

    /// Whether items breaking a format invariant fail the read instead of being logged.
    pub fn is_strict(&self) -> bool
    {
        self.strict
    }

    pub fn set_strict(&mut self, strict: bool)
    {
        self.strict = strict;
    }

    pub fn sections(&self) -> &SectionRegistry
    {
        &self.sections
    }

    pub fn sections_mut(&mut self) -> &mut SectionRegistry
    {
        &mut self.sections
    }

    pub fn into_sections(self) -> SectionRegistry
    {
        self.sections
    }

    /// Index of the data item at `offset`, reading it into its pool on first reference.
    pub fn load<T>(&mut self, offset: u32) -> Result<u32, DexError>
    where
        T: SectionItem + ReadBlock,
    {
        let key = (T::SECTION, offset);
        if let Some(&index) = self.loaded.get(&key)
        {
            return Ok(index);
        }
        let saved = self.reader.position();
        self.reader.seek(offset as usize).context(|| format!("{} at 0x{:x}", T::SECTION.name(), offset))?;
        let item = T::read(self).context(|| format!("{} at 0x{:x}", T::SECTION.name(), offset))?;
        self.reader.seek(saved)?;
        let index = T::section_mut(&mut self.sections).append(item);
        self.loaded.insert(key, index);
        Ok(index)
    }

    /// Read a u4 file offset and resolve it to a data reference; zero means absent.
    pub fn read_data_ref<T>(&mut self, usage: UsageMarker) -> Result<DataRef<T>, DexError>
    where
        T: SectionItem + ReadBlock,
    {
        let offset = self.reader.read_u4()?;
        self.data_ref_at(offset, usage)
    }

    pub fn data_ref_at<T>(&mut self, offset: u32, usage: UsageMarker) -> Result<DataRef<T>, DexError>
    where
        T: SectionItem + ReadBlock,
    {
        if offset == 0
        {
            return Ok(DataRef::none(usage));
        }
        let index = self.load::<T>(offset)?;
        Ok(DataRef::resolved(index, offset, usage))
    }

    /// Pool index previously assigned to the data item read at `offset`, if any.
    pub fn loaded_index(&self, section: SectionType, offset: u32) -> Option<u32>
    {
        self.loaded.get(&(section, offset)).copied()
    }
}

impl<'a> Deref for DexReader<'a>
{
    type Target = BlockReader<'a>;

    fn deref(&self) -> &Self::Target
    {
        &self.reader
    }
}

impl DerefMut for DexReader<'_>
{
    fn deref_mut(&mut self) -> &mut Self::Target
    {
        &mut self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::error::DexErrorKind;

    #[test]
    fn fixed_width_reads_follow_endianness() {
        let bytes = [0x78, 0x56, 0x34, 0x12, 0x01, 0x02];
        let mut r = BlockReader::new(&bytes);
        assert_eq!(r.read_u4().unwrap(), 0x12345678);
        r.set_big_endian(true);
        assert_eq!(r.read_u2().unwrap(), 0x0102);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn short_read_reports_offset() {
        let bytes = [0u8; 3];
        let mut r = BlockReader::new(&bytes);
        r.seek(2).unwrap();
        let e = r.read_u4().unwrap_err();
        assert_eq!(e.kind(), DexErrorKind::TruncatedInput);
        assert!(e.message().contains("0x2"), "{}", e);
        assert_eq!(r.position(), 2);
    }

    #[test]
    fn varint_reads_advance_cursor() {
        let bytes = [0xE5, 0x8E, 0x26, 0x7F, 0x00];
        let mut r = BlockReader::new(&bytes);
        assert_eq!(r.read_uleb128().unwrap(), 624485);
        assert_eq!(r.read_sleb128().unwrap(), -1);
        assert_eq!(r.read_uleb128p1().unwrap(), -1);
        assert_eq!(r.position(), 5);
    }
}
