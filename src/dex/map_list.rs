//! map_list: the table of contents at `header.map_off`.

use log::warn;

use crate::dex::block::Block;
use crate::dex::error::DexError;
use crate::dex::reader::BlockReader;
use crate::dex::section::SectionType;
use crate::dex::text::{TextFormat, TextWriter};
use crate::dex::section::SectionRegistry;
use crate::dex::{write_u2, write_u4};

/// map_item
/// https://source.android.com/docs/core/runtime/dex-format#map-item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapItem
{
    pub kind: SectionType,
    pub size: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MapList
{
    pub items: Vec<MapItem>,
}

impl MapList
{
    /// Read the list, dropping entries for item kinds this crate does not model.
    pub fn read(reader: &mut BlockReader<'_>) -> Result<MapList, DexError>
    {
        let at = crate::dex::reader::ByteSource::position(reader);
        let size = reader.read_u4()?;
        if size as usize * 12 > crate::dex::reader::ByteSource::remaining(reader)
        {
            fail!(TruncatedInput, "map list at 0x{:x} declares {} items past end of input", at, size);
        }
        let mut items = Vec::with_capacity(size as usize);
        for _ in 0..size
        {
            let code = reader.read_u2()?;
            let _unused = reader.read_u2()?;
            let count = reader.read_u4()?;
            let offset = reader.read_u4()?;
            match SectionType::from_map_code(code)
            {
                Some(kind) => items.push(MapItem { kind, size: count, offset }),
                None => warn!("Dropping unsupported map item type 0x{:04x} ({} items at 0x{:x})", code, count, offset),
            }
        }
        Ok(MapList { items })
    }

    pub fn get(&self, kind: SectionType) -> Option<&MapItem>
    {
        self.items.iter().find(|i| i.kind == kind)
    }

    /// Check the entries against the file size and each other; problems are
    /// logged, not raised.
    pub fn validate(&self, file_size: usize) -> bool
    {
        let mut ok = true;
        let mut previous: Option<&MapItem> = None;
        for item in &self.items
        {
            if item.offset as usize > file_size
            {
                warn!("Map item {} at 0x{:x} lies beyond the end of the file", item.kind, item.offset);
                ok = false;
            }
            if let Some(p) = previous
            {
                if p.offset > item.offset
                {
                    warn!("Map item {} at 0x{:x} is out of order after {}", item.kind, item.offset, p.kind);
                    ok = false;
                }
            }
            previous = Some(item);
        }
        if self.get(SectionType::Header).map_or(true, |h| h.offset != 0)
        {
            warn!("Map list has no header entry at offset 0");
            ok = false;
        }
        ok
    }
}

impl Block for MapList
{
    fn encoded_len(&self) -> usize
    {
        4 + self.items.len() * 12
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<usize, DexError>
    {
        let mut c = write_u4(out, self.items.len() as u32);
        for item in &self.items
        {
            c += write_u2(out, item.kind.map_code());
            c += write_u2(out, 0);
            c += write_u4(out, item.size);
            c += write_u4(out, item.offset);
        }
        Ok(c)
    }

    fn refresh(&mut self)
    {
        self.items.sort_by_key(|i| i.offset);
    }
}

impl TextFormat for MapList
{
    fn append(&self, w: &mut TextWriter, _sections: &SectionRegistry)
    {
        for item in &self.items
        {
            w.line(format!("{:<26} 0x{:08x} {:>6}", item.kind.name(), item.offset, item.size));
        }
    }
}
