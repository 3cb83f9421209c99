//! Placement of every section in the output image.
//!
//! Planning walks the sections in file order, assigns each item its offset,
//! and immediately points every data reference to that section at the new
//! offsets. Code items are placed before class data because `code_off` is a
//! ULEB128, so class data sizes are only known once code offsets are.

use std::collections::HashMap;

use log::debug;

use crate::dex::block::Block;
use crate::dex::error::DexError;
use crate::dex::header::{DexHeader, SectionSpan};
use crate::dex::map_list::{MapItem, MapList};
use crate::dex::reference::RefSlot;
use crate::dex::section::{SectionRegistry, SectionType};
use crate::dex::{padding_for, write_padding, write_u4};

/// Sections in the order they are emitted.
pub const LAYOUT_ORDER: [SectionType; 18] = [
    SectionType::Header,
    SectionType::StringId,
    SectionType::TypeId,
    SectionType::ProtoId,
    SectionType::FieldId,
    SectionType::MethodId,
    SectionType::ClassId,
    SectionType::TypeList,
    SectionType::AnnotationSetRefList,
    SectionType::AnnotationSet,
    SectionType::Code,
    SectionType::DebugInfo,
    SectionType::StringData,
    SectionType::Annotation,
    SectionType::EncodedArray,
    SectionType::AnnotationsDirectory,
    SectionType::ClassData,
    SectionType::MapList,
];

/// Fixed entry sizes of the id tables.
fn id_item_size(kind: SectionType) -> usize
{
    match kind
    {
        SectionType::StringId | SectionType::TypeId => 4,
        SectionType::ProtoId => 12,
        SectionType::FieldId | SectionType::MethodId => 8,
        SectionType::ClassId => 32,
        _ => 0,
    }
}

/// Offset of every laid out item, by section and pool index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetTable
{
    offsets: HashMap<SectionType, Vec<u32>>,
}

impl OffsetTable
{
    pub fn insert(&mut self, kind: SectionType, index: u32, offset: u32)
    {
        let v = self.offsets.entry(kind).or_default();
        if v.len() <= index as usize
        {
            v.resize(index as usize + 1, 0);
        }
        v[index as usize] = offset;
    }

    pub fn offset_of(&self, kind: SectionType, index: u32) -> Option<u32>
    {
        self.offsets.get(&kind).and_then(|v| v.get(index as usize)).copied()
    }

    pub fn has_section(&self, kind: SectionType) -> bool
    {
        self.offsets.contains_key(&kind)
    }

    pub fn section(&self, kind: SectionType) -> &[u32]
    {
        self.offsets.get(&kind).map_or(&[], |v| v.as_slice())
    }
}

/// Result of planning: where each section and item goes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layout
{
    pub offsets: OffsetTable,
    pub map: MapList,
    pub data_offset: u32,
    pub file_size: u32,
}

impl Layout
{
    pub fn span(&self, kind: SectionType) -> SectionSpan
    {
        self.map.get(kind).map_or_else(SectionSpan::default, |m| SectionSpan { size: m.size, offset: m.offset })
    }

    /// Copy the planned spans, sizes and map offset into `header`.
    pub fn apply_to(&self, header: &mut DexHeader)
    {
        header.refresh();
        header.file_size = self.file_size;
        header.link = SectionSpan::default();
        header.map_off = self.span(SectionType::MapList).offset;
        header.string_ids = self.span(SectionType::StringId);
        header.type_ids = self.span(SectionType::TypeId);
        header.proto_ids = self.span(SectionType::ProtoId);
        header.field_ids = self.span(SectionType::FieldId);
        header.method_ids = self.span(SectionType::MethodId);
        header.class_defs = self.span(SectionType::ClassId);
        header.data = SectionSpan { size: self.file_size - self.data_offset, offset: self.data_offset };
        if let Some(container) = header.container.as_mut()
        {
            container.container_size = self.file_size;
            container.header_offset = 0;
        }
    }
}

fn to_u32(offset: usize) -> Result<u32, DexError>
{
    u32::try_from(offset).map_err(|_| err!(IndexOutOfRange, "offset 0x{:x} does not fit a u4", offset))
}

/// Point every data reference into `kind` at the offsets just assigned.
fn update_refs(sections: &mut SectionRegistry, offsets: &OffsetTable, kind: SectionType) -> Result<(), DexError>
{
    let mut failure = None;
    sections.visit_refs_mut(&mut |slot: &mut dyn RefSlot| {
        if failure.is_none() && slot.section() == kind
        {
            if let Err(e) = slot.update_offset(offsets)
            {
                failure = Some(e);
            }
        }
    });
    match failure
    {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Assign offsets to every item and resolve all data references. Items must
/// be refreshed beforehand.
pub fn plan(header: &DexHeader, sections: &mut SectionRegistry) -> Result<Layout, DexError>
{
    let mut layout = Layout::default();
    let mut pos = 0usize;

    for kind in LAYOUT_ORDER
    {
        let count = match kind
        {
            SectionType::Header | SectionType::MapList => 1,
            _ => sections.len(kind),
        };
        if count == 0
        {
            continue;
        }
        pos += padding_for(pos, kind.alignment());
        let start = pos;
        if layout.data_offset == 0 && !kind.is_id_section() && kind != SectionType::Header
        {
            layout.data_offset = to_u32(start)?;
        }

        match kind
        {
            SectionType::Header => pos += header.encoded_len(),
            SectionType::MapList =>
            {
                // the map names every placed section plus itself
                pos += 4 + (layout.map.items.len() + 1) * 12;
            }
            k if k.is_id_section() =>
            {
                for index in 0..count
                {
                    layout.offsets.insert(k, index as u32, to_u32(pos)?);
                    pos += id_item_size(k);
                }
            }
            k =>
            {
                let align = k.alignment();
                for (index, size) in sections.item_sizes(k).into_iter().enumerate()
                {
                    pos += padding_for(pos, align);
                    layout.offsets.insert(k, index as u32, to_u32(pos)?);
                    pos += size;
                }
                // string data is reached through string ids, not refs
                if k != SectionType::StringData
                {
                    update_refs(sections, &layout.offsets, k)?;
                }
            }
        }
        layout.map.items.push(MapItem { kind, size: count as u32, offset: to_u32(start)? });
        debug!("Placed {} {} item(s) at 0x{:x}..0x{:x}", count, kind, start, pos);
    }

    layout.file_size = to_u32(pos)?;
    Ok(layout)
}

/// Write the image described by `layout`. `header` must already carry the
/// planned spans.
pub fn emit(header: &DexHeader, sections: &SectionRegistry, layout: &Layout) -> Result<Vec<u8>, DexError>
{
    let mut out = Vec::with_capacity(layout.file_size as usize);
    for item in &layout.map.items
    {
        let kind = item.kind;
        write_padding(&mut out, kind.alignment());
        if out.len() != item.offset as usize
        {
            fail!(FormatMismatch, "{} planned at 0x{:x} but reached at 0x{:x}", kind, item.offset, out.len());
        }
        match kind
        {
            SectionType::Header =>
            {
                header.write(&mut out)?;
            }
            SectionType::MapList =>
            {
                layout.map.write(&mut out)?;
            }
            SectionType::StringId =>
            {
                for &offset in layout.offsets.section(SectionType::StringData)
                {
                    write_u4(&mut out, offset);
                }
            }
            k =>
            {
                for index in 0..item.size
                {
                    write_padding(&mut out, k.alignment());
                    sections.write_item(k, index, &mut out)?;
                }
            }
        }
    }
    if out.len() != layout.file_size as usize
    {
        fail!(FormatMismatch, "image is 0x{:x} bytes, planned 0x{:x}", out.len(), layout.file_size);
    }
    Ok(out)
}
