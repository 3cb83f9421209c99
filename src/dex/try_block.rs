//! The try/catch table that trails a code item's instructions.
//!
//! `tries` holds the address ranges; each refers by slot to one entry of
//! `handlers`, the encoded_catch_handler_list. On disk a try item names its
//! handler list by byte offset from the start of the list, which is derived
//! from the cumulative sizes of the preceding lists.

use rangemap::RangeMap;

use crate::dex::block::{Block, BlockArray};
use crate::dex::error::DexError;
use crate::dex::ids::TypeId;
use crate::dex::key::{translate_refs, RefTranslator, TypeKey};
use crate::dex::leb::{sleb128_len, uleb128_len};
use crate::dex::reader::{ByteSource, DexReader};
use crate::dex::reference::{IdRef, RefSlot, ReferenceHolder, UsedId};
use crate::dex::section::{SectionRegistry, UsageMarker};
use crate::dex::text::{type_name, TextFormat, TextWriter};
use crate::dex::{write_sleb128, write_u2, write_u4, write_uleb128};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionHandler
{
    Typed { exception: IdRef<TypeId>, address: u32 },
    CatchAll { address: u32 },
}

impl ExceptionHandler
{
    pub fn typed(type_index: u32, address: u32) -> Self
    {
        ExceptionHandler::Typed { exception: IdRef::new(type_index, UsageMarker::CATCH), address }
    }

    pub fn address(&self) -> u32
    {
        match self
        {
            ExceptionHandler::Typed { address, .. } | ExceptionHandler::CatchAll { address } => *address,
        }
    }

    pub fn type_key(&self, sections: &SectionRegistry) -> Option<TypeKey>
    {
        match self
        {
            ExceptionHandler::Typed { exception, .. } => exception.index().and_then(|i| TypeKey::of(sections, i).ok()),
            ExceptionHandler::CatchAll { .. } => None,
        }
    }

    /// Whether both handlers catch the same type, judged by descriptor rather
    /// than by pool position, so the two sides may live in different files.
    pub fn is_type_equal(&self, sections: &SectionRegistry, other: &ExceptionHandler, other_sections: &SectionRegistry) -> bool
    {
        match (self, other)
        {
            (ExceptionHandler::CatchAll { .. }, ExceptionHandler::CatchAll { .. }) => true,
            (ExceptionHandler::Typed { .. }, ExceptionHandler::Typed { .. }) =>
            {
                self.type_key(sections) == other.type_key(other_sections)
            }
            _ => false,
        }
    }
}

/// An encoded_catch_handler: typed handlers followed by an optional catch-all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CatchHandlerList
{
    pub handlers: Vec<ExceptionHandler>,
}

impl CatchHandlerList
{
    /// Typed handlers keep their order; a catch-all moves to the end.
    pub fn new(handlers: Vec<ExceptionHandler>) -> Self
    {
        let mut list = CatchHandlerList { handlers };
        list.normalize();
        list
    }

    fn normalize(&mut self)
    {
        self.handlers.sort_by_key(|h| matches!(h, ExceptionHandler::CatchAll { .. }));
    }

    fn catch_all_count(&self) -> usize
    {
        self.handlers.len() - self.typed_count()
    }

    fn typed_count(&self) -> usize
    {
        self.handlers.iter().filter(|h| matches!(h, ExceptionHandler::Typed { .. })).count()
    }

    pub fn catch_all(&self) -> Option<u32>
    {
        self.handlers.iter().find_map(|h| match h
        {
            ExceptionHandler::CatchAll { address } => Some(*address),
            _ => None,
        })
    }

    /// Encoded size field: negative when a catch-all is present.
    fn size_field(&self) -> i32
    {
        let typed = self.typed_count() as i32;
        if self.catch_all().is_some() { -typed } else { typed }
    }

    fn read(reader: &mut DexReader<'_>) -> Result<CatchHandlerList, DexError>
    {
        let size = reader.read_sleb128()?;
        let mut handlers = Vec::with_capacity(size.unsigned_abs().min(0x100) as usize + 1);
        for _ in 0..size.unsigned_abs()
        {
            let exception = IdRef::new(reader.read_uleb128()?, UsageMarker::CATCH);
            handlers.push(ExceptionHandler::Typed { exception, address: reader.read_uleb128()? });
        }
        if size <= 0
        {
            handlers.push(ExceptionHandler::CatchAll { address: reader.read_uleb128()? });
        }
        Ok(CatchHandlerList { handlers })
    }

    /// Structural equality across files: same addresses, same caught types by key.
    pub fn is_equivalent(&self, sections: &SectionRegistry, other: &CatchHandlerList, other_sections: &SectionRegistry) -> bool
    {
        self.handlers.len() == other.handlers.len()
            && self.handlers.iter().zip(&other.handlers).all(|(a, b)| {
                a.address() == b.address() && a.is_type_equal(sections, b, other_sections)
            })
    }
}

impl Block for CatchHandlerList
{
    fn encoded_len(&self) -> usize
    {
        let mut len = sleb128_len(self.size_field());
        for h in &self.handlers
        {
            if let ExceptionHandler::Typed { exception, address } = h
            {
                len += uleb128_len(exception.raw()) + uleb128_len(*address);
            }
        }
        if let Some(address) = self.catch_all()
        {
            len += uleb128_len(address);
        }
        len
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<usize, DexError>
    {
        if self.catch_all_count() > 1
        {
            fail!(FormatMismatch, "handler list has {} catch-all entries", self.catch_all_count());
        }
        let mut c = write_sleb128(out, self.size_field());
        for h in self.handlers.iter().filter(|h| matches!(h, ExceptionHandler::Typed { .. }))
        {
            if let ExceptionHandler::Typed { exception, address } = h
            {
                c += write_uleb128(out, exception.required()?);
                c += write_uleb128(out, *address);
            }
        }
        if let Some(address) = self.catch_all()
        {
            c += write_uleb128(out, address);
        }
        Ok(c)
    }

    fn refresh(&mut self)
    {
        self.normalize();
    }
}

impl ReferenceHolder for CatchHandlerList
{
    fn used_ids(&self) -> Box<dyn Iterator<Item = UsedId> + '_>
    {
        Box::new(self.handlers.iter().filter_map(|h| match h
        {
            ExceptionHandler::Typed { exception, .. } => exception.used(),
            ExceptionHandler::CatchAll { .. } => None,
        }))
    }

    fn visit_refs_mut(&mut self, visitor: &mut dyn FnMut(&mut dyn RefSlot))
    {
        for h in self.handlers.iter_mut()
        {
            if let ExceptionHandler::Typed { exception, .. } = h
            {
                visitor(exception);
            }
        }
    }
}

/// A try_item. `handler` is a slot in the owning [`TryBlock`]'s handler lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TryItem
{
    pub start_addr: u32,
    pub insn_count: u16,
    pub handler: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TryBlock
{
    pub tries: Vec<TryItem>,
    pub handlers: BlockArray<CatchHandlerList>,
}

impl TryBlock
{
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Read `tries_size` try items and the handler list that follows them.
    pub fn read(reader: &mut DexReader<'_>, tries_size: u16) -> Result<TryBlock, DexError>
    {
        let mut raw = Vec::with_capacity(tries_size as usize);
        for _ in 0..tries_size
        {
            raw.push((reader.read_u4()?, reader.read_u2()?, reader.read_u2()?));
        }

        let list_start = reader.position();
        let count = reader.read_uleb128()?;
        let mut offsets = Vec::with_capacity(count.min(0x1000) as usize);
        let mut handlers = BlockArray::new();
        for i in 0..count
        {
            offsets.push(reader.position() - list_start);
            let list = CatchHandlerList::read(reader).map_err(|e| DexError::with_context(e, format!("catch handler #{}", i)))?;
            handlers.push(list);
        }

        let mut tries = Vec::with_capacity(raw.len());
        for (i, (start_addr, insn_count, handler_off)) in raw.into_iter().enumerate()
        {
            let handler = match offsets.iter().position(|&o| o == handler_off as usize)
            {
                Some(slot) => slot,
                None => fail!(FormatMismatch, "try item #{} handler offset 0x{:x} starts no handler list", i, handler_off),
            };
            tries.push(TryItem { start_addr, insn_count, handler });
        }
        handlers.refresh();
        Ok(TryBlock { tries, handlers })
    }

    pub fn is_empty(&self) -> bool
    {
        self.tries.is_empty()
    }

    /// Add a covered range, reusing an identical handler list if one exists.
    pub fn add_try(&mut self, start_addr: u32, insn_count: u16, list: CatchHandlerList) -> usize
    {
        let handler = match self.handlers.iter().position(|h| *h == list)
        {
            Some(slot) => slot,
            None => self.handlers.push(list),
        };
        self.tries.push(TryItem { start_addr, insn_count, handler });
        self.tries.len() - 1
    }

    /// Drop every range and handler; the table itself stays allocated.
    pub fn clear(&mut self)
    {
        self.tries.clear();
        self.handlers.clear();
    }

    /// The handler list covering `address`, if any.
    pub fn handlers_at(&self, address: u32) -> Option<&CatchHandlerList>
    {
        let mut map = RangeMap::new();
        for t in self.tries.iter().filter(|t| t.insn_count > 0)
        {
            // a range running past the address space covers nothing
            if let Some(end) = t.start_addr.checked_add(t.insn_count as u32)
            {
                map.insert(t.start_addr..end, t.handler);
            }
        }
        map.get(&address).and_then(|&slot| self.handlers.get(slot))
    }

    /// Byte offset of a handler list from the start of the encoded list.
    pub fn handler_offset(&self, slot: usize) -> usize
    {
        uleb128_len(self.handlers.len() as u32) + self.handlers.offset_of(slot)
    }

    /// Replace this table's contents with `other`'s, translating caught types.
    pub fn merge(&mut self, other: &TryBlock, translator: &mut dyn RefTranslator) -> Result<(), DexError>
    {
        let mut copy = other.clone();
        translate_refs(&mut copy, translator)?;
        self.tries = copy.tries;
        self.handlers = copy.handlers;
        self.handlers.mark_dirty();
        Ok(())
    }

    /// Drop handler lists no try item refers to and renumber the rest.
    fn prune_handlers(&mut self)
    {
        let mut used = vec![false; self.handlers.len()];
        for t in &self.tries
        {
            if let Some(u) = used.get_mut(t.handler)
            {
                *u = true;
            }
        }
        if used.iter().all(|u| *u)
        {
            return;
        }
        let mut renumber = vec![0; used.len()];
        let mut kept = Vec::new();
        let old = std::mem::take(&mut self.handlers).into_vec();
        for (slot, list) in old.into_iter().enumerate()
        {
            if used[slot]
            {
                renumber[slot] = kept.len();
                kept.push(list);
            }
        }
        for t in self.tries.iter_mut()
        {
            t.handler = renumber.get(t.handler).copied().unwrap_or(0);
        }
        self.handlers = BlockArray::from(kept);
        self.handlers.mark_dirty();
    }
}

impl Block for TryBlock
{
    fn encoded_len(&self) -> usize
    {
        self.tries.len() * 8 + uleb128_len(self.handlers.len() as u32) + self.handlers.encoded_len()
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<usize, DexError>
    {
        let mut c = 0;
        for (i, t) in self.tries.iter().enumerate()
        {
            if t.handler >= self.handlers.len()
            {
                fail!(IndexOutOfRange, "try item #{} names handler {} of {}", i, t.handler, self.handlers.len());
            }
            let off = self.handler_offset(t.handler);
            if off > u16::MAX as usize
            {
                fail!(IndexOutOfRange, "handler offset 0x{:x} does not fit a u2 field", off);
            }
            c += write_u4(out, t.start_addr);
            c += write_u2(out, t.insn_count);
            c += write_u2(out, off as u16);
        }
        c += write_uleb128(out, self.handlers.len() as u32);
        c += self.handlers.write(out)?;
        Ok(c)
    }

    fn refresh(&mut self)
    {
        self.prune_handlers();
        self.tries.sort_by_key(|t| t.start_addr);
        self.handlers.refresh();
    }

    fn is_dirty(&self) -> bool
    {
        self.handlers.is_dirty()
    }
}

impl ReferenceHolder for TryBlock
{
    fn used_ids(&self) -> Box<dyn Iterator<Item = UsedId> + '_>
    {
        Box::new(self.handlers.iter().flat_map(|h| h.used_ids()))
    }

    fn visit_refs_mut(&mut self, visitor: &mut dyn FnMut(&mut dyn RefSlot))
    {
        for h in self.handlers.iter_mut()
        {
            h.visit_refs_mut(visitor);
        }
    }
}

impl TextFormat for TryBlock
{
    fn append(&self, w: &mut TextWriter, sections: &SectionRegistry)
    {
        for t in &self.tries
        {
            let end = t.start_addr.saturating_add(t.insn_count as u32);
            let Some(list) = self.handlers.get(t.handler) else { continue };
            for h in &list.handlers
            {
                match h
                {
                    ExceptionHandler::Typed { exception, address } => w.line(format!(
                        ".catch {} {{:{:04x} .. :{:04x}}} :{:04x}",
                        type_name(sections, exception),
                        t.start_addr,
                        end,
                        address
                    )),
                    ExceptionHandler::CatchAll { address } => {
                        w.line(format!(".catchall {{:{:04x} .. :{:04x}}} :{:04x}", t.start_addr, end, address))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::ids::DexString;
    use crate::dex::section::SectionType;

    fn two_range_block() -> TryBlock {
        let mut tb = TryBlock::new();
        tb.add_try(0, 4, CatchHandlerList::new(vec![ExceptionHandler::typed(1, 10)]));
        tb.add_try(
            4,
            2,
            CatchHandlerList::new(vec![ExceptionHandler::typed(2, 12), ExceptionHandler::CatchAll { address: 14 }]),
        );
        tb
    }

    #[test]
    fn handler_offsets_are_cumulative() {
        let tb = two_range_block();
        assert_eq!(tb.handler_offset(0), 1);
        // first list: sleb(1) + uleb(1) + uleb(10)
        assert_eq!(tb.handler_offset(1), 4);

        let mut out = vec![];
        let n = tb.write(&mut out).unwrap();
        assert_eq!(n, tb.encoded_len());
        assert_eq!(&out[6..8], &[1, 0]);
        assert_eq!(&out[14..16], &[4, 0]);
        // catch-all list encodes a negative size
        assert_eq!(out[16 + 4], 0x7f);

        let back = TryBlock::read(&mut DexReader::new(&out), 2).unwrap();
        assert_eq!(back, tb);
    }

    #[test]
    fn bad_handler_offset_is_rejected() {
        let mut out = vec![];
        two_range_block().write(&mut out).unwrap();
        out[6] = 2;
        assert!(TryBlock::read(&mut DexReader::new(&out), 2).is_err());
    }

    #[test]
    fn lookup_by_address() {
        let tb = two_range_block();
        assert_eq!(tb.handlers_at(3).map(|l| l.handlers.len()), Some(1));
        assert_eq!(tb.handlers_at(5).and_then(|l| l.catch_all()), Some(14));
        assert!(tb.handlers_at(6).is_none());
    }

    #[test]
    fn identical_lists_are_shared_and_unused_pruned() {
        let mut tb = two_range_block();
        tb.add_try(8, 1, CatchHandlerList::new(vec![ExceptionHandler::typed(1, 10)]));
        assert_eq!(tb.handlers.len(), 2);
        tb.tries.remove(1);
        tb.refresh();
        assert_eq!(tb.handlers.len(), 1);
        assert!(tb.tries.iter().all(|t| t.handler == 0));
    }

    #[test]
    fn typed_handlers_compare_by_descriptor() {
        let mut a = SectionRegistry::new();
        a.strings.append(DexString::from("Ljava/io/IOException;"));
        a.types.append(TypeId::new(0));
        let mut b = SectionRegistry::new();
        b.strings.append(DexString::from("LOther;"));
        b.strings.append(DexString::from("Ljava/io/IOException;"));
        b.types.append(TypeId::new(0));
        b.types.append(TypeId::new(1));

        let ha = ExceptionHandler::typed(0, 4);
        let hb = ExceptionHandler::typed(1, 4);
        assert!(ha.is_type_equal(&a, &hb, &b));
        assert!(!ha.is_type_equal(&a, &ExceptionHandler::typed(0, 4), &b));
        assert!(!ha.is_type_equal(&a, &ExceptionHandler::CatchAll { address: 4 }, &b));

        let used: Vec<_> = two_range_block().used_ids().map(|u| (u.section, u.index)).collect();
        assert_eq!(used, vec![(SectionType::TypeId, 1), (SectionType::TypeId, 2)]);
    }

    #[test]
    fn range_past_address_space_is_ignored() {
        let mut tb = TryBlock::new();
        tb.add_try(u32::MAX - 1, 4, CatchHandlerList::new(vec![ExceptionHandler::CatchAll { address: 2 }]));
        tb.add_try(0, 2, CatchHandlerList::new(vec![ExceptionHandler::typed(1, 3)]));
        let mut out = vec![];
        tb.write(&mut out).unwrap();
        let back = TryBlock::read(&mut DexReader::new(&out), 2).unwrap();

        assert!(back.handlers_at(u32::MAX - 1).is_none());
        assert_eq!(back.handlers_at(1).map(|l| l.handlers.len()), Some(1));

        let sections = SectionRegistry::new();
        let mut w = TextWriter::new();
        back.append(&mut w, &sections);
        assert!(w.finish().contains(".catchall {:fffffffe .. :ffffffff} :0002"));
    }

    #[test]
    fn catch_all_is_kept_last_and_single() {
        let list = CatchHandlerList::new(vec![ExceptionHandler::CatchAll { address: 3 }, ExceptionHandler::typed(1, 5)]);
        assert_eq!(list.handlers[1], ExceptionHandler::CatchAll { address: 3 });
        let mut out = vec![];
        assert_eq!(list.write(&mut out).unwrap(), list.encoded_len());
        let back = CatchHandlerList::read(&mut DexReader::new(&out)).unwrap();
        assert_eq!(back, list);

        let mut held = CatchHandlerList::default();
        held.handlers.push(ExceptionHandler::CatchAll { address: 7 });
        held.handlers.push(ExceptionHandler::typed(2, 9));
        held.refresh();
        assert_eq!(held.handlers[0], ExceptionHandler::typed(2, 9));

        let twice = CatchHandlerList::new(vec![
            ExceptionHandler::CatchAll { address: 3 },
            ExceptionHandler::CatchAll { address: 4 },
        ]);
        assert_eq!(twice.encoded_len(), 2);
        let e = twice.write(&mut vec![]).unwrap_err();
        assert_eq!(e.kind(), crate::dex::error::DexErrorKind::FormatMismatch);
    }
}
