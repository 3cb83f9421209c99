//! References between items.
//!
//! An [`IdRef`] names an entry of an id pool (strings, types, protos, fields,
//! methods, class defs) and is written as that entry's index. A [`DataRef`]
//! names a data item (code, debug info, type list, ...) and is written as a
//! file offset, which the layout pass assigns. Neither caches a pointer: the
//! target is looked up in the [`SectionRegistry`] passed at call time, so pool
//! compaction only has to rewrite indices.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::dex::error::DexError;
use crate::dex::layout::OffsetTable;
use crate::dex::section::{IndexRemap, SectionItem, SectionRegistry, SectionType, UsageMarker};
use crate::dex::NO_INDEX;

/// One edge of the reference graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsedId
{
    pub section: SectionType,
    pub index: u32,
    pub usage: UsageMarker,
}

/// Type-erased access to a reference site, used by whole-file passes.
pub trait RefSlot
{
    fn section(&self) -> SectionType;
    fn index(&self) -> Option<u32>;
    fn usage(&self) -> UsageMarker;
    fn set_index(&mut self, index: Option<u32>);

    /// Pick up the offset the last layout pass assigned to the target.
    fn update_offset(&mut self, _offsets: &OffsetTable) -> Result<(), DexError>
    {
        Ok(())
    }

    fn apply_remap(&mut self, remap: &IndexRemap)
    {
        if let Some(old) = self.index()
        {
            self.set_index(remap.get(old));
        }
    }
}

/// Anything that holds references into the pools.
pub trait ReferenceHolder
{
    /// Every reference held directly, in encoding order.
    fn used_ids(&self) -> Box<dyn Iterator<Item = UsedId> + '_>;

    fn visit_refs_mut(&mut self, visitor: &mut dyn FnMut(&mut dyn RefSlot));
}

pub struct IdRef<T>
{
    index: Option<u32>,
    usage: UsageMarker,
    _item: PhantomData<fn() -> T>,
}

impl<T> IdRef<T>
{
    pub fn new(index: u32, usage: UsageMarker) -> Self
    {
        IdRef { index: Some(index), usage, _item: PhantomData }
    }

    pub fn none(usage: UsageMarker) -> Self
    {
        IdRef { index: None, usage, _item: PhantomData }
    }

    /// From a fixed-width field where `NO_INDEX` means absent.
    pub fn from_raw(raw: u32, usage: UsageMarker) -> Self
    {
        if raw == NO_INDEX { Self::none(usage) } else { Self::new(raw, usage) }
    }

    /// From a ULEB128p1 field where `-1` means absent.
    pub fn from_p1(raw: i32, usage: UsageMarker) -> Self
    {
        if raw < 0 { Self::none(usage) } else { Self::new(raw as u32, usage) }
    }

    pub fn index(&self) -> Option<u32>
    {
        self.index
    }

    pub fn is_present(&self) -> bool
    {
        self.index.is_some()
    }

    pub fn usage(&self) -> UsageMarker
    {
        self.usage
    }

    /// Value for a fixed-width index field; `NO_INDEX` when absent.
    pub fn raw(&self) -> u32
    {
        self.index.unwrap_or(NO_INDEX)
    }

    /// Value for a ULEB128p1 field; `-1` when absent.
    pub fn p1(&self) -> i32
    {
        self.index.map_or(-1, |i| i as i32)
    }

    /// Index to serialize where the format has no absent encoding.
    pub fn required(&self) -> Result<u32, DexError>
    {
        match self.index
        {
            Some(i) => Ok(i),
            None => Err(err!(UnresolvedReference, "required index has no target")),
        }
    }

    pub fn set_target(&mut self, index: u32)
    {
        self.index = Some(index);
    }

    pub fn clear(&mut self)
    {
        self.index = None;
    }

    pub fn used(&self) -> Option<UsedId>
    where
        T: SectionItem,
    {
        self.index.map(|index| UsedId { section: T::SECTION, index, usage: self.usage })
    }

    /// The target item, or `None` when absent or beyond the pool.
    pub fn resolve<'a>(&self, sections: &'a SectionRegistry) -> Option<&'a T>
    where
        T: SectionItem,
    {
        self.index.and_then(|i| T::section(sections).get(i))
    }

    pub fn require<'a>(&self, sections: &'a SectionRegistry) -> Result<&'a T, DexError>
    where
        T: SectionItem,
    {
        sections.require(self.required()?)
    }
}

impl<T> Clone for IdRef<T>
{
    fn clone(&self) -> Self
    {
        *self
    }
}

impl<T> Copy for IdRef<T> {}

impl<T> PartialEq for IdRef<T>
{
    fn eq(&self, other: &Self) -> bool
    {
        self.index == other.index
    }
}

impl<T> Eq for IdRef<T> {}

impl<T> Hash for IdRef<T>
{
    fn hash<H: Hasher>(&self, state: &mut H)
    {
        self.index.hash(state)
    }
}

impl<T> fmt::Debug for IdRef<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self.index
        {
            Some(i) => write!(f, "#{}", i),
            None => f.write_str("#none"),
        }
    }
}

impl<T: SectionItem> RefSlot for IdRef<T>
{
    fn section(&self) -> SectionType
    {
        T::SECTION
    }

    fn index(&self) -> Option<u32>
    {
        self.index
    }

    fn usage(&self) -> UsageMarker
    {
        self.usage
    }

    fn set_index(&mut self, index: Option<u32>)
    {
        self.index = index;
    }
}

pub struct DataRef<T>
{
    index: Option<u32>,
    offset: u32,
    resolved: bool,
    usage: UsageMarker,
    _item: PhantomData<fn() -> T>,
}

impl<T> DataRef<T>
{
    pub fn none(usage: UsageMarker) -> Self
    {
        DataRef { index: None, offset: 0, resolved: true, usage, _item: PhantomData }
    }

    /// A reference whose offset is not known until the next layout.
    pub fn new(index: u32, usage: UsageMarker) -> Self
    {
        DataRef { index: Some(index), offset: 0, resolved: false, usage, _item: PhantomData }
    }

    /// A reference read from a file, already carrying its offset.
    pub fn resolved(index: u32, offset: u32, usage: UsageMarker) -> Self
    {
        DataRef { index: Some(index), offset, resolved: true, usage, _item: PhantomData }
    }

    pub fn index(&self) -> Option<u32>
    {
        self.index
    }

    pub fn is_present(&self) -> bool
    {
        self.index.is_some()
    }

    pub fn usage(&self) -> UsageMarker
    {
        self.usage
    }

    pub fn set_target(&mut self, index: u32)
    {
        if self.index != Some(index)
        {
            self.index = Some(index);
            self.resolved = false;
        }
    }

    pub fn clear(&mut self)
    {
        self.index = None;
        self.offset = 0;
        self.resolved = true;
    }

    /// File offset to serialize; zero when absent.
    pub fn offset(&self) -> Result<u32, DexError>
    {
        match (self.index, self.resolved)
        {
            (None, _) => Ok(0),
            (Some(_), true) => Ok(self.offset),
            (Some(i), false) => Err(err!(UnresolvedReference, "data item #{} has no laid out offset", i)),
        }
    }

    pub fn used(&self) -> Option<UsedId>
    where
        T: SectionItem,
    {
        self.index.map(|index| UsedId { section: T::SECTION, index, usage: self.usage })
    }

    pub fn resolve<'a>(&self, sections: &'a SectionRegistry) -> Option<&'a T>
    where
        T: SectionItem,
    {
        self.index.and_then(|i| T::section(sections).get(i))
    }
}

impl<T> Clone for DataRef<T>
{
    fn clone(&self) -> Self
    {
        *self
    }
}

impl<T> Copy for DataRef<T> {}

impl<T> PartialEq for DataRef<T>
{
    fn eq(&self, other: &Self) -> bool
    {
        self.index == other.index
    }
}

impl<T> Eq for DataRef<T> {}

impl<T> Hash for DataRef<T>
{
    fn hash<H: Hasher>(&self, state: &mut H)
    {
        self.index.hash(state)
    }
}

impl<T> fmt::Debug for DataRef<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match (self.index, self.resolved)
        {
            (Some(i), true) => write!(f, "#{}@0x{:x}", i, self.offset),
            (Some(i), false) => write!(f, "#{}@?", i),
            (None, _) => f.write_str("#none"),
        }
    }
}

impl<T: SectionItem> RefSlot for DataRef<T>
{
    fn section(&self) -> SectionType
    {
        T::SECTION
    }

    fn index(&self) -> Option<u32>
    {
        self.index
    }

    fn usage(&self) -> UsageMarker
    {
        self.usage
    }

    fn set_index(&mut self, index: Option<u32>)
    {
        match index
        {
            Some(i) => self.set_target(i),
            None => self.clear(),
        }
    }

    fn update_offset(&mut self, offsets: &OffsetTable) -> Result<(), DexError>
    {
        if let Some(index) = self.index
        {
            match offsets.offset_of(T::SECTION, index)
            {
                Some(offset) =>
                {
                    self.offset = offset;
                    self.resolved = true;
                }
                None => fail!(UnresolvedReference, "{} #{} was not laid out", T::SECTION, index),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::code::CodeItem;
    use crate::dex::error::DexErrorKind;
    use crate::dex::ids::DexString;

    #[test]
    fn id_ref_raw_forms() {
        let r: IdRef<DexString> = IdRef::from_raw(NO_INDEX, UsageMarker::ID_ITEM);
        assert!(!r.is_present());
        assert_eq!(r.p1(), -1);
        assert_eq!(r.required().unwrap_err().kind(), DexErrorKind::UnresolvedReference);

        let r: IdRef<DexString> = IdRef::from_p1(4, UsageMarker::DEBUG);
        assert_eq!(r.raw(), 4);
        assert_eq!(
            r.used(),
            Some(UsedId { section: SectionType::StringId, index: 4, usage: UsageMarker::DEBUG })
        );
    }

    #[test]
    fn id_ref_resolves_against_registry() {
        let mut reg = SectionRegistry::new();
        reg.strings.append(DexString::from("a"));
        let r: IdRef<DexString> = IdRef::new(0, UsageMarker::INSTRUCTION);
        assert_eq!(r.resolve(&reg).and_then(|s| s.as_str()), Some("a"));
        let r: IdRef<DexString> = IdRef::new(3, UsageMarker::INSTRUCTION);
        assert!(r.resolve(&reg).is_none());
        assert_eq!(r.require(&reg).unwrap_err().kind(), DexErrorKind::IndexOutOfRange);
    }

    #[test]
    fn retargeted_data_ref_needs_layout() {
        let mut r: DataRef<CodeItem> = DataRef::resolved(0, 0x70, UsageMarker::CODE);
        assert_eq!(r.offset().unwrap(), 0x70);
        r.set_target(1);
        assert_eq!(r.offset().unwrap_err().kind(), DexErrorKind::UnresolvedReference);

        let mut offsets = OffsetTable::default();
        offsets.insert(SectionType::Code, 1, 0x100);
        r.update_offset(&offsets).unwrap();
        assert_eq!(r.offset().unwrap(), 0x100);

        r.clear();
        assert_eq!(r.offset().unwrap(), 0);
    }

    #[test]
    fn remap_rewrites_and_drops() {
        let mut r: IdRef<DexString> = IdRef::new(2, UsageMarker::INSTRUCTION);
        let remap = IndexRemap::from_table(vec![None, Some(0), Some(1)]);
        r.apply_remap(&remap);
        assert_eq!(r.index(), Some(1));
        let mut r: IdRef<DexString> = IdRef::new(0, UsageMarker::INSTRUCTION);
        r.apply_remap(&remap);
        assert_eq!(r.index(), None);
    }
}
