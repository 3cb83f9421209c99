//! Index-addressed pools.
//!
//! A [`Section`] owns every item of one kind; everything else refers to those
//! items by position. The [`SectionRegistry`] holds one pool per modelled kind
//! and offers the per-kind dispatch the reachability and remap passes need.

use std::collections::HashMap;
use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::dex::annotations::{AnnotationItem, AnnotationSet, AnnotationSetRefList, AnnotationsDirectory};
use crate::dex::block::Block;
use crate::dex::class_data::ClassData;
use crate::dex::code::CodeItem;
use crate::dex::debug_info::DebugInfo;
use crate::dex::encoded_array::EncodedArray;
use crate::dex::error::DexError;
use crate::dex::ids::{ClassDef, DexString, FieldId, MethodId, ProtoId, TypeId, TypeList};
use crate::dex::reference::{RefSlot, ReferenceHolder, UsedId};

/// Section kinds, with their map-list type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SectionType
{
    Header,
    StringId,
    TypeId,
    ProtoId,
    FieldId,
    MethodId,
    ClassId,
    MapList,
    TypeList,
    AnnotationSetRefList,
    AnnotationSet,
    ClassData,
    Code,
    StringData,
    DebugInfo,
    Annotation,
    EncodedArray,
    AnnotationsDirectory,
}

impl SectionType
{
    pub const ALL: [SectionType; 18] = [
        SectionType::Header,
        SectionType::StringId,
        SectionType::TypeId,
        SectionType::ProtoId,
        SectionType::FieldId,
        SectionType::MethodId,
        SectionType::ClassId,
        SectionType::MapList,
        SectionType::TypeList,
        SectionType::AnnotationSetRefList,
        SectionType::AnnotationSet,
        SectionType::ClassData,
        SectionType::Code,
        SectionType::StringData,
        SectionType::DebugInfo,
        SectionType::Annotation,
        SectionType::EncodedArray,
        SectionType::AnnotationsDirectory,
    ];

    /// Kinds backed by a pool in [`SectionRegistry`]. String data shares the string id pool.
    pub const POOLS: [SectionType; 15] = [
        SectionType::StringId,
        SectionType::TypeId,
        SectionType::ProtoId,
        SectionType::FieldId,
        SectionType::MethodId,
        SectionType::ClassId,
        SectionType::TypeList,
        SectionType::AnnotationSetRefList,
        SectionType::AnnotationSet,
        SectionType::ClassData,
        SectionType::Code,
        SectionType::DebugInfo,
        SectionType::Annotation,
        SectionType::EncodedArray,
        SectionType::AnnotationsDirectory,
    ];

    pub fn map_code(self) -> u16
    {
        match self
        {
            SectionType::Header => 0x0000,
            SectionType::StringId => 0x0001,
            SectionType::TypeId => 0x0002,
            SectionType::ProtoId => 0x0003,
            SectionType::FieldId => 0x0004,
            SectionType::MethodId => 0x0005,
            SectionType::ClassId => 0x0006,
            SectionType::MapList => 0x1000,
            SectionType::TypeList => 0x1001,
            SectionType::AnnotationSetRefList => 0x1002,
            SectionType::AnnotationSet => 0x1003,
            SectionType::ClassData => 0x2000,
            SectionType::Code => 0x2001,
            SectionType::StringData => 0x2002,
            SectionType::DebugInfo => 0x2003,
            SectionType::Annotation => 0x2004,
            SectionType::EncodedArray => 0x2005,
            SectionType::AnnotationsDirectory => 0x2006,
        }
    }

    pub fn from_map_code(code: u16) -> Option<SectionType>
    {
        SectionType::ALL.iter().copied().find(|s| s.map_code() == code)
    }

    pub fn name(self) -> &'static str
    {
        match self
        {
            SectionType::Header => "header",
            SectionType::StringId => "string id",
            SectionType::TypeId => "type id",
            SectionType::ProtoId => "proto id",
            SectionType::FieldId => "field id",
            SectionType::MethodId => "method id",
            SectionType::ClassId => "class def",
            SectionType::MapList => "map list",
            SectionType::TypeList => "type list",
            SectionType::AnnotationSetRefList => "annotation set ref list",
            SectionType::AnnotationSet => "annotation set",
            SectionType::ClassData => "class data",
            SectionType::Code => "code item",
            SectionType::StringData => "string data",
            SectionType::DebugInfo => "debug info",
            SectionType::Annotation => "annotation",
            SectionType::EncodedArray => "encoded array",
            SectionType::AnnotationsDirectory => "annotations directory",
        }
    }

    /// Fixed-size entries listed in the header's id tables.
    pub fn is_id_section(self) -> bool
    {
        matches!(
            self,
            SectionType::StringId
                | SectionType::TypeId
                | SectionType::ProtoId
                | SectionType::FieldId
                | SectionType::MethodId
                | SectionType::ClassId
        )
    }

    pub fn alignment(self) -> usize
    {
        match self
        {
            SectionType::StringData
            | SectionType::ClassData
            | SectionType::DebugInfo
            | SectionType::Annotation
            | SectionType::EncodedArray => 1,
            _ => 4,
        }
    }
}

impl fmt::Display for SectionType
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Which subsystem holds a reference. Reachability records the union per item.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct UsageMarker: u16 {
        const DEFINITION = 0x0001;
        const ID_ITEM = 0x0002;
        const INSTRUCTION = 0x0004;
        const DEBUG = 0x0008;
        const ANNOTATION = 0x0010;
        const STATIC_VALUE = 0x0020;
        const CATCH = 0x0040;
        const CODE = 0x0080;
        const TYPE_LIST = 0x0100;
    }
}

/// Old-index to new-index table produced by compaction and reordering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexRemap
{
    table: Vec<Option<u32>>,
}

impl IndexRemap
{
    pub fn identity(len: usize) -> Self
    {
        IndexRemap { table: (0..len as u32).map(Some).collect() }
    }

    pub fn from_table(table: Vec<Option<u32>>) -> Self
    {
        IndexRemap { table }
    }

    /// New index of `old`, or `None` when it was removed.
    pub fn get(&self, old: u32) -> Option<u32>
    {
        self.table.get(old as usize).copied().flatten()
    }

    pub fn len(&self) -> usize
    {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.table.is_empty()
    }

    pub fn is_identity(&self) -> bool
    {
        self.table.iter().enumerate().all(|(i, n)| *n == Some(i as u32))
    }

    pub fn removed(&self) -> usize
    {
        self.table.iter().filter(|n| n.is_none()).count()
    }
}

#[derive(Debug, Clone)]
pub struct Section<T>
{
    items: Vec<T>,
    usage: Vec<UsageMarker>,
}

impl<T> Default for Section<T>
{
    fn default() -> Self
    {
        Section { items: Vec::new(), usage: Vec::new() }
    }
}

impl<T: PartialEq> PartialEq for Section<T>
{
    fn eq(&self, other: &Self) -> bool
    {
        self.items == other.items
    }
}

impl<T> Section<T>
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn len(&self) -> usize
    {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.items.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&T>
    {
        self.items.get(index as usize)
    }

    pub fn get_mut(&mut self, index: u32) -> Option<&mut T>
    {
        self.items.get_mut(index as usize)
    }

    /// Like `get`, for call sites that need the target to exist.
    pub fn require(&self, index: u32) -> Result<&T, DexError>
    {
        match self.items.get(index as usize)
        {
            Some(item) => Ok(item),
            None => Err(err!(IndexOutOfRange, "index {} beyond pool of {}", index, self.items.len())),
        }
    }

    pub fn append(&mut self, item: T) -> u32
    {
        self.items.push(item);
        self.usage.push(UsageMarker::empty());
        (self.items.len() - 1) as u32
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T>
    {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T>
    {
        self.items.iter_mut()
    }

    pub fn position(&self, pred: impl FnMut(&T) -> bool) -> Option<u32>
    {
        self.items.iter().position(pred).map(|i| i as u32)
    }

    pub fn usage(&self, index: u32) -> Option<UsageMarker>
    {
        self.usage.get(index as usize).copied()
    }

    /// Record a usage; returns true when the item had no usage before.
    pub fn mark(&mut self, index: u32, usage: UsageMarker) -> Result<bool, DexError>
    {
        let len = self.items.len();
        match self.usage.get_mut(index as usize)
        {
            Some(u) =>
            {
                let first = u.is_empty();
                *u |= usage;
                Ok(first)
            }
            None => Err(err!(IndexOutOfRange, "index {} beyond pool of {}", index, len)),
        }
    }

    pub fn clear_usage(&mut self)
    {
        self.usage.iter_mut().for_each(|u| *u = UsageMarker::empty());
    }

    /// Drop every item without a recorded usage, keeping relative order.
    pub fn compact(&mut self) -> IndexRemap
    {
        let mut table = Vec::with_capacity(self.items.len());
        let mut next = 0u32;
        for u in &self.usage
        {
            if u.is_empty()
            {
                table.push(None);
            }
            else
            {
                table.push(Some(next));
                next += 1;
            }
        }
        let items = std::mem::take(&mut self.items);
        let usage = std::mem::take(&mut self.usage);
        for (item, u) in items.into_iter().zip(usage)
        {
            if !u.is_empty()
            {
                self.items.push(item);
                self.usage.push(u);
            }
        }
        IndexRemap::from_table(table)
    }

    /// Rearrange so that `order[new] == old`. Indices missing from `order` are dropped.
    pub fn reorder(&mut self, order: &[u32]) -> Result<IndexRemap, DexError>
    {
        let mut table = vec![None; self.items.len()];
        for (new, &old) in order.iter().enumerate()
        {
            match table.get_mut(old as usize)
            {
                Some(slot) if slot.is_none() => *slot = Some(new as u32),
                Some(_) => fail!(FormatMismatch, "index {} listed twice in reorder", old),
                None => fail!(IndexOutOfRange, "reorder index {} beyond pool of {}", old, self.items.len()),
            }
        }
        let mut items: Vec<Option<T>> = std::mem::take(&mut self.items).into_iter().map(Some).collect();
        let usage = std::mem::take(&mut self.usage);
        for &old in order
        {
            if let Some(item) = items[old as usize].take()
            {
                self.items.push(item);
                self.usage.push(usage[old as usize]);
            }
        }
        Ok(IndexRemap::from_table(table))
    }

    pub fn truncate(&mut self, len: usize)
    {
        self.items.truncate(len);
        self.usage.truncate(len);
    }
}

impl<T: PartialEq> Section<T>
{
    pub fn find(&self, item: &T) -> Option<u32>
    {
        self.position(|i| i == item)
    }

    /// Index of an equal item, appending `item` when none exists.
    pub fn intern(&mut self, item: T) -> u32
    {
        match self.find(&item)
        {
            Some(index) => index,
            None => self.append(item),
        }
    }
}

/// Types stored in a [`SectionRegistry`] pool.
pub trait SectionItem: Sized
{
    const SECTION: SectionType;

    fn section(sections: &SectionRegistry) -> &Section<Self>;
    fn section_mut(sections: &mut SectionRegistry) -> &mut Section<Self>;
}

macro_rules! section_item {
    ($ty:ty, $kind:ident, $field:ident) => {
        impl SectionItem for $ty
        {
            const SECTION: SectionType = SectionType::$kind;

            fn section(sections: &SectionRegistry) -> &Section<Self>
            {
                &sections.$field
            }

            fn section_mut(sections: &mut SectionRegistry) -> &mut Section<Self>
            {
                &mut sections.$field
            }
        }
    };
}

/// Run `$body` with `$s` bound to the pool for `$kind`, or evaluate `$none`
/// for kinds that have no pool.
macro_rules! with_section {
    ($reg:expr, $kind:expr, |$s:ident| $body:expr, $none:expr) => {
        match $kind
        {
            SectionType::StringId | SectionType::StringData => { let $s = &$reg.strings; $body }
            SectionType::TypeId => { let $s = &$reg.types; $body }
            SectionType::ProtoId => { let $s = &$reg.protos; $body }
            SectionType::FieldId => { let $s = &$reg.fields; $body }
            SectionType::MethodId => { let $s = &$reg.methods; $body }
            SectionType::ClassId => { let $s = &$reg.class_defs; $body }
            SectionType::TypeList => { let $s = &$reg.type_lists; $body }
            SectionType::AnnotationSetRefList => { let $s = &$reg.annotation_set_ref_lists; $body }
            SectionType::AnnotationSet => { let $s = &$reg.annotation_sets; $body }
            SectionType::ClassData => { let $s = &$reg.class_data; $body }
            SectionType::Code => { let $s = &$reg.code_items; $body }
            SectionType::DebugInfo => { let $s = &$reg.debug_infos; $body }
            SectionType::Annotation => { let $s = &$reg.annotations; $body }
            SectionType::EncodedArray => { let $s = &$reg.encoded_arrays; $body }
            SectionType::AnnotationsDirectory => { let $s = &$reg.annotations_directories; $body }
            SectionType::Header | SectionType::MapList => $none,
        }
    };
}

macro_rules! with_section_mut {
    ($reg:expr, $kind:expr, |$s:ident| $body:expr, $none:expr) => {
        match $kind
        {
            SectionType::StringId | SectionType::StringData => { let $s = &mut $reg.strings; $body }
            SectionType::TypeId => { let $s = &mut $reg.types; $body }
            SectionType::ProtoId => { let $s = &mut $reg.protos; $body }
            SectionType::FieldId => { let $s = &mut $reg.fields; $body }
            SectionType::MethodId => { let $s = &mut $reg.methods; $body }
            SectionType::ClassId => { let $s = &mut $reg.class_defs; $body }
            SectionType::TypeList => { let $s = &mut $reg.type_lists; $body }
            SectionType::AnnotationSetRefList => { let $s = &mut $reg.annotation_set_ref_lists; $body }
            SectionType::AnnotationSet => { let $s = &mut $reg.annotation_sets; $body }
            SectionType::ClassData => { let $s = &mut $reg.class_data; $body }
            SectionType::Code => { let $s = &mut $reg.code_items; $body }
            SectionType::DebugInfo => { let $s = &mut $reg.debug_infos; $body }
            SectionType::Annotation => { let $s = &mut $reg.annotations; $body }
            SectionType::EncodedArray => { let $s = &mut $reg.encoded_arrays; $body }
            SectionType::AnnotationsDirectory => { let $s = &mut $reg.annotations_directories; $body }
            SectionType::Header | SectionType::MapList => $none,
        }
    };
}

/// All pools of one DEX image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SectionRegistry
{
    pub strings: Section<DexString>,
    pub types: Section<TypeId>,
    pub protos: Section<ProtoId>,
    pub fields: Section<FieldId>,
    pub methods: Section<MethodId>,
    pub class_defs: Section<ClassDef>,
    pub type_lists: Section<TypeList>,
    pub annotation_set_ref_lists: Section<AnnotationSetRefList>,
    pub annotation_sets: Section<AnnotationSet>,
    pub class_data: Section<ClassData>,
    pub code_items: Section<CodeItem>,
    pub debug_infos: Section<DebugInfo>,
    pub annotations: Section<AnnotationItem>,
    pub encoded_arrays: Section<EncodedArray>,
    pub annotations_directories: Section<AnnotationsDirectory>,
}

section_item!(DexString, StringId, strings);
section_item!(TypeId, TypeId, types);
section_item!(ProtoId, ProtoId, protos);
section_item!(FieldId, FieldId, fields);
section_item!(MethodId, MethodId, methods);
section_item!(ClassDef, ClassId, class_defs);
section_item!(TypeList, TypeList, type_lists);
section_item!(AnnotationSetRefList, AnnotationSetRefList, annotation_set_ref_lists);
section_item!(AnnotationSet, AnnotationSet, annotation_sets);
section_item!(ClassData, ClassData, class_data);
section_item!(CodeItem, Code, code_items);
section_item!(DebugInfo, DebugInfo, debug_infos);
section_item!(AnnotationItem, Annotation, annotations);
section_item!(EncodedArray, EncodedArray, encoded_arrays);
section_item!(AnnotationsDirectory, AnnotationsDirectory, annotations_directories);

impl SectionRegistry
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn get<T: SectionItem>(&self, index: u32) -> Option<&T>
    {
        T::section(self).get(index)
    }

    pub fn require<T: SectionItem>(&self, index: u32) -> Result<&T, DexError>
    {
        T::section(self).require(index).map_err(|e| DexError::with_context(e, T::SECTION.name()))
    }

    pub fn len(&self, kind: SectionType) -> usize
    {
        with_section!(self, kind, |s| s.len(), 0)
    }

    pub fn is_empty(&self) -> bool
    {
        SectionType::POOLS.iter().all(|&k| self.len(k) == 0)
    }

    pub fn usage(&self, kind: SectionType, index: u32) -> Option<UsageMarker>
    {
        with_section!(self, kind, |s| s.usage(index), None)
    }

    pub fn mark(&mut self, kind: SectionType, index: u32) -> Result<bool, DexError>
    {
        self.mark_with(kind, index, UsageMarker::DEFINITION)
    }

    pub fn mark_with(&mut self, kind: SectionType, index: u32, usage: UsageMarker) -> Result<bool, DexError>
    {
        with_section_mut!(
            self,
            kind,
            |s| s.mark(index, usage).map_err(|e| DexError::with_context(e, kind.name())),
            Ok(false)
        )
    }

    pub fn clear_usage(&mut self)
    {
        for kind in SectionType::POOLS
        {
            with_section_mut!(self, kind, |s| s.clear_usage(), ())
        }
    }

    /// References held directly by one pool item.
    pub fn used_ids_of(&self, kind: SectionType, index: u32) -> Result<Vec<UsedId>, DexError>
    {
        with_section!(
            self,
            kind,
            |s| match s.get(index)
            {
                Some(item) => Ok(item.used_ids().collect()),
                None => Err(err!(IndexOutOfRange, "{} {} beyond pool of {}", kind, index, s.len())),
            },
            Ok(Vec::new())
        )
    }

    /// Every reference slot held by any pool item.
    pub fn visit_refs_mut(&mut self, visitor: &mut dyn FnMut(&mut dyn RefSlot))
    {
        for kind in SectionType::POOLS
        {
            with_section_mut!(
                self,
                kind,
                |s| {
                    for item in s.iter_mut()
                    {
                        item.visit_refs_mut(visitor);
                    }
                },
                ()
            )
        }
    }

    /// Compact every pool, returning the remaps of the pools that changed.
    pub fn compact_all(&mut self) -> HashMap<SectionType, IndexRemap>
    {
        let mut remaps = HashMap::new();
        for kind in SectionType::POOLS
        {
            let remap = with_section_mut!(self, kind, |s| s.compact(), IndexRemap::default());
            if !remap.is_identity()
            {
                remaps.insert(kind, remap);
            }
        }
        remaps
    }

    pub fn reorder(&mut self, kind: SectionType, order: &[u32]) -> Result<IndexRemap, DexError>
    {
        with_section_mut!(self, kind, |s| s.reorder(order), Ok(IndexRemap::default()))
    }

    pub fn refresh_all(&mut self)
    {
        for kind in SectionType::POOLS
        {
            with_section_mut!(
                self,
                kind,
                |s| {
                    for item in s.iter_mut()
                    {
                        item.refresh();
                    }
                },
                ()
            )
        }
        self.sort_annotation_sets();
    }

    /// Annotation sets list their entries by increasing annotation type.
    /// Type indices move under sorting and merging, so this needs the pools.
    pub fn sort_annotation_sets(&mut self)
    {
        let annotations = &self.annotations;
        for set in self.annotation_sets.iter_mut()
        {
            set.entries.sort_by_key(|e| {
                e.index().and_then(|i| annotations.get(i)).map(|a| a.annotation.annotation_type.raw())
            });
        }
    }

    /// Encoded size of every item in a pool, in pool order.
    pub fn item_sizes(&self, kind: SectionType) -> Vec<usize>
    {
        with_section!(self, kind, |s| s.iter().map(|i| i.encoded_len()).collect(), Vec::new())
    }

    /// Encode one pool item. String ids are written by the layout pass, as
    /// only it knows where the string data lands.
    pub fn write_item(&self, kind: SectionType, index: u32, out: &mut Vec<u8>) -> Result<usize, DexError>
    {
        with_section!(
            self,
            kind,
            |s| match s.get(index)
            {
                Some(item) => item.write(out).map_err(|e| DexError::with_context(e, format!("{} #{}", kind, index))),
                None => Err(err!(IndexOutOfRange, "{} {} beyond pool of {}", kind, index, s.len())),
            },
            Err(err!(FormatMismatch, "{} is not a pool", kind))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_codes_round_trip() {
        for kind in SectionType::ALL {
            assert_eq!(SectionType::from_map_code(kind.map_code()), Some(kind));
        }
        assert_eq!(SectionType::from_map_code(0x0007), None);
        assert_eq!(SectionType::Code.map_code(), 0x2001);
    }

    #[test]
    fn compact_drops_unmarked_items() {
        let mut s: Section<&str> = Section::new();
        for v in ["a", "b", "c", "d"] {
            s.append(v);
        }
        assert!(s.mark(1, UsageMarker::INSTRUCTION).unwrap());
        assert!(!s.mark(1, UsageMarker::DEBUG).unwrap());
        s.mark(3, UsageMarker::ANNOTATION).unwrap();
        assert_eq!(s.usage(1), Some(UsageMarker::INSTRUCTION | UsageMarker::DEBUG));

        let remap = s.compact();
        assert_eq!(s.iter().copied().collect::<Vec<_>>(), vec!["b", "d"]);
        assert_eq!(remap.get(0), None);
        assert_eq!(remap.get(1), Some(0));
        assert_eq!(remap.get(3), Some(1));
        assert_eq!(remap.removed(), 2);
    }

    #[test]
    fn lookups_beyond_pool_are_absent_or_errors() {
        let mut s: Section<u8> = Section::new();
        s.append(7);
        assert_eq!(s.get(1), None);
        assert!(s.require(1).is_err());
        assert!(s.mark(4, UsageMarker::DEFINITION).is_err());
    }

    #[test]
    fn reorder_produces_inverse_table() {
        let mut s: Section<char> = Section::new();
        for c in ['x', 'y', 'z'] {
            s.append(c);
        }
        let remap = s.reorder(&[2, 0, 1]).unwrap();
        assert_eq!(s.iter().copied().collect::<String>(), "zxy");
        assert_eq!(remap.get(2), Some(0));
        assert_eq!(remap.get(0), Some(1));
        assert!(s.reorder(&[0, 0]).is_err());
    }

    #[test]
    fn intern_reuses_equal_items() {
        let mut s: Section<u32> = Section::new();
        assert_eq!(s.intern(5), 0);
        assert_eq!(s.intern(6), 1);
        assert_eq!(s.intern(5), 0);
        assert_eq!(s.len(), 2);
    }
}
