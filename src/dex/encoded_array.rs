//! encoded_array_item: a counted run of encoded values, used for static field
//! initial values.

use crate::dex::block::{Block, BlockArray, ReadBlock};
use crate::dex::error::DexError;
use crate::dex::key::RefTranslator;
use crate::dex::leb::uleb128_len;
use crate::dex::reader::DexReader;
use crate::dex::reference::{RefSlot, ReferenceHolder, UsedId};
use crate::dex::section::{SectionRegistry, SectionType, UsageMarker};
use crate::dex::text::{TextFormat, TextWriter};
use crate::dex::values::{tagged, DexValueBlock, DexValueType};
use crate::dex::write_uleb128;

/// A slot of an [`EncodedArray`]. An empty slot is a placeholder that fills a
/// gap while a sparse array is being populated; one still present at write
/// time is emitted as `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ValueSlot(Option<DexValueBlock>);

impl ValueSlot
{
    pub const PLACEHOLDER: ValueSlot = ValueSlot(None);

    pub fn value(&self) -> Option<&DexValueBlock>
    {
        self.0.as_ref()
    }

    pub fn is_placeholder(&self) -> bool
    {
        self.0.is_none()
    }

    /// The value held, replaced by a fresh one unless it is of `value_type`.
    fn fill(&mut self, value_type: DexValueType) -> &mut DexValueBlock
    {
        if self.0.as_ref().is_some_and(|v| v.value_type() != value_type)
        {
            self.0 = None;
        }
        self.0.get_or_insert_with(|| DexValueBlock::of_type(value_type))
    }
}

impl From<DexValueBlock> for ValueSlot
{
    fn from(value: DexValueBlock) -> Self
    {
        ValueSlot(Some(value))
    }
}

impl Block for ValueSlot
{
    fn encoded_len(&self) -> usize
    {
        self.0.as_ref().map_or(1, |v| v.encoded_len())
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<usize, DexError>
    {
        match &self.0
        {
            Some(v) => v.write(out),
            None => DexValueBlock::null().write(out),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct EncodedArray
{
    slots: BlockArray<ValueSlot>,
}

impl EncodedArray
{
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Declared element count, placeholders included.
    pub fn len(&self) -> usize
    {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.slots.is_empty()
    }

    /// The value at `index`; `None` past the end or for a placeholder.
    pub fn get(&self, index: usize) -> Option<&DexValueBlock>
    {
        self.slots.get(index).and_then(ValueSlot::value)
    }

    pub fn slot(&self, index: usize) -> Option<&ValueSlot>
    {
        self.slots.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValueSlot>
    {
        self.slots.iter()
    }

    pub fn push(&mut self, value: DexValueBlock)
    {
        self.slots.push(ValueSlot::from(value));
    }

    pub fn set(&mut self, index: usize, value: DexValueBlock)
    {
        self.ensure_size(index + 1);
        if let Some(slot) = self.slots.get_mut(index)
        {
            *slot = ValueSlot::from(value);
        }
    }

    fn ensure_size(&mut self, size: usize)
    {
        if self.slots.len() < size
        {
            self.slots.resize_with(size, || ValueSlot::PLACEHOLDER);
        }
    }

    /// Grow with placeholders or cut the tail.
    pub fn set_size(&mut self, size: usize)
    {
        if size < self.slots.len()
        {
            self.slots.truncate(size);
        }
        else
        {
            self.ensure_size(size);
        }
    }

    /// The value of kind `value_type` at `index`, growing the array with
    /// placeholders as needed. A placeholder or a value of another kind in
    /// that slot is replaced by a fresh value.
    pub fn get_or_create(&mut self, value_type: DexValueType, index: usize) -> &mut DexValueBlock
    {
        self.ensure_size(index + 1);
        self.slots.as_mut_slice()[index].fill(value_type)
    }

    /// Reference-valued slot for the kind of pool `section` names.
    pub fn get_or_create_ref(&mut self, section: SectionType, index: usize) -> Result<&mut DexValueBlock, DexError>
    {
        match DexValueType::for_section(section)
        {
            Some(value_type) => Ok(self.get_or_create(value_type, index)),
            None => Err(err!(FormatMismatch, "no encoded value refers to {}", section)),
        }
    }

    /// Shorten the declared size to one past the last real value.
    pub fn trim_null(&mut self)
    {
        let size = self.slots.iter().rposition(|s| !s.is_placeholder()).map_or(0, |i| i + 1);
        if size != self.slots.len()
        {
            self.slots.truncate(size);
        }
    }

    /// Take `other`'s size, then merge each of its values into the slot of
    /// the same index. A kind mismatch replaces the slot.
    pub fn merge(&mut self, other: &EncodedArray, translator: &mut dyn RefTranslator) -> Result<(), DexError>
    {
        self.set_size(other.len());
        for (index, slot) in other.slots.iter().enumerate()
        {
            match slot.value()
            {
                Some(coming) => self.get_or_create(coming.value_type(), index).merge(coming, translator)?,
                None => self.slots.as_mut_slice()[index] = ValueSlot::PLACEHOLDER,
            }
        }
        Ok(())
    }

    /// No placeholder remains.
    pub fn is_complete(&self) -> bool
    {
        self.slots.iter().all(|s| !s.is_placeholder())
    }
}

impl ReadBlock for EncodedArray
{
    fn read(reader: &mut DexReader<'_>) -> Result<Self, DexError>
    {
        let size = reader.read_uleb128()?;
        let mut slots = Vec::with_capacity(size.min(0x1000) as usize);
        for i in 0..size
        {
            let value = DexValueBlock::read(reader).map_err(|e| DexError::with_context(e, format!("element #{}", i)))?;
            slots.push(ValueSlot::from(value));
        }
        Ok(EncodedArray { slots: BlockArray::from(slots) })
    }
}

impl Block for EncodedArray
{
    fn encoded_len(&self) -> usize
    {
        uleb128_len(self.slots.len() as u32) + self.slots.encoded_len()
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<usize, DexError>
    {
        let c = write_uleb128(out, self.slots.len() as u32);
        Ok(c + self.slots.write(out)?)
    }

    fn refresh(&mut self)
    {
        self.slots.refresh();
    }

    fn is_dirty(&self) -> bool
    {
        self.slots.is_dirty()
    }
}

impl ReferenceHolder for EncodedArray
{
    fn used_ids(&self) -> Box<dyn Iterator<Item = UsedId> + '_>
    {
        Box::new(self.slots.iter().filter_map(ValueSlot::value).flat_map(|v| tagged(v, UsageMarker::STATIC_VALUE)))
    }

    fn visit_refs_mut(&mut self, visitor: &mut dyn FnMut(&mut dyn RefSlot))
    {
        for v in self.slots.iter_mut().filter_map(|s| s.0.as_mut())
        {
            v.visit_refs_mut(visitor);
        }
    }
}

impl TextFormat for EncodedArray
{
    fn append(&self, w: &mut TextWriter, sections: &SectionRegistry)
    {
        let parts: Vec<String> = self
            .slots
            .iter()
            .map(|s| s.value().map_or_else(|| "<placeholder>".to_string(), |v| v.to_text(sections)))
            .collect();
        w.line(format!("[{}]", parts.join(", ")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::key::IdentityTranslator;
    use crate::dex::values::DexValue;

    #[test]
    fn sparse_population() {
        let mut a = EncodedArray::new();
        *a.get_or_create(DexValueType::Int, 3) = DexValueBlock::int(9);
        assert_eq!(a.len(), 4);
        assert!((0..3).all(|i| a.slot(i) == Some(&ValueSlot::PLACEHOLDER)));
        assert_eq!(a.get(3).and_then(|v| v.as_i64()), Some(9));

        // a slot of another kind is replaced
        let v = a.get_or_create(DexValueType::Boolean, 3);
        assert_eq!(v.value(), &DexValue::Boolean(false));

        let mut out = vec![];
        a.write(&mut out).unwrap();
        assert_eq!(out, vec![4, 0x1e, 0x1e, 0x1e, 0x1f]);
    }

    #[test]
    fn trim_only_cuts_placeholder_tail() {
        let mut a = EncodedArray::new();
        a.set(1, DexValueBlock::null());
        a.set_size(5);
        a.trim_null();
        assert_eq!(a.len(), 2);
        assert!(a.slot(0).is_some_and(ValueSlot::is_placeholder));
    }

    #[test]
    fn merge_takes_size_and_kinds_of_other() {
        let mut a = EncodedArray::new();
        a.push(DexValueBlock::int(1));
        a.push(DexValueBlock::int(2));
        a.push(DexValueBlock::int(3));
        let mut b = EncodedArray::new();
        b.push(DexValueBlock::long(7));
        b.push(DexValueBlock::int(8));

        a.merge(&b, &mut IdentityTranslator).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn equality_is_element_wise() {
        let mut a = EncodedArray::new();
        a.push(DexValueBlock::int(1));
        let mut b = a.clone();
        assert_eq!(a, b);
        b.push(DexValueBlock::null());
        assert_ne!(a, b);
    }

    #[test]
    fn read_back() {
        let mut a = EncodedArray::new();
        a.push(DexValueBlock::string(2));
        a.push(DexValueBlock::float(0.5));
        let mut out = vec![];
        a.write(&mut out).unwrap();
        let back = EncodedArray::read(&mut DexReader::new(&out)).unwrap();
        assert_eq!(back, a);
        let used: Vec<_> = back.used_ids().map(|u| (u.section, u.index, u.usage)).collect();
        assert_eq!(used, vec![(SectionType::StringId, 2, UsageMarker::STATIC_VALUE)]);
    }
}
