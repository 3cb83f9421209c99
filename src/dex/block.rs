//! Structural nodes.
//!
//! Every element of a DEX image is a [`Block`]: it knows how many bytes it
//! encodes to, writes itself, and recomputes any derived header fields in
//! [`Block::refresh`]. Reading goes through [`ReadBlock`] so the pool registry
//! carried by [`DexReader`] is available to items that reference other items.
//!
//! Blocks do not point back at their parents. A parent that needs the offset
//! of one of its children asks the owning [`BlockArray`], which sums the sizes
//! of the preceding siblings.

use crate::dex::error::DexError;
use crate::dex::reader::DexReader;

pub trait Block
{
    /// Bytes `write` would emit right now.
    fn encoded_len(&self) -> usize;

    fn write(&self, out: &mut Vec<u8>) -> Result<usize, DexError>;

    /// Recompute fields that are a function of child state.
    fn refresh(&mut self) {}

    /// Whether a structural edit happened since the last `refresh`.
    fn is_dirty(&self) -> bool
    {
        false
    }
}

pub trait ReadBlock: Sized
{
    fn read(reader: &mut DexReader<'_>) -> Result<Self, DexError>;
}

/// Ordered, slot-addressed children of a block.
#[derive(Debug, Clone)]
pub struct BlockArray<T>
{
    items: Vec<T>,
    dirty: bool,
}

impl<T> Default for BlockArray<T>
{
    fn default() -> Self
    {
        BlockArray { items: Vec::new(), dirty: false }
    }
}

impl<T: PartialEq> PartialEq for BlockArray<T>
{
    fn eq(&self, other: &Self) -> bool
    {
        self.items == other.items
    }
}

impl<T: Eq> Eq for BlockArray<T> {}

impl<T: std::hash::Hash> std::hash::Hash for BlockArray<T>
{
    fn hash<H: std::hash::Hasher>(&self, state: &mut H)
    {
        self.items.hash(state)
    }
}

impl<T> From<Vec<T>> for BlockArray<T>
{
    fn from(items: Vec<T>) -> Self
    {
        BlockArray { items, dirty: false }
    }
}

impl<T> BlockArray<T>
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

    pub fn get(&self, slot: usize) -> Option<&T>
    {
        self.items.get(slot)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut T>
    {
        self.dirty = true;
        self.items.get_mut(slot)
    }

    pub fn push(&mut self, item: T) -> usize
    {
        self.dirty = true;
        self.items.push(item);
        self.items.len() - 1
    }

    /// Insert at `slot`, shifting later children up by one.
    pub fn insert(&mut self, slot: usize, item: T)
    {
        self.dirty = true;
        self.items.insert(slot.min(self.items.len()), item);
    }

    pub fn remove(&mut self, slot: usize) -> Option<T>
    {
        if slot >= self.items.len()
        {
            return None;
        }
        self.dirty = true;
        Some(self.items.remove(slot))
    }

    pub fn truncate(&mut self, len: usize)
    {
        if len < self.items.len()
        {
            self.dirty = true;
            self.items.truncate(len);
        }
    }

    pub fn resize_with(&mut self, len: usize, f: impl FnMut() -> T)
    {
        if len != self.items.len()
        {
            self.dirty = true;
            self.items.resize_with(len, f);
        }
    }

    pub fn clear(&mut self)
    {
        self.truncate(0);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T>
    {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T>
    {
        self.dirty = true;
        self.items.iter_mut()
    }

    pub fn as_slice(&self) -> &[T]
    {
        &self.items
    }

    pub fn as_mut_slice(&mut self) -> &mut [T]
    {
        self.dirty = true;
        &mut self.items
    }

    pub fn into_vec(self) -> Vec<T>
    {
        self.items
    }

    pub fn mark_dirty(&mut self)
    {
        self.dirty = true;
    }
}

impl<T: Block> BlockArray<T>
{
    /// Offset of `slot` relative to the start of the first child.
    pub fn offset_of(&self, slot: usize) -> usize
    {
        self.items.iter().take(slot).map(Block::encoded_len).sum()
    }

    /// Slot whose encoding starts exactly at `offset`, if any.
    pub fn slot_at_offset(&self, offset: usize) -> Option<usize>
    {
        let mut at = 0;
        for (slot, item) in self.items.iter().enumerate()
        {
            if at == offset
            {
                return Some(slot);
            }
            at += item.encoded_len();
        }
        None
    }
}

impl<T: Block> Block for BlockArray<T>
{
    fn encoded_len(&self) -> usize
    {
        self.items.iter().map(Block::encoded_len).sum()
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<usize, DexError>
    {
        let mut c = 0;
        for item in &self.items
        {
            c += item.write(out)?;
        }
        Ok(c)
    }

    fn refresh(&mut self)
    {
        for item in self.items.iter_mut()
        {
            item.refresh();
        }
        self.dirty = false;
    }

    fn is_dirty(&self) -> bool
    {
        self.dirty || self.items.iter().any(Block::is_dirty)
    }
}

impl<'a, T> IntoIterator for &'a BlockArray<T>
{
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter
    {
        self.items.iter()
    }
}
