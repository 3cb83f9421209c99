/* Id section items and the small data items they point at */

use std::cmp::Ordering;
use std::fmt;

use bitflags::bitflags;
use cesu8::{from_java_cesu8, to_java_cesu8};

use crate::dex::annotations::AnnotationsDirectory;
use crate::dex::block::{Block, ReadBlock};
use crate::dex::class_data::ClassData;
use crate::dex::encoded_array::EncodedArray;
use crate::dex::error::DexError;
use crate::dex::leb::uleb128_len;
use crate::dex::reader::DexReader;
use crate::dex::reference::{DataRef, IdRef, RefSlot, ReferenceHolder, UsedId};
use crate::dex::section::UsageMarker;
use crate::dex::{write_u1, write_u2, write_u4, write_uleb128, write_x};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessFlags: u32 {
        const PUBLIC = 0x1;
        const PRIVATE = 0x2;
        const PROTECTED = 0x4;
        const STATIC = 0x8;
        const FINAL = 0x10;
        const SYNCHRONIZED = 0x20;
        const VOLATILE = 0x40;
        const BRIDGE = 0x40;
        const TRANSIENT = 0x80;
        const VARARGS = 0x80;
        const NATIVE = 0x100;
        const INTERFACE = 0x200;
        const ABSTRACT = 0x400;
        const STRICT = 0x800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const CONSTRUCTOR = 0x10000;
        const DECLARED_SYNCHRONIZED = 0x20000;
    }
}

/// Write an index into a u2 field, failing if it does not fit.
pub(crate) fn write_index_u2<T>(out: &mut Vec<u8>, r: &IdRef<T>) -> Result<usize, DexError>
{
    let index = r.required()?;
    if index > u16::MAX as u32
    {
        fail!(IndexOutOfRange, "index {} does not fit a u2 field", index);
    }
    Ok(write_u2(out, index as u16))
}

/// A string_data_item. Strings that are not valid MUTF-8 are kept as raw bytes.
#[derive(Debug, Eq, PartialEq, Clone, Hash)]
pub enum DexString
{
    Decoded(String),
    Raw(u32, Vec<u8>),
}

impl DexString
{
    pub fn as_str(&self) -> Option<&str>
    {
        match self
        {
            DexString::Decoded(s) => Some(s),
            DexString::Raw(_, _) => None,
        }
    }

    pub fn to_string_lossy(&self) -> String
    {
        match self
        {
            DexString::Decoded(s) => s.clone(),
            DexString::Raw(_, v) => String::from_utf8_lossy(v).into_owned(),
        }
    }

    /// Length in UTF-16 code units, as stored in the item header.
    pub fn utf16_len(&self) -> u32
    {
        match self
        {
            DexString::Decoded(s) => s.encode_utf16().count() as u32,
            DexString::Raw(size, _) => *size,
        }
    }

    fn encoded_bytes(&self) -> std::borrow::Cow<'_, [u8]>
    {
        match self
        {
            DexString::Decoded(s) => to_java_cesu8(s),
            DexString::Raw(_, v) => std::borrow::Cow::Borrowed(v),
        }
    }

    /// Order used by the string id section: by UTF-16 code units.
    pub fn cmp_utf16(&self, other: &DexString) -> Ordering
    {
        match (self, other)
        {
            (DexString::Decoded(a), DexString::Decoded(b)) => a.encode_utf16().cmp(b.encode_utf16()),
            _ => self.encoded_bytes().cmp(&other.encoded_bytes()),
        }
    }
}

impl From<&str> for DexString
{
    fn from(s: &str) -> Self
    {
        DexString::Decoded(s.to_string())
    }
}

impl fmt::Display for DexString
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(&self.to_string_lossy())
    }
}

impl ReadBlock for DexString
{
    fn read(reader: &mut DexReader<'_>) -> Result<Self, DexError>
    {
        let utf16_size = reader.read_uleb128()?;
        let mut v = vec![];
        loop
        {
            let u = reader.read_u1()?;
            if u != 0 { v.push(u); } else { break; }
        }

        Ok(match from_java_cesu8(v.as_slice())
        {
            Ok(converted) if converted.encode_utf16().count() as u32 == utf16_size => DexString::Decoded(converted.into_owned()),
            _ => DexString::Raw(utf16_size, v),
        })
    }
}

impl Block for DexString
{
    fn encoded_len(&self) -> usize
    {
        uleb128_len(self.utf16_len()) + self.encoded_bytes().len() + 1
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<usize, DexError>
    {
        let mut c = write_uleb128(out, self.utf16_len());
        c += write_x(out, &self.encoded_bytes());
        c += write_u1(out, 0);
        Ok(c)
    }
}

impl ReferenceHolder for DexString
{
    fn used_ids(&self) -> Box<dyn Iterator<Item = UsedId> + '_>
    {
        Box::new(std::iter::empty())
    }

    fn visit_refs_mut(&mut self, _visitor: &mut dyn FnMut(&mut dyn RefSlot)) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId
{
    pub descriptor: IdRef<DexString>,
}

impl TypeId
{
    pub fn new(descriptor: u32) -> Self
    {
        TypeId { descriptor: IdRef::new(descriptor, UsageMarker::ID_ITEM) }
    }
}

impl ReadBlock for TypeId
{
    fn read(reader: &mut DexReader<'_>) -> Result<Self, DexError>
    {
        Ok(TypeId { descriptor: IdRef::new(reader.read_u4()?, UsageMarker::ID_ITEM) })
    }
}

impl Block for TypeId
{
    fn encoded_len(&self) -> usize
    {
        4
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<usize, DexError>
    {
        Ok(write_u4(out, self.descriptor.required()?))
    }
}

impl ReferenceHolder for TypeId
{
    fn used_ids(&self) -> Box<dyn Iterator<Item = UsedId> + '_>
    {
        Box::new(self.descriptor.used().into_iter())
    }

    fn visit_refs_mut(&mut self, visitor: &mut dyn FnMut(&mut dyn RefSlot))
    {
        visitor(&mut self.descriptor);
    }
}

/// A type_list: u4 size followed by u2 type indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TypeList
{
    pub types: Vec<IdRef<TypeId>>,
}

impl TypeList
{
    pub fn new(types: &[u32]) -> Self
    {
        TypeList { types: types.iter().map(|&t| IdRef::new(t, UsageMarker::TYPE_LIST)).collect() }
    }

    pub fn len(&self) -> usize
    {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.types.is_empty()
    }
}

impl ReadBlock for TypeList
{
    fn read(reader: &mut DexReader<'_>) -> Result<Self, DexError>
    {
        let size = reader.read_u4()?;
        let mut types = Vec::with_capacity(size.min(0x1000) as usize);
        for _ in 0..size
        {
            types.push(IdRef::new(reader.read_u2()? as u32, UsageMarker::TYPE_LIST));
        }
        Ok(TypeList { types })
    }
}

impl Block for TypeList
{
    fn encoded_len(&self) -> usize
    {
        4 + 2 * self.types.len()
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<usize, DexError>
    {
        let mut c = write_u4(out, self.types.len() as u32);
        for t in &self.types
        {
            c += write_index_u2(out, t)?;
        }
        Ok(c)
    }
}

impl ReferenceHolder for TypeList
{
    fn used_ids(&self) -> Box<dyn Iterator<Item = UsedId> + '_>
    {
        Box::new(self.types.iter().filter_map(IdRef::used))
    }

    fn visit_refs_mut(&mut self, visitor: &mut dyn FnMut(&mut dyn RefSlot))
    {
        for t in self.types.iter_mut()
        {
            visitor(t);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtoId
{
    pub shorty: IdRef<DexString>,
    pub return_type: IdRef<TypeId>,
    pub parameters: DataRef<TypeList>,
}

impl ReadBlock for ProtoId
{
    fn read(reader: &mut DexReader<'_>) -> Result<Self, DexError>
    {
        Ok(ProtoId {
            shorty: IdRef::new(reader.read_u4()?, UsageMarker::ID_ITEM),
            return_type: IdRef::new(reader.read_u4()?, UsageMarker::ID_ITEM),
            parameters: reader.read_data_ref(UsageMarker::ID_ITEM)?,
        })
    }
}

impl Block for ProtoId
{
    fn encoded_len(&self) -> usize
    {
        12
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<usize, DexError>
    {
        let mut c = write_u4(out, self.shorty.required()?);
        c += write_u4(out, self.return_type.required()?);
        c += write_u4(out, self.parameters.offset()?);
        Ok(c)
    }
}

impl ReferenceHolder for ProtoId
{
    fn used_ids(&self) -> Box<dyn Iterator<Item = UsedId> + '_>
    {
        Box::new(self.shorty.used().into_iter().chain(self.return_type.used()).chain(self.parameters.used()))
    }

    fn visit_refs_mut(&mut self, visitor: &mut dyn FnMut(&mut dyn RefSlot))
    {
        visitor(&mut self.shorty);
        visitor(&mut self.return_type);
        visitor(&mut self.parameters);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldId
{
    pub class: IdRef<TypeId>,
    pub field_type: IdRef<TypeId>,
    pub name: IdRef<DexString>,
}

impl ReadBlock for FieldId
{
    fn read(reader: &mut DexReader<'_>) -> Result<Self, DexError>
    {
        Ok(FieldId {
            class: IdRef::new(reader.read_u2()? as u32, UsageMarker::ID_ITEM),
            field_type: IdRef::new(reader.read_u2()? as u32, UsageMarker::ID_ITEM),
            name: IdRef::new(reader.read_u4()?, UsageMarker::ID_ITEM),
        })
    }
}

impl Block for FieldId
{
    fn encoded_len(&self) -> usize
    {
        8
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<usize, DexError>
    {
        let mut c = write_index_u2(out, &self.class)?;
        c += write_index_u2(out, &self.field_type)?;
        c += write_u4(out, self.name.required()?);
        Ok(c)
    }
}

impl ReferenceHolder for FieldId
{
    fn used_ids(&self) -> Box<dyn Iterator<Item = UsedId> + '_>
    {
        Box::new(self.class.used().into_iter().chain(self.field_type.used()).chain(self.name.used()))
    }

    fn visit_refs_mut(&mut self, visitor: &mut dyn FnMut(&mut dyn RefSlot))
    {
        visitor(&mut self.class);
        visitor(&mut self.field_type);
        visitor(&mut self.name);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId
{
    pub class: IdRef<TypeId>,
    pub proto: IdRef<ProtoId>,
    pub name: IdRef<DexString>,
}

impl ReadBlock for MethodId
{
    fn read(reader: &mut DexReader<'_>) -> Result<Self, DexError>
    {
        Ok(MethodId {
            class: IdRef::new(reader.read_u2()? as u32, UsageMarker::ID_ITEM),
            proto: IdRef::new(reader.read_u2()? as u32, UsageMarker::ID_ITEM),
            name: IdRef::new(reader.read_u4()?, UsageMarker::ID_ITEM),
        })
    }
}

impl Block for MethodId
{
    fn encoded_len(&self) -> usize
    {
        8
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<usize, DexError>
    {
        let mut c = write_index_u2(out, &self.class)?;
        c += write_index_u2(out, &self.proto)?;
        c += write_u4(out, self.name.required()?);
        Ok(c)
    }
}

impl ReferenceHolder for MethodId
{
    fn used_ids(&self) -> Box<dyn Iterator<Item = UsedId> + '_>
    {
        Box::new(self.class.used().into_iter().chain(self.proto.used()).chain(self.name.used()))
    }

    fn visit_refs_mut(&mut self, visitor: &mut dyn FnMut(&mut dyn RefSlot))
    {
        visitor(&mut self.class);
        visitor(&mut self.proto);
        visitor(&mut self.name);
    }
}

/// A class_def_item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassDef
{
    pub class: IdRef<TypeId>,
    pub access_flags: AccessFlags,
    pub superclass: IdRef<TypeId>,
    pub interfaces: DataRef<TypeList>,
    pub source_file: IdRef<DexString>,
    pub annotations: DataRef<AnnotationsDirectory>,
    pub class_data: DataRef<ClassData>,
    pub static_values: DataRef<EncodedArray>,
}

impl ClassDef
{
    pub fn new(class: u32, access_flags: AccessFlags) -> Self
    {
        ClassDef {
            class: IdRef::new(class, UsageMarker::DEFINITION),
            access_flags,
            superclass: IdRef::none(UsageMarker::DEFINITION),
            interfaces: DataRef::none(UsageMarker::DEFINITION),
            source_file: IdRef::none(UsageMarker::DEFINITION),
            annotations: DataRef::none(UsageMarker::ANNOTATION),
            class_data: DataRef::none(UsageMarker::DEFINITION),
            static_values: DataRef::none(UsageMarker::STATIC_VALUE),
        }
    }
}

impl ReadBlock for ClassDef
{
    fn read(reader: &mut DexReader<'_>) -> Result<Self, DexError>
    {
        let class = IdRef::new(reader.read_u4()?, UsageMarker::DEFINITION);
        let access_flags = AccessFlags::from_bits_retain(reader.read_u4()?);
        let superclass = IdRef::from_raw(reader.read_u4()?, UsageMarker::DEFINITION);
        let interfaces = reader.read_data_ref(UsageMarker::DEFINITION)?;
        let source_file = IdRef::from_raw(reader.read_u4()?, UsageMarker::DEFINITION);
        let annotations = reader.read_data_ref(UsageMarker::ANNOTATION)?;
        let class_data = reader.read_data_ref(UsageMarker::DEFINITION)?;
        let static_values = reader.read_data_ref(UsageMarker::STATIC_VALUE)?;
        Ok(ClassDef { class, access_flags, superclass, interfaces, source_file, annotations, class_data, static_values })
    }
}

impl Block for ClassDef
{
    fn encoded_len(&self) -> usize
    {
        32
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<usize, DexError>
    {
        let mut c = write_u4(out, self.class.required()?);
        c += write_u4(out, self.access_flags.bits());
        c += write_u4(out, self.superclass.raw());
        c += write_u4(out, self.interfaces.offset()?);
        c += write_u4(out, self.source_file.raw());
        c += write_u4(out, self.annotations.offset()?);
        c += write_u4(out, self.class_data.offset()?);
        c += write_u4(out, self.static_values.offset()?);
        Ok(c)
    }
}

impl ReferenceHolder for ClassDef
{
    fn used_ids(&self) -> Box<dyn Iterator<Item = UsedId> + '_>
    {
        Box::new(
            self.class
                .used()
                .into_iter()
                .chain(self.superclass.used())
                .chain(self.interfaces.used())
                .chain(self.source_file.used())
                .chain(self.annotations.used())
                .chain(self.class_data.used())
                .chain(self.static_values.used()),
        )
    }

    fn visit_refs_mut(&mut self, visitor: &mut dyn FnMut(&mut dyn RefSlot))
    {
        visitor(&mut self.class);
        visitor(&mut self.superclass);
        visitor(&mut self.interfaces);
        visitor(&mut self.source_file);
        visitor(&mut self.annotations);
        visitor(&mut self.class_data);
        visitor(&mut self.static_values);
    }
}

/// Shorty character for a type descriptor.
pub fn shorty_char(descriptor: &str) -> char
{
    match descriptor.chars().next()
    {
        Some('L') | Some('[') => 'L',
        Some(c) => c,
        None => 'V',
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::section::SectionType;

    #[test]
    fn string_data_counts_utf16_units() {
        let s = DexString::from("a\u{1F600}");
        assert_eq!(s.utf16_len(), 3);
        let mut out = vec![];
        let n = s.write(&mut out).unwrap();
        assert_eq!(n, s.encoded_len());
        // surrogate pair encoded as two 3-byte sequences
        assert_eq!(out[0], 3);
        assert_eq!(out.len(), 1 + 1 + 6 + 1);
        assert_eq!(*out.last().unwrap(), 0);

        let mut reader = DexReader::new(&out);
        assert_eq!(DexString::read(&mut reader).unwrap(), s);
    }

    #[test]
    fn string_order_is_by_utf16_units() {
        // U+FFFF sorts after a surrogate pair in UTF-16 but before it in UTF-8
        let a = DexString::from("\u{FFFF}");
        let b = DexString::from("\u{10000}");
        assert_eq!(a.cmp_utf16(&b), Ordering::Greater);
    }

    #[test]
    fn type_list_reads_and_reports_refs() {
        let bytes = [2, 0, 0, 0, 5, 0, 7, 0];
        let mut reader = DexReader::new(&bytes);
        let tl = TypeList::read(&mut reader).unwrap();
        assert_eq!(tl, TypeList::new(&[5, 7]));
        let used: Vec<_> = tl.used_ids().map(|u| (u.section, u.index)).collect();
        assert_eq!(used, vec![(SectionType::TypeId, 5), (SectionType::TypeId, 7)]);
        let mut out = vec![];
        tl.write(&mut out).unwrap();
        assert_eq!(out, bytes);
    }

    #[test]
    fn u2_fields_reject_wide_indices() {
        let f = FieldId {
            class: IdRef::new(0x10000, UsageMarker::ID_ITEM),
            field_type: IdRef::new(0, UsageMarker::ID_ITEM),
            name: IdRef::new(0, UsageMarker::ID_ITEM),
        };
        assert!(f.write(&mut vec![]).is_err());
    }

    #[test]
    fn class_def_absent_fields_use_no_index() {
        let c = ClassDef::new(1, AccessFlags::PUBLIC | AccessFlags::FINAL);
        let mut out = vec![];
        c.write(&mut out).unwrap();
        assert_eq!(out.len(), 32);
        assert_eq!(&out[8..12], &[0xff; 4]);
        assert_eq!(&out[12..16], &[0; 4]);
        assert_eq!(c.used_ids().count(), 1);
    }
}
