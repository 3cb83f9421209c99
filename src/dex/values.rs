//! Encoded values: one descriptor byte `(arg << 5) | type` followed by a
//! payload whose width the descriptor declares.
//!
//! A [`DexValueBlock`] remembers the width it was read with, so an unmodified
//! value writes back the same bytes even when the producer did not pick the
//! minimal width. Setting a new value recomputes the minimal width.
//!
//! References inside values carry no usage of their own; the array or
//! annotation that owns them tags them when it reports its used ids.

use std::mem::size_of;

use crate::dex::error::DexError;
use crate::dex::ids::{DexString, FieldId, MethodId, ProtoId, TypeId};
use crate::dex::key::{translate_refs, RefTranslator};
use crate::dex::leb::uleb128_len;
use crate::dex::reader::{ByteSource, DexReader};
use crate::dex::reference::{IdRef, RefSlot, ReferenceHolder, UsedId};
use crate::dex::section::{SectionRegistry, SectionType, UsageMarker};
use crate::dex::text::{describe, string_literal, type_name};
use crate::dex::{write_u1, write_uleb128, write_x};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DexValueType
{
    Byte,
    Short,
    Char,
    Int,
    Long,
    Float,
    Double,
    MethodType,
    MethodHandle,
    String,
    Type,
    Field,
    Method,
    Enum,
    Array,
    Annotation,
    Null,
    Boolean,
}

impl DexValueType
{
    pub fn code(self) -> u8
    {
        match self
        {
            DexValueType::Byte => 0x00,
            DexValueType::Short => 0x02,
            DexValueType::Char => 0x03,
            DexValueType::Int => 0x04,
            DexValueType::Long => 0x06,
            DexValueType::Float => 0x10,
            DexValueType::Double => 0x11,
            DexValueType::MethodType => 0x15,
            DexValueType::MethodHandle => 0x16,
            DexValueType::String => 0x17,
            DexValueType::Type => 0x18,
            DexValueType::Field => 0x19,
            DexValueType::Method => 0x1a,
            DexValueType::Enum => 0x1b,
            DexValueType::Array => 0x1c,
            DexValueType::Annotation => 0x1d,
            DexValueType::Null => 0x1e,
            DexValueType::Boolean => 0x1f,
        }
    }

    pub fn from_code(code: u8) -> Option<DexValueType>
    {
        Some(match code
        {
            0x00 => DexValueType::Byte,
            0x02 => DexValueType::Short,
            0x03 => DexValueType::Char,
            0x04 => DexValueType::Int,
            0x06 => DexValueType::Long,
            0x10 => DexValueType::Float,
            0x11 => DexValueType::Double,
            0x15 => DexValueType::MethodType,
            0x16 => DexValueType::MethodHandle,
            0x17 => DexValueType::String,
            0x18 => DexValueType::Type,
            0x19 => DexValueType::Field,
            0x1a => DexValueType::Method,
            0x1b => DexValueType::Enum,
            0x1c => DexValueType::Array,
            0x1d => DexValueType::Annotation,
            0x1e => DexValueType::Null,
            0x1f => DexValueType::Boolean,
            _ => return None,
        })
    }

    /// The value kind that refers into `section`, if any.
    pub fn for_section(section: SectionType) -> Option<DexValueType>
    {
        match section
        {
            SectionType::StringId => Some(DexValueType::String),
            SectionType::TypeId => Some(DexValueType::Type),
            SectionType::FieldId => Some(DexValueType::Field),
            SectionType::MethodId => Some(DexValueType::Method),
            SectionType::ProtoId => Some(DexValueType::MethodType),
            _ => None,
        }
    }

    /// Largest payload width, or 0 for kinds whose payload is not sized by the descriptor.
    pub fn max_width(self) -> u8
    {
        match self
        {
            DexValueType::Byte => 1,
            DexValueType::Short | DexValueType::Char => 2,
            DexValueType::Long | DexValueType::Double => 8,
            DexValueType::Array | DexValueType::Annotation | DexValueType::Null | DexValueType::Boolean => 0,
            _ => 4,
        }
    }

    pub fn name(self) -> &'static str
    {
        match self
        {
            DexValueType::Byte => "byte",
            DexValueType::Short => "short",
            DexValueType::Char => "char",
            DexValueType::Int => "int",
            DexValueType::Long => "long",
            DexValueType::Float => "float",
            DexValueType::Double => "double",
            DexValueType::MethodType => "method_type",
            DexValueType::MethodHandle => "method_handle",
            DexValueType::String => "string",
            DexValueType::Type => "type",
            DexValueType::Field => "field",
            DexValueType::Method => "method",
            DexValueType::Enum => "enum",
            DexValueType::Array => "array",
            DexValueType::Annotation => "annotation",
            DexValueType::Null => "null",
            DexValueType::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnnotationElement
{
    pub name: IdRef<DexString>,
    pub value: DexValueBlock,
}

/// encoded_annotation: a type and name/value pairs sorted by name index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncodedAnnotation
{
    pub annotation_type: IdRef<TypeId>,
    pub elements: Vec<AnnotationElement>,
}

impl EncodedAnnotation
{
    pub fn new(type_index: u32) -> Self
    {
        EncodedAnnotation { annotation_type: IdRef::new(type_index, UsageMarker::empty()), elements: vec![] }
    }

    pub fn read(reader: &mut DexReader<'_>) -> Result<EncodedAnnotation, DexError>
    {
        let annotation_type = IdRef::new(reader.read_uleb128()?, UsageMarker::empty());
        let size = reader.read_uleb128()?;
        let mut elements = Vec::with_capacity(size.min(0x100) as usize);
        for _ in 0..size
        {
            let name = IdRef::new(reader.read_uleb128()?, UsageMarker::empty());
            elements.push(AnnotationElement { name, value: DexValueBlock::read(reader)? });
        }
        Ok(EncodedAnnotation { annotation_type, elements })
    }

    pub fn element(&self, name_index: u32) -> Option<&DexValueBlock>
    {
        self.elements.iter().find(|e| e.name.index() == Some(name_index)).map(|e| &e.value)
    }

    /// Replace or add the element named `name_index`.
    pub fn set_element(&mut self, name_index: u32, value: DexValueBlock)
    {
        match self.elements.iter_mut().find(|e| e.name.index() == Some(name_index))
        {
            Some(e) => e.value = value,
            None => self.elements.push(AnnotationElement { name: IdRef::new(name_index, UsageMarker::empty()), value }),
        }
    }

    /// Elements must be ordered by name index.
    pub fn sort_elements(&mut self)
    {
        self.elements.sort_by_key(|e| e.name.raw());
    }

    pub fn encoded_len(&self) -> usize
    {
        uleb128_len(self.annotation_type.raw())
            + uleb128_len(self.elements.len() as u32)
            + self.elements.iter().map(|e| uleb128_len(e.name.raw()) + e.value.encoded_len()).sum::<usize>()
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<usize, DexError>
    {
        let mut c = write_uleb128(out, self.annotation_type.required()?);
        c += write_uleb128(out, self.elements.len() as u32);
        for e in &self.elements
        {
            c += write_uleb128(out, e.name.required()?);
            c += e.value.write(out)?;
        }
        Ok(c)
    }

    pub fn to_text(&self, sections: &SectionRegistry) -> String
    {
        let elements: Vec<String> = self
            .elements
            .iter()
            .map(|e| {
                let name = e.name.index().and_then(|i| sections.strings.get(i)).map(|s| s.to_string_lossy());
                format!("{} = {}", name.unwrap_or_else(|| "<none>".to_string()), e.value.to_text(sections))
            })
            .collect();
        format!("{} {{ {} }}", type_name(sections, &self.annotation_type), elements.join(", "))
    }
}

impl ReferenceHolder for EncodedAnnotation
{
    fn used_ids(&self) -> Box<dyn Iterator<Item = UsedId> + '_>
    {
        Box::new(
            self.annotation_type
                .used()
                .into_iter()
                .chain(self.elements.iter().flat_map(|e| e.name.used().into_iter().chain(e.value.used_ids()))),
        )
    }

    fn visit_refs_mut(&mut self, visitor: &mut dyn FnMut(&mut dyn RefSlot))
    {
        visitor(&mut self.annotation_type);
        for e in self.elements.iter_mut()
        {
            visitor(&mut e.name);
            e.value.visit_refs_mut(visitor);
        }
    }
}

/// Decoded payload of an encoded value. Floating point values are kept as
/// their IEEE bit patterns so values compare and hash exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DexValue
{
    Byte(i8),
    Short(i16),
    Char(u16),
    Int(i32),
    Long(i64),
    Float(u32),
    Double(u64),
    MethodType(IdRef<ProtoId>),
    /// Method handles are not pooled here; the raw index is carried through.
    MethodHandle(u32),
    String(IdRef<DexString>),
    Type(IdRef<TypeId>),
    Field(IdRef<FieldId>),
    Method(IdRef<MethodId>),
    Enum(IdRef<FieldId>),
    Array(Vec<DexValueBlock>),
    Annotation(EncodedAnnotation),
    Null,
    Boolean(bool),
}

impl DexValue
{
    /// A fresh value of the given kind: zero, false, empty, or an unset reference.
    pub fn default_for(value_type: DexValueType) -> DexValue
    {
        let none = UsageMarker::empty();
        match value_type
        {
            DexValueType::Byte => DexValue::Byte(0),
            DexValueType::Short => DexValue::Short(0),
            DexValueType::Char => DexValue::Char(0),
            DexValueType::Int => DexValue::Int(0),
            DexValueType::Long => DexValue::Long(0),
            DexValueType::Float => DexValue::Float(0),
            DexValueType::Double => DexValue::Double(0),
            DexValueType::MethodType => DexValue::MethodType(IdRef::none(none)),
            DexValueType::MethodHandle => DexValue::MethodHandle(0),
            DexValueType::String => DexValue::String(IdRef::none(none)),
            DexValueType::Type => DexValue::Type(IdRef::none(none)),
            DexValueType::Field => DexValue::Field(IdRef::none(none)),
            DexValueType::Method => DexValue::Method(IdRef::none(none)),
            DexValueType::Enum => DexValue::Enum(IdRef::none(none)),
            DexValueType::Array => DexValue::Array(vec![]),
            DexValueType::Annotation => DexValue::Annotation(EncodedAnnotation::new(0)),
            DexValueType::Null => DexValue::Null,
            DexValueType::Boolean => DexValue::Boolean(false),
        }
    }

    pub fn value_type(&self) -> DexValueType
    {
        match self
        {
            DexValue::Byte(_) => DexValueType::Byte,
            DexValue::Short(_) => DexValueType::Short,
            DexValue::Char(_) => DexValueType::Char,
            DexValue::Int(_) => DexValueType::Int,
            DexValue::Long(_) => DexValueType::Long,
            DexValue::Float(_) => DexValueType::Float,
            DexValue::Double(_) => DexValueType::Double,
            DexValue::MethodType(_) => DexValueType::MethodType,
            DexValue::MethodHandle(_) => DexValueType::MethodHandle,
            DexValue::String(_) => DexValueType::String,
            DexValue::Type(_) => DexValueType::Type,
            DexValue::Field(_) => DexValueType::Field,
            DexValue::Method(_) => DexValueType::Method,
            DexValue::Enum(_) => DexValueType::Enum,
            DexValue::Array(_) => DexValueType::Array,
            DexValue::Annotation(_) => DexValueType::Annotation,
            DexValue::Null => DexValueType::Null,
            DexValue::Boolean(_) => DexValueType::Boolean,
        }
    }

    /// Payload as a zero-extended word, for the sized kinds.
    fn payload_bits(&self) -> Option<u64>
    {
        Some(match self
        {
            DexValue::Byte(v) => *v as u8 as u64,
            DexValue::Short(v) => *v as u16 as u64,
            DexValue::Char(v) => *v as u64,
            DexValue::Int(v) => *v as u32 as u64,
            DexValue::Long(v) => *v as u64,
            DexValue::Float(v) => *v as u64,
            DexValue::Double(v) => *v,
            DexValue::MethodType(r) => r.raw() as u64,
            DexValue::MethodHandle(v) => *v as u64,
            DexValue::String(r) => r.raw() as u64,
            DexValue::Type(r) => r.raw() as u64,
            DexValue::Field(r) | DexValue::Enum(r) => r.raw() as u64,
            DexValue::Method(r) => r.raw() as u64,
            _ => return None,
        })
    }

    /// Smallest payload width that still holds this value.
    fn minimal_width(&self) -> u8
    {
        match self
        {
            DexValue::Byte(_) => 1,
            DexValue::Short(v) => signed_width(*v),
            DexValue::Char(v) => unsigned_width(*v),
            DexValue::Int(v) => signed_width(*v),
            DexValue::Long(v) => signed_width(*v),
            DexValue::Float(v) => right_width(*v),
            DexValue::Double(v) => right_width(*v),
            DexValue::MethodHandle(v) => unsigned_width(*v),
            DexValue::Array(_) | DexValue::Annotation(_) | DexValue::Null | DexValue::Boolean(_) => 0,
            other => other.payload_bits().map_or(1, |b| unsigned_width(b as u32)),
        }
    }

    fn check_reference(&self) -> Result<(), DexError>
    {
        match self
        {
            DexValue::MethodType(r) => r.required().map(|_| ()),
            DexValue::String(r) => r.required().map(|_| ()),
            DexValue::Type(r) => r.required().map(|_| ()),
            DexValue::Field(r) | DexValue::Enum(r) => r.required().map(|_| ()),
            DexValue::Method(r) => r.required().map(|_| ()),
            _ => Ok(()),
        }
    }
}

fn signed_width<T>(v: T) -> u8
where
    T: num_traits::PrimInt + num_traits::Signed,
{
    let magnitude = if v < T::zero() { !v } else { v };
    let bits = (size_of::<T>() * 8) as u32 - magnitude.leading_zeros() + 1;
    bits.div_ceil(8).max(1) as u8
}

fn unsigned_width<T>(v: T) -> u8
where
    T: num_traits::PrimInt + num_traits::Unsigned,
{
    let bits = (size_of::<T>() * 8) as u32 - v.leading_zeros();
    bits.div_ceil(8).max(1) as u8
}

/// Floating point payloads drop low-order zero bytes and are zero-extended to the right.
fn right_width<T>(v: T) -> u8
where
    T: num_traits::PrimInt + num_traits::Unsigned,
{
    let size = size_of::<T>() as u32;
    if v.is_zero()
    {
        return 1;
    }
    (size - v.trailing_zeros() / 8) as u8
}

fn sign_extend(raw: u64, width: u8) -> i64
{
    let shift = 64 - width as u32 * 8;
    ((raw << shift) as i64) >> shift
}

/// One encoded value plus the payload width it is written with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DexValueBlock
{
    value: DexValue,
    width: u8,
}

impl DexValueBlock
{
    pub fn new(value: DexValue) -> Self
    {
        let width = value.minimal_width();
        DexValueBlock { value, width }
    }

    pub fn of_type(value_type: DexValueType) -> Self
    {
        Self::new(DexValue::default_for(value_type))
    }

    pub fn int(v: i32) -> Self
    {
        Self::new(DexValue::Int(v))
    }

    pub fn long(v: i64) -> Self
    {
        Self::new(DexValue::Long(v))
    }

    pub fn float(v: f32) -> Self
    {
        Self::new(DexValue::Float(v.to_bits()))
    }

    pub fn double(v: f64) -> Self
    {
        Self::new(DexValue::Double(v.to_bits()))
    }

    pub fn boolean(v: bool) -> Self
    {
        Self::new(DexValue::Boolean(v))
    }

    pub fn null() -> Self
    {
        Self::new(DexValue::Null)
    }

    pub fn string(index: u32) -> Self
    {
        Self::new(DexValue::String(IdRef::new(index, UsageMarker::empty())))
    }

    pub fn type_ref(index: u32) -> Self
    {
        Self::new(DexValue::Type(IdRef::new(index, UsageMarker::empty())))
    }

    pub fn field(index: u32) -> Self
    {
        Self::new(DexValue::Field(IdRef::new(index, UsageMarker::empty())))
    }

    pub fn method(index: u32) -> Self
    {
        Self::new(DexValue::Method(IdRef::new(index, UsageMarker::empty())))
    }

    pub fn enum_field(index: u32) -> Self
    {
        Self::new(DexValue::Enum(IdRef::new(index, UsageMarker::empty())))
    }

    pub fn array(values: Vec<DexValueBlock>) -> Self
    {
        Self::new(DexValue::Array(values))
    }

    pub fn annotation(annotation: EncodedAnnotation) -> Self
    {
        Self::new(DexValue::Annotation(annotation))
    }

    pub fn value(&self) -> &DexValue
    {
        &self.value
    }

    pub fn value_type(&self) -> DexValueType
    {
        self.value.value_type()
    }

    /// Replace the value and pick the minimal width for it.
    pub fn set_value(&mut self, value: DexValue)
    {
        self.width = value.minimal_width();
        self.value = value;
    }

    /// Width the payload is written with. A width read from input is kept
    /// unless the current value no longer fits it.
    pub fn width(&self) -> u8
    {
        let max = self.value_type().max_width();
        self.width.max(self.value.minimal_width()).min(max)
    }

    pub fn as_i64(&self) -> Option<i64>
    {
        match self.value
        {
            DexValue::Byte(v) => Some(v as i64),
            DexValue::Short(v) => Some(v as i64),
            DexValue::Char(v) => Some(v as i64),
            DexValue::Int(v) => Some(v as i64),
            DexValue::Long(v) => Some(v),
            _ => None,
        }
    }

    /// Copy `other`'s value into this block, translating its references.
    pub fn merge(&mut self, other: &DexValueBlock, translator: &mut dyn RefTranslator) -> Result<(), DexError>
    {
        let mut copy = other.clone();
        translate_refs(&mut copy, translator)?;
        *self = copy;
        Ok(())
    }

    pub fn read(reader: &mut DexReader<'_>) -> Result<DexValueBlock, DexError>
    {
        let at = reader.position();
        let descriptor = reader.read_u1()?;
        let arg = descriptor >> 5;
        let Some(value_type) = DexValueType::from_code(descriptor & 0x1f)
        else
        {
            fail!(FormatMismatch, "unknown encoded value type 0x{:02x} at 0x{:x}", descriptor & 0x1f, at);
        };

        let max = value_type.max_width();
        if max == 0
        {
            let value = match value_type
            {
                DexValueType::Array =>
                {
                    let size = reader.read_uleb128()?;
                    let mut values = Vec::with_capacity(size.min(0x1000) as usize);
                    for _ in 0..size
                    {
                        values.push(DexValueBlock::read(reader)?);
                    }
                    DexValue::Array(values)
                }
                DexValueType::Annotation => DexValue::Annotation(EncodedAnnotation::read(reader)?),
                DexValueType::Boolean => DexValue::Boolean(arg != 0),
                _ => DexValue::Null,
            };
            return Ok(DexValueBlock { value, width: 0 });
        }

        let width = arg + 1;
        if width > max
        {
            fail!(FormatMismatch, "{} value at 0x{:x} declares {} payload bytes", value_type.name(), at, width);
        }
        let mut raw = 0u64;
        for (i, b) in reader.read_slice(width as usize)?.iter().enumerate()
        {
            raw |= (*b as u64) << (8 * i);
        }
        let none = UsageMarker::empty();
        let value = match value_type
        {
            DexValueType::Byte => DexValue::Byte(raw as u8 as i8),
            DexValueType::Short => DexValue::Short(sign_extend(raw, width) as i16),
            DexValueType::Char => DexValue::Char(raw as u16),
            DexValueType::Int => DexValue::Int(sign_extend(raw, width) as i32),
            DexValueType::Long => DexValue::Long(sign_extend(raw, width)),
            DexValueType::Float => DexValue::Float((raw << (32 - width as u32 * 8)) as u32),
            DexValueType::Double => DexValue::Double(raw << (64 - width as u32 * 8)),
            DexValueType::MethodType => DexValue::MethodType(IdRef::new(raw as u32, none)),
            DexValueType::MethodHandle => DexValue::MethodHandle(raw as u32),
            DexValueType::String => DexValue::String(IdRef::new(raw as u32, none)),
            DexValueType::Type => DexValue::Type(IdRef::new(raw as u32, none)),
            DexValueType::Field => DexValue::Field(IdRef::new(raw as u32, none)),
            DexValueType::Method => DexValue::Method(IdRef::new(raw as u32, none)),
            _ => DexValue::Enum(IdRef::new(raw as u32, none)),
        };
        Ok(DexValueBlock { value, width })
    }

    pub fn encoded_len(&self) -> usize
    {
        1 + match &self.value
        {
            DexValue::Array(values) => {
                uleb128_len(values.len() as u32) + values.iter().map(DexValueBlock::encoded_len).sum::<usize>()
            }
            DexValue::Annotation(a) => a.encoded_len(),
            _ => self.width() as usize,
        }
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<usize, DexError>
    {
        let code = self.value_type().code();
        match &self.value
        {
            DexValue::Array(values) =>
            {
                let mut c = write_u1(out, code);
                c += write_uleb128(out, values.len() as u32);
                for v in values
                {
                    c += v.write(out)?;
                }
                Ok(c)
            }
            DexValue::Annotation(a) => Ok(write_u1(out, code) + a.write(out)?),
            DexValue::Null => Ok(write_u1(out, code)),
            DexValue::Boolean(b) => Ok(write_u1(out, ((*b as u8) << 5) | code)),
            value =>
            {
                value.check_reference()?;
                let width = self.width();
                let bits = value.payload_bits().unwrap_or(0);
                let bits = match value
                {
                    DexValue::Float(_) => bits >> (32 - width as u32 * 8),
                    DexValue::Double(_) => bits >> (64 - width as u32 * 8),
                    _ => bits,
                };
                let c = write_u1(out, ((width - 1) << 5) | code);
                Ok(c + write_x(out, &bits.to_le_bytes()[..width as usize]))
            }
        }
    }

    pub fn to_text(&self, sections: &SectionRegistry) -> String
    {
        match &self.value
        {
            DexValue::Byte(v) => format!("{:#x}t", v),
            DexValue::Short(v) => format!("{:#x}s", v),
            DexValue::Char(v) => match char::from_u32(*v as u32).filter(|c| !c.is_control())
            {
                Some(c) => format!("'{}'", c),
                None => format!("'\\u{:04x}'", v),
            },
            DexValue::Int(v) => format!("{:#x}", v),
            DexValue::Long(v) => format!("{:#x}L", v),
            DexValue::Float(v) => format!("{}f", f32::from_bits(*v)),
            DexValue::Double(v) => format!("{}", f64::from_bits(*v)),
            DexValue::MethodType(r) => optional(r.index(), |i| describe(sections, SectionType::ProtoId, i)),
            DexValue::MethodHandle(v) => format!("method_handle@{}", v),
            DexValue::String(r) => string_literal(sections, r),
            DexValue::Type(r) => type_name(sections, r),
            DexValue::Field(r) => optional(r.index(), |i| describe(sections, SectionType::FieldId, i)),
            DexValue::Method(r) => optional(r.index(), |i| describe(sections, SectionType::MethodId, i)),
            DexValue::Enum(r) => format!(".enum {}", optional(r.index(), |i| describe(sections, SectionType::FieldId, i))),
            DexValue::Array(values) =>
            {
                let parts: Vec<String> = values.iter().map(|v| v.to_text(sections)).collect();
                format!("{{ {} }}", parts.join(", "))
            }
            DexValue::Annotation(a) => format!(".subannotation {}", a.to_text(sections)),
            DexValue::Null => "null".to_string(),
            DexValue::Boolean(b) => b.to_string(),
        }
    }
}

fn optional(index: Option<u32>, f: impl FnOnce(u32) -> String) -> String
{
    index.map_or_else(|| "<none>".to_string(), f)
}

impl ReferenceHolder for DexValueBlock
{
    fn used_ids(&self) -> Box<dyn Iterator<Item = UsedId> + '_>
    {
        match &self.value
        {
            DexValue::MethodType(r) => Box::new(r.used().into_iter()),
            DexValue::String(r) => Box::new(r.used().into_iter()),
            DexValue::Type(r) => Box::new(r.used().into_iter()),
            DexValue::Field(r) | DexValue::Enum(r) => Box::new(r.used().into_iter()),
            DexValue::Method(r) => Box::new(r.used().into_iter()),
            DexValue::Array(values) => Box::new(values.iter().flat_map(|v| v.used_ids())),
            DexValue::Annotation(a) => a.used_ids(),
            _ => Box::new(std::iter::empty()),
        }
    }

    fn visit_refs_mut(&mut self, visitor: &mut dyn FnMut(&mut dyn RefSlot))
    {
        match &mut self.value
        {
            DexValue::MethodType(r) => visitor(r),
            DexValue::String(r) => visitor(r),
            DexValue::Type(r) => visitor(r),
            DexValue::Field(r) | DexValue::Enum(r) => visitor(r),
            DexValue::Method(r) => visitor(r),
            DexValue::Array(values) =>
            {
                for v in values.iter_mut()
                {
                    v.visit_refs_mut(visitor);
                }
            }
            DexValue::Annotation(a) => a.visit_refs_mut(visitor),
            _ => {}
        }
    }
}

/// Tag every id reported by `holder` with `usage`.
pub(crate) fn tagged<'a>(holder: &'a dyn ReferenceHolder, usage: UsageMarker) -> Box<dyn Iterator<Item = UsedId> + 'a>
{
    Box::new(holder.used_ids().map(move |mut u| {
        u.usage = usage;
        u
    }))
}
