//! class_data_item: the fields and methods a class defines, with member
//! indices delta-encoded against the previous entry of the same list.

use crate::dex::block::{Block, ReadBlock};
use crate::dex::code::CodeItem;
use crate::dex::error::{DexError, ResultExt};
use crate::dex::ids::{AccessFlags, FieldId, MethodId};
use crate::dex::leb::uleb128_len;
use crate::dex::reader::DexReader;
use crate::dex::reference::{DataRef, IdRef, RefSlot, ReferenceHolder, UsedId};
use crate::dex::section::{SectionRegistry, SectionType, UsageMarker};
use crate::dex::text::{describe, TextFormat, TextWriter};
use crate::dex::write_uleb128;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncodedField
{
    pub field: IdRef<FieldId>,
    pub access_flags: AccessFlags,
}

impl EncodedField
{
    pub fn new(field: u32, access_flags: AccessFlags) -> Self
    {
        EncodedField { field: IdRef::new(field, UsageMarker::DEFINITION), access_flags }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncodedMethod
{
    pub method: IdRef<MethodId>,
    pub access_flags: AccessFlags,
    pub code: DataRef<CodeItem>,
}

impl EncodedMethod
{
    pub fn new(method: u32, access_flags: AccessFlags) -> Self
    {
        EncodedMethod { method: IdRef::new(method, UsageMarker::DEFINITION), access_flags, code: DataRef::none(UsageMarker::CODE) }
    }

    pub fn with_code(mut self, code: u32) -> Self
    {
        self.code = DataRef::new(code, UsageMarker::CODE);
        self
    }

    fn code_off(&self) -> u32
    {
        self.code.offset().unwrap_or(0)
    }
}

/// Smali-style modifier keywords for a member or class.
pub fn access_names(flags: AccessFlags, is_method: bool) -> String
{
    let mut names = vec![];
    let table: [(AccessFlags, &str, Option<bool>); 17] = [
        (AccessFlags::PUBLIC, "public", None),
        (AccessFlags::PRIVATE, "private", None),
        (AccessFlags::PROTECTED, "protected", None),
        (AccessFlags::STATIC, "static", None),
        (AccessFlags::FINAL, "final", None),
        (AccessFlags::SYNCHRONIZED, "synchronized", Some(true)),
        (AccessFlags::VOLATILE, "volatile", Some(false)),
        (AccessFlags::BRIDGE, "bridge", Some(true)),
        (AccessFlags::TRANSIENT, "transient", Some(false)),
        (AccessFlags::VARARGS, "varargs", Some(true)),
        (AccessFlags::NATIVE, "native", None),
        (AccessFlags::INTERFACE, "interface", None),
        (AccessFlags::ABSTRACT, "abstract", None),
        (AccessFlags::STRICT, "strictfp", None),
        (AccessFlags::SYNTHETIC, "synthetic", None),
        (AccessFlags::ENUM, "enum", None),
        (AccessFlags::CONSTRUCTOR, "constructor", None),
    ];
    for (flag, name, only_for_method) in table
    {
        if flags.contains(flag) && only_for_method.map_or(true, |m| m == is_method)
        {
            names.push(name);
        }
    }
    names.join(" ")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ClassData
{
    pub static_fields: Vec<EncodedField>,
    pub instance_fields: Vec<EncodedField>,
    pub direct_methods: Vec<EncodedMethod>,
    pub virtual_methods: Vec<EncodedMethod>,
}

fn read_fields(reader: &mut DexReader<'_>, count: u32, what: &str) -> Result<Vec<EncodedField>, DexError>
{
    let mut fields = Vec::with_capacity(count.min(0x1000) as usize);
    let mut index = 0u32;
    for i in 0..count
    {
        index = index.wrapping_add(reader.read_uleb128()?);
        let access_flags = AccessFlags::from_bits_retain(reader.read_uleb128().context(|| format!("{} #{}", what, i))?);
        fields.push(EncodedField { field: IdRef::new(index, UsageMarker::DEFINITION), access_flags });
    }
    Ok(fields)
}

fn read_methods(reader: &mut DexReader<'_>, count: u32, what: &str) -> Result<Vec<EncodedMethod>, DexError>
{
    let mut methods = Vec::with_capacity(count.min(0x1000) as usize);
    let mut index = 0u32;
    for i in 0..count
    {
        index = index.wrapping_add(reader.read_uleb128()?);
        let access_flags = AccessFlags::from_bits_retain(reader.read_uleb128()?);
        let code_off = reader.read_uleb128()?;
        let code = reader.data_ref_at::<CodeItem>(code_off, UsageMarker::CODE).context(|| format!("{} #{}", what, i))?;
        methods.push(EncodedMethod { method: IdRef::new(index, UsageMarker::DEFINITION), access_flags, code });
    }
    Ok(methods)
}

/// Differences between consecutive indices; the first is taken against zero.
fn deltas(indices: impl Iterator<Item = u32>) -> impl Iterator<Item = u32>
{
    let mut previous = 0u32;
    indices.map(move |i| {
        let d = i.wrapping_sub(previous);
        previous = i;
        d
    })
}

fn fields_len(fields: &[EncodedField]) -> usize
{
    deltas(fields.iter().map(|f| f.field.raw()))
        .zip(fields)
        .map(|(d, f)| uleb128_len(d) + uleb128_len(f.access_flags.bits()))
        .sum()
}

fn methods_len(methods: &[EncodedMethod]) -> usize
{
    deltas(methods.iter().map(|m| m.method.raw()))
        .zip(methods)
        .map(|(d, m)| uleb128_len(d) + uleb128_len(m.access_flags.bits()) + uleb128_len(m.code_off()))
        .sum()
}

fn write_fields(out: &mut Vec<u8>, fields: &[EncodedField]) -> Result<usize, DexError>
{
    let mut c = 0;
    let mut previous = 0u32;
    for f in fields
    {
        let index = f.field.required()?;
        if index < previous
        {
            fail!(FormatMismatch, "field {} listed after field {}", index, previous);
        }
        c += write_uleb128(out, index - previous);
        c += write_uleb128(out, f.access_flags.bits());
        previous = index;
    }
    Ok(c)
}

fn write_methods(out: &mut Vec<u8>, methods: &[EncodedMethod]) -> Result<usize, DexError>
{
    let mut c = 0;
    let mut previous = 0u32;
    for m in methods
    {
        let index = m.method.required()?;
        if index < previous
        {
            fail!(FormatMismatch, "method {} listed after method {}", index, previous);
        }
        c += write_uleb128(out, index - previous);
        c += write_uleb128(out, m.access_flags.bits());
        c += write_uleb128(out, m.code.offset()?);
        previous = index;
    }
    Ok(c)
}

impl ClassData
{
    pub fn is_empty(&self) -> bool
    {
        self.static_fields.is_empty()
            && self.instance_fields.is_empty()
            && self.direct_methods.is_empty()
            && self.virtual_methods.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &EncodedField>
    {
        self.static_fields.iter().chain(&self.instance_fields)
    }

    pub fn methods(&self) -> impl Iterator<Item = &EncodedMethod>
    {
        self.direct_methods.iter().chain(&self.virtual_methods)
    }
}

impl ReadBlock for ClassData
{
    fn read(reader: &mut DexReader<'_>) -> Result<Self, DexError>
    {
        let static_size = reader.read_uleb128()?;
        let instance_size = reader.read_uleb128()?;
        let direct_size = reader.read_uleb128()?;
        let virtual_size = reader.read_uleb128()?;
        Ok(ClassData {
            static_fields: read_fields(reader, static_size, "static field")?,
            instance_fields: read_fields(reader, instance_size, "instance field")?,
            direct_methods: read_methods(reader, direct_size, "direct method")?,
            virtual_methods: read_methods(reader, virtual_size, "virtual method")?,
        })
    }
}

impl Block for ClassData
{
    fn encoded_len(&self) -> usize
    {
        uleb128_len(self.static_fields.len() as u32)
            + uleb128_len(self.instance_fields.len() as u32)
            + uleb128_len(self.direct_methods.len() as u32)
            + uleb128_len(self.virtual_methods.len() as u32)
            + fields_len(&self.static_fields)
            + fields_len(&self.instance_fields)
            + methods_len(&self.direct_methods)
            + methods_len(&self.virtual_methods)
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<usize, DexError>
    {
        let mut c = write_uleb128(out, self.static_fields.len() as u32);
        c += write_uleb128(out, self.instance_fields.len() as u32);
        c += write_uleb128(out, self.direct_methods.len() as u32);
        c += write_uleb128(out, self.virtual_methods.len() as u32);
        c += write_fields(out, &self.static_fields)?;
        c += write_fields(out, &self.instance_fields)?;
        c += write_methods(out, &self.direct_methods)?;
        c += write_methods(out, &self.virtual_methods)?;
        Ok(c)
    }

    /// Members are kept sorted by index so every delta is non-negative.
    fn refresh(&mut self)
    {
        self.static_fields.sort_by_key(|f| f.field.raw());
        self.instance_fields.sort_by_key(|f| f.field.raw());
        self.direct_methods.sort_by_key(|m| m.method.raw());
        self.virtual_methods.sort_by_key(|m| m.method.raw());
    }
}

impl ReferenceHolder for ClassData
{
    fn used_ids(&self) -> Box<dyn Iterator<Item = UsedId> + '_>
    {
        Box::new(
            self.fields()
                .filter_map(|f| f.field.used())
                .chain(self.methods().flat_map(|m| m.method.used().into_iter().chain(m.code.used()))),
        )
    }

    fn visit_refs_mut(&mut self, visitor: &mut dyn FnMut(&mut dyn RefSlot))
    {
        for f in self.static_fields.iter_mut().chain(self.instance_fields.iter_mut())
        {
            visitor(&mut f.field);
        }
        for m in self.direct_methods.iter_mut().chain(self.virtual_methods.iter_mut())
        {
            visitor(&mut m.method);
            visitor(&mut m.code);
        }
    }
}

impl TextFormat for ClassData
{
    fn append(&self, w: &mut TextWriter, sections: &SectionRegistry)
    {
        for f in self.fields()
        {
            let name = f.field.index().map_or_else(|| "<none>".to_string(), |i| describe(sections, SectionType::FieldId, i));
            let access = access_names(f.access_flags, false);
            w.line(format!(".field {}{}{}", access, if access.is_empty() { "" } else { " " }, name));
        }
        for m in self.methods()
        {
            let name = m.method.index().map_or_else(|| "<none>".to_string(), |i| describe(sections, SectionType::MethodId, i));
            let access = access_names(m.access_flags, true);
            w.blank();
            w.line(format!(".method {}{}{}", access, if access.is_empty() { "" } else { " " }, name));
            if let Some(code) = m.code.resolve(sections)
            {
                w.indented(|w| code.append(w, sections));
            }
            w.line(".end method");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ClassData {
        let mut data = ClassData::default();
        data.static_fields.push(EncodedField::new(2, AccessFlags::PUBLIC | AccessFlags::STATIC));
        data.instance_fields.push(EncodedField::new(0, AccessFlags::PRIVATE));
        data.instance_fields.push(EncodedField::new(5, AccessFlags::PRIVATE));
        data.direct_methods.push(EncodedMethod::new(3, AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR));
        data
    }

    #[test]
    fn indices_are_delta_encoded() {
        let data = sample();
        let mut out = vec![];
        assert_eq!(data.write(&mut out).unwrap(), data.encoded_len());
        assert_eq!(
            out,
            vec![1, 2, 1, 0, 2, 0x09, 0, 0x02, 5, 0x02, 3, 0x81, 0x80, 0x04, 0]
        );
        let back = ClassData::read(&mut DexReader::new(&out)).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn refresh_restores_member_order() {
        let mut data = sample();
        data.instance_fields.swap(0, 1);
        assert!(data.write(&mut vec![]).is_err());
        data.refresh();
        assert!(data.write(&mut vec![]).is_ok());
    }

    #[test]
    fn code_references_need_layout() {
        let mut data = sample();
        data.direct_methods[0] = EncodedMethod::new(3, AccessFlags::PUBLIC).with_code(0);
        let e = data.write(&mut vec![]).unwrap_err();
        assert_eq!(e.kind(), crate::dex::error::DexErrorKind::UnresolvedReference);
        let used: Vec<_> = data.used_ids().filter(|u| u.section == SectionType::Code).collect();
        assert_eq!(used.len(), 1);
    }

    #[test]
    fn modifiers_depend_on_member_kind() {
        let flags = AccessFlags::PUBLIC | AccessFlags::VOLATILE;
        assert_eq!(access_names(flags, false), "public volatile");
        assert_eq!(access_names(flags, true), "public bridge");
    }
}
