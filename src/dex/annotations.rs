//! DEX annotations-related structures
//!
//! Implements the binary structures from the DEX format:
//! - annotations_directory_item
//! - annotation_set_item
//! - annotation_set_ref_list
//! - annotation_item (wraps EncodedAnnotation)

use crate::dex::block::{Block, ReadBlock};
use crate::dex::error::{DexError, ResultExt};
use crate::dex::ids::{FieldId, MethodId};
use crate::dex::reader::DexReader;
use crate::dex::reference::{DataRef, IdRef, RefSlot, ReferenceHolder, UsedId};
use crate::dex::section::{SectionRegistry, SectionType, UsageMarker};
use crate::dex::text::{describe, TextFormat, TextWriter};
use crate::dex::values::{tagged, EncodedAnnotation};
use crate::dex::{write_u1, write_u4};

/// Visibility byte of an annotation_item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility
{
    Build,
    Runtime,
    System,
    Other(u8),
}

impl Visibility
{
    pub fn from_u8(v: u8) -> Visibility
    {
        match v
        {
            0x00 => Visibility::Build,
            0x01 => Visibility::Runtime,
            0x02 => Visibility::System,
            other => Visibility::Other(other),
        }
    }

    pub fn to_u8(self) -> u8
    {
        match self
        {
            Visibility::Build => 0x00,
            Visibility::Runtime => 0x01,
            Visibility::System => 0x02,
            Visibility::Other(v) => v,
        }
    }

    fn name(self) -> String
    {
        match self
        {
            Visibility::Build => "build".to_string(),
            Visibility::Runtime => "runtime".to_string(),
            Visibility::System => "system".to_string(),
            Visibility::Other(v) => format!("0x{:02x}", v),
        }
    }
}

/// annotation_item
/// https://source.android.com/docs/core/runtime/dex-format#annotation-item
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnnotationItem
{
    pub visibility: Visibility,
    pub annotation: EncodedAnnotation,
}

impl AnnotationItem
{
    pub fn new(visibility: Visibility, annotation: EncodedAnnotation) -> Self
    {
        AnnotationItem { visibility, annotation }
    }
}

impl ReadBlock for AnnotationItem
{
    fn read(reader: &mut DexReader<'_>) -> Result<Self, DexError>
    {
        let visibility = Visibility::from_u8(reader.read_u1()?);
        let annotation = EncodedAnnotation::read(reader)?;
        Ok(AnnotationItem { visibility, annotation })
    }
}

impl Block for AnnotationItem
{
    fn encoded_len(&self) -> usize
    {
        1 + self.annotation.encoded_len()
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<usize, DexError>
    {
        let c = write_u1(out, self.visibility.to_u8());
        Ok(c + self.annotation.write(out)?)
    }

    fn refresh(&mut self)
    {
        self.annotation.sort_elements();
    }
}

impl ReferenceHolder for AnnotationItem
{
    fn used_ids(&self) -> Box<dyn Iterator<Item = UsedId> + '_>
    {
        tagged(&self.annotation, UsageMarker::ANNOTATION)
    }

    fn visit_refs_mut(&mut self, visitor: &mut dyn FnMut(&mut dyn RefSlot))
    {
        self.annotation.visit_refs_mut(visitor);
    }
}

impl TextFormat for AnnotationItem
{
    fn append(&self, w: &mut TextWriter, sections: &SectionRegistry)
    {
        w.line(format!(".annotation {} {}", self.visibility.name(), self.annotation.to_text(sections)));
    }
}

fn read_offsets<T>(reader: &mut DexReader<'_>, what: &str) -> Result<Vec<DataRef<T>>, DexError>
where
    T: crate::dex::section::SectionItem + ReadBlock,
{
    let size = reader.read_u4()?;
    let mut entries = Vec::with_capacity(size.min(0x1000) as usize);
    for i in 0..size
    {
        let r = reader.read_data_ref::<T>(UsageMarker::ANNOTATION).context(|| format!("{} #{}", what, i))?;
        entries.push(r);
    }
    Ok(entries)
}

fn write_offsets<T>(out: &mut Vec<u8>, entries: &[DataRef<T>]) -> Result<usize, DexError>
{
    let mut c = write_u4(out, entries.len() as u32);
    for e in entries
    {
        c += write_u4(out, e.offset()?);
    }
    Ok(c)
}

/// annotation_set_item
/// A list of offsets to `annotation_item`s, ordered by annotation type.
/// https://source.android.com/docs/core/runtime/dex-format#annotation-set-item
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AnnotationSet
{
    pub entries: Vec<DataRef<AnnotationItem>>,
}

impl AnnotationSet
{
    pub fn new(items: &[u32]) -> Self
    {
        AnnotationSet { entries: items.iter().map(|&i| DataRef::new(i, UsageMarker::ANNOTATION)).collect() }
    }

    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }
}

impl ReadBlock for AnnotationSet
{
    fn read(reader: &mut DexReader<'_>) -> Result<Self, DexError>
    {
        Ok(AnnotationSet { entries: read_offsets(reader, "annotation")? })
    }
}

impl Block for AnnotationSet
{
    fn encoded_len(&self) -> usize
    {
        4 + self.entries.len() * 4
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<usize, DexError>
    {
        write_offsets(out, &self.entries)
    }
}

impl ReferenceHolder for AnnotationSet
{
    fn used_ids(&self) -> Box<dyn Iterator<Item = UsedId> + '_>
    {
        Box::new(self.entries.iter().filter_map(DataRef::used))
    }

    fn visit_refs_mut(&mut self, visitor: &mut dyn FnMut(&mut dyn RefSlot))
    {
        for e in self.entries.iter_mut()
        {
            visitor(e);
        }
    }
}

impl TextFormat for AnnotationSet
{
    fn append(&self, w: &mut TextWriter, sections: &SectionRegistry)
    {
        for item in self.entries.iter().filter_map(|e| e.resolve(sections))
        {
            item.append(w, sections);
        }
    }
}

/// annotation_set_ref_list
/// One optional annotation set per method parameter.
/// https://source.android.com/docs/core/runtime/dex-format#set-ref-list
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AnnotationSetRefList
{
    pub list: Vec<DataRef<AnnotationSet>>,
}

impl ReadBlock for AnnotationSetRefList
{
    fn read(reader: &mut DexReader<'_>) -> Result<Self, DexError>
    {
        Ok(AnnotationSetRefList { list: read_offsets(reader, "parameter annotation set")? })
    }
}

impl Block for AnnotationSetRefList
{
    fn encoded_len(&self) -> usize
    {
        4 + self.list.len() * 4
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<usize, DexError>
    {
        write_offsets(out, &self.list)
    }
}

impl ReferenceHolder for AnnotationSetRefList
{
    fn used_ids(&self) -> Box<dyn Iterator<Item = UsedId> + '_>
    {
        Box::new(self.list.iter().filter_map(DataRef::used))
    }

    fn visit_refs_mut(&mut self, visitor: &mut dyn FnMut(&mut dyn RefSlot))
    {
        for e in self.list.iter_mut()
        {
            visitor(e);
        }
    }
}

/// field_annotations_item
/// https://source.android.com/docs/core/runtime/dex-format#field-annotation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldAnnotation
{
    pub field: IdRef<FieldId>,
    pub annotations: DataRef<AnnotationSet>,
}

/// method_annotations_item
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodAnnotation
{
    pub method: IdRef<MethodId>,
    pub annotations: DataRef<AnnotationSet>,
}

/// parameter_annotations_item
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParameterAnnotation
{
    pub method: IdRef<MethodId>,
    pub annotations: DataRef<AnnotationSetRefList>,
}

/// annotations_directory_item
/// https://source.android.com/docs/core/runtime/dex-format#annotations-directory
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnnotationsDirectory
{
    pub class_annotations: DataRef<AnnotationSet>,
    pub fields: Vec<FieldAnnotation>,
    pub methods: Vec<MethodAnnotation>,
    pub parameters: Vec<ParameterAnnotation>,
}

impl Default for AnnotationsDirectory
{
    fn default() -> Self
    {
        AnnotationsDirectory {
            class_annotations: DataRef::none(UsageMarker::ANNOTATION),
            fields: vec![],
            methods: vec![],
            parameters: vec![],
        }
    }
}

impl AnnotationsDirectory
{
    pub fn is_empty(&self) -> bool
    {
        !self.class_annotations.is_present() && self.fields.is_empty() && self.methods.is_empty() && self.parameters.is_empty()
    }
}

impl ReadBlock for AnnotationsDirectory
{
    fn read(reader: &mut DexReader<'_>) -> Result<Self, DexError>
    {
        let usage = UsageMarker::ANNOTATION;
        let class_annotations = reader.read_data_ref::<AnnotationSet>(usage).context(|| "class annotations")?;
        let fields_size = reader.read_u4()?;
        let methods_size = reader.read_u4()?;
        let parameters_size = reader.read_u4()?;

        let mut fields = Vec::with_capacity(fields_size.min(0x1000) as usize);
        for i in 0..fields_size
        {
            let field = IdRef::new(reader.read_u4()?, usage);
            let annotations = reader.read_data_ref(usage).context(|| format!("field annotation #{}", i))?;
            fields.push(FieldAnnotation { field, annotations });
        }
        let mut methods = Vec::with_capacity(methods_size.min(0x1000) as usize);
        for i in 0..methods_size
        {
            let method = IdRef::new(reader.read_u4()?, usage);
            let annotations = reader.read_data_ref(usage).context(|| format!("method annotation #{}", i))?;
            methods.push(MethodAnnotation { method, annotations });
        }
        let mut parameters = Vec::with_capacity(parameters_size.min(0x1000) as usize);
        for i in 0..parameters_size
        {
            let method = IdRef::new(reader.read_u4()?, usage);
            let annotations = reader.read_data_ref(usage).context(|| format!("parameter annotation #{}", i))?;
            parameters.push(ParameterAnnotation { method, annotations });
        }
        Ok(AnnotationsDirectory { class_annotations, fields, methods, parameters })
    }
}

impl Block for AnnotationsDirectory
{
    fn encoded_len(&self) -> usize
    {
        16 + 8 * (self.fields.len() + self.methods.len() + self.parameters.len())
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<usize, DexError>
    {
        let mut c = write_u4(out, self.class_annotations.offset()?);
        c += write_u4(out, self.fields.len() as u32);
        c += write_u4(out, self.methods.len() as u32);
        c += write_u4(out, self.parameters.len() as u32);
        for f in &self.fields
        {
            c += write_u4(out, f.field.required()?);
            c += write_u4(out, f.annotations.offset()?);
        }
        for m in &self.methods
        {
            c += write_u4(out, m.method.required()?);
            c += write_u4(out, m.annotations.offset()?);
        }
        for p in &self.parameters
        {
            c += write_u4(out, p.method.required()?);
            c += write_u4(out, p.annotations.offset()?);
        }
        Ok(c)
    }

    /// Entries must be in increasing member index order.
    fn refresh(&mut self)
    {
        self.fields.sort_by_key(|f| f.field.raw());
        self.methods.sort_by_key(|m| m.method.raw());
        self.parameters.sort_by_key(|p| p.method.raw());
    }
}

impl ReferenceHolder for AnnotationsDirectory
{
    fn used_ids(&self) -> Box<dyn Iterator<Item = UsedId> + '_>
    {
        Box::new(
            self.class_annotations
                .used()
                .into_iter()
                .chain(self.fields.iter().flat_map(|f| f.field.used().into_iter().chain(f.annotations.used())))
                .chain(self.methods.iter().flat_map(|m| m.method.used().into_iter().chain(m.annotations.used())))
                .chain(self.parameters.iter().flat_map(|p| p.method.used().into_iter().chain(p.annotations.used()))),
        )
    }

    fn visit_refs_mut(&mut self, visitor: &mut dyn FnMut(&mut dyn RefSlot))
    {
        visitor(&mut self.class_annotations);
        for f in self.fields.iter_mut()
        {
            visitor(&mut f.field);
            visitor(&mut f.annotations);
        }
        for m in self.methods.iter_mut()
        {
            visitor(&mut m.method);
            visitor(&mut m.annotations);
        }
        for p in self.parameters.iter_mut()
        {
            visitor(&mut p.method);
            visitor(&mut p.annotations);
        }
    }
}

impl TextFormat for AnnotationsDirectory
{
    fn append(&self, w: &mut TextWriter, sections: &SectionRegistry)
    {
        if let Some(set) = self.class_annotations.resolve(sections)
        {
            set.append(w, sections);
        }
        for f in &self.fields
        {
            let name = f.field.index().map_or_else(|| "<none>".to_string(), |i| describe(sections, SectionType::FieldId, i));
            w.line(format!("# field {}", name));
            if let Some(set) = f.annotations.resolve(sections)
            {
                w.indented(|w| set.append(w, sections));
            }
        }
        for m in &self.methods
        {
            let name = m.method.index().map_or_else(|| "<none>".to_string(), |i| describe(sections, SectionType::MethodId, i));
            w.line(format!("# method {}", name));
            if let Some(set) = m.annotations.resolve(sections)
            {
                w.indented(|w| set.append(w, sections));
            }
        }
        for p in &self.parameters
        {
            let name = p.method.index().map_or_else(|| "<none>".to_string(), |i| describe(sections, SectionType::MethodId, i));
            let Some(list) = p.annotations.resolve(sections) else { continue };
            for (i, set) in list.list.iter().enumerate()
            {
                if let Some(set) = set.resolve(sections)
                {
                    w.line(format!("# parameter p{} of {}", i, name));
                    w.indented(|w| set.append(w, sections));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::ids::{DexString, TypeId};
    use crate::dex::values::DexValueBlock;

    #[test]
    fn annotation_item_bytes() {
        let mut a = EncodedAnnotation::new(2);
        a.set_element(5, DexValueBlock::int(1));
        let item = AnnotationItem::new(Visibility::Runtime, a);
        let mut out = vec![];
        assert_eq!(item.write(&mut out).unwrap(), item.encoded_len());
        assert_eq!(out, vec![0x01, 0x02, 0x01, 0x05, 0x04, 0x01]);

        let back = AnnotationItem::read(&mut DexReader::new(&out)).unwrap();
        assert_eq!(back, item);
        let used: Vec<_> = back.used_ids().map(|u| (u.section, u.index, u.usage)).collect();
        assert_eq!(
            used,
            vec![(SectionType::TypeId, 2, UsageMarker::ANNOTATION), (SectionType::StringId, 5, UsageMarker::ANNOTATION)]
        );
    }

    #[test]
    fn remap_reaches_annotation_elements() {
        let mut a = EncodedAnnotation::new(2);
        a.set_element(5, DexValueBlock::type_ref(2));
        let mut item = AnnotationItem::new(Visibility::Build, a);
        item.visit_refs_mut(&mut |slot| {
            if slot.section() == SectionType::TypeId {
                slot.set_index(Some(9));
            }
        });
        assert_eq!(item.annotation.annotation_type.index(), Some(9));
        assert_eq!(item.annotation.element(5), Some(&DexValueBlock::type_ref(9)));
    }

    #[test]
    fn directory_refresh_orders_members() {
        let mut dir = AnnotationsDirectory::default();
        for m in [4, 1] {
            dir.methods.push(MethodAnnotation {
                method: IdRef::new(m, UsageMarker::ANNOTATION),
                annotations: DataRef::resolved(0, 0x40, UsageMarker::ANNOTATION),
            });
        }
        dir.refresh();
        assert_eq!(dir.methods[0].method.index(), Some(1));
        let mut out = vec![];
        dir.write(&mut out).unwrap();
        assert_eq!(out.len(), dir.encoded_len());
        assert_eq!(&out[8..12], &[2, 0, 0, 0]);
    }

    #[test]
    fn text_uses_pool_names() {
        let mut reg = SectionRegistry::new();
        reg.strings.append(DexString::from("LAnno;"));
        reg.strings.append(DexString::from("value"));
        reg.types.append(TypeId::new(0));
        let mut a = EncodedAnnotation::new(0);
        a.set_element(1, DexValueBlock::boolean(true));
        let item = AnnotationItem::new(Visibility::Runtime, a);
        assert_eq!(item.to_text(&reg), ".annotation runtime LAnno; { value = true }\n");
    }
}
