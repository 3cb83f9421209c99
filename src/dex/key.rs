//! Position-independent identities for pool items.
//!
//! Two references into different pools (or into one pool before and after a
//! sort) name the same thing when their keys are equal. Keys are also what the
//! cross-file translator interns into the target file.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dex::error::{DexError, ResultExt};
use crate::dex::ids::{shorty_char, DexString, FieldId, MethodId, ProtoId, TypeId};
use crate::dex::reference::{RefSlot, ReferenceHolder};
use crate::dex::section::{SectionItem, SectionRegistry, SectionType};

pub(crate) fn string_at(sections: &SectionRegistry, index: u32) -> Result<String, DexError>
{
    Ok(sections.require::<DexString>(index)?.to_string_lossy())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeKey(pub String);

impl TypeKey
{
    pub fn of(sections: &SectionRegistry, type_index: u32) -> Result<TypeKey, DexError>
    {
        let t = sections.require::<TypeId>(type_index)?;
        Ok(TypeKey(string_at(sections, t.descriptor.required()?)?))
    }

    pub fn descriptor(&self) -> &str
    {
        &self.0
    }
}

impl fmt::Display for TypeKey
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(&self.0)
    }
}

impl From<&str> for TypeKey
{
    fn from(s: &str) -> Self
    {
        TypeKey(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProtoKey
{
    pub return_type: TypeKey,
    pub parameters: Vec<TypeKey>,
}

impl ProtoKey
{
    pub fn of(sections: &SectionRegistry, proto_index: u32) -> Result<ProtoKey, DexError>
    {
        let p = sections.require::<ProtoId>(proto_index)?;
        let return_type = TypeKey::of(sections, p.return_type.required()?)?;
        let mut parameters = vec![];
        if let Some(list) = p.parameters.resolve(sections)
        {
            for t in &list.types
            {
                parameters.push(TypeKey::of(sections, t.required()?)?);
            }
        }
        Ok(ProtoKey { return_type, parameters })
    }

    pub fn shorty(&self) -> String
    {
        std::iter::once(&self.return_type).chain(self.parameters.iter()).map(|t| shorty_char(&t.0)).collect()
    }
}

impl fmt::Display for ProtoKey
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str("(")?;
        for p in &self.parameters
        {
            f.write_str(&p.0)?;
        }
        write!(f, "){}", self.return_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldKey
{
    pub class: TypeKey,
    pub name: String,
    pub field_type: TypeKey,
}

impl FieldKey
{
    pub fn of(sections: &SectionRegistry, field_index: u32) -> Result<FieldKey, DexError>
    {
        let f = sections.require::<FieldId>(field_index)?;
        Ok(FieldKey {
            class: TypeKey::of(sections, f.class.required()?)?,
            name: string_at(sections, f.name.required()?)?,
            field_type: TypeKey::of(sections, f.field_type.required()?)?,
        })
    }
}

impl fmt::Display for FieldKey
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}->{}:{}", self.class, self.name, self.field_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodKey
{
    pub class: TypeKey,
    pub name: String,
    pub proto: ProtoKey,
}

impl MethodKey
{
    pub fn of(sections: &SectionRegistry, method_index: u32) -> Result<MethodKey, DexError>
    {
        let m = sections.require::<MethodId>(method_index)?;
        Ok(MethodKey {
            class: TypeKey::of(sections, m.class.required()?)?,
            name: string_at(sections, m.name.required()?)?,
            proto: ProtoKey::of(sections, m.proto.required()?)?,
        })
    }
}

impl fmt::Display for MethodKey
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}->{}{}", self.class, self.name, self.proto)
    }
}

/// Maps a reference from the pools it was read against to the pools it will be written with.
pub trait RefTranslator
{
    fn translate(&mut self, section: SectionType, index: u32) -> Result<u32, DexError>;
}

/// Translation within a single file.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityTranslator;

impl RefTranslator for IdentityTranslator
{
    fn translate(&mut self, _section: SectionType, index: u32) -> Result<u32, DexError>
    {
        Ok(index)
    }
}

/// Rewrite every reference held by `holder` through `translator`.
pub fn translate_refs(holder: &mut dyn ReferenceHolder, translator: &mut dyn RefTranslator) -> Result<(), DexError>
{
    let mut failure = None;
    holder.visit_refs_mut(&mut |slot: &mut dyn RefSlot| {
        if failure.is_some()
        {
            return;
        }
        if let Some(index) = slot.index()
        {
            match translator.translate(slot.section(), index)
            {
                Ok(new) => slot.set_index(Some(new)),
                Err(e) => failure = Some(e),
            }
        }
    });
    match failure
    {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Copies items from one file's pools into another's, interning id items so
/// equal keys land on one entry and deep-copying data items.
pub struct KeyTranslator<'a>
{
    source: &'a SectionRegistry,
    target: &'a mut SectionRegistry,
    cache: HashMap<(SectionType, u32), u32>,
}

impl<'a> KeyTranslator<'a>
{
    pub fn new(source: &'a SectionRegistry, target: &'a mut SectionRegistry) -> Self
    {
        KeyTranslator { source, target, cache: HashMap::new() }
    }

    pub fn target(&self) -> &SectionRegistry
    {
        self.target
    }

    /// Number of distinct source items translated so far.
    pub fn translated(&self) -> usize
    {
        self.cache.len()
    }

    fn copy_item<T>(&mut self, index: u32, intern: bool) -> Result<u32, DexError>
    where
        T: SectionItem + ReferenceHolder + Clone + PartialEq,
    {
        let mut item = T::section(self.source).require(index).context(|| T::SECTION.name())?.clone();
        translate_refs(&mut item, self)?;
        let section = T::section_mut(self.target);
        Ok(if intern { section.intern(item) } else { section.append(item) })
    }
}

impl RefTranslator for KeyTranslator<'_>
{
    fn translate(&mut self, section: SectionType, index: u32) -> Result<u32, DexError>
    {
        if let Some(&done) = self.cache.get(&(section, index))
        {
            return Ok(done);
        }
        use crate::dex::annotations::{AnnotationItem, AnnotationSet, AnnotationSetRefList, AnnotationsDirectory};
        use crate::dex::class_data::ClassData;
        use crate::dex::code::CodeItem;
        use crate::dex::debug_info::DebugInfo;
        use crate::dex::encoded_array::EncodedArray;
        use crate::dex::ids::TypeList;

        let new = match section
        {
            SectionType::StringId | SectionType::StringData =>
            {
                let s = self.source.require::<DexString>(index)?.clone();
                self.target.strings.intern(s)
            }
            SectionType::TypeId => self.copy_item::<TypeId>(index, true)?,
            SectionType::ProtoId => self.copy_item::<ProtoId>(index, true)?,
            SectionType::FieldId => self.copy_item::<FieldId>(index, true)?,
            SectionType::MethodId => self.copy_item::<MethodId>(index, true)?,
            SectionType::TypeList => self.copy_item::<TypeList>(index, true)?,
            SectionType::Annotation => self.copy_item::<AnnotationItem>(index, true)?,
            SectionType::AnnotationSet => self.copy_item::<AnnotationSet>(index, true)?,
            SectionType::AnnotationSetRefList => self.copy_item::<AnnotationSetRefList>(index, true)?,
            SectionType::EncodedArray => self.copy_item::<EncodedArray>(index, true)?,
            SectionType::AnnotationsDirectory => self.copy_item::<AnnotationsDirectory>(index, false)?,
            SectionType::ClassData => self.copy_item::<ClassData>(index, false)?,
            SectionType::Code => self.copy_item::<CodeItem>(index, false)?,
            SectionType::DebugInfo => self.copy_item::<DebugInfo>(index, false)?,
            SectionType::ClassId | SectionType::Header | SectionType::MapList =>
            {
                fail!(FormatMismatch, "{} items are not reference targets", section)
            }
        };
        self.cache.insert((section, index), new);
        Ok(new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::ids::TypeList;
    use crate::dex::reference::{DataRef, IdRef};
    use crate::dex::section::UsageMarker;

    fn registry(descriptors: &[&str]) -> SectionRegistry {
        let mut reg = SectionRegistry::new();
        for d in descriptors {
            let s = reg.strings.append(DexString::from(*d));
            reg.types.append(TypeId::new(s));
        }
        reg
    }

    #[test]
    fn keys_resolve_through_pools() {
        let mut reg = registry(&["I", "Lfoo/Bar;", "V"]);
        let name = reg.strings.append(DexString::from("run"));
        let shorty = reg.strings.append(DexString::from("VIL"));
        let params = reg.type_lists.append(TypeList::new(&[0, 1]));
        let proto = reg.protos.append(ProtoId {
            shorty: IdRef::new(shorty, UsageMarker::ID_ITEM),
            return_type: IdRef::new(2, UsageMarker::ID_ITEM),
            parameters: DataRef::new(params, UsageMarker::ID_ITEM),
        });
        reg.methods.append(MethodId {
            class: IdRef::new(1, UsageMarker::ID_ITEM),
            proto: IdRef::new(proto, UsageMarker::ID_ITEM),
            name: IdRef::new(name, UsageMarker::ID_ITEM),
        });

        let key = MethodKey::of(&reg, 0).unwrap();
        assert_eq!(key.to_string(), "Lfoo/Bar;->run(ILfoo/Bar;)V");
        assert_eq!(key.proto.shorty(), "VIL");
        assert!(TypeKey::of(&reg, 9).is_err());
    }

    #[test]
    fn key_translator_interns_equal_types() {
        let source = registry(&["La;", "Lb;"]);
        let mut target = registry(&["Lb;"]);
        let mut tr = KeyTranslator::new(&source, &mut target);
        assert_eq!(tr.translate(SectionType::TypeId, 1).unwrap(), 0);
        assert_eq!(tr.translate(SectionType::TypeId, 0).unwrap(), 1);
        assert_eq!(tr.translate(SectionType::TypeId, 0).unwrap(), 1);
        assert_eq!(TypeKey::of(tr.target(), 1).unwrap(), TypeKey::from("La;"));
        assert_eq!(target.types.len(), 2);
        assert_eq!(target.strings.len(), 2);
    }

    #[test]
    fn key_translator_rejects_class_defs() {
        let source = registry(&[]);
        let mut target = registry(&[]);
        let mut tr = KeyTranslator::new(&source, &mut target);
        assert!(tr.translate(SectionType::ClassId, 0).is_err());
    }
}
