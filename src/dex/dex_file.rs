//! A whole DEX image: header, pools and the passes that run over all of them.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use log::{debug, info, warn};

use crate::dex::block::ReadBlock;
use crate::dex::class_data::access_names;
use crate::dex::error::{DexError, ResultExt};
use crate::dex::header::{DexHeader, SectionSpan};
use crate::dex::ids::{shorty_char, ClassDef, DexString, FieldId, MethodId, ProtoId, TypeId, TypeList};
use crate::dex::key::{translate_refs, KeyTranslator, TypeKey};
use crate::dex::layout;
use crate::dex::map_list::MapList;
use crate::dex::reader::{BlockReader, ByteSource, DexReader};
use crate::dex::reference::{DataRef, IdRef, RefSlot, UsedId};
use crate::dex::section::{IndexRemap, SectionItem, SectionRegistry, SectionType, UsageMarker};
use crate::dex::text::{type_name, string_literal, TextFormat, TextWriter};

/// How forgiving [`DexFile::read_with`] is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions
{
    /// Fail on a checksum mismatch instead of logging it.
    pub verify_checksum: bool,
    /// Reject unknown versions and surplus header bytes.
    pub strict_header: bool,
    /// Reject data items that break a format invariant, such as a code item
    /// with more parameter registers than registers.
    pub strict_items: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DexFile
{
    pub header: DexHeader,
    pub sections: SectionRegistry,
    /// The map list as last read or written.
    pub map: MapList,
}

impl Default for DexFile
{
    fn default() -> Self
    {
        DexFile::new(35)
    }
}

fn read_ids<T>(reader: &mut DexReader<'_>, span: SectionSpan) -> Result<(), DexError>
where
    T: SectionItem + ReadBlock,
{
    if span.size == 0
    {
        return Ok(());
    }
    reader.seek(span.offset as usize).context(|| format!("{} table", T::SECTION))?;
    for i in 0..span.size
    {
        let item = T::read(reader).context(|| format!("{} #{}", T::SECTION, i))?;
        T::section_mut(reader.sections_mut()).append(item);
    }
    Ok(())
}

impl DexFile
{
    /// An empty image of the given format version.
    pub fn new(version: u32) -> Self
    {
        DexFile { header: DexHeader::new(version), sections: SectionRegistry::new(), map: MapList::default() }
    }

    pub fn read(bytes: &[u8]) -> Result<DexFile, DexError>
    {
        DexFile::read_with(bytes, ReadOptions::default())
    }

    pub fn read_with(bytes: &[u8], options: ReadOptions) -> Result<DexFile, DexError>
    {
        info!("Reading dex file of {} bytes", bytes.len());
        let mut block_reader = BlockReader::new(bytes);
        let header = DexHeader::read(&mut block_reader, options.strict_header).context(|| "header")?;

        if !header.verify_checksum(bytes)
        {
            if options.verify_checksum
            {
                fail!(FormatMismatch, "checksum 0x{:08x} does not match contents", header.checksum);
            }
            warn!("Checksum 0x{:08x} does not match contents", header.checksum);
        }
        if header.file_size as usize != bytes.len()
        {
            warn!("Header file size 0x{:x} differs from input size 0x{:x}", header.file_size, bytes.len());
        }

        let mut reader = DexReader::with_reader(block_reader);
        reader.set_strict(options.strict_items);

        let map = if header.map_off == 0
        {
            MapList::default()
        }
        else
        {
            reader.seek(header.map_off as usize).context(|| "map list")?;
            let map = MapList::read(&mut reader).context(|| "map list")?;
            map.validate(bytes.len());
            map
        };

        // string ids point at their data; read it in id order
        if header.string_ids.size > 0
        {
            reader.seek(header.string_ids.offset as usize).context(|| "string id table")?;
            for i in 0..header.string_ids.size
            {
                let offset = reader.read_u4()?;
                let saved = reader.position();
                reader.seek(offset as usize).context(|| format!("string id #{}", i))?;
                let s = DexString::read(&mut reader).context(|| format!("string data at 0x{:x}", offset))?;
                reader.seek(saved)?;
                reader.sections_mut().strings.append(s);
            }
        }
        read_ids::<TypeId>(&mut reader, header.type_ids)?;
        read_ids::<ProtoId>(&mut reader, header.proto_ids)?;
        read_ids::<FieldId>(&mut reader, header.field_ids)?;
        read_ids::<MethodId>(&mut reader, header.method_ids)?;
        read_ids::<ClassDef>(&mut reader, header.class_defs)?;

        let sections = reader.into_sections();
        info!(
            "Read {} strings, {} types, {} methods and {} classes",
            sections.strings.len(),
            sections.types.len(),
            sections.methods.len(),
            sections.class_defs.len()
        );
        Ok(DexFile { header, sections, map })
    }

    pub fn from_file(path: &Path) -> Result<DexFile, DexError>
    {
        let bytes = fs::read(path).map_err(|e| DexError::with_context(DexError::from(e), path.display().to_string()))?;
        DexFile::read(&bytes)
    }

    /// Refresh every item, lay the image out and encode it. The header and
    /// map list are updated to describe the result, and the signature and
    /// checksum are computed last, in that order.
    pub fn write(&mut self) -> Result<Vec<u8>, DexError>
    {
        self.sections.refresh_all();
        let plan = layout::plan(&self.header, &mut self.sections)?;
        plan.apply_to(&mut self.header);
        let mut image = layout::emit(&self.header, &self.sections, &plan)?;
        self.header.update_signature(&mut image)?;
        self.header.update_checksum(&mut image)?;
        self.map = plan.map;
        info!("Wrote dex file of {} bytes, checksum 0x{:08x}", image.len(), self.header.checksum);
        Ok(image)
    }

    pub fn write_file(&mut self, path: &Path) -> Result<(), DexError>
    {
        let image = self.write()?;
        fs::write(path, image).map_err(|e| DexError::with_context(DexError::from(e), path.display().to_string()))
    }

    /// Every pool item reachable from the class definitions, with the union
    /// of the usages it is referenced under, ordered by section then index.
    pub fn used_ids(&self) -> Result<Vec<UsedId>, DexError>
    {
        let mut seen: HashMap<(SectionType, u32), UsageMarker> = HashMap::new();
        let mut pending = vec![];
        for index in 0..self.sections.class_defs.len() as u32
        {
            seen.insert((SectionType::ClassId, index), UsageMarker::DEFINITION);
            pending.push((SectionType::ClassId, index));
        }
        while let Some((kind, index)) = pending.pop()
        {
            let refs = self.sections.used_ids_of(kind, index).context(|| format!("{} #{}", kind, index))?;
            for used in refs
            {
                if self.sections.len(used.section) <= used.index as usize
                {
                    fail!(
                        IndexOutOfRange,
                        "{} #{} refers to {} #{} beyond pool of {}",
                        kind,
                        index,
                        used.section,
                        used.index,
                        self.sections.len(used.section)
                    );
                }
                match seen.get_mut(&(used.section, used.index))
                {
                    Some(usage) => *usage |= used.usage,
                    None =>
                    {
                        seen.insert((used.section, used.index), used.usage);
                        pending.push((used.section, used.index));
                    }
                }
            }
        }
        let mut out: Vec<UsedId> = seen.into_iter().map(|((section, index), usage)| UsedId { section, index, usage }).collect();
        out.sort_by_key(|u| (u.section, u.index));
        Ok(out)
    }

    /// Replace the recorded usages with the result of a fresh reachability
    /// scan. Returns the number of items found in use.
    pub fn mark_usage(&mut self) -> Result<usize, DexError>
    {
        let used = self.used_ids()?;
        self.sections.clear_usage();
        for u in &used
        {
            let usage = if u.usage.is_empty() { UsageMarker::ID_ITEM } else { u.usage };
            self.sections.mark_with(u.section, u.index, usage)?;
        }
        debug!("Marked {} items in use", used.len());
        Ok(used.len())
    }

    /// Drop every pool item the class definitions do not reach and rewrite
    /// all references. Returns the number of items removed.
    pub fn remove_unused(&mut self) -> Result<usize, DexError>
    {
        self.mark_usage()?;
        let remaps = self.sections.compact_all();
        let removed: usize = remaps.values().map(IndexRemap::removed).sum();
        for (kind, remap) in &remaps
        {
            debug!("Compacted {}: {} of {} removed", kind, remap.removed(), remap.len());
        }
        self.apply_remap(&remaps);
        Ok(removed)
    }

    /// Rewrite every reference into a remapped section.
    pub fn apply_remap(&mut self, remaps: &HashMap<SectionType, IndexRemap>)
    {
        if remaps.is_empty()
        {
            return;
        }
        self.sections.visit_refs_mut(&mut |slot: &mut dyn RefSlot| {
            if let Some(remap) = remaps.get(&slot.section())
            {
                slot.apply_remap(remap);
            }
        });
    }

    fn reorder(&mut self, kind: SectionType, order: Vec<u32>) -> Result<(), DexError>
    {
        let remap = self.sections.reorder(kind, &order)?;
        if !remap.is_identity()
        {
            self.apply_remap(&HashMap::from([(kind, remap)]));
        }
        Ok(())
    }

    /// Put the id sections in the order the format requires, remapping all users.
    pub fn sort_ids(&mut self) -> Result<(), DexError>
    {
        let s = &self.sections;
        let mut order: Vec<u32> = (0..s.strings.len() as u32).collect();
        order.sort_by(|&a, &b| match (s.strings.get(a), s.strings.get(b))
        {
            (Some(x), Some(y)) => x.cmp_utf16(y),
            _ => Ordering::Equal,
        });
        self.reorder(SectionType::StringId, order)?;

        let s = &self.sections;
        let mut order: Vec<u32> = (0..s.types.len() as u32).collect();
        order.sort_by_key(|&i| s.types.get(i).map(|t| t.descriptor.raw()));
        self.reorder(SectionType::TypeId, order)?;

        let s = &self.sections;
        let params = |p: &ProtoId| -> Vec<u32> {
            p.parameters.resolve(s).map(|l| l.types.iter().map(|t| t.raw()).collect()).unwrap_or_default()
        };
        let mut order: Vec<u32> = (0..s.protos.len() as u32).collect();
        order.sort_by_key(|&i| s.protos.get(i).map(|p| (p.return_type.raw(), params(p))));
        self.reorder(SectionType::ProtoId, order)?;

        let s = &self.sections;
        let mut order: Vec<u32> = (0..s.fields.len() as u32).collect();
        order.sort_by_key(|&i| s.fields.get(i).map(|f| (f.class.raw(), f.name.raw(), f.field_type.raw())));
        self.reorder(SectionType::FieldId, order)?;

        let s = &self.sections;
        let mut order: Vec<u32> = (0..s.methods.len() as u32).collect();
        order.sort_by_key(|&i| s.methods.get(i).map(|m| (m.class.raw(), m.name.raw(), m.proto.raw())));
        self.reorder(SectionType::MethodId, order)?;

        debug!("Sorted id sections");
        Ok(())
    }

    pub fn intern_string(&mut self, s: &str) -> u32
    {
        self.sections.strings.intern(DexString::from(s))
    }

    pub fn intern_type(&mut self, descriptor: &str) -> u32
    {
        let s = self.intern_string(descriptor);
        self.sections.types.intern(TypeId::new(s))
    }

    pub fn intern_proto(&mut self, return_type: &str, parameters: &[&str]) -> u32
    {
        let shorty: String = std::iter::once(return_type).chain(parameters.iter().copied()).map(shorty_char).collect();
        let shorty = self.intern_string(&shorty);
        let return_type = self.intern_type(return_type);
        let params: Vec<u32> = parameters.iter().map(|p| self.intern_type(p)).collect();
        let parameters = if params.is_empty()
        {
            DataRef::none(UsageMarker::ID_ITEM)
        }
        else
        {
            DataRef::new(self.sections.type_lists.intern(TypeList::new(&params)), UsageMarker::ID_ITEM)
        };
        self.sections.protos.intern(ProtoId {
            shorty: IdRef::new(shorty, UsageMarker::ID_ITEM),
            return_type: IdRef::new(return_type, UsageMarker::ID_ITEM),
            parameters,
        })
    }

    pub fn intern_field(&mut self, class: &str, name: &str, field_type: &str) -> u32
    {
        let class = self.intern_type(class);
        let field_type = self.intern_type(field_type);
        let name = self.intern_string(name);
        self.sections.fields.intern(FieldId {
            class: IdRef::new(class, UsageMarker::ID_ITEM),
            field_type: IdRef::new(field_type, UsageMarker::ID_ITEM),
            name: IdRef::new(name, UsageMarker::ID_ITEM),
        })
    }

    pub fn intern_method(&mut self, class: &str, name: &str, return_type: &str, parameters: &[&str]) -> u32
    {
        let class = self.intern_type(class);
        let proto = self.intern_proto(return_type, parameters);
        let name = self.intern_string(name);
        self.sections.methods.intern(MethodId {
            class: IdRef::new(class, UsageMarker::ID_ITEM),
            proto: IdRef::new(proto, UsageMarker::ID_ITEM),
            name: IdRef::new(name, UsageMarker::ID_ITEM),
        })
    }

    /// Index of the class definition for `descriptor`, if this file defines it.
    pub fn find_class(&self, descriptor: &str) -> Option<u32>
    {
        self.sections.class_defs.position(|c| {
            c.class.index().and_then(|t| TypeKey::of(&self.sections, t).ok()).is_some_and(|k| k.descriptor() == descriptor)
        })
    }

    /// Copy class definition `class_index` of `source`, and everything it
    /// references, into this file. Id items are interned by key; data items
    /// are copied. Returns the new class definition's index.
    pub fn merge_class(&mut self, source: &DexFile, class_index: u32) -> Result<u32, DexError>
    {
        let mut def = source.sections.require::<ClassDef>(class_index)?.clone();
        let descriptor = def.class.required().and_then(|t| TypeKey::of(&source.sections, t))?;
        if self.find_class(descriptor.descriptor()).is_some()
        {
            fail!(FormatMismatch, "class {} is already defined", descriptor);
        }
        let mut translator = KeyTranslator::new(&source.sections, &mut self.sections);
        translate_refs(&mut def, &mut translator).context(|| format!("class {}", descriptor))?;
        debug!("Merged class {} ({} items translated)", descriptor, translator.translated());
        Ok(self.sections.class_defs.append(def))
    }

    /// Text projection of the whole image.
    pub fn dump(&self) -> String
    {
        let mut w = TextWriter::new();
        self.header.append(&mut w, &self.sections);
        for def in self.sections.class_defs.iter()
        {
            w.blank();
            append_class(def, &mut w, &self.sections);
        }
        w.finish()
    }
}

fn append_class(def: &ClassDef, w: &mut TextWriter, sections: &SectionRegistry)
{
    let access = access_names(def.access_flags, false);
    w.line(format!(".class {}{}{}", access, if access.is_empty() { "" } else { " " }, type_name(sections, &def.class)));
    if def.superclass.is_present()
    {
        w.line(format!(".super {}", type_name(sections, &def.superclass)));
    }
    if def.source_file.is_present()
    {
        w.line(format!(".source {}", string_literal(sections, &def.source_file)));
    }
    if let Some(interfaces) = def.interfaces.resolve(sections)
    {
        for t in &interfaces.types
        {
            w.line(format!(".implements {}", type_name(sections, t)));
        }
    }
    if let Some(dir) = def.annotations.resolve(sections)
    {
        dir.append(w, sections);
    }
    if let Some(values) = def.static_values.resolve(sections)
    {
        w.line(format!(".static-values {}", values.to_text(sections).trim_end()));
    }
    if let Some(data) = def.class_data.resolve(sections)
    {
        data.append(w, sections);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::error::DexErrorKind;
    use crate::dex::ids::AccessFlags;

    #[test]
    fn interning_reuses_items() {
        let mut dex = DexFile::new(35);
        let a = dex.intern_method("LA;", "run", "V", &["I", "LA;"]);
        let b = dex.intern_method("LA;", "run", "V", &["I", "LA;"]);
        assert_eq!(a, b);
        assert_eq!(dex.sections.types.len(), 3);
        assert_eq!(dex.sections.type_lists.len(), 1);
        let shorty = dex.sections.protos.get(0).and_then(|p| p.shorty.resolve(&dex.sections)).cloned();
        assert_eq!(shorty, Some(DexString::from("VIL")));
    }

    #[test]
    fn empty_file_round_trips() {
        let mut dex = DexFile::new(35);
        let image = dex.write().unwrap();
        assert_eq!(image.len() as u32, dex.header.file_size);
        let back = DexFile::read_with(&image, ReadOptions { verify_checksum: true, strict_header: true, strict_items: true }).unwrap();
        assert_eq!(back.header, dex.header);
        assert_eq!(back.map, dex.map);
    }

    #[test]
    fn corrupted_checksum_is_fatal_only_when_verified() {
        let mut dex = DexFile::new(35);
        let mut image = dex.write().unwrap();
        let last = image.len() - 1;
        image[last] ^= 0x01;
        assert!(DexFile::read(&image).is_ok());
        let e = DexFile::read_with(&image, ReadOptions { verify_checksum: true, ..Default::default() }).unwrap_err();
        assert_eq!(e.kind(), DexErrorKind::FormatMismatch);
    }

    #[test]
    fn dangling_reference_fails_scan() {
        let mut dex = DexFile::new(35);
        let t = dex.intern_type("LA;");
        let mut def = ClassDef::new(t, AccessFlags::PUBLIC);
        def.superclass = IdRef::new(9, UsageMarker::DEFINITION);
        dex.sections.class_defs.append(def);
        let e = dex.mark_usage().unwrap_err();
        assert_eq!(e.kind(), DexErrorKind::IndexOutOfRange);
    }

    #[test]
    fn duplicate_class_is_rejected() {
        let mut dex = DexFile::new(35);
        let t = dex.intern_type("LA;");
        dex.sections.class_defs.append(ClassDef::new(t, AccessFlags::PUBLIC));
        let other = dex.clone();
        let e = dex.merge_class(&other, 0).unwrap_err();
        assert_eq!(e.kind(), DexErrorKind::FormatMismatch);
        assert_eq!(dex.find_class("LA;"), Some(0));
        assert_eq!(dex.find_class("LB;"), None);
    }
}
