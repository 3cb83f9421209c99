use std::collections::BTreeSet;

use crate::dex::key::{MethodKey, TypeKey};
use crate::dex::{DexFile, ReadOptions};
use crate::tests::{method_code, sample_dex};

fn method_keys(dex: &DexFile) -> BTreeSet<String> {
    let def = dex.sections.class_defs.get(0).unwrap();
    let data = def.class_data.resolve(&dex.sections).unwrap();
    data.methods()
        .map(|m| MethodKey::of(&dex.sections, m.method.index().unwrap()).unwrap().to_string())
        .collect()
}

fn descriptors(dex: &DexFile) -> Vec<String> {
    (0..dex.sections.types.len() as u32)
        .map(|i| TypeKey::of(&dex.sections, i).unwrap().descriptor().to_string())
        .collect()
}

#[test]
fn merged_class_carries_its_data() {
    let source = sample_dex();
    let mut target = DexFile::new(35);
    assert_eq!(target.merge_class(&source, 0).unwrap(), 0);
    assert_eq!(target.find_class("Lcom/example/Sample;"), Some(0));

    assert_eq!(target.sections.code_items.len(), 3);
    assert_eq!(target.sections.debug_infos.len(), 1);
    assert_eq!(target.sections.annotations.len(), 1);
    assert_eq!(target.sections.annotation_sets.len(), 1);
    assert_eq!(target.sections.annotations_directories.len(), 1);
    assert_eq!(target.sections.encoded_arrays.len(), 1);
    assert_eq!(target.sections.class_data.len(), 1);

    // everything in the sample is reachable, so the id pools come across whole
    assert_eq!(target.sections.strings.len(), source.sections.strings.len());
    assert_eq!(target.sections.types.len(), source.sections.types.len());
    assert_eq!(target.sections.protos.len(), source.sections.protos.len());
    assert_eq!(target.sections.methods.len(), source.sections.methods.len());
    assert_eq!(target.sections.fields.len(), source.sections.fields.len());

    assert_eq!(method_keys(&target), method_keys(&source));
}

#[test]
fn merged_code_keeps_its_meaning() {
    let source = sample_dex();
    let mut target = DexFile::new(35);
    target.intern_string("zzz");
    target.merge_class(&source, 0).unwrap();

    let theirs = method_code(&source, "apply");
    let ours = method_code(&target, "apply");
    let operand = ours.insns.units()[1] as u32;
    assert_eq!(target.sections.strings.get(operand).and_then(|s| s.as_str()), Some("hello"));
    assert_eq!(ours.debug_info.resolve(&target.sections).map(|d| d.line_start), Some(12));

    let our_handlers = ours.try_block().and_then(|t| t.handlers_at(0)).unwrap();
    let their_handlers = theirs.try_block().and_then(|t| t.handlers_at(0)).unwrap();
    assert!(our_handlers.is_equivalent(&target.sections, their_handlers, &source.sections));
    assert_eq!(our_handlers.catch_all(), Some(3));
}

#[test]
fn shared_types_are_interned() {
    let source = sample_dex();
    let mut target = DexFile::new(35);
    let object = target.intern_type("Ljava/lang/Object;");
    target.intern_type("Ljava/io/IOException;");
    target.merge_class(&source, 0).unwrap();

    let all = descriptors(&target);
    let unique: BTreeSet<_> = all.iter().collect();
    assert_eq!(all.len(), unique.len());
    assert_eq!(all.len(), source.sections.types.len());

    let def = target.sections.class_defs.get(0).unwrap();
    assert_eq!(def.superclass.index(), Some(object));
}

#[test]
fn merged_file_writes_and_reads_back() {
    let source = sample_dex();
    let mut target = DexFile::new(35);
    target.merge_class(&source, 0).unwrap();
    let image = target.write().unwrap();

    let back = DexFile::read_with(&image, ReadOptions { verify_checksum: true, strict_header: true, strict_items: true }).unwrap();
    assert_eq!(back.find_class("Lcom/example/Sample;"), Some(0));
    assert_eq!(back.sections.strings, target.sections.strings);
    assert_eq!(back.sections.code_items.len(), 3);
    assert_eq!(method_keys(&back), method_keys(&source));
    assert!(back.dump().contains(".implements Ljava/lang/Runnable;"));
}

#[test]
fn merging_twice_is_rejected() {
    let source = sample_dex();
    let mut target = DexFile::new(35);
    target.merge_class(&source, 0).unwrap();
    assert!(target.merge_class(&source, 0).is_err());
    assert!(target.merge_class(&source, 1).is_err());
    assert_eq!(target.sections.class_defs.len(), 1);
}
