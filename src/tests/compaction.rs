use crate::dex::section::SectionType;
use crate::dex::{DexErrorKind, DexFile, UsageMarker};
use crate::tests::{method_code, sample_dex};

fn const_string_operand(dex: &DexFile) -> Option<&str> {
    let code = method_code(dex, "apply");
    dex.sections.strings.get(code.insns.units()[1] as u32).and_then(|s| s.as_str())
}

#[test]
fn sample_has_nothing_to_remove() {
    let mut dex = sample_dex();
    let before = dex.sections.clone();
    assert_eq!(dex.remove_unused().unwrap(), 0);
    assert_eq!(dex.sections, before);
}

#[test]
fn used_ids_carry_usages() {
    let dex = sample_dex();
    let used = dex.used_ids().unwrap();
    let usage_of = |kind: SectionType, s: &str| {
        let index = match kind {
            SectionType::StringId => dex.sections.strings.position(|d| d.as_str() == Some(s)),
            _ => dex
                .sections
                .types
                .position(|t| t.descriptor.resolve(&dex.sections).and_then(|d| d.as_str()) == Some(s)),
        }
        .unwrap();
        used.iter().find(|u| u.section == kind && u.index == index).map(|u| u.usage)
    };

    assert_eq!(usage_of(SectionType::StringId, "hello"), Some(UsageMarker::INSTRUCTION));
    assert_eq!(usage_of(SectionType::StringId, "arg"), Some(UsageMarker::DEBUG));
    assert_eq!(usage_of(SectionType::StringId, "Sample.java"), Some(UsageMarker::DEFINITION));
    assert_eq!(usage_of(SectionType::TypeId, "Ljava/io/IOException;"), Some(UsageMarker::CATCH));
    let marker = usage_of(SectionType::TypeId, "Lcom/example/Marker;").unwrap();
    assert!(marker.contains(UsageMarker::ANNOTATION));

    let mut sorted = used.clone();
    sorted.sort_by_key(|u| (u.section, u.index));
    assert_eq!(sorted, used);
    assert!(used.iter().any(|u| u.section == SectionType::Code));
    assert!(used.iter().any(|u| u.section == SectionType::DebugInfo));
}

#[test]
fn mark_usage_counts_reachable_items() {
    let mut dex = sample_dex();
    let reachable = dex.used_ids().unwrap().len();
    dex.intern_string("orphan");
    assert_eq!(dex.mark_usage().unwrap(), reachable);
    let orphan = dex.sections.strings.position(|s| s.as_str() == Some("orphan")).unwrap();
    assert_eq!(dex.sections.usage(SectionType::StringId, orphan), Some(UsageMarker::empty()));
    assert_eq!(dex.sections.usage(SectionType::ClassId, 0), Some(UsageMarker::DEFINITION));
}

#[test]
fn unused_items_are_removed_and_operands_follow() {
    let mut dex = sample_dex();
    dex.intern_string("orphan");
    dex.intern_type("Lcom/example/Gone;");
    // sorting moves the orphans in front of "hello"
    dex.sort_ids().unwrap();
    assert_eq!(const_string_operand(&dex), Some("hello"));
    let strings = dex.sections.strings.len();
    let types = dex.sections.types.len();

    // two strings and one type
    assert_eq!(dex.remove_unused().unwrap(), 3);
    assert_eq!(dex.sections.strings.len(), strings - 2);
    assert_eq!(dex.sections.types.len(), types - 1);
    assert_eq!(const_string_operand(&dex), Some("hello"));
    assert!(dex.sections.strings.iter().all(|s| s.as_str() != Some("orphan")));
    assert_eq!(dex.find_class("Lcom/example/Sample;"), Some(0));

    let image = dex.write().unwrap();
    let back = DexFile::read(&image).unwrap();
    assert_eq!(back.sections.strings, dex.sections.strings);
    assert_eq!(back.sections.types, dex.sections.types);
    assert_eq!(back.sections.methods, dex.sections.methods);
    assert_eq!(const_string_operand(&back), Some("hello"));
}

#[test]
fn sorted_ids_stay_sorted_and_resolvable() {
    let mut dex = sample_dex();
    dex.intern_string("aaa");
    dex.sort_ids().unwrap();
    let strings: Vec<_> = dex.sections.strings.iter().collect();
    assert!(strings.windows(2).all(|w| w[0].cmp_utf16(w[1]).is_le()));
    let descriptors: Vec<_> = dex
        .sections
        .types
        .iter()
        .map(|t| t.descriptor.raw())
        .collect();
    assert!(descriptors.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(method_code(&dex, "run").insns.units(), &[0x000e]);

    let image = dex.write().unwrap();
    assert!(DexFile::read(&image).is_ok());
}

#[test]
fn out_of_range_operand_is_reported() {
    let mut dex = sample_dex();
    let code = dex.sections.code_items.get_mut(2).unwrap();
    code.insns.set_units(vec![0x001a, 0x0400, 0x000e]);
    let e = dex.remove_unused().unwrap_err();
    assert_eq!(e.kind(), DexErrorKind::IndexOutOfRange);
}
