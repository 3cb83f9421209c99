use crate::dex::code::CodeItem;
use crate::dex::ids::{DexString, TypeId};
use crate::dex::reader::DexReader;
use crate::dex::section::{SectionRegistry, SectionType, UsageMarker};
use crate::dex::try_block::{CatchHandlerList, ExceptionHandler};
use crate::dex::{Block, ReadBlock, ReferenceHolder};

fn method_body() -> CodeItem {
    // const-string v0, string@1 ; nop ; nop ; return-void
    let mut code = CodeItem::new(5, 2, 0, vec![0x001a, 0x0001, 0x0000, 0x0000, 0x000e]);
    let tries = code.get_or_create_try_block();
    tries.add_try(
        0,
        2,
        CatchHandlerList::new(vec![ExceptionHandler::typed(3, 3), ExceptionHandler::typed(4, 3)]),
    );
    tries.add_try(2, 2, CatchHandlerList::new(vec![ExceptionHandler::CatchAll { address: 4 }]));
    code
}

#[test]
fn method_body_round_trip() {
    let code = method_body();
    let mut out = vec![];
    let n = code.write(&mut out).unwrap();
    // header 16, five units 10, padding 2, two try items 16, handlers 8
    assert_eq!(n, 52);
    assert_eq!(n, code.encoded_len());

    let back = CodeItem::read(&mut DexReader::new(&out)).unwrap();
    assert_eq!((back.registers, back.ins, back.outs), (5, 2, 0));
    assert_eq!(back.insns.units(), code.insns.units());
    assert!(!back.debug_info.is_present());
    assert_eq!(back, code);

    let tries = back.try_block().unwrap();
    assert_eq!(tries.tries.len(), 2);
    assert_eq!(tries.handlers_at(1).map(|h| h.handlers.len()), Some(2));
    assert_eq!(tries.handlers_at(3).and_then(|h| h.catch_all()), Some(4));
    assert!(tries.handlers_at(4).is_none());
}

#[test]
fn method_body_used_ids() {
    let code = method_body();
    let used: Vec<_> = code.used_ids().map(|u| (u.section, u.index, u.usage)).collect();
    assert_eq!(
        used,
        vec![
            (SectionType::StringId, 1, UsageMarker::INSTRUCTION),
            (SectionType::TypeId, 3, UsageMarker::CATCH),
            (SectionType::TypeId, 4, UsageMarker::CATCH),
        ]
    );
}

#[test]
fn handlers_compare_by_descriptor_across_files() {
    let mut a = SectionRegistry::new();
    let mut b = SectionRegistry::new();
    for d in ["Ljava/lang/Exception;", "Ljava/io/IOException;"] {
        let s = a.strings.append(DexString::from(d));
        a.types.append(TypeId::new(s));
    }
    let s = b.strings.append(DexString::from("Ljava/io/IOException;"));
    b.types.append(TypeId::new(s));

    let ours = CatchHandlerList::new(vec![ExceptionHandler::typed(1, 8)]);
    let theirs = CatchHandlerList::new(vec![ExceptionHandler::typed(0, 8)]);
    assert_ne!(ours, theirs);
    assert!(ours.is_equivalent(&a, &theirs, &b));
    let other = CatchHandlerList::new(vec![ExceptionHandler::typed(0, 8)]);
    assert!(!other.is_equivalent(&a, &theirs, &b));
}

#[test]
fn refresh_is_idempotent() {
    let mut code = method_body();
    code.refresh();
    let mut first = vec![];
    code.write(&mut first).unwrap();
    code.refresh();
    let mut second = vec![];
    code.write(&mut second).unwrap();
    assert_eq!(first, second);
    assert!(!code.is_dirty());
}
