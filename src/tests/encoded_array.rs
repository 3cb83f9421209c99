use crate::dex::encoded_array::{EncodedArray, ValueSlot};
use crate::dex::key::IdentityTranslator;
use crate::dex::reader::DexReader;
use crate::dex::section::SectionType;
use crate::dex::values::{DexValue, DexValueBlock, DexValueType};
use crate::dex::{Block, ReadBlock};

#[test]
fn get_or_create_then_trim() {
    let mut a = EncodedArray::new();
    assert_eq!(a.len(), 0);
    let v = a.get_or_create(DexValueType::Int, 3);
    assert_eq!(v.value(), &DexValue::Int(0));
    assert_eq!(a.len(), 4);
    for i in 0..3 {
        assert_eq!(a.slot(i), Some(&ValueSlot::PLACEHOLDER));
    }
    a.trim_null();
    assert_eq!(a.len(), 4);

    let mut b = EncodedArray::new();
    b.set_size(4);
    b.trim_null();
    assert_eq!(b.len(), 0);
}

#[test]
fn populating_a_static_values_array() {
    let mut a = EncodedArray::new();
    *a.get_or_create_ref(SectionType::StringId, 2).unwrap() = DexValueBlock::string(5);
    *a.get_or_create(DexValueType::Long, 0) = DexValueBlock::long(-1);
    assert!(!a.is_complete());
    assert!(a.get_or_create_ref(SectionType::Code, 1).is_err());

    *a.get_or_create(DexValueType::Boolean, 1) = DexValueBlock::boolean(true);
    assert!(a.is_complete());

    let mut out = vec![];
    a.write(&mut out).unwrap();
    // count, long -1 in one byte, boolean true, string index 5
    assert_eq!(out, vec![3, 0x06, 0xff, 0x3f, 0x17, 5]);
    let back = EncodedArray::read(&mut DexReader::new(&out)).unwrap();
    assert_eq!(back, a);
}

#[test]
fn merge_is_associative_over_disjoint_updates() {
    let mut base = EncodedArray::new();
    base.push(DexValueBlock::int(1));
    base.push(DexValueBlock::int(2));

    let mut b = EncodedArray::new();
    b.set(0, DexValueBlock::int(10));
    b.set(1, DexValueBlock::int(2));
    let mut c = EncodedArray::new();
    c.set(0, DexValueBlock::int(10));
    c.set(1, DexValueBlock::boolean(true));
    c.set(2, DexValueBlock::null());

    let mut stepwise = base.clone();
    stepwise.merge(&b, &mut IdentityTranslator).unwrap();
    stepwise.merge(&c, &mut IdentityTranslator).unwrap();

    let mut combined = b.clone();
    combined.merge(&c, &mut IdentityTranslator).unwrap();
    let mut at_once = base.clone();
    at_once.merge(&combined, &mut IdentityTranslator).unwrap();

    assert_eq!(stepwise, at_once);
    assert_eq!(stepwise.get(1).map(|v| v.value_type()), Some(DexValueType::Boolean));
    assert_eq!(stepwise.len(), 3);
}

#[test]
fn declared_width_survives_a_round_trip() {
    // int 1 written with a four byte payload
    let bytes = [1, 0x64, 1, 0, 0, 0];
    let a = EncodedArray::read(&mut DexReader::new(&bytes)).unwrap();
    assert_eq!(a.get(0).map(|v| v.width()), Some(4));
    let mut out = vec![];
    a.write(&mut out).unwrap();
    assert_eq!(out, bytes);
    assert_eq!(a.encoded_len(), bytes.len());
}
