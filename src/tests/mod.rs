mod code_item;
mod encoded_array;
mod compaction;
mod merge;

use crate::dex::annotations::{AnnotationItem, AnnotationSet, AnnotationsDirectory, Visibility};
use crate::dex::class_data::{ClassData, EncodedField, EncodedMethod};
use crate::dex::code::CodeItem;
use crate::dex::debug_info::{DebugInfo, DebugOp};
use crate::dex::encoded_array::EncodedArray;
use crate::dex::ids::{AccessFlags, ClassDef, TypeList};
use crate::dex::try_block::{CatchHandlerList, ExceptionHandler};
use crate::dex::values::{DexValueBlock, EncodedAnnotation};
use crate::dex::{DataRef, DexFile, IdRef, UsageMarker};

/// Code of the method called `name` in the first class definition.
pub(crate) fn method_code<'a>(dex: &'a DexFile, name: &str) -> &'a CodeItem {
    let def = dex.sections.class_defs.get(0).unwrap();
    let data = def.class_data.resolve(&dex.sections).unwrap();
    let method = data
        .methods()
        .find(|m| {
            let id = m.method.resolve(&dex.sections).unwrap();
            id.name.resolve(&dex.sections).and_then(|s| s.as_str()) == Some(name)
        })
        .unwrap();
    method.code.resolve(&dex.sections).unwrap()
}

/// A one-class image exercising every data item kind. Pools are filled in
/// the order a reader discovers them, so a written and re-read copy compares
/// equal section by section.
pub(crate) fn sample_dex() -> DexFile {
    let mut dex = DexFile::new(35);

    // ids first; protos are interned before any other type list exists
    let object = dex.intern_type("Ljava/lang/Object;");
    let class = dex.intern_type("Lcom/example/Sample;");
    let runnable = dex.intern_type("Ljava/lang/Runnable;");
    let marker = dex.intern_type("Lcom/example/Marker;");
    let io = dex.intern_type("Ljava/io/IOException;");
    let clinit = dex.intern_method("Lcom/example/Sample;", "<clinit>", "V", &[]);
    let run = dex.intern_method("Lcom/example/Sample;", "run", "V", &[]);
    let apply = dex.intern_method("Lcom/example/Sample;", "apply", "I", &["I", "Ljava/lang/Object;"]);
    let count = dex.intern_field("Lcom/example/Sample;", "COUNT", "I");
    let source = dex.intern_string("Sample.java");
    let greeting = dex.intern_string("hello");
    let value = dex.intern_string("value");
    let arg = dex.intern_string("arg");

    // class def data, in reader order: interfaces, annotations, class data, static values
    let interfaces = dex.sections.type_lists.intern(TypeList::new(&[runnable]));

    let mut annotation = EncodedAnnotation::new(marker);
    annotation.set_element(value, DexValueBlock::int(7));
    let item = dex.sections.annotations.append(AnnotationItem::new(Visibility::Runtime, annotation));
    let set = dex.sections.annotation_sets.append(AnnotationSet::new(&[item]));
    let mut directory = AnnotationsDirectory::default();
    directory.class_annotations = DataRef::new(set, UsageMarker::ANNOTATION);
    let directory = dex.sections.annotations_directories.append(directory);

    // sget v0, COUNT ; return-void
    let clinit_code = dex.sections.code_items.append(CodeItem::new(1, 0, 0, vec![0x0060, count as u16, 0x000e]));

    // run is discovered before apply: virtual methods are read in index order
    let run_code = dex.sections.code_items.append(CodeItem::new(1, 1, 0, vec![0x000e]));

    let mut debug = DebugInfo::new(12);
    debug.parameter_names.push(IdRef::new(arg, UsageMarker::DEBUG));
    debug.parameter_names.push(IdRef::none(UsageMarker::DEBUG));
    debug.ops.push(DebugOp::PrologueEnd);
    debug.ops.push(DebugOp::Special(0x0e));
    let debug = dex.sections.debug_infos.append(debug);

    // const-string v0, "hello" ; return v1 ; nop
    let mut body = CodeItem::new(4, 3, 0, vec![0x001a, greeting as u16, 0x010f, 0x0000]);
    body.set_debug_info(Some(debug));
    body.get_or_create_try_block().add_try(
        0,
        2,
        CatchHandlerList::new(vec![ExceptionHandler::typed(io, 2), ExceptionHandler::CatchAll { address: 3 }]),
    );
    let apply_code = dex.sections.code_items.append(body);

    let mut data = ClassData::default();
    data.static_fields.push(EncodedField::new(count, AccessFlags::PUBLIC | AccessFlags::STATIC));
    data.direct_methods.push(
        EncodedMethod::new(clinit, AccessFlags::STATIC | AccessFlags::CONSTRUCTOR).with_code(clinit_code),
    );
    data.virtual_methods.push(EncodedMethod::new(run, AccessFlags::PUBLIC).with_code(run_code));
    data.virtual_methods.push(EncodedMethod::new(apply, AccessFlags::PUBLIC).with_code(apply_code));
    data.virtual_methods.sort_by_key(|m| m.method.raw());
    let data = dex.sections.class_data.append(data);

    let mut statics = EncodedArray::new();
    statics.push(DexValueBlock::int(42));
    let statics = dex.sections.encoded_arrays.append(statics);

    let mut def = ClassDef::new(class, AccessFlags::PUBLIC | AccessFlags::FINAL);
    def.superclass = IdRef::new(object, UsageMarker::DEFINITION);
    def.interfaces = DataRef::new(interfaces, UsageMarker::DEFINITION);
    def.source_file = IdRef::new(source, UsageMarker::DEFINITION);
    def.annotations = DataRef::new(directory, UsageMarker::ANNOTATION);
    def.class_data = DataRef::new(data, UsageMarker::DEFINITION);
    def.static_values = DataRef::new(statics, UsageMarker::STATIC_VALUE);
    dex.sections.class_defs.append(def);
    dex
}
