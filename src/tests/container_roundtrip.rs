use crate::annotations::{
    AnnotationItem, AnnotationSetItem, AnnotationSetRefList, AnnotationsDirectoryItem,
    AnnotationVisibility, MethodAnnotation, ParameterAnnotation,
};
use crate::dex_file::{
    CallSiteItem, ClassDataItem, ClassDefItem, CodeItem, DebugEvent, DebugInfo, DexFile,
    EncodedCatchHandler, EncodedField, EncodedMethod, EncodedTypeAddrPair, FieldItem, MethodHandleItem,
    MethodHandleType, MethodItem, ProtoItem, TryItem, TypeList, UnknownSection, ACC_PUBLIC,
    ACC_STATIC,
};
use crate::encoded_values::{AnnotationElement, EncodedAnnotation, EncodedValue};
use crate::insns::{assemble_instructions, decode_instructions, Instruction};
use crate::opcodes::OpcodeTable;

fn u32_at(bytes: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap())
}

/// Two classes, each with a public static int sharing the value 42 and one
/// instance method whose body is a bare return-void. Both implement the same
/// single interface so their interface lists are structurally identical.
fn two_class_container() -> DexFile {
    let mut dex = DexFile::new(39).unwrap();

    let s_obj = dex.add_string("Ljava/lang/Object;").unwrap();
    let s_iface = dex.add_string("Ljava/lang/Runnable;").unwrap();
    let s_alpha = dex.add_string("LAlpha;").unwrap();
    let s_beta = dex.add_string("LBeta;").unwrap();
    let s_int = dex.add_string("I").unwrap();
    let s_void = dex.add_string("V").unwrap();
    let s_value = dex.add_string("value").unwrap();
    let s_run = dex.add_string("run").unwrap();

    let t_obj = dex.add_type(s_obj).unwrap();
    let t_iface = dex.add_type(s_iface).unwrap();
    let t_alpha = dex.add_type(s_alpha).unwrap();
    let t_beta = dex.add_type(s_beta).unwrap();
    let t_int = dex.add_type(s_int).unwrap();
    let t_void = dex.add_type(s_void).unwrap();

    let p_void = dex.add_proto(ProtoItem::of(s_void, t_void, vec![])).unwrap();

    let table = OpcodeTable::for_api(dex.api_level());
    for (t_class, s_field, s_method) in [(t_alpha, s_value, s_run), (t_beta, s_value, s_run)] {
        let field = dex.add_field(FieldItem::of(t_class, t_int, s_field)).unwrap();
        let method = dex.add_method(MethodItem::of(t_class, p_void, s_method)).unwrap();

        let insns =
            assemble_instructions(&table, &[Instruction::Fmt10x { op: 0x0e }]).unwrap();
        let code = CodeItem::of(1, 1, 0, insns);

        let mut class = ClassDefItem::of(t_class, ACC_PUBLIC, t_obj);
        class.interfaces = Some(TypeList::from_type_ids(vec![t_iface]));
        class.class_data = Some(ClassDataItem {
            static_fields: vec![EncodedField {
                field_idx: field,
                access_flags: ACC_PUBLIC | ACC_STATIC,
            }],
            virtual_methods: vec![EncodedMethod {
                method_idx: method,
                access_flags: ACC_PUBLIC,
                code: Some(code),
            }],
            ..Default::default()
        });
        class.static_values = Some(vec![EncodedValue::Int(42)]);
        dex.add_class(class).unwrap();
    }

    dex
}

#[test]
fn builds_and_reparses_two_class_container() {
    let dex = two_class_container();
    let bytes = dex.to_bytes().expect("serialise failed");
    let parsed = DexFile::from_bytes(&bytes).expect("reparse failed");

    assert_eq!(parsed.class_defs.len(), 2);
    for class in &parsed.class_defs {
        assert_eq!(class.static_values, Some(vec![EncodedValue::Int(42)]));
        let data = class.class_data.as_ref().expect("class data present");
        assert_eq!(data.static_fields.len(), 1);
        assert_eq!(data.virtual_methods.len(), 1);
        let code = data.virtual_methods[0].code.as_ref().expect("code present");
        assert_eq!(code.registers_size, 1);
        assert!(code.tries.is_empty());
        assert_eq!(code.insns, vec![0x000e]);
    }

    assert_eq!(parsed.strings.len(), dex.strings.len());
    assert_eq!(parsed.types, dex.types);
    assert_eq!(parsed.protos, dex.protos);
    assert_eq!(parsed.fields, dex.fields);
    assert_eq!(parsed.methods, dex.methods);
    assert_eq!(parsed.class_defs, dex.class_defs);
}

#[test]
fn serialisation_is_a_fixed_point() {
    let dex = two_class_container();
    let first = dex.to_bytes().expect("first write failed");
    let reparsed = DexFile::from_bytes(&first).expect("reparse failed");
    let second = reparsed.to_bytes().expect("second write failed");
    assert_eq!(first, second);
}

#[test]
fn structurally_equal_substructures_share_one_record() {
    let dex = two_class_container();
    let bytes = dex.to_bytes().expect("serialise failed");

    // class_def_item records sit at class_defs_off; interfaces_off is at
    // record offset 12 and static_values_off at 28.
    let class_defs_off = u32_at(&bytes, 100) as usize;
    let first = class_defs_off;
    let second = class_defs_off + 32;

    let interfaces_a = u32_at(&bytes, first + 12);
    let interfaces_b = u32_at(&bytes, second + 12);
    assert_ne!(interfaces_a, 0);
    assert_eq!(interfaces_a, interfaces_b);

    let values_a = u32_at(&bytes, first + 28);
    let values_b = u32_at(&bytes, second + 28);
    assert_ne!(values_a, 0);
    assert_eq!(values_a, values_b);

    // the class data records differ (different member indices), so they must
    // NOT have been merged
    let data_a = u32_at(&bytes, first + 24);
    let data_b = u32_at(&bytes, second + 24);
    assert_ne!(data_a, 0);
    assert_ne!(data_a, data_b);
}

#[test]
fn emitted_records_respect_alignment() {
    let dex = two_class_container();
    let bytes = dex.to_bytes().expect("serialise failed");

    let map_off = u32_at(&bytes, 52) as usize;
    let count = u32_at(&bytes, map_off) as usize;
    for i in 0..count {
        let entry = map_off + 4 + i * 12;
        let type_code = u16::from_le_bytes(bytes[entry..entry + 2].try_into().unwrap());
        let offset = u32_at(&bytes, entry + 8);
        // code items, type lists and the map itself are 4-byte aligned
        if matches!(type_code, 0x1000 | 0x1001 | 0x2001) {
            assert_eq!(offset % 4, 0, "section 0x{:04x} misaligned at 0x{:x}", type_code, offset);
        }
    }
}

#[test]
fn shared_catch_handler_serialises_once() {
    let mut dex = two_class_container();

    // Give the first class's method two try ranges sharing one catch-all
    let class = &mut dex.class_defs[0];
    let data = class.class_data.as_mut().unwrap();
    let code = data.virtual_methods[0].code.as_mut().unwrap();
    code.insns = vec![0x0000, 0x0000, 0x0000, 0x0000, 0x000e];
    let handle = code.add_handler(EncodedCatchHandler {
        handlers: vec![],
        catch_all_addr: Some(4),
    });
    code.tries.push(TryItem { start_addr: 0, insn_count: 2, handler: handle });
    code.tries.push(TryItem { start_addr: 2, insn_count: 2, handler: handle });

    let bytes = dex.to_bytes().expect("serialise failed");
    let parsed = DexFile::from_bytes(&bytes).expect("reparse failed");

    let data = parsed.class_defs[0].class_data.as_ref().unwrap();
    let code = data.virtual_methods[0].code.as_ref().unwrap();
    assert_eq!(code.handlers.len(), 1);
    assert_eq!(code.tries.len(), 2);
    assert_eq!(code.tries[0].handler, code.tries[1].handler);
    assert_eq!(code.handlers[0].catch_all_addr, Some(4));
}

#[test]
fn typed_handlers_roundtrip_through_container() {
    let mut dex = two_class_container();
    let class = &mut dex.class_defs[1];
    let data = class.class_data.as_mut().unwrap();
    let code = data.virtual_methods[0].code.as_mut().unwrap();
    code.insns = vec![0x0000, 0x0000, 0x000e];
    let handle = code.add_handler(EncodedCatchHandler {
        handlers: vec![
            EncodedTypeAddrPair { type_idx: 0, addr: 2 },
            EncodedTypeAddrPair { type_idx: 1, addr: 2 },
        ],
        catch_all_addr: None,
    });
    code.tries.push(TryItem { start_addr: 0, insn_count: 2, handler: handle });

    let bytes = dex.to_bytes().expect("serialise failed");
    let parsed = DexFile::from_bytes(&bytes).expect("reparse failed");
    let parsed_code =
        parsed.class_defs[1].class_data.as_ref().unwrap().virtual_methods[0].code.as_ref().unwrap();
    assert_eq!(parsed_code.handlers[0].handlers.len(), 2);
    assert_eq!(parsed_code.handlers[0].catch_all_addr, None);
}

#[test]
fn packed_switch_payload_lands_aligned_after_odd_stream() {
    let mut dex = two_class_container();
    let table = OpcodeTable::for_api(dex.api_level());

    // packed-switch (3 units) leaves the cursor odd, so the payload needs a
    // pad nop to reach an even code unit offset: payload lands at pc 4.
    let insns = vec![
        Instruction::Fmt31t { op: 0x2b, a: 0, offset: 4 },
        Instruction::PackedSwitchPayload { first_key: 10, targets: vec![3, 3] },
    ];
    let code_units = assemble_instructions(&table, &insns).expect("assemble failed");
    assert_eq!(code_units.len() % 2, 0);
    assert_eq!(code_units[3], 0x0000);

    let class = &mut dex.class_defs[0];
    let data = class.class_data.as_mut().unwrap();
    data.virtual_methods[0].code = Some(CodeItem::of(1, 1, 0, code_units));

    let bytes = dex.to_bytes().expect("serialise failed");
    let parsed = DexFile::from_bytes(&bytes).expect("reparse failed");
    let code =
        parsed.class_defs[0].class_data.as_ref().unwrap().virtual_methods[0].code.as_ref().unwrap();

    let decoded = decode_instructions(&table, &code.insns).expect("decode failed");
    let (payload_pc, payload) = decoded
        .iter()
        .find(|(_, i)| matches!(i, Instruction::PackedSwitchPayload { .. }))
        .expect("payload present");
    assert_eq!(payload_pc % 2, 0);
    assert_eq!(
        *payload,
        Instruction::PackedSwitchPayload { first_key: 10, targets: vec![3, 3] }
    );
}

#[test]
fn members_are_sorted_and_values_reassociated_on_write() {
    let mut dex = DexFile::new(39).unwrap();
    let s_obj = dex.add_string("Ljava/lang/Object;").unwrap();
    let s_class = dex.add_string("LGamma;").unwrap();
    let s_int = dex.add_string("I").unwrap();
    let s_a = dex.add_string("a").unwrap();
    let s_b = dex.add_string("b").unwrap();
    let t_obj = dex.add_type(s_obj).unwrap();
    let t_class = dex.add_type(s_class).unwrap();
    let t_int = dex.add_type(s_int).unwrap();
    let f_a = dex.add_field(FieldItem::of(t_class, t_int, s_a)).unwrap();
    let f_b = dex.add_field(FieldItem::of(t_class, t_int, s_b)).unwrap();

    // Members inserted out of order; the single value 7 belongs to f_b
    let mut class = ClassDefItem::of(t_class, ACC_PUBLIC, t_obj);
    class.class_data = Some(ClassDataItem {
        static_fields: vec![
            EncodedField { field_idx: f_b, access_flags: ACC_STATIC },
            EncodedField { field_idx: f_a, access_flags: ACC_STATIC },
        ],
        ..Default::default()
    });
    class.static_values = Some(vec![EncodedValue::Int(7)]);
    dex.add_class(class).unwrap();

    let bytes = dex.to_bytes().expect("serialise failed");
    let parsed = DexFile::from_bytes(&bytes).expect("reparse failed");

    let data = parsed.class_defs[0].class_data.as_ref().unwrap();
    assert_eq!(data.static_fields[0].field_idx, f_a);
    assert_eq!(data.static_fields[1].field_idx, f_b);
    // f_a had no explicit value: its slot is padded with the int default
    assert_eq!(
        parsed.class_defs[0].static_values,
        Some(vec![EncodedValue::Int(0), EncodedValue::Int(7)])
    );

    // decoding accumulated deltas reproduced the absolute indices, in order
    let indices: Vec<u32> = data.static_fields.iter().map(|f| f.field_idx).collect();
    assert_eq!(indices, vec![f_a, f_b]);
}

#[test]
fn annotations_roundtrip_through_pooling() {
    let mut dex = two_class_container();
    let s_ann = dex.add_string("Ljava/lang/Deprecated;").unwrap();
    let t_ann = dex.add_type(s_ann).unwrap();

    let set = AnnotationSetItem {
        entries: vec![AnnotationItem {
            visibility: AnnotationVisibility::Runtime,
            annotation: EncodedAnnotation {
                type_idx: t_ann,
                elements: vec![AnnotationElement {
                    name_idx: 0,
                    value: EncodedValue::Boolean(true),
                }],
            },
        }],
    };

    let directory = AnnotationsDirectoryItem {
        class_annotations: Some(set.clone()),
        field_annotations: vec![],
        method_annotations: vec![MethodAnnotation { method_idx: 0, annotations: set.clone() }],
        parameter_annotations: vec![ParameterAnnotation {
            method_idx: 0,
            annotations: AnnotationSetRefList { sets: vec![None, Some(set.clone())] },
        }],
    };

    dex.class_defs[0].annotations = Some(directory.clone());
    dex.class_defs[1].annotations = Some(directory.clone());

    let bytes = dex.to_bytes().expect("serialise failed");
    let parsed = DexFile::from_bytes(&bytes).expect("reparse failed");
    assert_eq!(parsed.class_defs[0].annotations, Some(directory.clone()));
    assert_eq!(parsed.class_defs[1].annotations, Some(directory));

    // both classes reference the same pooled directory record
    let class_defs_off = u32_at(&bytes, 100) as usize;
    let ann_a = u32_at(&bytes, class_defs_off + 20);
    let ann_b = u32_at(&bytes, class_defs_off + 32 + 20);
    assert_ne!(ann_a, 0);
    assert_eq!(ann_a, ann_b);
}

#[test]
fn debug_info_roundtrips_through_container() {
    let mut dex = two_class_container();
    let debug = DebugInfo {
        line_start: 7,
        parameter_names: vec![None],
        events: vec![
            DebugEvent::SetPrologueEnd,
            DebugEvent::AdvancePc(1),
            DebugEvent::Special(0x20),
        ],
    };
    dex.class_defs[0]
        .class_data
        .as_mut()
        .unwrap()
        .virtual_methods[0]
        .code
        .as_mut()
        .unwrap()
        .debug_info = Some(debug.clone());

    let bytes = dex.to_bytes().expect("serialise failed");
    let parsed = DexFile::from_bytes(&bytes).expect("reparse failed");
    let code =
        parsed.class_defs[0].class_data.as_ref().unwrap().virtual_methods[0].code.as_ref().unwrap();
    assert_eq!(code.debug_info, Some(debug));
}

#[test]
fn method_handles_and_call_sites_roundtrip() {
    let mut dex = two_class_container();
    let handle = dex
        .add_method_handle(MethodHandleItem::of(MethodHandleType::InvokeStatic, 0))
        .unwrap();
    let name = dex.string_index("run").unwrap();
    dex.add_call_site(CallSiteItem::of(handle, name, 0, vec![EncodedValue::Int(3)]))
        .unwrap();

    let bytes = dex.to_bytes().expect("serialise failed");
    let parsed = DexFile::from_bytes(&bytes).expect("reparse failed");
    assert_eq!(parsed.method_handles, dex.method_handles);
    assert_eq!(parsed.call_sites, dex.call_sites);
}

#[test]
fn unknown_map_sections_are_preserved_opaquely() {
    let mut dex = two_class_container();
    dex.unknown_sections.push(UnknownSection {
        type_code: 0xf000,
        count: 1,
        bytes: vec![0xde, 0xad, 0xbe, 0xef, 0x01, 0x02],
    });

    let bytes = dex.to_bytes().expect("serialise failed");
    let parsed = DexFile::from_bytes(&bytes).expect("reparse failed");
    assert_eq!(parsed.unknown_sections.len(), 1);
    assert_eq!(parsed.unknown_sections[0].type_code, 0xf000);
    assert_eq!(parsed.unknown_sections[0].count, 1);
    assert!(parsed.unknown_sections[0]
        .bytes
        .starts_with(&[0xde, 0xad, 0xbe, 0xef, 0x01, 0x02]));

    // and they survive a further cycle byte-for-byte
    let second = parsed.to_bytes().expect("second write failed");
    let reparsed = DexFile::from_bytes(&second).expect("second reparse failed");
    assert_eq!(
        reparsed.unknown_sections[0].bytes,
        parsed.unknown_sections[0].bytes
    );
}

#[test]
fn checksum_and_signature_are_finalised() {
    let dex = two_class_container();
    let bytes = dex.to_bytes().expect("serialise failed");

    let checksum = u32_at(&bytes, 8);
    assert_eq!(checksum, adler::adler32_slice(&bytes[12..]));

    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(&bytes[32..]);
    assert_eq!(bytes[12..32], hasher.finalize()[..]);

    let file_size = u32_at(&bytes, 32);
    assert_eq!(file_size as usize, bytes.len());
}
