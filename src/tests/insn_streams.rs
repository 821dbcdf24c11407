use crate::insns::{
    assemble_instructions, decode_instructions, Instruction, InstructionKind, InstructionVisitor,
};
use crate::opcodes::{OpcodeTable, ReferenceType};

fn table() -> OpcodeTable {
    OpcodeTable::for_api(33)
}

/// A small but representative method body: a branch, a literal load, an
/// invoke, a fill-array-data payload and a sparse switch with its payload.
fn sample_stream() -> Vec<Instruction> {
    vec![
        Instruction::Fmt21t { op: 0x38, a: 0, offset: 9 },          // if-eqz, targets the return
        Instruction::Fmt11n { op: 0x12, a: 1, literal: 5 },          // const/4
        Instruction::Fmt35c { op: 0x71, regs: vec![1], index: 2 },   // invoke-static
        Instruction::Fmt31t { op: 0x26, a: 3, offset: 4 },           // fill-array-data
        Instruction::Fmt10x { op: 0x0e },                            // return-void
        Instruction::FillArrayDataPayload { element_width: 2, data: vec![1, 0, 2, 0, 3, 0] },
        Instruction::SparseSwitchPayload { keys: vec![-1, 9], targets: vec![2, 4] },
    ]
}

#[test]
fn assemble_then_decode_reproduces_stream() {
    let t = table();
    let insns = sample_stream();
    let code = assemble_instructions(&t, &insns).expect("assemble failed");
    let decoded = decode_instructions(&t, &code).expect("decode failed");

    // Padding nops may appear before payloads; filter them out and compare
    let stripped: Vec<Instruction> = decoded
        .into_iter()
        .map(|(_, i)| i)
        .filter(|i| !matches!(i, Instruction::Fmt10x { op: 0x00 }))
        .collect();
    let expected: Vec<Instruction> = insns
        .into_iter()
        .filter(|i| !matches!(i, Instruction::Fmt10x { op: 0x00 }))
        .collect();
    assert_eq!(stripped, expected);
}

#[test]
fn payloads_start_on_even_units() {
    let t = table();
    let code = assemble_instructions(&t, &sample_stream()).expect("assemble failed");
    let decoded = decode_instructions(&t, &code).expect("decode failed");
    for (pc, insn) in decoded {
        if insn.kind() == InstructionKind::Payload {
            assert_eq!(pc % 2, 0, "payload at odd pc {}", pc);
        }
    }
}

#[derive(Default)]
struct CountingVisitor {
    plain: usize,
    literals: usize,
    branches: usize,
    invokes: usize,
    payload_refs: usize,
    payloads: usize,
    string_refs: usize,
}

impl InstructionVisitor for CountingVisitor {
    fn visit_plain(&mut self, _op: u8, _regs: &[u16]) {
        self.plain += 1;
    }
    fn visit_literal(&mut self, _op: u8, _regs: &[u16], _literal: i64) {
        self.literals += 1;
    }
    fn visit_branch(&mut self, _op: u8, _regs: &[u16], _offset: i32) {
        self.branches += 1;
    }
    fn visit_reference(&mut self, _op: u8, _regs: &[u16], kind: ReferenceType, _index: u32) {
        if kind == ReferenceType::String {
            self.string_refs += 1;
        }
    }
    fn visit_invoke(
        &mut self,
        _op: u8,
        _regs: &[u16],
        _kind: ReferenceType,
        _index: u32,
        _proto_index: Option<u16>,
    ) {
        self.invokes += 1;
    }
    fn visit_payload_reference(&mut self, _op: u8, _reg: u16, _offset: i32) {
        self.payload_refs += 1;
    }
    fn visit_payload(&mut self, _payload: &Instruction) {
        self.payloads += 1;
    }
}

#[test]
fn visitor_dispatch_by_category() {
    let t = table();
    let mut visitor = CountingVisitor::default();
    let stream = vec![
        Instruction::Fmt21c { op: 0x1a, a: 0, index: 7 }, // const-string
        Instruction::Fmt21t { op: 0x38, a: 0, offset: 3 },
        Instruction::Fmt11n { op: 0x12, a: 1, literal: -1 },
        Instruction::Fmt35c { op: 0x6e, regs: vec![0, 1], index: 4 },
        Instruction::Fmt31t { op: 0x2b, a: 0, offset: 6 },
        Instruction::Fmt10x { op: 0x0e },
        Instruction::PackedSwitchPayload { first_key: 0, targets: vec![2] },
    ];
    for insn in &stream {
        insn.accept(&t, &mut visitor).expect("dispatch failed");
    }
    assert_eq!(visitor.string_refs, 1);
    assert_eq!(visitor.branches, 1);
    assert_eq!(visitor.literals, 1);
    assert_eq!(visitor.invokes, 1);
    assert_eq!(visitor.payload_refs, 1);
    assert_eq!(visitor.plain, 1);
    assert_eq!(visitor.payloads, 1);
}

#[test]
fn register_listing_expands_range_windows() {
    let packed = Instruction::Fmt35c { op: 0x6e, regs: vec![0, 5, 9], index: 1 };
    assert_eq!(packed.registers(), vec![0, 5, 9]);

    let range = Instruction::Fmt3rc { op: 0x74, first: 10, count: 4, index: 1 };
    assert_eq!(range.registers(), vec![10, 11, 12, 13]);
}

#[test]
fn branch_widths_are_fixed_per_opcode() {
    let t = table();

    // goto carries an 8-bit offset; an offset needing more bits cannot be
    // represented in the value at all, so only the width class is checked
    let narrow = Instruction::Fmt10t { op: 0x28, offset: i8::MIN };
    let mut out = vec![];
    crate::insns::write_instruction(&t, &mut out, &narrow).expect("encode failed");
    assert_eq!(out.len(), 1);

    // goto/16 keeps a 16-bit offset even for small values: no auto-narrowing
    let wide = Instruction::Fmt20t { op: 0x29, offset: 1 };
    let mut out = vec![];
    crate::insns::write_instruction(&t, &mut out, &wide).expect("encode failed");
    assert_eq!(out.len(), 2);
}
