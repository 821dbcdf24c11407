//! The instruction codec: packing and unpacking Dalvik instructions to and
//! from 16-bit code units.
//!
//! Instruction values are a closed enum keyed by operand format. Decoding
//! yields an immutable value holding the raw registers, literal, pool index
//! or branch offset; encoding is the exact inverse and validates operand
//! ranges before packing. Branch offsets are signed distances in code units
//! from the instruction's own first unit; the offset width is a property of
//! the opcode, never widened to fit a value.
//!
//! The switch/array payload blocks are not real opcodes: they are flagged by
//! a reserved opcode byte (0x00) with a non-zero identifier in the high
//! byte, must start on a four-byte (even code unit) boundary, and are only
//! reachable through a preceding `Format31t` instruction's offset.

use serde::{Deserialize, Serialize};

use crate::error::DexError;
use crate::opcodes::{Format, Opcode, OpcodeTable, ReferenceType};

pub const PACKED_SWITCH_IDENT: u16 = 0x0100;
pub const SPARSE_SWITCH_IDENT: u16 = 0x0200;
pub const FILL_ARRAY_DATA_IDENT: u16 = 0x0300;

/// A decoded instruction, keyed by operand format.
///
/// `op` is the raw opcode byte. Register fields are named after the format
/// specification letters (A, B, C); `regs` carries the packed argument list
/// of the invoke family, and range variants store only the first register
/// and a count, the rest being implied consecutive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    Fmt10x { op: u8 },
    Fmt12x { op: u8, a: u8, b: u8 },
    Fmt11n { op: u8, a: u8, literal: i8 },
    Fmt11x { op: u8, a: u8 },
    Fmt10t { op: u8, offset: i8 },
    Fmt20t { op: u8, offset: i16 },
    Fmt22x { op: u8, a: u8, b: u16 },
    Fmt21t { op: u8, a: u8, offset: i16 },
    Fmt21s { op: u8, a: u8, literal: i16 },
    Fmt21ih { op: u8, a: u8, literal: i32 },
    Fmt21lh { op: u8, a: u8, literal: i64 },
    Fmt21c { op: u8, a: u8, index: u16 },
    Fmt23x { op: u8, a: u8, b: u8, c: u8 },
    Fmt22b { op: u8, a: u8, b: u8, literal: i8 },
    Fmt22t { op: u8, a: u8, b: u8, offset: i16 },
    Fmt22s { op: u8, a: u8, b: u8, literal: i16 },
    Fmt22c { op: u8, a: u8, b: u8, index: u16 },
    Fmt30t { op: u8, offset: i32 },
    Fmt32x { op: u8, a: u16, b: u16 },
    Fmt31i { op: u8, a: u8, literal: i32 },
    Fmt31t { op: u8, a: u8, offset: i32 },
    Fmt31c { op: u8, a: u8, index: u32 },
    Fmt35c { op: u8, regs: Vec<u8>, index: u16 },
    Fmt3rc { op: u8, first: u16, count: u8, index: u16 },
    Fmt45cc { op: u8, regs: Vec<u8>, index: u16, proto_index: u16 },
    Fmt4rcc { op: u8, first: u16, count: u8, index: u16, proto_index: u16 },
    Fmt51l { op: u8, a: u8, literal: i64 },
    PackedSwitchPayload { first_key: i32, targets: Vec<i32> },
    SparseSwitchPayload { keys: Vec<i32>, targets: Vec<i32> },
    FillArrayDataPayload { element_width: u16, data: Vec<u8> },
}

/// Coarse instruction category, used by consumers dispatching over decoded
/// streams without matching every format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionKind {
    Plain,
    Literal,
    Branch,
    Reference,
    Invoke,
    PayloadReference,
    Payload,
}

/// Dispatch target for [`Instruction::accept`], keyed by category.
pub trait InstructionVisitor {
    fn visit_plain(&mut self, op: u8, regs: &[u16]);
    fn visit_literal(&mut self, op: u8, regs: &[u16], literal: i64);
    fn visit_branch(&mut self, op: u8, regs: &[u16], offset: i32);
    fn visit_reference(&mut self, op: u8, regs: &[u16], kind: ReferenceType, index: u32);
    fn visit_invoke(&mut self, op: u8, regs: &[u16], kind: ReferenceType, index: u32, proto_index: Option<u16>);
    fn visit_payload_reference(&mut self, op: u8, reg: u16, offset: i32);
    fn visit_payload(&mut self, payload: &Instruction);
}

// Field extraction helpers, named after the format specification nibbles.
#[inline] fn op(inst: u16) -> u8 { (inst & 0x00ff) as u8 }
#[inline] fn a8(inst: u16) -> u8 { (inst >> 8) as u8 }
#[inline] fn a4(inst: u16) -> u8 { ((inst >> 8) & 0x0f) as u8 }
#[inline] fn b4(inst: u16) -> u8 { ((inst >> 12) & 0x0f) as u8 }
#[inline] fn s4(x: u8) -> i8 { ((x as i8) << 4) >> 4 }
#[inline] fn u32_at(code: &[u16], pc: usize) -> u32 {
    (code[pc] as u32) | ((code[pc + 1] as u32) << 16)
}
#[inline] fn i32_at(code: &[u16], pc: usize) -> i32 {
    u32_at(code, pc) as i32
}

#[inline]
fn require_units(code: &[u16], pc: usize, need: usize, what: &str) -> Result<(), DexError> {
    if pc + need > code.len() {
        return Err(DexError::new(&format!(
            "Truncated {} at pc {}: need {} code units, have {}",
            what,
            pc,
            need,
            code.len().saturating_sub(pc)
        )));
    }
    Ok(())
}

fn check_reg4(r: u8, what: &str) -> Result<(), DexError> {
    if r > 0x0f {
        fail!("Register v{} does not fit the 4-bit {} field", r, what);
    }
    Ok(())
}

impl Instruction {
    /// Raw opcode byte; payload pseudo-instructions have none.
    pub fn opcode_value(&self) -> Option<u8> {
        use Instruction::*;
        match self {
            Fmt10x { op } | Fmt12x { op, .. } | Fmt11n { op, .. } | Fmt11x { op, .. }
            | Fmt10t { op, .. } | Fmt20t { op, .. } | Fmt22x { op, .. } | Fmt21t { op, .. }
            | Fmt21s { op, .. } | Fmt21ih { op, .. } | Fmt21lh { op, .. } | Fmt21c { op, .. }
            | Fmt23x { op, .. } | Fmt22b { op, .. } | Fmt22t { op, .. } | Fmt22s { op, .. }
            | Fmt22c { op, .. } | Fmt30t { op, .. } | Fmt32x { op, .. } | Fmt31i { op, .. }
            | Fmt31t { op, .. } | Fmt31c { op, .. } | Fmt35c { op, .. } | Fmt3rc { op, .. }
            | Fmt45cc { op, .. } | Fmt4rcc { op, .. } | Fmt51l { op, .. } => Some(*op),
            PackedSwitchPayload { .. } | SparseSwitchPayload { .. }
            | FillArrayDataPayload { .. } => None,
        }
    }

    /// The format this variant encodes as.
    pub fn format(&self) -> Format {
        use Instruction::*;
        match self {
            Fmt10x { .. } => Format::Format10x,
            Fmt12x { .. } => Format::Format12x,
            Fmt11n { .. } => Format::Format11n,
            Fmt11x { .. } => Format::Format11x,
            Fmt10t { .. } => Format::Format10t,
            Fmt20t { .. } => Format::Format20t,
            Fmt22x { .. } => Format::Format22x,
            Fmt21t { .. } => Format::Format21t,
            Fmt21s { .. } => Format::Format21s,
            Fmt21ih { .. } => Format::Format21ih,
            Fmt21lh { .. } => Format::Format21lh,
            Fmt21c { .. } => Format::Format21c,
            Fmt23x { .. } => Format::Format23x,
            Fmt22b { .. } => Format::Format22b,
            Fmt22t { .. } => Format::Format22t,
            Fmt22s { .. } => Format::Format22s,
            Fmt22c { .. } => Format::Format22c,
            Fmt30t { .. } => Format::Format30t,
            Fmt32x { .. } => Format::Format32x,
            Fmt31i { .. } => Format::Format31i,
            Fmt31t { .. } => Format::Format31t,
            Fmt31c { .. } => Format::Format31c,
            Fmt35c { .. } => Format::Format35c,
            Fmt3rc { .. } => Format::Format3rc,
            Fmt45cc { .. } => Format::Format45cc,
            Fmt4rcc { .. } => Format::Format4rcc,
            Fmt51l { .. } => Format::Format51l,
            PackedSwitchPayload { .. } => Format::PackedSwitchPayload,
            SparseSwitchPayload { .. } => Format::SparseSwitchPayload,
            FillArrayDataPayload { .. } => Format::ArrayPayload,
        }
    }

    /// Length in code units, including payload headers and data.
    pub fn size_in_units(&self) -> usize {
        use Instruction::*;
        match self {
            PackedSwitchPayload { targets, .. } => 4 + targets.len() * 2,
            SparseSwitchPayload { keys, .. } => 2 + keys.len() * 4,
            FillArrayDataPayload { data, .. } => 4 + data.len().div_ceil(2),
            other => other.format().size_in_units(),
        }
    }

    /// All explicit register operands, range windows expanded.
    pub fn registers(&self) -> Vec<u16> {
        use Instruction::*;
        match self {
            Fmt10x { .. } | Fmt10t { .. } | Fmt20t { .. } | Fmt30t { .. }
            | PackedSwitchPayload { .. } | SparseSwitchPayload { .. }
            | FillArrayDataPayload { .. } => vec![],
            Fmt11n { a, .. } | Fmt11x { a, .. } | Fmt21t { a, .. } | Fmt21s { a, .. }
            | Fmt21ih { a, .. } | Fmt21lh { a, .. } | Fmt21c { a, .. } | Fmt31i { a, .. }
            | Fmt31t { a, .. } | Fmt31c { a, .. } | Fmt51l { a, .. } => vec![*a as u16],
            Fmt12x { a, b, .. } | Fmt22b { a, b, .. } | Fmt22t { a, b, .. }
            | Fmt22s { a, b, .. } | Fmt22c { a, b, .. } => vec![*a as u16, *b as u16],
            Fmt22x { a, b, .. } => vec![*a as u16, *b],
            Fmt23x { a, b, c, .. } => vec![*a as u16, *b as u16, *c as u16],
            Fmt32x { a, b, .. } => vec![*a, *b],
            Fmt35c { regs, .. } | Fmt45cc { regs, .. } => {
                regs.iter().map(|r| *r as u16).collect()
            }
            Fmt3rc { first, count, .. } | Fmt4rcc { first, count, .. } => {
                (*first as u32..*first as u32 + *count as u32)
                    .map(|r| r as u16)
                    .collect()
            }
        }
    }

    pub fn kind(&self) -> InstructionKind {
        use Instruction::*;
        match self {
            Fmt10x { .. } | Fmt12x { .. } | Fmt11x { .. } | Fmt22x { .. } | Fmt23x { .. }
            | Fmt32x { .. } => InstructionKind::Plain,
            Fmt11n { .. } | Fmt21s { .. } | Fmt21ih { .. } | Fmt21lh { .. } | Fmt22b { .. }
            | Fmt22s { .. } | Fmt31i { .. } | Fmt51l { .. } => InstructionKind::Literal,
            Fmt10t { .. } | Fmt20t { .. } | Fmt21t { .. } | Fmt22t { .. } | Fmt30t { .. } => {
                InstructionKind::Branch
            }
            Fmt21c { .. } | Fmt22c { .. } | Fmt31c { .. } => InstructionKind::Reference,
            Fmt35c { .. } | Fmt3rc { .. } | Fmt45cc { .. } | Fmt4rcc { .. } => {
                InstructionKind::Invoke
            }
            Fmt31t { .. } => InstructionKind::PayloadReference,
            PackedSwitchPayload { .. } | SparseSwitchPayload { .. }
            | FillArrayDataPayload { .. } => InstructionKind::Payload,
        }
    }

    /// Dispatch into `visitor` keyed by category. Reference kinds come from
    /// the opcode table, so an opcode undefined there is an error.
    pub fn accept<V: InstructionVisitor>(
        &self,
        table: &OpcodeTable,
        visitor: &mut V,
    ) -> Result<(), DexError> {
        use Instruction::*;
        let opcode = match self.opcode_value() {
            Some(value) => Some(lookup(table, value)?),
            None => None,
        };
        let regs = self.registers();
        match self {
            Fmt10x { op } | Fmt12x { op, .. } | Fmt11x { op, .. } | Fmt22x { op, .. }
            | Fmt23x { op, .. } | Fmt32x { op, .. } => visitor.visit_plain(*op, &regs),
            Fmt11n { op, literal, .. } => visitor.visit_literal(*op, &regs, *literal as i64),
            Fmt21s { op, literal, .. } | Fmt22s { op, literal, .. } => {
                visitor.visit_literal(*op, &regs, *literal as i64)
            }
            Fmt21ih { op, literal, .. } | Fmt31i { op, literal, .. } => {
                visitor.visit_literal(*op, &regs, *literal as i64)
            }
            Fmt21lh { op, literal, .. } | Fmt51l { op, literal, .. } => {
                visitor.visit_literal(*op, &regs, *literal)
            }
            Fmt22b { op, literal, .. } => visitor.visit_literal(*op, &regs, *literal as i64),
            Fmt10t { op, offset } => visitor.visit_branch(*op, &regs, *offset as i32),
            Fmt20t { op, offset } => visitor.visit_branch(*op, &regs, *offset as i32),
            Fmt21t { op, offset, .. } | Fmt22t { op, offset, .. } => {
                visitor.visit_branch(*op, &regs, *offset as i32)
            }
            Fmt30t { op, offset } => visitor.visit_branch(*op, &regs, *offset),
            Fmt21c { op, index, .. } | Fmt22c { op, index, .. } => {
                let kind = opcode.map(|o| o.reference_type).unwrap_or(ReferenceType::None);
                visitor.visit_reference(*op, &regs, kind, *index as u32)
            }
            Fmt31c { op, index, .. } => {
                let kind = opcode.map(|o| o.reference_type).unwrap_or(ReferenceType::None);
                visitor.visit_reference(*op, &regs, kind, *index)
            }
            Fmt35c { op, index, .. } | Fmt3rc { op, index, .. } => {
                let kind = opcode.map(|o| o.reference_type).unwrap_or(ReferenceType::None);
                visitor.visit_invoke(*op, &regs, kind, *index as u32, None)
            }
            Fmt45cc { op, index, proto_index, .. }
            | Fmt4rcc { op, index, proto_index, .. } => {
                let kind = opcode.map(|o| o.reference_type).unwrap_or(ReferenceType::None);
                visitor.visit_invoke(*op, &regs, kind, *index as u32, Some(*proto_index))
            }
            Fmt31t { op, a, offset } => visitor.visit_payload_reference(*op, *a as u16, *offset),
            PackedSwitchPayload { .. } | SparseSwitchPayload { .. }
            | FillArrayDataPayload { .. } => visitor.visit_payload(self),
        }
        Ok(())
    }
}

fn lookup(table: &OpcodeTable, value: u8) -> Result<&'static Opcode, DexError> {
    table
        .get(value)
        .ok_or_else(|| DexError::new(&format!("Unknown opcode 0x{:02x}", value)))
}

/// Decode one instruction starting at code unit `pc`, returning the value and
/// the number of units consumed.
pub fn read_instruction(
    table: &OpcodeTable,
    code: &[u16],
    pc: usize,
) -> Result<(Instruction, usize), DexError> {
    require_units(code, pc, 1, "instruction")?;
    let inst = code[pc];

    // A reserved 0x00 opcode with a non-zero identifier byte flags a payload
    // block; a plain 0x0000 is a real nop.
    if op(inst) == 0x00 && inst != 0x0000 {
        return read_payload(code, pc, inst);
    }

    let opcode = table.get(op(inst)).ok_or_else(|| {
        let start = pc.saturating_sub(2);
        let end = (pc + 4).min(code.len());
        let window: Vec<String> = code[start..end].iter().map(|u| format!("{:04x}", u)).collect();
        DexError::with_context(
            DexError::new(&format!("Unknown opcode 0x{:02x} at pc {}", op(inst), pc)),
            format!("code units [{}..{}] = {}", start, end, window.join(" ")),
        )
    })?;

    let units = opcode.format.size_in_units();
    require_units(code, pc, units, opcode.name)?;

    let insn = match opcode.format {
        Format::Format10x => Instruction::Fmt10x { op: op(inst) },
        Format::Format12x => Instruction::Fmt12x { op: op(inst), a: a4(inst), b: b4(inst) },
        Format::Format11n => Instruction::Fmt11n { op: op(inst), a: a4(inst), literal: s4(b4(inst)) },
        Format::Format11x => Instruction::Fmt11x { op: op(inst), a: a8(inst) },
        Format::Format10t => Instruction::Fmt10t { op: op(inst), offset: a8(inst) as i8 },
        Format::Format20t => Instruction::Fmt20t { op: op(inst), offset: code[pc + 1] as i16 },
        Format::Format22x => Instruction::Fmt22x { op: op(inst), a: a8(inst), b: code[pc + 1] },
        Format::Format21t => Instruction::Fmt21t { op: op(inst), a: a8(inst), offset: code[pc + 1] as i16 },
        Format::Format21s => Instruction::Fmt21s { op: op(inst), a: a8(inst), literal: code[pc + 1] as i16 },
        Format::Format21ih => Instruction::Fmt21ih {
            op: op(inst),
            a: a8(inst),
            literal: ((code[pc + 1] as i16 as i32) << 16),
        },
        Format::Format21lh => Instruction::Fmt21lh {
            op: op(inst),
            a: a8(inst),
            literal: ((code[pc + 1] as i16 as i64) << 48),
        },
        Format::Format21c => Instruction::Fmt21c { op: op(inst), a: a8(inst), index: code[pc + 1] },
        Format::Format23x => Instruction::Fmt23x {
            op: op(inst),
            a: a8(inst),
            b: (code[pc + 1] & 0x00ff) as u8,
            c: (code[pc + 1] >> 8) as u8,
        },
        Format::Format22b => Instruction::Fmt22b {
            op: op(inst),
            a: a8(inst),
            b: (code[pc + 1] & 0x00ff) as u8,
            literal: (code[pc + 1] >> 8) as u8 as i8,
        },
        Format::Format22t => Instruction::Fmt22t {
            op: op(inst),
            a: a4(inst),
            b: b4(inst),
            offset: code[pc + 1] as i16,
        },
        Format::Format22s => Instruction::Fmt22s {
            op: op(inst),
            a: a4(inst),
            b: b4(inst),
            literal: code[pc + 1] as i16,
        },
        Format::Format22c => Instruction::Fmt22c {
            op: op(inst),
            a: a4(inst),
            b: b4(inst),
            index: code[pc + 1],
        },
        Format::Format30t => Instruction::Fmt30t { op: op(inst), offset: i32_at(code, pc + 1) },
        Format::Format32x => Instruction::Fmt32x { op: op(inst), a: code[pc + 1], b: code[pc + 2] },
        Format::Format31i => Instruction::Fmt31i { op: op(inst), a: a8(inst), literal: i32_at(code, pc + 1) },
        Format::Format31t => Instruction::Fmt31t { op: op(inst), a: a8(inst), offset: i32_at(code, pc + 1) },
        Format::Format31c => Instruction::Fmt31c { op: op(inst), a: a8(inst), index: u32_at(code, pc + 1) },
        Format::Format35c => {
            let (regs, index) = read_arg_list(code, pc, inst)?;
            Instruction::Fmt35c { op: op(inst), regs, index }
        }
        Format::Format3rc => Instruction::Fmt3rc {
            op: op(inst),
            first: code[pc + 2],
            count: a8(inst),
            index: code[pc + 1],
        },
        Format::Format45cc => {
            let (regs, index) = read_arg_list(code, pc, inst)?;
            Instruction::Fmt45cc { op: op(inst), regs, index, proto_index: code[pc + 3] }
        }
        Format::Format4rcc => Instruction::Fmt4rcc {
            op: op(inst),
            first: code[pc + 2],
            count: a8(inst),
            index: code[pc + 1],
            proto_index: code[pc + 3],
        },
        Format::Format51l => {
            let lit = (code[pc + 1] as u64)
                | ((code[pc + 2] as u64) << 16)
                | ((code[pc + 3] as u64) << 32)
                | ((code[pc + 4] as u64) << 48);
            Instruction::Fmt51l { op: op(inst), a: a8(inst), literal: lit as i64 }
        }
        fmt => {
            // Payload formats are handled above; the table mapping an opcode
            // byte to one here means the table itself is inconsistent.
            fail!("Opcode 0x{:02x} maps to non-instruction format {:?}", op(inst), fmt);
        }
    };

    Ok((insn, units))
}

// Packed argument registers of the 35c/45cc shapes: up to five 4-bit
// registers C, D, E, F in the third unit plus G in the first.
fn read_arg_list(code: &[u16], pc: usize, inst: u16) -> Result<(Vec<u8>, u16), DexError> {
    let count = b4(inst) as usize;
    if count > 5 {
        fail!("Invalid argument count {} at pc {}", count, pc);
    }
    let g = a4(inst);
    let third = code[pc + 2];
    let all = [
        (third & 0x000f) as u8,
        ((third >> 4) & 0x0f) as u8,
        ((third >> 8) & 0x0f) as u8,
        ((third >> 12) & 0x0f) as u8,
        g,
    ];
    Ok((all[..count].to_vec(), code[pc + 1]))
}

fn read_payload(code: &[u16], pc: usize, ident: u16) -> Result<(Instruction, usize), DexError> {
    match ident {
        PACKED_SWITCH_IDENT => {
            require_units(code, pc, 4, "packed-switch payload header")?;
            let size = code[pc + 1] as usize;
            require_units(code, pc, 4 + size * 2, "packed-switch payload targets")?;
            let first_key = i32_at(code, pc + 2);
            let mut targets = Vec::with_capacity(size);
            for i in 0..size {
                targets.push(i32_at(code, pc + 4 + i * 2));
            }
            Ok((
                Instruction::PackedSwitchPayload { first_key, targets },
                4 + size * 2,
            ))
        }
        SPARSE_SWITCH_IDENT => {
            require_units(code, pc, 2, "sparse-switch payload header")?;
            let size = code[pc + 1] as usize;
            require_units(code, pc, 2 + size * 4, "sparse-switch payload entries")?;
            let mut keys = Vec::with_capacity(size);
            let mut targets = Vec::with_capacity(size);
            for i in 0..size {
                keys.push(i32_at(code, pc + 2 + i * 2));
            }
            for i in 0..size {
                targets.push(i32_at(code, pc + 2 + size * 2 + i * 2));
            }
            Ok((
                Instruction::SparseSwitchPayload { keys, targets },
                2 + size * 4,
            ))
        }
        FILL_ARRAY_DATA_IDENT => {
            require_units(code, pc, 4, "array-data payload header")?;
            let element_width = code[pc + 1];
            let count = u32_at(code, pc + 2) as usize;
            let byte_len = (element_width as usize)
                .checked_mul(count)
                .ok_or_else(|| DexError::new("array-data payload size overflow"))?;
            let data_units = byte_len.div_ceil(2);
            require_units(code, pc, 4 + data_units, "array-data payload elements")?;
            let mut data = Vec::with_capacity(byte_len);
            for i in 0..data_units {
                let cu = code[pc + 4 + i];
                data.push((cu & 0x00ff) as u8);
                if data.len() < byte_len {
                    data.push((cu >> 8) as u8);
                }
            }
            Ok((
                Instruction::FillArrayDataPayload { element_width, data },
                4 + data_units,
            ))
        }
        other => {
            fail!("Unknown payload identifier 0x{:04x} at pc {}", other, pc);
        }
    }
}

/// Encode one instruction, appending its code units to `out` and returning
/// the number of units written.
///
/// The opcode byte must resolve in `table` to the format of the given
/// variant; a mismatch means the instruction was built inconsistently and is
/// rejected, not coerced. Register and literal operands are validated
/// against their field widths before anything is emitted.
pub fn write_instruction(
    table: &OpcodeTable,
    out: &mut Vec<u16>,
    insn: &Instruction,
) -> Result<usize, DexError> {
    use Instruction::*;

    if let Some(value) = insn.opcode_value() {
        let opcode = lookup(table, value)?;
        if opcode.format != insn.format() {
            fail!(
                "Opcode 0x{:02x} ({}) declares format {:?} but instruction is encoded as {:?}",
                value, opcode.name, opcode.format, insn.format()
            );
        }
    }

    let before = out.len();
    match insn {
        Fmt10x { op } => {
            out.push(*op as u16);
        }
        Fmt12x { op, a, b } => {
            check_reg4(*a, "A")?;
            check_reg4(*b, "B")?;
            out.push((*op as u16) | ((*a as u16) << 8) | ((*b as u16) << 12));
        }
        Fmt11n { op, a, literal } => {
            check_reg4(*a, "A")?;
            if !(-8..=7).contains(literal) {
                fail!("Literal {} does not fit the signed 4-bit field", literal);
            }
            out.push((*op as u16) | ((*a as u16) << 8) | (((*literal as u16) & 0x0f) << 12));
        }
        Fmt11x { op, a } => {
            out.push((*op as u16) | ((*a as u16) << 8));
        }
        Fmt10t { op, offset } => {
            out.push((*op as u16) | ((*offset as u8 as u16) << 8));
        }
        Fmt20t { op, offset } => {
            out.push(*op as u16);
            out.push(*offset as u16);
        }
        Fmt22x { op, a, b } => {
            out.push((*op as u16) | ((*a as u16) << 8));
            out.push(*b);
        }
        Fmt21t { op, a, offset } => {
            out.push((*op as u16) | ((*a as u16) << 8));
            out.push(*offset as u16);
        }
        Fmt21s { op, a, literal } => {
            out.push((*op as u16) | ((*a as u16) << 8));
            out.push(*literal as u16);
        }
        Fmt21ih { op, a, literal } => {
            if literal & 0xffff != 0 {
                fail!("Literal 0x{:x} has bits outside the high 16", literal);
            }
            out.push((*op as u16) | ((*a as u16) << 8));
            out.push((literal >> 16) as u16);
        }
        Fmt21lh { op, a, literal } => {
            if literal & 0x0000_ffff_ffff_ffff != 0 {
                fail!("Literal 0x{:x} has bits outside the high 16", literal);
            }
            out.push((*op as u16) | ((*a as u16) << 8));
            out.push((literal >> 48) as u16);
        }
        Fmt21c { op, a, index } => {
            out.push((*op as u16) | ((*a as u16) << 8));
            out.push(*index);
        }
        Fmt23x { op, a, b, c } => {
            out.push((*op as u16) | ((*a as u16) << 8));
            out.push((*b as u16) | ((*c as u16) << 8));
        }
        Fmt22b { op, a, b, literal } => {
            out.push((*op as u16) | ((*a as u16) << 8));
            out.push((*b as u16) | ((*literal as u8 as u16) << 8));
        }
        Fmt22t { op, a, b, offset } => {
            check_reg4(*a, "A")?;
            check_reg4(*b, "B")?;
            out.push((*op as u16) | ((*a as u16) << 8) | ((*b as u16) << 12));
            out.push(*offset as u16);
        }
        Fmt22s { op, a, b, literal } => {
            check_reg4(*a, "A")?;
            check_reg4(*b, "B")?;
            out.push((*op as u16) | ((*a as u16) << 8) | ((*b as u16) << 12));
            out.push(*literal as u16);
        }
        Fmt22c { op, a, b, index } => {
            check_reg4(*a, "A")?;
            check_reg4(*b, "B")?;
            out.push((*op as u16) | ((*a as u16) << 8) | ((*b as u16) << 12));
            out.push(*index);
        }
        Fmt30t { op, offset } => {
            out.push(*op as u16);
            out.push(*offset as u32 as u16);
            out.push(((*offset as u32) >> 16) as u16);
        }
        Fmt32x { op, a, b } => {
            out.push(*op as u16);
            out.push(*a);
            out.push(*b);
        }
        Fmt31i { op, a, literal } => {
            out.push((*op as u16) | ((*a as u16) << 8));
            out.push(*literal as u32 as u16);
            out.push(((*literal as u32) >> 16) as u16);
        }
        Fmt31t { op, a, offset } => {
            out.push((*op as u16) | ((*a as u16) << 8));
            out.push(*offset as u32 as u16);
            out.push(((*offset as u32) >> 16) as u16);
        }
        Fmt31c { op, a, index } => {
            out.push((*op as u16) | ((*a as u16) << 8));
            out.push(*index as u16);
            out.push((*index >> 16) as u16);
        }
        Fmt35c { op, regs, index } => {
            write_arg_list(out, *op, regs, *index)?;
        }
        Fmt3rc { op, first, count, index } => {
            check_range_window(*first, *count)?;
            out.push((*op as u16) | ((*count as u16) << 8));
            out.push(*index);
            out.push(*first);
        }
        Fmt45cc { op, regs, index, proto_index } => {
            write_arg_list(out, *op, regs, *index)?;
            out.push(*proto_index);
        }
        Fmt4rcc { op, first, count, index, proto_index } => {
            check_range_window(*first, *count)?;
            out.push((*op as u16) | ((*count as u16) << 8));
            out.push(*index);
            out.push(*first);
            out.push(*proto_index);
        }
        Fmt51l { op, a, literal } => {
            let bits = *literal as u64;
            out.push((*op as u16) | ((*a as u16) << 8));
            out.push(bits as u16);
            out.push((bits >> 16) as u16);
            out.push((bits >> 32) as u16);
            out.push((bits >> 48) as u16);
        }
        PackedSwitchPayload { first_key, targets } => {
            if targets.len() > u16::MAX as usize {
                fail!("packed-switch payload with {} targets exceeds u16", targets.len());
            }
            out.push(PACKED_SWITCH_IDENT);
            out.push(targets.len() as u16);
            push_i32(out, *first_key);
            for t in targets {
                push_i32(out, *t);
            }
        }
        SparseSwitchPayload { keys, targets } => {
            if keys.len() != targets.len() {
                fail!(
                    "sparse-switch payload with {} keys but {} targets",
                    keys.len(), targets.len()
                );
            }
            if keys.len() > u16::MAX as usize {
                fail!("sparse-switch payload with {} entries exceeds u16", keys.len());
            }
            out.push(SPARSE_SWITCH_IDENT);
            out.push(keys.len() as u16);
            for k in keys {
                push_i32(out, *k);
            }
            for t in targets {
                push_i32(out, *t);
            }
        }
        FillArrayDataPayload { element_width, data } => {
            match element_width {
                1 | 2 | 4 | 8 => {}
                w => fail!("Unsupported array-data element width {}", w),
            }
            if data.len() % *element_width as usize != 0 {
                fail!(
                    "array-data byte length {} is not a multiple of element width {}",
                    data.len(), element_width
                );
            }
            out.push(FILL_ARRAY_DATA_IDENT);
            out.push(*element_width);
            let count = (data.len() / *element_width as usize) as u32;
            out.push(count as u16);
            out.push((count >> 16) as u16);
            let mut iter = data.chunks(2);
            for pair in &mut iter {
                let lo = pair[0] as u16;
                let hi = if pair.len() == 2 { pair[1] as u16 } else { 0 };
                out.push(lo | (hi << 8));
            }
        }
    }
    Ok(out.len() - before)
}

fn write_arg_list(out: &mut Vec<u16>, op: u8, regs: &[u8], index: u16) -> Result<(), DexError> {
    if regs.len() > 5 {
        fail!("Argument list of {} registers exceeds the 5-register form", regs.len());
    }
    for r in regs {
        check_reg4(*r, "argument")?;
    }
    let g = if regs.len() == 5 { regs[4] as u16 } else { 0 };
    out.push((op as u16) | (g << 8) | ((regs.len() as u16) << 12));
    out.push(index);
    let mut third = 0u16;
    for (i, r) in regs.iter().take(4).enumerate() {
        third |= (*r as u16) << (i * 4);
    }
    out.push(third);
    Ok(())
}

fn check_range_window(first: u16, count: u8) -> Result<(), DexError> {
    if (first as u32) + (count as u32) > 0x1_0000 {
        fail!("Register range v{}..+{} overflows the 16-bit register space", first, count);
    }
    Ok(())
}

#[inline]
fn push_i32(out: &mut Vec<u16>, value: i32) {
    out.push(value as u32 as u16);
    out.push(((value as u32) >> 16) as u16);
}

/// Decode a whole method body into `(pc, instruction)` pairs.
///
/// Payload blocks are recognised in-stream by their identifier units; the
/// zero units padding them to even offsets decode as plain nops.
pub fn decode_instructions(
    table: &OpcodeTable,
    code: &[u16],
) -> Result<Vec<(usize, Instruction)>, DexError> {
    let mut out = Vec::new();
    let mut pc = 0usize;
    while pc < code.len() {
        let (insn, units) = read_instruction(table, code, pc)?;
        out.push((pc, insn));
        pc += units;
    }
    Ok(out)
}

/// Assemble instructions back into code units.
///
/// Payload blocks are padded to an even code-unit (four-byte) start with a
/// single nop when the preceding stream ends at an odd offset. Branch and
/// payload offsets inside the instructions are taken as given; layout is the
/// caller's contract.
pub fn assemble_instructions(
    table: &OpcodeTable,
    insns: &[Instruction],
) -> Result<Vec<u16>, DexError> {
    let mut out = Vec::new();
    for insn in insns {
        if insn.kind() == InstructionKind::Payload && out.len() % 2 != 0 {
            out.push(0x0000);
        }
        write_instruction(table, &mut out, insn)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcodes::OpcodeTable;

    fn table() -> OpcodeTable {
        OpcodeTable::for_api(33)
    }

    fn roundtrip(insn: Instruction) {
        let t = table();
        let mut out = Vec::new();
        let written = write_instruction(&t, &mut out, &insn).expect("encode failed");
        assert_eq!(written, insn.size_in_units());
        let (decoded, consumed) = read_instruction(&t, &out, 0).expect("decode failed");
        assert_eq!(consumed, out.len());
        assert_eq!(decoded, insn);
    }

    #[test]
    fn test_roundtrip_simple_formats() {
        roundtrip(Instruction::Fmt10x { op: 0x00 });
        roundtrip(Instruction::Fmt12x { op: 0x01, a: 0x3, b: 0xf });
        roundtrip(Instruction::Fmt11n { op: 0x12, a: 0x2, literal: -8 });
        roundtrip(Instruction::Fmt11n { op: 0x12, a: 0x2, literal: 7 });
        roundtrip(Instruction::Fmt11x { op: 0x0f, a: 0xff });
        roundtrip(Instruction::Fmt22x { op: 0x02, a: 0x12, b: 0x1234 });
        roundtrip(Instruction::Fmt32x { op: 0x03, a: 0xffff, b: 0x0001 });
        roundtrip(Instruction::Fmt23x { op: 0x90, a: 1, b: 2, c: 3 });
        roundtrip(Instruction::Fmt22b { op: 0xd8, a: 1, b: 2, literal: -128 });
        roundtrip(Instruction::Fmt22s { op: 0xd0, a: 0xf, b: 0x0, literal: -32768 });
    }

    #[test]
    fn test_roundtrip_literals() {
        roundtrip(Instruction::Fmt21s { op: 0x13, a: 0, literal: -1 });
        roundtrip(Instruction::Fmt31i { op: 0x14, a: 5, literal: i32::MIN });
        roundtrip(Instruction::Fmt21ih { op: 0x15, a: 5, literal: 0x7fff0000 });
        roundtrip(Instruction::Fmt21lh { op: 0x19, a: 5, literal: 0x4010_0000_0000_0000 });
        roundtrip(Instruction::Fmt51l { op: 0x18, a: 5, literal: i64::MIN });
        roundtrip(Instruction::Fmt51l { op: 0x18, a: 5, literal: -1 });
    }

    #[test]
    fn test_roundtrip_branches() {
        roundtrip(Instruction::Fmt10t { op: 0x28, offset: -1 });
        roundtrip(Instruction::Fmt20t { op: 0x29, offset: -32768 });
        roundtrip(Instruction::Fmt30t { op: 0x2a, offset: 0x12345 });
        roundtrip(Instruction::Fmt21t { op: 0x38, a: 4, offset: 16 });
        roundtrip(Instruction::Fmt22t { op: 0x32, a: 1, b: 2, offset: -4 });
        roundtrip(Instruction::Fmt31t { op: 0x2b, a: 0, offset: 6 });
    }

    #[test]
    fn test_roundtrip_references() {
        roundtrip(Instruction::Fmt21c { op: 0x1a, a: 0, index: 0xffff });
        roundtrip(Instruction::Fmt31c { op: 0x1b, a: 0, index: 0x12345 });
        roundtrip(Instruction::Fmt22c { op: 0x52, a: 1, b: 2, index: 7 });
        roundtrip(Instruction::Fmt35c { op: 0x6e, regs: vec![0, 1, 2, 3, 4], index: 12 });
        roundtrip(Instruction::Fmt35c { op: 0x71, regs: vec![], index: 12 });
        roundtrip(Instruction::Fmt3rc { op: 0x74, first: 0x100, count: 10, index: 3 });
        roundtrip(Instruction::Fmt45cc { op: 0xfa, regs: vec![1, 2], index: 3, proto_index: 4 });
        roundtrip(Instruction::Fmt4rcc { op: 0xfb, first: 8, count: 3, index: 3, proto_index: 4 });
    }

    #[test]
    fn test_roundtrip_payloads() {
        roundtrip(Instruction::PackedSwitchPayload { first_key: -2, targets: vec![4, 8, 12] });
        roundtrip(Instruction::SparseSwitchPayload {
            keys: vec![-100, 0, 7],
            targets: vec![10, 20, 30],
        });
        roundtrip(Instruction::FillArrayDataPayload {
            element_width: 4,
            data: vec![1, 0, 0, 0, 2, 0, 0, 0],
        });
        // Odd byte count forces a half-filled trailing code unit
        roundtrip(Instruction::FillArrayDataPayload { element_width: 1, data: vec![1, 2, 3] });
    }

    #[test]
    fn test_out_of_range_register_rejected() {
        let t = table();
        let mut out = Vec::new();
        let err = write_instruction(&t, &mut out, &Instruction::Fmt12x { op: 0x01, a: 0x10, b: 0 })
            .expect_err("4-bit register overflow must be rejected");
        assert!(err.to_string().contains("4-bit"));
        assert!(out.is_empty());

        assert!(write_instruction(
            &t,
            &mut out,
            &Instruction::Fmt35c { op: 0x6e, regs: vec![0x10], index: 0 }
        )
        .is_err());

        assert!(write_instruction(
            &t,
            &mut out,
            &Instruction::Fmt11n { op: 0x12, a: 0, literal: 8 }
        )
        .is_err());
    }

    #[test]
    fn test_format_mismatch_rejected() {
        // move (0x01) is Format12x; encoding it as 22x is an inconsistency
        let t = table();
        let mut out = Vec::new();
        let err = write_instruction(&t, &mut out, &Instruction::Fmt22x { op: 0x01, a: 0, b: 0 })
            .expect_err("format mismatch must be rejected");
        assert!(err.to_string().contains("format"));
    }

    #[test]
    fn test_unknown_opcode_is_error() {
        let t = table();
        let code = [0x00_3eu16]; // 0x3e is an unassigned opcode byte
        let err = read_instruction(&t, &code, 0).expect_err("unknown opcode");
        assert!(err.to_string().contains("Unknown opcode"));
    }

    #[test]
    fn test_payload_alignment_padding() {
        let t = table();
        // Three units of instructions leave pc odd; the payload must be
        // preceded by a pad nop so it starts on an even unit.
        let insns = vec![
            Instruction::Fmt10x { op: 0x00 },
            Instruction::Fmt22x { op: 0x02, a: 0, b: 1 },
            Instruction::PackedSwitchPayload { first_key: 0, targets: vec![1] },
        ];
        let code = assemble_instructions(&t, &insns).expect("assemble failed");
        assert_eq!(code[3], 0x0000);
        assert_eq!(code[4], PACKED_SWITCH_IDENT);
        assert_eq!(code.len() % 2, 0);

        let decoded = decode_instructions(&t, &code).expect("decode failed");
        assert_eq!(decoded.len(), 4); // pad nop decodes as a real nop
        assert_eq!(decoded[3].0 % 2, 0);
        assert_eq!(decoded[3].1, insns[2]);
    }

    #[test]
    fn test_decode_stream_with_branches() {
        let t = table();
        let insns = vec![
            Instruction::Fmt21t { op: 0x38, a: 0, offset: 3 },
            Instruction::Fmt11x { op: 0x0f, a: 0 },
            Instruction::Fmt10x { op: 0x0e },
        ];
        let code = assemble_instructions(&t, &insns).expect("assemble failed");
        let decoded = decode_instructions(&t, &code).expect("decode failed");
        let stripped: Vec<Instruction> = decoded.into_iter().map(|(_, i)| i).collect();
        assert_eq!(stripped, insns);
    }
}
