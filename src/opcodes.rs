//! The Dalvik opcode table.
//!
//! Each entry declares the numeric value an opcode takes per API range, its
//! mnemonic, the pool its index operand references (if any), its encoding
//! format and a set of behaviour flags. The table itself is built once at
//! module initialisation; codec functions receive an immutable
//! [`OpcodeTable`] resolved for a concrete API level.

use std::collections::HashMap;
use std::ops::RangeInclusive;

use bitflags::bitflags;
use once_cell::sync::Lazy;
use rangemap::RangeInclusiveMap;

/// Which interned pool (if any) an opcode's index operand references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ReferenceType {
    None,
    String,
    Type,
    Field,
    Method,
    CallSite,
    MethodProto,
    MethodHandle,
}

bitflags! {
    pub struct OpcodeFlags: u32 {
        const CAN_THROW = 0x1;
        const CAN_CONTINUE = 0x2;
        const SETS_RESULT = 0x4;
        const SETS_REGISTER = 0x8;
        const SETS_WIDE_REGISTER = 0x10;
        const CAN_INITIALIZE_REFERENCE = 0x20;
    }
}

/// Operand encoding formats. The name encodes length in code units, register
/// count and operand kind the way the format specification spells them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Format {
    Format10t,
    Format10x,
    Format11n,
    Format11x,
    Format12x,
    Format20t,
    Format21c,
    Format21ih,
    Format21lh,
    Format21s,
    Format21t,
    Format22b,
    Format22c,
    Format22s,
    Format22t,
    Format22x,
    Format23x,
    Format30t,
    Format31c,
    Format31i,
    Format31t,
    Format32x,
    Format35c,
    Format3rc,
    Format45cc,
    Format4rcc,
    Format51l,
    ArrayPayload,
    PackedSwitchPayload,
    SparseSwitchPayload,
}

impl Format {
    /// Fixed size in bytes, or -1 for payload pseudo-instructions whose true
    /// length is computed from their own header.
    pub const fn size(&self) -> i32 {
        match self {
            Format::Format10t | Format::Format10x | Format::Format11n | Format::Format11x
            | Format::Format12x => 2,

            Format::Format20t | Format::Format21c | Format::Format21ih | Format::Format21lh
            | Format::Format21s | Format::Format21t | Format::Format22b | Format::Format22c
            | Format::Format22s | Format::Format22t | Format::Format22x | Format::Format23x => 4,

            Format::Format30t | Format::Format31c | Format::Format31i | Format::Format31t
            | Format::Format32x | Format::Format35c | Format::Format3rc => 6,

            Format::Format45cc | Format::Format4rcc => 8,

            Format::Format51l => 10,

            Format::ArrayPayload | Format::PackedSwitchPayload | Format::SparseSwitchPayload => -1,
        }
    }

    pub const fn is_payload_format(&self) -> bool {
        matches!(
            self,
            Format::ArrayPayload | Format::PackedSwitchPayload | Format::SparseSwitchPayload
        )
    }

    /// Fixed size in code units; payload formats fall back to 1 so a scanner
    /// never stalls (their real length comes from the payload header).
    pub const fn size_in_units(&self) -> usize {
        match self.size() {
            n if n > 0 => (n as usize) / 2,
            _ => 1,
        }
    }
}

/// An API range in which an opcode takes a particular numeric value.
pub struct VersionConstraint {
    pub api_range: RangeInclusive<i32>,
    pub opcode_value: u16,
}

/// A single opcode definition with its per-API values.
pub struct Opcode {
    pub name: &'static str,
    pub reference_type: ReferenceType,
    pub reference_type2: Option<ReferenceType>,
    pub format: Format,
    pub flags: OpcodeFlags,
    pub api_to_value_map: RangeInclusiveMap<i32, u16>,
}

impl Opcode {
    pub(crate) fn new(
        version_constraints: Vec<VersionConstraint>,
        name: &'static str,
        reference_type: ReferenceType,
        reference_type2: Option<ReferenceType>,
        format: Format,
        flags: OpcodeFlags,
    ) -> Self {
        let mut api_to_value_map = RangeInclusiveMap::new();
        for vc in version_constraints {
            if !vc.api_range.is_empty() {
                api_to_value_map.insert(vc.api_range, vc.opcode_value);
            }
        }
        Opcode {
            name,
            reference_type,
            reference_type2,
            format,
            flags,
            api_to_value_map,
        }
    }

    pub(crate) fn all_apis(opcode_value: u16) -> Vec<VersionConstraint> {
        vec![VersionConstraint {
            api_range: i32::MIN..=i32::MAX,
            opcode_value,
        }]
    }

    pub(crate) fn first_api(opcode_value: u16, api: i32) -> Vec<VersionConstraint> {
        vec![VersionConstraint {
            api_range: api..=i32::MAX,
            opcode_value,
        }]
    }

    /// Numeric value of this opcode at the given API level, if defined there.
    pub fn value_for_api(&self, api: i32) -> Option<u16> {
        self.api_to_value_map.get(&api).copied()
    }

    pub fn can_throw(&self) -> bool {
        self.flags.contains(OpcodeFlags::CAN_THROW)
    }

    pub fn can_continue(&self) -> bool {
        self.flags.contains(OpcodeFlags::CAN_CONTINUE)
    }

    pub fn sets_result(&self) -> bool {
        self.flags.contains(OpcodeFlags::SETS_RESULT)
    }

    pub fn sets_register(&self) -> bool {
        self.flags.contains(OpcodeFlags::SETS_REGISTER)
    }

    /// True when the opcode writes a register pair rather than a single register.
    pub fn sets_wide_register(&self) -> bool {
        self.flags.contains(OpcodeFlags::SETS_WIDE_REGISTER)
    }
}

pub(crate) static OPCODES: Lazy<Vec<Opcode>> = Lazy::new(|| {
    vec![
        // NOP
        Opcode::new(Opcode::all_apis(0x00), "nop", ReferenceType::None, None,
                    Format::Format10x, OpcodeFlags::CAN_CONTINUE),
        // MOVE
        Opcode::new(Opcode::all_apis(0x01), "move", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x02), "move/from16", ReferenceType::None, None,
                    Format::Format22x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x03), "move/16", ReferenceType::None, None,
                    Format::Format32x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x04), "move-wide", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0x05), "move-wide/from16", ReferenceType::None, None,
                    Format::Format22x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0x06), "move-wide/16", ReferenceType::None, None,
                    Format::Format32x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0x07), "move-object", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x08), "move-object/from16", ReferenceType::None, None,
                    Format::Format22x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x09), "move-object/16", ReferenceType::None, None,
                    Format::Format32x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        // MOVE_RESULT
        Opcode::new(Opcode::all_apis(0x0a), "move-result", ReferenceType::None, None,
                    Format::Format11x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x0b), "move-result-wide", ReferenceType::None, None,
                    Format::Format11x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0x0c), "move-result-object", ReferenceType::None, None,
                    Format::Format11x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x0d), "move-exception", ReferenceType::None, None,
                    Format::Format11x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        // RETURN
        Opcode::new(Opcode::all_apis(0x0e), "return-void", ReferenceType::None, None,
                    Format::Format10x, OpcodeFlags::empty()),
        Opcode::new(Opcode::all_apis(0x0f), "return", ReferenceType::None, None,
                    Format::Format11x, OpcodeFlags::empty()),
        Opcode::new(Opcode::all_apis(0x10), "return-wide", ReferenceType::None, None,
                    Format::Format11x, OpcodeFlags::empty()),
        Opcode::new(Opcode::all_apis(0x11), "return-object", ReferenceType::None, None,
                    Format::Format11x, OpcodeFlags::empty()),
        // CONST
        Opcode::new(Opcode::all_apis(0x12), "const/4", ReferenceType::None, None,
                    Format::Format11n, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x13), "const/16", ReferenceType::None, None,
                    Format::Format21s, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x14), "const", ReferenceType::None, None,
                    Format::Format31i, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x15), "const/high16", ReferenceType::None, None,
                    Format::Format21ih, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x16), "const-wide/16", ReferenceType::None, None,
                    Format::Format21s, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0x17), "const-wide/32", ReferenceType::None, None,
                    Format::Format31i, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0x18), "const-wide", ReferenceType::None, None,
                    Format::Format51l, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0x19), "const-wide/high16", ReferenceType::None, None,
                    Format::Format21lh, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0x1a), "const-string", ReferenceType::String, None,
                    Format::Format21c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x1b), "const-string/jumbo", ReferenceType::String, None,
                    Format::Format31c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x1c), "const-class", ReferenceType::Type, None,
                    Format::Format21c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        // MONITOR
        Opcode::new(Opcode::all_apis(0x1d), "monitor-enter", ReferenceType::None, None,
                    Format::Format11x, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x1e), "monitor-exit", ReferenceType::None, None,
                    Format::Format11x, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE),
        // TYPE CHECKS / ARRAYS
        Opcode::new(Opcode::all_apis(0x1f), "check-cast", ReferenceType::Type, None,
                    Format::Format21c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x20), "instance-of", ReferenceType::Type, None,
                    Format::Format22c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x21), "array-length", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x22), "new-instance", ReferenceType::Type, None,
                    Format::Format21c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::CAN_INITIALIZE_REFERENCE),
        Opcode::new(Opcode::all_apis(0x23), "new-array", ReferenceType::Type, None,
                    Format::Format22c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x24), "filled-new-array", ReferenceType::Type, None,
                    Format::Format35c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_RESULT),
        Opcode::new(Opcode::all_apis(0x25), "filled-new-array/range", ReferenceType::Type, None,
                    Format::Format3rc, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_RESULT),
        Opcode::new(Opcode::all_apis(0x26), "fill-array-data", ReferenceType::None, None,
                    Format::Format31t, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE),
        // THROW / GOTO / SWITCH
        Opcode::new(Opcode::all_apis(0x27), "throw", ReferenceType::None, None,
                    Format::Format11x, OpcodeFlags::CAN_THROW),
        Opcode::new(Opcode::all_apis(0x28), "goto", ReferenceType::None, None,
                    Format::Format10t, OpcodeFlags::empty()),
        Opcode::new(Opcode::all_apis(0x29), "goto/16", ReferenceType::None, None,
                    Format::Format20t, OpcodeFlags::empty()),
        Opcode::new(Opcode::all_apis(0x2a), "goto/32", ReferenceType::None, None,
                    Format::Format30t, OpcodeFlags::empty()),
        Opcode::new(Opcode::all_apis(0x2b), "packed-switch", ReferenceType::None, None,
                    Format::Format31t, OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x2c), "sparse-switch", ReferenceType::None, None,
                    Format::Format31t, OpcodeFlags::CAN_CONTINUE),
        // COMPARISONS
        Opcode::new(Opcode::all_apis(0x2d), "cmpl-float", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x2e), "cmpg-float", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x2f), "cmpl-double", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x30), "cmpg-double", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x31), "cmp-long", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        // CONDITIONAL BRANCHES
        Opcode::new(Opcode::all_apis(0x32), "if-eq", ReferenceType::None, None,
                    Format::Format22t, OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x33), "if-ne", ReferenceType::None, None,
                    Format::Format22t, OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x34), "if-lt", ReferenceType::None, None,
                    Format::Format22t, OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x35), "if-ge", ReferenceType::None, None,
                    Format::Format22t, OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x36), "if-gt", ReferenceType::None, None,
                    Format::Format22t, OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x37), "if-le", ReferenceType::None, None,
                    Format::Format22t, OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x38), "if-eqz", ReferenceType::None, None,
                    Format::Format21t, OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x39), "if-nez", ReferenceType::None, None,
                    Format::Format21t, OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x3a), "if-ltz", ReferenceType::None, None,
                    Format::Format21t, OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x3b), "if-gez", ReferenceType::None, None,
                    Format::Format21t, OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x3c), "if-gtz", ReferenceType::None, None,
                    Format::Format21t, OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x3d), "if-lez", ReferenceType::None, None,
                    Format::Format21t, OpcodeFlags::CAN_CONTINUE),
        // ARRAY GET/PUT
        Opcode::new(Opcode::all_apis(0x44), "aget", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x45), "aget-wide", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0x46), "aget-object", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x47), "aget-boolean", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x48), "aget-byte", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x49), "aget-char", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x4a), "aget-short", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x4b), "aput", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x4c), "aput-wide", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x4d), "aput-object", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x4e), "aput-boolean", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x4f), "aput-byte", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x50), "aput-char", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x51), "aput-short", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE),
        // INSTANCE FIELD GET/PUT
        Opcode::new(Opcode::all_apis(0x52), "iget", ReferenceType::Field, None,
                    Format::Format22c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x53), "iget-wide", ReferenceType::Field, None,
                    Format::Format22c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0x54), "iget-object", ReferenceType::Field, None,
                    Format::Format22c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x55), "iget-boolean", ReferenceType::Field, None,
                    Format::Format22c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x56), "iget-byte", ReferenceType::Field, None,
                    Format::Format22c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x57), "iget-char", ReferenceType::Field, None,
                    Format::Format22c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x58), "iget-short", ReferenceType::Field, None,
                    Format::Format22c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x59), "iput", ReferenceType::Field, None,
                    Format::Format22c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x5a), "iput-wide", ReferenceType::Field, None,
                    Format::Format22c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x5b), "iput-object", ReferenceType::Field, None,
                    Format::Format22c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x5c), "iput-boolean", ReferenceType::Field, None,
                    Format::Format22c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x5d), "iput-byte", ReferenceType::Field, None,
                    Format::Format22c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x5e), "iput-char", ReferenceType::Field, None,
                    Format::Format22c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x5f), "iput-short", ReferenceType::Field, None,
                    Format::Format22c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE),
        // STATIC FIELD GET/PUT
        Opcode::new(Opcode::all_apis(0x60), "sget", ReferenceType::Field, None,
                    Format::Format21c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x61), "sget-wide", ReferenceType::Field, None,
                    Format::Format21c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0x62), "sget-object", ReferenceType::Field, None,
                    Format::Format21c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x63), "sget-boolean", ReferenceType::Field, None,
                    Format::Format21c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x64), "sget-byte", ReferenceType::Field, None,
                    Format::Format21c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x65), "sget-char", ReferenceType::Field, None,
                    Format::Format21c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x66), "sget-short", ReferenceType::Field, None,
                    Format::Format21c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x67), "sput", ReferenceType::Field, None,
                    Format::Format21c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x68), "sput-wide", ReferenceType::Field, None,
                    Format::Format21c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x69), "sput-object", ReferenceType::Field, None,
                    Format::Format21c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x6a), "sput-boolean", ReferenceType::Field, None,
                    Format::Format21c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x6b), "sput-byte", ReferenceType::Field, None,
                    Format::Format21c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x6c), "sput-char", ReferenceType::Field, None,
                    Format::Format21c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE),
        Opcode::new(Opcode::all_apis(0x6d), "sput-short", ReferenceType::Field, None,
                    Format::Format21c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE),
        // INVOKES
        Opcode::new(Opcode::all_apis(0x6e), "invoke-virtual", ReferenceType::Method, None,
                    Format::Format35c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_RESULT),
        Opcode::new(Opcode::all_apis(0x6f), "invoke-super", ReferenceType::Method, None,
                    Format::Format35c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_RESULT),
        Opcode::new(Opcode::all_apis(0x70), "invoke-direct", ReferenceType::Method, None,
                    Format::Format35c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_RESULT | OpcodeFlags::CAN_INITIALIZE_REFERENCE),
        Opcode::new(Opcode::all_apis(0x71), "invoke-static", ReferenceType::Method, None,
                    Format::Format35c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_RESULT),
        Opcode::new(Opcode::all_apis(0x72), "invoke-interface", ReferenceType::Method, None,
                    Format::Format35c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_RESULT),
        Opcode::new(Opcode::all_apis(0x74), "invoke-virtual/range", ReferenceType::Method, None,
                    Format::Format3rc, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_RESULT),
        Opcode::new(Opcode::all_apis(0x75), "invoke-super/range", ReferenceType::Method, None,
                    Format::Format3rc, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_RESULT),
        Opcode::new(Opcode::all_apis(0x76), "invoke-direct/range", ReferenceType::Method, None,
                    Format::Format3rc, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_RESULT | OpcodeFlags::CAN_INITIALIZE_REFERENCE),
        Opcode::new(Opcode::all_apis(0x77), "invoke-static/range", ReferenceType::Method, None,
                    Format::Format3rc, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_RESULT),
        Opcode::new(Opcode::all_apis(0x78), "invoke-interface/range", ReferenceType::Method, None,
                    Format::Format3rc, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_RESULT),
        // UNARY OPS
        Opcode::new(Opcode::all_apis(0x7b), "neg-int", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x7c), "not-int", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x7d), "neg-long", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0x7e), "not-long", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0x7f), "neg-float", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x80), "neg-double", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0x81), "int-to-long", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0x82), "int-to-float", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x83), "int-to-double", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0x84), "long-to-int", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x85), "long-to-float", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x86), "long-to-double", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0x87), "float-to-int", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x88), "float-to-long", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0x89), "float-to-double", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0x8a), "double-to-int", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x8b), "double-to-long", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0x8c), "double-to-float", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x8d), "int-to-byte", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x8e), "int-to-char", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x8f), "int-to-short", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        // BINARY OPS (three-register)
        Opcode::new(Opcode::all_apis(0x90), "add-int", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x91), "sub-int", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x92), "mul-int", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x93), "div-int", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x94), "rem-int", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x95), "and-int", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x96), "or-int", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x97), "xor-int", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x98), "shl-int", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x99), "shr-int", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x9a), "ushr-int", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0x9b), "add-long", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0x9c), "sub-long", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0x9d), "mul-long", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0x9e), "div-long", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0x9f), "rem-long", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0xa0), "and-long", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0xa1), "or-long", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0xa2), "xor-long", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0xa3), "shl-long", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0xa4), "shr-long", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0xa5), "ushr-long", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0xa6), "add-float", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xa7), "sub-float", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xa8), "mul-float", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xa9), "div-float", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xaa), "rem-float", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xab), "add-double", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0xac), "sub-double", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0xad), "mul-double", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0xae), "div-double", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0xaf), "rem-double", ReferenceType::None, None,
                    Format::Format23x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        // BINARY OPS (two-address)
        Opcode::new(Opcode::all_apis(0xb0), "add-int/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xb1), "sub-int/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xb2), "mul-int/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xb3), "div-int/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xb4), "rem-int/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xb5), "and-int/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xb6), "or-int/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xb7), "xor-int/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xb8), "shl-int/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xb9), "shr-int/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xba), "ushr-int/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xbb), "add-long/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0xbc), "sub-long/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0xbd), "mul-long/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0xbe), "div-long/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0xbf), "rem-long/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0xc0), "and-long/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0xc1), "or-long/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0xc2), "xor-long/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0xc3), "shl-long/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0xc4), "shr-long/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0xc5), "ushr-long/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0xc6), "add-float/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xc7), "sub-float/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xc8), "mul-float/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xc9), "div-float/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xca), "rem-float/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xcb), "add-double/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0xcc), "sub-double/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0xcd), "mul-double/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0xce), "div-double/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        Opcode::new(Opcode::all_apis(0xcf), "rem-double/2addr", ReferenceType::None, None,
                    Format::Format12x, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER | OpcodeFlags::SETS_WIDE_REGISTER),
        // BINARY OPS (16-bit literal)
        Opcode::new(Opcode::all_apis(0xd0), "add-int/lit16", ReferenceType::None, None,
                    Format::Format22s, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xd1), "rsub-int", ReferenceType::None, None,
                    Format::Format22s, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xd2), "mul-int/lit16", ReferenceType::None, None,
                    Format::Format22s, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xd3), "div-int/lit16", ReferenceType::None, None,
                    Format::Format22s, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xd4), "rem-int/lit16", ReferenceType::None, None,
                    Format::Format22s, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xd5), "and-int/lit16", ReferenceType::None, None,
                    Format::Format22s, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xd6), "or-int/lit16", ReferenceType::None, None,
                    Format::Format22s, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xd7), "xor-int/lit16", ReferenceType::None, None,
                    Format::Format22s, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        // BINARY OPS (8-bit literal)
        Opcode::new(Opcode::all_apis(0xd8), "add-int/lit8", ReferenceType::None, None,
                    Format::Format22b, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xd9), "rsub-int/lit8", ReferenceType::None, None,
                    Format::Format22b, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xda), "mul-int/lit8", ReferenceType::None, None,
                    Format::Format22b, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xdb), "div-int/lit8", ReferenceType::None, None,
                    Format::Format22b, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xdc), "rem-int/lit8", ReferenceType::None, None,
                    Format::Format22b, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xdd), "and-int/lit8", ReferenceType::None, None,
                    Format::Format22b, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xde), "or-int/lit8", ReferenceType::None, None,
                    Format::Format22b, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xdf), "xor-int/lit8", ReferenceType::None, None,
                    Format::Format22b, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xe0), "shl-int/lit8", ReferenceType::None, None,
                    Format::Format22b, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xe1), "shr-int/lit8", ReferenceType::None, None,
                    Format::Format22b, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::all_apis(0xe2), "ushr-int/lit8", ReferenceType::None, None,
                    Format::Format22b, OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        // DEX 038+ POLYMORPHIC / CUSTOM INVOKES
        Opcode::new(Opcode::first_api(0xfa, 26), "invoke-polymorphic", ReferenceType::Method, Some(ReferenceType::MethodProto),
                    Format::Format45cc, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_RESULT),
        Opcode::new(Opcode::first_api(0xfb, 26), "invoke-polymorphic/range", ReferenceType::Method, Some(ReferenceType::MethodProto),
                    Format::Format4rcc, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_RESULT),
        Opcode::new(Opcode::first_api(0xfc, 26), "invoke-custom", ReferenceType::CallSite, None,
                    Format::Format35c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_RESULT),
        Opcode::new(Opcode::first_api(0xfd, 26), "invoke-custom/range", ReferenceType::CallSite, None,
                    Format::Format3rc, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_RESULT),
        // DEX 039+ METHOD HANDLE CONSTANTS
        Opcode::new(Opcode::first_api(0xfe, 28), "const-method-handle", ReferenceType::MethodHandle, None,
                    Format::Format21c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
        Opcode::new(Opcode::first_api(0xff, 28), "const-method-type", ReferenceType::MethodProto, None,
                    Format::Format21c, OpcodeFlags::CAN_THROW | OpcodeFlags::CAN_CONTINUE | OpcodeFlags::SETS_REGISTER),
    ]
});

/// Immutable per-API lookup table: opcode byte → definition.
///
/// Built once per container (or once per process for a fixed API) and passed
/// explicitly into the codec functions; there is no hidden mutable cache.
pub struct OpcodeTable {
    api: i32,
    by_value: HashMap<u8, &'static Opcode>,
}

impl OpcodeTable {
    pub fn for_api(api: i32) -> OpcodeTable {
        let mut by_value = HashMap::new();
        for opcode in OPCODES.iter() {
            if let Some(value) = opcode.value_for_api(api) {
                by_value.insert(value as u8, opcode);
            }
        }
        OpcodeTable { api, by_value }
    }

    pub fn api(&self) -> i32 {
        self.api
    }

    pub fn get(&self, value: u8) -> Option<&'static Opcode> {
        self.by_value.get(&value).copied()
    }

    pub fn by_name(&self, name: &str) -> Option<&'static Opcode> {
        self.by_value.values().find(|o| o.name == name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_lookup() {
        let table = OpcodeTable::for_api(33);
        let nop = table.get(0x00).expect("nop defined");
        assert_eq!(nop.name, "nop");
        assert_eq!(nop.format, Format::Format10x);

        let invoke = table.get(0x6e).expect("invoke-virtual defined");
        assert_eq!(invoke.name, "invoke-virtual");
        assert!(invoke.sets_result());
    }

    #[test]
    fn test_api_gated_opcodes() {
        let old = OpcodeTable::for_api(21);
        assert!(old.get(0xfa).is_none());
        assert!(old.get(0xfe).is_none());

        let new = OpcodeTable::for_api(29);
        assert_eq!(new.get(0xfa).unwrap().name, "invoke-polymorphic");
        assert_eq!(new.get(0xfe).unwrap().name, "const-method-handle");
    }

    #[test]
    fn test_wide_flags() {
        let table = OpcodeTable::for_api(33);
        assert!(table.get(0x04).unwrap().sets_wide_register()); // move-wide
        assert!(!table.get(0x01).unwrap().sets_wide_register()); // move
        assert!(table.get(0x18).unwrap().sets_wide_register()); // const-wide
    }

    #[test]
    fn test_format_sizes() {
        assert_eq!(Format::Format10x.size(), 2);
        assert_eq!(Format::Format23x.size(), 4);
        assert_eq!(Format::Format31t.size(), 6);
        assert_eq!(Format::Format45cc.size(), 8);
        assert_eq!(Format::Format51l.size(), 10);
        assert_eq!(Format::PackedSwitchPayload.size(), -1);
        assert!(Format::ArrayPayload.is_payload_format());
        assert!(!Format::Format35c.is_payload_format());
    }
}
