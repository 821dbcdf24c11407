/* DEX container format structures */

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use cesu8::{from_java_cesu8, to_java_cesu8};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::annotations::AnnotationsDirectoryItem;
use crate::encoded_values::{read_encoded_array, write_encoded_array, EncodedValue};
use crate::error::DexError;
use crate::{
    read_u1, read_u2, read_u4, read_uleb128, read_uleb128p1, read_sleb128, read_x, write_u1,
    write_u2, write_u4, write_uleb128, write_uleb128p1, write_sleb128, write_x, Endian,
};

/* Constants */
pub const DEX_MAGIC_PREFIX: [u8; 4] = [0x64, 0x65, 0x78, 0x0a]; // "dex\n"
pub const ENDIAN_CONSTANT: u32 = 0x12345678;
pub const REVERSE_ENDIAN_CONSTANT: u32 = 0x78563412;
pub const NO_INDEX: u32 = 0xffffffff;
pub const HEADER_SIZE: u32 = 0x70;

/* Access flags */
pub const ACC_PUBLIC: u32 = 0x1;
pub const ACC_PRIVATE: u32 = 0x2;
pub const ACC_PROTECTED: u32 = 0x4;
pub const ACC_STATIC: u32 = 0x8;
pub const ACC_FINAL: u32 = 0x10;
pub const ACC_SYNCHRONIZED: u32 = 0x20;
pub const ACC_VOLATILE: u32 = 0x40;
pub const ACC_BRIDGE: u32 = 0x40;
pub const ACC_TRANSIENT: u32 = 0x80;
pub const ACC_VARARGS: u32 = 0x80;
pub const ACC_NATIVE: u32 = 0x100;
pub const ACC_INTERFACE: u32 = 0x200;
pub const ACC_ABSTRACT: u32 = 0x400;
pub const ACC_STRICT: u32 = 0x800;
pub const ACC_SYNTHETIC: u32 = 0x1000;
pub const ACC_ANNOTATION: u32 = 0x2000;
pub const ACC_ENUM: u32 = 0x4000;
pub const ACC_CONSTRUCTOR: u32 = 0x10000;
pub const ACC_DECLARED_SYNCHRONIZED: u32 = 0x20000;

/* Map item type codes */
pub(crate) const TYPE_HEADER_ITEM: u16 = 0x0000;
pub(crate) const TYPE_STRING_ID_ITEM: u16 = 0x0001;
pub(crate) const TYPE_TYPE_ID_ITEM: u16 = 0x0002;
pub(crate) const TYPE_PROTO_ID_ITEM: u16 = 0x0003;
pub(crate) const TYPE_FIELD_ID_ITEM: u16 = 0x0004;
pub(crate) const TYPE_METHOD_ID_ITEM: u16 = 0x0005;
pub(crate) const TYPE_CLASS_DEF_ITEM: u16 = 0x0006;
pub(crate) const TYPE_CALL_SITE_ID_ITEM: u16 = 0x0007;
pub(crate) const TYPE_METHOD_HANDLE_ITEM: u16 = 0x0008;
pub(crate) const TYPE_MAP_LIST: u16 = 0x1000;
pub(crate) const TYPE_TYPE_LIST: u16 = 0x1001;
pub(crate) const TYPE_ANNOTATION_SET_REF_LIST: u16 = 0x1002;
pub(crate) const TYPE_ANNOTATION_SET_ITEM: u16 = 0x1003;
pub(crate) const TYPE_CLASS_DATA_ITEM: u16 = 0x2000;
pub(crate) const TYPE_CODE_ITEM: u16 = 0x2001;
pub(crate) const TYPE_STRING_DATA_ITEM: u16 = 0x2002;
pub(crate) const TYPE_DEBUG_INFO_ITEM: u16 = 0x2003;
pub(crate) const TYPE_ANNOTATION_ITEM: u16 = 0x2004;
pub(crate) const TYPE_ENCODED_ARRAY_ITEM: u16 = 0x2005;
pub(crate) const TYPE_ANNOTATIONS_DIRECTORY_ITEM: u16 = 0x2006;

/* Debug bytecode values */
pub const DBG_END_SEQUENCE: u8 = 0x00;
pub const DBG_ADVANCE_PC: u8 = 0x01;
pub const DBG_ADVANCE_LINE: u8 = 0x02;
pub const DBG_START_LOCAL: u8 = 0x03;
pub const DBG_START_LOCAL_EXTENDED: u8 = 0x04;
pub const DBG_END_LOCAL: u8 = 0x05;
pub const DBG_RESTART_LOCAL: u8 = 0x06;
pub const DBG_SET_PROLOGUE_END: u8 = 0x07;
pub const DBG_SET_EPILOGUE_BEGIN: u8 = 0x08;
pub const DBG_SET_FILE: u8 = 0x09;
pub const DBG_FIRST_SPECIAL: u8 = 0x0a;

pub type StringId = u32;
pub type TypeId = u32;
pub type ProtoId = u32;
pub type FieldId = u32;
pub type MethodId = u32;

/// The fixed 0x70-byte file header.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Header {
    pub magic: [u8; 8],
    pub checksum: u32,
    pub signature: [u8; 20],
    pub file_size: u32,
    pub header_size: u32,
    pub endian_tag: u32,
    pub link_size: u32,
    pub link_off: u32,
    pub map_off: u32,
    pub string_ids_size: u32,
    pub string_ids_off: u32,
    pub type_ids_size: u32,
    pub type_ids_off: u32,
    pub proto_ids_size: u32,
    pub proto_ids_off: u32,
    pub field_ids_size: u32,
    pub field_ids_off: u32,
    pub method_ids_size: u32,
    pub method_ids_off: u32,
    pub class_defs_size: u32,
    pub class_defs_off: u32,
    pub data_size: u32,
    pub data_off: u32,
}

impl Header {
    /// Peek the byte-order tag without committing to an endianness. An
    /// unrecognised tag is a malformed-container error.
    pub fn detect_endian(bytes: &[u8]) -> Result<Endian, DexError> {
        if bytes.len() < HEADER_SIZE as usize {
            fail!("Not enough bytes for header: {} < 0x70", bytes.len());
        }
        let raw = u32::from_le_bytes([bytes[40], bytes[41], bytes[42], bytes[43]]);
        match raw {
            ENDIAN_CONSTANT => Ok(Endian::Little),
            REVERSE_ENDIAN_CONSTANT => Ok(Endian::Big),
            other => {
                fail!("Unsupported byte-order tag 0x{:08x}", other);
            }
        }
    }

    pub fn read(bytes: &[u8], ix: &mut usize, en: Endian) -> Result<Header, DexError> {
        if bytes.len() < HEADER_SIZE as usize {
            fail!("Not enough bytes for header: {} < 0x70", bytes.len());
        }

        let magic = <[u8; 8]>::try_from(read_x(bytes, ix, 8)?)
            .map_err(|_| DexError::new("header magic truncated"))?;
        if magic[..4] != DEX_MAGIC_PREFIX || magic[7] != 0 {
            fail!("Invalid magic value {:02x?}", magic);
        }

        let header = Header {
            magic,
            checksum: read_u4(bytes, ix, en)?,
            signature: <[u8; 20]>::try_from(read_x(bytes, ix, 20)?)
                .map_err(|_| DexError::new("header signature truncated"))?,
            file_size: read_u4(bytes, ix, en)?,
            header_size: read_u4(bytes, ix, en)?,
            endian_tag: read_u4(bytes, ix, en)?,
            link_size: read_u4(bytes, ix, en)?,
            link_off: read_u4(bytes, ix, en)?,
            map_off: read_u4(bytes, ix, en)?,
            string_ids_size: read_u4(bytes, ix, en)?,
            string_ids_off: read_u4(bytes, ix, en)?,
            type_ids_size: read_u4(bytes, ix, en)?,
            type_ids_off: read_u4(bytes, ix, en)?,
            proto_ids_size: read_u4(bytes, ix, en)?,
            proto_ids_off: read_u4(bytes, ix, en)?,
            field_ids_size: read_u4(bytes, ix, en)?,
            field_ids_off: read_u4(bytes, ix, en)?,
            method_ids_size: read_u4(bytes, ix, en)?,
            method_ids_off: read_u4(bytes, ix, en)?,
            class_defs_size: read_u4(bytes, ix, en)?,
            class_defs_off: read_u4(bytes, ix, en)?,
            data_size: read_u4(bytes, ix, en)?,
            data_off: read_u4(bytes, ix, en)?,
        };

        if header.header_size != HEADER_SIZE {
            warn!(
                "[header] unexpected header_size 0x{:x} (expected 0x{:x})",
                header.header_size, HEADER_SIZE
            );
        }
        header.version()?;

        Ok(header)
    }

    /// Numeric container version from the magic, e.g. 35, 38, 39, 41.
    pub fn version(&self) -> Result<u32, DexError> {
        let d = [self.magic[4], self.magic[5], self.magic[6]];
        if !d.iter().all(|b| b.is_ascii_digit()) {
            fail!("Invalid version digits in magic {:02x?}", self.magic);
        }
        let version =
            ((d[0] - b'0') as u32) * 100 + ((d[1] - b'0') as u32) * 10 + ((d[2] - b'0') as u32);
        if !(35..=41).contains(&version) {
            fail!("Unsupported container version {:03}", version);
        }
        Ok(version)
    }

    pub fn magic_for_version(version: u32) -> [u8; 8] {
        let mut magic = [0u8; 8];
        magic[..4].copy_from_slice(&DEX_MAGIC_PREFIX);
        magic[4] = b'0' + ((version / 100) % 10) as u8;
        magic[5] = b'0' + ((version / 10) % 10) as u8;
        magic[6] = b'0' + (version % 10) as u8;
        magic[7] = 0;
        magic
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let mut c = 0;
        c += write_x(bytes, &self.magic);
        c += write_u4(bytes, self.checksum);
        c += write_x(bytes, &self.signature);
        c += write_u4(bytes, self.file_size);
        c += write_u4(bytes, self.header_size);
        c += write_u4(bytes, self.endian_tag);
        c += write_u4(bytes, self.link_size);
        c += write_u4(bytes, self.link_off);
        c += write_u4(bytes, self.map_off);
        c += write_u4(bytes, self.string_ids_size);
        c += write_u4(bytes, self.string_ids_off);
        c += write_u4(bytes, self.type_ids_size);
        c += write_u4(bytes, self.type_ids_off);
        c += write_u4(bytes, self.proto_ids_size);
        c += write_u4(bytes, self.proto_ids_off);
        c += write_u4(bytes, self.field_ids_size);
        c += write_u4(bytes, self.field_ids_off);
        c += write_u4(bytes, self.method_ids_size);
        c += write_u4(bytes, self.method_ids_off);
        c += write_u4(bytes, self.class_defs_size);
        c += write_u4(bytes, self.class_defs_off);
        c += write_u4(bytes, self.data_size);
        c += write_u4(bytes, self.data_off);
        c
    }
}

/// A string_data entry. Strings that decode cleanly from modified UTF-8 are
/// held as Rust strings; anything else is kept byte-exact together with its
/// declared UTF-16 length so it survives a round trip untouched.
#[derive(Debug, Eq, PartialEq, Clone, Hash, Serialize, Deserialize)]
pub enum DexString {
    Decoded(String),
    Raw(u32, Vec<u8>),
}

impl DexString {
    pub fn from_string(s: &str) -> DexString {
        DexString::Decoded(s.to_string())
    }

    pub fn to_string(&self) -> Result<String, DexError> {
        match self {
            DexString::Decoded(s) => Ok(s.to_string()),
            DexString::Raw(_, _) => Err(DexError::new("string is not valid modified UTF-8")),
        }
    }

    fn utf16_len(s: &str) -> u32 {
        s.chars().map(|ch| ch.len_utf16() as u32).sum()
    }

    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<DexString, DexError> {
        let utf16_size = read_uleb128(bytes, ix)?;
        let mut v = vec![];

        loop {
            let u = read_u1(bytes, ix)?;
            if u != 0 {
                v.push(u);
            } else {
                break;
            }
        }

        Ok(match from_java_cesu8(v.as_slice()) {
            Ok(converted) => {
                let s = converted.to_string();
                // The declared length counts UTF-16 code units, not bytes;
                // trust it as the logical string length and flag liars.
                if Self::utf16_len(&s) != utf16_size {
                    warn!(
                        "[string] declared utf16 length {} but decoded {} units",
                        utf16_size,
                        Self::utf16_len(&s)
                    );
                }
                DexString::Decoded(s)
            }
            _ => DexString::Raw(utf16_size, v),
        })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let mut c = 0;

        match self {
            DexString::Raw(utf16_size, v) => {
                c += write_uleb128(bytes, *utf16_size);
                c += write_x(bytes, v);
                c += write_u1(bytes, 0);
            }

            DexString::Decoded(s) => {
                let encoded = to_java_cesu8(s);
                c += write_uleb128(bytes, Self::utf16_len(s));
                c += write_x(bytes, &encoded);
                c += write_u1(bytes, 0);
            }
        }
        c
    }
}

/// type_list: a counted array of 16-bit type indices, 4-byte aligned on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TypeList(pub Vec<TypeId>);

impl TypeList {
    pub fn from_type_ids(ids: Vec<TypeId>) -> TypeList {
        TypeList(ids)
    }

    pub fn items(&self) -> &[TypeId] {
        &self.0
    }

    pub fn read(bytes: &[u8], ix: &mut usize, en: Endian) -> Result<TypeList, DexError> {
        let size = read_u4(bytes, ix, en)?;
        let mut v = Vec::with_capacity(size as usize);
        for _ in 0..size {
            v.push(read_u2(bytes, ix, en)? as TypeId);
        }
        Ok(TypeList(v))
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let mut c = 0;
        c += write_u4(bytes, self.0.len() as u32);
        for i in &self.0 {
            c += write_u2(bytes, *i as u16);
        }
        c
    }
}

/// proto_id_item, with the parameter list held inline rather than by offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtoItem {
    pub shorty_idx: StringId,
    pub return_type_idx: TypeId,
    pub parameters: TypeList,
}

impl ProtoItem {
    pub fn of(shorty_idx: StringId, return_type_idx: TypeId, parameters: Vec<TypeId>) -> ProtoItem {
        ProtoItem {
            shorty_idx,
            return_type_idx,
            parameters: TypeList::from_type_ids(parameters),
        }
    }

    pub fn write(&self, bytes: &mut Vec<u8>, parameters_off: u32) -> usize {
        let mut c = 0;
        c += write_u4(bytes, self.shorty_idx);
        c += write_u4(bytes, self.return_type_idx);
        c += write_u4(bytes, parameters_off);
        c
    }
}

/// field_id_item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldItem {
    pub class_idx: TypeId,
    pub type_idx: TypeId,
    pub name_idx: StringId,
}

impl FieldItem {
    pub fn of(class_idx: TypeId, type_idx: TypeId, name_idx: StringId) -> FieldItem {
        FieldItem { class_idx, type_idx, name_idx }
    }

    pub fn read(bytes: &[u8], ix: &mut usize, en: Endian) -> Result<FieldItem, DexError> {
        Ok(FieldItem {
            class_idx: read_u2(bytes, ix, en)? as TypeId,
            type_idx: read_u2(bytes, ix, en)? as TypeId,
            name_idx: read_u4(bytes, ix, en)? as StringId,
        })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let mut c = 0;
        c += write_u2(bytes, self.class_idx as u16);
        c += write_u2(bytes, self.type_idx as u16);
        c += write_u4(bytes, self.name_idx);
        c
    }
}

/// method_id_item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodItem {
    pub class_idx: TypeId,
    pub proto_idx: ProtoId,
    pub name_idx: StringId,
}

impl MethodItem {
    pub fn of(class_idx: TypeId, proto_idx: ProtoId, name_idx: StringId) -> MethodItem {
        MethodItem { class_idx, proto_idx, name_idx }
    }

    pub fn read(bytes: &[u8], ix: &mut usize, en: Endian) -> Result<MethodItem, DexError> {
        Ok(MethodItem {
            class_idx: read_u2(bytes, ix, en)? as TypeId,
            proto_idx: read_u2(bytes, ix, en)? as ProtoId,
            name_idx: read_u4(bytes, ix, en)? as StringId,
        })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let mut c = 0;
        c += write_u2(bytes, self.class_idx as u16);
        c += write_u2(bytes, self.proto_idx as u16);
        c += write_u4(bytes, self.name_idx);
        c
    }
}

/// Target semantics of a method_handle_item: field put/get or method invoke,
/// each either static or instance-targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MethodHandleType {
    StaticPut,
    StaticGet,
    InstancePut,
    InstanceGet,
    InvokeStatic,
    InvokeInstance,
    InvokeConstructor,
    InvokeDirect,
    InvokeInterface,
}

impl MethodHandleType {
    pub fn from_u16(value: u16) -> Result<MethodHandleType, DexError> {
        use MethodHandleType::*;
        Ok(match value {
            0x00 => StaticPut,
            0x01 => StaticGet,
            0x02 => InstancePut,
            0x03 => InstanceGet,
            0x04 => InvokeStatic,
            0x05 => InvokeInstance,
            0x06 => InvokeConstructor,
            0x07 => InvokeDirect,
            0x08 => InvokeInterface,
            other => {
                fail!("Unknown method handle type 0x{:04x}", other);
            }
        })
    }

    pub fn as_u16(&self) -> u16 {
        use MethodHandleType::*;
        match self {
            StaticPut => 0x00,
            StaticGet => 0x01,
            InstancePut => 0x02,
            InstanceGet => 0x03,
            InvokeStatic => 0x04,
            InvokeInstance => 0x05,
            InvokeConstructor => 0x06,
            InvokeDirect => 0x07,
            InvokeInterface => 0x08,
        }
    }

    /// True when the handle's target index points into the field table
    /// rather than the method table.
    pub fn targets_field(&self) -> bool {
        matches!(
            self,
            MethodHandleType::StaticPut
                | MethodHandleType::StaticGet
                | MethodHandleType::InstancePut
                | MethodHandleType::InstanceGet
        )
    }

    pub fn targets_static(&self) -> bool {
        matches!(
            self,
            MethodHandleType::StaticPut
                | MethodHandleType::StaticGet
                | MethodHandleType::InvokeStatic
        )
    }
}

/// method_handle_item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodHandleItem {
    pub handle_type: MethodHandleType,
    pub field_or_method_idx: u16,
}

impl MethodHandleItem {
    pub fn of(handle_type: MethodHandleType, field_or_method_idx: u16) -> MethodHandleItem {
        MethodHandleItem { handle_type, field_or_method_idx }
    }

    pub fn read(bytes: &[u8], ix: &mut usize, en: Endian) -> Result<MethodHandleItem, DexError> {
        let handle_type = MethodHandleType::from_u16(read_u2(bytes, ix, en)?)?;
        let _unused1 = read_u2(bytes, ix, en)?;
        let field_or_method_idx = read_u2(bytes, ix, en)?;
        let _unused2 = read_u2(bytes, ix, en)?;
        Ok(MethodHandleItem { handle_type, field_or_method_idx })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let mut c = 0;
        c += write_u2(bytes, self.handle_type.as_u16());
        c += write_u2(bytes, 0);
        c += write_u2(bytes, self.field_or_method_idx);
        c += write_u2(bytes, 0);
        c
    }
}

/// A call site definition: an encoded array whose first three elements are
/// the bootstrap method handle, the method name and the method type, with
/// any further elements passed through as extra bootstrap arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSiteItem {
    pub values: Vec<EncodedValue>,
}

impl CallSiteItem {
    pub fn of(
        method_handle_idx: u32,
        name_idx: StringId,
        proto_idx: ProtoId,
        extra_args: Vec<EncodedValue>,
    ) -> CallSiteItem {
        let mut values = vec![
            EncodedValue::MethodHandle(method_handle_idx),
            EncodedValue::String(name_idx),
            EncodedValue::MethodType(proto_idx),
        ];
        values.extend(extra_args);
        CallSiteItem { values }
    }

    pub fn validate(&self) -> Result<(), DexError> {
        if self.values.len() < 3 {
            fail!("Call site with {} elements, at least 3 required", self.values.len());
        }
        if !matches!(self.values[0], EncodedValue::MethodHandle(_)) {
            fail!("Call site element 0 must be a method handle");
        }
        if !matches!(self.values[1], EncodedValue::String(_)) {
            fail!("Call site element 1 must be a name string");
        }
        if !matches!(self.values[2], EncodedValue::MethodType(_)) {
            fail!("Call site element 2 must be a method type");
        }
        Ok(())
    }

    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<CallSiteItem, DexError> {
        let item = CallSiteItem { values: read_encoded_array(bytes, ix)? };
        item.validate()?;
        Ok(item)
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        write_encoded_array(&self.values, bytes)
    }
}

/// A class member field with its absolute field index. The on-disk delta
/// encoding exists only at the read/write boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedField {
    pub field_idx: FieldId,
    pub access_flags: u32,
}

/// A class member method with its absolute method index and optional body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedMethod {
    pub method_idx: MethodId,
    pub access_flags: u32,
    pub code: Option<CodeItem>,
}

/// One event of the debug bytecode state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DebugEvent {
    AdvancePc(u32),
    AdvanceLine(i32),
    StartLocal { register: u32, name_idx: Option<StringId>, type_idx: Option<TypeId> },
    StartLocalExtended {
        register: u32,
        name_idx: Option<StringId>,
        type_idx: Option<TypeId>,
        sig_idx: Option<StringId>,
    },
    EndLocal(u32),
    RestartLocal(u32),
    SetPrologueEnd,
    SetEpilogueBegin,
    SetFile(Option<StringId>),
    Special(u8),
}

/// debug_info_item: header plus the event stream up to DBG_END_SEQUENCE.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DebugInfo {
    pub line_start: u32,
    pub parameter_names: Vec<Option<StringId>>,
    pub events: Vec<DebugEvent>,
}

fn opt_index(raw: i32) -> Option<u32> {
    if raw < 0 { None } else { Some(raw as u32) }
}

fn opt_index_p1(value: Option<u32>) -> i32 {
    match value {
        Some(v) => v as i32,
        None => -1,
    }
}

impl DebugInfo {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<DebugInfo, DexError> {
        let line_start = read_uleb128(bytes, ix)?;
        let parameters_size = read_uleb128(bytes, ix)?;
        let mut parameter_names = Vec::with_capacity(parameters_size as usize);
        for _ in 0..parameters_size {
            parameter_names.push(opt_index(read_uleb128p1(bytes, ix)?));
        }

        let mut events = vec![];
        loop {
            let op = read_u1(bytes, ix)?;
            let event = match op {
                DBG_END_SEQUENCE => break,
                DBG_ADVANCE_PC => DebugEvent::AdvancePc(read_uleb128(bytes, ix)?),
                DBG_ADVANCE_LINE => DebugEvent::AdvanceLine(read_sleb128(bytes, ix)?),
                DBG_START_LOCAL => DebugEvent::StartLocal {
                    register: read_uleb128(bytes, ix)?,
                    name_idx: opt_index(read_uleb128p1(bytes, ix)?),
                    type_idx: opt_index(read_uleb128p1(bytes, ix)?),
                },
                DBG_START_LOCAL_EXTENDED => DebugEvent::StartLocalExtended {
                    register: read_uleb128(bytes, ix)?,
                    name_idx: opt_index(read_uleb128p1(bytes, ix)?),
                    type_idx: opt_index(read_uleb128p1(bytes, ix)?),
                    sig_idx: opt_index(read_uleb128p1(bytes, ix)?),
                },
                DBG_END_LOCAL => DebugEvent::EndLocal(read_uleb128(bytes, ix)?),
                DBG_RESTART_LOCAL => DebugEvent::RestartLocal(read_uleb128(bytes, ix)?),
                DBG_SET_PROLOGUE_END => DebugEvent::SetPrologueEnd,
                DBG_SET_EPILOGUE_BEGIN => DebugEvent::SetEpilogueBegin,
                DBG_SET_FILE => DebugEvent::SetFile(opt_index(read_uleb128p1(bytes, ix)?)),
                special => DebugEvent::Special(special),
            };
            events.push(event);
        }

        Ok(DebugInfo { line_start, parameter_names, events })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let mut c = 0;
        c += write_uleb128(bytes, self.line_start);
        c += write_uleb128(bytes, self.parameter_names.len() as u32);
        for name in &self.parameter_names {
            c += write_uleb128p1(bytes, opt_index_p1(*name));
        }

        for event in &self.events {
            match event {
                DebugEvent::AdvancePc(pc) => {
                    c += write_u1(bytes, DBG_ADVANCE_PC);
                    c += write_uleb128(bytes, *pc);
                }
                DebugEvent::AdvanceLine(delta) => {
                    c += write_u1(bytes, DBG_ADVANCE_LINE);
                    c += write_sleb128(bytes, *delta);
                }
                DebugEvent::StartLocal { register, name_idx, type_idx } => {
                    c += write_u1(bytes, DBG_START_LOCAL);
                    c += write_uleb128(bytes, *register);
                    c += write_uleb128p1(bytes, opt_index_p1(*name_idx));
                    c += write_uleb128p1(bytes, opt_index_p1(*type_idx));
                }
                DebugEvent::StartLocalExtended { register, name_idx, type_idx, sig_idx } => {
                    c += write_u1(bytes, DBG_START_LOCAL_EXTENDED);
                    c += write_uleb128(bytes, *register);
                    c += write_uleb128p1(bytes, opt_index_p1(*name_idx));
                    c += write_uleb128p1(bytes, opt_index_p1(*type_idx));
                    c += write_uleb128p1(bytes, opt_index_p1(*sig_idx));
                }
                DebugEvent::EndLocal(register) => {
                    c += write_u1(bytes, DBG_END_LOCAL);
                    c += write_uleb128(bytes, *register);
                }
                DebugEvent::RestartLocal(register) => {
                    c += write_u1(bytes, DBG_RESTART_LOCAL);
                    c += write_uleb128(bytes, *register);
                }
                DebugEvent::SetPrologueEnd => c += write_u1(bytes, DBG_SET_PROLOGUE_END),
                DebugEvent::SetEpilogueBegin => c += write_u1(bytes, DBG_SET_EPILOGUE_BEGIN),
                DebugEvent::SetFile(name_idx) => {
                    c += write_u1(bytes, DBG_SET_FILE);
                    c += write_uleb128p1(bytes, opt_index_p1(*name_idx));
                }
                DebugEvent::Special(op) => c += write_u1(bytes, *op),
            }
        }

        c += write_u1(bytes, DBG_END_SEQUENCE);
        c
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncodedTypeAddrPair {
    pub type_idx: TypeId,
    pub addr: u32,
}

impl EncodedTypeAddrPair {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<EncodedTypeAddrPair, DexError> {
        let type_idx = read_uleb128(bytes, ix)?;
        let addr = read_uleb128(bytes, ix)?;
        Ok(EncodedTypeAddrPair { type_idx, addr })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let mut c = 0;
        c += write_uleb128(bytes, self.type_idx);
        c += write_uleb128(bytes, self.addr);
        c
    }
}

/// A try range. `handler` is a handle into the owning code item's handler
/// arena; byte offsets into the handler table exist only on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TryItem {
    pub start_addr: u32,
    pub insn_count: u16,
    pub handler: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncodedCatchHandler {
    pub handlers: Vec<EncodedTypeAddrPair>,
    pub catch_all_addr: Option<u32>,
}

impl EncodedCatchHandler {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<EncodedCatchHandler, DexError> {
        let size = read_sleb128(bytes, ix)?;
        let count = size.unsigned_abs() as usize;
        let mut pairs = Vec::with_capacity(count);
        for _ in 0..count {
            pairs.push(EncodedTypeAddrPair::read(bytes, ix)?);
        }
        let catch_all_addr = if size <= 0 { Some(read_uleb128(bytes, ix)?) } else { None };
        Ok(EncodedCatchHandler { handlers: pairs, catch_all_addr })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let mut c = 0;
        let size: i32 = if self.catch_all_addr.is_some() {
            -(self.handlers.len() as i32)
        } else {
            self.handlers.len() as i32
        };
        c += write_sleb128(bytes, size);
        for p in &self.handlers {
            c += p.write(bytes);
        }
        if let Some(addr) = self.catch_all_addr {
            c += write_uleb128(bytes, addr);
        }
        c
    }
}

/// code_item: register sizing, the instruction stream in code units, try
/// ranges and their shared catch handler arena, and optional debug info.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CodeItem {
    pub registers_size: u16,
    pub ins_size: u16,
    pub outs_size: u16,
    pub insns: Vec<u16>,
    pub tries: Vec<TryItem>,
    pub handlers: Vec<EncodedCatchHandler>,
    pub debug_info: Option<DebugInfo>,
}

impl CodeItem {
    pub fn of(registers_size: u16, ins_size: u16, outs_size: u16, insns: Vec<u16>) -> CodeItem {
        CodeItem {
            registers_size,
            ins_size,
            outs_size,
            insns,
            tries: vec![],
            handlers: vec![],
            debug_info: None,
        }
    }

    /// Add a handler to the arena, returning its handle for try ranges.
    pub fn add_handler(&mut self, handler: EncodedCatchHandler) -> usize {
        self.handlers.push(handler);
        self.handlers.len() - 1
    }

    pub fn read(bytes: &[u8], ix: &mut usize, en: Endian) -> Result<CodeItem, DexError> {
        let code_item_start = *ix;
        let registers_size = read_u2(bytes, ix, en)?;
        let ins_size = read_u2(bytes, ix, en)?;
        let outs_size = read_u2(bytes, ix, en)?;
        let tries_size = read_u2(bytes, ix, en)?;

        let debug_info_off = read_u4(bytes, ix, en)? as usize;
        let debug_info = if debug_info_off > 0 {
            let mut j = debug_info_off;
            Some(DebugInfo::read(bytes, &mut j)?)
        } else {
            None
        };

        let insns_size = read_u4(bytes, ix, en)? as usize;
        let mut insns = Vec::with_capacity(insns_size);
        for _ in 0..insns_size {
            insns.push(read_u2(bytes, ix, en)?);
        }

        let mut tries = vec![];
        let mut handlers: Vec<EncodedCatchHandler> = vec![];

        if tries_size > 0 {
            // A 2-byte pad keeps the try table 4-byte aligned after an odd
            // instruction count.
            if insns_size % 2 != 0 {
                let padding = read_u2(bytes, ix, en)?;
                if padding != 0 {
                    warn!(
                        "[code] non-zero padding 0x{:04x} before tries (code_item at 0x{:x})",
                        padding, code_item_start
                    );
                }
            }

            let mut raw_tries = Vec::with_capacity(tries_size as usize);
            for _ in 0..tries_size {
                let start_addr = read_u4(bytes, ix, en)?;
                let insn_count = read_u2(bytes, ix, en)?;
                let handler_off = read_u2(bytes, ix, en)?;
                raw_tries.push((start_addr, insn_count, handler_off));
            }

            // Handler offsets are relative to the start of the handler list,
            // size prefix included. Record each entry's offset so try ranges
            // can be resolved to arena handles.
            let list_start = *ix;
            let handlers_size = read_uleb128(bytes, ix)? as usize;
            let mut offset_to_handle = HashMap::new();
            for i in 0..handlers_size {
                let rel = *ix - list_start;
                offset_to_handle.insert(rel, i);
                let entry_start = *ix;
                handlers.push(EncodedCatchHandler::read(bytes, ix).map_err(|e| {
                    DexError::with_context(
                        e,
                        format!(
                            "reading catch handler {}/{} at 0x{:x} (code_item at 0x{:x})",
                            i + 1,
                            handlers_size,
                            entry_start,
                            code_item_start
                        ),
                    )
                })?);
                if *ix <= entry_start {
                    fail!("catch handler did not advance the cursor (corrupt data)");
                }
            }

            for (start_addr, insn_count, handler_off) in raw_tries {
                let handle = offset_to_handle.get(&(handler_off as usize)).ok_or_else(|| {
                    DexError::new(&format!(
                        "try range handler offset {} does not match any handler entry \
                         (code_item at 0x{:x})",
                        handler_off, code_item_start
                    ))
                })?;
                tries.push(TryItem { start_addr, insn_count, handler: *handle });
            }
        }

        Ok(CodeItem {
            registers_size,
            ins_size,
            outs_size,
            insns,
            tries,
            handlers,
            debug_info,
        })
    }

    /// Serialise the code item. `debug_info_off` is the resolved absolute
    /// offset of the debug record (0 when absent or patched in later by the
    /// writer; the field sits at byte 8 of the record).
    ///
    /// The catch handler table is emitted with the two-buffer strategy: the
    /// deduplicated handlers go into a scratch buffer first, which fixes
    /// every handler's relative offset, then the try records are written
    /// with those offsets and the scratch appended after them.
    pub fn write(&self, bytes: &mut Vec<u8>, debug_info_off: u32) -> Result<usize, DexError> {
        let mut c = 0;
        c += write_u2(bytes, self.registers_size);
        c += write_u2(bytes, self.ins_size);
        c += write_u2(bytes, self.outs_size);
        c += write_u2(bytes, self.tries.len() as u16);
        c += write_u4(bytes, debug_info_off);
        c += write_u4(bytes, self.insns.len() as u32);
        for u in &self.insns {
            c += write_u2(bytes, *u);
        }

        if !self.tries.is_empty() {
            if self.insns.len() % 2 != 0 {
                c += write_u2(bytes, 0);
            }

            // Stable dedup of the handler arena
            let mut unique: Vec<&EncodedCatchHandler> = vec![];
            let mut remap = vec![0usize; self.handlers.len()];
            for (i, h) in self.handlers.iter().enumerate() {
                match unique.iter().position(|u| *u == h) {
                    Some(pos) => remap[i] = pos,
                    None => {
                        remap[i] = unique.len();
                        unique.push(h);
                    }
                }
            }

            let mut scratch = vec![];
            write_uleb128(&mut scratch, unique.len() as u32);
            let mut rel_offs = Vec::with_capacity(unique.len());
            for h in &unique {
                rel_offs.push(scratch.len());
                h.write(&mut scratch);
            }

            for t in &self.tries {
                if t.handler >= self.handlers.len() {
                    fail!(
                        "try range references handler {} but the arena holds {}",
                        t.handler,
                        self.handlers.len()
                    );
                }
                let off = rel_offs[remap[t.handler]];
                if off > u16::MAX as usize {
                    fail!("handler table offset {} exceeds the 16-bit field", off);
                }
                c += write_u4(bytes, t.start_addr);
                c += write_u2(bytes, t.insn_count);
                c += write_u2(bytes, off as u16);
            }

            c += write_x(bytes, &scratch);
        }

        Ok(c)
    }
}

/// class_data_item: the four ordered member lists.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassDataItem {
    pub static_fields: Vec<EncodedField>,
    pub instance_fields: Vec<EncodedField>,
    pub direct_methods: Vec<EncodedMethod>,
    pub virtual_methods: Vec<EncodedMethod>,
}

fn read_field_list(
    bytes: &[u8],
    ix: &mut usize,
    count: u32,
) -> Result<Vec<EncodedField>, DexError> {
    let mut fields = Vec::with_capacity(count as usize);
    let mut idx: FieldId = 0;
    for _ in 0..count {
        idx = idx.wrapping_add(read_uleb128(bytes, ix)?);
        fields.push(EncodedField { field_idx: idx, access_flags: read_uleb128(bytes, ix)? });
    }
    Ok(fields)
}

fn read_method_list(
    bytes: &[u8],
    ix: &mut usize,
    count: u32,
    en: Endian,
) -> Result<Vec<EncodedMethod>, DexError> {
    let mut methods = Vec::with_capacity(count as usize);
    let mut idx: MethodId = 0;
    for _ in 0..count {
        idx = idx.wrapping_add(read_uleb128(bytes, ix)?);
        let access_flags = read_uleb128(bytes, ix)?;
        let code_off = read_uleb128(bytes, ix)? as usize;
        let code = if code_off > 0 {
            let mut j = code_off;
            Some(CodeItem::read(bytes, &mut j, en)?)
        } else {
            None
        };
        methods.push(EncodedMethod { method_idx: idx, access_flags, code });
    }
    Ok(methods)
}

fn write_field_list(bytes: &mut Vec<u8>, fields: &[EncodedField]) -> Result<usize, DexError> {
    let mut c = 0;
    let mut last: FieldId = 0;
    for (i, f) in fields.iter().enumerate() {
        if i > 0 && f.field_idx <= last {
            fail!(
                "field members not in strictly ascending index order ({} after {})",
                f.field_idx,
                last
            );
        }
        c += write_uleb128(bytes, f.field_idx - if i > 0 { last } else { 0 });
        last = f.field_idx;
        c += write_uleb128(bytes, f.access_flags);
    }
    Ok(c)
}

fn write_method_list(
    bytes: &mut Vec<u8>,
    methods: &[EncodedMethod],
    code_offs: &[u32],
) -> Result<usize, DexError> {
    let mut c = 0;
    let mut last: MethodId = 0;
    for (i, m) in methods.iter().enumerate() {
        if i > 0 && m.method_idx <= last {
            fail!(
                "method members not in strictly ascending index order ({} after {})",
                m.method_idx,
                last
            );
        }
        c += write_uleb128(bytes, m.method_idx - if i > 0 { last } else { 0 });
        last = m.method_idx;
        c += write_uleb128(bytes, m.access_flags);
        c += write_uleb128(bytes, code_offs[i]);
    }
    Ok(c)
}

impl ClassDataItem {
    pub fn is_empty(&self) -> bool {
        self.static_fields.is_empty()
            && self.instance_fields.is_empty()
            && self.direct_methods.is_empty()
            && self.virtual_methods.is_empty()
    }

    pub fn read(bytes: &[u8], ix: &mut usize, en: Endian) -> Result<ClassDataItem, DexError> {
        let static_field_size = read_uleb128(bytes, ix)?;
        let instance_field_size = read_uleb128(bytes, ix)?;
        let direct_method_size = read_uleb128(bytes, ix)?;
        let virtual_method_size = read_uleb128(bytes, ix)?;

        Ok(ClassDataItem {
            static_fields: read_field_list(bytes, ix, static_field_size)?,
            instance_fields: read_field_list(bytes, ix, instance_field_size)?,
            direct_methods: read_method_list(bytes, ix, direct_method_size, en)?,
            virtual_methods: read_method_list(bytes, ix, virtual_method_size, en)?,
        })
    }

    /// Serialise with resolved code offsets, one per direct and virtual
    /// method (0 for abstract/native members without a body). Member lists
    /// must already be sorted by ascending index; a violation is a
    /// construction bug upstream and is rejected.
    pub fn write(
        &self,
        bytes: &mut Vec<u8>,
        direct_code_offs: &[u32],
        virtual_code_offs: &[u32],
    ) -> Result<usize, DexError> {
        if direct_code_offs.len() != self.direct_methods.len()
            || virtual_code_offs.len() != self.virtual_methods.len()
        {
            fail!("code offset lists do not match method list lengths");
        }
        let mut c = 0;
        c += write_uleb128(bytes, self.static_fields.len() as u32);
        c += write_uleb128(bytes, self.instance_fields.len() as u32);
        c += write_uleb128(bytes, self.direct_methods.len() as u32);
        c += write_uleb128(bytes, self.virtual_methods.len() as u32);

        c += write_field_list(bytes, &self.static_fields)?;
        c += write_field_list(bytes, &self.instance_fields)?;
        c += write_method_list(bytes, &self.direct_methods, direct_code_offs)?;
        c += write_method_list(bytes, &self.virtual_methods, virtual_code_offs)?;
        Ok(c)
    }
}

/// class_def_item with every linked substructure resolved inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDefItem {
    pub class_idx: TypeId,
    pub access_flags: u32,
    pub superclass_idx: TypeId,
    pub interfaces: Option<TypeList>,
    pub source_file_idx: StringId,
    pub annotations: Option<AnnotationsDirectoryItem>,
    pub class_data: Option<ClassDataItem>,
    pub static_values: Option<Vec<EncodedValue>>,
}

impl ClassDefItem {
    pub fn of(class_idx: TypeId, access_flags: u32, superclass_idx: TypeId) -> ClassDefItem {
        ClassDefItem {
            class_idx,
            access_flags,
            superclass_idx,
            interfaces: None,
            source_file_idx: NO_INDEX,
            annotations: None,
            class_data: None,
            static_values: None,
        }
    }

    pub fn read(bytes: &[u8], ix: &mut usize, en: Endian) -> Result<ClassDefItem, DexError> {
        let class_idx = read_u4(bytes, ix, en)?;
        let access_flags = read_u4(bytes, ix, en)?;
        let superclass_idx = read_u4(bytes, ix, en)?;
        let interfaces_off = read_u4(bytes, ix, en)? as usize;
        let interfaces = if interfaces_off > 0 {
            let mut j = interfaces_off;
            Some(TypeList::read(bytes, &mut j, en)?)
        } else {
            None
        };
        let source_file_idx = read_u4(bytes, ix, en)?;
        let annotations_off = read_u4(bytes, ix, en)? as usize;
        let annotations = if annotations_off > 0 {
            let mut j = annotations_off;
            Some(AnnotationsDirectoryItem::read(bytes, &mut j, en)?)
        } else {
            None
        };
        let class_data_off = read_u4(bytes, ix, en)? as usize;
        let class_data = if class_data_off > 0 {
            let mut j = class_data_off;
            Some(ClassDataItem::read(bytes, &mut j, en).map_err(|e| {
                DexError::with_context(e, format!("reading class_data at 0x{:x}", class_data_off))
            })?)
        } else {
            None
        };
        let static_values_off = read_u4(bytes, ix, en)? as usize;
        let static_values = if static_values_off > 0 {
            let mut j = static_values_off;
            Some(read_encoded_array(bytes, &mut j)?)
        } else {
            None
        };

        Ok(ClassDefItem {
            class_idx,
            access_flags,
            superclass_idx,
            interfaces,
            source_file_idx,
            annotations,
            class_data,
            static_values,
        })
    }

    /// Write a class_def_item record with resolved offsets for the linked
    /// substructures. Does not serialise those substructures themselves.
    pub fn write_with_offsets(
        &self,
        bytes: &mut Vec<u8>,
        interfaces_off: u32,
        annotations_off: u32,
        class_data_off: u32,
        static_values_off: u32,
    ) -> usize {
        let mut c = 0;
        c += write_u4(bytes, self.class_idx);
        c += write_u4(bytes, self.access_flags);
        c += write_u4(bytes, self.superclass_idx);
        c += write_u4(bytes, interfaces_off);
        c += write_u4(bytes, self.source_file_idx);
        c += write_u4(bytes, annotations_off);
        c += write_u4(bytes, class_data_off);
        c += write_u4(bytes, static_values_off);
        c
    }
}

/// One (type, count, offset) row of the map trailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapItem {
    pub type_code: u16,
    pub size: u32,
    pub offset: u32,
}

/// A map section this implementation does not understand, preserved
/// byte-exactly so minor format extensions round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSection {
    pub type_code: u16,
    pub count: u32,
    pub bytes: Vec<u8>,
}

const KNOWN_SECTION_TYPES: [u16; 20] = [
    TYPE_HEADER_ITEM,
    TYPE_STRING_ID_ITEM,
    TYPE_TYPE_ID_ITEM,
    TYPE_PROTO_ID_ITEM,
    TYPE_FIELD_ID_ITEM,
    TYPE_METHOD_ID_ITEM,
    TYPE_CLASS_DEF_ITEM,
    TYPE_CALL_SITE_ID_ITEM,
    TYPE_METHOD_HANDLE_ITEM,
    TYPE_MAP_LIST,
    TYPE_TYPE_LIST,
    TYPE_ANNOTATION_SET_REF_LIST,
    TYPE_ANNOTATION_SET_ITEM,
    TYPE_CLASS_DATA_ITEM,
    TYPE_CODE_ITEM,
    TYPE_STRING_DATA_ITEM,
    TYPE_DEBUG_INFO_ITEM,
    TYPE_ANNOTATION_ITEM,
    TYPE_ENCODED_ARRAY_ITEM,
    TYPE_ANNOTATIONS_DIRECTORY_ITEM,
];

/// A fully materialised container.
///
/// The container owns every interned table and data item outright; items
/// reference each other only by table index or (transiently, on disk) by
/// offset, which keeps the in-memory graph acyclic.
#[derive(Debug)]
pub struct DexFile {
    pub version: u32,
    pub endian: Endian,
    pub strings: Vec<DexString>,
    pub types: Vec<StringId>,
    pub protos: Vec<ProtoItem>,
    pub fields: Vec<FieldItem>,
    pub methods: Vec<MethodItem>,
    pub class_defs: Vec<ClassDefItem>,
    pub call_sites: Vec<CallSiteItem>,
    pub method_handles: Vec<MethodHandleItem>,
    pub link_data: Vec<u8>,
    pub unknown_sections: Vec<UnknownSection>,
}

impl DexFile {
    /// An empty container of the given format version, ready for the
    /// mutation API.
    pub fn new(version: u32) -> Result<DexFile, DexError> {
        if !(35..=41).contains(&version) {
            fail!("Unsupported container version {:03}", version);
        }
        Ok(DexFile {
            version,
            endian: Endian::Little,
            strings: vec![],
            types: vec![],
            protos: vec![],
            fields: vec![],
            methods: vec![],
            class_defs: vec![],
            call_sites: vec![],
            method_handles: vec![],
            link_data: vec![],
            unknown_sections: vec![],
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<DexFile, DexError> {
        let mut ix = 0;
        DexFile::read(bytes, &mut ix)
    }

    pub fn from_file(path: &Path) -> Result<DexFile, DexError> {
        let bytes = fs::read(path).map_err(|e| DexError::new(&format!("io error: {}", e)))?;
        DexFile::from_bytes(&bytes)
    }

    /// Serialise through the pooling writer.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DexError> {
        crate::writer::write_dex_file(self)
    }

    pub fn write_to_file(&self, path: &Path) -> Result<(), DexError> {
        let bytes = self.to_bytes()?;
        fs::write(path, bytes).map_err(|e| DexError::new(&format!("io error: {}", e)))
    }

    /// Conservative mapping from container version to Android API level,
    /// used to resolve the opcode table.
    pub fn api_level(&self) -> i32 {
        match self.version {
            35 => 19,
            36 => 20,
            37 => 21,
            38 => 24,
            39 => 26,
            40 => 28,
            41 => 29,
            _ => 33,
        }
    }

    fn read(bytes: &[u8], ix: &mut usize) -> Result<DexFile, DexError> {
        let en = Header::detect_endian(bytes)?;
        let header = Header::read(bytes, ix, en)?;
        let version = header.version()?;

        let mut dex = DexFile {
            version,
            endian: en,
            strings: vec![],
            types: vec![],
            protos: vec![],
            fields: vec![],
            methods: vec![],
            class_defs: vec![],
            call_sites: vec![],
            method_handles: vec![],
            link_data: vec![],
            unknown_sections: vec![],
        };

        // Strings
        *ix = header.string_ids_off as usize;
        for _ in 0..header.string_ids_size {
            let mut string_off = read_u4(bytes, ix, en)? as usize;
            dex.strings.push(DexString::read(bytes, &mut string_off)?);
        }

        // Type ids
        *ix = header.type_ids_off as usize;
        for _ in 0..header.type_ids_size {
            let string_idx = read_u4(bytes, ix, en)?;
            if string_idx as usize >= dex.strings.len() {
                fail!(
                    "type descriptor string index {} out of range ({} strings)",
                    string_idx,
                    dex.strings.len()
                );
            }
            dex.types.push(string_idx);
        }

        // Prototypes
        *ix = header.proto_ids_off as usize;
        for _ in 0..header.proto_ids_size {
            let shorty_idx = read_u4(bytes, ix, en)?;
            let return_type_idx = read_u4(bytes, ix, en)?;
            let parameters_off = read_u4(bytes, ix, en)? as usize;
            let parameters = if parameters_off == 0 {
                TypeList::default()
            } else {
                let mut j = parameters_off;
                TypeList::read(bytes, &mut j, en)?
            };
            dex.protos.push(ProtoItem { shorty_idx, return_type_idx, parameters });
        }

        // Field ids
        *ix = header.field_ids_off as usize;
        for _ in 0..header.field_ids_size {
            let field = FieldItem::read(bytes, ix, en)?;
            if field.class_idx as usize >= dex.types.len()
                || field.type_idx as usize >= dex.types.len()
                || field.name_idx as usize >= dex.strings.len()
            {
                fail!("field id references a missing table entry: {:?}", field);
            }
            dex.fields.push(field);
        }

        // Method ids
        *ix = header.method_ids_off as usize;
        for _ in 0..header.method_ids_size {
            let method = MethodItem::read(bytes, ix, en)?;
            if method.class_idx as usize >= dex.types.len()
                || method.proto_idx as usize >= dex.protos.len()
                || method.name_idx as usize >= dex.strings.len()
            {
                fail!("method id references a missing table entry: {:?}", method);
            }
            dex.methods.push(method);
        }

        // Class definitions, with their linked substructures pulled in by
        // stored offset
        *ix = header.class_defs_off as usize;
        for i in 0..header.class_defs_size {
            let class = ClassDefItem::read(bytes, ix, en).map_err(|e| {
                DexError::with_context(e, format!("reading class_def {}", i))
            })?;
            dex.class_defs.push(class);
        }

        // Map trailer: call sites, method handles and structural validation
        dex.read_map(bytes, &header, en)?;

        if header.link_size > 0 {
            let mut j = header.link_off as usize;
            dex.link_data = read_x(bytes, &mut j, header.link_size as usize)?;
        }

        Ok(dex)
    }

    fn read_map(&mut self, bytes: &[u8], header: &Header, en: Endian) -> Result<(), DexError> {
        if header.map_off == 0 {
            fail!("map list offset is zero");
        }
        let mut ix = header.map_off as usize;
        let count = read_u4(bytes, &mut ix, en)? as usize;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            let type_code = read_u2(bytes, &mut ix, en)?;
            let _unused = read_u2(bytes, &mut ix, en)?;
            let size = read_u4(bytes, &mut ix, en)?;
            let offset = read_u4(bytes, &mut ix, en)?;
            items.push(MapItem { type_code, size, offset });
        }

        // Section counts in the map must agree with the header
        for (type_code, expected) in [
            (TYPE_STRING_ID_ITEM, header.string_ids_size),
            (TYPE_TYPE_ID_ITEM, header.type_ids_size),
            (TYPE_PROTO_ID_ITEM, header.proto_ids_size),
            (TYPE_FIELD_ID_ITEM, header.field_ids_size),
            (TYPE_METHOD_ID_ITEM, header.method_ids_size),
            (TYPE_CLASS_DEF_ITEM, header.class_defs_size),
        ] {
            let mapped = items
                .iter()
                .find(|m| m.type_code == type_code)
                .map(|m| m.size)
                .unwrap_or(0);
            if mapped != expected {
                fail!(
                    "map declares {} items of type 0x{:04x} but the header declares {}",
                    mapped,
                    type_code,
                    expected
                );
            }
        }

        for item in &items {
            match item.type_code {
                TYPE_CALL_SITE_ID_ITEM => {
                    let mut j = item.offset as usize;
                    for _ in 0..item.size {
                        let mut array_off = read_u4(bytes, &mut j, en)? as usize;
                        self.call_sites.push(CallSiteItem::read(bytes, &mut array_off)?);
                    }
                }
                TYPE_METHOD_HANDLE_ITEM => {
                    let mut j = item.offset as usize;
                    for _ in 0..item.size {
                        self.method_handles.push(MethodHandleItem::read(bytes, &mut j, en)?);
                    }
                }
                _ => {}
            }
        }

        // Anything we do not understand is captured opaquely, bounded by the
        // next section's offset (the map is sorted by offset).
        let mut offsets: Vec<u32> = items.iter().map(|m| m.offset).collect();
        offsets.sort_unstable();
        for item in &items {
            if KNOWN_SECTION_TYPES.contains(&item.type_code) {
                continue;
            }
            let end = offsets
                .iter()
                .find(|&&o| o > item.offset)
                .copied()
                .unwrap_or(header.file_size)
                .min(bytes.len() as u32);
            if item.offset > end {
                fail!(
                    "map section 0x{:04x} has offset 0x{:x} past its bound 0x{:x}",
                    item.type_code,
                    item.offset,
                    end
                );
            }
            warn!(
                "[map] preserving unknown section type 0x{:04x} ({} items, {} bytes) opaquely",
                item.type_code,
                item.size,
                end - item.offset
            );
            self.unknown_sections.push(UnknownSection {
                type_code: item.type_code,
                count: item.size,
                bytes: bytes[item.offset as usize..end as usize].to_vec(),
            });
        }

        Ok(())
    }

    pub fn get_string(&self, id: StringId) -> Result<String, DexError> {
        self.strings
            .get(id as usize)
            .ok_or_else(|| DexError::new(&format!("string index {} out of range", id)))?
            .to_string()
    }

    /// Type descriptor string for a type table index.
    pub fn type_descriptor(&self, id: TypeId) -> Result<String, DexError> {
        let string_idx = *self
            .types
            .get(id as usize)
            .ok_or_else(|| DexError::new(&format!("type index {} out of range", id)))?;
        self.get_string(string_idx)
    }

    pub fn string_index(&self, value: &str) -> Option<StringId> {
        self.strings
            .iter()
            .position(|s| matches!(s, DexString::Decoded(d) if d == value))
            .map(|i| i as StringId)
    }

    pub fn type_index(&self, descriptor: &str) -> Option<TypeId> {
        self.types
            .iter()
            .position(|sid| {
                matches!(self.strings.get(*sid as usize), Some(DexString::Decoded(d)) if d == descriptor)
            })
            .map(|i| i as TypeId)
    }

    /* Mutation API. Duplicate insertion is a construction bug in the caller
     * and is reported, never silently merged. */

    pub fn add_string(&mut self, value: &str) -> Result<StringId, DexError> {
        if self.string_index(value).is_some() {
            fail!("duplicate string insertion: {:?}", value);
        }
        self.strings.push(DexString::from_string(value));
        Ok((self.strings.len() - 1) as StringId)
    }

    pub fn add_type(&mut self, descriptor_string_idx: StringId) -> Result<TypeId, DexError> {
        if descriptor_string_idx as usize >= self.strings.len() {
            fail!("type descriptor string index {} out of range", descriptor_string_idx);
        }
        if self.types.contains(&descriptor_string_idx) {
            fail!("duplicate type insertion for string {}", descriptor_string_idx);
        }
        self.types.push(descriptor_string_idx);
        Ok((self.types.len() - 1) as TypeId)
    }

    pub fn add_proto(&mut self, proto: ProtoItem) -> Result<ProtoId, DexError> {
        if self.protos.contains(&proto) {
            fail!("duplicate prototype insertion");
        }
        self.protos.push(proto);
        Ok((self.protos.len() - 1) as ProtoId)
    }

    pub fn add_field(&mut self, field: FieldItem) -> Result<FieldId, DexError> {
        if self.fields.contains(&field) {
            fail!("duplicate field insertion: {:?}", field);
        }
        self.fields.push(field);
        Ok((self.fields.len() - 1) as FieldId)
    }

    pub fn add_method(&mut self, method: MethodItem) -> Result<MethodId, DexError> {
        if self.methods.contains(&method) {
            fail!("duplicate method insertion: {:?}", method);
        }
        self.methods.push(method);
        Ok((self.methods.len() - 1) as MethodId)
    }

    pub fn add_method_handle(&mut self, handle: MethodHandleItem) -> Result<u32, DexError> {
        self.method_handles.push(handle);
        Ok((self.method_handles.len() - 1) as u32)
    }

    pub fn add_call_site(&mut self, call_site: CallSiteItem) -> Result<u32, DexError> {
        call_site.validate()?;
        self.call_sites.push(call_site);
        Ok((self.call_sites.len() - 1) as u32)
    }

    pub fn add_class(&mut self, class: ClassDefItem) -> Result<(), DexError> {
        if self.class_defs.iter().any(|c| c.class_idx == class.class_idx) {
            fail!("duplicate class definition for type {}", class.class_idx);
        }
        self.class_defs.push(class);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = Header {
            magic: Header::magic_for_version(39),
            checksum: 0x11223344,
            signature: [7; 20],
            file_size: 0x1000,
            header_size: HEADER_SIZE,
            endian_tag: ENDIAN_CONSTANT,
            link_size: 0,
            link_off: 0,
            map_off: 0x900,
            string_ids_size: 4,
            string_ids_off: 0x70,
            type_ids_size: 2,
            type_ids_off: 0x80,
            proto_ids_size: 1,
            proto_ids_off: 0x88,
            field_ids_size: 0,
            field_ids_off: 0,
            method_ids_size: 1,
            method_ids_off: 0x94,
            class_defs_size: 1,
            class_defs_off: 0x9c,
            data_size: 0x200,
            data_off: 0xbc,
        };

        let mut bytes = vec![];
        let written = header.write(&mut bytes);
        assert_eq!(written, HEADER_SIZE as usize);

        let en = Header::detect_endian(&bytes).expect("endian detect failed");
        assert_eq!(en, Endian::Little);
        let mut ix = 0;
        let decoded = Header::read(&bytes, &mut ix, en).expect("header read failed");
        assert_eq!(header, decoded);
        assert_eq!(decoded.version().unwrap(), 39);
    }

    #[test]
    fn test_reverse_endian_header() {
        let header = Header {
            magic: Header::magic_for_version(35),
            checksum: 0,
            signature: [0; 20],
            file_size: 0x70,
            header_size: HEADER_SIZE,
            endian_tag: ENDIAN_CONSTANT,
            link_size: 0,
            link_off: 0,
            map_off: 0,
            string_ids_size: 0,
            string_ids_off: 0,
            type_ids_size: 0,
            type_ids_off: 0,
            proto_ids_size: 0,
            proto_ids_off: 0,
            field_ids_size: 0,
            field_ids_off: 0,
            method_ids_size: 0,
            method_ids_off: 0,
            class_defs_size: 0,
            class_defs_off: 0,
            data_size: 0,
            data_off: 0,
        };
        let mut little = vec![];
        header.write(&mut little);

        // Byte-swap every u32 field after the signature into big-endian form
        let mut big = little.clone();
        let mut pos = 32;
        while pos + 4 <= big.len() {
            big[pos..pos + 4].reverse();
            pos += 4;
        }
        // checksum field too
        big[8..12].reverse();

        let en = Header::detect_endian(&big).expect("endian detect failed");
        assert_eq!(en, Endian::Big);
        let mut ix = 0;
        let decoded = Header::read(&big, &mut ix, en).expect("big-endian read failed");
        assert_eq!(decoded.endian_tag, ENDIAN_CONSTANT);
        assert_eq!(decoded.header_size, HEADER_SIZE);
    }

    #[test]
    fn test_unknown_endian_tag_rejected() {
        let mut bytes = vec![0u8; HEADER_SIZE as usize];
        bytes[..4].copy_from_slice(&DEX_MAGIC_PREFIX);
        bytes[40..44].copy_from_slice(&0xdeadbeefu32.to_le_bytes());
        assert!(Header::detect_endian(&bytes).is_err());
    }

    #[test]
    fn test_string_roundtrip_plain() {
        let s = DexString::from_string("Ljava/lang/Object;");
        let mut bytes = vec![];
        s.write(&mut bytes);
        let mut ix = 0;
        let decoded = DexString::read(&bytes, &mut ix).expect("read failed");
        assert_eq!(ix, bytes.len());
        assert_eq!(s, decoded);
    }

    #[test]
    fn test_string_roundtrip_embedded_nul() {
        let s = DexString::from_string("a\0b");
        let mut bytes = vec![];
        s.write(&mut bytes);
        // The NUL must be escaped, never a raw zero terminator mid-stream
        assert_eq!(bytes[0], 3); // utf-16 length
        assert!(bytes[1..bytes.len() - 1].iter().all(|&b| b != 0));
        let mut ix = 0;
        let decoded = DexString::read(&bytes, &mut ix).expect("read failed");
        assert_eq!(decoded.to_string().unwrap(), "a\0b");
    }

    #[test]
    fn test_string_roundtrip_surrogate_pair() {
        let s = DexString::from_string("x\u{1F600}y"); // needs a surrogate pair
        let mut bytes = vec![];
        s.write(&mut bytes);
        assert_eq!(bytes[0], 4); // 1 + 2 + 1 utf-16 units
        let mut ix = 0;
        let decoded = DexString::read(&bytes, &mut ix).expect("read failed");
        assert_eq!(decoded.to_string().unwrap(), "x\u{1F600}y");
    }

    #[test]
    fn test_debug_info_roundtrip() {
        let info = DebugInfo {
            line_start: 10,
            parameter_names: vec![Some(4), None, Some(0)],
            events: vec![
                DebugEvent::SetPrologueEnd,
                DebugEvent::AdvancePc(3),
                DebugEvent::AdvanceLine(-2),
                DebugEvent::StartLocal { register: 1, name_idx: Some(2), type_idx: None },
                DebugEvent::Special(0x0a),
                DebugEvent::EndLocal(1),
            ],
        };
        let mut bytes = vec![];
        info.write(&mut bytes);
        let mut ix = 0;
        let decoded = DebugInfo::read(&bytes, &mut ix).expect("read failed");
        assert_eq!(ix, bytes.len());
        assert_eq!(info, decoded);
    }

    #[test]
    fn test_code_item_shared_handler_single_record() {
        // Two try ranges pointing at one catch-all handler
        let mut code = CodeItem::of(2, 1, 1, vec![0x0000, 0x0000, 0x0000, 0x000e]);
        let handle = code.add_handler(EncodedCatchHandler {
            handlers: vec![],
            catch_all_addr: Some(3),
        });
        code.tries.push(TryItem { start_addr: 0, insn_count: 1, handler: handle });
        code.tries.push(TryItem { start_addr: 2, insn_count: 1, handler: handle });

        let mut bytes = vec![];
        code.write(&mut bytes, 0).expect("write failed");

        let mut ix = 0;
        let decoded = CodeItem::read(&bytes, &mut ix, Endian::Little).expect("read failed");
        assert_eq!(decoded.handlers.len(), 1);
        assert_eq!(decoded.tries.len(), 2);
        assert_eq!(decoded.tries[0].handler, decoded.tries[1].handler);
        assert_eq!(decoded, code);
    }

    #[test]
    fn test_code_item_duplicate_handlers_collapse() {
        let mut code = CodeItem::of(1, 0, 0, vec![0x000e]);
        let h = EncodedCatchHandler {
            handlers: vec![EncodedTypeAddrPair { type_idx: 2, addr: 0 }],
            catch_all_addr: None,
        };
        let h1 = code.add_handler(h.clone());
        let h2 = code.add_handler(h.clone());
        code.tries.push(TryItem { start_addr: 0, insn_count: 1, handler: h1 });
        code.tries.push(TryItem { start_addr: 0, insn_count: 1, handler: h2 });

        let mut bytes = vec![];
        code.write(&mut bytes, 0).expect("write failed");
        let mut ix = 0;
        let decoded = CodeItem::read(&bytes, &mut ix, Endian::Little).expect("read failed");
        // structurally equal handlers collapse to one on-disk record
        assert_eq!(decoded.handlers.len(), 1);
        assert_eq!(decoded.tries[0].handler, decoded.tries[1].handler);
    }

    #[test]
    fn test_code_item_odd_insns_padding() {
        let mut code = CodeItem::of(1, 0, 0, vec![0x000e]);
        let handle = code.add_handler(EncodedCatchHandler {
            handlers: vec![],
            catch_all_addr: Some(0),
        });
        code.tries.push(TryItem { start_addr: 0, insn_count: 1, handler: handle });

        let mut bytes = vec![];
        code.write(&mut bytes, 0).expect("write failed");
        // header (16) + insns (2) + pad (2): tries start 4-byte aligned
        assert_eq!(bytes[18], 0);
        assert_eq!(bytes[19], 0);
        let mut ix = 0;
        let decoded = CodeItem::read(&bytes, &mut ix, Endian::Little).expect("read failed");
        assert_eq!(decoded, code);
    }

    #[test]
    fn test_class_data_delta_roundtrip() {
        let data = ClassDataItem {
            static_fields: vec![
                EncodedField { field_idx: 3, access_flags: ACC_PUBLIC | ACC_STATIC },
                EncodedField { field_idx: 9, access_flags: ACC_STATIC },
            ],
            instance_fields: vec![EncodedField { field_idx: 4, access_flags: ACC_PRIVATE }],
            direct_methods: vec![EncodedMethod { method_idx: 7, access_flags: ACC_PUBLIC, code: None }],
            virtual_methods: vec![
                EncodedMethod { method_idx: 2, access_flags: ACC_PUBLIC, code: None },
                EncodedMethod { method_idx: 11, access_flags: ACC_PUBLIC, code: None },
            ],
        };
        let mut bytes = vec![];
        data.write(&mut bytes, &[0], &[0, 0]).expect("write failed");
        let mut ix = 0;
        let decoded = ClassDataItem::read(&bytes, &mut ix, Endian::Little).expect("read failed");
        assert_eq!(ix, bytes.len());
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_class_data_unsorted_members_rejected() {
        let data = ClassDataItem {
            static_fields: vec![
                EncodedField { field_idx: 9, access_flags: 0 },
                EncodedField { field_idx: 3, access_flags: 0 },
            ],
            ..Default::default()
        };
        let mut bytes = vec![];
        assert!(data.write(&mut bytes, &[], &[]).is_err());

        let duplicate = ClassDataItem {
            static_fields: vec![
                EncodedField { field_idx: 3, access_flags: 0 },
                EncodedField { field_idx: 3, access_flags: 0 },
            ],
            ..Default::default()
        };
        let mut bytes = vec![];
        assert!(duplicate.write(&mut bytes, &[], &[]).is_err());
    }

    #[test]
    fn test_method_handle_semantics() {
        assert!(MethodHandleType::StaticPut.targets_field());
        assert!(MethodHandleType::StaticPut.targets_static());
        assert!(!MethodHandleType::InvokeInstance.targets_field());
        assert!(!MethodHandleType::InvokeInstance.targets_static());
        assert!(MethodHandleType::from_u16(0x09).is_err());

        let handle = MethodHandleItem::of(MethodHandleType::InvokeStatic, 12);
        let mut bytes = vec![];
        assert_eq!(handle.write(&mut bytes), 8);
        let mut ix = 0;
        let decoded = MethodHandleItem::read(&bytes, &mut ix, Endian::Little).expect("read failed");
        assert_eq!(handle, decoded);
    }

    #[test]
    fn test_call_site_shape_validation() {
        let good = CallSiteItem::of(1, 2, 3, vec![EncodedValue::Int(42)]);
        assert!(good.validate().is_ok());

        let bad = CallSiteItem { values: vec![EncodedValue::Int(1)] };
        assert!(bad.validate().is_err());

        let wrong_order = CallSiteItem {
            values: vec![
                EncodedValue::String(1),
                EncodedValue::MethodHandle(0),
                EncodedValue::MethodType(2),
            ],
        };
        assert!(wrong_order.validate().is_err());
    }

    #[test]
    fn test_duplicate_interning_rejected() {
        let mut dex = DexFile::new(39).unwrap();
        let sid = dex.add_string("LFoo;").unwrap();
        assert!(dex.add_string("LFoo;").is_err());
        let tid = dex.add_type(sid).unwrap();
        assert!(dex.add_type(sid).is_err());

        let shorty = dex.add_string("V").unwrap();
        let void_desc = dex.add_string("V-desc").unwrap();
        let void_tid = dex.add_type(void_desc).unwrap();
        let proto = ProtoItem::of(shorty, void_tid, vec![]);
        dex.add_proto(proto.clone()).unwrap();
        assert!(dex.add_proto(proto).is_err());

        let name = dex.add_string("field").unwrap();
        let field = FieldItem::of(tid, void_tid, name);
        dex.add_field(field.clone()).unwrap();
        assert!(dex.add_field(field).is_err());
    }
}
