//! The pooling and offset-resolution engine, and container emission.
//!
//! Serialisation is a two-pass walk over the item graph. The collect pass
//! serialises every reachable data item into a [`DataChunk`] and
//! deduplicates structurally equal records (keyed on their bytes plus their
//! outgoing references, so equality propagates bottom-up through the graph).
//! The emit pass orders chunks into the fixed section order, aligns each
//! one, assigns offsets, patches fixed-width offset references, and writes
//! the file with its map trailer and header digests.
//!
//! Ordering matters twice over: record kinds are written in the
//! format-mandated order, and code items land before the class data that
//! refers to them through variable-width offsets. Those offsets are planned
//! before the referring bytes are built, so a uleb128 offset never changes
//! width after the fact.

use std::collections::HashMap;

use adler::adler32_slice;
use log::debug;
use sha1::{Digest, Sha1};

use crate::annotations::{AnnotationSetItem, AnnotationSetRefList, AnnotationsDirectoryItem};
use crate::dex_file::{
    ClassDefItem, CodeItem, DexFile, EncodedField, EncodedMethod, Header, MapItem,
    ENDIAN_CONSTANT, HEADER_SIZE, TYPE_ANNOTATIONS_DIRECTORY_ITEM, TYPE_ANNOTATION_ITEM,
    TYPE_ANNOTATION_SET_ITEM, TYPE_ANNOTATION_SET_REF_LIST, TYPE_CALL_SITE_ID_ITEM,
    TYPE_CLASS_DATA_ITEM, TYPE_CLASS_DEF_ITEM, TYPE_CODE_ITEM, TYPE_DEBUG_INFO_ITEM,
    TYPE_ENCODED_ARRAY_ITEM, TYPE_FIELD_ID_ITEM, TYPE_HEADER_ITEM, TYPE_MAP_LIST,
    TYPE_METHOD_HANDLE_ITEM, TYPE_METHOD_ID_ITEM, TYPE_PROTO_ID_ITEM, TYPE_STRING_DATA_ITEM,
    TYPE_STRING_ID_ITEM, TYPE_TYPE_ID_ITEM, TYPE_TYPE_LIST,
};
use crate::encoded_values::{write_encoded_array, EncodedValue};
use crate::error::DexError;
use crate::{align_to, write_u2, write_u4};

/// Build the on-disk image of a container.
pub fn write_dex_file(dex: &DexFile) -> Result<Vec<u8>, DexError> {
    Emitter::new(dex)?.emit()
}

#[derive(Debug, Clone, Copy)]
struct SectionInfo {
    count: u32,
    offset: u32,
}

/// Offsets of the fixed-width index sections, laid out back to back after
/// the header. Empty sections get offset 0, never a placeholder.
struct SectionOffsets {
    string_ids: SectionInfo,
    type_ids: SectionInfo,
    proto_ids: SectionInfo,
    field_ids: SectionInfo,
    method_ids: SectionInfo,
    class_defs: SectionInfo,
    call_site_ids: SectionInfo,
    method_handles: SectionInfo,
    data_off: u32,
}

impl SectionOffsets {
    const STRING_ID_ITEM_SIZE: u32 = 4;
    const TYPE_ID_ITEM_SIZE: u32 = 4;
    const PROTO_ID_ITEM_SIZE: u32 = 12;
    const FIELD_ID_ITEM_SIZE: u32 = 8;
    const METHOD_ID_ITEM_SIZE: u32 = 8;
    const CLASS_DEF_ITEM_SIZE: u32 = 32;
    const CALL_SITE_ID_ITEM_SIZE: u32 = 4;
    const METHOD_HANDLE_ITEM_SIZE: u32 = 8;

    fn new(dex: &DexFile) -> SectionOffsets {
        let mut cursor = HEADER_SIZE;

        let (string_ids, next) = Self::section(
            cursor,
            dex.strings.len() as u32,
            Self::STRING_ID_ITEM_SIZE,
        );
        cursor = next;
        let (type_ids, next) =
            Self::section(cursor, dex.types.len() as u32, Self::TYPE_ID_ITEM_SIZE);
        cursor = next;
        let (proto_ids, next) =
            Self::section(cursor, dex.protos.len() as u32, Self::PROTO_ID_ITEM_SIZE);
        cursor = next;
        let (field_ids, next) =
            Self::section(cursor, dex.fields.len() as u32, Self::FIELD_ID_ITEM_SIZE);
        cursor = next;
        let (method_ids, next) =
            Self::section(cursor, dex.methods.len() as u32, Self::METHOD_ID_ITEM_SIZE);
        cursor = next;
        let (class_defs, next) = Self::section(
            cursor,
            dex.class_defs.len() as u32,
            Self::CLASS_DEF_ITEM_SIZE,
        );
        cursor = next;
        let (call_site_ids, next) = Self::section(
            cursor,
            dex.call_sites.len() as u32,
            Self::CALL_SITE_ID_ITEM_SIZE,
        );
        cursor = next;
        let (method_handles, cursor) = Self::section(
            cursor,
            dex.method_handles.len() as u32,
            Self::METHOD_HANDLE_ITEM_SIZE,
        );

        SectionOffsets {
            string_ids,
            type_ids,
            proto_ids,
            field_ids,
            method_ids,
            class_defs,
            call_site_ids,
            method_handles,
            data_off: align_to(cursor, 4),
        }
    }

    fn section(base: u32, count: u32, item_size: u32) -> (SectionInfo, u32) {
        if count == 0 {
            (SectionInfo { count: 0, offset: 0 }, base)
        } else {
            (SectionInfo { count, offset: base }, base + count * item_size)
        }
    }
}

/// Kind of a pooled data record; doubles as its section priority and its map
/// type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ChunkKind {
    StringData,
    TypeList,
    EncodedArray,
    AnnotationItem,
    AnnotationSetRefList,
    AnnotationSet,
    AnnotationsDirectory,
    DebugInfo,
    CodeItem,
    ClassData,
    Unknown(u16),
}

impl ChunkKind {
    fn priority(self) -> u32 {
        match self {
            ChunkKind::StringData => 0,
            ChunkKind::TypeList => 1,
            ChunkKind::EncodedArray => 2,
            ChunkKind::AnnotationItem => 3,
            ChunkKind::AnnotationSetRefList => 4,
            ChunkKind::AnnotationSet => 5,
            ChunkKind::AnnotationsDirectory => 6,
            ChunkKind::DebugInfo => 7,
            ChunkKind::CodeItem => 8,
            ChunkKind::ClassData => 9,
            ChunkKind::Unknown(_) => 10,
        }
    }

    fn alignment(self) -> u32 {
        match self {
            ChunkKind::StringData
            | ChunkKind::EncodedArray
            | ChunkKind::DebugInfo
            | ChunkKind::ClassData => 1,
            ChunkKind::AnnotationItem => 1,
            ChunkKind::TypeList
            | ChunkKind::AnnotationSetRefList
            | ChunkKind::AnnotationSet
            | ChunkKind::AnnotationsDirectory
            | ChunkKind::CodeItem
            | ChunkKind::Unknown(_) => 4,
        }
    }

    fn map_type_code(self) -> u16 {
        match self {
            ChunkKind::StringData => TYPE_STRING_DATA_ITEM,
            ChunkKind::TypeList => TYPE_TYPE_LIST,
            ChunkKind::EncodedArray => TYPE_ENCODED_ARRAY_ITEM,
            ChunkKind::AnnotationItem => TYPE_ANNOTATION_ITEM,
            ChunkKind::AnnotationSetRefList => TYPE_ANNOTATION_SET_REF_LIST,
            ChunkKind::AnnotationSet => TYPE_ANNOTATION_SET_ITEM,
            ChunkKind::AnnotationsDirectory => TYPE_ANNOTATIONS_DIRECTORY_ITEM,
            ChunkKind::DebugInfo => TYPE_DEBUG_INFO_ITEM,
            ChunkKind::CodeItem => TYPE_CODE_ITEM,
            ChunkKind::ClassData => TYPE_CLASS_DATA_ITEM,
            ChunkKind::Unknown(code) => code,
        }
    }
}

/// A fixed-width (u4) offset reference from inside one chunk to the start of
/// another, patched once layout is final.
#[derive(Debug, Clone)]
struct ChunkFixup {
    position: usize,
    target_chunk: usize,
}

#[derive(Debug, Clone)]
struct DataChunk {
    kind: ChunkKind,
    align: u32,
    offset: u32,
    bytes: Vec<u8>,
    fixups: Vec<ChunkFixup>,
}

/// Insertion-order-preserving pool of serialised data items with structural
/// deduplication. Two records collide when their bytes and their outgoing
/// references agree, so equal subtrees collapse bottom-up.
struct DataSectionBuilder {
    chunks: Vec<DataChunk>,
    dedup: HashMap<(ChunkKind, Vec<u8>, Vec<usize>), usize>,
    size: u32,
}

impl DataSectionBuilder {
    fn new() -> Self {
        DataSectionBuilder { chunks: Vec::new(), dedup: HashMap::new(), size: 0 }
    }

    fn push(&mut self, kind: ChunkKind, bytes: Vec<u8>, fixups: Vec<ChunkFixup>) -> usize {
        let targets: Vec<usize> = fixups.iter().map(|f| f.target_chunk).collect();
        let key = (kind, bytes.clone(), targets);
        if let Some(&idx) = self.dedup.get(&key) {
            return idx;
        }
        let idx = self.chunks.len();
        self.chunks.push(DataChunk { kind, align: kind.alignment(), offset: 0, bytes, fixups });
        self.dedup.insert(key, idx);
        idx
    }

    /// Offsets each chunk would get under the final section order, without
    /// committing to it. Used to resolve variable-width offset references
    /// before the chunks holding them are built.
    fn planned_offsets(&self) -> Vec<u32> {
        let mut indexed: Vec<(usize, &DataChunk)> = self.chunks.iter().enumerate().collect();
        indexed.sort_by_key(|(idx, chunk)| (chunk.kind.priority(), *idx));
        let mut offsets = vec![0u32; self.chunks.len()];
        let mut cursor = 0u32;
        for (original_idx, chunk) in indexed {
            cursor = align_to(cursor, chunk.align);
            offsets[original_idx] = cursor;
            cursor += chunk.bytes.len() as u32;
        }
        offsets
    }

    /// Reorder into the fixed section order and assign final offsets.
    /// Returns the old-index → new-index mapping.
    fn finish(&mut self) -> Vec<usize> {
        let mut indexed: Vec<(usize, DataChunk)> = self.chunks.drain(..).enumerate().collect();
        indexed.sort_by_key(|(idx, chunk)| (chunk.kind.priority(), *idx));
        let mut remap = vec![0usize; indexed.len()];
        self.chunks.reserve(indexed.len());
        for (new_idx, (old_idx, chunk)) in indexed.into_iter().enumerate() {
            remap[old_idx] = new_idx;
            self.chunks.push(chunk);
        }
        for chunk in &mut self.chunks {
            for fixup in &mut chunk.fixups {
                fixup.target_chunk = remap[fixup.target_chunk];
            }
        }

        let mut cursor = 0u32;
        for chunk in &mut self.chunks {
            cursor = align_to(cursor, chunk.align);
            chunk.offset = cursor;
            cursor += chunk.bytes.len() as u32;
        }
        self.size = cursor;
        remap
    }

    fn apply_fixups(&mut self, base: u32) {
        let offsets: Vec<u32> = self.chunks.iter().map(|c| c.offset).collect();
        for chunk in &mut self.chunks {
            for fixup in &chunk.fixups {
                let absolute = base + offsets[fixup.target_chunk];
                overwrite_u32(&mut chunk.bytes, fixup.position, absolute);
            }
            chunk.fixups.clear();
        }
    }

    /// Concatenate all chunks, zero-filling alignment gaps.
    fn emit_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size as usize);
        for chunk in &self.chunks {
            ensure_len(&mut buf, chunk.offset as usize);
            buf.extend_from_slice(&chunk.bytes);
        }
        buf
    }

    fn stats_by_kind(&self, kind: ChunkKind, base: u32) -> (u32, Option<u32>) {
        let mut count = 0;
        let mut offset: Option<u32> = None;
        for chunk in &self.chunks {
            if chunk.kind == kind {
                count += 1;
                let absolute = base + chunk.offset;
                offset = Some(offset.map_or(absolute, |o: u32| o.min(absolute)));
            }
        }
        (count, offset)
    }
}

struct Emitter<'a> {
    dex: &'a DexFile,
    classes: Vec<ClassDefItem>,
    sections: SectionOffsets,
    builder: DataSectionBuilder,
    string_chunks: Vec<usize>,
    proto_param_chunks: Vec<Option<usize>>,
    interface_chunks: Vec<Option<usize>>,
    static_value_chunks: Vec<Option<usize>>,
    annotation_dir_chunks: Vec<Option<usize>>,
    class_data_chunks: Vec<Option<usize>>,
    code_chunks: Vec<(Vec<Option<usize>>, Vec<Option<usize>>)>,
    call_site_chunks: Vec<usize>,
    unknown_chunks: Vec<usize>,
}

impl<'a> Emitter<'a> {
    fn new(dex: &'a DexFile) -> Result<Emitter<'a>, DexError> {
        let classes = dex
            .class_defs
            .iter()
            .map(|c| normalize_class(dex, c))
            .collect::<Result<Vec<_>, _>>()?;
        let sections = SectionOffsets::new(dex);
        let class_count = classes.len();

        Ok(Emitter {
            dex,
            classes,
            sections,
            builder: DataSectionBuilder::new(),
            string_chunks: vec![],
            proto_param_chunks: vec![],
            interface_chunks: vec![None; class_count],
            static_value_chunks: vec![None; class_count],
            annotation_dir_chunks: vec![None; class_count],
            class_data_chunks: vec![None; class_count],
            code_chunks: vec![],
            call_site_chunks: vec![],
            unknown_chunks: vec![],
        })
    }

    fn emit(mut self) -> Result<Vec<u8>, DexError> {
        self.collect()?;

        // Plan code item offsets before class data exists: class data sorts
        // after code in the section order, so these cannot move again.
        let planned = self.builder.planned_offsets();
        let data_base = self.sections.data_off;
        self.add_class_data_chunks(&planned, data_base)?;

        let remap = self.builder.finish();
        self.apply_remap(&remap);
        self.builder.apply_fixups(data_base);

        debug!(
            "[writer] {} data chunks, {} bytes of data",
            self.builder.chunks.len(),
            self.builder.size
        );

        let mut data_bytes = self.builder.emit_bytes();
        let aligned_len = align_to(data_bytes.len() as u32, 4) as usize;
        data_bytes.resize(aligned_len, 0);

        let map_off = data_base + data_bytes.len() as u32;
        let map_items = self.build_map_items(data_base, map_off);
        let map_bytes = write_map_list(&map_items);
        data_bytes.extend_from_slice(&map_bytes);
        let total_data_size = data_bytes.len() as u32;

        let mut file = vec![0u8; HEADER_SIZE as usize];
        self.write_string_ids(&mut file, data_base);
        self.write_type_ids(&mut file);
        self.write_proto_ids(&mut file, data_base);
        self.write_field_ids(&mut file);
        self.write_method_ids(&mut file);
        self.write_class_defs(&mut file, data_base);
        self.write_call_site_ids(&mut file, data_base);
        self.write_method_handles(&mut file);

        ensure_len(&mut file, data_base as usize);
        file.extend_from_slice(&data_bytes);

        let link_off = if self.dex.link_data.is_empty() { 0 } else { file.len() as u32 };
        file.extend_from_slice(&self.dex.link_data);

        let mut header = Header {
            magic: Header::magic_for_version(self.dex.version),
            checksum: 0,
            signature: [0; 20],
            file_size: file.len() as u32,
            header_size: HEADER_SIZE,
            endian_tag: ENDIAN_CONSTANT,
            link_size: self.dex.link_data.len() as u32,
            link_off,
            map_off,
            string_ids_size: self.sections.string_ids.count,
            string_ids_off: self.sections.string_ids.offset,
            type_ids_size: self.sections.type_ids.count,
            type_ids_off: self.sections.type_ids.offset,
            proto_ids_size: self.sections.proto_ids.count,
            proto_ids_off: self.sections.proto_ids.offset,
            field_ids_size: self.sections.field_ids.count,
            field_ids_off: self.sections.field_ids.offset,
            method_ids_size: self.sections.method_ids.count,
            method_ids_off: self.sections.method_ids.offset,
            class_defs_size: self.sections.class_defs.count,
            class_defs_off: self.sections.class_defs.offset,
            data_size: total_data_size,
            data_off: data_base,
        };

        overwrite_header(&mut file, &header);
        let signature = compute_sha1(&file[32..]);
        header.signature.copy_from_slice(&signature);
        overwrite_header(&mut file, &header);
        header.checksum = adler32_slice(&file[12..]);
        overwrite_header(&mut file, &header);

        Ok(file)
    }

    /* Collect pass: serialise every reachable data item into chunks,
     * depth-first so that referenced records exist before referencing ones. */

    fn collect(&mut self) -> Result<(), DexError> {
        for string in &self.dex.strings {
            let mut bytes = Vec::new();
            string.write(&mut bytes);
            let idx = self.builder.push(ChunkKind::StringData, bytes, vec![]);
            self.string_chunks.push(idx);
        }

        for proto in &self.dex.protos {
            if proto.parameters.items().is_empty() {
                self.proto_param_chunks.push(None);
                continue;
            }
            let mut bytes = Vec::new();
            proto.parameters.write(&mut bytes);
            let idx = self.builder.push(ChunkKind::TypeList, bytes, vec![]);
            self.proto_param_chunks.push(Some(idx));
        }

        for ci in 0..self.classes.len() {
            if let Some(interfaces) = &self.classes[ci].interfaces {
                if !interfaces.items().is_empty() {
                    let mut bytes = Vec::new();
                    interfaces.write(&mut bytes);
                    self.interface_chunks[ci] =
                        Some(self.builder.push(ChunkKind::TypeList, bytes, vec![]));
                }
            }

            if let Some(values) = &self.classes[ci].static_values {
                let mut bytes = Vec::new();
                write_encoded_array(values, &mut bytes);
                self.static_value_chunks[ci] =
                    Some(self.builder.push(ChunkKind::EncodedArray, bytes, vec![]));
            }

            if let Some(dir) = self.classes[ci].annotations.clone() {
                if !dir.is_empty() {
                    self.annotation_dir_chunks[ci] = Some(self.add_annotations_directory(&dir));
                }
            }

            let (direct, virt) = match self.classes[ci].class_data.clone() {
                Some(data) => (
                    self.add_method_codes(&data.direct_methods)?,
                    self.add_method_codes(&data.virtual_methods)?,
                ),
                None => (vec![], vec![]),
            };
            self.code_chunks.push((direct, virt));
        }

        for call_site in &self.dex.call_sites {
            call_site.validate()?;
            let mut bytes = Vec::new();
            call_site.write(&mut bytes);
            let idx = self.builder.push(ChunkKind::EncodedArray, bytes, vec![]);
            self.call_site_chunks.push(idx);
        }

        for section in &self.dex.unknown_sections {
            let idx = self.builder.push(
                ChunkKind::Unknown(section.type_code),
                section.bytes.clone(),
                vec![],
            );
            self.unknown_chunks.push(idx);
        }

        Ok(())
    }

    fn add_method_codes(
        &mut self,
        methods: &[EncodedMethod],
    ) -> Result<Vec<Option<usize>>, DexError> {
        let mut chunks = Vec::with_capacity(methods.len());
        for method in methods {
            match &method.code {
                Some(code) => chunks.push(Some(self.add_code_item(code)?)),
                None => chunks.push(None),
            }
        }
        Ok(chunks)
    }

    fn add_code_item(&mut self, code: &CodeItem) -> Result<usize, DexError> {
        let mut fixups = vec![];
        if let Some(debug_info) = &code.debug_info {
            let mut bytes = Vec::new();
            debug_info.write(&mut bytes);
            let target = self.builder.push(ChunkKind::DebugInfo, bytes, vec![]);
            // debug_info_off sits at byte 8 of the code_item record
            fixups.push(ChunkFixup { position: 8, target_chunk: target });
        }
        let mut bytes = Vec::new();
        code.write(&mut bytes, 0)?;
        Ok(self.builder.push(ChunkKind::CodeItem, bytes, fixups))
    }

    fn add_annotation_set(&mut self, set: &AnnotationSetItem) -> usize {
        let item_chunks: Vec<usize> = set
            .entries
            .iter()
            .map(|item| {
                let mut bytes = Vec::new();
                item.write(&mut bytes);
                self.builder.push(ChunkKind::AnnotationItem, bytes, vec![])
            })
            .collect();

        let mut bytes = Vec::new();
        set.write_with_offsets(&mut bytes, &vec![0; item_chunks.len()]);
        let fixups = item_chunks
            .iter()
            .enumerate()
            .map(|(i, target)| ChunkFixup { position: 4 + i * 4, target_chunk: *target })
            .collect();
        self.builder.push(ChunkKind::AnnotationSet, bytes, fixups)
    }

    fn add_set_ref_list(&mut self, list: &AnnotationSetRefList) -> usize {
        let set_chunks: Vec<Option<usize>> = list
            .sets
            .iter()
            .map(|set| set.as_ref().map(|s| self.add_annotation_set(s)))
            .collect();

        let mut bytes = Vec::new();
        list.write_with_offsets(&mut bytes, &vec![0; set_chunks.len()]);
        let mut fixups = vec![];
        for (i, target) in set_chunks.iter().enumerate() {
            if let Some(target) = target {
                fixups.push(ChunkFixup { position: 4 + i * 4, target_chunk: *target });
            }
        }
        self.builder.push(ChunkKind::AnnotationSetRefList, bytes, fixups)
    }

    fn add_annotations_directory(&mut self, dir: &AnnotationsDirectoryItem) -> usize {
        let class_set = dir.class_annotations.as_ref().map(|s| self.add_annotation_set(s));
        let field_sets: Vec<usize> = dir
            .field_annotations
            .iter()
            .map(|fa| self.add_annotation_set(&fa.annotations))
            .collect();
        let method_sets: Vec<usize> = dir
            .method_annotations
            .iter()
            .map(|ma| self.add_annotation_set(&ma.annotations))
            .collect();
        let param_lists: Vec<usize> = dir
            .parameter_annotations
            .iter()
            .map(|pa| self.add_set_ref_list(&pa.annotations))
            .collect();

        let mut bytes = Vec::new();
        dir.write_with_offsets(
            &mut bytes,
            0,
            &vec![0; field_sets.len()],
            &vec![0; method_sets.len()],
            &vec![0; param_lists.len()],
        );

        let mut fixups = vec![];
        if let Some(target) = class_set {
            fixups.push(ChunkFixup { position: 0, target_chunk: target });
        }
        let field_base = 16;
        for (i, target) in field_sets.iter().enumerate() {
            fixups.push(ChunkFixup { position: field_base + i * 8 + 4, target_chunk: *target });
        }
        let method_base = field_base + field_sets.len() * 8;
        for (i, target) in method_sets.iter().enumerate() {
            fixups.push(ChunkFixup { position: method_base + i * 8 + 4, target_chunk: *target });
        }
        let param_base = method_base + method_sets.len() * 8;
        for (i, target) in param_lists.iter().enumerate() {
            fixups.push(ChunkFixup { position: param_base + i * 8 + 4, target_chunk: *target });
        }
        self.builder.push(ChunkKind::AnnotationsDirectory, bytes, fixups)
    }

    /// Class data is the one record kind holding variable-width offsets, so
    /// its bytes are built only after code item offsets are planned.
    fn add_class_data_chunks(
        &mut self,
        planned: &[u32],
        data_base: u32,
    ) -> Result<(), DexError> {
        for ci in 0..self.classes.len() {
            let Some(data) = &self.classes[ci].class_data else {
                continue;
            };
            if data.is_empty() {
                continue;
            }
            let resolve = |chunks: &[Option<usize>]| -> Vec<u32> {
                chunks
                    .iter()
                    .map(|c| c.map_or(0, |idx| data_base + planned[idx]))
                    .collect()
            };
            let direct_offs = resolve(&self.code_chunks[ci].0);
            let virtual_offs = resolve(&self.code_chunks[ci].1);

            let mut bytes = Vec::new();
            data.write(&mut bytes, &direct_offs, &virtual_offs)?;
            self.class_data_chunks[ci] =
                Some(self.builder.push(ChunkKind::ClassData, bytes, vec![]));
        }
        Ok(())
    }

    fn apply_remap(&mut self, remap: &[usize]) {
        let fix = |idx: &mut usize| *idx = remap[*idx];
        self.string_chunks.iter_mut().for_each(fix);
        self.call_site_chunks.iter_mut().for_each(fix);
        self.unknown_chunks.iter_mut().for_each(fix);
        for slot in self
            .proto_param_chunks
            .iter_mut()
            .chain(self.interface_chunks.iter_mut())
            .chain(self.static_value_chunks.iter_mut())
            .chain(self.annotation_dir_chunks.iter_mut())
            .chain(self.class_data_chunks.iter_mut())
        {
            if let Some(idx) = slot {
                *idx = remap[*idx];
            }
        }
        for (direct, virt) in &mut self.code_chunks {
            for slot in direct.iter_mut().chain(virt.iter_mut()) {
                if let Some(idx) = slot {
                    *idx = remap[*idx];
                }
            }
        }
    }

    fn chunk_offset(&self, idx: usize, data_base: u32) -> u32 {
        data_base + self.builder.chunks[idx].offset
    }

    fn opt_chunk_offset(&self, idx: Option<usize>, data_base: u32) -> u32 {
        idx.map_or(0, |i| self.chunk_offset(i, data_base))
    }

    /* Index section emission */

    fn write_string_ids(&self, buf: &mut Vec<u8>, data_base: u32) {
        if self.sections.string_ids.count == 0 {
            return;
        }
        ensure_len(buf, self.sections.string_ids.offset as usize);
        for idx in &self.string_chunks {
            write_u4(buf, self.chunk_offset(*idx, data_base));
        }
    }

    fn write_type_ids(&self, buf: &mut Vec<u8>) {
        if self.sections.type_ids.count == 0 {
            return;
        }
        ensure_len(buf, self.sections.type_ids.offset as usize);
        for string_idx in &self.dex.types {
            write_u4(buf, *string_idx);
        }
    }

    fn write_proto_ids(&self, buf: &mut Vec<u8>, data_base: u32) {
        if self.sections.proto_ids.count == 0 {
            return;
        }
        ensure_len(buf, self.sections.proto_ids.offset as usize);
        for (proto, chunk) in self.dex.protos.iter().zip(&self.proto_param_chunks) {
            proto.write(buf, self.opt_chunk_offset(*chunk, data_base));
        }
    }

    fn write_field_ids(&self, buf: &mut Vec<u8>) {
        if self.sections.field_ids.count == 0 {
            return;
        }
        ensure_len(buf, self.sections.field_ids.offset as usize);
        for field in &self.dex.fields {
            field.write(buf);
        }
    }

    fn write_method_ids(&self, buf: &mut Vec<u8>) {
        if self.sections.method_ids.count == 0 {
            return;
        }
        ensure_len(buf, self.sections.method_ids.offset as usize);
        for method in &self.dex.methods {
            method.write(buf);
        }
    }

    fn write_class_defs(&self, buf: &mut Vec<u8>, data_base: u32) {
        if self.sections.class_defs.count == 0 {
            return;
        }
        ensure_len(buf, self.sections.class_defs.offset as usize);
        for (ci, class) in self.classes.iter().enumerate() {
            class.write_with_offsets(
                buf,
                self.opt_chunk_offset(self.interface_chunks[ci], data_base),
                self.opt_chunk_offset(self.annotation_dir_chunks[ci], data_base),
                self.opt_chunk_offset(self.class_data_chunks[ci], data_base),
                self.opt_chunk_offset(self.static_value_chunks[ci], data_base),
            );
        }
    }

    fn write_call_site_ids(&self, buf: &mut Vec<u8>, data_base: u32) {
        if self.sections.call_site_ids.count == 0 {
            return;
        }
        ensure_len(buf, self.sections.call_site_ids.offset as usize);
        for idx in &self.call_site_chunks {
            write_u4(buf, self.chunk_offset(*idx, data_base));
        }
    }

    fn write_method_handles(&self, buf: &mut Vec<u8>) {
        if self.sections.method_handles.count == 0 {
            return;
        }
        ensure_len(buf, self.sections.method_handles.offset as usize);
        for handle in &self.dex.method_handles {
            handle.write(buf);
        }
    }

    /* Map trailer */

    fn build_map_items(&self, data_base: u32, map_off: u32) -> Vec<MapItem> {
        let mut items = vec![MapItem { type_code: TYPE_HEADER_ITEM, size: 1, offset: 0 }];
        let mut rest = Vec::new();

        for (type_code, info) in [
            (TYPE_STRING_ID_ITEM, self.sections.string_ids),
            (TYPE_TYPE_ID_ITEM, self.sections.type_ids),
            (TYPE_PROTO_ID_ITEM, self.sections.proto_ids),
            (TYPE_FIELD_ID_ITEM, self.sections.field_ids),
            (TYPE_METHOD_ID_ITEM, self.sections.method_ids),
            (TYPE_CLASS_DEF_ITEM, self.sections.class_defs),
            (TYPE_CALL_SITE_ID_ITEM, self.sections.call_site_ids),
            (TYPE_METHOD_HANDLE_ITEM, self.sections.method_handles),
        ] {
            if info.count > 0 {
                rest.push(MapItem { type_code, size: info.count, offset: info.offset });
            }
        }

        for kind in [
            ChunkKind::StringData,
            ChunkKind::TypeList,
            ChunkKind::EncodedArray,
            ChunkKind::AnnotationItem,
            ChunkKind::AnnotationSetRefList,
            ChunkKind::AnnotationSet,
            ChunkKind::AnnotationsDirectory,
            ChunkKind::DebugInfo,
            ChunkKind::CodeItem,
            ChunkKind::ClassData,
        ] {
            let (count, offset) = self.builder.stats_by_kind(kind, data_base);
            if count > 0 {
                rest.push(MapItem {
                    type_code: kind.map_type_code(),
                    size: count,
                    offset: offset.unwrap(),
                });
            }
        }

        for (section, chunk) in self.dex.unknown_sections.iter().zip(&self.unknown_chunks) {
            rest.push(MapItem {
                type_code: section.type_code,
                size: section.count,
                offset: self.chunk_offset(*chunk, data_base),
            });
        }

        rest.push(MapItem { type_code: TYPE_MAP_LIST, size: 1, offset: map_off });
        rest.sort_by_key(|item| item.offset);
        items.extend(rest);
        items
    }
}

fn write_map_list(entries: &[MapItem]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(4 + entries.len() * 12);
    write_u4(&mut bytes, entries.len() as u32);
    for item in entries {
        write_u2(&mut bytes, item.type_code);
        write_u2(&mut bytes, 0);
        write_u4(&mut bytes, item.size);
        write_u4(&mut bytes, item.offset);
    }
    bytes
}

/* Class normalisation: member sorting and static-value reconstruction */

/// Clone a class definition into serialisable shape: member lists sorted by
/// ascending reference index, and the static-value array rebuilt so each
/// value sits at its field's new position, gaps padded with the field
/// type's default and the trailing default run trimmed.
fn normalize_class(dex: &DexFile, class: &ClassDefItem) -> Result<ClassDefItem, DexError> {
    let mut class = class.clone();

    if let Some(mut data) = class.class_data.take() {
        let old_values = class.static_values.take().unwrap_or_default();
        if old_values.len() > data.static_fields.len() {
            fail!(
                "static value array has {} entries for {} static fields",
                old_values.len(),
                data.static_fields.len()
            );
        }

        // Pair each field with its associated value before sorting so the
        // association survives the reorder.
        let mut pairs: Vec<(EncodedField, Option<EncodedValue>)> = data
            .static_fields
            .drain(..)
            .enumerate()
            .map(|(i, f)| {
                let value = old_values.get(i).cloned();
                (f, value)
            })
            .collect();
        pairs.sort_by_key(|(f, _)| f.field_idx);
        for pair in pairs.windows(2) {
            if pair[0].0.field_idx == pair[1].0.field_idx {
                fail!("duplicate static field member index {}", pair[0].0.field_idx);
            }
        }

        let mut values = Vec::with_capacity(pairs.len());
        for (field, value) in &pairs {
            match value {
                Some(v) => values.push(v.clone()),
                None => {
                    let desc = field_type_descriptor(dex, field.field_idx)?;
                    values.push(default_value_for(&desc));
                }
            }
        }
        while !values.is_empty() {
            let last = values.len() - 1;
            let desc = field_type_descriptor(dex, pairs[last].0.field_idx)?;
            if is_default_value(&values[last], &desc) {
                values.pop();
            } else {
                break;
            }
        }

        data.static_fields = pairs.into_iter().map(|(f, _)| f).collect();
        class.static_values = if values.is_empty() { None } else { Some(values) };

        sort_fields(&mut data.instance_fields)?;
        sort_methods(&mut data.direct_methods)?;
        sort_methods(&mut data.virtual_methods)?;
        class.class_data = Some(data);
    }

    if let Some(dir) = &mut class.annotations {
        dir.field_annotations.sort_by_key(|fa| fa.field_idx);
        dir.method_annotations.sort_by_key(|ma| ma.method_idx);
        dir.parameter_annotations.sort_by_key(|pa| pa.method_idx);
    }

    Ok(class)
}

fn sort_fields(fields: &mut [EncodedField]) -> Result<(), DexError> {
    fields.sort_by_key(|f| f.field_idx);
    for pair in fields.windows(2) {
        if pair[0].field_idx == pair[1].field_idx {
            fail!("duplicate field member index {}", pair[0].field_idx);
        }
    }
    Ok(())
}

fn sort_methods(methods: &mut [EncodedMethod]) -> Result<(), DexError> {
    methods.sort_by(|a, b| a.method_idx.cmp(&b.method_idx));
    for pair in methods.windows(2) {
        if pair[0].method_idx == pair[1].method_idx {
            fail!("duplicate method member index {}", pair[0].method_idx);
        }
    }
    Ok(())
}

fn field_type_descriptor(dex: &DexFile, field_idx: u32) -> Result<String, DexError> {
    let field = dex
        .fields
        .get(field_idx as usize)
        .ok_or_else(|| DexError::new(&format!("field index {} out of range", field_idx)))?;
    dex.type_descriptor(field.type_idx)
}

fn default_value_for(descriptor: &str) -> EncodedValue {
    match descriptor.as_bytes().first() {
        Some(b'Z') => EncodedValue::Boolean(false),
        Some(b'B') => EncodedValue::Byte(0),
        Some(b'S') => EncodedValue::Short(0),
        Some(b'C') => EncodedValue::Char(0),
        Some(b'I') => EncodedValue::Int(0),
        Some(b'J') => EncodedValue::Long(0),
        Some(b'F') => EncodedValue::Float(0.0),
        Some(b'D') => EncodedValue::Double(0.0),
        _ => EncodedValue::Null,
    }
}

fn is_default_value(value: &EncodedValue, descriptor: &str) -> bool {
    // Floats compare bitwise so -0.0 survives as an explicit value
    match (value, default_value_for(descriptor)) {
        (EncodedValue::Float(v), EncodedValue::Float(d)) => v.to_bits() == d.to_bits(),
        (EncodedValue::Double(v), EncodedValue::Double(d)) => v.to_bits() == d.to_bits(),
        (v, d) => *v == d,
    }
}

/* Small byte-buffer helpers */

fn ensure_len(buf: &mut Vec<u8>, len: usize) {
    if buf.len() < len {
        buf.resize(len, 0);
    }
}

fn overwrite_u32(bytes: &mut [u8], position: usize, value: u32) {
    bytes[position..position + 4].copy_from_slice(&value.to_le_bytes());
}

fn overwrite_header(buf: &mut [u8], header: &Header) {
    let mut header_bytes = Vec::with_capacity(HEADER_SIZE as usize);
    header.write(&mut header_bytes);
    buf[..HEADER_SIZE as usize].copy_from_slice(&header_bytes);
}

fn compute_sha1(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex_file::FieldItem;

    #[test]
    fn test_chunk_dedup_by_content() {
        let mut builder = DataSectionBuilder::new();
        let a = builder.push(ChunkKind::TypeList, vec![1, 0, 0, 0, 5, 0], vec![]);
        let b = builder.push(ChunkKind::TypeList, vec![1, 0, 0, 0, 5, 0], vec![]);
        let c = builder.push(ChunkKind::TypeList, vec![1, 0, 0, 0, 6, 0], vec![]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(builder.chunks.len(), 2);
    }

    #[test]
    fn test_dedup_respects_references() {
        // Same bytes but different fixup targets must stay distinct records
        let mut builder = DataSectionBuilder::new();
        let t1 = builder.push(ChunkKind::AnnotationItem, vec![1, 2, 0], vec![]);
        let t2 = builder.push(ChunkKind::AnnotationItem, vec![1, 3, 0], vec![]);
        let s1 = builder.push(
            ChunkKind::AnnotationSet,
            vec![1, 0, 0, 0, 0, 0, 0, 0],
            vec![ChunkFixup { position: 4, target_chunk: t1 }],
        );
        let s2 = builder.push(
            ChunkKind::AnnotationSet,
            vec![1, 0, 0, 0, 0, 0, 0, 0],
            vec![ChunkFixup { position: 4, target_chunk: t2 }],
        );
        assert_ne!(s1, s2);
    }

    #[test]
    fn test_finish_orders_by_priority_and_aligns() {
        let mut builder = DataSectionBuilder::new();
        // Inserted out of section order on purpose
        let code = builder.push(ChunkKind::CodeItem, vec![0; 10], vec![]);
        let string = builder.push(ChunkKind::StringData, vec![0; 3], vec![]);
        let list = builder.push(ChunkKind::TypeList, vec![0; 6], vec![]);

        let remap = builder.finish();
        assert_eq!(remap[string], 0);
        assert_eq!(remap[list], 1);
        assert_eq!(remap[code], 2);

        // string data unaligned, type list and code aligned to 4
        assert_eq!(builder.chunks[0].offset, 0);
        assert_eq!(builder.chunks[1].offset, 4);
        assert_eq!(builder.chunks[2].offset % 4, 0);
    }

    #[test]
    fn test_planned_offsets_survive_class_data_addition() {
        let mut builder = DataSectionBuilder::new();
        let code = builder.push(ChunkKind::CodeItem, vec![0; 8], vec![]);
        let planned = builder.planned_offsets();
        builder.push(ChunkKind::ClassData, vec![0; 5], vec![]);
        let remap = builder.finish();
        assert_eq!(builder.chunks[remap[code]].offset, planned[code]);
    }

    #[test]
    fn test_apply_fixups_patches_absolute_offsets() {
        let mut builder = DataSectionBuilder::new();
        let target = builder.push(ChunkKind::StringData, vec![9, 9], vec![]);
        let referrer = builder.push(
            ChunkKind::AnnotationSet,
            vec![0; 8],
            vec![ChunkFixup { position: 4, target_chunk: target }],
        );
        let remap = builder.finish();
        builder.apply_fixups(0x1000);
        let chunk = &builder.chunks[remap[referrer]];
        let patched = u32::from_le_bytes(chunk.bytes[4..8].try_into().unwrap());
        assert_eq!(patched, 0x1000 + builder.chunks[remap[target]].offset);
    }

    #[test]
    fn test_static_value_reconstruction_after_sort() {
        let mut dex = DexFile::new(39).unwrap();
        let s_class = dex.add_string("LFoo;").unwrap();
        let s_int = dex.add_string("I").unwrap();
        let s_a = dex.add_string("a").unwrap();
        let s_b = dex.add_string("b").unwrap();
        let t_class = dex.add_type(s_class).unwrap();
        let t_int = dex.add_type(s_int).unwrap();
        let f_a = dex.add_field(FieldItem::of(t_class, t_int, s_a)).unwrap();
        let f_b = dex.add_field(FieldItem::of(t_class, t_int, s_b)).unwrap();
        assert!(f_a < f_b);

        // Fields deliberately listed out of order; the value 7 is associated
        // with field b which must end up in position 1 after the sort, with
        // a default filling position 0.
        let mut class = ClassDefItem::of(t_class, 0, crate::dex_file::NO_INDEX);
        class.class_data = Some(crate::dex_file::ClassDataItem {
            static_fields: vec![
                EncodedField { field_idx: f_b, access_flags: 0 },
                EncodedField { field_idx: f_a, access_flags: 0 },
            ],
            ..Default::default()
        });
        class.static_values = Some(vec![EncodedValue::Int(7)]);

        let normalized = normalize_class(&dex, &class).unwrap();
        let data = normalized.class_data.as_ref().unwrap();
        assert_eq!(data.static_fields[0].field_idx, f_a);
        assert_eq!(data.static_fields[1].field_idx, f_b);
        assert_eq!(
            normalized.static_values,
            Some(vec![EncodedValue::Int(0), EncodedValue::Int(7)])
        );
    }

    #[test]
    fn test_trailing_default_values_trimmed() {
        let mut dex = DexFile::new(39).unwrap();
        let s_class = dex.add_string("LFoo;").unwrap();
        let s_int = dex.add_string("I").unwrap();
        let s_a = dex.add_string("a").unwrap();
        let t_class = dex.add_type(s_class).unwrap();
        let t_int = dex.add_type(s_int).unwrap();
        let f_a = dex.add_field(FieldItem::of(t_class, t_int, s_a)).unwrap();

        let mut class = ClassDefItem::of(t_class, 0, crate::dex_file::NO_INDEX);
        class.class_data = Some(crate::dex_file::ClassDataItem {
            static_fields: vec![EncodedField { field_idx: f_a, access_flags: 0 }],
            ..Default::default()
        });
        class.static_values = Some(vec![EncodedValue::Int(0)]);

        let normalized = normalize_class(&dex, &class).unwrap();
        assert_eq!(normalized.static_values, None);
    }
}
