//! Annotation structures: annotation_item, annotation_set_item,
//! annotation_set_ref_list and annotations_directory_item.
//!
//! On disk these reference each other by file offset; in memory each level
//! owns its children outright. The offsets are re-derived by the pooling
//! writer, which collapses structurally equal sets and items to a single
//! record.

use serde::{Deserialize, Serialize};

use crate::error::DexError;
use crate::{read_u1, read_u4, write_u1, write_u4, Endian};

/// Retention of an annotation: build-time only, runtime visible, or
/// system-internal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnnotationVisibility {
    Build,
    Runtime,
    System,
}

impl AnnotationVisibility {
    pub fn from_u8(value: u8) -> Result<AnnotationVisibility, DexError> {
        match value {
            0x00 => Ok(AnnotationVisibility::Build),
            0x01 => Ok(AnnotationVisibility::Runtime),
            0x02 => Ok(AnnotationVisibility::System),
            other => Err(DexError::new(&format!(
                "Unknown annotation visibility 0x{:02x}",
                other
            ))),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            AnnotationVisibility::Build => 0x00,
            AnnotationVisibility::Runtime => 0x01,
            AnnotationVisibility::System => 0x02,
        }
    }
}

/// annotation_item: a visibility byte followed by an encoded annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationItem {
    pub visibility: AnnotationVisibility,
    pub annotation: crate::encoded_values::EncodedAnnotation,
}

impl AnnotationItem {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<AnnotationItem, DexError> {
        let visibility = AnnotationVisibility::from_u8(read_u1(bytes, ix)?)?;
        let annotation = crate::encoded_values::EncodedAnnotation::read(bytes, ix)?;
        Ok(AnnotationItem {
            visibility,
            annotation,
        })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let mut c = 0;
        c += write_u1(bytes, self.visibility.as_u8());
        c += self.annotation.write(bytes);
        c
    }
}

/// annotation_set_item. On disk a count plus absolute offsets to
/// annotation_items; in memory the items themselves, in on-disk order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnnotationSetItem {
    pub entries: Vec<AnnotationItem>,
}

impl AnnotationSetItem {
    pub fn read(bytes: &[u8], ix: &mut usize, en: Endian) -> Result<AnnotationSetItem, DexError> {
        let size = read_u4(bytes, ix, en)? as usize;
        let mut entries = Vec::with_capacity(size);
        for _ in 0..size {
            let entry_off = read_u4(bytes, ix, en)? as usize;
            if entry_off == 0 {
                continue;
            }
            let mut j = entry_off;
            entries.push(AnnotationItem::read(bytes, &mut j)?);
        }
        Ok(AnnotationSetItem { entries })
    }

    /// Write the set record with already-resolved item offsets (one per entry).
    pub fn write_with_offsets(&self, bytes: &mut Vec<u8>, item_offsets: &[u32]) -> usize {
        let mut c = 0;
        c += write_u4(bytes, item_offsets.len() as u32);
        for off in item_offsets {
            c += write_u4(bytes, *off);
        }
        c
    }
}

/// annotation_set_ref_list: per-parameter annotation sets, absent entries
/// encoded as a zero offset.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnnotationSetRefList {
    pub sets: Vec<Option<AnnotationSetItem>>,
}

impl AnnotationSetRefList {
    pub fn read(bytes: &[u8], ix: &mut usize, en: Endian) -> Result<AnnotationSetRefList, DexError> {
        let size = read_u4(bytes, ix, en)? as usize;
        let mut sets = Vec::with_capacity(size);
        for _ in 0..size {
            let set_off = read_u4(bytes, ix, en)? as usize;
            if set_off == 0 {
                sets.push(None);
            } else {
                let mut j = set_off;
                sets.push(Some(AnnotationSetItem::read(bytes, &mut j, en)?));
            }
        }
        Ok(AnnotationSetRefList { sets })
    }

    pub fn write_with_offsets(&self, bytes: &mut Vec<u8>, set_offsets: &[u32]) -> usize {
        let mut c = 0;
        c += write_u4(bytes, set_offsets.len() as u32);
        for off in set_offsets {
            c += write_u4(bytes, *off);
        }
        c
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldAnnotation {
    pub field_idx: u32,
    pub annotations: AnnotationSetItem,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodAnnotation {
    pub method_idx: u32,
    pub annotations: AnnotationSetItem,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterAnnotation {
    pub method_idx: u32,
    pub annotations: AnnotationSetRefList,
}

/// annotations_directory_item: the per-class registry of class, field,
/// method and parameter annotations.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnnotationsDirectoryItem {
    pub class_annotations: Option<AnnotationSetItem>,
    pub field_annotations: Vec<FieldAnnotation>,
    pub method_annotations: Vec<MethodAnnotation>,
    pub parameter_annotations: Vec<ParameterAnnotation>,
}

impl AnnotationsDirectoryItem {
    pub fn is_empty(&self) -> bool {
        self.class_annotations.is_none()
            && self.field_annotations.is_empty()
            && self.method_annotations.is_empty()
            && self.parameter_annotations.is_empty()
    }

    pub fn read(
        bytes: &[u8],
        ix: &mut usize,
        en: Endian,
    ) -> Result<AnnotationsDirectoryItem, DexError> {
        let class_annotations_off = read_u4(bytes, ix, en)? as usize;
        let fields_size = read_u4(bytes, ix, en)? as usize;
        let methods_size = read_u4(bytes, ix, en)? as usize;
        let parameters_size = read_u4(bytes, ix, en)? as usize;

        let class_annotations = if class_annotations_off > 0 {
            let mut j = class_annotations_off;
            Some(AnnotationSetItem::read(bytes, &mut j, en)?)
        } else {
            None
        };

        let mut field_annotations = Vec::with_capacity(fields_size);
        for _ in 0..fields_size {
            let field_idx = read_u4(bytes, ix, en)?;
            let mut j = read_u4(bytes, ix, en)? as usize;
            field_annotations.push(FieldAnnotation {
                field_idx,
                annotations: AnnotationSetItem::read(bytes, &mut j, en)?,
            });
        }

        let mut method_annotations = Vec::with_capacity(methods_size);
        for _ in 0..methods_size {
            let method_idx = read_u4(bytes, ix, en)?;
            let mut j = read_u4(bytes, ix, en)? as usize;
            method_annotations.push(MethodAnnotation {
                method_idx,
                annotations: AnnotationSetItem::read(bytes, &mut j, en)?,
            });
        }

        let mut parameter_annotations = Vec::with_capacity(parameters_size);
        for _ in 0..parameters_size {
            let method_idx = read_u4(bytes, ix, en)?;
            let mut j = read_u4(bytes, ix, en)? as usize;
            parameter_annotations.push(ParameterAnnotation {
                method_idx,
                annotations: AnnotationSetRefList::read(bytes, &mut j, en)?,
            });
        }

        Ok(AnnotationsDirectoryItem {
            class_annotations,
            field_annotations,
            method_annotations,
            parameter_annotations,
        })
    }

    /// Write the directory record with already-resolved set offsets: the
    /// class set first, then one per field, method and parameter entry.
    pub fn write_with_offsets(
        &self,
        bytes: &mut Vec<u8>,
        class_set_off: u32,
        field_set_offs: &[u32],
        method_set_offs: &[u32],
        parameter_list_offs: &[u32],
    ) -> usize {
        let mut c = 0;
        c += write_u4(bytes, class_set_off);
        c += write_u4(bytes, self.field_annotations.len() as u32);
        c += write_u4(bytes, self.method_annotations.len() as u32);
        c += write_u4(bytes, self.parameter_annotations.len() as u32);
        for (fa, off) in self.field_annotations.iter().zip(field_set_offs) {
            c += write_u4(bytes, fa.field_idx);
            c += write_u4(bytes, *off);
        }
        for (ma, off) in self.method_annotations.iter().zip(method_set_offs) {
            c += write_u4(bytes, ma.method_idx);
            c += write_u4(bytes, *off);
        }
        for (pa, off) in self.parameter_annotations.iter().zip(parameter_list_offs) {
            c += write_u4(bytes, pa.method_idx);
            c += write_u4(bytes, *off);
        }
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoded_values::{AnnotationElement, EncodedAnnotation, EncodedValue};

    #[test]
    fn test_annotation_item_roundtrip() {
        let item = AnnotationItem {
            visibility: AnnotationVisibility::Runtime,
            annotation: EncodedAnnotation {
                type_idx: 3,
                elements: vec![AnnotationElement {
                    name_idx: 1,
                    value: EncodedValue::Boolean(true),
                }],
            },
        };

        let mut buf = vec![];
        let n = item.write(&mut buf);
        assert_eq!(n, buf.len());
        let mut ix = 0;
        let item2 = AnnotationItem::read(&buf, &mut ix).expect("read failed");
        assert_eq!(ix, buf.len());
        assert_eq!(item, item2);
    }

    #[test]
    fn test_unknown_visibility_rejected() {
        let buf = vec![0x07, 0x00, 0x00];
        let mut ix = 0;
        assert!(AnnotationItem::read(&buf, &mut ix).is_err());
    }

    #[test]
    fn test_set_read_resolves_offsets() {
        // One item at offset 12, referenced by a set at offset 0
        let mut buf = vec![];
        write_u4(&mut buf, 2); // entry count
        write_u4(&mut buf, 12); // offset of the item below
        write_u4(&mut buf, 0); // absent entry, skipped
        let item = AnnotationItem {
            visibility: AnnotationVisibility::System,
            annotation: EncodedAnnotation { type_idx: 9, elements: vec![] },
        };
        item.write(&mut buf);

        let mut ix = 0;
        let set = AnnotationSetItem::read(&buf, &mut ix, Endian::Little).expect("read failed");
        assert_eq!(set.entries, vec![item]);
    }
}
