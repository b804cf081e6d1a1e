// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Type dictionary of a City stream, as read back by the decoder.
//!
//! Entries are stored in id order. Every reference points to an earlier
//! entry except pointer elements, which may point forward so that
//! self-referential types can be described. The last entry is the root
//! record.

use super::error::FormatError;
use super::packed::{CategoryCode, COUNT_SIZE, DISCRIMINANT_SIZE};
use byteorder::{LittleEndian, ReadBytesExt};
use std::fmt;

/// Top bit of a member key: the low bits are an `id` attribute value
/// rather than a name offset.
pub const MEMBER_ID_FLAG: u32 = 0x8000_0000;

/// How a source member is identified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberKey {
    Name(String),
    Id(u32),
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Id(id) => write!(f, "#{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMember {
    pub ty: u32,
    pub key: MemberKey,
    /// Packed offset inside the owner (after the discriminant for unions).
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Scalar,
    Array { element: u32, count: u32 },
    Pointer { element: u32 },
    Enum { size: u8 },
    Record { members: Vec<EntryMember> },
    Union { members: Vec<EntryMember> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub code: CategoryCode,
    pub kind: EntryKind,
    pub packed_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dictionary {
    entries: Vec<Entry>,
}

struct Reader<'a> {
    input: &'a [u8],
    id_width: usize,
}

impl Reader<'_> {
    fn u8(&mut self) -> Result<u8, FormatError> {
        self.input.read_u8().map_err(|_| FormatError::Truncated("type dictionary"))
    }

    fn u32(&mut self) -> Result<u32, FormatError> {
        self.input
            .read_u32::<LittleEndian>()
            .map_err(|_| FormatError::Truncated("type dictionary"))
    }

    fn type_id(&mut self) -> Result<u32, FormatError> {
        let raw = self
            .input
            .read_uint::<LittleEndian>(self.id_width)
            .map_err(|_| FormatError::Truncated("type dictionary"))?;
        Ok(raw as u32)
    }
}

impl Dictionary {
    /// Parse and validate `count` entries from the type info section.
    ///
    /// Member names are resolved against `data`; packed sizes are computed
    /// with the given pointer width.
    pub fn parse(
        type_info: &[u8],
        data: &[u8],
        count: u32,
        id_width: usize,
        pointer_width: usize,
    ) -> Result<Self, FormatError> {
        if count == 0 {
            return Err(FormatError::RootNotRecord);
        }
        let mut reader = Reader {
            input: type_info,
            id_width,
        };
        // Every entry takes at least one byte.
        let mut entries = Vec::with_capacity((count as usize).min(type_info.len()));
        let mut forward = Vec::new();

        for index in 0..count {
            let raw = reader.u8()?;
            let code =
                CategoryCode::from_u8(raw).ok_or(FormatError::InvalidCategory { index, code: raw })?;
            let backward = |reference: u32| {
                if reference < index {
                    Ok(reference)
                } else {
                    Err(FormatError::TypeIdOutOfRange { index, reference })
                }
            };
            let kind = match code {
                CategoryCode::Array => {
                    let element = backward(reader.type_id()?)?;
                    let count = reader.u32()?;
                    EntryKind::Array { element, count }
                }
                CategoryCode::Pointer => {
                    let element = reader.type_id()?;
                    forward.push((index, element));
                    EntryKind::Pointer { element }
                }
                CategoryCode::Enum => EntryKind::Enum { size: reader.u8()? },
                CategoryCode::Record | CategoryCode::Union => {
                    let n = reader.u32()?;
                    let mut members = Vec::with_capacity((n as usize).min(reader.input.len()));
                    for _ in 0..n {
                        let ty = backward(reader.type_id()?)?;
                        let key = member_key(reader.u32()?, data)?;
                        members.push(EntryMember { ty, key, offset: 0 });
                    }
                    if code == CategoryCode::Record {
                        EntryKind::Record { members }
                    } else {
                        EntryKind::Union { members }
                    }
                }
                _ => EntryKind::Scalar,
            };
            entries.push(Entry {
                code,
                kind,
                packed_size: 0,
            });
        }

        for (index, reference) in forward {
            if reference >= count {
                return Err(FormatError::TypeIdOutOfRange { index, reference });
            }
        }

        if entries.last().map(|e| e.code) != Some(CategoryCode::Record) {
            return Err(FormatError::RootNotRecord);
        }

        let mut dictionary = Self { entries };
        dictionary.layout(pointer_width)?;
        log::trace!(
            "[city::decode] dictionary: {} entries, root packed size {}",
            dictionary.len(),
            dictionary.root().packed_size
        );
        Ok(dictionary)
    }

    /// Packed sizes and member offsets, in id order.
    fn layout(&mut self, pointer_width: usize) -> Result<(), FormatError> {
        for index in 0..self.entries.len() {
            let (head, tail) = self.entries.split_at_mut(index);
            let entry = &mut tail[0];
            let size_of = |id: u32| head[id as usize].packed_size;
            entry.packed_size = match &mut entry.kind {
                EntryKind::Scalar => entry.code.scalar_size().unwrap_or(0),
                EntryKind::Enum { size } => usize::from(*size),
                EntryKind::Pointer { .. } => pointer_width,
                EntryKind::Array { element, count } => size_of(*element)
                    .checked_mul(*count as usize)
                    .ok_or(FormatError::SizeOverflow)?,
                EntryKind::Record { members } => {
                    let mut offset = 0usize;
                    for m in members.iter_mut() {
                        m.offset = offset;
                        offset = offset
                            .checked_add(size_of(m.ty))
                            .ok_or(FormatError::SizeOverflow)?;
                    }
                    offset
                }
                EntryKind::Union { members } => {
                    let mut widest = 0usize;
                    for m in members.iter_mut() {
                        m.offset = DISCRIMINANT_SIZE;
                        widest = widest.max(size_of(m.ty));
                    }
                    widest
                        .checked_add(DISCRIMINANT_SIZE)
                        .ok_or(FormatError::SizeOverflow)?
                }
            };
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&Entry> {
        self.entries.get(id as usize)
    }

    pub fn root_id(&self) -> u32 {
        self.entries.len().saturating_sub(1) as u32
    }

    /// The root record. Parsing guarantees it exists.
    pub fn root(&self) -> &Entry {
        &self.entries[self.entries.len() - 1]
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Entry)> {
        self.entries.iter().enumerate().map(|(i, e)| (i as u32, e))
    }

    /// Packed size of a pointer buffer of `count` elements of `element`.
    pub(crate) fn buffer_size(&self, element: u32, count: u32) -> Option<usize> {
        let size = self.get(element)?.packed_size;
        size.checked_mul(count as usize)?.checked_add(COUNT_SIZE)
    }
}

fn member_key(raw: u32, data: &[u8]) -> Result<MemberKey, FormatError> {
    if raw & MEMBER_ID_FLAG != 0 {
        return Ok(MemberKey::Id(raw & !MEMBER_ID_FLAG));
    }
    let offset = raw as usize;
    let invalid = FormatError::InvalidName {
        offset: u64::from(raw),
    };
    let tail = data.get(offset..).ok_or_else(|| invalid.clone())?;
    let end = tail.iter().position(|b| *b == 0).ok_or_else(|| invalid.clone())?;
    let name = std::str::from_utf8(&tail[..end]).map_err(|_| invalid)?;
    Ok(MemberKey::Name(name.to_owned()))
}

impl fmt::Display for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, entry) in self.iter() {
            write!(f, "{id:>4} {:?} ({} bytes)", entry.code, entry.packed_size)?;
            match &entry.kind {
                EntryKind::Array { element, count } => write!(f, " [{count}] of {element}")?,
                EntryKind::Pointer { element } => write!(f, " to {element}")?,
                EntryKind::Record { members } | EntryKind::Union { members } => {
                    for m in members {
                        write!(f, " {}:{}", m.key, m.ty)?;
                    }
                }
                EntryKind::Scalar | EntryKind::Enum { .. } => {}
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Node { value: u32, next: *Node } with one-byte ids.
    fn node_dictionary() -> (Vec<u8>, Vec<u8>) {
        let data = b"\0value\0next\0".to_vec();
        let mut info = vec![0x11, 2]; // 0: pointer to 2
        info.push(0x03); // 1: u32
        info.extend_from_slice(&[0x13, 2, 0, 0, 0]); // 2: record, 2 members
        info.extend_from_slice(&[1, 1, 0, 0, 0]); // value: u32
        info.extend_from_slice(&[0, 7, 0, 0, 0]); // next: pointer
        (info, data)
    }

    #[test]
    fn test_parse_forward_pointer() {
        let (info, data) = node_dictionary();
        let dict = Dictionary::parse(&info, &data, 3, 1, 4).expect("parse");

        assert_eq!(dict.len(), 3);
        assert_eq!(dict.root_id(), 2);
        assert_eq!(dict.get(0).map(|e| &e.kind), Some(&EntryKind::Pointer { element: 2 }));
        let root = dict.root();
        assert_eq!(root.packed_size, 8);
        let EntryKind::Record { members } = &root.kind else {
            panic!("root is not a record");
        };
        assert_eq!(members[0].key, MemberKey::Name("value".into()));
        assert_eq!(members[1].key, MemberKey::Name("next".into()));
        assert_eq!(members[1].offset, 4);
        assert_eq!(dict.buffer_size(2, 3), Some(28));
        assert!(dict.to_string().contains("value:1"));
    }

    #[test]
    fn test_rejects_bad_references() {
        // Array element must be an earlier entry.
        let info = [0x10, 0, 4, 0, 0, 0, 0x13, 0, 0, 0, 0];
        assert_eq!(
            Dictionary::parse(&info, &[], 2, 1, 4),
            Err(FormatError::TypeIdOutOfRange {
                index: 0,
                reference: 0
            })
        );

        // Pointer to an entry that does not exist.
        let info = [0x11, 9, 0x13, 0, 0, 0, 0];
        assert_eq!(
            Dictionary::parse(&info, &[], 2, 1, 4),
            Err(FormatError::TypeIdOutOfRange {
                index: 0,
                reference: 9
            })
        );
    }

    #[test]
    fn test_rejects_malformed_entries() {
        assert_eq!(
            Dictionary::parse(&[0x01], &[], 1, 1, 4),
            Err(FormatError::RootNotRecord)
        );
        assert_eq!(
            Dictionary::parse(&[0x0C], &[], 1, 1, 4),
            Err(FormatError::InvalidCategory { index: 0, code: 0x0C })
        );
        assert_eq!(
            Dictionary::parse(&[0x13, 1, 0], &[], 1, 1, 4),
            Err(FormatError::Truncated("type dictionary"))
        );
        // Name offset past the data section.
        let info = [0x01, 0x13, 1, 0, 0, 0, 0, 50, 0, 0, 0];
        assert_eq!(
            Dictionary::parse(&info, b"x\0", 2, 1, 4),
            Err(FormatError::InvalidName { offset: 50 })
        );
    }

    #[test]
    fn test_member_ids_and_unions() {
        let info = [
            0x01, // 0: u8
            0x08, // 1: i64
            0x14, 2, 0, 0, 0, 0, 0x05, 0, 0, 0x80, 1, 0x06, 0, 0, 0x80, // 2: union
            0x13, 1, 0, 0, 0, 2, 0, 0, 0, 0, // 3: record { u: union }
        ];
        let dict = Dictionary::parse(&info, b"u\0", 4, 1, 8).expect("parse");
        let union = dict.get(2).expect("union");
        assert_eq!(union.packed_size, 10);
        let EntryKind::Union { members } = &union.kind else {
            panic!("not a union");
        };
        assert_eq!(members[0].key, MemberKey::Id(5));
        assert_eq!(members[1].key, MemberKey::Id(6));
        assert_eq!(members[1].offset, 2);
        assert_eq!(dict.root().packed_size, 10);
    }
}
