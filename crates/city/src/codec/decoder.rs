// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! City decoder.
//!
//! The header and the whole type dictionary are validated before the
//! destination is touched. Values are then matched member by member
//! against the destination schema: by name, by alias or by `id`. Members
//! missing from the stream take their `default`.

use super::config::CityConfig;
use super::dictionary::{Dictionary, Entry, EntryKind, EntryMember, MemberKey};
use super::error::{DecodeError, FormatError};
use super::header::{CityHeader, VERSION_MAJOR, VERSION_MINOR};
use super::packed::{get_int, get_uint, put_uint, CategoryCode, COUNT_SIZE};
use crate::attr::{
    attribute_int, attribute_strings, attribute_value, AttributeSet, ALIAS, DEFAULT, ID, PERSIST,
    SELF_TYPE,
};
use crate::memory::{Address, Heap};
use crate::schema::{Category, Member, Schema, TypeId, TypeKind};

/// Validated view of an encoded stream.
#[derive(Debug, Clone)]
pub struct CityReader<'a> {
    header: CityHeader,
    dictionary: Dictionary,
    data: &'a [u8],
    config: CityConfig,
}

impl<'a> CityReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self, DecodeError> {
        Self::with_config(bytes, CityConfig::default())
    }

    /// Check the header, version and type dictionary of `bytes`.
    pub fn with_config(bytes: &'a [u8], config: CityConfig) -> Result<Self, DecodeError> {
        config.validate()?;
        let header = CityHeader::parse(bytes)?;

        if header.version_major != VERSION_MAJOR
            || (config.strict_minor && header.version_minor > VERSION_MINOR)
        {
            return Err(DecodeError::VersionMismatch {
                major: header.version_major,
                minor: header.version_minor,
            });
        }
        if header.version_minor > VERSION_MINOR {
            log::warn!(
                "[city::decode] stream version {}.{} is newer than {}.{}, unknown data is ignored",
                header.version_major,
                header.version_minor,
                VERSION_MAJOR,
                VERSION_MINOR
            );
        }

        let (id_width, pointer_width) = header.widths()?;
        let data_ptr = header.data_ptr as usize;
        if data_ptr < CityHeader::SIZE || data_ptr > bytes.len() {
            return Err(FormatError::OutOfRange {
                offset: u64::from(header.data_ptr),
                len: 0,
            }
            .into());
        }
        let type_info = &bytes[CityHeader::SIZE..data_ptr];
        let data = &bytes[data_ptr..];
        let dictionary =
            Dictionary::parse(type_info, data, header.count_types, id_width, pointer_width)?;

        let span = dictionary.root().packed_size;
        if span > data.len() {
            return Err(FormatError::OutOfRange {
                offset: 0,
                len: span as u64,
            }
            .into());
        }

        Ok(Self {
            header,
            dictionary,
            data,
            config,
        })
    }

    pub fn header(&self) -> &CityHeader {
        &self.header
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    /// Decode the root record into the value of type `root` at `dest`.
    pub fn decode_into(
        &self,
        schema: &Schema,
        heap: &mut Heap,
        root: TypeId,
        dest: Address,
    ) -> Result<(), DecodeError> {
        let ty = schema.ty(root);
        if !matches!(ty.kind, TypeKind::Record { .. }) {
            return Err(DecodeError::RootNotRecord(ty.display_name()));
        }
        heap.bytes(dest, ty.size)?;

        let mut session = Decoder {
            schema,
            dictionary: &self.dictionary,
            data: self.data,
            heap,
            pointer_width: self.header.pointer_width(),
            max_depth: self.config.max_depth,
            path: Vec::new(),
        };
        session.load(root, dest, self.dictionary.root_id(), 0, 0)?;
        log::debug!(
            "[city::decode] {}: {} types, {} data bytes",
            ty.display_name(),
            self.dictionary.len(),
            self.data.len()
        );
        Ok(())
    }
}

struct Decoder<'a, 'h> {
    schema: &'a Schema,
    dictionary: &'a Dictionary,
    data: &'a [u8],
    heap: &'h mut Heap,
    pointer_width: usize,
    max_depth: usize,
    /// Destination member names from the root to the current value.
    path: Vec<String>,
}

impl<'a> Decoder<'a, '_> {
    fn field(&self) -> String {
        let mut out = String::new();
        for segment in &self.path {
            if !out.is_empty() && !segment.starts_with('[') {
                out.push('.');
            }
            out.push_str(segment);
        }
        if out.is_empty() {
            out.push_str("<root>");
        }
        out
    }

    fn bytes(&self, offset: usize, len: usize) -> Result<&'a [u8], FormatError> {
        let data = self.data;
        offset
            .checked_add(len)
            .and_then(|end| data.get(offset..end))
            .ok_or(FormatError::OutOfRange {
                offset: offset as u64,
                len: len as u64,
            })
    }

    fn entry(&self, id: u32) -> Result<&'a Entry, FormatError> {
        let dictionary = self.dictionary;
        dictionary.get(id).ok_or(FormatError::UnknownTypeId(id))
    }

    fn check_depth(&self, depth: usize) -> Result<(), FormatError> {
        if depth > self.max_depth {
            return Err(FormatError::TooDeep(self.max_depth));
        }
        Ok(())
    }

    fn mismatch(&self, expected: Category, found: CategoryCode) -> DecodeError {
        DecodeError::SchemaMismatch {
            field: self.field(),
            expected,
            found: found.category(),
        }
    }

    /// Copy the source value of entry `src` at data offset `at` into the
    /// destination value of type `dst` at `addr`.
    fn load(
        &mut self,
        dst: TypeId,
        addr: Address,
        src: u32,
        at: usize,
        depth: usize,
    ) -> Result<(), DecodeError> {
        self.check_depth(depth)?;
        let schema = self.schema;
        let t = schema.ty(dst);
        let entry = self.entry(src)?;

        match (&t.kind, &entry.kind) {
            (TypeKind::Unsigned | TypeKind::Signed, EntryKind::Scalar)
                if entry.code.category() == Category::Integer =>
            {
                let raw = self.bytes(at, entry.packed_size)?;
                let value = if entry.code.is_signed() {
                    get_int(raw) as u64
                } else {
                    get_uint(raw)
                };
                let out = self.heap.bytes_mut(addr, t.size)?;
                out.fill(0);
                put_uint(out, value);
            }
            (TypeKind::Float, EntryKind::Scalar) if entry.code.category() == Category::Float => {
                let raw = self.bytes(at, entry.packed_size)?;
                let value = match (raw.len(), t.size) {
                    (a, b) if a == b => None,
                    (4, 8) => Some(f64::from(f32::from_bits(get_uint(raw) as u32)).to_bits()),
                    (8, 4) => Some(u64::from((f64::from_bits(get_uint(raw)) as f32).to_bits())),
                    (a, b) => {
                        return Err(DecodeError::Unsupported {
                            field: self.field(),
                            what: format!("{}-byte float as {}-byte float", a, b),
                        })
                    }
                };
                match value {
                    Some(bits) => put_uint(self.heap.bytes_mut(addr, t.size)?, bits),
                    None => self.heap.write_bytes(addr, raw)?,
                }
            }
            (TypeKind::Enum { .. }, EntryKind::Enum { size }) => {
                let n = usize::from(*size).min(t.size);
                let raw = self.bytes(at, usize::from(*size))?;
                let out = self.heap.bytes_mut(addr, t.size)?;
                out.fill(0);
                out[..n].copy_from_slice(&raw[..n]);
            }
            (TypeKind::Array { element, count }, EntryKind::Array { element: src_elem, count: src_count }) => {
                self.load_array(*element, *count, addr, *src_elem, *src_count, at, depth)?;
            }
            (TypeKind::Pointer { element }, EntryKind::Pointer { element: src_elem }) => {
                self.load_pointer(*element, addr, *src_elem, at, depth)?;
            }
            (TypeKind::Record { members }, EntryKind::Record { members: src_members }) => {
                self.load_record(dst, members, addr, src_members, at, depth)?;
            }
            (TypeKind::Union { members }, EntryKind::Union { members: src_members }) => {
                self.load_union(t.size, members, addr, src_members, at, depth)?;
            }
            (TypeKind::Function | TypeKind::Variadic, _) => {
                return Err(DecodeError::Unsupported {
                    field: self.field(),
                    what: t.display_name(),
                });
            }
            _ => return Err(self.mismatch(t.category(), entry.code)),
        }
        Ok(())
    }

    /// `true` when destination elements of type `dst` have the exact packed
    /// representation of source entry `src`.
    fn same_layout(&self, dst: TypeId, src: &Entry) -> bool {
        let t = self.schema.ty(dst);
        match (&t.kind, &src.kind) {
            (TypeKind::Enum { .. }, EntryKind::Enum { size }) => usize::from(*size) == t.size,
            (_, EntryKind::Scalar) => CategoryCode::for_type(t) == Some(src.code),
            _ => false,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn load_array(
        &mut self,
        element: TypeId,
        count: usize,
        addr: Address,
        src_elem: u32,
        src_count: u32,
        at: usize,
        depth: usize,
    ) -> Result<(), DecodeError> {
        let schema = self.schema;
        let size = schema.ty(element).size;
        let source = self.entry(src_elem)?;
        let n = count.min(src_count as usize);

        if self.same_layout(element, source) {
            let raw = self.bytes(at, n * size)?;
            self.heap.write_bytes(addr, raw)?;
        } else {
            for i in 0..n {
                self.path.push(format!("[{i}]"));
                self.load(
                    element,
                    addr.add(i * size),
                    src_elem,
                    at + i * source.packed_size,
                    depth + 1,
                )?;
                self.path.pop();
            }
        }

        let none = AttributeSet::new();
        for i in n..count {
            self.fill_default(element, addr.add(i * size), &none, depth + 1)?;
        }
        Ok(())
    }

    fn load_pointer(
        &mut self,
        element: TypeId,
        addr: Address,
        src_elem: u32,
        at: usize,
        depth: usize,
    ) -> Result<(), DecodeError> {
        let offset = get_uint(self.bytes(at, self.pointer_width)?);
        if offset == 0 {
            self.heap.write_pointer(addr, None)?;
            return Ok(());
        }
        let offset = usize::try_from(offset).map_err(|_| FormatError::OutOfRange {
            offset,
            len: COUNT_SIZE as u64,
        })?;
        let count = get_uint(self.bytes(offset, COUNT_SIZE)?) as u32;
        let source = self.entry(src_elem)?;

        // Zero-sized elements still count one byte each so that a forged
        // count cannot drive a huge allocation.
        let span = source.packed_size.max(1).checked_mul(count as usize);
        let body = offset + COUNT_SIZE;
        match span {
            Some(span) => self.bytes(body, span)?,
            None => return Err(FormatError::SizeOverflow.into()),
        };

        let size = self.schema.ty(element).size;
        let total = size
            .checked_mul(count as usize)
            .ok_or(FormatError::SizeOverflow)?;
        let target = self.heap.alloc(total);
        self.heap.write_pointer(addr, Some(target))?;

        if self.same_layout(element, source) {
            let raw = self.bytes(body, total)?;
            self.heap.write_bytes(target, raw)?;
            return Ok(());
        }
        for i in 0..count as usize {
            self.path.push(format!("[{i}]"));
            self.load(
                element,
                target.add(i * size),
                src_elem,
                body + i * source.packed_size,
                depth + 1,
            )?;
            self.path.pop();
        }
        Ok(())
    }

    fn load_record(
        &mut self,
        record: TypeId,
        members: &'a [Member],
        addr: Address,
        source: &'a [EntryMember],
        at: usize,
        depth: usize,
    ) -> Result<(), DecodeError> {
        for m in members {
            let target = addr.add(m.offset);
            self.path.push(m.display_name().to_owned());
            if m.attrs.contains(SELF_TYPE) {
                self.write_type_id(record, m.ty, target)?;
            } else {
                let matched = if m.attrs.contains(PERSIST) {
                    source.iter().find(|s| self.matches(m, &s.key))
                } else {
                    None
                };
                match matched {
                    Some(s) => self.load(m.ty, target, s.ty, at + s.offset, depth + 1)?,
                    None => self.fill_default(m.ty, target, &m.attrs, depth + 1)?,
                }
            }
            self.path.pop();
        }
        Ok(())
    }

    fn load_union(
        &mut self,
        size: usize,
        members: &'a [Member],
        addr: Address,
        source: &'a [EntryMember],
        at: usize,
        depth: usize,
    ) -> Result<(), DecodeError> {
        self.heap.bytes_mut(addr, size)?.fill(0);
        let discriminant = get_uint(self.bytes(at, 2)?) as u16;
        if discriminant == 0 {
            return Ok(());
        }
        let selected = source
            .get(usize::from(discriminant) - 1)
            .ok_or(FormatError::InvalidDiscriminant {
                offset: at as u64,
                value: discriminant,
            })?;
        let Some(m) = members
            .iter()
            .find(|m| m.attrs.contains(PERSIST) && self.matches(m, &selected.key))
        else {
            log::trace!(
                "[city::decode] {}: union member {} has no counterpart",
                self.field(),
                selected.key
            );
            return Ok(());
        };
        self.path.push(m.display_name().to_owned());
        self.load(m.ty, addr, selected.ty, at + selected.offset, depth + 1)?;
        self.path.pop();
        Ok(())
    }

    fn matches(&self, member: &Member, key: &MemberKey) -> bool {
        let schema = self.schema;
        match key {
            MemberKey::Name(name) => {
                member.name.as_deref() == Some(name.as_str())
                    || attribute_strings(schema, &member.attrs, ALIAS).any(|alias| alias == name.as_str())
            }
            MemberKey::Id(id) => attribute_int(schema, &member.attrs, ID) == Some(i64::from(*id)),
        }
    }

    fn write_type_id(&mut self, record: TypeId, ty: TypeId, addr: Address) -> Result<(), DecodeError> {
        let size = self.schema.ty(ty).size;
        let out = self.heap.bytes_mut(addr, size)?;
        out.fill(0);
        put_uint(out, record.index() as u64);
        Ok(())
    }

    /// Value for a member the stream does not carry: its `default`, else
    /// member-wise defaults for records, else zero.
    fn fill_default(
        &mut self,
        ty: TypeId,
        addr: Address,
        attrs: &AttributeSet,
        depth: usize,
    ) -> Result<(), DecodeError> {
        self.check_depth(depth)?;
        let schema = self.schema;
        let t = schema.ty(ty);

        if let Some(value) = attribute_value(schema, ty, attrs, DEFAULT) {
            if matches!(t.kind, TypeKind::Pointer { .. }) {
                let target = self.heap.alloc_bytes(value.data);
                self.heap.write_pointer(addr, Some(target))?;
            } else {
                self.heap.write_bytes(addr, value.data)?;
            }
            return Ok(());
        }

        self.heap.bytes_mut(addr, t.size)?.fill(0);
        if let TypeKind::Record { members } = &t.kind {
            for m in members {
                let target = addr.add(m.offset);
                if m.attrs.contains(SELF_TYPE) {
                    self.write_type_id(ty, m.ty, target)?;
                } else {
                    self.fill_default(m.ty, target, &m.attrs, depth + 1)?;
                }
            }
        }
        Ok(())
    }
}
