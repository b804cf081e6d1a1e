// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! City encoder.
//!
//! One [`Encoder`] session per call. The root record's packed span is
//! reserved at data offset 0 before anything else is appended, so a zero
//! pointer offset always means null. Pointer buffers are reserved (count
//! plus zeroed elements) and recorded in the dedup table before their
//! elements are written, which keeps cyclic data from recursing forever.

use super::config::CityConfig;
use super::dictionary::MEMBER_ID_FLAG;
use super::error::EncodeError;
use super::header::CityHeader;
use super::packed::{put_uint, CategoryCode, PackedSizes, COUNT_SIZE, DISCRIMINANT_SIZE};
use crate::attr::{
    attribute_int, attribute_length, attribute_program, CSTRING, ID, PERSIST, SELF_TYPE, WHEN,
};
use crate::expr::run_expression;
use crate::memory::{Address, Container, Heap, MemoryError};
use crate::schema::{Member, Schema, TypeId, TypeKind};
use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashMap;

pub(crate) struct Encoder<'a> {
    schema: &'a Schema,
    heap: &'a Heap,
    config: &'a CityConfig,
    /// Serialized id per schema type.
    ids: Vec<Option<u32>>,
    next_id: u64,
    types: Vec<u8>,
    data: Vec<u8>,
    sizes: PackedSizes,
    names: HashMap<&'a str, u32>,
    /// `(raw address, byte size)` of every written pointer buffer.
    buffers: HashMap<(u64, usize), u64>,
}

impl<'a> Encoder<'a> {
    pub fn new(schema: &'a Schema, heap: &'a Heap, config: &'a CityConfig) -> Self {
        Self {
            schema,
            heap,
            config,
            ids: vec![None; schema.len()],
            next_id: 0,
            types: Vec::new(),
            data: Vec::new(),
            sizes: PackedSizes::new(schema, usize::from(config.pointer_width)),
            names: HashMap::new(),
            buffers: HashMap::new(),
        }
    }

    /// Encode the record of type `root` stored at `addr`.
    pub fn run(mut self, root: TypeId, addr: Address) -> Result<Vec<u8>, EncodeError> {
        let schema = self.schema;
        let ty = schema.ty(root);
        if !matches!(ty.kind, TypeKind::Record { .. }) {
            return Err(EncodeError::RootNotRecord(ty.display_name()));
        }
        self.heap.bytes(addr, ty.size)?;

        let span = self.sizes.get(schema, root).max(1);
        self.data.resize(span, 0);

        let root_id = self.serialized_id(root)?;
        if u64::from(root_id) + 1 != self.next_id {
            // The root was first reached through a pointer cycle; repeat its
            // entry so that it is the last one.
            self.aggregate_entry(root, true)?;
        }

        let container = Container::root(root, addr, &ty.attrs);
        self.write_value(&container, 0)?;

        let data_ptr = CityHeader::SIZE + self.types.len();
        let data_ptr = u32::try_from(data_ptr).map_err(|_| EncodeError::OffsetOverflow {
            offset: data_ptr as u64,
            width: 4,
        })?;
        let header = CityHeader::new(
            self.config.type_id_width,
            self.config.pointer_width,
            data_ptr,
            self.next_id as u32,
        );

        let mut out = Vec::with_capacity(data_ptr as usize + self.data.len());
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&self.types);
        out.extend_from_slice(&self.data);

        log::debug!(
            "[city::encode] {}: {} types, {} data bytes, {} buffers",
            ty.display_name(),
            self.next_id,
            self.data.len(),
            self.buffers.len()
        );
        Ok(out)
    }

    fn assign(&mut self, ty: TypeId) -> Result<u32, EncodeError> {
        let id = self.next_id;
        if id > self.config.max_type_id() {
            return Err(EncodeError::TooManyTypes {
                count: id + 1,
                width: self.config.type_id_width,
            });
        }
        self.next_id += 1;
        let id = id as u32;
        self.ids[ty.index()] = Some(id);
        Ok(id)
    }

    fn push_type_id(&mut self, id: u32) {
        let width = usize::from(self.config.type_id_width);
        let start = self.types.len();
        self.types.resize(start + width, 0);
        put_uint(&mut self.types[start..], u64::from(id));
    }

    fn push_u32(&mut self, value: u32) {
        let start = self.types.len();
        self.types.resize(start + 4, 0);
        LittleEndian::write_u32(&mut self.types[start..], value);
    }

    /// Dictionary id of `ty`, writing its entry (and those of the types it
    /// references) on first use.
    fn serialized_id(&mut self, ty: TypeId) -> Result<u32, EncodeError> {
        if let Some(id) = self.ids[ty.index()] {
            return Ok(id);
        }
        let schema = self.schema;
        let t = schema.ty(ty);
        let code =
            CategoryCode::for_type(t).ok_or_else(|| EncodeError::Unsupported(t.display_name()))?;

        match &t.kind {
            TypeKind::Pointer { element } => {
                let id = self.assign(ty)?;
                self.types.push(code as u8);
                let patch = self.types.len();
                self.push_type_id(0);
                let element = self.serialized_id(*element)?;
                let width = usize::from(self.config.type_id_width);
                put_uint(&mut self.types[patch..patch + width], u64::from(element));
                log::trace!("[city::encode] type {id}: pointer to {element}");
                Ok(id)
            }
            TypeKind::Array { element, count } => {
                let element = self.serialized_id(*element)?;
                let count = u32::try_from(*count)
                    .map_err(|_| EncodeError::Unsupported(t.display_name()))?;
                let id = self.assign(ty)?;
                self.types.push(code as u8);
                self.push_type_id(element);
                self.push_u32(count);
                Ok(id)
            }
            TypeKind::Enum { .. } => {
                let size = u8::try_from(t.size)
                    .map_err(|_| EncodeError::Unsupported(t.display_name()))?;
                let id = self.assign(ty)?;
                self.types.push(code as u8);
                self.types.push(size);
                Ok(id)
            }
            TypeKind::Record { .. } | TypeKind::Union { .. } => self.aggregate_entry(ty, false),
            _ => {
                let id = self.assign(ty)?;
                self.types.push(code as u8);
                Ok(id)
            }
        }
    }

    /// Record or union entry. Members are visited first; a nested visit
    /// through a pointer may already have written this type, in which case
    /// nothing is written unless `repeat` asks for a second entry.
    fn aggregate_entry(&mut self, ty: TypeId, repeat: bool) -> Result<u32, EncodeError> {
        let schema = self.schema;
        let t = schema.ty(ty);
        let members = t.kind.members().unwrap_or(&[]);
        let code = if matches!(t.kind, TypeKind::Union { .. }) {
            CategoryCode::Union
        } else {
            CategoryCode::Record
        };

        let mut refs = Vec::with_capacity(members.len());
        for (index, member) in members.iter().enumerate() {
            let id = self.serialized_id(member.ty)?;
            let key = self.member_key(ty, index, member)?;
            refs.push((id, key));
        }

        let id = match self.ids[ty.index()] {
            Some(id) if !repeat => return Ok(id),
            // Repeated entry: references keep using the memoized id.
            Some(_) => {
                let id = self.next_id;
                if id > self.config.max_type_id() {
                    return Err(EncodeError::TooManyTypes {
                        count: id + 1,
                        width: self.config.type_id_width,
                    });
                }
                self.next_id += 1;
                id as u32
            }
            None => self.assign(ty)?,
        };

        self.types.push(code as u8);
        self.push_u32(refs.len() as u32);
        for (member_id, key) in refs {
            self.push_type_id(member_id);
            self.push_u32(key);
        }
        log::trace!(
            "[city::encode] type {id}: {} with {} members",
            t.display_name(),
            members.len()
        );
        Ok(id)
    }

    fn member_key(&mut self, owner: TypeId, index: usize, member: &'a Member) -> Result<u32, EncodeError> {
        if let Some(name) = member.name.as_deref() {
            return self.name_offset(name);
        }
        match attribute_int(self.schema, &member.attrs, ID) {
            Some(id) if (0..i64::from(MEMBER_ID_FLAG)).contains(&id) => Ok(id as u32 | MEMBER_ID_FLAG),
            _ => Err(EncodeError::UnnamedMember {
                owner: self.schema.ty(owner).display_name(),
                index,
            }),
        }
    }

    /// Offset of the NUL-terminated `name` in the data section.
    fn name_offset(&mut self, name: &'a str) -> Result<u32, EncodeError> {
        if let Some(offset) = self.names.get(name) {
            return Ok(*offset);
        }
        let offset = self.data.len() as u64;
        if offset >= u64::from(MEMBER_ID_FLAG) {
            return Err(EncodeError::OffsetOverflow { offset, width: 4 });
        }
        self.data.extend_from_slice(name.as_bytes());
        self.data.push(0);
        self.names.insert(name, offset as u32);
        Ok(offset as u32)
    }

    fn write_offset(&mut self, out: usize, offset: u64) {
        let width = usize::from(self.config.pointer_width);
        put_uint(&mut self.data[out..out + width], offset);
    }

    /// Write the packed form of `c` at data offset `out`, whose span is
    /// already reserved.
    fn write_value(&mut self, c: &Container<'_>, out: usize) -> Result<(), EncodeError> {
        let schema = self.schema;
        let heap = self.heap;
        let t = schema.ty(c.ty);
        match &t.kind {
            TypeKind::Unsigned | TypeKind::Signed | TypeKind::Float | TypeKind::Enum { .. } => {
                let src = heap.bytes(c.addr, t.size)?;
                self.data[out..out + t.size].copy_from_slice(src);
            }
            TypeKind::Array { element, count } => {
                let et = schema.ty(*element);
                if et.kind.is_scalar() {
                    let len = et.size * count;
                    let src = heap.bytes(c.addr, len)?;
                    self.data[out..out + len].copy_from_slice(src);
                } else {
                    let packed = self.sizes.get(schema, *element);
                    for i in 0..*count {
                        // Elements share the array's member attributes and
                        // evaluate `length` against the same record.
                        let item = Container {
                            ty: *element,
                            addr: c.addr.add(i * et.size),
                            attrs: c.attrs,
                            parent: c.parent,
                        };
                        self.write_value(&item, out + i * packed)?;
                    }
                }
            }
            TypeKind::Pointer { element } => self.write_pointer(c, *element, out)?,
            TypeKind::Record { members } => {
                let mut at = out;
                for m in members {
                    let size = self.sizes.get(schema, m.ty);
                    if m.attrs.contains(PERSIST) && !m.attrs.contains(SELF_TYPE) {
                        let child = c.child(m.ty, c.addr.add(m.offset), &m.attrs);
                        self.write_value(&child, at)?;
                    }
                    at += size;
                }
            }
            TypeKind::Union { members } => {
                let context = when_context(schema, c);
                let size = schema.ty(context.ty).size;
                let data = heap.bytes(context.addr, size)?;
                let selected = members.iter().enumerate().find(|(_, m)| {
                    m.attrs.contains(PERSIST)
                        && attribute_program(schema, &m.attrs, WHEN)
                            .is_some_and(|program| run_expression(program, data).is_true())
                });
                if let Some((index, m)) = selected {
                    put_uint(
                        &mut self.data[out..out + DISCRIMINANT_SIZE],
                        index as u64 + 1,
                    );
                    let child = c.child(m.ty, c.addr, &m.attrs);
                    self.write_value(&child, out + DISCRIMINANT_SIZE)?;
                }
            }
            TypeKind::Function | TypeKind::Variadic => {
                return Err(EncodeError::Unsupported(t.display_name()));
            }
        }
        Ok(())
    }

    fn write_pointer(
        &mut self,
        c: &Container<'_>,
        element: TypeId,
        out: usize,
    ) -> Result<(), EncodeError> {
        let schema = self.schema;
        let heap = self.heap;
        let Some(target) = heap.read_pointer(c.addr)? else {
            self.write_offset(out, 0);
            return Ok(());
        };

        let count = if let Some(n) = attribute_length(schema, heap, c)? {
            usize::try_from(n).unwrap_or(0)
        } else if c.attrs.contains(CSTRING) || schema.ty(c.ty).attrs.contains(CSTRING) {
            heap.strlen(target)
                .ok_or(MemoryError::InvalidAddress {
                    addr: target,
                    len: 1,
                })?
                + 1
        } else {
            1
        };

        let et = schema.ty(element);
        let overflow = EncodeError::OffsetOverflow {
            offset: count as u64,
            width: COUNT_SIZE as u8,
        };
        let byte_size = count.checked_mul(et.size).ok_or(overflow)?;
        heap.bytes(target, byte_size)?;

        let key = (target.to_raw(), byte_size);
        if let Some(&offset) = self.buffers.get(&key) {
            self.write_offset(out, offset);
            return Ok(());
        }

        let stored = u32::try_from(count).map_err(|_| EncodeError::OffsetOverflow {
            offset: count as u64,
            width: COUNT_SIZE as u8,
        })?;
        let offset = self.data.len() as u64;
        if offset > self.config.max_offset() {
            return Err(EncodeError::OffsetOverflow {
                offset,
                width: self.config.pointer_width,
            });
        }
        let packed = self.sizes.get(schema, element);
        let body = self.data.len() + COUNT_SIZE;
        self.data
            .resize(body + packed.saturating_mul(count), 0);
        put_uint(&mut self.data[body - COUNT_SIZE..body], u64::from(stored));
        self.buffers.insert(key, offset);
        self.write_offset(out, offset);

        if et.kind.is_scalar() {
            let src = heap.bytes(target, byte_size)?;
            self.data[body..body + byte_size].copy_from_slice(src);
        } else {
            for i in 0..count {
                let item = c.child(element, target.add(i * et.size), &et.attrs);
                self.write_value(&item, body + i * packed)?;
            }
        }
        Ok(())
    }
}

/// Container `when` programs of a union run against: the nearest enclosing
/// record, or the union itself when it sits at the top or behind a pointer.
fn when_context<'c>(schema: &Schema, c: &'c Container<'c>) -> &'c Container<'c> {
    let mut current = c.parent;
    while let Some(parent) = current {
        match schema.ty(parent.ty).kind {
            TypeKind::Record { .. } => return parent,
            TypeKind::Pointer { .. } => break,
            _ => current = parent.parent,
        }
    }
    c
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::header::CityHeader;
    use crate::schema::{MemberDecl, Primitive, SchemaBuilder};

    fn encode_default(schema: &Schema, heap: &Heap, root: TypeId, addr: Address) -> Vec<u8> {
        let config = CityConfig::default();
        Encoder::new(schema, heap, &config)
            .run(root, addr)
            .expect("encode")
    }

    #[test]
    fn test_scalar_record_layout() {
        let mut builder = SchemaBuilder::new();
        let u8_t = builder.primitive(Primitive::U8);
        let u32_t = builder.primitive(Primitive::U32);
        let point = builder
            .record(
                "Point",
                vec![MemberDecl::new("tag", u8_t), MemberDecl::new("x", u32_t)],
            )
            .expect("record");
        let schema = builder.finish().expect("finish");

        let mut heap = Heap::new();
        let addr = heap.alloc(8);
        heap.write_u8(addr, 7).expect("write");
        heap.write_u32(addr.add(4), 0xAABBCCDD).expect("write");

        let bytes = encode_default(&schema, &heap, point, addr);
        let header = CityHeader::parse(&bytes).expect("header");
        assert_eq!(header.count_types, 3);
        assert_eq!(header.size_info, 0x13);

        // u8, u32, then the record with two members of 2 + 4 bytes each.
        let info = &bytes[CityHeader::SIZE..header.data_ptr as usize];
        assert_eq!(&info[..2], &[0x01, 0x03]);
        assert_eq!(&info[2..7], &[0x13, 2, 0, 0, 0]);
        assert_eq!(info.len(), 2 + 5 + 2 * 6);

        let data = &bytes[header.data_ptr as usize..];
        assert_eq!(&data[..5], &[7, 0xDD, 0xCC, 0xBB, 0xAA]);
        assert_eq!(&data[5..], b"tag\0x\0");
    }

    #[test]
    fn test_union_discriminant_is_index_plus_one() {
        let mut builder = SchemaBuilder::new();
        let u8_t = builder.primitive(Primitive::U8);
        let u16_t = builder.primitive(Primitive::U16);
        let value = builder
            .union(
                "Value",
                vec![
                    MemberDecl::new("small", u8_t).when("tag == 0"),
                    MemberDecl::new("wide", u16_t).when("tag == 1"),
                ],
            )
            .expect("union");
        let slot = builder
            .record(
                "Slot",
                vec![MemberDecl::new("tag", u8_t), MemberDecl::new("value", value)],
            )
            .expect("record");
        let schema = builder.finish().expect("finish");

        let mut heap = Heap::new();
        let addr = heap.alloc(schema.ty(slot).size);
        heap.write_u8(addr, 1).expect("tag");
        heap.write_u16(addr.add(2), 0x0304).expect("wide");
        let bytes = encode_default(&schema, &heap, slot, addr);
        let header = CityHeader::parse(&bytes).expect("header");
        let data = &bytes[header.data_ptr as usize..];
        // tag, then discriminant 2 (second member) and the u16 value.
        assert_eq!(&data[..5], &[1, 2, 0, 0x04, 0x03]);

        heap.write_u8(addr, 9).expect("tag");
        let bytes = encode_default(&schema, &heap, slot, addr);
        let data = &bytes[header.data_ptr as usize..];
        assert_eq!(&data[..5], &[9, 0, 0, 0, 0]);
    }

    #[test]
    fn test_rejects_unnamed_and_functions() {
        let mut builder = SchemaBuilder::new();
        let u8_t = builder.primitive(Primitive::U8);
        let func = builder.function("callback").expect("function");
        let fptr = builder.pointer(func);
        let anon = builder
            .record("Anon", vec![MemberDecl::anonymous(u8_t)])
            .expect("record");
        let with_fn = builder
            .record("WithFn", vec![MemberDecl::new("cb", fptr)])
            .expect("record");
        let schema = builder.finish().expect("finish");
        let config = CityConfig::default();
        let mut heap = Heap::new();
        let addr = heap.alloc(16);

        let err = Encoder::new(&schema, &heap, &config)
            .run(anon, addr)
            .expect_err("unnamed");
        assert!(matches!(err, EncodeError::UnnamedMember { index: 0, .. }));

        let err = Encoder::new(&schema, &heap, &config)
            .run(with_fn, addr)
            .expect_err("function");
        assert!(matches!(err, EncodeError::Unsupported(name) if name == "callback"));

        let err = Encoder::new(&schema, &heap, &config)
            .run(u8_t, addr)
            .expect_err("root");
        assert!(matches!(err, EncodeError::RootNotRecord(_)));
    }

    #[test]
    fn test_type_id_width_limit() {
        let mut builder = SchemaBuilder::new();
        let mut members = Vec::new();
        let u8_t = builder.primitive(Primitive::U8);
        let mut element = u8_t;
        for i in 0..300 {
            element = builder.array(element, 1);
            members.push(MemberDecl::new(format!("m{i}"), element));
        }
        let root = builder.record("Deep", members).expect("record");
        let schema = builder.finish().expect("finish");
        let config = CityConfig::default().type_id_width(1);
        let mut heap = Heap::new();
        let addr = heap.alloc(schema.ty(root).size);

        let err = Encoder::new(&schema, &heap, &config)
            .run(root, addr)
            .expect_err("too many");
        assert!(matches!(err, EncodeError::TooManyTypes { width: 1, .. }));
    }

    #[test]
    fn test_dangling_pointer() {
        let mut builder = SchemaBuilder::new();
        let u32_t = builder.primitive(Primitive::U32);
        let ptr = builder.pointer(u32_t);
        let root = builder
            .record("Holder", vec![MemberDecl::new("p", ptr)])
            .expect("record");
        let schema = builder.finish().expect("finish");
        let mut heap = Heap::new();
        let addr = heap.alloc(8);
        heap.write_pointer(addr, Some(Address::new(42, 0)))
            .expect("write");

        let config = CityConfig::default();
        let err = Encoder::new(&schema, &heap, &config)
            .run(root, addr)
            .expect_err("dangling");
        assert!(matches!(err, EncodeError::InvalidAddress(_)));
    }
}
