// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com
//
// Decoding streams written with an older (or different) schema: added
// members take their defaults, renamed members are found through aliases,
// unions keep their selection when members are reordered, and malformed
// or foreign streams are rejected without touching the destination.

#![allow(clippy::float_cmp)]
#![allow(clippy::cast_possible_truncation)]

use city::codec::{self, CityConfig, DecodeError, FormatError};
use city::memory::{Address, Heap};
use city::schema::{Category, Literal, MemberDecl, Primitive, Schema, SchemaBuilder, TypeId};

fn at(schema: &Schema, ty: TypeId, base: Address, member: &str) -> Address {
    base.add(schema.member(ty, member).unwrap().offset)
}

fn read_cstr(heap: &Heap, addr: Address) -> String {
    let len = heap.strlen(addr).unwrap();
    String::from_utf8(heap.get(addr, len).unwrap().to_vec()).unwrap()
}

/// `Config { u16 port; string host; u64 legacy; }`
fn config_v1() -> (Schema, TypeId) {
    let mut b = SchemaBuilder::new();
    let u16_t = b.primitive(Primitive::U16);
    let u64_t = b.primitive(Primitive::U64);
    let host = b.string();
    let config = b
        .record(
            "Config",
            vec![
                MemberDecl::new("port", u16_t),
                MemberDecl::new("host", host),
                MemberDecl::new("legacy", u64_t),
            ],
        )
        .unwrap();
    (b.finish().unwrap(), config)
}

fn encode_config_v1(heap: &mut Heap) -> Vec<u8> {
    let (schema, config) = config_v1();
    let src = heap.alloc(schema.ty(config).size);
    let host = heap.alloc_str("example.org");
    heap.write_u16(at(&schema, config, src, "port"), 8080).unwrap();
    heap.write_pointer(at(&schema, config, src, "host"), Some(host))
        .unwrap();
    heap.write_u64(at(&schema, config, src, "legacy"), u64::MAX)
        .unwrap();
    codec::encode(&schema, heap, config, src).unwrap()
}

#[test]
fn test_added_members_take_defaults() {
    let mut heap = Heap::new();
    let bytes = encode_config_v1(&mut heap);

    let mut b = SchemaBuilder::new();
    let u8_t = b.primitive(Primitive::U8);
    let i16_t = b.primitive(Primitive::I16);
    let u32_t = b.primitive(Primitive::U32);
    let f32_t = b.primitive(Primitive::F32);
    let string = b.string();
    let limits = b
        .record(
            "Limits",
            vec![
                MemberDecl::new("lo", i16_t).default(Literal::Int(-1)),
                MemberDecl::new("hi", i16_t).default(Literal::Int(100)),
                MemberDecl::new("step", i16_t),
            ],
        )
        .unwrap();
    let config = b
        .record(
            "Config",
            vec![
                MemberDecl::new("host", string),
                MemberDecl::new("port", u32_t),
                MemberDecl::new("retries", u8_t).default(Literal::Int(3)),
                MemberDecl::new("name", string).default(Literal::Str("anon".into())),
                MemberDecl::new("limits", limits),
                MemberDecl::new("ratio", f32_t).default(Literal::Float(0.5)),
            ],
        )
        .unwrap();
    let schema = b.finish().unwrap();

    let dest = heap.alloc(schema.ty(config).size);
    heap.write_bytes(dest, &vec![0x5A; schema.ty(config).size])
        .unwrap();
    codec::decode(&schema, &bytes, &mut heap, config, dest).unwrap();

    let host = heap
        .read_pointer(at(&schema, config, dest, "host"))
        .unwrap()
        .unwrap();
    assert_eq!(read_cstr(&heap, host), "example.org");
    assert_eq!(heap.read_u32(at(&schema, config, dest, "port")).unwrap(), 8080);
    assert_eq!(heap.read_u8(at(&schema, config, dest, "retries")).unwrap(), 3);
    let name = heap
        .read_pointer(at(&schema, config, dest, "name"))
        .unwrap()
        .unwrap();
    assert_eq!(read_cstr(&heap, name), "anon");

    let limits_at = at(&schema, config, dest, "limits");
    assert_eq!(heap.read_i16(at(&schema, limits, limits_at, "lo")).unwrap(), -1);
    assert_eq!(heap.read_i16(at(&schema, limits, limits_at, "hi")).unwrap(), 100);
    assert_eq!(heap.read_i16(at(&schema, limits, limits_at, "step")).unwrap(), 0);
    assert_eq!(heap.read_f32(at(&schema, config, dest, "ratio")).unwrap(), 0.5);
}

#[test]
fn test_renamed_member_found_through_alias() {
    let mut heap = Heap::new();
    let bytes = encode_config_v1(&mut heap);

    let mut b = SchemaBuilder::new();
    let u16_t = b.primitive(Primitive::U16);
    let string = b.string();
    let config = b
        .record(
            "Config",
            vec![
                MemberDecl::new("listen_port", u16_t).alias(&["port"]),
                MemberDecl::new("server", string).alias(&["hostname", "host"]),
            ],
        )
        .unwrap();
    let schema = b.finish().unwrap();

    let dest = heap.alloc(schema.ty(config).size);
    codec::decode(&schema, &bytes, &mut heap, config, dest).unwrap();

    assert_eq!(
        heap.read_u16(at(&schema, config, dest, "listen_port")).unwrap(),
        8080
    );
    let server = heap
        .read_pointer(at(&schema, config, dest, "server"))
        .unwrap()
        .unwrap();
    assert_eq!(read_cstr(&heap, server), "example.org");
}

#[test]
fn test_anonymous_members_match_on_id() {
    let mut b = SchemaBuilder::new();
    let u32_t = b.primitive(Primitive::U32);
    let old_ty = b
        .record(
            "Ids",
            vec![
                MemberDecl::anonymous(u32_t).id(7),
                MemberDecl::anonymous(u32_t).id(9),
            ],
        )
        .unwrap();
    let old = b.finish().unwrap();

    let mut heap = Heap::new();
    let src = heap.alloc(8);
    heap.write_u32(src, 70).unwrap();
    heap.write_u32(src.add(4), 90).unwrap();
    let bytes = codec::encode(&old, &heap, old_ty, src).unwrap();

    let mut b = SchemaBuilder::new();
    let u32_t = b.primitive(Primitive::U32);
    let new_ty = b
        .record(
            "Ids",
            vec![
                MemberDecl::new("nine", u32_t).id(9),
                MemberDecl::anonymous(u32_t).id(7),
                MemberDecl::anonymous(u32_t).id(11),
            ],
        )
        .unwrap();
    let new = b.finish().unwrap();

    let dest = heap.alloc(12);
    heap.write_u32(dest.add(8), 1234).unwrap();
    codec::decode(&new, &bytes, &mut heap, new_ty, dest).unwrap();
    assert_eq!(heap.read_u32(dest).unwrap(), 90);
    assert_eq!(heap.read_u32(dest.add(4)).unwrap(), 70);
    assert_eq!(heap.read_u32(dest.add(8)).unwrap(), 0);
}

/// `Msg { Kind kind; Shape shape; }` with the union members in the given
/// order; `Kind` is `CIRCLE = 0, SQUARE = 1, TRIANGLE = 2`.
fn shape_schema(order: &[&str]) -> (Schema, TypeId) {
    let mut b = SchemaBuilder::new();
    let f32_t = b.primitive(Primitive::F32);
    let f64_t = b.primitive(Primitive::F64);
    let u8_t = b.primitive(Primitive::U8);
    let kind = b
        .enumeration(
            "Kind",
            Primitive::U8,
            &[("CIRCLE", 0), ("SQUARE", 1), ("TRIANGLE", 2)],
        )
        .unwrap();
    let mut members = Vec::new();
    for name in order {
        let decl = match *name {
            "circle" => MemberDecl::new("circle", f64_t).when("kind == CIRCLE"),
            "square" => MemberDecl::new("square", f32_t).when("kind == SQUARE"),
            _ => MemberDecl::new("triangle", u8_t).when("kind == TRIANGLE"),
        };
        members.push(decl);
    }
    let shape = b.union("Shape", members).unwrap();
    let msg = b
        .record(
            "Msg",
            vec![MemberDecl::new("kind", kind), MemberDecl::new("shape", shape)],
        )
        .unwrap();
    (b.finish().unwrap(), msg)
}

#[test]
fn test_union_selection_survives_member_reordering() {
    let (old, msg) = shape_schema(&["circle", "square"]);
    let mut heap = Heap::new();
    let src = heap.alloc(old.ty(msg).size);
    heap.write_u8(at(&old, msg, src, "kind"), 1).unwrap();
    heap.write_f32(at(&old, msg, src, "shape"), 4.0).unwrap();
    let bytes = codec::encode(&old, &heap, msg, src).unwrap();

    let (new, msg) = shape_schema(&["triangle", "square", "circle"]);
    let dest = heap.alloc(new.ty(msg).size);
    codec::decode(&new, &bytes, &mut heap, msg, dest).unwrap();

    assert_eq!(heap.read_u8(at(&new, msg, dest, "kind")).unwrap(), 1);
    assert_eq!(heap.read_f32(at(&new, msg, dest, "shape")).unwrap(), 4.0);
    // Nothing of the larger circle member leaks into the upper bytes.
    let shape = at(&new, msg, dest, "shape");
    assert_eq!(heap.read_u32(shape.add(4)).unwrap(), 0);
}

#[test]
fn test_category_mismatch_reports_path() {
    let build = |value: Primitive| {
        let mut b = SchemaBuilder::new();
        let v = b.primitive(value);
        let item = b
            .record("Item", vec![MemberDecl::new("v", v)])
            .unwrap();
        let items = b.array(item, 2);
        let batch = b
            .record("Batch", vec![MemberDecl::new("items", items)])
            .unwrap();
        (b.finish().unwrap(), batch)
    };
    let (old, batch) = build(Primitive::U8);
    let mut heap = Heap::new();
    let src = heap.alloc(old.ty(batch).size);
    let bytes = codec::encode(&old, &heap, batch, src).unwrap();

    let (new, batch) = build(Primitive::F64);
    let dest = heap.alloc(new.ty(batch).size);
    let err = codec::decode(&new, &bytes, &mut heap, batch, dest).unwrap_err();
    assert_eq!(
        err,
        DecodeError::SchemaMismatch {
            field: "items[0].v".into(),
            expected: Category::Float,
            found: Category::Integer,
        }
    );
}

#[test]
fn test_major_version_rejected_before_any_write() {
    let mut heap = Heap::new();
    let mut bytes = encode_config_v1(&mut heap);
    let (schema, config) = config_v1();
    let size = schema.ty(config).size;

    bytes[4] = 2;
    let dest = heap.alloc(size);
    heap.write_bytes(dest, &vec![0xEE; size]).unwrap();
    let live = heap.live_blocks();

    let err = codec::decode(&schema, &bytes, &mut heap, config, dest).unwrap_err();
    assert_eq!(err, DecodeError::VersionMismatch { major: 2, minor: 0 });
    assert_eq!(heap.get(dest, size).unwrap(), vec![0xEE; size].as_slice());
    assert_eq!(heap.live_blocks(), live);
}

#[test]
fn test_newer_minor_version() {
    let mut heap = Heap::new();
    let mut bytes = encode_config_v1(&mut heap);
    let (schema, config) = config_v1();
    bytes[6] = 5;

    let dest = heap.alloc(schema.ty(config).size);
    codec::decode(&schema, &bytes, &mut heap, config, dest).unwrap();
    assert_eq!(heap.read_u16(at(&schema, config, dest, "port")).unwrap(), 8080);

    let strict = CityConfig::new().strict_minor(true);
    let err = codec::decode_with(&schema, &bytes, &mut heap, config, dest, strict).unwrap_err();
    assert_eq!(err, DecodeError::VersionMismatch { major: 1, minor: 5 });
}

#[test]
fn test_foreign_and_truncated_streams() {
    let mut heap = Heap::new();
    let bytes = encode_config_v1(&mut heap);
    let (schema, config) = config_v1();
    let dest = heap.alloc(schema.ty(config).size);

    let mut foreign = bytes.clone();
    foreign[..4].copy_from_slice(b"CITY");
    assert_eq!(
        codec::decode(&schema, &foreign, &mut heap, config, dest),
        Err(DecodeError::Format(FormatError::BadMagic(*b"CITY")))
    );

    for len in 0..20 {
        assert_eq!(
            codec::decode(&schema, &bytes[..len], &mut heap, config, dest),
            Err(DecodeError::Format(FormatError::Truncated("header"))),
            "prefix {len}"
        );
    }
    // Every shorter prefix loses part of the dictionary, the root span or
    // the host buffer, which is the last thing written.
    for len in 20..bytes.len() {
        assert!(
            codec::decode(&schema, &bytes[..len], &mut heap, config, dest).is_err(),
            "prefix {len}"
        );
    }
}

#[test]
fn test_corrupted_streams_never_panic() {
    let mut heap = Heap::new();
    let bytes = encode_config_v1(&mut heap);
    let (schema, config) = config_v1();
    let dest = heap.alloc(schema.ty(config).size);
    let mut rng = fastrand::Rng::with_seed(0x1C7);

    for _ in 0..2000 {
        let mut corrupted = bytes.clone();
        for _ in 0..rng.usize(1..4) {
            let i = rng.usize(4..corrupted.len());
            corrupted[i] = rng.u8(..);
        }
        let _ = codec::decode(&schema, &corrupted, &mut heap, config, dest);
    }

    for _ in 0..500 {
        let mut garbage = b"ICTY\x01\x00".to_vec();
        garbage.extend((0..rng.usize(0..96)).map(|_| rng.u8(..)));
        let _ = codec::decode(&schema, &garbage, &mut heap, config, dest);
    }
}
