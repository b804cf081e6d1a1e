// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use city::codec::{self, CityReader};
use city::memory::Heap;
use city::schema::{MemberDecl, Primitive, Schema, SchemaBuilder, TypeId};
use libfuzzer_sys::fuzz_target;
use std::sync::OnceLock;

/// Self-referencing record with a union, an array and a string, so that
/// every decode path is reachable from arbitrary input.
fn schema() -> &'static (Schema, TypeId) {
    static SCHEMA: OnceLock<(Schema, TypeId)> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        let mut b = SchemaBuilder::new();
        let u8_t = b.primitive(Primitive::U8);
        let i32_t = b.primitive(Primitive::I32);
        let f64_t = b.primitive(Primitive::F64);
        let name = b.string();
        let node = b.declare_record("Node");
        let next = b.pointer(node);
        let grid = b.array(i32_t, 4);
        let value = b
            .union(
                "Value",
                vec![
                    MemberDecl::new("int", i32_t).when("tag == 1"),
                    MemberDecl::new("real", f64_t).when("tag == 2"),
                ],
            )
            .expect("union");
        b.define(
            node,
            vec![
                MemberDecl::new("tag", u8_t),
                MemberDecl::new("value", value),
                MemberDecl::new("grid", grid),
                MemberDecl::new("name", name),
                MemberDecl::new("next", next),
            ],
        )
        .expect("node");
        (b.finish().expect("schema"), node)
    })
}

fuzz_target!(|data: &[u8]| {
    // Stream inspection alone
    if let Ok(reader) = CityReader::new(data) {
        let _ = reader.dictionary().to_string();
    }

    // Full decode into a fixed destination schema
    let (schema, node) = schema();
    let mut heap = Heap::new();
    let dest = heap.alloc(schema.ty(*node).size);
    let _ = codec::decode(schema, data, &mut heap, *node, dest);
});
