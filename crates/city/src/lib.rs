// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # City - runtime reflection and a self-describing binary codec
//!
//! Records, unions, enumerations, arrays, pointers and scalars are described
//! by a [`Schema`]. Members carry attributes (`id`, `default`, `alias`,
//! `length`, `when`, ...) whose payloads live in the schema's value pool.
//! On top of that:
//!
//! - attribute queries ([`attr`]),
//! - a small expression compiler and stack VM used by `length` and `when`
//!   ([`expr`]),
//! - the City binary format ([`codec`]), which tolerates schema changes
//!   between encode and decode.
//!
//! ## Quick Start
//!
//! ```rust
//! use city::codec;
//! use city::memory::Heap;
//! use city::schema::{Literal, MemberDecl, Primitive, SchemaBuilder};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut builder = SchemaBuilder::new();
//! let u32_t = builder.primitive(Primitive::U32);
//! let name_t = builder.string();
//! let sensor = builder.record(
//!     "Sensor",
//!     vec![
//!         MemberDecl::new("id", u32_t),
//!         MemberDecl::new("name", name_t),
//!         MemberDecl::new("rate", u32_t).default(Literal::Int(10)),
//!     ],
//! )?;
//! let schema = builder.finish()?;
//!
//! let mut heap = Heap::new();
//! let value = heap.alloc(schema.ty(sensor).size);
//! let name = heap.alloc_str("lidar");
//! heap.write_u32(value, 7)?;
//! heap.write_pointer(value.add(8), Some(name))?;
//!
//! let bytes = codec::encode(&schema, &heap, sensor, value)?;
//!
//! let copy = heap.alloc(schema.ty(sensor).size);
//! codec::decode(&schema, &bytes, &mut heap, sensor, copy)?;
//! assert_eq!(heap.read_u32(copy)?, 7);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules Overview
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`schema`] | Type graph, builder and layout |
//! | [`attr`] | Attribute ids, sets, registry and queries |
//! | [`expr`] | Lexer, compiler and VM for attribute expressions |
//! | [`memory`] | Arena heap the codec reads from and decodes into |
//! | [`codec`] | City encoder, decoder and stream inspection |

/// Attribute ids, typed keys, value pool and lookups.
pub mod attr;
/// City binary encoding and decoding.
pub mod codec;
/// Attribute expression compiler and virtual machine.
pub mod expr;
/// Arena heap and addresses of live values.
pub mod memory;
/// Type graph and schema builder.
pub mod schema;

pub use attr::{
    attribute_float, attribute_int, attribute_length, attribute_str, attribute_strings,
    attribute_value, has_attribute, AttributeId, AttributeSet,
};
pub use codec::{
    decode, decode_with, encode, encode_with, CityConfig, CityReader, CityWriter, DecodeError,
    EncodeError, FormatError,
};
pub use expr::{compile_expression, run_expression, tokenize, CompileError};
pub use memory::{Address, Heap};
pub use schema::{Schema, SchemaBuilder, TypeId};
