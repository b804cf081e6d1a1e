// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! City binary codec.
//!
//! A stream is a 20-byte [`CityHeader`], a type dictionary describing every
//! type reachable from the root record, and a data section holding the
//! packed root value, member names and pointer buffers:
//!
//! ```text
//! +--------+------------------+---------------------------------------+
//! | header | type dictionary  | root span | names | pointer buffers   |
//! +--------+------------------+---------------------------------------+
//!                             ^ data_ptr
//! ```
//!
//! Members are matched by name (or alias, or `id`) on decode, so records
//! can gain, lose, reorder and rename members between encode and decode.
//!
//! A union is packed as a `u16` discriminant followed by the selected
//! member. The discriminant is the member's declaration index plus one;
//! `0` means no member was selected and the value bytes stay zero.

mod config;
mod decoder;
mod dictionary;
mod encoder;
mod error;
mod header;
mod packed;

pub use config::{CityConfig, DEFAULT_MAX_DEPTH};
pub use decoder::CityReader;
pub use dictionary::{Dictionary, Entry, EntryKind, EntryMember, MemberKey, MEMBER_ID_FLAG};
pub use error::{ConfigError, DecodeError, EncodeError, FormatError};
pub use header::{CityHeader, MAGIC, VERSION_MAJOR, VERSION_MINOR};
pub use packed::CategoryCode;

use crate::memory::{Address, Heap};
use crate::schema::{Schema, TypeId};
use encoder::Encoder;
use std::io::Write;

/// Encode the record of type `root` at `addr` with the default
/// configuration.
pub fn encode(
    schema: &Schema,
    heap: &Heap,
    root: TypeId,
    addr: Address,
) -> Result<Vec<u8>, EncodeError> {
    encode_with(schema, heap, root, addr, &CityConfig::default())
}

pub fn encode_with(
    schema: &Schema,
    heap: &Heap,
    root: TypeId,
    addr: Address,
    config: &CityConfig,
) -> Result<Vec<u8>, EncodeError> {
    config.validate()?;
    Encoder::new(schema, heap, config).run(root, addr)
}

/// Decode `bytes` into the record of type `root` at `dest`. Pointer buffers
/// are allocated in `heap`.
pub fn decode(
    schema: &Schema,
    bytes: &[u8],
    heap: &mut Heap,
    root: TypeId,
    dest: Address,
) -> Result<(), DecodeError> {
    decode_with(schema, bytes, heap, root, dest, CityConfig::default())
}

pub fn decode_with(
    schema: &Schema,
    bytes: &[u8],
    heap: &mut Heap,
    root: TypeId,
    dest: Address,
    config: CityConfig,
) -> Result<(), DecodeError> {
    CityReader::with_config(bytes, config)?.decode_into(schema, heap, root, dest)
}

/// Encoder bound to a schema and a configuration.
#[derive(Debug, Clone)]
pub struct CityWriter<'a> {
    schema: &'a Schema,
    config: CityConfig,
}

impl<'a> CityWriter<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self {
            schema,
            config: CityConfig::default(),
        }
    }

    pub fn with_config(schema: &'a Schema, config: CityConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { schema, config })
    }

    pub fn config(&self) -> &CityConfig {
        &self.config
    }

    pub fn encode(&self, heap: &Heap, root: TypeId, addr: Address) -> Result<Vec<u8>, EncodeError> {
        Encoder::new(self.schema, heap, &self.config).run(root, addr)
    }

    /// Encode and write the whole stream to `out`. Returns the number of
    /// bytes written.
    pub fn write_to<W: Write>(
        &self,
        out: &mut W,
        heap: &Heap,
        root: TypeId,
        addr: Address,
    ) -> Result<usize, EncodeError> {
        let bytes = self.encode(heap, root, addr)?;
        out.write_all(&bytes)?;
        Ok(bytes.len())
    }
}
