// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Codec error types.

use super::header::{VERSION_MAJOR, VERSION_MINOR};
use crate::memory::MemoryError;
use crate::schema::Category;
use thiserror::Error;

/// Malformed stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("stream truncated in {0}")]
    Truncated(&'static str),

    #[error("invalid magic: expected ICTY, got {0:?}")]
    BadMagic([u8; 4]),

    #[error("invalid size info byte {0:#04x}")]
    BadSizeInfo(u8),

    #[error("type {index}: invalid category code {code:#04x}")]
    InvalidCategory { index: u32, code: u8 },

    #[error("type {index} references type {reference} out of order")]
    TypeIdOutOfRange { index: u32, reference: u32 },

    #[error("type id {0} is not in the dictionary")]
    UnknownTypeId(u32),

    #[error("{len} bytes at data offset {offset} are out of range")]
    OutOfRange { offset: u64, len: u64 },

    #[error("invalid member name at data offset {offset}")]
    InvalidName { offset: u64 },

    #[error("union discriminant {value} at data offset {offset} selects no member")]
    InvalidDiscriminant { offset: u64, value: u16 },

    #[error("root type is not a record")]
    RootNotRecord,

    #[error("packed size overflow")]
    SizeOverflow,

    #[error("nesting deeper than {0} levels")]
    TooDeep(usize),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("type id width must be 1, 2 or 4 bytes, got {0}")]
    TypeIdWidth(u8),

    #[error("pointer width must be 2, 4 or 8 bytes, got {0}")]
    PointerWidth(u8),

    #[error("max_depth must be at least 1")]
    MaxDepth,
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("member {index} of '{owner}' has neither a name nor an id")]
    UnnamedMember { owner: String, index: usize },

    #[error("root type '{0}' is not a record")]
    RootNotRecord(String),

    #[error("type '{0}' cannot be serialized")]
    Unsupported(String),

    #[error(transparent)]
    InvalidAddress(#[from] MemoryError),

    #[error("{count} types do not fit {width}-byte type ids")]
    TooManyTypes { count: u64, width: u8 },

    #[error("offset {offset} does not fit {width} bytes")]
    OffsetOverflow { offset: u64, width: u8 },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(
        "unsupported stream version {major}.{minor}, decoder reads {}.{}",
        VERSION_MAJOR,
        VERSION_MINOR
    )]
    VersionMismatch { major: u16, minor: u16 },

    #[error("field '{field}': expected {expected}, stream has {found}")]
    SchemaMismatch {
        field: String,
        expected: Category,
        found: Category,
    },

    #[error("field '{field}': cannot decode {what}")]
    Unsupported { field: String, what: String },

    #[error("destination type '{0}' is not a record")]
    RootNotRecord(String),

    #[error(transparent)]
    InvalidAddress(#[from] MemoryError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Heap;

    #[test]
    fn test_decode_error_from_heap_fault() {
        let mut heap = Heap::new();
        let addr = heap.alloc(2);
        let fault = heap.bytes(addr, 4).expect_err("out of block");

        let err = DecodeError::from(fault.clone());
        assert_eq!(err.clone(), DecodeError::InvalidAddress(fault));
        assert_eq!(err.to_string(), format!("invalid address {:?} for 4 bytes", addr));
    }
}
