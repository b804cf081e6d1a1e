// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Category codes and packed sizes of the City data section.

use crate::schema::{Category, Schema, Type, TypeId, TypeKind};
use byteorder::{ByteOrder, LittleEndian};

/// One-byte category tag of a dictionary entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CategoryCode {
    U8 = 0x01,
    U16 = 0x02,
    U32 = 0x03,
    U64 = 0x04,
    I8 = 0x05,
    I16 = 0x06,
    I32 = 0x07,
    I64 = 0x08,
    F32 = 0x09,
    F64 = 0x0A,
    F128 = 0x0B,
    Array = 0x10,
    Pointer = 0x11,
    Enum = 0x12,
    Record = 0x13,
    Union = 0x14,
}

impl CategoryCode {
    pub fn from_u8(code: u8) -> Option<Self> {
        let code = match code {
            0x01 => Self::U8,
            0x02 => Self::U16,
            0x03 => Self::U32,
            0x04 => Self::U64,
            0x05 => Self::I8,
            0x06 => Self::I16,
            0x07 => Self::I32,
            0x08 => Self::I64,
            0x09 => Self::F32,
            0x0A => Self::F64,
            0x0B => Self::F128,
            0x10 => Self::Array,
            0x11 => Self::Pointer,
            0x12 => Self::Enum,
            0x13 => Self::Record,
            0x14 => Self::Union,
            _ => return None,
        };
        Some(code)
    }

    /// Code for a schema type; `None` for functions and unusual widths.
    pub fn for_type(ty: &Type) -> Option<Self> {
        let code = match (&ty.kind, ty.size) {
            (TypeKind::Unsigned, 1) => Self::U8,
            (TypeKind::Unsigned, 2) => Self::U16,
            (TypeKind::Unsigned, 4) => Self::U32,
            (TypeKind::Unsigned, 8) => Self::U64,
            (TypeKind::Signed, 1) => Self::I8,
            (TypeKind::Signed, 2) => Self::I16,
            (TypeKind::Signed, 4) => Self::I32,
            (TypeKind::Signed, 8) => Self::I64,
            (TypeKind::Float, 4) => Self::F32,
            (TypeKind::Float, 8) => Self::F64,
            (TypeKind::Float, 16) => Self::F128,
            (TypeKind::Array { .. }, _) => Self::Array,
            (TypeKind::Pointer { .. }, _) => Self::Pointer,
            (TypeKind::Enum { .. }, _) => Self::Enum,
            (TypeKind::Record { .. }, _) => Self::Record,
            (TypeKind::Union { .. }, _) => Self::Union,
            _ => return None,
        };
        Some(code)
    }

    /// Width of integer and float codes.
    pub fn scalar_size(self) -> Option<usize> {
        match self {
            Self::U8 | Self::I8 => Some(1),
            Self::U16 | Self::I16 => Some(2),
            Self::U32 | Self::I32 | Self::F32 => Some(4),
            Self::U64 | Self::I64 | Self::F64 => Some(8),
            Self::F128 => Some(16),
            _ => None,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32 | Self::I64)
    }

    pub fn category(self) -> Category {
        match self {
            Self::U8
            | Self::U16
            | Self::U32
            | Self::U64
            | Self::I8
            | Self::I16
            | Self::I32
            | Self::I64 => Category::Integer,
            Self::F32 | Self::F64 | Self::F128 => Category::Float,
            Self::Array => Category::Array,
            Self::Pointer => Category::Pointer,
            Self::Enum => Category::Enum,
            Self::Record => Category::Record,
            Self::Union => Category::Union,
        }
    }
}

/// Size of the union discriminant preceding the selected member.
pub const DISCRIMINANT_SIZE: usize = 2;

/// Size of the element count preceding a pointer buffer.
pub const COUNT_SIZE: usize = 4;

/// Memoized packed sizes of schema types.
#[derive(Debug)]
pub(crate) struct PackedSizes {
    memo: Vec<Option<usize>>,
    pointer_width: usize,
}

impl PackedSizes {
    pub fn new(schema: &Schema, pointer_width: usize) -> Self {
        Self {
            memo: vec![None; schema.len()],
            pointer_width,
        }
    }

    pub fn get(&mut self, schema: &Schema, id: TypeId) -> usize {
        if let Some(size) = self.memo[id.index()] {
            return size;
        }
        let ty = schema.ty(id);
        let size = match &ty.kind {
            TypeKind::Record { members } => members
                .iter()
                .fold(0usize, |acc, m| acc.saturating_add(self.get(schema, m.ty))),
            TypeKind::Union { members } => members
                .iter()
                .map(|m| self.get(schema, m.ty))
                .max()
                .unwrap_or(0)
                .saturating_add(DISCRIMINANT_SIZE),
            TypeKind::Array { element, count } => self.get(schema, *element).saturating_mul(*count),
            TypeKind::Pointer { .. } => self.pointer_width,
            TypeKind::Function | TypeKind::Variadic => 0,
            TypeKind::Unsigned | TypeKind::Signed | TypeKind::Float | TypeKind::Enum { .. } => {
                ty.size
            }
        };
        self.memo[id.index()] = Some(size);
        size
    }
}

/// Store the low `out.len()` bytes of `value`.
pub(crate) fn put_uint(out: &mut [u8], value: u64) {
    let n = out.len().min(8);
    out[..n].copy_from_slice(&value.to_le_bytes()[..n]);
}

/// Little-endian unsigned value of 1 to 8 bytes.
pub(crate) fn get_uint(data: &[u8]) -> u64 {
    match data.len() {
        0 => 0,
        n => LittleEndian::read_uint(data, n.min(8)),
    }
}

/// Little-endian sign-extended value of 1 to 8 bytes.
pub(crate) fn get_int(data: &[u8]) -> i64 {
    match data.len() {
        0 => 0,
        n => LittleEndian::read_int(data, n.min(8)),
    }
}
