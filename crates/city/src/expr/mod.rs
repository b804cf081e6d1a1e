// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Attribute expressions: C-like integer/float expressions evaluated against
//! the bytes of a record.
//!
//! Compilation runs in four passes:
//!
//! 1. [`tokenize`]: flat token list.
//! 2. tree building: operator-precedence insertion into the right spine of
//!    an arena tree, resolving identifiers through a [`Scope`] and folding
//!    `sizeof`.
//! 3. lowering: int/float typing, comparison and truth-value rewriting.
//! 4. linearizing: a stack-machine [`Program`] with at most
//!    [`VM_STACK_CAPACITY`] live operands.
//!
//! Programs are stored in the value pool and run by [`run_expression`].

mod compiler;
mod lexer;
mod opcode;
mod tree;
mod vm;

pub use compiler::{compile, compile_expression, Coerce};
pub use lexer::{tokenize, Token};
pub use opcode::{Instruction, Opcode, Operand, Program, ProgramView};
pub use vm::{run_expression, run_program, Register, Vm, VM_STACK_CAPACITY};

use thiserror::Error;

/// Width and interpretation of a member load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl LoadKind {
    pub fn opcode(self) -> Opcode {
        match self {
            Self::U8 => Opcode::LoadU8,
            Self::U16 => Opcode::LoadU16,
            Self::U32 => Opcode::LoadU32,
            Self::U64 | Self::I64 => Opcode::LoadU64,
            Self::I8 => Opcode::LoadI8,
            Self::I16 => Opcode::LoadI16,
            Self::I32 => Opcode::LoadI32,
            Self::F32 => Opcode::LoadF32,
            Self::F64 => Opcode::LoadF64,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }
}

/// A member reachable from the context record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// Byte offset from the start of the context record.
    pub offset: u64,
    /// `None` for members that cannot be loaded (records, arrays).
    pub load: Option<LoadKind>,
    pub size: usize,
}

/// Name resolution for identifiers.
pub trait Scope {
    /// Member at a dotted path (`["header", "len"]`).
    fn field(&self, path: &[&str]) -> Option<Field>;

    /// Named integer constant (enumeration value).
    fn constant(&self, name: &str) -> Option<i64>;

    /// Size of a named type, for `sizeof(Type)`.
    fn size_of(&self, name: &str) -> Option<usize>;
}

/// Scope with no members, constants or types.
impl Scope for () {
    fn field(&self, _path: &[&str]) -> Option<Field> {
        None
    }

    fn constant(&self, _name: &str) -> Option<i64> {
        None
    }

    fn size_of(&self, _name: &str) -> Option<usize> {
        None
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    #[error("invalid token '{text}' at offset {offset}")]
    InvalidToken { offset: usize, text: String },

    #[error("unexpected {0}")]
    UnexpectedToken(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("empty expression")]
    Empty,

    #[error("unbalanced parentheses")]
    UnbalancedParens,

    #[error("'?' without matching ':'")]
    MissingElse,

    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("'{0}' cannot be used as a value")]
    NotLoadable(String),

    #[error("string literal outside sizeof")]
    StringOperand,

    #[error("operator '{0}' requires integer operands")]
    IntegerRequired(&'static str),

    #[error("expression nests deeper than {0} levels")]
    TooComplex(usize),

    #[error("expression needs {depth} stack slots, VM has {capacity}")]
    StackOverflow { depth: usize, capacity: usize },
}
