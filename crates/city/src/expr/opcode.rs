// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Instruction set of the expression VM and its pool encoding.
//!
//! A program is an 8-byte header followed by fixed-width instructions:
//!
//! ```text
//! header:      [count:u32][max_depth:u32]
//! instruction: [op:u8][a_tag:u8][b_tag:u8][reserved:u8][a_imm:u64][b_imm:u64]
//! ```
//!
//! Every instruction leaves its result in the accumulator `r0`. Operand
//! slots name where inputs come from: an immediate, the accumulator left by
//! the previous instruction, or the top of the operand stack.

use super::vm::Register;
use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

pub const HEADER_SIZE: usize = 8;
pub const INSTRUCTION_SIZE: usize = 20;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Control (0x00-0x0F) =====
    /// r0 = a
    Move = 0x00,
    /// push(a)
    Push = 0x01,
    /// stop, result is r0
    Return = 0x02,

    // ===== Loads (0x10-0x1F) =====
    /// r0 = zero-extended u8 at data[a]
    LoadU8 = 0x10,
    LoadU16 = 0x11,
    LoadU32 = 0x12,
    LoadU64 = 0x13,
    /// r0 = sign-extended i8 at data[a]
    LoadI8 = 0x14,
    LoadI16 = 0x15,
    LoadI32 = 0x16,
    /// r0 = f32 at data[a], widened to f64
    LoadF32 = 0x17,
    LoadF64 = 0x18,

    // ===== Integer arithmetic (0x20-0x27) =====
    /// r0 = a + b (wrapping)
    Add = 0x20,
    Sub = 0x21,
    Mul = 0x22,
    /// r0 = a / b, 0 when b == 0
    Div = 0x23,
    /// r0 = a % b, 0 when b == 0
    Rem = 0x24,
    /// r0 = -a
    Neg = 0x25,

    // ===== Float arithmetic (0x28-0x2F) =====
    FAdd = 0x28,
    FSub = 0x29,
    FMul = 0x2A,
    FDiv = 0x2B,
    FNeg = 0x2C,

    // ===== Bitwise (0x30-0x37) =====
    And = 0x30,
    Or = 0x31,
    Xor = 0x32,
    Shl = 0x33,
    /// arithmetic shift
    Shr = 0x34,
    BitNot = 0x35,

    // ===== Compare & logic (0x38-0x3F) =====
    /// less = a < b, equal = a == b (signed)
    Cmp = 0x38,
    /// less = a < b, equal = a == b (f64, unordered sets neither)
    FCmp = 0x39,
    /// r0 = less
    SetLt = 0x3A,
    /// r0 = equal
    SetEq = 0x3B,
    /// r0 = less || equal
    SetLe = 0x3C,
    /// r0 = a == 0
    Not = 0x3D,
    /// r0 = a != 0 && b != 0, both evaluated
    LogicalAnd = 0x3E,
    LogicalOr = 0x3F,

    // ===== Conversions (0x40-0x47) =====
    IntToFloat = 0x40,
    /// truncating, saturating
    FloatToInt = 0x41,

    // ===== Select (0x48) =====
    /// cond = pop(); r0 = if cond != 0 { b } else { a }
    Select = 0x48,
}

impl Opcode {
    const ALL: [Self; 40] = {
        use Opcode::*;
        [
            Move, Push, Return, LoadU8, LoadU16, LoadU32, LoadU64, LoadI8, LoadI16, LoadI32,
            LoadF32, LoadF64, Add, Sub, Mul, Div, Rem, Neg, FAdd, FSub, FMul, FDiv, FNeg, And,
            Or, Xor, Shl, Shr, BitNot, Cmp, FCmp, SetLt, SetEq, SetLe, Not, LogicalAnd,
            LogicalOr, IntToFloat, FloatToInt, Select,
        ]
    };

    pub fn from_u8(byte: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| *op as u8 == byte)
    }

    /// Number of operand slots the instruction reads.
    pub fn arity(self) -> usize {
        use Opcode::*;
        match self {
            Return | SetLt | SetEq | SetLe => 0,
            Move | Push | LoadU8 | LoadU16 | LoadU32 | LoadU64 | LoadI8 | LoadI16 | LoadI32
            | LoadF32 | LoadF64 | Neg | FNeg | BitNot | Not | IntToFloat | FloatToInt => 1,
            Add | Sub | Mul | Div | Rem | FAdd | FSub | FMul | FDiv | And | Or | Xor | Shl
            | Shr | Cmp | FCmp | LogicalAnd | LogicalOr | Select => 2,
        }
    }
}

/// Where an instruction operand comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    None,
    Imm(Register),
    /// Result of the previous instruction.
    Acc,
    /// Top of the operand stack.
    Pop,
}

impl Operand {
    fn tag(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Imm(_) => 1,
            Self::Acc => 2,
            Self::Pop => 3,
        }
    }

    fn imm(self) -> u64 {
        match self {
            Self::Imm(r) => r.bits(),
            _ => 0,
        }
    }

    fn decode(tag: u8, imm: u64) -> Option<Self> {
        match tag {
            0 => Some(Self::None),
            1 => Some(Self::Imm(Register::from_bits(imm))),
            2 => Some(Self::Acc),
            3 => Some(Self::Pop),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub op: Opcode,
    pub a: Operand,
    pub b: Operand,
}

impl Instruction {
    pub fn new(op: Opcode, a: Operand, b: Operand) -> Self {
        Self { op, a, b }
    }

    pub fn unary(op: Opcode, a: Operand) -> Self {
        Self::new(op, a, Operand::None)
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut buf = [0u8; INSTRUCTION_SIZE];
        buf[0] = self.op as u8;
        buf[1] = self.a.tag();
        buf[2] = self.b.tag();
        LittleEndian::write_u64(&mut buf[4..12], self.a.imm());
        LittleEndian::write_u64(&mut buf[12..20], self.b.imm());
        out.extend_from_slice(&buf);
    }

    /// `None` for an unknown opcode or operand tag.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let buf = buf.get(..INSTRUCTION_SIZE)?;
        Some(Self {
            op: Opcode::from_u8(buf[0])?,
            a: Operand::decode(buf[1], LittleEndian::read_u64(&buf[4..12]))?,
            b: Operand::decode(buf[2], LittleEndian::read_u64(&buf[12..20]))?,
        })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn operand(o: Operand) -> String {
            match o {
                Operand::None => String::new(),
                Operand::Imm(r) => format!("#{}", r.as_i64()),
                Operand::Acc => "acc".into(),
                Operand::Pop => "pop".into(),
            }
        }
        write!(f, "{:?}", self.op)?;
        match self.op.arity() {
            0 => Ok(()),
            1 => write!(f, " {}", operand(self.a)),
            _ => write!(f, " {}, {}", operand(self.a), operand(self.b)),
        }
    }
}

/// A compiled, linear program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub instructions: Vec<Instruction>,
    /// Deepest operand stack the program reaches.
    pub max_depth: usize,
}

impl Program {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + INSTRUCTION_SIZE * self.instructions.len());
        let mut header = [0u8; HEADER_SIZE];
        LittleEndian::write_u32(&mut header[0..4], self.instructions.len() as u32);
        LittleEndian::write_u32(&mut header[4..8], self.max_depth as u32);
        out.extend_from_slice(&header);
        for instr in &self.instructions {
            instr.encode(&mut out);
        }
        out
    }
}

/// Borrowed view of an encoded program.
#[derive(Debug, Clone, Copy)]
pub struct ProgramView<'a> {
    bytes: &'a [u8],
    count: usize,
}

impl<'a> ProgramView<'a> {
    /// `None` when the header is missing. Instructions past the end of
    /// `bytes` are ignored.
    pub fn new(bytes: &'a [u8]) -> Option<Self> {
        let header = bytes.get(..HEADER_SIZE)?;
        let declared = LittleEndian::read_u32(&header[0..4]) as usize;
        let available = (bytes.len() - HEADER_SIZE) / INSTRUCTION_SIZE;
        Some(Self {
            bytes,
            count: declared.min(available),
        })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn max_depth(&self) -> usize {
        LittleEndian::read_u32(&self.bytes[4..8]) as usize
    }

    pub fn get(&self, index: usize) -> Option<Instruction> {
        if index >= self.count {
            return None;
        }
        let at = HEADER_SIZE + index * INSTRUCTION_SIZE;
        Instruction::decode(&self.bytes[at..])
    }

    /// Stops at the first undecodable instruction.
    pub fn iter(&self) -> impl Iterator<Item = Instruction> + 'a {
        let view = *self;
        (0..view.count).map_while(move |i| view.get(i))
    }

    pub fn to_program(&self) -> Program {
        Program {
            instructions: self.iter().collect(),
            max_depth: self.max_depth(),
        }
    }
}
