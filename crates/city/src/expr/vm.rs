// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Straight-line interpreter for compiled expressions.
//!
//! There are no jumps: a program runs each instruction at most once and
//! stops at `Return` or after its declared instruction count. Malformed
//! programs (stack underflow, unknown opcodes) produce an unspecified value
//! but never panic.

use super::opcode::{Instruction, Opcode, Operand, Program, ProgramView};
use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

/// Operand stack capacity; the compiler rejects deeper programs.
pub const VM_STACK_CAPACITY: usize = 16;

/// 64-bit VM register, read as `i64` or `f64` depending on the instruction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Register(u64);

impl Register {
    pub const ZERO: Self = Self(0);

    pub const fn from_i64(value: i64) -> Self {
        Self(value as u64)
    }

    pub fn from_f64(value: f64) -> Self {
        Self(value.to_bits())
    }

    pub const fn from_bool(value: bool) -> Self {
        Self(value as u64)
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn as_i64(self) -> i64 {
        self.0 as i64
    }

    pub fn as_f64(self) -> f64 {
        f64::from_bits(self.0)
    }

    pub const fn is_true(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Debug for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Register({:#x})", self.0)
    }
}

/// Machine state for one evaluation.
#[derive(Debug, Default)]
pub struct Vm {
    stack: [Register; VM_STACK_CAPACITY],
    sp: usize,
    /// Newest operand and result.
    r0: Register,
    /// Older operand of binary instructions.
    r1: Register,
    less: bool,
    equal: bool,
}

impl Vm {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, value: Register) {
        if self.sp < VM_STACK_CAPACITY {
            self.stack[self.sp] = value;
            self.sp += 1;
        }
    }

    fn pop(&mut self) -> Register {
        if self.sp == 0 {
            return Register::ZERO;
        }
        self.sp -= 1;
        self.stack[self.sp]
    }

    fn fetch(&mut self, operand: Operand, acc: Register) -> Register {
        match operand {
            Operand::None => Register::ZERO,
            Operand::Imm(value) => value,
            Operand::Acc => acc,
            Operand::Pop => self.pop(),
        }
    }

    /// Execute one instruction. Returns `false` on `Return`.
    pub fn step(&mut self, instr: Instruction, data: &[u8]) -> bool {
        let acc = self.r0;
        match instr.op.arity() {
            0 => {}
            1 => self.r0 = self.fetch(instr.a, acc),
            _ => {
                self.r1 = self.fetch(instr.a, acc);
                self.r0 = self.fetch(instr.b, acc);
            }
        }

        let (a, b) = (self.r1, self.r0);
        let int = |f: fn(i64, i64) -> i64| Register::from_i64(f(a.as_i64(), b.as_i64()));
        let float = |f: fn(f64, f64) -> f64| Register::from_f64(f(a.as_f64(), b.as_f64()));

        self.r0 = match instr.op {
            Opcode::Return => return false,
            Opcode::Move => self.r0,
            Opcode::Push => {
                self.push(self.r0);
                self.r0
            }

            Opcode::LoadU8 => load(data, b, 1, |s| s[0] as i64),
            Opcode::LoadU16 => load(data, b, 2, |s| LittleEndian::read_u16(s) as i64),
            Opcode::LoadU32 => load(data, b, 4, |s| LittleEndian::read_u32(s) as i64),
            Opcode::LoadU64 => load(data, b, 8, LittleEndian::read_i64),
            Opcode::LoadI8 => load(data, b, 1, |s| s[0] as i8 as i64),
            Opcode::LoadI16 => load(data, b, 2, |s| LittleEndian::read_i16(s) as i64),
            Opcode::LoadI32 => load(data, b, 4, |s| LittleEndian::read_i32(s) as i64),
            Opcode::LoadF32 => Register::from_f64(load_f(data, b, 4, |s| {
                LittleEndian::read_f32(s) as f64
            })),
            Opcode::LoadF64 => Register::from_f64(load_f(data, b, 8, LittleEndian::read_f64)),

            Opcode::Add => int(i64::wrapping_add),
            Opcode::Sub => int(i64::wrapping_sub),
            Opcode::Mul => int(i64::wrapping_mul),
            Opcode::Div => int(|x, y| if y == 0 { 0 } else { x.wrapping_div(y) }),
            Opcode::Rem => int(|x, y| if y == 0 { 0 } else { x.wrapping_rem(y) }),
            Opcode::Neg => Register::from_i64(b.as_i64().wrapping_neg()),

            Opcode::FAdd => float(|x, y| x + y),
            Opcode::FSub => float(|x, y| x - y),
            Opcode::FMul => float(|x, y| x * y),
            Opcode::FDiv => float(|x, y| x / y),
            Opcode::FNeg => Register::from_f64(-b.as_f64()),

            Opcode::And => int(|x, y| x & y),
            Opcode::Or => int(|x, y| x | y),
            Opcode::Xor => int(|x, y| x ^ y),
            Opcode::Shl => int(|x, y| x.wrapping_shl(y as u32)),
            Opcode::Shr => int(|x, y| x.wrapping_shr(y as u32)),
            Opcode::BitNot => Register::from_i64(!b.as_i64()),

            Opcode::Cmp => {
                self.less = a.as_i64() < b.as_i64();
                self.equal = a.as_i64() == b.as_i64();
                self.r0
            }
            Opcode::FCmp => {
                self.less = a.as_f64() < b.as_f64();
                self.equal = a.as_f64() == b.as_f64();
                self.r0
            }
            Opcode::SetLt => Register::from_bool(self.less),
            Opcode::SetEq => Register::from_bool(self.equal),
            Opcode::SetLe => Register::from_bool(self.less || self.equal),
            Opcode::Not => Register::from_bool(!b.is_true()),
            Opcode::LogicalAnd => Register::from_bool(a.is_true() && b.is_true()),
            Opcode::LogicalOr => Register::from_bool(a.is_true() || b.is_true()),

            Opcode::IntToFloat => Register::from_f64(b.as_i64() as f64),
            Opcode::FloatToInt => Register::from_i64(b.as_f64() as i64),

            Opcode::Select => {
                let cond = self.pop();
                if cond.is_true() {
                    b
                } else {
                    a
                }
            }
        };
        true
    }

    /// Run instructions against `data` until `Return` or the end.
    pub fn run(&mut self, program: impl IntoIterator<Item = Instruction>, data: &[u8]) -> Register {
        for instr in program {
            if !self.step(instr, data) {
                break;
            }
        }
        self.r0
    }
}

fn load(data: &[u8], addr: Register, width: usize, read: impl Fn(&[u8]) -> i64) -> Register {
    Register::from_i64(read(&window(data, addr, width)))
}

fn load_f(data: &[u8], addr: Register, width: usize, read: impl Fn(&[u8]) -> f64) -> f64 {
    read(&window(data, addr, width))
}

/// `width` bytes at `addr`, bytes past the end of `data` read as zero.
fn window(data: &[u8], addr: Register, width: usize) -> [u8; 8] {
    let mut buf = [0u8; 8];
    let start = usize::try_from(addr.bits()).unwrap_or(usize::MAX);
    if start < data.len() {
        let end = data.len().min(start.saturating_add(width));
        buf[..end - start].copy_from_slice(&data[start..end]);
    }
    buf
}

/// Evaluate an encoded program against the bytes of its context record.
pub fn run_expression(program: &[u8], data: &[u8]) -> Register {
    match ProgramView::new(program) {
        Some(view) => Vm::new().run(view.iter(), data),
        None => Register::ZERO,
    }
}

pub fn run_program(program: &Program, data: &[u8]) -> Register {
    Vm::new().run(program.instructions.iter().copied(), data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn imm(v: i64) -> Operand {
        Operand::Imm(Register::from_i64(v))
    }

    fn program(instructions: Vec<Instruction>) -> Program {
        Program {
            instructions,
            max_depth: VM_STACK_CAPACITY,
        }
    }

    #[test]
    fn test_loads_are_little_endian_and_sign_aware() {
        let data = [0xFE, 0xFF, 0x01, 0x00];
        let u16_load = program(vec![Instruction::unary(Opcode::LoadU16, imm(0))]);
        let i16_load = program(vec![Instruction::unary(Opcode::LoadI16, imm(0))]);
        assert_eq!(run_program(&u16_load, &data).as_i64(), 0xFFFE);
        assert_eq!(run_program(&i16_load, &data).as_i64(), -2);
    }

    #[test]
    fn test_loads_past_end_read_zero() {
        let data = [0x01, 0x02];
        let partial = program(vec![Instruction::unary(Opcode::LoadU32, imm(1))]);
        let outside = program(vec![Instruction::unary(Opcode::LoadU64, imm(64))]);
        assert_eq!(run_program(&partial, &data).as_i64(), 0x02);
        assert_eq!(run_program(&outside, &data).as_i64(), 0);
        let huge = program(vec![Instruction::unary(Opcode::LoadU8, imm(-1))]);
        assert_eq!(run_program(&huge, &data).as_i64(), 0);
    }

    #[test]
    fn test_division_by_zero_yields_zero() {
        let div = program(vec![Instruction::new(Opcode::Div, imm(7), imm(0))]);
        let rem = program(vec![Instruction::new(Opcode::Rem, imm(7), imm(0))]);
        assert_eq!(run_program(&div, &[]).as_i64(), 0);
        assert_eq!(run_program(&rem, &[]).as_i64(), 0);
    }

    #[test]
    fn test_stack_and_select() {
        // (1 + 2) then select on a pushed condition
        let prog = program(vec![
            Instruction::unary(Opcode::Push, imm(0)),
            Instruction::new(Opcode::Add, imm(1), imm(2)),
            Instruction::unary(Opcode::Push, Operand::Acc),
            Instruction::new(Opcode::Mul, imm(5), imm(5)),
            Instruction::new(Opcode::Select, Operand::Pop, Operand::Acc),
        ]);
        assert_eq!(run_program(&prog, &[]).as_i64(), 3);
    }

    #[test]
    fn test_malformed_programs_do_not_panic() {
        let underflow = program(vec![
            Instruction::new(Opcode::Sub, Operand::Pop, Operand::Pop),
            Instruction::new(Opcode::Select, Operand::Pop, Operand::Pop),
        ]);
        assert_eq!(run_program(&underflow, &[]).as_i64(), 0);

        let overflow = program(vec![Instruction::unary(Opcode::Push, imm(1)); 40]);
        assert_eq!(run_program(&overflow, &[]).as_i64(), 1);

        assert_eq!(run_expression(&[1, 2, 3], &[]), Register::ZERO);
    }

    #[test]
    fn test_float_compare_sets_flags() {
        let lt = program(vec![
            Instruction::new(
                Opcode::FCmp,
                Operand::Imm(Register::from_f64(1.5)),
                Operand::Imm(Register::from_f64(2.0)),
            ),
            Instruction::new(Opcode::SetLt, Operand::None, Operand::None),
        ]);
        assert_eq!(run_program(&lt, &[]).as_i64(), 1);

        let nan = program(vec![
            Instruction::new(
                Opcode::FCmp,
                Operand::Imm(Register::from_f64(f64::NAN)),
                Operand::Imm(Register::from_f64(0.0)),
            ),
            Instruction::new(Opcode::SetLe, Operand::None, Operand::None),
        ]);
        assert_eq!(run_program(&nan, &[]).as_i64(), 0);
    }
}
