// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typing and linearization of expression trees.

use super::lexer::{tokenize, Token};
use super::opcode::{Instruction, Opcode, Operand, Program};
use super::tree::{self, BinaryOp, NodeKind, Tree, UnaryOp, Value};
use super::vm::{run_program, Register, VM_STACK_CAPACITY};
use super::{CompileError, Scope};

/// Conversion applied to the final result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Coerce {
    /// Keep the natural result type.
    #[default]
    None,
    /// Truncate floats (`length`).
    Int,
    Float,
    /// 0 or 1 (`when`).
    Truth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ty {
    Int,
    Float,
}

/// Typed expression, one variant per instruction shape.
#[derive(Debug, Clone, PartialEq)]
enum Lowered {
    Const(Register),
    Load(Opcode, u64),
    Unary(Opcode, Box<Lowered>),
    Binary(Opcode, Box<Lowered>, Box<Lowered>),
    Select {
        cond: Box<Lowered>,
        then: Box<Lowered>,
        otherwise: Box<Lowered>,
    },
}

impl Lowered {
    fn unary(op: Opcode, a: Lowered) -> Self {
        fold(Self::Unary(op, Box::new(a)))
    }

    fn binary(op: Opcode, a: Lowered, b: Lowered) -> Self {
        fold(Self::Binary(op, Box::new(a), Box::new(b)))
    }

    fn constant(&self) -> Option<Register> {
        match self {
            Self::Const(v) => Some(*v),
            _ => None,
        }
    }

    fn operand(&self) -> Operand {
        match self {
            Self::Const(v) => Operand::Imm(*v),
            _ => Operand::Acc,
        }
    }
}

/// Evaluate constant subtrees at compile time with the VM itself.
fn fold(node: Lowered) -> Lowered {
    let foldable = match &node {
        Lowered::Unary(op, a) => match (op, a.as_ref()) {
            (_, Lowered::Const(_)) => true,
            (Opcode::SetLt | Opcode::SetEq | Opcode::SetLe, Lowered::Binary(_, l, r)) => {
                l.constant().is_some() && r.constant().is_some()
            }
            _ => false,
        },
        Lowered::Binary(op, a, b) => {
            !matches!(op, Opcode::Cmp | Opcode::FCmp)
                && a.constant().is_some()
                && b.constant().is_some()
        }
        _ => false,
    };
    if !foldable {
        return node;
    }
    match linearize(&node) {
        Ok(program) => Lowered::Const(run_program(&program, &[])),
        Err(_) => node,
    }
}

fn to_float(node: Lowered, ty: Ty) -> Lowered {
    match ty {
        Ty::Float => node,
        Ty::Int => Lowered::unary(Opcode::IntToFloat, node),
    }
}

fn to_int(node: Lowered, ty: Ty) -> Lowered {
    match ty {
        Ty::Int => node,
        Ty::Float => Lowered::unary(Opcode::FloatToInt, node),
    }
}

/// Integer that is non-zero exactly when `node` is.
fn truthy(node: Lowered, ty: Ty) -> Lowered {
    match ty {
        Ty::Int => node,
        Ty::Float => {
            let zero = Lowered::Const(Register::from_f64(0.0));
            let is_zero = Lowered::unary(Opcode::SetEq, Lowered::binary(Opcode::FCmp, node, zero));
            Lowered::unary(Opcode::Not, is_zero)
        }
    }
}

/// Bring both operands to a common type.
fn promote(l: (Lowered, Ty), r: (Lowered, Ty)) -> (Lowered, Lowered, Ty) {
    if l.1 == Ty::Float || r.1 == Ty::Float {
        (to_float(l.0, l.1), to_float(r.0, r.1), Ty::Float)
    } else {
        (l.0, r.0, Ty::Int)
    }
}

fn require_int(op: BinaryOp, l: &(Lowered, Ty), r: &(Lowered, Ty)) -> Result<(), CompileError> {
    if l.1 == Ty::Float || r.1 == Ty::Float {
        return Err(CompileError::IntegerRequired(op.symbol()));
    }
    Ok(())
}

struct Lowering<'t> {
    tree: &'t Tree,
}

impl Lowering<'_> {
    fn lower(&self, index: usize, level: u32) -> Result<(Lowered, Ty), CompileError> {
        if level > tree::MAX_NESTING {
            return Err(CompileError::TooComplex(tree::MAX_NESTING as usize));
        }
        let child = |slot: usize| -> Result<(Lowered, Ty), CompileError> {
            self.lower(self.tree.child(index, slot)?, level + 1)
        };

        let node = self.tree.node(index);
        let lowered = match &node.kind {
            NodeKind::Const(Value::Int(v)) => (Lowered::Const(Register::from_i64(*v)), Ty::Int),
            NodeKind::Const(Value::Float(v)) => {
                (Lowered::Const(Register::from_f64(*v)), Ty::Float)
            }
            NodeKind::Load(field) => {
                let load = field
                    .load
                    .ok_or_else(|| CompileError::NotLoadable(format!("@{}", field.offset)))?;
                let ty = if load.is_float() { Ty::Float } else { Ty::Int };
                (Lowered::Load(load.opcode(), field.offset), ty)
            }
            NodeKind::Unary(op) => {
                let (a, ty) = child(0)?;
                match (op, ty) {
                    (UnaryOp::Plus, _) => (a, ty),
                    (UnaryOp::Neg, Ty::Int) => (Lowered::unary(Opcode::Neg, a), Ty::Int),
                    (UnaryOp::Neg, Ty::Float) => (Lowered::unary(Opcode::FNeg, a), Ty::Float),
                    (UnaryOp::BitNot, Ty::Int) => (Lowered::unary(Opcode::BitNot, a), Ty::Int),
                    (UnaryOp::BitNot, Ty::Float) => return Err(CompileError::IntegerRequired("~")),
                    (UnaryOp::Not, _) => (Lowered::unary(Opcode::Not, truthy(a, ty)), Ty::Int),
                }
            }
            NodeKind::Binary(op) => self.binary(*op, child(0)?, child(1)?)?,
            NodeKind::Ternary { .. } => {
                let (cond, cond_ty) = child(0)?;
                let cond = truthy(cond, cond_ty);
                let (then, otherwise, ty) = promote(child(1)?, child(2)?);
                let lowered = match cond.constant() {
                    Some(c) if c.is_true() => then,
                    Some(_) => otherwise,
                    None => Lowered::Select {
                        cond: Box::new(cond),
                        then: Box::new(then),
                        otherwise: Box::new(otherwise),
                    },
                };
                (lowered, ty)
            }
        };
        Ok(lowered)
    }

    fn binary(
        &self,
        op: BinaryOp,
        l: (Lowered, Ty),
        r: (Lowered, Ty),
    ) -> Result<(Lowered, Ty), CompileError> {
        let arithmetic = |int_op: Opcode, float_op: Opcode| {
            let (a, b, ty) = promote(l.clone(), r.clone());
            let op = if ty == Ty::Float { float_op } else { int_op };
            (Lowered::binary(op, a, b), ty)
        };
        let integer = |int_op: Opcode| -> Result<(Lowered, Ty), CompileError> {
            require_int(op, &l, &r)?;
            Ok((Lowered::binary(int_op, l.0.clone(), r.0.clone()), Ty::Int))
        };
        let compare = |set: Opcode, swap: bool, negate: bool| {
            let (a, b, ty) = promote(l.clone(), r.clone());
            let cmp = if ty == Ty::Float { Opcode::FCmp } else { Opcode::Cmp };
            let (a, b) = if swap { (b, a) } else { (a, b) };
            let result = Lowered::unary(set, Lowered::binary(cmp, a, b));
            if negate {
                (Lowered::unary(Opcode::Not, result), Ty::Int)
            } else {
                (result, Ty::Int)
            }
        };

        Ok(match op {
            BinaryOp::Add => arithmetic(Opcode::Add, Opcode::FAdd),
            BinaryOp::Sub => arithmetic(Opcode::Sub, Opcode::FSub),
            BinaryOp::Mul => arithmetic(Opcode::Mul, Opcode::FMul),
            BinaryOp::Div => arithmetic(Opcode::Div, Opcode::FDiv),
            BinaryOp::Rem => integer(Opcode::Rem)?,
            BinaryOp::Shl => integer(Opcode::Shl)?,
            BinaryOp::Shr => integer(Opcode::Shr)?,
            BinaryOp::BitAnd => integer(Opcode::And)?,
            BinaryOp::BitXor => integer(Opcode::Xor)?,
            BinaryOp::BitOr => integer(Opcode::Or)?,
            BinaryOp::Lt => compare(Opcode::SetLt, false, false),
            BinaryOp::Le => compare(Opcode::SetLe, false, false),
            BinaryOp::Gt => compare(Opcode::SetLt, true, false),
            BinaryOp::Ge => compare(Opcode::SetLe, true, false),
            BinaryOp::Eq => compare(Opcode::SetEq, false, false),
            BinaryOp::Ne => compare(Opcode::SetEq, false, true),
            BinaryOp::And | BinaryOp::Or => {
                let opcode = if op == BinaryOp::And {
                    Opcode::LogicalAnd
                } else {
                    Opcode::LogicalOr
                };
                let a = truthy(l.0.clone(), l.1);
                let b = truthy(r.0.clone(), r.1);
                (Lowered::binary(opcode, a, b), Ty::Int)
            }
        })
    }
}

enum Work<'a> {
    Node(&'a Lowered, usize),
    /// Push that leaves `depth + 1` values on the stack.
    Push(Operand, usize),
}

/// Emit instructions back-to-front from an explicit work stack, then reverse.
fn linearize(root: &Lowered) -> Result<Program, CompileError> {
    let mut out = Vec::new();
    let mut max_depth = 0;
    let mut work = vec![Work::Node(root, 0)];

    while let Some(item) = work.pop() {
        let (node, depth) = match item {
            Work::Push(operand, depth) => {
                max_depth = max_depth.max(depth + 1);
                out.push(Instruction::unary(Opcode::Push, operand));
                continue;
            }
            Work::Node(node, depth) => (node, depth),
        };
        match node {
            Lowered::Const(v) => out.push(Instruction::unary(Opcode::Move, Operand::Imm(*v))),
            Lowered::Load(op, offset) => out.push(Instruction::unary(
                *op,
                Operand::Imm(Register::from_bits(*offset)),
            )),
            Lowered::Unary(op, a) => {
                let operand = if op.arity() == 0 {
                    Operand::None
                } else {
                    a.operand()
                };
                out.push(Instruction::unary(*op, operand));
                if a.constant().is_none() {
                    work.push(Work::Node(a, depth));
                }
            }
            Lowered::Binary(op, l, r) => match (l.constant(), r.constant()) {
                (Some(_), Some(_)) => out.push(Instruction::new(*op, l.operand(), r.operand())),
                (Some(_), None) => {
                    out.push(Instruction::new(*op, l.operand(), Operand::Acc));
                    work.push(Work::Node(r, depth));
                }
                (None, Some(_)) => {
                    out.push(Instruction::new(*op, Operand::Acc, r.operand()));
                    work.push(Work::Node(l, depth));
                }
                (None, None) => {
                    out.push(Instruction::new(*op, Operand::Pop, Operand::Acc));
                    work.push(Work::Node(l, depth));
                    work.push(Work::Push(Operand::Acc, depth));
                    work.push(Work::Node(r, depth + 1));
                }
            },
            Lowered::Select {
                cond,
                then,
                otherwise,
            } => {
                let else_pushed = otherwise.constant().is_none();
                let a = if else_pushed {
                    Operand::Pop
                } else {
                    otherwise.operand()
                };
                out.push(Instruction::new(Opcode::Select, a, then.operand()));

                match cond.constant() {
                    Some(_) => work.push(Work::Push(cond.operand(), depth)),
                    None => {
                        work.push(Work::Node(cond, depth));
                        work.push(Work::Push(Operand::Acc, depth));
                    }
                }
                if else_pushed {
                    work.push(Work::Node(otherwise, depth + 1));
                    work.push(Work::Push(Operand::Acc, depth + 1));
                }
                if then.constant().is_none() {
                    work.push(Work::Node(then, depth + 1 + usize::from(else_pushed)));
                }
            }
        }
    }

    if max_depth > VM_STACK_CAPACITY {
        return Err(CompileError::StackOverflow {
            depth: max_depth,
            capacity: VM_STACK_CAPACITY,
        });
    }
    out.reverse();
    out.push(Instruction::new(Opcode::Return, Operand::None, Operand::None));
    Ok(Program {
        instructions: out,
        max_depth,
    })
}

/// Compile a token list.
pub fn compile<S: Scope + ?Sized>(
    tokens: &[Token],
    scope: &S,
    coerce: Coerce,
) -> Result<Program, CompileError> {
    let tree = tree::build(tokens, scope)?;
    let (lowered, ty) = Lowering { tree: &tree }.lower(tree.root(), 0)?;
    let lowered = match coerce {
        Coerce::None => lowered,
        Coerce::Int => to_int(lowered, ty),
        Coerce::Float => to_float(lowered, ty),
        Coerce::Truth => Lowered::unary(Opcode::Not, Lowered::unary(Opcode::Not, truthy(lowered, ty))),
    };
    linearize(&lowered)
}

/// Compile `source` into the encoded form stored in the value pool.
pub fn compile_expression<S: Scope + ?Sized>(
    source: &str,
    scope: &S,
    coerce: Coerce,
) -> Result<Vec<u8>, CompileError> {
    let tokens = tokenize(source)?;
    let program = compile(&tokens, scope, coerce)?;
    log::trace!(
        "[city::expr] compiled '{}' into {} instructions (stack {})",
        source,
        program.instructions.len(),
        program.max_depth
    );
    Ok(program.encode())
}
