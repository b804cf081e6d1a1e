// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Expression tree built by priority insertion into the right spine.
//!
//! Every operator node gets `priority = depth * LEVELS + precedence`, where
//! `depth` counts open parentheses and open ternary "then" branches. A new
//! binary operator walks down the right spine past every node of lower
//! priority and adopts the subtree it stops at as its left operand. Operands
//! fill the single open slot at the bottom of the spine. No backtracking.

use super::lexer::Token;
use super::{CompileError, Field, Scope};

/// Priority levels per nesting depth.
const LEVELS: u32 = 16;
const UNARY: u32 = 11;
const TERNARY: u32 = 0;
const LEAF: u32 = u32::MAX;

/// Parenthesis / ternary nesting limit.
pub(crate) const MAX_NESTING: u32 = 256;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Value {
    Int(i64),
    Float(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Neg,
    Plus,
    BitNot,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    And,
    Or,
}

impl BinaryOp {
    fn from_token(token: &Token) -> Option<Self> {
        Some(match token {
            Token::Star => Self::Mul,
            Token::Slash => Self::Div,
            Token::Percent => Self::Rem,
            Token::Plus => Self::Add,
            Token::Minus => Self::Sub,
            Token::Shl => Self::Shl,
            Token::Shr => Self::Shr,
            Token::Lt => Self::Lt,
            Token::Le => Self::Le,
            Token::Gt => Self::Gt,
            Token::Ge => Self::Ge,
            Token::EqEq => Self::Eq,
            Token::NotEq => Self::Ne,
            Token::Amp => Self::BitAnd,
            Token::Caret => Self::BitXor,
            Token::Pipe => Self::BitOr,
            Token::AndAnd => Self::And,
            Token::OrOr => Self::Or,
            _ => return None,
        })
    }

    fn precedence(self) -> u32 {
        match self {
            Self::Mul | Self::Div | Self::Rem => 10,
            Self::Add | Self::Sub => 9,
            Self::Shl | Self::Shr => 8,
            Self::Lt | Self::Le | Self::Gt | Self::Ge => 7,
            Self::Eq | Self::Ne => 6,
            Self::BitAnd => 5,
            Self::BitXor => 4,
            Self::BitOr => 3,
            Self::And => 2,
            Self::Or => 1,
        }
    }

    pub(crate) fn symbol(self) -> &'static str {
        match self {
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::BitAnd => "&",
            Self::BitXor => "^",
            Self::BitOr => "|",
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum NodeKind {
    Const(Value),
    Load(Field),
    Unary(UnaryOp),
    Binary(BinaryOp),
    /// children: condition, then, else
    Ternary { in_else: bool, depth: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Node {
    pub kind: NodeKind,
    priority: u32,
    pub children: [Option<usize>; 3],
}

impl Node {
    /// Slot continuing the right spine.
    fn right_slot(&self) -> Option<usize> {
        match self.kind {
            NodeKind::Const(_) | NodeKind::Load(_) => None,
            NodeKind::Unary(_) => Some(0),
            NodeKind::Binary(_) => Some(1),
            NodeKind::Ternary { in_else, .. } => Some(if in_else { 2 } else { 1 }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Tree {
    nodes: Vec<Node>,
    root: usize,
}

impl Tree {
    pub fn root(&self) -> usize {
        self.root
    }

    pub fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    /// Child in `slot`; always present once the tree is complete.
    pub fn child(&self, index: usize, slot: usize) -> Result<usize, CompileError> {
        self.nodes[index].children[slot].ok_or(CompileError::UnexpectedEnd)
    }
}

struct Builder<'s, S: Scope + ?Sized> {
    scope: &'s S,
    nodes: Vec<Node>,
    root: Option<usize>,
    depth: u32,
    expect_operand: bool,
}

fn describe(token: &Token) -> String {
    format!("{token:?}")
}

impl<'s, S: Scope + ?Sized> Builder<'s, S> {
    fn push(&mut self, kind: NodeKind, priority: u32) -> usize {
        self.nodes.push(Node {
            kind,
            priority,
            children: [None; 3],
        });
        self.nodes.len() - 1
    }

    fn priority(&self, precedence: u32) -> u32 {
        self.depth * LEVELS + precedence
    }

    fn enter(&mut self) -> Result<(), CompileError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(CompileError::TooComplex(MAX_NESTING as usize));
        }
        Ok(())
    }

    /// Place an operand (leaf or prefix operator) in the open slot.
    fn insert_operand(&mut self, index: usize) -> Result<(), CompileError> {
        let Some(mut cur) = self.root else {
            self.root = Some(index);
            return Ok(());
        };
        loop {
            let slot = self.nodes[cur]
                .right_slot()
                .ok_or(CompileError::UnexpectedEnd)?;
            match self.nodes[cur].children[slot] {
                None => {
                    self.nodes[cur].children[slot] = Some(index);
                    return Ok(());
                }
                Some(next) => cur = next,
            }
        }
    }

    /// Hang an infix node into the right spine.
    fn insert_operator(&mut self, index: usize, right_assoc: bool) -> Result<(), CompileError> {
        let priority = self.nodes[index].priority;
        let mut cur = self.root.ok_or(CompileError::UnexpectedEnd)?;
        let mut parent: Option<(usize, usize)> = None;
        loop {
            let node = &self.nodes[cur];
            let descend = if right_assoc {
                node.priority <= priority
            } else {
                node.priority < priority
            };
            let Some(slot) = node.right_slot().filter(|_| descend) else {
                break;
            };
            let next = node.children[slot].ok_or(CompileError::UnexpectedEnd)?;
            parent = Some((cur, slot));
            cur = next;
        }
        self.nodes[index].children[0] = Some(cur);
        match parent {
            None => self.root = Some(index),
            Some((p, slot)) => self.nodes[p].children[slot] = Some(index),
        }
        Ok(())
    }

    /// Deepest ternary on the right spine still in its "then" branch.
    fn open_ternary(&self) -> Option<usize> {
        let mut found = None;
        let mut cur = self.root;
        while let Some(index) = cur {
            let node = &self.nodes[index];
            if let NodeKind::Ternary { in_else: false, .. } = node.kind {
                found = Some(index);
            }
            cur = node.right_slot().and_then(|slot| node.children[slot]);
        }
        found
    }

    fn path<'t>(
        &self,
        first: &'t str,
        tokens: &mut std::iter::Peekable<std::slice::Iter<'t, Token>>,
    ) -> Result<Vec<&'t str>, CompileError> {
        let mut path = vec![first];
        while tokens.next_if(|t| **t == Token::Dot).is_some() {
            match tokens.next() {
                Some(Token::Ident(name)) => path.push(name),
                Some(other) => return Err(CompileError::UnexpectedToken(describe(other))),
                None => return Err(CompileError::UnexpectedEnd),
            }
        }
        Ok(path)
    }

    fn identifier(&self, path: &[&str]) -> Result<NodeKind, CompileError> {
        if let Some(field) = self.scope.field(path) {
            if field.load.is_none() {
                return Err(CompileError::NotLoadable(path.join(".")));
            }
            return Ok(NodeKind::Load(field));
        }
        if let [name] = path {
            if let Some(value) = self.scope.constant(name) {
                return Ok(NodeKind::Const(Value::Int(value)));
            }
        }
        Err(CompileError::UnknownIdentifier(path.join(".")))
    }

    fn size_of<'t>(
        &self,
        tokens: &mut std::iter::Peekable<std::slice::Iter<'t, Token>>,
    ) -> Result<i64, CompileError> {
        expect(tokens, &Token::LParen)?;
        let size = match tokens.next() {
            Some(Token::Str(s)) => s.len() + 1,
            Some(Token::Ident(name)) => {
                let path = self.path(name, tokens)?;
                let as_type = match path.as_slice() {
                    [single] => self.scope.size_of(single),
                    _ => None,
                };
                as_type
                    .or_else(|| self.scope.field(&path).map(|f| f.size))
                    .ok_or_else(|| CompileError::UnknownIdentifier(path.join(".")))?
            }
            Some(other) => return Err(CompileError::UnexpectedToken(describe(other))),
            None => return Err(CompileError::UnexpectedEnd),
        };
        expect(tokens, &Token::RParen)?;
        Ok(size as i64)
    }

    fn build(mut self, tokens: &[Token]) -> Result<Tree, CompileError> {
        let mut tokens = tokens.iter().peekable();
        while let Some(token) = tokens.next() {
            if self.expect_operand {
                self.operand(token, &mut tokens)?;
            } else {
                self.operator(token)?;
            }
        }

        let Some(root) = self.root else {
            return Err(if self.depth > 0 {
                CompileError::UnexpectedEnd
            } else {
                CompileError::Empty
            });
        };
        if self.expect_operand {
            return Err(CompileError::UnexpectedEnd);
        }
        if self.open_ternary().is_some() {
            return Err(CompileError::MissingElse);
        }
        if self.depth != 0 {
            return Err(CompileError::UnbalancedParens);
        }
        Ok(Tree {
            nodes: self.nodes,
            root,
        })
    }

    fn operand<'t>(
        &mut self,
        token: &'t Token,
        tokens: &mut std::iter::Peekable<std::slice::Iter<'t, Token>>,
    ) -> Result<(), CompileError> {
        let kind = match token {
            Token::Int(v) => NodeKind::Const(Value::Int(*v)),
            Token::Float(v) => NodeKind::Const(Value::Float(*v)),
            Token::Str(_) => return Err(CompileError::StringOperand),
            Token::Ident(name) => {
                let path = self.path(name, tokens)?;
                self.identifier(&path)?
            }
            Token::Sizeof => NodeKind::Const(Value::Int(self.size_of(tokens)?)),
            Token::LParen => return self.enter(),
            Token::Minus | Token::Plus | Token::Tilde | Token::Bang => {
                let op = match token {
                    Token::Minus => UnaryOp::Neg,
                    Token::Plus => UnaryOp::Plus,
                    Token::Tilde => UnaryOp::BitNot,
                    _ => UnaryOp::Not,
                };
                let priority = self.priority(UNARY);
                let index = self.push(NodeKind::Unary(op), priority);
                return self.insert_operand(index);
            }
            other => return Err(CompileError::UnexpectedToken(describe(other))),
        };
        let index = self.push(kind, LEAF);
        self.insert_operand(index)?;
        self.expect_operand = false;
        Ok(())
    }

    fn operator(&mut self, token: &Token) -> Result<(), CompileError> {
        match token {
            Token::RParen => {
                if self.depth == 0 {
                    return Err(CompileError::UnbalancedParens);
                }
                self.depth -= 1;
            }
            Token::Question => {
                let depth = self.depth;
                let priority = self.priority(TERNARY);
                let index = self.push(NodeKind::Ternary { in_else: false, depth }, priority);
                self.insert_operator(index, true)?;
                self.enter()?;
                self.expect_operand = true;
            }
            Token::Colon => {
                let index = self
                    .open_ternary()
                    .ok_or_else(|| CompileError::UnexpectedToken(describe(token)))?;
                let NodeKind::Ternary { depth, .. } = self.nodes[index].kind else {
                    return Err(CompileError::UnexpectedToken(describe(token)));
                };
                if self.depth != depth + 1 {
                    return Err(CompileError::UnbalancedParens);
                }
                self.depth = depth;
                self.nodes[index].kind = NodeKind::Ternary {
                    in_else: true,
                    depth,
                };
                self.expect_operand = true;
            }
            other => {
                let op = BinaryOp::from_token(other)
                    .ok_or_else(|| CompileError::UnexpectedToken(describe(other)))?;
                let priority = self.priority(op.precedence());
                let index = self.push(NodeKind::Binary(op), priority);
                self.insert_operator(index, false)?;
                self.expect_operand = true;
            }
        }
        Ok(())
    }
}

fn expect(
    tokens: &mut std::iter::Peekable<std::slice::Iter<'_, Token>>,
    wanted: &Token,
) -> Result<(), CompileError> {
    match tokens.next() {
        Some(token) if token == wanted => Ok(()),
        Some(other) => Err(CompileError::UnexpectedToken(describe(other))),
        None => Err(CompileError::UnexpectedEnd),
    }
}

/// Build the tree for `tokens`, resolving identifiers through `scope`.
pub(crate) fn build<S: Scope + ?Sized>(tokens: &[Token], scope: &S) -> Result<Tree, CompileError> {
    Builder {
        scope,
        nodes: Vec::new(),
        root: None,
        depth: 0,
        expect_operand: true,
    }
    .build(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::tokenize;

    /// Fully parenthesized rendering of the tree.
    fn render(tree: &Tree, index: usize) -> String {
        let node = tree.node(index);
        let child = |slot: usize| render(tree, node.children[slot].expect("child"));
        match &node.kind {
            NodeKind::Const(Value::Int(v)) => v.to_string(),
            NodeKind::Const(Value::Float(v)) => format!("{v:?}"),
            NodeKind::Load(field) => format!("@{}", field.offset),
            NodeKind::Unary(op) => format!("{op:?}({})", child(0)),
            NodeKind::Binary(op) => format!("({} {} {})", child(0), op.symbol(), child(1)),
            NodeKind::Ternary { .. } => format!("({} ? {} : {})", child(0), child(1), child(2)),
        }
    }

    fn parse(source: &str) -> Result<String, CompileError> {
        let tokens = tokenize(source)?;
        let tree = build(&tokens, &())?;
        Ok(render(&tree, tree.root()))
    }

    #[test]
    fn test_precedence_and_associativity() {
        assert_eq!(parse("1 + 2 * 3").unwrap(), "(1 + (2 * 3))");
        assert_eq!(parse("1 * 2 + 3").unwrap(), "((1 * 2) + 3)");
        assert_eq!(parse("1 - 2 - 3").unwrap(), "((1 - 2) - 3)");
        assert_eq!(parse("1 << 2 + 3").unwrap(), "(1 << (2 + 3))");
        assert_eq!(parse("1 | 2 ^ 3 & 4").unwrap(), "(1 | (2 ^ (3 & 4)))");
        assert_eq!(parse("1 < 2 == 3 > 4").unwrap(), "((1 < 2) == (3 > 4))");
        assert_eq!(parse("1 || 2 && 3").unwrap(), "(1 || (2 && 3))");
    }

    #[test]
    fn test_parentheses() {
        assert_eq!(parse("(1 + 2) * 3").unwrap(), "((1 + 2) * 3)");
        assert_eq!(parse("1 * (2 + 3)").unwrap(), "(1 * (2 + 3))");
        assert_eq!(parse("((4))").unwrap(), "4");
    }

    #[test]
    fn test_unary_binds_tightest() {
        assert_eq!(parse("-1 * 2").unwrap(), "(Neg(1) * 2)");
        assert_eq!(parse("1 * -2 + 3").unwrap(), "((1 * Neg(2)) + 3)");
        assert_eq!(parse("!~1").unwrap(), "Not(BitNot(1))");
    }

    #[test]
    fn test_ternary() {
        assert_eq!(parse("1 ? 2 : 3").unwrap(), "(1 ? 2 : 3)");
        assert_eq!(parse("1 || 0 ? 2 + 1 : 3 * 4").unwrap(), "((1 || 0) ? (2 + 1) : (3 * 4))");
        assert_eq!(parse("1 ? 2 : 3 ? 4 : 5").unwrap(), "(1 ? 2 : (3 ? 4 : 5))");
        assert_eq!(parse("1 ? 2 ? 3 : 4 : 5").unwrap(), "(1 ? (2 ? 3 : 4) : 5)");
        assert_eq!(parse("(1 ? 2 : 3) + 4").unwrap(), "((1 ? 2 : 3) + 4)");
    }

    #[test]
    fn test_sizeof_literal() {
        assert_eq!(parse("sizeof(\"abc\") * 2").unwrap(), "(4 * 2)");
    }

    #[test]
    fn test_malformed() {
        assert_eq!(parse(""), Err(CompileError::Empty));
        assert_eq!(parse("1 +"), Err(CompileError::UnexpectedEnd));
        assert_eq!(parse("(1 + 2"), Err(CompileError::UnbalancedParens));
        assert_eq!(parse("1 + 2)"), Err(CompileError::UnbalancedParens));
        assert_eq!(parse("1 ? 2"), Err(CompileError::MissingElse));
        assert_eq!(parse("(1 ? 2) : 3"), Err(CompileError::UnbalancedParens));
        assert_eq!(parse("\"s\" + 1"), Err(CompileError::StringOperand));
        assert_eq!(parse("x"), Err(CompileError::UnknownIdentifier("x".into())));
        assert!(matches!(parse("1 2"), Err(CompileError::UnexpectedToken(_))));
        assert!(matches!(parse("1 : 2"), Err(CompileError::UnexpectedToken(_))));
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}1{}", "(".repeat(300), ")".repeat(300));
        assert_eq!(parse(&deep), Err(CompileError::TooComplex(MAX_NESTING as usize)));
    }
}
