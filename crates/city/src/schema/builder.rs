// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Programmatic schema construction.
//!
//! Declarations may come in any order: records and unions can be declared
//! first and defined later, which is how self-referential types are built.
//! [`SchemaBuilder::finish`] lays everything out with C rules, encodes the
//! attribute payloads into the value pool and compiles `length` / `when`
//! expressions against the final layout.

use super::scope::SchemaScope;
use super::{EnumVariant, Member, Schema, Type, TypeFlags, TypeId, TypeKind};
use crate::attr::{
    kind, Attr, AttributeError, AttributeId, AttributeRegistry, AttributeSet, PoolOffset,
    ValuePool, ALIAS, CSTRING, DEFAULT, ID, LENGTH, PERSIST, SELF_TYPE, WHEN,
};
use crate::expr::{compile_expression, Coerce, CompileError};
use crate::memory::POINTER_SIZE;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum BuildError {
    #[error("type '{0}' already declared")]
    DuplicateType(String),

    #[error("type '{0}' defined twice")]
    Redefinition(String),

    #[error("type '{0}' declared but never defined")]
    Undefined(String),

    #[error("type '{0}' contains itself")]
    RecursiveLayout(String),

    #[error("type '{0}' is not a record or union")]
    NotAggregate(String),

    #[error("'{0}' must be an integer type")]
    NotInteger(String),

    #[error("invalid default for member '{member}': {reason}")]
    InvalidDefault { member: String, reason: &'static str },

    #[error("union '{union}' is embedded in several records; 'when' context is ambiguous")]
    AmbiguousUnionContext { union: String },

    #[error("member '{member}': {error}")]
    Expression {
        member: String,
        #[source]
        error: CompileError,
    },

    #[error(transparent)]
    Attribute(#[from] AttributeError),
}

/// Built-in scalar types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
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
    F128,
}

impl Primitive {
    pub fn name(self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::F128 => "f128",
        }
    }

    pub fn size(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
            Self::F128 => 16,
        }
    }

    fn kind(self) -> TypeKind {
        match self {
            Self::U8 | Self::U16 | Self::U32 | Self::U64 => TypeKind::Unsigned,
            Self::I8 | Self::I16 | Self::I32 | Self::I64 => TypeKind::Signed,
            Self::F32 | Self::F64 | Self::F128 => TypeKind::Float,
        }
    }

    fn is_integer(self) -> bool {
        !matches!(self, Self::F32 | Self::F64 | Self::F128)
    }
}

/// Default or custom value literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    /// For pointer members: stored NUL-terminated and followed on lookup.
    Str(String),
    /// Raw native bytes, for records, unions and arrays.
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
enum Custom {
    Flag,
    Int(i64),
    Float(f64),
    Str(String),
    Strings(Vec<String>),
    Member(usize),
    Expr(String),
    Value(Literal),
}

/// One member of a record or union declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberDecl {
    name: Option<String>,
    ty: TypeId,
    persist: bool,
    id: Option<i64>,
    aliases: Vec<String>,
    default: Option<Literal>,
    length: Option<String>,
    when: Option<String>,
    cstring: bool,
    self_type: bool,
    custom: Vec<(AttributeId, Custom)>,
}

impl MemberDecl {
    pub fn new(name: impl Into<String>, ty: TypeId) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::anonymous(ty)
        }
    }

    /// Unnamed member; give it an [`id`](Self::id) to make it serializable.
    pub fn anonymous(ty: TypeId) -> Self {
        Self {
            name: None,
            ty,
            persist: true,
            id: None,
            aliases: Vec::new(),
            default: None,
            length: None,
            when: None,
            cstring: false,
            self_type: false,
            custom: Vec::new(),
        }
    }

    pub fn id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// Former names accepted when decoding.
    pub fn alias(mut self, names: &[&str]) -> Self {
        self.aliases.extend(names.iter().map(|s| s.to_string()));
        self
    }

    pub fn default(mut self, value: Literal) -> Self {
        self.default = Some(value);
        self
    }

    /// Element count expression of a pointer member, evaluated against the
    /// owning record.
    pub fn length(mut self, expr: &str) -> Self {
        self.length = Some(expr.to_string());
        self
    }

    /// Selection predicate of a union member, evaluated against the
    /// enclosing record.
    pub fn when(mut self, expr: &str) -> Self {
        self.when = Some(expr.to_string());
        self
    }

    pub fn cstring(mut self) -> Self {
        self.cstring = true;
        self
    }

    pub fn self_type(mut self) -> Self {
        self.self_type = true;
        self
    }

    /// Not serialized.
    pub fn transient(mut self) -> Self {
        self.persist = false;
        self
    }

    pub fn flag(mut self, attr: Attr<kind::Flag>) -> Self {
        self.custom.push((attr.id(), Custom::Flag));
        self
    }

    pub fn with_int(mut self, attr: Attr<kind::Int>, value: i64) -> Self {
        self.custom.push((attr.id(), Custom::Int(value)));
        self
    }

    pub fn with_float(mut self, attr: Attr<kind::Float>, value: f64) -> Self {
        self.custom.push((attr.id(), Custom::Float(value)));
        self
    }

    pub fn with_str(mut self, attr: Attr<kind::Str>, value: &str) -> Self {
        self.custom.push((attr.id(), Custom::Str(value.to_string())));
        self
    }

    pub fn with_strings(mut self, attr: Attr<kind::Strings>, values: &[&str]) -> Self {
        let values = values.iter().map(|s| s.to_string()).collect();
        self.custom.push((attr.id(), Custom::Strings(values)));
        self
    }

    pub fn with_member(mut self, attr: Attr<kind::Member>, index: usize) -> Self {
        self.custom.push((attr.id(), Custom::Member(index)));
        self
    }

    /// Custom expression, compiled against the owning record.
    pub fn with_expr(mut self, attr: Attr<kind::Expr>, expr: &str) -> Self {
        self.custom.push((attr.id(), Custom::Expr(expr.to_string())));
        self
    }

    pub fn with_value(mut self, attr: Attr<kind::Value>, value: Literal) -> Self {
        self.custom.push((attr.id(), Custom::Value(value)));
        self
    }

    fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| "<anonymous>".into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Derived {
    Array(TypeId, usize),
    Pointer(TypeId),
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Pending,
    Visiting,
    Done,
}

/// Declares types and produces an immutable [`Schema`].
#[derive(Debug)]
pub struct SchemaBuilder {
    types: Vec<Type>,
    /// Member declarations of records/unions, `None` until defined.
    decls: Vec<Option<Vec<MemberDecl>>>,
    pool: ValuePool,
    registry: AttributeRegistry,
    primitives: HashMap<Primitive, TypeId>,
    derived: HashMap<Derived, TypeId>,
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self {
            types: Vec::new(),
            decls: Vec::new(),
            pool: ValuePool::new(),
            registry: AttributeRegistry::new(),
            primitives: HashMap::new(),
            derived: HashMap::new(),
        }
    }

    /// Register custom attributes here before declaring members that use them.
    pub fn registry_mut(&mut self) -> &mut AttributeRegistry {
        &mut self.registry
    }

    pub fn registry(&self) -> &AttributeRegistry {
        &self.registry
    }

    fn push(&mut self, ty: Type, decls: Option<Vec<MemberDecl>>) -> TypeId {
        let id = TypeId::new(self.types.len());
        self.types.push(ty);
        self.decls.push(decls);
        id
    }

    fn named(&self, name: &str) -> Option<TypeId> {
        self.types
            .iter()
            .position(|t| t.name.as_deref() == Some(name))
            .map(TypeId::new)
    }

    fn claim_name(&self, name: &str) -> Result<(), BuildError> {
        match self.named(name) {
            Some(_) => Err(BuildError::DuplicateType(name.to_string())),
            None => Ok(()),
        }
    }

    pub fn primitive(&mut self, prim: Primitive) -> TypeId {
        if let Some(id) = self.primitives.get(&prim) {
            return *id;
        }
        let id = self.push(
            Type {
                name: Some(prim.name().to_string()),
                size: prim.size(),
                align: prim.size(),
                flags: TypeFlags::BUILTIN,
                attrs: AttributeSet::new(),
                kind: prim.kind(),
            },
            None,
        );
        self.primitives.insert(prim, id);
        id
    }

    fn derived(&mut self, key: Derived, kind: TypeKind, attrs: AttributeSet) -> TypeId {
        if let Some(id) = self.derived.get(&key) {
            return *id;
        }
        // Size and alignment of arrays are resolved by `finish`.
        let id = self.push(
            Type {
                name: None,
                size: POINTER_SIZE,
                align: POINTER_SIZE,
                flags: TypeFlags::ANONYMOUS,
                attrs,
                kind,
            },
            None,
        );
        self.derived.insert(key, id);
        id
    }

    pub fn array(&mut self, element: TypeId, count: usize) -> TypeId {
        self.derived(
            Derived::Array(element, count),
            TypeKind::Array { element, count },
            AttributeSet::new(),
        )
    }

    pub fn pointer(&mut self, element: TypeId) -> TypeId {
        self.derived(
            Derived::Pointer(element),
            TypeKind::Pointer { element },
            AttributeSet::new(),
        )
    }

    /// Pointer to a NUL-terminated `u8` string.
    pub fn string(&mut self) -> TypeId {
        let element = self.primitive(Primitive::U8);
        let mut attrs = AttributeSet::new();
        attrs.insert_flag(CSTRING);
        self.derived(Derived::String, TypeKind::Pointer { element }, attrs)
    }

    pub fn enumeration(
        &mut self,
        name: &str,
        backing: Primitive,
        variants: &[(&str, i64)],
    ) -> Result<TypeId, BuildError> {
        self.claim_name(name)?;
        if !backing.is_integer() {
            return Err(BuildError::NotInteger(name.to_string()));
        }
        let variants = variants
            .iter()
            .map(|(name, value)| EnumVariant {
                name: name.to_string(),
                value: *value,
            })
            .collect();
        Ok(self.push(
            Type {
                name: Some(name.to_string()),
                size: backing.size(),
                align: backing.size(),
                flags: TypeFlags::empty(),
                attrs: AttributeSet::new(),
                kind: TypeKind::Enum { variants },
            },
            None,
        ))
    }

    /// Function type; present in graphs but never serializable.
    pub fn function(&mut self, name: &str) -> Result<TypeId, BuildError> {
        self.claim_name(name)?;
        Ok(self.push(
            Type {
                name: Some(name.to_string()),
                size: 0,
                align: 1,
                flags: TypeFlags::empty(),
                attrs: AttributeSet::new(),
                kind: TypeKind::Function,
            },
            None,
        ))
    }

    pub fn variadic(&mut self) -> TypeId {
        self.push(
            Type {
                name: None,
                size: 0,
                align: 1,
                flags: TypeFlags::ANONYMOUS,
                attrs: AttributeSet::new(),
                kind: TypeKind::Variadic,
            },
            None,
        )
    }

    fn declare(&mut self, name: Option<&str>, union: bool) -> TypeId {
        if let Some(existing) = name.and_then(|n| self.named(n)) {
            return existing;
        }
        let kind = if union {
            TypeKind::Union { members: vec![] }
        } else {
            TypeKind::Record { members: vec![] }
        };
        let flags = if name.is_some() {
            TypeFlags::empty()
        } else {
            TypeFlags::ANONYMOUS
        };
        self.push(
            Type {
                name: name.map(str::to_string),
                size: 0,
                align: 1,
                flags,
                attrs: AttributeSet::new(),
                kind,
            },
            None,
        )
    }

    /// Forward-declare a record. Declaring an existing name returns its id.
    pub fn declare_record(&mut self, name: &str) -> TypeId {
        self.declare(Some(name), false)
    }

    pub fn declare_union(&mut self, name: &str) -> TypeId {
        self.declare(Some(name), true)
    }

    /// Give a declared record or union its members.
    pub fn define(&mut self, id: TypeId, members: Vec<MemberDecl>) -> Result<(), BuildError> {
        let ty = &self.types[id.index()];
        if ty.kind.members().is_none() {
            return Err(BuildError::NotAggregate(ty.display_name()));
        }
        if self.decls[id.index()].is_some() {
            return Err(BuildError::Redefinition(ty.display_name()));
        }
        self.decls[id.index()] = Some(members);
        Ok(())
    }

    pub fn record(&mut self, name: &str, members: Vec<MemberDecl>) -> Result<TypeId, BuildError> {
        let id = self.declare_record(name);
        self.define(id, members)?;
        Ok(id)
    }

    pub fn union(&mut self, name: &str, members: Vec<MemberDecl>) -> Result<TypeId, BuildError> {
        let id = self.declare_union(name);
        self.define(id, members)?;
        Ok(id)
    }

    pub fn anonymous_record(&mut self, members: Vec<MemberDecl>) -> Result<TypeId, BuildError> {
        let id = self.declare(None, false);
        self.define(id, members)?;
        Ok(id)
    }

    pub fn anonymous_union(&mut self, members: Vec<MemberDecl>) -> Result<TypeId, BuildError> {
        let id = self.declare(None, true);
        self.define(id, members)?;
        Ok(id)
    }

    /// Lay out every type, encode attributes and compile expressions.
    pub fn finish(mut self) -> Result<Schema, BuildError> {
        for (index, ty) in self.types.iter().enumerate() {
            if ty.kind.members().is_some() && self.decls[index].is_none() {
                return Err(BuildError::Undefined(ty.display_name()));
            }
        }

        let mut state = vec![Layout::Pending; self.types.len()];
        for index in 0..self.types.len() {
            self.layout(TypeId::new(index), &mut state)?;
        }

        let mut attributes = Vec::new();
        for index in 0..self.types.len() {
            let owner = TypeId::new(index);
            let Some(decls) = self.decls[index].clone() else {
                continue;
            };
            let sets = decls
                .iter()
                .map(|decl| self.member_attrs(owner, decl))
                .collect::<Result<Vec<_>, _>>()?;
            attributes.push((owner, sets));
        }
        for (owner, sets) in attributes {
            if let Some(members) = self.types[owner.index()].kind.members_mut() {
                for (member, attrs) in members.iter_mut().zip(sets) {
                    member.attrs = attrs;
                }
            }
        }

        log::debug!(
            "[city::schema] built {} types, {} pool bytes",
            self.types.len(),
            self.pool.len()
        );
        Ok(Schema::from_parts(self.types, self.pool, self.registry))
    }

    fn layout(&mut self, id: TypeId, state: &mut [Layout]) -> Result<(usize, usize), BuildError> {
        match state[id.index()] {
            Layout::Done => {
                let ty = &self.types[id.index()];
                return Ok((ty.size, ty.align));
            }
            Layout::Visiting => {
                return Err(BuildError::RecursiveLayout(
                    self.types[id.index()].display_name(),
                ))
            }
            Layout::Pending => state[id.index()] = Layout::Visiting,
        }

        let kind = self.types[id.index()].kind.clone();
        let (size, align) = match kind {
            TypeKind::Array { element, count } => {
                let (size, align) = self.layout(element, state)?;
                (size * count, align)
            }
            TypeKind::Record { .. } | TypeKind::Union { .. } => {
                let union = matches!(kind, TypeKind::Union { .. });
                let decls = self.decls[id.index()].clone().unwrap_or_default();
                let mut members = Vec::with_capacity(decls.len());
                let mut end = 0usize;
                let mut align = 1usize;
                for decl in &decls {
                    let (size, member_align) = self.layout(decl.ty, state)?;
                    let offset = if union {
                        0
                    } else {
                        end.next_multiple_of(member_align.max(1))
                    };
                    end = end.max(offset + size);
                    align = align.max(member_align);
                    members.push(Member {
                        name: decl.name.clone(),
                        offset,
                        ty: decl.ty,
                        attrs: AttributeSet::new(),
                    });
                }
                if let Some(slot) = self.types[id.index()].kind.members_mut() {
                    *slot = members;
                }
                (end.next_multiple_of(align), align)
            }
            _ => {
                let ty = &self.types[id.index()];
                (ty.size, ty.align)
            }
        };

        let ty = &mut self.types[id.index()];
        ty.size = size;
        ty.align = align;
        state[id.index()] = Layout::Done;
        Ok((size, align))
    }

    fn member_attrs(&mut self, owner: TypeId, decl: &MemberDecl) -> Result<AttributeSet, BuildError> {
        let mut attrs = AttributeSet::new();
        let member_ty = &self.types[decl.ty.index()];

        if decl.persist {
            attrs.insert_flag(PERSIST);
        }
        if decl.cstring || member_ty.attrs.contains(CSTRING) {
            attrs.insert_flag(CSTRING);
        }
        if decl.self_type {
            if !matches!(member_ty.kind, TypeKind::Unsigned | TypeKind::Signed) {
                return Err(BuildError::NotInteger(decl.display_name()));
            }
            attrs.insert_flag(SELF_TYPE);
        }
        if let Some(id) = decl.id {
            attrs.insert(ID, self.pool.push_i64(id));
        }
        if !decl.aliases.is_empty() {
            attrs.insert(ALIAS, self.pool.push_strings(&decl.aliases));
        }
        if let Some(literal) = &decl.default {
            let offset = self.literal(decl, literal)?;
            attrs.insert(DEFAULT, offset);
        }
        if let Some(source) = &decl.length {
            let offset = self.expression(owner, decl, source, Coerce::Int)?;
            attrs.insert(LENGTH, offset);
        }
        if let Some(source) = &decl.when {
            let context = self.when_context(owner)?;
            let offset = self.expression(context, decl, source, Coerce::Truth)?;
            attrs.insert(WHEN, offset);
        }

        for (id, value) in &decl.custom {
            let offset = match value {
                Custom::Flag => {
                    attrs.insert_flag(*id);
                    continue;
                }
                Custom::Int(v) => self.pool.push_i64(*v),
                Custom::Member(index) => self.pool.push_i64(*index as i64),
                Custom::Float(v) => self.pool.push_f64(*v),
                Custom::Str(s) => self.pool.push_indirect_str(s),
                Custom::Strings(list) => self.pool.push_strings(list),
                Custom::Expr(source) => self.expression(owner, decl, source, Coerce::None)?,
                Custom::Value(literal) => self.literal(decl, literal)?,
            };
            attrs.insert(*id, offset);
        }
        Ok(attrs)
    }

    fn expression(
        &mut self,
        context: TypeId,
        decl: &MemberDecl,
        source: &str,
        coerce: Coerce,
    ) -> Result<PoolOffset, BuildError> {
        let scope = SchemaScope::over(&self.types, context);
        let program =
            compile_expression(source, &scope, coerce).map_err(|error| BuildError::Expression {
                member: decl.display_name(),
                error,
            })?;
        Ok(self.pool.push_bytes(&program))
    }

    /// Record whose bytes a `when` predicate of a member of `owner` sees.
    ///
    /// For a union this is the one record embedding it (directly, through
    /// arrays or through other unions); a union no record embeds is its
    /// own context.
    fn when_context(&self, owner: TypeId) -> Result<TypeId, BuildError> {
        if !matches!(self.types[owner.index()].kind, TypeKind::Union { .. }) {
            return Ok(owner);
        }
        let embedding: Vec<TypeId> = self
            .types
            .iter()
            .enumerate()
            .filter(|(_, t)| matches!(t.kind, TypeKind::Record { .. }))
            .map(|(i, _)| TypeId::new(i))
            .filter(|record| self.embeds(*record, owner))
            .collect();
        match embedding.as_slice() {
            [] => Ok(owner),
            [record] => Ok(*record),
            _ => Err(BuildError::AmbiguousUnionContext {
                union: self.types[owner.index()].display_name(),
            }),
        }
    }

    fn embeds(&self, record: TypeId, target: TypeId) -> bool {
        let mut stack: Vec<TypeId> = self.types[record.index()]
            .kind
            .members()
            .unwrap_or(&[])
            .iter()
            .map(|m| m.ty)
            .collect();
        let mut seen = vec![false; self.types.len()];
        while let Some(ty) = stack.pop() {
            if ty == target {
                return true;
            }
            if std::mem::replace(&mut seen[ty.index()], true) {
                continue;
            }
            match &self.types[ty.index()].kind {
                TypeKind::Array { element, .. } => stack.push(*element),
                TypeKind::Union { members } => stack.extend(members.iter().map(|m| m.ty)),
                _ => {}
            }
        }
        false
    }

    /// Encode a literal in the native representation of the member type.
    fn literal(&mut self, decl: &MemberDecl, literal: &Literal) -> Result<PoolOffset, BuildError> {
        let ty = &self.types[decl.ty.index()];
        let invalid = |reason| BuildError::InvalidDefault {
            member: decl.display_name(),
            reason,
        };
        let size = ty.size;
        let number = match literal {
            Literal::Int(i) => Some((*i, *i as f64)),
            Literal::Float(f) => Some((*f as i64, *f)),
            _ => None,
        };
        let bytes = match (&ty.kind, literal, number) {
            (TypeKind::Pointer { .. }, Literal::Str(s), _) => {
                return Ok(self.pool.push_indirect_str(s));
            }
            (TypeKind::Pointer { .. }, _, _) => {
                return Err(invalid("pointer defaults must be strings"))
            }
            (TypeKind::Unsigned | TypeKind::Signed | TypeKind::Enum { .. }, _, Some((i, _))) => {
                i.to_le_bytes()[..size.min(8)].to_vec()
            }
            (TypeKind::Float, _, Some((_, f))) if size == 4 => (f as f32).to_le_bytes().to_vec(),
            (TypeKind::Float, _, Some((_, f))) if size == 8 => f.to_le_bytes().to_vec(),
            (_, Literal::Bytes(bytes), _) if bytes.len() == size => bytes.clone(),
            (_, Literal::Bytes(_), _) => return Err(invalid("byte length differs from type size")),
            _ => return Err(invalid("literal does not fit the member type")),
        };
        Ok(self.pool.push_bytes(&bytes))
    }
}
