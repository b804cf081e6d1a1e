// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Type graph: an arena of laid-out types addressed by [`TypeId`].
//!
//! A [`Schema`] is what the declaration parser hands to the core: every
//! type already has its size and alignment resolved, every attribute
//! payload (including compiled expressions) lives in the schema's
//! [`ValuePool`]. The schema is read-only afterwards and can be shared
//! between threads.
//!
//! Cyclic type graphs are plain index cycles: a record `Node` with a
//! `next: *Node` member is two arena slots pointing at each other.

mod builder;
mod scope;

pub use builder::{BuildError, Literal, MemberDecl, Primitive, SchemaBuilder};
pub use scope::SchemaScope;

use crate::attr::{AttributeRegistry, AttributeSet, ValuePool};
use std::fmt;

/// Index of a type inside its [`Schema`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "manifest", derive(serde::Serialize, serde::Deserialize))]
pub struct TypeId(u32);

impl TypeId {
    pub(crate) const fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeId({})", self.0)
    }
}

/// Type flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "manifest", derive(serde::Serialize, serde::Deserialize))]
pub struct TypeFlags(pub u16);

impl TypeFlags {
    /// Built-in scalar created by the builder.
    pub const BUILTIN: Self = Self(0x0001);

    /// Declared without a name (anonymous record/union, derived array/pointer).
    pub const ANONYMOUS: Self = Self(0x0002);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// Category payload of a [`Type`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "manifest", derive(serde::Serialize, serde::Deserialize))]
pub enum TypeKind {
    /// Unsigned integer, width = `size`.
    Unsigned,
    /// Signed integer, width = `size`.
    Signed,
    /// IEEE float, width = `size` (4, 8 or 16).
    Float,
    Array { element: TypeId, count: usize },
    Pointer { element: TypeId },
    /// Backing integer width = `size`.
    Enum { variants: Vec<EnumVariant> },
    Record { members: Vec<Member> },
    /// Members overlap at offset 0.
    Union { members: Vec<Member> },
    Function,
    Variadic,
}

impl TypeKind {
    pub fn category(&self) -> Category {
        match self {
            Self::Unsigned | Self::Signed => Category::Integer,
            Self::Float => Category::Float,
            Self::Array { .. } => Category::Array,
            Self::Pointer { .. } => Category::Pointer,
            Self::Enum { .. } => Category::Enum,
            Self::Record { .. } => Category::Record,
            Self::Union { .. } => Category::Union,
            Self::Function | Self::Variadic => Category::Function,
        }
    }

    /// Integers, floats and enums: copied byte-for-byte by the codec.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Self::Unsigned | Self::Signed | Self::Float | Self::Enum { .. }
        )
    }

    pub fn members(&self) -> Option<&[Member]> {
        match self {
            Self::Record { members } | Self::Union { members } => Some(members),
            _ => None,
        }
    }

    pub(crate) fn members_mut(&mut self) -> Option<&mut Vec<Member>> {
        match self {
            Self::Record { members } | Self::Union { members } => Some(members),
            _ => None,
        }
    }
}

/// Coarse type category used for schema matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Integer,
    Float,
    Enum,
    Array,
    Pointer,
    Record,
    Union,
    Function,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Enum => "enum",
            Self::Array => "array",
            Self::Pointer => "pointer",
            Self::Record => "record",
            Self::Union => "union",
            Self::Function => "function",
        };
        f.write_str(name)
    }
}

/// Enumeration constant.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "manifest", derive(serde::Serialize, serde::Deserialize))]
pub struct EnumVariant {
    pub name: String,
    pub value: i64,
}

/// Record or union member.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "manifest", derive(serde::Serialize, serde::Deserialize))]
pub struct Member {
    /// `None` for anonymous members, which must carry an `id` attribute to
    /// take part in schema matching.
    pub name: Option<String>,
    /// Byte offset inside the owning record (always 0 in a union).
    pub offset: usize,
    pub ty: TypeId,
    pub attrs: AttributeSet,
}

impl Member {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }
}

/// A laid-out type.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "manifest", derive(serde::Serialize, serde::Deserialize))]
pub struct Type {
    pub name: Option<String>,
    pub size: usize,
    pub align: usize,
    pub flags: TypeFlags,
    pub attrs: AttributeSet,
    pub kind: TypeKind,
}

impl Type {
    pub fn category(&self) -> Category {
        self.kind.category()
    }

    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("<{}>", self.category()),
        }
    }
}

/// Immutable type graph plus the value pool its attributes point into.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "manifest", derive(serde::Serialize, serde::Deserialize))]
pub struct Schema {
    types: Vec<Type>,
    pool: ValuePool,
    registry: AttributeRegistry,
}

impl Schema {
    pub(crate) fn from_parts(types: Vec<Type>, pool: ValuePool, registry: AttributeRegistry) -> Self {
        Self {
            types,
            pool,
            registry,
        }
    }

    /// Type by id. Ids always come from the schema that issued them.
    pub fn ty(&self, id: TypeId) -> &Type {
        &self.types[id.index()]
    }

    pub fn get(&self, id: TypeId) -> Option<&Type> {
        self.types.get(id.index())
    }

    pub fn find(&self, name: &str) -> Option<TypeId> {
        self.types
            .iter()
            .position(|t| t.name.as_deref() == Some(name))
            .map(TypeId::new)
    }

    pub fn types(&self) -> impl Iterator<Item = (TypeId, &Type)> {
        self.types
            .iter()
            .enumerate()
            .map(|(i, t)| (TypeId::new(i), t))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Members of a record or union, empty for anything else.
    pub fn members(&self, id: TypeId) -> &[Member] {
        self.ty(id).kind.members().unwrap_or(&[])
    }

    pub fn member(&self, id: TypeId, name: &str) -> Option<&Member> {
        self.members(id)
            .iter()
            .find(|m| m.name.as_deref() == Some(name))
    }

    pub fn pool(&self) -> &ValuePool {
        &self.pool
    }

    pub fn registry(&self) -> &AttributeRegistry {
        &self.registry
    }

    pub(crate) fn pool_mut(&mut self) -> &mut ValuePool {
        &mut self.pool
    }

    pub(crate) fn ty_mut(&mut self, id: TypeId) -> &mut Type {
        &mut self.types[id.index()]
    }

    /// Parse a schema emitted by the table generator.
    #[cfg(feature = "manifest")]
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut schema: Self = serde_json::from_str(json)?;
        schema.registry.reindex();
        Ok(schema)
    }

    #[cfg(feature = "manifest")]
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_of_kinds() {
        assert_eq!(TypeKind::Signed.category(), Category::Integer);
        assert_eq!(TypeKind::Unsigned.category(), Category::Integer);
        assert_eq!(
            TypeKind::Enum { variants: vec![] }.category(),
            Category::Enum
        );
        assert_eq!(TypeKind::Variadic.category(), Category::Function);
        assert!(TypeKind::Float.is_scalar());
        assert!(!TypeKind::Pointer {
            element: TypeId::new(0)
        }
        .is_scalar());
    }

    #[test]
    fn test_type_flags() {
        let flags = TypeFlags::BUILTIN.union(TypeFlags::ANONYMOUS);
        assert!(flags.contains(TypeFlags::BUILTIN));
        assert!(flags.contains(TypeFlags::ANONYMOUS));
        assert!(!TypeFlags::empty().contains(TypeFlags::BUILTIN));
    }

    #[cfg(feature = "manifest")]
    #[test]
    fn test_manifest_round_trip() {
        let mut builder = SchemaBuilder::new();
        let u32_t = builder.primitive(Primitive::U32);
        builder
            .record("Counter", vec![MemberDecl::new("value", u32_t).id(4)])
            .expect("record");
        let schema = builder.finish().expect("finish");

        let json = schema.to_json().expect("to_json");
        let restored = Schema::from_json(&json).expect("from_json");
        assert_eq!(restored, schema);
        assert_eq!(restored.registry().lookup("when"), schema.registry().lookup("when"));
    }
}
