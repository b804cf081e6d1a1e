// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Attribute ids, typed attribute keys and the per-member attribute set.
//!
//! Every member and type of a [`Schema`](crate::schema::Schema) carries an
//! [`AttributeSet`]: a 128-bit presence bitset plus the pool offsets of the
//! value-bearing attributes, ordered by id. The slot of a given attribute is
//! the population count of the value-bearing bits below it, so a set with
//! three flags and one `length` program stores exactly one offset.
//!
//! Attribute payload kinds are carried in the key type ([`Attr<kind::Int>`],
//! [`Attr<kind::Expr>`], ...) so that `attribute_int(ID)` on an expression
//! attribute does not compile.

mod pool;
mod query;
mod registry;

pub use pool::{PoolOffset, ValuePool};
pub use query::{
    attribute_float, attribute_int, attribute_length, attribute_member, attribute_program,
    attribute_str, attribute_strings, attribute_value, has_attribute, ValueType, Variant,
};
pub use registry::{AttributeDef, AttributeError, AttributeRegistry};

use std::fmt;
use std::marker::PhantomData;

/// Number of attribute ids an [`AttributeSet`] can hold.
pub const ATTRIBUTE_CAPACITY: usize = 128;

const WORDS: usize = ATTRIBUTE_CAPACITY / 64;

/// Small integer naming one registered attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "manifest", derive(serde::Serialize, serde::Deserialize))]
pub struct AttributeId(u8);

impl AttributeId {
    /// Create an id. Ids at or above [`ATTRIBUTE_CAPACITY`] are a contract violation.
    pub const fn new(raw: u8) -> Self {
        assert!((raw as usize) < ATTRIBUTE_CAPACITY, "attribute id out of range");
        Self(raw)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    const fn word(self) -> usize {
        self.index() / 64
    }

    const fn bit(self) -> u64 {
        1u64 << (self.index() % 64)
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Payload shape an attribute was registered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "manifest", derive(serde::Serialize, serde::Deserialize))]
pub enum AttributeKind {
    /// Presence only.
    Flag,
    /// `i64` stored in the pool.
    Int,
    /// `f64` stored in the pool.
    Float,
    /// Native bytes of the annotated member's type.
    Value,
    /// Offset of a NUL-terminated string (followed one level).
    Str,
    /// Count-prefixed list of string offsets.
    Strings,
    /// Index of a sibling member.
    Member,
    /// Compiled expression program.
    Expr,
}

impl AttributeKind {
    /// Whether the attribute occupies a payload slot in an [`AttributeSet`].
    pub const fn carries_value(self) -> bool {
        !matches!(self, Self::Flag)
    }
}

/// Marker types naming payload kinds at the type level.
pub mod kind {
    use super::{AttributeKind, Payload};

    macro_rules! payload_kinds {
        ($($name:ident),* $(,)?) => {
            $(
                #[derive(Debug)]
                pub enum $name {}

                impl Payload for $name {
                    const KIND: AttributeKind = AttributeKind::$name;
                }
            )*
        };
    }

    payload_kinds!(Flag, Int, Float, Value, Str, Strings, Member, Expr);
}

/// Implemented by the [`kind`] markers.
pub trait Payload {
    const KIND: AttributeKind;
}

/// Attribute key whose payload kind is fixed at compile time.
pub struct Attr<K> {
    id: AttributeId,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Attr<K> {
    pub(crate) const fn from_id(id: AttributeId) -> Self {
        Self {
            id,
            _kind: PhantomData,
        }
    }

    pub const fn id(self) -> AttributeId {
        self.id
    }
}

impl<K: Payload> Attr<K> {
    pub const fn kind(self) -> AttributeKind {
        K::KIND
    }
}

impl<K> Clone for Attr<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for Attr<K> {}

impl<K> PartialEq for Attr<K> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<K> Eq for Attr<K> {}

impl<K: Payload> fmt::Debug for Attr<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Attr({}, {:?})", self.id, K::KIND)
    }
}

impl<K> From<Attr<K>> for AttributeId {
    fn from(attr: Attr<K>) -> Self {
        attr.id
    }
}

/// Member is written by the encoder. Set on every member unless declared transient.
pub const PERSIST: Attr<kind::Flag> = Attr::from_id(AttributeId::new(0));
/// Numeric identifier used for schema matching of anonymous members.
pub const ID: Attr<kind::Int> = Attr::from_id(AttributeId::new(1));
/// Value used when decode finds no matching source member.
pub const DEFAULT: Attr<kind::Value> = Attr::from_id(AttributeId::new(2));
/// Former member names accepted during decode.
pub const ALIAS: Attr<kind::Strings> = Attr::from_id(AttributeId::new(3));
/// Element count of a pointer member.
pub const LENGTH: Attr<kind::Expr> = Attr::from_id(AttributeId::new(4));
/// Union member selection predicate.
pub const WHEN: Attr<kind::Expr> = Attr::from_id(AttributeId::new(5));
/// Pointer to a NUL-terminated byte string.
pub const CSTRING: Attr<kind::Flag> = Attr::from_id(AttributeId::new(6));
/// Decode stores the destination record's type id here.
pub const SELF_TYPE: Attr<kind::Flag> = Attr::from_id(AttributeId::new(7));

pub(crate) const BUILTINS: [(&str, AttributeKind); 8] = [
    ("persist", AttributeKind::Flag),
    ("id", AttributeKind::Int),
    ("default", AttributeKind::Value),
    ("alias", AttributeKind::Strings),
    ("length", AttributeKind::Expr),
    ("when", AttributeKind::Expr),
    ("cstring", AttributeKind::Flag),
    ("self_type", AttributeKind::Flag),
];

/// Which attributes apply to one member or type, and where their payloads live.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "manifest", derive(serde::Serialize, serde::Deserialize))]
pub struct AttributeSet {
    present: [u64; WORDS],
    valued: [u64; WORDS],
    payloads: Vec<PoolOffset>,
}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.present.iter().all(|w| *w == 0)
    }

    pub fn len(&self) -> usize {
        self.present.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn contains(&self, id: impl Into<AttributeId>) -> bool {
        let id = id.into();
        self.present[id.word()] & id.bit() != 0
    }

    /// Pool offset of a value-bearing attribute, `None` for absent attributes and flags.
    pub fn payload(&self, id: impl Into<AttributeId>) -> Option<PoolOffset> {
        let id = id.into();
        if self.valued[id.word()] & id.bit() == 0 {
            return None;
        }
        self.payloads.get(self.rank(id)).copied()
    }

    pub fn insert_flag(&mut self, id: impl Into<AttributeId>) {
        let id = id.into();
        self.present[id.word()] |= id.bit();
    }

    /// Attach a payload, replacing any previous payload of the same attribute.
    pub fn insert(&mut self, id: impl Into<AttributeId>, offset: PoolOffset) {
        let id = id.into();
        let slot = self.rank(id);
        if self.valued[id.word()] & id.bit() != 0 {
            self.payloads[slot] = offset;
            return;
        }
        self.present[id.word()] |= id.bit();
        self.valued[id.word()] |= id.bit();
        self.payloads.insert(slot, offset);
    }

    pub fn remove(&mut self, id: impl Into<AttributeId>) {
        let id = id.into();
        if self.valued[id.word()] & id.bit() != 0 {
            let slot = self.rank(id);
            self.payloads.remove(slot);
            self.valued[id.word()] &= !id.bit();
        }
        self.present[id.word()] &= !id.bit();
    }

    /// Ids present in this set, ascending.
    pub fn iter(&self) -> impl Iterator<Item = AttributeId> + '_ {
        (0..ATTRIBUTE_CAPACITY as u8)
            .map(AttributeId)
            .filter(|id| self.present[id.word()] & id.bit() != 0)
    }

    /// Number of value-bearing attributes with an id below `id`.
    fn rank(&self, id: AttributeId) -> usize {
        let below = id.bit() - 1;
        let full: u32 = self.valued[..id.word()].iter().map(|w| w.count_ones()).sum();
        (full + (self.valued[id.word()] & below).count_ones()) as usize
    }
}
