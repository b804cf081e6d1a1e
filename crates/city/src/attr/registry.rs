// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Attribute name → id registry.

use super::{Attr, AttributeId, AttributeKind, Payload, ATTRIBUTE_CAPACITY, BUILTINS};
use std::collections::HashMap;
use thiserror::Error;

/// One registered attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "manifest", derive(serde::Serialize, serde::Deserialize))]
pub struct AttributeDef {
    pub name: String,
    pub kind: AttributeKind,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttributeError {
    #[error("attribute '{name}' is registered as {registered:?}, requested as {requested:?}")]
    KindMismatch {
        name: String,
        registered: AttributeKind,
        requested: AttributeKind,
    },

    #[error("unknown attribute '{0}'")]
    Unknown(String),

    #[error("attribute capacity exhausted ({} ids)", ATTRIBUTE_CAPACITY)]
    CapacityExhausted,
}

/// Maps attribute names to ids and payload kinds.
///
/// The built-in attributes (`persist`, `id`, `default`, `alias`, `length`,
/// `when`, `cstring`, `self_type`) always occupy ids 0-7.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "manifest", derive(serde::Serialize, serde::Deserialize))]
pub struct AttributeRegistry {
    defs: Vec<AttributeDef>,
    #[cfg_attr(feature = "manifest", serde(skip))]
    by_name: HashMap<String, AttributeId>,
}

impl AttributeRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            defs: Vec::with_capacity(BUILTINS.len()),
            by_name: HashMap::new(),
        };
        for (name, kind) in BUILTINS {
            registry.push(name, kind);
        }
        registry
    }

    fn push(&mut self, name: &str, kind: AttributeKind) -> AttributeId {
        let id = AttributeId::new(self.defs.len() as u8);
        self.defs.push(AttributeDef {
            name: name.to_string(),
            kind,
        });
        self.by_name.insert(name.to_string(), id);
        id
    }

    /// Register a custom attribute, or return the existing key when the name
    /// is already registered with the same kind.
    pub fn register<K: Payload>(&mut self, name: &str) -> Result<Attr<K>, AttributeError> {
        if let Some(id) = self.lookup(name) {
            return self.typed(name, id);
        }
        if self.defs.len() >= ATTRIBUTE_CAPACITY {
            return Err(AttributeError::CapacityExhausted);
        }
        let id = self.push(name, K::KIND);
        log::trace!("[city::attr] registered '{}' as {} ({:?})", name, id, K::KIND);
        Ok(Attr::from_id(id))
    }

    /// Typed key of an already registered attribute.
    pub fn resolve<K: Payload>(&self, name: &str) -> Result<Attr<K>, AttributeError> {
        let id = self
            .lookup(name)
            .ok_or_else(|| AttributeError::Unknown(name.to_string()))?;
        self.typed(name, id)
    }

    fn typed<K: Payload>(&self, name: &str, id: AttributeId) -> Result<Attr<K>, AttributeError> {
        let registered = self.defs[id.index()].kind;
        if registered != K::KIND {
            return Err(AttributeError::KindMismatch {
                name: name.to_string(),
                registered,
                requested: K::KIND,
            });
        }
        Ok(Attr::from_id(id))
    }

    pub fn lookup(&self, name: &str) -> Option<AttributeId> {
        self.by_name.get(name).copied()
    }

    pub fn def(&self, id: impl Into<AttributeId>) -> Option<&AttributeDef> {
        self.defs.get(id.into().index())
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (AttributeId, &AttributeDef)> {
        self.defs
            .iter()
            .enumerate()
            .map(|(i, def)| (AttributeId::new(i as u8), def))
    }

    /// Rebuild the name index after deserialization.
    #[cfg(feature = "manifest")]
    pub(crate) fn reindex(&mut self) {
        self.by_name = self
            .defs
            .iter()
            .enumerate()
            .map(|(i, def)| (def.name.clone(), AttributeId::new(i as u8)))
            .collect();
    }
}

impl Default for AttributeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
