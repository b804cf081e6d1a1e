// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Identifier resolution for expressions compiled against a record.

use super::{Schema, Type, TypeId, TypeKind};
use crate::expr::{Field, LoadKind, Scope};

/// Resolves expression identifiers against the members of `context`, the
/// enumeration constants and the named types of a schema.
#[derive(Debug, Clone, Copy)]
pub struct SchemaScope<'a> {
    types: &'a [Type],
    context: TypeId,
}

impl<'a> SchemaScope<'a> {
    pub fn new(schema: &'a Schema, context: TypeId) -> Self {
        Self {
            types: &schema.types,
            context,
        }
    }

    pub(crate) fn over(types: &'a [Type], context: TypeId) -> Self {
        Self { types, context }
    }

    fn ty(&self, id: TypeId) -> &'a Type {
        &self.types[id.index()]
    }
}

fn load_kind(ty: &Type) -> Option<LoadKind> {
    let kind = match (&ty.kind, ty.size) {
        (TypeKind::Unsigned, 1) => LoadKind::U8,
        (TypeKind::Unsigned, 2) => LoadKind::U16,
        (TypeKind::Unsigned, 4) => LoadKind::U32,
        (TypeKind::Unsigned, 8) => LoadKind::U64,
        (TypeKind::Signed | TypeKind::Enum { .. }, 1) => LoadKind::I8,
        (TypeKind::Signed | TypeKind::Enum { .. }, 2) => LoadKind::I16,
        (TypeKind::Signed | TypeKind::Enum { .. }, 4) => LoadKind::I32,
        (TypeKind::Signed | TypeKind::Enum { .. }, 8) => LoadKind::I64,
        (TypeKind::Float, 4) => LoadKind::F32,
        (TypeKind::Float, 8) => LoadKind::F64,
        // Raw pointer value, so `ptr != 0` works.
        (TypeKind::Pointer { .. }, 8) => LoadKind::U64,
        _ => return None,
    };
    Some(kind)
}

impl Scope for SchemaScope<'_> {
    fn field(&self, path: &[&str]) -> Option<Field> {
        let mut ty = self.context;
        let mut offset = 0u64;
        for name in path {
            let member = self
                .ty(ty)
                .kind
                .members()?
                .iter()
                .find(|m| m.name.as_deref() == Some(*name))?;
            offset += member.offset as u64;
            ty = member.ty;
        }
        let t = self.ty(ty);
        Some(Field {
            offset,
            load: load_kind(t),
            size: t.size,
        })
    }

    fn constant(&self, name: &str) -> Option<i64> {
        self.types.iter().find_map(|t| match &t.kind {
            TypeKind::Enum { variants } => {
                variants.iter().find(|v| v.name == name).map(|v| v.value)
            }
            _ => None,
        })
    }

    fn size_of(&self, name: &str) -> Option<usize> {
        self.types
            .iter()
            .find(|t| t.name.as_deref() == Some(name))
            .map(|t| t.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{MemberDecl, Primitive, SchemaBuilder};

    #[test]
    fn test_nested_paths_and_constants() {
        let mut builder = SchemaBuilder::new();
        let u8_t = builder.primitive(Primitive::U8);
        let u16_t = builder.primitive(Primitive::U16);
        let f32_t = builder.primitive(Primitive::F32);
        builder
            .enumeration("Color", Primitive::U8, &[("RED", 1), ("BLUE", 4)])
            .expect("enum");
        let header = builder
            .record(
                "Header",
                vec![MemberDecl::new("tag", u8_t), MemberDecl::new("len", u16_t)],
            )
            .expect("header");
        let packet = builder
            .record(
                "Packet",
                vec![
                    MemberDecl::new("scale", f32_t),
                    MemberDecl::new("header", header),
                ],
            )
            .expect("packet");
        let schema = builder.finish().expect("finish");
        let scope = SchemaScope::new(&schema, packet);

        assert_eq!(
            scope.field(&["header", "len"]),
            Some(Field {
                offset: 6,
                load: Some(LoadKind::U16),
                size: 2
            })
        );
        assert_eq!(scope.field(&["scale"]).and_then(|f| f.load), Some(LoadKind::F32));
        assert_eq!(scope.field(&["header"]).map(|f| f.load), Some(None));
        assert_eq!(scope.field(&["header", "missing"]), None);
        assert_eq!(scope.constant("BLUE"), Some(4));
        assert_eq!(scope.size_of("Header"), Some(4));
        assert_eq!(scope.size_of("u16"), Some(2));
    }
}
