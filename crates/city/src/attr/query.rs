// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Attribute lookups against a [`Schema`].

use super::{kind, Attr, AttributeId, AttributeKind, AttributeSet, LENGTH};
use crate::expr::run_expression;
use crate::memory::{Container, Heap, MemoryError};
use crate::schema::{Schema, TypeId, TypeKind};

/// Type of the bytes a [`Variant`] points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Flag,
    Int,
    Float,
    Str,
    Strings,
    Member,
    Program,
    /// Native representation of a value of this type.
    Typed(TypeId),
}

/// View of an attribute payload inside the value pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Variant<'a> {
    pub data: &'a [u8],
    pub ty: ValueType,
}

pub fn has_attribute(set: &AttributeSet, id: impl Into<AttributeId>) -> bool {
    set.contains(id)
}

/// Untyped lookup.
///
/// `ty` is the type of the annotated member; it decides the extent of
/// `default`-style payloads. Strings and payloads of pointer members are
/// followed one level, so `data` is the string (without terminator) or the
/// pointee bytes (with terminator).
pub fn attribute_value<'a>(
    schema: &'a Schema,
    ty: TypeId,
    set: &AttributeSet,
    id: impl Into<AttributeId>,
) -> Option<Variant<'a>> {
    let id = id.into();
    if !set.contains(id) {
        return None;
    }
    let kind = schema.registry().def(id)?.kind;
    let pool = schema.pool();
    if !kind.carries_value() {
        return Some(Variant {
            data: &[],
            ty: ValueType::Flag,
        });
    }
    let offset = set.payload(id)?;
    let (data, value_ty) = match kind {
        AttributeKind::Flag => unreachable!("flags carry no payload"),
        AttributeKind::Int => (pool.tail(offset)?.get(..8)?, ValueType::Int),
        AttributeKind::Float => (pool.tail(offset)?.get(..8)?, ValueType::Float),
        AttributeKind::Member => (pool.tail(offset)?.get(..8)?, ValueType::Member),
        AttributeKind::Str => {
            let target = pool.follow(offset)?;
            (pool.cstr(target)?.as_bytes(), ValueType::Str)
        }
        AttributeKind::Strings => (pool.tail(offset)?, ValueType::Strings),
        AttributeKind::Expr => (pool.tail(offset)?, ValueType::Program),
        AttributeKind::Value => {
            let t = schema.ty(ty);
            if matches!(t.kind, TypeKind::Pointer { .. }) {
                let target = pool.follow(offset)?;
                let tail = pool.tail(target)?;
                let end = tail.iter().position(|b| *b == 0)?;
                (&tail[..=end], ValueType::Typed(ty))
            } else {
                (pool.tail(offset)?.get(..t.size)?, ValueType::Typed(ty))
            }
        }
    };
    Some(Variant {
        data,
        ty: value_ty,
    })
}

pub fn attribute_int(schema: &Schema, set: &AttributeSet, attr: Attr<kind::Int>) -> Option<i64> {
    schema.pool().read_i64(set.payload(attr)?)
}

pub fn attribute_float(
    schema: &Schema,
    set: &AttributeSet,
    attr: Attr<kind::Float>,
) -> Option<f64> {
    schema.pool().read_f64(set.payload(attr)?)
}

pub fn attribute_str<'a>(
    schema: &'a Schema,
    set: &AttributeSet,
    attr: Attr<kind::Str>,
) -> Option<&'a str> {
    let pool = schema.pool();
    pool.cstr(pool.follow(set.payload(attr)?)?)
}

/// Strings of a list attribute; empty when absent.
pub fn attribute_strings<'a>(
    schema: &'a Schema,
    set: &AttributeSet,
    attr: Attr<kind::Strings>,
) -> impl Iterator<Item = &'a str> + 'a {
    let pool = schema.pool();
    set.payload(attr)
        .into_iter()
        .flat_map(move |offset| pool.strings(offset))
}

/// Compiled program bytes, ready for [`run_expression`].
pub fn attribute_program<'a>(
    schema: &'a Schema,
    set: &AttributeSet,
    attr: Attr<kind::Expr>,
) -> Option<&'a [u8]> {
    schema.pool().tail(set.payload(attr)?)
}

/// Index of the sibling member referenced by the attribute.
pub fn attribute_member(
    schema: &Schema,
    set: &AttributeSet,
    attr: Attr<kind::Member>,
) -> Option<usize> {
    let index = schema.pool().read_i64(set.payload(attr)?)?;
    usize::try_from(index).ok()
}

/// Evaluate the `length` program of `container` against its parent record
/// (or the container itself at the root). `None` means no `length`
/// attribute: the caller falls back to the static extent. A context record
/// outside the heap is an error.
pub fn attribute_length(
    schema: &Schema,
    heap: &Heap,
    container: &Container<'_>,
) -> Result<Option<i64>, MemoryError> {
    let Some(program) = attribute_program(schema, container.attrs, LENGTH) else {
        return Ok(None);
    };
    let context = container.parent.unwrap_or(container);
    let data = heap.bytes(context.addr, schema.ty(context.ty).size)?;
    Ok(Some(run_expression(program, data).as_i64()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::{ALIAS, CSTRING, DEFAULT, ID, PERSIST, WHEN};
    use crate::schema::{Literal, MemberDecl, Primitive, SchemaBuilder};

    fn sample() -> (Schema, TypeId) {
        let mut builder = SchemaBuilder::new();
        let unit = builder
            .registry_mut()
            .register::<kind::Str>("unit")
            .expect("register");
        let scale = builder
            .registry_mut()
            .register::<kind::Float>("scale")
            .expect("register");
        let u32_t = builder.primitive(Primitive::U32);
        let f64_t = builder.primitive(Primitive::F64);
        let string = builder.string();
        let record = builder
            .record(
                "Reading",
                vec![
                    MemberDecl::new("count", u32_t).id(3).default(Literal::Int(12)),
                    MemberDecl::new("value", f64_t)
                        .alias(&["val", "v"])
                        .with_str(unit, "kelvin")
                        .with_float(scale, 0.5),
                    MemberDecl::new("label", string).default(Literal::Str("n/a".into())),
                    MemberDecl::new("samples", u32_t).transient(),
                ],
            )
            .expect("record");
        (builder.finish().expect("finish"), record)
    }

    #[test]
    fn test_typed_queries() {
        let (schema, record) = sample();
        let count = schema.member(record, "count").expect("count");
        let value = schema.member(record, "value").expect("value");
        let unit = schema.registry().resolve::<kind::Str>("unit").expect("unit");
        let scale = schema
            .registry()
            .resolve::<kind::Float>("scale")
            .expect("scale");

        assert_eq!(attribute_int(&schema, &count.attrs, ID), Some(3));
        assert_eq!(attribute_int(&schema, &value.attrs, ID), None);
        assert_eq!(attribute_str(&schema, &value.attrs, unit), Some("kelvin"));
        assert_eq!(attribute_float(&schema, &value.attrs, scale), Some(0.5));
        assert_eq!(
            attribute_strings(&schema, &value.attrs, ALIAS).collect::<Vec<_>>(),
            vec!["val", "v"]
        );
        assert_eq!(attribute_strings(&schema, &count.attrs, ALIAS).count(), 0);
    }

    #[test]
    fn test_persist_defaults_on() {
        let (schema, record) = sample();
        assert!(has_attribute(&schema.member(record, "count").expect("m").attrs, PERSIST));
        assert!(!has_attribute(&schema.member(record, "samples").expect("m").attrs, PERSIST));
    }

    #[test]
    fn test_value_variants() {
        let (schema, record) = sample();
        let count = schema.member(record, "count").expect("count");
        let variant = attribute_value(&schema, count.ty, &count.attrs, DEFAULT).expect("default");
        assert_eq!(variant.ty, ValueType::Typed(count.ty));
        assert_eq!(variant.data, &12u32.to_le_bytes());

        let label = schema.member(record, "label").expect("label");
        assert!(has_attribute(&label.attrs, CSTRING));
        let variant = attribute_value(&schema, label.ty, &label.attrs, DEFAULT).expect("default");
        assert_eq!(variant.data, b"n/a\0");

        let flag = attribute_value(&schema, label.ty, &label.attrs, PERSIST).expect("flag");
        assert_eq!(flag.ty, ValueType::Flag);
        assert!(attribute_value(&schema, label.ty, &label.attrs, WHEN).is_none());
    }

    #[test]
    fn test_length_runs_against_parent() {
        let mut builder = SchemaBuilder::new();
        let u32_t = builder.primitive(Primitive::U32);
        let u16_t = builder.primitive(Primitive::U16);
        let values = builder.pointer(u16_t);
        let record = builder
            .record(
                "Samples",
                vec![
                    MemberDecl::new("n", u32_t),
                    MemberDecl::new("values", values).length("n * 2"),
                ],
            )
            .expect("record");
        let schema = builder.finish().expect("finish");

        let mut heap = Heap::new();
        let at = heap.alloc(schema.ty(record).size);
        heap.write_u32(at, 5).expect("write");

        let root_attrs = AttributeSet::new();
        let parent = Container::root(record, at, &root_attrs);
        let member = schema.member(record, "values").expect("values");
        let field = parent.child(member.ty, at.add(member.offset), &member.attrs);
        assert_eq!(attribute_length(&schema, &heap, &field), Ok(Some(10)));

        let n = schema.member(record, "n").expect("n");
        let plain = parent.child(n.ty, at, &n.attrs);
        assert_eq!(attribute_length(&schema, &heap, &plain), Ok(None));

        let freed = heap.alloc(schema.ty(record).size);
        heap.release(freed);
        let stale = Container::root(record, freed, &root_attrs);
        let field = stale.child(member.ty, freed.add(member.offset), &member.attrs);
        assert!(matches!(
            attribute_length(&schema, &heap, &field),
            Err(MemoryError::InvalidAddress { .. })
        ));
    }
}
