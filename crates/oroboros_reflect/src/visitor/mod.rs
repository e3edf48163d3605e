//! # Field Visitor Engine
//!
//! One traversal, many strategies. [`dispatch`] looks at a descriptor's kind and calls the
//! matching [`FieldVisitor`] callback; the strategies recurse back through `dispatch` for
//! nested values.
//!
//! | Strategy      | Value shape                  | Entry point          |
//! |---------------|------------------------------|----------------------|
//! | Binary write  | `&dyn Any`                   | [`write_fields`]     |
//! | Binary read   | `&mut dyn Any`               | [`read_fields`]      |
//! | Deep copy     | `(&dyn Any, &mut dyn Any)`   | [`copy_fields`]      |
//! | Ref replace   | `&mut dyn Any`               | [`replace_refs_in`]  |
//! | Ref search    | `&dyn Any`                   | [`find_refs_in`]     |

mod copy;
mod read;
mod refs;
mod write;

use std::any::Any;

pub use copy::{copy_fields, copy_value, ObjectRefRemap};
pub use read::{read_fields, ReadOptions, ReadReport};
pub use refs::{clear_refs_in, find_refs_in, replace_refs_in, FoundRef};
pub use write::{
    write_fields, ObjectRefCodec, RawIdCodec, OBJECT_FIELDS_MIN_VERSION, OBJECT_FIELDS_VERSION,
    OBJECT_FIELDS_VERSION_TAG,
};

use crate::descriptor::{
    ClassDescriptor, ContainerDescriptor, EnumDescriptor, FieldDescriptor, MapDescriptor,
    PairDescriptor, PrimitiveDescriptor, QualifiedDescriptor, TypeDescriptor, TypeKind,
};
use crate::registry::TypeRegistry;

/// Per-kind callbacks of a traversal strategy.
pub trait FieldVisitor<V> {
    /// Numbers and booleans.
    fn visit_fundamental(&mut self, ty: &TypeDescriptor, primitive: &PrimitiveDescriptor, value: V);

    /// Opaque special values. Treated as fundamentals unless overridden.
    fn visit_special(&mut self, ty: &TypeDescriptor, primitive: &PrimitiveDescriptor, value: V) {
        self.visit_fundamental(ty, primitive, value);
    }

    /// A nested class or struct value.
    fn visit_struct(&mut self, ty: &TypeDescriptor, class: &ClassDescriptor, value: V);

    /// Enum or flags value.
    fn visit_enum(&mut self, ty: &TypeDescriptor, descriptor: &EnumDescriptor, value: V);

    /// Array or set.
    fn visit_container(&mut self, ty: &TypeDescriptor, container: &ContainerDescriptor, value: V);

    /// Key/value map.
    fn visit_map(&mut self, ty: &TypeDescriptor, map: &MapDescriptor, value: V);

    /// Two-element tuple.
    fn visit_pair(&mut self, ty: &TypeDescriptor, pair: &PairDescriptor, value: V);

    /// Reference to an engine object.
    fn visit_object_ref(&mut self, ty: &TypeDescriptor, qualified: &QualifiedDescriptor, value: V);
}

/// Routes `value` to the callback matching the kind of `ty`.
pub fn dispatch<V, F: FieldVisitor<V> + ?Sized>(visitor: &mut F, ty: &TypeDescriptor, value: V) {
    match ty.kind() {
        TypeKind::Fundamental(primitive) => visitor.visit_fundamental(ty, primitive, value),
        TypeKind::Special(primitive) => visitor.visit_special(ty, primitive, value),
        TypeKind::Class(class) => visitor.visit_struct(ty, class, value),
        TypeKind::Enum(descriptor) => visitor.visit_enum(ty, descriptor, value),
        TypeKind::Container(container) => visitor.visit_container(ty, container, value),
        TypeKind::Map(map) => visitor.visit_map(ty, map, value),
        TypeKind::Pair(pair) => visitor.visit_pair(ty, pair, value),
        TypeKind::Qualified(qualified) => visitor.visit_object_ref(ty, qualified, value),
    }
}

/// Calls `f` for every field of `object`, base class fields first.
pub(crate) fn for_each_field(
    registry: &TypeRegistry,
    class: &ClassDescriptor,
    object: &dyn Any,
    f: &mut dyn FnMut(&FieldDescriptor, &TypeDescriptor, &dyn Any),
) {
    if let Some(base) = class.base() {
        let base_ty = registry.get(base.class);
        if let (Some(base_class), Some(base_value)) = (base_ty.as_class(), base.accessor.get(object)) {
            for_each_field(registry, base_class, base_value, f);
        }
    }

    for field in class.fields() {
        let Some(value) = field.accessor().get(object) else {
            continue;
        };
        let ty = registry.get(field.value_type());
        f(field, &ty, value);
    }
}

/// Mutable variant of [`for_each_field`].
pub(crate) fn for_each_field_mut(
    registry: &TypeRegistry,
    class: &ClassDescriptor,
    object: &mut dyn Any,
    f: &mut dyn FnMut(&FieldDescriptor, &TypeDescriptor, &mut dyn Any),
) {
    if let Some(base) = class.base() {
        let base_ty = registry.get(base.class);
        if let (Some(base_class), Some(base_value)) =
            (base_ty.as_class(), base.accessor.get_mut(object))
        {
            for_each_field_mut(registry, base_class, base_value, f);
        }
    }

    for field in class.fields() {
        let Some(value) = field.accessor().get_mut(object) else {
            continue;
        };
        let ty = registry.get(field.value_type());
        f(field, &ty, value);
    }
}

/// Walks the same field of two instances of one class in lockstep.
pub(crate) fn for_each_field_pair(
    registry: &TypeRegistry,
    class: &ClassDescriptor,
    from: &dyn Any,
    to: &mut dyn Any,
    f: &mut dyn FnMut(&FieldDescriptor, &TypeDescriptor, &dyn Any, &mut dyn Any),
) {
    if let Some(base) = class.base() {
        let base_ty = registry.get(base.class);
        if let (Some(base_class), Some(base_from), Some(base_to)) = (
            base_ty.as_class(),
            base.accessor.get(from),
            base.accessor.get_mut(to),
        ) {
            for_each_field_pair(registry, base_class, base_from, base_to, f);
        }
    }

    for field in class.fields() {
        let (Some(from_value), Some(to_value)) =
            (field.accessor().get(from), field.accessor().get_mut(to))
        else {
            continue;
        };
        let ty = registry.get(field.value_type());
        f(field, &ty, from_value, to_value);
    }
}
