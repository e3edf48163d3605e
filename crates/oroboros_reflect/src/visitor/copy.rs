//! Deep copy between two values of the same reflected type.
//!
//! Elements of containers, maps and pairs are copied into freshly constructed scratch values
//! that are then moved into the destination, so source and destination never share storage.

use std::any::Any;

use super::{dispatch, for_each_field_pair, FieldVisitor};
use crate::descriptor::{
    ClassDescriptor, ContainerDescriptor, DescriptorId, EnumDescriptor, MapDescriptor,
    PairDescriptor, PrimitiveDescriptor, QualifiedDescriptor, TypeDescriptor, TypeKind,
};
use crate::object_ref::ObjectId;
use crate::registry::TypeRegistry;

/// Redirects object references while they are copied.
pub trait ObjectRefRemap {
    /// Returns the reference to store in the destination.
    fn remap(&self, target: Option<ObjectId>) -> Option<ObjectId>;
}

impl<F: Fn(Option<ObjectId>) -> Option<ObjectId>> ObjectRefRemap for F {
    fn remap(&self, target: Option<ObjectId>) -> Option<ObjectId> {
        self(target)
    }
}

struct DeepCopy<'r> {
    registry: &'r TypeRegistry,
    remap: &'r dyn ObjectRefRemap,
}

impl<'f, 't> FieldVisitor<(&'f dyn Any, &'t mut dyn Any)> for DeepCopy<'_> {
    fn visit_fundamental(
        &mut self,
        ty: &TypeDescriptor,
        primitive: &PrimitiveDescriptor,
        (from, to): (&'f dyn Any, &'t mut dyn Any),
    ) {
        if !(primitive.copy)(from, to) {
            debug_assert!(false, "copy between values not of type {}", ty.name());
        }
    }

    fn visit_struct(
        &mut self,
        _ty: &TypeDescriptor,
        class: &ClassDescriptor,
        (from, to): (&'f dyn Any, &'t mut dyn Any),
    ) {
        let registry = self.registry;
        for_each_field_pair(registry, class, from, to, &mut |_, ty, from, to| {
            dispatch(self, ty, (from, to));
        });
    }

    fn visit_enum(
        &mut self,
        _ty: &TypeDescriptor,
        descriptor: &EnumDescriptor,
        (from, to): (&'f dyn Any, &'t mut dyn Any),
    ) {
        if let Some(raw) = (descriptor.get)(from) {
            (descriptor.set)(to, raw);
        }
    }

    fn visit_container(
        &mut self,
        _ty: &TypeDescriptor,
        container: &ContainerDescriptor,
        (from, to): (&'f dyn Any, &'t mut dyn Any),
    ) {
        let element_ty = self.registry.get(container.element);
        container.retriever.clear(to);
        for element in container.retriever.iter(from) {
            let mut scratch = container.retriever.construct();
            dispatch(self, &element_ty, (element, &mut *scratch));
            container.retriever.add(to, scratch);
        }
    }

    fn visit_map(
        &mut self,
        _ty: &TypeDescriptor,
        map: &MapDescriptor,
        (from, to): (&'f dyn Any, &'t mut dyn Any),
    ) {
        let entry_ty = self.registry.get(map.entry);
        let TypeKind::Pair(entry) = entry_ty.kind() else {
            return;
        };
        let key_ty = self.registry.get(map.key);
        let value_ty = self.registry.get(map.value);

        map.retriever.clear(to);
        for (key, value) in map.retriever.iter(from) {
            let mut scratch = map.retriever.construct_entry();
            if let Some(scratch_key) = entry.retriever.first_mut(&mut *scratch) {
                dispatch(self, &key_ty, (key, scratch_key));
            }
            if let Some(scratch_value) = entry.retriever.second_mut(&mut *scratch) {
                dispatch(self, &value_ty, (value, scratch_value));
            }
            map.retriever.add_entry(to, scratch);
        }
    }

    fn visit_pair(
        &mut self,
        _ty: &TypeDescriptor,
        pair: &PairDescriptor,
        (from, to): (&'f dyn Any, &'t mut dyn Any),
    ) {
        let first_ty = self.registry.get(pair.first);
        let second_ty = self.registry.get(pair.second);
        if let (Some(from_first), Some(to_first)) =
            (pair.retriever.first(from), pair.retriever.first_mut(to))
        {
            dispatch(self, &first_ty, (from_first, to_first));
        }
        if let (Some(from_second), Some(to_second)) =
            (pair.retriever.second(from), pair.retriever.second_mut(to))
        {
            dispatch(self, &second_ty, (from_second, to_second));
        }
    }

    fn visit_object_ref(
        &mut self,
        _ty: &TypeDescriptor,
        qualified: &QualifiedDescriptor,
        (from, to): (&'f dyn Any, &'t mut dyn Any),
    ) {
        if let Some(target) = (qualified.get)(from) {
            (qualified.set)(to, self.remap.remap(target));
        }
    }
}

/// Deep-copies every field of `from` into `to`. Both must be instances of `class`.
pub fn copy_fields(
    registry: &TypeRegistry,
    class: DescriptorId,
    from: &dyn Any,
    to: &mut dyn Any,
    remap: &dyn ObjectRefRemap,
) {
    let ty = registry.get(class);
    if let Some(class) = ty.as_class() {
        let mut visitor = DeepCopy { registry, remap };
        for_each_field_pair(registry, class, from, to, &mut |_, field_ty, from, to| {
            dispatch(&mut visitor, field_ty, (from, to));
        });
    }
}

/// Deep-copies a value of any reflected type.
pub fn copy_value(
    registry: &TypeRegistry,
    ty: DescriptorId,
    from: &dyn Any,
    to: &mut dyn Any,
    remap: &dyn ObjectRefRemap,
) {
    let ty = registry.get(ty);
    dispatch(&mut DeepCopy { registry, remap }, &ty, (from, to));
}
