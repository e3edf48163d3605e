//! Reference walkers: rewrite or search the object references held by a value.

use std::any::Any;
use std::collections::{HashMap, HashSet};

use super::{dispatch, for_each_field, for_each_field_mut, FieldVisitor, ObjectRefRemap};
use crate::descriptor::{
    ClassDescriptor, ContainerDescriptor, DescriptorId, EnumDescriptor, MapDescriptor,
    PairDescriptor, PrimitiveDescriptor, QualifiedDescriptor, TypeDescriptor,
};
use crate::object_ref::ObjectId;
use crate::registry::TypeRegistry;

struct ReplaceRefs<'r> {
    registry: &'r TypeRegistry,
    remap: &'r dyn ObjectRefRemap,
    replaced: usize,
}

impl<'v> FieldVisitor<&'v mut dyn Any> for ReplaceRefs<'_> {
    fn visit_fundamental(&mut self, _: &TypeDescriptor, _: &PrimitiveDescriptor, _: &'v mut dyn Any) {}

    fn visit_struct(&mut self, _ty: &TypeDescriptor, class: &ClassDescriptor, value: &'v mut dyn Any) {
        let registry = self.registry;
        for_each_field_mut(registry, class, value, &mut |field, ty, field_value| {
            if registry.may_hold_refs(field.value_type()) {
                dispatch(self, ty, field_value);
            }
        });
    }

    fn visit_enum(&mut self, _: &TypeDescriptor, _: &EnumDescriptor, _: &'v mut dyn Any) {}

    fn visit_container(
        &mut self,
        _ty: &TypeDescriptor,
        container: &ContainerDescriptor,
        value: &'v mut dyn Any,
    ) {
        if !self.registry.may_hold_refs(container.element) {
            return;
        }
        // Set elements may change their hash, so every element is re-inserted.
        let element_ty = self.registry.get(container.element);
        for mut element in container.retriever.drain(value) {
            dispatch(self, &element_ty, &mut *element);
            container.retriever.add(value, element);
        }
    }

    fn visit_map(&mut self, _ty: &TypeDescriptor, map: &MapDescriptor, value: &'v mut dyn Any) {
        if !self.registry.may_hold_refs(map.entry) {
            return;
        }
        let entry_ty = self.registry.get(map.entry);
        for mut entry in map.retriever.drain(value) {
            dispatch(self, &entry_ty, &mut *entry);
            map.retriever.add_entry(value, entry);
        }
    }

    fn visit_pair(&mut self, _ty: &TypeDescriptor, pair: &PairDescriptor, value: &'v mut dyn Any) {
        let first_ty = self.registry.get(pair.first);
        let second_ty = self.registry.get(pair.second);
        if let Some(first) = pair.retriever.first_mut(value) {
            dispatch(self, &first_ty, first);
        }
        if let Some(second) = pair.retriever.second_mut(value) {
            dispatch(self, &second_ty, second);
        }
    }

    fn visit_object_ref(
        &mut self,
        _ty: &TypeDescriptor,
        qualified: &QualifiedDescriptor,
        value: &'v mut dyn Any,
    ) {
        let Some(Some(target)) = (qualified.get)(value) else {
            return;
        };
        let replacement = self.remap.remap(Some(target));
        if replacement != Some(target) && (qualified.set)(value, replacement) {
            self.replaced += 1;
        }
    }
}

/// Rewrites every reference in `object` that is a key of `replacements`.
///
/// Returns the number of references rewritten.
pub fn replace_refs_in(
    registry: &TypeRegistry,
    class: DescriptorId,
    object: &mut dyn Any,
    replacements: &HashMap<ObjectId, ObjectId>,
) -> usize {
    if replacements.is_empty() {
        return 0;
    }
    let remap = |target: Option<ObjectId>| {
        target.map(|id| replacements.get(&id).copied().unwrap_or(id))
    };
    rewrite_refs(registry, class, object, &remap)
}

/// Nulls every reference in `object` that points at one of `targets`.
///
/// Returns the number of references cleared.
pub fn clear_refs_in(
    registry: &TypeRegistry,
    class: DescriptorId,
    object: &mut dyn Any,
    targets: &HashSet<ObjectId>,
) -> usize {
    if targets.is_empty() {
        return 0;
    }
    let remap = |target: Option<ObjectId>| target.filter(|id| !targets.contains(id));
    rewrite_refs(registry, class, object, &remap)
}

fn rewrite_refs(
    registry: &TypeRegistry,
    class: DescriptorId,
    object: &mut dyn Any,
    remap: &dyn ObjectRefRemap,
) -> usize {
    if !registry.may_hold_refs(class) {
        return 0;
    }
    let ty = registry.get(class);
    let mut visitor = ReplaceRefs {
        registry,
        remap,
        replaced: 0,
    };
    dispatch(&mut visitor, &ty, object);
    visitor.replaced
}

/// A reference found by [`find_refs_in`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FoundRef {
    /// Top-level field holding the reference.
    pub field: &'static str,
    /// Referenced object.
    pub target: ObjectId,
}

struct FindRefs<'r> {
    registry: &'r TypeRegistry,
    targets: &'r HashSet<ObjectId>,
    field: &'static str,
    found: Vec<FoundRef>,
}

impl<'v> FieldVisitor<&'v dyn Any> for FindRefs<'_> {
    fn visit_fundamental(&mut self, _: &TypeDescriptor, _: &PrimitiveDescriptor, _: &'v dyn Any) {}

    fn visit_struct(&mut self, _ty: &TypeDescriptor, class: &ClassDescriptor, value: &'v dyn Any) {
        let registry = self.registry;
        for_each_field(registry, class, value, &mut |field, ty, field_value| {
            if registry.may_hold_refs(field.value_type()) {
                dispatch(self, ty, field_value);
            }
        });
    }

    fn visit_enum(&mut self, _: &TypeDescriptor, _: &EnumDescriptor, _: &'v dyn Any) {}

    fn visit_container(
        &mut self,
        _ty: &TypeDescriptor,
        container: &ContainerDescriptor,
        value: &'v dyn Any,
    ) {
        if !self.registry.may_hold_refs(container.element) {
            return;
        }
        let element_ty = self.registry.get(container.element);
        for element in container.retriever.iter(value) {
            dispatch(self, &element_ty, element);
        }
    }

    fn visit_map(&mut self, _ty: &TypeDescriptor, map: &MapDescriptor, value: &'v dyn Any) {
        let key_ty = self.registry.get(map.key);
        let value_ty = self.registry.get(map.value);
        let keys = self.registry.may_hold_refs(map.key);
        let values = self.registry.may_hold_refs(map.value);
        if !keys && !values {
            return;
        }
        for (key, entry_value) in map.retriever.iter(value) {
            if keys {
                dispatch(self, &key_ty, key);
            }
            if values {
                dispatch(self, &value_ty, entry_value);
            }
        }
    }

    fn visit_pair(&mut self, _ty: &TypeDescriptor, pair: &PairDescriptor, value: &'v dyn Any) {
        let first_ty = self.registry.get(pair.first);
        let second_ty = self.registry.get(pair.second);
        if let Some(first) = pair.retriever.first(value) {
            dispatch(self, &first_ty, first);
        }
        if let Some(second) = pair.retriever.second(value) {
            dispatch(self, &second_ty, second);
        }
    }

    fn visit_object_ref(
        &mut self,
        _ty: &TypeDescriptor,
        qualified: &QualifiedDescriptor,
        value: &'v dyn Any,
    ) {
        if let Some(Some(target)) = (qualified.get)(value) {
            if self.targets.contains(&target) {
                self.found.push(FoundRef {
                    field: self.field,
                    target,
                });
            }
        }
    }
}

/// Lists every reference in `object` that points at one of `targets`.
#[must_use]
pub fn find_refs_in(
    registry: &TypeRegistry,
    class: DescriptorId,
    object: &dyn Any,
    targets: &HashSet<ObjectId>,
) -> Vec<FoundRef> {
    let ty = registry.get(class);
    let Some(class) = ty.as_class() else {
        return Vec::new();
    };
    if targets.is_empty() {
        return Vec::new();
    }

    let mut visitor = FindRefs {
        registry,
        targets,
        field: "",
        found: Vec::new(),
    };
    for_each_field(registry, class, object, &mut |field, field_ty, value| {
        if registry.may_hold_refs(field.value_type()) {
            visitor.field = field.name();
            dispatch(&mut visitor, field_ty, value);
        }
    });
    visitor.found
}
