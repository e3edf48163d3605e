//! Binary field stream writer.
//!
//! ```text
//! repeat per field:  [name id u64][payload size u64][payload]
//! terminator:        [StringId::INVALID]
//! ```
//!
//! The payload size is patched in after the payload has been written, so readers can skip
//! fields they do not know.

use std::any::Any;
use std::collections::BTreeSet;

use super::{dispatch, for_each_field, FieldVisitor};
use crate::archive::{ArchiveReader, ArchiveWriter};
use crate::descriptor::{
    ClassDescriptor, ContainerDescriptor, DescriptorId, EnumDescriptor, MapDescriptor,
    PairDescriptor, PrimitiveDescriptor, QualifiedDescriptor, TypeDescriptor,
};
use crate::error::ArchiveResult;
use crate::name::StringId;
use crate::object_ref::ObjectId;
use crate::registry::TypeRegistry;

/// Custom version tag of field streams.
pub const OBJECT_FIELDS_VERSION_TAG: &str = "ObjectFieldsSerializer";
/// Version written by [`write_fields`].
pub const OBJECT_FIELDS_VERSION: u32 = 1;
/// Oldest field stream version [`read_fields`](super::read_fields) accepts.
pub const OBJECT_FIELDS_MIN_VERSION: u32 = 1;

/// Encoding of object references inside field streams.
///
/// The reflection layer does not know how objects are named; the object runtime supplies a
/// codec that writes stable paths.
pub trait ObjectRefCodec {
    /// Writes a reference.
    fn write_ref(&self, target: Option<ObjectId>, ar: &mut ArchiveWriter);

    /// Reads a reference written by [`ObjectRefCodec::write_ref`].
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is truncated or malformed.
    fn read_ref(&self, ar: &mut ArchiveReader<'_>) -> ArchiveResult<Option<ObjectId>>;
}

/// Writes raw [`ObjectId`] bits. Only meaningful inside one process lifetime.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawIdCodec;

const NULL_REF_BITS: u64 = u64::MAX;

impl ObjectRefCodec for RawIdCodec {
    fn write_ref(&self, target: Option<ObjectId>, ar: &mut ArchiveWriter) {
        ar.write(&target.map_or(NULL_REF_BITS, ObjectId::to_bits));
    }

    fn read_ref(&self, ar: &mut ArchiveReader<'_>) -> ArchiveResult<Option<ObjectId>> {
        let bits: u64 = ar.read()?;
        Ok((bits != NULL_REF_BITS).then(|| ObjectId::from_bits(bits)))
    }
}

struct FieldWriter<'r> {
    registry: &'r TypeRegistry,
    ar: &'r mut ArchiveWriter,
    refs: &'r dyn ObjectRefCodec,
}

impl<'v> FieldVisitor<&'v dyn Any> for FieldWriter<'_> {
    fn visit_fundamental(
        &mut self,
        ty: &TypeDescriptor,
        primitive: &PrimitiveDescriptor,
        value: &'v dyn Any,
    ) {
        if !(primitive.write)(value, self.ar) {
            debug_assert!(false, "value does not match descriptor {}", ty.name());
        }
    }

    fn visit_struct(&mut self, _ty: &TypeDescriptor, class: &ClassDescriptor, value: &'v dyn Any) {
        let registry = self.registry;
        for_each_field(registry, class, value, &mut |_, ty, field_value| {
            dispatch(self, ty, field_value);
        });
    }

    fn visit_enum(&mut self, _ty: &TypeDescriptor, descriptor: &EnumDescriptor, value: &'v dyn Any) {
        if descriptor.entries.is_empty() {
            return;
        }
        if let Some(raw) = (descriptor.get)(value) {
            descriptor.storage.write(self.ar, raw);
        }
    }

    fn visit_container(
        &mut self,
        _ty: &TypeDescriptor,
        container: &ContainerDescriptor,
        value: &'v dyn Any,
    ) {
        let element_ty = self.registry.get(container.element);
        self.ar.write(&(container.retriever.size(value) as u64));
        for element in container.retriever.iter(value) {
            dispatch(self, &element_ty, element);
        }
    }

    fn visit_map(&mut self, _ty: &TypeDescriptor, map: &MapDescriptor, value: &'v dyn Any) {
        let key_ty = self.registry.get(map.key);
        let value_ty = self.registry.get(map.value);
        self.ar.write(&(map.retriever.size(value) as u64));
        for (key, entry_value) in map.retriever.iter(value) {
            dispatch(self, &key_ty, key);
            dispatch(self, &value_ty, entry_value);
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
        let target = (qualified.get)(value).flatten();
        self.refs.write_ref(target, self.ar);
    }
}

/// Writes the fields of `object` as a length-framed field stream.
///
/// With a `filter`, only fields whose name id is in the set are written.
pub fn write_fields(
    registry: &TypeRegistry,
    class: DescriptorId,
    object: &dyn Any,
    ar: &mut ArchiveWriter,
    refs: &dyn ObjectRefCodec,
    filter: Option<&BTreeSet<StringId>>,
) {
    ar.set_custom_version(StringId::new(OBJECT_FIELDS_VERSION_TAG), OBJECT_FIELDS_VERSION);

    let ty = registry.get(class);
    if let Some(class) = ty.as_class() {
        for_each_field(registry, class, object, &mut |field, field_ty, value| {
            if filter.is_some_and(|names| !names.contains(&field.name_id())) {
                return;
            }

            ar.write(&field.name_id());
            ar.write(&0u64);
            let start = ar.cursor();
            dispatch(
                &mut FieldWriter {
                    registry,
                    ar: &mut *ar,
                    refs,
                },
                field_ty,
                value,
            );
            let size = ar.cursor() - start;

            ar.move_backward(size + 8);
            ar.write(&(size as u64));
            ar.move_forward(size);
        });
    }

    ar.write(&StringId::INVALID);
}
