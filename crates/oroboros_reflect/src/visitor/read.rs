//! Binary field stream reader.
//!
//! Each known field is read with the archive limit set to the end of its payload, then the
//! cursor is moved to that end whatever the value consumed. Unknown fields and fields that fail
//! half-way are skipped the same way, so one bad field never costs the fields after it.

use std::any::Any;

use tracing::{debug, warn};

use super::write::{ObjectRefCodec, OBJECT_FIELDS_MIN_VERSION, OBJECT_FIELDS_VERSION_TAG};
use super::{dispatch, for_each_field_mut, FieldVisitor};
use crate::archive::ArchiveReader;
use crate::descriptor::{
    ClassDescriptor, ContainerDescriptor, DescriptorId, EnumDescriptor, MapDescriptor,
    PairDescriptor, PrimitiveDescriptor, QualifiedDescriptor, TypeDescriptor,
};
use crate::error::{ArchiveError, ArchiveResult};
use crate::name::StringId;
use crate::registry::TypeRegistry;

/// Default ceiling for a single field payload (64 MiB).
pub const DEFAULT_MAX_FIELD_PAYLOAD: u64 = 64 * 1024 * 1024;

/// Limits applied while reading field streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Payload sizes above this are treated as a corrupted length record.
    pub max_field_payload: u64,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            max_field_payload: DEFAULT_MAX_FIELD_PAYLOAD,
        }
    }
}

/// Outcome of [`read_fields`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadReport {
    /// Fields read successfully.
    pub read: usize,
    /// Name ids of fields the class does not have.
    pub skipped: Vec<StringId>,
    /// Name ids of fields whose payload or length record was damaged.
    pub corrupted: Vec<StringId>,
}

impl ReadReport {
    /// Checks whether every field in the stream was read.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.corrupted.is_empty()
    }
}

struct FieldReader<'r, 'a> {
    registry: &'r TypeRegistry,
    ar: &'r mut ArchiveReader<'a>,
    refs: &'r dyn ObjectRefCodec,
    error: Option<ArchiveError>,
}

impl FieldReader<'_, '_> {
    fn fail(&mut self, error: ArchiveError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn read_count(&mut self) -> Option<usize> {
        match self.ar.read::<u64>() {
            Ok(count) => {
                // Every element occupies at least one byte, anything beyond is a damaged count.
                let count = usize::try_from(count).unwrap_or(usize::MAX);
                Some(count.min(self.ar.remaining()))
            }
            Err(error) => {
                self.fail(error);
                None
            }
        }
    }
}

impl<'v> FieldVisitor<&'v mut dyn Any> for FieldReader<'_, '_> {
    fn visit_fundamental(
        &mut self,
        _ty: &TypeDescriptor,
        primitive: &PrimitiveDescriptor,
        value: &'v mut dyn Any,
    ) {
        if self.error.is_some() {
            return;
        }
        if let Err(error) = (primitive.read)(value, self.ar) {
            self.fail(error);
        }
    }

    fn visit_struct(&mut self, _ty: &TypeDescriptor, class: &ClassDescriptor, value: &'v mut dyn Any) {
        let registry = self.registry;
        for_each_field_mut(registry, class, value, &mut |_, ty, field_value| {
            if self.error.is_none() {
                dispatch(self, ty, field_value);
            }
        });
    }

    fn visit_enum(&mut self, ty: &TypeDescriptor, descriptor: &EnumDescriptor, value: &'v mut dyn Any) {
        if self.error.is_some() || descriptor.entries.is_empty() {
            return;
        }
        let raw = match descriptor.storage.read(self.ar) {
            Ok(raw) => raw,
            Err(error) => return self.fail(error),
        };
        match descriptor.validate(raw) {
            Some(valid) => {
                (descriptor.set)(value, valid);
            }
            None => warn!(
                enum_type = ty.name(),
                value = raw,
                "Unknown enum value in archive, keeping current value"
            ),
        }
    }

    fn visit_container(
        &mut self,
        _ty: &TypeDescriptor,
        container: &ContainerDescriptor,
        value: &'v mut dyn Any,
    ) {
        if self.error.is_some() {
            return;
        }
        container.retriever.clear(value);
        let Some(count) = self.read_count() else {
            return;
        };

        let element_ty = self.registry.get(container.element);
        for _ in 0..count {
            let mut element = container.retriever.construct();
            dispatch(self, &element_ty, &mut *element);
            if self.error.is_some() {
                break;
            }
            container.retriever.add(value, element);
        }
    }

    fn visit_map(&mut self, _ty: &TypeDescriptor, map: &MapDescriptor, value: &'v mut dyn Any) {
        if self.error.is_some() {
            return;
        }
        map.retriever.clear(value);
        let Some(count) = self.read_count() else {
            return;
        };

        let entry_ty = self.registry.get(map.entry);
        for _ in 0..count {
            let mut entry = map.retriever.construct_entry();
            dispatch(self, &entry_ty, &mut *entry);
            if self.error.is_some() {
                break;
            }
            map.retriever.add_entry(value, entry);
        }
    }

    fn visit_pair(&mut self, _ty: &TypeDescriptor, pair: &PairDescriptor, value: &'v mut dyn Any) {
        if self.error.is_some() {
            return;
        }
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
        if self.error.is_some() {
            return;
        }
        match self.refs.read_ref(self.ar) {
            Ok(target) => {
                (qualified.set)(value, target);
            }
            Err(error) => self.fail(error),
        }
    }
}

/// Reads a field stream written by [`write_fields`](super::write_fields) into `object`.
///
/// Fields missing from the stream keep their current values.
///
/// # Errors
///
/// Returns an error if the stream's field version is older than supported, or if the stream
/// ends before a field header or the terminator. Damaged field payloads are reported in the
/// [`ReadReport`] instead.
pub fn read_fields(
    registry: &TypeRegistry,
    class: DescriptorId,
    object: &mut dyn Any,
    ar: &mut ArchiveReader<'_>,
    refs: &dyn ObjectRefCodec,
    options: &ReadOptions,
) -> ArchiveResult<ReadReport> {
    ar.require_version(
        StringId::new(OBJECT_FIELDS_VERSION_TAG),
        OBJECT_FIELDS_MIN_VERSION,
    )?;

    let ty = registry.get(class);
    let mut report = ReadReport::default();
    loop {
        let name: StringId = ar.read()?;
        if !name.is_valid() {
            break;
        }

        let size: u64 = ar.read()?;
        if size > options.max_field_payload || size > ar.remaining() as u64 {
            warn!(
                class = ty.name(),
                field = %name,
                size,
                remaining = ar.remaining(),
                "Field length record is out of range, stopping field stream"
            );
            report.corrupted.push(name);
            break;
        }
        #[allow(clippy::cast_possible_truncation)]
        let end = ar.cursor() + size as usize;

        let found = registry.find_field(class, name).and_then(|path| {
            let field = path.field()?;
            let info = (field.value_type(), field.name());
            Some((path, info))
        });
        let Some((path, (value_type, field_name))) = found else {
            debug!(class = ty.name(), field = %name, "Skipping unknown field");
            report.skipped.push(name);
            ar.seek(end);
            continue;
        };
        let field_ty = registry.get(value_type);

        let outer_limit = ar.set_limit(end);
        let error = match path.get_mut(&mut *object) {
            Some(value) => {
                let mut reader = FieldReader {
                    registry,
                    ar: &mut *ar,
                    refs,
                    error: None,
                };
                dispatch(&mut reader, &field_ty, value);
                reader.error
            }
            None => None,
        };
        ar.set_limit(outer_limit);
        ar.seek(end);

        match error {
            Some(error) => {
                warn!(
                    class = ty.name(),
                    field = field_name,
                    %error,
                    "Field payload is damaged, skipped by its length record"
                );
                report.corrupted.push(name);
            }
            None => report.read += 1,
        }
    }

    Ok(report)
}
