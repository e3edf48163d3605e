//! # Object Templates
//!
//! A template owns one transient instance of a class, built either from the class itself or
//! by duplicating a parent template's instance. Edits are tracked per subobject as a set of
//! modified field ids; only those fields are written when the template is serialized.
//!
//! ## Stream Layout
//!
//! ```text
//! parent ref | class id | instance name | entry count
//! entry * count:   relative path | field count | field ids | cursor start (patched)
//! archive end (patched)
//! at each cursor start:  payload size u64 | filtered field stream
//! ```
//!
//! The entry table tells a reader where every subobject's data starts, so a single
//! subobject can be loaded without touching the rest of the stream.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use oroboros_reflect::{
    copy_value, read_fields, reflect_class, write_fields, ArchiveReader, ArchiveWriter,
    DescriptorId, FieldDescriptor, ObjPtr, ObjectId, ObjectRefCodec, ReadOptions, ReadReport,
    StringId,
};
use tracing::{debug, error, warn};

use crate::error::{ObjectsError, ObjectsResult};
use crate::object::helpers::remap_into;
use crate::object::{
    copy_object, CopyObjectOptions, CoreObjects, MutationPermit, ObjectClass, ObjectFlags,
    TraversalMode,
};

/// Custom version tag of template streams.
pub const OBJECT_TEMPLATE_VERSION_TAG: &str = "ObjectTemplateSerializer";
/// Version written by [`ObjectTemplate::serialize`].
pub const OBJECT_TEMPLATE_VERSION: u32 = 1;
/// Oldest template stream version [`ObjectTemplate::deserialize`] accepts.
pub const OBJECT_TEMPLATE_MIN_VERSION: u32 = 1;

/// Flags carried by a template's instance tree.
pub const TEMPLATE_INSTANCE_FLAGS: ObjectFlags = ObjectFlags::from_bits_truncate(
    ObjectFlags::TRANSIENT.bits() | ObjectFlags::TEMPLATE_DEFAULT.bits(),
);

/// Prototype object with per-field delta tracking.
///
/// Templates are engine objects; the functions below take the template's [`ObjectId`].
#[derive(Default, Debug)]
pub struct ObjectTemplate {
    /// Template this one derives from.
    parent: ObjPtr<ObjectTemplate>,
    /// Class name id of the instance.
    template_class: StringId,
    /// Name of the instance subobject.
    object_name: String,
    /// Relative subobject path ("" for the instance) to modified field ids.
    entries: BTreeMap<String, BTreeSet<StringId>>,
}

reflect_class!(ObjectTemplate {
    parent: ObjPtr<ObjectTemplate>,
    template_class: StringId,
    object_name: String,
    entries: BTreeMap<String, BTreeSet<StringId>>,
});

impl ObjectClass for ObjectTemplate {}

/// Outcome of [`ObjectTemplate::deserialize`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateLoad {
    /// Instance rebuilt by the load. `None` if the class could not be resolved.
    pub instance: Option<ObjectId>,
    /// Entries whose subobject no longer exists.
    pub dropped_entries: Vec<String>,
    /// Entries whose field stream was not read cleanly.
    pub field_reports: Vec<(String, ReadReport)>,
}

fn patch_u64(ar: &mut ArchiveWriter, at: usize, value: u64) {
    let back = ar.cursor();
    ar.seek(at);
    ar.write(&value);
    ar.seek(back);
}

impl ObjectTemplate {
    fn value<R>(
        objects: &CoreObjects,
        template: ObjectId,
        f: impl FnOnce(&Self) -> R,
    ) -> ObjectsResult<R> {
        objects
            .read::<Self, _>(template, f)
            .ok_or(ObjectsError::NotATemplate(template))
    }

    fn edit<R>(
        objects: &CoreObjects,
        permit: &MutationPermit,
        template: ObjectId,
        f: impl FnOnce(&mut Self) -> R,
    ) -> ObjectsResult<R> {
        objects
            .modify::<Self, _>(permit, template, f)
            .ok_or(ObjectsError::NotATemplate(template))
    }

    /// Creates a template holding a fresh instance of `class`.
    ///
    /// # Errors
    ///
    /// Fails if the template or its instance cannot be created.
    pub fn create_from_class(
        objects: &CoreObjects,
        permit: &MutationPermit,
        class: DescriptorId,
        name: &str,
        outer: Option<ObjectId>,
    ) -> ObjectsResult<ObjectId> {
        let template = objects.create::<Self>(permit, name, outer)?;
        let class_id = objects.types().get(class).name_id();
        Self::edit(objects, permit, template, |value| {
            value.template_class = class_id;
            value.object_name = name.to_owned();
        })?;
        if let Err(error) = Self::create_template(objects, permit, template) {
            objects.destroy_object(permit, template);
            return Err(error);
        }
        Ok(template)
    }

    /// Creates a template deriving from `parent`, starting as a copy of its instance.
    ///
    /// # Errors
    ///
    /// Fails if `parent` is not a template or the copy cannot be created.
    pub fn create_from_template(
        objects: &CoreObjects,
        permit: &MutationPermit,
        parent: ObjectId,
        name: &str,
        outer: Option<ObjectId>,
    ) -> ObjectsResult<ObjectId> {
        let (class_id, object_name) = Self::value(objects, parent, |value| {
            (value.template_class, value.object_name.clone())
        })?;
        let template = objects.create::<Self>(permit, name, outer)?;
        Self::edit(objects, permit, template, |value| {
            value.parent = ObjPtr::new(parent);
            value.template_class = class_id;
            value.object_name = object_name;
        })?;
        if let Err(error) = Self::create_template(objects, permit, template) {
            objects.destroy_object(permit, template);
            return Err(error);
        }
        Ok(template)
    }

    /// Points the template at another class, dropping its parent, instance and deltas.
    ///
    /// # Errors
    ///
    /// Fails if the new instance cannot be created.
    pub fn set_template_class(
        objects: &CoreObjects,
        permit: &MutationPermit,
        template: ObjectId,
        class: DescriptorId,
    ) -> ObjectsResult<ObjectId> {
        let class_id = objects.types().get(class).name_id();
        Self::edit(objects, permit, template, |value| {
            value.parent = ObjPtr::NULL;
            value.template_class = class_id;
        })?;
        Self::create_template(objects, permit, template)
    }

    /// (Re)builds the instance from the class or the parent template and resets the deltas.
    ///
    /// # Errors
    ///
    /// Fails if the class cannot be resolved or the instance cannot be created.
    pub fn create_template(
        objects: &CoreObjects,
        permit: &MutationPermit,
        template: ObjectId,
    ) -> ObjectsResult<ObjectId> {
        let (parent, class_id, object_name) = Self::value(objects, template, |value| {
            (value.parent.get(), value.template_class, value.object_name.clone())
        })?;
        if let Some(old) = Self::instance(objects, template) {
            objects.destroy_object(permit, old);
        }

        let instance = match parent {
            Some(parent) => {
                let source = Self::instance(objects, parent).ok_or(ObjectsError::NotATemplate(parent))?;
                let class = objects.class_of(source).ok_or(ObjectsError::ObjectNotFound(source))?;
                let instance = objects.create_object(
                    permit,
                    class,
                    &object_name,
                    Some(template),
                    TEMPLATE_INSTANCE_FLAGS,
                )?;
                copy_object(
                    objects,
                    permit,
                    &CopyObjectOptions {
                        additional_flags: TEMPLATE_INSTANCE_FLAGS,
                        ..CopyObjectOptions::new(source, instance)
                    },
                )?;
                instance
            }
            None => {
                let class = objects
                    .types()
                    .find_by_name(class_id)
                    .ok_or(ObjectsError::UnknownClass(class_id.raw()))?;
                objects.create_object(permit, class, &object_name, Some(template), TEMPLATE_INSTANCE_FLAGS)?
            }
        };

        let mut entries = BTreeMap::from([(String::new(), BTreeSet::new())]);
        for subobject in objects.subobjects(instance) {
            objects.set_flags(permit, subobject, TEMPLATE_INSTANCE_FLAGS);
            if let Some(relative) = objects.object_path(subobject, Some(instance)) {
                entries.insert(relative, BTreeSet::new());
            }
        }
        Self::edit(objects, permit, template, |value| value.entries = entries)?;
        debug!(%template, %instance, "Built template instance");
        Ok(instance)
    }

    /// The template's instance.
    #[must_use]
    pub fn instance(objects: &CoreObjects, template: ObjectId) -> Option<ObjectId> {
        let name = Self::value(objects, template, |value| value.object_name.clone()).ok()?;
        objects.find_under(template, &name)
    }

    /// Template this one derives from.
    #[must_use]
    pub fn parent_template(objects: &CoreObjects, template: ObjectId) -> Option<ObjectId> {
        Self::value(objects, template, |value| value.parent.get()).ok().flatten()
    }

    /// Class of the template's instance.
    #[must_use]
    pub fn template_class(objects: &CoreObjects, template: ObjectId) -> Option<DescriptorId> {
        let class_id = Self::value(objects, template, |value| value.template_class).ok()?;
        objects.types().find_by_name(class_id)
    }

    /// Template owning `object` (the object itself or one of its outers).
    #[must_use]
    pub fn template_of(objects: &CoreObjects, object: ObjectId) -> Option<ObjectId> {
        let mut current = Some(object);
        while let Some(id) = current {
            if objects.is_a::<Self>(id) {
                return Some(id);
            }
            current = objects.outer(id);
        }
        None
    }

    /// Modified field ids per relative subobject path.
    #[must_use]
    pub fn entries(objects: &CoreObjects, template: ObjectId) -> BTreeMap<String, BTreeSet<StringId>> {
        Self::value(objects, template, |value| value.entries.clone()).unwrap_or_default()
    }

    /// Checks whether a field of the subobject at `relative` was edited on this template.
    #[must_use]
    pub fn is_field_modified(
        objects: &CoreObjects,
        template: ObjectId,
        relative: &str,
        field: StringId,
    ) -> bool {
        Self::value(objects, template, |value| {
            value
                .entries
                .get(relative)
                .is_some_and(|fields| fields.contains(&field))
        })
        .unwrap_or(false)
    }

    fn relative_in_instance(
        objects: &CoreObjects,
        template: ObjectId,
        object: ObjectId,
    ) -> ObjectsResult<(ObjectId, String)> {
        let instance = Self::instance(objects, template).ok_or(ObjectsError::NotATemplate(template))?;
        let relative = objects
            .object_path(object, Some(instance))
            .ok_or(ObjectsError::ObjectNotFound(object))?;
        Ok((instance, relative))
    }

    /// Records that `field` of `object` (the instance or one of its subobjects) was edited.
    ///
    /// Returns false if the field was already recorded or does not exist on the class.
    ///
    /// # Errors
    ///
    /// Fails if `object` is not part of the template's instance.
    pub fn on_field_modified(
        objects: &CoreObjects,
        permit: &MutationPermit,
        template: ObjectId,
        object: ObjectId,
        field: StringId,
    ) -> ObjectsResult<bool> {
        let (_, relative) = Self::relative_in_instance(objects, template, object)?;
        let class = objects.class_of(object).ok_or(ObjectsError::ObjectNotFound(object))?;
        if objects.types().find_field(class, field).is_none() {
            warn!(%object, %field, "Modified field does not exist on the class");
            return Ok(false);
        }
        let inserted = Self::edit(objects, permit, template, |value| {
            value.entries.entry(relative).or_default().insert(field)
        })?;
        if inserted {
            objects.mark_dirty(permit, template);
        }
        Ok(inserted)
    }

    /// Drops the edit of `field` and restores the value the parent template (or the class
    /// default) has.
    ///
    /// Returns false if the field was not recorded as modified.
    ///
    /// # Errors
    ///
    /// Fails if `object` is not part of the template's instance.
    pub fn on_field_reset(
        objects: &CoreObjects,
        permit: &MutationPermit,
        template: ObjectId,
        object: ObjectId,
        field: StringId,
    ) -> ObjectsResult<bool> {
        let (instance, relative) = Self::relative_in_instance(objects, template, object)?;
        let removed = Self::edit(objects, permit, template, |value| {
            value
                .entries
                .get_mut(&relative)
                .is_some_and(|fields| fields.remove(&field))
        })?;
        if !removed {
            return Ok(false);
        }

        let class = objects.class_of(object).ok_or(ObjectsError::ObjectNotFound(object))?;
        let types = objects.types();
        let Some(path) = types.find_field(class, field) else {
            return Ok(true);
        };
        let Some(value_type) = path.field().map(FieldDescriptor::value_type) else {
            return Ok(true);
        };

        let parent_source = Self::parent_template(objects, template)
            .and_then(|parent| Self::instance(objects, parent))
            .and_then(|parent_instance| {
                objects
                    .find_under(parent_instance, &relative)
                    .or((relative.is_empty()).then_some(parent_instance))
                    .map(|source| (parent_instance, source))
            });

        let mut scratch = objects
            .take_value(permit, object)
            .ok_or(ObjectsError::ObjectNotFound(object))?;
        match parent_source {
            Some((parent_instance, source)) => {
                let known = HashMap::new();
                let remap = |target: Option<ObjectId>| {
                    remap_into(objects, parent_instance, instance, &known, target)
                };
                objects.read_dyn(source, |_, source_value| {
                    if let (Some(from), Some(to)) = (path.get(source_value), path.get_mut(&mut *scratch)) {
                        copy_value(types, value_type, from, to, &remap);
                    }
                });
            }
            None => {
                if let Some(default) = types.construct(class) {
                    if let (Some(from), Some(to)) = (path.get(&*default), path.get_mut(&mut *scratch)) {
                        copy_value(types, value_type, from, to, &|target: Option<ObjectId>| target);
                    }
                }
            }
        }
        objects.restore_value(permit, object, scratch);
        objects.mark_dirty(permit, template);
        Ok(true)
    }

    /// Creates a live object from the template.
    ///
    /// The copy gets [`ObjectFlags::FROM_TEMPLATE`] and loses the template-only flags.
    ///
    /// # Errors
    ///
    /// Fails if the template has no instance or the object cannot be created.
    pub fn instantiate(
        objects: &CoreObjects,
        permit: &MutationPermit,
        template: ObjectId,
        name: &str,
        outer: Option<ObjectId>,
    ) -> ObjectsResult<ObjectId> {
        let instance = Self::instance(objects, template).ok_or(ObjectsError::NotATemplate(template))?;
        let class = objects.class_of(instance).ok_or(ObjectsError::ObjectNotFound(instance))?;
        let object = objects.create_object(permit, class, name, outer, ObjectFlags::FROM_TEMPLATE)?;
        let copied = copy_object(
            objects,
            permit,
            &CopyObjectOptions {
                additional_flags: ObjectFlags::FROM_TEMPLATE,
                clear_flags: TEMPLATE_INSTANCE_FLAGS,
                ..CopyObjectOptions::new(instance, object)
            },
        );
        if let Err(error) = copied {
            objects.destroy_object(permit, object);
            return Err(error);
        }
        for subobject in objects.subobjects(object) {
            objects.clear_flags(permit, subobject, TEMPLATE_INSTANCE_FLAGS);
            objects.set_flags(permit, subobject, ObjectFlags::FROM_TEMPLATE);
        }
        debug!(%template, %object, "Instantiated template");
        Ok(object)
    }

    /// Copies the values and deltas of `other` into `template`.
    ///
    /// Both must share class, parent and instance name; returns false otherwise. Delta entries
    /// whose subobject does not exist are dropped.
    ///
    /// # Errors
    ///
    /// Fails if either object is not a template or the copy fails.
    pub fn copy_from(
        objects: &CoreObjects,
        permit: &MutationPermit,
        template: ObjectId,
        other: ObjectId,
    ) -> ObjectsResult<bool> {
        let key = |value: &Self| (value.parent.get(), value.template_class, value.object_name.clone());
        let ours = Self::value(objects, template, key)?;
        let theirs = Self::value(objects, other, key)?;
        if ours != theirs {
            warn!(%template, %other, "Templates are not copy compatible");
            return Ok(false);
        }

        let instance = Self::instance(objects, template).ok_or(ObjectsError::NotATemplate(template))?;
        let other_instance = Self::instance(objects, other).ok_or(ObjectsError::NotATemplate(other))?;
        copy_object(
            objects,
            permit,
            &CopyObjectOptions {
                additional_flags: TEMPLATE_INSTANCE_FLAGS,
                mode: TraversalMode::EntireObjectTree,
                ..CopyObjectOptions::new(other_instance, instance)
            },
        )?;

        let mut entries = Self::entries(objects, other);
        entries.retain(|relative, _| {
            let exists = relative.is_empty() || objects.find_under(instance, relative).is_some();
            if !exists {
                warn!(%template, subobject = %relative, "Dropped delta of missing subobject");
            }
            exists
        });
        Self::edit(objects, permit, template, |value| value.entries = entries)?;
        objects.mark_dirty(permit, template);
        Ok(true)
    }

    /// Writes the template's header, delta table and the modified fields of each subobject.
    ///
    /// # Errors
    ///
    /// Fails if `template` is not a template.
    pub fn serialize(
        objects: &CoreObjects,
        template: ObjectId,
        ar: &mut ArchiveWriter,
        refs: &dyn ObjectRefCodec,
    ) -> ObjectsResult<()> {
        let (parent, class_id, object_name, entries) = Self::value(objects, template, |value| {
            (
                value.parent.get(),
                value.template_class,
                value.object_name.clone(),
                value.entries.clone(),
            )
        })?;
        let instance = Self::instance(objects, template);
        ar.set_custom_version(StringId::new(OBJECT_TEMPLATE_VERSION_TAG), OBJECT_TEMPLATE_VERSION);

        refs.write_ref(parent, ar);
        ar.write(&class_id);
        ar.write(&object_name);
        ar.write(&(entries.len() as u64));
        let mut cursor_slots = Vec::with_capacity(entries.len());
        for (relative, fields) in &entries {
            ar.write(relative);
            ar.write(&(fields.len() as u64));
            for field in fields {
                ar.write(field);
            }
            cursor_slots.push(ar.cursor());
            ar.write(&0u64);
        }
        let end_slot = ar.cursor();
        ar.write(&0u64);

        for ((relative, fields), slot) in entries.iter().zip(cursor_slots) {
            let start = ar.cursor();
            patch_u64(ar, slot, start as u64);
            ar.write(&0u64);

            let object = instance.and_then(|instance| {
                if relative.is_empty() {
                    Some(instance)
                } else {
                    objects.find_under(instance, relative)
                }
            });
            let written = object.and_then(|object| {
                objects.read_dyn(object, |class, value| {
                    write_fields(objects.types(), class, value, ar, refs, Some(fields));
                })
            });
            if written.is_none() {
                ar.write(&StringId::INVALID);
            }

            let size = ar.cursor() - start - 8;
            patch_u64(ar, start, size as u64);
        }
        let end = ar.cursor();
        patch_u64(ar, end_slot, end as u64);
        Ok(())
    }

    /// Rebuilds `template` from a stream written by [`ObjectTemplate::serialize`].
    ///
    /// An unresolvable class skips the template's data; damaged entries are skipped
    /// individually. Both are reported in the returned [`TemplateLoad`].
    ///
    /// # Errors
    ///
    /// Fails on an outdated or truncated header.
    pub fn deserialize(
        objects: &CoreObjects,
        permit: &MutationPermit,
        template: ObjectId,
        ar: &mut ArchiveReader<'_>,
        refs: &dyn ObjectRefCodec,
        options: &ReadOptions,
    ) -> ObjectsResult<TemplateLoad> {
        ar.require_version(
            StringId::new(OBJECT_TEMPLATE_VERSION_TAG),
            OBJECT_TEMPLATE_MIN_VERSION,
        )?;

        let parent = refs
            .read_ref(ar)?
            .filter(|&parent| objects.is_a::<Self>(parent));
        let class_id: StringId = ar.read()?;
        let object_name: String = ar.read()?;
        let count = usize::try_from(ar.read::<u64>()?).unwrap_or(usize::MAX).min(ar.remaining());
        let mut table = Vec::with_capacity(count);
        for _ in 0..count {
            let relative: String = ar.read()?;
            let field_count = usize::try_from(ar.read::<u64>()?).unwrap_or(usize::MAX).min(ar.remaining());
            let fields = (0..field_count)
                .map(|_| ar.read::<StringId>())
                .collect::<Result<BTreeSet<_>, _>>()?;
            let cursor_start: u64 = ar.read()?;
            table.push((relative, fields, cursor_start));
        }
        let archive_end = usize::try_from(ar.read::<u64>()?).unwrap_or(usize::MAX);

        let mut load = TemplateLoad::default();
        if parent.is_none() && objects.types().find_by_name(class_id).is_none() {
            error!(%template, class = %class_id, "Template class no longer exists, data dropped");
            ar.seek(archive_end);
            return Ok(load);
        }

        Self::edit(objects, permit, template, |value| {
            value.parent = ObjPtr::from_option(parent);
            value.template_class = class_id;
            value.object_name = object_name;
        })?;
        let instance = match Self::create_template(objects, permit, template) {
            Ok(instance) => instance,
            Err(error) => {
                error!(%template, %error, "Template instance could not be rebuilt, data dropped");
                ar.seek(archive_end);
                return Ok(load);
            }
        };
        load.instance = Some(instance);

        let mut entries = BTreeMap::new();
        for (relative, fields, cursor_start) in table {
            let object = if relative.is_empty() {
                Some(instance)
            } else {
                objects.find_under(instance, &relative)
            };
            let Some(object) = object else {
                warn!(%template, subobject = %relative, "Template subobject no longer exists, delta dropped");
                load.dropped_entries.push(relative);
                continue;
            };

            ar.seek(usize::try_from(cursor_start).unwrap_or(usize::MAX));
            let report = match ar.read::<u64>() {
                Ok(size) => {
                    let end = ar.cursor().saturating_add(usize::try_from(size).unwrap_or(usize::MAX));
                    let previous = ar.set_limit(end);
                    let report = objects.modify_dyn(permit, object, |class, value| {
                        read_fields(objects.types(), class, value, ar, refs, options)
                    });
                    ar.set_limit(previous);
                    report
                }
                Err(error) => Some(Err(error)),
            };
            match report {
                Some(Ok(report)) if report.is_clean() => {}
                Some(Ok(report)) => load.field_reports.push((relative.clone(), report)),
                Some(Err(error)) => {
                    warn!(%template, subobject = %relative, %error, "Template delta could not be read");
                    load.dropped_entries.push(relative);
                    continue;
                }
                None => {}
            }
            entries.insert(relative, fields);
        }
        ar.seek(archive_end);

        Self::edit(objects, permit, template, |value| {
            for (relative, fields) in entries {
                value.entries.insert(relative, fields);
            }
        })?;
        Ok(load)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use oroboros_reflect::{RawIdCodec, TypeRegistry};

    use super::*;
    use crate::test_classes::{Chair, Cushion};

    fn runtime() -> CoreObjects {
        let objects = CoreObjects::new(Arc::new(TypeRegistry::new()));
        let permit = objects.mutation_permit();
        objects.register_class::<Chair>(&permit);
        objects.register_class::<Cushion>(&permit);
        objects
    }

    #[test]
    fn test_template_tracks_deltas() {
        let objects = runtime();
        let permit = objects.mutation_permit();
        let class = objects.types().descriptor_of::<Chair>();
        let template = ObjectTemplate::create_from_class(&objects, &permit, class, "Chair", None).unwrap();

        let instance = ObjectTemplate::instance(&objects, template).unwrap();
        let cushion = objects.find_under(instance, "Cushion").unwrap();
        assert!(objects.flags(cushion).unwrap().contains(TEMPLATE_INSTANCE_FLAGS));
        assert_eq!(
            ObjectTemplate::entries(&objects, template).keys().cloned().collect::<Vec<_>>(),
            vec![String::new(), "Cushion".to_owned()]
        );

        let legs = StringId::new("legs");
        objects.modify::<Chair, _>(&permit, instance, |chair| chair.legs = 3);
        assert!(ObjectTemplate::on_field_modified(&objects, &permit, template, instance, legs).unwrap());
        assert!(!ObjectTemplate::on_field_modified(&objects, &permit, template, instance, legs).unwrap());
        assert!(ObjectTemplate::is_field_modified(&objects, template, "", legs));
        assert!(!ObjectTemplate::on_field_modified(
            &objects,
            &permit,
            template,
            instance,
            StringId::new("wheels")
        )
        .unwrap());

        assert!(ObjectTemplate::on_field_reset(&objects, &permit, template, instance, legs).unwrap());
        assert!(!ObjectTemplate::is_field_modified(&objects, template, "", legs));
        assert_eq!(objects.read::<Chair, _>(instance, |chair| chair.legs), Some(0));
    }

    #[test]
    fn test_reset_restores_parent_value() {
        let objects = runtime();
        let permit = objects.mutation_permit();
        let class = objects.types().descriptor_of::<Chair>();
        let base = ObjectTemplate::create_from_class(&objects, &permit, class, "Base", None).unwrap();
        let base_instance = ObjectTemplate::instance(&objects, base).unwrap();
        let base_cushion = objects.find_under(base_instance, "Cushion").unwrap();
        objects.modify::<Cushion, _>(&permit, base_cushion, |cushion| cushion.softness = 0.5);

        let derived = ObjectTemplate::create_from_template(&objects, &permit, base, "Derived", None).unwrap();
        let instance = ObjectTemplate::instance(&objects, derived).unwrap();
        let cushion = objects.find_under(instance, "Cushion").unwrap();
        assert_eq!(objects.read::<Cushion, _>(cushion, |c| c.softness), Some(0.5));
        // The copy's reference points into its own tree.
        assert_eq!(
            objects.read::<Chair, _>(instance, |chair| chair.cushion.get()),
            Some(Some(cushion))
        );

        let softness = StringId::new("softness");
        objects.modify::<Cushion, _>(&permit, cushion, |c| c.softness = 0.9);
        ObjectTemplate::on_field_modified(&objects, &permit, derived, cushion, softness).unwrap();
        assert!(ObjectTemplate::is_field_modified(&objects, derived, "Cushion", softness));

        ObjectTemplate::on_field_reset(&objects, &permit, derived, cushion, softness).unwrap();
        assert_eq!(objects.read::<Cushion, _>(cushion, |c| c.softness), Some(0.5));
    }

    #[test]
    fn test_instantiate_clears_template_flags() {
        let objects = runtime();
        let permit = objects.mutation_permit();
        let class = objects.types().descriptor_of::<Chair>();
        let template = ObjectTemplate::create_from_class(&objects, &permit, class, "Chair", None).unwrap();
        let instance = ObjectTemplate::instance(&objects, template).unwrap();
        objects.modify::<Chair, _>(&permit, instance, |chair| chair.legs = 4);

        let placed = ObjectTemplate::instantiate(&objects, &permit, template, "Placed", None).unwrap();
        let cushion = objects.find("Placed:Cushion").unwrap();
        for object in [placed, cushion] {
            let flags = objects.flags(object).unwrap();
            assert!(flags.contains(ObjectFlags::FROM_TEMPLATE));
            assert!(!flags.intersects(TEMPLATE_INSTANCE_FLAGS));
        }
        assert_eq!(
            objects.read::<Chair, _>(placed, |chair| (chair.legs, chair.cushion.get())),
            Some((4, Some(cushion)))
        );
    }

    #[test]
    fn test_serialize_writes_only_deltas() {
        let objects = runtime();
        let permit = objects.mutation_permit();
        let class = objects.types().descriptor_of::<Chair>();
        let saved = ObjectTemplate::create_from_class(&objects, &permit, class, "Saved", None).unwrap();
        let instance = ObjectTemplate::instance(&objects, saved).unwrap();
        let cushion = objects.find_under(instance, "Cushion").unwrap();
        objects.modify::<Chair, _>(&permit, instance, |chair| chair.legs = 6);
        objects.modify::<Cushion, _>(&permit, cushion, |c| c.softness = 0.25);
        ObjectTemplate::on_field_modified(&objects, &permit, saved, instance, StringId::new("legs")).unwrap();

        let mut ar = ArchiveWriter::new();
        ObjectTemplate::serialize(&objects, saved, &mut ar, &RawIdCodec).unwrap();
        let bytes = ar.finish();

        let loaded = objects.create::<ObjectTemplate>(&permit, "Loaded", None).unwrap();
        let mut reader = ArchiveReader::new(&bytes).unwrap();
        let load = ObjectTemplate::deserialize(
            &objects,
            &permit,
            loaded,
            &mut reader,
            &RawIdCodec,
            &ReadOptions::default(),
        )
        .unwrap();
        assert!(load.dropped_entries.is_empty());
        assert_eq!(reader.remaining(), 0);

        let loaded_instance = load.instance.unwrap();
        assert_eq!(objects.name_of(loaded_instance).as_deref(), Some("Saved"));
        assert_eq!(objects.read::<Chair, _>(loaded_instance, |chair| chair.legs), Some(6));
        // Unrecorded edits are not part of the stream.
        let loaded_cushion = objects.find_under(loaded_instance, "Cushion").unwrap();
        assert_eq!(objects.read::<Cushion, _>(loaded_cushion, |c| c.softness), Some(0.0));
        assert!(ObjectTemplate::is_field_modified(&objects, loaded, "", StringId::new("legs")));
    }

    #[test]
    fn test_copy_from_requires_compatible_templates() {
        let objects = runtime();
        let permit = objects.mutation_permit();
        let chair = objects.types().descriptor_of::<Chair>();
        let cushion = objects.types().descriptor_of::<Cushion>();
        let left = objects.create::<Cushion>(&permit, "Left", None).unwrap();
        let right = objects.create::<Cushion>(&permit, "Right", None).unwrap();
        let a = ObjectTemplate::create_from_class(&objects, &permit, chair, "Seat", Some(left)).unwrap();
        let b = ObjectTemplate::create_from_class(&objects, &permit, chair, "Seat", Some(right)).unwrap();
        let c = ObjectTemplate::create_from_class(&objects, &permit, cushion, "Seat", None).unwrap();
        assert!(!ObjectTemplate::copy_from(&objects, &permit, a, c).unwrap());

        let b_instance = ObjectTemplate::instance(&objects, b).unwrap();
        objects.modify::<Chair, _>(&permit, b_instance, |chair| chair.legs = 7);
        ObjectTemplate::on_field_modified(&objects, &permit, b, b_instance, StringId::new("legs")).unwrap();
        assert!(ObjectTemplate::copy_from(&objects, &permit, a, b).unwrap());

        let a_instance = ObjectTemplate::instance(&objects, a).unwrap();
        assert_eq!(objects.read::<Chair, _>(a_instance, |chair| chair.legs), Some(7));
        assert!(ObjectTemplate::is_field_modified(&objects, a, "", StringId::new("legs")));
        assert_eq!(ObjectTemplate::template_of(&objects, a_instance), Some(a));

        ObjectTemplate::set_template_class(&objects, &permit, c, chair).unwrap();
        let c_instance = ObjectTemplate::instance(&objects, c).unwrap();
        assert!(objects.is_a::<Chair>(c_instance));
        assert!(ObjectTemplate::entries(&objects, c).values().all(BTreeSet::is_empty));
    }
}
