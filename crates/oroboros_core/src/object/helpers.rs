//! # Object Helpers
//!
//! Whole-object operations built on the field visitors: copying one object tree onto another,
//! duplicating, and rewriting or searching object references across a tree.
//!
//! ## Reference Rewiring
//!
//! While copying `from` onto `to`, a reference to `from` or one of its subobjects is redirected
//! to the object at the same relative path under `to`. References to anything outside the
//! copied tree are kept as they are.

use std::collections::{HashMap, HashSet};

use oroboros_reflect::{copy_fields, find_refs_in, replace_refs_in, ObjectId};
use tracing::{error, warn};

use super::flags::ObjectFlags;
use super::permit::MutationPermit;
use super::runtime::CoreObjects;
use crate::error::{ObjectsError, ObjectsResult};

/// Which objects of a tree an operation visits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TraversalMode {
    /// The object and all its subobjects.
    #[default]
    EntireObjectTree,
    /// The object and its direct subobjects.
    ObjectAndChildren,
    /// Only the object.
    OnlyObject,
}

/// Arguments of [`copy_object`].
#[derive(Clone, Copy, Debug)]
pub struct CopyObjectOptions {
    /// Source object.
    pub from: ObjectId,
    /// Destination object. Must have the same class as `from`.
    pub to: ObjectId,
    /// Flags added to destination subobjects that had to be created.
    pub additional_flags: ObjectFlags,
    /// Flags of the source subobjects that are not carried over.
    pub clear_flags: ObjectFlags,
    /// Redirect references into the source tree to the destination tree.
    pub replace_subobject_refs: bool,
    /// Which source subobjects are copied.
    pub mode: TraversalMode,
}

impl CopyObjectOptions {
    /// Deep copy of the whole tree with reference rewiring.
    #[must_use]
    pub const fn new(from: ObjectId, to: ObjectId) -> Self {
        Self {
            from,
            to,
            additional_flags: ObjectFlags::NONE,
            clear_flags: ObjectFlags::NONE,
            replace_subobject_refs: true,
            mode: TraversalMode::EntireObjectTree,
        }
    }
}

/// Arguments of [`duplicate_object`].
#[derive(Clone, Debug, Default)]
pub struct DuplicateOptions {
    /// Outer of the duplicate. Defaults to the source's outer.
    pub outer: Option<ObjectId>,
    /// Name of the duplicate. Defaults to the source's name, suffixed until unique.
    pub name: Option<String>,
    /// Flags added to the duplicate and its subobjects.
    pub additional_flags: ObjectFlags,
    /// Flags of the source that are not carried over.
    pub clear_flags: ObjectFlags,
}

/// A reference found by [`find_object_references`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectReference {
    /// Object holding the reference.
    pub found_in: ObjectId,
    /// Top-level field holding the reference.
    pub field: &'static str,
    /// Referenced object.
    pub referenced: ObjectId,
}

/// Objects of the tree at `root` visited in `mode`, `root` first.
#[must_use]
pub fn gather_objects(objects: &CoreObjects, root: ObjectId, mode: TraversalMode) -> Vec<ObjectId> {
    if !objects.is_valid(root) {
        return Vec::new();
    }
    let mut gathered = vec![root];
    match mode {
        TraversalMode::EntireObjectTree => gathered.extend(objects.subobjects(root)),
        TraversalMode::ObjectAndChildren => gathered.extend(objects.children(root)),
        TraversalMode::OnlyObject => {}
    }
    gathered
}

/// Redirects references into the tree at `from_root` to the same relative path under
/// `to_root`.
///
/// `known` short-cuts the path lookup for pairs already matched. A reference whose counterpart
/// does not exist is dropped with a warning.
pub(crate) fn remap_into(
    objects: &CoreObjects,
    from_root: ObjectId,
    to_root: ObjectId,
    known: &HashMap<ObjectId, ObjectId>,
    target: Option<ObjectId>,
) -> Option<ObjectId> {
    let target = target?;
    if target == from_root {
        return Some(to_root);
    }
    if let Some(&mapped) = known.get(&target) {
        return Some(mapped);
    }
    if !objects.has_outer(target, from_root) {
        return Some(target);
    }

    let counterpart = objects
        .object_path(target, Some(from_root))
        .and_then(|relative| objects.find_under(to_root, &relative));
    if counterpart.is_none() {
        warn!(
            reference = %target,
            path = %objects.full_path(target).unwrap_or_default(),
            "Reference has no counterpart in the copy, dropped"
        );
    }
    counterpart
}

/// Copies the fields of every `(from, to)` pair with the given reference remap.
fn copy_pair(
    objects: &CoreObjects,
    permit: &MutationPermit,
    from: ObjectId,
    to: ObjectId,
    remap: &dyn Fn(Option<ObjectId>) -> Option<ObjectId>,
) -> ObjectsResult<()> {
    if from == to {
        return Ok(());
    }
    let class = objects.class_of(to).ok_or(ObjectsError::ObjectNotFound(to))?;
    let mut scratch = objects
        .take_value(permit, to)
        .ok_or(ObjectsError::ObjectNotFound(to))?;
    let copied = objects.read_dyn(from, |_, source| {
        copy_fields(objects.types(), class, source, &mut *scratch, &remap);
    });
    objects.restore_value(permit, to, scratch);
    copied.ok_or(ObjectsError::ObjectNotFound(from))
}

/// Copies `from` (and, depending on the mode, its subobjects) onto `to`.
///
/// Destination subobjects are looked up by path and created where missing, taking the source
/// subobject's flags minus `clear_flags` plus `additional_flags`.
///
/// # Errors
///
/// Fails if the two objects have different classes or a destination subobject cannot be
/// created.
pub fn copy_object(
    objects: &CoreObjects,
    permit: &MutationPermit,
    options: &CopyObjectOptions,
) -> ObjectsResult<()> {
    let CopyObjectOptions { from, to, .. } = *options;
    let from_class = objects.class_of(from).ok_or(ObjectsError::ObjectNotFound(from))?;
    let to_class = objects.class_of(to).ok_or(ObjectsError::ObjectNotFound(to))?;
    if from_class != to_class {
        let expected = objects.types().get(from_class).name().to_owned();
        let found = objects.types().get(to_class).name().to_owned();
        error!(%from, %to, expected = %expected, found = %found, "Cannot copy between objects of different classes");
        return Err(ObjectsError::ClassMismatch { expected, found });
    }

    let sources = gather_objects(objects, from, options.mode);
    let mut pairs: HashMap<ObjectId, ObjectId> = HashMap::with_capacity(sources.len());
    pairs.insert(from, to);
    let mut ordered = vec![(from, to)];

    for &source in &sources[1..] {
        // Breadth-first order guarantees the outer was paired first.
        let Some(to_outer) = objects.outer(source).and_then(|outer| pairs.get(&outer).copied()) else {
            continue;
        };
        let record = objects.record(source).ok_or(ObjectsError::ObjectNotFound(source))?;
        let flags = (record.flags - options.clear_flags) | options.additional_flags;
        let target = objects.create_or_get(permit, record.class, &record.name, Some(to_outer), flags)?;
        pairs.insert(source, target);
        ordered.push((source, target));
    }

    let replace = options.replace_subobject_refs;
    let remap = |target: Option<ObjectId>| {
        if replace {
            remap_into(objects, from, to, &pairs, target)
        } else {
            target
        }
    };
    for (source, target) in ordered {
        copy_pair(objects, permit, source, target, &remap)?;
    }
    Ok(())
}

/// Deep-copies the whole tree of `from` onto `to`, rewiring internal references.
///
/// # Errors
///
/// See [`copy_object`].
pub fn deep_copy(
    objects: &CoreObjects,
    permit: &MutationPermit,
    from: ObjectId,
    to: ObjectId,
) -> ObjectsResult<()> {
    copy_object(objects, permit, &CopyObjectOptions::new(from, to))
}

/// Name not yet used under `outer`, starting from `base`.
fn unique_name(objects: &CoreObjects, outer: Option<ObjectId>, base: &str) -> String {
    let taken = |name: &str| match outer {
        Some(outer) => objects.find_under(outer, name).is_some(),
        None => objects.find(name).is_some(),
    };
    if !taken(base) {
        return base.to_owned();
    }
    (1u32..)
        .map(|suffix| format!("{base}_{suffix}"))
        .find(|name| !taken(name))
        .unwrap_or_else(|| base.to_owned())
}

/// Creates a copy of `from` and its whole tree.
///
/// # Errors
///
/// Fails if the duplicate cannot be created or copied into.
pub fn duplicate_object(
    objects: &CoreObjects,
    permit: &MutationPermit,
    from: ObjectId,
    options: &DuplicateOptions,
) -> ObjectsResult<ObjectId> {
    let record = objects.record(from).ok_or(ObjectsError::ObjectNotFound(from))?;
    let outer = options.outer.or_else(|| objects.outer(from));
    let name = match &options.name {
        Some(name) => name.clone(),
        None => unique_name(objects, outer, &record.name),
    };
    let flags = ((record.flags - options.clear_flags) | options.additional_flags)
        - ObjectFlags::ROOT_OBJECT;

    let duplicate = objects.create_object(permit, record.class, &name, outer, flags)?;
    let copied = copy_object(
        objects,
        permit,
        &CopyObjectOptions {
            from,
            to: duplicate,
            additional_flags: options.additional_flags,
            clear_flags: options.clear_flags,
            replace_subobject_refs: true,
            mode: TraversalMode::EntireObjectTree,
        },
    );
    if let Err(error) = copied {
        objects.destroy_object(permit, duplicate);
        return Err(error);
    }
    Ok(duplicate)
}

/// Rewrites references in the tree at `root` through `replacements`. Returns the count.
pub fn replace_object_references(
    objects: &CoreObjects,
    permit: &MutationPermit,
    root: ObjectId,
    replacements: &HashMap<ObjectId, ObjectId>,
    mode: TraversalMode,
) -> usize {
    if replacements.is_empty() {
        return 0;
    }
    gather_objects(objects, root, mode)
        .into_iter()
        .filter_map(|object| {
            objects.modify_dyn(permit, object, |class, value| {
                replace_refs_in(objects.types(), class, value, replacements)
            })
        })
        .sum()
}

/// Lists references in the tree at `root` that point at any of `targets`.
#[must_use]
pub fn find_object_references(
    objects: &CoreObjects,
    root: ObjectId,
    targets: &HashSet<ObjectId>,
    mode: TraversalMode,
) -> Vec<ObjectReference> {
    let mut found = Vec::new();
    for object in gather_objects(objects, root, mode) {
        objects.read_dyn(object, |class, value| {
            found.extend(find_refs_in(objects.types(), class, value, targets).into_iter().map(
                |reference| ObjectReference {
                    found_in: object,
                    field: reference.field,
                    referenced: reference.target,
                },
            ));
        });
    }
    found
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use oroboros_reflect::{ObjPtr, TypeRegistry};

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
    fn test_duplicate_rewires_internal_refs() {
        let objects = runtime();
        let permit = objects.mutation_permit();
        let chair = objects.create::<Chair>(&permit, "Chair", None).unwrap();
        objects.modify::<Chair, _>(&permit, chair, |chair| chair.legs = 3);

        let copy = duplicate_object(&objects, &permit, chair, &DuplicateOptions::default()).unwrap();
        assert_eq!(objects.name_of(copy).as_deref(), Some("Chair_1"));

        let copy_cushion = objects.find("Chair_1:Cushion").unwrap();
        let original_cushion = objects.find("Chair:Cushion").unwrap();
        assert_ne!(copy_cushion, original_cushion);
        assert_eq!(
            objects.read::<Chair, _>(copy, |chair| (chair.legs, chair.cushion)),
            Some((3, ObjPtr::new(copy_cushion)))
        );
    }

    #[test]
    fn test_copy_between_classes_fails() {
        let objects = runtime();
        let permit = objects.mutation_permit();
        let chair = objects.create::<Chair>(&permit, "Chair", None).unwrap();
        let cushion = objects.find("Chair:Cushion").unwrap();
        assert!(matches!(
            deep_copy(&objects, &permit, chair, cushion),
            Err(ObjectsError::ClassMismatch { .. })
        ));
    }

    #[test]
    fn test_only_object_mode_keeps_refs_without_counterpart() {
        let objects = runtime();
        let permit = objects.mutation_permit();
        let chair = objects.create::<Chair>(&permit, "Chair", None).unwrap();
        let bare = objects.create::<Cushion>(&permit, "Bare", None).unwrap();
        let other = objects.create::<Chair>(&permit, "Other", None).unwrap();
        let other_cushion = objects.find("Other:Cushion").unwrap();
        objects.destroy_object(&permit, other_cushion);

        // Other has no cushion any more, so the rewired reference is dropped.
        let mut options = CopyObjectOptions::new(chair, other);
        options.mode = TraversalMode::OnlyObject;
        copy_object(&objects, &permit, &options).unwrap();
        assert_eq!(objects.read::<Chair, _>(other, |chair| chair.cushion.get()), Some(None));

        // Without rewiring the reference is copied verbatim.
        options.replace_subobject_refs = false;
        copy_object(&objects, &permit, &options).unwrap();
        let cushion = objects.find("Chair:Cushion");
        assert_eq!(objects.read::<Chair, _>(other, |chair| chair.cushion.get()), Some(cushion));
        assert!(objects.is_valid(bare));
    }

    #[test]
    fn test_replace_and_find_references() {
        let objects = runtime();
        let permit = objects.mutation_permit();
        let chair = objects.create::<Chair>(&permit, "Chair", None).unwrap();
        let cushion = objects.find("Chair:Cushion").unwrap();
        let spare = objects.create::<Cushion>(&permit, "Spare", None).unwrap();

        let found = find_object_references(
            &objects,
            chair,
            &HashSet::from([cushion]),
            TraversalMode::EntireObjectTree,
        );
        assert_eq!(
            found,
            vec![ObjectReference {
                found_in: chair,
                field: "cushion",
                referenced: cushion,
            }]
        );

        let replaced = replace_object_references(
            &objects,
            &permit,
            chair,
            &HashMap::from([(cushion, spare)]),
            TraversalMode::OnlyObject,
        );
        assert_eq!(replaced, 1);
        assert_eq!(objects.read::<Chair, _>(chair, |chair| chair.cushion.get()), Some(Some(spare)));
    }
}
