//! # Object Snapshots
//!
//! Saves an object tree to bytes and loads it back under any outer.
//!
//! ## Stream Layout
//!
//! ```text
//! root name | object count
//! object * count:  relative path | class name id | flags | data offset (patched)
//! data * count:    field stream, or template stream for templates
//! ```
//!
//! References are written as paths: relative to the snapshot root when they point into the
//! tree, absolute otherwise. Transient subtrees (template instances among them) are not saved.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};

use oroboros_reflect::{
    read_fields, write_fields, ArchiveError, ArchiveReader, ArchiveResult, ArchiveWriter,
    ObjectId, ObjectRefCodec, ReadOptions, ReadReport, StringId,
};
use tracing::{debug, error, warn};

use crate::error::{ObjectsError, ObjectsResult};
use crate::object::path::split_last;
use crate::object::{CoreObjects, MutationPermit, ObjectFlags};
use crate::template::{ObjectTemplate, TemplateLoad};

/// Custom version tag of snapshot streams.
pub const OBJECT_SNAPSHOT_VERSION_TAG: &str = "ObjectSnapshot";
/// Version written by [`save_snapshot`].
pub const OBJECT_SNAPSHOT_VERSION: u32 = 1;
/// Oldest snapshot version [`load_snapshot`] accepts.
pub const OBJECT_SNAPSHOT_MIN_VERSION: u32 = 1;

/// Flags describing load and edit state, never saved.
const RUNTIME_FLAGS: ObjectFlags = ObjectFlags::from_bits_truncate(
    ObjectFlags::ROOT_OBJECT.bits()
        | ObjectFlags::PACKAGE_DIRTY.bits()
        | ObjectFlags::PACKAGE_LOAD_PENDING.bits()
        | ObjectFlags::PACKAGE_LOADED.bits()
        | ObjectFlags::MARKED_FOR_DELETE.bits(),
);

const REF_NULL: u8 = 0;
const REF_RELATIVE: u8 = 1;
const REF_ABSOLUTE: u8 = 2;

/// Writes references as object paths.
///
/// Paths inside the tree at `root` are relative to it, so a snapshot can be loaded under a
/// different outer. Paths that do not resolve on read become null and are collected.
pub struct PathRefCodec<'o> {
    objects: &'o CoreObjects,
    root: ObjectId,
    unresolved: RefCell<Vec<String>>,
}

impl<'o> PathRefCodec<'o> {
    /// Creates a codec for the tree at `root`.
    #[must_use]
    pub fn new(objects: &'o CoreObjects, root: ObjectId) -> Self {
        Self {
            objects,
            root,
            unresolved: RefCell::new(Vec::new()),
        }
    }

    /// Paths read so far that did not resolve.
    #[must_use]
    pub fn into_unresolved(self) -> Vec<String> {
        self.unresolved.into_inner()
    }
}

impl ObjectRefCodec for PathRefCodec<'_> {
    fn write_ref(&self, target: Option<ObjectId>, ar: &mut ArchiveWriter) {
        let Some(target) = target else {
            ar.write(&REF_NULL);
            return;
        };
        if target == self.root || self.objects.has_outer(target, self.root) {
            if let Some(relative) = self.objects.object_path(target, Some(self.root)) {
                ar.write(&REF_RELATIVE);
                ar.write(&relative);
                return;
            }
        }
        match self.objects.full_path(target) {
            Some(path) => {
                ar.write(&REF_ABSOLUTE);
                ar.write(&path);
            }
            None => {
                warn!(reference = %target, "Dangling reference written as null");
                ar.write(&REF_NULL);
            }
        }
    }

    fn read_ref(&self, ar: &mut ArchiveReader<'_>) -> ArchiveResult<Option<ObjectId>> {
        let offset = ar.cursor();
        let tag: u8 = ar.read()?;
        let (found, path) = match tag {
            REF_NULL => return Ok(None),
            REF_RELATIVE => {
                let relative: String = ar.read()?;
                let found = if relative.is_empty() {
                    Some(self.root)
                } else {
                    self.objects.find_under(self.root, &relative)
                };
                (found, relative)
            }
            REF_ABSOLUTE => {
                let path: String = ar.read()?;
                (self.objects.find(&path), path)
            }
            tag => return Err(ArchiveError::InvalidTag { tag, offset }),
        };
        if found.is_none() {
            warn!(path = %path, "Unresolved object reference, set to null");
            self.unresolved.borrow_mut().push(path);
        }
        Ok(found)
    }
}

/// Outcome of [`load_snapshot`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotLoad {
    /// The loaded root. `None` if the root itself could not be created.
    pub root: Option<ObjectId>,
    /// Every object created or reused by the load, in table order.
    pub loaded: Vec<ObjectId>,
    /// Relative paths of objects dropped together with their subtree.
    pub dropped: Vec<String>,
    /// References whose path did not resolve.
    pub unresolved_refs: Vec<String>,
    /// Objects whose field stream was not read cleanly.
    pub field_reports: Vec<(String, ReadReport)>,
    /// Results of the templates in the snapshot.
    pub template_loads: Vec<(String, TemplateLoad)>,
}

/// Objects of the tree at `root` to save, parents before children.
fn saved_objects(objects: &CoreObjects, root: ObjectId) -> Vec<ObjectId> {
    let mut saved = vec![root];
    let mut queue = VecDeque::from([root]);
    while let Some(id) = queue.pop_front() {
        for child in objects.children(id) {
            let skipped = objects.flags(child).is_some_and(|flags| {
                flags.intersects(ObjectFlags::TRANSIENT | ObjectFlags::MARKED_FOR_DELETE)
            });
            if !skipped {
                saved.push(child);
                queue.push_back(child);
            }
        }
    }
    saved
}

fn patch_u64(ar: &mut ArchiveWriter, at: usize, value: u64) {
    let back = ar.cursor();
    ar.seek(at);
    ar.write(&value);
    ar.seek(back);
}

/// Saves the tree at `root`.
///
/// # Errors
///
/// Fails if `root` is not a live object.
pub fn save_snapshot(objects: &CoreObjects, root: ObjectId) -> ObjectsResult<Vec<u8>> {
    let root_name = objects.name_of(root).ok_or(ObjectsError::ObjectNotFound(root))?;
    let saved = saved_objects(objects, root);
    let codec = PathRefCodec::new(objects, root);
    let template_class = objects.types().descriptor_of::<ObjectTemplate>();

    let mut ar = ArchiveWriter::new();
    ar.set_custom_version(StringId::new(OBJECT_SNAPSHOT_VERSION_TAG), OBJECT_SNAPSHOT_VERSION);
    ar.write(&root_name);
    ar.write(&(saved.len() as u64));

    let mut offset_slots = Vec::with_capacity(saved.len());
    for &id in &saved {
        let record = objects.record(id).ok_or(ObjectsError::ObjectNotFound(id))?;
        let relative = if id == root {
            String::new()
        } else {
            objects.object_path(id, Some(root)).unwrap_or_default()
        };
        ar.write(&relative);
        ar.write(&objects.types().get(record.class).name_id());
        ar.write(&(record.flags - RUNTIME_FLAGS).bits());
        offset_slots.push(ar.cursor());
        ar.write(&0u64);
    }

    for (&id, slot) in saved.iter().zip(offset_slots) {
        let start = ar.cursor();
        patch_u64(&mut ar, slot, start as u64);
        let class = objects.class_of(id).ok_or(ObjectsError::ObjectNotFound(id))?;
        if class == template_class {
            ObjectTemplate::serialize(objects, id, &mut ar, &codec)?;
        } else {
            objects.read_dyn(id, |class, value| {
                write_fields(objects.types(), class, value, &mut ar, &codec, None);
            });
        }
    }
    debug!(%root, objects = saved.len(), "Saved snapshot");
    Ok(ar.finish())
}

struct TableEntry {
    relative: String,
    class: StringId,
    flags: ObjectFlags,
    offset: usize,
}

fn read_table(ar: &mut ArchiveReader<'_>) -> ArchiveResult<(String, Vec<TableEntry>)> {
    let root_name: String = ar.read()?;
    let count = usize::try_from(ar.read::<u64>()?).unwrap_or(usize::MAX).min(ar.remaining());
    let mut table = Vec::with_capacity(count);
    for _ in 0..count {
        table.push(TableEntry {
            relative: ar.read()?,
            class: ar.read()?,
            flags: ObjectFlags::from_bits_truncate(ar.read()?),
            offset: usize::try_from(ar.read::<u64>()?).unwrap_or(usize::MAX),
        });
    }
    Ok((root_name, table))
}

/// Orders templates so that a template's parent is loaded before it.
fn template_load_order(
    ar: &mut ArchiveReader<'_>,
    codec: &PathRefCodec<'_>,
    templates: &[(usize, ObjectId)],
) -> Vec<(usize, ObjectId)> {
    let ids: HashSet<ObjectId> = templates.iter().map(|&(_, id)| id).collect();
    let mut pending: Vec<(usize, ObjectId, Option<ObjectId>)> = templates
        .iter()
        .map(|&(offset, id)| {
            ar.seek(offset);
            let parent = codec.read_ref(ar).ok().flatten();
            (offset, id, parent.filter(|parent| ids.contains(parent)))
        })
        .collect();

    let mut ordered = Vec::with_capacity(pending.len());
    let mut done = HashSet::new();
    while !pending.is_empty() {
        let before = pending.len();
        pending.retain(|&(offset, id, parent)| {
            let ready = parent.map_or(true, |parent| done.contains(&parent));
            if ready {
                ordered.push((offset, id));
                done.insert(id);
            }
            !ready
        });
        if pending.len() == before {
            // Parent cycle; load the rest in table order.
            ordered.extend(pending.drain(..).map(|(offset, id, _)| (offset, id)));
        }
    }
    ordered
}

/// Loads a snapshot under `outer` with the runtime's configured read limits.
///
/// Objects whose class is unknown are dropped together with their subtree; the rest of the
/// tree still loads. Existing objects at the same paths are reused.
///
/// # Errors
///
/// Fails only if the stream header or object table is unreadable or outdated.
pub fn load_snapshot(
    objects: &CoreObjects,
    permit: &MutationPermit,
    bytes: &[u8],
    outer: Option<ObjectId>,
) -> ObjectsResult<SnapshotLoad> {
    let options = objects.config().read_options();
    load_snapshot_with(objects, permit, bytes, outer, &options)
}

/// Loads a snapshot under `outer` with explicit read limits.
///
/// # Errors
///
/// See [`load_snapshot`].
pub fn load_snapshot_with(
    objects: &CoreObjects,
    permit: &MutationPermit,
    bytes: &[u8],
    outer: Option<ObjectId>,
    options: &ReadOptions,
) -> ObjectsResult<SnapshotLoad> {
    let mut ar = ArchiveReader::new(bytes)?;
    ar.require_version(
        StringId::new(OBJECT_SNAPSHOT_VERSION_TAG),
        OBJECT_SNAPSHOT_MIN_VERSION,
    )?;
    let (root_name, table) = read_table(&mut ar)?;
    let mut load = SnapshotLoad::default();

    // Pass 1: create the objects so every reference can resolve.
    let mut by_path: HashMap<String, ObjectId> = HashMap::with_capacity(table.len());
    let mut created: Vec<(&TableEntry, ObjectId)> = Vec::with_capacity(table.len());
    for entry in &table {
        let relative = entry.relative.as_str();
        let (outer_relative, name) = split_last(relative);
        let (parent, name) = if relative.is_empty() {
            (outer, root_name.as_str())
        } else {
            let parent = match outer_relative {
                Some(outer_relative) => by_path.get(outer_relative).copied(),
                None => by_path.get("").copied(),
            };
            let Some(parent) = parent else {
                // Outer was dropped; its subtree goes with it.
                load.dropped.push(entry.relative.clone());
                continue;
            };
            (Some(parent), name)
        };

        let class = objects
            .types()
            .find_by_name(entry.class)
            .filter(|&class| objects.is_class_registered(class));
        let Some(class) = class else {
            error!(path = %entry.relative, class = %entry.class, "Unknown class, object and subtree dropped");
            load.dropped.push(entry.relative.clone());
            continue;
        };

        let flags = entry.flags - RUNTIME_FLAGS;
        match objects.create_or_get(permit, class, name, parent, flags) {
            Ok(id) => {
                objects.set_flags(permit, id, flags);
                by_path.insert(entry.relative.clone(), id);
                created.push((entry, id));
                load.loaded.push(id);
            }
            Err(error) => {
                error!(path = %entry.relative, %error, "Object could not be created, subtree dropped");
                load.dropped.push(entry.relative.clone());
            }
        }
    }

    let Some(&root) = by_path.get("") else {
        return Ok(load);
    };
    load.root = Some(root);
    objects.set_flags(permit, root, ObjectFlags::PACKAGE_LOAD_PENDING);

    // Pass 2: templates first, parents before children, then every other object.
    let codec = PathRefCodec::new(objects, root);
    let template_class = objects.types().descriptor_of::<ObjectTemplate>();
    let templates: Vec<(usize, ObjectId)> = created
        .iter()
        .filter(|&&(_, id)| objects.class_of(id) == Some(template_class))
        .map(|&(entry, id)| (entry.offset, id))
        .collect();
    let paths: HashMap<ObjectId, &str> = created
        .iter()
        .map(|&(entry, id)| (id, entry.relative.as_str()))
        .collect();

    for (offset, template) in template_load_order(&mut ar, &codec, &templates) {
        let relative = paths.get(&template).copied().unwrap_or_default().to_owned();
        ar.seek(offset);
        match ObjectTemplate::deserialize(objects, permit, template, &mut ar, &codec, options) {
            Ok(template_load) => load.template_loads.push((relative, template_load)),
            Err(error) => {
                error!(path = %relative, %error, "Template data could not be read");
                load.template_loads.push((relative, TemplateLoad::default()));
            }
        }
    }

    for &(entry, id) in &created {
        if objects.class_of(id) == Some(template_class) {
            continue;
        }
        ar.seek(entry.offset);
        let report = objects.modify_dyn(permit, id, |class, value| {
            read_fields(objects.types(), class, value, &mut ar, &codec, options)
        });
        match report {
            Some(Ok(report)) if report.is_clean() => {}
            Some(Ok(report)) => {
                warn!(path = %entry.relative, skipped = report.skipped.len(), corrupted = report.corrupted.len(), "Object data partially read");
                load.field_reports.push((entry.relative.clone(), report));
            }
            Some(Err(error)) => {
                error!(path = %entry.relative, %error, "Object data could not be read");
                load.field_reports.push((entry.relative.clone(), ReadReport::default()));
            }
            None => {}
        }
    }

    load.unresolved_refs = codec.into_unresolved();
    objects.clear_flags(permit, root, ObjectFlags::PACKAGE_LOAD_PENDING);
    objects.set_flags(permit, root, ObjectFlags::PACKAGE_LOADED);
    debug!(%root, loaded = load.loaded.len(), dropped = load.dropped.len(), "Loaded snapshot");
    Ok(load)
}
