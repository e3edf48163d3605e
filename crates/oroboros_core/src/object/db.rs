//! # Object Database
//!
//! Forest of object records plus a hash index from path id to node.
//!
//! ## Locking
//!
//! One read/write lock guards the whole forest:
//! - queries take the shared side for the duration of the call and may run on any thread
//! - mutations take the exclusive side and are only legal on the owner thread
//!
//! Callers must not hold the result of a query across a mutation; ids are stable, borrowed
//! data is not handed out.
//!
//! ## Node Reuse
//!
//! Node slots are reused after removal with a bumped generation, so a stale [`ObjectId`] never
//! resolves to the object that took its slot.

use std::collections::{HashMap, HashSet, VecDeque};
use std::thread::ThreadId;

use oroboros_reflect::{DescriptorId, ObjectId, StringId};
use parking_lot::RwLock;
use tracing::trace;

use super::flags::ObjectFlags;
use super::path::{is_valid_name, join_path};
use crate::error::{ObjectsError, ObjectsResult};
use crate::memory::ObjectHandle;

/// Database entry of one live object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectRecord {
    /// Hash of `path`, unique among live records.
    pub path_id: StringId,
    /// Full path.
    pub path: String,
    /// Object name, the last path element.
    pub name: String,
    /// Class descriptor.
    pub class: DescriptorId,
    /// Heap storage.
    pub handle: ObjectHandle,
    /// State bits.
    pub flags: ObjectFlags,
}

/// Node of the forest.
#[derive(Default)]
struct Node {
    generation: u32,
    record: Option<ObjectRecord>,
    parent: Option<ObjectId>,
    children: Vec<ObjectId>,
}

#[derive(Default)]
struct DbInner {
    nodes: Vec<Node>,
    free: Vec<u32>,
    index: HashMap<StringId, ObjectId>,
    by_handle: HashMap<ObjectHandle, ObjectId>,
    roots: Vec<ObjectId>,
}

impl DbInner {
    fn node(&self, id: ObjectId) -> Option<&Node> {
        self.nodes
            .get(id.index() as usize)
            .filter(|node| node.generation == id.generation() && node.record.is_some())
    }

    fn node_mut(&mut self, id: ObjectId) -> Option<&mut Node> {
        self.nodes
            .get_mut(id.index() as usize)
            .filter(|node| node.generation == id.generation() && node.record.is_some())
    }

    fn record(&self, id: ObjectId) -> Option<&ObjectRecord> {
        self.node(id)?.record.as_ref()
    }

    /// `id` followed by all its subobjects, every outer before its subobjects.
    fn subtree(&self, id: ObjectId) -> Vec<ObjectId> {
        let mut out = Vec::new();
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            if let Some(node) = self.node(current) {
                out.push(current);
                queue.extend(node.children.iter().copied());
            }
        }
        out
    }

    fn is_ancestor(&self, ancestor: ObjectId, id: ObjectId) -> bool {
        let mut current = self.node(id).and_then(|node| node.parent);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.node(parent).and_then(|node| node.parent);
        }
        false
    }

    fn detach(&mut self, id: ObjectId) {
        match self.node(id).and_then(|node| node.parent) {
            Some(parent) => {
                if let Some(parent) = self.node_mut(parent) {
                    parent.children.retain(|&child| child != id);
                }
            }
            None => self.roots.retain(|&root| root != id),
        }
    }

    fn attach(&mut self, id: ObjectId, parent: Option<ObjectId>) {
        match parent {
            Some(parent_id) => {
                if let Some(parent) = self.node_mut(parent_id) {
                    parent.children.push(id);
                }
            }
            None => self.roots.push(id),
        }
        if let Some(node) = self.node_mut(id) {
            node.parent = parent;
        }
    }
}

/// Concurrent-read registry of every live object.
pub struct ObjectsDb {
    inner: RwLock<DbInner>,
    owner: ThreadId,
}

impl ObjectsDb {
    /// Creates an empty database owned by the calling thread.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty database with room for `capacity` nodes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(DbInner {
                nodes: Vec::with_capacity(capacity),
                index: HashMap::with_capacity(capacity),
                by_handle: HashMap::with_capacity(capacity),
                ..DbInner::default()
            }),
            owner: std::thread::current().id(),
        }
    }

    /// Thread allowed to mutate the database.
    #[must_use]
    pub const fn owner_thread(&self) -> ThreadId {
        self.owner
    }

    #[inline]
    fn assert_owner(&self) {
        debug_assert_eq!(
            std::thread::current().id(),
            self.owner,
            "object database mutated off its owner thread"
        );
    }

    // =========================================================================
    // Mutation (owner thread only)
    // =========================================================================

    /// Adds a record for a new object under `parent` (or as a root).
    ///
    /// # Errors
    ///
    /// Fails if the name is invalid, the parent is not live, or the path is taken.
    pub fn add_object(
        &self,
        name: &str,
        class: DescriptorId,
        handle: ObjectHandle,
        flags: ObjectFlags,
        parent: Option<ObjectId>,
    ) -> ObjectsResult<ObjectId> {
        self.assert_owner();
        if !is_valid_name(name) {
            return Err(ObjectsError::InvalidName(name.to_owned()));
        }

        let mut inner = self.inner.write();
        let path = match parent {
            Some(parent_id) => {
                let parent = inner
                    .record(parent_id)
                    .ok_or(ObjectsError::ObjectNotFound(parent_id))?;
                join_path(&parent.path, name)
            }
            None => name.to_owned(),
        };
        let path_id = StringId::new(&path);
        if inner.index.contains_key(&path_id) {
            return Err(ObjectsError::NameTaken(path));
        }

        let id = match inner.free.pop() {
            Some(index) => {
                let node = &mut inner.nodes[index as usize];
                node.generation = node.generation.wrapping_add(1);
                ObjectId::new(index, node.generation)
            }
            None => {
                #[allow(clippy::cast_possible_truncation)]
                let index = inner.nodes.len() as u32;
                inner.nodes.push(Node::default());
                ObjectId::new(index, 0)
            }
        };

        trace!(%id, path = %path, "Added object record");
        let node = &mut inner.nodes[id.index() as usize];
        node.record = Some(ObjectRecord {
            path_id,
            path,
            name: name.to_owned(),
            class,
            handle,
            flags,
        });
        node.children.clear();
        inner.index.insert(path_id, id);
        inner.by_handle.insert(handle, id);
        inner.attach(id, parent);
        Ok(id)
    }

    /// Removes an object and all its subobjects, deepest first.
    ///
    /// Returns the removed records; the caller owns releasing their storage.
    pub fn remove_object(&self, id: ObjectId) -> Vec<(ObjectId, ObjectRecord)> {
        self.assert_owner();
        let mut inner = self.inner.write();
        if inner.node(id).is_none() {
            return Vec::new();
        }

        inner.detach(id);
        let subtree = inner.subtree(id);
        let mut removed = Vec::with_capacity(subtree.len());
        for &current in subtree.iter().rev() {
            // Index entries go first, computed from the record that is about to disappear.
            let Some(record) = inner.record(current).cloned() else {
                continue;
            };
            inner.index.remove(&record.path_id);
            inner.by_handle.remove(&record.handle);

            let node = &mut inner.nodes[current.index() as usize];
            node.record = None;
            node.parent = None;
            node.children.clear();
            inner.free.push(current.index());
            trace!(id = %current, path = %record.path, "Removed object record");
            removed.push((current, record));
        }
        removed
    }

    /// Points a record at new storage.
    pub fn set_object(&self, id: ObjectId, class: DescriptorId, handle: ObjectHandle) -> bool {
        self.assert_owner();
        let mut inner = self.inner.write();
        let Some(old) = inner.record(id).map(|record| record.handle) else {
            return false;
        };
        inner.by_handle.remove(&old);
        inner.by_handle.insert(handle, id);
        if let Some(record) = inner.node_mut(id).and_then(|node| node.record.as_mut()) {
            record.class = class;
            record.handle = handle;
        }
        true
    }

    /// Moves an object under a new parent, keeping its name.
    ///
    /// # Errors
    ///
    /// See [`ObjectsDb::relocate`].
    pub fn set_parent(&self, id: ObjectId, parent: Option<ObjectId>) -> ObjectsResult<()> {
        self.relocate(id, parent, None)
    }

    /// Renames an object in place.
    ///
    /// # Errors
    ///
    /// See [`ObjectsDb::relocate`].
    pub fn rename(&self, id: ObjectId, name: &str) -> ObjectsResult<()> {
        let parent = self.parent(id);
        self.relocate(id, parent, Some(name))
    }

    /// Moves and optionally renames an object, rewriting the paths of its whole subtree.
    ///
    /// # Errors
    ///
    /// Fails if an object is not live, the move would create a cycle, the name is invalid, or
    /// any new path in the subtree is taken by another object.
    pub fn relocate(
        &self,
        id: ObjectId,
        parent: Option<ObjectId>,
        name: Option<&str>,
    ) -> ObjectsResult<()> {
        self.assert_owner();
        let mut inner = self.inner.write();
        let record = inner.record(id).ok_or(ObjectsError::ObjectNotFound(id))?;
        let name = name.map_or_else(|| record.name.clone(), str::to_owned);
        if !is_valid_name(&name) {
            return Err(ObjectsError::InvalidName(name));
        }

        let root_path = match parent {
            Some(parent_id) => {
                if parent_id == id || inner.is_ancestor(id, parent_id) {
                    return Err(ObjectsError::HierarchyCycle {
                        object: id,
                        outer: parent_id,
                    });
                }
                let parent_record = inner
                    .record(parent_id)
                    .ok_or(ObjectsError::ObjectNotFound(parent_id))?;
                join_path(&parent_record.path, &name)
            }
            None => name.clone(),
        };

        let subtree = inner.subtree(id);
        let moving: HashSet<ObjectId> = subtree.iter().copied().collect();
        let mut new_paths: HashMap<ObjectId, String> = HashMap::with_capacity(subtree.len());
        new_paths.insert(id, root_path);
        for &current in &subtree[1..] {
            let Some(node) = inner.node(current) else {
                continue;
            };
            let (Some(record), Some(outer)) = (node.record.as_ref(), node.parent) else {
                continue;
            };
            let path = join_path(&new_paths[&outer], &record.name);
            new_paths.insert(current, path);
        }

        for path in new_paths.values() {
            if let Some(existing) = inner.index.get(&StringId::new(path)) {
                if !moving.contains(existing) {
                    return Err(ObjectsError::NameTaken(path.clone()));
                }
            }
        }

        for &current in &subtree {
            if let Some(path_id) = inner.record(current).map(|record| record.path_id) {
                inner.index.remove(&path_id);
            }
        }
        for (current, path) in new_paths {
            let path_id = StringId::new(&path);
            if let Some(record) = inner.node_mut(current).and_then(|node| node.record.as_mut()) {
                record.path = path;
                record.path_id = path_id;
                if current == id {
                    record.name.clone_from(&name);
                }
            }
            inner.index.insert(path_id, current);
        }

        inner.detach(id);
        inner.attach(id, parent);
        Ok(())
    }

    /// Edits the flags of an object and returns the new value.
    pub fn update_flags(
        &self,
        id: ObjectId,
        edit: impl FnOnce(&mut ObjectFlags),
    ) -> Option<ObjectFlags> {
        self.assert_owner();
        let mut inner = self.inner.write();
        let record = inner.node_mut(id)?.record.as_mut()?;
        edit(&mut record.flags);
        Some(record.flags)
    }

    // =========================================================================
    // Queries (any thread)
    // =========================================================================

    /// Looks up an object by path id.
    #[must_use]
    pub fn get_object(&self, path_id: StringId) -> Option<ObjectId> {
        self.inner.read().index.get(&path_id).copied()
    }

    /// Looks up an object by full path.
    #[must_use]
    pub fn find(&self, path: &str) -> Option<ObjectId> {
        self.get_object(StringId::new(path))
    }

    /// Copy of an object's record.
    #[must_use]
    pub fn object_record(&self, id: ObjectId) -> Option<ObjectRecord> {
        self.inner.read().record(id).cloned()
    }

    /// Runs `f` on an object's record under the shared lock.
    pub fn with_record<R>(&self, id: ObjectId, f: impl FnOnce(&ObjectRecord) -> R) -> Option<R> {
        self.inner.read().record(id).map(f)
    }

    /// Storage handle of an object.
    #[must_use]
    pub fn handle_of(&self, id: ObjectId) -> Option<ObjectHandle> {
        self.with_record(id, |record| record.handle)
    }

    /// Checks whether `id` names a live object.
    #[must_use]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.inner.read().node(id).is_some()
    }

    /// Outer of an object.
    #[must_use]
    pub fn parent(&self, id: ObjectId) -> Option<ObjectId> {
        self.inner.read().node(id)?.parent
    }

    /// Direct subobjects, in creation order.
    #[must_use]
    pub fn get_children(&self, id: ObjectId) -> Vec<ObjectId> {
        self.inner
            .read()
            .node(id)
            .map(|node| node.children.clone())
            .unwrap_or_default()
    }

    /// All subobjects at any depth, breadth first. Excludes `id` itself.
    #[must_use]
    pub fn get_subobjects(&self, id: ObjectId) -> Vec<ObjectId> {
        let mut subtree = self.inner.read().subtree(id);
        if !subtree.is_empty() {
            subtree.remove(0);
        }
        subtree
    }

    /// Every live object, each root followed by its subobjects.
    #[must_use]
    pub fn get_all_objects(&self) -> Vec<ObjectId> {
        let inner = self.inner.read();
        inner
            .roots
            .iter()
            .flat_map(|&root| inner.subtree(root))
            .collect()
    }

    /// Objects without an outer.
    #[must_use]
    pub fn roots(&self) -> Vec<ObjectId> {
        self.inner.read().roots.clone()
    }

    /// Object owning a storage handle.
    #[must_use]
    pub fn object_by_handle(&self, handle: ObjectHandle) -> Option<ObjectId> {
        self.inner.read().by_handle.get(&handle).copied()
    }

    /// Checks whether `outer` is an outer of `id` at any depth.
    #[must_use]
    pub fn has_outer(&self, id: ObjectId, outer: ObjectId) -> bool {
        self.inner.read().is_ancestor(outer, id)
    }

    /// Names from the root down to `id`.
    #[must_use]
    pub fn name_chain(&self, id: ObjectId) -> Vec<(ObjectId, String)> {
        let inner = self.inner.read();
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let Some(node) = inner.node(node_id) else {
                break;
            };
            if let Some(record) = &node.record {
                chain.push((node_id, record.name.clone()));
            }
            current = node.parent;
        }
        chain.reverse();
        chain
    }

    /// Number of live objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().index.len()
    }

    /// Checks whether the database is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ObjectsDb {
    fn default() -> Self {
        Self::new()
    }
}
