//! # Core Objects
//!
//! The object runtime facade: type registry, object heap, object database and garbage list
//! behind one handle.
//!
//! ## Threading
//!
//! ```text
//!  owner thread                         any thread
//!  ─────────────                        ──────────
//!  mutation_permit() ──► create_object   read / read_dyn
//!                        destroy_object  find / full_path
//!                        modify          children / subobjects
//!                        set_outer ...   resolve_handle
//! ```
//!
//! Every mutating call takes a [`MutationPermit`], which can only be obtained on the thread
//! that created the runtime and cannot leave it.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use oroboros_reflect::{DescriptorId, ObjectId, Reflected, TypeRegistry};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use super::db::{ObjectRecord, ObjectsDb};
use super::flags::ObjectFlags;
use super::gc::GcCycle;
use super::path::{join_path, join_relative};
use super::permit::MutationPermit;
use crate::config::RuntimeConfig;
use crate::error::{ObjectsError, ObjectsResult};
use crate::memory::{ObjectHandle, ObjectHeap};
use crate::template::{ObjectTemplate, Prefab};

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

/// A reflected type usable as an engine object class.
pub trait ObjectClass: Reflected {
    /// Called right after an object of this class was created and registered.
    ///
    /// Default subobjects are created here.
    fn constructed(_objects: &CoreObjects, _permit: &MutationPermit, _this: ObjectId) {}
}

type ConstructedHook = fn(&CoreObjects, &MutationPermit, ObjectId);

/// What a storage handle currently refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleState {
    /// A live object in the database.
    Live(ObjectId),
    /// Destroyed, but its storage has not been collected yet.
    PendingGc,
    /// Nothing.
    Invalid,
}

/// The object runtime.
pub struct CoreObjects {
    types: Arc<TypeRegistry>,
    db: ObjectsDb,
    pub(super) heap: RwLock<ObjectHeap>,
    hooks: RwLock<HashMap<DescriptorId, ConstructedHook>>,
    pending_gc: Mutex<HashSet<ObjectHandle>>,
    /// Destroyed since the last reachability cycle cleared references to them.
    pub(super) destroyed: Mutex<HashSet<ObjectId>>,
    pub(super) gc: Mutex<GcCycle>,
    mutation_epoch: AtomicU64,
    main_thread: ThreadId,
    runtime_id: u64,
    config: RuntimeConfig,
}

impl CoreObjects {
    /// Creates a runtime owned by the calling thread.
    #[must_use]
    pub fn new(types: Arc<TypeRegistry>) -> Self {
        Self::with_config(types, RuntimeConfig::default())
    }

    /// Creates a runtime owned by the calling thread with explicit configuration.
    #[must_use]
    pub fn with_config(types: Arc<TypeRegistry>, config: RuntimeConfig) -> Self {
        let objects = Self {
            types,
            db: ObjectsDb::with_capacity(config.database.initial_capacity),
            heap: RwLock::new(ObjectHeap::new()),
            hooks: RwLock::new(HashMap::new()),
            pending_gc: Mutex::new(HashSet::new()),
            destroyed: Mutex::new(HashSet::new()),
            gc: Mutex::new(GcCycle::default()),
            mutation_epoch: AtomicU64::new(0),
            main_thread: std::thread::current().id(),
            runtime_id: NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed),
            config,
        };
        let permit = objects.mutation_permit();
        objects.register_class::<ObjectTemplate>(&permit);
        objects.register_class::<Prefab>(&permit);
        info!(
            capacity = objects.config.database.initial_capacity,
            "Object runtime initialized"
        );
        objects
    }

    /// The type registry.
    #[must_use]
    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    /// The object database.
    #[must_use]
    pub const fn db(&self) -> &ObjectsDb {
        &self.db
    }

    /// Runtime configuration.
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    // =========================================================================
    // Permits
    // =========================================================================

    /// Issues a mutation permit.
    ///
    /// # Panics
    ///
    /// Panics when called off the thread that created the runtime.
    #[must_use]
    pub fn mutation_permit(&self) -> MutationPermit {
        assert_eq!(
            std::thread::current().id(),
            self.main_thread,
            "object runtime mutated off its main thread"
        );
        MutationPermit::new(self.runtime_id)
    }

    /// Issues a mutation permit if called on the runtime's thread.
    #[must_use]
    pub fn try_mutation_permit(&self) -> Option<MutationPermit> {
        (std::thread::current().id() == self.main_thread)
            .then(|| MutationPermit::new(self.runtime_id))
    }

    #[inline]
    pub(super) fn check_permit(&self, permit: &MutationPermit) {
        debug_assert_eq!(
            permit.runtime(),
            self.runtime_id,
            "mutation permit issued by another runtime"
        );
    }

    /// Records an edit that may add references or roots.
    #[inline]
    fn touch(&self) {
        self.mutation_epoch.fetch_add(1, Ordering::Relaxed);
    }

    /// Counter bumped by every edit that may add references or roots.
    #[inline]
    pub(super) fn mutation_epoch(&self) -> u64 {
        self.mutation_epoch.load(Ordering::Relaxed)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Registers `T` as an object class. Registering twice is a no-op.
    pub fn register_class<T: ObjectClass>(&self, permit: &MutationPermit) -> DescriptorId {
        self.check_permit(permit);
        let class = self.heap.write().register::<T>(&self.types);
        self.hooks.write().insert(class, T::constructed);
        class
    }

    /// Checks whether a class can be instantiated.
    #[must_use]
    pub fn is_class_registered(&self, class: DescriptorId) -> bool {
        self.heap.read().is_registered(class)
    }

    /// Creates an object of class `T`.
    ///
    /// # Errors
    ///
    /// See [`CoreObjects::create_object`].
    pub fn create<T: ObjectClass>(
        &self,
        permit: &MutationPermit,
        name: &str,
        outer: Option<ObjectId>,
    ) -> ObjectsResult<ObjectId> {
        let class = self.types.descriptor_of::<T>();
        self.create_object(permit, class, name, outer, ObjectFlags::NONE)
    }

    /// Creates an object, registers it and runs its class's construction hook.
    ///
    /// Objects without an outer get [`ObjectFlags::ROOT_OBJECT`].
    ///
    /// # Errors
    ///
    /// Fails if the class is not registered, the name is invalid, the outer is not live, or
    /// the path is taken.
    pub fn create_object(
        &self,
        permit: &MutationPermit,
        class: DescriptorId,
        name: &str,
        outer: Option<ObjectId>,
        flags: ObjectFlags,
    ) -> ObjectsResult<ObjectId> {
        self.check_permit(permit);
        let handle = self
            .heap
            .write()
            .allocate(class)
            .ok_or_else(|| ObjectsError::ClassNotRegistered(self.class_name(class)))?;

        let mut flags = flags;
        flags.set(ObjectFlags::ROOT_OBJECT, outer.is_none());
        let id = match self.db.add_object(name, class, handle, flags, outer) {
            Ok(id) => id,
            Err(error) => {
                self.heap.write().free(handle);
                return Err(error);
            }
        };
        self.touch();
        debug!(%id, class = %self.class_name(class), name, "Created object");

        let hook = self.hooks.read().get(&class).copied();
        if let Some(hook) = hook {
            hook(self, permit, id);
        }
        Ok(id)
    }

    /// Returns the object at `outer`/`name` if it exists with a compatible class, otherwise
    /// creates it.
    ///
    /// # Errors
    ///
    /// Fails with [`ObjectsError::ClassMismatch`] if the existing object's class is not
    /// `class` or derived from it, otherwise see [`CoreObjects::create_object`].
    pub fn create_or_get(
        &self,
        permit: &MutationPermit,
        class: DescriptorId,
        name: &str,
        outer: Option<ObjectId>,
        flags: ObjectFlags,
    ) -> ObjectsResult<ObjectId> {
        let path = match outer {
            Some(outer_id) => {
                let outer_path = self
                    .full_path(outer_id)
                    .ok_or(ObjectsError::ObjectNotFound(outer_id))?;
                join_path(&outer_path, name)
            }
            None => name.to_owned(),
        };
        if let Some(existing) = self.db.find(&path) {
            let found = self.class_of(existing).ok_or(ObjectsError::ObjectNotFound(existing))?;
            if !self.types.is_child_of(found, class) {
                return Err(ObjectsError::ClassMismatch {
                    expected: self.class_name(class),
                    found: self.class_name(found),
                });
            }
            return Ok(existing);
        }
        self.create_object(permit, class, name, outer, flags)
    }

    /// Removes an object and its subobjects from the database.
    ///
    /// Storage is parked as pending garbage until [`CoreObjects::collect_garbage`], unless the
    /// runtime is configured to collect on destroy or the object carries
    /// [`ObjectFlags::GC_PURGE`]. Returns the number of objects destroyed.
    pub fn destroy_object(&self, permit: &MutationPermit, id: ObjectId) -> usize {
        self.check_permit(permit);
        let purge = self.config.gc.collect_on_destroy
            || self
                .flags(id)
                .is_some_and(|flags| flags.contains(ObjectFlags::GC_PURGE));
        let removed = self.db.remove_object(id);
        if removed.is_empty() {
            return 0;
        }
        self.destroyed.lock().extend(removed.iter().map(|(id, _)| *id));

        if purge {
            let mut heap = self.heap.write();
            let freed = removed
                .iter()
                .filter(|(_, record)| heap.free(record.handle))
                .count();
            debug_assert_eq!(freed, removed.len(), "destroyed object had no storage");
        } else {
            self.pending_gc
                .lock()
                .extend(removed.iter().map(|(_, record)| record.handle));
        }
        debug!(%id, count = removed.len(), "Destroyed object tree");
        removed.len()
    }

    /// Frees the storage of every destroyed object. Returns the number freed.
    pub fn collect_garbage(&self, permit: &MutationPermit) -> usize {
        self.check_permit(permit);
        let pending: Vec<ObjectHandle> = self.pending_gc.lock().drain().collect();
        let mut heap = self.heap.write();
        let freed = pending.into_iter().filter(|&handle| heap.free(handle)).count();
        if freed > 0 {
            debug!(freed, "Collected garbage");
        }
        freed
    }

    /// Number of objects waiting for garbage collection.
    #[must_use]
    pub fn pending_gc_count(&self) -> usize {
        self.pending_gc.lock().len()
    }

    /// Live objects and storage pools of a class, including destroyed objects not yet
    /// collected.
    #[must_use]
    pub fn storage_usage(&self, class: DescriptorId) -> Option<(usize, usize)> {
        self.heap
            .read()
            .allocator(class)
            .map(|allocator| (allocator.live_count(), allocator.pool_count()))
    }

    /// Resolves a storage handle.
    ///
    /// Destroyed objects are gone from the database but keep valid storage until collected;
    /// those are answered from the heap directly.
    #[must_use]
    pub fn resolve_handle(&self, handle: ObjectHandle) -> HandleState {
        if let Some(id) = self.db.object_by_handle(handle) {
            return HandleState::Live(id);
        }
        if self.pending_gc.lock().contains(&handle) && self.heap.read().is_valid(handle) {
            return HandleState::PendingGc;
        }
        HandleState::Invalid
    }

    /// Checks whether `id` names a live object.
    #[must_use]
    pub fn is_valid(&self, id: ObjectId) -> bool {
        self.db.contains(id)
    }

    // =========================================================================
    // Values
    // =========================================================================

    /// Reads an object's value as `T`. `None` if the object is gone or is not a `T`.
    pub fn read<T: Any, R>(&self, id: ObjectId, f: impl FnOnce(&T) -> R) -> Option<R> {
        let handle = self.db.handle_of(id)?;
        let heap = self.heap.read();
        heap.get(handle)?.downcast_ref::<T>().map(f)
    }

    /// Reads an object's value type-erased, together with its class.
    pub fn read_dyn<R>(&self, id: ObjectId, f: impl FnOnce(DescriptorId, &dyn Any) -> R) -> Option<R> {
        let handle = self.db.handle_of(id)?;
        let heap = self.heap.read();
        heap.get(handle).map(|value| f(handle.class, value))
    }

    /// Edits an object's value as `T`.
    pub fn modify<T: Any, R>(
        &self,
        permit: &MutationPermit,
        id: ObjectId,
        f: impl FnOnce(&mut T) -> R,
    ) -> Option<R> {
        self.check_permit(permit);
        let handle = self.db.handle_of(id)?;
        self.touch();
        let mut heap = self.heap.write();
        heap.get_mut(handle)?.downcast_mut::<T>().map(f)
    }

    /// Edits an object's value type-erased.
    pub fn modify_dyn<R>(
        &self,
        permit: &MutationPermit,
        id: ObjectId,
        f: impl FnOnce(DescriptorId, &mut dyn Any) -> R,
    ) -> Option<R> {
        self.check_permit(permit);
        let handle = self.db.handle_of(id)?;
        self.touch();
        let mut heap = self.heap.write();
        heap.get_mut(handle).map(|value| f(handle.class, value))
    }

    /// Moves an object's value out, leaving a default value in its storage.
    pub fn take_value(
        &self,
        permit: &MutationPermit,
        id: ObjectId,
    ) -> Option<Box<dyn Any + Send + Sync>> {
        self.check_permit(permit);
        let handle = self.db.handle_of(id)?;
        self.heap.write().take(handle)
    }

    /// Puts back a value taken with [`CoreObjects::take_value`].
    pub fn restore_value(
        &self,
        permit: &MutationPermit,
        id: ObjectId,
        value: Box<dyn Any + Send + Sync>,
    ) -> bool {
        self.check_permit(permit);
        self.touch();
        self.db
            .handle_of(id)
            .is_some_and(|handle| self.heap.write().restore(handle, value))
    }

    // =========================================================================
    // Naming and hierarchy
    // =========================================================================

    /// Renames an object.
    ///
    /// # Errors
    ///
    /// Fails if the name is invalid or taken.
    pub fn rename(&self, permit: &MutationPermit, id: ObjectId, name: &str) -> ObjectsResult<()> {
        self.check_permit(permit);
        self.db.rename(id, name)
    }

    /// Moves an object under a new outer, or makes it a root.
    ///
    /// # Errors
    ///
    /// Fails on cycles or path collisions.
    pub fn set_outer(
        &self,
        permit: &MutationPermit,
        id: ObjectId,
        outer: Option<ObjectId>,
    ) -> ObjectsResult<()> {
        self.set_outer_and_name(permit, id, outer, None)
    }

    /// Moves and renames an object in one step.
    ///
    /// # Errors
    ///
    /// Fails on cycles, invalid names or path collisions.
    pub fn set_outer_and_name(
        &self,
        permit: &MutationPermit,
        id: ObjectId,
        outer: Option<ObjectId>,
        name: Option<&str>,
    ) -> ObjectsResult<()> {
        self.check_permit(permit);
        self.touch();
        self.db.relocate(id, outer, name)?;
        self.db
            .update_flags(id, |flags| flags.set(ObjectFlags::ROOT_OBJECT, outer.is_none()));
        Ok(())
    }

    /// Outer of an object.
    #[must_use]
    pub fn outer(&self, id: ObjectId) -> Option<ObjectId> {
        self.db.parent(id)
    }

    /// Root of the tree holding `id`.
    #[must_use]
    pub fn outermost(&self, id: ObjectId) -> Option<ObjectId> {
        if !self.db.contains(id) {
            return None;
        }
        let mut current = id;
        while let Some(outer) = self.db.parent(current) {
            current = outer;
        }
        Some(current)
    }

    /// Checks whether `outer` owns `id` at any depth.
    #[must_use]
    pub fn has_outer(&self, id: ObjectId, outer: ObjectId) -> bool {
        self.db.has_outer(id, outer)
    }

    /// Class of an object.
    #[must_use]
    pub fn class_of(&self, id: ObjectId) -> Option<DescriptorId> {
        self.db.with_record(id, |record| record.class)
    }

    /// Checks whether an object is an instance of `T` or a class derived from it.
    #[must_use]
    pub fn is_a<T: Reflected>(&self, id: ObjectId) -> bool {
        let class = self.types.descriptor_of::<T>();
        self.class_of(id)
            .is_some_and(|found| self.types.is_child_of(found, class))
    }

    /// Name of an object.
    #[must_use]
    pub fn name_of(&self, id: ObjectId) -> Option<String> {
        self.db.with_record(id, |record| record.name.clone())
    }

    /// Full path of an object.
    #[must_use]
    pub fn full_path(&self, id: ObjectId) -> Option<String> {
        self.db.with_record(id, |record| record.path.clone())
    }

    /// Copy of an object's database record.
    #[must_use]
    pub fn record(&self, id: ObjectId) -> Option<ObjectRecord> {
        self.db.object_record(id)
    }

    /// Path of `id` relative to `stop_at`, or its full path without `stop_at`.
    ///
    /// Returns `None` if `stop_at` is not an outer of `id`; `Some("")` if they are equal.
    #[must_use]
    pub fn object_path(&self, id: ObjectId, stop_at: Option<ObjectId>) -> Option<String> {
        let Some(stop_at) = stop_at else {
            return self.full_path(id);
        };
        let chain = self.db.name_chain(id);
        let start = chain.iter().position(|(node, _)| *node == stop_at)?;
        Some(join_relative(
            chain[start + 1..].iter().map(|(_, name)| name.as_str()),
        ))
    }

    /// Finds an object by full path.
    #[must_use]
    pub fn find(&self, path: &str) -> Option<ObjectId> {
        self.db.find(path)
    }

    /// Finds a subobject by path relative to `outer`.
    #[must_use]
    pub fn find_under(&self, outer: ObjectId, relative: &str) -> Option<ObjectId> {
        let outer_path = self.full_path(outer)?;
        self.db.find(&join_path(&outer_path, relative))
    }

    /// Direct subobjects.
    #[must_use]
    pub fn children(&self, id: ObjectId) -> Vec<ObjectId> {
        self.db.get_children(id)
    }

    /// Subobjects at any depth, breadth first.
    #[must_use]
    pub fn subobjects(&self, id: ObjectId) -> Vec<ObjectId> {
        self.db.get_subobjects(id)
    }

    // =========================================================================
    // Flags
    // =========================================================================

    /// Flags of an object.
    #[must_use]
    pub fn flags(&self, id: ObjectId) -> Option<ObjectFlags> {
        self.db.with_record(id, |record| record.flags)
    }

    /// Sets flags on an object.
    pub fn set_flags(&self, permit: &MutationPermit, id: ObjectId, flags: ObjectFlags) -> bool {
        self.check_permit(permit);
        self.touch();
        self.db.update_flags(id, |current| current.insert(flags)).is_some()
    }

    /// Clears flags on an object.
    pub fn clear_flags(&self, permit: &MutationPermit, id: ObjectId, flags: ObjectFlags) -> bool {
        self.check_permit(permit);
        self.db.update_flags(id, |current| current.remove(flags)).is_some()
    }

    /// Marks the outermost object of `id` as having unsaved edits.
    pub fn mark_dirty(&self, permit: &MutationPermit, id: ObjectId) -> bool {
        self.outermost(id)
            .is_some_and(|root| self.set_flags(permit, root, ObjectFlags::PACKAGE_DIRTY))
    }

    fn class_name(&self, class: DescriptorId) -> String {
        self.types
            .try_get(class)
            .map_or_else(|| format!("#{}", class.index()), |ty| ty.name().to_owned())
    }
}

#[cfg(test)]
mod tests {
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
    fn test_create_runs_construction_hook() {
        let objects = runtime();
        let permit = objects.mutation_permit();
        let chair = objects.create::<Chair>(&permit, "Chair", None).unwrap();

        let cushion = objects.find("Chair:Cushion").unwrap();
        assert_eq!(objects.outer(cushion), Some(chair));
        assert!(objects.is_a::<Cushion>(cushion));
        assert!(objects.flags(chair).unwrap().contains(ObjectFlags::ROOT_OBJECT));
        assert!(!objects.flags(cushion).unwrap().contains(ObjectFlags::ROOT_OBJECT));
        assert_eq!(
            objects.read::<Chair, _>(chair, |chair| chair.cushion.get()),
            Some(Some(cushion))
        );
    }

    #[test]
    fn test_unregistered_class_rejected() {
        let objects = CoreObjects::new(Arc::new(TypeRegistry::new()));
        let permit = objects.mutation_permit();
        assert!(matches!(
            objects.create::<Chair>(&permit, "Chair", None),
            Err(ObjectsError::ClassNotRegistered(_))
        ));
    }

    #[test]
    fn test_destroy_parks_storage_until_collection() {
        let objects = runtime();
        let permit = objects.mutation_permit();
        let chair = objects.create::<Chair>(&permit, "Chair", None).unwrap();
        let handle = objects.record(chair).unwrap().handle;

        assert_eq!(objects.resolve_handle(handle), HandleState::Live(chair));
        assert_eq!(objects.destroy_object(&permit, chair), 2);
        assert!(!objects.is_valid(chair));
        assert!(objects.find("Chair:Cushion").is_none());
        assert_eq!(objects.resolve_handle(handle), HandleState::PendingGc);

        assert_eq!(objects.collect_garbage(&permit), 2);
        assert_eq!(objects.resolve_handle(handle), HandleState::Invalid);
    }

    #[test]
    fn test_collect_on_destroy() {
        let mut config = RuntimeConfig::default();
        config.gc.collect_on_destroy = true;
        let objects = CoreObjects::with_config(Arc::new(TypeRegistry::new()), config);
        let permit = objects.mutation_permit();
        objects.register_class::<Cushion>(&permit);

        let cushion = objects.create::<Cushion>(&permit, "Loose", None).unwrap();
        let handle = objects.record(cushion).unwrap().handle;
        objects.destroy_object(&permit, cushion);
        assert_eq!(objects.pending_gc_count(), 0);
        assert_eq!(objects.resolve_handle(handle), HandleState::Invalid);
    }

    #[test]
    fn test_purge_frees_whole_tree() {
        let objects = runtime();
        let permit = objects.mutation_permit();
        let chair_class = objects.types().descriptor_of::<Chair>();
        let cushion_class = objects.types().descriptor_of::<Cushion>();
        let chair = objects.create::<Chair>(&permit, "Chair", None).unwrap();
        let cushion = objects.find("Chair:Cushion").unwrap();
        let handles = [
            objects.record(chair).unwrap().handle,
            objects.record(cushion).unwrap().handle,
        ];
        objects.set_flags(&permit, chair, ObjectFlags::GC_PURGE);

        assert_eq!(objects.destroy_object(&permit, chair), 2);
        assert_eq!(objects.pending_gc_count(), 0);
        for handle in handles {
            assert_eq!(objects.resolve_handle(handle), HandleState::Invalid);
        }
        assert_eq!(objects.storage_usage(chair_class).map(|usage| usage.0), Some(0));
        assert_eq!(objects.storage_usage(cushion_class).map(|usage| usage.0), Some(0));
        assert_eq!(objects.collect_garbage(&permit), 0);
    }

    #[test]
    fn test_create_or_get() {
        let objects = runtime();
        let permit = objects.mutation_permit();
        let chair_class = objects.types().descriptor_of::<Chair>();
        let cushion_class = objects.types().descriptor_of::<Cushion>();

        let chair = objects
            .create_or_get(&permit, chair_class, "Chair", None, ObjectFlags::NONE)
            .unwrap();
        let again = objects
            .create_or_get(&permit, chair_class, "Chair", None, ObjectFlags::NONE)
            .unwrap();
        assert_eq!(chair, again);
        assert!(matches!(
            objects.create_or_get(&permit, cushion_class, "Chair", None, ObjectFlags::NONE),
            Err(ObjectsError::ClassMismatch { .. })
        ));
    }

    #[test]
    fn test_paths_and_outers() {
        let objects = runtime();
        let permit = objects.mutation_permit();
        let room = objects.create::<Chair>(&permit, "Room", None).unwrap();
        let chair = objects.create::<Chair>(&permit, "Chair", Some(room)).unwrap();
        let cushion = objects.find("Room:Chair.Cushion").unwrap();

        assert_eq!(objects.object_path(cushion, Some(room)).as_deref(), Some("Chair.Cushion"));
        assert_eq!(objects.object_path(cushion, Some(cushion)).as_deref(), Some(""));
        assert_eq!(objects.object_path(room, Some(cushion)), None);
        assert_eq!(objects.outermost(cushion), Some(room));
        assert_eq!(objects.find_under(room, "Chair.Cushion"), Some(cushion));

        objects.set_outer_and_name(&permit, chair, None, Some("Loose")).unwrap();
        assert_eq!(objects.full_path(cushion).as_deref(), Some("Loose:Cushion"));
        assert!(objects.flags(chair).unwrap().contains(ObjectFlags::ROOT_OBJECT));

        objects.mark_dirty(&permit, cushion);
        assert!(objects.flags(chair).unwrap().contains(ObjectFlags::PACKAGE_DIRTY));
        assert!(!objects.flags(room).unwrap().contains(ObjectFlags::PACKAGE_DIRTY));
    }

    #[test]
    fn test_permit_refused_off_thread() {
        let objects = runtime();
        std::thread::scope(|scope| {
            scope.spawn(|| {
                assert!(objects.try_mutation_permit().is_none());
                assert!(objects.find("Missing").is_none());
            });
        });
        assert!(objects.try_mutation_permit().is_some());
    }
}
