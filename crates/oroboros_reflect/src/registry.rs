//! # Type Registry
//!
//! Process-wide table of reflected types, keyed by Rust [`TypeId`] and by hashed name.
//!
//! ## Two-phase class creation
//!
//! A class is inserted *bare* (no fields yet) before its fields are described. Field types that
//! refer back to the class (a `Vec<ObjPtr<Self>>`, a base whose field points at the derived
//! class) then resolve to the already-present bare entry instead of recursing forever.
//!
//! Creation is serialized by a reentrant lock: the thread building a class may recurse into
//! the registry, other threads wait until the class is complete. Lookups of existing
//! descriptors only take the read side of the table lock.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{ReentrantMutex, RwLock};
use tracing::{trace, warn};

use crate::descriptor::{ClassBody, ClassDescriptor, DescriptorId, FieldPath, TypeDescriptor, TypeKind};
use crate::name::StringId;

/// A type with a reflected descriptor.
pub trait Reflected: Any + Send + Sync + Default {
    /// Describes the type. Called once per registry.
    fn build_descriptor(registry: &TypeRegistry) -> TypeBuild;
}

/// Output of [`Reflected::build_descriptor`].
pub enum TypeBuild {
    /// A descriptor that is complete on construction.
    Ready {
        /// Stable type name.
        name: String,
        /// Shape of the type.
        kind: TypeKind,
    },
    /// A class, registered bare and then initialized by `init`.
    Class {
        /// Stable class name.
        name: String,
        /// Describes fields and base. Receives the id of the bare class.
        init: fn(&TypeRegistry, DescriptorId) -> ClassBody,
    },
}

/// Boxes a default-constructed `T`. Used as class constructor.
#[must_use]
pub fn construct_boxed<T: Any + Send + Sync + Default>() -> Box<dyn Any + Send + Sync> {
    Box::new(T::default())
}

#[derive(Default)]
struct RegistryInner {
    descriptors: Vec<Arc<TypeDescriptor>>,
    by_type: HashMap<TypeId, DescriptorId>,
    by_name: HashMap<StringId, DescriptorId>,
    derived: HashMap<DescriptorId, Vec<DescriptorId>>,
}

/// Registry of reflected types.
#[derive(Default)]
pub struct TypeRegistry {
    inner: RwLock<RegistryInner>,
    creation: ReentrantMutex<()>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the descriptor id of `T`, creating the descriptor on first use.
    pub fn descriptor_of<T: Reflected>(&self) -> DescriptorId {
        if let Some(id) = self.lookup::<T>() {
            if self.is_complete(id) {
                return id;
            }
        }

        // A bare class seen here is either ours (reentrant) or still being built elsewhere.
        let _creating = self.creation.lock();
        if let Some(id) = self.lookup::<T>() {
            return id;
        }

        match T::build_descriptor(self) {
            TypeBuild::Ready { name, kind } => self.insert(TypeId::of::<T>(), name, kind),
            TypeBuild::Class { name, init } => {
                let id = self.insert(
                    TypeId::of::<T>(),
                    name,
                    TypeKind::Class(ClassDescriptor::bare()),
                );
                let body = init(self, id);
                self.initialize_class(id, body);
                id
            }
        }
    }

    /// Returns the descriptor of `T`, creating it on first use.
    pub fn descriptor<T: Reflected>(&self) -> Arc<TypeDescriptor> {
        self.get(self.descriptor_of::<T>())
    }

    /// Returns the descriptor id of `T` if it has been created.
    #[must_use]
    pub fn lookup<T: Any>(&self) -> Option<DescriptorId> {
        let inner = self.inner.read();
        inner.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Returns a descriptor by id.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not handed out by this registry.
    #[must_use]
    pub fn get(&self, id: DescriptorId) -> Arc<TypeDescriptor> {
        Arc::clone(&self.inner.read().descriptors[id.index()])
    }

    /// Returns a descriptor by id, or `None` for a foreign id.
    #[must_use]
    pub fn try_get(&self, id: DescriptorId) -> Option<Arc<TypeDescriptor>> {
        self.inner.read().descriptors.get(id.index()).cloned()
    }

    /// Finds a descriptor by hashed type name.
    #[must_use]
    pub fn find_by_name(&self, name: StringId) -> Option<DescriptorId> {
        self.inner.read().by_name.get(&name).copied()
    }

    /// Base class of a class.
    #[must_use]
    pub fn base_of(&self, class: DescriptorId) -> Option<DescriptorId> {
        let descriptor = self.try_get(class)?;
        descriptor.as_class()?.base().map(|base| base.class)
    }

    /// Checks whether `class` is `base` or derives from it.
    #[must_use]
    pub fn is_child_of(&self, class: DescriptorId, base: DescriptorId) -> bool {
        let mut current = Some(class);
        while let Some(id) = current {
            if id == base {
                return true;
            }
            current = self.base_of(id);
        }
        false
    }

    /// Classes directly deriving from `class`.
    #[must_use]
    pub fn derived_classes(&self, class: DescriptorId) -> Vec<DescriptorId> {
        self.inner
            .read()
            .derived
            .get(&class)
            .cloned()
            .unwrap_or_default()
    }

    /// Finds a field by hashed name, searching base classes after the class itself.
    #[must_use]
    pub fn find_field(&self, class: DescriptorId, name: StringId) -> Option<FieldPath> {
        let mut bases = Vec::new();
        let mut current = self.try_get(class)?;
        loop {
            let base = {
                let body = current.as_class()?;
                if let Some(index) = body.fields().iter().position(|f| f.name_id() == name) {
                    return Some(FieldPath {
                        bases,
                        owner: current,
                        index,
                    });
                }
                body.base().map(|base| base.class)?
            };
            let next = self.try_get(base)?;
            bases.push(current);
            current = next;
        }
    }

    /// Checks whether a value of type `id` can contain an object reference.
    ///
    /// Reference walkers use this to skip plain data subtrees.
    #[must_use]
    pub fn may_hold_refs(&self, id: DescriptorId) -> bool {
        let mut visited = HashSet::new();
        self.may_hold_refs_inner(id, &mut visited)
    }

    fn may_hold_refs_inner(&self, id: DescriptorId, visited: &mut HashSet<DescriptorId>) -> bool {
        if !visited.insert(id) {
            return false;
        }
        let Some(descriptor) = self.try_get(id) else {
            return false;
        };
        match descriptor.kind() {
            TypeKind::Qualified(_) => true,
            TypeKind::Fundamental(_) | TypeKind::Special(_) | TypeKind::Enum(_) => false,
            TypeKind::Container(container) => self.may_hold_refs_inner(container.element, visited),
            TypeKind::Map(map) => {
                self.may_hold_refs_inner(map.key, visited)
                    || self.may_hold_refs_inner(map.value, visited)
            }
            TypeKind::Pair(pair) => {
                self.may_hold_refs_inner(pair.first, visited)
                    || self.may_hold_refs_inner(pair.second, visited)
            }
            TypeKind::Class(class) => {
                class
                    .base()
                    .is_some_and(|base| self.may_hold_refs_inner(base.class, visited))
                    || class
                        .fields()
                        .iter()
                        .any(|field| self.may_hold_refs_inner(field.value_type(), visited))
            }
        }
    }

    /// Default-constructs an instance of a class.
    #[must_use]
    pub fn construct(&self, class: DescriptorId) -> Option<Box<dyn Any + Send + Sync>> {
        self.try_get(class)?.as_class()?.construct()
    }

    /// Number of registered descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().descriptors.len()
    }

    /// Checks whether no descriptor has been created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().descriptors.is_empty()
    }

    fn is_complete(&self, id: DescriptorId) -> bool {
        self.try_get(id)
            .is_some_and(|descriptor| descriptor.as_class().map_or(true, ClassDescriptor::is_initialized))
    }

    fn insert(&self, type_id: TypeId, name: String, kind: TypeKind) -> DescriptorId {
        let mut inner = self.inner.write();
        if let Some(&id) = inner.by_type.get(&type_id) {
            return id;
        }

        #[allow(clippy::cast_possible_truncation)]
        let id = DescriptorId::new(inner.descriptors.len() as u32);
        let name_id = StringId::new(&name);
        trace!(type_name = %name, kind = kind.label(), id = id.index(), "Registered type");

        if let Some(existing) = inner.by_name.get(&name_id) {
            warn!(
                type_name = %name,
                existing = existing.index(),
                "Type name registered twice, name lookups keep the first"
            );
        } else {
            inner.by_name.insert(name_id, id);
        }
        inner.by_type.insert(type_id, id);
        inner.descriptors.push(Arc::new(TypeDescriptor {
            id,
            name,
            name_id,
            type_id,
            kind,
        }));
        id
    }

    fn initialize_class(&self, id: DescriptorId, body: ClassBody) {
        let base = body.base.as_ref().map(|base| base.class);
        let descriptor = self.get(id);
        let Some(class) = descriptor.as_class() else {
            return;
        };
        if !class.initialize(body) {
            warn!(class = descriptor.name(), "Class initialized twice");
            return;
        }
        if let Some(base) = base {
            self.inner.write().derived.entry(base).or_default().push(id);
        }
    }
}
