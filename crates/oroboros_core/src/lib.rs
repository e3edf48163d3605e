//! # OROBOROS Core Engine
//!
//! The engine object runtime: a type-erased heap of reflected objects addressed by stable
//! handles, organized in a named ownership tree, copied and serialized through their
//! reflection descriptors, and specialized through templates and prefab overrides.
//!
//! ## Architecture Rules
//!
//! 1. **Handles, not pointers** - objects are reached through [`ObjectId`] and resolved per access
//! 2. **One mutating thread** - every mutation needs a [`MutationPermit`]; reads work anywhere
//! 3. **No per-class serialization** - copying and saving walk the reflection descriptors
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use oroboros_core::{save_snapshot, CoreObjects};
//! use oroboros_reflect::TypeRegistry;
//!
//! let objects = CoreObjects::new(Arc::new(TypeRegistry::new()));
//! let permit = objects.mutation_permit();
//! objects.register_class::<Lamp>(&permit);
//! let lamp = objects.create::<Lamp>(&permit, "Lamp", None)?;
//! let bytes = save_snapshot(&objects, lamp)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod memory;
pub mod object;
pub mod serialization;
pub mod template;

#[cfg(test)]
mod test_classes;

pub use config::{ConfigError, DatabaseConfig, GcConfig, RuntimeConfig, SerializationConfig};
pub use error::{ObjectsError, ObjectsResult};
pub use memory::{AllocIdx, ObjectHandle, ObjectHeap, SlotAllocator};
pub use object::{
    copy_object, deep_copy, duplicate_object, find_object_references, replace_object_references,
    CopyObjectOptions, CoreObjects, DuplicateOptions, GcPhase, GcStats, GcStatus, HandleState,
    MutationPermit, ObjectClass, ObjectFlags, ObjectRecord, ObjectReference, ObjectsDb,
    TraversalMode,
};
pub use oroboros_reflect::ObjectId;
pub use serialization::{
    load_snapshot, load_snapshot_with, save_snapshot, PathRefCodec, SnapshotLoad,
};
pub use template::{ComponentOverride, ObjectTemplate, Prefab, TemplateLoad};
