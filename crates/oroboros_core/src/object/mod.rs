//! # Engine Objects
//!
//! Objects live in the [`ObjectHeap`](crate::memory::ObjectHeap), are named and parented by
//! the [`ObjectsDb`], and are reached through the [`CoreObjects`] facade.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────── CoreObjects ────────────────────────┐
//! │  TypeRegistry        ObjectsDb               ObjectHeap      │
//! │  (descriptors)       (path → record)         (class → slots) │
//! │        ▲                  │ handle                 ▲          │
//! │        └──── class ───────┴────────────────────────┘          │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod db;
pub mod flags;
mod gc;
pub mod helpers;
pub mod path;
mod permit;
mod runtime;

pub use db::{ObjectRecord, ObjectsDb};
pub use flags::ObjectFlags;
pub use gc::{GcPhase, GcStats, GcStatus};
pub use helpers::{
    copy_object, deep_copy, duplicate_object, find_object_references, gather_objects,
    replace_object_references, CopyObjectOptions, DuplicateOptions, ObjectReference,
    TraversalMode,
};
pub use permit::MutationPermit;
pub use runtime::{CoreObjects, HandleState, ObjectClass};
