//! # Object Runtime Error Types
//!
//! Errors returned by the object runtime. Contract violations (wrong thread, double free,
//! editing an unowned prefab component) are asserted instead and never show up here.

use oroboros_reflect::{ArchiveError, ObjectId};
use thiserror::Error;

/// Errors that can occur while creating, editing or loading objects.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObjectsError {
    /// The class was never registered with the runtime.
    #[error("class not registered: {0}")]
    ClassNotRegistered(String),

    /// A class name id in a stream does not resolve to a registered class.
    #[error("unknown class id {0:#018x}")]
    UnknownClass(u64),

    /// Object names may not be empty or contain path separators.
    #[error("invalid object name: {0:?}")]
    InvalidName(String),

    /// Another live object already has this path.
    #[error("object path already taken: {0}")]
    NameTaken(String),

    /// The object is not (or no longer) in the database.
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// Moving an object under itself or one of its subobjects.
    #[error("object {object} cannot be placed under {outer}")]
    HierarchyCycle {
        /// Object being moved.
        object: ObjectId,
        /// Requested outer.
        outer: ObjectId,
    },

    /// Two objects were expected to share a class.
    #[error("class mismatch: expected {expected}, found {found}")]
    ClassMismatch {
        /// Class the operation needs.
        expected: String,
        /// Class that was provided.
        found: String,
    },

    /// The object is not a template.
    #[error("object {0} is not a template")]
    NotATemplate(ObjectId),

    /// The object is not a prefab.
    #[error("object {0} is not a prefab")]
    NotAPrefab(ObjectId),

    /// The component does not belong to the prefab or any of its parents.
    #[error("component {component} is not part of prefab {prefab}")]
    UnknownComponent {
        /// Prefab that was asked.
        prefab: ObjectId,
        /// Component that was passed.
        component: ObjectId,
    },

    /// Reading a stream failed past the point of recovery.
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
}

/// Result type for object runtime operations.
pub type ObjectsResult<T> = Result<T, ObjectsError>;
