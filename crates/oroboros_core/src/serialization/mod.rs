//! # Serialization
//!
//! Whole-tree snapshots on top of the reflected field streams.

mod snapshot;

pub use snapshot::{
    load_snapshot, load_snapshot_with, save_snapshot, PathRefCodec, SnapshotLoad,
    OBJECT_SNAPSHOT_MIN_VERSION, OBJECT_SNAPSHOT_VERSION, OBJECT_SNAPSHOT_VERSION_TAG,
};
