//! # Memory Management
//!
//! Slab storage for engine objects.
//!
//! ## Design Philosophy
//!
//! - Every object class owns one [`SlotAllocator`]
//! - Storage is addressed by handle, never by pointer
//! - Pools are released lazily, see the hysteresis rule in [`slot_allocator`]

mod heap;
pub mod slot_allocator;

pub use heap::{ObjectAllocator, ObjectHandle, ObjectHeap};
pub use slot_allocator::{AllocIdx, SlotAllocator, POOL_SLOT_COUNT};
