//! # Object Heap
//!
//! Storage of every engine object, one [`SlotAllocator`] per registered class. Objects are
//! addressed by [`ObjectHandle`]: the class descriptor plus the slot handle inside that class's
//! allocator.

use std::any::Any;
use std::collections::HashMap;

use oroboros_reflect::{DescriptorId, Reflected, TypeRegistry};

use super::slot_allocator::{AllocIdx, SlotAllocator};

/// Stable handle of a heap object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHandle {
    /// Class of the object.
    pub class: DescriptorId,
    /// Slot inside the class allocator.
    pub alloc: AllocIdx,
}

/// Type-erased view of a [`SlotAllocator`].
pub trait ObjectAllocator: Send + Sync {
    /// Allocates a default-constructed value.
    fn allocate_default(&mut self) -> AllocIdx;
    /// Frees a value. Returns false if the slot was not live.
    fn free(&mut self, idx: AllocIdx) -> bool;
    /// Checks whether a slot is live.
    fn is_valid(&self, idx: AllocIdx) -> bool;
    /// Borrows a live value.
    fn get(&self, idx: AllocIdx) -> Option<&dyn Any>;
    /// Mutably borrows a live value.
    fn get_mut(&mut self, idx: AllocIdx) -> Option<&mut dyn Any>;
    /// Moves a value out, leaving a default value in its slot.
    fn take(&mut self, idx: AllocIdx) -> Option<Box<dyn Any + Send + Sync>>;
    /// Puts a value taken with [`ObjectAllocator::take`] back. Returns false on mismatch.
    fn restore(&mut self, idx: AllocIdx, value: Box<dyn Any + Send + Sync>) -> bool;
    /// Number of live values.
    fn live_count(&self) -> usize;
    /// Number of pools holding storage.
    fn pool_count(&self) -> usize;
}

impl<T: Any + Send + Sync + Default> ObjectAllocator for SlotAllocator<T> {
    fn allocate_default(&mut self) -> AllocIdx {
        self.allocate(T::default())
    }

    fn free(&mut self, idx: AllocIdx) -> bool {
        SlotAllocator::free(self, idx).is_some()
    }

    fn is_valid(&self, idx: AllocIdx) -> bool {
        SlotAllocator::is_valid(self, idx)
    }

    fn get(&self, idx: AllocIdx) -> Option<&dyn Any> {
        SlotAllocator::get(self, idx).map(|value| value as &dyn Any)
    }

    fn get_mut(&mut self, idx: AllocIdx) -> Option<&mut dyn Any> {
        SlotAllocator::get_mut(self, idx).map(|value| value as &mut dyn Any)
    }

    fn take(&mut self, idx: AllocIdx) -> Option<Box<dyn Any + Send + Sync>> {
        let slot = SlotAllocator::get_mut(self, idx)?;
        Some(Box::new(std::mem::take(slot)))
    }

    fn restore(&mut self, idx: AllocIdx, value: Box<dyn Any + Send + Sync>) -> bool {
        match (SlotAllocator::get_mut(self, idx), value.downcast::<T>()) {
            (Some(slot), Ok(value)) => {
                *slot = *value;
                true
            }
            _ => false,
        }
    }

    fn live_count(&self) -> usize {
        self.len()
    }

    fn pool_count(&self) -> usize {
        SlotAllocator::pool_count(self)
    }
}

/// Allocators of every registered class.
#[derive(Default)]
pub struct ObjectHeap {
    allocators: HashMap<DescriptorId, Box<dyn ObjectAllocator>>,
}

impl ObjectHeap {
    /// Creates an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an allocator for `T`. Registering a class twice keeps the first allocator.
    pub fn register<T: Reflected>(&mut self, registry: &TypeRegistry) -> DescriptorId {
        let class = registry.descriptor_of::<T>();
        self.allocators
            .entry(class)
            .or_insert_with(|| Box::new(SlotAllocator::<T>::new()) as Box<dyn ObjectAllocator>);
        class
    }

    /// Checks whether a class has an allocator.
    #[must_use]
    pub fn is_registered(&self, class: DescriptorId) -> bool {
        self.allocators.contains_key(&class)
    }

    /// Allocates a default instance of `class`.
    pub fn allocate(&mut self, class: DescriptorId) -> Option<ObjectHandle> {
        let alloc = self.allocators.get_mut(&class)?.allocate_default();
        Some(ObjectHandle { class, alloc })
    }

    /// Frees an object's storage.
    pub fn free(&mut self, handle: ObjectHandle) -> bool {
        self.allocators
            .get_mut(&handle.class)
            .is_some_and(|allocator| allocator.free(handle.alloc))
    }

    /// Checks whether a handle refers to live storage.
    #[must_use]
    pub fn is_valid(&self, handle: ObjectHandle) -> bool {
        self.allocators
            .get(&handle.class)
            .is_some_and(|allocator| allocator.is_valid(handle.alloc))
    }

    /// Borrows an object.
    #[must_use]
    pub fn get(&self, handle: ObjectHandle) -> Option<&dyn Any> {
        self.allocators.get(&handle.class)?.get(handle.alloc)
    }

    /// Mutably borrows an object.
    pub fn get_mut(&mut self, handle: ObjectHandle) -> Option<&mut dyn Any> {
        self.allocators.get_mut(&handle.class)?.get_mut(handle.alloc)
    }

    /// Moves an object's value out, leaving a default value in place.
    pub fn take(&mut self, handle: ObjectHandle) -> Option<Box<dyn Any + Send + Sync>> {
        self.allocators.get_mut(&handle.class)?.take(handle.alloc)
    }

    /// Puts back a value taken with [`ObjectHeap::take`].
    pub fn restore(&mut self, handle: ObjectHandle, value: Box<dyn Any + Send + Sync>) -> bool {
        self.allocators
            .get_mut(&handle.class)
            .is_some_and(|allocator| allocator.restore(handle.alloc, value))
    }

    /// Allocator of a class.
    #[must_use]
    pub fn allocator(&self, class: DescriptorId) -> Option<&dyn ObjectAllocator> {
        self.allocators.get(&class).map(|allocator| &**allocator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Debug, PartialEq)]
    struct Crate {
        weight: u32,
    }

    oroboros_reflect::reflect_class!(Crate { weight: u32 });

    #[test]
    fn test_heap_take_restore() {
        let registry = TypeRegistry::new();
        let mut heap = ObjectHeap::new();
        let class = heap.register::<Crate>(&registry);

        let handle = heap.allocate(class).unwrap();
        heap.get_mut(handle)
            .and_then(|value| value.downcast_mut::<Crate>())
            .unwrap()
            .weight = 12;

        let taken = heap.take(handle).unwrap();
        assert_eq!(
            heap.get(handle).and_then(|value| value.downcast_ref::<Crate>()),
            Some(&Crate::default())
        );
        assert!(heap.restore(handle, taken));
        assert_eq!(
            heap.get(handle).and_then(|value| value.downcast_ref::<Crate>()),
            Some(&Crate { weight: 12 })
        );

        assert!(heap.free(handle));
        assert!(!heap.is_valid(handle));
        assert_eq!(heap.allocator(class).map(|allocator| allocator.live_count()), Some(0));
    }
}
