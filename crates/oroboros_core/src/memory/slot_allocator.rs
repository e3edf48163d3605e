//! # Slot Allocator
//!
//! Per-type slab allocator: a growable list of fixed-capacity pools, each with a 64-bit validity
//! word (one bit per slot).
//!
//! ## Pool reuse
//!
//! 1. The pool that served the last allocation is tried first.
//! 2. Otherwise pools are scanned in order; an existing pool with a free bit wins over
//!    re-creating a deleted one.
//! 3. Otherwise a new pool is appended.
//!
//! ## Empty pool hysteresis
//!
//! The first pool to become empty is kept and remembered. Only when a second pool also
//! empties are both deleted, so alternating add/remove at a pool boundary does not allocate and
//! free a whole pool every time.

use tracing::trace;

/// Number of slots per pool. Matches the width of a validity word.
pub const POOL_SLOT_COUNT: usize = 64;

const FULL_POOL: u64 = u64::MAX;

/// Handle of an allocated slot: `pool * POOL_SLOT_COUNT + slot`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct AllocIdx(u32);

impl AllocIdx {
    /// Builds a handle from its pool and slot.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(pool: usize, slot: usize) -> Self {
        Self((pool * POOL_SLOT_COUNT + slot) as u32)
    }

    /// Pool the slot belongs to.
    #[inline]
    #[must_use]
    pub const fn pool(self) -> usize {
        self.0 as usize / POOL_SLOT_COUNT
    }

    /// Slot inside its pool.
    #[inline]
    #[must_use]
    pub const fn slot(self) -> usize {
        self.0 as usize % POOL_SLOT_COUNT
    }

    /// Raw handle value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

struct SlotPool<T> {
    slots: Box<[Option<T>]>,
}

impl<T> SlotPool<T> {
    fn new() -> Self {
        Self {
            slots: (0..POOL_SLOT_COUNT).map(|_| None).collect(),
        }
    }

    /// Slot containing `address`, if it lies inside this pool.
    fn slot_of(&self, address: usize) -> Option<usize> {
        let stride = std::mem::size_of::<Option<T>>().max(1);
        let base = self.slots.as_ptr() as usize;
        let offset = address.checked_sub(base)?;
        let slot = offset / stride;
        (slot < POOL_SLOT_COUNT).then_some(slot)
    }
}

/// Slab allocator for values of one type.
///
/// # Thread Safety
///
/// Not synchronized. The object heap is only mutated by the thread holding the mutation permit.
pub struct SlotAllocator<T> {
    /// Pools; `None` marks a deleted pool whose index may be reused.
    pools: Vec<Option<SlotPool<T>>>,
    /// Validity word per pool.
    validity: Vec<u64>,
    /// Pool that served the last allocation.
    last_allocated: Option<usize>,
    /// Pool that emptied first and is kept around.
    empty_pool: Option<usize>,
    /// Number of live values.
    live: usize,
}

impl<T> Default for SlotAllocator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SlotAllocator<T> {
    /// Creates an allocator without pools.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pools: Vec::new(),
            validity: Vec::new(),
            last_allocated: None,
            empty_pool: None,
            live: 0,
        }
    }

    /// Number of live values.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.live
    }

    /// Checks whether no value is live.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of pools currently holding storage.
    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.pools.iter().filter(|pool| pool.is_some()).count()
    }

    /// Stores `value` in a free slot.
    pub fn allocate(&mut self, value: T) -> AllocIdx {
        let pool = self.find_pool();
        let word = self.validity[pool];
        let slot = (!word).trailing_zeros() as usize;

        self.validity[pool] = word | (1 << slot);
        if let Some(storage) = self.pools[pool].as_mut() {
            storage.slots[slot] = Some(value);
        }
        self.last_allocated = Some(pool);
        if self.empty_pool == Some(pool) {
            self.empty_pool = None;
        }
        self.live += 1;

        AllocIdx::new(pool, slot)
    }

    /// Picks the pool for the next allocation, creating it if needed.
    fn find_pool(&mut self) -> usize {
        if let Some(last) = self.last_allocated {
            if self.pools[last].is_some() && self.validity[last] != FULL_POOL {
                return last;
            }
        }

        let mut first_deleted = None;
        for (index, pool) in self.pools.iter().enumerate() {
            match pool {
                Some(_) if self.validity[index] != FULL_POOL => return index,
                None if first_deleted.is_none() => first_deleted = Some(index),
                _ => {}
            }
        }

        if let Some(index) = first_deleted {
            self.pools[index] = Some(SlotPool::new());
            self.validity[index] = 0;
            trace!(pool = index, "Recreated slot pool");
            return index;
        }

        self.pools.push(Some(SlotPool::new()));
        self.validity.push(0);
        trace!(pool = self.pools.len() - 1, "Added slot pool");
        self.pools.len() - 1
    }

    /// Frees a slot and returns its value.
    ///
    /// Freeing a slot twice is a programming error (asserted in debug builds).
    pub fn free(&mut self, idx: AllocIdx) -> Option<T> {
        let (pool, slot) = (idx.pool(), idx.slot());
        let bit = 1u64 << slot;
        let word = *self.validity.get(pool)?;
        if word & bit == 0 {
            debug_assert!(false, "slot {pool}:{slot} freed twice");
            return None;
        }

        let value = self.pools[pool].as_mut()?.slots[slot].take();
        self.validity[pool] = word & !bit;
        self.live -= 1;

        if self.validity[pool] == 0 {
            self.on_pool_empty(pool);
        }
        value
    }

    /// Frees the slot holding the value at `ptr`, resolving its pool by address.
    pub fn free_ptr(&mut self, ptr: *const T) -> Option<T> {
        let idx = self.index_of_address(ptr as usize)?;
        self.free(idx)
    }

    /// Handle of a value stored in this allocator.
    #[must_use]
    pub fn index_of(&self, value: &T) -> Option<AllocIdx> {
        self.index_of_address(value as *const T as usize)
    }

    fn index_of_address(&self, address: usize) -> Option<AllocIdx> {
        // Most lookups hit the pool that is currently being filled.
        if let Some(last) = self.last_allocated {
            if let Some(slot) = self.pools[last].as_ref().and_then(|pool| pool.slot_of(address)) {
                return Some(AllocIdx::new(last, slot));
            }
        }

        self.pools.iter().enumerate().find_map(|(index, pool)| {
            let slot = pool.as_ref()?.slot_of(address)?;
            Some(AllocIdx::new(index, slot))
        })
    }

    fn on_pool_empty(&mut self, pool: usize) {
        match self.empty_pool {
            Some(cached)
                if cached != pool
                    && self.validity[cached] == 0
                    && self.pools[cached].is_some() =>
            {
                self.pools[cached] = None;
                self.pools[pool] = None;
                self.empty_pool = None;
                if matches!(self.last_allocated, Some(last) if last == cached || last == pool) {
                    self.last_allocated = None;
                }
                trace!(first = cached, second = pool, "Released two empty slot pools");
            }
            _ => self.empty_pool = Some(pool),
        }
    }

    /// Checks whether `idx` refers to a live slot.
    #[inline]
    #[must_use]
    pub fn is_valid(&self, idx: AllocIdx) -> bool {
        self.validity
            .get(idx.pool())
            .is_some_and(|word| word & (1 << idx.slot()) != 0)
    }

    /// Borrows a live value.
    #[inline]
    #[must_use]
    pub fn get(&self, idx: AllocIdx) -> Option<&T> {
        self.pools.get(idx.pool())?.as_ref()?.slots[idx.slot()].as_ref()
    }

    /// Mutably borrows a live value.
    #[inline]
    pub fn get_mut(&mut self, idx: AllocIdx) -> Option<&mut T> {
        self.pools.get_mut(idx.pool())?.as_mut()?.slots[idx.slot()].as_mut()
    }

    /// Iterates over all live values.
    pub fn iter(&self) -> impl Iterator<Item = (AllocIdx, &T)> {
        self.pools
            .iter()
            .enumerate()
            .filter_map(|(pool, storage)| storage.as_ref().map(|storage| (pool, storage)))
            .flat_map(|(pool, storage)| {
                storage
                    .slots
                    .iter()
                    .enumerate()
                    .filter_map(move |(slot, value)| {
                        value.as_ref().map(|value| (AllocIdx::new(pool, slot), value))
                    })
            })
    }
}
