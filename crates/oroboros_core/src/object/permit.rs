//! Main-thread mutation capability.

use std::marker::PhantomData;

/// Proof that the caller runs on the thread owning an object runtime.
///
/// Obtained from [`CoreObjects::mutation_permit`](crate::CoreObjects::mutation_permit). The
/// permit is neither `Send` nor `Sync`, so it can never reach another thread; every mutating
/// operation of the runtime takes one.
#[derive(Debug)]
pub struct MutationPermit {
    runtime: u64,
    _not_send: PhantomData<*const ()>,
}

impl MutationPermit {
    pub(crate) const fn new(runtime: u64) -> Self {
        Self {
            runtime,
            _not_send: PhantomData,
        }
    }

    /// Identity of the runtime that issued this permit.
    #[inline]
    pub(crate) const fn runtime(&self) -> u64 {
        self.runtime
    }
}
