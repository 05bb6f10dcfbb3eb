//! A fixed pool of reusable resources behind a fair admission gate.
//!
//! The gate (a [`FairSemaphore`]) bounds how many holders there can be at
//! once; a per-slot compare-and-swap turns "admitted" into "owns this
//! specific resource". Unrelated slots are claimed and released without
//! contention, and the permit count and the free flags can never drift
//! apart: a flag flips free strictly before its permit goes back.

use std::hint;
use std::ptr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use failure::Fail;

use semaphore::FairSemaphore;
use semaphore::Interrupted;
use semaphore::InterruptFlag;

/// A `release` call that broke the contract; pool state is never altered
/// by one, and no permit is credited for it.
#[derive(Debug, PartialEq, Fail)]
pub enum PoolError {
    /// The resource is not managed by this pool.
    #[fail(display = "resource does not belong to this pool")]
    ForeignResource,
    /// The resource was not held at the time of the release.
    #[fail(display = "resource released twice, or never acquired")]
    AlreadyFree,
}

struct Slot<R> {
    resource: R,
    free: AtomicBool,
}

pub struct ResourcePool<R> {
    slots: Vec<Slot<R>>,
    gate: FairSemaphore,
}

impl<R> ResourcePool<R> {
    /// Build a pool over a fixed set of resources.
    ///
    /// Capacity equals `resources.len()` and never changes. Panics on an
    /// empty set, which could admit nobody.
    pub fn new(resources: Vec<R>) -> ResourcePool<R> {
        assert!(!resources.is_empty(), "a pool needs at least one resource");
        let slots: Vec<Slot<R>> = resources
            .into_iter()
            .map(|resource| Slot {
                resource,
                free: AtomicBool::new(true),
            })
            .collect();
        let gate = FairSemaphore::new(slots.len());
        ResourcePool { slots, gate }
    }

    /// Block until a resource is free, then claim it. Deaf to interruption.
    pub fn acquire(&self) -> &R {
        self.gate.acquire_uninterruptibly();
        self.claim()
    }

    /// Like [`acquire`](ResourcePool::acquire), but gives up if `interrupt`
    /// is raised while blocked. Nothing is claimed on failure.
    pub fn acquire_interruptibly(&self, interrupt: &InterruptFlag) -> Result<&R, Interrupted> {
        self.gate.acquire(interrupt)?;
        Ok(self.claim())
    }

    fn claim(&self) -> &R {
        // Holding a permit means at least one slot is free, but a slot freed
        // behind the scan cursor can be missed on a single pass; rescan.
        loop {
            for (idx, slot) in self.slots.iter().enumerate() {
                if slot
                    .free
                    .compare_exchange(true, false, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    debug!("claimed slot {}", idx);
                    return &slot.resource;
                }
            }
            hint::spin_loop();
        }
    }

    /// Hand `resource` back and wake the longest-waiting caller.
    ///
    /// The free flag flips before the permit returns, so whoever the
    /// release admits is guaranteed to find a free slot. An invalid
    /// release is reported and otherwise ignored, so unconditional
    /// cleanup paths may discard the result.
    pub fn release(&self, resource: &R) -> Result<(), PoolError> {
        let (idx, slot) = match self
            .slots
            .iter()
            .enumerate()
            .find(|&(_, slot)| ptr::eq(&slot.resource, resource))
        {
            Some(found) => found,
            None => {
                warn!("release of a resource this pool does not own");
                return Err(PoolError::ForeignResource);
            }
        };

        if slot
            .free
            .compare_exchange(false, true, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            warn!("slot {} released while already free", idx);
            return Err(PoolError::AlreadyFree);
        }

        debug!("released slot {}", idx);
        self.gate.release();
        Ok(())
    }

    /// Acquire, run `f`, release. The release happens even if `f` panics,
    /// so a paired release can never be forgotten.
    pub fn with<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&R) -> T,
    {
        let lease = Lease {
            pool: self,
            resource: self.acquire(),
        };
        f(lease.resource)
    }

    /// Current permit count of the gate; diagnostic only.
    pub fn available_permits(&self) -> usize {
        self.gate.available_permits()
    }

    /// Number of callers currently blocked at the gate; diagnostic only.
    pub fn waiting(&self) -> usize {
        self.gate.waiting()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

struct Lease<'p, R: 'p> {
    pool: &'p ResourcePool<R>,
    resource: &'p R,
}

impl<'p, R: 'p> Drop for Lease<'p, R> {
    fn drop(&mut self) {
        if let Err(e) = self.pool.release(self.resource) {
            // claim handed us this resource, so this can't happen unless
            // the closure released it behind our back
            warn!("lease release failed: {}", e);
        }
    }
}
