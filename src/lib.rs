//! A bounded pool of interchangeable, reusable resources with
//! first-come-first-served admission.
//!
//! Two pieces: [`FairSemaphore`], a counting semaphore whose blocked
//! callers are admitted strictly in arrival order, and [`ResourcePool`],
//! which sizes a semaphore to a fixed set of resources and turns each
//! admission into exclusive ownership of one specific resource.
//!
//! ```
//! use fairpool::ResourcePool;
//!
//! let pool = ResourcePool::new(vec!["alpha", "beta"]);
//! let held = pool.acquire();
//! assert_eq!(1, pool.available_permits());
//! pool.release(held).unwrap();
//! assert_eq!(2, pool.available_permits());
//! ```
//!
//! Cancellation is cooperative: hand an [`InterruptFlag`] to
//! [`ResourcePool::acquire_interruptibly`] (or
//! [`FairSemaphore::acquire`]) and raise it from anywhere to pull a
//! blocked caller out of the queue with nothing consumed.

extern crate failure;
#[macro_use]
extern crate log;
extern crate parking_lot;

mod pool;
mod semaphore;

pub use pool::PoolError;
pub use pool::ResourcePool;
pub use semaphore::FairSemaphore;
pub use semaphore::Interrupted;
pub use semaphore::InterruptFlag;

/// Hooks a task layer hands to its worker loop so a UI (or a test) can
/// watch a worker move through the admission states.
///
/// The pool itself never calls these; they are the vocabulary between a
/// consumer loop and whoever is watching it. All hooks default to no-ops.
pub trait WaitObserver {
    /// The worker is about to block waiting for a resource.
    fn on_blocked(&self) {}
    /// The worker obtained a resource.
    fn on_acquired(&self) {}
    /// The worker observed a cancellation signal and will stop acquiring.
    fn on_cancelled(&self) {}
}
