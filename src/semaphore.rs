//! A counting semaphore with first-come-first-served admission.
//!
//! Waiters take numbered tickets under the lock and are admitted strictly
//! in ticket order, so a release always benefits the longest-waiting
//! caller. A bare atomic counter with optimistic retries cannot give that
//! guarantee; the queueing discipline has to live with the lock.

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use failure::Fail;
use parking_lot::Condvar;
use parking_lot::Mutex;

/// The caller was cancelled before it could take a permit.
#[derive(Debug, Fail)]
#[fail(display = "interrupted while waiting for a permit")]
pub struct Interrupted;

struct State {
    permits: usize,
    queue: VecDeque<u64>,
    next_ticket: u64,
}

struct Shared {
    state: Mutex<State>,
    available: Condvar,
}

pub struct FairSemaphore {
    shared: Arc<Shared>,
}

impl FairSemaphore {
    pub fn new(permits: usize) -> FairSemaphore {
        FairSemaphore {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    permits,
                    queue: VecDeque::new(),
                    next_ticket: 0,
                }),
                available: Condvar::new(),
            }),
        }
    }

    /// Block until a permit is free, then take it.
    ///
    /// If `interrupt` is raised before we are admitted, gives up the place
    /// in line and returns without having consumed anything.
    pub fn acquire(&self, interrupt: &InterruptFlag) -> Result<(), Interrupted> {
        interrupt.watch(&self.shared);
        let admitted = self.wait_in_line(Some(interrupt));
        interrupt.unwatch(&self.shared);
        admitted
    }

    /// Block until a permit is free, then take it, deaf to interruption.
    ///
    /// A flag raised while we wait stays raised, so the pending signal is
    /// still there for the caller to check once this returns.
    pub fn acquire_uninterruptibly(&self) {
        // infallible without a flag
        let _ = self.wait_in_line(None);
    }

    fn wait_in_line(&self, interrupt: Option<&InterruptFlag>) -> Result<(), Interrupted> {
        let mut state = self.shared.state.lock();

        if interrupt.map_or(false, |flag| flag.is_raised()) {
            return Err(Interrupted);
        }

        // fast path: a free permit and nobody already in line
        if state.permits > 0 && state.queue.is_empty() {
            state.permits -= 1;
            return Ok(());
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.queue.push_back(ticket);
        trace!("ticket {} waiting, {} in line", ticket, state.queue.len());

        loop {
            if interrupt.map_or(false, |flag| flag.is_raised()) {
                if let Some(pos) = state.queue.iter().position(|&t| t == ticket) {
                    state.queue.remove(pos);
                }
                // we may have been the front; the next ticket must re-check
                self.shared.available.notify_all();
                trace!("ticket {} interrupted", ticket);
                return Err(Interrupted);
            }

            if state.permits > 0 && state.queue.front() == Some(&ticket) {
                state.queue.pop_front();
                state.permits -= 1;
                if state.permits > 0 && !state.queue.is_empty() {
                    // enough left over to admit the new front too
                    self.shared.available.notify_all();
                }
                trace!("ticket {} admitted", ticket);
                return Ok(());
            }

            self.shared.available.wait(&mut state);
        }
    }

    /// Put one permit back, waking the longest-waiting caller.
    ///
    /// Every waiter re-checks, but only the front ticket can proceed;
    /// anyone woken out of turn goes straight back to sleep.
    pub fn release(&self) {
        let mut state = self.shared.state.lock();
        state.permits += 1;
        self.shared.available.notify_all();
    }

    /// Current permit count; may be stale the instant it returns.
    pub fn available_permits(&self) -> usize {
        self.shared.state.lock().permits
    }

    /// Number of callers currently blocked; diagnostic only.
    pub fn waiting(&self) -> usize {
        self.shared.state.lock().queue.len()
    }
}

/// A sticky cancellation signal.
///
/// Raising the flag wakes any interruptible waiter registered against it.
/// The flag stays raised until [`clear`](InterruptFlag::clear) is called,
/// which is what lets an uninterruptible acquisition swallow the signal
/// without losing it.
pub struct InterruptFlag {
    raised: AtomicBool,
    watched: Mutex<Vec<Weak<Shared>>>,
}

impl InterruptFlag {
    pub fn new() -> InterruptFlag {
        InterruptFlag {
            raised: AtomicBool::new(false),
            watched: Mutex::new(Vec::new()),
        }
    }

    /// Set the flag and wake every waiter watching it.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
        let watched = self.watched.lock();
        for weak in watched.iter() {
            if let Some(shared) = weak.upgrade() {
                // taking the state lock means the waiter is either about to
                // check the flag, or parked and about to get the notify
                let _state = shared.state.lock();
                shared.available.notify_all();
            }
        }
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Acknowledge the signal.
    pub fn clear(&self) {
        self.raised.store(false, Ordering::SeqCst);
    }

    fn watch(&self, shared: &Arc<Shared>) {
        self.watched.lock().push(Arc::downgrade(shared));
    }

    fn unwatch(&self, shared: &Arc<Shared>) {
        let mut watched = self.watched.lock();
        if let Some(pos) = watched
            .iter()
            .position(|weak| weak.upgrade().map_or(false, |s| Arc::ptr_eq(&s, shared)))
        {
            watched.swap_remove(pos);
        }
    }
}

impl Default for InterruptFlag {
    fn default() -> InterruptFlag {
        InterruptFlag::new()
    }
}
