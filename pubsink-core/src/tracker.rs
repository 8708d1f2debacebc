//! Counts publishes that were dispatched but have not completed yet.
//!
//! The count lives under the sink's lock together with the rest of its state. Waiting for
//! it to reach zero goes through [`wait_until_zero`], which parks on a [`Condvar`] tied to
//! that same lock. Every decrement must be followed by a notify on that condvar.

use parking_lot::{Condvar, MutexGuard};
use tracing::error;

#[derive(Debug, Default)]
pub(crate) struct OutstandingTracker {
    count: usize,
}

impl OutstandingTracker {
    pub(crate) fn increment(&mut self) {
        self.count += 1;
    }

    pub(crate) fn decrement(&mut self) {
        match self.count.checked_sub(1) {
            Some(count) => self.count = count,
            None => error!("Outstanding publish count decremented below zero"),
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.count
    }

    pub(crate) fn is_zero(&self) -> bool {
        self.count == 0
    }
}

/// Blocks until the tracker selected by `tracker` reads zero.
///
/// The lock is released while parked. Wakeups may be spurious or coalesce several
/// decrements, so the count is re-read after every one of them.
pub(crate) fn wait_until_zero<T, F>(guard: &mut MutexGuard<'_, T>, idle: &Condvar, tracker: F)
where
    F: Fn(&T) -> &OutstandingTracker,
{
    while !tracker(&**guard).is_zero() {
        idle.wait(guard);
    }
}
