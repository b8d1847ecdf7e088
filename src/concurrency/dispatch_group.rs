//! Counting join primitive shared by every lane of a context group.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::error;

/// Tracks outstanding work across one or more lanes.
///
/// Every unit of work holds a [`GroupToken`] from before it becomes eligible to run
/// until it has completed. Waiters block on a condition variable until the count
/// drops to zero, so no polling is involved.
#[derive(Clone, Default)]
pub struct DispatchGroup {
    inner: Arc<GroupInner>,
}

#[derive(Default)]
struct GroupInner {
    count: Mutex<usize>,
    idle: Condvar,
}

/// Proof of one `enter`; dropping it performs the matching `leave`.
#[must_use = "dropping the token immediately leaves the group"]
pub struct GroupToken {
    inner: Arc<GroupInner>,
}

impl DispatchGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one outstanding unit of work.
    pub fn enter(&self) -> GroupToken {
        *self.inner.count.lock() += 1;
        GroupToken {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Number of units entered but not yet left.
    pub fn outstanding(&self) -> usize {
        *self.inner.count.lock()
    }

    /// Block until the count reaches zero or `timeout` elapses.
    ///
    /// Returns `true` when the group became idle.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.inner.count.lock();
        while *count > 0 {
            if self.inner.idle.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}

impl GroupInner {
    fn leave(&self) {
        let mut count = self.count.lock();
        match count.checked_sub(1) {
            Some(remaining) => {
                *count = remaining;
                if remaining == 0 {
                    self.idle.notify_all();
                }
            }
            None => error!("dispatch group left more times than entered"),
        }
    }
}

impl Drop for GroupToken {
    fn drop(&mut self) {
        self.inner.leave();
    }
}

impl std::fmt::Debug for DispatchGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchGroup")
            .field("outstanding", &self.outstanding())
            .finish()
    }
}
