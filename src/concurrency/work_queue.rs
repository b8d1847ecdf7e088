//! Serialized execution lane bound to a single context.
//!
//! Each lane is one OS thread draining a channel of boxed jobs, so units on the
//! same lane never overlap and run in submission order. Units on different lanes
//! run in parallel.

use crate::concurrency::dispatch_group::DispatchGroup;
use crate::error::HarnessError;
use crate::types::ContextRole;
use crossbeam_channel::{Sender, unbounded};
use parking_lot::Mutex;
use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Identity of the lane the current thread belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneTag {
    id: u64,
    role: ContextRole,
}

impl LaneTag {
    fn next(role: ContextRole) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self {
            id: COUNTER.fetch_add(1, Ordering::Relaxed),
            role,
        }
    }

    pub fn role(self) -> ContextRole {
        self.role
    }
}

thread_local! {
    static CURRENT_LANE: Cell<Option<LaneTag>> = const { Cell::new(None) };
}

/// A serialized lane whose units are tracked by a shared [`DispatchGroup`].
pub struct WorkQueue {
    tag: LaneTag,
    sender: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    group: DispatchGroup,
    pending: Arc<AtomicUsize>,
    failures: Arc<Mutex<Vec<String>>>,
}

impl WorkQueue {
    /// Spawn a fresh lane for `role`.
    pub fn new(role: ContextRole, group: DispatchGroup) -> Result<Self, HarnessError> {
        let tag = LaneTag::next(role);
        let (sender, receiver) = unbounded::<Job>();
        let worker = thread::Builder::new()
            .name(format!("lane-{}-{}", role, tag.id))
            .spawn(move || {
                CURRENT_LANE.with(|current| current.set(Some(tag)));
                for job in receiver.iter() {
                    job();
                }
            })
            .map_err(|source| HarnessError::Lane { role, source })?;

        debug!(role = %role, lane = tag.id, "lane started");
        Ok(Self {
            tag,
            sender: Some(sender),
            worker: Some(worker),
            group,
            pending: Arc::new(AtomicUsize::new(0)),
            failures: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Lane of the calling thread, if it is a lane at all.
    pub fn current() -> Option<LaneTag> {
        CURRENT_LANE.with(|current| current.get())
    }

    pub fn role(&self) -> ContextRole {
        self.tag.role
    }

    /// Whether the calling thread is this lane's worker.
    pub fn is_current(&self) -> bool {
        Self::current() == Some(self.tag)
    }

    /// Units submitted to this lane that have not completed yet.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Remove and return the panic messages recorded since the last call.
    pub fn take_failures(&self) -> Vec<String> {
        std::mem::take(&mut *self.failures.lock())
    }

    /// Enqueue `unit` without waiting for it.
    ///
    /// The shared group is entered before the unit becomes eligible to run and left
    /// once after it finishes, whether it returned or panicked.
    pub fn submit<F>(&self, unit: F) -> Result<(), HarnessError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(Box::new(unit), None, "submit")
    }

    /// Run `unit` on this lane and block until it returns its value.
    ///
    /// Runs inline when called from this lane. A panic inside `unit` is re-raised on
    /// the caller. The caller is released only after the lane has finished its
    /// bookkeeping for the unit.
    pub fn submit_and_wait<F, R>(&self, unit: F) -> Result<R, HarnessError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return Ok(unit());
        }

        let slot = Arc::new(Mutex::new(None));
        let unit_slot = Arc::clone(&slot);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        self.enqueue(
            Box::new(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(unit));
                *unit_slot.lock() = Some(outcome);
            }),
            Some(Box::new(move || {
                let _ = done_tx.send(());
            })),
            "submit_and_wait",
        )?;

        let stopped = || HarnessError::ProtocolViolation {
            role: self.tag.role,
            operation: "submit_and_wait".to_string(),
            detail: "lane stopped before the unit replied".to_string(),
        };
        done_rx.recv().map_err(|_| stopped())?;
        let outcome = slot.lock().take();
        match outcome {
            Some(Ok(value)) => Ok(value),
            Some(Err(payload)) => panic::resume_unwind(payload),
            None => Err(stopped()),
        }
    }

    fn enqueue(&self, unit: Job, on_complete: Option<Job>, operation: &str) -> Result<(), HarnessError> {
        let token = self.group.enter();
        self.pending.fetch_add(1, Ordering::SeqCst);

        let role = self.tag.role;
        let pending = Arc::clone(&self.pending);
        let failures = Arc::clone(&self.failures);
        let job: Job = Box::new(move || {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(unit)) {
                let message = panic_message(payload.as_ref());
                error!(role = %role, message = %message, "unit panicked on lane");
                failures.lock().push(message);
            }
            pending.fetch_sub(1, Ordering::SeqCst);
            drop(token);
            if let Some(on_complete) = on_complete {
                on_complete();
            }
        });

        let sent = match &self.sender {
            Some(sender) => sender.send(job).is_ok(),
            None => false,
        };
        if !sent {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(HarnessError::ProtocolViolation {
                role,
                operation: operation.to_string(),
                detail: "lane has already shut down".to_string(),
            });
        }
        Ok(())
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        // A unit dropping the last handle to its own lane is still counted as pending.
        let pending = self.pending().saturating_sub(usize::from(self.is_current()));
        if pending > 0 {
            error!(
                role = %self.tag.role,
                pending,
                "lane destroyed with outstanding work"
            );
            if cfg!(debug_assertions) && !thread::panicking() {
                panic!(
                    "{} lane destroyed with {} unit(s) outstanding; drain before releasing contexts",
                    self.tag.role, pending
                );
            }
        }

        // Closing the channel lets the worker finish its backlog and exit.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if self.is_current() {
                return;
            }
            if worker.join().is_err() {
                error!(role = %self.tag.role, "lane worker exited abnormally");
            }
        }
        debug!(role = %self.tag.role, lane = self.tag.id, "lane stopped");
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
