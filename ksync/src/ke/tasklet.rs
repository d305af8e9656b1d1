//! Tasklets
//!
//! A tasklet is a one-shot deferred invocation of a user routine on the
//! deferred call service's daemon thread. Interrupt handlers use it to push
//! the slow half of their work out of interrupt context.
//!
//! Each tasklet owns a binary delete lock:
//!
//! - `schedule` takes it before posting, the daemon gives it back once the
//!   routine returns, so at most one invocation is in flight
//! - dropping the tasklet takes it, so no invocation runs after drop
//!
//! # Usage
//! ```
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use ksync::Tasklet;
//! use ksync::ke::tick::MAX_DELAY;
//!
//! struct Rx {
//!     frames: AtomicU32,
//! }
//!
//! impl ksync::ke::tasklet::TaskletRoutine for Rx {
//!     fn run(&self, parameter: u32) {
//!         self.frames.fetch_add(parameter, Ordering::SeqCst);
//!     }
//! }
//!
//! let tasklet = Tasklet::new(Rx { frames: AtomicU32::new(0) }).unwrap();
//! assert!(tasklet.schedule(3, MAX_DELAY));
//! drop(tasklet); // waits for the invocation
//! ```

use std::sync::Arc;

use super::dpc::{self, DeferredCallService, PendContext};
use super::semaphore::KSemaphore;
use super::tick::{TickType, MAX_DELAY, NO_WAIT};
use crate::status::SyncResult;

/// Routine run by a tasklet
pub trait TaskletRoutine: Send + Sync + 'static {
    fn run(&self, parameter: u32);
}

impl<F> TaskletRoutine for F
where
    F: Fn(u32) + Send + Sync + 'static,
{
    fn run(&self, parameter: u32) {
        self(parameter)
    }
}

struct TaskletShared<T> {
    routine: T,
    /// Given while no invocation is pending
    delete_lock: KSemaphore,
}

/// Gives the delete lock back even if the routine panics
struct Completion<'a>(&'a KSemaphore);

impl Drop for Completion<'_> {
    fn drop(&mut self) {
        self.0.give();
    }
}

/// Daemon-side trampoline into the user routine
fn tasklet_adapter<T: TaskletRoutine>(context: &PendContext, parameter: u32) {
    if let Some(shared) = context.downcast_ref::<TaskletShared<T>>() {
        let _done = Completion(&shared.delete_lock);
        shared.routine.run(parameter);
    }
}

/// One-shot deferred invocation
pub struct Tasklet<T: TaskletRoutine> {
    shared: Arc<TaskletShared<T>>,
    service: Arc<DeferredCallService>,
}

impl<T: TaskletRoutine> core::fmt::Debug for Tasklet<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tasklet")
            .field("pending", &(self.shared.delete_lock.count() == 0))
            .finish()
    }
}

impl<T: TaskletRoutine> Tasklet<T> {
    /// Create a tasklet on the system service
    ///
    /// # Errors
    /// `ResourceExhausted` if the delete lock or the system service cannot be
    /// created.
    pub fn new(routine: T) -> SyncResult<Self> {
        Self::with_service(dpc::system_service()?, routine)
    }

    /// Create a tasklet on a specific service
    pub fn with_service(service: Arc<DeferredCallService>, routine: T) -> SyncResult<Self> {
        let delete_lock = KSemaphore::new_binary()?;
        delete_lock.give();

        Ok(Self {
            shared: Arc::new(TaskletShared { routine, delete_lock }),
            service,
        })
    }

    /// The user routine
    #[inline]
    pub fn routine(&self) -> &T {
        &self.shared.routine
    }

    fn context(&self) -> PendContext {
        // Clones the concrete Arc, then coerces it
        let shared: Arc<TaskletShared<T>> = Arc::clone(&self.shared);
        shared
    }

    /// Schedule one invocation of the routine with `parameter`
    ///
    /// Waits for a previous invocation to finish, then waits up to `timeout`
    /// ticks for space in the daemon's queue.
    ///
    /// Returns true if the invocation was queued.
    pub fn schedule(&self, parameter: u32, timeout: TickType) -> bool {
        // The daemon cannot wait for its own queue to drain
        let wait = if self.service.on_daemon_thread() { NO_WAIT } else { MAX_DELAY };
        if !self.shared.delete_lock.take(wait) {
            return false;
        }

        let queued = self
            .service
            .pend_function_call(tasklet_adapter::<T>, self.context(), parameter, timeout);
        if !queued {
            self.shared.delete_lock.give();
        }
        queued
    }

    /// Schedule from interrupt context; never blocks
    ///
    /// Fails if an invocation is still in flight or the queue is full. Sets
    /// `woken` when the daemon was idle and will run next.
    pub fn schedule_from_isr(&self, parameter: u32, woken: &mut bool) -> bool {
        let mut unused = false;
        if !self.shared.delete_lock.take_from_isr(&mut unused) {
            return false;
        }

        let queued = self.service.pend_function_call_from_isr(
            tasklet_adapter::<T>,
            self.context(),
            parameter,
            woken,
        );
        if !queued {
            self.shared.delete_lock.give_from_isr(&mut unused);
        }
        queued
    }
}

impl<T: TaskletRoutine> Drop for Tasklet<T> {
    fn drop(&mut self) {
        // The routine outlives us through the pended context; this only
        // guarantees nothing runs once drop returns.
        let wait = if self.service.on_daemon_thread() { NO_WAIT } else { MAX_DELAY };
        if !self.shared.delete_lock.take(wait) {
            log::debug!("ksync: tasklet dropped with an invocation pending");
        }
    }
}
