//! Kernel Threads
//!
//! Thread creation with a name, a stack budget and a priority, plus the
//! per-thread kernel context every other primitive consults (are we in an
//! interrupt, inside a critical section, holding the scheduler suspended).
//!
//! The stack budget is given in stack words, as the kernel takes it, and is
//! turned into a host stack size. The priority is recorded on the thread so
//! kernel-created threads can report it; ordering between runnable threads
//! is the host scheduler's business.

use std::cell::Cell;
use std::thread::{self, JoinHandle, ThreadId};

use bitflags::bitflags;

use super::pool::{self, ObjectType};
use crate::config::{DEFAULT_PRIORITY, MAX_PRIORITIES, MIN_HOST_STACK_BYTES, STACK_WORD_SIZE};
use crate::status::{SyncError, SyncResult};

/// Thread priority (0 = idle)
pub type Priority = u32;

bitflags! {
    /// Kernel execution context of the current thread
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ContextFlags: u32 {
        /// Running an interrupt service routine
        const INTERRUPT = 0x0000_0001;
        /// Inside a critical section (interrupts masked)
        const CRITICAL = 0x0000_0002;
        /// Holding the scheduler suspended
        const SCHEDULER_SUSPENDED = 0x0000_0004;
        /// Thread was created by the kernel (worker or daemon)
        const KERNEL_THREAD = 0x0000_0008;
    }
}

thread_local! {
    static CONTEXT: Cell<ContextFlags> = const { Cell::new(ContextFlags::empty()) };
    static PRIORITY: Cell<Priority> = const { Cell::new(DEFAULT_PRIORITY) };
}

/// Context flags of the calling thread
#[inline]
pub fn current_context() -> ContextFlags {
    CONTEXT.with(Cell::get)
}

/// Check if the caller is running in interrupt context
#[inline]
pub fn in_interrupt() -> bool {
    current_context().contains(ContextFlags::INTERRUPT)
}

/// Set or clear context flags, returning the previous set
pub(crate) fn set_context(flags: ContextFlags, on: bool) -> ContextFlags {
    CONTEXT.with(|context| {
        let previous = context.get();
        let mut next = previous;
        next.set(flags, on);
        context.set(next);
        previous
    })
}

/// Restore a context captured by `set_context`
pub(crate) fn restore_context(flags: ContextFlags) {
    CONTEXT.with(|context| context.set(flags));
}

/// Priority of the calling thread
#[inline]
pub fn current_priority() -> Priority {
    PRIORITY.with(Cell::get)
}

/// Identity of the calling thread
#[inline]
pub fn current_id() -> ThreadId {
    thread::current().id()
}

/// Host stack size for a budget in stack words
pub fn stack_bytes(stack_budget: usize) -> usize {
    stack_budget
        .saturating_mul(STACK_WORD_SIZE)
        .max(MIN_HOST_STACK_BYTES)
}

/// Kernel thread handle
///
/// Dropping the handle detaches the thread; it keeps running.
#[derive(Debug)]
pub struct KThread {
    handle: JoinHandle<()>,
    id: ThreadId,
    name: String,
    priority: Priority,
}

impl KThread {
    /// Create and start a thread
    ///
    /// # Arguments
    /// * `name` - Thread name (shows up in host debuggers and panics)
    /// * `stack_budget` - Stack size in stack words
    /// * `priority` - Priority, clamped to `MAX_PRIORITIES - 1`
    /// * `entry` - Thread body
    ///
    /// # Errors
    /// `ResourceExhausted(Thread)` if the thread quota is reached or the host
    /// refuses to create the thread.
    pub fn spawn<F>(name: &str, stack_budget: usize, priority: Priority, entry: F) -> SyncResult<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        debug_assert!(priority < MAX_PRIORITIES, "priority {} out of range", priority);
        let priority = priority.min(MAX_PRIORITIES - 1);

        // Held by the thread itself so a detached thread keeps its charge
        let charge = pool::charge(ObjectType::Thread)?;

        let builder = thread::Builder::new()
            .name(name.to_string())
            .stack_size(stack_bytes(stack_budget));

        let handle = builder
            .spawn(move || {
                let _charge = charge;
                PRIORITY.with(|p| p.set(priority));
                set_context(ContextFlags::KERNEL_THREAD, true);
                entry();
            })
            .map_err(|err| {
                log::warn!("ksync: cannot create thread '{}': {}", name, err);
                SyncError::ResourceExhausted(ObjectType::Thread)
            })?;

        log::debug!(
            "ksync: thread '{}' created (priority {}, {} words)",
            name,
            priority,
            stack_budget
        );

        Ok(Self {
            id: handle.thread().id(),
            handle,
            name: name.to_string(),
            priority,
        })
    }

    #[inline]
    pub fn id(&self) -> ThreadId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Check if the thread body has returned
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the thread to exit
    ///
    /// Returns false if the thread body panicked.
    pub fn join(self) -> bool {
        debug_assert!(self.id != current_id(), "thread cannot join itself");
        self.handle.join().is_ok()
    }
}
