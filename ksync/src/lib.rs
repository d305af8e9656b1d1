//! ksync: Kernel Synchronization and Deferred Execution
//!
//! Coordination primitives for threads and interrupt handlers on a
//! preemptive, priority-based kernel.
//!
//! # Architecture Overview
//!
//! The crate follows a two-layer split:
//!
//! - **ke** - Kernel layer: ticks, threads, simulated interrupts, critical
//!   sections, mutexes, semaphores, and the deferred call daemon with its
//!   tasklets and timers
//! - **ex** - Executive: reader/writer locks and work queues built on top of
//!   the kernel layer
//!
//! Supporting modules:
//!
//! - **config** - Kernel-wide constants (tick rate, stack units, priorities)
//! - **status** - Error codes shared by every component
//!
//! # Deferred Execution
//!
//! Three flavors, from heaviest to lightest:
//!
//! - [`WorkQueue`]: a dedicated worker thread per queue, at a chosen priority
//! - [`Timer`]: one-shot or periodic callback on the shared daemon thread
//! - [`Tasklet`]: one-shot callback on the shared daemon thread, schedulable
//!   from interrupt context
//!
//! # Cargo Features
//!
//! - `thread-delete` (default): work queues can be destroyed
//! - `recursive-mutex` (default): [`KMutex::new_recursive`]

// Lint configurations:
// - new_without_default: kernel objects are created fallibly, not by Default
// - type_complexity: callback containers are necessarily nested
#![allow(clippy::new_without_default)]
#![allow(clippy::type_complexity)]

pub mod config;
pub mod status;

// Subsystem modules
pub mod ex;
pub mod ke;

// Re-export the everyday types
pub use status::{SyncError, SyncResult};
pub use ke::{
    CriticalGuard, CriticalSection, DeferredCallService, KMutex, KSemaphore, LockGuard, SchedulerGuard, Tasklet,
    Timer,
};
pub use ex::{create_read_write_lock, create_work_queue, create_work_queue_ex, ReaderWriterLock, RwLockPolicy, WorkQueue};
