//! Kernel Layer (ke)
//!
//! The kernel layer adapts the host's threads, mutexes and condition
//! variables to the kernel contract the rest of the crate is written
//! against:
//!
//! - **Ticks**: timeouts and periods in kernel ticks
//! - **Threads**: named kernel threads with a priority and stack budget
//! - **Interrupts**: simulated interrupt delivery honoring the global mask
//! - **Critical Sections**: interrupt masking and scheduler suspension
//! - **Dispatcher Objects**: KMUTEX, KSEMAPHORE
//! - **Deferred Execution**: the deferred call daemon, tasklets and timers
//!
//! # Contexts
//!
//! Code runs in one of two contexts:
//! - Thread context: may block on any object with a timeout
//! - Interrupt context: inside [`interrupt::raise`]; only the `*_from_isr`
//!   variants may be used, and they never block
//!
//! # Key Structures
//!
//! - `KThread`: kernel thread handle
//! - `KMutex`: standard or recursive mutex
//! - `DeferredCallService`: the daemon running tasklets and timer callbacks

// Port glue
pub mod tick;
pub mod pool;
pub mod thread;
pub(crate) mod wait;

// Interrupt and scheduler control
pub mod critical;
pub mod interrupt;

// Synchronization primitives
pub mod mutex;
pub mod semaphore;

// Deferred execution
pub mod dpc;
pub mod tasklet;
pub mod timer;

// Re-export key types
pub use thread::{ContextFlags, KThread, Priority};
pub use tick::{TickType, MAX_DELAY, NO_WAIT};
pub use pool::{ObjectType, PoolStatistics};

// Re-export synchronization types
pub use critical::{CriticalGuard, CriticalSection, InterruptMask, SchedulerGuard};
pub use mutex::{KMutex, LockGuard, MutexKind};
pub use semaphore::KSemaphore;

// Re-export deferred execution types
pub use dpc::{DaemonConfig, DeferredCallService, PendContext, PendedRoutine};
pub use tasklet::{Tasklet, TaskletRoutine};
pub use timer::{Timer, TimerCallback};
