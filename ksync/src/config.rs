//! Kernel Configuration
//!
//! Compile-time constants describing the host kernel the coordination layer
//! runs on. These play the role of the kernel's configuration header: tick
//! rate, priority range, the minimal stack unit and the sizing of the shared
//! deferred-call (timer daemon) context.
//!
//! Runtime knobs live on builder structs instead:
//! - [`WorkQueueConfig`](crate::ex::worker::WorkQueueConfig) for work queues
//! - [`DaemonConfig`](crate::ke::dpc::DaemonConfig) for deferred-call services
//!
//! Cargo features:
//! - `thread-delete` (default): work queues can be destroyed
//! - `recursive-mutex` (default): recursive mutexes are available

use crate::ke::thread::Priority;

/// Tick interrupt frequency. One tick is one millisecond.
pub const TICK_RATE_HZ: u32 = 1000;

/// Number of thread priority levels (0 = idle, highest = MAX_PRIORITIES - 1)
pub const MAX_PRIORITIES: Priority = 32;

/// Priority of the idle thread
pub const IDLE_PRIORITY: Priority = 0;

/// Priority given to threads the kernel did not create
pub const DEFAULT_PRIORITY: Priority = IDLE_PRIORITY + 1;

/// Minimal stack budget, in stack words
pub const MINIMAL_STACK_SIZE: usize = 2048;

/// Size of one stack word in bytes
pub const STACK_WORD_SIZE: usize = core::mem::size_of::<usize>();

/// Floor applied to host thread stacks, in bytes.
///
/// Host threads run the formatting and unwinding machinery, which needs more
/// room than a bare kernel thread of the same budget.
pub const MIN_HOST_STACK_BYTES: usize = 64 * 1024;

/// Default work queue stack budget (2x the minimal stack unit)
pub const DEFAULT_WORK_QUEUE_STACK_SIZE: usize = MINIMAL_STACK_SIZE * 2;

/// Default work queue priority (just above idle)
pub const DEFAULT_WORK_QUEUE_PRIORITY: Priority = IDLE_PRIORITY + 1;

/// Default work queue name
pub const DEFAULT_WORK_QUEUE_NAME: &str = "WorkQueue";

/// Length of the deferred-call command queue
pub const TIMER_QUEUE_LENGTH: usize = 10;

/// Priority of the timer daemon thread
pub const TIMER_TASK_PRIORITY: Priority = MAX_PRIORITIES - 1;

/// Stack budget of the timer daemon thread, in stack words
pub const TIMER_TASK_STACK_DEPTH: usize = MINIMAL_STACK_SIZE * 2;

/// Name of the timer daemon thread
pub const TIMER_TASK_NAME: &str = "Tmr Svc";
