//! Executive (ex)
//!
//! Higher-level services built on the kernel layer:
//!
//! - **Reader/Writer Locks**: shared/exclusive locking with a fairness policy
//! - **Work Queues**: FIFO work items run by a dedicated worker thread
//!
//! Neither depends on the other; both depend only on `ke` primitives.

pub mod rwlock;
pub mod worker;

// Re-exports for convenience
pub use rwlock::{
    create_read_write_lock, PreferReader, PreferWriter, ReadGuard, ReaderWriterLock, RwLockPolicy, WriteGuard,
};
pub use worker::{create_work_queue, create_work_queue_ex, WorkQueue, WorkQueueConfig, WorkerRoutine};
