//! Executive Work Queues
//!
//! A work queue owns one dedicated worker thread and a FIFO of work items.
//! Callers queue items from any thread; the worker runs them one at a time
//! in the order they were queued, at the queue's priority.
//!
//! Queues are independent: each has its own thread, so work on a low
//! priority queue never holds up a high priority one, and there is no
//! ordering between items on different queues.
//!
//! # Defaults
//!
//! - Name: `"WorkQueue"`
//! - Stack: 2 x `MINIMAL_STACK_SIZE` words
//! - Priority: `IDLE_PRIORITY + 1`
//! - Unbounded
//!
//! # Usage
//! ```
//! use ksync::ex::worker::{create_work_queue_ex, WorkQueueConfig, WorkQueue};
//!
//! fn flush(context: usize) {
//!     // ... write back buffer `context` ...
//! }
//!
//! let queue = create_work_queue_ex("flusher", 4096, 3).unwrap();
//! queue.queue_work_item(flush, 0).unwrap();
//! queue.queue_work(|| { /* ... */ }).unwrap();
//!
//! let logger = WorkQueue::create(WorkQueueConfig::new("logger").max_items(64)).unwrap();
//! ```

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::ThreadId;

use crate::config::{DEFAULT_WORK_QUEUE_NAME, DEFAULT_WORK_QUEUE_PRIORITY, DEFAULT_WORK_QUEUE_STACK_SIZE};
use crate::ke::critical;
use crate::ke::thread::{KThread, Priority};
use crate::ke::wait::WaitObject;
use crate::status::{SyncError, SyncResult};

/// Work routine signature
pub type WorkerRoutine = fn(context: usize);

/// Work queue item
enum WorkItem {
    Routine { routine: WorkerRoutine, context: usize },
    Closure(Box<dyn FnOnce() + Send>),
}

impl WorkItem {
    fn execute(self) {
        match self {
            WorkItem::Routine { routine, context } => routine(context),
            WorkItem::Closure(work) => work(),
        }
    }
}

/// Work queue parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkQueueConfig {
    pub name: String,
    /// Worker stack size in stack words
    pub stack_budget: usize,
    pub priority: Priority,
    /// Queued items allowed before enqueue fails (None = unbounded)
    pub max_items: Option<usize>,
}

impl WorkQueueConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn stack_budget(mut self, words: usize) -> Self {
        self.stack_budget = words;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_items(mut self, max_items: usize) -> Self {
        self.max_items = Some(max_items);
        self
    }
}

impl Default for WorkQueueConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_WORK_QUEUE_NAME.to_string(),
            stack_budget: DEFAULT_WORK_QUEUE_STACK_SIZE,
            priority: DEFAULT_WORK_QUEUE_PRIORITY,
            max_items: None,
        }
    }
}

struct QueueState {
    items: VecDeque<WorkItem>,
    /// No new items; the worker exits once the FIFO is empty
    exiting: bool,
    completed: u64,
}

struct QueueShared {
    name: String,
    max_items: Option<usize>,
    state: WaitObject<QueueState>,
}

/// Work queue handle
pub struct WorkQueue {
    shared: Arc<QueueShared>,
    worker: Option<KThread>,
    priority: Priority,
}

impl core::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("name", &self.shared.name)
            .field("priority", &self.priority)
            .field("pending", &self.pending())
            .finish()
    }
}

impl WorkQueue {
    /// Create a work queue and start its worker
    ///
    /// # Errors
    /// `ResourceExhausted(Thread)` if the worker thread cannot be created.
    pub fn create(config: WorkQueueConfig) -> SyncResult<Self> {
        let shared = Arc::new(QueueShared {
            name: config.name.clone(),
            max_items: config.max_items,
            state: WaitObject::new(QueueState {
                items: VecDeque::new(),
                exiting: false,
                completed: 0,
            }),
        });

        let worker = {
            let shared = Arc::clone(&shared);
            KThread::spawn(&config.name, config.stack_budget, config.priority, move || {
                worker_loop(&shared)
            })?
        };

        log::debug!(
            "ksync: work queue '{}' created (priority {})",
            config.name,
            worker.priority()
        );

        Ok(Self {
            shared,
            priority: worker.priority(),
            worker: Some(worker),
        })
    }

    fn enqueue(&self, item: WorkItem) -> SyncResult<()> {
        let mut state = self.shared.state.lock();
        if state.exiting {
            return Err(SyncError::ShuttingDown);
        }
        if matches!(self.shared.max_items, Some(max) if state.items.len() >= max) {
            log::warn!("ksync: work queue '{}' full", self.shared.name);
            return Err(SyncError::EnqueueFailed);
        }
        if state.items.try_reserve(1).is_err() {
            log::warn!("ksync: work queue '{}' cannot allocate item", self.shared.name);
            return Err(SyncError::EnqueueFailed);
        }

        state.items.push_back(item);
        drop(state);
        self.shared.state.notify_one();
        Ok(())
    }

    /// Queue `routine(context)` for the worker; never blocks
    ///
    /// # Errors
    /// - `EnqueueFailed` if the queue is full or the item cannot be allocated
    /// - `ShuttingDown` if the queue is being destroyed
    pub fn queue_work_item(&self, routine: WorkerRoutine, context: usize) -> SyncResult<()> {
        self.enqueue(WorkItem::Routine { routine, context })
    }

    /// Queue a closure for the worker; never blocks
    pub fn queue_work<F>(&self, work: F) -> SyncResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(WorkItem::Closure(Box::new(work)))
    }

    /// Items queued but not yet started
    pub fn pending(&self) -> usize {
        self.shared.state.lock().items.len()
    }

    /// Items the worker has finished
    pub fn completed(&self) -> u64 {
        self.shared.state.lock().completed
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    #[inline]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn worker_thread_id(&self) -> Option<ThreadId> {
        self.worker.as_ref().map(KThread::id)
    }

    /// Stop the queue, run the items already queued, and join the worker
    #[cfg(feature = "thread-delete")]
    pub fn destroy(self) {
        drop(self);
    }
}

#[cfg(feature = "thread-delete")]
impl Drop for WorkQueue {
    fn drop(&mut self) {
        let pending = {
            let mut state = self.shared.state.lock();
            state.exiting = true;
            state.items.len()
        };
        self.shared.state.notify_all();

        if pending > 0 {
            log::warn!(
                "ksync: work queue '{}' destroyed with {} pending items",
                self.shared.name,
                pending
            );
        }

        if let Some(worker) = self.worker.take() {
            if worker.id() == crate::ke::thread::current_id() {
                // Destroyed from one of its own items: the worker exits on its own
                log::warn!("ksync: work queue '{}' destroyed by its own worker", self.shared.name);
                return;
            }
            if !worker.join() {
                log::error!("ksync: work queue '{}' worker panicked", self.shared.name);
            }
        }
        log::debug!("ksync: work queue '{}' destroyed", self.shared.name);
    }
}

fn worker_loop(shared: &QueueShared) {
    let mut state = shared.state.lock();
    loop {
        state = shared
            .state
            .block_while(state, |s| s.items.is_empty() && !s.exiting);

        // Empty and exiting
        let Some(item) = state.items.pop_front() else {
            break;
        };
        drop(state);

        critical::scheduler_checkpoint();
        log::trace!("ksync: work queue '{}' running item", shared.name);
        if panic::catch_unwind(AssertUnwindSafe(|| item.execute())).is_err() {
            log::error!("ksync: work item panicked on '{}'", shared.name);
        }

        state = shared.state.lock();
        state.completed += 1;
    }
}

/// Create a work queue with explicit parameters
pub fn create_work_queue_ex(name: &str, stack_budget: usize, priority: Priority) -> SyncResult<WorkQueue> {
    WorkQueue::create(
        WorkQueueConfig::new(name)
            .stack_budget(stack_budget)
            .priority(priority),
    )
}

/// Create a work queue with the default parameters
pub fn create_work_queue() -> SyncResult<WorkQueue> {
    WorkQueue::create(WorkQueueConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MINIMAL_STACK_SIZE;
    use crate::ke::critical::SchedulerGuard;
    use crate::ke::thread::current_priority;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    #[cfg(feature = "thread-delete")]
    use std::sync::{atomic::AtomicUsize, Mutex};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_default_config() {
        let config = WorkQueueConfig::default();
        assert_eq!(config.name, "WorkQueue");
        assert_eq!(config.stack_budget, 2 * MINIMAL_STACK_SIZE);
        assert_eq!(config.priority, crate::config::IDLE_PRIORITY + 1);
        assert_eq!(config.max_items, None);

        let queue = create_work_queue().unwrap();
        assert_eq!(queue.name(), "WorkQueue");
        assert_eq!(queue.priority(), 1);
    }

    #[cfg(feature = "thread-delete")]
    #[test]
    fn test_items_run_in_fifo_order() {
        let queue = create_work_queue_ex("fifo", 1024, 2).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["A", "B", "C"] {
            let order = Arc::clone(&order);
            queue.queue_work(move || order.lock().unwrap().push(name)).unwrap();
        }
        queue.destroy();

        assert_eq!(*order.lock().unwrap(), vec!["A", "B", "C"]);
    }

    #[cfg(feature = "thread-delete")]
    #[test]
    fn test_routine_with_context() {
        static TOTAL: AtomicUsize = AtomicUsize::new(0);

        fn add(context: usize) {
            TOTAL.fetch_add(context, Ordering::SeqCst);
        }

        let queue = create_work_queue_ex("routine", 1024, 2).unwrap();
        queue.queue_work_item(add, 40).unwrap();
        queue.queue_work_item(add, 2).unwrap();
        queue.destroy();

        assert_eq!(TOTAL.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn test_queues_progress_independently() {
        let low = create_work_queue_ex("low", 1024, 1).unwrap();
        let high = create_work_queue_ex("high", 1024, 5).unwrap();
        let (tx, rx) = mpsc::channel();

        // Stall the low queue; the high one must still make progress
        let release = Arc::new(AtomicBool::new(false));
        {
            let release = Arc::clone(&release);
            let tx = tx.clone();
            low.queue_work(move || {
                while !release.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(1));
                }
                tx.send(("low", current_priority())).unwrap();
            })
            .unwrap();
        }
        high.queue_work(move || tx.send(("high", current_priority())).unwrap())
            .unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), ("high", 5));
        release.store(true, Ordering::SeqCst);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), ("low", 1));
    }

    #[test]
    fn test_bounded_queue_rejects_overflow() {
        let queue = WorkQueue::create(WorkQueueConfig::new("bounded").max_items(1)).unwrap();
        let release = Arc::new(AtomicBool::new(false));
        let started = Arc::new(AtomicBool::new(false));

        {
            let (release, started) = (Arc::clone(&release), Arc::clone(&started));
            queue
                .queue_work(move || {
                    started.store(true, Ordering::SeqCst);
                    while !release.load(Ordering::SeqCst) {
                        thread::sleep(Duration::from_millis(1));
                    }
                })
                .unwrap();
        }
        while !started.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }

        assert!(queue.queue_work(|| {}).is_ok());
        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.queue_work(|| {}), Err(SyncError::EnqueueFailed));

        release.store(true, Ordering::SeqCst);
    }

    #[cfg(feature = "thread-delete")]
    #[test]
    fn test_destroy_drains_pending_items() {
        let queue = create_work_queue_ex("drain", 1024, 2).unwrap();
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let done = Arc::clone(&done);
            queue
                .queue_work(move || {
                    thread::sleep(Duration::from_millis(5));
                    done.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        queue.destroy();

        assert_eq!(done.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_suspended_scheduler_holds_off_items() {
        let queue = create_work_queue_ex("suspended", 1024, 2).unwrap();
        let (tx, rx) = mpsc::channel();

        let guard = SchedulerGuard::new();
        queue.queue_work(move || tx.send(()).unwrap()).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(queue.completed(), 0);

        drop(guard);
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }

    #[cfg(feature = "thread-delete")]
    #[test]
    fn test_destroy_from_own_item_detaches() {
        let queue = create_work_queue_ex("self-destroy", 1024, 2).unwrap();
        let (handoff, handed) = mpsc::channel::<WorkQueue>();
        let (tx, rx) = mpsc::channel();

        queue
            .queue_work(move || {
                if let Ok(queue) = handed.recv() {
                    queue.destroy();
                }
                tx.send(()).unwrap();
            })
            .unwrap();
        handoff.send(queue).unwrap();

        // Joining here would deadlock the worker on itself
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn test_exiting_queue_refuses_items() {
        let queue = create_work_queue_ex("exiting", 1024, 2).unwrap();
        queue.shared.state.lock().exiting = true;
        assert_eq!(queue.queue_work(|| {}), Err(SyncError::ShuttingDown));
    }

    #[cfg(feature = "thread-delete")]
    #[test]
    fn test_panicking_item_keeps_worker_alive() {
        let queue = create_work_queue_ex("panics", 1024, 2).unwrap();
        let ran = Arc::new(AtomicBool::new(false));

        queue.queue_work(|| panic!("work item failure")).unwrap();
        {
            let ran = Arc::clone(&ran);
            queue.queue_work(move || ran.store(true, Ordering::SeqCst)).unwrap();
        }
        queue.destroy();

        assert!(ran.load(Ordering::SeqCst));
    }
}
