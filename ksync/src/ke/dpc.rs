//! Deferred Call Service (timer daemon)
//!
//! One kernel thread runs every deferred function call and every timer
//! callback in the system. Interrupt handlers and threads post commands to
//! it through a bounded queue:
//!
//! - pended calls: `(routine, context, parameter)`, run once in post order
//! - timer commands: start, stop, reset, change period, delete
//!
//! Between commands the daemon fires expired timers, then sleeps until the
//! next expiry or the next post.
//!
//! There is one process-wide instance ([`system_service`]), created lazily.
//! Explicit instances ([`DeferredCallService::new`]) get their own daemon and
//! are shut down when the last handle is dropped; commands already queued
//! at that point still run.
//!
//! # Usage
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use ksync::ke::dpc::{DaemonConfig, DeferredCallService, PendContext};
//! use ksync::ke::tick::MAX_DELAY;
//!
//! fn record(context: &PendContext, parameter: u32) {
//!     if let Some(total) = context.downcast_ref::<AtomicU32>() {
//!         total.fetch_add(parameter, Ordering::SeqCst);
//!     }
//! }
//!
//! let service = DeferredCallService::new(DaemonConfig::default()).unwrap();
//! let total = Arc::new(AtomicU32::new(0));
//! assert!(service.pend_function_call(record, total.clone(), 5, MAX_DELAY));
//! drop(service); // drains the queue and joins the daemon
//! assert_eq!(total.load(Ordering::SeqCst), 5);
//! ```

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::{Arc, MutexGuard};
use std::thread::ThreadId;
use std::time::Instant;

use super::critical;
use super::thread::{self, KThread, Priority};
use super::tick::{ticks_to_duration, Deadline, TickType, NO_WAIT};
use super::timer::TimerObject;
use super::wait::WaitObject;
use crate::config::{TIMER_QUEUE_LENGTH, TIMER_TASK_NAME, TIMER_TASK_PRIORITY, TIMER_TASK_STACK_DEPTH};
use crate::status::{SyncError, SyncResult};

/// Opaque context handed back to a pended routine
pub type PendContext = Arc<dyn Any + Send + Sync>;

/// Pended routine signature
///
/// # Arguments
/// * `context` - Context given at post time
/// * `parameter` - Parameter given at post time
pub type PendedRoutine = fn(context: &PendContext, parameter: u32);

/// Daemon thread parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub name: String,
    /// Maximum queued commands
    pub queue_length: usize,
    pub priority: Priority,
    /// Stack size in stack words
    pub stack_budget: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            name: TIMER_TASK_NAME.to_string(),
            queue_length: TIMER_QUEUE_LENGTH,
            priority: TIMER_TASK_PRIORITY,
            stack_budget: TIMER_TASK_STACK_DEPTH,
        }
    }
}

/// Timer command opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerOp {
    Start,
    Stop,
    Reset,
    ChangePeriod(TickType),
    Delete,
}

pub(crate) enum Command {
    Call {
        routine: PendedRoutine,
        context: PendContext,
        parameter: u32,
    },
    Timer {
        op: TimerOp,
        timer: Arc<TimerObject>,
        /// Post time; expiries are measured from here
        issued: Instant,
    },
}

impl Command {
    /// Timer command stamped with the current time
    pub(crate) fn timer(op: TimerOp, timer: &Arc<TimerObject>) -> Self {
        Command::Timer {
            op,
            timer: Arc::clone(timer),
            issued: Instant::now(),
        }
    }
}

struct ArmedTimer {
    expiry: Instant,
    timer: Arc<TimerObject>,
}

struct ServiceState {
    commands: VecDeque<Command>,
    capacity: usize,
    /// Armed timers, unordered
    armed: Vec<ArmedTimer>,
    /// Daemon is sleeping and will run as soon as a command arrives
    daemon_waiting: bool,
    shutdown: bool,
}

impl ServiceState {
    fn is_full(&self) -> bool {
        self.commands.len() >= self.capacity
    }

    /// Queue a command; timer activity changes take effect here
    fn accept(&mut self, command: Command) {
        if let Command::Timer { op, timer, .. } = &command {
            match op {
                TimerOp::Start | TimerOp::Reset | TimerOp::ChangePeriod(_) => {
                    timer.active.store(true, Ordering::Release);
                }
                TimerOp::Stop | TimerOp::Delete => {
                    timer.active.store(false, Ordering::Release);
                }
            }
        }
        self.commands.push_back(command);
    }

    fn disarm(&mut self, timer: &Arc<TimerObject>) {
        self.armed.retain(|armed| !Arc::ptr_eq(&armed.timer, timer));
    }

    fn arm(&mut self, timer: Arc<TimerObject>, expiry: Instant) {
        self.disarm(&timer);
        self.armed.push(ArmedTimer { expiry, timer });
    }

    /// Apply a timer command (daemon side)
    fn apply(&mut self, op: TimerOp, timer: Arc<TimerObject>, issued: Instant) {
        if timer.retired.load(Ordering::Acquire) {
            return;
        }
        match op {
            TimerOp::Start | TimerOp::Reset => {
                let expiry = issued + ticks_to_duration(timer.period());
                self.arm(timer, expiry);
            }
            TimerOp::ChangePeriod(period) => {
                timer.period.store(period, Ordering::Release);
                self.arm(timer, issued + ticks_to_duration(period));
            }
            TimerOp::Stop => self.disarm(&timer),
            TimerOp::Delete => self.retire(&timer),
        }
    }

    fn retire(&mut self, timer: &Arc<TimerObject>) {
        self.disarm(timer);
        timer.active.store(false, Ordering::Release);
        timer.retired.store(true, Ordering::Release);
    }

    /// Take the earliest timer that has expired by `now`
    ///
    /// Periodic timers are re-armed one period after their expiry, one-shot
    /// timers go dormant.
    fn take_expired(&mut self, now: Instant) -> Option<Arc<TimerObject>> {
        let (index, _) = self
            .armed
            .iter()
            .enumerate()
            .filter(|(_, armed)| armed.expiry <= now)
            .min_by_key(|(_, armed)| armed.expiry)?;

        let fired = self.armed.swap_remove(index);
        if fired.timer.periodic {
            let next = fired.expiry + ticks_to_duration(fired.timer.period());
            self.armed.push(ArmedTimer {
                expiry: next,
                timer: Arc::clone(&fired.timer),
            });
        } else {
            fired.timer.active.store(false, Ordering::Release);
        }
        Some(fired.timer)
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.armed.iter().map(|armed| armed.expiry).min()
    }
}

struct ServiceInner {
    name: String,
    state: WaitObject<ServiceState>,
}

/// Deferred call service handle
pub struct DeferredCallService {
    inner: Arc<ServiceInner>,
    daemon: Option<KThread>,
    daemon_id: ThreadId,
}

impl core::fmt::Debug for DeferredCallService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeferredCallService")
            .field("name", &self.inner.name)
            .field("daemon_id", &self.daemon_id)
            .finish()
    }
}

impl DeferredCallService {
    /// Create a service with its own daemon thread
    ///
    /// # Errors
    /// - `InvalidParameter` if `queue_length` is zero
    /// - `ResourceExhausted(Thread)` if the daemon cannot be created
    pub fn new(config: DaemonConfig) -> SyncResult<Arc<Self>> {
        if config.queue_length == 0 {
            return Err(SyncError::InvalidParameter);
        }

        let mut commands = VecDeque::new();
        commands
            .try_reserve_exact(config.queue_length)
            .map_err(|_| SyncError::EnqueueFailed)?;

        let inner = Arc::new(ServiceInner {
            name: config.name.clone(),
            state: WaitObject::new(ServiceState {
                commands,
                capacity: config.queue_length,
                armed: Vec::new(),
                daemon_waiting: false,
                shutdown: false,
            }),
        });

        let daemon = {
            let inner = Arc::clone(&inner);
            KThread::spawn(&config.name, config.stack_budget, config.priority, move || {
                daemon_loop(&inner)
            })?
        };

        log::debug!(
            "ksync: deferred call service '{}' started (queue {}, priority {})",
            config.name,
            config.queue_length,
            config.priority
        );

        Ok(Arc::new(Self {
            inner,
            daemon_id: daemon.id(),
            daemon: Some(daemon),
        }))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Thread id of the daemon that runs every callback
    #[inline]
    pub fn daemon_thread_id(&self) -> ThreadId {
        self.daemon_id
    }

    /// Check if the caller is this service's daemon
    #[inline]
    pub fn on_daemon_thread(&self) -> bool {
        thread::current_id() == self.daemon_id
    }

    /// Commands queued but not yet taken by the daemon
    pub fn pending_commands(&self) -> usize {
        self.inner.state.lock().commands.len()
    }

    /// Queue a function call for the daemon
    ///
    /// Waits up to `timeout` ticks for queue space. The daemon never waits
    /// on its own queue, so posts from the daemon are always `NO_WAIT`.
    ///
    /// Returns true if the call was queued.
    pub fn pend_function_call(
        &self,
        routine: PendedRoutine,
        context: PendContext,
        parameter: u32,
        timeout: TickType,
    ) -> bool {
        self.post(
            Command::Call {
                routine,
                context,
                parameter,
            },
            timeout,
        )
    }

    /// Queue a function call from interrupt context; never blocks
    ///
    /// Fails at once when the queue is full or the service is shutting down.
    /// Sets `woken` if the daemon was idle and is now ready to run.
    pub fn pend_function_call_from_isr(
        &self,
        routine: PendedRoutine,
        context: PendContext,
        parameter: u32,
        woken: &mut bool,
    ) -> bool {
        self.post_from_isr(
            Command::Call {
                routine,
                context,
                parameter,
            },
            woken,
        )
    }

    pub(crate) fn post(&self, command: Command, timeout: TickType) -> bool {
        let timeout = if self.on_daemon_thread() { NO_WAIT } else { timeout };

        let state = self.inner.state.lock();
        let state = self
            .inner
            .state
            .wait_while(state, Deadline::after(timeout), |s| !s.shutdown && s.is_full());
        let Some(mut state) = state else {
            log::trace!("ksync: '{}' command queue full", self.inner.name);
            return false;
        };
        if state.shutdown {
            return false;
        }

        state.accept(command);
        drop(state);
        self.inner.state.notify_all();
        true
    }

    pub(crate) fn post_from_isr(&self, command: Command, woken: &mut bool) -> bool {
        // The state lock is only ever held for short, non-blocking sections
        let mut state = self.inner.state.lock();
        if state.shutdown || state.is_full() {
            return false;
        }

        state.accept(command);
        if state.daemon_waiting {
            *woken = true;
        }
        drop(state);
        self.inner.state.notify_all();
        true
    }

    /// Forget a timer immediately (daemon thread only)
    pub(crate) fn retire_now(&self, timer: &Arc<TimerObject>) {
        debug_assert!(self.on_daemon_thread());
        let mut state = self.inner.state.lock();
        state.commands.retain(|command| match command {
            Command::Timer { timer: queued, .. } => !Arc::ptr_eq(queued, timer),
            Command::Call { .. } => true,
        });
        state.retire(timer);
        drop(state);
        self.inner.state.notify_all();
    }

    /// Block until the daemon has retired `timer` or stopped
    pub(crate) fn wait_retired(&self, timer: &TimerObject) {
        let state = self.inner.state.lock();
        let _state = self.inner.state.block_while(state, |_| {
            !timer.retired.load(Ordering::Acquire)
        });
    }
}

impl Drop for DeferredCallService {
    fn drop(&mut self) {
        self.inner.state.lock().shutdown = true;
        self.inner.state.notify_all();

        if let Some(daemon) = self.daemon.take() {
            if daemon.id() == thread::current_id() {
                // Last handle dropped by a callback: the daemon exits on its own
                log::debug!("ksync: '{}' released from its own daemon", self.inner.name);
                return;
            }
            if !daemon.join() {
                log::error!("ksync: '{}' daemon panicked", self.inner.name);
            }
        }
        log::debug!("ksync: deferred call service '{}' stopped", self.inner.name);
    }
}

/// Run one callback outside the state lock
fn invoke<F: FnOnce()>(name: &str, what: &str, callback: F) {
    critical::scheduler_checkpoint();
    if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
        log::error!("ksync: {} panicked on '{}'", what, name);
    }
}

fn daemon_loop(inner: &ServiceInner) {
    let mut state = inner.state.lock();
    loop {
        // Commands first, in post order
        if let Some(command) = state.commands.pop_front() {
            inner.state.notify_all();
            match command {
                Command::Call {
                    routine,
                    context,
                    parameter,
                } => {
                    drop(state);
                    log::trace!("ksync: pended call ({})", parameter);
                    invoke(&inner.name, "pended call", || routine(&context, parameter));
                    state = inner.state.lock();
                }
                Command::Timer { op, timer, issued } => {
                    state.apply(op, timer, issued);
                    if op == TimerOp::Delete {
                        inner.state.notify_all();
                    }
                }
            }
            continue;
        }

        if let Some(timer) = state.take_expired(Instant::now()) {
            drop(state);
            log::trace!("ksync: timer '{}' expired", timer.name);
            invoke(&inner.name, "timer callback", || timer.callback.run());
            state = inner.state.lock();
            continue;
        }

        if state.shutdown {
            break;
        }

        state = sleep(inner, state);
    }

    // Anything still armed is dropped with the service
    let armed: Vec<_> = state.armed.drain(..).map(|armed| armed.timer).collect();
    for timer in &armed {
        timer.active.store(false, Ordering::Release);
    }
}

fn sleep<'a>(inner: &'a ServiceInner, mut state: MutexGuard<'a, ServiceState>) -> MutexGuard<'a, ServiceState> {
    state.daemon_waiting = true;
    let mut state = match state.next_expiry() {
        Some(expiry) => {
            let left = expiry.saturating_duration_since(Instant::now());
            inner.state.wait_timeout(state, left)
        }
        None => inner.state.wait(state),
    };
    state.daemon_waiting = false;
    state
}

static SYSTEM_SERVICE: spin::Once<Arc<DeferredCallService>> = spin::Once::new();

/// Create the process-wide service with `config`
///
/// Returns the existing instance if the service is already running; the
/// configuration is then ignored.
pub fn initialize_system_service(config: DaemonConfig) -> SyncResult<Arc<DeferredCallService>> {
    let mut fresh = false;
    let service = SYSTEM_SERVICE.try_call_once(|| {
        fresh = true;
        DeferredCallService::new(config)
    })?;
    if !fresh {
        log::debug!("ksync: system service already running, configuration ignored");
    }
    Ok(Arc::clone(service))
}

/// The process-wide service, started with [`DaemonConfig::default`] on first use
pub fn system_service() -> SyncResult<Arc<DeferredCallService>> {
    SYSTEM_SERVICE
        .try_call_once(|| DeferredCallService::new(DaemonConfig::default()))
        .map(Arc::clone)
}
