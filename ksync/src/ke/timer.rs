//! Software Timers
//!
//! A timer runs a callback on the deferred call service's daemon thread
//! after its period elapses, either once or every period until stopped.
//!
//! Every control operation is a command posted to the daemon, so they all
//! take a timeout for queue space, and all have non-blocking `_from_isr`
//! variants. The active flag changes as soon as a command is accepted:
//!
//! - `start`, `reset`, `set_period` arm the timer (`set_period` starts a
//!   dormant timer too)
//! - `stop` disarms it
//! - a one-shot timer goes dormant when it fires
//!
//! Periodic timers re-arm relative to their previous expiry, so a slow
//! callback does not accumulate drift.
//!
//! # Usage
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use ksync::Timer;
//! use ksync::ke::tick::MAX_DELAY;
//!
//! let fired = Arc::new(AtomicU32::new(0));
//! let counter = fired.clone();
//! let timer = Timer::new("heartbeat", 10, true, move || {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! })
//! .unwrap();
//!
//! assert!(timer.start(MAX_DELAY));
//! assert!(timer.is_active());
//! // ...
//! assert!(timer.stop(MAX_DELAY));
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use super::dpc::{self, Command, DeferredCallService, TimerOp};
use super::pool::{self, ObjectType, PoolCharge};
use super::tick::{TickType, MAX_DELAY};
use crate::status::{SyncError, SyncResult};

/// Timer expiry callback
pub trait TimerCallback: Send + Sync + 'static {
    fn run(&self);
}

impl<F> TimerCallback for F
where
    F: Fn() + Send + Sync + 'static,
{
    fn run(&self) {
        self()
    }
}

/// Timer state shared with the daemon
pub(crate) struct TimerObject {
    pub(crate) name: String,
    pub(crate) period: AtomicU32,
    pub(crate) periodic: bool,
    pub(crate) active: AtomicBool,
    /// Set once the daemon has forgotten the timer
    pub(crate) retired: AtomicBool,
    pub(crate) callback: Box<dyn TimerCallback>,
    _charge: PoolCharge,
}

impl TimerObject {
    #[inline]
    pub(crate) fn period(&self) -> TickType {
        self.period.load(Ordering::Acquire)
    }
}

/// Software timer
pub struct Timer {
    object: Arc<TimerObject>,
    service: Arc<DeferredCallService>,
}

impl core::fmt::Debug for Timer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Timer")
            .field("name", &self.object.name)
            .field("period", &self.period())
            .field("periodic", &self.object.periodic)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Timer {
    /// Create a dormant timer on the system service
    ///
    /// # Arguments
    /// * `name` - Diagnostic name
    /// * `period` - Period in ticks (must be non-zero)
    /// * `periodic` - Re-arm after every expiry instead of firing once
    /// * `callback` - Runs on the daemon thread at each expiry
    ///
    /// # Errors
    /// - `InvalidParameter` for a zero period
    /// - `ResourceExhausted(Timer)` if the timer pool is exhausted
    pub fn new<C: TimerCallback>(name: &str, period: TickType, periodic: bool, callback: C) -> SyncResult<Self> {
        Self::with_service(dpc::system_service()?, name, period, periodic, callback)
    }

    /// Create a dormant timer on a specific service
    pub fn with_service<C: TimerCallback>(
        service: Arc<DeferredCallService>,
        name: &str,
        period: TickType,
        periodic: bool,
        callback: C,
    ) -> SyncResult<Self> {
        if period == 0 {
            return Err(SyncError::InvalidParameter);
        }
        let charge = pool::charge(ObjectType::Timer)?;

        log::debug!("ksync: timer '{}' created (period {}, periodic {})", name, period, periodic);
        Ok(Self {
            object: Arc::new(TimerObject {
                name: name.to_string(),
                period: AtomicU32::new(period),
                periodic,
                active: AtomicBool::new(false),
                retired: AtomicBool::new(false),
                callback: Box::new(callback),
                _charge: charge,
            }),
            service,
        })
    }

    fn post(&self, op: TimerOp, timeout: TickType) -> bool {
        self.service.post(Command::timer(op, &self.object), timeout)
    }

    fn post_from_isr(&self, op: TimerOp, woken: &mut bool) -> bool {
        self.service.post_from_isr(Command::timer(op, &self.object), woken)
    }

    /// Arm the timer, waiting up to `timeout` ticks for queue space
    pub fn start(&self, timeout: TickType) -> bool {
        self.post(TimerOp::Start, timeout)
    }

    /// Disarm the timer
    pub fn stop(&self, timeout: TickType) -> bool {
        self.post(TimerOp::Stop, timeout)
    }

    /// Restart the period from now, arming the timer if dormant
    pub fn reset(&self, timeout: TickType) -> bool {
        self.post(TimerOp::Reset, timeout)
    }

    /// Change the period and restart the timer from now
    ///
    /// Returns false without posting anything for a zero period.
    pub fn set_period(&self, period: TickType, timeout: TickType) -> bool {
        period != 0 && self.post(TimerOp::ChangePeriod(period), timeout)
    }

    pub fn start_from_isr(&self, woken: &mut bool) -> bool {
        self.post_from_isr(TimerOp::Start, woken)
    }

    pub fn stop_from_isr(&self, woken: &mut bool) -> bool {
        self.post_from_isr(TimerOp::Stop, woken)
    }

    pub fn reset_from_isr(&self, woken: &mut bool) -> bool {
        self.post_from_isr(TimerOp::Reset, woken)
    }

    pub fn set_period_from_isr(&self, period: TickType, woken: &mut bool) -> bool {
        period != 0 && self.post_from_isr(TimerOp::ChangePeriod(period), woken)
    }

    /// Check if the timer is armed
    #[inline]
    pub fn is_active(&self) -> bool {
        self.object.active.load(Ordering::Acquire)
    }

    /// Current period in ticks
    #[inline]
    pub fn period(&self) -> TickType {
        self.object.period()
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.object.name
    }

    #[inline]
    pub fn is_periodic(&self) -> bool {
        self.object.periodic
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if self.service.on_daemon_thread() {
            self.service.retire_now(&self.object);
        } else if self.post(TimerOp::Delete, MAX_DELAY) {
            self.service.wait_retired(&self.object);
        }
        log::debug!("ksync: timer '{}' deleted", self.object.name);
    }
}
