//! Kernel Semaphore Implementation (KSEMAPHORE)
//!
//! A semaphore maintains a count. Takers block while the count is zero;
//! givers increment it up to the maximum. Unlike a mutex, a semaphore has
//! no owner: any thread (or interrupt) may give it, which is what makes it
//! usable as a gate that one thread closes and another reopens.
//!
//! - Binary semaphores have a maximum of 1 and start empty.
//! - Counting semaphores take an explicit maximum and initial count.
//!
//! # Usage
//! ```
//! use ksync::ke::semaphore::KSemaphore;
//! use ksync::ke::tick::NO_WAIT;
//!
//! let sem = KSemaphore::new_counting(3, 3).unwrap();
//! assert!(sem.take(NO_WAIT));   // count: 3 -> 2
//! assert!(sem.give());          // count: 2 -> 3
//! assert!(!sem.give());         // already at the maximum
//! ```

use super::pool::{self, ObjectType, PoolCharge};
use super::thread;
use super::tick::{Deadline, TickType, NO_WAIT};
use super::wait::WaitObject;
use crate::status::{SyncError, SyncResult};

#[derive(Debug)]
struct SemaphoreState {
    count: u32,
    max_count: u32,
    /// Threads blocked in `take`
    waiters: u32,
}

/// Kernel Semaphore
#[derive(Debug)]
pub struct KSemaphore {
    state: WaitObject<SemaphoreState>,
    _charge: PoolCharge,
}

impl KSemaphore {
    /// Create a binary semaphore (maximum 1), initially empty
    pub fn new_binary() -> SyncResult<Self> {
        Self::new_counting(1, 0)
    }

    /// Create a counting semaphore
    ///
    /// # Errors
    /// - `InvalidParameter` if `max_count` is zero or `initial_count` exceeds it
    /// - `ResourceExhausted(Semaphore)` if the semaphore pool is exhausted
    pub fn new_counting(max_count: u32, initial_count: u32) -> SyncResult<Self> {
        if max_count == 0 || initial_count > max_count {
            return Err(SyncError::InvalidParameter);
        }
        let charge = pool::charge(ObjectType::Semaphore)?;
        Ok(Self {
            state: WaitObject::new(SemaphoreState {
                count: initial_count,
                max_count,
                waiters: 0,
            }),
            _charge: charge,
        })
    }

    /// Take the semaphore, blocking up to `timeout` ticks
    ///
    /// Returns true if the count was decremented.
    pub fn take(&self, timeout: TickType) -> bool {
        debug_assert!(
            timeout == NO_WAIT || !thread::in_interrupt(),
            "blocking take in interrupt context"
        );

        let mut state = self.state.lock();
        if state.count == 0 && timeout != NO_WAIT {
            state.waiters += 1;
            let woken = self
                .state
                .wait_while(state, Deadline::after(timeout), |s| s.count == 0);
            state = match woken {
                Some(state) => state,
                None => {
                    self.state.lock().waiters -= 1;
                    return false;
                }
            };
            state.waiters -= 1;
        }

        if state.count == 0 {
            return false;
        }
        state.count -= 1;
        true
    }

    /// Take without blocking
    #[inline]
    pub fn try_take(&self) -> bool {
        self.take(NO_WAIT)
    }

    /// Give the semaphore
    ///
    /// Returns false if the count is already at its maximum.
    pub fn give(&self) -> bool {
        let mut state = self.state.lock();
        if state.count >= state.max_count {
            return false;
        }
        state.count += 1;
        let wake = state.waiters > 0;
        drop(state);

        if wake {
            self.state.notify_one();
        }
        true
    }

    /// Take from interrupt context; never blocks
    ///
    /// `woken` is left untouched: taking never readies another thread.
    pub fn take_from_isr(&self, _woken: &mut bool) -> bool {
        let mut state = self.state.lock();
        if state.count == 0 {
            return false;
        }
        state.count -= 1;
        true
    }

    /// Give from interrupt context; never blocks
    ///
    /// Sets `woken` when a blocked thread was readied by the give.
    pub fn give_from_isr(&self, woken: &mut bool) -> bool {
        let mut state = self.state.lock();
        if state.count >= state.max_count {
            return false;
        }
        state.count += 1;
        let wake = state.waiters > 0;
        drop(state);

        if wake {
            *woken = true;
            self.state.notify_one();
        }
        true
    }

    /// Current count
    pub fn count(&self) -> u32 {
        self.state.lock().count
    }

    /// Maximum count
    pub fn max_count(&self) -> u32 {
        self.state.lock().max_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ke::interrupt;
    use crate::ke::tick::MAX_DELAY;
    use std::sync::Arc;
    use std::thread as host;
    use std::time::{Duration, Instant};

    #[test]
    fn test_binary_starts_empty() {
        let sem = KSemaphore::new_binary().unwrap();
        assert_eq!(sem.count(), 0);
        assert!(!sem.try_take());
        assert!(sem.give());
        assert!(!sem.give());
        assert!(sem.try_take());
    }

    #[test]
    fn test_invalid_counts() {
        assert_eq!(KSemaphore::new_counting(0, 0).unwrap_err(), SyncError::InvalidParameter);
        assert_eq!(KSemaphore::new_counting(2, 3).unwrap_err(), SyncError::InvalidParameter);
    }

    #[test]
    fn test_take_times_out() {
        let sem = KSemaphore::new_binary().unwrap();
        let start = Instant::now();
        assert!(!sem.take(30));
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_give_wakes_blocked_taker() {
        let sem = Arc::new(KSemaphore::new_binary().unwrap());
        let taker = {
            let sem = Arc::clone(&sem);
            host::spawn(move || sem.take(MAX_DELAY))
        };

        host::sleep(Duration::from_millis(20));
        assert!(sem.give());
        assert!(taker.join().unwrap());
        assert_eq!(sem.count(), 0);
    }

    #[test]
    fn test_isr_give_reports_woken_task() {
        let sem = Arc::new(KSemaphore::new_binary().unwrap());
        let taker = {
            let sem = Arc::clone(&sem);
            host::spawn(move || sem.take(MAX_DELAY))
        };

        // Wait for the taker to block
        while sem.state.lock().waiters == 0 {
            host::sleep(Duration::from_millis(1));
        }

        let mut woken = false;
        assert!(interrupt::raise(|| sem.give_from_isr(&mut woken)));
        assert!(woken);
        assert!(taker.join().unwrap());
    }

    #[test]
    fn test_isr_take_never_blocks() {
        let sem = KSemaphore::new_binary().unwrap();
        let mut woken = false;
        assert!(!interrupt::raise(|| sem.take_from_isr(&mut woken)));
        sem.give();
        assert!(interrupt::raise(|| sem.take_from_isr(&mut woken)));
        assert!(!woken);
    }
}
