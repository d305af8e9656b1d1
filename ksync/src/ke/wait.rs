//! Wait Support
//!
//! Every blocking kernel object in this crate is a piece of state behind a
//! host mutex plus a condition variable. [`WaitObject`] bundles the two and
//! implements the one wait loop they all share: block while a predicate
//! holds, until a [`Deadline`] passes.
//!
//! A poisoned state lock is recovered rather than propagated; the state
//! guarded here is always left consistent before any user code runs.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use core::time::Duration;

use super::tick::Deadline;

/// State plus the condition variable its waiters sleep on
#[derive(Debug)]
pub(crate) struct WaitObject<T> {
    state: Mutex<T>,
    cond: Condvar,
}

impl<T> WaitObject<T> {
    pub const fn new(state: T) -> Self {
        Self {
            state: Mutex::new(state),
            cond: Condvar::new(),
        }
    }

    /// Lock the state
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block while `blocked` returns true
    ///
    /// Returns the guard once `blocked` is false, or None if the deadline
    /// passed first.
    pub fn wait_while<'a, F>(
        &'a self,
        mut guard: MutexGuard<'a, T>,
        deadline: Deadline,
        mut blocked: F,
    ) -> Option<MutexGuard<'a, T>>
    where
        F: FnMut(&mut T) -> bool,
    {
        while blocked(&mut guard) {
            guard = match deadline.remaining() {
                None => self.wait(guard),
                Some(left) if !left.is_zero() => self.wait_timeout(guard, left),
                Some(_) => return None,
            };
        }
        Some(guard)
    }

    /// Block while `blocked` returns true, with no timeout
    pub fn block_while<'a, F>(&'a self, mut guard: MutexGuard<'a, T>, mut blocked: F) -> MutexGuard<'a, T>
    where
        F: FnMut(&mut T) -> bool,
    {
        while blocked(&mut guard) {
            guard = self.wait(guard);
        }
        guard
    }

    /// Sleep until notified
    #[inline]
    pub fn wait<'a>(&'a self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep until notified or `timeout` elapses
    #[inline]
    pub fn wait_timeout<'a>(
        &'a self,
        guard: MutexGuard<'a, T>,
        timeout: Duration,
    ) -> MutexGuard<'a, T> {
        match self.cond.wait_timeout(guard, timeout) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }

    #[inline]
    pub fn notify_one(&self) {
        self.cond.notify_one();
    }

    #[inline]
    pub fn notify_all(&self) {
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ke::tick::{MAX_DELAY, NO_WAIT};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_while_times_out() {
        let object = WaitObject::new(false);
        let guard = object.lock();
        assert!(object.wait_while(guard, Deadline::after(NO_WAIT), |ready| !*ready).is_none());

        let guard = object.lock();
        assert!(object.wait_while(guard, Deadline::after(20), |ready| !*ready).is_none());
    }

    #[test]
    fn test_wait_while_wakes_on_notify() {
        let object = Arc::new(WaitObject::new(0u32));
        let setter = {
            let object = Arc::clone(&object);
            thread::spawn(move || {
                *object.lock() = 7;
                object.notify_all();
            })
        };

        let guard = object.lock();
        let guard = object
            .wait_while(guard, Deadline::after(MAX_DELAY), |value| *value == 0)
            .expect("infinite wait cannot time out");
        assert_eq!(*guard, 7);
        drop(guard);
        setter.join().unwrap();
    }
}
