//! Kernel Mutex Implementation (KMUTEX)
//!
//! A mutex provides mutual exclusion with the ability to block waiting
//! threads until a timeout. Two kinds:
//!
//! - **Standard**: not reentrant. A second `lock` by the holder blocks until
//!   its timeout, and only the holder can unlock.
//! - **Recursive**: the holder may lock again; each `lock` is matched by one
//!   `unlock` and ownership is released when the count reaches zero.
//!
//! # Usage
//! ```
//! use ksync::{KMutex, LockGuard};
//! use ksync::ke::tick::MAX_DELAY;
//!
//! let mutex = KMutex::new_standard().unwrap();
//!
//! assert!(mutex.lock(MAX_DELAY));
//! // ... critical section ...
//! assert!(mutex.unlock());
//!
//! {
//!     let _guard = LockGuard::new(&mutex);
//!     // ... released on every exit path ...
//! }
//! ```

use std::thread::ThreadId;

use super::pool::{self, ObjectType, PoolCharge};
use super::thread;
use super::tick::{Deadline, TickType, MAX_DELAY, NO_WAIT};
use super::wait::WaitObject;
use crate::status::SyncResult;

/// Mutex flavor, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexKind {
    Standard,
    Recursive,
}

#[derive(Debug)]
struct MutexState {
    /// Owning thread (None if not owned)
    owner: Option<ThreadId>,
    /// How many times the owner has acquired
    recursion_count: u32,
}

/// Kernel Mutex
#[derive(Debug)]
pub struct KMutex {
    kind: MutexKind,
    state: WaitObject<MutexState>,
    _charge: PoolCharge,
}

impl KMutex {
    fn with_kind(kind: MutexKind) -> SyncResult<Self> {
        let charge = pool::charge(ObjectType::Mutex)?;
        Ok(Self {
            kind,
            state: WaitObject::new(MutexState {
                owner: None,
                recursion_count: 0,
            }),
            _charge: charge,
        })
    }

    /// Create a standard (non-recursive) mutex
    ///
    /// # Errors
    /// `ResourceExhausted(Mutex)` if the mutex pool is exhausted.
    pub fn new_standard() -> SyncResult<Self> {
        Self::with_kind(MutexKind::Standard)
    }

    /// Create a recursive mutex
    ///
    /// # Errors
    /// `ResourceExhausted(Mutex)` if the mutex pool is exhausted.
    #[cfg(feature = "recursive-mutex")]
    pub fn new_recursive() -> SyncResult<Self> {
        Self::with_kind(MutexKind::Recursive)
    }

    #[inline]
    pub fn kind(&self) -> MutexKind {
        self.kind
    }

    /// Acquire the mutex, blocking up to `timeout` ticks
    ///
    /// Returns true if acquired, false if the timeout elapsed first.
    ///
    /// Must be called from thread context (not interrupt).
    pub fn lock(&self, timeout: TickType) -> bool {
        debug_assert!(!thread::in_interrupt(), "KMutex::lock in interrupt context");
        let current = thread::current_id();
        let state = self.state.lock();

        // Check for recursive acquisition
        if self.kind == MutexKind::Recursive && state.owner == Some(current) {
            let mut state = state;
            state.recursion_count += 1;
            return true;
        }

        let state = match timeout {
            NO_WAIT if state.owner.is_some() => return false,
            _ => self
                .state
                .wait_while(state, Deadline::after(timeout), |s| s.owner.is_some()),
        };

        match state {
            Some(mut state) => {
                state.owner = Some(current);
                state.recursion_count = 1;
                true
            }
            None => false,
        }
    }

    /// Try to acquire the mutex without blocking
    #[inline]
    pub fn try_lock(&self) -> bool {
        self.lock(NO_WAIT)
    }

    /// Release the mutex
    ///
    /// Returns false if the calling thread does not hold it.
    pub fn unlock(&self) -> bool {
        let current = thread::current_id();
        let mut state = self.state.lock();

        // Verify ownership
        if state.owner != Some(current) {
            return false;
        }

        state.recursion_count -= 1;
        if state.recursion_count > 0 {
            // Still recursively held
            return true;
        }

        state.owner = None;
        drop(state);
        self.state.notify_one();
        true
    }

    /// Check if the mutex is owned by any thread
    pub fn is_locked(&self) -> bool {
        self.state.lock().owner.is_some()
    }

    /// Check if owned by the current thread
    pub fn is_owned_by_current(&self) -> bool {
        self.state.lock().owner == Some(thread::current_id())
    }

    /// Recursion depth of the current owner (0 if unowned)
    pub fn recursion_count(&self) -> u32 {
        self.state.lock().recursion_count
    }
}

/// RAII guard for scoped locking
#[derive(Debug)]
#[must_use = "the mutex is released when the guard is dropped"]
pub struct LockGuard<'a> {
    mutex: &'a KMutex,
}

impl<'a> LockGuard<'a> {
    /// Acquire the mutex, waiting forever
    pub fn new(mutex: &'a KMutex) -> Self {
        let acquired = mutex.lock(MAX_DELAY);
        debug_assert!(acquired);
        Self { mutex }
    }

    /// Acquire within `timeout` ticks, returning None if it elapsed
    pub fn try_new(mutex: &'a KMutex, timeout: TickType) -> Option<Self> {
        if mutex.lock(timeout) {
            Some(Self { mutex })
        } else {
            None
        }
    }
}

impl<'a> Drop for LockGuard<'a> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}
