//! Critical Sections
//!
//! Static controls over the kernel's two global switches: the interrupt
//! mask and the scheduler.
//!
//! - [`CriticalSection::enter`] / [`exit`](CriticalSection::exit): suspend
//!   scheduling and mask interrupts
//! - [`CriticalSection::enter_from_isr`] / [`exit_from_isr`](CriticalSection::exit_from_isr):
//!   the interrupt-context variant, with a saved mask
//! - [`CriticalSection::disable_interrupts`] / [`enable_interrupts`](CriticalSection::enable_interrupts):
//!   the raw global mask
//! - [`CriticalSection::suspend_scheduler`] / [`resume_scheduler`](CriticalSection::resume_scheduler):
//!   stop other kernel threads without masking interrupts
//!
//! On a hosted kernel several threads really run at once, so the kernel
//! region is owned by one thread at a time. The owner may nest; the nesting
//! count is the kernel's, not this API's. Enter/exit must always be paired,
//! preferably through [`CriticalGuard`] / [`SchedulerGuard`].
//!
//! Kernel-created threads (work queue workers, the timer daemon) pass
//! through [`scheduler_checkpoint`] before each callback, so they do not
//! start new work while another thread holds the region.
//!
//! # Usage
//! ```
//! use ksync::CriticalGuard;
//!
//! let _guard = CriticalGuard::new();
//! // ... interrupts masked, no other kernel thread runs new work ...
//! ```

use core::marker::PhantomData;
use std::thread::ThreadId;

use super::thread::{self, ContextFlags};
use super::wait::WaitObject;

/// Global kernel region state
#[derive(Debug)]
struct KernelState {
    /// Thread owning the region (critical section or suspended scheduler)
    owner: Option<ThreadId>,
    /// Total nesting held by the owner
    depth: u32,
    /// Nesting that masks interrupts
    critical_depth: u32,
    /// Nesting that suspends the scheduler only
    scheduler_depth: u32,
    /// Global interrupt disable switch
    interrupts_disabled: bool,
    /// Thread currently running an interrupt service routine
    isr_owner: Option<ThreadId>,
    /// Critical nesting taken from interrupt context
    isr_critical_depth: u32,
}

static KERNEL: WaitObject<KernelState> = WaitObject::new(KernelState {
    owner: None,
    depth: 0,
    critical_depth: 0,
    scheduler_depth: 0,
    interrupts_disabled: false,
    isr_owner: None,
    isr_critical_depth: 0,
});

impl KernelState {
    fn owned_by_other(&self, me: ThreadId) -> bool {
        matches!(self.owner, Some(owner) if owner != me)
    }

    fn isr_on_other(&self, me: ThreadId) -> bool {
        matches!(self.isr_owner, Some(owner) if owner != me)
    }

    fn interrupts_masked(&self) -> bool {
        self.interrupts_disabled || self.critical_depth > 0
    }

    /// Drop one level of the owner's nesting
    fn release_one(&mut self) {
        self.depth -= 1;
        if self.depth == 0 {
            self.owner = None;
        }
    }
}

/// Interrupt mask state saved by [`CriticalSection::enter_from_isr`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "the saved mask must be handed back to exit_from_isr"]
pub struct InterruptMask {
    previously_masked: bool,
}

impl InterruptMask {
    /// Whether interrupts were already masked when the mask was saved
    pub fn was_masked(&self) -> bool {
        self.previously_masked
    }
}

/// Critical section controls (no state of its own)
#[derive(Debug)]
pub struct CriticalSection;

impl CriticalSection {
    /// Enter a critical section: suspend scheduling and mask interrupts
    ///
    /// Blocks while another thread owns the kernel region or an interrupt is
    /// being serviced.
    pub fn enter() {
        debug_assert!(!thread::in_interrupt(), "use enter_from_isr in interrupt context");
        let me = thread::current_id();

        let state = KERNEL.lock();
        let mut state = KERNEL.block_while(state, |s| s.owned_by_other(me) || s.isr_on_other(me));
        state.owner = Some(me);
        state.depth += 1;
        state.critical_depth += 1;
        drop(state);

        thread::set_context(ContextFlags::CRITICAL, true);
    }

    /// Leave a critical section
    pub fn exit() {
        let me = thread::current_id();
        let mut state = KERNEL.lock();

        let matched = state.owner == Some(me) && state.critical_depth > 0;
        debug_assert!(matched, "CriticalSection::exit without matching enter");
        if !matched {
            return;
        }

        state.critical_depth -= 1;
        let still_critical = state.critical_depth > 0;
        state.release_one();
        drop(state);
        KERNEL.notify_all();

        if !still_critical {
            thread::set_context(ContextFlags::CRITICAL, false);
        }
    }

    /// Enter a critical section from interrupt context
    ///
    /// Never blocks: interrupt delivery already excludes thread critical
    /// sections and other interrupts.
    pub fn enter_from_isr() -> InterruptMask {
        debug_assert!(thread::in_interrupt(), "enter_from_isr outside interrupt context");
        let mut state = KERNEL.lock();
        let previously_masked = state.isr_critical_depth > 0;
        state.isr_critical_depth += 1;
        InterruptMask { previously_masked }
    }

    /// Leave an interrupt-context critical section, restoring `mask`
    pub fn exit_from_isr(mask: InterruptMask) {
        let mut state = KERNEL.lock();
        debug_assert!(state.isr_critical_depth > 0, "exit_from_isr without matching enter");
        state.isr_critical_depth = state.isr_critical_depth.saturating_sub(1);
        debug_assert_eq!(mask.previously_masked, state.isr_critical_depth > 0);
    }

    /// Mask all interrupts globally
    pub fn disable_interrupts() {
        KERNEL.lock().interrupts_disabled = true;
    }

    /// Unmask interrupts globally
    pub fn enable_interrupts() {
        KERNEL.lock().interrupts_disabled = false;
        KERNEL.notify_all();
    }

    /// Suspend the scheduler without masking interrupts
    pub fn suspend_scheduler() {
        let me = thread::current_id();

        let state = KERNEL.lock();
        let mut state = KERNEL.block_while(state, |s| s.owned_by_other(me));
        state.owner = Some(me);
        state.depth += 1;
        state.scheduler_depth += 1;
        drop(state);

        thread::set_context(ContextFlags::SCHEDULER_SUSPENDED, true);
    }

    /// Resume the scheduler
    pub fn resume_scheduler() {
        let me = thread::current_id();
        let mut state = KERNEL.lock();

        let matched = state.owner == Some(me) && state.scheduler_depth > 0;
        debug_assert!(matched, "resume_scheduler without matching suspend");
        if !matched {
            return;
        }

        state.scheduler_depth -= 1;
        let still_suspended = state.scheduler_depth > 0;
        state.release_one();
        drop(state);
        KERNEL.notify_all();

        if !still_suspended {
            thread::set_context(ContextFlags::SCHEDULER_SUSPENDED, false);
        }
    }

    /// Check if any thread holds the scheduler suspended or a critical section
    pub fn is_scheduler_suspended() -> bool {
        KERNEL.lock().owner.is_some()
    }

    /// Check if interrupt delivery is currently held off
    pub fn interrupts_masked() -> bool {
        KERNEL.lock().interrupts_masked()
    }
}

/// Wait until the calling kernel thread may start new work
pub(crate) fn scheduler_checkpoint() {
    let me = thread::current_id();
    let state = KERNEL.lock();
    let _state = KERNEL.block_while(state, |s| s.owned_by_other(me) || s.isr_on_other(me));
}

/// Claim the interrupt line for the calling thread
pub(super) fn begin_isr() {
    let me = thread::current_id();
    let state = KERNEL.lock();
    debug_assert!(
        !(state.owner == Some(me) && state.critical_depth > 0),
        "interrupt raised by a thread that has interrupts masked"
    );
    let mut state = KERNEL.block_while(state, |s| s.interrupts_masked() || s.isr_owner.is_some());
    state.isr_owner = Some(me);
}

/// Release the interrupt line
pub(super) fn end_isr() {
    let mut state = KERNEL.lock();
    debug_assert_eq!(state.isr_critical_depth, 0, "interrupt returned inside a critical section");
    state.isr_critical_depth = 0;
    state.isr_owner = None;
    drop(state);
    KERNEL.notify_all();
}

/// Scoped critical section
#[derive(Debug)]
#[must_use = "the critical section ends when the guard is dropped"]
pub struct CriticalGuard {
    // Ownership of the region is per thread
    _not_send: PhantomData<*const ()>,
}

impl CriticalGuard {
    pub fn new() -> Self {
        CriticalSection::enter();
        Self { _not_send: PhantomData }
    }
}

impl Drop for CriticalGuard {
    fn drop(&mut self) {
        CriticalSection::exit();
    }
}

/// Scoped scheduler suspension
#[derive(Debug)]
#[must_use = "the scheduler resumes when the guard is dropped"]
pub struct SchedulerGuard {
    _not_send: PhantomData<*const ()>,
}

impl SchedulerGuard {
    pub fn new() -> Self {
        CriticalSection::suspend_scheduler();
        Self { _not_send: PhantomData }
    }
}

impl Drop for SchedulerGuard {
    fn drop(&mut self) {
        CriticalSection::resume_scheduler();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ke::thread::current_context;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread as host;
    use std::time::Duration;

    #[test]
    fn test_critical_nesting() {
        CriticalSection::enter();
        CriticalSection::enter();
        assert!(current_context().contains(ContextFlags::CRITICAL));
        assert!(CriticalSection::interrupts_masked());

        CriticalSection::exit();
        assert!(current_context().contains(ContextFlags::CRITICAL));
        CriticalSection::exit();
        assert!(!current_context().contains(ContextFlags::CRITICAL));
    }

    #[test]
    fn test_critical_excludes_other_threads() {
        let inside = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();

        let guard = CriticalGuard::new();
        let contender = {
            let inside = Arc::clone(&inside);
            host::spawn(move || {
                tx.send(()).unwrap();
                let _guard = CriticalGuard::new();
                inside.store(true, Ordering::SeqCst);
            })
        };

        rx.recv().unwrap();
        host::sleep(Duration::from_millis(30));
        assert!(!inside.load(Ordering::SeqCst));

        drop(guard);
        contender.join().unwrap();
        assert!(inside.load(Ordering::SeqCst));
    }

    #[test]
    fn test_scheduler_guard_flags() {
        {
            let _guard = SchedulerGuard::new();
            assert!(current_context().contains(ContextFlags::SCHEDULER_SUSPENDED));
            assert!(CriticalSection::is_scheduler_suspended());
        }
        assert!(!current_context().contains(ContextFlags::SCHEDULER_SUSPENDED));
    }

    #[test]
    fn test_scheduler_and_critical_share_owner() {
        let _scheduler = SchedulerGuard::new();
        let _critical = CriticalGuard::new();
        assert!(current_context().contains(ContextFlags::CRITICAL | ContextFlags::SCHEDULER_SUSPENDED));
    }
}
