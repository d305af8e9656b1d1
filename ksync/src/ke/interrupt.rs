//! Interrupt Dispatch
//!
//! The hosted kernel has no interrupt controller, so interrupts are raised
//! in software: [`raise`] runs a service routine on the calling thread in
//! interrupt context. Delivery honors the global mask the same way a
//! hardware line would:
//!
//! - held off while interrupts are disabled or a thread is in a critical
//!   section
//! - one interrupt in service at a time (no nesting)
//!
//! Inside the routine [`in_interrupt`](super::thread::in_interrupt) is true,
//! so blocking APIs assert and the `*_from_isr` variants are the ones to use.
//!
//! # Usage
//! ```
//! use ksync::ke::interrupt;
//!
//! let mut woken = false;
//! let handled = interrupt::raise(|| {
//!     // ... acknowledge device, defer the rest ...
//!     woken = true;
//!     7
//! });
//! assert_eq!(handled, 7);
//! assert!(woken);
//! ```

use super::critical;
use super::thread::{self, ContextFlags};

/// Restores the pre-interrupt context even if the routine panics
struct IsrFrame {
    saved: ContextFlags,
}

impl Drop for IsrFrame {
    fn drop(&mut self) {
        thread::restore_context(self.saved);
        critical::end_isr();
    }
}

/// Run `routine` as an interrupt service routine on the calling thread
///
/// Waits until interrupts are unmasked and no other interrupt is in
/// service, then runs the routine in interrupt context.
pub fn raise<R, F>(routine: F) -> R
where
    F: FnOnce() -> R,
{
    debug_assert!(!thread::in_interrupt(), "nested interrupt");
    critical::begin_isr();
    let _frame = IsrFrame {
        saved: thread::set_context(ContextFlags::INTERRUPT, true),
    };
    log::trace!("ksync: interrupt entry");
    routine()
}
