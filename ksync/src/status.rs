//! Status codes
//!
//! Every fallible construction in the crate reports through [`SyncError`].
//! Per-call failures on hot paths (lock timeouts, ISR dispatch) are plain
//! `bool` results so callers are never forced into error plumbing there.

use core::fmt;

use crate::ke::pool::ObjectType;

/// Coordination layer error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    /// A kernel object (mutex, semaphore, timer, thread) could not be created
    ResourceExhausted(ObjectType),
    /// A bounded wait elapsed before the operation could complete
    TimedOut,
    /// A work item or deferred call could not be accepted
    EnqueueFailed,
    /// An argument was out of range (zero period, zero maximum count, ...)
    InvalidParameter,
    /// The target queue or service is being torn down
    ShuttingDown,
}

impl SyncError {
    /// Short name, suitable for log lines
    pub const fn as_str(&self) -> &'static str {
        match self {
            SyncError::ResourceExhausted(_) => "resource exhausted",
            SyncError::TimedOut => "timed out",
            SyncError::EnqueueFailed => "enqueue failed",
            SyncError::InvalidParameter => "invalid parameter",
            SyncError::ShuttingDown => "shutting down",
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::ResourceExhausted(ty) => {
                write!(f, "{}: cannot create {}", self.as_str(), ty.as_str())
            }
            _ => f.write_str(self.as_str()),
        }
    }
}

impl std::error::Error for SyncError {}

/// Result alias used throughout the crate
pub type SyncResult<T> = Result<T, SyncError>;
