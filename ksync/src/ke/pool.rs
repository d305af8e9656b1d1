//! Kernel Object Pool
//!
//! Kernel objects are charged against a per-type quota when they are
//! created and credited back when they are destroyed. A charge that would
//! exceed the quota fails, which is how object creation reports
//! `ResourceExhausted` to the constructing caller.
//!
//! Quotas are unlimited by default. Limiting them models a kernel built with
//! a small static object heap.
//!
//! # Usage
//! ```
//! use ksync::ke::pool::{self, ObjectType};
//!
//! pool::set_object_limit(ObjectType::Timer, Some(8));
//! let stats = pool::pool_statistics(ObjectType::Timer);
//! assert!(stats.in_use <= 8);
//! ```

use spin::Mutex;

use crate::status::{SyncError, SyncResult};

/// Kind of kernel object charged against the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum ObjectType {
    Mutex = 0,
    Semaphore = 1,
    Timer = 2,
    Thread = 3,
}

const OBJECT_TYPE_COUNT: usize = 4;

impl ObjectType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Mutex => "mutex",
            ObjectType::Semaphore => "semaphore",
            ObjectType::Timer => "timer",
            ObjectType::Thread => "thread",
        }
    }
}

/// Per-type pool usage snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatistics {
    /// Objects currently alive
    pub in_use: usize,
    /// Highest `in_use` ever observed
    pub peak: usize,
    /// Charges refused because the quota was reached
    pub failures: u64,
}

struct PoolCounters {
    stats: [PoolStatistics; OBJECT_TYPE_COUNT],
    limits: [Option<usize>; OBJECT_TYPE_COUNT],
}

static POOL: Mutex<PoolCounters> = Mutex::new(PoolCounters {
    stats: [PoolStatistics { in_use: 0, peak: 0, failures: 0 }; OBJECT_TYPE_COUNT],
    limits: [None; OBJECT_TYPE_COUNT],
});

/// Set the quota for one object type (None = unlimited)
///
/// Lowering a quota below the current usage does not destroy anything; it
/// only makes further creations fail.
pub fn set_object_limit(ty: ObjectType, limit: Option<usize>) {
    POOL.lock().limits[ty as usize] = limit;
}

/// Current quota for an object type
pub fn object_limit(ty: ObjectType) -> Option<usize> {
    POOL.lock().limits[ty as usize]
}

/// Number of live objects of a type
pub fn objects_in_use(ty: ObjectType) -> usize {
    POOL.lock().stats[ty as usize].in_use
}

/// Usage snapshot for an object type
pub fn pool_statistics(ty: ObjectType) -> PoolStatistics {
    POOL.lock().stats[ty as usize]
}

/// Charge one object of `ty` against the pool
pub(crate) fn charge(ty: ObjectType) -> SyncResult<PoolCharge> {
    let mut pool = POOL.lock();
    let index = ty as usize;
    let limit = pool.limits[index];
    let stats = &mut pool.stats[index];

    if matches!(limit, Some(limit) if stats.in_use >= limit) {
        stats.failures += 1;
        drop(pool);
        log::warn!("ksync: {} pool exhausted", ty.as_str());
        return Err(SyncError::ResourceExhausted(ty));
    }

    stats.in_use += 1;
    stats.peak = stats.peak.max(stats.in_use);
    Ok(PoolCharge { ty })
}

/// Pool charge held by a live kernel object, credited back on drop
#[derive(Debug)]
pub(crate) struct PoolCharge {
    ty: ObjectType,
}

impl PoolCharge {
    #[cfg(test)]
    pub fn object_type(&self) -> ObjectType {
        self.ty
    }
}

impl Drop for PoolCharge {
    fn drop(&mut self) {
        let mut pool = POOL.lock();
        let stats = &mut pool.stats[self.ty as usize];
        debug_assert!(stats.in_use > 0, "pool charge underflow");
        stats.in_use = stats.in_use.saturating_sub(1);
    }
}
