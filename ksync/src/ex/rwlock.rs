//! Reader/Writer Locks
//!
//! Any number of readers or one writer may hold the lock. Two fairness
//! policies are available, chosen at construction:
//!
//! - **PreferReader**: a waiting writer does not hold back new readers, so a
//!   steady stream of readers can starve writers
//! - **PreferWriter**: once a writer is waiting or active, new readers queue
//!   up behind it until every writer has left
//!
//! Both are built from the same pieces: a read count guarded by a mutex, and
//! a binary semaphore that gates exclusive access. The gate is a semaphore
//! because the reader that closes it is not necessarily the one that opens
//! it again. PreferWriter adds a write count and a second gate that blocks
//! new readers.
//!
//! # Usage
//! ```
//! use ksync::ex::rwlock::{create_read_write_lock, ReadGuard, RwLockPolicy, WriteGuard};
//!
//! let lock = create_read_write_lock(RwLockPolicy::PreferWriter).unwrap();
//!
//! {
//!     let _read = ReadGuard::new(&*lock);
//!     // ... shared access ...
//! }
//! {
//!     let _write = WriteGuard::new(&*lock);
//!     // ... exclusive access ...
//! }
//! ```

use core::sync::atomic::{AtomicU32, Ordering};

use crate::ke::mutex::{KMutex, LockGuard};
use crate::ke::semaphore::KSemaphore;
use crate::ke::tick::MAX_DELAY;
use crate::status::SyncResult;

/// Fairness policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RwLockPolicy {
    PreferReader,
    PreferWriter,
}

/// Reader/writer lock operations
///
/// All four block until they succeed. Unlocks must be made by a thread
/// that holds the matching lock.
pub trait ReaderWriterLock: Send + Sync {
    fn reader_lock(&self);
    fn reader_unlock(&self);
    fn writer_lock(&self);
    fn writer_unlock(&self);

    fn policy(&self) -> RwLockPolicy;

    /// Readers currently inside
    fn read_count(&self) -> u32;
}

/// Create a lock with the given policy
///
/// # Errors
/// `ResourceExhausted` if an internal mutex or semaphore cannot be created.
pub fn create_read_write_lock(policy: RwLockPolicy) -> SyncResult<Box<dyn ReaderWriterLock>> {
    let lock: Box<dyn ReaderWriterLock> = match policy {
        RwLockPolicy::PreferReader => Box::new(PreferReader::new()?),
        RwLockPolicy::PreferWriter => Box::new(PreferWriter::new()?),
    };
    log::debug!("ksync: reader/writer lock created ({:?})", policy);
    Ok(lock)
}

/// Binary semaphore created in the given (open) state
fn open_gate() -> SyncResult<KSemaphore> {
    let gate = KSemaphore::new_binary()?;
    gate.give();
    Ok(gate)
}

/// Read count plus the exclusive-access gate
#[derive(Debug)]
struct ReadSide {
    /// Only modified under `read_lock`
    read_count: AtomicU32,
    read_lock: KMutex,
    /// Closed while readers are inside or a writer holds the lock
    resource_lock: KSemaphore,
}

impl ReadSide {
    fn new() -> SyncResult<Self> {
        Ok(Self {
            read_count: AtomicU32::new(0),
            read_lock: KMutex::new_standard()?,
            resource_lock: open_gate()?,
        })
    }

    fn enter(&self) {
        let _guard = LockGuard::new(&self.read_lock);
        let readers = self.read_count.load(Ordering::Relaxed) + 1;
        self.read_count.store(readers, Ordering::Release);

        // First reader in closes the gate on writers
        if readers == 1 {
            self.resource_lock.take(MAX_DELAY);
        }
    }

    fn leave(&self) {
        let _guard = LockGuard::new(&self.read_lock);
        let readers = self.read_count.load(Ordering::Relaxed);
        debug_assert!(readers > 0, "reader_unlock without reader_lock");
        if readers == 0 {
            return;
        }
        self.read_count.store(readers - 1, Ordering::Release);

        // Last reader out reopens it
        if readers == 1 {
            self.resource_lock.give();
        }
    }
}

/// Reader-preferring lock
#[derive(Debug)]
pub struct PreferReader {
    reads: ReadSide,
}

impl PreferReader {
    pub fn new() -> SyncResult<Self> {
        Ok(Self {
            reads: ReadSide::new()?,
        })
    }
}

impl ReaderWriterLock for PreferReader {
    fn reader_lock(&self) {
        self.reads.enter();
    }

    fn reader_unlock(&self) {
        self.reads.leave();
    }

    fn writer_lock(&self) {
        self.reads.resource_lock.take(MAX_DELAY);
    }

    fn writer_unlock(&self) {
        self.reads.resource_lock.give();
    }

    fn policy(&self) -> RwLockPolicy {
        RwLockPolicy::PreferReader
    }

    fn read_count(&self) -> u32 {
        self.reads.read_count.load(Ordering::Acquire)
    }
}

/// Writer-preferring lock
#[derive(Debug)]
pub struct PreferWriter {
    reads: ReadSide,
    /// Writers waiting or inside; only modified under `write_lock`
    write_count: AtomicU32,
    write_lock: KMutex,
    /// Closed while any writer is waiting or inside
    block_readers_lock: KSemaphore,
}

impl PreferWriter {
    pub fn new() -> SyncResult<Self> {
        Ok(Self {
            reads: ReadSide::new()?,
            write_count: AtomicU32::new(0),
            write_lock: KMutex::new_standard()?,
            block_readers_lock: open_gate()?,
        })
    }

    /// Writers currently waiting or inside
    pub fn write_count(&self) -> u32 {
        self.write_count.load(Ordering::Acquire)
    }
}

impl ReaderWriterLock for PreferWriter {
    fn reader_lock(&self) {
        self.block_readers_lock.take(MAX_DELAY);
        self.reads.enter();
        self.block_readers_lock.give();
    }

    fn reader_unlock(&self) {
        self.reads.leave();
    }

    fn writer_lock(&self) {
        {
            let _guard = LockGuard::new(&self.write_lock);
            let writers = self.write_count.load(Ordering::Relaxed) + 1;
            self.write_count.store(writers, Ordering::Release);

            // First writer holds back new readers
            if writers == 1 {
                self.block_readers_lock.take(MAX_DELAY);
            }
        }
        self.reads.resource_lock.take(MAX_DELAY);
    }

    fn writer_unlock(&self) {
        // Readers stay blocked until the write count is back to zero, so the
        // gap between these two steps only admits another writer.
        self.reads.resource_lock.give();

        let _guard = LockGuard::new(&self.write_lock);
        let writers = self.write_count.load(Ordering::Relaxed);
        debug_assert!(writers > 0, "writer_unlock without writer_lock");
        if writers == 0 {
            return;
        }
        self.write_count.store(writers - 1, Ordering::Release);
        if writers == 1 {
            self.block_readers_lock.give();
        }
    }

    fn policy(&self) -> RwLockPolicy {
        RwLockPolicy::PreferWriter
    }

    fn read_count(&self) -> u32 {
        self.reads.read_count.load(Ordering::Acquire)
    }
}

/// RAII guard for shared access
#[must_use = "the read lock is released when the guard is dropped"]
pub struct ReadGuard<'a, L: ReaderWriterLock + ?Sized> {
    lock: &'a L,
}

impl<'a, L: ReaderWriterLock + ?Sized> ReadGuard<'a, L> {
    pub fn new(lock: &'a L) -> Self {
        lock.reader_lock();
        Self { lock }
    }
}

impl<'a, L: ReaderWriterLock + ?Sized> Drop for ReadGuard<'a, L> {
    fn drop(&mut self) {
        self.lock.reader_unlock();
    }
}

/// RAII guard for exclusive access
#[must_use = "the write lock is released when the guard is dropped"]
pub struct WriteGuard<'a, L: ReaderWriterLock + ?Sized> {
    lock: &'a L,
}

impl<'a, L: ReaderWriterLock + ?Sized> WriteGuard<'a, L> {
    pub fn new(lock: &'a L) -> Self {
        lock.writer_lock();
        Self { lock }
    }
}

impl<'a, L: ReaderWriterLock + ?Sized> Drop for WriteGuard<'a, L> {
    fn drop(&mut self) {
        self.lock.writer_unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicI32};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    const POLICIES: [RwLockPolicy; 2] = [RwLockPolicy::PreferReader, RwLockPolicy::PreferWriter];

    fn shared(policy: RwLockPolicy) -> Arc<dyn ReaderWriterLock> {
        Arc::from(create_read_write_lock(policy).unwrap())
    }

    #[test]
    fn test_policy_selection() {
        for policy in POLICIES {
            let lock = create_read_write_lock(policy).unwrap();
            assert_eq!(lock.policy(), policy);
            assert_eq!(lock.read_count(), 0);
        }
    }

    #[test]
    fn test_writer_waits_for_all_readers() {
        for policy in POLICIES {
            let lock = shared(policy);
            lock.reader_lock();
            lock.reader_lock();
            assert_eq!(lock.read_count(), 2);

            let written = Arc::new(AtomicBool::new(false));
            let writer = {
                let (lock, written) = (Arc::clone(&lock), Arc::clone(&written));
                thread::spawn(move || {
                    let _guard = WriteGuard::new(&*lock);
                    written.store(true, Ordering::SeqCst);
                })
            };

            thread::sleep(Duration::from_millis(20));
            lock.reader_unlock();
            thread::sleep(Duration::from_millis(20));
            assert!(!written.load(Ordering::SeqCst));

            lock.reader_unlock();
            writer.join().unwrap();
            assert!(written.load(Ordering::SeqCst));
            assert_eq!(lock.read_count(), 0);
        }
    }

    #[test]
    fn test_prefer_writer_blocks_late_reader() {
        let lock = Arc::new(PreferWriter::new().unwrap());
        let events = Arc::new(Mutex::new(Vec::new()));

        // reader1 inside
        lock.reader_lock();

        let writer = {
            let (lock, events) = (Arc::clone(&lock), Arc::clone(&events));
            thread::spawn(move || {
                lock.writer_lock();
                events.lock().unwrap().push("writer acquired");
                thread::sleep(Duration::from_millis(10));
                events.lock().unwrap().push("writer released");
                lock.writer_unlock();
            })
        };

        // Writer is waiting once it has closed the reader gate
        while lock.block_readers_lock.count() != 0 {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(lock.write_count(), 1);

        let reader2 = {
            let (lock, events) = (Arc::clone(&lock), Arc::clone(&events));
            thread::spawn(move || {
                let _guard = ReadGuard::new(&*lock);
                events.lock().unwrap().push("reader2 acquired");
            })
        };

        thread::sleep(Duration::from_millis(30));
        assert!(events.lock().unwrap().is_empty());
        lock.reader_unlock();

        writer.join().unwrap();
        reader2.join().unwrap();
        assert_eq!(
            *events.lock().unwrap(),
            vec!["writer acquired", "writer released", "reader2 acquired"]
        );
        assert_eq!(lock.read_count(), 0);
        assert_eq!(lock.write_count(), 0);
    }

    #[test]
    fn test_prefer_reader_admits_late_reader() {
        let lock = Arc::new(PreferReader::new().unwrap());
        lock.reader_lock();

        let writer = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                let _guard = WriteGuard::new(&*lock);
            })
        };
        thread::sleep(Duration::from_millis(20));

        // A waiting writer does not stop another reader
        let reader2 = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                let _guard = ReadGuard::new(&*lock);
            })
        };
        reader2.join().unwrap();
        assert!(!writer.is_finished());

        lock.reader_unlock();
        writer.join().unwrap();
    }

    #[test]
    fn test_read_count_returns_to_zero() {
        for policy in POLICIES {
            let lock = shared(policy);
            let readers: Vec<_> = (0..8)
                .map(|_| {
                    let lock = Arc::clone(&lock);
                    thread::spawn(move || {
                        for _ in 0..50 {
                            let _guard = ReadGuard::new(&*lock);
                            assert!(lock.read_count() >= 1);
                        }
                    })
                })
                .collect();

            for reader in readers {
                reader.join().unwrap();
            }
            assert_eq!(lock.read_count(), 0);
        }
    }

    /// Readers and writers never overlap, and writers never overlap each
    /// other, including across the writer release sequence.
    #[test]
    fn test_mixed_stress_is_exclusive() {
        for policy in POLICIES {
            let lock = shared(policy);
            let readers_inside = Arc::new(AtomicI32::new(0));
            let writers_inside = Arc::new(AtomicI32::new(0));
            let mut threads = Vec::new();

            for _ in 0..4 {
                let (lock, readers_inside, writers_inside) =
                    (Arc::clone(&lock), Arc::clone(&readers_inside), Arc::clone(&writers_inside));
                threads.push(thread::spawn(move || {
                    for _ in 0..300 {
                        let _guard = ReadGuard::new(&*lock);
                        readers_inside.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(writers_inside.load(Ordering::SeqCst), 0);
                        thread::yield_now();
                        readers_inside.fetch_sub(1, Ordering::SeqCst);
                    }
                }));
            }

            for _ in 0..3 {
                let (lock, readers_inside, writers_inside) =
                    (Arc::clone(&lock), Arc::clone(&readers_inside), Arc::clone(&writers_inside));
                threads.push(thread::spawn(move || {
                    for _ in 0..200 {
                        let _guard = WriteGuard::new(&*lock);
                        assert_eq!(writers_inside.fetch_add(1, Ordering::SeqCst), 0);
                        assert_eq!(readers_inside.load(Ordering::SeqCst), 0);
                        thread::yield_now();
                        writers_inside.fetch_sub(1, Ordering::SeqCst);
                    }
                }));
            }

            for handle in threads {
                handle.join().unwrap();
            }
            assert_eq!(lock.read_count(), 0);
        }
    }
}
