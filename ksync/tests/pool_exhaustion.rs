//! Object pool exhaustion
//!
//! Quotas are process-wide, so every scenario lives in one test.

use ksync::ex::rwlock::{create_read_write_lock, RwLockPolicy};
use ksync::ex::worker::{create_work_queue_ex, WorkQueueConfig, WorkQueue};
use ksync::ke::dpc::{DaemonConfig, DeferredCallService};
use ksync::ke::pool::{self, ObjectType};
use ksync::ke::semaphore::KSemaphore;
use ksync::{KMutex, SyncError, Tasklet, Timer};

#[test]
fn test_construction_reports_exhaustion() {
    // Mutexes
    pool::set_object_limit(ObjectType::Mutex, Some(0));
    assert_eq!(
        KMutex::new_standard().unwrap_err(),
        SyncError::ResourceExhausted(ObjectType::Mutex)
    );
    assert!(matches!(
        create_read_write_lock(RwLockPolicy::PreferReader),
        Err(SyncError::ResourceExhausted(ObjectType::Mutex))
    ));
    assert!(pool::pool_statistics(ObjectType::Mutex).failures >= 2);
    pool::set_object_limit(ObjectType::Mutex, None);

    // Semaphores: the writer lock's gates, the tasklet delete lock
    let service = DeferredCallService::new(DaemonConfig::default()).unwrap();
    pool::set_object_limit(ObjectType::Semaphore, Some(0));
    assert!(KSemaphore::new_binary().is_err());
    assert!(matches!(
        create_read_write_lock(RwLockPolicy::PreferWriter),
        Err(SyncError::ResourceExhausted(ObjectType::Semaphore))
    ));
    assert!(matches!(
        Tasklet::with_service(service.clone(), |_: u32| {}),
        Err(SyncError::ResourceExhausted(ObjectType::Semaphore))
    ));
    pool::set_object_limit(ObjectType::Semaphore, None);

    // Timers: a quota of one admits exactly one
    pool::set_object_limit(ObjectType::Timer, Some(1));
    let first = Timer::with_service(service.clone(), "first", 10, false, || {}).unwrap();
    assert!(matches!(
        Timer::with_service(service.clone(), "second", 10, false, || {}),
        Err(SyncError::ResourceExhausted(ObjectType::Timer))
    ));
    drop(first);
    let third = Timer::with_service(service.clone(), "third", 10, false, || {}).unwrap();
    drop(third);
    pool::set_object_limit(ObjectType::Timer, None);

    // Threads: work queue workers and deferred call daemons
    let in_use = pool::objects_in_use(ObjectType::Thread);
    pool::set_object_limit(ObjectType::Thread, Some(in_use));
    assert!(matches!(
        create_work_queue_ex("starved", 1024, 2),
        Err(SyncError::ResourceExhausted(ObjectType::Thread))
    ));
    assert!(matches!(
        WorkQueue::create(WorkQueueConfig::default()),
        Err(SyncError::ResourceExhausted(ObjectType::Thread))
    ));
    assert!(matches!(
        DeferredCallService::new(DaemonConfig::default()),
        Err(SyncError::ResourceExhausted(ObjectType::Thread))
    ));
    pool::set_object_limit(ObjectType::Thread, None);

    // Quotas lifted: construction works again
    assert!(KMutex::new_standard().is_ok());
    assert!(create_work_queue_ex("fed", 1024, 2).is_ok());
}
