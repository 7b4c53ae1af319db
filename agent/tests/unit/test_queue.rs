//! FIFO waiting on a held lock

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_test::{assert_pending, assert_ready_eq, task};

use scm_agent::lock::{AcquireFailurePolicy, AdvisoryFileLock, AsyncLockQueue, OperationLock};

fn policy() -> AcquireFailurePolicy {
    AcquireFailurePolicy::with_read_only_check(|| false)
}

fn advisory(path: &std::path::Path) -> Arc<dyn OperationLock> {
    Arc::new(AdvisoryFileLock::new("deployment", path, policy()))
}

async fn wait_for_pending(queue: &AsyncLockQueue, expected: usize) {
    for _ in 0..200 {
        if queue.pending() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {} waiters, found {}", expected, queue.pending());
}

#[tokio::test]
async fn test_free_lock_is_granted_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let queue = AsyncLockQueue::new(advisory(&dir.path().join("deployment.lock")));

    assert!(queue.lock_async("first").await);
    assert!(queue.lock().is_held());
    queue.release();
    assert!(!queue.lock().is_held());
}

#[tokio::test]
async fn test_waiters_are_granted_in_arrival_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("deployment.lock");
    let holder = advisory(&path);
    assert!(holder.lock("holder"));

    let queue = Arc::new(AsyncLockQueue::with_poll_interval(
        advisory(&path),
        Duration::from_millis(50),
    ));
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut tasks = Vec::new();
    for (i, name) in ["a", "b", "c"].into_iter().enumerate() {
        let waiter = queue.clone();
        let order = order.clone();
        tasks.push(tokio::spawn(async move {
            assert!(waiter.lock_async(name).await);
            order.lock().unwrap().push(name);
        }));
        wait_for_pending(&queue, i + 1).await;
    }

    holder.release();
    for expected in 1..=3 {
        for _ in 0..200 {
            if order.lock().unwrap().len() == expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(order.lock().unwrap().len(), expected);
        // The current owner hands over to the next waiter
        queue.release();
    }

    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_cancelled_waiter_gives_up_its_place() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("deployment.lock");
    let holder = advisory(&path);
    assert!(holder.lock("holder"));

    let queue = Arc::new(AsyncLockQueue::with_poll_interval(
        advisory(&path),
        Duration::from_millis(50),
    ));

    let cancelled = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.lock_async("cancelled").await })
    };
    wait_for_pending(&queue, 1).await;
    let waiting = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.lock_async("waiting").await })
    };
    wait_for_pending(&queue, 2).await;

    cancelled.abort();
    let _ = cancelled.await;
    assert_eq!(queue.pending(), 1);

    holder.release();
    let granted = tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .unwrap()
        .unwrap();
    assert!(granted);
    assert!(queue.lock().lock_info().is_some_and(|info| info.operation_name == "waiting"));
    queue.release();
}

#[tokio::test]
async fn test_guard_releases_on_drop() {
    let dir = tempfile::tempdir().unwrap();
    let queue = AsyncLockQueue::new(advisory(&dir.path().join("deployment.lock")));

    {
        let _guard = queue.acquire("guarded").await.unwrap();
        assert!(queue.lock().is_held());
    }
    assert!(!queue.lock().is_held());
}

#[tokio::test]
async fn test_waiter_stays_pending_while_held() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("deployment.lock");
    let holder = advisory(&path);
    assert!(holder.lock("holder"));

    let queue = AsyncLockQueue::with_poll_interval(advisory(&path), Duration::from_millis(20));
    let mut waiter = task::spawn(queue.lock_async("waiter"));

    assert_pending!(waiter.poll());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_pending!(waiter.poll());

    holder.release();
    for _ in 0..250 {
        if waiter.is_woken() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(waiter.is_woken());
    assert_ready_eq!(waiter.poll(), true);
    queue.release();
}
