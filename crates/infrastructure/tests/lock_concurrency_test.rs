use std::sync::Arc;

use chrono::Duration;
use orchestrator_domain::{LockType, ResourceKey};
use orchestrator_infrastructure::{AuditTrail, MetricsCollector, ResourceLockManager};
use uuid::Uuid;

fn manager() -> Arc<ResourceLockManager> {
    Arc::new(ResourceLockManager::new(
        AuditTrail::tracing(),
        Arc::new(MetricsCollector::new()),
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_exclusive_acquire_has_single_winner() {
    for _ in 0..20 {
        let manager = manager();
        let key = ResourceKey::new("table", "orders");
        let barrier = Arc::new(tokio::sync::Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let manager = manager.clone();
                let key = key.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    manager
                        .acquire(&key, LockType::Exclusive, Uuid::new_v4(), Duration::seconds(30))
                        .is_ok()
                })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(manager.active_locks(&key).len(), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_shared_acquire_all_succeed() {
    let manager = manager();
    let key = ResourceKey::new("table", "customers");

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let manager = manager.clone();
            let key = key.clone();
            tokio::spawn(async move {
                manager
                    .acquire(&key, LockType::Shared, Uuid::new_v4(), Duration::seconds(30))
                    .is_ok()
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap());
    }
    assert_eq!(manager.active_locks(&key).len(), 10);
}

#[tokio::test]
async fn sweeper_task_stops_on_shutdown() {
    let manager = manager();
    let shutdown = tokio_util::sync::CancellationToken::new();
    let handle = manager
        .clone()
        .spawn_sweeper(std::time::Duration::from_millis(10), shutdown.clone());

    manager
        .acquire(
            &ResourceKey::new("file", "a.csv"),
            LockType::Exclusive,
            Uuid::new_v4(),
            Duration::milliseconds(1),
        )
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(manager.is_empty());

    shutdown.cancel();
    handle.await.unwrap();
}
