//! Integration tests for the workload ledger.

use std::sync::Arc;

use cityfix::model::*;
use cityfix::store::memory::MemoryStore;
use cityfix::store::{DepartmentDirectory, WorkloadLedger};
use uuid::Uuid;

async fn department(store: &MemoryStore, workload: i32) -> Department {
    store
        .create_department(
            NewDepartment::new("Parks", "parks@city.test")
                .category(Category::Graffiti)
                .initial_workload(workload),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn increment_and_decrement_return_new_workload() {
    let store = MemoryStore::new();
    let d = department(&store, 0).await;

    assert_eq!(store.increment(d.id, Uuid::new_v4()).await.unwrap(), 1);
    assert_eq!(store.increment(d.id, Uuid::new_v4()).await.unwrap(), 2);
    assert_eq!(store.decrement(d.id, Uuid::new_v4()).await.unwrap(), 1);
    assert_eq!(store.workload(d.id).await, Some(1));
}

#[tokio::test]
async fn decrement_at_zero_stays_zero() {
    let store = MemoryStore::new();
    let d = department(&store, 0).await;

    assert_eq!(store.decrement(d.id, Uuid::new_v4()).await.unwrap(), 0);
    assert_eq!(store.decrement(d.id, Uuid::new_v4()).await.unwrap(), 0);
    assert_eq!(store.workload(d.id).await, Some(0));
}

#[tokio::test]
async fn capacity_does_not_cap_workload() {
    let store = MemoryStore::new();
    let d = store
        .create_department(
            NewDepartment::new("Tiny", "tiny@city.test")
                .category(Category::Noise)
                .capacity(1),
        )
        .await
        .unwrap();

    for _ in 0..3 {
        store.increment(d.id, Uuid::new_v4()).await.unwrap();
    }
    assert_eq!(store.workload(d.id).await, Some(3));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_increments_are_not_lost() {
    const N: i32 = 200;
    let store = MemoryStore::new();
    let d = department(&store, 7).await;
    let ledger: Arc<dyn WorkloadLedger> = Arc::new(store.clone());

    let tasks: Vec<_> = (0..N)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.increment(d.id, Uuid::new_v4()).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(store.workload(d.id).await, Some(7 + N));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_decrements_never_go_negative() {
    let store = MemoryStore::new();
    let d = department(&store, 10).await;

    let tasks: Vec<_> = (0..50)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.decrement(d.id, Uuid::new_v4()).await })
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap().unwrap() >= 0);
    }

    assert_eq!(store.workload(d.id).await, Some(0));
}

#[tokio::test]
async fn redelivered_release_is_applied_once() {
    let store = MemoryStore::new();
    let d = department(&store, 3).await;
    let release = Uuid::new_v4();

    assert_eq!(store.decrement(d.id, release).await.unwrap(), 2);
    assert_eq!(store.decrement(d.id, release).await.unwrap(), 2);
    assert_eq!(store.workload(d.id).await, Some(2));
}
