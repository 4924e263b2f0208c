//! Flowguard Cache Queue Tests
//!
//! Behavioral properties of the atomic queue operations, exercised on the
//! in-memory implementation through the `QueueOperations` trait.

use std::collections::BTreeSet;
use std::sync::Arc;

use flowguard_cache::{MemoryQueue, QueueOperations, ReinsertOp};
use proptest::prelude::*;

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(future)
}

proptest! {
    /// Property: distinct numeric inserts leave the list strictly ascending
    #[test]
    fn prop_sorted_insert_keeps_ascending_order(
        values in prop::collection::btree_set(-10_000i64..10_000, 0..60)
            .prop_map(|set| set.into_iter().collect::<Vec<_>>())
            .prop_shuffle()
    ) {
        let queue = MemoryQueue::new();
        let list = block_on(async {
            for v in &values {
                queue.push_sorted("q", &v.to_string()).await.unwrap();
            }
            queue.range("q").await.unwrap()
        });

        let numbers: Vec<i64> = list.iter().map(|v| v.parse().unwrap()).collect();
        prop_assert_eq!(numbers.len(), values.len());
        prop_assert!(numbers.windows(2).all(|w| w[0] < w[1]));
    }

    /// Property: repeated dedup pushes of one value keep exactly one copy
    #[test]
    fn prop_push_if_absent_is_idempotent(
        others in prop::collection::vec("[a-z]{1,6}", 0..20),
        value in "[A-Z]{1,6}",
        repeats in 1usize..6
    ) {
        let queue = MemoryQueue::new();
        let list = block_on(async {
            for other in &others {
                queue.push_if_absent("q", other).await.unwrap();
            }
            for _ in 0..repeats {
                queue.push_if_absent("q", &value).await.unwrap();
            }
            queue.range("q").await.unwrap()
        });

        prop_assert_eq!(list.iter().filter(|v| **v == value).count(), 1);
        let unique: BTreeSet<&String> = list.iter().collect();
        prop_assert_eq!(unique.len(), list.len());
    }

    /// Property: a conditional pop only returns values with pending work,
    /// and repeated pops drain the list once no value has work
    #[test]
    fn prop_conditional_pop_respects_aux_lists(
        entries in prop::collection::btree_map("[a-z]{1,4}", any::<bool>(), 1..20)
    ) {
        let queue = MemoryQueue::new();
        block_on(async {
            for (value, has_work) in &entries {
                queue.push_head("primary", value).await.unwrap();
                if *has_work {
                    queue.push_head(&format!("work:{value}"), "job").await.unwrap();
                }
            }
        });

        let popped = block_on(queue.pop_if_present("primary", "work", "", ReinsertOp::PushHead))
            .unwrap();
        match popped {
            Some(value) => prop_assert!(entries[&value]),
            None => prop_assert!(entries.values().all(|has_work| !has_work)),
        }

        // Remove all work and the list drains
        let drained = block_on(async {
            for value in entries.keys() {
                while queue.len(&format!("work:{value}")).await.unwrap() > 0 {
                    queue
                        .pop_if_present(&format!("work:{value}"), "none", "", ReinsertOp::PushHead)
                        .await
                        .unwrap();
                }
            }
            let popped = queue
                .pop_if_present("primary", "work", "", ReinsertOp::PushHead)
                .await
                .unwrap();
            (popped, queue.len("primary").await.unwrap())
        });
        prop_assert_eq!(drained, (None, 0));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_push_if_absent_inserts_once() {
    let queue = Arc::new(MemoryQueue::new());

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push_if_absent("machines", "10.0.0.1").await.unwrap() })
        })
        .collect();

    let mut inserted = 0;
    for task in tasks {
        if task.await.unwrap() {
            inserted += 1;
        }
    }

    assert_eq!(inserted, 1);
    assert_eq!(queue.range("machines").await.unwrap(), vec!["10.0.0.1"]);
}

#[tokio::test]
async fn test_round_robin_reinsert_at_head() {
    let queue: Arc<dyn QueueOperations> = Arc::new(MemoryQueue::new());
    for machine in ["m1", "m2", "m3"] {
        queue.push_if_absent("machines", machine).await.unwrap();
        queue.push_head(&format!("tasks:{machine}:pending"), "t").await.unwrap();
    }
    // Head first: m3, m2, m1; pops come from the tail
    let mut order = Vec::new();
    for _ in 0..4 {
        let popped = queue
            .pop_if_present("machines", "tasks", ":pending", ReinsertOp::PushHead)
            .await
            .unwrap()
            .unwrap();
        order.push(popped);
    }
    assert_eq!(order, vec!["m1", "m2", "m3", "m1"]);
}

#[tokio::test]
async fn test_increment_with_expire_counts() {
    let queue = MemoryQueue::new();
    for expected in 1..=3 {
        assert_eq!(
            queue.increment_with_expire("login:10.0.0.1", 60).await.unwrap(),
            expected
        );
    }
}
