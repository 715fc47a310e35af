//! Property-based tests for tollgate-storage

use proptest::prelude::*;
use std::collections::HashMap;
use tollgate_storage::backends::memory::MemoryStorage;
use tollgate_storage::{SortedSetMember, SortedSetStorage, Storage};
use tokio::runtime::Runtime;

/// Create a runtime for tests
fn create_runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to create runtime")
}

/// Operations we can perform on storage
#[derive(Debug, Clone)]
enum CounterOp {
    IncrementBy(u8, i32),
    Delete(u8),
}

/// Strategy for generating counter operations over a handful of keys
fn operation_strategy() -> impl Strategy<Value = CounterOp> {
    prop_oneof![
        4 => (0u8..4, -1000i32..1000).prop_map(|(k, n)| CounterOp::IncrementBy(k, n)),
        1 => (0u8..4).prop_map(CounterOp::Delete),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // Property: counters behave like a plain map of integers
    #[test]
    fn test_counters_match_model(ops in prop::collection::vec(operation_strategy(), 1..100)) {
        let runtime = create_runtime();
        runtime.block_on(async {
            let storage = MemoryStorage::default();
            let mut model: HashMap<String, i64> = HashMap::new();

            for op in ops {
                match op {
                    CounterOp::IncrementBy(k, n) => {
                        let key = format!("counter:{k}");
                        let got = storage.increment_by(&key, i64::from(n)).await.unwrap();
                        let expected = model.entry(key).or_insert(0);
                        *expected += i64::from(n);
                        assert_eq!(got, *expected);
                    }
                    CounterOp::Delete(k) => {
                        let key = format!("counter:{k}");
                        storage.delete(&key).await.unwrap();
                        model.remove(&key);
                    }
                }
            }

            for (key, value) in model {
                assert_eq!(storage.get(&key).await.unwrap(), Some(value.to_string()));
            }
        });
    }

    // Property: range queries see members in score order and removal is exact
    #[test]
    fn test_sorted_set_ranges(
        scores in prop::collection::vec(-1000i32..1000, 0..50),
        cut in -1000i32..1000,
    ) {
        let runtime = create_runtime();
        runtime.block_on(async {
            let storage = MemoryStorage::default();
            let members: Vec<SortedSetMember> = scores
                .iter()
                .enumerate()
                .map(|(i, s)| SortedSetMember::new(f64::from(*s), format!("m{i}")))
                .collect();
            storage.zadd("z", &members).await.unwrap();

            let all = storage
                .zrange_by_score("z", f64::NEG_INFINITY, f64::INFINITY)
                .await
                .unwrap();
            assert_eq!(all.len(), scores.len());
            assert!(all.windows(2).all(|w| w[0].score <= w[1].score));

            let below = scores.iter().filter(|s| **s <= cut).count() as u64;
            let removed = storage
                .zrem_range_by_score("z", f64::NEG_INFINITY, f64::from(cut))
                .await
                .unwrap();
            assert_eq!(removed, below);
            assert_eq!(storage.zcard("z").await.unwrap(), scores.len() as u64 - below);
        });
    }
}
