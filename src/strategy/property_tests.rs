//! Property-Based Tests for the Strategy Module

use std::collections::HashMap;
use std::sync::Arc;

use proptest::prelude::*;

use crate::backend::MemoryBackend;
use crate::client::CacheClient;
use crate::config::{CacheStrategy, StrategyConfig};
use crate::strategy::{batch_size, select_victims, AccessRecord, CacheOptions, StrategyManager};

// == Strategies ==
fn key_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9_]{1,12}"
}

#[derive(Debug, Clone)]
enum CacheOp {
    Set { key: String, value: i64 },
    Get { key: String },
    Delete { key: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (key_strategy(), any::<i64>()).prop_map(|(key, value)| CacheOp::Set { key, value }),
        key_strategy().prop_map(|key| CacheOp::Get { key }),
        key_strategy().prop_map(|key| CacheOp::Delete { key }),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn manager(strategy: CacheStrategy) -> StrategyManager<MemoryBackend> {
    let client = CacheClient::new(Arc::new(MemoryBackend::new()), "prop:");
    StrategyManager::new(client, StrategyConfig::new(strategy))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // Property 1: hits and misses match a model map for any operation sequence,
    // and every hit returns the last value written.
    #[test]
    fn prop_statistics_and_values_match_model(ops in prop::collection::vec(cache_op_strategy(), 1..40)) {
        let rt = runtime();
        let manager = manager(CacheStrategy::Lru);
        let mut model: HashMap<String, i64> = HashMap::new();
        let mut expected_hits = 0u64;
        let mut expected_misses = 0u64;

        rt.block_on(async {
            for op in ops {
                match op {
                    CacheOp::Set { key, value } => {
                        manager.set(&key, &value, &CacheOptions::default()).await.unwrap();
                        model.insert(key, value);
                    }
                    CacheOp::Get { key } => {
                        let got = manager.get::<i64>(&key).await;
                        assert_eq!(got, model.get(&key).copied());
                        if got.is_some() { expected_hits += 1 } else { expected_misses += 1 }
                    }
                    CacheOp::Delete { key } => {
                        manager.delete(&key).await.unwrap();
                        model.remove(&key);
                    }
                }
            }
        });

        let stats = rt.block_on(manager.statistics());
        prop_assert_eq!(stats.hits, expected_hits);
        prop_assert_eq!(stats.misses, expected_misses);
        prop_assert_eq!(stats.size, model.len() as u64);
    }

    // Property 2: victim selection takes exactly ceil(fraction * n) keys, all
    // scored no higher than any survivor.
    #[test]
    fn prop_victims_are_lowest_scored(
        scores in prop::collection::vec(0i64..1000, 1..60),
        fraction in 0.01f64..1.0,
    ) {
        let records: Vec<AccessRecord> = scores
            .iter()
            .enumerate()
            .map(|(i, s)| AccessRecord::new(format!("k{}", i), *s))
            .collect();
        let by_key: HashMap<String, i64> = records.iter().map(|r| (r.key.clone(), r.score)).collect();

        let victims = select_victims(records, fraction);
        prop_assert_eq!(victims.len(), batch_size(scores.len(), fraction));

        let max_victim = victims.iter().map(|k| by_key[k]).max().unwrap_or(i64::MIN);
        let survivors = by_key.iter().filter(|(k, _)| !victims.contains(*k));
        for (_, score) in survivors {
            prop_assert!(*score >= max_victim);
        }
    }

    // Property 3: with a size limit, the entry count never settles above
    // the limit after a write.
    #[test]
    fn prop_size_limit_holds_after_writes(count in 1usize..40, limit in 1usize..10) {
        let rt = runtime();
        let client = CacheClient::new(Arc::new(MemoryBackend::new()), "prop:");
        let manager = StrategyManager::new(
            client,
            StrategyConfig::new(CacheStrategy::Lru).with_max_size(limit),
        );

        rt.block_on(async {
            for i in 0..count {
                manager.set(&format!("k{}", i), &i, &CacheOptions::default()).await.unwrap();
            }
        });

        let stats = rt.block_on(manager.statistics());
        prop_assert!(stats.size <= limit as u64);
    }
}
