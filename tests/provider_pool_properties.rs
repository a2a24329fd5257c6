//! Property-based tests backing invariants 3 and 4 of the testable
//! properties: usedRequests/usedTokens never exceed window limits, and
//! inFlight never exceeds maxConcurrent.

use chrono::Utc;
use conclave::services::provider_pool::{ProviderConfig, ProviderPool};
use proptest::prelude::*;

proptest! {
    #[test]
    fn admission_never_exceeds_request_limit(
        requests_per_window in 1u64..20,
        attempts in 1usize..40,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let admitted = rt.block_on(async {
            let pool = ProviderPool::new();
            pool.configure(
                "p1",
                ProviderConfig {
                    requests_per_window,
                    tokens_per_window: 1_000_000,
                    max_concurrent: requests_per_window as u32,
                    queue_capacity: 0,
                    ..ProviderConfig::default()
                },
                Utc::now(),
            )
            .await;

            let mut admitted = 0u64;
            for _ in 0..attempts {
                let result = pool
                    .submit("p1", 1, Utc::now() + chrono::Duration::seconds(30), Utc::now())
                    .await;
                if result.is_ok() {
                    admitted += 1;
                }
            }
            admitted
        });
        prop_assert!(admitted <= requests_per_window);
    }

    #[test]
    fn in_flight_never_exceeds_max_concurrent(
        max_concurrent in 1u32..10,
        attempts in 1usize..30,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let max_observed = rt.block_on(async {
            let pool = ProviderPool::new();
            pool.configure(
                "p1",
                ProviderConfig {
                    requests_per_window: 1_000_000,
                    tokens_per_window: 1_000_000,
                    max_concurrent,
                    queue_capacity: 0,
                    ..ProviderConfig::default()
                },
                Utc::now(),
            )
            .await;

            let mut max_observed = 0u32;
            for _ in 0..attempts {
                let _ = pool
                    .submit("p1", 1, Utc::now() + chrono::Duration::seconds(30), Utc::now())
                    .await;
                let stats = pool.stats("p1").await.unwrap();
                max_observed = max_observed.max(stats.in_flight);
            }
            max_observed
        });
        prop_assert!(max_observed <= max_concurrent);
    }
}
