use chrono::Utc;
use criterion::{criterion_group, criterion_main, Criterion};
use conclave::services::provider_pool::{ProviderConfig, ProviderPool};
use tokio::runtime::Runtime;

fn admission_benchmark(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime builds");
    let pool = rt.block_on(async {
        let pool = ProviderPool::new();
        pool.configure(
            "bench-provider",
            ProviderConfig {
                requests_per_window: 1_000_000,
                tokens_per_window: 1_000_000_000,
                max_concurrent: 10_000,
                ..ProviderConfig::default()
            },
            Utc::now(),
        )
        .await;
        pool
    });

    c.bench_function("provider_pool_submit_release", |b| {
        b.to_async(&rt).iter(|| async {
            let ticket = pool
                .submit("bench-provider", 10, Utc::now() + chrono::Duration::seconds(30), Utc::now())
                .await
                .expect("admission succeeds under generous quota");
            pool.release(ticket, 10, true, Utc::now()).await;
        });
    });
}

criterion_group!(benches, admission_benchmark);
criterion_main!(benches);
