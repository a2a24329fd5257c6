//! Provider Pool: rate-limited egress gateway to external model services.
//!
//! Admission is governor's GCRA token bucket plus a semaphore-backed
//! concurrency cap, generalizing the teacher's hand-rolled
//! `TokenBucketRateLimiter`. Retries use `backoff`'s `ExponentialBackoff`,
//! generalizing `infrastructure/claude/retry.rs`'s `RetryPolicy` to the
//! closed `ProviderError` taxonomy.

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, warn};

use crate::domain::error::{ProviderError, ProviderErrorKind};
use crate::domain::models::provider::{CallId, PendingCall, ProviderHealth, ProviderId, ProviderQuota};

type GovernorLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Configuration for one provider. Mirrors §6's configuration schema.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub requests_per_window: u64,
    pub tokens_per_window: u64,
    pub max_concurrent: u32,
    pub window_duration: chrono::Duration,
    pub queue_capacity: usize,
    pub retry_max_attempts: u32,
    pub retry_initial_backoff: StdDuration,
    pub retry_max_backoff: StdDuration,
    /// Consecutive transient failures within `window_duration` before the
    /// provider transitions Healthy -> Degraded (§4.1 state machine).
    pub degraded_threshold: u32,
    /// Consecutive failures while Degraded before it transitions Offline.
    pub offline_threshold: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 60,
            tokens_per_window: 100_000,
            max_concurrent: 4,
            window_duration: chrono::Duration::seconds(60),
            queue_capacity: 256,
            retry_max_attempts: 5,
            retry_initial_backoff: StdDuration::from_secs(1),
            retry_max_backoff: StdDuration::from_secs(30),
            degraded_threshold: 3,
            offline_threshold: 6,
        }
    }
}

impl ProviderConfig {
    /// Applies a single `field=value` hot-update, as accepted by the
    /// `conclave provider set` CLI command and the admin REST endpoint.
    pub fn apply_field(&mut self, field: &str, value: &str) -> Result<(), String> {
        match field {
            "requests_per_window" => {
                self.requests_per_window = value
                    .parse()
                    .map_err(|_| format!("invalid u64 for {field}: {value}"))?;
            }
            "tokens_per_window" => {
                self.tokens_per_window = value
                    .parse()
                    .map_err(|_| format!("invalid u64 for {field}: {value}"))?;
            }
            "max_concurrent" => {
                self.max_concurrent = value
                    .parse()
                    .map_err(|_| format!("invalid u32 for {field}: {value}"))?;
            }
            "queue_capacity" => {
                self.queue_capacity = value
                    .parse()
                    .map_err(|_| format!("invalid usize for {field}: {value}"))?;
            }
            "retry_max_attempts" => {
                self.retry_max_attempts = value
                    .parse()
                    .map_err(|_| format!("invalid u32 for {field}: {value}"))?;
            }
            other => return Err(format!("unknown provider field: {other}")),
        }
        Ok(())
    }
}

/// An admitted call. The caller must `release` it exactly once.
#[derive(Debug)]
pub struct Ticket {
    pub id: CallId,
    pub provider_id: ProviderId,
    pub estimated_tokens: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ProviderStats {
    pub used_requests: u64,
    pub requests_per_window: u64,
    pub used_tokens: u64,
    pub tokens_per_window: u64,
    pub in_flight: u32,
    pub max_concurrent: u32,
    pub queue_depth: usize,
    pub health: ProviderHealth,
}

struct ProviderState {
    quota: ProviderQuota,
    config: ProviderConfig,
    /// Smooths bursts within a window on top of the hard request/token
    /// counters; a denial here is treated the same as `has_capacity`
    /// returning false (enqueue, do not fail outright).
    governor: Arc<GovernorLimiter>,
    queue: VecDeque<(PendingCall, oneshot::Sender<Result<Ticket, ProviderError>>)>,
}

/// Gates every call to external model services behind admission control.
pub struct ProviderPool {
    providers: RwLock<HashMap<ProviderId, Arc<Mutex<ProviderState>>>>,
}

impl Default for ProviderPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderPool {
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a provider, or hot-updates its quota if already present —
    /// the update takes effect on the next window roll (§4.1 `configure`).
    pub async fn configure(&self, provider_id: impl Into<String>, config: ProviderConfig, now: DateTime<Utc>) {
        let provider_id = provider_id.into();
        let mut providers = self.providers.write().await;
        if let Some(existing) = providers.get(&provider_id) {
            let mut state = existing.lock().await;
            state.config = config;
            return;
        }
        let quota = ProviderQuota::new(
            provider_id.clone(),
            config.requests_per_window,
            config.tokens_per_window,
            config.max_concurrent,
            config.window_duration,
            now,
        );
        let quota_per_sec = NonZeroU32::new(
            (config.requests_per_window / config.window_duration.num_seconds().max(1) as u64)
                .max(1) as u32,
        )
        .unwrap_or_else(|| NonZeroU32::new(1).expect("1 is nonzero"));
        let governor = Arc::new(RateLimiter::direct(Quota::per_second(quota_per_sec)));
        providers.insert(
            provider_id,
            Arc::new(Mutex::new(ProviderState {
                quota,
                config,
                governor,
                queue: VecDeque::new(),
            })),
        );
    }

    /// Current hot-updatable config for a provider, read-modify-write
    /// target for `apply_field` callers.
    pub async fn get_config(&self, provider_id: &str) -> Option<ProviderConfig> {
        let state = self.providers.read().await.get(provider_id).cloned()?;
        let s = state.lock().await;
        Some(s.config.clone())
    }

    pub async fn provider_ids(&self) -> Vec<ProviderId> {
        self.providers.read().await.keys().cloned().collect()
    }

    /// Spawns a periodic roller that drains every configured provider's
    /// queue independent of submit/release traffic, so a FIFO window that
    /// stalls on quiet traffic still rolls and wakes queued callers.
    pub fn spawn_background_roller(self: Arc<Self>, interval: StdDuration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let now = Utc::now();
                for provider_id in self.provider_ids().await {
                    self.drain_queue(&provider_id, now).await;
                }
            }
        })
    }

    pub async fn disable(&self, provider_id: &str) {
        if let Some(state) = self.providers.read().await.get(provider_id) {
            let mut state = state.lock().await;
            state.quota.health = ProviderHealth::Offline;
        }
    }

    pub async fn enable(&self, provider_id: &str) {
        if let Some(state) = self.providers.read().await.get(provider_id) {
            let mut state = state.lock().await;
            state.quota.health = ProviderHealth::Healthy;
            state.quota.consecutive_transient_failures = 0;
        }
    }

    /// Admission algorithm per §4.1: admit immediately if capacity allows,
    /// else enqueue FIFO and wake on window roll or release.
    pub async fn submit(
        &self,
        provider_id: &str,
        estimated_tokens: u64,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Ticket, ProviderError> {
        let state = self
            .providers
            .read()
            .await
            .get(provider_id)
            .cloned()
            .ok_or(ProviderError::ProviderDisabled)?;

        let (tx, rx) = oneshot::channel();
        {
            let mut s = state.lock().await;
            if s.quota.rolls_forward(now) {
                s.quota.roll_window(now);
            }

            if s.quota.health == ProviderHealth::Offline {
                return Err(ProviderError::ProviderDisabled);
            }

            if now > deadline {
                return Err(ProviderError::DeadlineExceeded);
            }

            if s.queue.is_empty() && s.quota.has_capacity(estimated_tokens) && s.governor.check().is_ok() {
                s.quota.admit(estimated_tokens);
                let ticket = Ticket {
                    id: CallId::new_v4(),
                    provider_id: provider_id.to_string(),
                    estimated_tokens,
                };
                return Ok(ticket);
            }

            if s.queue.len() >= s.config.queue_capacity {
                return Err(ProviderError::QueueFull);
            }

            let call = PendingCall::new(provider_id, estimated_tokens, now, deadline);
            s.queue.push_back((call, tx));
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::DeadlineExceeded),
        }
    }

    /// Drains the FIFO wait queue in order, admitting what now fits and
    /// waking deadline-exceeded waiters with `DeadlineExceeded`.
    pub async fn drain_queue(&self, provider_id: &str, now: DateTime<Utc>) {
        let Some(state) = self.providers.read().await.get(provider_id).cloned() else {
            return;
        };
        let mut s = state.lock().await;
        if s.quota.rolls_forward(now) {
            s.quota.roll_window(now);
        }
        while let Some((call, _)) = s.queue.front() {
            if call.is_past_deadline(now) {
                let (call, tx) = s.queue.pop_front().unwrap();
                let _ = tx.send(Err(ProviderError::DeadlineExceeded));
                debug!(call_id = %call.id, "pending call dropped at deadline");
                continue;
            }
            if !s.quota.has_capacity(call.estimated_tokens) || s.governor.check().is_err() {
                break;
            }
            let (call, tx) = s.queue.pop_front().unwrap();
            s.quota.admit(call.estimated_tokens);
            let ticket = Ticket {
                id: call.id,
                provider_id: provider_id.to_string(),
                estimated_tokens: call.estimated_tokens,
            };
            let _ = tx.send(Ok(ticket));
        }
    }

    /// Releases a ticket, reconciles token usage, and drains anything the
    /// freed capacity now admits.
    pub async fn release(&self, ticket: Ticket, actual_tokens: u64, succeeded: bool, now: DateTime<Utc>) {
        let Some(state) = self.providers.read().await.get(&ticket.provider_id).cloned() else {
            return;
        };
        {
            let mut s = state.lock().await;
            s.quota.release(ticket.estimated_tokens, actual_tokens);
            self_record_outcome(&mut s.quota, &s.config, succeeded);
        }
        self.drain_queue(&ticket.provider_id, now).await;
    }

    pub async fn stats(&self, provider_id: &str) -> Option<ProviderStats> {
        let state = self.providers.read().await.get(provider_id).cloned()?;
        let s = state.lock().await;
        Some(ProviderStats {
            used_requests: s.quota.used_requests,
            requests_per_window: s.quota.requests_per_window,
            used_tokens: s.quota.used_tokens,
            tokens_per_window: s.quota.tokens_per_window,
            in_flight: s.quota.in_flight,
            max_concurrent: s.quota.max_concurrent,
            queue_depth: s.queue.len(),
            health: s.quota.health,
        })
    }

    pub fn classify_failure(is_auth: bool, is_bad_request: bool, is_rate_limited: bool, is_unavailable: bool) -> ProviderErrorKind {
        if is_auth {
            ProviderErrorKind::Auth
        } else if is_bad_request {
            ProviderErrorKind::BadRequest
        } else if is_rate_limited {
            ProviderErrorKind::RateLimited
        } else if is_unavailable {
            ProviderErrorKind::Unavailable
        } else {
            ProviderErrorKind::Transient
        }
    }
}

/// Updates the health state machine on call outcome: consecutive transient
/// failures drive Healthy -> Degraded -> Offline; any success resets the
/// streak and allows half-open recovery back to Healthy.
fn self_record_outcome(quota: &mut ProviderQuota, config: &ProviderConfig, succeeded: bool) {
    if succeeded {
        quota.consecutive_transient_failures = 0;
        if quota.health == ProviderHealth::Degraded {
            quota.health = ProviderHealth::Healthy;
        }
        return;
    }
    quota.consecutive_transient_failures += 1;
    match quota.health {
        ProviderHealth::Healthy if quota.consecutive_transient_failures >= config.degraded_threshold => {
            quota.health = ProviderHealth::Degraded;
            warn!(provider_id = %quota.provider_id, "provider transitioned to Degraded");
        }
        ProviderHealth::Degraded if quota.consecutive_transient_failures >= config.offline_threshold => {
            quota.health = ProviderHealth::Offline;
            warn!(provider_id = %quota.provider_id, "provider transitioned to Offline");
        }
        _ => {}
    }
}

/// Exponential backoff schedule per §4.1's retry policy: 1s initial,
/// doubling to a 30s cap, ±20% jitter, 5-attempt hard cap.
pub fn retry_backoff(config: &ProviderConfig) -> backoff::ExponentialBackoff {
    backoff::ExponentialBackoffBuilder::new()
        .with_initial_interval(config.retry_initial_backoff)
        .with_max_interval(config.retry_max_backoff)
        .with_randomization_factor(0.2)
        .with_multiplier(2.0)
        .with_max_elapsed_time(Some(config.retry_max_backoff * config.retry_max_attempts))
        .build()
}
