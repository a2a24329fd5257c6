//! Provider Pool entities: quota windows, pending calls, and the
//! per-provider health state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ProviderId = String;
pub type CallId = Uuid;

/// Per-provider health, grounded in the teacher's circuit breaker states
/// (`Closed`/`Open`/`HalfOpen`) and renamed to the vocabulary of §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderHealth {
    Healthy,
    Degraded,
    Offline,
}

impl ProviderHealth {
    pub fn can_transition_to(self, next: ProviderHealth) -> bool {
        use ProviderHealth::{Degraded, Healthy, Offline};
        matches!(
            (self, next),
            (Healthy, Degraded) | (Degraded, Offline) | (Offline, Healthy) | (Degraded, Healthy)
        )
    }

    /// Degraded halves the provider's effective concurrency cap per §4.1.
    pub fn concurrency_factor(self) -> f64 {
        match self {
            Self::Healthy => 1.0,
            Self::Degraded => 0.5,
            Self::Offline => 0.0,
        }
    }
}

/// Rolling rate-limit window and counters for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderQuota {
    pub provider_id: ProviderId,
    pub requests_per_window: u64,
    pub tokens_per_window: u64,
    pub max_concurrent: u32,
    pub window_duration: chrono::Duration,
    pub window_start: DateTime<Utc>,
    pub used_requests: u64,
    pub used_tokens: u64,
    pub in_flight: u32,
    pub health: ProviderHealth,
    pub consecutive_transient_failures: u32,
}

impl ProviderQuota {
    pub fn new(
        provider_id: impl Into<String>,
        requests_per_window: u64,
        tokens_per_window: u64,
        max_concurrent: u32,
        window_duration: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            requests_per_window,
            tokens_per_window,
            max_concurrent,
            window_duration,
            window_start: now,
            used_requests: 0,
            used_tokens: 0,
            in_flight: 0,
            health: ProviderHealth::Healthy,
            consecutive_transient_failures: 0,
        }
    }

    /// Effective concurrency cap given current health (§4.1: Degraded halves
    /// it, Offline admits nothing but half-open probes).
    pub fn effective_max_concurrent(&self) -> u32 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let scaled = (f64::from(self.max_concurrent) * self.health.concurrency_factor()) as u32;
        scaled.max(if self.health == ProviderHealth::Healthy {
            1
        } else {
            scaled
        })
    }

    pub fn rolls_forward(&self, now: DateTime<Utc>) -> bool {
        now >= self.window_start + self.window_duration
    }

    /// Resets window counters on a wall-clock boundary roll (§4.1.4).
    pub fn roll_window(&mut self, now: DateTime<Utc>) {
        self.window_start = now;
        self.used_requests = 0;
        self.used_tokens = 0;
    }

    pub fn has_capacity(&self, estimated_tokens: u64) -> bool {
        self.in_flight < self.effective_max_concurrent()
            && self.used_requests + 1 <= self.requests_per_window
            && self.used_tokens + estimated_tokens <= self.tokens_per_window
    }

    /// Admits one call: caller must have already checked `has_capacity`.
    pub fn admit(&mut self, estimated_tokens: u64) {
        self.used_requests += 1;
        self.used_tokens += estimated_tokens;
        self.in_flight += 1;
    }

    /// Reconciles estimated vs. actual token usage on release, never
    /// underflowing below zero and never exceeding the window limit.
    pub fn release(&mut self, estimated_tokens: u64, actual_tokens: u64) {
        self.in_flight = self.in_flight.saturating_sub(1);
        let reconciled = self
            .used_tokens
            .saturating_sub(estimated_tokens)
            .saturating_add(actual_tokens);
        self.used_tokens = reconciled.min(self.tokens_per_window + actual_tokens);
    }
}

/// A queued or admitted call awaiting provider capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCall {
    pub id: CallId,
    pub provider_id: ProviderId,
    pub estimated_tokens: u64,
    pub enqueue_time: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub attempt: u32,
    pub backoff_until: Option<DateTime<Utc>>,
}

impl PendingCall {
    pub fn new(
        provider_id: impl Into<String>,
        estimated_tokens: u64,
        enqueue_time: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider_id: provider_id.into(),
            estimated_tokens,
            enqueue_time,
            deadline,
            attempt: 1,
            backoff_until: None,
        }
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }
}
