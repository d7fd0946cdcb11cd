//! # Source Health
//!
//! Per-source state machine deciding whether a feed may be fetched:
//!
//! - failures below the threshold keep the source fetchable (`Degraded` label),
//! - the threshold-th consecutive failure puts it in `Cooldown` for a fixed window,
//! - an elapsed cooldown reads as `Healthy` again,
//! - any success resets the failure streak and forces `Healthy`.
//!
//! All state sits behind a single mutex so concurrent fetch workers never lose
//! an update.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::model::{HealthSnapshot, HealthState, Source, SourceHealth, SourceId};

const MAX_ERROR_LEN: usize = 512;

#[derive(Debug, Clone, Copy)]
pub struct HealthPolicy {
    pub failure_threshold: u32,
    pub cooldown: Duration,
    /// Smoothing factor for the latency average, in `(0, 1]`.
    pub latency_alpha: f64,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::minutes(180),
            latency_alpha: 0.30,
        }
    }
}

#[derive(Debug)]
pub struct SourceHealthTracker {
    policy: HealthPolicy,
    inner: Mutex<HashMap<SourceId, SourceHealth>>,
}

impl SourceHealthTracker {
    pub fn new(policy: HealthPolicy) -> Self {
        let policy = HealthPolicy {
            failure_threshold: policy.failure_threshold.max(1),
            latency_alpha: if policy.latency_alpha > 0.0 && policy.latency_alpha <= 1.0 {
                policy.latency_alpha
            } else {
                HealthPolicy::default().latency_alpha
            },
            ..policy
        };
        Self {
            policy,
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> HealthPolicy {
        self.policy
    }

    /// Load persisted health for the given sources (repository is the source of truth
    /// at the start of a run).
    pub fn seed(&self, sources: &[Source]) {
        let mut guard = self.inner.lock();
        for s in sources {
            guard.insert(s.id.clone(), s.health.clone());
        }
    }

    pub fn record_success(
        &self,
        source_id: &str,
        now: DateTime<Utc>,
        latency: Option<std::time::Duration>,
    ) -> SourceHealth {
        let mut guard = self.inner.lock();
        let h = guard.entry(source_id.to_string()).or_default();
        h.consecutive_failures = 0;
        h.state = HealthState::Healthy;
        h.cooldown_until = None;
        h.last_success_at = Some(now);
        h.last_error = None;
        if let Some(lat) = latency {
            let ms = lat.as_secs_f64() * 1_000.0;
            h.avg_latency_ms = Some(match h.avg_latency_ms {
                Some(prev) => self.policy.latency_alpha * ms + (1.0 - self.policy.latency_alpha) * prev,
                None => ms,
            });
        }
        h.clone()
    }

    pub fn record_failure(&self, source_id: &str, now: DateTime<Utc>, error: &str) -> SourceHealth {
        let mut guard = self.inner.lock();
        let h = guard.entry(source_id.to_string()).or_default();
        h.consecutive_failures = h.consecutive_failures.saturating_add(1);
        h.total_failures = h.total_failures.saturating_add(1);
        h.last_failure_at = Some(now);
        h.last_error = Some(error.chars().take(MAX_ERROR_LEN).collect());

        if h.consecutive_failures >= self.policy.failure_threshold {
            h.state = HealthState::Cooldown;
            h.cooldown_until = Some(now + self.policy.cooldown);
            tracing::warn!(
                target: "health",
                source = source_id,
                failures = h.consecutive_failures,
                until = ?h.cooldown_until,
                "source entered cooldown"
            );
        } else {
            h.state = HealthState::Degraded;
        }
        h.clone()
    }

    /// Unknown sources are fetchable. An elapsed cooldown is cleared here.
    pub fn is_fetchable(&self, source_id: &str, now: DateTime<Utc>) -> bool {
        let mut guard = self.inner.lock();
        match guard.get_mut(source_id) {
            None => true,
            Some(h) => {
                expire_cooldown(h, now);
                h.state != HealthState::Cooldown
            }
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> HealthSnapshot {
        let mut guard = self.inner.lock();
        let mut snap = HealthSnapshot::default();
        for h in guard.values_mut() {
            expire_cooldown(h, now);
            match h.state {
                HealthState::Healthy => snap.healthy += 1,
                HealthState::Degraded => snap.degraded += 1,
                HealthState::Cooldown => snap.cooldown += 1,
            }
        }
        snap
    }

    pub fn health_of(&self, source_id: &str) -> Option<SourceHealth> {
        self.inner.lock().get(source_id).cloned()
    }

    /// Copy tracked health onto a source record before it is persisted.
    pub fn apply_to(&self, source: &mut Source) {
        if let Some(h) = self.health_of(&source.id) {
            source.health = h;
        }
    }
}

fn expire_cooldown(h: &mut SourceHealth, now: DateTime<Utc>) {
    if h.state != HealthState::Cooldown {
        return;
    }
    let elapsed = h.cooldown_until.map(|until| until <= now).unwrap_or(true);
    if elapsed {
        h.state = HealthState::Healthy;
        h.consecutive_failures = 0;
        h.cooldown_until = None;
    }
}
