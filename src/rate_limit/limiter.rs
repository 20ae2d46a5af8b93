use crate::clock::Clock;
use crate::config::RateLimitConfig;
use crate::domain::{limiter::MAX_BLOCK_DURATION_SECONDS, LimiterKind, LimiterRecord};
use crate::observability::MetricsRecorder;
use crate::rate_limit::error::{RateLimitError, Result};
use crate::rate_limit::locks::KeyedLocks;
use crate::storage::LimiterStorage;
use async_trait::async_trait;
use chrono::Duration;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Conditional writes attempted before a decision gives up on a contended key
const MAX_SAVE_ATTEMPTS: usize = 5;

/// Admit/deny verdicts for a single identifier.
///
/// This is the seam the HTTP admission filter depends on. An `Err` must be
/// treated as a denial.
#[async_trait]
pub trait AdmissionControl: Send + Sync {
    async fn is_allowed(&self, identifier: &str, kind: LimiterKind) -> Result<bool>;
}

/// Budget for one limiter class
#[derive(Debug, Clone)]
pub struct KindPolicy {
    /// Requests admitted per window; the next one triggers the block
    pub limit: u64,
    /// Cooldown applied once the limit is exceeded
    pub block_duration: Duration,
    pub enabled: bool,
}

/// Independent budgets for IP- and token-keyed requests
#[derive(Debug, Clone)]
pub struct LimiterSettings {
    pub ip: KindPolicy,
    pub token: KindPolicy,
    /// Deadline applied to every storage call
    pub storage_timeout: std::time::Duration,
}

impl LimiterSettings {
    pub fn policy(&self, kind: LimiterKind) -> &KindPolicy {
        match kind {
            LimiterKind::Ip => &self.ip,
            LimiterKind::Token => &self.token,
        }
    }
}

impl From<&RateLimitConfig> for LimiterSettings {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            ip: KindPolicy {
                limit: config.ip_limit,
                block_duration: block_duration(config.ip_block_duration_seconds),
                enabled: config.enable_ip_limiter,
            },
            token: KindPolicy {
                limit: config.token_limit,
                block_duration: block_duration(config.token_block_duration_seconds),
                enabled: config.enable_token_limiter,
            },
            storage_timeout: std::time::Duration::from_millis(config.storage_timeout_ms),
        }
    }
}

/// Cooldown from configured seconds, capped at `MAX_BLOCK_DURATION_SECONDS`
fn block_duration(seconds: u64) -> Duration {
    Duration::seconds(seconds.min(MAX_BLOCK_DURATION_SECONDS) as i64)
}

/// Fixed-window counter with a block cooldown, one record per identifier.
///
/// The get/compute/save sequence for a key runs under a per-key lock, and the
/// final write is conditional on the stored state being the one that was read,
/// so concurrent requests for the same identifier cannot lose increments.
pub struct RateLimiter {
    storage: Arc<dyn LimiterStorage>,
    settings: LimiterSettings,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks,
}

impl RateLimiter {
    pub fn new(
        storage: Arc<dyn LimiterStorage>,
        settings: LimiterSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            settings,
            clock,
            locks: KeyedLocks::new(),
        }
    }

    pub fn settings(&self) -> &LimiterSettings {
        &self.settings
    }

    /// Decide whether a request from `identifier` may proceed
    pub async fn check(&self, identifier: &str, kind: LimiterKind) -> Result<bool> {
        let started = Instant::now();
        let result = self.decide(identifier, kind).await;

        MetricsRecorder::record_decision_latency(
            kind.as_str(),
            self.storage.name(),
            started.elapsed().as_secs_f64(),
        );

        match &result {
            Ok(allowed) => MetricsRecorder::record_decision(kind.as_str(), *allowed),
            Err(e) => {
                tracing::error!(
                    identifier = %identifier,
                    kind = %kind,
                    error = %e,
                    "Rate limit decision failed"
                );
                MetricsRecorder::record_error(kind.as_str(), e.kind());
            }
        }

        result
    }

    async fn decide(&self, identifier: &str, kind: LimiterKind) -> Result<bool> {
        let policy = self.settings.policy(kind);
        if !policy.enabled {
            return Ok(true);
        }

        let key = kind.storage_key(identifier);
        let _guard = self.locks.lock(&key).await;

        for attempt in 1..=MAX_SAVE_ATTEMPTS {
            let stored = self.with_deadline(self.storage.get(&key)).await?;

            let mut record = match &stored {
                Some(record) => record.clone(),
                None => LimiterRecord::new(identifier, kind)?,
            };

            let now = self.clock.now();

            if record.is_blocked(now) {
                tracing::debug!(
                    key = %key,
                    blocked_until = ?record.blocked_until,
                    "Request denied, identifier blocked"
                );
                return Ok(false);
            }

            let count = record.record_request(now);
            let over_limit = count > policy.limit;

            if over_limit {
                record.block(policy.block_duration, now)?;
            }

            let written = self
                .with_deadline(self.storage.save_if_unchanged(&key, stored.as_ref(), &record))
                .await?;

            if !written {
                tracing::debug!(key = %key, attempt = attempt, "Concurrent update, retrying");
                continue;
            }

            if over_limit {
                tracing::warn!(
                    key = %key,
                    limit = policy.limit,
                    count = count,
                    blocked_until = ?record.blocked_until,
                    "Rate limit exceeded, identifier blocked"
                );
                MetricsRecorder::record_block(kind.as_str());
            } else {
                tracing::trace!(key = %key, count = count, limit = policy.limit, "Request admitted");
            }

            return Ok(!over_limit);
        }

        Err(RateLimitError::StorageUnavailable(format!(
            "Gave up on {} after {} conflicting writes",
            key, MAX_SAVE_ATTEMPTS
        )))
    }

    /// Stored record for an identifier, if any
    pub async fn status(
        &self,
        identifier: &str,
        kind: LimiterKind,
    ) -> Result<Option<LimiterRecord>> {
        let key = kind.storage_key(identifier);
        self.with_deadline(self.storage.get(&key)).await
    }

    /// Administrative reset: drop all state for an identifier
    pub async fn reset(&self, identifier: &str, kind: LimiterKind) -> Result<()> {
        let key = kind.storage_key(identifier);
        let _guard = self.locks.lock(&key).await;
        self.with_deadline(self.storage.delete(&key)).await?;

        tracing::info!(key = %key, "Rate limit reset");

        Ok(())
    }

    async fn with_deadline<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.settings.storage_timeout, call)
            .await
            .map_err(|_| {
                RateLimitError::StorageUnavailable(format!(
                    "Storage call exceeded {}ms deadline",
                    self.settings.storage_timeout.as_millis()
                ))
            })?
    }
}

#[async_trait]
impl AdmissionControl for RateLimiter {
    async fn is_allowed(&self, identifier: &str, kind: LimiterKind) -> Result<bool> {
        self.check(identifier, kind).await
    }
}
