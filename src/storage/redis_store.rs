// Redis-backed limiter storage

use super::LimiterStorage;
use crate::clock::Clock;
use crate::domain::LimiterRecord;
use crate::rate_limit::error::{RateLimitError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::{aio::ConnectionManager, AsyncCommands, Script};
use std::sync::Arc;
use tracing::{debug, warn};

/// Expiration for records that are not blocked, so idle identifiers age out
pub const DEFAULT_RECORD_TTL_SECONDS: i64 = 24 * 60 * 60;

/// Write ARGV[2] with a PX of ARGV[3] only if the stored payload equals
/// ARGV[1] (empty string standing for a missing key).
const COMPARE_AND_SET_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current == false then
    current = ''
end

if current ~= ARGV[1] then
    return 0
end

redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
return 1
"#;

/// Limiter storage in a Redis-compatible key-value store.
///
/// Records are stored as JSON with a per-key expiration derived from their
/// block state.
pub struct RedisLimiterStorage {
    manager: ConnectionManager,
    clock: Arc<dyn Clock>,
    compare_and_set: Script,
    default_ttl: Duration,
}

impl RedisLimiterStorage {
    pub fn new(manager: ConnectionManager, clock: Arc<dyn Clock>) -> Self {
        Self {
            manager,
            clock,
            compare_and_set: Script::new(COMPARE_AND_SET_SCRIPT),
            default_ttl: Duration::seconds(DEFAULT_RECORD_TTL_SECONDS),
        }
    }

    /// Write `record` only if the stored bytes equal `expected_payload`
    /// (empty for a missing key)
    async fn conditional_write(
        &self,
        key: &str,
        expected_payload: &[u8],
        record: &LimiterRecord,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let payload = encode_record(record)?;
        let ttl_ms = ttl_millis(record, now, self.default_ttl);

        let mut conn = self.manager.clone();
        let applied: i64 = self
            .compare_and_set
            .key(key)
            .arg(expected_payload)
            .arg(payload)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;

        Ok(applied == 1)
    }
}

#[async_trait]
impl LimiterStorage for RedisLimiterStorage {
    async fn get(&self, key: &str) -> Result<Option<LimiterRecord>> {
        let mut conn = self.manager.clone();
        let payload: Option<Vec<u8>> = conn.get(key).await?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        let (stored, canonical) = decode_stored(&payload)?;
        let now = self.clock.now();

        if stored.block_elapsed(now) {
            let mut cleared = stored;
            cleared.reset();

            // On conflict the caller's conditional save fails and re-reads
            let applied = self.conditional_write(key, &payload, &cleared, now).await?;
            debug!(key = %key, applied = applied, "Rewrote expired block");

            return Ok(Some(cleared));
        }

        // Conditional saves compare against our own encoding of the record,
        // so a payload written in another layout is rewritten first
        if !canonical {
            let applied = self.conditional_write(key, &payload, &stored, now).await?;
            debug!(key = %key, applied = applied, "Normalized stored record");
        }

        Ok(Some(stored))
    }

    async fn save(&self, key: &str, record: &LimiterRecord) -> Result<()> {
        let payload = encode_record(record)?;
        let ttl_ms = ttl_millis(record, self.clock.now(), self.default_ttl);

        let mut conn = self.manager.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(payload)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn save_if_unchanged(
        &self,
        key: &str,
        expected: Option<&LimiterRecord>,
        record: &LimiterRecord,
    ) -> Result<bool> {
        let expected_payload = match expected {
            Some(expected) => encode_record(expected)?,
            None => Vec::new(),
        };

        self.conditional_write(key, &expected_payload, record, self.clock.now())
            .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "networked"
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        crate::redis::health_check(&mut conn).await.map_err(|e| {
            warn!("Redis health check failed: {}", e);
            RateLimitError::from(e)
        })
    }
}

/// Encode a record as its JSON wire format
pub fn encode_record(record: &LimiterRecord) -> Result<Vec<u8>> {
    serde_json::to_vec(record).map_err(|e| RateLimitError::Serialization(e.to_string()))
}

/// Decode a stored JSON payload
pub fn decode_record(payload: &[u8]) -> Result<LimiterRecord> {
    serde_json::from_slice(payload).map_err(|e| RateLimitError::Deserialization(e.to_string()))
}

/// Decode a stored payload and report whether it is byte-identical to what
/// `encode_record` produces for the decoded record
fn decode_stored(payload: &[u8]) -> Result<(LimiterRecord, bool)> {
    let record = decode_record(payload)?;
    let canonical = encode_record(&record)? == payload;
    Ok((record, canonical))
}

/// Key expiration in milliseconds; Redis rejects a zero PX
fn ttl_millis(record: &LimiterRecord, now: DateTime<Utc>, default: Duration) -> i64 {
    record.ttl(now, default).num_milliseconds().max(1)
}
