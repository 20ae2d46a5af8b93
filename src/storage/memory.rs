// In-process limiter storage

use super::LimiterStorage;
use crate::clock::Clock;
use crate::domain::LimiterRecord;
use crate::rate_limit::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Process-wide mapping of storage keys to limiter records.
///
/// Reads take the shared lock; writes and expiry rewrites take the exclusive
/// lock. No lock is held across calls.
///
/// Entries are never evicted: every distinct IP or token seen stays in the
/// map until it is deleted or the process exits, so memory grows with the
/// number of identifiers. Deployments facing many distinct clients should use
/// the networked backend, whose keys expire after 24 hours when unblocked.
pub struct MemoryLimiterStorage {
    records: RwLock<HashMap<String, LimiterRecord>>,
    clock: Arc<dyn Clock>,
}

impl MemoryLimiterStorage {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl LimiterStorage for MemoryLimiterStorage {
    async fn get(&self, key: &str) -> Result<Option<LimiterRecord>> {
        let now = self.clock.now();

        {
            let records = self.records.read().await;
            match records.get(key) {
                None => return Ok(None),
                Some(record) if !record.block_elapsed(now) => return Ok(Some(record.clone())),
                Some(_) => {}
            }
        }

        // Elapsed block: rewrite the stored entry under the exclusive lock.
        // Another writer may have replaced it between the two locks.
        let mut records = self.records.write().await;
        match records.get_mut(key) {
            Some(record) => {
                if record.expire_block(now) {
                    debug!(key = %key, "Cleared expired block");
                }
                Ok(Some(record.clone()))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, key: &str, record: &LimiterRecord) -> Result<()> {
        let mut records = self.records.write().await;
        records.insert(key.to_string(), record.clone());
        Ok(())
    }

    async fn save_if_unchanged(
        &self,
        key: &str,
        expected: Option<&LimiterRecord>,
        record: &LimiterRecord,
    ) -> Result<bool> {
        let mut records = self.records.write().await;

        if records.get(key) != expected {
            return Ok(false);
        }

        records.insert(key.to_string(), record.clone());
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut records = self.records.write().await;
        records.remove(key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::LimiterKind;
    use chrono::Duration;
    use tokio_test::assert_ok;

    fn storage_with_clock() -> (MemoryLimiterStorage, ManualClock) {
        let clock = ManualClock::default();
        let storage = MemoryLimiterStorage::new(Arc::new(clock.clone()));
        (storage, clock)
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let (storage, _) = storage_with_clock();
        assert!(storage.get("rate_limiter:ip:1.2.3.4").await.unwrap().is_none());
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_save_then_get_round_trip() {
        let (storage, clock) = storage_with_clock();
        let mut record = LimiterRecord::new("192.168.1.1", LimiterKind::Ip).unwrap();
        record.record_request(clock.now());
        record.record_request(clock.now());

        let key = record.storage_key();
        storage.save(&key, &record).await.unwrap();

        let loaded = storage.get(&key).await.unwrap().unwrap();
        assert_eq!(loaded, record);
        assert_eq!(storage.len().await, 1);
    }

    #[tokio::test]
    async fn test_active_block_survives_get() {
        let (storage, clock) = storage_with_clock();
        let mut record = LimiterRecord::new("test-token", LimiterKind::Token).unwrap();
        record.record_request(clock.now());
        record.block(Duration::seconds(60), clock.now()).unwrap();

        let key = record.storage_key();
        storage.save(&key, &record).await.unwrap();

        clock.advance(Duration::seconds(30));
        let loaded = storage.get(&key).await.unwrap().unwrap();
        assert!(loaded.blocked);
        assert_eq!(loaded.request_count, 1);
    }

    #[tokio::test]
    async fn test_get_rewrites_expired_block() {
        let (storage, clock) = storage_with_clock();
        let mut record = LimiterRecord::new("192.168.1.1", LimiterKind::Ip).unwrap();
        for _ in 0..11 {
            record.record_request(clock.now());
        }
        record.block(Duration::seconds(300), clock.now()).unwrap();

        let key = record.storage_key();
        storage.save(&key, &record).await.unwrap();

        clock.advance(Duration::seconds(301));
        let loaded = storage.get(&key).await.unwrap().unwrap();
        assert!(!loaded.blocked);
        assert!(loaded.blocked_until.is_none());
        assert_eq!(loaded.request_count, 0);

        // The stored entry was rewritten too
        let records = storage.records.read().await;
        assert_eq!(records.get(&key), Some(&loaded));
    }

    #[tokio::test]
    async fn test_save_if_unchanged() {
        let (storage, clock) = storage_with_clock();
        let mut record = LimiterRecord::new("10.0.0.1", LimiterKind::Ip).unwrap();
        let key = record.storage_key();

        record.record_request(clock.now());
        assert!(storage.save_if_unchanged(&key, None, &record).await.unwrap());

        // Expecting absence again is now a conflict
        let mut other = record.clone();
        other.record_request(clock.now());
        assert!(!storage.save_if_unchanged(&key, None, &other).await.unwrap());

        assert!(storage
            .save_if_unchanged(&key, Some(&record), &other)
            .await
            .unwrap());
        assert_eq!(storage.get(&key).await.unwrap(), Some(other));
    }

    #[tokio::test]
    async fn test_delete() {
        let (storage, _) = storage_with_clock();
        let record = LimiterRecord::new("10.0.0.1", LimiterKind::Ip).unwrap();
        let key = record.storage_key();

        assert_ok!(storage.save(&key, &record).await);
        assert_ok!(storage.delete(&key).await);
        assert!(storage.get(&key).await.unwrap().is_none());

        // Deleting a missing key is fine
        assert_ok!(storage.delete(&key).await);
    }

    #[tokio::test]
    async fn test_idle_records_are_retained() {
        let (storage, clock) = storage_with_clock();

        for i in 1..=3 {
            let mut record = LimiterRecord::new(format!("10.0.0.{}", i), LimiterKind::Ip).unwrap();
            record.record_request(clock.now());
            storage.save(&record.storage_key(), &record).await.unwrap();
        }

        clock.advance(Duration::days(2));
        assert!(storage.get("rate_limiter:ip:10.0.0.1").await.unwrap().is_some());
        assert_eq!(storage.len().await, 3);
    }

    #[tokio::test]
    async fn test_health_check() {
        let (storage, _) = storage_with_clock();
        assert_ok!(storage.health_check().await);
        assert_eq!(storage.name(), "memory");
    }
}
