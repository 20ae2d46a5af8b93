//! Limiter record persistence.
//!
//! Two interchangeable backends sit behind [`LimiterStorage`]:
//! - [`MemoryLimiterStorage`] for single-instance deployments and tests
//! - [`RedisLimiterStorage`] for state shared across instances
//!
//! Both apply the same expiry policy on `get`: a record whose block deadline
//! has passed is returned (and stored) with the block cleared and the counter
//! zeroed.

pub mod factory;
pub mod memory;
pub mod redis_store;

pub use factory::{create_storage, BackendKind};
pub use memory::MemoryLimiterStorage;
pub use redis_store::RedisLimiterStorage;

use crate::domain::LimiterRecord;
use crate::rate_limit::error::Result;
use async_trait::async_trait;

/// Storage backend for limiter records
#[async_trait]
pub trait LimiterStorage: Send + Sync {
    /// Fetch the record stored under `key`; `None` is equivalent to a fresh record
    async fn get(&self, key: &str) -> Result<Option<LimiterRecord>>;

    /// Store `record` under `key`, replacing whatever is there
    async fn save(&self, key: &str, record: &LimiterRecord) -> Result<()>;

    /// Store `record` only if the stored state still equals `expected`
    /// (`None` meaning the key is absent). Returns false on conflict, in which
    /// case nothing was written.
    async fn save_if_unchanged(
        &self,
        key: &str,
        expected: Option<&LimiterRecord>,
        record: &LimiterRecord,
    ) -> Result<bool>;

    /// Remove the record under `key`
    async fn delete(&self, key: &str) -> Result<()>;

    /// Backend name for logs, metrics and health output
    fn name(&self) -> &'static str;

    /// Verify the backend can serve requests
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
