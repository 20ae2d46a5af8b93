// Storage backend selection

use super::{LimiterStorage, MemoryLimiterStorage, RedisLimiterStorage};
use crate::clock::Clock;
use crate::rate_limit::error::{RateLimitError, Result};
use redis::aio::ConnectionManager;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Configured storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    Networked,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Networked => "networked",
        }
    }
}

impl FromStr for BackendKind {
    type Err = RateLimitError;

    fn from_str(tag: &str) -> Result<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "networked" | "redis" => Ok(BackendKind::Networked),
            other => Err(RateLimitError::InvalidBackendType(other.to_string())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the storage backend for `kind`.
///
/// The networked backend needs a live connection handle; the memory backend
/// ignores one if given.
pub fn create_storage(
    kind: BackendKind,
    connection: Option<ConnectionManager>,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn LimiterStorage>> {
    let storage: Arc<dyn LimiterStorage> = match kind {
        BackendKind::Memory => Arc::new(MemoryLimiterStorage::new(clock)),
        BackendKind::Networked => {
            let manager = connection.ok_or(RateLimitError::MissingConnection)?;
            Arc::new(RedisLimiterStorage::new(manager, clock))
        }
    };

    tracing::info!(backend = %kind, "Limiter storage initialized");

    Ok(storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    #[test]
    fn test_parse_backend_kind() {
        assert_eq!("memory".parse::<BackendKind>().unwrap(), BackendKind::Memory);
        assert_eq!(
            "networked".parse::<BackendKind>().unwrap(),
            BackendKind::Networked
        );
        assert_eq!(" Redis ".parse::<BackendKind>().unwrap(), BackendKind::Networked);
    }

    #[test]
    fn test_parse_unknown_backend_kind() {
        match "cassandra".parse::<BackendKind>() {
            Err(RateLimitError::InvalidBackendType(tag)) => assert_eq!(tag, "cassandra"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!("".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_create_memory_storage() {
        let storage = create_storage(BackendKind::Memory, None, Arc::new(SystemClock)).unwrap();
        assert_eq!(storage.name(), "memory");
    }

    #[test]
    fn test_networked_storage_requires_connection() {
        let result = create_storage(BackendKind::Networked, None, Arc::new(SystemClock));
        assert!(matches!(result, Err(RateLimitError::MissingConnection)));
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_create_networked_storage() {
        let config = crate::config::RedisConfig {
            url: "redis://localhost:6379".to_string(),
            connection_timeout_seconds: 5,
        };
        let manager = crate::redis::create_client(&config).await.unwrap();

        let storage =
            create_storage(BackendKind::Networked, Some(manager), Arc::new(SystemClock)).unwrap();
        assert_eq!(storage.name(), "networked");
        assert!(storage.health_check().await.is_ok());
    }
}
