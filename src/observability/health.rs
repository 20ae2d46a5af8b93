use crate::storage::LimiterStorage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthChecks {
    pub storage: ComponentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub status: String,
    pub backend: String,
    pub message: Option<String>,
}

pub struct HealthChecker {
    storage: Arc<dyn LimiterStorage>,
}

impl HealthChecker {
    pub fn new(storage: Arc<dyn LimiterStorage>) -> Self {
        Self { storage }
    }

    /// Liveness check - is the service running?
    pub async fn liveness(&self) -> HealthStatus {
        HealthStatus {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            checks: HealthChecks {
                storage: ComponentStatus {
                    status: "unknown".to_string(),
                    backend: self.storage.name().to_string(),
                    message: None,
                },
            },
        }
    }

    /// Readiness check - can the service handle requests?
    pub async fn readiness(&self) -> HealthStatus {
        let storage_status = self.check_storage().await;

        let overall_status = if storage_status.status == "ok" {
            "ok"
        } else {
            "degraded"
        };

        HealthStatus {
            status: overall_status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            checks: HealthChecks {
                storage: storage_status,
            },
        }
    }

    /// Startup check - has the service finished initializing?
    pub async fn startup(&self) -> HealthStatus {
        self.readiness().await
    }

    async fn check_storage(&self) -> ComponentStatus {
        let backend = self.storage.name().to_string();

        match self.storage.health_check().await {
            Ok(_) => ComponentStatus {
                status: "ok".to_string(),
                backend,
                message: None,
            },
            Err(e) => ComponentStatus {
                status: "error".to_string(),
                backend,
                message: Some(format!("Storage check failed: {}", e)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::storage::MemoryLimiterStorage;

    #[tokio::test]
    async fn test_memory_backend_is_ready() {
        let checker = HealthChecker::new(Arc::new(MemoryLimiterStorage::new(Arc::new(SystemClock))));

        let status = checker.readiness().await;
        assert_eq!(status.status, "ok");
        assert_eq!(status.checks.storage.backend, "memory");

        let live = checker.liveness().await;
        assert_eq!(live.checks.storage.status, "unknown");
    }
}
