use crate::{
    config::RedisConfig,
    errors::{AppError, Result},
};
use redis::{aio::ConnectionManager, Client, RedisResult};
use std::time::Duration;

/// Create a Redis client and connection manager, verifying it with a PING
pub async fn create_client(config: &RedisConfig) -> Result<ConnectionManager> {
    tracing::info!("Creating Redis client");

    let client = Client::open(config.url.as_str())?;

    let timeout = Duration::from_secs(config.connection_timeout_seconds);
    let mut manager = tokio::time::timeout(timeout, ConnectionManager::new(client))
        .await
        .map_err(|_| {
            AppError::Configuration(format!(
                "Timed out connecting to Redis after {}s",
                config.connection_timeout_seconds
            ))
        })??;

    health_check(&mut manager).await?;

    tracing::info!("Redis client connected");

    Ok(manager)
}

/// Health check for Redis connection
pub async fn health_check(manager: &mut ConnectionManager) -> RedisResult<()> {
    let _: String = redis::cmd("PING").query_async(manager).await?;
    Ok(())
}
