// Throttle Gate Library

pub mod api;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod observability;
pub mod rate_limit;
pub mod redis;
pub mod storage;

pub use config::Config;
pub use errors::{AppError, Result};
