pub mod error;
pub mod limiter;
pub mod locks;
pub mod middleware;

pub use error::RateLimitError;
pub use limiter::{AdmissionControl, KindPolicy, LimiterSettings, RateLimiter};
pub use locks::KeyedLocks;
pub use middleware::{rate_limit_middleware, AdmissionFilter};
