pub mod limiter;

pub use limiter::{LimiterKind, LimiterRecord};
