// Limiter record domain model and block state transitions

use crate::rate_limit::error::{RateLimitError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

const KEY_PREFIX: &str = "rate_limiter";

/// Longest accepted block cooldown (ten years)
pub const MAX_BLOCK_DURATION_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

// ============================================================================
// Limiter Kind
// ============================================================================

/// What a limiter record is keyed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimiterKind {
    Ip,
    Token,
}

impl LimiterKind {
    /// Classify a request: token-kind whenever a token was supplied
    pub fn from_is_token(is_token: bool) -> Self {
        if is_token {
            LimiterKind::Token
        } else {
            LimiterKind::Ip
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LimiterKind::Ip => "ip",
            LimiterKind::Token => "token",
        }
    }

    /// Namespaced storage key; IP and token key spaces never collide
    pub fn storage_key(&self, identifier: &str) -> String {
        format!("{}:{}:{}", KEY_PREFIX, self.as_str(), identifier)
    }
}

impl fmt::Display for LimiterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Limiter Record
// ============================================================================

/// Per-identifier counter and block state.
///
/// `blocked == true` implies `blocked_until` is set. An elapsed block is never
/// observed as-is: clearing it also zeroes `request_count`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimiterRecord {
    pub identifier: String,
    pub kind: LimiterKind,
    pub request_count: u64,
    pub last_request_time: Option<DateTime<Utc>>,
    pub blocked: bool,
    pub blocked_until: Option<DateTime<Utc>>,
}

impl LimiterRecord {
    /// Create a fresh zero-state record for an identifier
    pub fn new(identifier: impl Into<String>, kind: LimiterKind) -> Result<Self> {
        let identifier = identifier.into();

        if identifier.trim().is_empty() {
            return Err(RateLimitError::InvalidIdentifier(
                "Identifier cannot be empty".to_string(),
            ));
        }

        if kind == LimiterKind::Ip {
            validate_ip(&identifier)?;
        }

        Ok(Self {
            identifier,
            kind,
            request_count: 0,
            last_request_time: None,
            blocked: false,
            blocked_until: None,
        })
    }

    /// Create a record from an IP/token pair; exactly one must be supplied
    pub fn from_parts(ip: Option<&str>, token: Option<&str>) -> Result<Self> {
        let ip = ip.filter(|s| !s.is_empty());
        let token = token.filter(|s| !s.is_empty());

        match (ip, token) {
            (Some(ip), None) => Self::new(ip, LimiterKind::Ip),
            (None, Some(token)) => Self::new(token, LimiterKind::Token),
            (Some(_), Some(_)) => Err(RateLimitError::InvalidIdentifier(
                "Only one of IP or token may be supplied".to_string(),
            )),
            (None, None) => Err(RateLimitError::InvalidIdentifier(
                "Either an IP or a token must be supplied".to_string(),
            )),
        }
    }

    pub fn storage_key(&self) -> String {
        self.kind.storage_key(&self.identifier)
    }

    /// Whether the record is currently blocked.
    ///
    /// An elapsed block is cleared on the spot together with the counter, so
    /// the caller sees `request_count == 0` afterwards.
    pub fn is_blocked(&mut self, now: DateTime<Utc>) -> bool {
        self.expire_block(now);
        self.blocked
    }

    /// Clear a block whose deadline has passed. Returns true if it did.
    pub fn expire_block(&mut self, now: DateTime<Utc>) -> bool {
        if self.block_elapsed(now) {
            self.reset();
            return true;
        }
        false
    }

    /// True when the record carries a block whose deadline is not in the future
    pub fn block_elapsed(&self, now: DateTime<Utc>) -> bool {
        match (self.blocked, self.blocked_until) {
            (true, Some(until)) => until <= now,
            // A block flag without a deadline is corrupt state; treat as elapsed
            (true, None) => true,
            (false, _) => false,
        }
    }

    /// Block until `now + duration`. Re-blocking moves the deadline.
    ///
    /// A deadline outside the representable date range leaves the record
    /// untouched and fails with `InvalidBlockDuration`.
    pub fn block(&mut self, duration: Duration, now: DateTime<Utc>) -> Result<()> {
        let until = now.checked_add_signed(duration).ok_or_else(|| {
            RateLimitError::InvalidBlockDuration(format!(
                "{}s from {} is out of range",
                duration.num_seconds(),
                now
            ))
        })?;

        self.blocked = true;
        self.blocked_until = Some(until);
        Ok(())
    }

    /// Zero counters and clear block state
    pub fn reset(&mut self) {
        self.request_count = 0;
        self.blocked = false;
        self.blocked_until = None;
    }

    /// Count one request and refresh the last request timestamp
    pub fn record_request(&mut self, now: DateTime<Utc>) -> u64 {
        self.request_count = self.request_count.saturating_add(1);
        self.last_request_time = Some(now);
        self.request_count
    }

    /// Expiration a backend should apply when persisting this record
    pub fn ttl(&self, now: DateTime<Utc>, default: Duration) -> Duration {
        match (self.blocked, self.blocked_until) {
            (true, Some(until)) => (until - now).max(Duration::zero()),
            _ => default,
        }
    }
}

/// Syntactic IPv4/IPv6 validation
pub fn validate_ip(ip: &str) -> Result<()> {
    ip.parse::<IpAddr>()
        .map(|_| ())
        .map_err(|_| RateLimitError::InvalidIdentifier(format!("Invalid IP address: {}", ip)))
}
