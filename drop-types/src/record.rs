//! Record metadata and write options.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{Fingerprint, Token, TypesError};

/// Longest time-to-live a record may be given (30 days).
pub const MAX_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// What the remote store reports about a record, without its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMeta {
    /// Record name
    pub token: Token,
    /// Creation time (unix milliseconds, store clock)
    pub created_at: u64,
    /// Expiry time (unix milliseconds, store clock), if any
    pub expires_at: Option<u64>,
    /// Successful reads so far
    pub read_count: u32,
    /// Reads allowed before the record is consumed, if limited
    pub max_reads: Option<u32>,
    /// Content hash of the stored payload
    pub fingerprint: Fingerprint,
    /// Stored payload size in bytes
    pub size: usize,
}

impl RecordMeta {
    /// Whether the record disappears after a single read.
    pub fn is_one_time(&self) -> bool {
        self.max_reads == Some(1)
    }

    /// Whether the read budget has been spent.
    pub fn reads_exhausted(&self) -> bool {
        self.max_reads.is_some_and(|max| self.read_count >= max)
    }

    /// Whether the record is expired at the given store time.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.expires_at.is_some_and(|at| now_ms >= at)
    }
}

/// Options for writing a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutOptions {
    /// Time-to-live, enforced by the store's clock
    pub ttl: Option<Duration>,
    /// Number of reads before the record is consumed
    pub max_reads: Option<u32>,
}

impl PutOptions {
    /// Options for a one-time secret.
    pub fn one_time() -> Self {
        Self {
            ttl: None,
            max_reads: Some(1),
        }
    }

    /// Set the time-to-live.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set the read budget.
    pub fn with_max_reads(mut self, max_reads: u32) -> Self {
        self.max_reads = Some(max_reads);
        self
    }

    /// Check the options against store limits.
    pub fn validate(&self) -> Result<(), TypesError> {
        if let Some(ttl) = self.ttl {
            if ttl < Duration::from_secs(1) {
                return Err(TypesError::InvalidOptions(
                    "ttl must be at least 1 second".into(),
                ));
            }
            if ttl > MAX_TTL {
                return Err(TypesError::InvalidOptions(format!(
                    "ttl {}s exceeds maximum of {}s",
                    ttl.as_secs(),
                    MAX_TTL.as_secs()
                )));
            }
        }
        if self.max_reads == Some(0) {
            return Err(TypesError::InvalidOptions(
                "max_reads must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
