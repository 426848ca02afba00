//! Remote store abstraction for kvdrop.
//!
//! This module defines the seam between the client and the key-value
//! service that actually holds records. The HTTP service itself lives
//! outside this crate; anything that can answer these calls can back a
//! [`SecretClient`](crate::SecretClient).
//!
//! # Design
//!
//! The store trait is async and request/response:
//! - `issue_token()` asks the service for a fresh record name
//! - `put()` writes (or overwrites) a record
//! - `get()` reads a record and counts the read
//! - `head()` reports metadata without reading
//! - `delete()` removes a record
//!
//! Every failure is a [`RemoteError`] that says whether the record is
//! missing, expired or consumed, or whether the call may be retried.

mod memory;

pub use memory::{InMemoryStore, StoreStats};

use async_trait::async_trait;
use kvdrop_types::{PutOptions, RecordMeta, Token};
use std::time::Duration;
use thiserror::Error;

/// Status of a failed remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// No record under this token (never existed or deleted).
    #[error("record not found")]
    NotFound,

    /// Record exists but its TTL has passed.
    #[error("record expired")]
    Expired,

    /// One-time record already read.
    #[error("record already consumed")]
    Consumed,

    /// The caller exceeded the store's request-rate ceiling.
    #[error("rate limited")]
    RateLimited {
        /// Delay suggested by the store, if any.
        retry_after: Option<Duration>,
    },

    /// The store failed to process the request.
    #[error("server error: {0}")]
    Server(String),

    /// The store could not be reached or did not answer in time.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl RemoteError {
    /// Whether retrying the same call might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::RateLimited { .. } | RemoteError::Server(_) | RemoteError::Unavailable(_)
        )
    }
}

/// A remote key-value store holding opaque payloads under tokens.
///
/// Implementations handle the underlying protocol (HTTP, in-memory, etc).
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Ask the store for a fresh, unused token.
    async fn issue_token(&self) -> Result<Token, RemoteError>;

    /// Write `payload` under `token`, replacing any previous record.
    async fn put(
        &self,
        token: &Token,
        payload: &[u8],
        options: &PutOptions,
    ) -> Result<RecordMeta, RemoteError>;

    /// Read a record.
    ///
    /// Counts as a read. The returned metadata reflects the read that was
    /// just counted.
    async fn get(&self, token: &Token) -> Result<(Vec<u8>, RecordMeta), RemoteError>;

    /// Report a record's metadata without reading it.
    async fn head(&self, token: &Token) -> Result<RecordMeta, RemoteError>;

    /// Remove a record.
    async fn delete(&self, token: &Token) -> Result<(), RemoteError>;

    /// Whether `get` consumes a record in the same operation that spends its
    /// last read, so that two readers can never both see it.
    fn consumes_atomically(&self) -> bool;
}
