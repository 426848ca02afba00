//! SecretClient - typed access to a remote store.
//!
//! This module provides [`SecretClient`], which stores and retrieves
//! payloads under tokens, optionally sealed in encrypted envelopes.
//!
//! # Architecture
//!
//! ```text
//! Application → SecretClient → RemoteStore → service
//!                    ↓
//!              crypto::Cipher (seal / open)
//! ```
//!
//! Every remote call runs under a timeout. Rate-limited, server and
//! unavailable failures (timeouts included) are retried with backoff;
//! missing, expired and consumed records are returned at once.
//!
//! # Example
//!
//! ```ignore
//! use kvdrop_client::{Cipher, InMemoryStore, Password, PutOptions, SecretClient};
//!
//! let client = SecretClient::new(InMemoryStore::new());
//! let cipher = Cipher::from_password(Password::new("hunter2"), Default::default());
//!
//! let token = client.put_secret(b"db password", PutOptions::one_time(), &cipher).await?;
//! let secret = client.get_secret(&token, &cipher).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use kvdrop_core::RetryPolicy;
use kvdrop_types::{ArmoredEnvelope, PutOptions, RecordMeta, Token, TypesError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::crypto::{Cipher, CryptoError};
use crate::store::{RemoteError, RemoteStore};

/// Default timeout for a single remote call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No record under this token.
    #[error("record not found")]
    NotFound,

    /// The record's TTL has passed.
    #[error("record expired")]
    Expired,

    /// The one-time record was already read.
    #[error("record already consumed")]
    Consumed,

    /// Wrong key or password, or a corrupted envelope.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Retries exhausted on a retryable failure.
    #[error("remote call failed after {attempts} attempt(s): {reason}")]
    Transient {
        /// Attempts made, including the first.
        attempts: u32,
        /// Last failure seen.
        reason: String,
    },

    /// Rejected before any remote call (bad options or token).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Crypto error other than authentication.
    #[error("crypto error: {0}")]
    Crypto(CryptoError),

    /// Payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ClientError {
    /// Whether the error describes the record itself and retrying cannot help.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ClientError::NotFound
                | ClientError::Expired
                | ClientError::Consumed
                | ClientError::AuthenticationFailed
        )
    }
}

impl From<CryptoError> for ClientError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::AuthenticationFailed => ClientError::AuthenticationFailed,
            other => ClientError::Crypto(other),
        }
    }
}

impl From<RemoteError> for ClientError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::NotFound => ClientError::NotFound,
            RemoteError::Expired => ClientError::Expired,
            RemoteError::Consumed => ClientError::Consumed,
            other => ClientError::Transient {
                attempts: 1,
                reason: other.to_string(),
            },
        }
    }
}

impl From<TypesError> for ClientError {
    fn from(err: TypesError) -> Self {
        match err {
            TypesError::InvalidOptions(_) | TypesError::InvalidToken(_) => {
                ClientError::InvalidRequest(err.to_string())
            }
            other => ClientError::Serialization(other.to_string()),
        }
    }
}

/// Configuration for SecretClient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// Timeout for each remote call attempt.
    pub request_timeout: Duration,
    /// Retry policy for retryable failures.
    pub retry: RetryPolicy,
}

impl ClientConfig {
    /// Set the per-call timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

/// What happened to a record's read budget on retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consumption {
    /// Reads remain (or the record has no read limit).
    NotConsumed,
    /// The store consumed the record in the same operation as the read.
    Atomic,
    /// The client deleted the record after the last allowed read.
    DeletedAfterRead,
    /// The last allowed read was served but the follow-up delete failed.
    ///
    /// The value may be readable again by someone else.
    Unconfirmed {
        /// Why the delete failed.
        reason: String,
    },
}

impl Consumption {
    /// Whether this read may not have been exclusive.
    pub fn is_unconfirmed(&self) -> bool {
        matches!(self, Consumption::Unconfirmed { .. })
    }
}

/// A retrieved record.
#[derive(Clone)]
pub struct Retrieved<T = Vec<u8>> {
    /// The payload (decrypted and decoded, for the typed helpers).
    pub value: T,
    /// Record metadata after this read.
    pub meta: RecordMeta,
    /// Effect of this read on the record's budget.
    pub consumption: Consumption,
}

impl<T> Retrieved<T> {
    /// Transform the value, keeping metadata and consumption.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Retrieved<U> {
        Retrieved {
            value: f(self.value),
            meta: self.meta,
            consumption: self.consumption,
        }
    }

    fn try_map<U>(
        self,
        f: impl FnOnce(T) -> Result<U, ClientError>,
    ) -> Result<Retrieved<U>, ClientError> {
        Ok(Retrieved {
            value: f(self.value)?,
            meta: self.meta,
            consumption: self.consumption,
        })
    }
}

impl<T> std::fmt::Debug for Retrieved<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retrieved")
            .field("value", &"[REDACTED]")
            .field("meta", &self.meta)
            .field("consumption", &self.consumption)
            .finish()
    }
}

/// The main store client.
///
/// Holds no per-record state; clones of the store may be shared freely
/// between clients.
pub struct SecretClient<S: RemoteStore> {
    store: S,
    config: ClientConfig,
}

impl<S: RemoteStore> SecretClient<S> {
    /// Create a client with default timeouts and retries.
    pub fn new(store: S) -> Self {
        Self::with_config(store, ClientConfig::default())
    }

    /// Create a client with explicit configuration.
    pub fn with_config(store: S, config: ClientConfig) -> Self {
        Self { store, config }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The active configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Store `payload` under a freshly issued token.
    pub async fn put(&self, payload: &[u8], options: PutOptions) -> Result<Token, ClientError> {
        options.validate()?;
        let token = self
            .call("issue_token", None, || self.store.issue_token())
            .await?;
        self.put_at(&token, payload, options).await?;
        Ok(token)
    }

    /// Write or overwrite the record under an existing token.
    pub async fn put_at(
        &self,
        token: &Token,
        payload: &[u8],
        options: PutOptions,
    ) -> Result<RecordMeta, ClientError> {
        options.validate()?;
        // Retries resend these exact bytes.
        let meta = self
            .call("put", Some(token), || self.store.put(token, payload, &options))
            .await?;
        info!(token = %token, size = meta.size, "record stored");
        Ok(meta)
    }

    /// Read a record.
    ///
    /// When the read spends the record's budget on a store that does not
    /// consume atomically, the client deletes the record itself. A failed
    /// delete is reported as [`Consumption::Unconfirmed`], not as an error.
    pub async fn get(&self, token: &Token) -> Result<Retrieved, ClientError> {
        let (payload, meta) = self
            .call("get", Some(token), || self.store.get(token))
            .await?;

        let consumption = if !meta.reads_exhausted() {
            Consumption::NotConsumed
        } else if self.store.consumes_atomically() {
            Consumption::Atomic
        } else {
            match self
                .call("delete", Some(token), || self.store.delete(token))
                .await
            {
                Ok(()) => Consumption::DeletedAfterRead,
                Err(e) => {
                    warn!(
                        token = %token,
                        error = %e,
                        "one-time read served but delete failed; value may be readable again"
                    );
                    Consumption::Unconfirmed {
                        reason: e.to_string(),
                    }
                }
            }
        };

        Ok(Retrieved {
            value: payload,
            meta,
            consumption,
        })
    }

    /// Report a record's metadata. Does not count as a read.
    pub async fn head(&self, token: &Token) -> Result<RecordMeta, ClientError> {
        self.call("head", Some(token), || self.store.head(token))
            .await
    }

    /// Remove a record.
    pub async fn delete(&self, token: &Token) -> Result<(), ClientError> {
        self.call("delete", Some(token), || self.store.delete(token))
            .await?;
        info!(token = %token, "record deleted");
        Ok(())
    }

    /// Encrypt `plaintext` and store it under a fresh token.
    pub async fn put_secret(
        &self,
        plaintext: &[u8],
        options: PutOptions,
        cipher: &Cipher,
    ) -> Result<Token, ClientError> {
        options.validate()?;
        let sealed = cipher.seal(plaintext)?.to_bytes()?;
        self.put(&sealed, options).await
    }

    /// Encrypt `plaintext` and store it under an existing token.
    ///
    /// With a password cipher, repeated writes to the same token share one
    /// derived key and salt (see [`Cipher::seal_for`]).
    pub async fn put_secret_at(
        &self,
        token: &Token,
        plaintext: &[u8],
        options: PutOptions,
        cipher: &Cipher,
    ) -> Result<RecordMeta, ClientError> {
        options.validate()?;
        let sealed = cipher.seal_for(token, plaintext)?.to_bytes()?;
        self.put_at(token, &sealed, options).await
    }

    /// Read and decrypt a record.
    ///
    /// Fails with [`ClientError::AuthenticationFailed`] for a wrong key or
    /// password and for any corrupted envelope alike.
    ///
    /// # Blocking
    ///
    /// With a password cipher this runs Argon2id inline on the calling task,
    /// at the cost named in the envelope header. The store is untrusted, so
    /// that cost is only bounded by the reader's limits (256 MiB, 10 passes,
    /// 8 lanes), which can take seconds. On a latency-sensitive runtime call
    /// this from `tokio::task::spawn_blocking` or use a key cipher.
    pub async fn get_secret(
        &self,
        token: &Token,
        cipher: &Cipher,
    ) -> Result<Retrieved, ClientError> {
        let retrieved = self.get(token).await?;
        retrieved.try_map(|sealed| Ok(cipher.open_bytes(&sealed)?))
    }

    /// Store `value` as a plain JSON document under a fresh token.
    pub async fn put_json<T: Serialize>(
        &self,
        value: &T,
        options: PutOptions,
    ) -> Result<Token, ClientError> {
        let body =
            serde_json::to_vec(value).map_err(|e| ClientError::Serialization(e.to_string()))?;
        self.put(&body, options).await
    }

    /// Read a plain JSON document.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        token: &Token,
    ) -> Result<Retrieved<T>, ClientError> {
        let retrieved = self.get(token).await?;
        retrieved.try_map(|body| {
            serde_json::from_slice(&body).map_err(|e| ClientError::Serialization(e.to_string()))
        })
    }

    /// Encrypt `value` as JSON and store it as an armored JSON document
    /// (`{"encrypted": true, "payload": "..."}`).
    pub async fn put_secret_json<T: Serialize>(
        &self,
        value: &T,
        options: PutOptions,
        cipher: &Cipher,
    ) -> Result<Token, ClientError> {
        options.validate()?;
        let plaintext = zeroize::Zeroizing::new(
            serde_json::to_vec(value).map_err(|e| ClientError::Serialization(e.to_string()))?,
        );
        let armored = ArmoredEnvelope::from_envelope(&cipher.seal(&plaintext)?)?;
        let body =
            serde_json::to_vec(&armored).map_err(|e| ClientError::Serialization(e.to_string()))?;
        self.put(&body, options).await
    }

    /// Read and decrypt an armored JSON document.
    ///
    /// A document that is not a well-formed armored envelope is an
    /// authentication failure. Key derivation blocks the calling task as
    /// described on [`SecretClient::get_secret`].
    pub async fn get_secret_json<T: DeserializeOwned>(
        &self,
        token: &Token,
        cipher: &Cipher,
    ) -> Result<Retrieved<T>, ClientError> {
        let retrieved = self.get(token).await?;
        retrieved.try_map(|body| {
            let armored: ArmoredEnvelope =
                serde_json::from_slice(&body).map_err(|_| ClientError::AuthenticationFailed)?;
            let envelope = armored
                .to_envelope()
                .map_err(|_| ClientError::AuthenticationFailed)?;
            let plaintext = zeroize::Zeroizing::new(cipher.open(&envelope)?);
            serde_json::from_slice(&plaintext)
                .map_err(|e| ClientError::Serialization(e.to_string()))
        })
    }

    /// Run one remote call with timeout and retries.
    async fn call<T, F, Fut>(
        &self,
        op: &'static str,
        token: Option<&Token>,
        mut request: F,
    ) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let token = token.map(Token::as_str).unwrap_or("-");
        let mut attempt = 1;
        loop {
            debug!(op, token, attempt, "remote call");
            let result = match tokio::time::timeout(self.config.request_timeout, request()).await
            {
                Ok(result) => result,
                Err(_) => Err(RemoteError::Unavailable(format!(
                    "{} timed out after {:?}",
                    op, self.config.request_timeout
                ))),
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e.into()),
                Err(e) => e,
            };

            if !self.config.retry.should_retry(attempt) {
                warn!(op, token, attempt, error = %error, "remote call failed, giving up");
                return Err(ClientError::Transient {
                    attempts: attempt,
                    reason: error.to_string(),
                });
            }

            let mut delay = self.config.retry.delay_for(attempt);
            if let RemoteError::RateLimited {
                retry_after: Some(after),
            } = &error
            {
                delay = delay.max(*after);
            }
            warn!(
                op,
                token,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "remote call failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl<S: RemoteStore + std::fmt::Debug> std::fmt::Debug for SecretClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretClient")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish()
    }
}
