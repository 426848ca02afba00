//! # kvdrop-client
//!
//! Client library for kvdrop encrypted ephemeral key-value exchange.
//!
//! This is the library applications use to hand secrets to a remote
//! key-value store and to keep local values in step with remote records.
//!
//! ## Features
//!
//! - **E2E Encryption**: XChaCha20-Poly1305 envelopes the store cannot read
//! - **Device-Adaptive Key Derivation**: Argon2id scales with available RAM
//! - **One-Time Secrets**: read budgets enforced atomically, or by the client
//!   when the store cannot
//! - **Store Abstraction**: Pluggable remote store (HTTP service, in-memory)
//! - **Change-Driven Monitors**: push or pull only when a fingerprint moves
//!
//! ## Example
//!
//! ```ignore
//! use kvdrop_client::{Cipher, InMemoryStore, Password, PutOptions, SecretClient};
//!
//! let client = SecretClient::new(InMemoryStore::new());
//! let cipher = Cipher::new(Protection::Password(Password::new("hunter2")))?;
//!
//! // Store a one-time secret
//! let token = client.put_secret(b"api key", PutOptions::one_time(), &cipher).await?;
//!
//! // The first read succeeds, the second sees `Consumed`
//! let secret = client.get_secret(&token, &cipher).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod crypto;
pub mod monitor;
pub mod store;

pub use client::{ClientConfig, ClientError, Consumption, Retrieved, SecretClient};
pub use config::{ClientSettings, ConfigError, KvdropConfig, MonitorSettings, RetrySettings};
pub use crypto::{
    Argon2Params, Cipher, CryptoError, Password, Protection, SecretKey, KEY_SIZE,
};
pub use monitor::{
    FileResource, LocalResource, MemoryResource, Monitor, MonitorConfig, MonitorError,
    MonitorHandle, MonitorStatus, ResourceError, TickReport,
};
pub use store::{InMemoryStore, RemoteError, RemoteStore, StoreStats};

pub use kvdrop_core::{RetryPolicy, SyncEvent, SyncMode, SyncState, TickOutcome, TickPhase};
pub use kvdrop_types::{Envelope, Fingerprint, PutOptions, RecordMeta, Token};
