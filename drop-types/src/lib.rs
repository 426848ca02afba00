//! # kvdrop-types
//!
//! Wire format types for kvdrop, an encrypted ephemeral key-value exchange.
//!
//! This crate provides the foundational types used across all kvdrop crates:
//! - [`Token`], [`Fingerprint`] - Record naming and change detection
//! - [`Envelope`], [`KdfParams`] - Authenticated-encrypted payload container
//! - [`RecordMeta`], [`PutOptions`] - What the remote store reports and accepts
//! - [`TypesError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod ids;
mod record;

pub use envelope::{
    ArmoredEnvelope, Envelope, KdfAlgorithm, KdfParams, ENVELOPE_VERSION, NONCE_SIZE, SALT_SIZE,
    TAG_SIZE,
};
pub use error::TypesError;
pub use ids::{Fingerprint, Token};
pub use record::{PutOptions, RecordMeta, MAX_TTL};
