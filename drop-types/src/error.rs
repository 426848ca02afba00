//! Error types for kvdrop wire types.

use thiserror::Error;

/// Errors that can occur while building or decoding wire types.
#[derive(Debug, Error)]
pub enum TypesError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// Armored (base64) text could not be decoded
    #[error("invalid armor: {0}")]
    InvalidArmor(String),

    /// Invalid token
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// Invalid put options
    #[error("invalid options: {0}")]
    InvalidOptions(String),
}
