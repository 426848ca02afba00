//! Naming and change-detection types for kvdrop.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TypesError;

/// Maximum accepted token length in bytes.
const MAX_TOKEN_LEN: usize = 256;

/// An opaque identifier naming one remote record.
///
/// Tokens are issued by the remote store and never interpreted by kvdrop.
/// Comparison is case-sensitive.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Token(String);

impl Token {
    /// Create a token, rejecting empty values, whitespace and control characters.
    pub fn new(value: impl Into<String>) -> Result<Self, TypesError> {
        let value = value.into();
        if value.is_empty() {
            return Err(TypesError::InvalidToken("empty".into()));
        }
        if value.len() > MAX_TOKEN_LEN {
            return Err(TypesError::InvalidToken(format!(
                "too long: {} bytes (max {})",
                value.len(),
                MAX_TOKEN_LEN
            )));
        }
        if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(TypesError::InvalidToken(
                "contains whitespace or control characters".into(),
            ));
        }
        Ok(Self(value))
    }

    /// Get the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Token {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Token> for String {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl std::str::FromStr for Token {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.0)
    }
}

/// A short content hash used to detect change without comparing payloads.
///
/// 32-byte BLAKE3 digest, displayed as hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint a byte sequence.
    pub fn of(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Create a Fingerprint from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes of this Fingerprint.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_string()[..12])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_accepts_memorable_words() {
        let token = Token::new("apple-river-stone-cloud-lamp").unwrap();
        assert_eq!(token.as_str(), "apple-river-stone-cloud-lamp");
        assert_eq!(token.to_string(), "apple-river-stone-cloud-lamp");
    }

    #[test]
    fn token_is_case_sensitive() {
        let lower = Token::new("apple-river").unwrap();
        let upper = Token::new("Apple-River").unwrap();
        assert_ne!(lower, upper);
    }

    #[test]
    fn token_rejects_empty() {
        assert!(matches!(Token::new(""), Err(TypesError::InvalidToken(_))));
    }

    #[test]
    fn token_rejects_whitespace_and_control() {
        assert!(Token::new("apple river").is_err());
        assert!(Token::new("apple\nriver").is_err());
        assert!(Token::new("apple\u{7}").is_err());
    }

    #[test]
    fn token_rejects_oversized() {
        let long = "a".repeat(MAX_TOKEN_LEN + 1);
        assert!(Token::new(long).is_err());
    }

    #[test]
    fn token_deserialization_validates() {
        let ok: Token = serde_json::from_str("\"stone-lamp\"").unwrap();
        assert_eq!(ok.as_str(), "stone-lamp");

        let bad: Result<Token, _> = serde_json::from_str("\"\"");
        assert!(bad.is_err());
    }

    #[test]
    fn fingerprint_is_deterministic() {
        assert_eq!(Fingerprint::of(b"hello"), Fingerprint::of(b"hello"));
        assert_ne!(Fingerprint::of(b"hello"), Fingerprint::of(b"hellp"));
    }

    #[test]
    fn fingerprint_display_is_hex() {
        let fp = Fingerprint::of(b"");
        let shown = fp.to_string();
        assert_eq!(shown.len(), 64);
        assert!(shown.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(format!("{:?}", fp).starts_with("Fingerprint("));
    }
}
