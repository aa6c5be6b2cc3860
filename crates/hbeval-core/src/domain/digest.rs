//! SHA-256 content digests for audit artifacts and similarity keys.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::{EvalError, EvalResult};

/// Content digest (SHA-256 lowercase hex).
///
/// The inner field is private so the string is always valid hex produced by
/// `from_bytes` or checked via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Digest of the compact JSON encoding of `value`.
    pub fn of_json<T: Serialize>(value: &T) -> EvalResult<Self> {
        Ok(Self::from_bytes(&serde_json::to_vec(value)?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = EvalError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(EvalError::DigestMismatch {
                expected: "64 hex characters".to_string(),
                actual: s,
            });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        let d = ContentDigest::from_bytes(b"");
        assert_eq!(
            d.as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(d.short(), "e3b0c44298fc");
    }

    #[test]
    fn test_try_from_validates() {
        assert!(ContentDigest::try_from("abc".to_string()).is_err());
        let upper = "E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855";
        let d = ContentDigest::try_from(upper.to_string()).unwrap();
        assert_eq!(d, ContentDigest::from_bytes(b""));
    }
}
