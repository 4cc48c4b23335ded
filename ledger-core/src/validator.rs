//! Fulfilment validation
//!
//! A transfer carries a condition fixed at receive time; the payee proves
//! completion by presenting a preimage whose SHA-256 digest matches it.

use sha2::{Digest, Sha256};

/// Decides whether a presented fulfilment satisfies a transfer's condition
pub trait FulfilmentValidator: Send + Sync {
    /// True when `fulfilment` satisfies `condition`
    fn validate(&self, condition: &str, fulfilment: &str) -> bool;
}

/// Standard validator: the condition is the lowercase hex SHA-256 digest of
/// the fulfilment preimage.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256PreimageValidator;

impl FulfilmentValidator for Sha256PreimageValidator {
    fn validate(&self, condition: &str, fulfilment: &str) -> bool {
        condition_for(fulfilment).eq_ignore_ascii_case(condition)
    }
}

/// Hex SHA-256 digest of a preimage, as stored in transfer conditions
pub fn condition_for(fulfilment: &str) -> String {
    let digest = Sha256::digest(fulfilment.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        // write! to a String cannot fail
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_preimage() {
        let condition = condition_for("hello");
        assert!(Sha256PreimageValidator.validate(&condition, "hello"));
    }

    #[test]
    fn test_mismatched_preimage() {
        let condition = condition_for("hello");
        assert!(!Sha256PreimageValidator.validate(&condition, "goodbye"));
    }

    #[test]
    fn test_condition_is_case_insensitive() {
        let condition = condition_for("hello").to_uppercase();
        assert!(Sha256PreimageValidator.validate(&condition, "hello"));
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            condition_for(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
