//! HMAC-SHA256 digest used to sign work items.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Lowercase hex HMAC-SHA256 of `message` keyed by `key`.
pub fn hmac_sha256_hex(key: &str, message: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC can take key of any size");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_rfc4231_case_2() {
        assert_eq!(
            hmac_sha256_hex("Jefe", "what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn is_deterministic() {
        let a = hmac_sha256_hex("test.key", "message_42");
        let b = hmac_sha256_hex("test.key", "message_42");
        assert_eq!(a, b);
    }

    #[test]
    fn is_lowercase_hex_of_64_chars() {
        let d = hmac_sha256_hex("test.key", "message_1");
        assert_eq!(d.len(), 64);
        assert!(d.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn key_and_message_are_not_interchangeable() {
        assert_ne!(hmac_sha256_hex("a", "b"), hmac_sha256_hex("b", "a"));
    }
}
