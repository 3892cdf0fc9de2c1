//! Schema-shape validators for wire fields, ahead of the stricter decode
//! each field gets downstream (`Pubkey::from_str`, base64 decoding proper).
//!
//! These are cheap pre-checks on the wire format itself, not on-chain
//! validity: a string can match [`is_base58_address`] and still not name a
//! real, live account.

use once_cell::sync::Lazy;
use regex::Regex;

/// Shape of a base58 Solana address: a 32-byte key base58-encodes to 32-44
/// characters, so the bound is widened from a generic slug pattern to that
/// range rather than the narrower one a non-Solana wire codec might use.
static SOLANA_ADDRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9-]{30,42}[A-Za-z0-9]$").expect("static regex is valid"));

/// Shape of a base64-encoded field (the transaction envelope, settle headers).
static BASE64_FIELD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9+/]*={0,2}$").expect("static regex is valid"));

pub fn is_base58_address(s: &str) -> bool {
    SOLANA_ADDRESS_RE.is_match(s)
}

pub fn is_base64_field(s: &str) -> bool {
    BASE64_FIELD_RE.is_match(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_addresses() {
        assert!(is_base58_address("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"));
        assert!(is_base58_address("11111111111111111111111111111111"));
    }

    #[test]
    fn rejects_addresses_with_bad_characters_or_length() {
        assert!(!is_base58_address("not a pubkey"));
        assert!(!is_base58_address(""));
        assert!(!is_base58_address(&"A".repeat(50)));
        assert!(!is_base58_address("short"));
    }

    #[test]
    fn accepts_well_formed_base64() {
        assert!(is_base64_field("aGVsbG8gd29ybGQ="));
        assert!(is_base64_field(""));
    }

    #[test]
    fn rejects_base64_with_invalid_characters() {
        assert!(!is_base64_field("not base64!!"));
        assert!(!is_base64_field("abc=def"));
    }
}
