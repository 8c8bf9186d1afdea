//! Credential hashing, request signing and token generation.
//!
//! Raw secrets never leave this module in comparable form: everything that is
//! stored or compared is either a SHA-256 digest or an HMAC tag.

use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Symbols used in activation codes. `0`, `1`, `I` and `O` are left out so codes
/// survive being read aloud or retyped from a screenshot.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Number of symbols in an activation code (excluding group separators).
const CODE_SYMBOLS: usize = 16;

/// Symbols per hyphen-separated group.
const CODE_GROUP: usize = 4;

/// Hash a raw secret for storage.
///
/// Returns 64 lowercase hex characters. Deterministic and side-effect free, so two
/// digests compare equal exactly when the inputs do.
pub fn hash_secret(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compute a hex HMAC-SHA256 tag of `message` keyed with `secret`.
pub fn sign(secret: &[u8], message: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC key length is valid");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Check a hex HMAC-SHA256 tag in constant time.
///
/// A tag that is not valid hex is treated as a mismatch.
pub fn verify_signature(secret: &[u8], message: &str, signature: &str) -> bool {
    let Ok(tag) = hex::decode(signature.trim()) else {
        return false;
    };

    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC key length is valid");
    mac.update(message.as_bytes());
    mac.verify_slice(&tag).is_ok()
}

/// Generate `N` random bytes, hex encoded.
pub fn random_token<const N: usize>() -> String {
    let bytes: [u8; N] = rand::random();
    hex::encode(bytes)
}

/// Generate a fresh activation code in `XXXX-XXXX-XXXX-XXXX` form.
pub fn generate_activation_code() -> String {
    let mut rng = rand::rng();
    let symbols: Vec<u8> = (0..CODE_SYMBOLS)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())])
        .collect();

    group_symbols(&symbols)
}

/// Bring user-typed input into the stored code format.
///
/// Separators and whitespace are dropped and letters upper-cased. Input that then
/// has exactly 16 symbols is re-grouped with hyphens; anything else is returned
/// as-is (upper-cased) and will simply not match a stored code.
pub fn normalize_code(input: &str) -> String {
    let symbols: Vec<u8> = input
        .bytes()
        .filter(|b| *b != b'-' && !b.is_ascii_whitespace())
        .map(|b| b.to_ascii_uppercase())
        .collect();

    if symbols.len() == CODE_SYMBOLS {
        group_symbols(&symbols)
    } else {
        String::from_utf8_lossy(&symbols).into_owned()
    }
}

fn group_symbols(symbols: &[u8]) -> String {
    symbols
        .chunks(CODE_GROUP)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join("-")
}
