//! API-key generation and hashing. Keys are 32 random bytes, base64url
//! encoded; the server stores only the SHA-256 hash, never the plaintext.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Generate a fresh opaque API key. The caller is responsible for returning
/// the plaintext to the client exactly once and persisting only its hash.
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn hash_api_key(raw_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_key.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_unique_and_url_safe() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert_ne!(a, b);
        assert!(!a.contains('+'));
        assert!(!a.contains('/'));
    }

    #[test]
    fn hash_is_deterministic() {
        let key = "some-raw-key";
        assert_eq!(hash_api_key(key), hash_api_key(key));
        assert_ne!(hash_api_key(key), hash_api_key("different"));
    }
}
