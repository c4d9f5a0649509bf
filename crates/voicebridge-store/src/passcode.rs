//! Passcode generation and hashing.
//!
//! Callers authenticate later history lookups with a 6-digit passcode
//! issued when the call starts. Only the SHA-256 digest of the passcode is
//! ever persisted; the plaintext lives in the in-memory session metadata
//! cache until the call ends.

use rand::Rng;
use sha2::{Digest, Sha256};

/// Number of digits in a generated passcode.
pub const PASSCODE_LEN: usize = 6;

/// Generates a random numeric passcode from the OS entropy source.
pub fn generate_passcode() -> String {
    let mut rng = rand::rngs::OsRng;
    (0..PASSCODE_LEN)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// Returns the hex-encoded SHA-256 digest of a passcode.
pub fn hash_passcode(passcode: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(passcode.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_passcodes_are_six_digits() {
        for _ in 0..32 {
            let passcode = generate_passcode();
            assert_eq!(passcode.len(), PASSCODE_LEN);
            assert!(passcode.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn hash_matches_original_and_not_others() {
        let passcode = "123456";
        let digest = hash_passcode(passcode);

        assert_eq!(digest, hash_passcode(passcode), "hashing is deterministic");
        assert_eq!(digest.len(), 64, "hex-encoded SHA-256");
        assert_ne!(digest, hash_passcode("123457"));
        assert_ne!(digest, hash_passcode("000000"));
    }
}
