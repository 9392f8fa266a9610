//! Shared-secret authentication with constant-time comparison.

use sha2::{Digest, Sha256};

/// API-key authenticator. When no key is configured every connection is
/// accepted; when one is configured, the first frame must present it.
#[derive(Debug, Clone)]
pub struct Authenticator {
    expected_digest: Option<[u8; 32]>,
}

impl Authenticator {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            expected_digest: api_key
                .filter(|k| !k.is_empty())
                .map(|k| digest(k.as_bytes())),
        }
    }

    /// Whether clients must present a key at all.
    pub fn required(&self) -> bool {
        self.expected_digest.is_some()
    }

    /// Verify a presented key. Both sides are hashed and compared without
    /// short-circuiting, so reply timing is independent of where the keys
    /// first differ.
    pub fn verify(&self, provided: Option<&str>) -> bool {
        let Some(expected) = &self.expected_digest else {
            return true;
        };
        let Some(provided) = provided else {
            return false;
        };
        constant_time_eq(expected, &digest(provided.as_bytes()))
    }
}

fn digest(input: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hasher.finalize().into()
}

fn constant_time_eq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
