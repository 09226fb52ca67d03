//! Authentication Layer for rackrpc
//!
//! Racks and regions share a secret. Each side proves knowledge of it by
//! answering a challenge: the challenger sends 16 random bytes, the responder
//! picks a fresh 16-byte salt and returns `HMAC-SHA256(secret, message || salt)`
//! together with the salt. The challenger recomputes the digest and compares.
//!
//! # Security Model
//!
//! - The secret never crosses the wire
//! - Digests are compared in constant time
//! - Challenges and salts are single-use
//!
//! # Example
//!
//! ```
//! use rackrpc_common::auth::{calculate_digest, Challenge};
//!
//! let secret = b"shared-secret";
//! let challenge = Challenge::generate();
//!
//! // What the remote end does with our message:
//! let salt = rackrpc_common::auth::generate_salt();
//! let digest = calculate_digest(secret, challenge.message(), &salt);
//!
//! assert!(challenge.verify(secret, &digest, &salt));
//! ```

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::fmt;

/// Length of challenge messages and salts, in bytes.
pub const NONCE_LEN: usize = 16;

type HmacSha256 = Hmac<Sha256>;

/// Computes the digest a responder returns for `message` and `salt`.
pub fn calculate_digest(secret: &[u8], message: &[u8], salt: &[u8]) -> Vec<u8> {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC accepts keys of any length"),
    };
    mac.update(message);
    mac.update(salt);
    mac.finalize().into_bytes().to_vec()
}

/// Generates a fresh random salt.
pub fn generate_salt() -> [u8; NONCE_LEN] {
    let mut salt = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Pending state for one outgoing authentication attempt.
///
/// Owned by a single handshake and dropped when the handshake finishes.
pub struct Challenge {
    message: [u8; NONCE_LEN],
}

impl Challenge {
    /// Creates a challenge with 16 bytes of fresh randomness.
    pub fn generate() -> Self {
        let mut message = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut message);
        Self { message }
    }

    /// The bytes to send to the remote end.
    pub fn message(&self) -> &[u8] {
        &self.message
    }

    /// Checks the remote's answer against the locally computed digest.
    pub fn verify(&self, secret: &[u8], digest: &[u8], salt: &[u8]) -> bool {
        let expected = calculate_digest(secret, &self.message, salt);
        constant_time_eq(&expected, digest)
    }
}

impl fmt::Debug for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Challenge").field("message", &"*****").finish()
    }
}

/// Answers a remote challenge: returns `(digest, salt)`.
pub fn respond_to_challenge(secret: &[u8], message: &[u8]) -> (Vec<u8>, [u8; NONCE_LEN]) {
    let salt = generate_salt();
    let digest = calculate_digest(secret, message, &salt);
    (digest, salt)
}

/// Performs constant-time comparison to prevent timing attacks.
///
/// Always walks the full input regardless of where the first difference is.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (byte_a, byte_b) in a.iter().zip(b.iter()) {
        result |= byte_a ^ byte_b;
    }

    result == 0
}
