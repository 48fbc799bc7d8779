//! Nonce and transaction identifier generation

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Length in bytes of a proposal nonce.
pub const NONCE_SIZE: usize = 24;

/// A fresh random nonce from the OS random number generator.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Derive the transaction id for a proposal: the hex SHA-256 of the nonce
/// followed by the creator's certificate.
pub fn transaction_id(nonce: &[u8], creator_certificate: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(nonce);
    hasher.update(creator_certificate.as_bytes());
    hex::encode(hasher.finalize())
}
