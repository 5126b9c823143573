//! Crypto error types for `coffre-crypto-core`.

use thiserror::Error;

/// Errors produced by cryptographic operations.
///
/// Note that token *decryption* never produces an error — malformed tokens
/// fall back to the plaintext-passthrough path (see [`crate::FieldCipher`]).
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key derivation failed (bad parameters or empty secret).
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Symmetric encryption failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Sealed-blob decryption failed (wrong password, corruption, or an
    /// unsupported format version).
    #[error("decryption failed: {0}")]
    Decryption(String),
}
