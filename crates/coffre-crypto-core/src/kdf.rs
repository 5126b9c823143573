//! PBKDF2 key derivation for field encryption.
//!
//! The vault derives one 256-bit field key from the vault-wide secret using
//! PBKDF2-HMAC-SHA256 with a fixed iteration count and a fixed salt label.
//! The parameters are part of the persisted token format: changing either
//! silently orphans every stored ciphertext, so they are frozen constants.

use std::num::NonZeroU32;

use ring::pbkdf2;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::secret::VaultSecret;

/// PBKDF2 iteration count. Frozen — see module docs.
const PBKDF2_ITERATIONS: u32 = 100_000;

/// Fixed salt label for field-key derivation. Frozen — see module docs.
const FIELD_KEY_SALT: &[u8] = b"coffre-field-salt-v1";

/// Derived key length in bytes (AES-256).
pub const FIELD_KEY_LEN: usize = 32;

/// Derive the 256-bit field-encryption key from the vault secret.
///
/// Deterministic for a given secret, so callers may cache the result keyed
/// by the secret without changing external behavior.
///
/// # Errors
///
/// Returns [`CryptoError::KeyDerivation`] if the secret is empty.
pub fn derive_field_key(secret: &VaultSecret) -> Result<Zeroizing<[u8; FIELD_KEY_LEN]>, CryptoError> {
    if secret.is_empty() {
        return Err(CryptoError::KeyDerivation(
            "vault secret must not be empty".into(),
        ));
    }

    let iterations = NonZeroU32::new(PBKDF2_ITERATIONS)
        .ok_or_else(|| CryptoError::KeyDerivation("iteration count must be non-zero".into()))?;

    let mut key = Zeroizing::new([0u8; FIELD_KEY_LEN]);
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        FIELD_KEY_SALT,
        secret.expose(),
        key.as_mut(),
    );

    Ok(key)
}
