//! Password-sealed binary blobs for backup archives.
//!
//! Unlike field tokens, a sealed blob is protected by a *caller-supplied*
//! password (distinct from the vault secret) and a random per-blob salt.
//! Wire layout:
//!
//! ```text
//! magic (8) | version (1) | salt (16) | nonce (12) | ciphertext + tag
//! ```
//!
//! Opening a sealed blob is strict: unlike the field-token path there is no
//! plaintext fallback — a wrong password or a corrupted blob is an error.

use std::num::NonZeroU32;

use rand::rngs::OsRng;
use rand::RngCore;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::pbkdf2;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// File magic identifying a sealed blob.
const MAGIC: &[u8; 8] = b"COFFRESL";

/// Current sealed-blob format version.
const VERSION: u8 = 1;

/// Salt length in bytes.
const SALT_LEN: usize = 16;

/// PBKDF2 iteration count for the blob password.
const PBKDF2_ITERATIONS: u32 = 100_000;

/// Byte offsets within the header.
const SALT_OFFSET: usize = 9;
const NONCE_OFFSET: usize = SALT_OFFSET + SALT_LEN;

/// Header length: magic + version + salt + nonce.
const HEADER_LEN: usize = NONCE_OFFSET + NONCE_LEN;

/// Seal `plaintext` under `password` with a fresh salt and nonce.
///
/// # Errors
///
/// Returns [`CryptoError::KeyDerivation`] for an empty password and
/// [`CryptoError::Encryption`] if the AEAD seal fails.
pub fn seal(password: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let key = derive_blob_key(password, &salt)?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = plaintext.to_vec();
    key.seal_in_place_append_tag(nonce, Aad::from(MAGIC), &mut in_out)
        .map_err(|_| CryptoError::Encryption("AEAD seal failed".into()))?;

    let mut blob = Vec::with_capacity(HEADER_LEN.saturating_add(in_out.len()));
    blob.extend_from_slice(MAGIC);
    blob.push(VERSION);
    blob.extend_from_slice(&salt);
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&in_out);
    Ok(blob)
}

/// Open a sealed blob with `password`, returning the plaintext.
///
/// # Errors
///
/// Returns [`CryptoError::Decryption`] when the blob is malformed, the
/// version is unsupported, or the password is wrong (authentication
/// failure is indistinguishable from corruption by design).
pub fn open(password: &[u8], blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if blob.len() < HEADER_LEN {
        return Err(CryptoError::Decryption("sealed blob too short".into()));
    }
    if &blob[..8] != MAGIC {
        return Err(CryptoError::Decryption("not a sealed blob".into()));
    }
    let version = blob[8];
    if version != VERSION {
        return Err(CryptoError::Decryption(format!(
            "unsupported sealed blob version: {version}"
        )));
    }

    let salt = &blob[SALT_OFFSET..NONCE_OFFSET];
    let mut nonce_bytes = [0u8; NONCE_LEN];
    nonce_bytes.copy_from_slice(&blob[NONCE_OFFSET..HEADER_LEN]);

    let key = derive_blob_key(password, salt)?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = blob[HEADER_LEN..].to_vec();
    let plaintext = key
        .open_in_place(nonce, Aad::from(MAGIC), &mut in_out)
        .map_err(|_| CryptoError::Decryption("wrong password or corrupted blob".into()))?;
    Ok(plaintext.to_vec())
}

fn derive_blob_key(password: &[u8], salt: &[u8]) -> Result<LessSafeKey, CryptoError> {
    if password.is_empty() {
        return Err(CryptoError::KeyDerivation(
            "blob password must not be empty".into(),
        ));
    }
    let iterations = NonZeroU32::new(PBKDF2_ITERATIONS)
        .ok_or_else(|| CryptoError::KeyDerivation("iteration count must be non-zero".into()))?;

    let mut key_bytes = Zeroizing::new([0u8; 32]);
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        salt,
        password,
        key_bytes.as_mut(),
    );

    let unbound = UnboundKey::new(&AES_256_GCM, key_bytes.as_ref())
        .map_err(|_| CryptoError::KeyDerivation("derived key material rejected".into()))?;
    Ok(LessSafeKey::new(unbound))
}
