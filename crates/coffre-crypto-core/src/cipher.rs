//! Field encryption — `hex(iv):hex(ciphertext)` token codec.
//!
//! Every secret value (credential password, multi-account blob, note body)
//! is stored as a text token: a random 96-bit IV and the AES-256-GCM
//! ciphertext (tag appended), both lowercase hex, joined by `:`.
//!
//! # Plaintext fallback
//!
//! Vaults created before field encryption existed contain raw plaintext in
//! the secret columns. [`FieldCipher::decrypt`] therefore treats any value
//! that does not parse as a token — missing separator, bad hex, truncated
//! data, failed authentication — as already-decrypted and returns it
//! unchanged. Decryption never returns an error and must stay that way.

use std::fmt;

use data_encoding::{HEXLOWER, HEXLOWER_PERMISSIVE};
use rand::rngs::OsRng;
use rand::RngCore;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::kdf::derive_field_key;
use crate::secret::VaultSecret;

/// Separator between the IV and ciphertext halves of a token.
pub const TOKEN_SEPARATOR: char = ':';

/// Heuristic used by the backup import's just-in-time upgrade path:
/// a value containing the token separator is treated as already encrypted
/// and is never re-encrypted.
#[must_use]
pub fn looks_encrypted(value: &str) -> bool {
    value.contains(TOKEN_SEPARATOR)
}

/// Symmetric field cipher bound to one vault secret.
///
/// The PBKDF2-derived key is computed once at construction and cached for
/// the adapter's lifetime (the derivation is deterministic, so this is
/// observationally identical to deriving per call).
pub struct FieldCipher {
    key: LessSafeKey,
}

impl fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FieldCipher(***)")
    }
}

impl FieldCipher {
    /// Build a cipher from the vault-wide secret.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyDerivation`] if the secret is empty or the
    /// derived key material is rejected by the AEAD implementation.
    pub fn new(secret: &VaultSecret) -> Result<Self, CryptoError> {
        let derived = derive_field_key(secret)?;
        let unbound = UnboundKey::new(&AES_256_GCM, derived.as_ref())
            .map_err(|_| CryptoError::KeyDerivation("derived key material rejected".into()))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
        })
    }

    /// Encrypt a plaintext value into a `hex(iv):hex(ciphertext)` token.
    ///
    /// A fresh random IV is drawn from the OS CSPRNG on every call, so
    /// encrypting the same plaintext twice yields different tokens.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Encryption`] if the AEAD seal fails.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut iv = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut iv);
        let nonce = Nonce::assume_unique_for_key(iv);

        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::Encryption("AEAD seal failed".into()))?;

        let mut token = String::with_capacity(
            NONCE_LEN
                .saturating_add(in_out.len())
                .saturating_mul(2)
                .saturating_add(1),
        );
        token.push_str(&HEXLOWER.encode(&iv));
        token.push(TOKEN_SEPARATOR);
        token.push_str(&HEXLOWER.encode(&in_out));
        Ok(token)
    }

    /// Decrypt a token back to plaintext.
    ///
    /// Any value that does not parse and authenticate as a token is returned
    /// unchanged — see the module docs on the plaintext fallback. This
    /// function is infallible by contract.
    #[must_use]
    pub fn decrypt(&self, token: &str) -> String {
        self.try_decrypt(token)
            .unwrap_or_else(|| token.to_string())
    }

    /// Attempt a strict token parse + decrypt. `None` on any failure.
    fn try_decrypt(&self, token: &str) -> Option<String> {
        let (iv_hex, ct_hex) = token.split_once(TOKEN_SEPARATOR)?;

        let iv_bytes = HEXLOWER_PERMISSIVE.decode(iv_hex.as_bytes()).ok()?;
        let iv: [u8; NONCE_LEN] = iv_bytes.try_into().ok()?;

        let mut in_out = HEXLOWER_PERMISSIVE.decode(ct_hex.as_bytes()).ok()?;
        let nonce = Nonce::assume_unique_for_key(iv);

        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .ok()
            .and_then(|plain| String::from_utf8(plain.to_vec()).ok());

        // The buffer holds decrypted plaintext after a successful open.
        in_out.zeroize();

        plaintext
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> FieldCipher {
        FieldCipher::new(&VaultSecret::new("test-vault-secret")).expect("cipher")
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let c = cipher();
        let token = c.encrypt("s3cur3P@ss!").expect("encrypt");
        assert_eq!(c.decrypt(&token), "s3cur3P@ss!");
    }

    #[test]
    fn roundtrip_preserves_unicode() {
        let c = cipher();
        let token = c.encrypt("pæsswörd — 密码").expect("encrypt");
        assert_eq!(c.decrypt(&token), "pæsswörd — 密码");
    }

    #[test]
    fn roundtrip_empty_string() {
        let c = cipher();
        let token = c.encrypt("").expect("encrypt");
        assert!(looks_encrypted(&token));
        assert_eq!(c.decrypt(&token), "");
    }

    #[test]
    fn token_shape_is_hex_colon_hex() {
        let c = cipher();
        let token = c.encrypt("value").expect("encrypt");
        let (iv, ct) = token.split_once(':').expect("separator");
        assert_eq!(iv.len(), NONCE_LEN * 2);
        assert!(iv.chars().all(|ch| ch.is_ascii_hexdigit()));
        assert!(ct.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn fresh_iv_per_call() {
        let c = cipher();
        let a = c.encrypt("same").expect("encrypt");
        let b = c.encrypt("same").expect("encrypt");
        assert_ne!(a, b);
        assert_eq!(c.decrypt(&a), c.decrypt(&b));
    }

    #[test]
    fn non_token_passes_through_unchanged() {
        let c = cipher();
        assert_eq!(c.decrypt("legacy plaintext"), "legacy plaintext");
        assert_eq!(c.decrypt(""), "");
        assert_eq!(c.decrypt("no separator here"), "no separator here");
    }

    #[test]
    fn malformed_hex_passes_through_unchanged() {
        let c = cipher();
        assert_eq!(c.decrypt("zz:zz"), "zz:zz");
        assert_eq!(c.decrypt("deadbeef:nothex"), "deadbeef:nothex");
        assert_eq!(c.decrypt(":"), ":");
    }

    #[test]
    fn truncated_token_passes_through_unchanged() {
        let c = cipher();
        let token = c.encrypt("value").expect("encrypt");
        let truncated: String = token.chars().take(token.len().saturating_sub(6)).collect();
        assert_eq!(c.decrypt(&truncated), truncated);
    }

    #[test]
    fn tampered_ciphertext_passes_through_unchanged() {
        let c = cipher();
        let token = c.encrypt("value").expect("encrypt");
        // Flip the last hex digit.
        let mut chars: Vec<char> = token.chars().collect();
        let last = chars.last_mut().expect("non-empty");
        *last = if *last == '0' { '1' } else { '0' };
        let tampered: String = chars.into_iter().collect();
        assert_eq!(c.decrypt(&tampered), tampered);
    }

    #[test]
    fn wrong_key_passes_through_unchanged() {
        let a = FieldCipher::new(&VaultSecret::new("secret-a")).expect("cipher");
        let b = FieldCipher::new(&VaultSecret::new("secret-b")).expect("cipher");
        let token = a.encrypt("value").expect("encrypt");
        assert_eq!(b.decrypt(&token), token);
    }

    #[test]
    fn looks_encrypted_heuristic() {
        assert!(looks_encrypted("ab:cd"));
        assert!(looks_encrypted(":"));
        assert!(!looks_encrypted("plain password"));
        assert!(!looks_encrypted(""));
    }
}
