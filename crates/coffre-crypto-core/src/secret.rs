//! The vault-wide encryption secret.
//!
//! A thin zeroizing wrapper so the raw secret string never leaks through
//! `Debug` output or lingers on the heap after drop. Where the secret comes
//! from (environment, keychain) is the host application's concern —
//! `coffre-vault` provides the environment-variable loader.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// The vault-wide secret all field keys are derived from.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct VaultSecret {
    value: String,
}

impl VaultSecret {
    /// Wrap a secret string.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// Expose the raw secret bytes for key derivation.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        self.value.as_bytes()
    }

    /// Whether the secret is empty (rejected by key derivation).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl fmt::Debug for VaultSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VaultSecret(***)")
    }
}
