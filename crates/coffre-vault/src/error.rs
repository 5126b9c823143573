//! Vault error types for `coffre-vault`.

use coffre_crypto_core::CryptoError;
use thiserror::Error;

/// Errors produced by vault storage operations.
///
/// Integrity findings are never raised through this type — the auditor
/// collects them into report lists instead. Likewise, malformed ciphertext
/// tokens are not errors: the crypto layer falls back to plaintext.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Cryptographic operation failed (delegated from crypto-core).
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Input failed shape, length, or format validation. No write occurred.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced entity id does not exist. No write occurred.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind, e.g. `"credential"` or `"group"`.
        entity: &'static str,
        /// The id that failed to resolve.
        id: i64,
    },

    /// A referenced foreign row (group, credential) is missing.
    /// Checked before write; no partial state is left behind.
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// Embedded database error.
    #[error("database error: {0}")]
    Database(String),

    /// Backup document parsing or import-phase failure.
    #[error("import error: {0}")]
    Import(String),

    /// Backup export or archive creation failure.
    #[error("export error: {0}")]
    Export(String),

    /// Schema migration failure. Swallowed by the startup runner; only
    /// surfaced from internal migration plumbing.
    #[error("migration error: {0}")]
    Migration(String),

    /// I/O error from the filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for VaultError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}
