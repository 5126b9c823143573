//! Vault backup: versioned export documents and the merging importer.
//!
//! The plain format is a JSON document with one array per entity family,
//! secret fields kept as encrypted tokens. The archive format wraps the
//! same document in a gzip tar sealed under a caller-supplied password.
//!
//! Import runs entity families in dependency order and is deliberately
//! **not** one atomic transaction: a failure partway through leaves
//! already-imported entities committed, and per-item failures are
//! accumulated rather than aborting the batch.

pub mod archive;
mod export;
mod import;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use coffre_crypto_core::FieldCipher;

use crate::db::VaultDb;
use crate::error::VaultError;

// ---------------------------------------------------------------------------
// Format constants
// ---------------------------------------------------------------------------

/// Current backup document version.
pub const BACKUP_FORMAT_VERSION: u32 = 1;

/// `app_name` stamped on exported documents.
pub const BACKUP_APP_NAME: &str = "COFFRE";

// ---------------------------------------------------------------------------
// Document types
// ---------------------------------------------------------------------------

/// The versioned backup snapshot. Arrays are present only when the
/// corresponding include flag was set at export time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupDocument {
    pub version: u32,
    pub exported_at: String,
    pub app_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passwords: Option<Vec<BackupCredential>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<BackupGroup>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_groups: Option<Vec<BackupGroup>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<Vec<BackupNote>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_settings: Option<Vec<BackupSetting>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_history: Option<Vec<BackupHistoryEntry>>,
}

/// A credential in the snapshot. Secret fields are encrypted tokens —
/// never plaintext on our own exports, though the importer upgrades
/// legacy plaintext values it encounters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupCredential {
    pub id: i64,
    pub title: String,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub multi_account_data: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

/// A group (either family) in the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupGroup {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default)]
    pub sort: i64,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

fn default_color() -> String {
    "slate".to_string()
}

/// A secure note in the snapshot (content is an encrypted token).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupNote {
    pub id: i64,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

/// A settings row in the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSetting {
    pub key: String,
    pub value: String,
    #[serde(default = "default_setting_type")]
    pub value_type: String,
    #[serde(default = "default_setting_category")]
    pub category: String,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_setting_type() -> String {
    "string".to_string()
}

fn default_setting_category() -> String {
    "general".to_string()
}

/// A password history row in the snapshot (values are tokens).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupHistoryEntry {
    pub id: i64,
    pub credential_id: i64,
    pub old_password: String,
    pub new_password: String,
    #[serde(default)]
    pub changed_at: String,
    #[serde(default)]
    pub reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Options and reports
// ---------------------------------------------------------------------------

/// Which entity families an export includes.
#[derive(Debug, Clone, Copy)]
pub struct ExportOptions {
    pub include_credentials: bool,
    pub include_groups: bool,
    pub include_note_groups: bool,
    pub include_notes: bool,
    pub include_settings: bool,
    pub include_history: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_credentials: true,
            include_groups: true,
            include_note_groups: true,
            include_notes: true,
            include_settings: true,
            include_history: true,
        }
    }
}

/// Policy governing how an imported entity interacts with an existing one
/// of the same identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Clear all existing data before importing.
    Replace,
    /// Overwrite an existing entity matched by id or natural key.
    #[default]
    Merge,
    /// Leave existing entities untouched; count them as skipped.
    Skip,
}

/// Import behavior switches.
#[derive(Debug, Clone, Copy)]
pub struct ImportOptions {
    pub merge_strategy: MergeStrategy,
    /// Statically validate the document and abort before any mutation if
    /// it is invalid.
    pub validate_integrity: bool,
    /// Validate only; never mutate.
    pub dry_run: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            merge_strategy: MergeStrategy::Merge,
            validate_integrity: true,
            dry_run: false,
        }
    }
}

/// Outcome of an import run.
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    /// Entities written (inserted or overwritten).
    pub imported: usize,
    /// Entities left untouched under the `skip` strategy (or duplicate
    /// history rows).
    pub skipped: usize,
    /// Per-item failures; the rest of the batch still ran.
    pub errors: Vec<String>,
    /// Non-fatal observations from validation and import.
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// BackupEngine
// ---------------------------------------------------------------------------

/// Serializes and restores full vault snapshots.
pub struct BackupEngine<'v> {
    conn: &'v Connection,
    cipher: &'v FieldCipher,
}

impl<'v> BackupEngine<'v> {
    #[must_use]
    pub fn new(db: &'v VaultDb, cipher: &'v FieldCipher) -> Self {
        Self {
            conn: db.connection(),
            cipher,
        }
    }

    /// Export the selected entity families as a plain JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Database`] on read failure or
    /// [`VaultError::Export`] if the document cannot be serialized.
    pub fn export(&self, options: &ExportOptions) -> Result<Vec<u8>, VaultError> {
        let document = export::build_document(self.conn, options)?;
        serde_json::to_vec_pretty(&document)
            .map_err(|e| VaultError::Export(format!("failed to serialize backup document: {e}")))
    }

    /// Export as a password-protected compressed archive.
    ///
    /// # Errors
    ///
    /// In addition to [`Self::export`] failures, returns
    /// [`VaultError::Export`] when `archive_password` is shorter than
    /// 4 characters.
    pub fn export_archive(
        &self,
        options: &ExportOptions,
        archive_password: &str,
    ) -> Result<Vec<u8>, VaultError> {
        let document = self.export(options)?;
        archive::wrap(&document, archive_password)
    }

    /// Import a plain JSON snapshot.
    ///
    /// See the module docs for the merge, validation, and atomicity
    /// semantics.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Import`] if the blob is not a parseable
    /// backup document. Validation findings and per-item failures are
    /// reported through [`ImportReport`], not raised.
    pub fn import(&self, blob: &[u8], options: &ImportOptions) -> Result<ImportReport, VaultError> {
        let document: BackupDocument = serde_json::from_slice(blob)
            .map_err(|e| VaultError::Import(format!("failed to parse backup document: {e}")))?;
        import::import_document(self.conn, self.cipher, &document, options)
    }

    /// Import from a password-protected archive.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Import`] for a wrong password or a corrupted
    /// archive, plus everything [`Self::import`] can return.
    pub fn import_archive(
        &self,
        blob: &[u8],
        archive_password: &str,
        options: &ImportOptions,
    ) -> Result<ImportReport, VaultError> {
        let document = archive::unwrap(blob, archive_password)?;
        self.import(&document, options)
    }
}
