//! `coffre-vault` — storage and data-integrity engine for COFFRE.
//!
//! Persists credentials, secure notes, two independent group hierarchies,
//! and typed settings in one embedded database; keeps a tamper-evident
//! password history; maintains a full-text search index in lockstep with
//! credential writes; exports/imports merging backup snapshots; and audits
//! and repairs the persisted shape.
//!
//! Single-process, single handle, no internal concurrency: construct a
//! [`VaultDb`], derive a [`coffre_crypto_core::FieldCipher`] from the vault
//! secret, and hand both to the stores by reference.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod backup;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod groups;
pub mod integrity;
pub mod notes;
pub mod settings;

pub use backup::{
    BackupDocument, BackupEngine, ExportOptions, ImportOptions, ImportReport, MergeStrategy,
    BACKUP_APP_NAME, BACKUP_FORMAT_VERSION,
};
pub use config::{vault_secret_from_env, ENCRYPTION_SECRET_ENV};
pub use credentials::{
    AdvancedSearch, Credential, CredentialStore, CredentialSummary, PasswordChange, SaveCredential,
};
pub use db::VaultDb;
pub use error::VaultError;
pub use groups::{Group, GroupColor, GroupListItem, GroupNode, GroupStore, SaveGroup};
pub use integrity::{IntegrityAuditor, IntegrityReport, RepairReport};
pub use notes::{NoteStore, NoteSummary, SaveNote, SecureNote};
pub use settings::{Setting, SettingCategory, SettingType, SettingsStore};
