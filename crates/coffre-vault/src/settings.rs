//! Typed key/value settings registry.
//!
//! A flat table of dotted lowercase keys with type-tagged string values.
//! Keys are globally unique as a store invariant — the table itself has no
//! UNIQUE constraint, so the integrity auditor can catch duplicates that
//! corruption or bypassing writes leave behind.
//!
//! Values are never secrets; nothing here touches the field cipher.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::clock::now_iso8601;
use crate::db::VaultDb;
use crate::error::VaultError;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Closed set of setting categories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingCategory {
    Security,
    Backup,
    Appearance,
    #[default]
    General,
}

impl SettingCategory {
    /// Convert to the string stored in the database.
    #[must_use]
    pub const fn as_db_str(self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Backup => "backup",
            Self::Appearance => "appearance",
            Self::General => "general",
        }
    }

    /// Parse from the database `TEXT` value.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Validation`] for unknown categories.
    pub fn from_db_str(s: &str) -> Result<Self, VaultError> {
        match s {
            "security" => Ok(Self::Security),
            "backup" => Ok(Self::Backup),
            "appearance" => Ok(Self::Appearance),
            "general" => Ok(Self::General),
            other => Err(VaultError::Validation(format!(
                "unknown setting category: {other}"
            ))),
        }
    }
}

/// Type tag governing how a stored value string is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingType {
    #[default]
    String,
    Number,
    Boolean,
    Json,
}

impl SettingType {
    /// Convert to the string stored in the database.
    #[must_use]
    pub const fn as_db_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Json => "json",
        }
    }

    /// Parse from the database `TEXT` value.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Validation`] for unknown type tags.
    pub fn from_db_str(s: &str) -> Result<Self, VaultError> {
        match s {
            "string" => Ok(Self::String),
            "number" => Ok(Self::Number),
            "boolean" => Ok(Self::Boolean),
            "json" => Ok(Self::Json),
            other => Err(VaultError::Validation(format!(
                "unknown setting type: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain model
// ---------------------------------------------------------------------------

/// One settings row.
#[derive(Debug, Clone)]
pub struct Setting {
    pub id: i64,
    pub key: String,
    pub value: String,
    pub value_type: SettingType,
    pub category: SettingCategory,
    pub description: Option<String>,
    pub updated_at: String,
}

/// A default-settings table entry.
struct DefaultSetting {
    key: &'static str,
    value: &'static str,
    value_type: SettingType,
    category: SettingCategory,
    description: &'static str,
}

/// Defaults seeded idempotently on first initialization.
const DEFAULT_SETTINGS: &[DefaultSetting] = &[
    DefaultSetting {
        key: "security.auto_lock_timeout",
        value: "300",
        value_type: SettingType::Number,
        category: SettingCategory::Security,
        description: "Seconds of inactivity before the vault locks",
    },
    DefaultSetting {
        key: "security.clipboard_clear_seconds",
        value: "30",
        value_type: SettingType::Number,
        category: SettingCategory::Security,
        description: "Seconds before copied secrets are cleared from the clipboard",
    },
    DefaultSetting {
        key: "backup.auto_backup_enabled",
        value: "false",
        value_type: SettingType::Boolean,
        category: SettingCategory::Backup,
        description: "Whether scheduled automatic backups are enabled",
    },
    DefaultSetting {
        key: "backup.include_history",
        value: "true",
        value_type: SettingType::Boolean,
        category: SettingCategory::Backup,
        description: "Whether exports include password history",
    },
    DefaultSetting {
        key: "appearance.theme",
        value: "system",
        value_type: SettingType::String,
        category: SettingCategory::Appearance,
        description: "UI theme: system, light, or dark",
    },
    DefaultSetting {
        key: "general.default_group_colors",
        value: "{\"credentials\":\"slate\",\"notes\":\"slate\"}",
        value_type: SettingType::Json,
        category: SettingCategory::General,
        description: "Default color per group family",
    },
];

// ---------------------------------------------------------------------------
// SettingsStore
// ---------------------------------------------------------------------------

/// Flat typed configuration registry.
pub struct SettingsStore<'v> {
    conn: &'v Connection,
}

impl<'v> SettingsStore<'v> {
    #[must_use]
    pub fn new(db: &'v VaultDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    pub(crate) const fn with_connection(conn: &'v Connection) -> Self {
        Self { conn }
    }

    // -- Seeding ------------------------------------------------------------

    /// Insert any default setting whose key is absent. Idempotent; existing
    /// values (including user edits) are never touched.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Database`] if a statement fails.
    pub fn seed_defaults(&self) -> Result<(), VaultError> {
        let now = now_iso8601();
        for default in DEFAULT_SETTINGS {
            let exists: Option<i64> = self
                .conn
                .query_row(
                    "SELECT id FROM user_settings WHERE key = ?1 LIMIT 1",
                    params![default.key],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                self.conn.execute(
                    "INSERT INTO user_settings (key, value, value_type, category, \
                     description, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        default.key,
                        default.value,
                        default.value_type.as_db_str(),
                        default.category.as_db_str(),
                        default.description,
                        now
                    ],
                )?;
            }
        }
        Ok(())
    }

    // -- Queries ------------------------------------------------------------

    /// All settings, optionally filtered by category, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Database`] if the query fails.
    pub fn list(&self, category: Option<SettingCategory>) -> Result<Vec<Setting>, VaultError> {
        let (sql, args): (&str, Vec<String>) = match category {
            Some(cat) => (
                "SELECT id, key, value, value_type, category, description, updated_at \
                 FROM user_settings WHERE category = ?1 ORDER BY key ASC",
                vec![cat.as_db_str().to_string()],
            ),
            None => (
                "SELECT id, key, value, value_type, category, description, updated_at \
                 FROM user_settings ORDER BY key ASC",
                Vec::new(),
            ),
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args), row_to_parts)?;

        let mut settings = Vec::new();
        for row in rows {
            settings.push(parts_to_setting(row?)?);
        }
        Ok(settings)
    }

    /// Look up one setting by key.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Database`] if the query fails.
    pub fn get(&self, key: &str) -> Result<Option<Setting>, VaultError> {
        let parts = self
            .conn
            .query_row(
                "SELECT id, key, value, value_type, category, description, updated_at \
                 FROM user_settings WHERE key = ?1 LIMIT 1",
                params![key],
                row_to_parts,
            )
            .optional()?;
        parts.map(parts_to_setting).transpose()
    }

    /// String value of `key`, or `default` when missing or mistyped.
    /// Never raises — parse failures fall back to the default.
    #[must_use]
    pub fn get_string(&self, key: &str, default: &str) -> String {
        match self.get(key) {
            Ok(Some(setting)) if setting.value_type == SettingType::String => setting.value,
            _ => default.to_string(),
        }
    }

    /// Numeric value of `key`, or `default` on any parse failure.
    #[must_use]
    pub fn get_number(&self, key: &str, default: f64) -> f64 {
        match self.get(key) {
            Ok(Some(setting)) if setting.value_type == SettingType::Number => {
                setting.value.parse().unwrap_or(default)
            }
            _ => default,
        }
    }

    /// Boolean value of `key`, or `default` on any parse failure.
    /// Accepts `true`/`false` and `1`/`0`.
    #[must_use]
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Ok(Some(setting)) if setting.value_type == SettingType::Boolean => {
                match setting.value.as_str() {
                    "true" | "1" => true,
                    "false" | "0" => false,
                    _ => default,
                }
            }
            _ => default,
        }
    }

    /// JSON value of `key`, or `default` on any parse failure.
    #[must_use]
    pub fn get_json(&self, key: &str, default: serde_json::Value) -> serde_json::Value {
        match self.get(key) {
            Ok(Some(setting)) if setting.value_type == SettingType::Json => {
                serde_json::from_str(&setting.value).unwrap_or(default)
            }
            _ => default,
        }
    }

    // -- Mutations ----------------------------------------------------------

    /// Upsert a setting. Key shape is validated; the `updated_at` stamp is
    /// refreshed on every write.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Validation`] for a malformed key.
    pub fn set(
        &self,
        key: &str,
        value: &str,
        value_type: SettingType,
        category: SettingCategory,
        description: Option<&str>,
    ) -> Result<Setting, VaultError> {
        validate_key(key)?;
        let now = now_iso8601();

        let updated = self.conn.execute(
            "UPDATE user_settings SET value = ?1, value_type = ?2, category = ?3, \
             description = ?4, updated_at = ?5 WHERE key = ?6",
            params![
                value,
                value_type.as_db_str(),
                category.as_db_str(),
                description,
                now,
                key
            ],
        )?;
        if updated == 0 {
            self.conn.execute(
                "INSERT INTO user_settings (key, value, value_type, category, description, \
                 updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    key,
                    value,
                    value_type.as_db_str(),
                    category.as_db_str(),
                    description,
                    now
                ],
            )?;
        }

        self.get(key)?.ok_or(VaultError::Database(
            "setting vanished during upsert".into(),
        ))
    }

    /// Reset one key: restore the seeded default if the key has one,
    /// otherwise delete the row.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Database`] if a statement fails.
    pub fn reset(&self, key: &str) -> Result<(), VaultError> {
        if let Some(default) = DEFAULT_SETTINGS.iter().find(|d| d.key == key) {
            self.set(
                default.key,
                default.value,
                default.value_type,
                default.category,
                Some(default.description),
            )?;
        } else {
            self.conn
                .execute("DELETE FROM user_settings WHERE key = ?1", params![key])?;
        }
        Ok(())
    }

    /// Reset the whole registry to the seeded defaults.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Database`] if a statement fails.
    pub fn reset_all(&self) -> Result<(), VaultError> {
        self.conn.execute("DELETE FROM user_settings", [])?;
        self.seed_defaults()
    }

    /// Bulk upsert (backup import path). Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Validation`] on the first malformed key.
    pub fn import(
        &self,
        settings: &[(String, String, SettingType, SettingCategory, Option<String>)],
    ) -> Result<usize, VaultError> {
        let mut written: usize = 0;
        for (key, value, value_type, category, description) in settings {
            self.set(key, value, *value_type, *category, description.as_deref())?;
            written = written.saturating_add(1);
        }
        Ok(written)
    }
}

// ---------------------------------------------------------------------------
// Key validation
// ---------------------------------------------------------------------------

/// Keys are dotted lowercase identifiers: `security.auto_lock_timeout`.
fn validate_key(key: &str) -> Result<(), VaultError> {
    let valid = !key.is_empty()
        && key.split('.').all(|segment| {
            segment
                .bytes()
                .next()
                .is_some_and(|b| b.is_ascii_lowercase())
                && segment
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        });
    if valid {
        Ok(())
    } else {
        Err(VaultError::Validation(format!(
            "setting key must be a dotted lowercase identifier, got {key:?}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Row plumbing
// ---------------------------------------------------------------------------

type SettingParts = (i64, String, String, String, String, Option<String>, String);

fn row_to_parts(row: &rusqlite::Row<'_>) -> rusqlite::Result<SettingParts> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn parts_to_setting(parts: SettingParts) -> Result<Setting, VaultError> {
    let (id, key, value, value_type, category, description, updated_at) = parts;
    Ok(Setting {
        id,
        key,
        value,
        value_type: SettingType::from_db_str(&value_type)?,
        category: SettingCategory::from_db_str(&category)?,
        description,
        updated_at,
    })
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
