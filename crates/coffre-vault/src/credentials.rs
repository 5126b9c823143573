//! Credential CRUD, versioned password history, and search.
//!
//! Secret fields (password, multi-account blob) are stored as field-cipher
//! tokens; title, username, url, and notes stay in clear and feed the
//! `credentials_fts` search index. The index has no invalidation of its
//! own: every insert/update/delete below performs the matching
//! `index_upsert`/`index_remove` step inside the same transaction, and no
//! other credential write path exists.

use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use zeroize::Zeroize;

use coffre_crypto_core::FieldCipher;

use crate::clock::{iso8601_from_epoch, now_epoch_secs, now_iso8601};
use crate::db::VaultDb;
use crate::error::VaultError;
use crate::groups::GroupStore;

// ---------------------------------------------------------------------------
// Field bounds
// ---------------------------------------------------------------------------

/// Maximum length for title and username.
pub(crate) const MAX_TEXT_LEN: usize = 255;
/// Maximum URL length.
pub(crate) const MAX_URL_LEN: usize = 2048;
/// Maximum notes length.
pub(crate) const MAX_NOTES_LEN: usize = 10_000;
/// Maximum multi-account blob length (plaintext).
pub(crate) const MAX_MULTI_ACCOUNT_LEN: usize = 100_000;

// ---------------------------------------------------------------------------
// Domain model
// ---------------------------------------------------------------------------

/// Full credential with decrypted secret fields.
#[derive(Debug, Clone)]
pub struct Credential {
    pub id: i64,
    pub title: String,
    pub username: String,
    /// Decrypted single password, if the credential has one.
    pub password: Option<String>,
    /// Decrypted multi-account blob, if the credential has one.
    pub multi_account_data: Option<String>,
    pub url: Option<String>,
    pub notes: Option<String>,
    pub group_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

/// Wipe decrypted secrets when the struct leaves scope. Covers the primary
/// in-memory lifetime; intermediate strings created by callers are theirs
/// to manage.
impl Drop for Credential {
    fn drop(&mut self) {
        if let Some(ref mut password) = self.password {
            password.zeroize();
        }
        if let Some(ref mut multi) = self.multi_account_data {
            multi.zeroize();
        }
    }
}

/// Clear-field view for list and search results — no decryption performed.
#[derive(Debug, Clone)]
pub struct CredentialSummary {
    pub id: i64,
    pub title: String,
    pub username: String,
    pub url: Option<String>,
    pub notes: Option<String>,
    pub group_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

/// A password change record, decrypted for the caller.
///
/// Rows are append-only at rest; this is a read-side view.
#[derive(Debug, Clone)]
pub struct PasswordChange {
    pub id: i64,
    pub credential_id: i64,
    pub old_password: String,
    pub new_password: String,
    pub changed_at: String,
    pub reason: Option<String>,
}

impl Drop for PasswordChange {
    fn drop(&mut self) {
        self.old_password.zeroize();
        self.new_password.zeroize();
    }
}

/// Parameters for creating or updating a credential.
///
/// `id: None` inserts; `id: Some` updates. Secret fields carry *new
/// plaintext*; `None` keeps whatever is stored (update) or omits the field
/// (insert — at least one secret is then required).
#[derive(Debug, Clone, Default)]
pub struct SaveCredential {
    pub id: Option<i64>,
    pub title: String,
    pub username: String,
    pub password: Option<String>,
    pub multi_account_data: Option<String>,
    pub url: Option<String>,
    pub notes: Option<String>,
    pub group_id: Option<i64>,
}

/// Field filters for [`CredentialStore::advanced_search`]. All filters are
/// conjunctive; `None` means "don't filter on this".
#[derive(Debug, Clone, Default)]
pub struct AdvancedSearch {
    /// Full-text keyword (same phrase/term semantics as plain search).
    pub keyword: Option<String>,
    /// Substring match on title.
    pub title: Option<String>,
    /// Substring match on username.
    pub username: Option<String>,
    /// Substring match on url.
    pub url: Option<String>,
    /// Exact group match.
    pub group_id: Option<i64>,
    /// Inclusive lower bound on `created_at` (ISO 8601).
    pub created_after: Option<String>,
    /// Inclusive upper bound on `created_at` (ISO 8601).
    pub created_before: Option<String>,
}

/// Raw row used by the backup importer — secret fields are already tokens,
/// timestamps are preserved.
#[derive(Debug, Clone)]
pub(crate) struct CredentialRow {
    pub title: String,
    pub username: String,
    pub password: Option<String>,
    pub multi_account_data: Option<String>,
    pub url: Option<String>,
    pub notes: Option<String>,
    pub group_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

/// Stored ciphertext view used internally by the update path.
struct StoredSecrets {
    password: Option<String>,
    multi_account_data: Option<String>,
}

// ---------------------------------------------------------------------------
// CredentialStore
// ---------------------------------------------------------------------------

/// Store for password-type secrets.
pub struct CredentialStore<'v> {
    conn: &'v Connection,
    cipher: &'v FieldCipher,
}

impl<'v> CredentialStore<'v> {
    #[must_use]
    pub fn new(db: &'v VaultDb, cipher: &'v FieldCipher) -> Self {
        Self {
            conn: db.connection(),
            cipher,
        }
    }

    pub(crate) const fn new_with_connection(
        conn: &'v Connection,
        cipher: &'v FieldCipher,
    ) -> Self {
        Self { conn, cipher }
    }

    // -- Queries ------------------------------------------------------------

    /// List credentials, optionally filtered by group, newest-first.
    ///
    /// Returns clear-field summaries — no decryption happens here.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Database`] if the query fails.
    pub fn list(&self, group_id: Option<i64>) -> Result<Vec<CredentialSummary>, VaultError> {
        let (sql, args) = match group_id {
            Some(gid) => (
                format!("{SUMMARY_SELECT} WHERE group_id = ?1 ORDER BY created_at DESC, id DESC"),
                vec![gid],
            ),
            None => (
                format!("{SUMMARY_SELECT} ORDER BY created_at DESC, id DESC"),
                Vec::new(),
            ),
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args), row_to_summary)?;
        rows.collect::<Result<_, _>>().map_err(VaultError::from)
    }

    /// Get a single credential by id, decrypting its secret fields.
    ///
    /// # Errors
    ///
    /// - [`VaultError::NotFound`] if no credential matches the id
    /// - [`VaultError::Database`] if the query fails
    pub fn get(&self, id: i64) -> Result<Credential, VaultError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, title, username, password, multi_account_data, url, notes, \
                 group_id, created_at, updated_at FROM credentials WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, Option<i64>>(7)?,
                        row.get::<_, String>(8)?,
                        row.get::<_, String>(9)?,
                    ))
                },
            )
            .optional()?
            .ok_or(VaultError::NotFound {
                entity: "credential",
                id,
            })?;

        Ok(Credential {
            id: row.0,
            title: row.1,
            username: row.2,
            password: row.3.map(|token| self.cipher.decrypt(&token)),
            multi_account_data: row.4.map(|token| self.cipher.decrypt(&token)),
            url: row.5,
            notes: row.6,
            group_id: row.7,
            created_at: row.8,
            updated_at: row.9,
        })
    }

    /// Keyword search over the full-text index.
    ///
    /// Multi-word input matches as an exact phrase; a single word is an
    /// open (prefix) term. Ranked by relevance, then recency.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Database`] if the query fails.
    pub fn search(&self, keyword: &str) -> Result<Vec<CredentialSummary>, VaultError> {
        let Some(match_expr) = fts_match_expr(keyword) else {
            return Ok(Vec::new());
        };

        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.title, c.username, c.url, c.notes, c.group_id, \
             c.created_at, c.updated_at \
             FROM credentials_fts f \
             JOIN credentials c ON c.id = f.credential_id \
             WHERE credentials_fts MATCH ?1 \
             ORDER BY bm25(credentials_fts), c.updated_at DESC",
        )?;
        let rows = stmt.query_map(params![match_expr], row_to_summary)?;
        rows.collect::<Result<_, _>>().map_err(VaultError::from)
    }

    /// Field-filtered search: keyword + substring filters + date range +
    /// group, conjunctive, ordered most-recently-updated first.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Database`] if the query fails.
    pub fn advanced_search(
        &self,
        filters: &AdvancedSearch,
    ) -> Result<Vec<CredentialSummary>, VaultError> {
        let mut sql = format!("{SUMMARY_SELECT} WHERE 1=1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(keyword) = filters.keyword.as_deref() {
            if let Some(match_expr) = fts_match_expr(keyword) {
                sql.push_str(
                    " AND id IN (SELECT credential_id FROM credentials_fts \
                     WHERE credentials_fts MATCH ?)",
                );
                args.push(Box::new(match_expr));
            }
        }
        for (column, value) in [
            ("title", filters.title.as_deref()),
            ("username", filters.username.as_deref()),
            ("url", filters.url.as_deref()),
        ] {
            if let Some(value) = value {
                sql.push_str(&format!(" AND {column} LIKE ? ESCAPE '\\'"));
                args.push(Box::new(like_contains_pattern(value)));
            }
        }
        if let Some(group_id) = filters.group_id {
            sql.push_str(" AND group_id = ?");
            args.push(Box::new(group_id));
        }
        if let Some(created_after) = filters.created_after.as_deref() {
            sql.push_str(" AND created_at >= ?");
            args.push(Box::new(created_after.to_string()));
        }
        if let Some(created_before) = filters.created_before.as_deref() {
            sql.push_str(" AND created_at <= ?");
            args.push(Box::new(created_before.to_string()));
        }
        sql.push_str(" ORDER BY updated_at DESC, id DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args), row_to_summary)?;
        rows.collect::<Result<_, _>>().map_err(VaultError::from)
    }

    /// Credentials not updated within `max_age`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Database`] if the query fails.
    pub fn stale_since(&self, max_age: Duration) -> Result<Vec<CredentialSummary>, VaultError> {
        let cutoff = iso8601_from_epoch(now_epoch_secs().saturating_sub(max_age.as_secs()));
        let sql = format!("{SUMMARY_SELECT} WHERE updated_at <= ?1 ORDER BY updated_at ASC");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![cutoff], row_to_summary)?;
        rows.collect::<Result<_, _>>().map_err(VaultError::from)
    }

    /// Decrypted password history for a credential, newest change first.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Database`] if the query fails.
    pub fn history(&self, credential_id: i64) -> Result<Vec<PasswordChange>, VaultError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, credential_id, old_password, new_password, changed_at, reason \
             FROM password_history WHERE credential_id = ?1 \
             ORDER BY changed_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![credential_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?;

        let mut changes = Vec::new();
        for row in rows {
            let (id, credential_id, old_token, new_token, changed_at, reason) = row?;
            changes.push(PasswordChange {
                id,
                credential_id,
                old_password: self.cipher.decrypt(&old_token),
                new_password: self.cipher.decrypt(&new_token),
                changed_at,
                reason,
            });
        }
        Ok(changes)
    }

    /// Decrypted multi-account blob for a credential.
    ///
    /// # Errors
    ///
    /// - [`VaultError::NotFound`] if no credential matches the id
    /// - [`VaultError::Database`] if the query fails
    pub fn multi_account(&self, id: i64) -> Result<Option<String>, VaultError> {
        let token: Option<String> = self
            .conn
            .query_row(
                "SELECT multi_account_data FROM credentials WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(VaultError::NotFound {
                entity: "credential",
                id,
            })?;
        Ok(token.map(|t| self.cipher.decrypt(&t)))
    }

    // -- Mutations ----------------------------------------------------------

    /// Replace a credential's multi-account blob. An empty string clears it
    /// (rejected when the credential has no password to fall back on).
    ///
    /// # Errors
    ///
    /// - [`VaultError::NotFound`] if no credential matches the id
    /// - [`VaultError::Validation`] for oversized input or a clear that
    ///   would leave the credential without any secret
    pub fn set_multi_account(&self, id: i64, data: &str) -> Result<(), VaultError> {
        if data.chars().count() > MAX_MULTI_ACCOUNT_LEN {
            return Err(VaultError::Validation(format!(
                "multi-account data exceeds {MAX_MULTI_ACCOUNT_LEN} characters"
            )));
        }

        let stored = self.stored_secrets(id)?;
        let token = if data.is_empty() {
            if stored.password.is_none() {
                return Err(VaultError::Validation(
                    "cannot clear multi-account data: credential has no password".into(),
                ));
            }
            None
        } else {
            Some(self.cipher.encrypt(data)?)
        };

        self.conn.execute(
            "UPDATE credentials SET multi_account_data = ?1, updated_at = ?2 WHERE id = ?3",
            params![token, now_iso8601(), id],
        )?;
        Ok(())
    }

    /// Insert or update a credential.
    ///
    /// Secret fields are encrypted only when new plaintext was supplied.
    /// On update, a changed password appends one history row (old and new
    /// ciphertext, timestamp, no reason — use
    /// [`Self::update_with_history`] to record one).
    ///
    /// # Errors
    ///
    /// - [`VaultError::Validation`] for shape/length/format failures
    /// - [`VaultError::ForeignKeyViolation`] if `group_id` does not exist
    /// - [`VaultError::NotFound`] when updating a missing id
    pub fn save(&self, params: &SaveCredential) -> Result<Credential, VaultError> {
        self.save_inner(params, None)
    }

    /// Update an existing credential, recording `reason` on the history
    /// row if the password changes.
    ///
    /// # Errors
    ///
    /// Same as [`Self::save`], plus [`VaultError::Validation`] when called
    /// without an id.
    pub fn update_with_history(
        &self,
        params: &SaveCredential,
        reason: &str,
    ) -> Result<Credential, VaultError> {
        if params.id.is_none() {
            return Err(VaultError::Validation(
                "update_with_history requires an existing credential id".into(),
            ));
        }
        self.save_inner(params, Some(reason))
    }

    /// Delete a credential and its search-index entry.
    ///
    /// History rows are left in place — orphan cleanup belongs to the
    /// integrity repairer.
    ///
    /// # Errors
    ///
    /// - [`VaultError::NotFound`] if no credential matches the id
    /// - [`VaultError::Database`] if a statement fails (rolled back)
    pub fn delete(&self, id: i64) -> Result<(), VaultError> {
        let tx = self.conn.unchecked_transaction()?;
        let deleted = tx.execute("DELETE FROM credentials WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(VaultError::NotFound {
                entity: "credential",
                id,
            });
        }
        index_remove(&tx, id)?;
        tx.commit()?;
        Ok(())
    }

    // -- Save internals -----------------------------------------------------

    fn save_inner(
        &self,
        params: &SaveCredential,
        reason: Option<&str>,
    ) -> Result<Credential, VaultError> {
        let title = params.title.trim();
        let username = params.username.trim();
        validate_text_field("title", title)?;
        validate_text_field("username", username)?;

        let url = normalize_optional(params.url.as_deref());
        if let Some(url) = url {
            validate_url(url)?;
        }
        let notes = normalize_optional(params.notes.as_deref());
        if let Some(notes) = notes {
            if notes.chars().count() > MAX_NOTES_LEN {
                return Err(VaultError::Validation(format!(
                    "notes exceed {MAX_NOTES_LEN} characters"
                )));
            }
        }

        let new_password = normalize_optional(params.password.as_deref());
        let new_multi = normalize_optional(params.multi_account_data.as_deref());
        if let Some(multi) = new_multi {
            if multi.chars().count() > MAX_MULTI_ACCOUNT_LEN {
                return Err(VaultError::Validation(format!(
                    "multi-account data exceeds {MAX_MULTI_ACCOUNT_LEN} characters"
                )));
            }
        }

        if let Some(group_id) = params.group_id {
            let groups = GroupStore::with_family(self.conn, crate::groups::CREDENTIAL_GROUP_FAMILY);
            if !groups.exists(group_id)? {
                return Err(VaultError::ForeignKeyViolation(format!(
                    "credential group {group_id} does not exist"
                )));
            }
        }

        match params.id {
            None => self.insert(title, username, new_password, new_multi, url, notes, params),
            Some(id) => self.update(
                id,
                title,
                username,
                new_password,
                new_multi,
                url,
                notes,
                params,
                reason,
            ),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn insert(
        &self,
        title: &str,
        username: &str,
        new_password: Option<&str>,
        new_multi: Option<&str>,
        url: Option<&str>,
        notes: Option<&str>,
        params: &SaveCredential,
    ) -> Result<Credential, VaultError> {
        if new_password.is_none() && new_multi.is_none() {
            return Err(VaultError::Validation(
                "a password or multi-account data is required".into(),
            ));
        }

        let password_token = new_password.map(|p| self.cipher.encrypt(p)).transpose()?;
        let multi_token = new_multi.map(|m| self.cipher.encrypt(m)).transpose()?;
        let now = now_iso8601();

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO credentials (title, username, password, multi_account_data, url, \
             notes, group_id, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                title,
                username,
                password_token,
                multi_token,
                url,
                notes,
                params.group_id,
                now,
                now
            ],
        )?;
        let id = tx.last_insert_rowid();
        index_upsert(&tx, id, title, username, url, notes)?;
        tx.commit()?;

        Ok(Credential {
            id,
            title: title.to_string(),
            username: username.to_string(),
            password: new_password.map(ToString::to_string),
            multi_account_data: new_multi.map(ToString::to_string),
            url: url.map(ToString::to_string),
            notes: notes.map(ToString::to_string),
            group_id: params.group_id,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn update(
        &self,
        id: i64,
        title: &str,
        username: &str,
        new_password: Option<&str>,
        new_multi: Option<&str>,
        url: Option<&str>,
        notes: Option<&str>,
        params: &SaveCredential,
        reason: Option<&str>,
    ) -> Result<Credential, VaultError> {
        let stored = self.stored_secrets(id)?;

        // A supplied password only counts as a change when the plaintext
        // actually differs from what is stored (every encrypt call produces
        // a fresh token, so ciphertext comparison would always differ).
        let mut history_entry: Option<(String, String)> = None;
        let password_token = match new_password {
            Some(plaintext) => {
                let new_token = self.cipher.encrypt(plaintext)?;
                match stored.password {
                    Some(ref old_token) if self.cipher.decrypt(old_token) == plaintext => {
                        Some(old_token.clone())
                    }
                    Some(ref old_token) => {
                        history_entry = Some((old_token.clone(), new_token.clone()));
                        Some(new_token)
                    }
                    None => Some(new_token),
                }
            }
            None => stored.password.clone(),
        };
        let multi_token = match new_multi {
            Some(plaintext) => Some(self.cipher.encrypt(plaintext)?),
            None => stored.multi_account_data.clone(),
        };

        if password_token.is_none() && multi_token.is_none() {
            return Err(VaultError::Validation(
                "a password or multi-account data is required".into(),
            ));
        }

        let now = now_iso8601();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE credentials SET title = ?1, username = ?2, password = ?3, \
             multi_account_data = ?4, url = ?5, notes = ?6, group_id = ?7, updated_at = ?8 \
             WHERE id = ?9",
            params![
                title,
                username,
                password_token,
                multi_token,
                url,
                notes,
                params.group_id,
                now,
                id
            ],
        )?;
        if let Some((old_token, new_token)) = history_entry {
            tx.execute(
                "INSERT INTO password_history (credential_id, old_password, new_password, \
                 changed_at, reason) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, old_token, new_token, now, reason],
            )?;
        }
        index_upsert(&tx, id, title, username, url, notes)?;
        tx.commit()?;

        self.get(id)
    }

    fn stored_secrets(&self, id: i64) -> Result<StoredSecrets, VaultError> {
        self.conn
            .query_row(
                "SELECT password, multi_account_data FROM credentials WHERE id = ?1",
                params![id],
                |row| {
                    Ok(StoredSecrets {
                        password: row.get(0)?,
                        multi_account_data: row.get(1)?,
                    })
                },
            )
            .optional()?
            .ok_or(VaultError::NotFound {
                entity: "credential",
                id,
            })
    }

    // -- Backup importer plumbing -------------------------------------------

    /// Insert a raw row (secret fields already tokens), preserving
    /// timestamps. Keeps the search index in lockstep.
    pub(crate) fn insert_row(&self, row: &CredentialRow) -> Result<i64, VaultError> {
        validate_text_field("title", row.title.trim())?;
        validate_text_field("username", row.username.trim())?;

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO credentials (title, username, password, multi_account_data, url, \
             notes, group_id, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                row.title.trim(),
                row.username.trim(),
                row.password,
                row.multi_account_data,
                row.url,
                row.notes,
                row.group_id,
                row.created_at,
                row.updated_at
            ],
        )?;
        let id = tx.last_insert_rowid();
        index_upsert(
            &tx,
            id,
            row.title.trim(),
            row.username.trim(),
            row.url.as_deref(),
            row.notes.as_deref(),
        )?;
        tx.commit()?;
        Ok(id)
    }

    /// Overwrite an existing credential from a raw row (import merge path).
    pub(crate) fn overwrite_row(&self, id: i64, row: &CredentialRow) -> Result<(), VaultError> {
        validate_text_field("title", row.title.trim())?;
        validate_text_field("username", row.username.trim())?;

        let tx = self.conn.unchecked_transaction()?;
        let updated = tx.execute(
            "UPDATE credentials SET title = ?1, username = ?2, password = ?3, \
             multi_account_data = ?4, url = ?5, notes = ?6, group_id = ?7, updated_at = ?8 \
             WHERE id = ?9",
            params![
                row.title.trim(),
                row.username.trim(),
                row.password,
                row.multi_account_data,
                row.url,
                row.notes,
                row.group_id,
                row.updated_at,
                id
            ],
        )?;
        if updated == 0 {
            return Err(VaultError::NotFound {
                entity: "credential",
                id,
            });
        }
        index_upsert(
            &tx,
            id,
            row.title.trim(),
            row.username.trim(),
            row.url.as_deref(),
            row.notes.as_deref(),
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Find an existing credential by its natural key (title + username).
    pub(crate) fn find_by_natural_key(
        &self,
        title: &str,
        username: &str,
    ) -> Result<Option<i64>, VaultError> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM credentials WHERE title = ?1 AND username = ?2 LIMIT 1",
                params![title.trim(), username.trim()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Insert a history row with pre-encrypted values (import path).
    pub(crate) fn insert_history_row(
        &self,
        credential_id: i64,
        old_token: &str,
        new_token: &str,
        changed_at: &str,
        reason: Option<&str>,
    ) -> Result<i64, VaultError> {
        self.conn.execute(
            "INSERT INTO password_history (credential_id, old_password, new_password, \
             changed_at, reason) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![credential_id, old_token, new_token, changed_at, reason],
        )?;
        Ok(self.conn.last_insert_rowid())
    }
}

// ---------------------------------------------------------------------------
// Search index maintenance
// ---------------------------------------------------------------------------

/// Replace a credential's search-index entry. Runs inside the caller's
/// transaction, right after the primary write.
fn index_upsert(
    conn: &Connection,
    id: i64,
    title: &str,
    username: &str,
    url: Option<&str>,
    notes: Option<&str>,
) -> Result<(), VaultError> {
    conn.execute(
        "DELETE FROM credentials_fts WHERE credential_id = ?1",
        params![id],
    )?;
    conn.execute(
        "INSERT INTO credentials_fts (credential_id, title, username, url, notes) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, title, username, url.unwrap_or(""), notes.unwrap_or("")],
    )?;
    Ok(())
}

/// Drop a credential's search-index entry.
fn index_remove(conn: &Connection, id: i64) -> Result<(), VaultError> {
    conn.execute(
        "DELETE FROM credentials_fts WHERE credential_id = ?1",
        params![id],
    )?;
    Ok(())
}

/// Clear the whole search index (backup replace path).
pub(crate) fn index_clear(conn: &Connection) -> Result<(), VaultError> {
    conn.execute("DELETE FROM credentials_fts", [])?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

fn validate_text_field(field: &str, value: &str) -> Result<(), VaultError> {
    if value.is_empty() {
        return Err(VaultError::Validation(format!("{field} is required")));
    }
    if value.chars().count() > MAX_TEXT_LEN {
        return Err(VaultError::Validation(format!(
            "{field} exceeds {MAX_TEXT_LEN} characters"
        )));
    }
    Ok(())
}

/// Trim and drop empty optional inputs.
fn normalize_optional(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Validate a stored URL: either `scheme://host...` with a plausible host,
/// or a relaxed bare hostname (`example.com`, `intranet:8080/wiki`).
fn validate_url(url: &str) -> Result<(), VaultError> {
    if url.chars().count() > MAX_URL_LEN {
        return Err(VaultError::Validation(format!(
            "url exceeds {MAX_URL_LEN} characters"
        )));
    }
    if url.chars().any(char::is_whitespace) {
        return Err(VaultError::Validation("url must not contain whitespace".into()));
    }

    let rest = match url.split_once("://") {
        Some((scheme, rest)) => {
            if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+') {
                return Err(VaultError::Validation(format!("malformed url: {url}")));
            }
            rest
        }
        None => url,
    };

    if !is_bare_hostname_form(rest) {
        return Err(VaultError::Validation(format!("malformed url: {url}")));
    }
    Ok(())
}

/// Relaxed hostname check: dot-separated alphanumeric/hyphen labels, an
/// optional `:port`, an optional `/path`.
fn is_bare_hostname_form(s: &str) -> bool {
    let (host_port, _path) = match s.split_once('/') {
        Some((hp, path)) => (hp, Some(path)),
        None => (s, None),
    };
    let host = match host_port.split_once(':') {
        Some((host, port)) => {
            if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
                return false;
            }
            host
        }
        None => host_port,
    };
    if host.is_empty() {
        return false;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && label
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    })
}

// ---------------------------------------------------------------------------
// FTS query shaping
// ---------------------------------------------------------------------------

const SUMMARY_SELECT: &str = "SELECT id, title, username, url, notes, group_id, \
                              created_at, updated_at FROM credentials";

fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<CredentialSummary> {
    Ok(CredentialSummary {
        id: row.get(0)?,
        title: row.get(1)?,
        username: row.get(2)?,
        url: row.get(3)?,
        notes: row.get(4)?,
        group_id: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Build the FTS5 MATCH expression for a user keyword.
///
/// Multi-word input becomes a quoted exact phrase; a single word becomes a
/// quoted prefix term. Embedded quotes are stripped rather than escaped —
/// they have no meaning in vault search terms.
fn fts_match_expr(keyword: &str) -> Option<String> {
    let cleaned = keyword.replace('"', " ");
    let words: Vec<&str> = cleaned.split_whitespace().collect();
    match words.as_slice() {
        [] => None,
        [single] => Some(format!("\"{single}\"*")),
        many => Some(format!("\"{}\"", many.join(" "))),
    }
}

/// Escape LIKE wildcards and wrap in `%...%` for substring matching.
fn like_contains_pattern(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
