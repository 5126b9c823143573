//! Secure note CRUD.
//!
//! Notes are the free-text counterpart to credentials: a clear title for
//! listing and search, one encrypted content blob, and their own group
//! hierarchy (`note_groups`). No history, no full-text index — title
//! substring search is all the discovery notes need.

use rusqlite::{params, Connection, OptionalExtension};
use zeroize::Zeroize;

use coffre_crypto_core::FieldCipher;

use crate::clock::now_iso8601;
use crate::credentials::{MAX_NOTES_LEN, MAX_TEXT_LEN};
use crate::db::VaultDb;
use crate::error::VaultError;
use crate::groups::GroupStore;

// ---------------------------------------------------------------------------
// Domain model
// ---------------------------------------------------------------------------

/// Full note with decrypted content.
#[derive(Debug, Clone)]
pub struct SecureNote {
    pub id: i64,
    pub title: String,
    /// Decrypted note body.
    pub content: String,
    pub group_id: Option<i64>,
    pub pinned: bool,
    pub archived: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Wipe the decrypted body when the note leaves scope.
impl Drop for SecureNote {
    fn drop(&mut self) {
        self.content.zeroize();
    }
}

/// Metadata-only view for list and search results — content stays sealed.
#[derive(Debug, Clone)]
pub struct NoteSummary {
    pub id: i64,
    pub title: String,
    pub group_id: Option<i64>,
    pub pinned: bool,
    pub archived: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Parameters for creating or updating a note.
///
/// `id: None` inserts (content required); `id: Some` updates, keeping the
/// stored content when `content` is `None`.
#[derive(Debug, Clone, Default)]
pub struct SaveNote {
    pub id: Option<i64>,
    pub title: String,
    pub content: Option<String>,
    pub group_id: Option<i64>,
    pub pinned: bool,
    pub archived: bool,
}

/// Raw row used by the backup importer — content is already a token.
#[derive(Debug, Clone)]
pub(crate) struct NoteRow {
    pub title: String,
    pub content: String,
    pub group_id: Option<i64>,
    pub pinned: bool,
    pub archived: bool,
    pub created_at: String,
    pub updated_at: String,
}

// ---------------------------------------------------------------------------
// NoteStore
// ---------------------------------------------------------------------------

/// Store for encrypted free-text notes.
pub struct NoteStore<'v> {
    conn: &'v Connection,
    cipher: &'v FieldCipher,
}

impl<'v> NoteStore<'v> {
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

    /// List notes, optionally filtered by group. Archived notes are
    /// excluded unless `include_archived` is set. Pinned notes first,
    /// then most recently updated.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Database`] if the query fails.
    pub fn list(
        &self,
        group_id: Option<i64>,
        include_archived: bool,
    ) -> Result<Vec<NoteSummary>, VaultError> {
        let mut sql = String::from(
            "SELECT id, title, group_id, pinned, archived, created_at, updated_at \
             FROM secure_notes WHERE 1=1",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(gid) = group_id {
            sql.push_str(" AND group_id = ?");
            args.push(Box::new(gid));
        }
        if !include_archived {
            sql.push_str(" AND archived = 0");
        }
        sql.push_str(" ORDER BY pinned DESC, updated_at DESC, id DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args), row_to_summary)?;
        rows.collect::<Result<_, _>>().map_err(VaultError::from)
    }

    /// Case-insensitive title substring search.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Database`] if the query fails.
    pub fn search_title(&self, needle: &str) -> Result<Vec<NoteSummary>, VaultError> {
        let needle = needle.trim();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let pattern = format!(
            "%{}%",
            needle
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_")
        );
        let mut stmt = self.conn.prepare(
            "SELECT id, title, group_id, pinned, archived, created_at, updated_at \
             FROM secure_notes WHERE title LIKE ?1 ESCAPE '\\' \
             ORDER BY pinned DESC, updated_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![pattern], row_to_summary)?;
        rows.collect::<Result<_, _>>().map_err(VaultError::from)
    }

    /// Get a single note by id, decrypting its content.
    ///
    /// # Errors
    ///
    /// - [`VaultError::NotFound`] if no note matches the id
    /// - [`VaultError::Database`] if the query fails
    pub fn get(&self, id: i64) -> Result<SecureNote, VaultError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, title, content, group_id, pinned, archived, created_at, updated_at \
                 FROM secure_notes WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                        row.get::<_, i32>(4)?,
                        row.get::<_, i32>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()?
            .ok_or(VaultError::NotFound {
                entity: "note",
                id,
            })?;

        Ok(SecureNote {
            id: row.0,
            title: row.1,
            content: self.cipher.decrypt(&row.2),
            group_id: row.3,
            pinned: row.4 != 0,
            archived: row.5 != 0,
            created_at: row.6,
            updated_at: row.7,
        })
    }

    // -- Mutations ----------------------------------------------------------

    /// Insert or update a note. New content plaintext is encrypted before
    /// storage; `None` content on update keeps what is stored.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Validation`] for missing title/content or oversized
    ///   fields
    /// - [`VaultError::ForeignKeyViolation`] if `group_id` does not exist
    /// - [`VaultError::NotFound`] when updating a missing id
    pub fn save(&self, params: &SaveNote) -> Result<SecureNote, VaultError> {
        let title = params.title.trim();
        if title.is_empty() {
            return Err(VaultError::Validation("note title is required".into()));
        }
        if title.chars().count() > MAX_TEXT_LEN {
            return Err(VaultError::Validation(format!(
                "note title exceeds {MAX_TEXT_LEN} characters"
            )));
        }
        if let Some(content) = params.content.as_deref() {
            if content.chars().count() > MAX_NOTES_LEN {
                return Err(VaultError::Validation(format!(
                    "note content exceeds {MAX_NOTES_LEN} characters"
                )));
            }
        }

        if let Some(group_id) = params.group_id {
            let groups = GroupStore::with_family(self.conn, crate::groups::NOTE_GROUP_FAMILY);
            if !groups.exists(group_id)? {
                return Err(VaultError::ForeignKeyViolation(format!(
                    "note group {group_id} does not exist"
                )));
            }
        }

        let now = now_iso8601();
        match params.id {
            None => {
                let content = params.content.as_deref().ok_or_else(|| {
                    VaultError::Validation("note content is required".into())
                })?;
                let token = self.cipher.encrypt(content)?;
                self.conn.execute(
                    "INSERT INTO secure_notes (title, content, group_id, pinned, archived, \
                     created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        title,
                        token,
                        params.group_id,
                        i32::from(params.pinned),
                        i32::from(params.archived),
                        now,
                        now
                    ],
                )?;
                self.get(self.conn.last_insert_rowid())
            }
            Some(id) => {
                let token = match params.content.as_deref() {
                    Some(content) => self.cipher.encrypt(content)?,
                    None => self
                        .conn
                        .query_row(
                            "SELECT content FROM secure_notes WHERE id = ?1",
                            params![id],
                            |row| row.get::<_, String>(0),
                        )
                        .optional()?
                        .ok_or(VaultError::NotFound { entity: "note", id })?,
                };
                let updated = self.conn.execute(
                    "UPDATE secure_notes SET title = ?1, content = ?2, group_id = ?3, \
                     pinned = ?4, archived = ?5, updated_at = ?6 WHERE id = ?7",
                    params![
                        title,
                        token,
                        params.group_id,
                        i32::from(params.pinned),
                        i32::from(params.archived),
                        now,
                        id
                    ],
                )?;
                if updated == 0 {
                    return Err(VaultError::NotFound { entity: "note", id });
                }
                self.get(id)
            }
        }
    }

    /// Delete a note by id.
    ///
    /// # Errors
    ///
    /// - [`VaultError::NotFound`] if no note matches the id
    /// - [`VaultError::Database`] if the DELETE fails
    pub fn delete(&self, id: i64) -> Result<(), VaultError> {
        let deleted = self
            .conn
            .execute("DELETE FROM secure_notes WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(VaultError::NotFound { entity: "note", id });
        }
        Ok(())
    }

    // -- Backup importer plumbing -------------------------------------------

    /// Insert a raw row (content already a token), preserving timestamps.
    pub(crate) fn insert_row(&self, row: &NoteRow) -> Result<i64, VaultError> {
        if row.title.trim().is_empty() {
            return Err(VaultError::Validation("note title is required".into()));
        }
        self.conn.execute(
            "INSERT INTO secure_notes (title, content, group_id, pinned, archived, \
             created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                row.title.trim(),
                row.content,
                row.group_id,
                i32::from(row.pinned),
                i32::from(row.archived),
                row.created_at,
                row.updated_at
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Overwrite an existing note from a raw row (import merge path).
    pub(crate) fn overwrite_row(&self, id: i64, row: &NoteRow) -> Result<(), VaultError> {
        if row.title.trim().is_empty() {
            return Err(VaultError::Validation("note title is required".into()));
        }
        let updated = self.conn.execute(
            "UPDATE secure_notes SET title = ?1, content = ?2, group_id = ?3, pinned = ?4, \
             archived = ?5, updated_at = ?6 WHERE id = ?7",
            params![
                row.title.trim(),
                row.content,
                row.group_id,
                i32::from(row.pinned),
                i32::from(row.archived),
                row.updated_at,
                id
            ],
        )?;
        if updated == 0 {
            return Err(VaultError::NotFound { entity: "note", id });
        }
        Ok(())
    }

    /// Find an existing note by its natural key (title + group).
    pub(crate) fn find_by_natural_key(
        &self,
        title: &str,
        group_id: Option<i64>,
    ) -> Result<Option<i64>, VaultError> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM secure_notes WHERE title = ?1 AND group_id IS ?2 LIMIT 1",
                params![title.trim(), group_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<NoteSummary> {
    Ok(NoteSummary {
        id: row.get(0)?,
        title: row.get(1)?,
        group_id: row.get(2)?,
        pinned: row.get::<_, i32>(3)? != 0,
        archived: row.get::<_, i32>(4)? != 0,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}
