//! Snapshot assembly: reads every selected entity family into the
//! versioned backup document. Secret columns are copied as-is — they are
//! already field-cipher tokens and never leave the vault in clear.

use rusqlite::Connection;

use crate::clock::now_iso8601;
use crate::error::VaultError;

use super::{
    BackupCredential, BackupDocument, BackupGroup, BackupHistoryEntry, BackupNote, BackupSetting,
    ExportOptions, BACKUP_APP_NAME, BACKUP_FORMAT_VERSION,
};

pub(super) fn build_document(
    conn: &Connection,
    options: &ExportOptions,
) -> Result<BackupDocument, VaultError> {
    Ok(BackupDocument {
        version: BACKUP_FORMAT_VERSION,
        exported_at: now_iso8601(),
        app_name: BACKUP_APP_NAME.to_string(),
        passwords: options
            .include_credentials
            .then(|| read_credentials(conn))
            .transpose()?,
        groups: options
            .include_groups
            .then(|| read_groups(conn, "credential_groups"))
            .transpose()?,
        note_groups: options
            .include_note_groups
            .then(|| read_groups(conn, "note_groups"))
            .transpose()?,
        notes: options.include_notes.then(|| read_notes(conn)).transpose()?,
        user_settings: options
            .include_settings
            .then(|| read_settings(conn))
            .transpose()?,
        password_history: options
            .include_history
            .then(|| read_history(conn))
            .transpose()?,
    })
}

fn read_credentials(conn: &Connection) -> Result<Vec<BackupCredential>, VaultError> {
    let mut stmt = conn.prepare(
        "SELECT id, title, username, password, multi_account_data, url, notes, group_id, \
         created_at, updated_at FROM credentials ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(BackupCredential {
            id: row.get(0)?,
            title: row.get(1)?,
            username: row.get(2)?,
            password: row.get(3)?,
            multi_account_data: row.get(4)?,
            url: row.get(5)?,
            notes: row.get(6)?,
            group_id: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    })?;
    rows.collect::<Result<_, _>>().map_err(VaultError::from)
}

fn read_groups(conn: &Connection, table: &str) -> Result<Vec<BackupGroup>, VaultError> {
    let sql = format!(
        "SELECT id, name, parent_id, color, sort, created_at, updated_at \
         FROM {table} ORDER BY id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok(BackupGroup {
            id: row.get(0)?,
            name: row.get(1)?,
            parent_id: row.get(2)?,
            color: row.get(3)?,
            sort: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    })?;
    rows.collect::<Result<_, _>>().map_err(VaultError::from)
}

fn read_notes(conn: &Connection) -> Result<Vec<BackupNote>, VaultError> {
    let mut stmt = conn.prepare(
        "SELECT id, title, content, group_id, pinned, archived, created_at, updated_at \
         FROM secure_notes ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(BackupNote {
            id: row.get(0)?,
            title: row.get(1)?,
            content: row.get(2)?,
            group_id: row.get(3)?,
            pinned: row.get::<_, i32>(4)? != 0,
            archived: row.get::<_, i32>(5)? != 0,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    })?;
    rows.collect::<Result<_, _>>().map_err(VaultError::from)
}

fn read_settings(conn: &Connection) -> Result<Vec<BackupSetting>, VaultError> {
    let mut stmt = conn.prepare(
        "SELECT key, value, value_type, category, description \
         FROM user_settings ORDER BY key ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(BackupSetting {
            key: row.get(0)?,
            value: row.get(1)?,
            value_type: row.get(2)?,
            category: row.get(3)?,
            description: row.get(4)?,
        })
    })?;
    rows.collect::<Result<_, _>>().map_err(VaultError::from)
}

fn read_history(conn: &Connection) -> Result<Vec<BackupHistoryEntry>, VaultError> {
    let mut stmt = conn.prepare(
        "SELECT id, credential_id, old_password, new_password, changed_at, reason \
         FROM password_history ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(BackupHistoryEntry {
            id: row.get(0)?,
            credential_id: row.get(1)?,
            old_password: row.get(2)?,
            new_password: row.get(3)?,
            changed_at: row.get(4)?,
            reason: row.get(5)?,
        })
    })?;
    rows.collect::<Result<_, _>>().map_err(VaultError::from)
}
