//! Snapshot restore: validation, dependency-ordered entity import, and
//! conflict resolution.
//!
//! Groups are imported with a worklist fixed point: every pass imports the
//! pending groups whose (remapped) parent is resolved; a pass with no
//! progress stops the loop and reports every remaining group as
//! unresolvable (missing or cyclic parent). The loop converges in at most
//! N passes for N groups.
//!
//! Secret values that are not in the encrypted token format are encrypted
//! before storage — the just-in-time upgrade path for plaintext legacy
//! snapshots. The separator heuristic gates it, so an already-encrypted
//! token is never re-encrypted.

use std::collections::HashMap;

use rusqlite::Connection;

use coffre_crypto_core::{looks_encrypted, FieldCipher};

use crate::clock::{is_valid_timestamp, now_iso8601};
use crate::credentials::{index_clear, CredentialRow, CredentialStore};
use crate::error::VaultError;
use crate::groups::{GroupFamily, GroupRow, GroupStore, CREDENTIAL_GROUP_FAMILY, NOTE_GROUP_FAMILY};
use crate::notes::{NoteRow, NoteStore};
use crate::settings::{SettingCategory, SettingType, SettingsStore};

use super::{
    BackupDocument, BackupGroup, ImportOptions, ImportReport, MergeStrategy,
    BACKUP_FORMAT_VERSION,
};

/// Entity counts above this draw a size warning during validation.
const LARGE_IMPORT_THRESHOLD: usize = 10_000;

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub(super) fn import_document(
    conn: &Connection,
    cipher: &FieldCipher,
    document: &BackupDocument,
    options: &ImportOptions,
) -> Result<ImportReport, VaultError> {
    let mut report = ImportReport::default();

    if options.validate_integrity || options.dry_run {
        let (errors, warnings) = validate_document(document);
        report.warnings = warnings;
        if !errors.is_empty() {
            report.errors = errors;
            return Ok(report);
        }
        if options.dry_run {
            return Ok(report);
        }
    }

    if options.merge_strategy == MergeStrategy::Replace {
        clear_all(conn)?;
    }

    // Dependency order: groups first so later families can remap their
    // foreign keys through the old→new id tables.
    let group_map = import_group_family(
        conn,
        CREDENTIAL_GROUP_FAMILY,
        document.groups.as_deref().unwrap_or_default(),
        options.merge_strategy,
        &mut report,
    );
    let note_group_map = import_group_family(
        conn,
        NOTE_GROUP_FAMILY,
        document.note_groups.as_deref().unwrap_or_default(),
        options.merge_strategy,
        &mut report,
    );

    import_notes(conn, cipher, document, &note_group_map, options, &mut report);
    let credential_map =
        import_credentials(conn, cipher, document, &group_map, options, &mut report);
    import_settings(conn, document, options, &mut report);
    import_history(conn, cipher, document, &credential_map, &mut report);

    tracing::debug!(
        imported = report.imported,
        skipped = report.skipped,
        errors = report.errors.len(),
        "backup import finished"
    );
    Ok(report)
}

// ---------------------------------------------------------------------------
// Validation phase
// ---------------------------------------------------------------------------

/// Static document checks. Errors abort the import before any mutation;
/// warnings ride along in the report.
fn validate_document(document: &BackupDocument) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if document.version > BACKUP_FORMAT_VERSION {
        errors.push(format!(
            "backup version {} is newer than the supported version {BACKUP_FORMAT_VERSION}",
            document.version
        ));
    }
    if !document.exported_at.is_empty() && !is_valid_timestamp(&document.exported_at) {
        warnings.push(format!(
            "backup has a malformed exported_at: {:?}",
            document.exported_at
        ));
    }

    if let Some(credentials) = document.passwords.as_deref() {
        for (index, credential) in credentials.iter().enumerate() {
            if credential.title.trim().is_empty() {
                errors.push(format!("credential at index {index} is missing a title"));
            }
            if credential.username.trim().is_empty() {
                errors.push(format!("credential at index {index} is missing a username"));
            }
        }
        if credentials.len() > LARGE_IMPORT_THRESHOLD {
            warnings.push(format!(
                "large import: {} credentials",
                credentials.len()
            ));
        }
    }

    for (label, groups) in [
        ("group", document.groups.as_deref()),
        ("note group", document.note_groups.as_deref()),
    ] {
        if let Some(groups) = groups {
            for (index, group) in groups.iter().enumerate() {
                if group.name.trim().is_empty() {
                    errors.push(format!("{label} at index {index} is missing a name"));
                }
            }
        }
    }

    if let Some(notes) = document.notes.as_deref() {
        for (index, note) in notes.iter().enumerate() {
            if note.title.trim().is_empty() {
                errors.push(format!("note at index {index} is missing a title"));
            }
        }
        if notes.len() > LARGE_IMPORT_THRESHOLD {
            warnings.push(format!("large import: {} notes", notes.len()));
        }
    }

    (errors, warnings)
}

// ---------------------------------------------------------------------------
// Replace strategy
// ---------------------------------------------------------------------------

/// Clear every entity table (and the search index) ahead of a `replace`
/// import.
fn clear_all(conn: &Connection) -> Result<(), VaultError> {
    for table in [
        "password_history",
        "credentials",
        "credential_groups",
        "secure_notes",
        "note_groups",
        "user_settings",
    ] {
        conn.execute(&format!("DELETE FROM {table}"), [])?;
    }
    index_clear(conn)
}

// ---------------------------------------------------------------------------
// Groups (worklist fixed point)
// ---------------------------------------------------------------------------

fn import_group_family(
    conn: &Connection,
    family: GroupFamily,
    groups: &[BackupGroup],
    strategy: MergeStrategy,
    report: &mut ImportReport,
) -> HashMap<i64, i64> {
    let store = GroupStore::with_family(conn, family);
    let mut id_map: HashMap<i64, i64> = HashMap::new();
    let mut pending: Vec<&BackupGroup> = groups.iter().collect();

    loop {
        let mut progressed = false;
        let mut still_pending: Vec<&BackupGroup> = Vec::new();

        for group in pending {
            // A group is ready once its parent is either absent or already
            // remapped in an earlier pass.
            let resolved_parent = match group.parent_id {
                None => Some(None),
                Some(old_parent) => id_map.get(&old_parent).copied().map(Some),
            };
            let Some(new_parent) = resolved_parent else {
                still_pending.push(group);
                continue;
            };

            progressed = true;
            match import_one_group(&store, group, new_parent, strategy) {
                Ok(GroupOutcome::Written(new_id)) => {
                    id_map.insert(group.id, new_id);
                    report.imported = report.imported.saturating_add(1);
                }
                Ok(GroupOutcome::Skipped(existing_id)) => {
                    id_map.insert(group.id, existing_id);
                    report.skipped = report.skipped.saturating_add(1);
                }
                Err(e) => {
                    report.errors.push(format!(
                        "{} {:?} (id {}): {e}",
                        family.entity, group.name, group.id
                    ));
                }
            }
        }

        pending = still_pending;
        if pending.is_empty() {
            break;
        }
        if !progressed {
            // Fixed point with leftovers: every remaining parent is missing
            // from the snapshot, cyclic, or depends on an errored group.
            for group in &pending {
                report.errors.push(format!(
                    "{} {:?} (id {}) has an unresolvable parent {:?}",
                    family.entity, group.name, group.id, group.parent_id
                ));
            }
            break;
        }
    }

    id_map
}

enum GroupOutcome {
    Written(i64),
    Skipped(i64),
}

fn import_one_group(
    store: &GroupStore<'_>,
    group: &BackupGroup,
    new_parent: Option<i64>,
    strategy: MergeStrategy,
) -> Result<GroupOutcome, VaultError> {
    let row = GroupRow {
        name: group.name.clone(),
        parent_id: new_parent,
        color: group.color.clone(),
        sort: group.sort,
        created_at: timestamp_or_now(&group.created_at),
        updated_at: timestamp_or_now(&group.updated_at),
    };

    match store.get_by_name_and_parent(group.name.trim(), new_parent)? {
        Some(existing) if strategy == MergeStrategy::Skip => Ok(GroupOutcome::Skipped(existing.id)),
        Some(existing) => {
            store.overwrite_row(existing.id, &row)?;
            Ok(GroupOutcome::Written(existing.id))
        }
        None => Ok(GroupOutcome::Written(store.insert_row(&row)?)),
    }
}

// ---------------------------------------------------------------------------
// Notes
// ---------------------------------------------------------------------------

fn import_notes(
    conn: &Connection,
    cipher: &FieldCipher,
    document: &BackupDocument,
    note_group_map: &HashMap<i64, i64>,
    options: &ImportOptions,
    report: &mut ImportReport,
) {
    let store = NoteStore::new_with_connection(conn, cipher);

    for note in document.notes.as_deref().unwrap_or_default() {
        let group_id = remap_group(
            note.group_id,
            note_group_map,
            &format!("note {:?} (id {})", note.title, note.id),
            report,
        );

        let result = (|| -> Result<bool, VaultError> {
            let row = NoteRow {
                title: note.title.clone(),
                content: ensure_token(cipher, &note.content)?,
                group_id,
                pinned: note.pinned,
                archived: note.archived,
                created_at: timestamp_or_now(&note.created_at),
                updated_at: timestamp_or_now(&note.updated_at),
            };
            match store.find_by_natural_key(note.title.trim(), group_id)? {
                Some(_) if options.merge_strategy == MergeStrategy::Skip => Ok(false),
                Some(existing_id) => {
                    store.overwrite_row(existing_id, &row)?;
                    Ok(true)
                }
                None => {
                    store.insert_row(&row)?;
                    Ok(true)
                }
            }
        })();

        match result {
            Ok(true) => report.imported = report.imported.saturating_add(1),
            Ok(false) => report.skipped = report.skipped.saturating_add(1),
            Err(e) => report
                .errors
                .push(format!("note {:?} (id {}): {e}", note.title, note.id)),
        }
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

fn import_credentials(
    conn: &Connection,
    cipher: &FieldCipher,
    document: &BackupDocument,
    group_map: &HashMap<i64, i64>,
    options: &ImportOptions,
    report: &mut ImportReport,
) -> HashMap<i64, i64> {
    let store = CredentialStore::new_with_connection(conn, cipher);
    let mut credential_map: HashMap<i64, i64> = HashMap::new();

    for credential in document.passwords.as_deref().unwrap_or_default() {
        let group_id = remap_group(
            credential.group_id,
            group_map,
            &format!("credential {:?} (id {})", credential.title, credential.id),
            report,
        );

        let result = (|| -> Result<Option<i64>, VaultError> {
            let row = CredentialRow {
                title: credential.title.clone(),
                username: credential.username.clone(),
                password: credential
                    .password
                    .as_deref()
                    .map(|value| ensure_token(cipher, value))
                    .transpose()?,
                multi_account_data: credential
                    .multi_account_data
                    .as_deref()
                    .map(|value| ensure_token(cipher, value))
                    .transpose()?,
                url: credential.url.clone(),
                notes: credential.notes.clone(),
                group_id,
                created_at: timestamp_or_now(&credential.created_at),
                updated_at: timestamp_or_now(&credential.updated_at),
            };
            match store.find_by_natural_key(&credential.title, &credential.username)? {
                Some(existing_id) if options.merge_strategy == MergeStrategy::Skip => {
                    credential_map.insert(credential.id, existing_id);
                    Ok(None)
                }
                Some(existing_id) => {
                    store.overwrite_row(existing_id, &row)?;
                    credential_map.insert(credential.id, existing_id);
                    Ok(Some(existing_id))
                }
                None => {
                    let new_id = store.insert_row(&row)?;
                    credential_map.insert(credential.id, new_id);
                    Ok(Some(new_id))
                }
            }
        })();

        match result {
            Ok(Some(_)) => report.imported = report.imported.saturating_add(1),
            Ok(None) => report.skipped = report.skipped.saturating_add(1),
            Err(e) => report.errors.push(format!(
                "credential {:?} (id {}): {e}",
                credential.title, credential.id
            )),
        }
    }

    credential_map
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

fn import_settings(
    conn: &Connection,
    document: &BackupDocument,
    options: &ImportOptions,
    report: &mut ImportReport,
) {
    let store = SettingsStore::with_connection(conn);

    for setting in document.user_settings.as_deref().unwrap_or_default() {
        let result = (|| -> Result<bool, VaultError> {
            let value_type = SettingType::from_db_str(&setting.value_type)?;
            let category = SettingCategory::from_db_str(&setting.category)?;
            if store.get(&setting.key)?.is_some()
                && options.merge_strategy == MergeStrategy::Skip
            {
                return Ok(false);
            }
            store.set(
                &setting.key,
                &setting.value,
                value_type,
                category,
                setting.description.as_deref(),
            )?;
            Ok(true)
        })();

        match result {
            Ok(true) => report.imported = report.imported.saturating_add(1),
            Ok(false) => report.skipped = report.skipped.saturating_add(1),
            Err(e) => report
                .errors
                .push(format!("setting {:?}: {e}", setting.key)),
        }
    }
}

// ---------------------------------------------------------------------------
// Password history
// ---------------------------------------------------------------------------

fn import_history(
    conn: &Connection,
    cipher: &FieldCipher,
    document: &BackupDocument,
    credential_map: &HashMap<i64, i64>,
    report: &mut ImportReport,
) {
    let store = CredentialStore::new_with_connection(conn, cipher);

    for entry in document.password_history.as_deref().unwrap_or_default() {
        let Some(&credential_id) = credential_map.get(&entry.credential_id) else {
            report.errors.push(format!(
                "password history row {} references credential {} which was not imported",
                entry.id, entry.credential_id
            ));
            continue;
        };

        let result = (|| -> Result<bool, VaultError> {
            let changed_at = timestamp_or_now(&entry.changed_at);
            // History is append-only; an identical change record is never
            // written twice, whatever the merge strategy.
            if history_exists(conn, credential_id, &changed_at)? {
                return Ok(false);
            }
            store.insert_history_row(
                credential_id,
                &ensure_token(cipher, &entry.old_password)?,
                &ensure_token(cipher, &entry.new_password)?,
                &changed_at,
                entry.reason.as_deref(),
            )?;
            Ok(true)
        })();

        match result {
            Ok(true) => report.imported = report.imported.saturating_add(1),
            Ok(false) => report.skipped = report.skipped.saturating_add(1),
            Err(e) => report
                .errors
                .push(format!("password history row {}: {e}", entry.id)),
        }
    }
}

fn history_exists(
    conn: &Connection,
    credential_id: i64,
    changed_at: &str,
) -> Result<bool, VaultError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM password_history WHERE credential_id = ?1 AND changed_at = ?2",
        rusqlite::params![credential_id, changed_at],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Rewrite a group reference through the id-remap table. A reference whose
/// group did not make it into the vault is nulled with a warning — the
/// entity itself still imports.
fn remap_group(
    old_group: Option<i64>,
    id_map: &HashMap<i64, i64>,
    context: &str,
    report: &mut ImportReport,
) -> Option<i64> {
    match old_group {
        None => None,
        Some(old) => match id_map.get(&old) {
            Some(&new) => Some(new),
            None => {
                report.warnings.push(format!(
                    "{context}: group {old} was not imported; reference cleared"
                ));
                None
            }
        },
    }
}

/// The just-in-time upgrade path: encrypt a value unless it already looks
/// like an encrypted token (separator heuristic — never re-encrypts).
fn ensure_token(cipher: &FieldCipher, value: &str) -> Result<String, VaultError> {
    if looks_encrypted(value) {
        Ok(value.to_string())
    } else {
        Ok(cipher.encrypt(value)?)
    }
}

/// Use the snapshot timestamp when well-formed, otherwise stamp now.
fn timestamp_or_now(value: &str) -> String {
    if is_valid_timestamp(value) {
        value.to_string()
    } else {
        now_iso8601()
    }
}
