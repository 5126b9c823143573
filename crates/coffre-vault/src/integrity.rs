//! Vault integrity auditing and best-effort repair.
//!
//! The auditor queries the persisted shape directly — it deliberately does
//! not go through the stores' business rules, so it can see exactly the
//! corruption a crashed import or an external edit left behind: dangling
//! references, duplicate keys and sibling names, parent cycles, malformed
//! timestamps.
//!
//! `check` is read-only. `repair` applies independent fixes; one failing
//! fix never blocks the others, and partial repair is an acceptable,
//! reported outcome — there is intentionally no wrapping transaction.

use std::collections::{HashMap, HashSet};

use rusqlite::{params, Connection};

use crate::clock::{is_valid_timestamp, iso8601_from_epoch, now_epoch_secs};
use crate::credentials::{MAX_NOTES_LEN, MAX_TEXT_LEN, MAX_URL_LEN};
use crate::db::VaultDb;
use crate::error::VaultError;
use crate::groups::{GroupFamily, CREDENTIAL_GROUP_FAMILY, NOTE_GROUP_FAMILY};

/// History entries older than this are flagged for cleanup.
const HISTORY_RETENTION_DAYS: u64 = 365;

const SECS_PER_DAY: u64 = 86_400;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Result of a read-only integrity scan.
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    /// True when no errors were found (warnings do not affect validity).
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Result of a best-effort repair pass.
#[derive(Debug, Clone, Default)]
pub struct RepairReport {
    /// One entry per repaired item.
    pub repaired: Vec<String>,
    /// One entry per fix that could not be applied.
    pub failed: Vec<String>,
}

// ---------------------------------------------------------------------------
// IntegrityAuditor
// ---------------------------------------------------------------------------

/// Read-only scanner plus repairer over the vault tables.
pub struct IntegrityAuditor<'v> {
    conn: &'v Connection,
}

impl<'v> IntegrityAuditor<'v> {
    #[must_use]
    pub fn new(db: &'v VaultDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    // -----------------------------------------------------------------------
    // check
    // -----------------------------------------------------------------------

    /// Scan the vault for integrity violations.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Database`] only if a scan query itself fails;
    /// findings are collected into the report, never raised.
    pub fn check(&self) -> Result<IntegrityReport, VaultError> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        self.check_dangling_refs(&mut errors)?;
        self.check_duplicate_setting_keys(&mut errors)?;
        self.check_duplicate_sibling_names(&mut errors)?;
        self.check_field_shapes(&mut errors, &mut warnings)?;
        self.check_cycles(&mut errors)?;
        self.check_orphans(&mut warnings)?;

        Ok(IntegrityReport {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        })
    }

    fn check_dangling_refs(&self, errors: &mut Vec<String>) -> Result<(), VaultError> {
        for (sql, describe) in [
            (
                "SELECT c.id FROM credentials c WHERE c.group_id IS NOT NULL \
                 AND NOT EXISTS (SELECT 1 FROM credential_groups g WHERE g.id = c.group_id)",
                "credential {} references a missing group",
            ),
            (
                "SELECT n.id FROM secure_notes n WHERE n.group_id IS NOT NULL \
                 AND NOT EXISTS (SELECT 1 FROM note_groups g WHERE g.id = n.group_id)",
                "note {} references a missing group",
            ),
            (
                "SELECT g.id FROM credential_groups g WHERE g.parent_id IS NOT NULL \
                 AND NOT EXISTS (SELECT 1 FROM credential_groups p WHERE p.id = g.parent_id)",
                "credential group {} references a missing parent",
            ),
            (
                "SELECT g.id FROM note_groups g WHERE g.parent_id IS NOT NULL \
                 AND NOT EXISTS (SELECT 1 FROM note_groups p WHERE p.id = g.parent_id)",
                "note group {} references a missing parent",
            ),
            (
                "SELECT h.id FROM password_history h \
                 WHERE NOT EXISTS (SELECT 1 FROM credentials c WHERE c.id = h.credential_id)",
                "password history row {} references a missing credential",
            ),
        ] {
            for id in self.query_ids(sql)? {
                errors.push(describe.replacen("{}", &id.to_string(), 1));
            }
        }
        Ok(())
    }

    fn check_duplicate_setting_keys(&self, errors: &mut Vec<String>) -> Result<(), VaultError> {
        let mut stmt = self.conn.prepare(
            "SELECT key, COUNT(*) FROM user_settings GROUP BY key HAVING COUNT(*) > 1",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (key, count) = row?;
            errors.push(format!("setting key {key:?} appears {count} times"));
        }
        Ok(())
    }

    fn check_duplicate_sibling_names(&self, errors: &mut Vec<String>) -> Result<(), VaultError> {
        for family in [CREDENTIAL_GROUP_FAMILY, NOTE_GROUP_FAMILY] {
            let sql = format!(
                "SELECT name, parent_id, COUNT(*) FROM {} \
                 GROUP BY name, parent_id HAVING COUNT(*) > 1",
                family.table
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;
            for row in rows {
                let (name, parent_id, count) = row?;
                let scope = parent_id.map_or_else(|| "the root scope".to_string(), |p| {
                    format!("parent {p}")
                });
                errors.push(format!(
                    "{} name {name:?} appears {count} times under {scope}",
                    family.entity
                ));
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    fn check_field_shapes(
        &self,
        errors: &mut Vec<String>,
        warnings: &mut Vec<String>,
    ) -> Result<(), VaultError> {
        // Credentials: blanks and timestamps are errors, oversizes warnings.
        let mut stmt = self.conn.prepare(
            "SELECT id, title, username, url, notes, created_at, updated_at FROM credentials",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;
        for row in rows {
            let (id, title, username, url, notes, created_at, updated_at) = row?;
            if title.trim().is_empty() {
                errors.push(format!("credential {id} has a blank title"));
            }
            if username.trim().is_empty() {
                errors.push(format!("credential {id} has a blank username"));
            }
            for (label, value) in [("created_at", &created_at), ("updated_at", &updated_at)] {
                if !is_valid_timestamp(value) {
                    errors.push(format!("credential {id} has a malformed {label}: {value:?}"));
                }
            }
            if title.chars().count() > MAX_TEXT_LEN {
                warnings.push(format!("credential {id} title exceeds {MAX_TEXT_LEN} characters"));
            }
            if username.chars().count() > MAX_TEXT_LEN {
                warnings.push(format!(
                    "credential {id} username exceeds {MAX_TEXT_LEN} characters"
                ));
            }
            if url.as_deref().is_some_and(|u| u.chars().count() > MAX_URL_LEN) {
                warnings.push(format!("credential {id} url exceeds {MAX_URL_LEN} characters"));
            }
            if notes
                .as_deref()
                .is_some_and(|n| n.chars().count() > MAX_NOTES_LEN)
            {
                warnings.push(format!(
                    "credential {id} notes exceed {MAX_NOTES_LEN} characters"
                ));
            }
        }

        // Groups (both families).
        for family in [CREDENTIAL_GROUP_FAMILY, NOTE_GROUP_FAMILY] {
            let sql = format!(
                "SELECT id, name, created_at, updated_at FROM {}",
                family.table
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;
            for row in rows {
                let (id, name, created_at, updated_at) = row?;
                if name.trim().is_empty() {
                    errors.push(format!("{} {id} has a blank name", family.entity));
                }
                for (label, value) in [("created_at", &created_at), ("updated_at", &updated_at)] {
                    if !is_valid_timestamp(value) {
                        errors.push(format!(
                            "{} {id} has a malformed {label}: {value:?}",
                            family.entity
                        ));
                    }
                }
                if name.chars().count() > 100 {
                    warnings.push(format!("{} {id} name exceeds 100 characters", family.entity));
                }
            }
        }

        // Notes.
        let mut stmt = self
            .conn
            .prepare("SELECT id, title, created_at, updated_at FROM secure_notes")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        for row in rows {
            let (id, title, created_at, updated_at) = row?;
            if title.trim().is_empty() {
                errors.push(format!("note {id} has a blank title"));
            }
            for (label, value) in [("created_at", &created_at), ("updated_at", &updated_at)] {
                if !is_valid_timestamp(value) {
                    errors.push(format!("note {id} has a malformed {label}: {value:?}"));
                }
            }
        }

        // Settings keys and history timestamps.
        let mut stmt = self.conn.prepare("SELECT id, key FROM user_settings")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (id, key) = row?;
            if key.trim().is_empty() {
                errors.push(format!("setting {id} has a blank key"));
            }
        }

        let mut stmt = self
            .conn
            .prepare("SELECT id, changed_at FROM password_history")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (id, changed_at) = row?;
            if !is_valid_timestamp(&changed_at) {
                errors.push(format!(
                    "password history row {id} has a malformed changed_at: {changed_at:?}"
                ));
            }
        }

        Ok(())
    }

    fn check_cycles(&self, errors: &mut Vec<String>) -> Result<(), VaultError> {
        for family in [CREDENTIAL_GROUP_FAMILY, NOTE_GROUP_FAMILY] {
            let sql = format!("SELECT id, parent_id FROM {}", family.table);
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, Option<i64>>(1)?))
            })?;
            let mut parents: HashMap<i64, Option<i64>> = HashMap::new();
            for row in rows {
                let (id, parent_id) = row?;
                parents.insert(id, parent_id);
            }

            for id in find_cycle_members(&parents) {
                errors.push(format!(
                    "{} hierarchy contains a cycle through id {id}",
                    family.entity
                ));
            }
        }
        Ok(())
    }

    fn check_orphans(&self, warnings: &mut Vec<String>) -> Result<(), VaultError> {
        // Credential groups that organize nothing.
        let empty_groups = self.query_ids(
            "SELECT g.id FROM credential_groups g \
             WHERE NOT EXISTS (SELECT 1 FROM credentials c WHERE c.group_id = g.id)",
        )?;
        for id in empty_groups {
            warnings.push(format!("credential group {id} has no member credentials"));
        }

        // Stale history beyond the retention horizon.
        let horizon = iso8601_from_epoch(
            now_epoch_secs().saturating_sub(HISTORY_RETENTION_DAYS.saturating_mul(SECS_PER_DAY)),
        );
        let mut stmt = self
            .conn
            .prepare("SELECT COUNT(*) FROM password_history WHERE changed_at < ?1")?;
        let stale: i64 = stmt.query_row(params![horizon], |row| row.get(0))?;
        if stale > 0 {
            warnings.push(format!(
                "{stale} password history rows are older than {HISTORY_RETENTION_DAYS} days"
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // repair
    // -----------------------------------------------------------------------

    /// Apply best-effort fixes. Each fix is attempted independently; a
    /// failure lands in `failed` and the remaining fixes still run.
    #[must_use]
    pub fn repair(&self) -> RepairReport {
        let mut report = RepairReport::default();

        match self.fix_dangling_refs() {
            Ok(msgs) => report.repaired.extend(msgs),
            Err(e) => report
                .failed
                .push(format!("dangling reference repair failed: {e}")),
        }
        match self.fix_orphaned_history() {
            Ok(msgs) => report.repaired.extend(msgs),
            Err(e) => report
                .failed
                .push(format!("orphaned history cleanup failed: {e}")),
        }
        match self.fix_duplicate_setting_keys() {
            Ok(msgs) => report.repaired.extend(msgs),
            Err(e) => report
                .failed
                .push(format!("duplicate setting repair failed: {e}")),
        }
        for family in [CREDENTIAL_GROUP_FAMILY, NOTE_GROUP_FAMILY] {
            match self.fix_duplicate_sibling_names(family) {
                Ok(msgs) => report.repaired.extend(msgs),
                Err(e) => report.failed.push(format!(
                    "duplicate {} name repair failed: {e}",
                    family.entity
                )),
            }
        }

        report
    }

    /// Null out references to rows that no longer exist.
    fn fix_dangling_refs(&self) -> Result<Vec<String>, VaultError> {
        let mut messages = Vec::new();

        for (select_sql, update_sql, describe) in [
            (
                "SELECT c.id FROM credentials c WHERE c.group_id IS NOT NULL \
                 AND NOT EXISTS (SELECT 1 FROM credential_groups g WHERE g.id = c.group_id)",
                "UPDATE credentials SET group_id = NULL WHERE id = ?1",
                "nulled dangling group reference on credential {}",
            ),
            (
                "SELECT n.id FROM secure_notes n WHERE n.group_id IS NOT NULL \
                 AND NOT EXISTS (SELECT 1 FROM note_groups g WHERE g.id = n.group_id)",
                "UPDATE secure_notes SET group_id = NULL WHERE id = ?1",
                "nulled dangling group reference on note {}",
            ),
            (
                "SELECT g.id FROM credential_groups g WHERE g.parent_id IS NOT NULL \
                 AND NOT EXISTS (SELECT 1 FROM credential_groups p WHERE p.id = g.parent_id)",
                "UPDATE credential_groups SET parent_id = NULL WHERE id = ?1",
                "nulled dangling parent reference on credential group {}",
            ),
            (
                "SELECT g.id FROM note_groups g WHERE g.parent_id IS NOT NULL \
                 AND NOT EXISTS (SELECT 1 FROM note_groups p WHERE p.id = g.parent_id)",
                "UPDATE note_groups SET parent_id = NULL WHERE id = ?1",
                "nulled dangling parent reference on note group {}",
            ),
        ] {
            for id in self.query_ids(select_sql)? {
                self.conn.execute(update_sql, params![id])?;
                messages.push(describe.replacen("{}", &id.to_string(), 1));
            }
        }
        Ok(messages)
    }

    /// Delete history rows whose owning credential is gone.
    fn fix_orphaned_history(&self) -> Result<Vec<String>, VaultError> {
        let orphans = self.query_ids(
            "SELECT h.id FROM password_history h \
             WHERE NOT EXISTS (SELECT 1 FROM credentials c WHERE c.id = h.credential_id)",
        )?;
        let mut messages = Vec::new();
        for id in orphans {
            self.conn
                .execute("DELETE FROM password_history WHERE id = ?1", params![id])?;
            messages.push(format!("deleted orphaned password history row {id}"));
        }
        Ok(messages)
    }

    /// Keep only the most-recently-updated row per duplicate setting key.
    fn fix_duplicate_setting_keys(&self) -> Result<Vec<String>, VaultError> {
        let mut stmt = self
            .conn
            .prepare("SELECT key FROM user_settings GROUP BY key HAVING COUNT(*) > 1")?;
        let keys: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;

        let mut messages = Vec::new();
        for key in keys {
            let mut stmt = self.conn.prepare(
                "SELECT id FROM user_settings WHERE key = ?1 \
                 ORDER BY updated_at DESC, id DESC",
            )?;
            let ids: Vec<i64> = stmt
                .query_map(params![key], |row| row.get(0))?
                .collect::<Result<_, _>>()?;
            for id in ids.iter().skip(1) {
                self.conn
                    .execute("DELETE FROM user_settings WHERE id = ?1", params![id])?;
                messages.push(format!("removed duplicate setting row {id} for key {key:?}"));
            }
        }
        Ok(messages)
    }

    /// Rename duplicate sibling groups by appending `_1`, `_2`… to all but
    /// the first (id order). Rename, never merge.
    fn fix_duplicate_sibling_names(&self, family: GroupFamily) -> Result<Vec<String>, VaultError> {
        let dup_sql = format!(
            "SELECT name, parent_id FROM {} GROUP BY name, parent_id HAVING COUNT(*) > 1",
            family.table
        );
        let mut stmt = self.conn.prepare(&dup_sql)?;
        let duplicates: Vec<(String, Option<i64>)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;

        let ids_sql = format!(
            "SELECT id FROM {} WHERE name = ?1 AND parent_id IS ?2 ORDER BY id ASC",
            family.table
        );
        let sibling_sql = format!(
            "SELECT COUNT(*) FROM {} WHERE name = ?1 AND parent_id IS ?2",
            family.table
        );
        let rename_sql = format!(
            "UPDATE {} SET name = ?1, updated_at = ?2 WHERE id = ?3",
            family.table
        );

        let mut messages = Vec::new();
        for (name, parent_id) in duplicates {
            let mut stmt = self.conn.prepare(&ids_sql)?;
            let ids: Vec<i64> = stmt
                .query_map(params![name, parent_id], |row| row.get(0))?
                .collect::<Result<_, _>>()?;

            let mut suffix: u64 = 0;
            for id in ids.iter().skip(1) {
                // Next free numeric suffix among current siblings.
                let candidate = loop {
                    suffix = suffix.saturating_add(1);
                    let candidate = format!("{name}_{suffix}");
                    let taken: i64 = self.conn.query_row(
                        &sibling_sql,
                        params![candidate, parent_id],
                        |row| row.get(0),
                    )?;
                    if taken == 0 {
                        break candidate;
                    }
                };
                self.conn.execute(
                    &rename_sql,
                    params![candidate, crate::clock::now_iso8601(), id],
                )?;
                messages.push(format!(
                    "renamed duplicate {} {id} to {candidate:?}",
                    family.entity
                ));
            }
        }
        Ok(messages)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn query_ids(&self, sql: &str) -> Result<Vec<i64>, VaultError> {
        let mut stmt = self.conn.prepare(sql)?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        Ok(ids)
    }
}

/// Find ids involved in parent-pointer cycles: depth-first walk with a
/// recursion-stack set. Returns one representative id per cycle, sorted.
fn find_cycle_members(parents: &HashMap<i64, Option<i64>>) -> Vec<i64> {
    let mut done: HashSet<i64> = HashSet::new();
    let mut representatives = Vec::new();

    let mut ids: Vec<i64> = parents.keys().copied().collect();
    ids.sort_unstable();

    for start in ids {
        if done.contains(&start) {
            continue;
        }
        let mut path: Vec<i64> = Vec::new();
        let mut on_path: HashSet<i64> = HashSet::new();
        let mut cursor = start;

        loop {
            if done.contains(&cursor) {
                done.extend(path.iter().copied());
                break;
            }
            if !on_path.insert(cursor) {
                // Walked back onto the current path: cycle found.
                representatives.push(cursor);
                done.extend(path.iter().copied());
                break;
            }
            path.push(cursor);
            match parents.get(&cursor).copied().flatten() {
                Some(parent) if parents.contains_key(&parent) => cursor = parent,
                // Root, or a dangling parent — reported separately.
                _ => {
                    done.extend(path.iter().copied());
                    break;
                }
            }
        }
    }

    representatives.sort_unstable();
    representatives.dedup();
    representatives
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
