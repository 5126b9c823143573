//! Embedded database connection and migration runner.
//!
//! One [`rusqlite::Connection`] per vault, opened once and passed by
//! reference into every store constructor — there is no ambient or static
//! handle. The embedded engine enforces single-writer semantics; callers
//! invoking stores from multiple threads must serialize externally.

use std::fmt;
use std::path::Path;

use rusqlite::Connection;

use crate::error::VaultError;

// ---------------------------------------------------------------------------
// Embedded migrations
// ---------------------------------------------------------------------------

/// Forward-only SQL migrations, embedded at compile time.
/// Index 0 → version 1, index 1 → version 2, etc.
const MIGRATIONS: &[&str] = &[
    include_str!("../migrations/001_initial_schema.sql"),
    include_str!("../migrations/002_add_note_tables.sql"),
    include_str!("../migrations/003_add_note_flags.sql"),
    include_str!("../migrations/004_add_multi_account.sql"),
];

// ---------------------------------------------------------------------------
// VaultDb
// ---------------------------------------------------------------------------

/// Handle to an open vault database.
///
/// Holds the single [`rusqlite::Connection`] all store operations flow
/// through. Construction runs any pending schema migrations best-effort:
/// a failed step is rolled back and logged, never propagated (§ the stores
/// must keep working against the last good schema version).
pub struct VaultDb {
    conn: Connection,
}

impl fmt::Debug for VaultDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VaultDb")
    }
}

impl VaultDb {
    /// Open (or create) a vault database file at `path`.
    ///
    /// Enables WAL journal mode and runs pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Database`] if the file cannot be opened.
    /// Migration failures are swallowed (see [`Self::run_migrations`]).
    pub fn open(path: &Path) -> Result<Self, VaultError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;

        let mut db = Self { conn };
        db.run_migrations();
        Ok(db)
    }

    /// Open an in-memory vault (tests, dry-run tooling).
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Database`] if the connection cannot be created.
    pub fn open_in_memory() -> Result<Self, VaultError> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        db.run_migrations();
        Ok(db)
    }

    /// Returns a reference to the underlying [`rusqlite::Connection`].
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Returns the current schema version (`PRAGMA user_version`).
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Database`] if the pragma query fails.
    pub fn schema_version(&self) -> Result<i32, VaultError> {
        let v: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;
        Ok(v)
    }

    // -----------------------------------------------------------------------
    // Migration runner
    // -----------------------------------------------------------------------

    /// Apply pending migrations sequentially, best-effort.
    ///
    /// Each step runs in its own transaction and bumps `user_version` on
    /// commit. A failing step is rolled back and stops the run — later
    /// steps never see a half-upgraded schema — but the error is logged
    /// and swallowed, so callers cannot assume a failed migration is
    /// surfaced. The next startup retries from the same version.
    fn run_migrations(&mut self) {
        if let Err(err) = self.try_run_migrations() {
            tracing::warn!(error = %err, "schema migration failed; continuing on current schema");
        }
    }

    fn try_run_migrations(&mut self) -> Result<(), VaultError> {
        let current = self.schema_version()?;

        for (idx, sql) in MIGRATIONS.iter().enumerate() {
            // Migration versions are 1-indexed: index 0 → version 1.
            let version = idx
                .checked_add(1)
                .and_then(|v| i32::try_from(v).ok())
                .ok_or_else(|| VaultError::Migration("migration index overflow".into()))?;

            if version <= current {
                continue; // already applied
            }

            let tx = self.conn.transaction().map_err(|e| {
                VaultError::Migration(format!(
                    "failed to start transaction for migration {version}: {e}"
                ))
            })?;

            tx.execute_batch(sql)
                .map_err(|e| VaultError::Migration(format!("migration {version} failed: {e}")))?;

            tx.pragma_update(None, "user_version", version).map_err(|e| {
                VaultError::Migration(format!("failed to update user_version to {version}: {e}"))
            })?;

            tx.commit().map_err(|e| {
                VaultError::Migration(format!("failed to commit migration {version}: {e}"))
            })?;

            tracing::debug!(version, "applied schema migration");
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_vault_reaches_latest_schema() {
        let db = VaultDb::open_in_memory().expect("open");
        let version = db.schema_version().expect("schema_version");
        assert_eq!(version as usize, MIGRATIONS.len());
    }

    #[test]
    fn migrations_are_idempotent_per_version() {
        let mut db = VaultDb::open_in_memory().expect("open");
        let before = db.schema_version().expect("version");
        db.run_migrations();
        let after = db.schema_version().expect("version");
        assert_eq!(before, after);
    }

    #[test]
    fn expected_tables_exist() {
        let db = VaultDb::open_in_memory().expect("open");
        for table in [
            "credentials",
            "credential_groups",
            "password_history",
            "user_settings",
            "note_groups",
            "secure_notes",
            "credentials_fts",
        ] {
            let count: i32 = db
                .connection()
                .query_row(
                    "SELECT count(*) FROM sqlite_master WHERE name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .expect("query");
            assert!(count >= 1, "table {table} should exist");
        }
    }

    /// `VaultDb` must be `Send` so hosts can move it into worker state.
    #[allow(dead_code)]
    const fn assert_send<T: Send>() {}

    #[allow(dead_code)]
    const _: () = assert_send::<VaultDb>();
}
