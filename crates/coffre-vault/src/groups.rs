//! Hierarchical group management.
//!
//! Two independent group trees exist in the vault — one organizing
//! credentials, one organizing secure notes. Both share this store type;
//! a [`GroupFamily`] carries the table wiring so the invariants (sibling
//! name uniqueness, acyclic parent links, dense sort order) are written
//! once.
//!
//! Groups form an arena keyed by integer id. Cycle checks walk parent
//! pointers with a visited set rather than trusting recursion depth.

use std::collections::{HashMap, HashSet};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::clock::now_iso8601;
use crate::db::VaultDb;
use crate::error::VaultError;

// ---------------------------------------------------------------------------
// Family wiring
// ---------------------------------------------------------------------------

/// Table wiring for one group family (credential groups or note groups).
#[derive(Debug, Clone, Copy)]
pub(crate) struct GroupFamily {
    /// The group table itself.
    pub table: &'static str,
    /// The table of member entities organized by this family.
    pub member_table: &'static str,
    /// The member table's group reference column.
    pub member_fk: &'static str,
    /// Entity label for error messages.
    pub entity: &'static str,
}

pub(crate) const CREDENTIAL_GROUP_FAMILY: GroupFamily = GroupFamily {
    table: "credential_groups",
    member_table: "credentials",
    member_fk: "group_id",
    entity: "credential group",
};

pub(crate) const NOTE_GROUP_FAMILY: GroupFamily = GroupFamily {
    table: "note_groups",
    member_table: "secure_notes",
    member_fk: "group_id",
    entity: "note group",
};

// ---------------------------------------------------------------------------
// Color palette
// ---------------------------------------------------------------------------

/// Fixed color palette for group tags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupColor {
    #[default]
    Slate,
    Red,
    Orange,
    Amber,
    Green,
    Teal,
    Blue,
    Violet,
    Pink,
}

impl GroupColor {
    /// Convert to the string stored in the database.
    #[must_use]
    pub const fn as_db_str(self) -> &'static str {
        match self {
            Self::Slate => "slate",
            Self::Red => "red",
            Self::Orange => "orange",
            Self::Amber => "amber",
            Self::Green => "green",
            Self::Teal => "teal",
            Self::Blue => "blue",
            Self::Violet => "violet",
            Self::Pink => "pink",
        }
    }

    /// Parse from the database `TEXT` value.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Validation`] for values outside the palette.
    pub fn from_db_str(s: &str) -> Result<Self, VaultError> {
        match s {
            "slate" => Ok(Self::Slate),
            "red" => Ok(Self::Red),
            "orange" => Ok(Self::Orange),
            "amber" => Ok(Self::Amber),
            "green" => Ok(Self::Green),
            "teal" => Ok(Self::Teal),
            "blue" => Ok(Self::Blue),
            "violet" => Ok(Self::Violet),
            "pink" => Ok(Self::Pink),
            other => Err(VaultError::Validation(format!(
                "unknown group color: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain model
// ---------------------------------------------------------------------------

/// A group in one of the vault's two hierarchies.
#[derive(Debug, Clone)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
    pub color: GroupColor,
    /// Display position among siblings. Gaps tolerated; order is what counts.
    pub sort: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// A group with its member count for list display.
#[derive(Debug, Clone)]
pub struct GroupListItem {
    pub group: Group,
    pub member_count: u32,
}

/// A node in the fully built parent→children tree.
#[derive(Debug, Clone)]
pub struct GroupNode {
    pub group: Group,
    pub children: Vec<GroupNode>,
}

/// Parameters for creating or updating a group.
///
/// `id: None` inserts; `id: Some` updates in place.
#[derive(Debug, Clone, Default)]
pub struct SaveGroup {
    pub id: Option<i64>,
    pub name: String,
    pub parent_id: Option<i64>,
    pub color: GroupColor,
    /// Explicit sort position. `None` assigns the next free position in the
    /// target parent scope.
    pub sort: Option<i64>,
}

/// Raw row used by the backup importer — preserves timestamps and sort.
#[derive(Debug, Clone)]
pub(crate) struct GroupRow {
    pub name: String,
    pub parent_id: Option<i64>,
    pub color: String,
    pub sort: i64,
    pub created_at: String,
    pub updated_at: String,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Maximum group name length.
const MAX_NAME_LEN: usize = 100;

/// Characters rejected in group names (filesystem-special).
const FORBIDDEN_NAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

fn validate_name(name: &str) -> Result<(), VaultError> {
    if name.is_empty() {
        return Err(VaultError::Validation("group name is required".into()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(VaultError::Validation(format!(
            "group name exceeds {MAX_NAME_LEN} characters"
        )));
    }
    if let Some(bad) = name.chars().find(|c| FORBIDDEN_NAME_CHARS.contains(c)) {
        return Err(VaultError::Validation(format!(
            "group name contains forbidden character {bad:?}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// GroupStore
// ---------------------------------------------------------------------------

/// Store over one group family.
pub struct GroupStore<'v> {
    conn: &'v Connection,
    family: GroupFamily,
}

impl<'v> GroupStore<'v> {
    /// Store over the credential group hierarchy.
    #[must_use]
    pub fn credential_groups(db: &'v VaultDb) -> Self {
        Self::with_family(db.connection(), CREDENTIAL_GROUP_FAMILY)
    }

    /// Store over the note group hierarchy.
    #[must_use]
    pub fn note_groups(db: &'v VaultDb) -> Self {
        Self::with_family(db.connection(), NOTE_GROUP_FAMILY)
    }

    pub(crate) const fn with_family(conn: &'v Connection, family: GroupFamily) -> Self {
        Self { conn, family }
    }

    // -- Queries ------------------------------------------------------------

    /// List all groups in this family, ordered by sort then id.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Database`] if the query fails.
    pub fn list(&self) -> Result<Vec<Group>, VaultError> {
        let sql = format!(
            "SELECT id, name, parent_id, color, sort, created_at, updated_at \
             FROM {} ORDER BY sort ASC, id ASC",
            self.family.table
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_group_parts)?;

        let mut groups = Vec::new();
        for row in rows {
            groups.push(parts_to_group(row?)?);
        }
        Ok(groups)
    }

    /// List all groups with their member counts.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Database`] if the query fails.
    pub fn list_with_counts(&self) -> Result<Vec<GroupListItem>, VaultError> {
        let sql = format!(
            "SELECT g.id, g.name, g.parent_id, g.color, g.sort, g.created_at, g.updated_at, \
             COUNT(m.id) \
             FROM {table} g \
             LEFT JOIN {member} m ON m.{fk} = g.id \
             GROUP BY g.id \
             ORDER BY g.sort ASC, g.id ASC",
            table = self.family.table,
            member = self.family.member_table,
            fk = self.family.member_fk,
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((row_to_group_parts(row)?, row.get::<_, u32>(7)?))
        })?;

        let mut items = Vec::new();
        for row in rows {
            let (parts, member_count) = row?;
            items.push(GroupListItem {
                group: parts_to_group(parts)?,
                member_count,
            });
        }
        Ok(items)
    }

    /// Build the full parent→children tree from the flat list, children
    /// ordered by sort ascending within each parent.
    ///
    /// Groups trapped in a corrupt parent cycle are unreachable from any
    /// root and are omitted; the integrity auditor reports them.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Database`] if the query fails.
    pub fn tree(&self) -> Result<Vec<GroupNode>, VaultError> {
        let groups = self.list()?;

        let mut by_parent: HashMap<Option<i64>, Vec<Group>> = HashMap::new();
        for group in groups {
            by_parent.entry(group.parent_id).or_default().push(group);
        }

        fn build(
            parent: Option<i64>,
            by_parent: &mut HashMap<Option<i64>, Vec<Group>>,
        ) -> Vec<GroupNode> {
            by_parent
                .remove(&parent)
                .unwrap_or_default()
                .into_iter()
                .map(|group| {
                    let id = group.id;
                    GroupNode {
                        group,
                        children: build(Some(id), by_parent),
                    }
                })
                .collect()
        }

        Ok(build(None, &mut by_parent))
    }

    /// Get a single group by id.
    ///
    /// # Errors
    ///
    /// - [`VaultError::NotFound`] if no group matches the id
    /// - [`VaultError::Database`] if the query fails
    pub fn get(&self, id: i64) -> Result<Group, VaultError> {
        let sql = format!(
            "SELECT id, name, parent_id, color, sort, created_at, updated_at \
             FROM {} WHERE id = ?1",
            self.family.table
        );
        let parts = self
            .conn
            .query_row(&sql, params![id], row_to_group_parts)
            .optional()?
            .ok_or(VaultError::NotFound {
                entity: self.family.entity,
                id,
            })?;
        parts_to_group(parts)
    }

    /// Look up a group by name within a parent scope (NULL parent is its
    /// own scope). Name comparison is exact.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Database`] if the query fails.
    pub fn get_by_name_and_parent(
        &self,
        name: &str,
        parent_id: Option<i64>,
    ) -> Result<Option<Group>, VaultError> {
        let sql = format!(
            "SELECT id, name, parent_id, color, sort, created_at, updated_at \
             FROM {} WHERE name = ?1 AND parent_id IS ?2 LIMIT 1",
            self.family.table
        );
        let parts = self
            .conn
            .query_row(&sql, params![name, parent_id], row_to_group_parts)
            .optional()?;
        parts.map(parts_to_group).transpose()
    }

    // -- Mutations ----------------------------------------------------------

    /// Insert or update a group.
    ///
    /// On insert without an explicit sort, the group takes
    /// `max(sibling sort) + 1`. On reparenting without an explicit sort,
    /// the group is appended to the new parent's children.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Validation`] for bad names, out-of-palette colors,
    ///   sibling name collisions, or a parent assignment that would create
    ///   a cycle
    /// - [`VaultError::ForeignKeyViolation`] if `parent_id` does not exist
    /// - [`VaultError::NotFound`] when updating a missing id
    pub fn save(&self, params: &SaveGroup) -> Result<Group, VaultError> {
        let name = params.name.trim();
        validate_name(name)?;

        if let Some(parent_id) = params.parent_id {
            if !self.exists(parent_id)? {
                return Err(VaultError::ForeignKeyViolation(format!(
                    "{} parent {parent_id} does not exist",
                    self.family.entity
                )));
            }
        }

        // Sibling uniqueness: the same name may exist under a different parent.
        if let Some(existing) = self.get_by_name_and_parent(name, params.parent_id)? {
            if params.id != Some(existing.id) {
                return Err(VaultError::Validation(format!(
                    "a {} named {name:?} already exists in this scope",
                    self.family.entity
                )));
            }
        }

        match params.id {
            None => self.insert(name, params),
            Some(id) => self.update(id, name, params),
        }
    }

    fn insert(&self, name: &str, params: &SaveGroup) -> Result<Group, VaultError> {
        let now = now_iso8601();
        let sort = match params.sort {
            Some(s) => s,
            None => self.next_sort(params.parent_id)?,
        };

        let sql = format!(
            "INSERT INTO {} (name, parent_id, color, sort, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            self.family.table
        );
        self.conn.execute(
            &sql,
            params![
                name,
                params.parent_id,
                params.color.as_db_str(),
                sort,
                now,
                now
            ],
        )?;

        Ok(Group {
            id: self.conn.last_insert_rowid(),
            name: name.to_string(),
            parent_id: params.parent_id,
            color: params.color,
            sort,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    fn update(&self, id: i64, name: &str, params: &SaveGroup) -> Result<Group, VaultError> {
        let existing = self.get(id)?;

        if let Some(parent_id) = params.parent_id {
            self.ensure_no_cycle(id, parent_id)?;
        }

        let reparented = existing.parent_id != params.parent_id;
        let sort = match params.sort {
            Some(s) => s,
            None if reparented => self.next_sort(params.parent_id)?,
            None => existing.sort,
        };

        let now = now_iso8601();
        let sql = format!(
            "UPDATE {} SET name = ?1, parent_id = ?2, color = ?3, sort = ?4, updated_at = ?5 \
             WHERE id = ?6",
            self.family.table
        );
        self.conn.execute(
            &sql,
            params![
                name,
                params.parent_id,
                params.color.as_db_str(),
                sort,
                now,
                id
            ],
        )?;

        Ok(Group {
            id,
            name: name.to_string(),
            parent_id: params.parent_id,
            color: params.color,
            sort,
            created_at: existing.created_at,
            updated_at: now,
        })
    }

    /// Delete a group.
    ///
    /// Members and child groups are not deleted: their references to this
    /// group become NULL (cascade-null). Sort positions are then recomputed
    /// densely per parent scope from creation order.
    ///
    /// # Errors
    ///
    /// - [`VaultError::NotFound`] if no group matches the id
    /// - [`VaultError::Database`] if any statement fails (all rolled back)
    pub fn delete(&self, id: i64) -> Result<(), VaultError> {
        let tx = self.conn.unchecked_transaction()?;

        let unlink_members = format!(
            "UPDATE {member} SET {fk} = NULL WHERE {fk} = ?1",
            member = self.family.member_table,
            fk = self.family.member_fk,
        );
        tx.execute(&unlink_members, params![id])?;

        let unlink_children = format!(
            "UPDATE {} SET parent_id = NULL WHERE parent_id = ?1",
            self.family.table
        );
        tx.execute(&unlink_children, params![id])?;

        let delete_sql = format!("DELETE FROM {} WHERE id = ?1", self.family.table);
        let deleted = tx.execute(&delete_sql, params![id])?;
        if deleted == 0 {
            return Err(VaultError::NotFound {
                entity: self.family.entity,
                id,
            });
        }

        self.resequence_sorts(&tx)?;
        tx.commit()?;
        Ok(())
    }

    // -- Internals ----------------------------------------------------------

    pub(crate) fn exists(&self, id: i64) -> Result<bool, VaultError> {
        let sql = format!("SELECT 1 FROM {} WHERE id = ?1", self.family.table);
        let found: Option<i32> = self
            .conn
            .query_row(&sql, params![id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    /// Next free sort position within a parent scope.
    fn next_sort(&self, parent_id: Option<i64>) -> Result<i64, VaultError> {
        let sql = format!(
            "SELECT COALESCE(MAX(sort) + 1, 0) FROM {} WHERE parent_id IS ?1",
            self.family.table
        );
        let next: i64 = self.conn.query_row(&sql, params![parent_id], |row| row.get(0))?;
        Ok(next)
    }

    /// Walk the candidate parent's ancestor chain; fail if `node_id` is
    /// encountered, or if any id repeats (disconnected-cycle corruption).
    fn ensure_no_cycle(&self, node_id: i64, candidate_parent: i64) -> Result<(), VaultError> {
        let mut visited: HashSet<i64> = HashSet::new();
        let mut cursor = Some(candidate_parent);

        while let Some(current) = cursor {
            if current == node_id {
                return Err(VaultError::Validation(format!(
                    "cannot set parent: {} {node_id} would become its own ancestor",
                    self.family.entity
                )));
            }
            if !visited.insert(current) {
                return Err(VaultError::Validation(format!(
                    "corrupt hierarchy: {} ancestor chain revisits id {current}",
                    self.family.entity
                )));
            }
            let sql = format!("SELECT parent_id FROM {} WHERE id = ?1", self.family.table);
            cursor = self
                .conn
                .query_row(&sql, params![current], |row| row.get::<_, Option<i64>>(0))
                .optional()?
                .flatten();
        }
        Ok(())
    }

    /// Recompute every parent scope's sort sequence densely from creation
    /// (id) order. Vault-scale group counts make the quadratic shape fine.
    fn resequence_sorts(&self, tx: &rusqlite::Transaction<'_>) -> Result<(), VaultError> {
        let scopes_sql = format!("SELECT DISTINCT parent_id FROM {}", self.family.table);
        let mut stmt = tx.prepare(&scopes_sql)?;
        let scopes: Vec<Option<i64>> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;

        let ids_sql = format!(
            "SELECT id FROM {} WHERE parent_id IS ?1 ORDER BY id ASC",
            self.family.table
        );
        let update_sql = format!("UPDATE {} SET sort = ?1 WHERE id = ?2", self.family.table);

        for scope in scopes {
            let mut ids_stmt = tx.prepare(&ids_sql)?;
            let ids: Vec<i64> = ids_stmt
                .query_map(params![scope], |row| row.get(0))?
                .collect::<Result<_, _>>()?;
            for (position, group_id) in ids.iter().enumerate() {
                let sort = i64::try_from(position).unwrap_or(i64::MAX);
                tx.execute(&update_sql, params![sort, group_id])?;
            }
        }
        Ok(())
    }

    // -- Backup importer plumbing -------------------------------------------

    /// Insert a raw row preserving its timestamps and sort (import path).
    pub(crate) fn insert_row(&self, row: &GroupRow) -> Result<i64, VaultError> {
        validate_name(row.name.trim())?;
        GroupColor::from_db_str(&row.color)?;

        let sql = format!(
            "INSERT INTO {} (name, parent_id, color, sort, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            self.family.table
        );
        self.conn.execute(
            &sql,
            params![
                row.name.trim(),
                row.parent_id,
                row.color,
                row.sort,
                row.created_at,
                row.updated_at
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Overwrite an existing group from a raw row (import merge path).
    pub(crate) fn overwrite_row(&self, id: i64, row: &GroupRow) -> Result<(), VaultError> {
        validate_name(row.name.trim())?;
        GroupColor::from_db_str(&row.color)?;

        let sql = format!(
            "UPDATE {} SET name = ?1, parent_id = ?2, color = ?3, sort = ?4, updated_at = ?5 \
             WHERE id = ?6",
            self.family.table
        );
        let updated = self.conn.execute(
            &sql,
            params![
                row.name.trim(),
                row.parent_id,
                row.color,
                row.sort,
                row.updated_at,
                id
            ],
        )?;
        if updated == 0 {
            return Err(VaultError::NotFound {
                entity: self.family.entity,
                id,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row plumbing
// ---------------------------------------------------------------------------

type GroupParts = (i64, String, Option<i64>, String, i64, String, String);

fn row_to_group_parts(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupParts> {
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

fn parts_to_group(parts: GroupParts) -> Result<Group, VaultError> {
    let (id, name, parent_id, color, sort, created_at, updated_at) = parts;
    Ok(Group {
        id,
        name,
        parent_id,
        color: GroupColor::from_db_str(&color)?,
        sort,
        created_at,
        updated_at,
    })
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
