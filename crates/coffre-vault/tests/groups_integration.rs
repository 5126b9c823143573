#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

//! Integration tests for `GroupStore` — sibling uniqueness, cycle
//! prevention, sort maintenance, tree building, and cascade-null delete.

use coffre_crypto_core::{FieldCipher, VaultSecret};
use coffre_vault::credentials::{CredentialStore, SaveCredential};
use coffre_vault::groups::{GroupColor, GroupStore, SaveGroup};
use coffre_vault::{VaultDb, VaultError};

fn make_group(store: &GroupStore<'_>, name: &str, parent: Option<i64>) -> i64 {
    store
        .save(&SaveGroup {
            name: name.into(),
            parent_id: parent,
            ..SaveGroup::default()
        })
        .expect("save group")
        .id
}

// -------------------------------------------------------------------------
// Validation + sibling uniqueness
// -------------------------------------------------------------------------

#[test]
fn duplicate_name_under_same_parent_fails() {
    let db = VaultDb::open_in_memory().expect("open");
    let store = GroupStore::credential_groups(&db);

    make_group(&store, "Work", None);
    let duplicate = store.save(&SaveGroup {
        name: "Work".into(),
        ..SaveGroup::default()
    });
    assert!(matches!(duplicate, Err(VaultError::Validation(_))));
}

#[test]
fn same_name_under_different_parent_succeeds() {
    let db = VaultDb::open_in_memory().expect("open");
    let store = GroupStore::credential_groups(&db);

    let parent_a = make_group(&store, "A", None);
    let parent_b = make_group(&store, "B", None);
    make_group(&store, "Shared", Some(parent_a));
    make_group(&store, "Shared", Some(parent_b));

    assert_eq!(store.list().expect("list").len(), 4);
}

#[test]
fn renaming_a_group_onto_itself_is_allowed() {
    let db = VaultDb::open_in_memory().expect("open");
    let store = GroupStore::credential_groups(&db);
    let id = make_group(&store, "Work", None);

    // Saving the same name for the same id is not a sibling collision.
    let resaved = store.save(&SaveGroup {
        id: Some(id),
        name: "Work".into(),
        color: GroupColor::Blue,
        ..SaveGroup::default()
    });
    assert!(resaved.is_ok());
    assert_eq!(resaved.expect("group").color, GroupColor::Blue);
}

#[test]
fn forbidden_characters_are_rejected() {
    let db = VaultDb::open_in_memory().expect("open");
    let store = GroupStore::credential_groups(&db);

    let result = store.save(&SaveGroup {
        name: "Work/Personal".into(),
        ..SaveGroup::default()
    });
    assert!(matches!(result, Err(VaultError::Validation(_))));
}

#[test]
fn missing_parent_is_a_foreign_key_violation() {
    let db = VaultDb::open_in_memory().expect("open");
    let store = GroupStore::credential_groups(&db);

    let result = store.save(&SaveGroup {
        name: "Orphan".into(),
        parent_id: Some(404),
        ..SaveGroup::default()
    });
    assert!(matches!(result, Err(VaultError::ForeignKeyViolation(_))));
}

// -------------------------------------------------------------------------
// Cycle prevention
// -------------------------------------------------------------------------

#[test]
fn reparenting_onto_a_descendant_fails() {
    let db = VaultDb::open_in_memory().expect("open");
    let store = GroupStore::credential_groups(&db);

    // A → B → C (C's parent is B, B's parent is A).
    let a = make_group(&store, "A", None);
    let b = make_group(&store, "B", Some(a));
    let c = make_group(&store, "C", Some(b));

    // Setting A's parent to C would close the loop.
    let result = store.save(&SaveGroup {
        id: Some(a),
        name: "A".into(),
        parent_id: Some(c),
        ..SaveGroup::default()
    });
    assert!(matches!(result, Err(VaultError::Validation(_))));

    // The hierarchy is untouched.
    assert_eq!(store.get(a).expect("get").parent_id, None);
}

#[test]
fn reparenting_onto_itself_fails() {
    let db = VaultDb::open_in_memory().expect("open");
    let store = GroupStore::credential_groups(&db);
    let a = make_group(&store, "A", None);

    let result = store.save(&SaveGroup {
        id: Some(a),
        name: "A".into(),
        parent_id: Some(a),
        ..SaveGroup::default()
    });
    assert!(matches!(result, Err(VaultError::Validation(_))));
}

#[test]
fn reparenting_to_a_sibling_branch_is_fine() {
    let db = VaultDb::open_in_memory().expect("open");
    let store = GroupStore::credential_groups(&db);

    let a = make_group(&store, "A", None);
    let b = make_group(&store, "B", Some(a));
    let c = make_group(&store, "C", Some(a));

    let moved = store
        .save(&SaveGroup {
            id: Some(c),
            name: "C".into(),
            parent_id: Some(b),
            ..SaveGroup::default()
        })
        .expect("reparent");
    assert_eq!(moved.parent_id, Some(b));
}

// -------------------------------------------------------------------------
// Sort maintenance
// -------------------------------------------------------------------------

#[test]
fn inserts_take_the_next_sort_position() {
    let db = VaultDb::open_in_memory().expect("open");
    let store = GroupStore::credential_groups(&db);

    let first = store
        .save(&SaveGroup {
            name: "First".into(),
            ..SaveGroup::default()
        })
        .expect("save");
    let second = store
        .save(&SaveGroup {
            name: "Second".into(),
            ..SaveGroup::default()
        })
        .expect("save");

    assert_eq!(first.sort, 0);
    assert_eq!(second.sort, 1);
}

#[test]
fn each_parent_scope_has_its_own_sort_sequence() {
    let db = VaultDb::open_in_memory().expect("open");
    let store = GroupStore::credential_groups(&db);

    let root = make_group(&store, "Root", None);
    let child = store
        .save(&SaveGroup {
            name: "Child".into(),
            parent_id: Some(root),
            ..SaveGroup::default()
        })
        .expect("save");

    // The child starts its parent's sequence at 0 regardless of root-level
    // positions.
    assert_eq!(child.sort, 0);
}

#[test]
fn reparenting_appends_to_the_new_scope() {
    let db = VaultDb::open_in_memory().expect("open");
    let store = GroupStore::credential_groups(&db);

    let target = make_group(&store, "Target", None);
    make_group(&store, "Existing child", Some(target));
    let wanderer = make_group(&store, "Wanderer", None);

    let moved = store
        .save(&SaveGroup {
            id: Some(wanderer),
            name: "Wanderer".into(),
            parent_id: Some(target),
            ..SaveGroup::default()
        })
        .expect("reparent");
    assert_eq!(moved.sort, 1, "appended after the existing child");
}

#[test]
fn delete_recomputes_sort_densely() {
    let db = VaultDb::open_in_memory().expect("open");
    let store = GroupStore::credential_groups(&db);

    let first = make_group(&store, "First", None);
    let second = make_group(&store, "Second", None);
    let third = make_group(&store, "Third", None);

    store.delete(second).expect("delete");

    assert_eq!(store.get(first).expect("get").sort, 0);
    assert_eq!(store.get(third).expect("get").sort, 1, "gap closed");
}

// -------------------------------------------------------------------------
// Tree building
// -------------------------------------------------------------------------

#[test]
fn tree_nests_children_under_parents_in_sort_order() {
    let db = VaultDb::open_in_memory().expect("open");
    let store = GroupStore::credential_groups(&db);

    let root = make_group(&store, "Root", None);
    make_group(&store, "Child one", Some(root));
    make_group(&store, "Child two", Some(root));
    let other_root = make_group(&store, "Other root", None);

    let tree = store.tree().expect("tree");
    assert_eq!(tree.len(), 2);
    assert_eq!(tree[0].group.id, root);
    assert_eq!(tree[0].children.len(), 2);
    assert_eq!(tree[0].children[0].group.name, "Child one");
    assert_eq!(tree[0].children[1].group.name, "Child two");
    assert_eq!(tree[1].group.id, other_root);
    assert!(tree[1].children.is_empty());
}

#[test]
fn get_by_name_and_parent_scopes_the_lookup() {
    let db = VaultDb::open_in_memory().expect("open");
    let store = GroupStore::credential_groups(&db);

    let parent = make_group(&store, "Parent", None);
    let child = make_group(&store, "Shared", Some(parent));
    make_group(&store, "Shared", None);

    let found = store
        .get_by_name_and_parent("Shared", Some(parent))
        .expect("lookup")
        .expect("present");
    assert_eq!(found.id, child);

    assert!(store
        .get_by_name_and_parent("Shared", Some(child))
        .expect("lookup")
        .is_none());
}

// -------------------------------------------------------------------------
// Delete semantics + counts
// -------------------------------------------------------------------------

#[test]
fn delete_nulls_member_and_child_references() {
    let db = VaultDb::open_in_memory().expect("open");
    let cipher = FieldCipher::new(&VaultSecret::new("test-secret")).expect("cipher");

    let groups = GroupStore::credential_groups(&db);
    let doomed = make_group(&groups, "Doomed", None);
    let child = make_group(&groups, "Child", Some(doomed));

    let credentials = CredentialStore::new(&db, &cipher);
    let credential = credentials
        .save(&SaveCredential {
            title: "Member".into(),
            username: "u".into(),
            password: Some("pw".into()),
            group_id: Some(doomed),
            ..SaveCredential::default()
        })
        .expect("save");

    groups.delete(doomed).expect("delete");

    assert!(groups.get(doomed).is_err());
    assert_eq!(groups.get(child).expect("child survives").parent_id, None);
    assert_eq!(
        credentials.get(credential.id).expect("member survives").group_id,
        None
    );
}

#[test]
fn note_groups_are_an_independent_hierarchy() {
    let db = VaultDb::open_in_memory().expect("open");
    let credential_groups = GroupStore::credential_groups(&db);
    let note_groups = GroupStore::note_groups(&db);

    make_group(&credential_groups, "Work", None);
    // The same root-level name in the other family is not a collision.
    make_group(&note_groups, "Work", None);

    assert_eq!(credential_groups.list().expect("list").len(), 1);
    assert_eq!(note_groups.list().expect("list").len(), 1);
}

#[test]
fn list_with_counts_reports_membership() {
    let db = VaultDb::open_in_memory().expect("open");
    let cipher = FieldCipher::new(&VaultSecret::new("test-secret")).expect("cipher");
    let groups = GroupStore::credential_groups(&db);
    let busy = make_group(&groups, "Busy", None);
    make_group(&groups, "Idle", None);

    let store = CredentialStore::new(&db, &cipher);
    for title in ["One", "Two"] {
        store
            .save(&SaveCredential {
                title: title.into(),
                username: "u".into(),
                password: Some("pw".into()),
                group_id: Some(busy),
                ..SaveCredential::default()
            })
            .expect("save");
    }

    let items = groups.list_with_counts().expect("counts");
    let busy_item = items.iter().find(|i| i.group.id == busy).expect("busy");
    assert_eq!(busy_item.member_count, 2);
    let idle_item = items.iter().find(|i| i.group.name == "Idle").expect("idle");
    assert_eq!(idle_item.member_count, 0);
}
