#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

//! Integration tests for `BackupEngine` — export/import round trips,
//! merge strategies, the group worklist, legacy plaintext upgrade, and
//! the password-protected archive format.

use coffre_crypto_core::{looks_encrypted, FieldCipher, VaultSecret};
use coffre_vault::backup::{
    BackupCredential, BackupDocument, BackupEngine, BackupGroup, BackupNote, ExportOptions,
    ImportOptions, MergeStrategy, BACKUP_APP_NAME, BACKUP_FORMAT_VERSION,
};
use coffre_vault::credentials::{CredentialStore, SaveCredential};
use coffre_vault::groups::{GroupStore, SaveGroup};
use coffre_vault::notes::{NoteStore, SaveNote};
use coffre_vault::settings::SettingsStore;
use coffre_vault::{VaultDb, VaultError};

fn test_cipher() -> FieldCipher {
    FieldCipher::new(&VaultSecret::new("integration-test-secret")).expect("cipher")
}

/// Build a vault with a bit of everything: nested groups, credentials
/// (one with history), a note group, a note, and seeded settings.
fn populated_vault(cipher: &FieldCipher) -> VaultDb {
    let db = VaultDb::open_in_memory().expect("open");

    let groups = GroupStore::credential_groups(&db);
    let work = groups
        .save(&SaveGroup {
            name: "Work".into(),
            ..SaveGroup::default()
        })
        .expect("group");
    groups
        .save(&SaveGroup {
            name: "Servers".into(),
            parent_id: Some(work.id),
            ..SaveGroup::default()
        })
        .expect("group");

    GroupStore::note_groups(&db)
        .save(&SaveGroup {
            name: "Journal".into(),
            ..SaveGroup::default()
        })
        .expect("note group");

    let credentials = CredentialStore::new(&db, cipher);
    let github = credentials
        .save(&SaveCredential {
            title: "GitHub".into(),
            username: "octocat".into(),
            password: Some("first-password".into()),
            url: Some("https://github.com".into()),
            group_id: Some(work.id),
            ..SaveCredential::default()
        })
        .expect("credential");
    // One password change → one history row.
    credentials
        .save(&SaveCredential {
            id: Some(github.id),
            title: "GitHub".into(),
            username: "octocat".into(),
            password: Some("second-password".into()),
            group_id: Some(work.id),
            ..SaveCredential::default()
        })
        .expect("update");
    credentials
        .save(&SaveCredential {
            title: "Router".into(),
            username: "admin".into(),
            multi_account_data: Some("admin:a\nguest:b".into()),
            ..SaveCredential::default()
        })
        .expect("credential");

    NoteStore::new(&db, cipher)
        .save(&SaveNote {
            title: "Wifi".into(),
            content: Some("ssid + password".into()),
            ..SaveNote::default()
        })
        .expect("note");

    SettingsStore::new(&db).seed_defaults().expect("seed");

    db
}

fn entity_count(document: &BackupDocument) -> usize {
    document.passwords.as_deref().map_or(0, <[_]>::len)
        + document.groups.as_deref().map_or(0, <[_]>::len)
        + document.note_groups.as_deref().map_or(0, <[_]>::len)
        + document.notes.as_deref().map_or(0, <[_]>::len)
        + document.user_settings.as_deref().map_or(0, <[_]>::len)
        + document.password_history.as_deref().map_or(0, <[_]>::len)
}

// -------------------------------------------------------------------------
// Export document shape
// -------------------------------------------------------------------------

#[test]
fn export_produces_versioned_document_with_tokens() {
    let cipher = test_cipher();
    let db = populated_vault(&cipher);
    let engine = BackupEngine::new(&db, &cipher);

    let blob = engine.export(&ExportOptions::default()).expect("export");
    let document: BackupDocument = serde_json::from_slice(&blob).expect("parse");

    assert_eq!(document.version, BACKUP_FORMAT_VERSION);
    assert_eq!(document.app_name, BACKUP_APP_NAME);
    assert_eq!(document.passwords.as_deref().map_or(0, <[_]>::len), 2);
    assert_eq!(document.groups.as_deref().map_or(0, <[_]>::len), 2);
    assert_eq!(document.note_groups.as_deref().map_or(0, <[_]>::len), 1);
    assert_eq!(document.notes.as_deref().map_or(0, <[_]>::len), 1);
    assert_eq!(
        document.password_history.as_deref().map_or(0, <[_]>::len),
        1
    );

    // Secrets leave the vault as tokens, never plaintext.
    let raw = String::from_utf8(blob).expect("utf8");
    assert!(!raw.contains("second-password"));
    assert!(!raw.contains("admin:a"));
    for credential in document.passwords.as_deref().unwrap_or_default() {
        if let Some(password) = credential.password.as_deref() {
            assert!(looks_encrypted(password));
        }
    }
}

#[test]
fn export_honors_include_flags() {
    let cipher = test_cipher();
    let db = populated_vault(&cipher);
    let engine = BackupEngine::new(&db, &cipher);

    let blob = engine
        .export(&ExportOptions {
            include_notes: false,
            include_note_groups: false,
            include_settings: false,
            include_history: false,
            ..ExportOptions::default()
        })
        .expect("export");
    let document: BackupDocument = serde_json::from_slice(&blob).expect("parse");

    assert!(document.passwords.is_some());
    assert!(document.groups.is_some());
    assert!(document.notes.is_none());
    assert!(document.note_groups.is_none());
    assert!(document.user_settings.is_none());
    assert!(document.password_history.is_none());

    // Omitted families are absent from the JSON, not empty arrays.
    let raw = String::from_utf8(blob).expect("utf8");
    assert!(!raw.contains("\"notes\""));
}

// -------------------------------------------------------------------------
// Round trip into an empty vault
// -------------------------------------------------------------------------

#[test]
fn merge_import_into_empty_vault_imports_everything() {
    let cipher = test_cipher();
    let source = populated_vault(&cipher);
    let blob = BackupEngine::new(&source, &cipher)
        .export(&ExportOptions::default())
        .expect("export");
    let document: BackupDocument = serde_json::from_slice(&blob).expect("parse");

    let target = VaultDb::open_in_memory().expect("open");
    let report = BackupEngine::new(&target, &cipher)
        .import(
            &blob,
            &ImportOptions {
                merge_strategy: MergeStrategy::Merge,
                ..ImportOptions::default()
            },
        )
        .expect("import");

    assert_eq!(report.imported, entity_count(&document));
    assert_eq!(report.skipped, 0);
    assert!(report.errors.is_empty(), "errors: {:?}", report.errors);

    // Data survives the trip: hierarchy remapped, secrets decrypt.
    let groups = GroupStore::credential_groups(&target);
    let work = groups
        .get_by_name_and_parent("Work", None)
        .expect("lookup")
        .expect("present");
    let servers = groups
        .get_by_name_and_parent("Servers", Some(work.id))
        .expect("lookup");
    assert!(servers.is_some(), "child group reparented onto new Work id");

    let credentials = CredentialStore::new(&target, &cipher);
    let hits = credentials.search("github").expect("search");
    assert_eq!(hits.len(), 1);
    let github = credentials.get(hits[0].id).expect("get");
    assert_eq!(github.password.as_deref(), Some("second-password"));
    assert_eq!(github.group_id, Some(work.id));

    let history = credentials.history(hits[0].id).expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].old_password, "first-password");
    assert_eq!(history[0].new_password, "second-password");
}

#[test]
fn skip_strategy_leaves_existing_rows_untouched() {
    let cipher = test_cipher();
    let source = populated_vault(&cipher);
    let blob = BackupEngine::new(&source, &cipher)
        .export(&ExportOptions::default())
        .expect("export");
    let document: BackupDocument = serde_json::from_slice(&blob).expect("parse");

    let target = VaultDb::open_in_memory().expect("open");
    let engine = BackupEngine::new(&target, &cipher);
    engine
        .import(&blob, &ImportOptions::default())
        .expect("first import");

    let report = engine
        .import(
            &blob,
            &ImportOptions {
                merge_strategy: MergeStrategy::Skip,
                ..ImportOptions::default()
            },
        )
        .expect("second import");

    assert_eq!(report.imported, 0);
    assert_eq!(report.skipped, entity_count(&document));
    assert!(report.errors.is_empty());

    // No duplicates were created.
    let credentials = CredentialStore::new(&target, &cipher);
    assert_eq!(credentials.list(None).expect("list").len(), 2);
}

#[test]
fn merge_reimport_creates_no_duplicates() {
    let cipher = test_cipher();
    let source = populated_vault(&cipher);
    let blob = BackupEngine::new(&source, &cipher)
        .export(&ExportOptions::default())
        .expect("export");

    let target = VaultDb::open_in_memory().expect("open");
    let engine = BackupEngine::new(&target, &cipher);
    engine.import(&blob, &ImportOptions::default()).expect("first");
    let report = engine
        .import(&blob, &ImportOptions::default())
        .expect("second");
    assert!(report.errors.is_empty());

    let credentials = CredentialStore::new(&target, &cipher);
    assert_eq!(credentials.list(None).expect("list").len(), 2);
    assert_eq!(
        GroupStore::credential_groups(&target).list().expect("list").len(),
        2
    );
    // Append-only history was deduplicated, not duplicated.
    let hits = credentials.search("github").expect("search");
    assert_eq!(credentials.history(hits[0].id).expect("history").len(), 1);
}

#[test]
fn replace_strategy_clears_existing_data_first() {
    let cipher = test_cipher();
    let source = populated_vault(&cipher);
    let blob = BackupEngine::new(&source, &cipher)
        .export(&ExportOptions::default())
        .expect("export");

    let target = VaultDb::open_in_memory().expect("open");
    CredentialStore::new(&target, &cipher)
        .save(&SaveCredential {
            title: "Pre-existing".into(),
            username: "u".into(),
            password: Some("pw".into()),
            ..SaveCredential::default()
        })
        .expect("save");

    let report = BackupEngine::new(&target, &cipher)
        .import(
            &blob,
            &ImportOptions {
                merge_strategy: MergeStrategy::Replace,
                ..ImportOptions::default()
            },
        )
        .expect("import");
    assert!(report.errors.is_empty());

    let credentials = CredentialStore::new(&target, &cipher);
    let titles: Vec<String> = credentials
        .list(None)
        .expect("list")
        .into_iter()
        .map(|c| c.title)
        .collect();
    assert!(!titles.contains(&"Pre-existing".to_string()));
    assert_eq!(titles.len(), 2);
    // The search index was rebuilt along with the data.
    assert!(credentials.search("pre-existing").expect("search").is_empty());
}

// -------------------------------------------------------------------------
// Group worklist
// -------------------------------------------------------------------------

fn empty_document() -> BackupDocument {
    BackupDocument {
        version: BACKUP_FORMAT_VERSION,
        exported_at: "2026-01-01T00:00:00Z".into(),
        app_name: BACKUP_APP_NAME.into(),
        passwords: None,
        groups: None,
        note_groups: None,
        notes: None,
        user_settings: None,
        password_history: None,
    }
}

fn group(id: i64, name: &str, parent_id: Option<i64>) -> BackupGroup {
    BackupGroup {
        id,
        name: name.into(),
        parent_id,
        color: "slate".into(),
        sort: 0,
        created_at: "2026-01-01T00:00:00Z".into(),
        updated_at: "2026-01-01T00:00:00Z".into(),
    }
}

#[test]
fn out_of_order_parents_resolve_across_passes() {
    let cipher = test_cipher();
    let target = VaultDb::open_in_memory().expect("open");

    // Child listed before its parent: the worklist needs a second pass.
    let mut document = empty_document();
    document.groups = Some(vec![
        group(2, "Child", Some(1)),
        group(3, "Grandchild", Some(2)),
        group(1, "Root", None),
    ]);

    let report = BackupEngine::new(&target, &cipher)
        .import(
            &serde_json::to_vec(&document).expect("serialize"),
            &ImportOptions::default(),
        )
        .expect("import");

    assert_eq!(report.imported, 3);
    assert!(report.errors.is_empty());

    let groups = GroupStore::credential_groups(&target);
    let root = groups
        .get_by_name_and_parent("Root", None)
        .expect("lookup")
        .expect("root");
    let child = groups
        .get_by_name_and_parent("Child", Some(root.id))
        .expect("lookup")
        .expect("child");
    assert!(groups
        .get_by_name_and_parent("Grandchild", Some(child.id))
        .expect("lookup")
        .is_some());
}

#[test]
fn unresolvable_parent_errors_its_whole_branch_but_not_independents() {
    let cipher = test_cipher();
    let target = VaultDb::open_in_memory().expect("open");

    // Parent 99 exists nowhere in the snapshot; "Dependent" hangs off the
    // broken group, "Independent" is unaffected.
    let mut document = empty_document();
    document.note_groups = Some(vec![
        group(1, "Broken", Some(99)),
        group(2, "Dependent", Some(1)),
        group(3, "Independent", None),
    ]);

    let report = BackupEngine::new(&target, &cipher)
        .import(
            &serde_json::to_vec(&document).expect("serialize"),
            &ImportOptions::default(),
        )
        .expect("import");

    assert_eq!(report.imported, 1);
    assert_eq!(report.errors.len(), 2, "errors: {:?}", report.errors);

    let note_groups = GroupStore::note_groups(&target);
    let names: Vec<String> = note_groups
        .list()
        .expect("list")
        .into_iter()
        .map(|g| g.name)
        .collect();
    assert_eq!(names, vec!["Independent".to_string()]);
}

#[test]
fn cyclic_snapshot_parents_are_reported_not_imported() {
    let cipher = test_cipher();
    let target = VaultDb::open_in_memory().expect("open");

    let mut document = empty_document();
    document.groups = Some(vec![group(1, "A", Some(2)), group(2, "B", Some(1))]);

    let report = BackupEngine::new(&target, &cipher)
        .import(
            &serde_json::to_vec(&document).expect("serialize"),
            &ImportOptions::default(),
        )
        .expect("import");

    assert_eq!(report.imported, 0);
    assert_eq!(report.errors.len(), 2);
    assert!(GroupStore::credential_groups(&target)
        .list()
        .expect("list")
        .is_empty());
}

// -------------------------------------------------------------------------
// Just-in-time plaintext upgrade
// -------------------------------------------------------------------------

#[test]
fn legacy_plaintext_secrets_are_encrypted_on_import() {
    let cipher = test_cipher();
    let target = VaultDb::open_in_memory().expect("open");

    let mut document = empty_document();
    document.passwords = Some(vec![BackupCredential {
        id: 1,
        title: "Legacy".into(),
        username: "old-user".into(),
        password: Some("plain-secret".into()),
        multi_account_data: None,
        url: None,
        notes: None,
        group_id: None,
        created_at: "2020-01-01T00:00:00Z".into(),
        updated_at: "2020-01-01T00:00:00Z".into(),
    }]);
    document.notes = Some(vec![BackupNote {
        id: 1,
        title: "Legacy note".into(),
        content: "plain body".into(),
        group_id: None,
        pinned: false,
        archived: false,
        created_at: "2020-01-01T00:00:00Z".into(),
        updated_at: "2020-01-01T00:00:00Z".into(),
    }]);

    let report = BackupEngine::new(&target, &cipher)
        .import(
            &serde_json::to_vec(&document).expect("serialize"),
            &ImportOptions::default(),
        )
        .expect("import");
    assert!(report.errors.is_empty());

    // At rest: tokens. Through the store: original plaintext.
    let raw: String = target
        .connection()
        .query_row("SELECT password FROM credentials", [], |row| row.get(0))
        .expect("raw read");
    assert!(looks_encrypted(&raw));

    let credentials = CredentialStore::new(&target, &cipher);
    let hits = credentials.list(None).expect("list");
    let fetched = credentials.get(hits[0].id).expect("get");
    assert_eq!(fetched.password.as_deref(), Some("plain-secret"));
    assert_eq!(fetched.created_at, "2020-01-01T00:00:00Z");

    let notes = NoteStore::new(&target, &cipher);
    let note_hits = notes.list(None, true).expect("list");
    assert_eq!(
        notes.get(note_hits[0].id).expect("get").content,
        "plain body"
    );
}

#[test]
fn already_encrypted_tokens_are_not_double_encrypted() {
    let cipher = test_cipher();
    let token = cipher.encrypt("original").expect("encrypt");

    let target = VaultDb::open_in_memory().expect("open");
    let mut document = empty_document();
    document.passwords = Some(vec![BackupCredential {
        id: 1,
        title: "Tokenized".into(),
        username: "u".into(),
        password: Some(token.clone()),
        multi_account_data: None,
        url: None,
        notes: None,
        group_id: None,
        created_at: "2026-01-01T00:00:00Z".into(),
        updated_at: "2026-01-01T00:00:00Z".into(),
    }]);

    BackupEngine::new(&target, &cipher)
        .import(
            &serde_json::to_vec(&document).expect("serialize"),
            &ImportOptions::default(),
        )
        .expect("import");

    let raw: String = target
        .connection()
        .query_row("SELECT password FROM credentials", [], |row| row.get(0))
        .expect("raw read");
    assert_eq!(raw, token, "the token is stored verbatim");
}

// -------------------------------------------------------------------------
// Validation phase + dry run
// -------------------------------------------------------------------------

#[test]
fn invalid_document_aborts_before_any_mutation() {
    let cipher = test_cipher();
    let target = VaultDb::open_in_memory().expect("open");

    let mut document = empty_document();
    document.groups = Some(vec![group(1, "Fine", None)]);
    document.passwords = Some(vec![BackupCredential {
        id: 1,
        title: "   ".into(), // blank title → validation error
        username: "u".into(),
        password: Some("pw".into()),
        multi_account_data: None,
        url: None,
        notes: None,
        group_id: None,
        created_at: String::new(),
        updated_at: String::new(),
    }]);

    let report = BackupEngine::new(&target, &cipher)
        .import(
            &serde_json::to_vec(&document).expect("serialize"),
            &ImportOptions::default(),
        )
        .expect("import");

    assert_eq!(report.imported, 0);
    assert!(!report.errors.is_empty());
    // Even the valid group was not written — validation aborts everything.
    assert!(GroupStore::credential_groups(&target)
        .list()
        .expect("list")
        .is_empty());
}

#[test]
fn newer_version_is_rejected_by_validation() {
    let cipher = test_cipher();
    let target = VaultDb::open_in_memory().expect("open");

    let mut document = empty_document();
    document.version = BACKUP_FORMAT_VERSION + 1;

    let report = BackupEngine::new(&target, &cipher)
        .import(
            &serde_json::to_vec(&document).expect("serialize"),
            &ImportOptions::default(),
        )
        .expect("import");
    assert!(!report.errors.is_empty());
}

#[test]
fn dry_run_validates_without_mutating() {
    let cipher = test_cipher();
    let source = populated_vault(&cipher);
    let blob = BackupEngine::new(&source, &cipher)
        .export(&ExportOptions::default())
        .expect("export");

    let target = VaultDb::open_in_memory().expect("open");
    let report = BackupEngine::new(&target, &cipher)
        .import(
            &blob,
            &ImportOptions {
                dry_run: true,
                ..ImportOptions::default()
            },
        )
        .expect("dry run");

    assert_eq!(report.imported, 0);
    assert!(report.errors.is_empty());
    assert!(CredentialStore::new(&target, &cipher)
        .list(None)
        .expect("list")
        .is_empty());
}

#[test]
fn garbage_blob_is_an_import_error() {
    let cipher = test_cipher();
    let target = VaultDb::open_in_memory().expect("open");
    let result = BackupEngine::new(&target, &cipher).import(b"not json", &ImportOptions::default());
    assert!(matches!(result, Err(VaultError::Import(_))));
}

#[test]
fn per_item_failures_do_not_abort_the_batch() {
    let cipher = test_cipher();
    let target = VaultDb::open_in_memory().expect("open");

    // Validation off: the bad group surfaces as a per-item error instead.
    let mut document = empty_document();
    document.groups = Some(vec![group(1, "Bad/Name", None), group(2, "Good", None)]);

    let report = BackupEngine::new(&target, &cipher)
        .import(
            &serde_json::to_vec(&document).expect("serialize"),
            &ImportOptions {
                validate_integrity: false,
                ..ImportOptions::default()
            },
        )
        .expect("import");

    assert_eq!(report.imported, 1);
    assert_eq!(report.errors.len(), 1);
    let names: Vec<String> = GroupStore::credential_groups(&target)
        .list()
        .expect("list")
        .into_iter()
        .map(|g| g.name)
        .collect();
    assert_eq!(names, vec!["Good".to_string()]);
}

// -------------------------------------------------------------------------
// Archive format
// -------------------------------------------------------------------------

#[test]
fn archive_roundtrip_restores_the_vault() {
    let cipher = test_cipher();
    let source = populated_vault(&cipher);
    let archive = BackupEngine::new(&source, &cipher)
        .export_archive(&ExportOptions::default(), "archive-pass")
        .expect("export archive");

    // The sealed archive exposes neither structure nor tokens.
    assert!(!String::from_utf8_lossy(&archive).contains("passwords"));

    let target = VaultDb::open_in_memory().expect("open");
    let report = BackupEngine::new(&target, &cipher)
        .import_archive(&archive, "archive-pass", &ImportOptions::default())
        .expect("import archive");
    assert!(report.errors.is_empty());
    assert!(report.imported > 0);

    let credentials = CredentialStore::new(&target, &cipher);
    assert_eq!(credentials.list(None).expect("list").len(), 2);
}

#[test]
fn short_archive_password_is_rejected() {
    let cipher = test_cipher();
    let db = populated_vault(&cipher);
    let result = BackupEngine::new(&db, &cipher).export_archive(&ExportOptions::default(), "abc");
    assert!(matches!(result, Err(VaultError::Export(_))));
}

#[test]
fn wrong_archive_password_fails_import() {
    let cipher = test_cipher();
    let source = populated_vault(&cipher);
    let archive = BackupEngine::new(&source, &cipher)
        .export_archive(&ExportOptions::default(), "correct-pass")
        .expect("export archive");

    let target = VaultDb::open_in_memory().expect("open");
    let result = BackupEngine::new(&target, &cipher).import_archive(
        &archive,
        "wrong-pass",
        &ImportOptions::default(),
    );
    assert!(matches!(result, Err(VaultError::Import(_))));
}
