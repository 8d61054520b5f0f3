//! State-machine tests for the rollback, freeze, and continuity defenses.

mod test_utils;

use sturdy::schema::PathSet;
use sturdy::trusted::RootOnly;
use sturdy::ExpirationEnforcement;
use test_utils::{editor_with_keys, far_future, version, RepoKeys, TestKey};

/// A validly-signed timestamp with a lower version than the trusted one is a
/// rollback attack.
#[test]
fn timestamp_rollback_is_rejected() {
    let keys = RepoKeys::generate();
    let mut editor = editor_with_keys(&keys, false);
    editor.timestamp_version(version(10));
    let current = editor.sign().unwrap();
    let mut editor = editor_with_keys(&keys, false);
    editor.timestamp_version(version(9));
    let older = editor.sign().unwrap();

    let state = RootOnly::load(
        current.root().buffer(),
        chrono::Utc::now(),
        ExpirationEnforcement::Safe,
    )
    .unwrap()
    .update_timestamp(current.timestamp().buffer())
    .unwrap();

    let err = state
        .update_timestamp(older.timestamp().buffer())
        .unwrap_err();
    assert!(matches!(
        err,
        sturdy::error::Error::OlderMetadata {
            current_version: 10,
            new_version: 9,
            ..
        }
    ));
}

/// Re-applying the same timestamp version is an idempotent no-op, not an
/// error.
#[test]
fn equal_timestamp_version_is_a_no_op() {
    let keys = RepoKeys::generate();
    let mut editor = editor_with_keys(&keys, false);
    editor.timestamp_version(version(10));
    let repo = editor.sign().unwrap();

    let state = RootOnly::load(
        repo.root().buffer(),
        chrono::Utc::now(),
        ExpirationEnforcement::Safe,
    )
    .unwrap()
    .update_timestamp(repo.timestamp().buffer())
    .unwrap();

    let state = state
        .update_timestamp(repo.timestamp().buffer())
        .unwrap();
    assert_eq!(u64::from(state.timestamp().signed.version), 10);
}

/// A new snapshot that drops a targets metadata file listed in the trusted
/// snapshot is rejected, even across a timestamp update.
#[test]
fn snapshot_filename_deletion_is_rejected() {
    let keys = RepoKeys::generate();
    let role_key = TestKey::generate();

    // the trusted snapshot lists targets.json and role1.json
    let mut editor = editor_with_keys(&keys, false);
    editor
        .timestamp_version(version(10))
        .snapshot_version(version(3))
        .delegate_role(
            "role1",
            "targets",
            vec![role_key.source()],
            PathSet::Paths(vec!["libs/*".to_string()]),
            false,
            version(2),
            far_future(),
        )
        .unwrap();
    let trusted_repo = editor.sign().unwrap();

    // the new snapshot lists only targets.json
    let mut editor = editor_with_keys(&keys, false);
    editor
        .timestamp_version(version(11))
        .snapshot_version(version(4));
    let new_repo = editor.sign().unwrap();

    // a fresh cycle: new timestamp, then the cached snapshot as the trusted
    // baseline, then the fetched snapshot
    let state = RootOnly::load(
        new_repo.root().buffer(),
        chrono::Utc::now(),
        ExpirationEnforcement::Safe,
    )
    .unwrap()
    .update_timestamp(new_repo.timestamp().buffer())
    .unwrap()
    .update_snapshot(trusted_repo.snapshot().buffer(), true)
    .unwrap();

    let err = state
        .update_snapshot(new_repo.snapshot().buffer(), false)
        .unwrap_err();
    assert!(matches!(
        err,
        sturdy::error::Error::SnapshotFileRemoved { .. }
    ));
}

/// A new snapshot that downgrades a targets metadata file's version is
/// rejected.
#[test]
fn snapshot_version_downgrade_is_rejected() {
    let keys = RepoKeys::generate();
    let role_key = TestKey::generate();

    let build = |snapshot_version: u64, timestamp_version: u64, role_version: u64| {
        let mut editor = editor_with_keys(&keys, false);
        editor
            .timestamp_version(version(timestamp_version))
            .snapshot_version(version(snapshot_version))
            .delegate_role(
                "role1",
                "targets",
                vec![role_key.source()],
                PathSet::Paths(vec!["libs/*".to_string()]),
                false,
                version(role_version),
                far_future(),
            )
            .unwrap();
        editor.sign().unwrap()
    };

    let trusted_repo = build(3, 10, 2);
    let new_repo = build(4, 11, 1); // role1 goes backwards

    let state = RootOnly::load(
        new_repo.root().buffer(),
        chrono::Utc::now(),
        ExpirationEnforcement::Safe,
    )
    .unwrap()
    .update_timestamp(new_repo.timestamp().buffer())
    .unwrap()
    .update_snapshot(trusted_repo.snapshot().buffer(), true)
    .unwrap();

    let err = state
        .update_snapshot(new_repo.snapshot().buffer(), false)
        .unwrap_err();
    assert!(matches!(
        err,
        sturdy::error::Error::OlderMetadata {
            current_version: 2,
            new_version: 1,
            ..
        }
    ));
}

/// The timestamp's announced snapshot version must never go backwards, even
/// before the snapshot itself is fetched.
#[test]
fn timestamp_snapshot_claim_rollback_is_rejected() {
    let keys = RepoKeys::generate();
    let mut editor = editor_with_keys(&keys, false);
    editor
        .timestamp_version(version(10))
        .snapshot_version(version(5));
    let current = editor.sign().unwrap();
    let mut editor = editor_with_keys(&keys, false);
    editor
        .timestamp_version(version(11))
        .snapshot_version(version(4)); // newer timestamp, older snapshot claim
    let newer = editor.sign().unwrap();

    let state = RootOnly::load(
        current.root().buffer(),
        chrono::Utc::now(),
        ExpirationEnforcement::Safe,
    )
    .unwrap()
    .update_timestamp(current.timestamp().buffer())
    .unwrap();

    let err = state
        .update_timestamp(newer.timestamp().buffer())
        .unwrap_err();
    assert!(matches!(
        err,
        sturdy::error::Error::OlderMetadata {
            current_version: 5,
            new_version: 4,
            ..
        }
    ));
}

/// A snapshot fetched from the network must match what the timestamp
/// announces for it; serving some other (even validly signed) snapshot fails
/// the body checks.
#[test]
fn snapshot_not_matching_timestamp_claim_is_rejected() {
    let keys = RepoKeys::generate();
    let mut editor = editor_with_keys(&keys, false);
    editor.snapshot_version(version(5));
    let claims_five = editor.sign().unwrap();
    let mut editor = editor_with_keys(&keys, false);
    editor.snapshot_version(version(4));
    let actually_four = editor.sign().unwrap();

    let state = RootOnly::load(
        claims_five.root().buffer(),
        chrono::Utc::now(),
        ExpirationEnforcement::Safe,
    )
    .unwrap()
    .update_timestamp(claims_five.timestamp().buffer())
    .unwrap();

    let err = state
        .update_snapshot(actually_four.snapshot().buffer(), false)
        .unwrap_err();
    assert!(matches!(
        err,
        sturdy::error::Error::HashMismatch { .. } | sturdy::error::Error::SizeMismatch { .. }
    ));
}
