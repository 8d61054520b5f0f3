mod test_utils;

use std::fs;
use tempfile::TempDir;
use test_utils::{dir_url, editor_with_keys, version, RepoKeys};
use sturdy::trusted::RootOnly;
use sturdy::{ExpirationEnforcement, Limits, Settings, Updater};

/// The refresh workflow walks `root.<N>.json` files one version at a time and
/// ends at the first missing version.
#[test]
fn rotated_root() {
    let keys = RepoKeys::generate();
    let out = TempDir::new().unwrap();
    let metadata_dir = out.path().join("metadata");

    // version 1, then version 2 signed by the same keys; root.json ends up
    // at version 2 and both root.1.json and root.2.json exist
    editor_with_keys(&keys, false)
        .sign()
        .unwrap()
        .write(&metadata_dir)
        .unwrap();
    let mut second = editor_with_keys(&keys, false);
    second.root_version(version(2));
    second.sign().unwrap().write(&metadata_dir).unwrap();

    let updater = Updater::load(
        Box::new(sturdy::FilesystemTransport),
        Settings {
            // the client ships with the version 1 root
            root: fs::File::open(metadata_dir.join("root.1.json")).unwrap(),
            local_metadata_dir: None,
            local_targets_dir: None,
            remote_metadata_url: dir_url(&metadata_dir),
            remote_targets_url: dir_url(out.path()),
            limits: Limits::default(),
            prefix_targets_with_hash: true,
            disable_local_cache: false,
            expiration_enforcement: ExpirationEnforcement::Safe,
        },
    )
    .unwrap();

    assert_eq!(u64::from(updater.root().signed.version), 2);
}

/// A root rotation must advance the version by exactly one; skipping a
/// version is an error.
#[test]
fn root_rotation_requires_increment_by_one() {
    let keys = RepoKeys::generate();
    let v1 = editor_with_keys(&keys, false).sign().unwrap();
    let mut editor = editor_with_keys(&keys, false);
    editor.root_version(version(2));
    let v2 = editor.sign().unwrap();
    let mut editor = editor_with_keys(&keys, false);
    editor.root_version(version(4));
    let v4 = editor.sign().unwrap();

    let ref_time = chrono::Utc::now();
    let mut state = RootOnly::load(
        v1.root().buffer(),
        ref_time,
        ExpirationEnforcement::Safe,
    )
    .unwrap();

    // +1 is accepted
    state.update_root(v2.root().buffer()).unwrap();
    assert_eq!(u64::from(state.root().signed.version), 2);

    // skipping from 2 to 4 is rejected
    let err = state.update_root(v4.root().buffer()).unwrap_err();
    assert!(matches!(
        err,
        sturdy::error::Error::BadRootVersion {
            expected: 3,
            fetched: 4
        }
    ));
    // the failed update left the trusted root untouched
    assert_eq!(u64::from(state.root().signed.version), 2);
}

/// A root not signed by the currently trusted root role is rejected even if
/// it is self-consistent.
#[test]
fn root_rotation_requires_current_keys() {
    let keys = RepoKeys::generate();
    let other_keys = RepoKeys::generate();
    let v1 = editor_with_keys(&keys, false).sign().unwrap();
    let mut editor = editor_with_keys(&other_keys, false);
    editor.root_version(version(2));
    let stranger_v2 = editor.sign().unwrap();

    let mut state = RootOnly::load(
        v1.root().buffer(),
        chrono::Utc::now(),
        ExpirationEnforcement::Safe,
    )
    .unwrap();
    state.update_root(stranger_v2.root().buffer()).unwrap_err();
}
