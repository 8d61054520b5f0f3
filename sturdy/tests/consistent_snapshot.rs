//! Consistent-snapshot layout: version-prefixed metadata filenames and
//! hash-prefixed target filenames.

mod test_utils;

use std::fs;
use tempfile::TempDir;
use test_utils::{dir_url, editor_with_keys, version, RepoKeys};
use sturdy::editor::signed::PathExists;
use sturdy::{ExpirationEnforcement, Limits, Settings, Updater};

#[test]
fn consistent_snapshot_round_trip() {
    let keys = RepoKeys::generate();
    let staging = TempDir::new().unwrap();
    fs::create_dir_all(staging.path().join("bin")).unwrap();
    fs::write(staging.path().join("bin/app"), b"consistent bytes").unwrap();

    let mut editor = editor_with_keys(&keys, true);
    editor
        .snapshot_version(version(7))
        .targets_version(version(3))
        .add_target_path(staging.path().join("bin/app"), "bin/app")
        .unwrap();
    let repo = editor.sign().unwrap();

    let out = TempDir::new().unwrap();
    let metadata_dir = out.path().join("metadata");
    let targets_dir = out.path().join("targets");
    repo.write(&metadata_dir).unwrap();
    repo.copy_targets(staging.path(), &targets_dir, PathExists::Fail)
        .unwrap();

    // metadata filenames carry their version; timestamp.json never does
    assert!(metadata_dir.join("7.snapshot.json").exists());
    assert!(metadata_dir.join("3.targets.json").exists());
    assert!(metadata_dir.join("timestamp.json").exists());
    assert!(metadata_dir.join("root.1.json").exists());

    // the target is stored with its hash prefixed to the basename, under its
    // original directory
    let sha256 = {
        let target = &repo.targets().signed().signed.targets["bin/app"];
        target.hashes.primary().unwrap().to_string()
    };
    let prefixed = targets_dir.join("bin").join(format!("{}.app", sha256));
    assert!(prefixed.exists());

    // and the client resolves exactly that filename when downloading
    let mut updater = Updater::load(
        Box::new(sturdy::FilesystemTransport),
        Settings {
            root: fs::File::open(metadata_dir.join("root.json")).unwrap(),
            local_metadata_dir: None,
            local_targets_dir: None,
            remote_metadata_url: dir_url(&metadata_dir),
            remote_targets_url: dir_url(&targets_dir),
            limits: Limits::default(),
            prefix_targets_with_hash: true,
            disable_local_cache: false,
            expiration_enforcement: ExpirationEnforcement::Safe,
        },
    )
    .unwrap();

    let info = updater.get_target_info("bin/app").unwrap().unwrap();
    let bytes = updater.download_target(&info, None, None).unwrap();
    assert_eq!(bytes, b"consistent bytes");
}

/// With `prefix_targets_with_hash` disabled the client requests the bare
/// path, which a hash-prefixed repository does not serve.
#[test]
fn prefix_flag_controls_download_urls() {
    let keys = RepoKeys::generate();
    let staging = TempDir::new().unwrap();
    fs::write(staging.path().join("app"), b"payload").unwrap();

    let mut editor = editor_with_keys(&keys, true);
    editor.add_target_path(staging.path().join("app"), "app").unwrap();
    let repo = editor.sign().unwrap();

    let out = TempDir::new().unwrap();
    let metadata_dir = out.path().join("metadata");
    let targets_dir = out.path().join("targets");
    repo.write(&metadata_dir).unwrap();
    repo.copy_targets(staging.path(), &targets_dir, PathExists::Fail)
        .unwrap();

    let mut updater = Updater::load(
        Box::new(sturdy::FilesystemTransport),
        Settings {
            root: fs::File::open(metadata_dir.join("root.json")).unwrap(),
            local_metadata_dir: None,
            local_targets_dir: None,
            remote_metadata_url: dir_url(&metadata_dir),
            remote_targets_url: dir_url(&targets_dir),
            limits: Limits::default(),
            prefix_targets_with_hash: false,
            disable_local_cache: false,
            expiration_enforcement: ExpirationEnforcement::Safe,
        },
    )
    .unwrap();

    let info = updater.get_target_info("app").unwrap().unwrap();
    updater.download_target(&info, None, None).unwrap_err();
}
