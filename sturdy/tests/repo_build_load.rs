mod test_utils;

use std::fs;
use tempfile::TempDir;
use test_utils::{dir_url, editor_with_keys, RepoKeys};
use sturdy::{ExpirationEnforcement, Limits, Settings, Updater};

/// Builds a repository with the editor, serves it over `file://` URLs, and
/// walks the whole client refresh and download path.
#[test]
fn build_sign_load_download() {
    let keys = RepoKeys::generate();
    let staging = TempDir::new().unwrap();
    fs::create_dir_all(staging.path().join("bin")).unwrap();
    fs::write(staging.path().join("bin/app"), b"application bytes").unwrap();
    fs::write(staging.path().join("readme.txt"), b"hello").unwrap();

    let mut editor = editor_with_keys(&keys, false);
    editor
        .add_target_path(staging.path().join("bin/app"), "bin/app")
        .unwrap()
        .add_target_path(staging.path().join("readme.txt"), "readme.txt")
        .unwrap();
    let repo = editor.sign().unwrap();

    let out = TempDir::new().unwrap();
    let metadata_dir = out.path().join("metadata");
    let targets_dir = out.path().join("targets");
    repo.write(&metadata_dir).unwrap();
    repo.copy_targets(staging.path(), &targets_dir, sturdy::editor::signed::PathExists::Fail)
        .unwrap();

    // non-consistent repos store targets under their declared paths
    assert!(targets_dir.join("bin/app").exists());

    let datastore = TempDir::new().unwrap();
    let mut updater = Updater::load(
        Box::new(sturdy::FilesystemTransport),
        Settings {
            root: fs::File::open(metadata_dir.join("root.json")).unwrap(),
            local_metadata_dir: Some(datastore.path().join("metadata")),
            local_targets_dir: Some(datastore.path().join("targets")),
            remote_metadata_url: dir_url(&metadata_dir),
            remote_targets_url: dir_url(&targets_dir),
            limits: Limits::default(),
            prefix_targets_with_hash: true,
            disable_local_cache: false,
            expiration_enforcement: ExpirationEnforcement::Safe,
        },
    )
    .unwrap();

    assert_eq!(u64::from(updater.root().signed.version), 1);
    assert_eq!(updater.targets().signed.targets.len(), 2);

    // resolve and download a target
    let info = updater.get_target_info("bin/app").unwrap().unwrap();
    assert_eq!(info.role, "targets");
    assert_eq!(info.target.length, 17);
    let bytes = updater.download_target(&info, None, None).unwrap();
    assert_eq!(bytes, b"application bytes");

    // the download populated the local cache
    let cached = updater.find_cached_target(&info, None).unwrap().unwrap();
    assert_eq!(cached, b"application bytes");

    // unknown targets resolve to None
    assert!(updater.get_target_info("no/such/file").unwrap().is_none());
}

/// A corrupted target body must be rejected no matter what the transport
/// serves.
#[test]
fn tampered_target_is_rejected() {
    let keys = RepoKeys::generate();
    let staging = TempDir::new().unwrap();
    fs::write(staging.path().join("app"), b"good bytes").unwrap();

    let mut editor = editor_with_keys(&keys, false);
    editor.add_target_path(staging.path().join("app"), "app").unwrap();
    let repo = editor.sign().unwrap();

    let out = TempDir::new().unwrap();
    let metadata_dir = out.path().join("metadata");
    let targets_dir = out.path().join("targets");
    repo.write(&metadata_dir).unwrap();
    repo.copy_targets(staging.path(), &targets_dir, sturdy::editor::signed::PathExists::Fail)
        .unwrap();

    // tamper with the served target after signing
    fs::write(targets_dir.join("app"), b"evil bytes").unwrap();

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

    let info = updater.get_target_info("app").unwrap().unwrap();
    updater.download_target(&info, None, None).unwrap_err();
}

/// Expired metadata fails the load in `Safe` mode and passes in `Unsafe`.
#[test]
fn expiration_enforcement() {
    let keys = RepoKeys::generate();
    let mut editor = editor_with_keys(&keys, false);
    // already expired
    editor.timestamp_expires(chrono::Utc::now() - chrono::Duration::days(1));
    let repo = editor.sign().unwrap();

    let out = TempDir::new().unwrap();
    let metadata_dir = out.path().join("metadata");
    repo.write(&metadata_dir).unwrap();

    let load = |enforcement| {
        Updater::load(
            Box::new(sturdy::FilesystemTransport),
            Settings {
                root: fs::File::open(metadata_dir.join("root.json")).unwrap(),
                local_metadata_dir: None,
                local_targets_dir: None,
                remote_metadata_url: dir_url(&metadata_dir),
                remote_targets_url: dir_url(out.path()),
                limits: Limits::default(),
                prefix_targets_with_hash: true,
                disable_local_cache: false,
                expiration_enforcement: enforcement,
            },
        )
    };

    let err = load(ExpirationEnforcement::Safe).unwrap_err();
    assert!(matches!(
        err,
        sturdy::error::Error::ExpiredMetadata { .. }
    ));
    load(ExpirationEnforcement::Unsafe).unwrap();
}
