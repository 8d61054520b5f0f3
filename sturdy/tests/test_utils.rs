//! Helpers shared by the integration tests: ephemeral signing keys, a
//! standard four-role editor, and `file://` URL construction.

use aws_lc_rs::rand::SystemRandom;
use aws_lc_rs::signature::Ed25519KeyPair;
use chrono::{DateTime, TimeZone, Utc};
use std::num::NonZeroU64;
use std::path::Path;
use sturdy::editor::RepositoryEditor;
use sturdy::key_source::{InMemoryKeySource, KeySource};
use sturdy::schema::RoleType;
use url::Url;

/// An ephemeral Ed25519 signing key that can hand out any number of
/// `KeySource`s for itself.
pub struct TestKey {
    pkcs8: Vec<u8>,
}

impl TestKey {
    pub fn generate() -> Self {
        let document = Ed25519KeyPair::generate_pkcs8(&SystemRandom::new()).unwrap();
        Self {
            pkcs8: document.as_ref().to_vec(),
        }
    }

    pub fn source(&self) -> Box<dyn KeySource> {
        Box::new(InMemoryKeySource {
            pkcs8: self.pkcs8.clone(),
        })
    }
}

/// One key per top-level role.
pub struct RepoKeys {
    pub root: TestKey,
    pub timestamp: TestKey,
    pub snapshot: TestKey,
    pub targets: TestKey,
}

impl RepoKeys {
    pub fn generate() -> Self {
        Self {
            root: TestKey::generate(),
            timestamp: TestKey::generate(),
            snapshot: TestKey::generate(),
            targets: TestKey::generate(),
        }
    }
}

pub fn far_future() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2038, 1, 1, 0, 0, 0).unwrap()
}

/// An editor preloaded with the given keys, version 1 everywhere, and a
/// far-future expiry on every role.
pub fn editor_with_keys(keys: &RepoKeys, consistent_snapshot: bool) -> RepositoryEditor {
    let mut editor = RepositoryEditor::new(consistent_snapshot);
    editor
        .add_key(RoleType::Root, keys.root.source())
        .add_key(RoleType::Timestamp, keys.timestamp.source())
        .add_key(RoleType::Snapshot, keys.snapshot.source())
        .add_key(RoleType::Targets, keys.targets.source())
        .root_expires(far_future())
        .targets_expires(far_future())
        .snapshot_expires(far_future())
        .snapshot_version(NonZeroU64::new(1).unwrap())
        .timestamp_expires(far_future())
        .timestamp_version(NonZeroU64::new(1).unwrap());
    editor
}

pub fn dir_url<P: AsRef<Path>>(path: P) -> String {
    Url::from_directory_path(path).unwrap().to_string()
}

pub fn version(n: u64) -> NonZeroU64 {
    NonZeroU64::new(n).unwrap()
}
