//! Multi-repository consensus: agreement thresholds and terminating
//! mappings.

mod test_utils;

use std::collections::HashMap;
use std::fs;
use std::num::NonZeroU64;
use std::path::Path;
use tempfile::TempDir;
use test_utils::{dir_url, editor_with_keys, RepoKeys};
use sturdy::editor::signed::PathExists;
use sturdy::multi::{Mapping, MultiRepositoryClient, RepositoryEntry, RepositoryMap};
use sturdy::Limits;

/// Builds one repository under `dir` serving a target named `x` with the
/// given body, and returns its map entry.
fn build_repo(name: &str, dir: &Path, body: &[u8]) -> RepositoryEntry {
    let keys = RepoKeys::generate();
    let staging = TempDir::new().unwrap();
    fs::write(staging.path().join("x"), body).unwrap();

    let mut editor = editor_with_keys(&keys, false);
    editor.add_target_path(staging.path().join("x"), "x").unwrap();
    let repo = editor.sign().unwrap();

    let metadata_dir = dir.join(name).join("metadata");
    let targets_dir = dir.join(name).join("targets");
    repo.write(&metadata_dir).unwrap();
    repo.copy_targets(staging.path(), &targets_dir, PathExists::Fail)
        .unwrap();

    RepositoryEntry {
        name: name.to_string(),
        metadata_url: dir_url(&metadata_dir),
        targets_url: dir_url(&targets_dir),
        trusted_root_path: metadata_dir.join("root.json"),
    }
}

fn map_with(entries: Vec<RepositoryEntry>, mapping: Vec<Mapping>) -> RepositoryMap {
    let mut repositories = HashMap::new();
    for entry in entries {
        repositories.insert(entry.name.clone(), entry);
    }
    RepositoryMap {
        repositories,
        mapping,
    }
}

/// Two of three repositories agree on `x`; with a threshold of 2 the result
/// is valid and reports the agreement.
#[test]
fn two_of_three_consensus() {
    let remote = TempDir::new().unwrap();
    let r1 = build_repo("r1", remote.path(), b"shared payload");
    let r2 = build_repo("r2", remote.path(), b"shared payload");
    let r3 = build_repo("r3", remote.path(), b"different payload");

    let map = map_with(
        vec![r1, r2, r3],
        vec![Mapping {
            paths: vec!["x".to_string()],
            repositories: vec!["r1".to_string(), "r2".to_string(), "r3".to_string()],
            threshold: NonZeroU64::new(2).unwrap(),
            terminating: false,
        }],
    );

    let cache = TempDir::new().unwrap();
    let mut client = MultiRepositoryClient::load(map, cache.path(), Limits::default()).unwrap();

    let consensus = client.get_target_info("x").unwrap().unwrap();
    assert_eq!(consensus.agreement_count, 2);
    assert_eq!(u64::from(consensus.required_threshold), 2);
    assert_eq!(consensus.repositories, vec!["r1", "r2"]);

    let bytes = client.download_target("x").unwrap();
    assert_eq!(bytes, b"shared payload");
}

/// A threshold no repository pair can reach yields no result.
#[test]
fn unreachable_threshold_yields_none() {
    let remote = TempDir::new().unwrap();
    let r1 = build_repo("r1", remote.path(), b"one");
    let r2 = build_repo("r2", remote.path(), b"two");

    let map = map_with(
        vec![r1, r2],
        vec![Mapping {
            paths: vec!["x".to_string()],
            repositories: vec!["r1".to_string(), "r2".to_string()],
            threshold: NonZeroU64::new(2).unwrap(),
            terminating: false,
        }],
    );

    let cache = TempDir::new().unwrap();
    let mut client = MultiRepositoryClient::load(map, cache.path(), Limits::default()).unwrap();
    assert!(client.get_target_info("x").unwrap().is_none());
}

/// A terminating mapping that fails to reach consensus stops the search even
/// when a later mapping would succeed.
#[test]
fn terminating_mapping_stops_the_search() {
    let remote = TempDir::new().unwrap();
    let r1 = build_repo("r1", remote.path(), b"one");
    let r2 = build_repo("r2", remote.path(), b"two");

    let strict_then_lenient = |terminating| {
        vec![
            Mapping {
                paths: vec!["x".to_string()],
                repositories: vec!["r1".to_string(), "r2".to_string()],
                threshold: NonZeroU64::new(2).unwrap(),
                terminating,
            },
            Mapping {
                paths: vec!["*".to_string()],
                repositories: vec!["r1".to_string()],
                threshold: NonZeroU64::new(1).unwrap(),
                terminating: false,
            },
        ]
    };

    // terminating: the second mapping is never consulted
    let map = map_with(vec![r1.clone(), r2.clone()], strict_then_lenient(true));
    let cache = TempDir::new().unwrap();
    let mut client = MultiRepositoryClient::load(map, cache.path(), Limits::default()).unwrap();
    assert!(client.get_target_info("x").unwrap().is_none());

    // non-terminating: the search falls through and the lenient mapping
    // resolves the target from r1 alone
    let map = map_with(vec![r1, r2], strict_then_lenient(false));
    let cache = TempDir::new().unwrap();
    let mut client = MultiRepositoryClient::load(map, cache.path(), Limits::default()).unwrap();
    let consensus = client.get_target_info("x").unwrap().unwrap();
    assert_eq!(consensus.agreement_count, 1);
    assert_eq!(consensus.repositories, vec!["r1"]);
}

/// Paths that no mapping covers resolve to nothing.
#[test]
fn unmapped_paths_resolve_to_none() {
    let remote = TempDir::new().unwrap();
    let r1 = build_repo("r1", remote.path(), b"one");

    let map = map_with(
        vec![r1],
        vec![Mapping {
            paths: vec!["bin/*".to_string()],
            repositories: vec!["r1".to_string()],
            threshold: NonZeroU64::new(1).unwrap(),
            terminating: false,
        }],
    );

    let cache = TempDir::new().unwrap();
    let mut client = MultiRepositoryClient::load(map, cache.path(), Limits::default()).unwrap();
    assert!(client.get_target_info("x").unwrap().is_none());
}
