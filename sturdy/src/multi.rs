//! Multi-repository consensus (TAP 4).
//!
//! A map document associates path patterns with sets of repositories and an
//! agreement threshold. A target is trusted when enough repositories agree on
//! exactly the same file description (length and hashes). Mappings are
//! evaluated in declaration order; a terminating mapping that fails to reach
//! consensus stops the search.

use crate::error::{self, Result};
use crate::schema::{PathSet, Target};
use crate::{
    DefaultTransport, ExpirationEnforcement, Limits, Settings, TargetInfo, Updater,
};
use log::warn;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt};
use std::collections::HashMap;
use std::fs::File;
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};

/// A map document: the known repositories and the ordered mapping rules that
/// assign target paths to them.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RepositoryMap {
    /// The known repositories, keyed by name.
    pub repositories: HashMap<String, RepositoryEntry>,

    /// The mapping rules, evaluated in declaration order.
    pub mapping: Vec<Mapping>,
}

impl RepositoryMap {
    /// Reads a map document from a JSON file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).context(error::FileOpenSnafu { path })?;
        serde_json::from_reader(file).context(error::FileParseJsonSnafu { path })
    }
}

/// One repository in a map document.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RepositoryEntry {
    /// The repository's name; matches its key in the repositories table.
    pub name: String,

    /// The URL base for the repository's metadata.
    pub metadata_url: String,

    /// The URL base for the repository's targets.
    pub targets_url: String,

    /// The path to this repository's trusted root metadata file, distributed
    /// with the map document.
    pub trusted_root_path: PathBuf,
}

/// One mapping rule: the paths it covers, the repositories it consults, and
/// how many of them must agree.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Mapping {
    /// Path patterns this mapping covers.
    pub paths: Vec<String>,

    /// The names of the repositories to consult, in order.
    pub repositories: Vec<String>,

    /// How many consulted repositories must agree on a target's length and
    /// hashes for the result to be valid.
    pub threshold: NonZeroU64,

    /// When true, a failure to reach consensus under this mapping ends the
    /// search instead of falling through to later mappings.
    pub terminating: bool,
}

/// A target description that reached consensus, along with how it got there.
#[derive(Debug, Clone)]
pub struct ConsensusTarget {
    /// The agreed-upon target description (taken from the first agreeing
    /// repository).
    pub info: TargetInfo,

    /// The number of repositories that agreed.
    pub agreement_count: u64,

    /// The threshold the winning mapping required.
    pub required_threshold: NonZeroU64,

    /// The names of the agreeing repositories, in consultation order.
    pub repositories: Vec<String>,
}

/// A client across several repositories, combining their answers according to
/// a map document.
#[derive(Debug)]
pub struct MultiRepositoryClient {
    map: RepositoryMap,
    updaters: HashMap<String, Updater>,
}

impl MultiRepositoryClient {
    /// Loads and refreshes every repository in the map document. Each
    /// repository gets its own metadata and targets cache directories under
    /// `base_dir`.
    pub fn load(map: RepositoryMap, base_dir: &Path, limits: Limits) -> Result<Self> {
        let mut updaters = HashMap::new();
        for (name, entry) in &map.repositories {
            let root = File::open(&entry.trusted_root_path).context(error::FileOpenSnafu {
                path: &entry.trusted_root_path,
            })?;
            let repo_dir = base_dir.join(name);
            let updater = Updater::load(
                Box::new(DefaultTransport::new()),
                Settings {
                    root,
                    local_metadata_dir: Some(repo_dir.join("metadata")),
                    local_targets_dir: Some(repo_dir.join("targets")),
                    remote_metadata_url: entry.metadata_url.clone(),
                    remote_targets_url: entry.targets_url.clone(),
                    limits,
                    prefix_targets_with_hash: true,
                    disable_local_cache: false,
                    expiration_enforcement: ExpirationEnforcement::Safe,
                },
            )?;
            updaters.insert(name.clone(), updater);
        }
        Ok(Self { map, updaters })
    }

    /// Searches the mapping rules in declaration order for a consensus on
    /// `target_path`. Returns `Ok(None)` when no mapping matches, when a
    /// terminating mapping fails to reach its threshold, or when every
    /// matching mapping falls short.
    pub fn get_target_info(&mut self, target_path: &str) -> Result<Option<ConsensusTarget>> {
        let mappings = self.map.mapping.clone();
        for mapping in &mappings {
            let patterns = PathSet::Paths(mapping.paths.clone());
            if !patterns.matched_target(target_path) {
                continue;
            }

            // Ask each repository in order. Repositories that don't know the
            // target, or fail outright, simply don't contribute a vote.
            let mut candidates: Vec<(String, TargetInfo)> = Vec::new();
            for name in &mapping.repositories {
                let updater = self
                    .updaters
                    .get_mut(name)
                    .context(error::RepositoryNotInMapSnafu { name })?;
                match updater.get_target_info(target_path) {
                    Ok(Some(info)) => candidates.push((name.clone(), info)),
                    Ok(None) => {}
                    Err(err) => {
                        warn!("repository '{}' failed to resolve '{}': {}", name, target_path, err);
                    }
                }
            }

            // Group the answers by (length, sorted hashes); the largest group
            // wins. Groups are kept in first-appearance order so ties resolve
            // deterministically to the earliest answer.
            let mut groups: Vec<(AgreementKey, Vec<(String, TargetInfo)>)> = Vec::new();
            for (name, info) in candidates {
                let key = agreement_key(&info.target);
                match groups.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, members)) => members.push((name, info)),
                    None => groups.push((key, vec![(name, info)])),
                }
            }
            let winner = groups
                .into_iter()
                .map(|(_, members)| members)
                .fold(Vec::new(), |best: Vec<(String, TargetInfo)>, members| {
                    if members.len() > best.len() {
                        members
                    } else {
                        best
                    }
                });

            let agreement_count = winner.len() as u64;
            if agreement_count >= mapping.threshold.get() {
                let repositories: Vec<String> =
                    winner.iter().map(|(name, _)| name.clone()).collect();
                let info = winner
                    .into_iter()
                    .map(|(_, info)| info)
                    .next()
                    .expect("agreement_count is at least one");
                return Ok(Some(ConsensusTarget {
                    info,
                    agreement_count,
                    required_threshold: mapping.threshold,
                    repositories,
                }));
            }
            if mapping.terminating {
                return Ok(None);
            }
        }
        Ok(None)
    }

    /// Resolves `target_path` to a consensus description, then downloads the
    /// target from the agreeing repositories in order until one succeeds.
    pub fn download_target(&mut self, target_path: &str) -> Result<Vec<u8>> {
        let consensus = self
            .get_target_info(target_path)?
            .context(error::TargetNotFoundSnafu {
                target: target_path,
            })?;
        let mut last_err = None;
        for name in &consensus.repositories {
            let updater = self
                .updaters
                .get(name)
                .context(error::RepositoryNotInMapSnafu { name })?;
            match updater.download_target(&consensus.info, None, None) {
                Ok(bytes) => return Ok(bytes),
                Err(err) => {
                    warn!("download of '{}' from '{}' failed: {}", target_path, name, err);
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            error::TargetNotFoundSnafu {
                target: target_path,
            }
            .build()
        }))
    }

    /// The updater for a named repository, if the map defines it.
    pub fn repository(&self, name: &str) -> Option<&Updater> {
        self.updaters.get(name)
    }
}

type AgreementKey = (u64, Vec<(String, String)>);

/// The grouping key for consensus: a target's length and its sorted
/// (algorithm, lower-hex digest) pairs.
fn agreement_key(target: &Target) -> AgreementKey {
    let mut hashes = Vec::new();
    if let Some(sha256) = &target.hashes.sha256 {
        hashes.push(("sha256".to_string(), hex::encode(sha256)));
    }
    if let Some(sha512) = &target.hashes.sha512 {
        hashes.push(("sha512".to_string(), hex::encode(sha512)));
    }
    hashes.sort();
    (target.length, hashes)
}

#[cfg(test)]
mod tests {
    use super::agreement_key;
    use crate::schema::{Hashes, Target};
    use std::collections::HashMap;

    #[test]
    fn agreement_key_is_stable_across_hex_case() {
        let lower: Target = Target {
            length: 4,
            hashes: serde_json::from_value(serde_json::json!({ "sha256": "aabb" })).unwrap(),
            custom: HashMap::new(),
            _extra: HashMap::new(),
        };
        let upper: Target = Target {
            length: 4,
            hashes: serde_json::from_value(serde_json::json!({ "sha256": "AABB" })).unwrap(),
            custom: HashMap::new(),
            _extra: HashMap::new(),
        };
        assert_eq!(agreement_key(&lower), agreement_key(&upper));
    }

    #[test]
    fn different_lengths_do_not_agree() {
        let a = Target {
            length: 4,
            hashes: Hashes::from_sha256(vec![0xaa]),
            custom: HashMap::new(),
            _extra: HashMap::new(),
        };
        let b = Target {
            length: 5,
            hashes: Hashes::from_sha256(vec![0xaa]),
            custom: HashMap::new(),
            _extra: HashMap::new(),
        };
        assert_ne!(agreement_key(&a), agreement_key(&b));
    }
}
