// Copyright 2025 sturdy developers. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provides a `RepositoryEditor` object for building fully-signed TUF
//! repositories from a set of signing keys, a target set, versions, and
//! expiries.

mod keys;
pub mod signed;

use crate::editor::keys::{resolve_key_sources, ResolvedKey};
use crate::editor::signed::{SignedRepository, SignedRole};
use crate::error::{self, Result};
use crate::key_source::KeySource;
use crate::schema::decoded::{Decoded, Hex};
use crate::schema::key::Key;
use crate::schema::{
    DelegatedRole, Delegations, FileMeta, Hashes, PathSet, RoleKeys, RoleType, Root, Snapshot,
    Target, Targets, Timestamp,
};
use aws_lc_rs::rand::SystemRandom;
use chrono::{DateTime, Timelike, Utc};
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::HashMap;
use std::num::NonZeroU64;
use std::path::Path;

const SPEC_VERSION: &str = "1.0.0";

/// `RepositoryEditor` accumulates the data needed to construct a signed TUF
/// repository: signing keys per role, targets, delegations, versions, and
/// expiration times.
///
/// Typical use: create an editor, add key sources for the four top-level
/// roles, set versions and expirations, add targets (and optionally
/// delegations), then call [`RepositoryEditor::sign`] to produce a
/// [`SignedRepository`] that can be written to disk.
#[derive(Debug)]
pub struct RepositoryEditor {
    consistent_snapshot: bool,

    root_version: NonZeroU64,
    root_expires: Option<DateTime<Utc>>,
    role_sources: HashMap<RoleType, Vec<Box<dyn KeySource>>>,

    targets: Targets,
    delegated: Vec<DelegatedEditor>,

    snapshot_version: Option<NonZeroU64>,
    snapshot_expires: Option<DateTime<Utc>>,
    timestamp_version: Option<NonZeroU64>,
    timestamp_expires: Option<DateTime<Utc>>,
}

/// A delegated role being built.
#[derive(Debug)]
struct DelegatedEditor {
    name: String,
    delegator: String,
    sources: Vec<Box<dyn KeySource>>,
    paths: PathSet,
    terminating: bool,
    targets: Targets,
}

/// Truncates an expiry to whole seconds so it serializes in the exact
/// `YYYY-MM-DDTHH:MM:SSZ` wire form.
fn whole_seconds(expires: DateTime<Utc>) -> DateTime<Utc> {
    expires.with_nanosecond(0).unwrap_or(expires)
}

impl RepositoryEditor {
    /// Creates a new, bare `RepositoryEditor`.
    pub fn new(consistent_snapshot: bool) -> Self {
        Self {
            consistent_snapshot,
            root_version: NonZeroU64::new(1).expect("1 is not zero"),
            root_expires: None,
            role_sources: HashMap::new(),
            targets: Targets::new(
                SPEC_VERSION.to_string(),
                NonZeroU64::new(1).expect("1 is not zero"),
                Utc::now(),
            ),
            delegated: Vec::new(),
            snapshot_version: None,
            snapshot_expires: None,
            timestamp_version: None,
            timestamp_expires: None,
        }
    }

    /// Adds a signing key source for a top-level role. A role's threshold
    /// defaults to the number of keys provided for it.
    pub fn add_key(&mut self, role: RoleType, source: Box<dyn KeySource>) -> &mut Self {
        self.role_sources.entry(role).or_default().push(source);
        self
    }

    /// Sets the root version.
    pub fn root_version(&mut self, version: NonZeroU64) -> &mut Self {
        self.root_version = version;
        self
    }

    /// Sets the root expiration.
    pub fn root_expires(&mut self, expires: DateTime<Utc>) -> &mut Self {
        self.root_expires = Some(whole_seconds(expires));
        self
    }

    /// Sets the top-level targets version.
    pub fn targets_version(&mut self, version: NonZeroU64) -> &mut Self {
        self.targets.version = version;
        self
    }

    /// Sets the top-level targets expiration.
    pub fn targets_expires(&mut self, expires: DateTime<Utc>) -> &mut Self {
        self.targets.expires = whole_seconds(expires);
        self
    }

    /// Sets the snapshot version.
    pub fn snapshot_version(&mut self, version: NonZeroU64) -> &mut Self {
        self.snapshot_version = Some(version);
        self
    }

    /// Sets the snapshot expiration.
    pub fn snapshot_expires(&mut self, expires: DateTime<Utc>) -> &mut Self {
        self.snapshot_expires = Some(whole_seconds(expires));
        self
    }

    /// Sets the timestamp version.
    pub fn timestamp_version(&mut self, version: NonZeroU64) -> &mut Self {
        self.timestamp_version = Some(version);
        self
    }

    /// Sets the timestamp expiration.
    pub fn timestamp_expires(&mut self, expires: DateTime<Utc>) -> &mut Self {
        self.timestamp_expires = Some(whole_seconds(expires));
        self
    }

    /// Adds a target to the top-level targets role.
    pub fn add_target(&mut self, name: &str, target: Target) -> Result<&mut Self> {
        crate::safe_target_path(name)?;
        self.targets.add_target(name, target);
        Ok(self)
    }

    /// Reads the file at `path` and adds it as a target named `name` to the
    /// top-level targets role.
    pub fn add_target_path<P: AsRef<Path>>(&mut self, path: P, name: &str) -> Result<&mut Self> {
        let target = Target::from_path(path.as_ref()).context(error::TargetFromPathSnafu {
            path: path.as_ref(),
        })?;
        self.add_target(name, target)
    }

    /// Delegates a set of target paths from `delegator` (either `"targets"`
    /// or a previously delegated role) to a new role. The delegator must own
    /// every delegated path.
    pub fn delegate_role(
        &mut self,
        name: &str,
        delegator: &str,
        sources: Vec<Box<dyn KeySource>>,
        paths: PathSet,
        terminating: bool,
        version: NonZeroU64,
        expires: DateTime<Utc>,
    ) -> Result<&mut Self> {
        // The top-level targets role owns the whole namespace; anyone else
        // may only pass down paths they were themselves delegated.
        if delegator != crate::trusted::TOP_LEVEL_TARGETS {
            let parent = self
                .delegated
                .iter()
                .find(|role| role.name == delegator)
                .context(error::DelegateMissingSnafu { name: delegator })?;
            for path in paths.vec() {
                if !parent.paths.matched_target(path) {
                    return Err(crate::schema::Error::UnmatchedPath { child: path.clone() })
                        .context(error::InvalidPathPermissionSnafu { name: delegator });
                }
            }
        }

        let targets = Targets::new(
            SPEC_VERSION.to_string(),
            version,
            whole_seconds(expires),
        );
        self.delegated.push(DelegatedEditor {
            name: name.to_string(),
            delegator: delegator.to_string(),
            sources,
            paths,
            terminating,
            targets,
        });
        Ok(self)
    }

    /// Adds a target to a delegated role.
    pub fn add_delegated_target(
        &mut self,
        role: &str,
        name: &str,
        target: Target,
    ) -> Result<&mut Self> {
        crate::safe_target_path(name)?;
        let editor = self
            .delegated
            .iter_mut()
            .find(|delegated| delegated.name == role)
            .context(error::DelegateMissingSnafu { name: role })?;
        editor.targets.add_target(name, target);
        Ok(self)
    }

    /// Builds and signs every role, producing a [`SignedRepository`].
    pub fn sign(mut self) -> Result<SignedRepository> {
        let rng = SystemRandom::new();

        // Resolve signers for the four mandatory top-level roles.
        let mut resolved: HashMap<RoleType, Vec<ResolvedKey>> = HashMap::new();
        for role in &[
            RoleType::Root,
            RoleType::Timestamp,
            RoleType::Snapshot,
            RoleType::Targets,
        ] {
            let sources = self.role_sources.get(role).context(error::NoSignersSnafu {
                role: role.to_string(),
            })?;
            let keys = resolve_key_sources(sources)?;
            ensure!(
                !keys.is_empty(),
                error::NoSignersSnafu {
                    role: role.to_string(),
                }
            );
            resolved.insert(*role, keys);
        }

        // Resolve signers for delegated roles and wire each role into its
        // delegator's delegations block.
        let mut delegated_signers: HashMap<String, Vec<ResolvedKey>> = HashMap::new();
        for editor in &self.delegated {
            let keys = resolve_key_sources(&editor.sources)?;
            ensure!(
                !keys.is_empty(),
                error::NoSignersSnafu {
                    role: editor.name.clone(),
                }
            );
            delegated_signers.insert(editor.name.clone(), keys);
        }

        // Build delegations blocks bottom-up: every delegated role is an
        // entry in its delegator's block, carrying its keys and threshold.
        let mut delegations_by_parent: HashMap<String, Delegations> = HashMap::new();
        for editor in &self.delegated {
            let signers = &delegated_signers[&editor.name];
            let block = delegations_by_parent
                .entry(editor.delegator.clone())
                .or_insert_with(Delegations::new);
            let mut keyids = Vec::new();
            for signer in signers {
                block.keys.insert(signer.keyid.clone(), signer.key.clone());
                keyids.push(signer.keyid.clone());
            }
            let threshold = NonZeroU64::new(keyids.len() as u64).expect("at least one signer");
            block.roles.push(DelegatedRole {
                name: editor.name.clone(),
                keyids,
                threshold,
                paths: editor.paths.clone(),
                terminating: editor.terminating,
            });
        }

        // Sign the delegated roles.
        let mut signed_delegated: Vec<(String, SignedRole<Targets>)> = Vec::new();
        for mut editor in std::mem::take(&mut self.delegated) {
            editor.targets.delegations = delegations_by_parent.remove(&editor.name);
            let signed =
                SignedRole::new(editor.targets, &delegated_signers[&editor.name], &rng)?;
            signed_delegated.push((editor.name, signed));
        }

        // Assemble and sign the root.
        let root = self.build_root(&resolved)?;
        let signed_root = SignedRole::new(root, &resolved[&RoleType::Root], &rng)?;

        // Sign the top-level targets, with its delegations block attached.
        let mut targets = self.targets;
        targets.delegations =
            delegations_by_parent.remove(crate::trusted::TOP_LEVEL_TARGETS);
        let signed_targets = SignedRole::new(targets, &resolved[&RoleType::Targets], &rng)?;

        // The snapshot references the exact bytes of every targets role.
        let mut snapshot = Snapshot::new(
            SPEC_VERSION.to_string(),
            self.snapshot_version
                .context(error::EditorFieldMissingSnafu {
                    field: "snapshot_version",
                })?,
            self.snapshot_expires
                .context(error::EditorFieldMissingSnafu {
                    field: "snapshot_expires",
                })?,
        );
        snapshot
            .meta
            .insert("targets.json".to_string(), role_meta(&signed_targets));
        for (name, role) in &signed_delegated {
            snapshot
                .meta
                .insert(format!("{}.json", name), role_meta(role));
        }
        let signed_snapshot = SignedRole::new(snapshot, &resolved[&RoleType::Snapshot], &rng)?;

        // And the timestamp references the exact bytes of the snapshot.
        let mut timestamp = Timestamp::new(
            SPEC_VERSION.to_string(),
            self.timestamp_version
                .context(error::EditorFieldMissingSnafu {
                    field: "timestamp_version",
                })?,
            self.timestamp_expires
                .context(error::EditorFieldMissingSnafu {
                    field: "timestamp_expires",
                })?,
        );
        timestamp
            .meta
            .insert("snapshot.json".to_string(), role_meta(&signed_snapshot));
        let signed_timestamp = SignedRole::new(timestamp, &resolved[&RoleType::Timestamp], &rng)?;

        Ok(SignedRepository {
            root: signed_root,
            targets: signed_targets,
            delegated: signed_delegated,
            snapshot: signed_snapshot,
            timestamp: signed_timestamp,
        })
    }

    /// Assembles root metadata enumerating every top-level role's keys, with
    /// each threshold set to the number of keys provided for the role.
    fn build_root(&self, resolved: &HashMap<RoleType, Vec<ResolvedKey>>) -> Result<Root> {
        let mut keys: HashMap<Decoded<Hex>, Key> = HashMap::new();
        let mut roles: HashMap<RoleType, RoleKeys> = HashMap::new();
        for (role, signers) in resolved {
            let mut keyids = Vec::new();
            for signer in signers {
                keys.insert(signer.keyid.clone(), signer.key.clone());
                keyids.push(signer.keyid.clone());
            }
            let threshold = NonZeroU64::new(keyids.len() as u64).expect("at least one signer");
            roles.insert(
                *role,
                RoleKeys {
                    keyids,
                    threshold,
                    _extra: HashMap::new(),
                },
            );
        }

        Ok(Root {
            spec_version: SPEC_VERSION.to_string(),
            consistent_snapshot: self.consistent_snapshot,
            version: self.root_version,
            expires: self
                .root_expires
                .context(error::EditorFieldMissingSnafu {
                    field: "root_expires",
                })?,
            keys,
            roles,
            _extra: HashMap::new(),
        })
    }
}

/// The snapshot/timestamp description of a signed role: its version and the
/// length and SHA-256 of the exact bytes that will be written.
fn role_meta<T: crate::schema::Role + serde::Serialize>(role: &SignedRole<T>) -> FileMeta {
    FileMeta {
        length: Some(role.length()),
        hashes: Some(Hashes::from_sha256(role.sha256().to_vec())),
        version: role.signed().signed.version(),
        _extra: HashMap::new(),
    }
}
