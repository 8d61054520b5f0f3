// Copyright 2025 sturdy developers. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The progressive trust state machine.
//!
//! Trust starts from a byte array containing root metadata whose provenance
//! is the caller's responsibility, and grows one verified stage at a time:
//!
//! ```text
//! RootOnly -> RootAndTimestamp -> RootTimestampSnapshot -> Complete
//! ```
//!
//! Each transition decodes untrusted bytes, authorizes their signatures
//! against the already-trusted stage, enforces the version and freshness
//! rules that defend against rollback, freeze, and mix-and-match attacks,
//! and returns the next typed state. Transitions never mutate their input on
//! failure; the caller keeps the last good state.
//!
//! All expiry checks compare against a reference time captured once when the
//! `RootOnly` state is created, so a single update cycle sees one consistent
//! clock reading.

use crate::error::{self, Result};
use crate::integrity;
use crate::schema::{Role, RoleType, Root, Signed, Snapshot, Targets, Timestamp};
use crate::ExpirationEnforcement;
use chrono::{DateTime, Utc};
use log::debug;
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::HashMap;

/// The name of the top-level targets role.
pub const TOP_LEVEL_TARGETS: &str = "targets";

/// The name used as the delegator of the top-level targets role.
pub const ROOT_DELEGATOR: &str = "root";

fn check_expired<T: Role>(
    role: &T,
    ref_time: DateTime<Utc>,
    enforcement: ExpirationEnforcement,
) -> Result<()> {
    if enforcement == ExpirationEnforcement::Unsafe {
        return Ok(());
    }
    ensure!(
        ref_time < role.expires(),
        error::ExpiredMetadataSnafu { role: T::TYPE }
    );
    Ok(())
}

/// Verified root metadata and nothing else.
#[derive(Debug, Clone)]
pub struct RootOnly {
    root: Signed<Root>,
    ref_time: DateTime<Utc>,
    enforcement: ExpirationEnforcement,
}

impl RootOnly {
    /// Establishes trust from an initial root metadata byte array.
    ///
    /// The envelope's signatures are verified against the root role defined
    /// inside the envelope itself, and the root must not be expired at
    /// `ref_time`.
    pub fn load(
        bytes: &[u8],
        ref_time: DateTime<Utc>,
        enforcement: ExpirationEnforcement,
    ) -> Result<Self> {
        let root: Signed<Root> =
            serde_json::from_slice(bytes).context(error::ParseTrustedMetadataSnafu)?;
        root.signed
            .verify_role(&root)
            .context(error::VerifyTrustedMetadataSnafu)?;
        check_expired(&root.signed, ref_time, enforcement)?;
        Ok(Self {
            root,
            ref_time,
            enforcement,
        })
    }

    /// Applies the next root in the rotation chain.
    ///
    /// The new root must be signed by a threshold of the current root's root
    /// role (proving the current trust chain authorizes it) and by a
    /// threshold of its own root role (proving the rotation itself is
    /// valid), and its version must be exactly one greater than the current
    /// version.
    pub fn update_root(&mut self, bytes: &[u8]) -> Result<()> {
        let new_root: Signed<Root> = serde_json::from_slice(bytes).context(
            error::ParseMetadataSnafu {
                role: RoleType::Root,
            },
        )?;

        self.root
            .signed
            .verify_role(&new_root)
            .context(error::VerifyMetadataSnafu {
                role: RoleType::Root,
            })?;

        let expected = self
            .root
            .signed
            .version
            .get()
            .checked_add(1)
            .context(error::VersionOverflowSnafu)?;
        ensure!(
            new_root.signed.version.get() == expected,
            error::BadRootVersionSnafu {
                expected,
                fetched: new_root.signed.version.get(),
            }
        );

        new_root
            .signed
            .verify_role(&new_root)
            .context(error::VerifyMetadataSnafu {
                role: RoleType::Root,
            })?;

        check_expired(&new_root.signed, self.ref_time, self.enforcement)?;

        debug!("root updated to version {}", new_root.signed.version);
        self.root = new_root;
        Ok(())
    }

    /// Accepts timestamp metadata, producing a [`RootAndTimestamp`].
    pub fn update_timestamp(&self, bytes: &[u8]) -> Result<RootAndTimestamp> {
        let timestamp = accept_timestamp(
            &self.root.signed,
            None,
            bytes,
            self.ref_time,
            self.enforcement,
        )?
        .expect("a first timestamp is never an idempotent no-op");
        Ok(RootAndTimestamp {
            root: self.root.clone(),
            timestamp,
            ref_time: self.ref_time,
            enforcement: self.enforcement,
        })
    }

    /// The trusted root envelope.
    pub fn root(&self) -> &Signed<Root> {
        &self.root
    }

    /// The reference time for this update cycle.
    pub fn ref_time(&self) -> DateTime<Utc> {
        self.ref_time
    }
}

/// Verified root and timestamp metadata.
#[derive(Debug, Clone)]
pub struct RootAndTimestamp {
    root: Signed<Root>,
    timestamp: Signed<Timestamp>,
    ref_time: DateTime<Utc>,
    enforcement: ExpirationEnforcement,
}

impl RootAndTimestamp {
    /// Accepts newer timestamp metadata. A new timestamp at the same version
    /// as the current one is an idempotent no-op that returns an unchanged
    /// state; an older version is a rollback error.
    pub fn update_timestamp(&self, bytes: &[u8]) -> Result<Self> {
        let timestamp = match accept_timestamp(
            &self.root.signed,
            Some(&self.timestamp),
            bytes,
            self.ref_time,
            self.enforcement,
        )? {
            Some(timestamp) => timestamp,
            None => return Ok(self.clone()),
        };
        Ok(Self {
            root: self.root.clone(),
            timestamp,
            ref_time: self.ref_time,
            enforcement: self.enforcement,
        })
    }

    /// Accepts snapshot metadata, producing a [`RootTimestampSnapshot`].
    ///
    /// When `trusted` is false (bytes fetched from the network), the body is
    /// first checked against the length and hashes the timestamp claims for
    /// `snapshot.json`. Pass `trusted` as true only for bytes this client
    /// itself persisted after a previous successful check.
    pub fn update_snapshot(&self, bytes: &[u8], trusted: bool) -> Result<RootTimestampSnapshot> {
        let snapshot = accept_snapshot(
            &self.root.signed,
            &self.timestamp.signed,
            None,
            bytes,
            trusted,
            self.ref_time,
            self.enforcement,
        )?;
        Ok(RootTimestampSnapshot {
            root: self.root.clone(),
            timestamp: self.timestamp.clone(),
            snapshot,
            ref_time: self.ref_time,
            enforcement: self.enforcement,
        })
    }

    /// The trusted root envelope.
    pub fn root(&self) -> &Signed<Root> {
        &self.root
    }

    /// The trusted timestamp envelope.
    pub fn timestamp(&self) -> &Signed<Timestamp> {
        &self.timestamp
    }
}

/// Verified root, timestamp, and snapshot metadata.
#[derive(Debug, Clone)]
pub struct RootTimestampSnapshot {
    root: Signed<Root>,
    timestamp: Signed<Timestamp>,
    snapshot: Signed<Snapshot>,
    ref_time: DateTime<Utc>,
    enforcement: ExpirationEnforcement,
}

impl RootTimestampSnapshot {
    /// Accepts newer snapshot metadata, enforcing per-filename version
    /// monotonicity and forbidding deletions relative to the current
    /// snapshot.
    pub fn update_snapshot(&self, bytes: &[u8], trusted: bool) -> Result<Self> {
        let snapshot = accept_snapshot(
            &self.root.signed,
            &self.timestamp.signed,
            Some(&self.snapshot.signed),
            bytes,
            trusted,
            self.ref_time,
            self.enforcement,
        )?;
        Ok(Self {
            root: self.root.clone(),
            timestamp: self.timestamp.clone(),
            snapshot,
            ref_time: self.ref_time,
            enforcement: self.enforcement,
        })
    }

    /// Accepts the first targets metadata, producing a [`Complete`] state.
    /// The first targets role loaded is the top-level one, delegated by
    /// `"root"`.
    pub fn update_delegated_targets(
        &self,
        bytes: &[u8],
        role_name: &str,
        delegator_name: &str,
    ) -> Result<Complete> {
        ensure!(
            role_name == TOP_LEVEL_TARGETS && delegator_name == ROOT_DELEGATOR,
            error::TopLevelTargetsFirstSnafu { role: role_name }
        );
        let mut complete = Complete {
            root: self.root.clone(),
            timestamp: self.timestamp.clone(),
            snapshot: self.snapshot.clone(),
            targets: HashMap::new(),
            ref_time: self.ref_time,
            enforcement: self.enforcement,
        };
        complete.update_delegated_targets(bytes, role_name, delegator_name)?;
        Ok(complete)
    }

    /// The trusted root envelope.
    pub fn root(&self) -> &Signed<Root> {
        &self.root
    }

    /// The trusted timestamp envelope.
    pub fn timestamp(&self) -> &Signed<Timestamp> {
        &self.timestamp
    }

    /// The trusted snapshot envelope.
    pub fn snapshot(&self) -> &Signed<Snapshot> {
        &self.snapshot
    }
}

/// The fully-loaded trust state: root, timestamp, snapshot, the top-level
/// targets role, and any delegated targets roles loaded so far.
#[derive(Debug, Clone)]
pub struct Complete {
    root: Signed<Root>,
    timestamp: Signed<Timestamp>,
    snapshot: Signed<Snapshot>,
    /// Loaded targets roles by name. Delegators are identified by name and
    /// looked up here, which keeps the role graph flat.
    targets: HashMap<String, Signed<Targets>>,
    ref_time: DateTime<Utc>,
    enforcement: ExpirationEnforcement,
}

impl Complete {
    /// Verifies and installs a targets role.
    ///
    /// The body must match the length and hashes the snapshot claims for
    /// `<role_name>.json`, and its signatures must be authorized by the
    /// delegator: the root's targets role when `delegator_name` is
    /// `"root"`, otherwise the named entry in the (already loaded)
    /// delegator's delegations.
    pub fn update_delegated_targets(
        &mut self,
        bytes: &[u8],
        role_name: &str,
        delegator_name: &str,
    ) -> Result<()> {
        check_expired(&self.snapshot.signed, self.ref_time, self.enforcement)?;

        let filename = format!("{}.json", role_name);
        let role_meta = self
            .snapshot
            .signed
            .meta
            .get(&filename)
            .context(error::MetaMissingSnafu {
                file: filename.clone(),
                role: RoleType::Snapshot,
            })?;
        integrity::verify_file_meta(bytes, role_meta, &filename)?;

        let targets: Signed<Targets> = serde_json::from_slice(bytes).context(
            error::ParseMetadataSnafu {
                role: RoleType::Targets,
            },
        )?;

        if delegator_name == ROOT_DELEGATOR {
            self.root
                .signed
                .verify_role(&targets)
                .context(error::VerifyMetadataSnafu {
                    role: RoleType::Targets,
                })?;
        } else {
            let delegator =
                self.targets
                    .get(delegator_name)
                    .context(error::DelegateMissingSnafu {
                        name: delegator_name,
                    })?;
            let delegations =
                delegator
                    .signed
                    .delegations
                    .as_ref()
                    .context(error::NoDelegationsSnafu {
                        name: delegator_name,
                    })?;
            delegations
                .verify_role(&targets, role_name)
                .context(error::VerifyRoleMetadataSnafu { role: role_name })?;
        }

        ensure!(
            targets.signed.version == role_meta.version,
            error::VersionMismatchSnafu {
                file: filename,
                fetched: targets.signed.version.get(),
                expected: role_meta.version.get(),
            }
        );

        check_expired(&targets.signed, self.ref_time, self.enforcement)?;

        self.targets.insert(role_name.to_string(), targets);
        Ok(())
    }

    /// The trusted root envelope.
    pub fn root(&self) -> &Signed<Root> {
        &self.root
    }

    /// The trusted timestamp envelope.
    pub fn timestamp(&self) -> &Signed<Timestamp> {
        &self.timestamp
    }

    /// The trusted snapshot envelope.
    pub fn snapshot(&self) -> &Signed<Snapshot> {
        &self.snapshot
    }

    /// The top-level targets envelope.
    pub fn targets(&self) -> &Signed<Targets> {
        // the map is never constructed without the top-level role
        &self.targets[TOP_LEVEL_TARGETS]
    }

    /// The named targets role, if it has been loaded.
    pub fn delegated_targets(&self, name: &str) -> Option<&Signed<Targets>> {
        self.targets.get(name)
    }

    /// Whether the named targets role has been loaded.
    pub fn contains_role(&self, name: &str) -> bool {
        self.targets.contains_key(name)
    }

    /// The reference time for this update cycle.
    pub fn ref_time(&self) -> DateTime<Utc> {
        self.ref_time
    }
}

/// Shared timestamp acceptance: used both for the first timestamp and for
/// replacements. Returns `None` when the new timestamp has the same version
/// as the old one (idempotent no-op).
fn accept_timestamp(
    root: &Root,
    old: Option<&Signed<Timestamp>>,
    bytes: &[u8],
    ref_time: DateTime<Utc>,
    enforcement: ExpirationEnforcement,
) -> Result<Option<Signed<Timestamp>>> {
    check_expired(root, ref_time, enforcement)?;

    let timestamp: Signed<Timestamp> =
        serde_json::from_slice(bytes).context(error::ParseMetadataSnafu {
            role: RoleType::Timestamp,
        })?;

    root.verify_role(&timestamp)
        .context(error::VerifyMetadataSnafu {
            role: RoleType::Timestamp,
        })?;

    let new_snapshot_meta =
        timestamp
            .signed
            .meta
            .get("snapshot.json")
            .context(error::MetaMissingSnafu {
                file: "snapshot.json",
                role: RoleType::Timestamp,
            })?;

    if let Some(old) = old {
        ensure!(
            timestamp.signed.version >= old.signed.version,
            error::OlderMetadataSnafu {
                role: RoleType::Timestamp,
                current_version: old.signed.version.get(),
                new_version: timestamp.signed.version.get(),
            }
        );
        if timestamp.signed.version == old.signed.version {
            debug!("timestamp version unchanged; keeping current state");
            return Ok(None);
        }

        // Snapshot rollback prevention before we've even seen the new
        // snapshot: the snapshot version the new timestamp announces must
        // not be lower than the one the old timestamp announced.
        if let Some(old_snapshot_meta) = old.signed.meta.get("snapshot.json") {
            ensure!(
                new_snapshot_meta.version >= old_snapshot_meta.version,
                error::OlderMetadataSnafu {
                    role: RoleType::Snapshot,
                    current_version: old_snapshot_meta.version.get(),
                    new_version: new_snapshot_meta.version.get(),
                }
            );
        }
    }

    check_expired(&timestamp.signed, ref_time, enforcement)?;

    Ok(Some(timestamp))
}

/// Shared snapshot acceptance: used both for the first snapshot and for
/// replacements.
fn accept_snapshot(
    root: &Root,
    timestamp: &Timestamp,
    old: Option<&Snapshot>,
    bytes: &[u8],
    trusted: bool,
    ref_time: DateTime<Utc>,
    enforcement: ExpirationEnforcement,
) -> Result<Signed<Snapshot>> {
    // final freshness check before consuming the snapshot
    check_expired(timestamp, ref_time, enforcement)?;

    let snapshot_meta = timestamp
        .meta
        .get("snapshot.json")
        .context(error::MetaMissingSnafu {
            file: "snapshot.json",
            role: RoleType::Timestamp,
        })?;

    if !trusted {
        integrity::verify_file_meta(bytes, snapshot_meta, "snapshot.json")?;
    }

    let snapshot: Signed<Snapshot> =
        serde_json::from_slice(bytes).context(error::ParseMetadataSnafu {
            role: RoleType::Snapshot,
        })?;

    root.verify_role(&snapshot)
        .context(error::VerifyMetadataSnafu {
            role: RoleType::Snapshot,
        })?;

    // A trusted body (one this client persisted after a previous successful
    // check) may trail the timestamp's current claim; it is being installed
    // as the continuity baseline, and the claim is enforced against the
    // network-fetched replacement. Untrusted bodies must match the claim
    // exactly.
    if !trusted {
        ensure!(
            snapshot.signed.version == snapshot_meta.version,
            error::VersionMismatchSnafu {
                file: "snapshot.json",
                fetched: snapshot.signed.version.get(),
                expected: snapshot_meta.version.get(),
            }
        );
    }

    if let Some(old) = old {
        // Every targets metadata file in the old snapshot must still be
        // present, at the same or a newer version. Deletions and downgrades
        // are both rollback attacks.
        for (filename, old_meta) in &old.meta {
            let new_meta =
                snapshot
                    .signed
                    .meta
                    .get(filename)
                    .context(error::SnapshotFileRemovedSnafu {
                        file: filename.clone(),
                    })?;
            ensure!(
                new_meta.version >= old_meta.version,
                error::OlderMetadataSnafu {
                    role: RoleType::Targets,
                    current_version: old_meta.version.get(),
                    new_version: new_meta.version.get(),
                }
            );
        }
    }

    check_expired(&snapshot.signed, ref_time, enforcement)?;

    Ok(snapshot)
}
