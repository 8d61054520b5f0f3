// Copyright 2025 sturdy developers. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `sturdy` is a client library for TUF repositories.
//!
//! A client establishes trust from an initial root metadata file shipped
//! out-of-band, then progressively verifies the repository's timestamp,
//! snapshot, and targets metadata, resolving delegated targets roles on
//! demand. Verified target files can then be downloaded and cached. The
//! [`multi`] module adds consensus across several repositories driven by a
//! map document.
//!
//! # Testing
//!
//! Unit tests are run in the usual manner: `cargo test`. The integration
//! tests build repositories with [`editor::RepositoryEditor`] and load them
//! through `file://` URLs.

#![forbid(missing_debug_implementations)]
#![deny(rust_2018_idioms)]
// missing_docs is on its own line to make it easy to comment out when making changes.
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc
)]

mod datastore;
pub mod editor;
pub mod error;
mod fetch;
#[cfg(feature = "http")]
pub mod http;
mod integrity;
mod io;
pub mod key_source;
pub mod multi;
pub mod schema;
pub mod sign;
mod transport;
pub mod trusted;

use crate::datastore::Datastore;
use crate::error::Result;
use crate::fetch::fetch_bytes;
use crate::schema::key::Key;
use crate::schema::{Root, RoleType, Signed, Snapshot, Target, Targets, Timestamp};
use crate::trusted::{Complete, RootOnly, ROOT_DELEGATOR, TOP_LEVEL_TARGETS};
pub use crate::transport::{
    DefaultTransport, FilesystemTransport, Transport, TransportError, TransportErrorKind,
};
use log::{debug, warn};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use snafu::{ensure, OptionExt, ResultExt};
use std::borrow::Cow;
use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use url::Url;

/// Represents whether the client should fail to load when metadata is expired
/// (`Safe`) or whether it should ignore expired metadata (`Unsafe`). Only use
/// `Unsafe` if you are sure you need it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirationEnforcement {
    /// Expirations will be enforced. You MUST use this option to get the
    /// framework's security guarantees.
    Safe,

    /// Expirations will not be enforced. This is available for certain
    /// offline use cases, does NOT provide the framework's security
    /// guarantees, and should only be used if you are sure that you need it.
    Unsafe,
}

/// `ExpirationEnforcement` defaults to `Safe` mode.
impl Default for ExpirationEnforcement {
    fn default() -> Self {
        ExpirationEnforcement::Safe
    }
}

/// Limits used when fetching repository metadata and walking delegations.
///
/// The size limits are implemented to prevent endless data attacks. Clients
/// must ensure these values are set higher than what would reasonably be
/// expected by a repository, but not so high that the amount of data could
/// interfere with the system.
///
/// The [`Default`] implementation sets the following values:
/// * `max_root_length`: 1 MiB
/// * `max_timestamp_length`: 1 MiB
/// * `max_snapshot_length`: 10 MiB
/// * `max_targets_length`: 10 MiB
/// * `max_root_rotations`: 256
/// * `max_delegations`: 32
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// The maximum allowable size in bytes for downloaded root metadata.
    pub max_root_length: u64,

    /// The maximum allowable size in bytes for downloaded timestamp
    /// metadata.
    pub max_timestamp_length: u64,

    /// The maximum allowable size in bytes for downloaded snapshot metadata
    /// **if** its size is not listed in the timestamp metadata.
    pub max_snapshot_length: u64,

    /// The maximum allowable size in bytes for downloaded targets metadata
    /// **if** its size is not listed in the snapshot metadata.
    pub max_targets_length: u64,

    /// The maximum number of root updates to apply in one refresh.
    pub max_root_rotations: u64,

    /// The bound on delegation traversal: visiting more roles than this
    /// fails the target search.
    pub max_delegations: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_root_length: 1024 * 1024,          // 1 MiB
            max_timestamp_length: 1024 * 1024,     // 1 MiB
            max_snapshot_length: 1024 * 1024 * 10, // 10 MiB
            max_targets_length: 1024 * 1024 * 10,  // 10 MiB
            max_root_rotations: 256,
            max_delegations: 32,
        }
    }
}

/// Repository settings, provided to [`Updater::load`].
#[derive(Debug)]
pub struct Settings<R: Read> {
    /// A reader for the trusted root metadata file, which you must ship with
    /// your software using an out-of-band process. It should be a copy of the
    /// most recent root.json from your repository. (It's okay if it becomes
    /// out of date later; the client establishes trust up to the most recent
    /// root.json file.)
    pub root: R,

    /// A directory on a persistent filesystem where fetched metadata is
    /// cached to detect version rollback across update cycles. When `None`,
    /// a temporary directory is used.
    pub local_metadata_dir: Option<PathBuf>,

    /// A directory where downloaded targets are cached, mirroring the remote
    /// layout. When `None`, a temporary directory is used.
    pub local_targets_dir: Option<PathBuf>,

    /// The URL base for repository metadata (such as timestamp.json).
    pub remote_metadata_url: String,

    /// The URL base for target files.
    pub remote_targets_url: String,

    /// Limits used when fetching repository metadata.
    pub limits: Limits,

    /// When the repository uses consistent snapshots, prepend each target's
    /// first listed hash to the basename of its download URL. Defaults to
    /// true in [`Settings::default_flags`].
    pub prefix_targets_with_hash: bool,

    /// Disables reading and writing the local metadata and targets caches.
    pub disable_local_cache: bool,

    /// Metadata expiration enforcement.
    ///
    /// CAUTION: metadata expiration dates, particularly timestamp.json, are
    /// designed to limit a replay attack window. By setting this to
    /// `Unsafe`, you are disabling that defense.
    pub expiration_enforcement: ExpirationEnforcement,
}

impl<R: Read> Settings<R> {
    /// Creates settings with the given root and URLs and the default values
    /// for everything else: temporary cache directories, default limits,
    /// hash-prefixed target URLs, caching enabled, and safe expiration
    /// enforcement.
    pub fn default_flags(root: R, remote_metadata_url: &str, remote_targets_url: &str) -> Self {
        Self {
            root,
            local_metadata_dir: None,
            local_targets_dir: None,
            remote_metadata_url: remote_metadata_url.to_string(),
            remote_targets_url: remote_targets_url.to_string(),
            limits: Limits::default(),
            prefix_targets_with_hash: true,
            disable_local_cache: false,
            expiration_enforcement: ExpirationEnforcement::Safe,
        }
    }
}

/// A target located through delegation resolution: the resolved role, the
/// target path it was requested under, and the target file description.
#[derive(Debug, Clone)]
pub struct TargetInfo {
    /// The target path this description was resolved for.
    pub path: String,

    /// The name of the targets role whose metadata describes the target.
    pub role: String,

    /// The target file description: length, hashes, and custom data.
    pub target: Target,
}

/// A TUF repository client for a single repository.
///
/// Loading an `Updater` runs the full refresh workflow: the root update
/// chain, then timestamp, snapshot, and top-level targets verification.
/// Delegated targets roles are loaded lazily during target resolution.
#[derive(Debug)]
pub struct Updater {
    transport: Box<dyn Transport>,
    trusted: Complete,
    datastore: Datastore,
    targets_store: Option<Datastore>,
    limits: Limits,
    metadata_base_url: Url,
    targets_base_url: Url,
    prefix_targets_with_hash: bool,
    consistent_snapshot: bool,
}

impl Updater {
    /// Loads and verifies the repository's metadata, running the refresh
    /// workflow to completion. A failure at any stage aborts the load; the
    /// local cache keeps whatever earlier stages already persisted.
    pub fn load<R: Read>(transport: Box<dyn Transport>, mut settings: Settings<R>) -> Result<Self> {
        let metadata_base_url = parse_url(&settings.remote_metadata_url)?;
        let targets_base_url = parse_url(&settings.remote_targets_url)?;

        let (metadata_dir, targets_dir) = if settings.disable_local_cache {
            (None, None)
        } else {
            (
                settings.local_metadata_dir.take(),
                Some(settings.local_targets_dir.take()),
            )
        };
        let datastore = Datastore::new(metadata_dir)?;
        let targets_store = match targets_dir {
            Some(dir) => Some(Datastore::new(dir)?),
            None => None,
        };

        // The reference time for this update cycle, guarded against a
        // backwards-stepping system clock.
        let ref_time = datastore.system_time()?;
        let enforcement = settings.expiration_enforcement;

        let mut root_bytes = Vec::new();
        settings
            .root
            .read_to_end(&mut root_bytes)
            .context(error::TrustedRootReadSnafu)?;

        let mut state = RootOnly::load(&root_bytes, ref_time, enforcement)?;

        // Key sets before the root chain walk, for fast-forward recovery.
        let original_timestamp_keys: Vec<Key> = state
            .root()
            .signed
            .keys(RoleType::Timestamp)
            .cloned()
            .collect();
        let original_snapshot_keys: Vec<Key> = state
            .root()
            .signed
            .keys(RoleType::Snapshot)
            .cloned()
            .collect();

        // Walk the root version chain: fetch root.<N+1>.json, root.<N+2>.json,
        // ... applying each incrementally. The first file-not-found ends the
        // walk; a verification failure aborts the refresh.
        let original_root_version = state.root().signed.version.get();
        loop {
            let version = state.root().signed.version.get();
            if version >= original_root_version + settings.limits.max_root_rotations {
                warn!(
                    "not updating root past {} versions from where we started",
                    settings.limits.max_root_rotations
                );
                break;
            }
            let path = format!("root.{}.json", version + 1);
            let url = join_url(&metadata_base_url, &path)?;
            match fetch_bytes(
                transport.as_ref(),
                url,
                settings.limits.max_root_length,
                "max_root_length argument",
            ) {
                Err(err) => {
                    debug!("ending root update walk at version {}: {}", version, err);
                    break;
                }
                Ok(bytes) => {
                    state.update_root(&bytes)?;
                    datastore.create_bytes("root.json", &bytes)?;
                }
            }
        }

        // If the timestamp or snapshot keys were rotated, delete the cached
        // timestamp and snapshot metadata to recover from a fast-forward
        // attack.
        if original_timestamp_keys
            .iter()
            .ne(state.root().signed.keys(RoleType::Timestamp))
            || original_snapshot_keys
                .iter()
                .ne(state.root().signed.keys(RoleType::Snapshot))
        {
            debug!("timestamp or snapshot keys rotated; dropping cached metadata");
            let r1 = datastore.remove("timestamp.json");
            let r2 = datastore.remove("snapshot.json");
            r1.and(r2)?;
        }

        let consistent_snapshot = state.root().signed.consistent_snapshot;

        // Timestamp: prime rollback state from the cache, then always fetch
        // the remote file for freshness.
        let primed = match datastore.bytes("timestamp.json")? {
            Some(bytes) => match state.update_timestamp(&bytes) {
                Ok(primed) => Some(primed),
                Err(err) => {
                    debug!("ignoring cached timestamp.json: {}", err);
                    None
                }
            },
            None => None,
        };
        let timestamp_bytes = fetch_bytes(
            transport.as_ref(),
            join_url(&metadata_base_url, "timestamp.json")?,
            settings.limits.max_timestamp_length,
            "max_timestamp_length argument",
        )?;
        let state = match &primed {
            Some(primed) => primed.update_timestamp(&timestamp_bytes)?,
            None => state.update_timestamp(&timestamp_bytes)?,
        };
        datastore.create_bytes("timestamp.json", &timestamp_bytes)?;

        // Snapshot: a cached file that still satisfies the timestamp's
        // claims is current and saves a fetch; otherwise fetch the (possibly
        // version-prefixed) remote file, capped at the claimed length.
        let snapshot_meta = state
            .timestamp()
            .signed
            .meta
            .get("snapshot.json")
            .context(error::MetaMissingSnafu {
                file: "snapshot.json",
                role: RoleType::Timestamp,
            })?;
        let snapshot_version = snapshot_meta.version.get();
        let snapshot_length = snapshot_meta
            .length
            .unwrap_or(settings.limits.max_snapshot_length)
            .min(settings.limits.max_snapshot_length);
        let primed = match datastore.bytes("snapshot.json")? {
            Some(bytes) => match state.update_snapshot(&bytes, true) {
                Ok(primed) => Some(primed),
                Err(err) => {
                    debug!("ignoring cached snapshot.json: {}", err);
                    None
                }
            },
            None => None,
        };
        let state = match primed {
            // The cached snapshot already satisfies the timestamp's claim;
            // nothing newer to fetch.
            Some(primed) if primed.snapshot().signed.version == snapshot_meta.version => primed,
            primed => {
                let path = if consistent_snapshot {
                    format!("{}.snapshot.json", snapshot_version)
                } else {
                    "snapshot.json".to_string()
                };
                let bytes = fetch_bytes(
                    transport.as_ref(),
                    join_url(&metadata_base_url, &path)?,
                    snapshot_length,
                    "snapshot length from timestamp.json",
                )?;
                // Apply on top of the primed state when there is one, so the
                // continuity checks run against the cached snapshot.
                let state = match &primed {
                    Some(primed) => primed.update_snapshot(&bytes, false)?,
                    None => state.update_snapshot(&bytes, false)?,
                };
                datastore.create_bytes("snapshot.json", &bytes)?;
                state
            }
        };

        // Top-level targets, by the same cache-first logic.
        let targets_meta = state
            .snapshot()
            .signed
            .meta
            .get("targets.json")
            .context(error::MetaMissingSnafu {
                file: "targets.json",
                role: RoleType::Snapshot,
            })?;
        let targets_version = targets_meta.version.get();
        let targets_length = targets_meta
            .length
            .unwrap_or(settings.limits.max_targets_length)
            .min(settings.limits.max_targets_length);
        let primed = match datastore.bytes("targets.json")? {
            Some(bytes) => {
                match state.update_delegated_targets(&bytes, TOP_LEVEL_TARGETS, ROOT_DELEGATOR) {
                    Ok(primed) => Some(primed),
                    Err(err) => {
                        debug!("ignoring cached targets.json: {}", err);
                        None
                    }
                }
            }
            None => None,
        };
        let trusted = match primed {
            Some(primed) => primed,
            None => {
                let path = if consistent_snapshot {
                    format!("{}.targets.json", targets_version)
                } else {
                    "targets.json".to_string()
                };
                let bytes = fetch_bytes(
                    transport.as_ref(),
                    join_url(&metadata_base_url, &path)?,
                    targets_length,
                    "targets length from snapshot.json",
                )?;
                let trusted =
                    state.update_delegated_targets(&bytes, TOP_LEVEL_TARGETS, ROOT_DELEGATOR)?;
                datastore.create_bytes("targets.json", &bytes)?;
                trusted
            }
        };

        Ok(Self {
            transport,
            trusted,
            datastore,
            targets_store,
            limits: settings.limits,
            metadata_base_url,
            targets_base_url,
            prefix_targets_with_hash: settings.prefix_targets_with_hash,
            consistent_snapshot,
        })
    }

    /// Returns a reference to the trusted root envelope.
    pub fn root(&self) -> &Signed<Root> {
        self.trusted.root()
    }

    /// Returns a reference to the trusted timestamp envelope.
    pub fn timestamp(&self) -> &Signed<Timestamp> {
        self.trusted.timestamp()
    }

    /// Returns a reference to the trusted snapshot envelope.
    pub fn snapshot(&self) -> &Signed<Snapshot> {
        self.trusted.snapshot()
    }

    /// Returns a reference to the trusted top-level targets envelope.
    pub fn targets(&self) -> &Signed<Targets> {
        self.trusted.targets()
    }

    /// Returns the named targets role's envelope if it has been loaded.
    pub fn delegated_targets(&self, name: &str) -> Option<&Signed<Targets>> {
        self.trusted.delegated_targets(name)
    }

    /// Searches for metadata about `target_path` with a pre-order
    /// depth-first walk over the delegation graph, fetching and verifying
    /// delegated targets metadata as it goes.
    ///
    /// Returns `Ok(None)` if the walk completes without finding the target.
    pub fn get_target_info(&mut self, target_path: &str) -> Result<Option<TargetInfo>> {
        let mut stack: Vec<(String, String)> = vec![(
            TOP_LEVEL_TARGETS.to_string(),
            ROOT_DELEGATOR.to_string(),
        )];
        let mut visited: HashSet<String> = HashSet::new();

        loop {
            if stack.is_empty() {
                return Ok(None);
            }
            ensure!(
                visited.len() + stack.len() < self.limits.max_delegations,
                error::MaxDelegationsExceededSnafu {
                    max_delegations: self.limits.max_delegations,
                }
            );
            let (role, delegator) = stack.pop().expect("stack is non-empty");
            if visited.contains(&role) {
                continue;
            }

            if !self.trusted.contains_role(&role) {
                self.load_delegated_role(&role, &delegator)?;
            }
            let targets = self
                .trusted
                .delegated_targets(&role)
                .expect("role was just loaded");

            if let Some(target) = targets.signed.targets.get(target_path) {
                debug!("found target '{}' in role '{}'", target_path, role);
                return Ok(Some(TargetInfo {
                    path: target_path.to_string(),
                    role,
                    target: target.clone(),
                }));
            }

            visited.insert(role.clone());

            if let Some(delegations) = &targets.signed.delegations {
                let mut matched = Vec::new();
                for delegated_role in &delegations.roles {
                    if delegated_role.paths.matched_target(target_path) {
                        matched.push((delegated_role.name.clone(), role.clone()));
                        // A terminating role that matches cuts off the rest
                        // of this role's list; roles already on the stack are
                        // unaffected.
                        if delegated_role.terminating {
                            break;
                        }
                    }
                }
                // Reversed so that the first-declared child is popped first.
                for entry in matched.into_iter().rev() {
                    stack.push(entry);
                }
            }
        }
    }

    /// Fetches, verifies, and installs a delegated targets role.
    fn load_delegated_role(&mut self, role: &str, delegator: &str) -> Result<()> {
        let filename = format!("{}.json", role);
        let role_meta = self
            .trusted
            .snapshot()
            .signed
            .meta
            .get(&filename)
            .context(error::MetaMissingSnafu {
                file: filename.clone(),
                role: RoleType::Snapshot,
            })?;
        let max_length = role_meta
            .length
            .unwrap_or(self.limits.max_targets_length)
            .min(self.limits.max_targets_length);
        let path = if self.consistent_snapshot {
            format!("{}.{}.json", role_meta.version, encode_filename(role))
        } else {
            format!("{}.json", encode_filename(role))
        };
        let bytes = fetch_bytes(
            self.transport.as_ref(),
            join_url(&self.metadata_base_url, &path)?,
            max_length,
            "targets length from snapshot.json",
        )?;
        self.trusted
            .update_delegated_targets(&bytes, role, delegator)?;
        self.datastore
            .create_bytes(&format!("{}.json", encode_filename(role)), &bytes)?;
        Ok(())
    }

    /// Downloads a target, verifies its length and hashes, and (unless the
    /// local cache is disabled) persists it.
    ///
    /// The remote path is the target's declared path; when the repository
    /// uses consistent snapshots and `prefix_targets_with_hash` is set, the
    /// basename is prefixed with the target's first listed hash. `dest_path`
    /// overrides the cache location for this download; `base_url` overrides
    /// the configured targets base URL.
    pub fn download_target(
        &self,
        info: &TargetInfo,
        dest_path: Option<&Path>,
        base_url: Option<&str>,
    ) -> Result<Vec<u8>> {
        let base = match base_url {
            Some(url) => parse_url(url)?,
            None => self.targets_base_url.clone(),
        };
        let segments = safe_target_path(&info.path)?;
        let url = join_url(&base, &self.remote_target_path(&segments, &info.target))?;

        let bytes = fetch_bytes(
            self.transport.as_ref(),
            url,
            info.target.length,
            "target length from metadata",
        )?;
        integrity::verify_target(&bytes, &info.target, &info.path)?;

        if let Some(dest) = dest_path {
            let dir = dest.parent().context(error::NoFileNameSnafu { path: dest })?;
            let file = dest.file_name().context(error::NoFileNameSnafu { path: dest })?;
            std::fs::create_dir_all(dir).context(error::DirCreateSnafu { path: dir })?;
            datastore::atomic_write(dir, Path::new(file), &bytes)?;
        } else if let Some(store) = &self.targets_store {
            store.create_bytes(&info.path, &bytes)?;
        }

        Ok(bytes)
    }

    /// Reads a previously cached target and verifies it against the target
    /// description. Returns `None` when the file is absent or does not
    /// verify.
    pub fn find_cached_target(
        &self,
        info: &TargetInfo,
        dest_path: Option<&Path>,
    ) -> Result<Option<Vec<u8>>> {
        safe_target_path(&info.path)?;
        let bytes = match dest_path {
            Some(dest) => std::fs::read(dest).ok(),
            None => match &self.targets_store {
                Some(store) => store.bytes(&info.path)?,
                None => None,
            },
        };
        Ok(bytes.filter(|bytes| {
            integrity::verify_target(bytes, &info.target, &info.path).is_ok()
        }))
    }

    /// The repository-relative download path for a target, hash-prefixed
    /// when consistent snapshots are in use.
    fn remote_target_path(&self, segments: &[&str], target: &Target) -> String {
        let mut encoded: Vec<Cow<'_, str>> = segments
            .iter()
            .map(|segment| Cow::from(encode_filename(segment)))
            .collect();
        if self.consistent_snapshot && self.prefix_targets_with_hash {
            if let Some(hash) = target.hashes.primary() {
                let basename = encoded.pop().unwrap_or_default();
                encoded.push(Cow::from(format!("{}.{}", hash, basename)));
            }
        }
        encoded.join("/")
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Characters percent-encoded when a name becomes a single filename or URL
/// path segment.
const FILENAME_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b'/')
    .add(b'\\')
    .add(b'%')
    .add(b'?')
    .add(b'#')
    .add(b'"');

/// Percent-encodes a name so it is safe as a single path component.
pub(crate) fn encode_filename(name: &str) -> String {
    utf8_percent_encode(name, FILENAME_ENCODE_SET).to_string()
}

/// Splits a target path into segments, rejecting absolute paths and any
/// `.`/`..`/empty components that could escape the targets directory or URL
/// namespace.
pub(crate) fn safe_target_path(path: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = path.split('/').collect();
    let safe = !path.starts_with('/')
        && !segments
            .iter()
            .any(|segment| segment.is_empty() || *segment == "." || *segment == "..");
    ensure!(safe, error::UnsafeTargetPathSnafu { path });
    Ok(segments)
}

pub(crate) fn parse_url(url: &str) -> Result<Url> {
    let mut url = Cow::from(url);
    if !url.ends_with('/') {
        url.to_mut().push('/');
    }
    Url::parse(&url).context(error::ParseUrlSnafu { url })
}

pub(crate) fn join_url(base: &Url, path: &str) -> Result<Url> {
    base.join(path).context(error::JoinUrlSnafu {
        path,
        url: base.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::{parse_url, safe_target_path, ExpirationEnforcement};

    // Check if a url with a trailing slash and one without trailing slash
    // can both be parsed
    #[test]
    fn url_missing_trailing_slash() {
        let parsed_url_without_trailing_slash = parse_url("https://example.org/a/b/c").unwrap();
        let parsed_url_with_trailing_slash = parse_url("https://example.org/a/b/c/").unwrap();
        assert_eq!(
            parsed_url_without_trailing_slash,
            parsed_url_with_trailing_slash
        );
    }

    #[test]
    fn unsafe_target_paths_are_rejected() {
        assert!(safe_target_path("bin/app").is_ok());
        assert!(safe_target_path("/etc/passwd").is_err());
        assert!(safe_target_path("bin/../../etc/passwd").is_err());
        assert!(safe_target_path("bin//app").is_err());
        assert!(safe_target_path("./app").is_err());
    }

    #[test]
    fn expiration_enforcement_defaults_to_safe() {
        assert_eq!(ExpirationEnforcement::default(), ExpirationEnforcement::Safe);
    }
}
