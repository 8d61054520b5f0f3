//! Provides the metadata schema objects: the signed envelopes for the root,
//! timestamp, snapshot, and targets roles, plus keys, delegations, and path
//! patterns.

mod de;
pub mod decoded;
mod error;
mod iter;
pub mod key;
mod spki;
mod verify;

pub use crate::schema::error::{Error, Result};

use crate::schema::decoded::{Decoded, Hex};
use crate::schema::iter::KeysIter;
use crate::schema::key::Key;
use crate::sign::Sign;
use aws_lc_rs::digest::{digest, Context, SHA256};
use chrono::{DateTime, Utc};
use globset::GlobBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_plain::{forward_display_to_serde, forward_from_str_to_serde};
use snafu::ResultExt;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::num::NonZeroU64;
use std::path::Path;
use sturdy_cjson::CanonicalFormatter;

/// The type of metadata role.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RoleType {
    /// The root role delegates trust to specific keys trusted for all other
    /// top-level roles used in the system.
    Root,
    /// The snapshot role signs a metadata file that provides information
    /// about the latest version of all targets metadata on the repository.
    Snapshot,
    /// The targets role's signature indicates which target files are trusted
    /// by clients.
    Targets,
    /// The timestamp role is used to prevent an adversary from replaying an
    /// out-of-date signed metadata file whose signature has not yet expired.
    Timestamp,
    /// The optional mirrors role. Accepted in root metadata for
    /// compatibility; no mirrors metadata file is defined.
    Mirrors,
}

forward_display_to_serde!(RoleType);
forward_from_str_to_serde!(RoleType);

/// Common trait implemented by all roles.
pub trait Role: Serialize {
    /// The type of role this object represents.
    const TYPE: RoleType;

    /// Determines when metadata should be considered expired and no longer
    /// trusted by clients.
    fn expires(&self) -> DateTime<Utc>;

    /// An integer that is greater than 0. Clients MUST NOT replace a metadata
    /// file with a version number less than the one currently trusted.
    fn version(&self) -> NonZeroU64;

    /// The deterministic serialization of this role: the exact byte sequence
    /// over which signatures are computed and verified.
    fn canonical_form(&self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut data, CanonicalFormatter::new());
        self.serialize(&mut ser)
            .context(error::JsonSerializationSnafu { what: "role" })?;
        Ok(data)
    }

    /// The filename this role is stored under, version-prefixed when
    /// consistent snapshots are in use. Root and timestamp filenames never
    /// carry a version prefix; the root version history uses its own
    /// `root.<version>.json` naming.
    fn filename(&self, consistent_snapshot: bool) -> String {
        match Self::TYPE {
            RoleType::Root => "root.json".to_string(),
            RoleType::Timestamp => "timestamp.json".to_string(),
            _ => {
                if consistent_snapshot {
                    format!("{}.{}.json", self.version(), Self::TYPE)
                } else {
                    format!("{}.json", Self::TYPE)
                }
            }
        }
    }
}

/// A signed metadata object.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Signed<T> {
    /// The role that is signed.
    pub signed: T,
    /// A list of signatures and their key IDs.
    pub signatures: Vec<Signature>,
}

impl<T: Role> Signed<T> {
    /// Whether the signed role is expired at `ref_time`. A role is accepted
    /// only while its expiration is strictly in the future.
    pub fn is_expired(&self, ref_time: DateTime<Utc>) -> bool {
        self.signed.expires() <= ref_time
    }
}

/// A signature and the key ID that made it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Signature {
    /// The key ID (listed in root.json) that made this signature.
    pub keyid: Decoded<Hex>,
    /// A hex-encoded signature of the canonical JSON form of a role.
    pub sig: Decoded<Hex>,
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The root metadata file, signed by the root role's keys. It indicates which
/// keys are authorized for all top-level roles, including the root role
/// itself.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "root")]
pub struct Root {
    /// The version of the metadata specification this file follows. Only
    /// major version 1 is understood.
    #[serde(deserialize_with = "de::spec_version")]
    pub spec_version: String,

    /// Whether the repository supports consistent snapshots. When true,
    /// snapshot, targets-role, and target filenames carry a version number or
    /// digest so that coexisting versions cannot collide.
    pub consistent_snapshot: bool,

    /// An integer that is greater than 0. Clients MUST NOT replace a metadata
    /// file with a version number less than the one currently trusted.
    pub version: NonZeroU64,

    /// Determines when metadata should be considered expired and no longer
    /// trusted by clients.
    pub expires: DateTime<Utc>,

    /// All keys known to the root role, addressed by key ID. Key IDs are
    /// recalculated and checked against this listing during deserialization.
    #[serde(deserialize_with = "de::deserialize_keys")]
    pub keys: HashMap<Decoded<Hex>, Key>,

    /// The key IDs and signature threshold for each top-level role.
    pub roles: HashMap<RoleType, RoleKeys>,

    /// Extra arguments found during deserialization.
    ///
    /// We must store these to correctly verify signatures for this object.
    ///
    /// If you're instantiating this struct, you should make this
    /// `HashMap::new()`.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

/// The key IDs used for a role and the threshold of signatures required to
/// validate it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RoleKeys {
    /// The key IDs used for the role.
    pub keyids: Vec<Decoded<Hex>>,

    /// The threshold of signatures required to validate the role.
    pub threshold: NonZeroU64,

    /// Extra arguments found during deserialization.
    ///
    /// If you're instantiating this struct, you should make this
    /// `HashMap::new()`.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Root {
    /// An iterator over the keys for a given role.
    pub fn keys(&self, role: RoleType) -> impl Iterator<Item = &Key> {
        KeysIter {
            keyids_iter: match self.roles.get(&role) {
                Some(role_keys) => role_keys.keyids.iter(),
                None => [].iter(),
            },
            keys: &self.keys,
        }
    }

    /// Given an object/key that impls `Sign`, return the corresponding key ID
    /// from this root.
    pub fn key_id(&self, key_pair: &dyn Sign) -> Option<Decoded<Hex>> {
        for (key_id, key) in &self.keys {
            if key_pair.tuf_key() == *key {
                return Some(key_id.clone());
            }
        }
        None
    }
}

impl Role for Root {
    const TYPE: RoleType = RoleType::Root;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The timestamp metadata file. It indicates the latest version of the
/// snapshot metadata and is frequently resigned to limit the amount of time a
/// client can be kept unaware of interference with obtaining updates.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "timestamp")]
pub struct Timestamp {
    /// The version of the metadata specification this file follows.
    #[serde(deserialize_with = "de::spec_version")]
    pub spec_version: String,

    /// An integer that is greater than 0. Clients MUST NOT replace a metadata
    /// file with a version number less than the one currently trusted.
    pub version: NonZeroU64,

    /// Determines when metadata should be considered expired and no longer
    /// trusted by clients.
    pub expires: DateTime<Utc>,

    /// Metadata file descriptions; for timestamp metadata this holds exactly
    /// one entry, for `snapshot.json`.
    pub meta: HashMap<String, FileMeta>,

    /// Extra arguments found during deserialization.
    ///
    /// If you're instantiating this struct, you should make this
    /// `HashMap::new()`.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

impl Timestamp {
    /// Creates a new `Timestamp` with an empty meta map.
    pub fn new(spec_version: String, version: NonZeroU64, expires: DateTime<Utc>) -> Self {
        Self {
            spec_version,
            version,
            expires,
            meta: HashMap::new(),
            _extra: HashMap::new(),
        }
    }
}

impl Role for Timestamp {
    const TYPE: RoleType = RoleType::Timestamp;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

/// Describes another metadata file: its version, and optionally its length in
/// bytes and its hashes.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FileMeta {
    /// The integer length in bytes of the described metadata file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,

    /// One or more hashes of the described metadata file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashes: Option<Hashes>,

    /// An integer that is greater than 0. Clients MUST NOT replace a metadata
    /// file with a version number less than the one currently trusted.
    pub version: NonZeroU64,

    /// Extra arguments found during deserialization.
    ///
    /// If you're instantiating this struct, you should make this
    /// `HashMap::new()`.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

/// A table of digests keyed by algorithm. Algorithms other than SHA-256 and
/// SHA-512 are carried opaquely and skipped during verification.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Hashes {
    /// The SHA-256 digest, in lower hex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<Decoded<Hex>>,

    /// The SHA-512 digest, in lower hex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha512: Option<Decoded<Hex>>,

    /// Digests under algorithms this implementation does not compute.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Hashes {
    /// Creates a `Hashes` holding a single SHA-256 digest.
    pub fn from_sha256(sha256: Vec<u8>) -> Self {
        Self {
            sha256: Some(sha256.into()),
            sha512: None,
            _extra: HashMap::new(),
        }
    }

    /// The first listed digest: SHA-256 if present, otherwise SHA-512. Used
    /// for consistent-snapshot filename prefixes.
    pub fn primary(&self) -> Option<&Decoded<Hex>> {
        self.sha256.as_ref().or_else(|| self.sha512.as_ref())
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The snapshot metadata file. It lists the version (and optionally length
/// and hashes) of every targets metadata file on the repository.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "snapshot")]
pub struct Snapshot {
    /// The version of the metadata specification this file follows.
    #[serde(deserialize_with = "de::spec_version")]
    pub spec_version: String,

    /// An integer that is greater than 0. Clients MUST NOT replace a metadata
    /// file with a version number less than the one currently trusted.
    pub version: NonZeroU64,

    /// Determines when metadata should be considered expired and no longer
    /// trusted by clients.
    pub expires: DateTime<Utc>,

    /// A description of every targets metadata file, keyed by filename
    /// (e.g. `targets.json`, `role1.json`).
    pub meta: HashMap<String, FileMeta>,

    /// Extra arguments found during deserialization.
    ///
    /// If you're instantiating this struct, you should make this
    /// `HashMap::new()`.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

impl Snapshot {
    /// Creates a new `Snapshot` with an empty meta map.
    pub fn new(spec_version: String, version: NonZeroU64, expires: DateTime<Utc>) -> Self {
        Self {
            spec_version,
            version,
            expires,
            meta: HashMap::new(),
            _extra: HashMap::new(),
        }
    }
}

impl Role for Snapshot {
    const TYPE: RoleType = RoleType::Snapshot;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// A targets metadata file: the target files trusted by this role, and any
/// delegations of subsets of the target namespace to other roles.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "targets")]
pub struct Targets {
    /// The version of the metadata specification this file follows.
    #[serde(deserialize_with = "de::spec_version")]
    pub spec_version: String,

    /// An integer that is greater than 0. Clients MUST NOT replace a metadata
    /// file with a version number less than the one currently trusted.
    pub version: NonZeroU64,

    /// Determines when metadata should be considered expired and no longer
    /// trusted by clients.
    pub expires: DateTime<Utc>,

    /// The target files this role signs for, keyed by target path relative to
    /// the targets base URL.
    pub targets: HashMap<String, Target>,

    /// Delegations of responsibility for subsets of the targets to other
    /// roles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegations: Option<Delegations>,

    /// Extra arguments found during deserialization.
    ///
    /// If you're instantiating this struct, you should make this
    /// `HashMap::new()`.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

impl Targets {
    /// Creates a new `Targets` with no targets and no delegations.
    pub fn new(spec_version: String, version: NonZeroU64, expires: DateTime<Utc>) -> Self {
        Self {
            spec_version,
            version,
            expires,
            targets: HashMap::new(),
            delegations: None,
            _extra: HashMap::new(),
        }
    }

    /// Add a target to this role.
    pub fn add_target(&mut self, name: &str, target: Target) {
        self.targets.insert(name.to_string(), target);
    }

    /// Remove a target from this role.
    pub fn remove_target(&mut self, name: &str) -> Option<Target> {
        self.targets.remove(name)
    }
}

impl Role for Targets {
    const TYPE: RoleType = RoleType::Targets;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

/// A target file: its length, hashes, and any application-defined custom
/// metadata.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Target {
    /// The integer length in bytes of the target file.
    pub length: u64,

    /// The hashes of the target file.
    pub hashes: Hashes,

    /// Opaque application data describing the target. The framework does not
    /// interpret this.
    #[serde(default)]
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub custom: HashMap<String, Value>,

    /// Extra arguments found during deserialization.
    ///
    /// If you're instantiating this struct, you should make this
    /// `HashMap::new()`.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Target {
    /// Builds a `Target` describing the file at `path`, computing its length
    /// and SHA-256 digest.
    pub fn from_path<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        if !path.is_file() {
            return error::TargetNotAFileSnafu { path }.fail();
        }

        let mut file = File::open(path).context(error::FileOpenSnafu { path })?;
        let mut digest = Context::new(&SHA256);
        let mut buf = [0; 8 * 1024];
        let mut length = 0;
        loop {
            match file.read(&mut buf).context(error::FileReadSnafu { path })? {
                0 => break,
                n => {
                    digest.update(&buf[..n]);
                    length += n as u64;
                }
            }
        }

        Ok(Self {
            length,
            hashes: Hashes::from_sha256(digest.finish().as_ref().to_vec()),
            custom: HashMap::new(),
            _extra: HashMap::new(),
        })
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The delegations block of a targets metadata file: the keys trusted for
/// delegated roles, and the ordered list of delegated roles.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Delegations {
    /// The public keys trusted to verify signatures of delegated targets
    /// roles, addressed by key ID. These keys belong to the delegating role's
    /// metadata and are never merged into the root key space.
    #[serde(deserialize_with = "de::deserialize_keys")]
    pub keys: HashMap<Decoded<Hex>, Key>,

    /// The list of delegated roles, in declaration order. Declaration order
    /// defines delegation traversal order.
    pub roles: Vec<DelegatedRole>,
}

impl Delegations {
    /// Creates a new `Delegations` with no keys or roles.
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
            roles: Vec::new(),
        }
    }

    /// Returns the named delegated role, if this block delegates to it
    /// directly.
    pub fn role(&self, role_name: &str) -> Option<&DelegatedRole> {
        self.roles.iter().find(|role| role.name == role_name)
    }

    /// Determines whether any delegated role's path patterns cover `target`.
    pub fn target_is_delegated(&self, target: &str) -> bool {
        self.roles
            .iter()
            .any(|role| role.paths.matched_target(target))
    }

    /// Ensures every path claimed by a delegated role is covered by this
    /// delegation block.
    pub fn verify_paths(&self) -> Result<()> {
        for sub_role in &self.roles {
            for path in sub_role.paths.vec() {
                if !self.target_is_delegated(path) {
                    return error::UnmatchedPathSnafu { child: path }.fail();
                }
            }
        }
        Ok(())
    }

    /// Given an object/key that impls `Sign`, return the corresponding key ID
    /// from this delegation block.
    pub fn key_id(&self, key_pair: &dyn Sign) -> Option<Decoded<Hex>> {
        for (key_id, key) in &self.keys {
            if key_pair.tuf_key() == *key {
                return Some(key_id.clone());
            }
        }
        None
    }
}

impl Default for Delegations {
    fn default() -> Self {
        Self::new()
    }
}

/// A single delegated role: its name, its authorized keys and threshold, and
/// the target paths it is trusted for.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DelegatedRole {
    /// The name of the delegated role.
    pub name: String,

    /// The key IDs used by this role, drawn from the delegating role's key
    /// listing.
    pub keyids: Vec<Decoded<Hex>>,

    /// The threshold of signatures required to validate the role.
    pub threshold: NonZeroU64,

    /// The target paths this role is trusted for.
    #[serde(flatten)]
    pub paths: PathSet,

    /// When true and this role's paths match the searched target, delegations
    /// declared later in the same list are not considered.
    pub terminating: bool,
}

impl DelegatedRole {
    /// Returns a `RoleKeys` view of this role's keys and threshold.
    pub fn keys(&self) -> RoleKeys {
        RoleKeys {
            keyids: self.keyids.clone(),
            threshold: self.threshold,
            _extra: HashMap::new(),
        }
    }

    /// Ensures every path in `paths` is covered by this role's own patterns,
    /// i.e. that this role is allowed to delegate them onward.
    pub fn verify_paths(&self, paths: &PathSet) -> Result<()> {
        for path in paths.vec() {
            if !self.paths.matched_target(path) {
                return error::UnmatchedPathSnafu { child: path }.fail();
            }
        }
        Ok(())
    }
}

/// The target paths a delegated role controls: either glob-style patterns or
/// hashed-bin prefixes. Exactly one of the two forms is present per role.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub enum PathSet {
    /// Glob-style patterns over forward-slash target paths: `*` matches
    /// within a path segment, `**` matches across segments, and `?` matches a
    /// single non-separator character.
    #[serde(rename = "paths")]
    Paths(Vec<String>),

    /// Hashed-bin prefixes: a target path is covered when the lower-hex
    /// SHA-256 of its UTF-8 encoding starts with any listed prefix.
    #[serde(rename = "path_hash_prefixes")]
    PathHashPrefixes(Vec<String>),
}

impl PathSet {
    /// Determines whether `target` is covered by this path set.
    pub fn matched_target(&self, target: &str) -> bool {
        match self {
            Self::Paths(paths) => paths.iter().any(|path| Self::matched_path(path, target)),
            Self::PathHashPrefixes(prefixes) => prefixes
                .iter()
                .any(|prefix| Self::matched_prefix(prefix, target)),
        }
    }

    /// Determines whether the SHA-256 hex digest of `target` starts with
    /// `prefix`.
    fn matched_prefix(prefix: &str, target: &str) -> bool {
        let hash = hex::encode(digest(&SHA256, target.as_bytes()));
        hash.starts_with(prefix)
    }

    /// Determines whether `target` matches the glob `wildcardpath`. Patterns
    /// that fail to compile match nothing.
    fn matched_path(wildcardpath: &str, target: &str) -> bool {
        let glob = match GlobBuilder::new(wildcardpath)
            .literal_separator(true)
            .build()
        {
            Ok(glob) => glob.compile_matcher(),
            Err(_) => return false,
        };
        glob.is_match(target)
    }

    /// Returns the underlying pattern (or prefix) list.
    pub fn vec(&self) -> &Vec<String> {
        match self {
            Self::Paths(x) | Self::PathHashPrefixes(x) => x,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PathSet, Role, RoleType, Signed, Targets};
    use chrono::{TimeZone, Utc};
    use std::num::NonZeroU64;

    #[test]
    fn path_patterns_respect_separators() {
        let paths = PathSet::Paths(vec!["libs/*".to_string()]);
        assert!(paths.matched_target("libs/x"));
        assert!(!paths.matched_target("libs/sub/x"));
        assert!(!paths.matched_target("other/x"));

        let recursive = PathSet::Paths(vec!["libs/**".to_string()]);
        assert!(recursive.matched_target("libs/sub/deep/x"));

        let single = PathSet::Paths(vec!["foo-version-?.tgz".to_string()]);
        assert!(single.matched_target("foo-version-2.tgz"));
        assert!(!single.matched_target("foo-version-22.tgz"));
    }

    #[test]
    fn path_hash_prefixes_use_hex_digest() {
        // sha256("hello") = 2cf24dba...
        let prefixes = PathSet::PathHashPrefixes(vec!["2cf2".to_string()]);
        assert!(prefixes.matched_target("hello"));
        assert!(!prefixes.matched_target("goodbye"));
    }

    #[test]
    fn role_filenames() {
        let targets = Targets::new(
            "1.0.0".to_string(),
            NonZeroU64::new(7).unwrap(),
            Utc.with_ymd_and_hms(2038, 1, 1, 0, 0, 0).unwrap(),
        );
        assert_eq!(targets.filename(false), "targets.json");
        assert_eq!(targets.filename(true), "7.targets.json");
    }

    #[test]
    fn unknown_spec_version_is_rejected() {
        let result = serde_json::from_value::<Signed<Targets>>(serde_json::json!({
            "signed": {
                "_type": "targets",
                "spec_version": "2.0.0",
                "version": 1,
                "expires": "2038-01-01T00:00:00Z",
                "targets": {}
            },
            "signatures": []
        }));
        assert!(result.is_err());
    }

    #[test]
    fn role_type_round_trips() {
        assert_eq!(RoleType::Timestamp.to_string(), "timestamp");
        assert_eq!("mirrors".parse::<RoleType>().unwrap(), RoleType::Mirrors);
    }
}
