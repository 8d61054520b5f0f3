//! Contains the error type for this library, realizing the repository
//! client's error taxonomy: deserialization, signature verification,
//! freshness, rollback, version, integrity, delegation, transport, size-cap,
//! and configuration failures are distinct variants so callers can react to
//! the kind of failure.

use crate::schema::RoleType;
use crate::transport::TransportError;
use chrono::{DateTime, Utc};
use snafu::Snafu;
use std::path::PathBuf;
use url::Url;

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for this library.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum Error {
    /// A new root's version did not increment the trusted root's version by
    /// exactly one.
    #[snafu(display(
        "Root version did not increment by one: expected {}, fetched {}",
        expected,
        fetched
    ))]
    BadRootVersion { expected: u64, fetched: u64 },

    /// A path could not be canonicalized.
    #[snafu(display("Failed to canonicalize '{}': {}", path.display(), source))]
    AbsolutePath {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A role could not be serialized to its canonical form for signing.
    #[snafu(display("Failed to serialize {} for signing: {}", role, source))]
    CanonicalForm {
        role: String,
        source: crate::schema::Error,
    },

    /// A metadata file could not be written to the datastore.
    #[snafu(display("Failed to create datastore: {}", source))]
    DatastoreInit { source: std::io::Error },

    /// A required editor field was never set.
    #[snafu(display("Cannot sign the repository until '{}' is set", field))]
    EditorFieldMissing { field: &'static str },

    /// A datastore file could not be opened.
    #[snafu(display("Failed to open datastore file '{}': {}", path.display(), source))]
    DatastoreOpen {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A datastore file could not be read.
    #[snafu(display("Failed to read datastore file '{}': {}", path.display(), source))]
    DatastoreRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A datastore file could not be removed.
    #[snafu(display("Failed to remove datastore file '{}': {}", path.display(), source))]
    DatastoreRemove {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A value could not be serialized for the datastore.
    #[snafu(display("Failed to serialize {}: {}", what, source))]
    DatastoreSerialize {
        what: String,
        source: serde_json::Error,
    },

    /// A delegated role referenced a delegator that has not been loaded.
    #[snafu(display("Delegated role's delegator '{}' is not loaded", name))]
    DelegateMissing { name: String },

    /// A directory could not be created.
    #[snafu(display("Failed to create directory '{}': {}", path.display(), source))]
    DirCreate {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Trusted metadata has expired relative to this update cycle's
    /// reference time.
    #[snafu(display("Role '{}' is expired", role))]
    ExpiredMetadata { role: RoleType },

    /// Reading a fetched response body failed.
    #[snafu(display("Failed to read response body from '{}': {}", url, source))]
    FetchRead { url: Url, source: std::io::Error },

    /// A file could not be opened.
    #[snafu(display("Failed to open '{}': {}", path.display(), source))]
    FileOpen {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A JSON file could not be parsed.
    #[snafu(display("Failed to parse '{}': {}", path.display(), source))]
    FileParseJson {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// A file could not be read.
    #[snafu(display("Failed to read '{}': {}", path.display(), source))]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A file could not be renamed.
    #[snafu(display("Failed to rename '{}' to '{}': {}", from.display(), to.display(), source))]
    FileRename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },

    /// A file could not be written.
    #[snafu(display("Failed to write '{}': {}", path.display(), source))]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A fetched or cached body's digest did not match any claimed digest.
    #[snafu(display(
        "Hash mismatch for {}: calculated {}, expected {}",
        context,
        calculated,
        expected
    ))]
    HashMismatch {
        context: String,
        calculated: String,
        expected: String,
    },

    /// A fetched or cached body's metadata declared no supported digests.
    #[snafu(display("No supported hashes declared for {}", context))]
    MissingHashes { context: String },

    /// The HTTP client could not be built.
    #[cfg(feature = "http")]
    #[snafu(display("Failed to build HTTP client for '{}': {}", url, source))]
    HttpClientBuild { url: Url, source: reqwest::Error },

    /// An HTTP request failed with a non-retryable error.
    #[cfg(feature = "http")]
    #[snafu(display("Failed to fetch '{}': {}", url, source))]
    HttpFetch { url: Url, source: reqwest::Error },

    /// An HTTP header value could not be constructed.
    #[cfg(feature = "http")]
    #[snafu(display("Invalid header value '{}': {}", header_value, source))]
    HttpHeader {
        header_value: String,
        source: reqwest::header::InvalidHeaderValue,
    },

    /// An HTTP request could not be built.
    #[cfg(feature = "http")]
    #[snafu(display("Failed to build request for '{}': {}", url, source))]
    HttpRequestBuild { url: Url, source: reqwest::Error },

    /// An HTTP request kept failing after the configured number of tries.
    #[cfg(feature = "http")]
    #[snafu(display("Failed to fetch '{}' after {} tries: {}", url, tries, source))]
    HttpRetries {
        url: Url,
        tries: u32,
        source: reqwest::Error,
    },

    /// A delegated role claims paths its delegator does not own.
    #[snafu(display("Role '{}' may not delegate the requested paths: {}", name, source))]
    InvalidPathPermission {
        name: String,
        source: crate::schema::Error,
    },

    /// A target path on disk is neither a regular file nor a symlink.
    #[snafu(display("Unknown file type at '{}'", path.display()))]
    InvalidFileType { path: PathBuf },

    /// A path could not be joined onto a base URL.
    #[snafu(display("Failed to join '{}' to URL '{}': {}", path, url, source))]
    JoinUrl {
        path: String,
        url: Url,
        source: url::ParseError,
    },

    /// A signing key could not be obtained from a key source.
    #[snafu(display("Failed to get keypair from key source: {}", source))]
    KeyPairFromKeySource {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// A key ID could not be derived from a public key.
    #[snafu(display("Failed to derive a key ID: {}", source))]
    KeyId { source: crate::schema::Error },

    /// A key was rejected by the cryptographic library.
    #[snafu(display("Key rejected: {}", source))]
    KeyRejected {
        source: aws_lc_rs::error::KeyRejected,
    },

    /// This key source cannot store keys.
    #[snafu(display("This key source is read-only"))]
    KeySourceReadOnly,

    /// A key was not in any recognized format.
    #[snafu(display("Unrecognized private key format"))]
    KeyUnrecognized,

    /// A symlink could not be created.
    #[snafu(display("Failed to create symlink at '{}': {}", path.display(), source))]
    LinkCreate {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Delegation traversal visited more roles than the configured bound.
    #[snafu(display("Delegation traversal exceeded {} roles", max_delegations))]
    MaxDelegationsExceeded { max_delegations: usize },

    /// A response exceeded its configured size cap.
    #[snafu(display("Size limit of {} bytes ({}) exceeded", max_size, specifier))]
    MaxSizeExceeded {
        max_size: u64,
        specifier: &'static str,
    },

    /// A metadata file expected to be described by another role's meta table
    /// was absent.
    #[snafu(display("Meta for '{}' missing from {} metadata", file, role))]
    MetaMissing { file: String, role: RoleType },

    /// A targets role has no delegations but was named as a delegator.
    #[snafu(display("Role '{}' does not delegate", name))]
    NoDelegations { name: String },

    /// No signers were supplied for a role that must be signed.
    #[snafu(display("No signing keys provided for role '{}'", role))]
    NoSigners { role: String },

    /// A path has no filename component.
    #[snafu(display("Path '{}' has no filename component", path.display()))]
    NoFileName { path: PathBuf },

    /// A version went backwards relative to trusted metadata.
    #[snafu(display(
        "Found version {} of {} metadata when we had previously fetched version {}",
        new_version,
        role,
        current_version
    ))]
    OlderMetadata {
        role: RoleType,
        current_version: u64,
        new_version: u64,
    },

    /// Metadata could not be parsed.
    #[snafu(display("Failed to parse {} metadata: {}", role, source))]
    ParseMetadata {
        role: RoleType,
        source: serde_json::Error,
    },

    /// The initial trusted root could not be parsed.
    #[snafu(display("Failed to parse trusted root metadata: {}", source))]
    ParseTrustedMetadata { source: serde_json::Error },

    /// A base URL could not be parsed.
    #[snafu(display("Failed to parse URL '{}': {}", url, source))]
    ParseUrl { url: String, source: url::ParseError },

    /// A target file already exists where the writer was asked to fail on
    /// conflicts.
    #[snafu(display("Target already exists at '{}'", path.display()))]
    PathExistsFail { path: PathBuf },

    /// A path is not valid UTF-8.
    #[snafu(display("Path '{}' is not valid UTF-8", path.display()))]
    PathUtf8 { path: PathBuf },

    /// A file read back after an atomic write did not match the intended
    /// payload.
    #[snafu(display("Written file '{}' does not match its intended contents", path.display()))]
    PersistVerify { path: PathBuf },

    /// An existing target file could not be removed before replacement.
    #[snafu(display("Failed to remove '{}': {}", path.display(), source))]
    RemoveTarget {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A repository named in a mapping is not defined in the map document.
    #[snafu(display("Repository '{}' is not defined in the map document", name))]
    RepositoryNotInMap { name: String },

    /// A signed envelope could not be serialized.
    #[snafu(display("Failed to serialize signed {} metadata: {}", role, source))]
    SerializeRole {
        role: String,
        source: serde_json::Error,
    },

    /// A signing operation through a key source failed.
    #[snafu(display("Failed to sign message: {}", source))]
    SignMessage {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// An RSA or ECDSA signing operation failed.
    #[snafu(display("Failed to sign message"))]
    Sign {
        source: aws_lc_rs::error::Unspecified,
    },

    /// A fetched or cached body's length did not match the claimed length.
    #[snafu(display(
        "Size mismatch for {}: expected {} bytes, got {}",
        context,
        expected,
        actual
    ))]
    SizeMismatch {
        context: String,
        expected: u64,
        actual: u64,
    },

    /// A filename present in trusted snapshot metadata disappeared from the
    /// new snapshot metadata.
    #[snafu(display("File '{}' was removed from snapshot metadata", file))]
    SnapshotFileRemoved { file: String },

    /// The system clock stepped backward relative to the persisted latest
    /// known time.
    #[snafu(display(
        "System time stepped backward: system time '{}', last known time '{}'",
        sys_time,
        latest_known_time
    ))]
    SystemTimeSteppedBackward {
        sys_time: DateTime<Utc>,
        latest_known_time: DateTime<Utc>,
    },

    /// A target path could not be described.
    #[snafu(display("Failed to build target from path '{}': {}", path.display(), source))]
    TargetFromPath {
        path: PathBuf,
        source: crate::schema::Error,
    },

    /// Delegation resolution terminated without finding the target.
    #[snafu(display("Target '{}' not found in the repository", target))]
    TargetNotFound { target: String },

    /// The first targets role loaded was not the top-level one.
    #[snafu(display(
        "The top-level targets role must be loaded before '{}'",
        role
    ))]
    TopLevelTargetsFirst { role: String },

    /// The transport failed to fetch a file.
    #[snafu(display("Transport error: {}", source))]
    Transport { source: TransportError },

    /// The supplied trusted root reader could not be read.
    #[snafu(display("Failed to read the trusted root metadata: {}", source))]
    TrustedRootRead { source: std::io::Error },

    /// A target path contains unsafe components.
    #[snafu(display("Target path '{}' contains unsafe path components", path))]
    UnsafeTargetPath { path: String },

    /// Metadata signature verification failed.
    #[snafu(display("Failed to verify {} metadata: {}", role, source))]
    VerifyMetadata {
        role: RoleType,
        source: crate::schema::Error,
    },

    /// Delegated role signature verification failed.
    #[snafu(display("Failed to verify role '{}': {}", role, source))]
    VerifyRoleMetadata {
        role: String,
        source: crate::schema::Error,
    },

    /// The initial trusted root failed self-verification.
    #[snafu(display("Failed to verify trusted root metadata: {}", source))]
    VerifyTrustedMetadata { source: crate::schema::Error },

    /// A metadata file's version did not match what another role claimed for
    /// it.
    #[snafu(display(
        "Fetched version {} of '{}' does not match the expected version {}",
        fetched,
        file,
        expected
    ))]
    VersionMismatch {
        file: String,
        fetched: u64,
        expected: u64,
    },

    /// A version number overflowed.
    #[snafu(display("Version number overflow"))]
    VersionOverflow,

    /// Walking a directory failed.
    #[snafu(display("Failed to walk directory '{}': {}", directory.display(), source))]
    WalkDir {
        directory: PathBuf,
        source: walkdir::Error,
    },
}
