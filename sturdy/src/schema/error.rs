//! Error types for the metadata schema.

use crate::schema::RoleType;
use snafu::Snafu;
use std::num::NonZeroU64;
use std::path::PathBuf;

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for metadata schema operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// A duplicate key ID was present in a key listing.
    #[snafu(display("Duplicate key ID: {}", keyid))]
    DuplicateKeyId {
        /// The duplicated key ID.
        keyid: String,
    },

    /// Unable to open a file.
    #[snafu(display("Failed to open '{}': {}", path.display(), source))]
    FileOpen {
        /// The file that could not be opened.
        path: PathBuf,
        /// The source of the error.
        source: std::io::Error,
    },

    /// Unable to read a file.
    #[snafu(display("Failed to read '{}': {}", path.display(), source))]
    FileRead {
        /// The file that could not be read.
        path: PathBuf,
        /// The source of the error.
        source: std::io::Error,
    },

    /// A string failed to decode as hexadecimal.
    #[snafu(display("Invalid hex string: {}", source))]
    HexDecode {
        /// The source of the error.
        source: hex::FromHexError,
    },

    /// A key ID listed for a key did not match the key's computed key ID.
    #[snafu(display("Invalid key ID {}: calculated {}", keyid, calculated))]
    InvalidKeyId {
        /// The key ID from the metadata.
        keyid: String,
        /// The key ID calculated from the key itself.
        calculated: String,
    },

    /// A public key was not valid PEM, or its DER contents were not a
    /// well-formed `SubjectPublicKeyInfo` for the expected algorithm.
    #[snafu(display("Invalid public key: {}", reason))]
    InvalidKey {
        /// Why the key could not be used.
        reason: String,
    },

    /// An unsupported `spec_version` was present in metadata.
    #[snafu(display("Unsupported spec_version '{}'", given))]
    InvalidSpecVersion {
        /// The spec_version from the metadata.
        given: String,
    },

    /// Serialization of a metadata object to canonical JSON failed.
    #[snafu(display("Failed to serialize {} to JSON: {}", what, source))]
    JsonSerialization {
        /// What was being serialized.
        what: String,
        /// The source of the error.
        source: serde_json::Error,
    },

    /// A role required by the root metadata was missing.
    #[snafu(display("Missing {} role in root metadata", role))]
    MissingRole {
        /// The role that was missing.
        role: RoleType,
    },

    /// A delegated role was not found where it was expected.
    #[snafu(display("Role '{}' not found", name))]
    RoleNotFound {
        /// The name of the role.
        name: String,
    },

    /// Signature verification did not reach the role's threshold.
    #[snafu(display(
        "Signature threshold of {} not met for role '{}' ({} valid signatures)",
        threshold,
        role,
        valid
    ))]
    SignatureThreshold {
        /// The role being verified.
        role: String,
        /// The threshold required by the role.
        threshold: NonZeroU64,
        /// The number of distinct valid signatures found.
        valid: u64,
    },

    /// A target path was not a regular file when building its description.
    #[snafu(display("Target '{}' is not a file", path.display()))]
    TargetNotAFile {
        /// The path that was not a file.
        path: PathBuf,
    },

    /// A delegated role claims a path its delegator does not own.
    #[snafu(display("The delegated path '{}' is not covered by the delegating role", child))]
    UnmatchedPath {
        /// The path that escaped the delegator's patterns.
        child: String,
    },
}
