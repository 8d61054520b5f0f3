// Copyright 2025 sturdy developers. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Length and hash verification of fetched file bodies.
//!
//! Verification succeeds when the body's length matches the declared length
//! (if any is declared) and its digest under at least one supported algorithm
//! matches the declared digest for that algorithm. SHA-256 and SHA-512 are
//! supported; digests under other algorithms are skipped. Digest comparison
//! is constant-time.

use crate::error::{self, Result};
use crate::schema::{FileMeta, Hashes, Target};
use aws_lc_rs::constant_time;
use aws_lc_rs::digest::{digest, SHA256, SHA512};
use snafu::ensure;

/// Verifies `data` against a metadata file description.
pub(crate) fn verify_file_meta(data: &[u8], meta: &FileMeta, context: &str) -> Result<()> {
    if let Some(length) = meta.length {
        ensure!(
            data.len() as u64 == length,
            error::SizeMismatchSnafu {
                context,
                expected: length,
                actual: data.len() as u64,
            }
        );
    }
    match &meta.hashes {
        Some(hashes) => verify_hashes(data, hashes, context),
        None => error::MissingHashesSnafu { context }.fail(),
    }
}

/// Verifies `data` against a target file description.
pub(crate) fn verify_target(data: &[u8], target: &Target, context: &str) -> Result<()> {
    ensure!(
        data.len() as u64 == target.length,
        error::SizeMismatchSnafu {
            context,
            expected: target.length,
            actual: data.len() as u64,
        }
    );
    verify_hashes(data, &target.hashes, context)
}

fn verify_hashes(data: &[u8], hashes: &Hashes, context: &str) -> Result<()> {
    let mut known = None;
    if let Some(sha256) = &hashes.sha256 {
        let calculated = digest(&SHA256, data);
        if constant_time::verify_slices_are_equal(calculated.as_ref(), sha256).is_ok() {
            return Ok(());
        }
        known = Some((hex::encode(calculated), sha256.to_string()));
    }
    if let Some(sha512) = &hashes.sha512 {
        let calculated = digest(&SHA512, data);
        if constant_time::verify_slices_are_equal(calculated.as_ref(), sha512).is_ok() {
            return Ok(());
        }
        known = Some((hex::encode(calculated), sha512.to_string()));
    }
    match known {
        Some((calculated, expected)) => error::HashMismatchSnafu {
            context,
            calculated,
            expected,
        }
        .fail(),
        None => error::MissingHashesSnafu { context }.fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::{verify_file_meta, verify_target};
    use crate::schema::{FileMeta, Hashes, Target};
    use aws_lc_rs::digest::{digest, SHA256, SHA512};
    use std::collections::HashMap;
    use std::num::NonZeroU64;

    fn meta(length: Option<u64>, hashes: Option<Hashes>) -> FileMeta {
        FileMeta {
            length,
            hashes,
            version: NonZeroU64::new(1).unwrap(),
            _extra: HashMap::new(),
        }
    }

    fn sha256_of(data: &[u8]) -> Hashes {
        Hashes::from_sha256(digest(&SHA256, data).as_ref().to_vec())
    }

    #[test]
    fn matching_sha256_passes() {
        let data = b"hello world";
        verify_file_meta(data, &meta(Some(11), Some(sha256_of(data))), "test").unwrap();
    }

    #[test]
    fn matching_sha512_passes_when_sha256_absent() {
        let data = b"hello world";
        let hashes = Hashes {
            sha256: None,
            sha512: Some(digest(&SHA512, data).as_ref().to_vec().into()),
            _extra: HashMap::new(),
        };
        verify_file_meta(data, &meta(None, Some(hashes)), "test").unwrap();
    }

    #[test]
    fn length_mismatch_fails() {
        let data = b"hello world";
        verify_file_meta(data, &meta(Some(10), Some(sha256_of(data))), "test").unwrap_err();
    }

    #[test]
    fn absent_hashes_fail() {
        verify_file_meta(b"data", &meta(Some(4), None), "test").unwrap_err();
    }

    #[test]
    fn unknown_algorithms_alone_fail() {
        let mut _extra = HashMap::new();
        _extra.insert("md5".to_string(), serde_json::json!("d41d8cd98f"));
        let hashes = Hashes {
            sha256: None,
            sha512: None,
            _extra,
        };
        verify_file_meta(b"data", &meta(Some(4), Some(hashes)), "test").unwrap_err();
    }

    #[test]
    fn wrong_digest_fails() {
        let data = b"hello world";
        let hashes = sha256_of(b"something else");
        verify_file_meta(data, &meta(Some(11), Some(hashes)), "test").unwrap_err();
    }

    #[test]
    fn target_verification_checks_length_and_hash() {
        let data = b"target body";
        let target = Target {
            length: data.len() as u64,
            hashes: sha256_of(data),
            custom: HashMap::new(),
            _extra: HashMap::new(),
        };
        verify_target(data, &target, "bin/app").unwrap();
        verify_target(b"tampered body", &target, "bin/app").unwrap_err();
    }
}
