// Copyright 2025 sturdy developers. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provides an abstraction over the source of a signing key. This allows
//! signing keys to be obtained, for example, from local files or from an
//! application's own key management.

use crate::error;
use crate::sign::{parse_keypair, Sign};
use snafu::ResultExt;
use std::fmt::Debug;
use std::path::PathBuf;
use std::result::Result;

/// This trait should be implemented for each source of signing keys.
pub trait KeySource: Debug + Send + Sync {
    /// Returns an object that implements the `Sign` trait.
    fn as_sign(&self)
        -> Result<Box<dyn Sign>, Box<dyn std::error::Error + Send + Sync + 'static>>;

    /// Writes a key back to the `KeySource`.
    fn write(
        &self,
        value: &str,
        key_id_hex: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>>;
}

/// Points to a local key using a filesystem path.
#[derive(Debug)]
pub struct LocalKeySource {
    /// The path to a local key file in PEM pkcs8 or RSA format.
    pub path: PathBuf,
    /// Optional password for the key file.
    pub password: Option<String>,
}

/// Implements the `KeySource` trait for a `LocalKeySource` (file).
impl KeySource for LocalKeySource {
    fn as_sign(
        &self,
    ) -> Result<Box<dyn Sign>, Box<dyn std::error::Error + Send + Sync + 'static>> {
        let data = std::fs::read(&self.path).context(error::FileReadSnafu { path: &self.path })?;
        let password: Option<&str> = self.password.as_deref();
        Ok(Box::new(parse_keypair(&data, password)?))
    }

    fn write(
        &self,
        value: &str,
        _key_id_hex: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        Ok(std::fs::write(&self.path, value.as_bytes())
            .context(error::FileWriteSnafu { path: &self.path })?)
    }
}

/// A `KeySource` holding an already-parsed in-memory key pair. Useful for
/// ephemeral keys, such as those generated for tests or one-shot repository
/// builds.
#[derive(Debug)]
pub struct InMemoryKeySource {
    /// The PKCS#8 document for the key pair.
    pub pkcs8: Vec<u8>,
}

impl KeySource for InMemoryKeySource {
    fn as_sign(
        &self,
    ) -> Result<Box<dyn Sign>, Box<dyn std::error::Error + Send + Sync + 'static>> {
        Ok(Box::new(parse_keypair(&self.pkcs8, None)?))
    }

    fn write(
        &self,
        _value: &str,
        _key_id_hex: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        Err(Box::new(error::Error::KeySourceReadOnly))
    }
}
