// Copyright 2025 sturdy developers. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::error::{self, Result};
use crate::key_source::KeySource;
use crate::schema::decoded::{Decoded, Hex};
use crate::schema::key::Key;
use crate::sign::Sign;
use snafu::ResultExt;

/// A signing key resolved from a [`KeySource`]: the wire form of its public
/// key, the derived key ID, and the signer itself.
#[derive(Debug)]
pub(crate) struct ResolvedKey {
    pub(crate) key: Key,
    pub(crate) keyid: Decoded<Hex>,
    pub(crate) sign: Box<dyn Sign>,
}

/// Resolves each key source to a signer and derives its key ID from the
/// public key's canonical form.
pub(crate) fn resolve_key_sources(sources: &[Box<dyn KeySource>]) -> Result<Vec<ResolvedKey>> {
    let mut resolved = Vec::new();
    for source in sources {
        let sign = source
            .as_sign()
            .context(error::KeyPairFromKeySourceSnafu)?;
        let key = sign.tuf_key();
        let keyid = key
            .key_id()
            .context(error::KeyIdSnafu)?;
        resolved.push(ResolvedKey { key, keyid, sign });
    }
    Ok(resolved)
}
