//! Signature verification for signed metadata envelopes.
//!
//! Verification counts distinct authorized key IDs whose signature over the
//! envelope's canonical form is valid, and requires that count to reach the
//! role's threshold. Signatures from keys outside the authorized set are
//! ignored, and a key ID can contribute at most once no matter how many
//! signatures carry it.

use crate::schema::decoded::{Decoded, Hex};
use crate::schema::error::{self, Result};
use crate::schema::key::Key;
use crate::schema::{Delegations, Role, Root, Signed, Targets};
use serde::Serialize;
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::{HashMap, HashSet};
use std::num::NonZeroU64;
use sturdy_cjson::CanonicalFormatter;

/// Counts distinct valid signatures over `data` from the authorized key set
/// and checks the count against `threshold`.
fn verify_signatures<T>(
    role_name: &str,
    signed: &Signed<T>,
    data: &[u8],
    keyids: &[Decoded<Hex>],
    keys: &HashMap<Decoded<Hex>, Key>,
    threshold: NonZeroU64,
) -> Result<()> {
    let mut valid = 0;
    let mut valid_keyids = HashSet::new();

    for signature in &signed.signatures {
        if keyids.contains(&signature.keyid) {
            if let Some(key) = keys.get(&signature.keyid) {
                if key.verify(data, &signature.sig) {
                    // Ignore duplicate keyids.
                    if valid_keyids.insert(&signature.keyid) {
                        valid += 1;
                    }
                }
            }
        }
    }

    ensure!(
        valid >= threshold.get(),
        error::SignatureThresholdSnafu {
            role: role_name,
            threshold,
            valid,
        }
    );
    Ok(())
}

fn canonical_signed<T: Serialize>(signed: &Signed<T>, what: &str) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut data, CanonicalFormatter::new());
    signed
        .signed
        .serialize(&mut ser)
        .context(error::JsonSerializationSnafu { what })?;
    Ok(data)
}

impl Root {
    /// Checks that the given metadata role is signed by a threshold of the
    /// keys this root authorizes for that role.
    pub fn verify_role<T: Role + Serialize>(&self, role: &Signed<T>) -> Result<()> {
        let role_keys = self
            .roles
            .get(&T::TYPE)
            .context(error::MissingRoleSnafu { role: T::TYPE })?;
        let data = canonical_signed(role, &format!("{} role", T::TYPE))?;
        verify_signatures(
            &T::TYPE.to_string(),
            role,
            &data,
            &role_keys.keyids,
            &self.keys,
            role_keys.threshold,
        )
    }
}

impl Delegations {
    /// Checks that a delegated targets role named `name` is signed by a
    /// threshold of the keys this delegation block authorizes for it.
    pub fn verify_role(&self, role: &Signed<Targets>, name: &str) -> Result<()> {
        let delegated_role = self
            .role(name)
            .context(error::RoleNotFoundSnafu { name })?;
        let data = canonical_signed(role, &format!("{} role", name))?;
        verify_signatures(
            name,
            role,
            &data,
            &delegated_role.keyids,
            &self.keys,
            delegated_role.threshold,
        )
    }
}
