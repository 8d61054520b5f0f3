//! Public key types and the signature verification dispatch.

use crate::schema::decoded::{Decoded, Hex};
use crate::schema::error::{self, Result};
use crate::schema::spki;
use aws_lc_rs::digest::{digest, SHA256};
use aws_lc_rs::signature::{self, UnparsedPublicKey, VerificationAlgorithm};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::ResultExt;
use std::collections::HashMap;
use sturdy_cjson::CanonicalFormatter;

/// A public key and the signature scheme it is used with. The supported
/// (type, scheme) pairs are `(ed25519, ed25519)`, `(rsa, rsassa-pss-sha256)`,
/// and `(ecdsa, ecdsa-sha2-nistp256)`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "keytype")]
pub enum Key {
    /// An RSA key.
    #[serde(rename = "rsa")]
    Rsa {
        /// The RSA key.
        keyval: RsaKey,
        /// Denotes the key's signature scheme.
        scheme: RsaScheme,
        /// Extra arguments found during deserialization.
        ///
        /// We must store these to correctly verify signatures for this object.
        ///
        /// If you're instantiating this struct, you should make this
        /// `HashMap::new()`.
        #[serde(flatten)]
        _extra: HashMap<String, Value>,
    },
    /// An Ed25519 key.
    #[serde(rename = "ed25519")]
    Ed25519 {
        /// The Ed25519 key.
        keyval: Ed25519Key,
        /// Denotes the key's signature scheme.
        scheme: Ed25519Scheme,
        /// Extra arguments found during deserialization.
        ///
        /// We must store these to correctly verify signatures for this object.
        ///
        /// If you're instantiating this struct, you should make this
        /// `HashMap::new()`.
        #[serde(flatten)]
        _extra: HashMap<String, Value>,
    },
    /// An ECDSA key.
    #[serde(rename = "ecdsa")]
    Ecdsa {
        /// The ECDSA key.
        keyval: EcdsaKey,
        /// Denotes the key's signature scheme.
        scheme: EcdsaScheme,
        /// Extra arguments found during deserialization.
        ///
        /// We must store these to correctly verify signatures for this object.
        ///
        /// If you're instantiating this struct, you should make this
        /// `HashMap::new()`.
        #[serde(flatten)]
        _extra: HashMap<String, Value>,
    },
}

/// Used to identify the RSASSA-PSS-SHA256 signature scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum RsaScheme {
    /// RSASSA-PSS with SHA-256 as both the message and MGF1 hash, salt
    /// length equal to the hash length.
    #[serde(rename = "rsassa-pss-sha256")]
    RsassaPssSha256,
}

/// Used to identify the Ed25519 signature scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Ed25519Scheme {
    /// Standard Ed25519.
    #[serde(rename = "ed25519")]
    Ed25519,
}

/// Used to identify the ECDSA P-256 with SHA-256 signature scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum EcdsaScheme {
    /// ECDSA over NIST P-256 with SHA-256, DER-encoded signatures.
    #[serde(rename = "ecdsa-sha2-nistp256")]
    EcdsaSha2Nistp256,
}

/// An RSA public key value.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RsaKey {
    /// The public key, a PEM-encoded `SubjectPublicKeyInfo`.
    pub public: String,

    /// Extra arguments found during deserialization.
    ///
    /// If you're instantiating this struct, you should make this
    /// `HashMap::new()`.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

/// An Ed25519 public key value.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Ed25519Key {
    /// The public key, the raw 32 bytes in lower hex.
    pub public: Decoded<Hex>,

    /// Extra arguments found during deserialization.
    ///
    /// If you're instantiating this struct, you should make this
    /// `HashMap::new()`.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

/// An ECDSA public key value.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EcdsaKey {
    /// The public key, a PEM-encoded `SubjectPublicKeyInfo`.
    pub public: String,

    /// Extra arguments found during deserialization.
    ///
    /// If you're instantiating this struct, you should make this
    /// `HashMap::new()`.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

/// Encodes a DER `RSAPublicKey` as the PEM `SubjectPublicKeyInfo` form used
/// in key metadata.
pub fn rsa_spki_pem(der: &[u8]) -> String {
    spki::encode(spki::OID_RSA_ENCRYPTION, None, der)
}

/// Encodes an uncompressed P-256 point as the PEM `SubjectPublicKeyInfo` form
/// used in key metadata.
pub fn ecdsa_spki_pem(point: &[u8]) -> String {
    spki::encode(
        spki::OID_EC_PUBLIC_KEY,
        Some(spki::OID_EC_PARAM_SECP256R1),
        point,
    )
}

impl Key {
    /// Calculates the key ID for this key: the SHA-256 digest of the key's
    /// canonical JSON form, in lower hex. Key IDs are content-addressed and
    /// are recomputed on load, never trusted from the wire.
    pub fn key_id(&self) -> Result<Decoded<Hex>> {
        let mut data = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut data, CanonicalFormatter::new());
        self.serialize(&mut ser)
            .context(error::JsonSerializationSnafu { what: "key" })?;
        Ok(digest(&SHA256, &data).as_ref().to_vec().into())
    }

    /// Verifies `signature` over `msg` with this key.
    ///
    /// This is a total predicate: malformed key material, unsupported
    /// parameters, and cryptographic failures all yield `false`.
    pub fn verify(&self, msg: &[u8], signature: &[u8]) -> bool {
        let (alg, public): (&dyn VerificationAlgorithm, Vec<u8>) = match self {
            Key::Ed25519 {
                keyval,
                scheme: Ed25519Scheme::Ed25519,
                ..
            } => (&signature::ED25519, keyval.public.to_vec()),
            Key::Rsa {
                keyval,
                scheme: RsaScheme::RsassaPssSha256,
                ..
            } => match spki::decode(&keyval.public, spki::OID_RSA_ENCRYPTION, None) {
                Ok(der) => (&signature::RSA_PSS_2048_8192_SHA256, der),
                Err(_) => return false,
            },
            Key::Ecdsa {
                keyval,
                scheme: EcdsaScheme::EcdsaSha2Nistp256,
                ..
            } => match spki::decode(
                &keyval.public,
                spki::OID_EC_PUBLIC_KEY,
                Some(spki::OID_EC_PARAM_SECP256R1),
            ) {
                Ok(point) => (&signature::ECDSA_P256_SHA256_ASN1, point),
                Err(_) => return false,
            },
        };
        UnparsedPublicKey::new(alg, &public)
            .verify(msg, signature)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::Key;

    #[test]
    fn key_id_matches_canonical_digest() {
        let key: Key = serde_json::from_value(serde_json::json!({
            "keytype": "ed25519",
            "scheme": "ed25519",
            "keyval": {
                "public": "2222222222222222222222222222222222222222222222222222222222222222"
            }
        }))
        .unwrap();
        let canonical = sturdy_cjson::to_canonical_vec(&key).unwrap();
        let expected = aws_lc_rs::digest::digest(&aws_lc_rs::digest::SHA256, &canonical);
        assert_eq!(key.key_id().unwrap().bytes(), expected.as_ref());
    }

    #[test]
    fn bad_key_material_verifies_false() {
        let key: Key = serde_json::from_value(serde_json::json!({
            "keytype": "rsa",
            "scheme": "rsassa-pss-sha256",
            "keyval": { "public": "not a pem document" }
        }))
        .unwrap();
        assert!(!key.verify(b"message", &[0u8; 256]));
    }

    #[test]
    fn unknown_key_type_is_a_parse_error() {
        assert!(serde_json::from_value::<Key>(serde_json::json!({
            "keytype": "dsa",
            "scheme": "dsa-sha1",
            "keyval": { "public": "" }
        }))
        .is_err());
    }
}
