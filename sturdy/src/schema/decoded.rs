//! Provides [`Decoded`], a wrapper around raw bytes that remembers the string
//! they were decoded from. Equality, ordering, and hashing are over the
//! decoded bytes; serialization reproduces the original string so that signed
//! bytes survive a deserialize/reserialize round trip.

use crate::schema::error::{self, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use snafu::ResultExt;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::Deref;

/// A string encoding scheme for raw bytes.
pub trait Encoding: fmt::Debug + Clone {
    /// Encodes bytes as a string.
    fn encode(bytes: &[u8]) -> String;
    /// Decodes a string into bytes.
    fn decode(encoded: &str) -> Result<Vec<u8>>;
}

/// Lower-case hexadecimal encoding. Mixed-case input is accepted on decode;
/// the original casing is preserved on reserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hex;

impl Encoding for Hex {
    fn encode(bytes: &[u8]) -> String {
        hex::encode(bytes)
    }

    fn decode(encoded: &str) -> Result<Vec<u8>> {
        hex::decode(encoded).context(error::HexDecodeSnafu)
    }
}

/// Raw bytes tagged with the [`Encoding`] they arrived in.
#[derive(Debug, Clone)]
pub struct Decoded<T: Encoding> {
    bytes: Vec<u8>,
    original: String,
    spooky: PhantomData<T>,
}

impl<T: Encoding> Decoded<T> {
    /// The decoded bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The string this value was decoded from (or encoded to).
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Consumes self, returning the decoded bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }
}

impl<T: Encoding> From<Vec<u8>> for Decoded<T> {
    fn from(bytes: Vec<u8>) -> Self {
        let original = T::encode(&bytes);
        Self {
            bytes,
            original,
            spooky: PhantomData,
        }
    }
}

impl<T: Encoding> Deref for Decoded<T> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl<T: Encoding> AsRef<[u8]> for Decoded<T> {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl<T: Encoding> fmt::Display for Decoded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

// Comparisons are over the decoded bytes only; two values that differ solely
// in the casing of their original string are the same value.

impl<T: Encoding> PartialEq for Decoded<T> {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl<T: Encoding> Eq for Decoded<T> {}

impl<T: Encoding> PartialOrd for Decoded<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Encoding> Ord for Decoded<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

impl<T: Encoding> Hash for Decoded<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl<T: Encoding> Serialize for Decoded<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.original)
    }
}

impl<'de, T: Encoding> Deserialize<'de> for Decoded<T> {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let original = String::deserialize(deserializer)?;
        let bytes = T::decode(&original).map_err(serde::de::Error::custom)?;
        Ok(Self {
            bytes,
            original,
            spooky: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Decoded, Hex};

    #[test]
    fn round_trip_preserves_original() {
        let decoded: Decoded<Hex> = serde_json::from_str("\"DEADbeef\"").unwrap();
        assert_eq!(decoded.bytes(), &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(serde_json::to_string(&decoded).unwrap(), "\"DEADbeef\"");
    }

    #[test]
    fn equality_ignores_case() {
        let a: Decoded<Hex> = serde_json::from_str("\"ab\"").unwrap();
        let b: Decoded<Hex> = serde_json::from_str("\"AB\"").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_non_hex() {
        assert!(serde_json::from_str::<Decoded<Hex>>("\"zz\"").is_err());
    }
}
