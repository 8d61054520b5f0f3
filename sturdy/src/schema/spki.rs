//! Minimal encoding and decoding of PEM `SubjectPublicKeyInfo` documents,
//! which is how RSA and ECDSA public keys appear on the wire. Only the DER
//! shapes produced for the supported key types are understood:
//!
//! ```text
//! SEQUENCE {
//!     SEQUENCE {
//!         OBJECT IDENTIFIER  algorithm
//!         (NULL | OBJECT IDENTIFIER parameters)
//!     }
//!     BIT STRING  subjectPublicKey
//! }
//! ```

use crate::schema::error::{self, Error, Result};

/// DER encoding of OID 1.2.840.113549.1.1.1 (rsaEncryption).
pub(super) const OID_RSA_ENCRYPTION: &[u8] =
    &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01];

/// DER encoding of OID 1.2.840.10045.2.1 (id-ecPublicKey).
pub(super) const OID_EC_PUBLIC_KEY: &[u8] = &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01];

/// DER encoding of OID 1.2.840.10045.3.1.7 (prime256v1 / secp256r1).
pub(super) const OID_EC_PARAM_SECP256R1: &[u8] = &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07];

const TAG_SEQUENCE: u8 = 0x30;
const TAG_OID: u8 = 0x06;
const TAG_NULL: u8 = 0x05;
const TAG_BIT_STRING: u8 = 0x03;

fn bad(reason: &str) -> Error {
    error::InvalidKeySnafu { reason }.build()
}

fn read_tlv<'a>(
    reader: &mut untrusted::Reader<'a>,
    expected_tag: u8,
) -> Result<untrusted::Input<'a>> {
    let tag = reader.read_byte().map_err(|_| bad("truncated DER"))?;
    if tag != expected_tag {
        return Err(bad("unexpected DER tag"));
    }
    let first = reader.read_byte().map_err(|_| bad("truncated DER"))?;
    let length = if first & 0x80 == 0 {
        usize::from(first)
    } else {
        let count = usize::from(first & 0x7f);
        if count == 0 || count > 2 {
            return Err(bad("unsupported DER length"));
        }
        let mut length = 0usize;
        for _ in 0..count {
            let byte = reader.read_byte().map_err(|_| bad("truncated DER"))?;
            length = (length << 8) | usize::from(byte);
        }
        length
    };
    reader
        .read_bytes(length)
        .map_err(|_| bad("truncated DER value"))
}

/// Extracts the raw `subjectPublicKey` from a PEM `SubjectPublicKeyInfo`,
/// checking the algorithm (and, for EC keys, curve) identifiers. For RSA keys
/// the result is the DER `RSAPublicKey` structure; for EC keys it is the
/// uncompressed curve point.
pub(super) fn decode(pem_str: &str, algorithm: &[u8], parameters: Option<&[u8]>) -> Result<Vec<u8>> {
    let pem = pem::parse(pem_str).map_err(|_| bad("not valid PEM"))?;
    if pem.tag() != "PUBLIC KEY" {
        return Err(bad("PEM tag is not PUBLIC KEY"));
    }
    let der = pem.contents().to_vec();
    untrusted::Input::from(der.as_slice()).read_all(bad("trailing DER data"), |reader| {
        let spki = read_tlv(reader, TAG_SEQUENCE)?;
        spki.read_all(bad("trailing data in SubjectPublicKeyInfo"), |spki| {
            let alg_id = read_tlv(spki, TAG_SEQUENCE)?;
            alg_id.read_all(bad("trailing data in AlgorithmIdentifier"), |alg_id| {
                let oid = read_tlv(alg_id, TAG_OID)?;
                if oid.as_slice_less_safe() != algorithm {
                    return Err(bad("unexpected key algorithm"));
                }
                match parameters {
                    Some(expected) => {
                        let params = read_tlv(alg_id, TAG_OID)?;
                        if params.as_slice_less_safe() != expected {
                            return Err(bad("unexpected key parameters"));
                        }
                    }
                    None => {
                        let null = read_tlv(alg_id, TAG_NULL)?;
                        if !null.is_empty() {
                            return Err(bad("unexpected algorithm parameters"));
                        }
                    }
                }
                Ok(())
            })?;
            let bit_string = read_tlv(spki, TAG_BIT_STRING)?;
            bit_string.read_all(bad("trailing data in BIT STRING"), |bit_string| {
                let unused = bit_string.read_byte().map_err(|_| bad("empty BIT STRING"))?;
                if unused != 0 {
                    return Err(bad("BIT STRING with unused bits"));
                }
                let key = bit_string
                    .read_bytes_to_end()
                    .as_slice_less_safe()
                    .to_vec();
                Ok(key)
            })
        })
    })
}

fn der_tlv(tag: u8, contents: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let length = contents.len();
    if length < 0x80 {
        out.push(length as u8);
    } else if length < 0x100 {
        out.push(0x81);
        out.push(length as u8);
    } else {
        out.push(0x82);
        out.push((length >> 8) as u8);
        out.push(length as u8);
    }
    out.extend_from_slice(contents);
    out
}

/// Wraps a raw public key in a `SubjectPublicKeyInfo` and encodes it as PEM.
/// The inverse of [`decode`].
pub(super) fn encode(algorithm: &[u8], parameters: Option<&[u8]>, key: &[u8]) -> String {
    let mut alg_id = der_tlv(TAG_OID, algorithm);
    match parameters {
        Some(params) => alg_id.extend_from_slice(&der_tlv(TAG_OID, params)),
        None => alg_id.extend_from_slice(&[TAG_NULL, 0x00]),
    }
    let alg_id = der_tlv(TAG_SEQUENCE, &alg_id);

    let mut bit_string_contents = vec![0x00];
    bit_string_contents.extend_from_slice(key);
    let bit_string = der_tlv(TAG_BIT_STRING, &bit_string_contents);

    let mut spki_contents = alg_id;
    spki_contents.extend_from_slice(&bit_string);
    let spki = der_tlv(TAG_SEQUENCE, &spki_contents);

    pem::encode_config(
        &pem::Pem::new("PUBLIC KEY", spki),
        pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF),
    )
}

#[cfg(test)]
mod tests {
    use super::{decode, encode, OID_EC_PARAM_SECP256R1, OID_EC_PUBLIC_KEY, OID_RSA_ENCRYPTION};

    #[test]
    fn ec_round_trip() {
        let mut point = vec![0x04];
        point.extend_from_slice(&[0xab; 64]);
        let pem = encode(OID_EC_PUBLIC_KEY, Some(OID_EC_PARAM_SECP256R1), &point);
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));
        let decoded = decode(&pem, OID_EC_PUBLIC_KEY, Some(OID_EC_PARAM_SECP256R1)).unwrap();
        assert_eq!(decoded, point);
    }

    #[test]
    fn rsa_round_trip_long_form_length() {
        // large enough that the SPKI needs two-byte DER lengths
        let fake_rsa_public_key = vec![0x77; 300];
        let pem = encode(OID_RSA_ENCRYPTION, None, &fake_rsa_public_key);
        let decoded = decode(&pem, OID_RSA_ENCRYPTION, None).unwrap();
        assert_eq!(decoded, fake_rsa_public_key);
    }

    #[test]
    fn wrong_algorithm_is_rejected() {
        let point = vec![0x04; 65];
        let pem = encode(OID_EC_PUBLIC_KEY, Some(OID_EC_PARAM_SECP256R1), &point);
        assert!(decode(&pem, OID_RSA_ENCRYPTION, None).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode("not pem at all", OID_RSA_ENCRYPTION, None).is_err());
    }
}
