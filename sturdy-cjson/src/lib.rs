//! `sturdy-cjson` provides [`CanonicalFormatter`], an implementation of
//! `serde_json`'s `Formatter` that produces canonical JSON: a byte-stable
//! encoding in which object members are sorted by the unsigned byte-wise
//! lexicographic order of their UTF-8 keys, strings escape only `"` and `\`,
//! integers use their shortest decimal form, and no insignificant whitespace
//! is emitted. The canonical form of a value is the exact byte sequence over
//! which signatures and content-addressed identifiers are computed.
//!
//! ```
//! use serde_json::json;
//!
//! let value = json!({"b": 1, "a": {"y": null, "x": [2, 3]}});
//! let bytes = sturdy_cjson::to_canonical_vec(&value).unwrap();
//! assert_eq!(bytes, br#"{"a":{"x":[2,3],"y":null},"b":1}"#);
//! ```
//!
//! Floating-point numbers have no canonical form and are rejected.

#![deny(rust_2018_idioms, missing_docs)]
#![warn(clippy::pedantic)]

use serde::Serialize;
use serde_json::ser::{CharEscape, Formatter};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::mem;

/// A `serde_json` `Formatter` that emits canonical JSON.
///
/// Use with `serde_json::Serializer::with_formatter`:
///
/// ```
/// use serde::Serialize;
/// use sturdy_cjson::CanonicalFormatter;
///
/// let mut data = Vec::new();
/// let mut ser = serde_json::Serializer::with_formatter(&mut data, CanonicalFormatter::new());
/// serde_json::json!({"日": 1, "本": 2}).serialize(&mut ser).unwrap();
/// assert_eq!(data, "{\"日\":1,\"本\":2}".as_bytes());
/// ```
#[derive(Debug, Default)]
pub struct CanonicalFormatter {
    stack: Vec<Object>,
}

/// An object currently being assembled. Keys are collected unescaped so that
/// member ordering is over the raw UTF-8 bytes; members are emitted, escaped,
/// when the object closes.
#[derive(Debug, Default)]
struct Object {
    members: BTreeMap<Vec<u8>, Vec<u8>>,
    key: Vec<u8>,
    value: Vec<u8>,
    writing_key: bool,
}

impl CanonicalFormatter {
    /// Creates a new `CanonicalFormatter`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes `bytes` to the sink the current write belongs to: the current
    /// member's key or value buffer while inside an object, the caller's
    /// writer otherwise.
    fn write_to<W>(&mut self, writer: &mut W, bytes: &[u8]) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        match self.stack.last_mut() {
            Some(object) => {
                if object.writing_key {
                    object.key.extend_from_slice(bytes);
                } else {
                    object.value.extend_from_slice(bytes);
                }
                Ok(())
            }
            None => writer.write_all(bytes),
        }
    }

    fn writing_key(&self) -> bool {
        self.stack.last().map_or(false, |object| object.writing_key)
    }

    fn current(&mut self) -> io::Result<&mut Object> {
        self.stack.last_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "object member outside an object")
        })
    }
}

/// Appends a member key with canonical escaping: only `"` and `\` are
/// escaped.
fn push_key(out: &mut Vec<u8>, key: &[u8]) {
    out.push(b'"');
    for &byte in key {
        match byte {
            b'"' => out.extend_from_slice(b"\\\""),
            b'\\' => out.extend_from_slice(b"\\\\"),
            _ => out.push(byte),
        }
    }
    out.push(b'"');
}

/// The character a `CharEscape` stands for, as raw UTF-8 bytes.
fn unescape(char_escape: CharEscape) -> Vec<u8> {
    match char_escape {
        CharEscape::Quote => vec![b'"'],
        CharEscape::ReverseSolidus => vec![b'\\'],
        CharEscape::Solidus => vec![b'/'],
        CharEscape::Backspace => vec![0x08],
        CharEscape::FormFeed => vec![0x0c],
        CharEscape::LineFeed => vec![b'\n'],
        CharEscape::CarriageReturn => vec![b'\r'],
        CharEscape::Tab => vec![b'\t'],
        CharEscape::AsciiControl(byte) => vec![byte],
    }
}

macro_rules! write_integer {
    ($($name:ident : $ty:ty),* $(,)?) => {
        $(
            fn $name<W>(&mut self, writer: &mut W, value: $ty) -> io::Result<()>
            where
                W: ?Sized + Write,
            {
                self.write_to(writer, value.to_string().as_bytes())
            }
        )*
    };
}

impl Formatter for CanonicalFormatter {
    fn write_null<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        self.write_to(writer, b"null")
    }

    fn write_bool<W>(&mut self, writer: &mut W, value: bool) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        self.write_to(writer, if value { b"true" } else { b"false" })
    }

    write_integer!(
        write_i8: i8,
        write_i16: i16,
        write_i32: i32,
        write_i64: i64,
        write_i128: i128,
        write_u8: u8,
        write_u16: u16,
        write_u32: u32,
        write_u64: u64,
        write_u128: u128,
    );

    fn write_f32<W>(&mut self, _writer: &mut W, _value: f32) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "floating point numbers have no canonical JSON form",
        ))
    }

    fn write_f64<W>(&mut self, _writer: &mut W, _value: f64) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "floating point numbers have no canonical JSON form",
        ))
    }

    fn write_number_str<W>(&mut self, writer: &mut W, value: &str) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        if value.contains(|c| c == '.' || c == 'e' || c == 'E') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "floating point numbers have no canonical JSON form",
            ));
        }
        self.write_to(writer, value.as_bytes())
    }

    fn begin_string<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        if self.writing_key() {
            Ok(())
        } else {
            self.write_to(writer, b"\"")
        }
    }

    fn end_string<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        if self.writing_key() {
            Ok(())
        } else {
            self.write_to(writer, b"\"")
        }
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        self.write_to(writer, fragment.as_bytes())
    }

    fn write_char_escape<W>(&mut self, writer: &mut W, char_escape: CharEscape) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        if self.writing_key() {
            // keys are buffered raw; escaping happens in push_key
            self.write_to(writer, &unescape(char_escape))
        } else {
            match char_escape {
                CharEscape::Quote => self.write_to(writer, b"\\\""),
                CharEscape::ReverseSolidus => self.write_to(writer, b"\\\\"),
                other => self.write_to(writer, &unescape(other)),
            }
        }
    }

    fn begin_array<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        self.write_to(writer, b"[")
    }

    fn end_array<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        self.write_to(writer, b"]")
    }

    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        if first {
            Ok(())
        } else {
            self.write_to(writer, b",")
        }
    }

    fn end_array_value<W>(&mut self, _writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        Ok(())
    }

    fn begin_object<W>(&mut self, _writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        self.stack.push(Object::default());
        Ok(())
    }

    fn end_object<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        let object = self.stack.pop().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "end of object that never began")
        })?;
        let mut rendered = Vec::new();
        rendered.push(b'{');
        let mut first = true;
        for (key, value) in &object.members {
            if !first {
                rendered.push(b',');
            }
            first = false;
            push_key(&mut rendered, key);
            rendered.push(b':');
            rendered.extend_from_slice(value);
        }
        rendered.push(b'}');
        self.write_to(writer, &rendered)
    }

    fn begin_object_key<W>(&mut self, _writer: &mut W, _first: bool) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        self.current()?.writing_key = true;
        Ok(())
    }

    fn end_object_key<W>(&mut self, _writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        self.current()?.writing_key = false;
        Ok(())
    }

    fn begin_object_value<W>(&mut self, _writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        // the member separator is emitted in end_object, after sorting
        Ok(())
    }

    fn end_object_value<W>(&mut self, _writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        let object = self.current()?;
        let key = mem::take(&mut object.key);
        let value = mem::take(&mut object.value);
        if object.members.insert(key, value).is_some() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "duplicate object member",
            ));
        }
        Ok(())
    }

    fn write_raw_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        self.write_to(writer, fragment.as_bytes())
    }
}

/// Serializes `value` as canonical JSON bytes.
pub fn to_canonical_vec<T>(value: &T) -> serde_json::Result<Vec<u8>>
where
    T: ?Sized + Serialize,
{
    let mut data = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut data, CanonicalFormatter::new());
    value.serialize(&mut ser)?;
    Ok(data)
}

/// Deserializes a value from canonical JSON bytes.
///
/// The input must already be in canonical form: it is parsed as JSON, then
/// re-encoded, and the two byte sequences must match exactly. This rejects
/// duplicate object members, unsorted keys, insignificant whitespace,
/// non-shortest numbers, and over-escaped strings.
pub fn from_canonical_slice(bytes: &[u8]) -> Result<Value, Error> {
    let value: Value = serde_json::from_slice(bytes).map_err(Error::Json)?;
    let reencoded = to_canonical_vec(&value).map_err(Error::Json)?;
    if reencoded == bytes {
        Ok(value)
    } else {
        Err(Error::NotCanonical)
    }
}

/// The total order canonical JSON sorts object members by: the unsigned
/// byte-wise lexicographic comparison of the UTF-8 encodings.
pub fn compare_utf8(a: &str, b: &str) -> Ordering {
    a.as_bytes().cmp(b.as_bytes())
}

/// The error type returned by [`from_canonical_slice`].
#[derive(Debug)]
pub enum Error {
    /// The input was not valid JSON, or re-encoding failed.
    Json(serde_json::Error),
    /// The input was valid JSON but not in canonical form.
    NotCanonical,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Json(err) => write!(f, "JSON error: {}", err),
            Error::NotCanonical => write!(f, "input does not round-trip to canonical JSON"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Json(err) => Some(err),
            Error::NotCanonical => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

#[cfg(test)]
mod tests {
    use super::{compare_utf8, from_canonical_slice, to_canonical_vec, Error};
    use serde_json::json;
    use std::cmp::Ordering;

    #[test]
    fn sorts_keys_by_utf8_bytes() {
        // U+65E5 (E6 97 A5) sorts before U+672C (E6 9C AC)
        let bytes = to_canonical_vec(&json!({"本": 2, "日": 1})).unwrap();
        assert_eq!(bytes, "{\"日\":1,\"本\":2}".as_bytes());
    }

    #[test]
    fn sorts_ascii_before_multibyte() {
        let bytes = to_canonical_vec(&json!({"z": 3, "a": 1, "A": 0, "1": 4, "é": 2})).unwrap();
        assert_eq!(bytes, "{\"1\":4,\"A\":0,\"a\":1,\"z\":3,\"é\":2}".as_bytes());
    }

    #[test]
    fn escapes_only_quote_and_backslash() {
        let bytes = to_canonical_vec(&json!({"StrStr": "\"xzbit\""})).unwrap();
        assert_eq!(bytes, br#"{"StrStr":"\"xzbit\""}"#);

        let bytes = to_canonical_vec(&json!({"k": "a\\b"})).unwrap();
        assert_eq!(bytes, br#"{"k":"a\\b"}"#);

        // control characters and multi-byte sequences are emitted literally
        let bytes = to_canonical_vec(&json!({"k": "a\nb\tc"})).unwrap();
        assert_eq!(bytes, b"{\"k\":\"a\nb\tc\"}");
    }

    #[test]
    fn escaped_keys_sort_by_raw_bytes() {
        // '"' (0x22) sorts before 'a' (0x61) even though it serializes as \"
        let bytes = to_canonical_vec(&json!({"a": 1, "\"": 2})).unwrap();
        assert_eq!(bytes, br#"{"\"":2,"a":1}"#);
    }

    #[test]
    fn nested_structures() {
        let bytes = to_canonical_vec(&json!({
            "outer": {"b": [1, 2, {"y": 0, "x": 0}], "a": null},
            "flag": true
        }))
        .unwrap();
        assert_eq!(
            bytes,
            br#"{"flag":true,"outer":{"a":null,"b":[1,2,{"x":0,"y":0}]}}"#.to_vec()
        );
    }

    #[test]
    fn empty_containers() {
        assert_eq!(to_canonical_vec(&json!({})).unwrap(), b"{}");
        assert_eq!(to_canonical_vec(&json!([])).unwrap(), b"[]");
        assert_eq!(to_canonical_vec(&json!({"a": {}})).unwrap(), br#"{"a":{}}"#);
    }

    #[test]
    fn integers_use_shortest_form() {
        let bytes = to_canonical_vec(&json!({"n": 0, "m": -3, "big": 18_446_744_073_709_551_615u64})).unwrap();
        assert_eq!(bytes, br#"{"big":18446744073709551615,"m":-3,"n":0}"#);
    }

    #[test]
    fn floats_are_rejected() {
        assert!(to_canonical_vec(&json!({"f": 1.5})).is_err());
    }

    #[test]
    fn derived_struct() {
        #[derive(serde_derive::Serialize)]
        struct Example {
            zulu: &'static str,
            alfa: Vec<u64>,
        }

        let bytes = to_canonical_vec(&Example {
            zulu: "z",
            alfa: vec![1],
        })
        .unwrap();
        assert_eq!(bytes, br#"{"alfa":[1],"zulu":"z"}"#);
    }

    #[test]
    fn decode_round_trips_canonical_input() {
        let input = br#"{"a":1,"b":[true,null,"x"]}"#;
        let value = from_canonical_slice(input).unwrap();
        assert_eq!(to_canonical_vec(&value).unwrap(), input.to_vec());
    }

    #[test]
    fn decode_rejects_whitespace() {
        assert!(matches!(
            from_canonical_slice(br#"{"a": 1}"#),
            Err(Error::NotCanonical)
        ));
    }

    #[test]
    fn decode_rejects_unsorted_keys() {
        assert!(matches!(
            from_canonical_slice(br#"{"b":1,"a":2}"#),
            Err(Error::NotCanonical)
        ));
    }

    #[test]
    fn decode_rejects_duplicate_keys() {
        assert!(matches!(
            from_canonical_slice(br#"{"a":1,"a":2}"#),
            Err(Error::NotCanonical)
        ));
    }

    #[test]
    fn decode_rejects_malformed_json() {
        assert!(matches!(
            from_canonical_slice(br#"{"a":1,}"#),
            Err(Error::Json(_))
        ));
        assert!(matches!(
            from_canonical_slice(br#"{"a":"unterminated"#),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn compare_utf8_ordering() {
        assert_eq!(compare_utf8("1", "A"), Ordering::Less);
        assert_eq!(compare_utf8("A", "a"), Ordering::Less);
        assert_eq!(compare_utf8("a", "z"), Ordering::Less);
        assert_eq!(compare_utf8("日", "本"), Ordering::Less);
        assert_eq!(compare_utf8("same", "same"), Ordering::Equal);
    }
}
