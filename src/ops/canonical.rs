//! Canonical serialization of operation intents
//!
//! The node re-serializes every operation with a stable-stringify JSON
//! encoder before checking its signature and key, so the bytes produced
//! here must match that encoder exactly:
//!
//! - object keys sorted (UTF-16 code unit order) at every depth
//! - no insignificant whitespace
//! - strings escaped as `JSON.stringify` escapes them
//! - numbers in ECMAScript `Number::toString` form (`1`, not `1.0`)
//!
//! Anything without a JSON form (non-finite floats, non-string map keys,
//! duplicate keys) is a serialization error rather than a silent `null`.

use std::fmt::{self, Display};

use serde::ser::{self, Serialize};
use serde_json::{Number, Value};

use crate::error::{BrightIdError, Result};

/// Canonical bytes for any serializable value
pub fn canonicalize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(canonical_string(value)?.into_bytes())
}

/// Canonical JSON text for any serializable value
pub fn canonical_string<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    value
        .serialize(CanonicalSerializer)
        .map_err(|e| BrightIdError::Serialization(e.0))
}

/// JSON number for a float, rejecting NaN and infinities
pub fn canonical_f64(value: f64) -> Result<Value> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| BrightIdError::Serialization(format!("non-finite number {value}")))
}

#[derive(Debug)]
struct CanonicalError(String);

impl Display for CanonicalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for CanonicalError {}

impl ser::Error for CanonicalError {
    fn custom<T: Display>(msg: T) -> Self {
        CanonicalError(msg.to_string())
    }
}

type Fragment = std::result::Result<String, CanonicalError>;

/// Largest integer a double holds exactly (`Number.MAX_SAFE_INTEGER`)
pub const MAX_SAFE_INTEGER: i64 = (1 << 53) - 1;

/// Integers past 2^53 would be rounded by the node's JSON parser, changing
/// the bytes it hashes and verifies.
fn safe_integer(v: i128) -> Fragment {
    if v.unsigned_abs() > MAX_SAFE_INTEGER as u128 {
        return Err(unsafe_integer(v));
    }
    Ok(v.to_string())
}

fn unsafe_integer(v: impl Display) -> CanonicalError {
    CanonicalError(format!("integer {v} is outside the safe range of a JSON number"))
}

/// ECMAScript `Number::toString(10)` for finite doubles
pub(crate) fn js_number(value: f64) -> String {
    if value == 0.0 {
        // covers -0, which JS prints as "0"
        return "0".to_string();
    }
    if value < 0.0 {
        return format!("-{}", js_number(-value));
    }

    // `{:e}` yields the shortest round-trip digits, e.g. "1.2345e6"
    let sci = format!("{value:e}");
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let k = digits.len() as i32;
    let n = exponent + 1;

    if k <= n && n <= 21 {
        let mut out = digits;
        out.extend(std::iter::repeat('0').take((n - k) as usize));
        out
    } else if 0 < n && n <= 21 {
        let (int, frac) = digits.split_at(n as usize);
        format!("{int}.{frac}")
    } else if -6 < n && n <= 0 {
        format!("0.{}{}", "0".repeat((-n) as usize), digits)
    } else {
        let sign = if n - 1 < 0 { '-' } else { '+' };
        let exp = (n - 1).abs();
        if k == 1 {
            format!("{digits}e{sign}{exp}")
        } else {
            let (first, rest) = digits.split_at(1);
            format!("{first}.{rest}e{sign}{exp}")
        }
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn utf16_order(a: &str, b: &str) -> std::cmp::Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

fn join_array(items: Vec<String>) -> String {
    format!("[{}]", items.join(","))
}

fn join_object(mut entries: Vec<(String, String)>) -> Fragment {
    entries.sort_by(|(a, _), (b, _)| utf16_order(a, b));
    for pair in entries.windows(2) {
        if pair[0].0 == pair[1].0 {
            return Err(CanonicalError(format!("duplicate key '{}'", pair[0].0)));
        }
    }
    let body: Vec<String> = entries
        .into_iter()
        .map(|(key, value)| format!("{}:{}", quote(&key), value))
        .collect();
    Ok(format!("{{{}}}", body.join(",")))
}

struct CanonicalSerializer;

impl ser::Serializer for CanonicalSerializer {
    type Ok = String;
    type Error = CanonicalError;
    type SerializeSeq = SeqWriter;
    type SerializeTuple = SeqWriter;
    type SerializeTupleStruct = SeqWriter;
    type SerializeTupleVariant = VariantSeqWriter;
    type SerializeMap = MapWriter;
    type SerializeStruct = MapWriter;
    type SerializeStructVariant = VariantMapWriter;

    fn serialize_bool(self, v: bool) -> Fragment {
        Ok(if v { "true" } else { "false" }.to_string())
    }

    fn serialize_i8(self, v: i8) -> Fragment {
        Ok(v.to_string())
    }

    fn serialize_i16(self, v: i16) -> Fragment {
        Ok(v.to_string())
    }

    fn serialize_i32(self, v: i32) -> Fragment {
        Ok(v.to_string())
    }

    fn serialize_i64(self, v: i64) -> Fragment {
        safe_integer(i128::from(v))
    }

    fn serialize_i128(self, v: i128) -> Fragment {
        safe_integer(v)
    }

    fn serialize_u8(self, v: u8) -> Fragment {
        Ok(v.to_string())
    }

    fn serialize_u16(self, v: u16) -> Fragment {
        Ok(v.to_string())
    }

    fn serialize_u32(self, v: u32) -> Fragment {
        Ok(v.to_string())
    }

    fn serialize_u64(self, v: u64) -> Fragment {
        safe_integer(i128::from(v))
    }

    fn serialize_u128(self, v: u128) -> Fragment {
        i128::try_from(v)
            .map_err(|_| unsafe_integer(v))
            .and_then(safe_integer)
    }

    fn serialize_f32(self, v: f32) -> Fragment {
        // widen through the shortest f32 text so 0.1f32 stays 0.1
        let widened = v.to_string().parse::<f64>().unwrap_or(v as f64);
        self.serialize_f64(widened)
    }

    fn serialize_f64(self, v: f64) -> Fragment {
        if !v.is_finite() {
            return Err(CanonicalError(format!("non-finite number {v}")));
        }
        Ok(js_number(v))
    }

    fn serialize_char(self, v: char) -> Fragment {
        Ok(quote(v.encode_utf8(&mut [0u8; 4])))
    }

    fn serialize_str(self, v: &str) -> Fragment {
        Ok(quote(v))
    }

    fn serialize_bytes(self, v: &[u8]) -> Fragment {
        Ok(join_array(v.iter().map(|b| b.to_string()).collect()))
    }

    fn serialize_none(self) -> Fragment {
        Ok("null".to_string())
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Fragment {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Fragment {
        Ok("null".to_string())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Fragment {
        Ok("null".to_string())
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> Fragment {
        Ok(quote(variant))
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Fragment {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> Fragment {
        join_object(vec![(variant.to_string(), value.serialize(CanonicalSerializer)?)])
    }

    fn serialize_seq(self, len: Option<usize>) -> std::result::Result<SeqWriter, CanonicalError> {
        Ok(SeqWriter {
            items: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> std::result::Result<SeqWriter, CanonicalError> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> std::result::Result<SeqWriter, CanonicalError> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> std::result::Result<VariantSeqWriter, CanonicalError> {
        Ok(VariantSeqWriter {
            variant,
            seq: SeqWriter {
                items: Vec::with_capacity(len),
            },
        })
    }

    fn serialize_map(self, len: Option<usize>) -> std::result::Result<MapWriter, CanonicalError> {
        Ok(MapWriter {
            entries: Vec::with_capacity(len.unwrap_or(0)),
            pending_key: None,
        })
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> std::result::Result<MapWriter, CanonicalError> {
        self.serialize_map(Some(len))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> std::result::Result<VariantMapWriter, CanonicalError> {
        Ok(VariantMapWriter {
            variant,
            map: MapWriter {
                entries: Vec::with_capacity(len),
                pending_key: None,
            },
        })
    }
}

struct SeqWriter {
    items: Vec<String>,
}

impl ser::SerializeSeq for SeqWriter {
    type Ok = String;
    type Error = CanonicalError;

    fn serialize_element<T: Serialize + ?Sized>(
        &mut self,
        value: &T,
    ) -> std::result::Result<(), CanonicalError> {
        self.items.push(value.serialize(CanonicalSerializer)?);
        Ok(())
    }

    fn end(self) -> Fragment {
        Ok(join_array(self.items))
    }
}

impl ser::SerializeTuple for SeqWriter {
    type Ok = String;
    type Error = CanonicalError;

    fn serialize_element<T: Serialize + ?Sized>(
        &mut self,
        value: &T,
    ) -> std::result::Result<(), CanonicalError> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Fragment {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleStruct for SeqWriter {
    type Ok = String;
    type Error = CanonicalError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        value: &T,
    ) -> std::result::Result<(), CanonicalError> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Fragment {
        ser::SerializeSeq::end(self)
    }
}

struct VariantSeqWriter {
    variant: &'static str,
    seq: SeqWriter,
}

impl ser::SerializeTupleVariant for VariantSeqWriter {
    type Ok = String;
    type Error = CanonicalError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        value: &T,
    ) -> std::result::Result<(), CanonicalError> {
        ser::SerializeSeq::serialize_element(&mut self.seq, value)
    }

    fn end(self) -> Fragment {
        let inner = ser::SerializeSeq::end(self.seq)?;
        join_object(vec![(self.variant.to_string(), inner)])
    }
}

struct MapWriter {
    entries: Vec<(String, String)>,
    pending_key: Option<String>,
}

impl ser::SerializeMap for MapWriter {
    type Ok = String;
    type Error = CanonicalError;

    fn serialize_key<T: Serialize + ?Sized>(
        &mut self,
        key: &T,
    ) -> std::result::Result<(), CanonicalError> {
        self.pending_key = Some(key.serialize(KeySerializer)?);
        Ok(())
    }

    fn serialize_value<T: Serialize + ?Sized>(
        &mut self,
        value: &T,
    ) -> std::result::Result<(), CanonicalError> {
        let key = self
            .pending_key
            .take()
            .ok_or_else(|| CanonicalError("map value without a key".to_string()))?;
        self.entries.push((key, value.serialize(CanonicalSerializer)?));
        Ok(())
    }

    fn end(self) -> Fragment {
        join_object(self.entries)
    }
}

impl ser::SerializeStruct for MapWriter {
    type Ok = String;
    type Error = CanonicalError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> std::result::Result<(), CanonicalError> {
        self.entries
            .push((key.to_string(), value.serialize(CanonicalSerializer)?));
        Ok(())
    }

    fn end(self) -> Fragment {
        join_object(self.entries)
    }
}

struct VariantMapWriter {
    variant: &'static str,
    map: MapWriter,
}

impl ser::SerializeStructVariant for VariantMapWriter {
    type Ok = String;
    type Error = CanonicalError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> std::result::Result<(), CanonicalError> {
        ser::SerializeStruct::serialize_field(&mut self.map, key, value)
    }

    fn end(self) -> Fragment {
        let inner = ser::SerializeStruct::end(self.map)?;
        join_object(vec![(self.variant.to_string(), inner)])
    }
}

/// Object keys: strings as-is, integers and chars stringified like JS does
struct KeySerializer;

fn key_error() -> CanonicalError {
    CanonicalError("object keys must be strings".to_string())
}

impl ser::Serializer for KeySerializer {
    type Ok = String;
    type Error = CanonicalError;
    type SerializeSeq = ser::Impossible<String, CanonicalError>;
    type SerializeTuple = ser::Impossible<String, CanonicalError>;
    type SerializeTupleStruct = ser::Impossible<String, CanonicalError>;
    type SerializeTupleVariant = ser::Impossible<String, CanonicalError>;
    type SerializeMap = ser::Impossible<String, CanonicalError>;
    type SerializeStruct = ser::Impossible<String, CanonicalError>;
    type SerializeStructVariant = ser::Impossible<String, CanonicalError>;

    fn serialize_str(self, v: &str) -> Fragment {
        Ok(v.to_string())
    }

    fn serialize_char(self, v: char) -> Fragment {
        Ok(v.to_string())
    }

    fn serialize_i8(self, v: i8) -> Fragment {
        Ok(v.to_string())
    }

    fn serialize_i16(self, v: i16) -> Fragment {
        Ok(v.to_string())
    }

    fn serialize_i32(self, v: i32) -> Fragment {
        Ok(v.to_string())
    }

    fn serialize_i64(self, v: i64) -> Fragment {
        safe_integer(i128::from(v))
    }

    fn serialize_u8(self, v: u8) -> Fragment {
        Ok(v.to_string())
    }

    fn serialize_u16(self, v: u16) -> Fragment {
        Ok(v.to_string())
    }

    fn serialize_u32(self, v: u32) -> Fragment {
        Ok(v.to_string())
    }

    fn serialize_u64(self, v: u64) -> Fragment {
        safe_integer(i128::from(v))
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> Fragment {
        Ok(variant.to_string())
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Fragment {
        value.serialize(self)
    }

    fn serialize_bool(self, _v: bool) -> Fragment {
        Err(key_error())
    }

    fn serialize_f32(self, _v: f32) -> Fragment {
        Err(key_error())
    }

    fn serialize_f64(self, _v: f64) -> Fragment {
        Err(key_error())
    }

    fn serialize_bytes(self, _v: &[u8]) -> Fragment {
        Err(key_error())
    }

    fn serialize_none(self) -> Fragment {
        Err(key_error())
    }

    fn serialize_some<T: Serialize + ?Sized>(self, _value: &T) -> Fragment {
        Err(key_error())
    }

    fn serialize_unit(self) -> Fragment {
        Err(key_error())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Fragment {
        Err(key_error())
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Fragment {
        Err(key_error())
    }

    fn serialize_seq(
        self,
        _len: Option<usize>,
    ) -> std::result::Result<Self::SerializeSeq, CanonicalError> {
        Err(key_error())
    }

    fn serialize_tuple(
        self,
        _len: usize,
    ) -> std::result::Result<Self::SerializeTuple, CanonicalError> {
        Err(key_error())
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> std::result::Result<Self::SerializeTupleStruct, CanonicalError> {
        Err(key_error())
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> std::result::Result<Self::SerializeTupleVariant, CanonicalError> {
        Err(key_error())
    }

    fn serialize_map(
        self,
        _len: Option<usize>,
    ) -> std::result::Result<Self::SerializeMap, CanonicalError> {
        Err(key_error())
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> std::result::Result<Self::SerializeStruct, CanonicalError> {
        Err(key_error())
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> std::result::Result<Self::SerializeStructVariant, CanonicalError> {
        Err(key_error())
    }
}
