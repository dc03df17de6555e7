//! Self-contained CBOR codec for the subset of CBOR produced and consumed by
//! the protocol (major types 0..7, as described in the protocol's wire
//! format). Written from scratch rather than pulled in from a dependency so
//! the crate keeps working when a native CBOR library is unavailable.

use serde_json::{Map, Number, Value as JsonValue};

use crate::error::CborError;

/// A decoded (or pre-encode) CBOR value.
///
/// Map keys are always text strings (per the protocol's envelopes, which
/// never use non-string map keys) and are kept in insertion order rather
/// than a `HashMap`, so re-encoding preserves field order.
#[derive(Debug, Clone, PartialEq)]
pub enum CborValue {
    Unsigned(u64),
    /// Represents the CBOR negative integer `-1 - n`.
    Negative(u64),
    Bytes(Vec<u8>),
    Text(String),
    Array(Vec<CborValue>),
    Map(Vec<(String, CborValue)>),
    Bool(bool),
    Null,
    Float(f64),
}

impl CborValue {
    /// Converts a `serde_json::Value` into a `CborValue` following the
    /// protocol's encoding rules: safe integers become major type 0/1,
    /// everything else numeric becomes a float64, `undefined` has no JSON
    /// counterpart so there is nothing to special-case there.
    pub fn from_json(value: &JsonValue) -> CborValue {
        match value {
            JsonValue::Null => CborValue::Null,
            JsonValue::Bool(b) => CborValue::Bool(*b),
            JsonValue::Number(n) => number_to_cbor(n),
            JsonValue::String(s) => CborValue::Text(s.clone()),
            JsonValue::Array(items) => {
                CborValue::Array(items.iter().map(CborValue::from_json).collect())
            }
            JsonValue::Object(map) => CborValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), CborValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Converts a decoded `CborValue` back into a `serde_json::Value` so the
    /// rest of the crate can treat every codec's output uniformly. Byte
    /// strings become a JSON array of byte values since JSON has no binary
    /// type.
    pub fn into_json(self) -> JsonValue {
        match self {
            CborValue::Unsigned(n) => JsonValue::Number(n.into()),
            CborValue::Negative(n) => {
                // CBOR negative integer -1 - n.
                let value = -1i128 - i128::from(n);
                Number::from_f64(value as f64)
                    .map(JsonValue::Number)
                    .unwrap_or(JsonValue::Null)
            }
            CborValue::Bytes(bytes) => {
                JsonValue::Array(bytes.into_iter().map(|b| JsonValue::Number(b.into())).collect())
            }
            CborValue::Text(s) => JsonValue::String(s),
            CborValue::Array(items) => {
                JsonValue::Array(items.into_iter().map(CborValue::into_json).collect())
            }
            CborValue::Map(entries) => {
                let mut map = Map::with_capacity(entries.len());
                for (k, v) in entries {
                    map.insert(k, v.into_json());
                }
                JsonValue::Object(map)
            }
            CborValue::Bool(b) => JsonValue::Bool(b),
            CborValue::Null => JsonValue::Null,
            CborValue::Float(f) => Number::from_f64(f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
        }
    }
}

fn number_to_cbor(n: &Number) -> CborValue {
    if let Some(u) = n.as_u64() {
        if is_safe_integer(u as f64) {
            return CborValue::Unsigned(u);
        }
    }
    if let Some(i) = n.as_i64() {
        if is_safe_integer(i as f64) {
            return if i >= 0 {
                CborValue::Unsigned(i as u64)
            } else {
                CborValue::Negative((-1 - i) as u64)
            };
        }
    }
    CborValue::Float(n.as_f64().unwrap_or(0.0))
}

/// Largest integer magnitude exactly representable in an IEEE-754 double (2^53-1).
const MAX_SAFE_INTEGER: u64 = 9_007_199_254_740_991;

fn is_safe_integer(f: f64) -> bool {
    f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER as f64
}

/// Encodes a value into its CBOR byte representation.
pub fn encode(value: &CborValue) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &CborValue, out: &mut Vec<u8>) {
    match value {
        CborValue::Unsigned(n) => write_head(0, *n, out),
        CborValue::Negative(n) => write_head(1, *n, out),
        CborValue::Bytes(bytes) => {
            write_head(2, bytes.len() as u64, out);
            out.extend_from_slice(bytes);
        }
        CborValue::Text(s) => {
            let bytes = s.as_bytes();
            write_head(3, bytes.len() as u64, out);
            out.extend_from_slice(bytes);
        }
        CborValue::Array(items) => {
            write_head(4, items.len() as u64, out);
            for item in items {
                encode_into(item, out);
            }
        }
        CborValue::Map(entries) => {
            write_head(5, entries.len() as u64, out);
            for (k, v) in entries {
                encode_into(&CborValue::Text(k.clone()), out);
                encode_into(v, out);
            }
        }
        CborValue::Bool(false) => out.push(0xF4),
        CborValue::Bool(true) => out.push(0xF5),
        CborValue::Null => out.push(0xF6),
        CborValue::Float(f) => {
            out.push(0xFB); // major 7, additional info 27 (float64)
            out.extend_from_slice(&f.to_bits().to_be_bytes());
        }
    }
}

fn write_head(major: u8, value: u64, out: &mut Vec<u8>) {
    let prefix = major << 5;
    if value < 24 {
        out.push(prefix | value as u8);
    } else if value <= u64::from(u8::MAX) {
        out.push(prefix | 24);
        out.push(value as u8);
    } else if value <= u64::from(u16::MAX) {
        out.push(prefix | 25);
        out.extend_from_slice(&(value as u16).to_be_bytes());
    } else if value <= u64::from(u32::MAX) {
        out.push(prefix | 26);
        out.extend_from_slice(&(value as u32).to_be_bytes());
    } else {
        out.push(prefix | 27);
        out.extend_from_slice(&value.to_be_bytes());
    }
}

/// Decodes a single top-level CBOR item from `bytes`. Any remaining bytes
/// after the item are an error (trailing-byte check is mandatory).
pub fn decode(bytes: &[u8]) -> Result<CborValue, CborError> {
    let mut cursor = Cursor { bytes, pos: 0 };
    let value = decode_value(&mut cursor)?;
    let remaining = cursor.bytes.len() - cursor.pos;
    if remaining != 0 {
        return Err(CborError::TrailingBytes(remaining));
    }
    Ok(value)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn next_byte(&mut self) -> Result<u8, CborError> {
        let b = *self.bytes.get(self.pos).ok_or(CborError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CborError> {
        let end = self.pos.checked_add(n).ok_or(CborError::UnexpectedEnd)?;
        let slice = self.bytes.get(self.pos..end).ok_or(CborError::UnexpectedEnd)?;
        self.pos = end;
        Ok(slice)
    }

    /// Reads the argument that follows a head byte's additional-info field.
    fn read_argument(&mut self, major: u8, additional_info: u8) -> Result<u64, CborError> {
        match additional_info {
            0..=23 => Ok(u64::from(additional_info)),
            24 => Ok(u64::from(self.next_byte()?)),
            25 => {
                let bytes = self.take(2)?;
                Ok(u64::from(u16::from_be_bytes([bytes[0], bytes[1]])))
            }
            26 => {
                let bytes = self.take(4)?;
                Ok(u64::from(u32::from_be_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3],
                ])))
            }
            27 => {
                let bytes = self.take(8)?;
                let mut arr = [0u8; 8];
                arr.copy_from_slice(bytes);
                let value = u64::from_be_bytes(arr);
                if matches!(major, 0 | 1) && value > MAX_SAFE_INTEGER {
                    return Err(CborError::IntegerOutOfRange(value));
                }
                Ok(value)
            }
            other => Err(CborError::UnsupportedAdditionalInfo(other, major)),
        }
    }
}

fn decode_value(cursor: &mut Cursor<'_>) -> Result<CborValue, CborError> {
    let head = cursor.next_byte()?;
    let major = head >> 5;
    let additional_info = head & 0x1F;

    match major {
        0 => Ok(CborValue::Unsigned(cursor.read_argument(major, additional_info)?)),
        1 => Ok(CborValue::Negative(cursor.read_argument(major, additional_info)?)),
        2 => {
            let len = cursor.read_argument(major, additional_info)? as usize;
            Ok(CborValue::Bytes(cursor.take(len)?.to_vec()))
        }
        3 => {
            let len = cursor.read_argument(major, additional_info)? as usize;
            let bytes = cursor.take(len)?;
            let text = std::str::from_utf8(bytes)
                .map_err(|_| CborError::InvalidUtf8)?
                .to_string();
            Ok(CborValue::Text(text))
        }
        4 => {
            let len = cursor.read_argument(major, additional_info)? as usize;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(decode_value(cursor)?);
            }
            Ok(CborValue::Array(items))
        }
        5 => {
            let len = cursor.read_argument(major, additional_info)? as usize;
            let mut entries = Vec::with_capacity(len);
            for _ in 0..len {
                let key = match decode_value(cursor)? {
                    CborValue::Text(s) => s,
                    _ => return Err(CborError::NonStringMapKey),
                };
                let value = decode_value(cursor)?;
                entries.push((key, value));
            }
            Ok(CborValue::Map(entries))
        }
        6 => {
            // Tagged value: skip the tag argument, return the inner value.
            let _tag = cursor.read_argument(major, additional_info)?;
            decode_value(cursor)
        }
        7 => decode_simple_or_float(cursor, additional_info),
        other => Err(CborError::UnsupportedAdditionalInfo(additional_info, other)),
    }
}

fn decode_simple_or_float(cursor: &mut Cursor<'_>, additional_info: u8) -> Result<CborValue, CborError> {
    match additional_info {
        20 => Ok(CborValue::Bool(false)),
        21 => Ok(CborValue::Bool(true)),
        22 | 23 => Ok(CborValue::Null),
        25 => {
            let bytes = cursor.take(2)?;
            let bits = u16::from_be_bytes([bytes[0], bytes[1]]);
            Ok(CborValue::Float(half_to_f64(bits)))
        }
        26 => {
            let bytes = cursor.take(4)?;
            let bits = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            Ok(CborValue::Float(f64::from(f32::from_bits(bits))))
        }
        27 => {
            let bytes = cursor.take(8)?;
            let mut arr = [0u8; 8];
            arr.copy_from_slice(bytes);
            Ok(CborValue::Float(f64::from_bits(u64::from_be_bytes(arr))))
        }
        other => Err(CborError::UnsupportedAdditionalInfo(other, 7)),
    }
}

fn half_to_f64(bits: u16) -> f64 {
    let sign = if bits & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exponent = (bits >> 10) & 0x1F;
    let fraction = f64::from(bits & 0x3FF);

    let magnitude = if exponent == 0 {
        fraction * 2f64.powi(-24)
    } else if exponent == 0x1F {
        if fraction == 0.0 {
            f64::INFINITY
        } else {
            f64::NAN
        }
    } else {
        (1.0 + fraction / 1024.0) * 2f64.powi(i32::from(exponent) - 15)
    };

    sign * magnitude
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: CborValue) {
        let bytes = encode(&value);
        let decoded = decode(&bytes).expect("decode should succeed");
        assert_eq!(decoded, value);
    }

    #[test]
    fn roundtrips_scalars() {
        roundtrip(CborValue::Null);
        roundtrip(CborValue::Bool(true));
        roundtrip(CborValue::Bool(false));
        roundtrip(CborValue::Unsigned(0));
        roundtrip(CborValue::Unsigned(23));
        roundtrip(CborValue::Unsigned(24));
        roundtrip(CborValue::Unsigned(1000));
        roundtrip(CborValue::Unsigned(MAX_SAFE_INTEGER));
        roundtrip(CborValue::Negative(0)); // -1
        roundtrip(CborValue::Negative(1000));
        roundtrip(CborValue::Float(1.5));
        roundtrip(CborValue::Float(-0.0001));
        roundtrip(CborValue::Text("hello rosbridge".to_string()));
        roundtrip(CborValue::Bytes(vec![1, 2, 3, 255]));
    }

    #[test]
    fn rejects_length_27_integer_above_safe_ceiling() {
        let mut bytes = vec![0x1b]; // major type 0, additional info 27
        bytes.extend_from_slice(&(MAX_SAFE_INTEGER + 1).to_be_bytes());
        assert_eq!(
            decode(&bytes),
            Err(CborError::IntegerOutOfRange(MAX_SAFE_INTEGER + 1))
        );

        let mut bytes = vec![0x3b]; // major type 1, additional info 27
        bytes.extend_from_slice(&(MAX_SAFE_INTEGER + 1).to_be_bytes());
        assert_eq!(
            decode(&bytes),
            Err(CborError::IntegerOutOfRange(MAX_SAFE_INTEGER + 1))
        );
    }

    #[test]
    fn roundtrips_containers() {
        roundtrip(CborValue::Array(vec![
            CborValue::Unsigned(1),
            CborValue::Text("x".into()),
            CborValue::Bool(true),
        ]));
        roundtrip(CborValue::Map(vec![
            ("a".into(), CborValue::Unsigned(1)),
            ("b".into(), CborValue::Array(vec![CborValue::Null])),
        ]));
    }

    #[test]
    fn json_roundtrip_for_json_shaped_values() {
        let json = serde_json::json!({
            "op": "publish",
            "topic": "/demo",
            "msg": {"a": 1, "b": [1,2,3], "c": true, "d": null, "e": 1.5}
        });
        let cbor = CborValue::from_json(&json);
        let bytes = encode(&cbor);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.into_json(), json);
    }

    #[test]
    fn decodes_float16_and_float32() {
        // 0x3C00 == 1.0 in float16
        let bytes = [0xF9, 0x3C, 0x00];
        assert_eq!(decode(&bytes).unwrap(), CborValue::Float(1.0));

        // 1.5f32 big-endian
        let f32_bytes = 1.5f32.to_be_bytes();
        let mut bytes = vec![0xFA];
        bytes.extend_from_slice(&f32_bytes);
        assert_eq!(decode(&bytes).unwrap(), CborValue::Float(1.5));
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut bytes = encode(&CborValue::Unsigned(1));
        bytes.push(0x00);
        assert_eq!(decode(&bytes), Err(CborError::TrailingBytes(1)));
    }

    #[test]
    fn rejects_truncated_input() {
        let bytes = [0x19]; // additional info 25 (u16) with no following bytes
        assert_eq!(decode(&bytes), Err(CborError::UnexpectedEnd));
    }

    #[test]
    fn passes_through_tagged_values() {
        // tag 1 (epoch timestamp) wrapping unsigned 0
        let bytes = [0xC1, 0x00];
        assert_eq!(decode(&bytes).unwrap(), CborValue::Unsigned(0));
    }

    #[test]
    fn rejects_reserved_additional_info() {
        let bytes = [0b000_11100]; // major 0, additional info 28
        assert!(matches!(
            decode(&bytes),
            Err(CborError::UnsupportedAdditionalInfo(28, 0))
        ));
    }
}
