//! Value encoding for cache payloads
//!
//! Plain integers are stored as decimal text so server-side INCRBY keeps
//! working on them. Everything else is serialized, then compressed.

pub mod compressor;
pub mod registry;
pub mod serializer;

use serde_json::Value;

use crate::utils::CodecError;

pub use compressor::{Compressor, IdentityCompressor, Lz4Compressor, ZstdCompressor};
pub use registry::{CompressorKind, SerializerKind};
pub use serializer::{JsonSerializer, MsgPackSerializer, Serializer};

/// Serializer + compressor pair applied to every stored value
pub struct ValueCodec {
    serializer: Box<dyn Serializer>,
    compressor: Box<dyn Compressor>,
}

impl ValueCodec {
    pub fn new(serializer: Box<dyn Serializer>, compressor: Box<dyn Compressor>) -> Self {
        Self {
            serializer,
            compressor,
        }
    }

    pub fn from_kinds(serializer: SerializerKind, compressor: CompressorKind) -> Self {
        Self::new(serializer.build(), compressor.build())
    }

    /// Integer stored as plain decimal, if `value` is one
    pub fn as_plain_integer(value: &Value) -> Option<i64> {
        match value {
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        if let Some(n) = Self::as_plain_integer(value) {
            let mut buf = itoa::Buffer::new();
            return Ok(buf.format(n).as_bytes().to_vec());
        }
        let serialized = self.serializer.dumps(value)?;
        self.compressor.compress(&serialized)
    }

    pub fn decode(&self, data: &[u8]) -> Result<Value, CodecError> {
        if let Some(n) = parse_integer(data) {
            return Ok(Value::from(n));
        }

        // Short values were never compressed, but compressed output can be
        // short too; the frame magic tells them apart.
        if data.len() <= self.compressor.min_length() && !self.compressor.is_compressed(data) {
            return self.serializer.loads(data);
        }
        let decompressed = self.compressor.decompress(data)?;
        self.serializer.loads(&decompressed)
    }

    pub fn serializer_name(&self) -> &'static str {
        self.serializer.name()
    }

    pub fn compressor_name(&self) -> &'static str {
        self.compressor.name()
    }
}

impl Default for ValueCodec {
    fn default() -> Self {
        Self::from_kinds(SerializerKind::default(), CompressorKind::default())
    }
}

/// Decimal i64 text (optional leading '-')
pub(crate) fn parse_integer(data: &[u8]) -> Option<i64> {
    let digits = data.strip_prefix(b"-").unwrap_or(data);
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(data).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn codecs() -> Vec<ValueCodec> {
        let mut out = Vec::new();
        for s in [SerializerKind::Json, SerializerKind::Msgpack] {
            for c in [CompressorKind::Identity, CompressorKind::Lz4, CompressorKind::Zstd] {
                out.push(ValueCodec::from_kinds(s, c));
            }
        }
        out
    }

    #[test]
    fn test_integers_stored_plain() {
        let codec = ValueCodec::from_kinds(SerializerKind::Msgpack, CompressorKind::Zstd);
        assert_eq!(codec.encode(&json!(42)).unwrap(), b"42");
        assert_eq!(codec.encode(&json!(-7)).unwrap(), b"-7");
        assert_eq!(codec.decode(b"42").unwrap(), json!(42));
        assert_eq!(codec.decode(b"-7").unwrap(), json!(-7));
    }

    #[test]
    fn test_non_integers_are_serialized() {
        let codec = ValueCodec::default();
        assert_eq!(codec.encode(&json!("42")).unwrap(), b"\"42\"");
        assert_eq!(codec.encode(&json!(true)).unwrap(), b"true");
        assert_eq!(codec.decode(b"\"42\"").unwrap(), json!("42"));
        assert_eq!(codec.decode(b"1.5").unwrap(), json!(1.5));
    }

    #[test]
    fn test_round_trip_every_codec() {
        let long_text = "cache ".repeat(100);
        let values = [
            json!(null),
            json!("short"),
            json!(long_text),
            json!(3.25),
            json!(u64::MAX),
            json!({"id": 7, "items": [1, 2, 3], "name": long_text}),
        ];
        for codec in codecs() {
            for value in &values {
                let encoded = codec.encode(value).unwrap();
                assert_eq!(
                    &codec.decode(&encoded).unwrap(),
                    value,
                    "{}+{}",
                    codec.serializer_name(),
                    codec.compressor_name()
                );
            }
        }
    }

    #[test]
    fn test_short_values_round_trip_every_codec() {
        // Each of these serializes to at most 15 bytes in both formats
        let values = [
            json!(null),
            json!(true),
            json!(false),
            json!([]),
            json!({}),
            json!(3.25),
            json!(-0.5),
            json!("x"),
            json!(""),
            json!("short"),
            json!([1, 2]),
            json!({"a": 1}),
        ];
        for codec in codecs() {
            for value in &values {
                let encoded = codec.encode(value).unwrap();
                assert!(encoded.len() <= 15, "{} encodes to {} bytes", value, encoded.len());
                assert_eq!(
                    &codec.decode(&encoded).unwrap(),
                    value,
                    "{}+{}",
                    codec.serializer_name(),
                    codec.compressor_name()
                );
            }
        }
    }

    #[test]
    fn test_highly_compressible_value_just_over_threshold() {
        // 101+ serialized bytes that zstd shrinks below its own threshold
        let codec = ValueCodec::from_kinds(SerializerKind::Json, CompressorKind::Zstd);
        let value = json!("z".repeat(120));
        let encoded = codec.encode(&value).unwrap();
        assert!(encoded.len() <= 100);
        assert_eq!(codec.decode(&encoded).unwrap(), value);
    }

    #[test]
    fn test_large_values_are_compressed() {
        let codec = ValueCodec::from_kinds(SerializerKind::Json, CompressorKind::Zstd);
        let value = json!("abc".repeat(500));
        let encoded = codec.encode(&value).unwrap();
        assert!(encoded.len() < 1500);
    }

    #[test]
    fn test_corrupt_large_payload_is_error() {
        let codec = ValueCodec::from_kinds(SerializerKind::Json, CompressorKind::Lz4);
        let garbage = vec![0xffu8; 64];
        assert!(matches!(
            codec.decode(&garbage),
            Err(CodecError::Decompress(_))
        ));
    }

    #[test]
    fn test_parse_integer() {
        assert_eq!(parse_integer(b"0"), Some(0));
        assert_eq!(parse_integer(b"-12"), Some(-12));
        assert_eq!(parse_integer(b"-"), None);
        assert_eq!(parse_integer(b"+1"), None);
        assert_eq!(parse_integer(b"1.0"), None);
        assert_eq!(parse_integer(b"99999999999999999999"), None);
    }
}
