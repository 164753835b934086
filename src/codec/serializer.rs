//! Value serializers
//!
//! Values cross the codec boundary as `serde_json::Value` so serializers
//! stay object safe and can be picked at runtime.

use serde_json::Value;

use crate::utils::CodecError;

/// Turns values into bytes and back
pub trait Serializer: Send + Sync {
    fn name(&self) -> &'static str;

    fn dumps(&self, value: &Value) -> Result<Vec<u8>, CodecError>;

    fn loads(&self, data: &[u8]) -> Result<Value, CodecError>;
}

/// Compact JSON text
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn dumps(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Serialize(e.to_string()))
    }

    fn loads(&self, data: &[u8]) -> Result<Value, CodecError> {
        serde_json::from_slice(data).map_err(|e| CodecError::Deserialize(e.to_string()))
    }
}

/// MessagePack with named map fields
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgPackSerializer;

impl Serializer for MsgPackSerializer {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn dumps(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        rmp_serde::to_vec_named(value).map_err(|e| CodecError::Serialize(e.to_string()))
    }

    fn loads(&self, data: &[u8]) -> Result<Value, CodecError> {
        rmp_serde::from_slice(data).map_err(|e| CodecError::Deserialize(e.to_string()))
    }
}
