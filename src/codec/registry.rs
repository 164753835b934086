//! Named codec choices
//!
//! Configuration selects codecs by name; each kind builds its boxed
//! implementation.

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;

use super::compressor::{Compressor, IdentityCompressor, Lz4Compressor, ZstdCompressor};
use super::serializer::{JsonSerializer, MsgPackSerializer, Serializer};

/// Available serializers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SerializerKind {
    #[default]
    Json,
    Msgpack,
}

impl SerializerKind {
    pub fn build(self) -> Box<dyn Serializer> {
        match self {
            SerializerKind::Json => Box::new(JsonSerializer),
            SerializerKind::Msgpack => Box::new(MsgPackSerializer),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SerializerKind::Json => "json",
            SerializerKind::Msgpack => "msgpack",
        }
    }
}

impl fmt::Display for SerializerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SerializerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(SerializerKind::Json),
            "msgpack" | "messagepack" => Ok(SerializerKind::Msgpack),
            other => Err(format!("Unknown serializer: {}", other)),
        }
    }
}

/// Available compressors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CompressorKind {
    #[default]
    Identity,
    Lz4,
    Zstd,
}

impl CompressorKind {
    pub fn build(self) -> Box<dyn Compressor> {
        match self {
            CompressorKind::Identity => Box::new(IdentityCompressor),
            CompressorKind::Lz4 => Box::new(Lz4Compressor::default()),
            CompressorKind::Zstd => Box::new(ZstdCompressor::default()),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CompressorKind::Identity => "identity",
            CompressorKind::Lz4 => "lz4",
            CompressorKind::Zstd => "zstd",
        }
    }
}

impl fmt::Display for CompressorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "identity" | "none" => Ok(CompressorKind::Identity),
            "lz4" => Ok(CompressorKind::Lz4),
            "zstd" => Ok(CompressorKind::Zstd),
            other => Err(format!("Unknown compressor: {}", other)),
        }
    }
}
