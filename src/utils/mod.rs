//! Utility modules

pub mod error;
pub mod resp;

pub use error::{
    CacheError, ClusterError, CodecError, ConnectionError, ProtocolError, Result,
};
pub use resp::{RespDecoder, RespEncoder, RespValue};
