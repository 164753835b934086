//! RESP (Redis Serialization Protocol) encoder and decoder
//!
//! Commands are always encoded as arrays of bulk strings so keys and
//! values are binary safe. Replies are decoded from any buffered reader.

use std::io::{self, BufRead, Read};

use crate::cluster::RedirectInfo;

/// RESP value types
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple string (+OK\r\n)
    SimpleString(String),
    /// Error (-ERR message\r\n)
    Error(String),
    /// Integer (:1000\r\n)
    Integer(i64),
    /// Bulk string ($6\r\nfoobar\r\n)
    BulkString(Vec<u8>),
    /// Null bulk string or null array ($-1\r\n, *-1\r\n)
    Null,
    /// Array (*2\r\n...)
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Check if this is an error response
    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Check if this is a MOVED error
    pub fn is_moved(&self) -> bool {
        matches!(self, RespValue::Error(e) if e.starts_with("MOVED "))
    }

    /// Check if this is an ASK error
    pub fn is_ask(&self) -> bool {
        matches!(self, RespValue::Error(e) if e.starts_with("ASK "))
    }

    /// MOVED/ASK target, if this is a redirect reply
    pub fn parse_redirect(&self) -> Option<RedirectInfo> {
        match self {
            RespValue::Error(e) => RedirectInfo::parse(e),
            _ => None,
        }
    }

    /// Short type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            RespValue::SimpleString(_) => "simple-string",
            RespValue::Error(_) => "error",
            RespValue::Integer(_) => "integer",
            RespValue::BulkString(_) => "bulk-string",
            RespValue::Null => "null",
            RespValue::Array(_) => "array",
        }
    }

    /// Get as string (for simple string or UTF-8 bulk string)
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Get as bytes (for bulk string)
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::BulkString(b) => Some(b),
            _ => None,
        }
    }

    /// Get as integer
    ///
    /// Bulk strings holding a decimal integer are accepted too; some
    /// servers report ports that way in CLUSTER SLOTS.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RespValue::Integer(i) => Some(*i),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok()?.parse().ok(),
            _ => None,
        }
    }

    /// Get as array
    pub fn as_array(&self) -> Option<&[RespValue]> {
        match self {
            RespValue::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// True for `+OK`
    pub fn is_ok(&self) -> bool {
        matches!(self, RespValue::SimpleString(s) if s == "OK")
    }
}

/// RESP encoder with pre-allocated buffer
pub struct RespEncoder {
    buf: Vec<u8>,
}

impl RespEncoder {
    /// Create new encoder with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Clear buffer for reuse
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Get encoded bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Encode a command as RESP array of bulk strings
    pub fn encode_command(&mut self, args: &[&[u8]]) {
        self.buf.push(b'*');
        self.write_int(args.len() as i64);
        self.buf.extend_from_slice(b"\r\n");

        for arg in args {
            self.buf.push(b'$');
            self.write_int(arg.len() as i64);
            self.buf.extend_from_slice(b"\r\n");
            self.buf.extend_from_slice(arg);
            self.buf.extend_from_slice(b"\r\n");
        }
    }

    /// Encode a command from string slices
    pub fn encode_command_str(&mut self, args: &[&str]) {
        let byte_args: Vec<&[u8]> = args.iter().map(|s| s.as_bytes()).collect();
        self.encode_command(&byte_args);
    }

    #[inline]
    fn write_int(&mut self, value: i64) {
        let mut buffer = itoa::Buffer::new();
        self.buf.extend_from_slice(buffer.format(value).as_bytes());
    }
}

/// RESP decoder for streaming reads
pub struct RespDecoder<R> {
    reader: R,
    line_buf: Vec<u8>,
}

impl<R: BufRead> RespDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_buf: Vec::with_capacity(128),
        }
    }

    /// Decode next RESP value from stream
    pub fn decode(&mut self) -> io::Result<RespValue> {
        let (type_byte, header) = self.read_header()?;

        match type_byte {
            b'+' => Ok(RespValue::SimpleString(header)),
            b'-' => Ok(RespValue::Error(header)),
            b':' => Ok(RespValue::Integer(parse_len(&header, "integer")?)),
            b'$' => {
                let len = parse_len(&header, "bulk string length")?;
                if len < 0 {
                    return Ok(RespValue::Null);
                }

                let mut data = vec![0u8; len as usize];
                self.reader.read_exact(&mut data)?;
                let mut crlf = [0u8; 2];
                self.reader.read_exact(&mut crlf)?;
                if &crlf != b"\r\n" {
                    return Err(invalid("Bulk string not terminated by CRLF"));
                }

                Ok(RespValue::BulkString(data))
            }
            b'*' => {
                let count = parse_len(&header, "array length")?;
                if count < 0 {
                    return Ok(RespValue::Null);
                }

                let mut elements = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    elements.push(self.decode()?);
                }
                Ok(RespValue::Array(elements))
            }
            other => Err(invalid(&format!(
                "Invalid RESP type byte: {}",
                other as char
            ))),
        }
    }

    /// Read a `<type><content>\r\n` line
    fn read_header(&mut self) -> io::Result<(u8, String)> {
        self.line_buf.clear();
        let n = self.reader.read_until(b'\n', &mut self.line_buf)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Connection closed",
            ));
        }

        while matches!(self.line_buf.last(), Some(b'\n') | Some(b'\r')) {
            self.line_buf.pop();
        }
        let (&type_byte, content) = self
            .line_buf
            .split_first()
            .ok_or_else(|| invalid("Empty RESP line"))?;

        Ok((type_byte, String::from_utf8_lossy(content).into_owned()))
    }
}

fn parse_len(content: &str, what: &str) -> io::Result<i64> {
    content
        .parse()
        .map_err(|_| invalid(&format!("Invalid {}: {}", what, content)))
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn decode(data: &[u8]) -> io::Result<RespValue> {
        RespDecoder::new(Cursor::new(data)).decode()
    }

    #[test]
    fn test_encode_cluster_slots() {
        let mut encoder = RespEncoder::with_capacity(64);
        encoder.encode_command_str(&["CLUSTER", "SLOTS"]);
        assert_eq!(encoder.as_bytes(), b"*2\r\n$7\r\nCLUSTER\r\n$5\r\nSLOTS\r\n");
    }

    #[test]
    fn test_encode_binary_value() {
        let mut encoder = RespEncoder::with_capacity(64);
        encoder.encode_command(&[b"SET", b"k", b"\x00\r\n"]);
        assert_eq!(
            encoder.as_bytes(),
            b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$3\r\n\x00\r\n\r\n"
        );
    }

    #[test]
    fn test_decode_simple_and_error() {
        assert_eq!(decode(b"+OK\r\n").unwrap(), RespValue::SimpleString("OK".into()));
        let moved = decode(b"-MOVED 3999 127.0.0.1:7001\r\n").unwrap();
        assert!(moved.is_moved());
        assert!(!moved.is_ask());
    }

    #[test]
    fn test_decode_bulk_with_crlf_inside() {
        let value = decode(b"$4\r\na\r\nb\r\n").unwrap();
        assert_eq!(value, RespValue::BulkString(b"a\r\nb".to_vec()));
    }

    #[test]
    fn test_decode_nulls() {
        assert_eq!(decode(b"$-1\r\n").unwrap(), RespValue::Null);
        assert_eq!(decode(b"*-1\r\n").unwrap(), RespValue::Null);
    }

    #[test]
    fn test_decode_nested_slots_entry() {
        let data = b"*1\r\n*3\r\n:0\r\n:5460\r\n*2\r\n$9\r\n127.0.0.1\r\n:7000\r\n";
        let value = decode(data).unwrap();
        let ranges = value.as_array().unwrap();
        let entry = ranges[0].as_array().unwrap();
        assert_eq!(entry[0].as_i64(), Some(0));
        assert_eq!(entry[1].as_i64(), Some(5460));
        let node = entry[2].as_array().unwrap();
        assert_eq!(node[0].as_str(), Some("127.0.0.1"));
        assert_eq!(node[1].as_i64(), Some(7000));
    }

    #[test]
    fn test_decode_eof_and_garbage() {
        assert_eq!(
            decode(b"").unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );
        assert_eq!(decode(b"?x\r\n").unwrap_err().kind(), io::ErrorKind::InvalidData);
        assert_eq!(decode(b"$3\r\nabcXY").unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_parse_redirect() {
        let moved = RespValue::Error("MOVED 12182 10.0.0.3:7002".to_string());
        assert!(moved.is_moved());
        let info = moved.parse_redirect().unwrap();
        assert_eq!(info.slot, 12182);
        assert_eq!(info.endpoint().to_string(), "10.0.0.3:7002");
        assert!(!info.is_ask);

        assert!(RespValue::Error("ERR wrong type".to_string())
            .parse_redirect()
            .is_none());
        assert!(RespValue::SimpleString("MOVED 1 a:1".to_string())
            .parse_redirect()
            .is_none());
    }
}
