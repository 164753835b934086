//! Raw TCP connection to a single node
//!
//! Blocking socket with buffered reader/writer halves and the RESP codec
//! from `utils::resp`.

use std::io::{self, BufReader, BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use super::control_plane::{ControlPlane, ControlPlaneExt};
use super::pool::Connector;
use crate::cluster::Endpoint;
use crate::config::AuthConfig;
use crate::utils::{ConnectionError, RespDecoder, RespEncoder, RespValue};

/// Raw connection wrapper
///
/// The stream is split into separate reader/writer buffers.
pub struct RawConnection {
    writer: BufWriter<TcpStream>,
    reader: BufReader<TcpStream>,
    encoder: RespEncoder,
}

impl RawConnection {
    /// Create new TCP connection
    ///
    /// `connect_timeout` bounds the TCP handshake; `socket_timeout` bounds
    /// every subsequent read and write.
    pub fn connect_tcp(
        endpoint: &Endpoint,
        connect_timeout: Duration,
        socket_timeout: Duration,
    ) -> Result<Self, ConnectionError> {
        let connect_failed = |source: io::Error| ConnectionError::ConnectFailed {
            host: endpoint.host.clone(),
            port: endpoint.port,
            source,
        };

        let addrs: Vec<_> = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(connect_failed)?
            .collect();
        if addrs.is_empty() {
            return Err(connect_failed(io::Error::new(
                io::ErrorKind::NotFound,
                "No addresses found",
            )));
        }

        // Try every resolved address, keep the last failure
        let mut last_err = None;
        let mut stream = None;
        for addr in &addrs {
            match TcpStream::connect_timeout(addr, connect_timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        let stream = match stream {
            Some(s) => s,
            None => {
                return Err(connect_failed(last_err.unwrap_or_else(|| {
                    io::Error::new(io::ErrorKind::NotConnected, "No address connected")
                })))
            }
        };

        // Disable Nagle's algorithm; commands are small and latency bound
        stream.set_nodelay(true).ok();
        stream
            .set_read_timeout(Some(socket_timeout))
            .map_err(connect_failed)?;
        stream
            .set_write_timeout(Some(socket_timeout))
            .map_err(connect_failed)?;

        let writer = BufWriter::with_capacity(16384, stream.try_clone().map_err(connect_failed)?);
        let reader = BufReader::with_capacity(16384, stream);

        Ok(RawConnection {
            writer,
            reader,
            encoder: RespEncoder::with_capacity(256),
        })
    }

    /// Send an encoded command and read one reply
    fn round_trip(&mut self) -> io::Result<RespValue> {
        self.writer.write_all(self.encoder.as_bytes())?;
        self.writer.flush()?;
        RespDecoder::new(&mut self.reader).decode()
    }
}

impl ControlPlane for RawConnection {
    fn execute_binary(&mut self, args: &[&[u8]]) -> io::Result<RespValue> {
        self.encoder.clear();
        self.encoder.encode_command(args);
        self.round_trip()
    }
}

/// Opens authenticated TCP connections with the configured timeouts
#[derive(Debug, Clone)]
pub struct TcpConnector {
    pub connect_timeout: Duration,
    pub socket_timeout: Duration,
    pub auth: Option<AuthConfig>,
}

impl Connector for TcpConnector {
    fn open(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Box<dyn ControlPlane + Send>, ConnectionError> {
        let mut conn = RawConnection::connect_tcp(endpoint, self.connect_timeout, self.socket_timeout)?;

        if let Some(ref auth) = self.auth {
            conn.authenticate(&auth.password, auth.username.as_deref())
                .map_err(|e| ConnectionError::AuthFailed(format!("{}: {}", endpoint, e)))?;
        }

        debug!("Opened connection to {}", endpoint);
        Ok(Box::new(conn))
    }

    fn timeout_ms(&self) -> u64 {
        self.socket_timeout.as_millis() as u64
    }
}
