//! Cluster endpoint representation

use std::fmt;
use std::str::FromStr;

/// A server process address; equality by value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    /// Hostname or IP
    pub host: String,
    /// Port
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = String;

    /// Parse `host:port`, also accepting the `host:port@cport[,hostname]`
    /// form printed by CLUSTER NODES
    fn from_str(addr: &str) -> Result<Self, Self::Err> {
        let addr = addr.split(',').next().unwrap_or(addr);
        let host_port = addr.split('@').next().unwrap_or(addr);

        let (host, port) = host_port
            .rsplit_once(':')
            .ok_or_else(|| format!("Missing port in address '{}'", addr))?;
        if host.is_empty() {
            return Err(format!("Missing host in address '{}'", addr));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| format!("Invalid port in address '{}'", addr))?;

        // IPv6 literals may be bracketed: [::1]:6379
        let host = host.trim_start_matches('[').trim_end_matches(']');
        Ok(Endpoint::new(host, port))
    }
}
