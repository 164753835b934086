//! Control Plane trait for server communication
//!
//! This trait abstracts a single-node command channel. Routing, pooling
//! and the cache facade only ever talk to nodes through it, so the
//! transport can be swapped (TCP today, an in-memory fake in tests).

use crate::utils::RespValue;
use std::io;

/// Single-node command execution
pub trait ControlPlane {
    /// Execute a command with binary arguments
    ///
    /// Server error replies (`-ERR ...`) are returned as
    /// `Ok(RespValue::Error)`; `Err` is reserved for transport failures.
    fn execute_binary(&mut self, args: &[&[u8]]) -> io::Result<RespValue>;

    /// Execute a command with string arguments
    ///
    /// # Example
    /// ```ignore
    /// let response = conn.execute(&["CLUSTER", "SLOTS"])?;
    /// ```
    fn execute(&mut self, args: &[&str]) -> io::Result<RespValue> {
        let byte_args: Vec<&[u8]> = args.iter().map(|s| s.as_bytes()).collect();
        self.execute_binary(&byte_args)
    }
}

/// Extension trait with common control plane operations
pub trait ControlPlaneExt: ControlPlane {
    /// Send PING and verify PONG response
    fn ping(&mut self) -> io::Result<bool> {
        match self.execute(&["PING"])? {
            RespValue::SimpleString(s) => Ok(s == "PONG"),
            _ => Ok(false),
        }
    }

    /// Raw CLUSTER SLOTS reply
    fn cluster_slots(&mut self) -> io::Result<RespValue> {
        match self.execute(&["CLUSTER", "SLOTS"])? {
            RespValue::Error(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
            reply @ RespValue::Array(_) => Ok(reply),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unexpected CLUSTER SLOTS response: {:?}", other),
            )),
        }
    }

    /// Enable reads on a replica connection for this session
    fn readonly(&mut self) -> io::Result<bool> {
        Ok(self.execute(&["READONLY"])?.is_ok())
    }

    /// Send AUTH command
    fn authenticate(&mut self, password: &str, username: Option<&str>) -> io::Result<()> {
        let response = match username {
            Some(user) => self.execute(&["AUTH", user, password])?,
            None => self.execute(&["AUTH", password])?,
        };

        match response {
            RespValue::SimpleString(s) if s == "OK" => Ok(()),
            RespValue::Error(e) => Err(io::Error::new(io::ErrorKind::PermissionDenied, e)),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unexpected AUTH response: {:?}", other),
            )),
        }
    }
}

// Blanket implementation: any ControlPlane automatically gets ControlPlaneExt
impl<T: ControlPlane + ?Sized> ControlPlaneExt for T {}

#[cfg(test)]
mod tests {
    use super::*;

    // Replays canned responses and records the commands it saw
    struct MockControlPlane {
        responses: Vec<RespValue>,
        seen: Vec<Vec<String>>,
    }

    impl MockControlPlane {
        fn new(responses: Vec<RespValue>) -> Self {
            Self {
                responses,
                seen: Vec::new(),
            }
        }
    }

    impl ControlPlane for MockControlPlane {
        fn execute_binary(&mut self, args: &[&[u8]]) -> io::Result<RespValue> {
            self.seen.push(
                args.iter()
                    .map(|a| String::from_utf8_lossy(a).into_owned())
                    .collect(),
            );
            if self.responses.is_empty() {
                return Err(io::Error::new(io::ErrorKind::Other, "No more responses"));
            }
            Ok(self.responses.remove(0))
        }
    }

    #[test]
    fn test_ping() {
        let mut mock = MockControlPlane::new(vec![RespValue::SimpleString("PONG".to_string())]);
        assert!(mock.ping().unwrap());
        assert_eq!(mock.seen, vec![vec!["PING".to_string()]]);
    }

    #[test]
    fn test_cluster_slots_error_reply() {
        let mut mock = MockControlPlane::new(vec![RespValue::Error(
            "ERR This instance has cluster support disabled".to_string(),
        )]);
        assert!(mock.cluster_slots().is_err());
    }

    #[test]
    fn test_readonly() {
        let mut mock = MockControlPlane::new(vec![
            RespValue::SimpleString("OK".to_string()),
            RespValue::Error("ERR nope".to_string()),
        ]);
        assert!(mock.readonly().unwrap());
        assert!(!mock.readonly().unwrap());
    }

    #[test]
    fn test_authenticate_with_username() {
        let mut mock = MockControlPlane::new(vec![RespValue::SimpleString("OK".to_string())]);
        mock.authenticate("secret", Some("app")).unwrap();
        assert_eq!(mock.seen[0], vec!["AUTH", "app", "secret"]);

        let mut denied = MockControlPlane::new(vec![RespValue::Error("WRONGPASS".to_string())]);
        let err = denied.authenticate("bad", None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }
}
