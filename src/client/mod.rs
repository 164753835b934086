//! Client connection layer

pub mod control_plane;
pub mod pool;
pub mod raw_connection;
pub mod registry;

pub use control_plane::{ControlPlane, ControlPlaneExt};
pub use pool::{ConnectionFactory, ConnectionPool, Connector, NodeConnection};
pub use raw_connection::{RawConnection, TcpConnector};
pub use registry::{ConnectorKind, PoolScope};
