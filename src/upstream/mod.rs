//! Upstream membership subsystem.
//!
//! # Data Flow
//! ```text
//! ClusterConfig
//!     → Cluster (named group, ClusterInfo shared read-only)
//!     → UpstreamHost per address (HostHealth + connection accounting)
//!     → Host::create_connection() → CreateConnectionData for the codec layer
//! ```

pub mod host;

pub use host::{
    Cluster, ClusterInfo, ConnectionSpec, CreateConnectionData, Host, HostDescription,
    HostSnapshot, UpstreamHost,
};
