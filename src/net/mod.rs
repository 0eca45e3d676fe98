//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Host::create_connection()
//!     → connection.rs (id + open-connection guard)
//!     → codec client dials, handshakes and owns the guard
//!     → guard dropped when the codec client shuts down
//! ```

pub mod connection;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
