//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGINT/SIGTERM → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → every host monitor stops → probe connections closed → exit
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
