//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → HealthProbeConfig (validated, immutable)
//!     → cluster, checker and monitors built from it
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::ClusterConfig;
pub use schema::HealthCheckConfig;
pub use schema::HealthProbeConfig;
pub use schema::HostConfig;
pub use schema::ObservabilityConfig;
