//! Active HTTP health checking for upstream hosts.

pub mod config;
pub mod health;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod stream;
pub mod upstream;

pub use config::HealthProbeConfig;
pub use health::{HealthMonitor, HttpHealthChecker};
pub use lifecycle::Shutdown;
pub use stream::hyper_client::HyperCodecClientFactory;
pub use upstream::Cluster;
