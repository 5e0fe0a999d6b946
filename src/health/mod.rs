//! Active health checking for backend servers.

mod monitor;

pub use monitor::{probe, HealthMonitor};
