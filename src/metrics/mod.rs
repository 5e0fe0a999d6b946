//! Metrics collection and exposition.

mod collector;
mod server;

pub use collector::{MetricsCollector, NO_BACKEND};
pub use server::MetricsServer;
