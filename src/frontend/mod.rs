//! Inbound HTTP entry point.
//!
//! Accepts client connections and dispatches each request to the balancer.

mod listener;

pub use listener::FrontendListener;
