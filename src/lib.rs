//! trafficlb - a least-traffic HTTP reverse-proxy load balancer
//!
//! Every request goes to the healthy backend that has been sent the fewest
//! response bytes so far. A background monitor probes each backend's health
//! endpoint on a fixed interval; backends that have never been probed, or
//! failed their last probe, receive no traffic.

pub mod backend;
pub mod balancer;
pub mod config;
pub mod frontend;
pub mod health;
pub mod metrics;
pub mod proxy;
pub mod state;
pub mod util;

pub use balancer::Balancer;
pub use config::Config;
