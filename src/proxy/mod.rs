//! HTTP forwarding to the selected backend.

mod body;
mod client;
mod forwarder;

pub use body::CountingBody;
pub use client::{build_client, BoxError, ProxyBody, UpstreamClient};
pub use forwarder::{ForwardError, Forwarder, TRACE_HEADER};
