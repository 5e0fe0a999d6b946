//! Shared upstream HTTP client.

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

/// Error type carried by proxied bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body type for requests sent upstream and responses sent to callers.
pub type ProxyBody = UnsyncBoxBody<Bytes, BoxError>;

/// Client used for both forwarding and health probes.
pub type UpstreamClient = Client<HttpsConnector<HttpConnector>, ProxyBody>;

/// Build the upstream client.
///
/// The connector accepts both `http` and `https` URIs, so switching the
/// backend scheme is only a matter of how request URIs are built.
pub fn build_client() -> Result<UpstreamClient, rustls::Error> {
    let connector = HttpsConnectorBuilder::new()
        .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())?
        .https_or_http()
        .enable_http1()
        .build();

    Ok(Client::builder(TokioExecutor::new()).build(connector))
}
