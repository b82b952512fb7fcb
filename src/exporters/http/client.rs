// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use http_body_util::Full;
use hyper_rustls::{ConfigBuilderExt, HttpsConnector};
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use rustls::ClientConfig;
use std::time::Duration;
use tower::BoxError;

pub type HttpsClient = HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Build an HTTP/1 client that speaks both `http` and `https`, verifying servers against the
/// platform's native roots.
pub(crate) fn build_hyper_client() -> Result<HttpsClient, BoxError> {
    let client_config = ClientConfig::builder()
        .with_native_roots()?
        .with_no_client_auth();

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(client_config)
        .https_or_http()
        .enable_http1()
        .build();

    let client = HyperClient::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(8)
        .timer(TokioTimer::new())
        .build::<_, Full<Bytes>>(https);

    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_client() {
        crate::crypto::init_crypto_provider().unwrap();
        assert!(build_hyper_client().is_ok());
    }
}
