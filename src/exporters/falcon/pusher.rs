// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use thiserror::Error;
use tower::BoxError;
use tracing::debug;

use crate::aggregator::CounterEntry;
use crate::exporters::http::client::{HttpsClient, build_hyper_client};

/// Content type the agent's push endpoint expects.
pub const PUSH_CONTENT_TYPE: &str = "plain/text";

const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Error)]
pub enum PushError {
    #[error("failed to serialize batch: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to build request: {0}")]
    Request(#[from] http::Error),

    #[error("request failed: {0}")]
    Client(#[from] hyper_util::client::legacy::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("agent responded with {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("failed reading response: {0}")]
    Body(#[from] hyper::Error),
}

/// Sends drained batches to the agent as a JSON array, one POST per batch.
#[derive(Clone)]
pub struct MetricsPusher {
    client: HttpsClient,
    endpoint: Uri,
    timeout: Duration,
}

impl MetricsPusher {
    pub fn new(endpoint: Uri, timeout: Duration) -> Result<Self, BoxError> {
        Ok(Self {
            client: build_hyper_client()?,
            endpoint,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &Uri {
        &self.endpoint
    }

    /// Push one batch. Failures are returned to the caller; nothing is retried.
    pub async fn push(&self, batch: &[CounterEntry]) -> Result<(), PushError> {
        let payload = serde_json::to_vec(batch)?;
        let req = Request::builder()
            .method(Method::POST)
            .uri(self.endpoint.clone())
            .header(CONTENT_TYPE, PUSH_CONTENT_TYPE)
            .body(Full::new(Bytes::from(payload)))?;

        let (status, body) = tokio::time::timeout(self.timeout, self.send(req))
            .await
            .map_err(|_| PushError::Timeout(self.timeout))??;

        if !status.is_success() {
            let mut body = String::from_utf8_lossy(&body).into_owned();
            if body.len() > MAX_ERROR_BODY {
                let mut end = MAX_ERROR_BODY;
                while !body.is_char_boundary(end) {
                    end -= 1;
                }
                body.truncate(end);
            }
            return Err(PushError::Status { status, body });
        }

        debug!(
            endpoint = %self.endpoint,
            records = batch.len(),
            response = %String::from_utf8_lossy(&body),
            "Agent accepted batch"
        );
        Ok(())
    }

    async fn send(&self, req: Request<Full<Bytes>>) -> Result<(StatusCode, Bytes), PushError> {
        let resp = self.client.request(req).await?;
        let (head, body) = resp.into_parts();
        let body = body.collect().await?.to_bytes();
        Ok((head.status, body))
    }
}
