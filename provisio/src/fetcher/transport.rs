//! HTTP transport used by the fetcher.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use provisio_shared::constants::http as http_const;
use provisio_shared::errors::{ProvisionError, ProvisionResult};
use std::time::Duration;

/// Streaming response body.
pub type ByteStream = BoxStream<'static, ProvisionResult<Vec<u8>>>;

/// Response head plus a body stream.
pub struct HttpResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .finish()
    }
}

/// GET with optional byte-range support.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Issue a GET; `range_start` requests `bytes=<start>-`.
    async fn get(&self, url: &str, range_start: Option<u64>) -> ProvisionResult<HttpResponse>;
}

/// [`HttpTransport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> ProvisionResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(http_const::USER_AGENT)
            .connect_timeout(Duration::from_secs(http_const::CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ProvisionError::Internal(format!("failed to build http client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, range_start: Option<u64>) -> ProvisionResult<HttpResponse> {
        let mut request = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT_ENCODING, "identity");
        if let Some(start) = range_start {
            request = request.header(reqwest::header::RANGE, format!("bytes={}-", start));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProvisionError::download(format!("request to {} failed: {}", url, e)))?;

        let status = response.status().as_u16();
        let content_length = response.content_length();
        let body = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| ProvisionError::download(format!("read failed: {}", e)))
            })
            .boxed();

        Ok(HttpResponse {
            status,
            content_length,
            body,
        })
    }
}
