//! HTTP transport backed by `reqwest`.

use async_trait::async_trait;
use bytes::BytesMut;
use reqwest::Client;
use tracing::trace;

use crate::domain::entities::{DownloadOutcome, DownloadProgress, DownloadRequest};
use crate::domain::errors::DownloadError;
use crate::domain::ports::TransportPort;

/// Upper bound for preallocating the body buffer from `Content-Length`.
const MAX_PREALLOCATION: u64 = 16 * 1024 * 1024;

/// Streams response bodies, reporting progress per chunk.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Creates a transport sending `user_agent`.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(user_agent: &str) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| DownloadError::network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn map_error(e: &reqwest::Error) -> DownloadError {
    if e.is_timeout() {
        DownloadError::Timeout
    } else if e.is_builder() {
        DownloadError::invalid_request(e.to_string())
    } else {
        DownloadError::network(e.to_string())
    }
}

#[async_trait]
impl TransportPort for HttpTransport {
    async fn fetch(
        &self,
        request: &DownloadRequest,
        progress: &(dyn Fn(DownloadProgress) + Send + Sync),
    ) -> DownloadOutcome {
        let mut builder = self.client.get(&request.url).timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let mut response = builder.send().await.map_err(|e| map_error(&e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Http {
                status: status.as_u16(),
            });
        }

        let expected = response.content_length();
        #[allow(clippy::cast_possible_truncation)]
        let mut body = BytesMut::with_capacity(expected.unwrap_or(0).min(MAX_PREALLOCATION) as usize);
        progress(DownloadProgress {
            received: 0,
            expected,
        });

        while let Some(chunk) = response.chunk().await.map_err(|e| map_error(&e))? {
            body.extend_from_slice(&chunk);
            progress(DownloadProgress {
                received: body.len() as u64,
                expected,
            });
        }

        trace!(url = %request.url, size = body.len(), "Response body received");
        Ok(body.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_malformed_url_is_rejected_without_network() {
        let transport = HttpTransport::new("picache-test").unwrap();
        let request = DownloadRequest::new("not a url");
        let outcome = transport.fetch(&request, &|_| {}).await;
        assert!(matches!(
            outcome,
            Err(DownloadError::InvalidRequest { .. } | DownloadError::Network { .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let transport = HttpTransport::new("picache-test").unwrap();
        let request = DownloadRequest::new("http://127.0.0.1:9/missing.png")
            .with_timeout(std::time::Duration::from_secs(2));
        let outcome = transport.fetch(&request, &|_| {}).await;
        assert!(matches!(
            outcome,
            Err(DownloadError::Network { .. } | DownloadError::Timeout)
        ));
    }
}
