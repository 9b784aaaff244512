//! Source artwork download.

use async_trait::async_trait;
use futures_util::StreamExt;

use crate::config::LimitsConfig;
use crate::error::{ConfigError, PipelineError, PipelineResult, Stage};

/// Where source artwork bytes come from.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Download the full payload at `url`.
    async fn fetch(&self, url: &str) -> PipelineResult<Vec<u8>>;
}

/// HTTP(S) source with a size cap and an overall timeout.
pub struct HttpSource {
    client: reqwest::Client,
    max_bytes: u64,
    timeout_ms: u64,
}

impl HttpSource {
    pub fn new(limits: &LimitsConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(limits.fetch_timeout())
            .user_agent(concat!("coverart/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::ValidationError(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            max_bytes: limits.max_source_bytes(),
            timeout_ms: limits.fetch_timeout_ms,
        })
    }

    fn request_error(&self, url: &str, err: reqwest::Error) -> PipelineError {
        if err.is_timeout() {
            PipelineError::Timeout {
                stage: Stage::Fetch,
                target: url.to_string(),
                timeout_ms: self.timeout_ms,
            }
        } else {
            PipelineError::Fetch {
                url: url.to_string(),
                message: err.to_string(),
                status_code: err.status().map(|s| s.as_u16()),
            }
        }
    }

    fn too_large(&self, url: &str, size: u64) -> PipelineError {
        PipelineError::Fetch {
            url: url.to_string(),
            message: format!("payload of {size} bytes exceeds limit of {} bytes", self.max_bytes),
            status_code: None,
        }
    }
}

#[async_trait]
impl ImageSource for HttpSource {
    async fn fetch(&self, url: &str) -> PipelineResult<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Fetch {
                url: url.to_string(),
                message: format!("HTTP {status}"),
                status_code: Some(status.as_u16()),
            });
        }

        if let Some(len) = response.content_length() {
            if len > self.max_bytes {
                return Err(self.too_large(url, len));
            }
        }

        // Content-Length can be absent or wrong, so the cap is enforced while streaming too
        let mut body = Vec::with_capacity(response.content_length().unwrap_or(0) as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.request_error(url, e))?;
            let size = (body.len() + chunk.len()) as u64;
            if size > self.max_bytes {
                return Err(self.too_large(url, size));
            }
            body.extend_from_slice(&chunk);
        }

        tracing::debug!(url, bytes = body.len(), "Fetched source");
        Ok(body)
    }
}

#[cfg(any(test, feature = "mock"))]
pub use self::mock::StaticSource;

#[cfg(any(test, feature = "mock"))]
mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Response {
        Body(Vec<u8>),
        Status(u16),
    }

    /// Canned responses keyed by URL. Unknown URLs answer 404.
    #[derive(Default)]
    pub struct StaticSource {
        responses: HashMap<String, Response>,
        fetch_calls: AtomicUsize,
        transient_failures: AtomicUsize,
    }

    impl StaticSource {
        pub fn with_body(mut self, url: impl Into<String>, body: Vec<u8>) -> Self {
            self.responses.insert(url.into(), Response::Body(body));
            self
        }

        pub fn with_status(mut self, url: impl Into<String>, status: u16) -> Self {
            self.responses.insert(url.into(), Response::Status(status));
            self
        }

        /// Answer 503 to the first `count` fetches, whatever the URL.
        pub fn with_transient_failures(self, count: usize) -> Self {
            self.transient_failures.store(count, Ordering::SeqCst);
            self
        }

        pub fn fetch_calls(&self) -> usize {
            self.fetch_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ImageSource for StaticSource {
        async fn fetch(&self, url: &str) -> PipelineResult<Vec<u8>> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            let flaky = self
                .transient_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            let status = if flaky {
                503
            } else {
                match self.responses.get(url) {
                    Some(Response::Body(body)) => return Ok(body.clone()),
                    Some(Response::Status(status)) => *status,
                    None => 404,
                }
            };
            Err(PipelineError::Fetch {
                url: url.to_string(),
                message: format!("HTTP {status}"),
                status_code: Some(status),
            })
        }
    }
}
