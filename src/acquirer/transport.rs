use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use miette::Diagnostic;
use reqwest::header::{HeaderValue, RANGE};
use reqwest::StatusCode;
use thiserror::Error;

/// Byte stream produced by a transport fetch.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// A transfer failure. All variants are retryable at the acquirer level;
/// the retry budget is what bounds them.
#[derive(Debug, Error, Diagnostic)]
pub enum TransportError {
    #[error("server responded with status {status}")]
    #[diagnostic(code(voiceloom::transport::status))]
    Status { status: u16 },

    #[error("network error: {0}")]
    #[diagnostic(code(voiceloom::transport::network))]
    Network(String),

    #[error("transfer timed out after {0:?}")]
    #[diagnostic(code(voiceloom::transport::timeout))]
    Timeout(Duration),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Network(err.to_string())
    }
}

/// One opened transfer: where the server actually started from, how many
/// bytes remain known, and the body stream.
pub struct Fetched {
    /// Byte offset the server honored. Zero when the server ignored the
    /// requested range and restarted from the beginning.
    pub resumed_from: u64,
    /// Total size of the complete resource, when the server declares it.
    pub total_bytes: Option<u64>,
    pub body: ByteStream,
}

impl fmt::Debug for Fetched {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetched")
            .field("resumed_from", &self.resumed_from)
            .field("total_bytes", &self.total_bytes)
            .finish_non_exhaustive()
    }
}

/// Abstraction over the download wire. Production uses [`HttpTransport`];
/// tests inject fakes so acquisition logic is exercised without a network.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Open a transfer for `url`, asking the server to start at
    /// `resume_from` bytes. Servers without range support start over; the
    /// returned `resumed_from` reports what actually happened.
    async fn fetch(&self, url: &str, resume_from: u64) -> Result<Fetched, TransportError>;
}

/// Streaming HTTP transport with range-request resume.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str, resume_from: u64) -> Result<Fetched, TransportError> {
        let mut request = self.client.get(url);
        if resume_from > 0 {
            let range = format!("bytes={resume_from}-");
            request = request.header(
                RANGE,
                HeaderValue::from_str(&range)
                    .map_err(|e| TransportError::Network(e.to_string()))?,
            );
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
            });
        }

        // A 200 in response to a ranged request means the server ignored
        // the range and is sending the whole file again.
        let resumed_from = if resume_from > 0 && status == StatusCode::PARTIAL_CONTENT {
            resume_from
        } else {
            0
        };
        let total_bytes = response.content_length().map(|len| resumed_from + len);

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransportError::from));

        Ok(Fetched {
            resumed_from,
            total_bytes,
            body: Box::pin(body),
        })
    }
}
