use std::io;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{Client, Response, StatusCode};

use super::{ByteStream, Transport};
use crate::error::{Error, Result};

/// Default connect timeout for [`HttpTransport::new`].
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP Range transport backed by reqwest.
///
/// Sizes come from `HEAD`, data from `GET` with a `Range` header. A `200 OK`
/// answer to a range request is only accepted when it covers exactly the
/// requested span, so a server that ignores `Range` can never make us pull
/// a whole archive.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    transferred_bytes: Arc<AtomicU64>,
}

impl HttpTransport {
    /// Create a transport with the default connect timeout.
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_CONNECT_TIMEOUT)
    }

    /// Create a transport with a custom connect timeout.
    ///
    /// Only connection setup is bounded; a long entry body may take as long
    /// as it needs to stream.
    pub fn with_timeout(connect_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(Error::network)?;
        Ok(Self::from_client(client))
    }

    /// Use a preconfigured client (proxies, TLS settings, default headers).
    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            transferred_bytes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Get total body bytes received from the network so far
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }

    async fn send_range(&self, url: &str, range: &Range<u64>) -> Result<Response> {
        let header = format!("bytes={}-{}", range.start, range.end - 1);
        log::debug!("GET {} Range: {}", url, header);

        let resp = self
            .client
            .get(url)
            .header(RANGE, &header)
            .send()
            .await
            .map_err(Error::network)?;

        let content_range = resp
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok());
        check_range_response(resp.status(), content_range, resp.content_length(), range)?;
        Ok(resp)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn content_length(&self, url: &str) -> Result<u64> {
        log::debug!("HEAD {}", url);
        let resp = self.client.head(url).send().await.map_err(Error::network)?;

        if resp.status() != StatusCode::OK {
            return Err(Error::network(format!(
                "HTTP request failed with status: {}",
                resp.status()
            )));
        }

        let accept_ranges = resp
            .headers()
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("none");
        if !accept_ranges.contains("bytes") {
            log::warn!("{} does not advertise byte ranges (Accept-Ranges: {})", url, accept_ranges);
        }

        // HEAD bodies are empty, so read the header rather than the body size hint.
        resp.headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| Error::format("remote server did not return Content-Length"))
    }

    async fn fetch_range(&self, url: &str, range: Range<u64>) -> Result<Bytes> {
        let resp = self.send_range(url, &range).await?;
        let bytes = resp.bytes().await.map_err(Error::network)?;
        self.transferred_bytes
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);

        let expected = range.end - range.start;
        if bytes.len() as u64 != expected {
            return Err(Error::network(format!(
                "short range response: expected {} bytes, got {}",
                expected,
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    async fn stream_range(&self, url: &str, range: Range<u64>) -> Result<ByteStream> {
        let resp = self.send_range(url, &range).await?;
        let counter = Arc::clone(&self.transferred_bytes);
        let stream = resp.bytes_stream().map(move |chunk| {
            chunk
                .inspect(|b| {
                    counter.fetch_add(b.len() as u64, Ordering::Relaxed);
                })
                .map_err(io::Error::other)
        });
        Ok(Box::pin(stream))
    }
}

/// Validate the status and headers of a response to a range request.
fn check_range_response(
    status: StatusCode,
    content_range: Option<&str>,
    content_length: Option<u64>,
    range: &Range<u64>,
) -> Result<()> {
    match status {
        StatusCode::PARTIAL_CONTENT => {
            // Content-Range is mandatory for 206 but some servers drop it.
            if let Some(value) = content_range {
                let start = parse_content_range_start(value).ok_or_else(|| {
                    Error::network(format!("malformed Content-Range: {}", value))
                })?;
                if start != range.start {
                    return Err(Error::network(format!(
                        "server returned range starting at {}, requested {}",
                        start, range.start
                    )));
                }
            }
            Ok(())
        }
        StatusCode::OK if range.start == 0 && content_length == Some(range.end) => Ok(()),
        StatusCode::OK => Err(Error::network(
            "server ignored the Range header and returned the full body",
        )),
        other => Err(Error::network(format!(
            "HTTP request failed with status: {}",
            other
        ))),
    }
}

/// Parse the first byte position out of `bytes <start>-<end>/<total>`.
fn parse_content_range_start(value: &str) -> Option<u64> {
    let spec = value.trim().strip_prefix("bytes")?.trim_start();
    let (start, _) = spec.split_once('-')?;
    start.trim().parse().ok()
}
