use std::io;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream;

use super::{ByteStream, Transport};
use crate::error::{Error, Result};

/// Chunk size used when streaming, so readers see more than one chunk.
const STREAM_CHUNK_SIZE: usize = 8 * 1024;

/// Transport serving one archive held in memory.
///
/// The URL is ignored. Every call counts as one request, which makes the
/// type useful for checking how many round trips an operation needs. A
/// failure can be injected on a chosen request to simulate a dropped
/// connection, or a request can be made to hang like an unresponsive server.
pub struct MemoryTransport {
    data: Bytes,
    requests: AtomicUsize,
    fetched_bytes: AtomicU64,
    fail_on_request: Option<usize>,
    stall_on_request: Option<usize>,
}

impl MemoryTransport {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            requests: AtomicUsize::new(0),
            fetched_bytes: AtomicU64::new(0),
            fail_on_request: None,
            stall_on_request: None,
        }
    }

    /// Fail the request with the given zero-based sequence number.
    pub fn fail_on_request(mut self, n: usize) -> Self {
        self.fail_on_request = Some(n);
        self
    }

    /// Never complete the request with the given zero-based sequence number.
    pub fn stall_on_request(mut self, n: usize) -> Self {
        self.stall_on_request = Some(n);
        self
    }

    /// Number of requests issued so far, including failed ones.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    /// Bytes handed out through `fetch_range` and `stream_range`.
    pub fn fetched_bytes(&self) -> u64 {
        self.fetched_bytes.load(Ordering::Relaxed)
    }

    async fn begin_request(&self) -> Result<()> {
        let n = self.requests.fetch_add(1, Ordering::Relaxed);
        if self.fail_on_request == Some(n) {
            return Err(Error::network(format!("injected failure on request {}", n)));
        }
        if self.stall_on_request == Some(n) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    fn slice(&self, range: &Range<u64>) -> Result<Bytes> {
        let len = self.data.len() as u64;
        if range.start > range.end || range.end > len {
            return Err(Error::network(format!(
                "range {}..{} not satisfiable for {} bytes",
                range.start, range.end, len
            )));
        }
        self.fetched_bytes
            .fetch_add(range.end - range.start, Ordering::Relaxed);
        Ok(self.data.slice(range.start as usize..range.end as usize))
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn content_length(&self, _url: &str) -> Result<u64> {
        self.begin_request().await?;
        Ok(self.data.len() as u64)
    }

    async fn fetch_range(&self, _url: &str, range: Range<u64>) -> Result<Bytes> {
        self.begin_request().await?;
        self.slice(&range)
    }

    async fn stream_range(&self, _url: &str, range: Range<u64>) -> Result<ByteStream> {
        self.begin_request().await?;
        let body = self.slice(&range)?;
        let chunks: Vec<io::Result<Bytes>> = (0..body.len())
            .step_by(STREAM_CHUNK_SIZE)
            .map(|start| Ok(body.slice(start..(start + STREAM_CHUNK_SIZE).min(body.len()))))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}
