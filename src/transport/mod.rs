mod http;
mod memory;

pub use http::HttpTransport;
pub use memory::MemoryTransport;

use std::io;
use std::ops::Range;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream};

use crate::error::Result;

/// Live byte stream returned by [`Transport::stream_range`].
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Byte-range access to a remote resource.
///
/// Ranges are half-open (`start..end`) and never empty when passed in by
/// this crate. Implementations must not retry internally.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Total size of the resource in bytes.
    async fn content_length(&self, url: &str) -> Result<u64>;

    /// Fetch `range` fully into memory.
    async fn fetch_range(&self, url: &str, range: Range<u64>) -> Result<Bytes>;

    /// Fetch `range` as a stream without buffering it.
    async fn stream_range(&self, url: &str, range: Range<u64>) -> Result<ByteStream>;
}

/// Wrap `stream` so it yields exactly `expected` bytes.
///
/// Extra bytes are discarded and an early end of stream becomes an
/// `UnexpectedEof` error.
pub fn exact_length(stream: ByteStream, expected: u64) -> ByteStream {
    Box::pin(stream::unfold(
        (stream, expected, false),
        |(mut inner, remaining, failed)| async move {
            if failed || remaining == 0 {
                return None;
            }
            match inner.next().await {
                Some(Ok(mut chunk)) => {
                    if chunk.len() as u64 > remaining {
                        chunk.truncate(remaining as usize);
                    }
                    let remaining = remaining - chunk.len() as u64;
                    Some((Ok(chunk), (inner, remaining, false)))
                }
                Some(Err(e)) => Some((Err(e), (inner, remaining, true))),
                None => {
                    let err = io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("stream ended with {} bytes outstanding", remaining),
                    );
                    Some((Err(err), (inner, remaining, true)))
                }
            }
        },
    ))
}

/// Empty stream for zero-length payloads.
pub fn empty_stream() -> ByteStream {
    Box::pin(stream::empty())
}
