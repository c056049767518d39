use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_compression::tokio::bufread::DeflateDecoder;
use bytes::Bytes;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::io::StreamReader;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::error::Error;
use crate::transport::ByteStream;

use super::structures::CompressionMethod;

type RawReader = StreamReader<ByteStream, Bytes>;

enum Decoder {
    Stored(RawReader),
    // The decoder owns the raw stream, so dropping it releases both in order.
    Deflate(DeflateDecoder<RawReader>),
}

/// Decompressed contents of one archive entry.
///
/// Reading pulls compressed bytes from the network on demand. The reader
/// checks its cancellation token on every read and fails with
/// [`Error::Cancelled`] (wrapped in an `io::Error`) once it fires.
/// Dropping the reader closes the underlying connection.
pub struct EntryReader {
    decoder: Decoder,
    compressed_size: u64,
    cancel: CancellationToken,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl EntryReader {
    pub(crate) fn new(
        stream: ByteStream,
        method: CompressionMethod,
        compressed_size: u64,
        cancel: CancellationToken,
    ) -> Self {
        let raw = StreamReader::new(stream);
        let decoder = match method {
            CompressionMethod::Deflate if compressed_size > 0 => {
                Decoder::Deflate(DeflateDecoder::new(raw))
            }
            _ => Decoder::Stored(raw),
        };
        Self {
            decoder,
            compressed_size,
            cancelled: Box::pin(cancel.clone().cancelled_owned()),
            cancel,
        }
    }

    /// Size of the compressed payload this reader streams.
    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }
}

impl AsyncRead for EntryReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.cancel.is_cancelled() || this.cancelled.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Err(Error::Cancelled.into()));
        }
        match &mut this.decoder {
            Decoder::Stored(raw) => Pin::new(raw).poll_read(cx, buf),
            Decoder::Deflate(inflate) => Pin::new(inflate).poll_read(cx, buf),
        }
    }
}
