use std::future::Future;
use std::ops::{Deref, Range};
use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::transport::{Transport, empty_stream, exact_length};

use super::parser::{
    EOCD_SEARCH_WINDOW, find_eocd, find_zip64_locator, local_data_offset,
    parse_central_directory,
};
use super::reader::EntryReader;
use super::structures::{CompressionMethod, EndOfCentralDirectory, Entry, LFH_SIZE, Zip64EOCD};

/// Extra bytes fetched after the fixed local header.
///
/// Enough for typical name and extra lengths, so a single request covers
/// the header.
const LOCAL_HEADER_SLACK: u64 = 256;

/// Central Directory of a remote ZIP archive.
///
/// `T` may be a trait object, so an `Arc<dyn Transport>` chosen at runtime
/// works as well as a concrete transport.
///
/// Built once by [`ArchiveIndex::open`] with a handful of range requests
/// and read-only afterwards, so it can be shared between tasks and entries
/// can be opened concurrently.
pub struct ArchiveIndex<T: Transport + ?Sized> {
    transport: Arc<T>,
    url: String,
    total_size: u64,
    entries: Vec<Entry>,
}

/// The trailing window of the archive, kept while locating the directory.
struct Tail {
    start: u64,
    bytes: Bytes,
}

impl Tail {
    /// Bytes of `range` if the window already holds them.
    fn slice(&self, range: &Range<u64>) -> Option<Bytes> {
        if range.start < self.start {
            return None;
        }
        let start = (range.start - self.start) as usize;
        let end = (range.end - self.start) as usize;
        (end <= self.bytes.len()).then(|| self.bytes.slice(start..end))
    }
}

impl<T: Transport + ?Sized> ArchiveIndex<T> {
    /// Read the Central Directory of the archive at `url`.
    ///
    /// Issues a size probe, one fetch of the archive tail, and at most two
    /// more fetches (ZIP64 record and Central Directory) when those are not
    /// already inside the tail. Either returns a complete index or an error.
    pub async fn open(
        transport: Arc<T>,
        url: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let url = url.into();

        let total_size = cancellable(cancel, transport.content_length(&url)).await?;
        if total_size < EndOfCentralDirectory::SIZE as u64 {
            return Err(Error::Format(format!(
                "archive too small ({} bytes)",
                total_size
            )));
        }

        let window = total_size.min(EOCD_SEARCH_WINDOW);
        let tail_start = total_size - window;
        let tail = Tail {
            start: tail_start,
            bytes: cancellable(cancel, transport.fetch_range(&url, tail_start..total_size))
                .await?,
        };

        let (eocd, eocd_pos) = find_eocd(&tail.bytes)?;
        if eocd.is_multi_disk() {
            return Err(Error::Unsupported(format!(
                "spanned archive (disk {})",
                eocd.disk_number
            )));
        }

        let (cd_offset, cd_size, total_entries) = if eocd.is_zip64() {
            let locator = find_zip64_locator(&tail.bytes, eocd_pos)?;
            let range = bounded_range(locator.eocd64_offset, Zip64EOCD::MIN_SIZE as u64, total_size)
                .ok_or_else(|| Error::format("ZIP64 EOCD offset outside the archive"))?;
            let record = match tail.slice(&range) {
                Some(bytes) => bytes,
                None => cancellable(cancel, transport.fetch_range(&url, range)).await?,
            };
            let eocd64 = Zip64EOCD::from_bytes(&record)?;
            log::debug!(
                "ZIP64 archive: {} entries, directory {} bytes at {}",
                eocd64.total_entries,
                eocd64.cd_size,
                eocd64.cd_offset
            );
            (eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries)
        } else {
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
            )
        };

        let cd_range = bounded_range(cd_offset, cd_size, total_size).ok_or_else(|| {
            Error::Format(format!(
                "Central Directory ({} bytes at {}) extends past the archive end",
                cd_size, cd_offset
            ))
        })?;

        let entries = if cd_range.is_empty() {
            Vec::new()
        } else {
            let cd_data = match tail.slice(&cd_range) {
                Some(bytes) => bytes,
                None => cancellable(cancel, transport.fetch_range(&url, cd_range)).await?,
            };
            parse_central_directory(&cd_data, total_entries, total_size)?
        };

        log::debug!(
            "indexed {}: {} bytes, {} entries",
            url,
            total_size,
            entries.len()
        );

        Ok(Self {
            transport,
            url,
            total_size,
            entries,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Archive size reported by the size probe.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Transport shared by every request of this index.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Entries in Central Directory order.
    pub fn entries(&self) -> impl ExactSizeIterator<Item = EntryHandle<'_, T>> {
        self.entries
            .iter()
            .map(move |entry| EntryHandle { index: self, entry })
    }

    /// First entry whose name is exactly `name`.
    pub fn find_by_name(&self, name: &str) -> Result<EntryHandle<'_, T>> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| EntryHandle { index: self, entry })
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Open `entry` for reading.
    ///
    /// Fetches the entry's Local File Header to find where its data starts,
    /// then streams exactly the compressed bytes through the matching
    /// decoder. Unsupported entries fail before any request is made.
    pub async fn open_entry(&self, entry: &Entry, cancel: &CancellationToken) -> Result<EntryReader> {
        if let CompressionMethod::Unknown(method) = entry.compression_method {
            return Err(Error::Unsupported(format!(
                "compression method {} for {}",
                method, entry.name
            )));
        }
        if entry.is_encrypted() {
            return Err(Error::Unsupported(format!("encrypted entry {}", entry.name)));
        }

        let header_range = bounded_range(
            entry.local_header_offset,
            LFH_SIZE as u64 + LOCAL_HEADER_SLACK,
            self.total_size,
        )
        .unwrap_or(entry.local_header_offset..self.total_size);
        if header_range.is_empty() {
            return Err(Error::Format(format!(
                "local header of {} is outside the archive",
                entry.name
            )));
        }
        let header = cancellable(
            cancel,
            self.transport.fetch_range(&self.url, header_range),
        )
        .await?;
        let data_offset = local_data_offset(&header, entry.local_header_offset)?;

        let data_range = bounded_range(data_offset, entry.compressed_size, self.total_size)
            .ok_or_else(|| {
                Error::Format(format!(
                    "data of {} ({} bytes at {}) extends past the archive end",
                    entry.name, entry.compressed_size, data_offset
                ))
            })?;

        log::debug!(
            "opening {} ({:?}, {} bytes at {})",
            entry.name,
            entry.compression_method,
            entry.compressed_size,
            data_offset
        );

        let stream = if data_range.is_empty() {
            empty_stream()
        } else {
            let stream = cancellable(
                cancel,
                self.transport.stream_range(&self.url, data_range),
            )
            .await?;
            exact_length(stream, entry.compressed_size)
        };

        Ok(EntryReader::new(
            stream,
            entry.compression_method,
            entry.compressed_size,
            cancel.clone(),
        ))
    }
}

/// An entry together with the index it came from.
pub struct EntryHandle<'a, T: Transport + ?Sized> {
    index: &'a ArchiveIndex<T>,
    entry: &'a Entry,
}

impl<'a, T: Transport + ?Sized> EntryHandle<'a, T> {
    pub fn entry(&self) -> &'a Entry {
        self.entry
    }

    /// Open this entry for reading. See [`ArchiveIndex::open_entry`].
    pub async fn open(&self, cancel: &CancellationToken) -> Result<EntryReader> {
        self.index.open_entry(self.entry, cancel).await
    }
}

impl<T: Transport + ?Sized> Clone for EntryHandle<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Transport + ?Sized> Copy for EntryHandle<'_, T> {}

impl<T: Transport + ?Sized> Deref for EntryHandle<'_, T> {
    type Target = Entry;

    fn deref(&self) -> &Entry {
        self.entry
    }
}

/// `start..start + len` if it ends within `total_size`.
fn bounded_range(start: u64, len: u64, total_size: u64) -> Option<Range<u64>> {
    let end = start.checked_add(len)?;
    (end <= total_size).then_some(start..end)
}

/// Race a transport call against the cancellation token.
async fn cancellable<F, R>(cancel: &CancellationToken, fut: F) -> Result<R>
where
    F: Future<Output = Result<R>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}
