//! Shared fixtures: an in-memory ZIP writer, a sparse transport for
//! multi-gigabyte archives, and a minimal HTTP server with Range support.

#![allow(dead_code)]

use std::io::{self, Write};
use std::net::SocketAddr;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use flate2::Compression;
use flate2::write::DeflateEncoder;
use futures_util::stream;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use rangezip::{ByteStream, Error, Result, Transport};

const SENTINEL: u32 = 0xFFFFFFFF;

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

/// Deterministic, poorly compressible test data.
pub fn noise(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (state >> 16) as u8
        })
        .collect()
}

fn crc32(data: &[u8]) -> u32 {
    let mut crc = flate2::Crc::new();
    crc.update(data);
    crc.sum()
}

struct FixtureEntry {
    name: String,
    method: u16,
    payload: Vec<u8>,
    uncompressed_len: u64,
    crc: u32,
    local_extra: Vec<u8>,
    zip64_uncompressed: bool,
    zip64_compressed: bool,
    zip64_offset: bool,
}

/// Writes small ZIP archives with exactly the structures a test needs.
#[derive(Default)]
pub struct ZipBuilder {
    entries: Vec<FixtureEntry>,
    zip64_eocd: bool,
    comment: Vec<u8>,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored(self, name: &str, data: &[u8]) -> Self {
        self.raw(name, 0, data.to_vec(), data)
    }

    pub fn deflated(self, name: &str, data: &[u8]) -> Self {
        self.raw(name, 8, deflate(data), data)
    }

    /// Add an entry with an arbitrary method and payload.
    pub fn raw(mut self, name: &str, method: u16, payload: Vec<u8>, original: &[u8]) -> Self {
        self.entries.push(FixtureEntry {
            name: name.to_string(),
            method,
            payload,
            uncompressed_len: original.len() as u64,
            crc: crc32(original),
            local_extra: Vec::new(),
            zip64_uncompressed: false,
            zip64_compressed: false,
            zip64_offset: false,
        });
        self
    }

    /// Store the given fields of the last entry as ZIP64 sentinels.
    pub fn zip64_fields(mut self, uncompressed: bool, compressed: bool, offset: bool) -> Self {
        let last = self.entries.last_mut().expect("no entry to modify");
        last.zip64_uncompressed = uncompressed;
        last.zip64_compressed = compressed;
        last.zip64_offset = offset;
        self
    }

    /// Give the last entry a local extra field that the CD copy lacks.
    pub fn local_extra(mut self, len: usize) -> Self {
        let last = self.entries.last_mut().expect("no entry to modify");
        let mut extra = Vec::new();
        extra.extend_from_slice(&0xCAFEu16.to_le_bytes());
        extra.extend_from_slice(&(len as u16).to_le_bytes());
        extra.extend(std::iter::repeat_n(0xEEu8, len));
        last.local_extra = extra;
        self
    }

    /// Locate the Central Directory through a ZIP64 EOCD record.
    pub fn zip64_eocd(mut self) -> Self {
        self.zip64_eocd = true;
        self
    }

    pub fn comment(mut self, comment: Vec<u8>) -> Self {
        self.comment = comment;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut offsets = Vec::new();

        for e in &self.entries {
            offsets.push(out.len() as u64);
            out.extend_from_slice(b"PK\x03\x04");
            out.extend_from_slice(&20u16.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&e.method.to_le_bytes());
            out.extend_from_slice(&[0, 0, 0, 0]);
            out.extend_from_slice(&e.crc.to_le_bytes());
            out.extend_from_slice(&(e.payload.len() as u32).to_le_bytes());
            out.extend_from_slice(&(e.uncompressed_len as u32).to_le_bytes());
            out.extend_from_slice(&(e.name.len() as u16).to_le_bytes());
            out.extend_from_slice(&(e.local_extra.len() as u16).to_le_bytes());
            out.extend_from_slice(e.name.as_bytes());
            out.extend_from_slice(&e.local_extra);
            out.extend_from_slice(&e.payload);
        }

        let cd_start = out.len() as u64;
        for (e, &offset) in self.entries.iter().zip(&offsets) {
            let mut zip64 = Vec::new();
            if e.zip64_uncompressed {
                zip64.extend_from_slice(&e.uncompressed_len.to_le_bytes());
            }
            if e.zip64_compressed {
                zip64.extend_from_slice(&(e.payload.len() as u64).to_le_bytes());
            }
            if e.zip64_offset {
                zip64.extend_from_slice(&offset.to_le_bytes());
            }
            let mut extra = Vec::new();
            if !zip64.is_empty() {
                extra.extend_from_slice(&1u16.to_le_bytes());
                extra.extend_from_slice(&(zip64.len() as u16).to_le_bytes());
                extra.extend_from_slice(&zip64);
            }

            let field = |sentinel: bool, value: u64| {
                if sentinel { SENTINEL } else { value as u32 }
            };

            out.extend_from_slice(b"PK\x01\x02");
            out.extend_from_slice(&20u16.to_le_bytes());
            out.extend_from_slice(&20u16.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&e.method.to_le_bytes());
            out.extend_from_slice(&[0, 0, 0, 0]);
            out.extend_from_slice(&e.crc.to_le_bytes());
            out.extend_from_slice(&field(e.zip64_compressed, e.payload.len() as u64).to_le_bytes());
            out.extend_from_slice(&field(e.zip64_uncompressed, e.uncompressed_len).to_le_bytes());
            out.extend_from_slice(&(e.name.len() as u16).to_le_bytes());
            out.extend_from_slice(&(extra.len() as u16).to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&field(e.zip64_offset, offset).to_le_bytes());
            out.extend_from_slice(e.name.as_bytes());
            out.extend_from_slice(&extra);
        }
        let cd_size = out.len() as u64 - cd_start;

        write_trailer(
            &mut out,
            self.entries.len() as u64,
            cd_start,
            cd_size,
            self.zip64_eocd,
            &self.comment,
        );
        out
    }
}

/// Append (ZIP64 EOCD record and locator, if asked) and the EOCD.
fn write_trailer(
    out: &mut Vec<u8>,
    entries: u64,
    cd_start: u64,
    cd_size: u64,
    zip64: bool,
    comment: &[u8],
) {
    if zip64 {
        let record_offset = out.len() as u64;
        out.extend_from_slice(b"PK\x06\x06");
        out.extend_from_slice(&44u64.to_le_bytes());
        out.extend_from_slice(&45u16.to_le_bytes());
        out.extend_from_slice(&45u16.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&entries.to_le_bytes());
        out.extend_from_slice(&entries.to_le_bytes());
        out.extend_from_slice(&cd_size.to_le_bytes());
        out.extend_from_slice(&cd_start.to_le_bytes());

        out.extend_from_slice(b"PK\x06\x07");
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&record_offset.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
    }

    out.extend_from_slice(b"PK\x05\x06");
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    let count = if zip64 { 0xFFFF } else { entries as u16 };
    out.extend_from_slice(&count.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    let (size, offset) = if zip64 {
        (SENTINEL, SENTINEL)
    } else {
        (cd_size as u32, cd_start as u32)
    };
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(&offset.to_le_bytes());
    out.extend_from_slice(&(comment.len() as u16).to_le_bytes());
    out.extend_from_slice(comment);
}

/// A transport for a huge archive that is zero everywhere except in a few
/// explicitly placed regions. Nothing close to the full size is allocated.
pub struct SparseTransport {
    size: u64,
    regions: Vec<(u64, Vec<u8>)>,
    requests: AtomicUsize,
    fetched_bytes: AtomicU64,
}

impl SparseTransport {
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn fetched_bytes(&self) -> u64 {
        self.fetched_bytes.load(Ordering::Relaxed)
    }

    fn read(&self, range: &Range<u64>) -> Result<Vec<u8>> {
        if range.end > self.size || range.start >= range.end {
            return Err(Error::network("range not satisfiable"));
        }
        self.fetched_bytes
            .fetch_add(range.end - range.start, Ordering::Relaxed);
        let mut buf = vec![0u8; (range.end - range.start) as usize];
        for (start, data) in &self.regions {
            let end = start + data.len() as u64;
            let lo = range.start.max(*start);
            let hi = range.end.min(end);
            if lo < hi {
                buf[(lo - range.start) as usize..(hi - range.start) as usize]
                    .copy_from_slice(&data[(lo - start) as usize..(hi - start) as usize]);
            }
        }
        Ok(buf)
    }
}

#[async_trait]
impl Transport for SparseTransport {
    async fn content_length(&self, _url: &str) -> Result<u64> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        Ok(self.size)
    }

    async fn fetch_range(&self, _url: &str, range: Range<u64>) -> Result<Bytes> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        Ok(Bytes::from(self.read(&range)?))
    }

    async fn stream_range(&self, _url: &str, range: Range<u64>) -> Result<ByteStream> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let body = Bytes::from(self.read(&range)?);
        Ok(Box::pin(stream::iter(vec![Ok::<_, io::Error>(body)])))
    }
}

pub const HUGE_ENTRY_OFFSET: u64 = 5 * 1024 * 1024 * 1024;
pub const HUGE_ENTRY_CONTENT: &[u8] = b"found beyond 4 GiB";
pub const ISO_SIZE: u64 = 4 * 1024 * 1024 * 1024 + 512;

/// A ~5 GiB ZIP64 archive with two entries:
///
/// - `disk.iso`: a 4 GiB + 512 stored entry at offset 0, never read
/// - `far/away.txt`: a small stored entry whose header sits at 5 GiB
pub fn sparse_zip64_archive() -> SparseTransport {
    let mut regions = Vec::new();

    let iso_name = b"disk.iso";
    let mut iso_header = Vec::new();
    iso_header.extend_from_slice(b"PK\x03\x04");
    iso_header.extend_from_slice(&[45, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    iso_header.extend_from_slice(&SENTINEL.to_le_bytes());
    iso_header.extend_from_slice(&SENTINEL.to_le_bytes());
    iso_header.extend_from_slice(&(iso_name.len() as u16).to_le_bytes());
    iso_header.extend_from_slice(&0u16.to_le_bytes());
    iso_header.extend_from_slice(iso_name);
    regions.push((0, iso_header));

    let far_name = b"far/away.txt";
    let mut far = Vec::new();
    far.extend_from_slice(b"PK\x03\x04");
    far.extend_from_slice(&[45, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    far.extend_from_slice(&crc32(HUGE_ENTRY_CONTENT).to_le_bytes());
    far.extend_from_slice(&(HUGE_ENTRY_CONTENT.len() as u32).to_le_bytes());
    far.extend_from_slice(&(HUGE_ENTRY_CONTENT.len() as u32).to_le_bytes());
    far.extend_from_slice(&(far_name.len() as u16).to_le_bytes());
    far.extend_from_slice(&0u16.to_le_bytes());
    far.extend_from_slice(far_name);
    far.extend_from_slice(HUGE_ENTRY_CONTENT);
    let cd_start = HUGE_ENTRY_OFFSET + far.len() as u64;
    regions.push((HUGE_ENTRY_OFFSET, far));

    let mut tail = Vec::new();
    cd_record(
        &mut tail,
        iso_name,
        [SENTINEL, SENTINEL, 0],
        &[ISO_SIZE, ISO_SIZE],
        crc32(b""),
    );
    cd_record(
        &mut tail,
        far_name,
        [
            HUGE_ENTRY_CONTENT.len() as u32,
            HUGE_ENTRY_CONTENT.len() as u32,
            SENTINEL,
        ],
        &[HUGE_ENTRY_OFFSET],
        crc32(HUGE_ENTRY_CONTENT),
    );
    let cd_size = tail.len() as u64;

    // ZIP64 record, locator and EOCD follow the directory directly.
    let record_offset = cd_start + cd_size;
    tail.extend_from_slice(b"PK\x06\x06");
    tail.extend_from_slice(&44u64.to_le_bytes());
    tail.extend_from_slice(&45u16.to_le_bytes());
    tail.extend_from_slice(&45u16.to_le_bytes());
    tail.extend_from_slice(&0u32.to_le_bytes());
    tail.extend_from_slice(&0u32.to_le_bytes());
    tail.extend_from_slice(&2u64.to_le_bytes());
    tail.extend_from_slice(&2u64.to_le_bytes());
    tail.extend_from_slice(&cd_size.to_le_bytes());
    tail.extend_from_slice(&cd_start.to_le_bytes());
    tail.extend_from_slice(b"PK\x06\x07");
    tail.extend_from_slice(&0u32.to_le_bytes());
    tail.extend_from_slice(&record_offset.to_le_bytes());
    tail.extend_from_slice(&1u32.to_le_bytes());
    tail.extend_from_slice(b"PK\x05\x06");
    tail.extend_from_slice(&[0, 0, 0, 0]);
    tail.extend_from_slice(&0xFFFFu16.to_le_bytes());
    tail.extend_from_slice(&0xFFFFu16.to_le_bytes());
    tail.extend_from_slice(&SENTINEL.to_le_bytes());
    tail.extend_from_slice(&SENTINEL.to_le_bytes());
    tail.extend_from_slice(&0u16.to_le_bytes());

    let size = cd_start + tail.len() as u64;
    regions.push((cd_start, tail));

    SparseTransport {
        size,
        regions,
        requests: AtomicUsize::new(0),
        fetched_bytes: AtomicU64::new(0),
    }
}

/// Append a stored CD record with the given 32-bit
/// `[compressed, uncompressed, offset]` fields and ZIP64 values.
fn cd_record(out: &mut Vec<u8>, name: &[u8], fields: [u32; 3], zip64: &[u64], crc: u32) {
    let mut extra = Vec::new();
    if !zip64.is_empty() {
        extra.extend_from_slice(&1u16.to_le_bytes());
        extra.extend_from_slice(&((zip64.len() * 8) as u16).to_le_bytes());
        for v in zip64 {
            extra.extend_from_slice(&v.to_le_bytes());
        }
    }
    out.extend_from_slice(b"PK\x01\x02");
    out.extend_from_slice(&45u16.to_le_bytes());
    out.extend_from_slice(&45u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&[0, 0, 0, 0]);
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&fields[0].to_le_bytes());
    out.extend_from_slice(&fields[1].to_le_bytes());
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(&(extra.len() as u16).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&fields[2].to_le_bytes());
    out.extend_from_slice(name);
    out.extend_from_slice(&extra);
}

/// How the test server answers requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServeMode {
    /// Honor Range with 206 responses.
    Ranges,
    /// Answer every GET with 200 and the whole body.
    IgnoreRange,
    /// Leave Content-Length out of HEAD responses.
    NoContentLength,
    /// Honor Range but close the connection halfway through the body.
    Truncate,
    /// Answer HEAD with `204 No Content`.
    HeadNoContent,
}

/// A one-file HTTP/1.1 server on localhost, enough for reqwest.
pub struct TestServer {
    addr: SocketAddr,
    requests: Arc<AtomicUsize>,
}

impl TestServer {
    pub async fn start(data: Vec<u8>, mode: ServeMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let data = Arc::new(data);
        let requests = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&requests);
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let data = Arc::clone(&data);
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    counter.fetch_add(1, Ordering::Relaxed);
                    let _ = serve(socket, &data, mode).await;
                });
            }
        });

        Self { addr, requests }
    }

    pub fn url(&self) -> String {
        format!("http://{}/archive.zip", self.addr)
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }
}

async fn serve(mut socket: TcpStream, data: &[u8], mode: ServeMode) -> io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let request = String::from_utf8_lossy(&buf).to_string();
    let mut lines = request.lines();
    let method = lines
        .next()
        .and_then(|l| l.split_whitespace().next())
        .unwrap_or("")
        .to_string();
    let range = lines.find_map(|l| {
        let (name, value) = l.split_once(':')?;
        if !name.trim().eq_ignore_ascii_case("range") {
            return None;
        }
        let spec = value.trim().strip_prefix("bytes=")?;
        let (start, end) = spec.split_once('-')?;
        Some((start.parse::<usize>().ok()?, end.parse::<usize>().ok()?))
    });

    let total = data.len();
    if method == "HEAD" && mode == ServeMode::HeadNoContent {
        socket
            .write_all(b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n")
            .await?;
        return socket.shutdown().await;
    }
    if method == "HEAD" {
        let length = if mode == ServeMode::NoContentLength {
            String::new()
        } else {
            format!("Content-Length: {}\r\n", total)
        };
        let head = format!(
            "HTTP/1.1 200 OK\r\n{}Accept-Ranges: bytes\r\nConnection: close\r\n\r\n",
            length
        );
        socket.write_all(head.as_bytes()).await?;
        return socket.shutdown().await;
    }

    match range {
        Some((start, end)) if mode != ServeMode::IgnoreRange && start <= end && end < total => {
            let body = &data[start..=end];
            let head = format!(
                "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\nConnection: close\r\n\r\n",
                body.len(),
                start,
                end,
                total
            );
            socket.write_all(head.as_bytes()).await?;
            if mode == ServeMode::Truncate {
                socket.write_all(&body[..body.len() / 2]).await?;
            } else {
                socket.write_all(body).await?;
            }
        }
        Some(_) if mode != ServeMode::IgnoreRange => {
            let head = format!(
                "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                total
            );
            socket.write_all(head.as_bytes()).await?;
        }
        _ => {
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                total
            );
            socket.write_all(head.as_bytes()).await?;
            socket.write_all(data).await?;
        }
    }
    socket.shutdown().await
}
