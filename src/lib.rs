//! # rangezip
//!
//! Read single entries out of remote ZIP archives using HTTP Range requests.
//!
//! Only byte-range support is needed on the server. The archive's Central
//! Directory is located from its tail and fetched on its own, so building
//! an index costs a size probe plus one to three small range requests no
//! matter how large the archive is. Opening an entry fetches its local
//! header and streams exactly its compressed bytes through a decoder.
//!
//! ## Features
//!
//! - Archives of any size, including ZIP64 (archives and entries over 4GB)
//! - STORED (uncompressed) and DEFLATE entries, decoded as a stream
//! - Pluggable [`Transport`]: reqwest-backed [`HttpTransport`] or your own
//! - Cancellation of every request and read through a `CancellationToken`
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rangezip::{ArchiveIndex, HttpTransport};
//! use tokio::io::AsyncReadExt;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cancel = CancellationToken::new();
//!     let transport = Arc::new(HttpTransport::new()?);
//!
//!     // Read the Central Directory of a remote archive
//!     let index = ArchiveIndex::open(transport, "https://example.com/archive.zip", &cancel).await?;
//!     for entry in index.entries() {
//!         println!("{} ({} bytes)", entry.name, entry.uncompressed_size);
//!     }
//!
//!     // Stream one entry
//!     let mut reader = index.find_by_name("docs/readme.txt")?.open(&cancel).await?;
//!     let mut text = String::new();
//!     reader.read_to_string(&mut text).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod transport;
pub mod zip;

pub use cli::Cli;
pub use error::{Error, Result};
pub use transport::{ByteStream, HttpTransport, MemoryTransport, Transport};
pub use zip::{ArchiveIndex, CompressionMethod, Entry, EntryHandle, EntryReader};
