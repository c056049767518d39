//! Remote ZIP archive indexing and entry reading.
//!
//! This module reads the Central Directory of a ZIP archive through a
//! [`Transport`](crate::transport::Transport) and opens single entries on
//! demand, supporting both the standard format and ZIP64 extensions.
//!
//! ## Architecture
//!
//! - `structures`: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`parser`]: Bounds-checked parsing of ZIP structures from fetched bytes
//! - `index`: [`ArchiveIndex`], which decides what to fetch and owns the entries
//! - `reader`: [`EntryReader`], the streaming decoder for one entry
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! The EOCD is read first (from the end of the file), then the Central
//! Directory, which allows listing files without reading the entire
//! archive. Opening an entry costs two more requests: its local header and
//! its data.
//!
//! ## Supported Features
//!
//! - Standard ZIP format (PKZIP APPNOTE 6.3.x compatible)
//! - ZIP64 extensions for files > 4GB
//! - STORED (no compression) method
//! - DEFLATE compression method
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support
//! - No BZIP2, LZMA, or other compression methods
//! - CRC32 values are reported but not verified

mod index;
pub mod parser;
mod reader;
mod structures;

pub use index::{ArchiveIndex, EntryHandle};
pub use reader::EntryReader;
pub use structures::*;
