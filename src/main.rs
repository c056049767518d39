//! Main entry point for the rangezip CLI application.
//!
//! This binary lists and extracts entries of a remote ZIP archive, fetching
//! only the Central Directory and the selected entries' bytes.

use anyhow::{Result, bail};
use clap::Parser;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use rangezip::{ArchiveIndex, Cli, Entry, EntryHandle, HttpTransport, Transport};

/// Minimal `log` backend writing this crate's records to stderr.
struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.target().starts_with("rangezip")
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

/// Application entry point.
///
/// Builds the archive index over HTTP and dispatches to listing or
/// extraction. Ctrl-C cancels whatever request or read is in flight.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug {
        log::LevelFilter::Debug
    } else if cli.is_very_quiet() {
        log::LevelFilter::Off
    } else {
        log::LevelFilter::Warn
    };
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }

    if !cli.is_http_url() {
        bail!("{} is not an http:// or https:// URL", cli.url);
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let transport = Arc::new(HttpTransport::with_timeout(Duration::from_secs(
        cli.timeout,
    ))?);
    let index = ArchiveIndex::open(transport, cli.url.clone(), &cancel).await?;

    process_zip(&index, &cli, &cancel).await?;

    // Display network transfer statistics
    if !cli.is_quiet() {
        eprintln!(
            "\nTotal bytes transferred: {} of {}",
            format_size(index.transport().transferred_bytes()),
            format_size(index.total_size())
        );
    }

    Ok(())
}

/// Process a ZIP archive based on CLI options.
///
/// - List mode (`-l` or `-v`): Display archive contents
/// - Extract mode: Extract files matching the specified filters
///
/// # Errors
///
/// Fails if an entry cannot be extracted, or if a literal file name given
/// on the command line matches nothing in the archive.
async fn process_zip<T: Transport + ?Sized>(
    index: &ArchiveIndex<T>,
    cli: &Cli,
    cancel: &CancellationToken,
) -> Result<()> {
    // List mode: display archive contents and exit
    if cli.list || cli.verbose {
        list_files(index, cli.verbose);
        return Ok(());
    }

    let unmatched: Vec<&String> = cli
        .files
        .iter()
        .filter(|f| !index.entries().any(|e| matches_selection(&e, f)))
        .collect();

    // Apply filters to determine which files to extract:
    // 1. Skip directories (they are created automatically during extraction)
    // 2. If specific files are requested, only include matching entries
    // 3. Exclude files matching the exclusion patterns
    let files_to_extract: Vec<EntryHandle<'_, T>> = index
        .entries()
        .filter(|e| {
            if e.is_directory {
                return false;
            }

            if !cli.files.is_empty() && !cli.files.iter().any(|f| matches_selection(e, f)) {
                return false;
            }

            !cli
                .exclude
                .iter()
                .any(|x| e.name.contains(x.as_str()) || glob_match(x, &e.name))
        })
        .collect();

    let multiple_files = cli.pipe && files_to_extract.len() > 1;
    for entry in files_to_extract {
        extract_file(entry, cli, multiple_files, cancel).await?;
    }

    if !unmatched.is_empty() {
        if !cli.is_very_quiet() {
            for name in &unmatched {
                eprintln!("caution: filename not matched:  {}", name);
            }
        }
        bail!(rangezip::Error::NotFound(
            unmatched
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    Ok(())
}

/// Whether `entry` is selected by a FILES argument.
///
/// Patterns with wildcards are glob-matched against the full name; plain
/// names match the full name or the basename.
fn matches_selection(entry: &Entry, pattern: &str) -> bool {
    if has_glob_chars(pattern) {
        return glob_match(pattern, &entry.name);
    }
    let basename = Path::new(&entry.name)
        .file_name()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    entry.name == pattern || basename == pattern
}

/// List files in the ZIP archive.
///
/// Supports two output formats:
/// - Simple format (`-l`): Just file names, one per line
/// - Verbose format (`-v`): Detailed table with size, compression ratio, and timestamps
fn list_files<T: Transport + ?Sized>(index: &ArchiveIndex<T>, verbose: bool) {
    if verbose {
        println!(
            "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
            "Length", "Size", "Cmpr", "Date", "Time"
        );
        println!("{}", "-".repeat(70));
    }

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in index.entries() {
        if !verbose {
            println!("{}", entry.name);
            continue;
        }

        let (year, month, day) = entry.mod_date();
        let (hour, minute, _second) = entry.mod_time();

        println!(
            "{:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {}",
            entry.uncompressed_size,
            entry.compressed_size,
            ratio(entry.compressed_size, entry.uncompressed_size),
            year,
            month,
            day,
            hour,
            minute,
            entry.name
        );

        if !entry.is_directory {
            total_uncompressed += entry.uncompressed_size;
            total_compressed += entry.compressed_size;
            file_count += 1;
        }
    }

    if verbose {
        println!("{}", "-".repeat(70));
        println!(
            "{:>10}  {:>10}  {}  {:>21}  {} files",
            total_uncompressed,
            total_compressed,
            ratio(total_compressed, total_uncompressed),
            "",
            file_count
        );
    }
}

/// Compression ratio as percentage saved, right-aligned to 5 columns.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    let saved = if uncompressed == 0 || compressed >= uncompressed {
        0
    } else {
        100 - (compressed as u128 * 100 / uncompressed as u128)
    };
    format!("{:>4}%", saved)
}

/// Extract a single file from the archive.
///
/// Handles various extraction options:
/// - Pipe mode (`-p`): Write to stdout instead of file
/// - Custom output directory (`-d`): Extract to specified directory
/// - Junk paths (`-j`): Ignore directory structure in archive
/// - Overwrite control (`-n`, `-o`): Handle existing files
///
/// The entry is streamed, never held in memory as a whole. A file left
/// behind by a failed extraction is removed.
async fn extract_file<T: Transport + ?Sized>(
    entry: EntryHandle<'_, T>,
    cli: &Cli,
    show_filename: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    if cli.pipe {
        let mut stdout = tokio::io::stdout();
        if show_filename {
            stdout
                .write_all(format!("--- {} ---\n", entry.name).as_bytes())
                .await?;
        }
        let mut reader = entry.open(cancel).await?;
        tokio::io::copy(&mut reader, &mut stdout).await?;
        stdout.flush().await?;
        return Ok(());
    }

    let Some(relative) = output_relative_path(&entry, cli.junk_paths) else {
        if !cli.is_quiet() {
            eprintln!("Skipping: {} (unsafe path)", entry.name);
        }
        return Ok(());
    };
    let output_path = match cli.extract_dir {
        Some(ref dir) => PathBuf::from(dir).join(relative),
        None => relative,
    };

    if output_path.exists() {
        if cli.never_overwrite {
            if !cli.is_quiet() {
                eprintln!("Skipping: {} (file exists)", entry.name);
            }
            return Ok(());
        }

        if !cli.overwrite {
            if !cli.is_quiet() {
                eprintln!("Skipping: {} (use -o to overwrite)", entry.name);
            }
            return Ok(());
        }
    }

    if !cli.is_quiet() {
        println!("  extracting: {}", entry.name);
    }

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let mut reader = entry.open(cancel).await?;
    let mut file = fs::File::create(&output_path).await?;
    let copied = tokio::io::copy(&mut reader, &mut file).await;
    match copied {
        Ok(_) => {
            file.flush().await?;
            Ok(())
        }
        Err(e) => {
            drop(file);
            let _ = fs::remove_file(&output_path).await;
            Err(e.into())
        }
    }
}

/// Relative output path for an entry, or `None` if its name would escape
/// the extraction directory.
fn output_relative_path(entry: &Entry, junk_paths: bool) -> Option<PathBuf> {
    let path = Path::new(&entry.name);
    if junk_paths {
        return path.file_name().map(PathBuf::from);
    }

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!out.as_os_str().is_empty()).then_some(out)
}

/// Check if a pattern contains glob wildcard characters.
fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Simple glob pattern matching supporting `*` and `?` wildcards.
///
/// - `*` matches zero or more characters
/// - `?` matches exactly one character
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern_chars: Vec<char> = pattern.chars().collect();
    let text_chars: Vec<char> = text.chars().collect();

    fn do_match(pattern: &[char], text: &[char]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            // Star matches zero characters, or one and stays for more
            (Some('*'), _) => {
                do_match(&pattern[1..], text) || (!text.is_empty() && do_match(pattern, &text[1..]))
            }
            (Some('?'), Some(_)) => do_match(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if *p == *t => do_match(&pattern[1..], &text[1..]),
            _ => false,
        }
    }

    do_match(&pattern_chars, &text_chars)
}

/// Format a byte size into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
