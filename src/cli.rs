use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "rangezip")]
#[command(version)]
#[command(about = "Extract files from remote ZIP archives using HTTP Range requests", long_about = None)]
#[command(after_help = "Examples:\n  \
  rangezip -l https://example.com/archive.zip              list files in a remote ZIP\n  \
  rangezip https://example.com/archive.zip docs/a.txt      extract one file\n  \
  rangezip -p https://example.com/archive.zip '*.csv' | wc -l   stream matching files to a pipe")]
pub struct Cli {
    /// HTTP or HTTPS URL of the ZIP archive
    #[arg(value_name = "URL")]
    pub url: String,

    /// Files to extract (default: all)
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// List files (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Extract files to pipe, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Extract files into exdir
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<String>,

    /// Exclude files that follow
    #[arg(short = 'x', value_name = "FILE", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Never overwrite existing files
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Overwrite files WITHOUT prompting
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Junk paths (do not make directories)
    #[arg(short = 'j')]
    pub junk_paths: bool,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Connect timeout in seconds
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    pub timeout: u64,

    /// Log every request to stderr
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    pub fn is_http_url(&self) -> bool {
        self.url.starts_with("http://") || self.url.starts_with("https://")
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }
}
