//! Command-line interface for tarzst

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tarzst")]
#[command(about = "tarzst - Streaming .tar.zst archiver", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new .tar.zst archive from files or directories
    Create {
        /// Output archive file (.tar.zst)
        #[arg(short, long)]
        output: PathBuf,

        /// Input files or directories, stored under their final path component
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// ZSTD compression level (1-22, higher = better compression)
        #[arg(short, long, default_value_t = tarzst_archive::BEST_COMPRESSION_LEVEL)]
        level: i32,

        /// Don't write a content checksum into the zstd frame
        #[arg(long)]
        no_checksum: bool,

        /// Enable long-distance matching
        #[arg(long)]
        long: bool,

        /// Compression worker threads (needs the zstdmt feature)
        #[arg(long, default_value = "0")]
        threads: u32,

        /// Window size as a power of two
        #[arg(long)]
        window_log: Option<u32>,

        /// Pass entry content through without checking it against the header size
        #[arg(long)]
        no_verify_sizes: bool,

        /// Skip fsync of the archive on close
        #[arg(long)]
        no_sync: bool,
    },
}
