/// Strongest zstd level available without ultra mode.
pub const BEST_COMPRESSION_LEVEL: i32 = 19;

/// Settings for the zstd compressor stage.
///
/// Notes:
/// - `include_checksum` adds a content checksum at the end of the frame.
/// - `threads` requires the `zstdmt` cargo feature.
/// - `dict` must also be supplied to whoever decompresses the archive.
#[derive(Clone, Debug)]
pub struct ZstdOptions {
    /// Compression level, checked against `zstd::compression_level_range()`.
    pub level: i32,

    /// Include a content checksum in the frame.
    pub include_checksum: bool,

    /// Enable long-distance matching (better ratio on some content, often slower).
    pub long_distance_matching: bool,

    /// Multithreaded compression workers (0 = disabled).
    pub threads: u32,

    /// Override the window size as a power of two.
    pub window_log: Option<u32>,

    /// Optional dictionary bytes.
    pub dict: Option<Vec<u8>>,
}

impl ZstdOptions {
    pub fn with_level(level: i32) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }
}

impl Default for ZstdOptions {
    fn default() -> Self {
        Self {
            level: BEST_COMPRESSION_LEVEL,
            include_checksum: true,
            long_distance_matching: false,
            threads: 0,
            window_log: None,
            dict: None,
        }
    }
}

/// Settings for the archive writer as a whole.
#[derive(Clone, Debug)]
pub struct WriterOptions {
    pub compression: ZstdOptions,

    /// Buffer size used for the output file and for reading sources.
    pub buffer_size: usize,

    /// Reject entries whose source does not yield exactly the declared size.
    ///
    /// When disabled, content is passed through unchecked and padding follows
    /// the bytes actually written, so a mismatch only shows up on read-back.
    pub verify_entry_size: bool,

    /// `fsync` the output file before releasing it.
    pub sync_on_close: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            compression: ZstdOptions::default(),
            buffer_size: 1024 * 1024, // 1 MiB
            verify_entry_size: true,
            sync_on_close: true,
        }
    }
}
