//! The byte stages underneath the tar framer: the zstd encoder and the file it
//! writes into.
//!
//! Each stage is a `Write` with an explicit finalizer. Finalizers take
//! `&mut self` so that the writer can still reach inner stages after an outer
//! one fails to finish.

use log::debug;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::options::ZstdOptions;

/// A writable stage with a finalizer.
pub trait StreamStage: Write {
    /// Flush buffered state and write any trailer so the stream is complete.
    fn finish(&mut self) -> io::Result<()>;
}

/// A stage that owns the next stage down the chain.
pub trait LayeredStage: StreamStage {
    type Inner: StreamStage;

    fn inner_mut(&mut self) -> &mut Self::Inner;
}

impl StreamStage for Vec<u8> {
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The output file. Finishing flushes, optionally syncs, and releases it.
pub struct FileSink {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    sync_on_close: bool,
}

impl FileSink {
    pub fn new(file: File, path: impl Into<PathBuf>, buffer_size: usize, sync_on_close: bool) -> Self {
        Self {
            path: path.into(),
            file: Some(BufWriter::with_capacity(buffer_size, file)),
            sync_on_close,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn open_file(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.file
            .as_mut()
            .ok_or_else(|| io_other(format!("{} is already closed", self.path.display())))
    }
}

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.open_file()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.open_file()?.flush()
    }
}

impl StreamStage for FileSink {
    fn finish(&mut self) -> io::Result<()> {
        let writer = self
            .file
            .take()
            .ok_or_else(|| io_other(format!("{} is already closed", self.path.display())))?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        if self.sync_on_close {
            file.sync_all()?;
        }
        debug!("closed {}", self.path.display());
        Ok(())
    }
}

fn io_other(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::Other, msg)
}

/// Streaming zstd encoder over an inner stage.
pub struct ZstdStage<S: StreamStage> {
    encoder: zstd::stream::write::Encoder<'static, S>,
}

impl<S: StreamStage> ZstdStage<S> {
    /// Build the encoder. On failure `sink` is dropped before returning.
    pub fn new(sink: S, opts: &ZstdOptions) -> io::Result<Self> {
        let range = zstd::compression_level_range();
        if !range.contains(&opts.level) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "zstd level {} outside {}..={}",
                    opts.level,
                    range.start(),
                    range.end()
                ),
            ));
        }

        let mut encoder = match opts.dict {
            Some(ref dict) => zstd::stream::write::Encoder::with_dictionary(sink, opts.level, dict)?,
            None => zstd::stream::write::Encoder::new(sink, opts.level)?,
        };

        encoder.include_checksum(opts.include_checksum)?;
        encoder.long_distance_matching(opts.long_distance_matching)?;

        if let Some(log) = opts.window_log {
            encoder.window_log(log)?;
        }

        if opts.threads > 0 {
            #[cfg(feature = "zstdmt")]
            {
                encoder.multithread(opts.threads)?;
            }
            #[cfg(not(feature = "zstdmt"))]
            {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!(
                        "threads={} requested but zstdmt feature is not enabled",
                        opts.threads
                    ),
                ));
            }
        }

        Ok(Self { encoder })
    }

    pub fn get_ref(&self) -> &S {
        self.encoder.get_ref()
    }
}

impl<S: StreamStage> Write for ZstdStage<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}

impl<S: StreamStage> StreamStage for ZstdStage<S> {
    fn finish(&mut self) -> io::Result<()> {
        self.encoder.do_finish()
    }
}

impl<S: StreamStage> LayeredStage for ZstdStage<S> {
    type Inner = S;

    fn inner_mut(&mut self) -> &mut S {
        self.encoder.get_mut()
    }
}
