//! The `.tar.zst` writer: a tar framer over a zstd stage over an output file,
//! appended to as one resource and closed in order.

use log::{debug, warn};
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::entry::{EntryHeader, EntryKind};
use crate::error::{AppendStep, CloseError, Result, StageFailure, StageKind, TarZstError};
use crate::framer::TarFramer;
use crate::options::{WriterOptions, ZstdOptions};
use crate::stage::{FileSink, LayeredStage, StreamStage, ZstdStage};

/// Streaming `.tar.zst` writer.
///
/// `close` consumes the writer; an open writer that is dropped is closed
/// best-effort and any failure is logged.
pub struct TarZstWriter<C: LayeredStage = ZstdStage<FileSink>> {
    framer: TarFramer<C>,
    verify_entry_size: bool,
    buffer_size: usize,
    entries: u64,
    content_bytes: u64,
    closed: bool,
}

impl TarZstWriter {
    /// Create `path` (and its parent directories) and start an archive in it.
    ///
    /// `None` compresses with [`ZstdOptions::default`], the best-compression
    /// level.
    pub fn create(path: impl AsRef<Path>, compression: Option<ZstdOptions>) -> Result<Self> {
        let options = WriterOptions {
            compression: compression.unwrap_or_default(),
            ..WriterOptions::default()
        };
        Self::create_with_options(path, options)
    }

    pub fn create_with_options(path: impl AsRef<Path>, options: WriterOptions) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| TarZstError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let file = File::create(path).map_err(|source| TarZstError::CreateOutput {
            path: path.to_path_buf(),
            source,
        })?;
        let sink = FileSink::new(file, path, options.buffer_size, options.sync_on_close);

        // The sink is dropped, and the file released, if the encoder fails.
        let compressor = ZstdStage::new(sink, &options.compression).map_err(TarZstError::EncoderInit)?;

        debug!(
            "creating {} (zstd level {})",
            path.display(),
            options.compression.level
        );
        Ok(Self::from_compressor(compressor, &options))
    }
}

impl<C: LayeredStage> TarZstWriter<C> {
    /// Assemble a writer over an already built compressor stage.
    pub fn from_compressor(compressor: C, options: &WriterOptions) -> Self {
        Self {
            framer: TarFramer::new(compressor, options.verify_entry_size),
            verify_entry_size: options.verify_entry_size,
            buffer_size: options.buffer_size,
            entries: 0,
            content_bytes: 0,
            closed: false,
        }
    }

    /// Entries appended successfully so far.
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Uncompressed content bytes appended so far.
    pub fn content_bytes(&self) -> u64 {
        self.content_bytes
    }

    /// Write `header` and then everything `reader` yields as the entry content.
    ///
    /// On failure the archive is corrupt from this entry on; the writer can
    /// still be closed.
    pub fn append<R: Read>(&mut self, header: &EntryHeader, mut reader: R) -> Result<()> {
        let name = header.path();
        let declared = header.content_len();

        self.framer
            .write_header(header)
            .map_err(|source| append_error(name, AppendStep::Header, source))?;

        let copied = if self.verify_entry_size {
            let copied = io::copy(&mut (&mut reader).take(declared), &mut self.framer)
                .map_err(|source| append_error(name, AppendStep::Copy, source))?;
            if copied < declared {
                return Err(TarZstError::ShortEntry {
                    name: name.to_path_buf(),
                    declared,
                    copied,
                });
            }
            let mut next = [0u8; 1];
            let extra = reader
                .read(&mut next)
                .map_err(|source| append_error(name, AppendStep::Copy, source))?;
            if extra > 0 {
                return Err(TarZstError::LongEntry {
                    name: name.to_path_buf(),
                    declared,
                });
            }
            copied
        } else {
            io::copy(&mut reader, &mut self.framer)
                .map_err(|source| append_error(name, AppendStep::Copy, source))?
        };

        self.framer
            .flush_entry()
            .map_err(|source| append_error(name, AppendStep::Flush, source))?;

        self.entries += 1;
        self.content_bytes += copied;
        debug!("appended {} ({} bytes)", name.display(), copied);
        Ok(())
    }

    /// Append the filesystem object at `src` under the archive path `name`.
    ///
    /// A symlink is recorded as a link to its target, never followed.
    pub fn append_file(&mut self, name: impl AsRef<Path>, src: impl AsRef<Path>) -> Result<()> {
        let name = name.as_ref();
        let src = src.as_ref();

        let meta = fs::symlink_metadata(src).map_err(|source| TarZstError::Stat {
            path: src.to_path_buf(),
            source,
        })?;

        let link_target = if meta.file_type().is_symlink() {
            let target = fs::read_link(src).map_err(|source| TarZstError::ReadLink {
                path: src.to_path_buf(),
                source,
            })?;
            Some(target)
        } else {
            None
        };

        let header = EntryHeader::from_metadata(name, &meta, link_target).ok_or_else(|| {
            TarZstError::UnsupportedFileType {
                path: src.to_path_buf(),
            }
        })?;

        if header.kind != EntryKind::File {
            return self.append(&header, io::empty());
        }

        let file = File::open(src).map_err(|source| TarZstError::Open {
            path: src.to_path_buf(),
            source,
        })?;
        self.append(&header, BufReader::with_capacity(self.buffer_size, file))
    }

    /// Append `src_dir` and everything below it under the archive path `name`.
    ///
    /// Entries are added in file-name order. Symlinks are recorded, not
    /// followed. Sockets are skipped with a warning. Returns the number of
    /// entries appended.
    pub fn append_dir_all(&mut self, name: impl AsRef<Path>, src_dir: impl AsRef<Path>) -> Result<u64> {
        let name = name.as_ref();
        let src_dir = src_dir.as_ref();
        let mut appended = 0;

        for entry in WalkDir::new(src_dir).follow_links(false).sort_by_file_name() {
            let entry = entry?;
            let rel = entry.path().strip_prefix(src_dir).unwrap_or(entry.path());
            let dst = archive_path(name, rel);
            if dst.as_os_str().is_empty() {
                continue;
            }
            match self.append_file(&dst, entry.path()) {
                Ok(()) => appended += 1,
                // Rejected before anything reached the stream.
                Err(TarZstError::UnsupportedFileType { path }) => {
                    warn!("skipping {}: not an archivable file type", path.display());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(appended)
    }

    /// Finalize the tar stream, then the zstd frame, then the output file.
    ///
    /// Every finalizer runs even if an earlier one fails.
    pub fn close(mut self) -> Result<(), CloseError> {
        self.closed = true;
        let result = self.finish_stages();
        if result.is_ok() {
            debug!(
                "closed archive: {} entries, {} content bytes",
                self.entries, self.content_bytes
            );
        }
        result
    }

    fn finish_stages(&mut self) -> Result<(), CloseError> {
        let mut failures = Vec::new();

        if let Err(source) = self.framer.finish() {
            failures.push(StageFailure {
                stage: StageKind::Framer,
                source,
            });
        }

        let compressor = self.framer.get_mut();
        if let Err(source) = compressor.finish() {
            failures.push(StageFailure {
                stage: StageKind::Compressor,
                source,
            });
        }

        if let Err(source) = compressor.inner_mut().finish() {
            failures.push(StageFailure {
                stage: StageKind::Sink,
                source,
            });
        }

        match CloseError::from_failures(failures) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<C: LayeredStage> Drop for TarZstWriter<C> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        warn!("archive writer dropped without close; finishing it now");
        if let Err(e) = self.finish_stages() {
            warn!("{e}");
        }
    }
}

fn append_error(name: &Path, step: AppendStep, source: io::Error) -> TarZstError {
    TarZstError::Append {
        name: name.to_path_buf(),
        step,
        source,
    }
}

fn archive_path(prefix: &Path, rel: &Path) -> PathBuf {
    if prefix.as_os_str().is_empty() || prefix == Path::new(".") {
        rel.to_path_buf()
    } else if rel.as_os_str().is_empty() {
        prefix.to_path_buf()
    } else {
        prefix.join(rel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::io::Write;
    use std::rc::Rc;

    type Calls = Rc<RefCell<Vec<&'static str>>>;

    struct MockSink {
        calls: Calls,
        fail_finish: bool,
    }

    impl Write for MockSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl StreamStage for MockSink {
        fn finish(&mut self) -> io::Result<()> {
            self.calls.borrow_mut().push("sink");
            if self.fail_finish {
                Err(io::Error::new(io::ErrorKind::Other, "sink close failed"))
            } else {
                Ok(())
            }
        }
    }

    struct MockCompressor {
        sink: MockSink,
        calls: Calls,
        reject_writes: Rc<Cell<bool>>,
        received: Rc<Cell<u64>>,
    }

    impl Write for MockCompressor {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.reject_writes.get() {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "compressor rejected write"));
            }
            self.received.set(self.received.get() + buf.len() as u64);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl StreamStage for MockCompressor {
        fn finish(&mut self) -> io::Result<()> {
            self.calls.borrow_mut().push("compressor");
            Ok(())
        }
    }

    impl LayeredStage for MockCompressor {
        type Inner = MockSink;

        fn inner_mut(&mut self) -> &mut MockSink {
            &mut self.sink
        }
    }

    struct Harness {
        writer: TarZstWriter<MockCompressor>,
        calls: Calls,
        reject_writes: Rc<Cell<bool>>,
        received: Rc<Cell<u64>>,
    }

    fn harness(fail_sink: bool) -> Harness {
        let calls: Calls = Rc::default();
        let reject_writes = Rc::new(Cell::new(false));
        let received = Rc::new(Cell::new(0));
        let compressor = MockCompressor {
            sink: MockSink {
                calls: calls.clone(),
                fail_finish: fail_sink,
            },
            calls: calls.clone(),
            reject_writes: reject_writes.clone(),
            received: received.clone(),
        };
        Harness {
            writer: TarZstWriter::from_compressor(compressor, &WriterOptions::default()),
            calls,
            reject_writes,
            received,
        }
    }

    #[test]
    fn close_runs_every_finalizer_and_aggregates_failures() {
        let h = harness(true);
        h.reject_writes.set(true);

        let err = h.writer.close().unwrap_err();

        assert_eq!(*h.calls.borrow(), vec!["compressor", "sink"]);
        let stages: Vec<_> = err.stages().collect();
        assert_eq!(stages, vec![StageKind::Framer, StageKind::Sink]);
        assert_eq!(err.failures()[0].source.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(err.failures()[1].source.kind(), io::ErrorKind::Other);
        let msg = err.to_string();
        assert!(msg.contains("tar: compressor rejected write"), "{msg}");
        assert!(msg.contains("file: sink close failed"), "{msg}");
    }

    #[test]
    fn close_succeeds_when_every_stage_does() {
        let h = harness(false);
        h.writer.close().unwrap();
        assert_eq!(*h.calls.borrow(), vec!["compressor", "sink"]);
        assert_eq!(h.received.get(), 1024);
    }

    #[test]
    fn failed_header_write_leaves_writer_closable() {
        let mut h = harness(false);
        h.reject_writes.set(true);
        let err = h
            .writer
            .append(&EntryHeader::file("a.txt", 3), &b"abc"[..])
            .unwrap_err();
        assert!(matches!(
            err,
            TarZstError::Append {
                step: AppendStep::Header,
                ..
            }
        ));

        h.reject_writes.set(false);
        h.writer.close().unwrap();
        assert_eq!(*h.calls.borrow(), vec!["compressor", "sink"]);
    }

    #[test]
    fn copy_failure_is_tagged() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "unreadable"))
            }
        }

        let mut h = harness(false);
        let err = h.writer.append(&EntryHeader::file("a.txt", 3), Broken).unwrap_err();
        assert!(matches!(
            err,
            TarZstError::Append {
                step: AppendStep::Copy,
                ..
            }
        ));
        assert_eq!(h.writer.entries(), 0);

        // header + zero-filled block + end marker
        h.writer.close().unwrap();
        assert_eq!(h.received.get(), 512 + 512 + 1024);
    }

    #[test]
    fn counts_entries_and_bytes() {
        let mut h = harness(false);
        h.writer.append(&EntryHeader::file("a", 3), &b"abc"[..]).unwrap();
        h.writer.append(&EntryHeader::directory("d"), io::empty()).unwrap();
        assert_eq!(h.writer.entries(), 2);
        assert_eq!(h.writer.content_bytes(), 3);
        h.writer.close().unwrap();
    }

    #[test]
    fn dropping_open_writer_finishes_stages() {
        let h = harness(false);
        drop(h.writer);
        assert_eq!(*h.calls.borrow(), vec!["compressor", "sink"]);
        assert_eq!(h.received.get(), 1024);
    }

    #[test]
    fn archive_path_joins_prefix() {
        assert_eq!(archive_path(Path::new("."), Path::new("a/b")), PathBuf::from("a/b"));
        assert_eq!(archive_path(Path::new(""), Path::new("")), PathBuf::new());
        assert_eq!(archive_path(Path::new("root"), Path::new("")), PathBuf::from("root"));
        assert_eq!(archive_path(Path::new("root"), Path::new("x")), PathBuf::from("root/x"));
    }
}
