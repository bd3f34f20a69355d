//! Streaming `.tar.zst` archive writer.
//!
//! An archive is written through three nested stages: a tar framer, a zstd
//! encoder and the output file. [`TarZstWriter`] drives them as one resource:
//!
//! ```no_run
//! use tarzst_archive::{EntryHeader, TarZstWriter};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut writer = TarZstWriter::create("out/backup.tar.zst", None)?;
//! writer.append(&EntryHeader::file("hello.txt", 5), &b"hello"[..])?;
//! writer.append_file("config.toml", "/etc/app/config.toml")?;
//! writer.close()?;
//! # Ok(())
//! # }
//! ```

pub mod entry;
pub mod error;
pub mod framer;
pub mod options;
pub mod stage;
pub mod writer;

pub use entry::{EntryHeader, EntryKind};
pub use error::{AppendStep, CloseError, Result, StageFailure, StageKind, TarZstError};
pub use framer::TarFramer;
pub use options::{WriterOptions, ZstdOptions, BEST_COMPRESSION_LEVEL};
pub use stage::{FileSink, LayeredStage, StreamStage, ZstdStage};
pub use writer::TarZstWriter;
