//! Error types for archive creation.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while creating or appending to a `.tar.zst` archive.
#[derive(Debug, Error)]
pub enum TarZstError {
    #[error("failed to create output directory {}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create output file {}", .path.display())]
    CreateOutput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create zstd encoder")]
    EncoderInit(#[source] io::Error),

    #[error("failed to append `{}`: {step}", .name.display())]
    Append {
        name: PathBuf,
        step: AppendStep,
        #[source]
        source: io::Error,
    },

    #[error("entry `{}` declared {declared} bytes but its source ended after {copied}", .name.display())]
    ShortEntry { name: PathBuf, declared: u64, copied: u64 },

    #[error("entry `{}` declared {declared} bytes but its source has more data", .name.display())]
    LongEntry { name: PathBuf, declared: u64 },

    #[error("failed to open `{}`", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to stat `{}`", .path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read symlink `{}`", .path.display())]
    ReadLink {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unsupported file type at `{}`", .path.display())]
    UnsupportedFileType { path: PathBuf },

    #[error("failed to walk directory")]
    Walk(#[from] walkdir::Error),
}

pub type Result<T, E = TarZstError> = std::result::Result<T, E>;

/// The sub-step of an append that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendStep {
    Header,
    Copy,
    Flush,
}

impl fmt::Display for AppendStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AppendStep::Header => "header",
            AppendStep::Copy => "copy",
            AppendStep::Flush => "flush",
        })
    }
}

/// Identifies one stage of the writer chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// The tar framer.
    Framer,
    /// The zstd encoder.
    Compressor,
    /// The output file.
    Sink,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StageKind::Framer => "tar",
            StageKind::Compressor => "zst",
            StageKind::Sink => "file",
        })
    }
}

/// A single finalizer failure.
#[derive(Debug, Error)]
#[error("{stage}: {source}")]
pub struct StageFailure {
    pub stage: StageKind,
    #[source]
    pub source: io::Error,
}

/// Every finalizer failure from one `close`, in finalize order.
#[derive(Debug, Error)]
#[error("failed to close archive: {}", join_failures(.failures))]
pub struct CloseError {
    failures: Vec<StageFailure>,
}

impl CloseError {
    pub(crate) fn from_failures(failures: Vec<StageFailure>) -> Option<Self> {
        if failures.is_empty() {
            None
        } else {
            Some(Self { failures })
        }
    }

    pub fn failures(&self) -> &[StageFailure] {
        &self.failures
    }

    /// Stages whose finalizer failed.
    pub fn stages(&self) -> impl Iterator<Item = StageKind> + '_ {
        self.failures.iter().map(|f| f.stage)
    }

    pub fn failed(&self, stage: StageKind) -> bool {
        self.stages().any(|s| s == stage)
    }

    pub fn into_failures(self) -> Vec<StageFailure> {
        self.failures
    }
}

fn join_failures(failures: &[StageFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_error_lists_every_stage() {
        let err = CloseError::from_failures(vec![
            StageFailure {
                stage: StageKind::Framer,
                source: io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"),
            },
            StageFailure {
                stage: StageKind::Sink,
                source: io::Error::new(io::ErrorKind::Other, "disk full"),
            },
        ])
        .unwrap();

        assert_eq!(
            err.to_string(),
            "failed to close archive: tar: pipe closed; file: disk full"
        );
        assert!(err.failed(StageKind::Framer));
        assert!(!err.failed(StageKind::Compressor));
        assert!(err.failed(StageKind::Sink));

        let failures = err.into_failures();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[1].source.kind(), io::ErrorKind::Other);
    }

    #[test]
    fn no_failures_means_no_error() {
        assert!(CloseError::from_failures(Vec::new()).is_none());
    }

    #[test]
    fn append_error_names_step() {
        let err = TarZstError::Append {
            name: PathBuf::from("docs/readme.txt"),
            step: AppendStep::Copy,
            source: io::Error::new(io::ErrorKind::Other, "boom"),
        };
        assert_eq!(err.to_string(), "failed to append `docs/readme.txt`: copy");
    }
}
