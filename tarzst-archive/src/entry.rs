//! Entry metadata captured before an entry is framed.

use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Fifo,
    CharDevice,
    BlockDevice,
}

impl EntryKind {
    pub(crate) fn tar_type(self) -> tar::EntryType {
        match self {
            EntryKind::File => tar::EntryType::Regular,
            EntryKind::Directory => tar::EntryType::Directory,
            EntryKind::Symlink => tar::EntryType::Symlink,
            EntryKind::Fifo => tar::EntryType::Fifo,
            EntryKind::CharDevice => tar::EntryType::Char,
            EntryKind::BlockDevice => tar::EntryType::Block,
        }
    }
}

/// Header of one archive entry.
///
/// `size` is the number of content bytes that must follow the header.
/// Only regular files carry content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    /// Relative path inside the archive.
    pub path: PathBuf,
    pub kind: EntryKind,
    /// Permission bits.
    pub mode: u32,
    pub size: u64,
    /// Target of a symlink entry.
    pub link_target: Option<PathBuf>,
    /// Modification time in seconds since the epoch.
    pub mtime: u64,
    pub uid: u64,
    pub gid: u64,
    /// Major and minor number of a device entry.
    pub device: Option<(u32, u32)>,
}

impl EntryHeader {
    pub fn file(path: impl Into<PathBuf>, size: u64) -> Self {
        Self::new(path, EntryKind::File, 0o644, size)
    }

    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self::new(path, EntryKind::Directory, 0o755, 0)
    }

    pub fn symlink(path: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            link_target: Some(target.into()),
            ..Self::new(path, EntryKind::Symlink, 0o777, 0)
        }
    }

    fn new(path: impl Into<PathBuf>, kind: EntryKind, mode: u32, size: u64) -> Self {
        Self {
            path: path.into(),
            kind,
            mode,
            size,
            link_target: None,
            mtime: 0,
            uid: 0,
            gid: 0,
            device: None,
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_mtime(mut self, mtime: u64) -> Self {
        self.mtime = mtime;
        self
    }

    /// Build a header from `lstat` metadata.
    ///
    /// Returns `None` for sockets and for a symlink whose `link_target` is
    /// missing. Fifos and devices become content-less special entries.
    pub fn from_metadata(path: impl Into<PathBuf>, meta: &Metadata, link_target: Option<PathBuf>) -> Option<Self> {
        let file_type = meta.file_type();
        let mut header = if file_type.is_symlink() {
            Self::symlink(path, link_target?)
        } else if file_type.is_dir() {
            Self::directory(path)
        } else if file_type.is_file() {
            Self::file(path, meta.len())
        } else {
            special(path.into(), meta)?
        };

        header.mode = mode_bits(meta, header.kind);
        header.mtime = mtime_secs(meta);
        let (uid, gid) = owner(meta);
        header.uid = uid;
        header.gid = gid;
        Some(header)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes of content that follow the header.
    pub fn content_len(&self) -> u64 {
        match self.kind {
            EntryKind::File => self.size,
            _ => 0,
        }
    }
}

#[cfg(unix)]
fn special(path: PathBuf, meta: &Metadata) -> Option<EntryHeader> {
    use std::os::unix::fs::{FileTypeExt, MetadataExt};

    let file_type = meta.file_type();
    let kind = if file_type.is_fifo() {
        EntryKind::Fifo
    } else if file_type.is_char_device() {
        EntryKind::CharDevice
    } else if file_type.is_block_device() {
        EntryKind::BlockDevice
    } else {
        return None;
    };

    let mut header = EntryHeader::new(path, kind, 0o644, 0);
    if kind != EntryKind::Fifo {
        let dev = meta.rdev();
        let major = ((dev >> 32) & 0xffff_f000) | ((dev >> 8) & 0x0000_0fff);
        let minor = ((dev >> 12) & 0xffff_ff00) | (dev & 0x0000_00ff);
        header.device = Some((major as u32, minor as u32));
    }
    Some(header)
}

#[cfg(not(unix))]
fn special(_path: PathBuf, _meta: &Metadata) -> Option<EntryHeader> {
    None
}

#[cfg(unix)]
fn mode_bits(meta: &Metadata, _kind: EntryKind) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_bits(meta: &Metadata, kind: EntryKind) -> u32 {
    match kind {
        EntryKind::File if meta.permissions().readonly() => 0o444,
        EntryKind::File => 0o644,
        _ => 0o755,
    }
}

#[cfg(unix)]
fn owner(meta: &Metadata) -> (u64, u64) {
    use std::os::unix::fs::MetadataExt;
    (u64::from(meta.uid()), u64::from(meta.gid()))
}

#[cfg(not(unix))]
fn owner(_meta: &Metadata) -> (u64, u64) {
    (0, 0)
}

fn mtime_secs(meta: &Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
