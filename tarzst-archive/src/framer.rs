//! Streaming tar framing.
//!
//! Headers are GNU-format blocks built with [`tar::Header`]. Names or link
//! targets of 100 bytes or more are preceded by `././@LongLink` records, the
//! same way the `tar` crate's builder handles them.

use log::warn;
use std::borrow::Cow;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use crate::entry::EntryHeader;

/// Tar block size.
pub const BLOCK_SIZE: u64 = 512;

const LONG_LINK_NAME: &[u8] = b"././@LongLink";

struct OpenEntry {
    path: PathBuf,
    declared: u64,
    written: u64,
}

/// Writes tar entries into `W`.
///
/// Content for the current entry is written through the `Write` impl after
/// [`TarFramer::write_header`] and completed with [`TarFramer::flush_entry`].
pub struct TarFramer<W: Write> {
    inner: W,
    verify_size: bool,
    entry: Option<OpenEntry>,
    finished: bool,
}

impl<W: Write> TarFramer<W> {
    /// With `verify_size`, content must match each header's declared size
    /// exactly. Without it, bytes pass through and padding follows the count
    /// actually written.
    pub fn new(inner: W, verify_size: bool) -> Self {
        Self {
            inner,
            verify_size,
            entry: None,
            finished: false,
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Start a new entry. An entry left incomplete is sealed first.
    pub fn write_header(&mut self, header: &EntryHeader) -> io::Result<()> {
        if self.finished {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "tar stream already finished",
            ));
        }
        self.seal_entry()?;

        // Long-name records and the header go out together or not at all.
        let declared = header.content_len();
        let mut buf = Vec::with_capacity(BLOCK_SIZE as usize);
        let mut block = tar::Header::new_gnu();
        prepare_path(&mut buf, &mut block, &header.path)?;
        if let Some(ref target) = header.link_target {
            prepare_link(&mut buf, &mut block, target)?;
        }
        block.set_mode(header.mode);
        block.set_size(declared);
        block.set_mtime(header.mtime);
        block.set_uid(header.uid);
        block.set_gid(header.gid);
        block.set_entry_type(header.kind.tar_type());
        if let Some((major, minor)) = header.device {
            block.set_device_major(major)?;
            block.set_device_minor(minor)?;
        }
        block.set_cksum();
        buf.extend_from_slice(block.as_bytes());
        self.inner.write_all(&buf)?;

        self.entry = Some(OpenEntry {
            path: header.path.clone(),
            declared,
            written: 0,
        });
        Ok(())
    }

    /// Pad the current entry to the block boundary.
    pub fn flush_entry(&mut self) -> io::Result<()> {
        let Some(ref entry) = self.entry else {
            return Ok(());
        };
        if self.verify_size && entry.written != entry.declared {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "entry `{}` declared {} bytes but {} were written",
                    entry.path.display(),
                    entry.declared,
                    entry.written
                ),
            ));
        }
        let pad = padding(entry.written);
        write_zeros(&mut self.inner, pad)?;
        self.entry = None;
        Ok(())
    }

    /// Bytes still expected for the current entry.
    pub fn remaining(&self) -> u64 {
        self.entry
            .as_ref()
            .map(|e| e.declared.saturating_sub(e.written))
            .unwrap_or(0)
    }

    /// Write the end-of-archive marker. Idempotent.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.seal_entry()?;
        self.finished = true;
        self.inner.write_all(&[0; 2 * BLOCK_SIZE as usize])
    }

    /// Close out an entry whose append never flushed. Missing content is
    /// zero-filled so later headers stay on the offsets the header promised.
    fn seal_entry(&mut self) -> io::Result<()> {
        let Some(entry) = self.entry.take() else {
            return Ok(());
        };
        let mut len = entry.written;
        if entry.written < entry.declared {
            warn!(
                "zero-filling incomplete entry `{}` ({} of {} bytes written)",
                entry.path.display(),
                entry.written,
                entry.declared
            );
            write_zeros(&mut self.inner, entry.declared - entry.written)?;
            len = entry.declared;
        }
        write_zeros(&mut self.inner, padding(len))
    }
}

impl<W: Write> Write for TarFramer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let entry = self.entry.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "no entry header written")
        })?;

        let mut len = buf.len();
        if self.verify_size {
            let remaining = entry.declared - entry.written;
            if remaining == 0 && !buf.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "write past declared size of `{}` ({} bytes)",
                        entry.path.display(),
                        entry.declared
                    ),
                ));
            }
            len = len.min(usize::try_from(remaining).unwrap_or(usize::MAX));
        }

        let n = self.inner.write(&buf[..len])?;
        entry.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn padding(len: u64) -> u64 {
    (BLOCK_SIZE - len % BLOCK_SIZE) % BLOCK_SIZE
}

fn write_zeros<W: Write>(dst: &mut W, len: u64) -> io::Result<()> {
    io::copy(&mut io::repeat(0).take(len), dst)?;
    Ok(())
}

fn prepare_path<W: Write>(dst: &mut W, header: &mut tar::Header, path: &Path) -> io::Result<()> {
    if let Err(e) = header.set_path(path) {
        let data = path_bytes(path)?;
        let max = header.as_old().name.len();
        if data.len() < max {
            return Err(e);
        }
        check_relative(path)?;
        write_long_record(dst, tar::EntryType::GNULongName, &data)?;
        header.as_old_mut().name.copy_from_slice(&data[..max]);
    }
    Ok(())
}

fn prepare_link<W: Write>(dst: &mut W, header: &mut tar::Header, target: &Path) -> io::Result<()> {
    if let Err(e) = header.set_link_name(target) {
        let data = path_bytes(target)?;
        let max = header.as_old().linkname.len();
        if data.len() < max {
            return Err(e);
        }
        write_long_record(dst, tar::EntryType::GNULongLink, &data)?;
        header.as_old_mut().linkname.copy_from_slice(&data[..max]);
    }
    Ok(())
}

fn write_long_record<W: Write>(dst: &mut W, kind: tar::EntryType, data: &[u8]) -> io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.as_old_mut().name[..LONG_LINK_NAME.len()].copy_from_slice(LONG_LINK_NAME);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    // NUL terminated
    let len = data.len() as u64 + 1;
    header.set_size(len);
    header.set_entry_type(kind);
    header.set_cksum();

    dst.write_all(header.as_bytes())?;
    dst.write_all(data)?;
    dst.write_all(&[0])?;
    write_zeros(dst, padding(len))
}

fn check_relative(path: &Path) -> io::Result<()> {
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "paths in archives must be relative",
                ));
            }
            Component::ParentDir => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "paths in archives must not have `..`",
                ));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }
    Ok(())
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> io::Result<Cow<'_, [u8]>> {
    use std::os::unix::ffi::OsStrExt;
    Ok(Cow::Borrowed(path.as_os_str().as_bytes()))
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> io::Result<Cow<'_, [u8]>> {
    path.to_str()
        .map(|s| Cow::Owned(s.replace('\\', "/").into_bytes()))
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path {} is not valid unicode", path.display()),
            )
        })
}
