//! Crash-safe persistence of the read offset.
//!
//! The persistent record is a side file holding exactly one big-endian `u64`.
//! It is guarded by an exclusive `flock(2)` for as long as a session has it
//! open, so two readers can never advance the same record.

use crate::error::{Error, Result};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Width of the persisted record in bytes.
pub const RECORD_LEN: u64 = 8;

/// Where a session keeps its read offset between passes.
#[derive(Debug)]
pub enum PositionStore {
    /// Nothing is persisted; the offset is whatever the file handle says.
    Transient,
    /// The offset lives in a locked record file.
    Persistent(PositionFile),
}

impl PositionStore {
    pub fn transient() -> Self {
        PositionStore::Transient
    }

    pub fn persistent<P: Into<PathBuf>>(path: P) -> Self {
        PositionStore::Persistent(PositionFile::new(path.into()))
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, PositionStore::Persistent(_))
    }

    /// Opens the record and takes its lock.
    ///
    /// Fails with [`Error::LockUnavailable`] when another reader holds the record.
    pub fn open(&mut self, reset: bool) -> Result<()> {
        match self {
            PositionStore::Transient => Ok(()),
            PositionStore::Persistent(file) => file.open(reset),
        }
    }

    /// Returns the stored offset, or `current` when there is no usable record.
    pub fn read(&self, current: u64) -> std::io::Result<u64> {
        match self {
            PositionStore::Transient => Ok(current),
            PositionStore::Persistent(file) => file.read(current),
        }
    }

    /// Overwrites the stored offset. A no-op when nothing is persisted or the record is closed.
    pub fn write(&self, offset: u64) -> std::io::Result<()> {
        match self {
            PositionStore::Transient => Ok(()),
            PositionStore::Persistent(file) => file.write(offset),
        }
    }

    /// Releases the lock and closes the record. Safe to call any number of times.
    pub fn close(&mut self) -> std::io::Result<()> {
        match self {
            PositionStore::Transient => Ok(()),
            PositionStore::Persistent(file) => file.close(),
        }
    }
}

/// A locked, fixed-size offset record on disk.
pub struct PositionFile {
    path: PathBuf,
    record: Option<Flock<File>>,
}

impl std::fmt::Debug for PositionFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionFile")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}

impl PositionFile {
    fn new(path: PathBuf) -> Self {
        Self { path, record: None }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.record.is_some()
    }

    fn open(&mut self, reset: bool) -> Result<()> {
        if self.record.is_some() {
            return Ok(());
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .custom_flags(nix::libc::O_DSYNC)
            .open(&self.path)?;

        // Lock before touching the contents so a losing contender cannot
        // clobber the holder's record.
        let record = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(record) => record,
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => {
                return Err(Error::LockUnavailable {
                    path: self.path.display().to_string(),
                });
            }
            Err((_, errno)) => return Err(Error::Io(errno.into())),
        };

        if reset || record.metadata()?.len() != RECORD_LEN {
            record.set_len(0)?;
            record.write_all_at(&[0u8; RECORD_LEN as usize], 0)?;
        }

        debug!(path = %self.path.display(), reset, "position record locked");
        self.record = Some(record);
        Ok(())
    }

    fn read(&self, current: u64) -> std::io::Result<u64> {
        let Some(record) = &self.record else {
            return Ok(current);
        };
        let mut bytes = [0u8; RECORD_LEN as usize];
        match record.read_exact_at(&mut bytes, 0) {
            Ok(()) => Ok(u64::from_be_bytes(bytes)),
            // A short record means someone raced us; trust the stream instead.
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(current),
            Err(e) => Err(e),
        }
    }

    fn write(&self, offset: u64) -> std::io::Result<()> {
        match &self.record {
            Some(record) => record.write_all_at(&offset.to_be_bytes(), 0),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> std::io::Result<()> {
        let Some(record) = self.record.take() else {
            return Ok(());
        };
        match record.unlock() {
            Ok(file) => {
                drop(file);
                debug!(path = %self.path.display(), "position record released");
                Ok(())
            }
            // Dropping the guard still closes the descriptor, which releases the lock.
            Err((record, errno)) => {
                drop(record);
                Err(errno.into())
            }
        }
    }
}
