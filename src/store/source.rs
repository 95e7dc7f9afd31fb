//! The single open file handle shared by every window of one message.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::error::{EmlError, Result};

/// Ownership record for a file shared by several windows.
///
/// `refs` counts the live windows holding a share of the handle. The handle
/// itself sits behind a mutex, so a seek and the read that follows it are
/// atomic with respect to sibling windows used from other threads.
#[derive(Debug)]
pub struct SharedSource {
    path: PathBuf,
    file_len: u64,
    file: Mutex<Option<File>>,
    refs: AtomicUsize,
    closed: AtomicBool,
}

impl SharedSource {
    /// Open `path` for random access. The opener holds the first share.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| EmlError::open(path, e))?;
        let file_len = file
            .metadata()
            .map_err(|e| EmlError::io(path, e))?
            .len();
        debug!(path = %path.display(), file_len, "Opened message file");
        Ok(Self {
            path: path.to_path_buf(),
            file_len,
            file: Mutex::new(Some(file)),
            refs: AtomicUsize::new(1),
            closed: AtomicBool::new(false),
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File length captured at open time.
    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// Number of windows currently holding a share.
    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// `true` once the handle has been released, normally or by force.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Take one more share for a new window.
    pub fn acquire(&self) -> Result<()> {
        if self.is_closed() {
            return Err(EmlError::Closed);
        }
        self.refs.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Give back one share. The handle is closed when the last share goes.
    pub fn release(&self) {
        let previous = self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.shut();
            debug!(path = %self.path.display(), "Last window closed, file released");
        }
    }

    /// Close the handle now, whatever the number of outstanding windows.
    pub fn force_close(&self) {
        let outstanding = self.refs.swap(0, Ordering::AcqRel);
        self.shut();
        debug!(
            path = %self.path.display(),
            outstanding,
            "Force-closed message file"
        );
    }

    /// Seek to the absolute `offset` and read once into `buf`.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut guard = self.lock();
        let file = guard.as_mut().ok_or(EmlError::Closed)?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| EmlError::io(&self.path, e))?;
        file.read(buf).map_err(|e| EmlError::io(&self.path, e))
    }

    fn shut(&self) {
        self.closed.store(true, Ordering::Release);
        // Dropping the `File` closes the descriptor; a failure there is unobservable.
        self.lock().take();
    }

    fn lock(&self) -> MutexGuard<'_, Option<File>> {
        self.file
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
