//! The system-wide cap on open file objects.

use alloc::sync::Arc;

use crate::{error::KernelError, param::NFILE, sync::SpinLock};

struct Counter {
    inuse: SpinLock<usize>,
}

/// Hands out one slot per live file object, up to `NFILE`.
#[derive(Clone)]
pub struct FileTable {
    counter: Arc<Counter>,
}

/// A held slot; dropping it releases the slot.
pub(super) struct FileSlot {
    counter: Arc<Counter>,
}

impl FileTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            counter: Arc::new(Counter {
                inuse: SpinLock::new(0),
            }),
        }
    }

    pub(super) fn acquire(&self) -> Result<FileSlot, KernelError> {
        let mut inuse = self.counter.inuse.lock();
        if *inuse >= NFILE {
            return Err(KernelError::NoFreeFileTableEntry);
        }
        *inuse += 1;
        Ok(FileSlot {
            counter: Arc::clone(&self.counter),
        })
    }

    /// Number of live file objects, for diagnostics.
    #[must_use]
    pub fn in_use(&self) -> usize {
        *self.counter.inuse.lock()
    }
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FileSlot {
    fn drop(&mut self) {
        let mut inuse = self.counter.inuse.lock();
        assert!(*inuse > 0);
        *inuse -= 1;
    }
}
