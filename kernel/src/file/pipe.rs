use alloc::sync::Arc;

use crate::{
    error::KernelError,
    memory::{UserPageTable, VirtAddr},
    sync::{SpinLock, SpinLockCondVar},
};

const PIPE_SIZE: usize = 512;

struct PipeData {
    buf: [u8; PIPE_SIZE],
    /// Number of bytes read.
    nread: usize,
    /// Number of bytes written.
    nwrite: usize,
    /// Read end is still open.
    readopen: bool,
    /// Write end is still open.
    writeopen: bool,
}

struct PipeShared {
    data: SpinLock<PipeData>,
    /// Signaled when data arrives or the write end closes.
    readers: SpinLockCondVar,
    /// Signaled when space appears or the read end closes.
    writers: SpinLockCondVar,
}

/// One end of a pipe; which end is recorded by the owning file's
/// permission flags.
#[derive(Clone)]
pub(super) struct PipeFile {
    shared: Arc<PipeShared>,
}

pub(super) fn new_pair() -> (PipeFile, PipeFile) {
    let shared = Arc::new(PipeShared {
        data: SpinLock::new(PipeData {
            buf: [0; PIPE_SIZE],
            nread: 0,
            nwrite: 0,
            readopen: true,
            writeopen: true,
        }),
        readers: SpinLockCondVar::new(),
        writers: SpinLockCondVar::new(),
    });
    let read_half = PipeFile {
        shared: Arc::clone(&shared),
    };
    let write_half = PipeFile { shared };
    (read_half, write_half)
}

impl PipeFile {
    pub(super) fn close(&self, writable: bool) {
        let mut pipe = self.shared.data.lock();
        if writable {
            pipe.writeopen = false;
            self.shared.readers.notify();
        } else {
            pipe.readopen = false;
            self.shared.writers.notify();
        }
    }

    pub(super) fn write(
        &self,
        pt: &UserPageTable,
        addr: VirtAddr,
        n: usize,
    ) -> Result<usize, KernelError> {
        let mut written = 0;
        let mut pipe = self.shared.data.lock();
        while written < n {
            if !pipe.readopen {
                return Err(KernelError::BrokenPipe);
            }
            if pipe.nwrite == pipe.nread + PIPE_SIZE {
                self.shared.readers.notify();
                pipe = self.shared.writers.wait(pipe);
                continue;
            }

            let Ok(byte) = pt.copy_in::<u8>(addr.byte_add(written)?) else {
                break;
            };
            let idx = pipe.nwrite % PIPE_SIZE;
            pipe.buf[idx] = byte;
            pipe.nwrite += 1;
            written += 1;
        }
        self.shared.readers.notify();
        Ok(written)
    }

    pub(super) fn read(
        &self,
        pt: &UserPageTable,
        addr: VirtAddr,
        n: usize,
    ) -> Result<usize, KernelError> {
        let mut pipe = self.shared.data.lock();
        while pipe.nread == pipe.nwrite && pipe.writeopen {
            pipe = self.shared.readers.wait(pipe);
        }

        let mut read = 0;
        while read < n && pipe.nread != pipe.nwrite {
            let byte = pipe.buf[pipe.nread % PIPE_SIZE];
            pipe.nread += 1;
            if pt.copy_out(addr.byte_add(read)?, &byte).is_err() {
                break;
            }
            read += 1;
        }
        self.shared.writers.notify();
        Ok(read)
    }
}
