//! Open file objects.
//!
//! A [`File`] is a reference-counted handle combining an underlying
//! resource (inode, pipe end, or device) with an I/O position and
//! permission flags. Duplicated descriptors share one file object, and
//! with it the offset. The system-wide number of file objects is capped
//! at `NFILE` by the [`FileTable`].

// The `alloc` crate, spelled from the root: this module has an `alloc`
// child of its own.
use ::alloc::sync::Arc;

use sv6_syscall::Stat;

pub use self::{
    alloc::FileTable,
    device::{Device, DeviceTable},
};
use self::{device::DeviceFile, inode::InodeFile, pipe::PipeFile};
use crate::{
    error::KernelError,
    fs::Inode,
    kernel::Kernel,
    memory::{UserPageTable, VirtAddr},
};

mod alloc;
mod common;
mod device;
mod inode;
mod pipe;

/// An open file. Clones share the underlying object.
#[derive(Clone)]
pub struct File {
    data: Arc<FileData>,
}

struct FileData {
    readable: bool,
    writable: bool,
    kind: FileKind,
    _slot: alloc::FileSlot,
}

enum FileKind {
    Inode(InodeFile),
    Pipe(PipeFile),
    Device(DeviceFile),
}

impl File {
    /// Wraps an inode reference in a new file object.
    ///
    /// Takes over the reference; it is released if no file slot is free.
    pub fn new_inode(
        k: &Kernel,
        inode: Inode,
        readable: bool,
        writable: bool,
    ) -> Result<Self, KernelError> {
        let slot = match k.files().acquire() {
            Ok(slot) => slot,
            Err(e) => {
                common::close_inode(k.fs(), inode);
                return Err(e);
            }
        };
        Ok(Self {
            data: Arc::new(FileData {
                readable,
                writable,
                kind: FileKind::Inode(InodeFile::new(inode)),
                _slot: slot,
            }),
        })
    }

    /// Wraps a device inode in a new file object.
    ///
    /// Takes over the reference; it is released if no file slot is free.
    pub fn new_device(
        k: &Kernel,
        major: i16,
        inode: Inode,
        readable: bool,
        writable: bool,
    ) -> Result<Self, KernelError> {
        let slot = match k.files().acquire() {
            Ok(slot) => slot,
            Err(e) => {
                common::close_inode(k.fs(), inode);
                return Err(e);
            }
        };
        Ok(Self {
            data: Arc::new(FileData {
                readable,
                writable,
                kind: FileKind::Device(DeviceFile::new(major, inode)),
                _slot: slot,
            }),
        })
    }

    /// Creates a connected pipe, returning the read end and the write end.
    pub fn new_pipe(k: &Kernel) -> Result<(Self, Self), KernelError> {
        let read_slot = k.files().acquire()?;
        let write_slot = k.files().acquire()?;
        let (read_half, write_half) = pipe::new_pair();
        let rf = Self {
            data: Arc::new(FileData {
                readable: true,
                writable: false,
                kind: FileKind::Pipe(read_half),
                _slot: read_slot,
            }),
        };
        let wf = Self {
            data: Arc::new(FileData {
                readable: false,
                writable: true,
                kind: FileKind::Pipe(write_half),
                _slot: write_slot,
            }),
        };
        Ok((rf, wf))
    }

    /// Takes another reference to the same open file.
    #[must_use]
    pub fn dup(&self) -> Self {
        self.clone()
    }

    /// Reads from the file into user memory at `addr`.
    pub fn read(
        &self,
        k: &Kernel,
        pt: &UserPageTable,
        addr: VirtAddr,
        n: usize,
    ) -> Result<usize, KernelError> {
        if !self.data.readable {
            return Err(KernelError::FileDescriptorNotReadable);
        }
        match &self.data.kind {
            FileKind::Inode(f) => f.read(k.fs(), pt, addr, n),
            FileKind::Pipe(p) => p.read(pt, addr, n),
            FileKind::Device(d) => d.read(k, pt, addr, n),
        }
    }

    /// Writes user memory at `addr` into the file.
    pub fn write(
        &self,
        k: &Kernel,
        pt: &UserPageTable,
        addr: VirtAddr,
        n: usize,
    ) -> Result<usize, KernelError> {
        if !self.data.writable {
            return Err(KernelError::FileDescriptorNotWritable);
        }
        match &self.data.kind {
            FileKind::Inode(f) => f.write(k.fs(), pt, addr, n),
            FileKind::Pipe(p) => p.write(pt, addr, n),
            FileKind::Device(d) => d.write(k, pt, addr, n),
        }
    }

    /// Returns metadata about the file.
    pub fn stat(&self, k: &Kernel) -> Result<Stat, KernelError> {
        match &self.data.kind {
            FileKind::Inode(f) => Ok(f.stat(k.fs())),
            FileKind::Device(d) => Ok(d.stat(k.fs())),
            FileKind::Pipe(_) => Err(KernelError::StatOnPipe),
        }
    }

    /// Drops this reference, releasing the underlying resource when it was
    /// the last one.
    pub fn close(self, k: &Kernel) {
        let Some(data) = Arc::into_inner(self.data) else {
            return;
        };
        match data.kind {
            FileKind::Inode(f) => f.close(k.fs()),
            FileKind::Device(d) => d.close(k.fs()),
            FileKind::Pipe(p) => p.close(data.writable),
        }
        // data._slot drops here, releasing the NFILE slot.
    }
}
