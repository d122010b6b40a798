//! Device files.

use alloc::sync::Arc;

use sv6_syscall::Stat;

use crate::{
    error::KernelError,
    fs::{FileSystem, Inode},
    kernel::Kernel,
    memory::{UserPageTable, VirtAddr},
    param::NDEV,
    sync::SpinLock,
};

/// A character device, addressed by major number.
pub trait Device: Send + Sync {
    fn read(&self, pt: &UserPageTable, addr: VirtAddr, n: usize) -> Result<usize, KernelError>;
    fn write(&self, pt: &UserPageTable, addr: VirtAddr, n: usize) -> Result<usize, KernelError>;
}

/// The major-number-indexed device registry.
pub struct DeviceTable {
    devices: SpinLock<[Option<Arc<dyn Device>>; NDEV]>,
}

impl DeviceTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            devices: SpinLock::new([const { None }; NDEV]),
        }
    }

    /// Registers `device` under `major`, replacing any previous one.
    pub fn register(&self, major: i16, device: Arc<dyn Device>) {
        let idx = usize::try_from(major).expect("bad major number");
        self.devices.lock()[idx] = Some(device);
    }

    fn get(&self, major: i16) -> Result<Arc<dyn Device>, KernelError> {
        usize::try_from(major)
            .ok()
            .and_then(|idx| self.devices.lock().get(idx)?.clone())
            .ok_or(KernelError::DeviceNotFound(major))
    }
}

impl Default for DeviceTable {
    fn default() -> Self {
        Self::new()
    }
}

pub(super) struct DeviceFile {
    major: i16,
    inode: Inode,
}

impl DeviceFile {
    pub(super) fn new(major: i16, inode: Inode) -> Self {
        Self { major, inode }
    }

    pub(super) fn close(self, fs: &FileSystem) {
        super::common::close_inode(fs, self.inode);
    }

    pub(super) fn stat(&self, fs: &FileSystem) -> Stat {
        super::common::stat_inode(fs, &self.inode)
    }

    pub(super) fn read(
        &self,
        k: &Kernel,
        pt: &UserPageTable,
        addr: VirtAddr,
        n: usize,
    ) -> Result<usize, KernelError> {
        k.devices().get(self.major)?.read(pt, addr, n)
    }

    pub(super) fn write(
        &self,
        k: &Kernel,
        pt: &UserPageTable,
        addr: VirtAddr,
        n: usize,
    ) -> Result<usize, KernelError> {
        k.devices().get(self.major)?.write(pt, addr, n)
    }
}
