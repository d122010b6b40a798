//! The kernel image: every kernel-lifetime table in one place.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::{
    file::{DeviceTable, FileTable},
    fs::{FileSystem, RamDisk},
    memory::PhysMemory,
    param::ROOT_DEV,
    shm::ShmTable,
};

/// Boot-time parameters.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Number of physical page frames.
    pub phys_pages: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self { phys_pages: 256 }
    }
}

/// The kernel-lifetime singletons: physical memory, the mounted file
/// system, the open-file and device tables, and the shared-memory
/// registry. The embedder creates one of these at boot and shares it by
/// reference; each table carries its own lock.
pub struct Kernel {
    memory: Arc<PhysMemory>,
    fs: FileSystem,
    files: FileTable,
    devices: DeviceTable,
    shm: ShmTable,
    next_pid: AtomicU32,
}

impl Kernel {
    /// Boots the kernel over a formatted disk, replaying the journal if a
    /// crash left a committed transaction behind.
    #[must_use]
    pub fn new(disk: RamDisk, config: &KernelConfig) -> Self {
        let memory = Arc::new(PhysMemory::new(config.phys_pages));
        Self {
            fs: FileSystem::mount(ROOT_DEV, disk),
            files: FileTable::new(),
            devices: DeviceTable::new(),
            shm: ShmTable::new(Arc::clone(&memory)),
            memory,
            next_pid: AtomicU32::new(1),
        }
    }

    #[must_use]
    pub fn memory(&self) -> &Arc<PhysMemory> {
        &self.memory
    }

    #[must_use]
    pub fn fs(&self) -> &FileSystem {
        &self.fs
    }

    #[must_use]
    pub fn files(&self) -> &FileTable {
        &self.files
    }

    #[must_use]
    pub fn devices(&self) -> &DeviceTable {
        &self.devices
    }

    #[must_use]
    pub fn shm(&self) -> &ShmTable {
        &self.shm
    }

    pub(crate) fn allocate_pid(&self) -> u32 {
        self.next_pid.fetch_add(1, Ordering::Relaxed)
    }
}
