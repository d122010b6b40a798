//! A memory-backed block device.
//!
//! This is the disk of the hardware-independent kernel; it fills the slot a
//! virtio driver occupies on real hardware. Clones share the same storage,
//! so an embedder can keep a handle for inspection or remounting.

use alloc::{sync::Arc, vec};
use core::convert::Infallible;

use block_cache::BlockDevice;
use sv6_fs_types::BLOCK_SIZE;

use crate::sync::SpinLock;

#[derive(Clone)]
pub struct RamDisk {
    blocks: Arc<SpinLock<alloc::vec::Vec<[u8; BLOCK_SIZE]>>>,
}

impl RamDisk {
    /// Creates a zero-filled disk of `nblocks` blocks.
    #[must_use]
    pub fn new(nblocks: usize) -> Self {
        Self {
            blocks: Arc::new(SpinLock::new(vec![[0; BLOCK_SIZE]; nblocks])),
        }
    }

    #[must_use]
    pub fn nblocks(&self) -> usize {
        self.blocks.lock().len()
    }
}

impl BlockDevice<BLOCK_SIZE> for RamDisk {
    type Error = Infallible;

    fn read(&self, index: usize, data: &mut [u8; BLOCK_SIZE]) -> Result<(), Self::Error> {
        data.copy_from_slice(&self.blocks.lock()[index]);
        Ok(())
    }

    fn write(&self, index: usize, data: &[u8; BLOCK_SIZE]) -> Result<(), Self::Error> {
        self.blocks.lock()[index].copy_from_slice(data);
        Ok(())
    }
}
