//! File system implementation.
//!
//! Five layers:
//!   + Blocks: allocator for raw disk blocks.
//!   + Log: crash recovery for multi-step updates.
//!   + Inodes: file metadata, reading, writing.
//!   + Directories: inodes whose content is a list of other inodes.
//!   + Names: paths for convenient naming.
//!
//! The (higher-level) system call implementations are in `syscall/file.rs`.

use block_cache::{BlockCache, BufData, CacheState};
use sv6_fs_types::{BLOCK_SIZE, BlockNo, BmapBlock, SuperBlock};

use crate::{
    error::KernelError,
    param::NBUF,
    sync::{SleepLock, SpinLock},
};

mod inode;
mod log;
pub mod mkfs;
pub mod ops;
pub mod path;
mod ram_disk;

pub use self::{
    inode::{Inode, InodeData, LockedInode, TxInode},
    ram_disk::RamDisk,
};

use self::{inode::InodeTable, log::Log};

pub(crate) type DiskCache =
    BlockCache<RamDisk, SpinLock<CacheState>, SleepLock<BufData<BLOCK_SIZE>>>;
pub(crate) type Buf<'a> =
    block_cache::BufHandle<'a, RamDisk, SpinLock<CacheState>, SleepLock<BufData<BLOCK_SIZE>>>;
pub(crate) type BufGuard<'a> = block_cache::BufGuard<
    'a,
    RamDisk,
    SpinLock<CacheState>,
    SleepLock<BufData<BLOCK_SIZE>>,
    BLOCK_SIZE,
>;

/// The mounted file system: block cache, journal, and inode table.
pub struct FileSystem {
    dev: u32,
    cache: DiskCache,
    sb: SuperBlock,
    log: Log,
    itable: InodeTable,
}

impl FileSystem {
    /// Mounts a formatted disk, replaying any committed journal entries
    /// left by a crash.
    ///
    /// # Panics
    ///
    /// Panics if the disk does not carry a file system.
    pub fn mount(dev: u32, disk: RamDisk) -> Self {
        let cache = DiskCache::new(disk, NBUF);

        let mut buf = cache.get(BlockNo::SUPER_BLOCK.as_index());
        let guard = buf.lock();
        let sb = guard.data::<SuperBlock>().clone();
        drop(guard);
        drop(buf);
        assert_eq!(sb.magic, SuperBlock::MAGIC, "invalid file system");

        let log = Log::recover(&cache, &sb);
        Self {
            dev,
            cache,
            sb,
            log,
            itable: InodeTable::new(),
        }
    }

    #[must_use]
    pub fn dev(&self) -> u32 {
        self.dev
    }

    #[must_use]
    pub fn superblock(&self) -> &SuperBlock {
        &self.sb
    }

    pub(crate) fn get_block(&self, bn: BlockNo) -> Buf<'_> {
        self.cache.get(bn.as_index())
    }

    /// Opens a transaction covering one file-system system call.
    ///
    /// Dropping the transaction ends the operation, so every exit path of a
    /// syscall closes it; the journal commits once the last outstanding
    /// operation ends.
    pub fn begin_tx(&self) -> Tx<'_> {
        self.log.begin_op();
        Tx { fs: self }
    }

    /// Zeroes a block.
    fn block_zero(&self, tx: &Tx<'_>, bn: BlockNo) {
        let mut buf = self.get_block(bn);
        let mut guard = buf.lock();
        guard.fill_zero();
        tx.write(&mut guard);
    }

    /// Allocates a zeroed disk block.
    fn block_alloc(&self, tx: &Tx<'_>) -> Result<BlockNo, KernelError> {
        let sb_size = usize::try_from(self.sb.size).unwrap();
        for bn0 in (0..sb_size).step_by(sv6_fs_types::BITS_PER_BLOCK) {
            let mut buf = self.get_block(self.sb.bmap_block(bn0));
            let mut guard = buf.lock();
            let bmap = guard.data_mut::<BmapBlock>();
            let Some(bni) = (0..sv6_fs_types::BITS_PER_BLOCK)
                .take_while(|bni| bn0 + *bni < sb_size)
                .find(|bni| !bmap.bit(*bni))
            else {
                continue;
            };
            bmap.set_bit(bni);
            tx.write(&mut guard);
            drop(guard);
            drop(buf);

            let bn = BlockNo::new(u32::try_from(bn0 + bni).unwrap());
            self.block_zero(tx, bn);
            return Ok(bn);
        }
        ::log::warn!("out of blocks");
        Err(KernelError::StorageOutOfBlocks)
    }

    /// Frees a disk block.
    fn block_free(&self, tx: &Tx<'_>, bn: BlockNo) {
        let mut buf = self.get_block(self.sb.bmap_block(bn.as_index()));
        let mut guard = buf.lock();
        let bi = bn.as_index() % sv6_fs_types::BITS_PER_BLOCK;
        let bmap = guard.data_mut::<BmapBlock>();
        assert!(bmap.bit(bi), "freeing free block");
        bmap.clear_bit(bi);
        tx.write(&mut guard);
    }
}

/// An open journal transaction.
///
/// Every operation that mutates on-disk state takes `&Tx` so the type
/// system keeps mutations inside a transaction.
#[must_use]
pub struct Tx<'fs> {
    fs: &'fs FileSystem,
}

impl Tx<'_> {
    /// Journals a modified buffer in place of a direct disk write.
    pub(crate) fn write(&self, guard: &mut BufGuard<'_>) {
        self.fs.log.write(guard);
    }

    /// Ends the transaction. Equivalent to dropping it.
    pub fn end(self) {
        drop(self);
    }
}

impl Drop for Tx<'_> {
    fn drop(&mut self) {
        self.fs.log.end_op(&self.fs.cache, &self.fs.sb);
    }
}
