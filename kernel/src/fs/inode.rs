//! Inodes.
//!
//! An inode describes a single unnamed file: type, size, link count, and
//! the block numbers holding its content.
//!
//! The kernel keeps a table of in-use inodes in memory. An entry is free if
//! its reference count is zero; the count tracks in-memory pointers to the
//! entry (open files, current directories, transaction handles). The table
//! spin lock protects the identity and reference count of every entry; a
//! per-entry sleep lock protects everything else, and is held across the
//! disk reads and writes that operate on the entry's content.
//!
//! Handles come in two forms. [`TxInode`] is bound to a journal
//! transaction; dropping it releases the reference, truncating and freeing
//! the on-disk inode if the last reference to an unlinked inode just went
//! away. [`Inode`] is an unbound long-term reference (an open file's, or a
//! process's current directory); it must be rebound to a transaction with
//! [`Inode::into_tx`] to be used or released.

use dataview::{Pod, PodMethods as _};
use sv6_fs_types::{
    BLOCK_SIZE, BlockNo, DirEntry, IndirectBlock, InodeBlock, InodeNo, MAX_FILE, NUM_DIRECT, T_DIR,
};
use sv6_syscall::Stat;

use crate::{
    error::KernelError,
    memory::{DataDst, DataSrc},
    param::NINODE,
    sync::{SleepLock, SleepLockGuard, SpinLock},
};

use super::{FileSystem, Tx};

#[derive(Clone, Copy)]
struct InodeMeta {
    dev: u32,
    ino: InodeNo,
    refcnt: usize,
}

/// In-memory copy of an inode's on-disk fields.
pub struct InodeData {
    /// Identity the cached fields belong to; `InodeNo::new(0)` when stale.
    cached_dev: u32,
    cached_ino: InodeNo,

    pub ty: i16,
    pub major: i16,
    pub minor: i16,
    pub nlink: i16,
    pub size: u32,
    addrs: [u32; NUM_DIRECT + 1],
}

impl InodeData {
    const fn empty() -> Self {
        Self {
            cached_dev: 0,
            cached_ino: InodeNo::new(0),
            ty: 0,
            major: 0,
            minor: 0,
            nlink: 0,
            size: 0,
            addrs: [0; NUM_DIRECT + 1],
        }
    }
}

pub(super) struct InodeTable {
    meta: SpinLock<[InodeMeta; NINODE]>,
    data: [SleepLock<InodeData>; NINODE],
}

impl InodeTable {
    pub(super) fn new() -> Self {
        Self {
            meta: SpinLock::new(
                [InodeMeta {
                    dev: 0,
                    ino: InodeNo::new(0),
                    refcnt: 0,
                }; NINODE],
            ),
            data: [const { SleepLock::new(InodeData::empty()) }; NINODE],
        }
    }
}

/// A transaction-bound reference to an in-memory inode.
///
/// Dropping it puts the reference: if that was the last reference to an
/// inode with no links, the inode (and its content) is freed on disk.
#[must_use]
pub struct TxInode<'t> {
    tx: &'t Tx<'t>,
    idx: usize,
    dev: u32,
    ino: InodeNo,
}

/// A long-term inode reference, not bound to any transaction.
pub struct Inode {
    idx: usize,
    dev: u32,
    ino: InodeNo,
}

impl Inode {
    #[must_use]
    pub fn dev(&self) -> u32 {
        self.dev
    }

    #[must_use]
    pub fn ino(&self) -> InodeNo {
        self.ino
    }

    /// Rebinds the reference to a transaction.
    pub fn into_tx<'t>(self, tx: &'t Tx<'t>) -> TxInode<'t> {
        TxInode {
            tx,
            idx: self.idx,
            dev: self.dev,
            ino: self.ino,
        }
    }

    /// Takes an additional reference to the same inode.
    #[must_use]
    pub fn dup(&self, fs: &FileSystem) -> Self {
        let mut meta = fs.itable.meta.lock();
        meta[self.idx].refcnt += 1;
        Self {
            idx: self.idx,
            dev: self.dev,
            ino: self.ino,
        }
    }
}

impl FileSystem {
    /// Finds the in-memory inode for `(dev, ino)`, creating a table entry
    /// if needed, and returns a transaction-bound reference to it.
    ///
    /// Does not lock the inode and does not read it from disk.
    pub(super) fn iget<'t>(
        &self,
        tx: &'t Tx<'t>,
        dev: u32,
        ino: InodeNo,
    ) -> Result<TxInode<'t>, KernelError> {
        let mut meta = self.itable.meta.lock();

        let mut empty = None;
        for (idx, m) in meta.iter_mut().enumerate() {
            if m.refcnt > 0 && m.dev == dev && m.ino == ino {
                m.refcnt += 1;
                return Ok(TxInode { tx, idx, dev, ino });
            }
            if empty.is_none() && m.refcnt == 0 {
                empty = Some(idx);
            }
        }

        let idx = empty.ok_or(KernelError::NoFreeInodeTableEntry)?;
        meta[idx] = InodeMeta {
            dev,
            ino,
            refcnt: 1,
        };
        Ok(TxInode { tx, idx, dev, ino })
    }

    /// Returns a transaction-bound reference to the root directory.
    pub fn root<'t>(&self, tx: &'t Tx<'t>) -> Result<TxInode<'t>, KernelError> {
        self.iget(tx, self.dev, InodeNo::ROOT)
    }

    /// Allocates an on-disk inode of type `ty` and returns a reference.
    pub(super) fn ialloc<'t>(
        &self,
        tx: &'t Tx<'t>,
        dev: u32,
        ty: i16,
    ) -> Result<TxInode<'t>, KernelError> {
        for ino in 1..self.sb.ninodes {
            let ino = InodeNo::new(ino);
            let mut buf = self.get_block(self.sb.inode_block(ino));
            let mut guard = buf.lock();
            let dip = guard.data_mut::<InodeBlock>().inode_mut(ino);
            if dip.is_free() {
                dip.allocate(ty);
                tx.write(&mut guard);
                drop(guard);
                drop(buf);
                return self.iget(tx, dev, ino);
            }
        }
        ::log::warn!("out of inodes");
        Err(KernelError::StorageOutOfInodes)
    }
}

impl<'t> TxInode<'t> {
    #[must_use]
    pub fn dev(&self) -> u32 {
        self.dev
    }

    #[must_use]
    pub fn ino(&self) -> InodeNo {
        self.ino
    }

    fn fs(&self) -> &'t FileSystem {
        self.tx.fs
    }

    /// Takes an additional reference to the same inode.
    #[must_use]
    pub fn dup(&self) -> Self {
        let mut meta = self.fs().itable.meta.lock();
        meta[self.idx].refcnt += 1;
        Self {
            tx: self.tx,
            idx: self.idx,
            dev: self.dev,
            ino: self.ino,
        }
    }

    /// Releases the transaction binding, keeping the reference.
    #[must_use]
    pub fn unbind(self) -> Inode {
        let ip = Inode {
            idx: self.idx,
            dev: self.dev,
            ino: self.ino,
        };
        core::mem::forget(self);
        ip
    }

    /// Drops the reference. Equivalent to dropping the handle.
    pub fn put(self) {
        drop(self);
    }

    /// Locks the inode, reading its fields from disk if the cached copy
    /// belongs to a different identity.
    pub fn lock(&mut self) -> LockedInode<'_, 't> {
        let fs = self.fs();
        let mut data = fs.itable.data[self.idx].lock();

        if data.cached_dev != self.dev || data.cached_ino != self.ino {
            let mut buf = fs.get_block(fs.sb.inode_block(self.ino));
            let guard = buf.lock();
            let dip = guard.data::<InodeBlock>().inode(self.ino);
            data.ty = dip.ty;
            data.major = dip.major;
            data.minor = dip.minor;
            data.nlink = dip.nlink;
            data.size = dip.size;
            data.addrs = dip.addrs;
            data.cached_dev = self.dev;
            data.cached_ino = self.ino;
            assert_ne!(data.ty, 0, "lock of free inode");
        }

        LockedInode { data, ip: self }
    }
}

impl Drop for TxInode<'_> {
    fn drop(&mut self) {
        let fs = self.fs();
        let mut meta = fs.itable.meta.lock();
        if meta[self.idx].refcnt == 1 {
            // The last reference: nobody else can lock the inode, so the
            // sleep lock cannot block here.
            let mut data = fs.itable.data[self.idx].lock();
            let cached = data.cached_dev == self.dev && data.cached_ino == self.ino;
            if cached && data.nlink == 0 {
                drop(meta);

                let mut lip = LockedInode { data, ip: self };
                lip.truncate();
                lip.ty = 0;
                lip.update();
                lip.data.cached_ino = InodeNo::new(0);
                drop(lip);

                meta = fs.itable.meta.lock();
            } else {
                drop(data);
            }
        }
        meta[self.idx].refcnt -= 1;
    }
}

/// A locked inode; the only state in which its fields and content may be
/// examined or modified.
pub struct LockedInode<'l, 't> {
    data: SleepLockGuard<'l, InodeData>,
    ip: &'l mut TxInode<'t>,
}

impl core::ops::Deref for LockedInode<'_, '_> {
    type Target = InodeData;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl core::ops::DerefMut for LockedInode<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl<'l, 't> LockedInode<'l, 't> {
    #[must_use]
    pub fn dev(&self) -> u32 {
        self.ip.dev
    }

    #[must_use]
    pub fn ino(&self) -> InodeNo {
        self.ip.ino
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.ty == T_DIR
    }

    fn fs(&self) -> &'t FileSystem {
        self.ip.tx.fs
    }

    fn tx(&self) -> &'t Tx<'t> {
        self.ip.tx
    }

    /// Unlocks the inode. Equivalent to dropping the guard.
    pub fn unlock(self) {
        drop(self);
    }

    /// Copies the in-memory inode fields to disk.
    ///
    /// Must be called after every change to a field that lives on disk.
    pub fn update(&mut self) {
        let fs = self.fs();
        let mut buf = fs.get_block(fs.sb.inode_block(self.ip.ino));
        let mut guard = buf.lock();
        let dip = guard.data_mut::<InodeBlock>().inode_mut(self.ip.ino);
        dip.ty = self.ty;
        dip.major = self.major;
        dip.minor = self.minor;
        dip.nlink = self.nlink;
        dip.size = self.size;
        dip.addrs = self.data.addrs;
        self.tx().write(&mut guard);
    }

    /// Discards the inode's content.
    pub fn truncate(&mut self) {
        let fs = self.fs();
        let tx = self.tx();
        for bn in self.data.addrs[..NUM_DIRECT].iter_mut() {
            if *bn != 0 {
                fs.block_free(tx, BlockNo::new(*bn));
                *bn = 0;
            }
        }

        let ind = self.data.addrs[NUM_DIRECT];
        if ind != 0 {
            let ind_bn = BlockNo::new(ind);
            let mut buf = fs.get_block(ind_bn);
            let mut guard = buf.lock();
            for bn in guard.data_mut::<IndirectBlock>().drain() {
                fs.block_free(tx, bn);
            }
            drop(guard);
            drop(buf);
            fs.block_free(tx, ind_bn);
            self.data.addrs[NUM_DIRECT] = 0;
        }

        self.data.size = 0;
        self.update();
    }

    /// Returns the disk block holding the `ibn`-th block of this inode,
    /// allocating it (and the indirect block) if absent.
    fn block_map(&mut self, ibn: usize) -> Result<BlockNo, KernelError> {
        let fs = self.fs();
        let tx = self.tx();
        if ibn < NUM_DIRECT {
            if self.data.addrs[ibn] != 0 {
                return Ok(BlockNo::new(self.data.addrs[ibn]));
            }
            let bn = fs.block_alloc(tx)?;
            self.data.addrs[ibn] = bn.value();
            return Ok(bn);
        }

        let ibn = ibn - NUM_DIRECT;
        assert!(ibn < sv6_fs_types::NUM_INDIRECT, "block out of range");

        let ind_bn = if self.data.addrs[NUM_DIRECT] != 0 {
            BlockNo::new(self.data.addrs[NUM_DIRECT])
        } else {
            let bn = fs.block_alloc(tx)?;
            self.data.addrs[NUM_DIRECT] = bn.value();
            bn
        };

        let mut buf = fs.get_block(ind_bn);
        let mut guard = buf.lock();
        if let Some(bn) = guard.data::<IndirectBlock>().get(ibn) {
            return Ok(bn);
        }
        let bn = fs.block_alloc(tx)?;
        guard.data_mut::<IndirectBlock>().set(ibn, bn);
        tx.write(&mut guard);
        Ok(bn)
    }

    /// Returns the disk block holding the `ibn`-th block, which must be
    /// allocated: files have no holes, so every block below `size` is.
    fn block_for_read(&self, ibn: usize) -> BlockNo {
        let fs = self.fs();
        if ibn < NUM_DIRECT {
            let bn = self.data.addrs[ibn];
            assert_ne!(bn, 0, "read of unallocated block");
            return BlockNo::new(bn);
        }
        let ibn = ibn - NUM_DIRECT;
        let ind = self.data.addrs[NUM_DIRECT];
        assert_ne!(ind, 0, "read of unallocated indirect block");
        let mut buf = fs.get_block(BlockNo::new(ind));
        let guard = buf.lock();
        guard
            .data::<IndirectBlock>()
            .get(ibn)
            .expect("read of unallocated block")
    }

    /// Reads data from the inode into `dst`.
    pub fn read(&mut self, mut dst: DataDst<'_>, off: usize, mut n: usize) -> Result<usize, KernelError> {
        let size = usize::try_from(self.size).unwrap();
        if off >= size || off.checked_add(n).is_none() {
            return Ok(0);
        }
        if off + n > size {
            n = size - off;
        }

        let fs = self.fs();
        let mut tot = 0;
        while tot < n {
            let off = off + tot;
            let bn = self.block_for_read(off / BLOCK_SIZE);
            let mut buf = fs.get_block(bn);
            let guard = buf.lock();
            let m = usize::min(n - tot, BLOCK_SIZE - off % BLOCK_SIZE);
            dst.write(tot, &guard.bytes()[off % BLOCK_SIZE..][..m])?;
            tot += m;
        }
        Ok(tot)
    }

    /// Reads a value of type `T` at byte offset `off`.
    pub(crate) fn read_as<T: Pod>(&mut self, off: usize) -> Result<T, KernelError> {
        let mut value = T::zeroed();
        let read = self.read(DataDst::Kernel(value.as_bytes_mut()), off, size_of::<T>())?;
        if read != size_of::<T>() {
            return Err(KernelError::FsEntryNotFound);
        }
        Ok(value)
    }

    /// Writes data from `src` into the inode.
    ///
    /// Returns the number of bytes written; less than `n` means some write
    /// step failed. Grows the file when writing at its current end.
    pub fn write(&mut self, src: DataSrc<'_>, off: usize, n: usize) -> Result<usize, KernelError> {
        let size = usize::try_from(self.size).unwrap();
        if off > size || off.checked_add(n).is_none() {
            return Err(KernelError::WriteOffsetTooLarge);
        }
        if off + n > MAX_FILE * BLOCK_SIZE {
            return Err(KernelError::FileTooLarge);
        }

        let fs = self.fs();
        let tx = self.tx();
        let mut tot = 0;
        while tot < n {
            let off = off + tot;
            let Ok(bn) = self.block_map(off / BLOCK_SIZE) else {
                break;
            };
            let mut buf = fs.get_block(bn);
            let mut guard = buf.lock();
            let m = usize::min(n - tot, BLOCK_SIZE - off % BLOCK_SIZE);
            if src
                .read(tot, &mut guard.bytes_mut()[off % BLOCK_SIZE..][..m])
                .is_err()
            {
                break;
            }
            tx.write(&mut guard);
            tot += m;
        }

        if off + tot > size {
            self.data.size = u32::try_from(off + tot).unwrap();
        }
        // Write the inode back even if the size did not change: block_map
        // may have added a new block address.
        self.update();
        Ok(tot)
    }

    /// Writes a value of type `T` at byte offset `off`.
    pub(super) fn write_data<T: Pod>(&mut self, off: usize, value: &T) -> Result<(), KernelError> {
        let written = self.write(DataSrc::Kernel(value.as_bytes()), off, size_of::<T>())?;
        if written != size_of::<T>() {
            return Err(KernelError::StorageOutOfBlocks);
        }
        Ok(())
    }

    /// Copies stat information out of the inode.
    #[must_use]
    pub fn stat(&self) -> Stat {
        Stat {
            dev: i32::try_from(self.ip.dev).unwrap(),
            ino: self.ip.ino.value(),
            ty: self.ty,
            nlink: self.nlink,
            padding: [0; 4],
            size: u64::from(self.size),
        }
    }

    // Directories

    /// Looks up a name in this directory inode.
    ///
    /// Returns the referenced inode and the byte offset of its entry.
    pub fn dir_lookup(&mut self, name: &[u8]) -> Result<(TxInode<'t>, usize), KernelError> {
        assert!(self.is_dir(), "dir_lookup on non-directory");
        let fs = self.fs();
        let tx = self.tx();

        let de_size = size_of::<DirEntry>();
        for off in (0..usize::try_from(self.size).unwrap()).step_by(de_size) {
            let de = self.read_as::<DirEntry>(off)?;
            let Some(ino) = de.inum() else { continue };
            if de.is_same_name(name) {
                let ip = fs.iget(tx, self.ip.dev, ino)?;
                return Ok((ip, off));
            }
        }
        Err(KernelError::FsEntryNotFound)
    }

    /// Writes a new directory entry (`name`, `ino`) into this directory.
    pub fn dir_link(&mut self, name: &[u8], ino: InodeNo) -> Result<(), KernelError> {
        // The name must not be present.
        match self.dir_lookup(name) {
            Ok((ip, _)) => {
                ip.put();
                return Err(KernelError::AlreadyExists);
            }
            Err(KernelError::FsEntryNotFound) => {}
            Err(e) => return Err(e),
        }

        // Look for a free entry, appending if none is free.
        let de_size = size_of::<DirEntry>();
        let size = usize::try_from(self.size).unwrap();
        assert_eq!(size % de_size, 0, "directory size unaligned");
        let mut off = size;
        for probe in (0..size).step_by(de_size) {
            let de = self.read_as::<DirEntry>(probe)?;
            if de.inum().is_none() {
                off = probe;
                break;
            }
        }

        let de = DirEntry::new(ino, name);
        self.write_data(off, &de)
    }

    /// Returns whether this directory holds only `"."` and `".."`.
    pub fn dir_is_empty(&mut self) -> bool {
        let de_size = size_of::<DirEntry>();
        for off in (2 * de_size..usize::try_from(self.size).unwrap()).step_by(de_size) {
            let de = self.read_as::<DirEntry>(off).expect("dir_is_empty: read");
            if de.inum().is_some() {
                return false;
            }
        }
        true
    }
}
