use core::sync::atomic::{AtomicUsize, Ordering};

use sv6_fs_types::BLOCK_SIZE;
use sv6_syscall::Stat;

use crate::{
    error::KernelError,
    fs::{FileSystem, Inode},
    memory::{DataDst, DataSrc, UserPageTable, VirtAddr},
    param::MAX_OP_BLOCKS,
};

pub(super) struct InodeFile {
    inode: Inode,
    off: AtomicUsize,
}

impl InodeFile {
    pub(super) fn new(inode: Inode) -> Self {
        Self {
            inode,
            off: AtomicUsize::new(0),
        }
    }

    pub(super) fn close(self, fs: &FileSystem) {
        super::common::close_inode(fs, self.inode);
    }

    pub(super) fn stat(&self, fs: &FileSystem) -> Stat {
        super::common::stat_inode(fs, &self.inode)
    }

    pub(super) fn read(
        &self,
        fs: &FileSystem,
        pt: &UserPageTable,
        addr: VirtAddr,
        n: usize,
    ) -> Result<usize, KernelError> {
        let tx = fs.begin_tx();
        let mut ip = self.inode.dup(fs).into_tx(&tx);
        let mut lip = ip.lock();
        let off = self.off.load(Ordering::Relaxed);
        let res = lip.read(DataDst::User { pt, va: addr }, off, n);
        if let Ok(read) = res {
            self.off.fetch_add(read, Ordering::Relaxed);
        }
        lip.unlock();
        ip.put();
        tx.end();
        res
    }

    pub(super) fn write(
        &self,
        fs: &FileSystem,
        pt: &UserPageTable,
        addr: VirtAddr,
        n: usize,
    ) -> Result<usize, KernelError> {
        // Write a few blocks at a time to avoid exceeding the maximum log
        // transaction size, counting the inode, the indirect block,
        // allocation bitmap blocks, and two blocks of slop for non-aligned
        // writes.
        let max = ((MAX_OP_BLOCKS - 1 - 1 - 2) / 2) * BLOCK_SIZE;
        let mut written = 0;
        while written < n {
            let n1 = usize::min(n - written, max);

            let tx = fs.begin_tx();
            let mut ip = self.inode.dup(fs).into_tx(&tx);
            let mut lip = ip.lock();
            let off = self.off.load(Ordering::Relaxed);
            let res = lip.write(
                DataSrc::User {
                    pt,
                    va: addr.byte_add(written)?,
                },
                off,
                n1,
            );
            if let Ok(put) = res {
                self.off.fetch_add(put, Ordering::Relaxed);
            }
            lip.unlock();
            ip.put();
            tx.end();

            match res {
                Ok(put) if put == n1 => written += n1,
                Ok(_) => return Err(KernelError::ShortWrite),
                Err(e) => return Err(e),
            }
        }
        Ok(n)
    }
}
