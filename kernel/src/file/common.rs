//! Inode helpers shared by inode-backed and device-backed files.

use sv6_syscall::Stat;

use crate::fs::{FileSystem, Inode};

/// Releases a long-term inode reference inside its own transaction.
pub(super) fn close_inode(fs: &FileSystem, inode: Inode) {
    let tx = fs.begin_tx();
    inode.into_tx(&tx).put();
    tx.end();
}

pub(super) fn stat_inode(fs: &FileSystem, inode: &Inode) -> Stat {
    let tx = fs.begin_tx();
    let mut ip = inode.dup(fs).into_tx(&tx);
    let lip = ip.lock();
    let stat = lip.stat();
    lip.unlock();
    ip.put();
    tx.end();
    stat
}
