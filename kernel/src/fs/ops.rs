//! Multi-step directory-tree operations: create, link, unlink.

use dataview::PodMethods as _;
use sv6_fs_types::{DIR_SIZE, DirEntry, T_DEV, T_DIR, T_FILE};

use crate::error::KernelError;

use super::{
    FileSystem, Tx,
    inode::{Inode, TxInode},
    path,
};

/// Creates `path` as an inode of type `ty`.
///
/// Opening an existing path succeeds only when the caller asked for a
/// regular file and found one, or found a device node (device opens are
/// idempotent); any other existing entry is an error.
///
/// Returns an unlocked reference; callers that need the fields lock it.
pub fn create<'t>(
    tx: &'t Tx<'t>,
    fs: &FileSystem,
    cwd: &Inode,
    path: &[u8],
    ty: i16,
    major: i16,
    minor: i16,
) -> Result<TxInode<'t>, KernelError> {
    let mut name = [0; DIR_SIZE];
    let (mut dp, name) = path::resolve_parent(tx, fs, cwd, path, &mut name)?;
    let mut dlip = dp.lock();

    match dlip.dir_lookup(name) {
        Ok((mut ip, _off)) => {
            dlip.unlock();
            dp.put();
            let lip = ip.lock();
            if (ty == T_FILE && lip.ty == T_FILE) || lip.ty == T_DEV {
                lip.unlock();
                return Ok(ip);
            }
            Err(KernelError::AlreadyExists)
        }
        Err(KernelError::FsEntryNotFound) => {
            let mut ip = fs.ialloc(tx, dlip.dev(), ty)?;
            let mut lip = ip.lock();
            lip.major = major;
            lip.minor = minor;
            lip.nlink = 1;
            lip.update();

            let res = (|| {
                if ty == T_DIR {
                    // Create "." and ".." entries.
                    // No nlink bump for ".": that would make directory link
                    // counts unable to ever reach zero.
                    lip.dir_link(b".", lip.ino())?;
                    lip.dir_link(b"..", dlip.ino())?;
                }

                dlip.dir_link(name, lip.ino())?;

                if ty == T_DIR {
                    // Now that success is guaranteed:
                    dlip.nlink += 1; // for ".."
                    dlip.update();
                }
                Ok(())
            })();

            if let Err(e) = res {
                // Roll the fresh inode back so dropping the references
                // frees it on disk.
                lip.nlink = 0;
                lip.update();
                return Err(e);
            }

            lip.unlock();
            dlip.unlock();
            dp.put();
            Ok(ip)
        }
        Err(e) => Err(e),
    }
}

/// Creates `new` as a link to the same inode as `old`.
pub fn link(
    tx: &Tx<'_>,
    fs: &FileSystem,
    cwd: &Inode,
    old: &[u8],
    new: &[u8],
) -> Result<(), KernelError> {
    let mut ip = path::resolve(tx, fs, cwd, old)?;
    let mut lip = ip.lock();
    if lip.is_dir() {
        return Err(KernelError::LinkToDirectory);
    }

    // Bump the link count first and drop the lock: the parent lookup below
    // locks directories, and holding two inode locks across a lookup
    // invites deadlock.
    lip.nlink += 1;
    lip.update();
    lip.unlock();

    let res = (|| {
        let mut name = [0; DIR_SIZE];
        let (mut dp, name) = path::resolve_parent(tx, fs, cwd, new, &mut name)?;
        let mut dlip = dp.lock();
        if dlip.dev() != ip.dev() {
            return Err(KernelError::LinkCrossDevices);
        }
        dlip.dir_link(name, ip.ino())?;
        Ok(())
    })();

    if let Err(e) = res {
        // Compensate: undo the early bump.
        let mut lip = ip.lock();
        lip.nlink -= 1;
        lip.update();
        return Err(e);
    }

    ip.put();
    Ok(())
}

/// Removes the directory entry for `path`.
pub fn unlink(tx: &Tx<'_>, fs: &FileSystem, cwd: &Inode, path: &[u8]) -> Result<(), KernelError> {
    let mut name = [0; DIR_SIZE];
    let (mut dp, name) = path::resolve_parent(tx, fs, cwd, path, &mut name)?;
    let mut dlip = dp.lock();

    if name == b"." || name == b".." {
        return Err(KernelError::UnlinkDots);
    }

    let (mut ip, off) = dlip.dir_lookup(name)?;
    let mut lip = ip.lock();

    assert!(lip.nlink >= 1, "unlink: nlink < 1");
    if lip.is_dir() && !lip.dir_is_empty() {
        return Err(KernelError::DirectoryNotEmpty);
    }

    dlip.write_data(off, &DirEntry::zeroed())
        .expect("unlink: clear entry");
    if lip.is_dir() {
        // The victim's ".." no longer references the parent.
        dlip.nlink -= 1;
        dlip.update();
    }
    dlip.unlock();
    dp.put();

    lip.nlink -= 1;
    lip.update();
    lip.unlock();
    ip.put();

    Ok(())
}
