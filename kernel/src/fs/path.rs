//! Path name resolution.

use sv6_fs_types::DIR_SIZE;

use crate::error::KernelError;

use super::{
    FileSystem, Tx,
    inode::{Inode, TxInode},
};

/// Copies the next path element from `path`.
///
/// Returns the element and the remainder with leading slashes removed, or
/// `None` when the path is exhausted.
///
/// * `skip_elem(b"a/bb/c")` is `Some((b"a", b"bb/c"))`
/// * `skip_elem(b"///a//bb")` is `Some((b"a", b"bb"))`
/// * `skip_elem(b"a")` is `Some((b"a", b""))`
/// * `skip_elem(b"")` and `skip_elem(b"////")` are `None`
fn skip_elem(path: &[u8]) -> Option<(&[u8], &[u8])> {
    let start = path.iter().position(|&c| c != b'/')?;
    let path = &path[start..];
    let end = path.iter().position(|&c| c == b'/').unwrap_or(path.len());
    let elem = &path[..end];
    let path = &path[end..];
    let next = path.iter().position(|&c| c != b'/').unwrap_or(path.len());
    Some((elem, &path[next..]))
}

/// Looks up the inode for `path`, walking from the root for absolute paths
/// and from `cwd` otherwise.
///
/// If `parent` is true, stops one level early, returning the parent
/// directory and copying the final element into `name_out`.
fn resolve_impl<'t>(
    tx: &'t Tx<'t>,
    fs: &FileSystem,
    cwd: &Inode,
    path: &[u8],
    parent: bool,
    mut name_out: Option<&mut [u8; DIR_SIZE]>,
) -> Result<TxInode<'t>, KernelError> {
    let mut ip = if path.first() == Some(&b'/') {
        fs.root(tx)?
    } else {
        cwd.dup(fs).into_tx(tx)
    };

    let mut path = path;
    while let Some((name, rest)) = skip_elem(path) {
        path = rest;
        if let Some(name_out) = &mut name_out {
            let len = usize::min(name.len(), DIR_SIZE);
            name_out[..len].copy_from_slice(&name[..len]);
            name_out[len..].fill(0);
        }

        let mut lip = ip.lock();
        if !lip.is_dir() {
            return Err(KernelError::NonDirectoryPathComponent);
        }

        if parent && path.is_empty() {
            // Stop one level early.
            lip.unlock();
            return Ok(ip);
        }
        let (next, _off) = lip.dir_lookup(name)?;
        lip.unlock();
        ip = next;
    }

    if parent {
        return Err(KernelError::FsEntryNotFound);
    }
    Ok(ip)
}

/// Resolves `path` to an inode.
pub fn resolve<'t>(
    tx: &'t Tx<'t>,
    fs: &FileSystem,
    cwd: &Inode,
    path: &[u8],
) -> Result<TxInode<'t>, KernelError> {
    resolve_impl(tx, fs, cwd, path, false, None)
}

/// Resolves `path` to its parent directory and final name element.
pub fn resolve_parent<'t, 'n>(
    tx: &'t Tx<'t>,
    fs: &FileSystem,
    cwd: &Inode,
    path: &[u8],
    name: &'n mut [u8; DIR_SIZE],
) -> Result<(TxInode<'t>, &'n [u8]), KernelError> {
    let ip = resolve_impl(tx, fs, cwd, path, true, Some(name))?;
    let len = name.iter().position(|&b| b == 0).unwrap_or(name.len());
    Ok((ip, &name[..len]))
}
