//! File-system system calls.

use alloc::vec::Vec;

use sv6_fs_types::{T_DEV, T_DIR, T_FILE};
use sv6_syscall::{OpenFlags, Stat};

use super::{arg_addr, arg_fd, arg_int, arg_len, arg_raw, arg_str, arg_user_buf};
use crate::{
    error::KernelError,
    file::File,
    fs::{ops, path},
    kernel::Kernel,
    memory::{PAGE_SIZE, VirtAddr},
    param::{MAX_ARG, MAX_PATH},
    proc::{Proc, exec},
};

/// Returns a new file descriptor referring to the same file as the given
/// one.
pub(super) fn sys_dup(_k: &Kernel, p: &mut Proc) -> Result<usize, KernelError> {
    let (_, file) = arg_fd(p, 0)?;
    let file = file.dup();
    p.add_ofile(file)
        .map_err(|_| KernelError::NoFreeFileDescriptorTableEntry)
}

/// Reads up to `n` bytes from a file into a user buffer.
pub(super) fn sys_read(k: &Kernel, p: &mut Proc) -> Result<usize, KernelError> {
    let n = arg_len(p, 2)?;
    let addr = arg_user_buf(p, 1, n, true)?;
    let (_, file) = arg_fd(p, 0)?;
    file.read(k, p.pagetable(), addr, n)
}

/// Writes `n` bytes from a user buffer to a file.
pub(super) fn sys_write(k: &Kernel, p: &mut Proc) -> Result<usize, KernelError> {
    let n = arg_len(p, 2)?;
    let addr = arg_user_buf(p, 1, n, false)?;
    let (_, file) = arg_fd(p, 0)?;
    file.write(k, p.pagetable(), addr, n)
}

/// Releases an open file descriptor.
pub(super) fn sys_close(k: &Kernel, p: &mut Proc) -> Result<usize, KernelError> {
    let (fd, _) = arg_fd(p, 0)?;
    let file = p.unset_ofile(fd).unwrap();
    file.close(k);
    Ok(0)
}

/// Writes metadata about an open file into a user `Stat`.
pub(super) fn sys_fstat(k: &Kernel, p: &mut Proc) -> Result<usize, KernelError> {
    let addr = arg_user_buf(p, 1, size_of::<Stat>(), true)?;
    let (_, file) = arg_fd(p, 0)?;
    let stat = file.stat(k)?;
    p.pagetable().copy_out(addr, &stat)?;
    Ok(0)
}

/// Creates the path `new` as a link to the same inode as `old`.
pub(super) fn sys_link(k: &Kernel, p: &mut Proc) -> Result<usize, KernelError> {
    let mut old_buf = [0; MAX_PATH];
    let mut new_buf = [0; MAX_PATH];
    let old = arg_str(p, 0, &mut old_buf)?;
    let new = arg_str(p, 1, &mut new_buf)?;

    let fs = k.fs();
    let tx = fs.begin_tx();
    ops::link(&tx, fs, p.cwd(), old, new)?;
    Ok(0)
}

/// Removes a directory entry.
pub(super) fn sys_unlink(k: &Kernel, p: &mut Proc) -> Result<usize, KernelError> {
    let mut path_buf = [0; MAX_PATH];
    let path = arg_str(p, 0, &mut path_buf)?;

    let fs = k.fs();
    let tx = fs.begin_tx();
    ops::unlink(&tx, fs, p.cwd(), path)?;
    Ok(0)
}

/// Opens a file, optionally creating it.
pub(super) fn sys_open(k: &Kernel, p: &mut Proc) -> Result<usize, KernelError> {
    let mut path_buf = [0; MAX_PATH];
    let path = arg_str(p, 0, &mut path_buf)?;
    let omode = OpenFlags::from_bits_truncate(arg_raw(p, 1));

    let fs = k.fs();
    let tx = fs.begin_tx();

    let mut ip = if omode.contains(OpenFlags::CREATE) {
        ops::create(&tx, fs, p.cwd(), path, T_FILE, 0, 0)?
    } else {
        let mut ip = path::resolve(&tx, fs, p.cwd(), path)?;
        let lip = ip.lock();
        if lip.is_dir() && omode != OpenFlags::READ_ONLY {
            return Err(KernelError::OpenDirAsWritable);
        }
        lip.unlock();
        ip
    };

    let lip = ip.lock();
    let (ty, major) = (lip.ty, lip.major);
    lip.unlock();
    let inode = ip.unbind();
    tx.end();

    let readable = !omode.contains(OpenFlags::WRITE_ONLY);
    let writable = omode.contains(OpenFlags::WRITE_ONLY) || omode.contains(OpenFlags::READ_WRITE);
    let file = if ty == T_DEV {
        File::new_device(k, major, inode, readable, writable)?
    } else {
        File::new_inode(k, inode, readable, writable)?
    };

    match p.add_ofile(file) {
        Ok(fd) => Ok(fd),
        Err(file) => {
            file.close(k);
            Err(KernelError::NoFreeFileDescriptorTableEntry)
        }
    }
}

/// Creates a new directory.
pub(super) fn sys_mkdir(k: &Kernel, p: &mut Proc) -> Result<usize, KernelError> {
    let mut path_buf = [0; MAX_PATH];
    let path = arg_str(p, 0, &mut path_buf)?;

    let fs = k.fs();
    let tx = fs.begin_tx();
    let ip = ops::create(&tx, fs, p.cwd(), path, T_DIR, 0, 0)?;
    ip.put();
    Ok(0)
}

/// Creates a new device node.
pub(super) fn sys_mknod(k: &Kernel, p: &mut Proc) -> Result<usize, KernelError> {
    let mut path_buf = [0; MAX_PATH];
    let path = arg_str(p, 0, &mut path_buf)?;
    let major = i16::try_from(arg_int(p, 1)?).map_err(|_| KernelError::InvalidArgument)?;
    let minor = i16::try_from(arg_int(p, 2)?).map_err(|_| KernelError::InvalidArgument)?;

    let fs = k.fs();
    let tx = fs.begin_tx();
    let ip = ops::create(&tx, fs, p.cwd(), path, T_DEV, major, minor)?;
    ip.put();
    Ok(0)
}

/// Changes the current directory.
pub(super) fn sys_chdir(k: &Kernel, p: &mut Proc) -> Result<usize, KernelError> {
    let mut path_buf = [0; MAX_PATH];
    let path = arg_str(p, 0, &mut path_buf)?;

    let fs = k.fs();
    let tx = fs.begin_tx();
    let mut ip = path::resolve(&tx, fs, p.cwd(), path)?;
    let lip = ip.lock();
    if !lip.is_dir() {
        return Err(KernelError::ChdirNotDir);
    }
    lip.unlock();

    let old = p.update_cwd(ip.unbind());
    old.into_tx(&tx).put();
    Ok(0)
}

/// Loads a program and executes it with the given arguments.
///
/// Does not return to the old image on success: the process resumes at
/// the new entry point with `argc` in the return register and `argv` in
/// the next one.
pub(super) fn sys_exec(k: &Kernel, p: &mut Proc) -> Result<usize, KernelError> {
    let mut path_buf = [0; MAX_PATH];
    let path_arg = arg_str(p, 0, &mut path_buf)?;
    let uargv = arg_addr(p, 1)?;

    let mut argv: Vec<Vec<u8>> = Vec::new();
    loop {
        if argv.len() >= MAX_ARG {
            return Err(KernelError::ArgumentListTooLong);
        }
        let slot = uargv.byte_add(argv.len() * size_of::<usize>())?;
        let mut ptr_bytes = [0; size_of::<usize>()];
        p.pagetable().copy_in_bytes(&mut ptr_bytes, slot)?;
        let uarg = usize::from_ne_bytes(ptr_bytes);
        if uarg == 0 {
            break;
        }

        let mut arg_buf = alloc::vec![0; PAGE_SIZE];
        let arg = p.pagetable().fetch_str(VirtAddr::new(uarg)?, &mut arg_buf)?;
        argv.push(arg.to_vec());
    }

    let (argc, uargv) = exec::exec(k, p, path_arg, &argv)?;
    p.trapframe_mut().a1 = uargv;
    Ok(argc)
}

/// Creates a pipe and installs a read and a write descriptor.
pub(super) fn sys_pipe(k: &Kernel, p: &mut Proc) -> Result<usize, KernelError> {
    let fd_array = arg_user_buf(p, 0, size_of::<[i32; 2]>(), true)?;

    let (rf, wf) = File::new_pipe(k)?;

    let rfd = match p.add_ofile(rf) {
        Ok(fd) => fd,
        Err(rf) => {
            rf.close(k);
            wf.close(k);
            return Err(KernelError::NoFreeFileDescriptorTableEntry);
        }
    };
    let wfd = match p.add_ofile(wf) {
        Ok(fd) => fd,
        Err(wf) => {
            p.unset_ofile(rfd).unwrap().close(k);
            wf.close(k);
            return Err(KernelError::NoFreeFileDescriptorTableEntry);
        }
    };

    let fds = [
        i32::try_from(rfd).unwrap(),
        i32::try_from(wfd).unwrap(),
    ];
    if let Err(e) = p.pagetable().copy_out(fd_array, &fds) {
        p.unset_ofile(rfd).unwrap().close(k);
        p.unset_ofile(wfd).unwrap().close(k);
        return Err(e);
    }
    Ok(0)
}
