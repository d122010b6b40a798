//! System call dispatch and argument fetching.
//!
//! Mostly argument checking, since we don't trust user code. Arguments
//! arrive in the trapframe registers; user pointers are validated against
//! the caller's page table before anything touches them. Every failure,
//! whatever its internal cause, collapses to `-1` in the return register.

use sv6_syscall::SyscallCode;

use crate::{
    error::KernelError,
    file::File,
    kernel::Kernel,
    memory::VirtAddr,
    proc::Proc,
};

mod file;
mod shm;

/// Executes the system call named by the trapframe, storing the result in
/// the return register.
pub fn dispatch(k: &Kernel, p: &mut Proc) {
    let n = p.trapframe().a7;
    let Some(code) = SyscallCode::from_repr(n) else {
        ::log::warn!("{} {}: unknown syscall {}", p.pid(), p.name(), n);
        p.trapframe_mut().a0 = usize::MAX;
        return;
    };

    let res = match code {
        SyscallCode::Pipe => file::sys_pipe(k, p),
        SyscallCode::Read => file::sys_read(k, p),
        SyscallCode::Exec => file::sys_exec(k, p),
        SyscallCode::Fstat => file::sys_fstat(k, p),
        SyscallCode::Chdir => file::sys_chdir(k, p),
        SyscallCode::Dup => file::sys_dup(k, p),
        SyscallCode::Open => file::sys_open(k, p),
        SyscallCode::Write => file::sys_write(k, p),
        SyscallCode::Mknod => file::sys_mknod(k, p),
        SyscallCode::Unlink => file::sys_unlink(k, p),
        SyscallCode::Link => file::sys_link(k, p),
        SyscallCode::Mkdir => file::sys_mkdir(k, p),
        SyscallCode::Close => file::sys_close(k, p),
        SyscallCode::ShmOpen => shm::sys_shm_open(k, p),
        SyscallCode::ShmTrunc => shm::sys_shm_trunc(k, p),
        SyscallCode::ShmMap => shm::sys_shm_map(k, p),
        SyscallCode::ShmClose => shm::sys_shm_close(k, p),
    };

    match res {
        Ok(ret) => p.trapframe_mut().a0 = ret,
        Err(e) => {
            ::log::debug!("{} {}: {:?} failed: {}", p.pid(), p.name(), code, e);
            p.trapframe_mut().a0 = usize::MAX;
        }
    }
}

/// Fetches the `n`-th syscall argument register.
fn arg_raw(p: &Proc, n: usize) -> usize {
    let tf = p.trapframe();
    match n {
        0 => tf.a0,
        1 => tf.a1,
        2 => tf.a2,
        3 => tf.a3,
        4 => tf.a4,
        5 => tf.a5,
        _ => panic!("bad argument index {n}"),
    }
}

/// Fetches the `n`-th argument as a small signed integer.
fn arg_int(p: &Proc, n: usize) -> Result<i32, KernelError> {
    i32::try_from(arg_raw(p, n) as isize).map_err(|_| KernelError::InvalidArgument)
}

/// Fetches the `n`-th argument as a byte count, rejecting negatives.
fn arg_len(p: &Proc, n: usize) -> Result<usize, KernelError> {
    let raw = arg_raw(p, n);
    if (raw as isize) < 0 {
        return Err(KernelError::InvalidArgument);
    }
    Ok(raw)
}

/// Fetches the `n`-th argument as a user virtual address.
fn arg_addr(p: &Proc, n: usize) -> Result<VirtAddr, KernelError> {
    VirtAddr::new(arg_raw(p, n))
}

/// Fetches the `n`-th argument as a user pointer to `len` readable (and,
/// if `write`, writable) bytes. The whole range must lie inside the
/// caller's mapped address space.
fn arg_user_buf(p: &Proc, n: usize, len: usize, write: bool) -> Result<VirtAddr, KernelError> {
    let va = arg_addr(p, n)?;
    p.pagetable().validate(va, len, write)?;
    Ok(va)
}

/// Fetches the `n`-th argument as a NUL-terminated user string.
fn arg_str<'b>(p: &Proc, n: usize, buf: &'b mut [u8]) -> Result<&'b [u8], KernelError> {
    let va = arg_addr(p, n)?;
    p.pagetable().fetch_str(va, buf)
}

/// Fetches the `n`-th argument as a file descriptor, returning both the
/// descriptor and the open file it names.
fn arg_fd<'p>(p: &'p Proc, n: usize) -> Result<(usize, &'p File), KernelError> {
    let fd = arg_len(p, n)?;
    let file = p.ofile(fd)?;
    Ok((fd, file))
}
