//! Shared-memory system calls.

use sv6_syscall::OpenFlags;

use super::{arg_len, arg_raw, arg_str, arg_user_buf};
use crate::{error::KernelError, kernel::Kernel, param::SHM_NAME_MAX, proc::Proc};

/// Attaches to (or creates) the shared-memory object named by the
/// argument, returning its handle.
pub(super) fn sys_shm_open(k: &Kernel, p: &mut Proc) -> Result<usize, KernelError> {
    let mut name_buf = [0; SHM_NAME_MAX];
    let name = arg_str(p, 0, &mut name_buf)?;

    let (oshm, _) = p.shm_parts();
    k.shm().open(oshm, name)
}

/// Sizes a freshly created object, returning the page-rounded size.
pub(super) fn sys_shm_trunc(k: &Kernel, p: &mut Proc) -> Result<usize, KernelError> {
    let handle = arg_raw(p, 0);
    let size = arg_len(p, 1)?;
    k.shm().trunc(handle, size)
}

/// Maps an attached object into the caller, writing the chosen base
/// address through the second argument.
pub(super) fn sys_shm_map(k: &Kernel, p: &mut Proc) -> Result<usize, KernelError> {
    let handle = arg_raw(p, 0);
    let va_out = arg_user_buf(p, 1, size_of::<usize>(), true)?;
    let flags = OpenFlags::from_bits_truncate(arg_raw(p, 2));

    let (oshm, pt) = p.shm_parts();
    let base = k.shm().map(oshm, pt, handle, flags)?;

    p.pagetable()
        .copy_out_bytes(va_out, &base.addr().to_ne_bytes())?;
    Ok(0)
}

/// Detaches the caller from an object, unmapping it if mapped.
pub(super) fn sys_shm_close(k: &Kernel, p: &mut Proc) -> Result<usize, KernelError> {
    let handle = arg_raw(p, 0);
    let (oshm, pt) = p.shm_parts();
    k.shm().close(oshm, pt, handle)?;
    Ok(0)
}
