//! Program loading.

use alloc::vec::Vec;

use super::{
    Proc,
    elf::{ELF_MAGIC, ELF_PROG_FLAG_WRITE, ELF_PROG_LOAD, ElfHeader, ProgramHeader},
};
use crate::{
    error::KernelError,
    fs::{LockedInode, path},
    kernel::Kernel,
    memory::{DataDst, PAGE_SIZE, PageRound as _, PtEntryFlags, UserPageTable, VirtAddr},
    param::{MAX_ARG, USER_STACK},
};

/// Replaces the current process image with the program at `path`.
///
/// `argv` holds the already-fetched argument strings, without NUL
/// terminators. On success the process resumes at the program's entry
/// point with the arguments on its new stack; the return value is
/// `(argc, argv)` for the caller's registers.
///
/// Shared-memory attachments do not survive an exec: the new image is
/// built without them and every attachment is closed.
pub fn exec(
    k: &Kernel,
    p: &mut Proc,
    path: &[u8],
    argv: &[Vec<u8>],
) -> Result<(usize, usize), KernelError> {
    if argv.len() >= MAX_ARG {
        return Err(KernelError::ArgumentListTooLong);
    }

    let fs = k.fs();
    let tx = fs.begin_tx();
    let mut ip = path::resolve(&tx, fs, p.cwd(), path)?;
    let mut lip = ip.lock();

    let elf: ElfHeader = lip.read_as(0)?;
    if elf.magic != ELF_MAGIC {
        return Err(KernelError::InvalidExecutable);
    }

    let mut pt = UserPageTable::new(alloc::sync::Arc::clone(k.memory()));

    // Load program segments into the fresh address space.
    for i in 0..elf.phnum {
        let off = usize::try_from(elf.phoff)
            .ok()
            .and_then(|p| p.checked_add(usize::from(i) * core::mem::size_of::<ProgramHeader>()))
            .ok_or(KernelError::InvalidExecutable)?;
        let ph: ProgramHeader = lip.read_as(off)?;
        if ph.ty != ELF_PROG_LOAD {
            continue;
        }
        if ph.memsz < ph.filesz
            || ph.vaddr.checked_add(ph.memsz).is_none()
            || ph.off.checked_add(ph.filesz).is_none()
        {
            return Err(KernelError::InvalidExecutable);
        }
        let va_start = VirtAddr::new(usize::try_from(ph.vaddr).unwrap())?;
        if !va_start.is_page_aligned() {
            return Err(KernelError::InvalidExecutable);
        }
        let va_end = usize::try_from(ph.vaddr + ph.memsz).unwrap();

        pt.grow_to(va_end, segment_perm(ph.flags))?;
        load_segment(
            &mut lip,
            &pt,
            va_start,
            usize::try_from(ph.off).unwrap(),
            usize::try_from(ph.filesz).unwrap(),
        )?;
    }

    lip.unlock();
    ip.put();
    tx.end();

    // Stack: one guard page, then USER_STACK pages.
    let stack_bottom = pt.size().page_roundup();
    pt.grow_to(stack_bottom + (1 + USER_STACK) * PAGE_SIZE, PtEntryFlags::W)?;
    pt.forbid_user_access(VirtAddr::new(stack_bottom)?);

    let sp = pt.size();
    let stack_base = sp - USER_STACK * PAGE_SIZE;
    let (sp, argc) = push_arguments(&pt, sp, stack_base, argv)?;
    let uargv = sp;

    // Save the program name for debugging.
    let name = path.rsplit(|&b| b == b'/').next().unwrap_or(path);
    p.set_name(name);

    // Shared mappings belong to the old image.
    let (oshm, old_pt) = p.shm_parts();
    k.shm().close_all(oshm, old_pt);

    // Commit to the new image; dropping the old page table frees it.
    *p.pagetable_mut() = pt;
    p.trapframe_mut().epc = usize::try_from(elf.entry).unwrap();
    p.trapframe_mut().sp = sp;

    Ok((argc, uargv))
}

fn segment_perm(flags: u32) -> PtEntryFlags {
    if flags & ELF_PROG_FLAG_WRITE != 0 {
        PtEntryFlags::W
    } else {
        PtEntryFlags::empty()
    }
}

/// Copies one segment's file bytes into the new address space at `va`.
///
/// Pages past `filesz` stay zero-filled.
fn load_segment(
    lip: &mut LockedInode<'_, '_>,
    pt: &UserPageTable,
    va: VirtAddr,
    file_offset: usize,
    file_size: usize,
) -> Result<(), KernelError> {
    let mut buf = [0_u8; PAGE_SIZE];
    let mut copied = 0;
    while copied < file_size {
        let n = usize::min(PAGE_SIZE, file_size - copied);
        let read = lip.read(DataDst::Kernel(&mut buf[..n]), file_offset + copied, n)?;
        if read != n {
            return Err(KernelError::InvalidExecutable);
        }
        pt.write_kernel(va.byte_add(copied)?, &buf[..n])?;
        copied += n;
    }
    Ok(())
}

/// Pushes the argument strings and the `argv[]` pointer array onto the
/// new stack, returning the final stack pointer and `argc`.
fn push_arguments(
    pt: &UserPageTable,
    mut sp: usize,
    stack_base: usize,
    argv: &[Vec<u8>],
) -> Result<(usize, usize), KernelError> {
    assert!(argv.len() < MAX_ARG);
    let mut ustack = [0_usize; MAX_ARG];

    for (arg, slot) in argv.iter().zip(&mut ustack) {
        sp = sp
            .checked_sub(arg.len() + 1) // +1 for the NUL
            .ok_or(KernelError::ArgumentListTooLong)?;
        if sp < stack_base {
            return Err(KernelError::ArgumentListTooLong);
        }
        pt.copy_out_bytes(VirtAddr::new(sp)?, arg)?;
        pt.copy_out_bytes(VirtAddr::new(sp + arg.len())?, &[0])?;
        *slot = sp;
    }
    ustack[argv.len()] = 0;

    // Push the argv[] pointer array, keeping the stack 16-byte aligned.
    let ptr_size = core::mem::size_of::<usize>();
    sp = sp
        .checked_sub((argv.len() + 1) * ptr_size)
        .ok_or(KernelError::ArgumentListTooLong)?;
    sp -= sp % 16;
    if sp < stack_base {
        return Err(KernelError::ArgumentListTooLong);
    }
    for (i, ptr) in ustack[..=argv.len()].iter().enumerate() {
        pt.copy_out_bytes(VirtAddr::new(sp + i * ptr_size)?, &ptr.to_ne_bytes())?;
    }

    Ok((sp, argv.len()))
}
