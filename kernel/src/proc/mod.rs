//! Processes, as the syscall layer sees them.
//!
//! The scheduler, trap entry, and context switching belong to the
//! embedder; a [`Proc`] here is the kernel-side state a system call
//! operates on: saved registers, the user address space, the open-file
//! table, the current directory, and the shared-memory attachments.
//! The embedder creates the first process with [`Proc::first`], clones
//! processes with [`fork`], and retires them with [`exit`].

use arrayvec::ArrayVec;

use crate::{
    error::KernelError,
    file::File,
    fs::Inode,
    kernel::Kernel,
    memory::UserPageTable,
    param::{NOFILE, NSHM_PROC},
    shm::ShmAttachments,
};

pub mod elf;
pub mod exec;

/// Saved user registers: the syscall number, its arguments, and the
/// resume state.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrapFrame {
    /// Saved user program counter.
    pub epc: usize,
    /// Saved user stack pointer.
    pub sp: usize,
    pub a0: usize,
    pub a1: usize,
    pub a2: usize,
    pub a3: usize,
    pub a4: usize,
    pub a5: usize,
    /// Syscall number.
    pub a7: usize,
}

/// Per-process state.
pub struct Proc {
    pid: u32,
    name: ArrayVec<u8, 16>,
    trapframe: TrapFrame,
    pagetable: UserPageTable,
    /// Open files; the index is the file descriptor.
    ofile: [Option<File>; NOFILE],
    /// Current directory.
    cwd: Option<Inode>,
    /// Shared-memory attachments.
    oshm: ShmAttachments,
}

impl Proc {
    /// Creates the first process, rooted at `/`, with an empty address
    /// space. The embedder typically execs an init program into it.
    pub fn first(k: &Kernel) -> Result<Self, KernelError> {
        let fs = k.fs();
        let tx = fs.begin_tx();
        let cwd = fs.root(&tx)?.unbind();
        tx.end();

        let mut name = ArrayVec::new();
        name.try_extend_from_slice(b"init").unwrap();

        Ok(Self {
            pid: k.allocate_pid(),
            name,
            trapframe: TrapFrame::default(),
            pagetable: UserPageTable::new(alloc::sync::Arc::clone(k.memory())),
            ofile: [const { None }; NOFILE],
            cwd: Some(cwd),
            oshm: [const { None }; NSHM_PROC],
        })
    }

    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    #[must_use]
    pub fn name(&self) -> &str {
        core::str::from_utf8(&self.name).unwrap_or("?")
    }

    pub fn set_name(&mut self, name: &[u8]) {
        self.name.clear();
        let len = usize::min(self.name.capacity(), name.len());
        self.name.try_extend_from_slice(&name[..len]).unwrap();
    }

    #[must_use]
    pub fn trapframe(&self) -> &TrapFrame {
        &self.trapframe
    }

    pub fn trapframe_mut(&mut self) -> &mut TrapFrame {
        &mut self.trapframe
    }

    #[must_use]
    pub fn pagetable(&self) -> &UserPageTable {
        &self.pagetable
    }

    pub fn pagetable_mut(&mut self) -> &mut UserPageTable {
        &mut self.pagetable
    }

    /// Looks up an open file by descriptor.
    pub fn ofile(&self, fd: usize) -> Result<&File, KernelError> {
        self.ofile
            .get(fd)
            .and_then(Option::as_ref)
            .ok_or(KernelError::FileDescriptorNotFound(fd))
    }

    /// Installs `file` in the lowest free descriptor slot, taking over
    /// the caller's reference.
    ///
    /// Gives the file back if every slot is taken.
    pub fn add_ofile(&mut self, file: File) -> Result<usize, File> {
        let Some((fd, slot)) = self
            .ofile
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.is_none())
        else {
            return Err(file);
        };
        assert!(slot.replace(file).is_none());
        Ok(fd)
    }

    /// Clears a descriptor slot, returning the reference it held.
    pub fn unset_ofile(&mut self, fd: usize) -> Option<File> {
        self.ofile.get_mut(fd)?.take()
    }

    /// The current directory.
    ///
    /// # Panics
    ///
    /// Panics if the process has already been torn down.
    #[must_use]
    pub fn cwd(&self) -> &Inode {
        self.cwd.as_ref().expect("process has no cwd")
    }

    /// Replaces the current directory, returning the old reference.
    pub fn update_cwd(&mut self, cwd: Inode) -> Inode {
        self.cwd.replace(cwd).unwrap()
    }

    /// Splits out the shared-memory attachment table and the page table,
    /// which the shared-memory registry mutates together.
    pub fn shm_parts(&mut self) -> (&mut ShmAttachments, &mut UserPageTable) {
        (&mut self.oshm, &mut self.pagetable)
    }
}

/// Creates a new process copying `parent`: a duplicate of its memory, its
/// open files, its current directory, and its shared-memory attachments
/// (backed by the same physical pages). The child's trapframe makes the
/// in-flight syscall return 0.
pub fn fork(k: &Kernel, parent: &Proc) -> Result<Proc, KernelError> {
    let mut pagetable = UserPageTable::new(alloc::sync::Arc::clone(k.memory()));
    parent.pagetable.try_clone_into(&mut pagetable)?;

    let mut trapframe = parent.trapframe;
    trapframe.a0 = 0;

    // Bump the reference counts on every open file descriptor.
    let mut ofile = [const { None }; NOFILE];
    for (slot, parent_slot) in ofile.iter_mut().zip(&parent.ofile) {
        *slot = parent_slot.as_ref().map(File::dup);
    }

    let cwd = parent.cwd().dup(k.fs());

    let mut oshm = [const { None }; NSHM_PROC];
    k.shm().inherit(&parent.oshm, &mut oshm, &mut pagetable);

    Ok(Proc {
        pid: k.allocate_pid(),
        name: parent.name.clone(),
        trapframe,
        pagetable,
        ofile,
        cwd: Some(cwd),
        oshm,
    })
}

/// Tears a process down: closes every open file, releases the current
/// directory, and detaches every shared-memory attachment. The address
/// space is freed when the process value drops.
pub fn exit(k: &Kernel, mut proc: Proc) {
    for slot in &mut proc.ofile {
        if let Some(file) = slot.take() {
            file.close(k);
        }
    }

    let cwd = proc.cwd.take().unwrap();
    let tx = k.fs().begin_tx();
    cwd.into_tx(&tx).put();
    tx.end();

    let (oshm, pagetable) = proc.shm_parts();
    k.shm().close_all(oshm, pagetable);
}
