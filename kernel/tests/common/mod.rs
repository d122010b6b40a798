//! Test harness: boots a private kernel and drives it the way user
//! programs would, through the trapframe and the syscall dispatcher.

// Each suite compiles its own copy and uses a different subset.
#![allow(dead_code)]

use sv6_kernel::{
    Kernel, KernelConfig,
    fs::{RamDisk, mkfs},
    memory::{PAGE_SIZE, PtEntryFlags, VirtAddr},
    proc::Proc,
    syscall,
};
use sv6_syscall::{OpenFlags, Stat, SyscallCode};

/// Boots a kernel over a freshly formatted RAM disk.
pub fn boot() -> Kernel {
    let disk = RamDisk::new(1000);
    mkfs::format(&disk, &mkfs::Geometry::default());
    Kernel::new(disk, &KernelConfig { phys_pages: 512 })
}

/// Number of scratch pages each test process gets for staging syscall
/// arguments and buffers.
const SCRATCH_PAGES: usize = 8;

/// A process plus a bump allocator over its scratch memory, standing in
/// for the user-space side of a syscall.
pub struct UserProc {
    pub proc: Proc,
    scratch: usize,
}

impl UserProc {
    pub fn new(k: &Kernel) -> Self {
        let mut proc = Proc::first(k).unwrap();
        proc.pagetable_mut()
            .grow_to(SCRATCH_PAGES * PAGE_SIZE, PtEntryFlags::W)
            .unwrap();
        Self { proc, scratch: 0 }
    }

    /// Wraps an already-built process (e.g. a fork child).
    pub fn adopt(proc: Proc) -> Self {
        Self {
            proc,
            scratch: 0,
        }
    }

    /// Releases every scratch allocation; previously returned addresses
    /// become dead.
    pub fn scratch_reset(&mut self) {
        self.scratch = 0;
    }

    /// Reserves `len` bytes of scratch user memory.
    pub fn alloc(&mut self, len: usize) -> usize {
        let addr = self.scratch;
        self.scratch += (len + 15) & !15;
        assert!(
            self.scratch <= SCRATCH_PAGES * PAGE_SIZE,
            "test scratch exhausted"
        );
        addr
    }

    /// Stages `bytes` in user memory, returning their address.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> usize {
        let addr = self.alloc(bytes.len());
        self.proc
            .pagetable()
            .copy_out_bytes(VirtAddr::new(addr).unwrap(), bytes)
            .unwrap();
        addr
    }

    /// Stages a NUL-terminated string, returning its address.
    pub fn push_str(&mut self, s: &str) -> usize {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.push_bytes(&bytes)
    }

    /// Reads back `len` bytes of user memory.
    pub fn read_user(&self, addr: usize, len: usize) -> Vec<u8> {
        let mut buf = vec![0; len];
        self.proc
            .pagetable()
            .copy_in_bytes(&mut buf, VirtAddr::new(addr).unwrap())
            .unwrap();
        buf
    }

    /// Issues one system call through the dispatcher.
    pub fn syscall(&mut self, k: &Kernel, code: SyscallCode, args: &[usize]) -> isize {
        let tf = self.proc.trapframe_mut();
        *tf = Default::default();
        tf.a7 = code as usize;
        for (i, arg) in args.iter().enumerate() {
            match i {
                0 => tf.a0 = *arg,
                1 => tf.a1 = *arg,
                2 => tf.a2 = *arg,
                3 => tf.a3 = *arg,
                4 => tf.a4 = *arg,
                5 => tf.a5 = *arg,
                _ => panic!("too many args"),
            }
        }
        syscall::dispatch(k, &mut self.proc);
        self.proc.trapframe().a0 as isize
    }

    // Convenience wrappers for the syscall surface.

    pub fn open(&mut self, k: &Kernel, path: &str, flags: OpenFlags) -> isize {
        let path = self.push_str(path);
        self.syscall(k, SyscallCode::Open, &[path, flags.bits()])
    }

    pub fn close(&mut self, k: &Kernel, fd: usize) -> isize {
        self.syscall(k, SyscallCode::Close, &[fd])
    }

    pub fn write(&mut self, k: &Kernel, fd: usize, data: &[u8]) -> isize {
        let addr = self.push_bytes(data);
        self.syscall(k, SyscallCode::Write, &[fd, addr, data.len()])
    }

    /// Reads up to `len` bytes; returns the syscall result and the bytes.
    pub fn read(&mut self, k: &Kernel, fd: usize, len: usize) -> (isize, Vec<u8>) {
        let addr = self.alloc(len);
        let ret = self.syscall(k, SyscallCode::Read, &[fd, addr, len]);
        let n = usize::try_from(ret).unwrap_or(0);
        (ret, self.read_user(addr, n))
    }

    pub fn mkdir(&mut self, k: &Kernel, path: &str) -> isize {
        let path = self.push_str(path);
        self.syscall(k, SyscallCode::Mkdir, &[path])
    }

    pub fn mknod(&mut self, k: &Kernel, path: &str, major: usize, minor: usize) -> isize {
        let path = self.push_str(path);
        self.syscall(k, SyscallCode::Mknod, &[path, major, minor])
    }

    pub fn unlink(&mut self, k: &Kernel, path: &str) -> isize {
        let path = self.push_str(path);
        self.syscall(k, SyscallCode::Unlink, &[path])
    }

    pub fn link(&mut self, k: &Kernel, old: &str, new: &str) -> isize {
        let old = self.push_str(old);
        let new = self.push_str(new);
        self.syscall(k, SyscallCode::Link, &[old, new])
    }

    pub fn chdir(&mut self, k: &Kernel, path: &str) -> isize {
        let path = self.push_str(path);
        self.syscall(k, SyscallCode::Chdir, &[path])
    }

    pub fn dup(&mut self, k: &Kernel, fd: usize) -> isize {
        self.syscall(k, SyscallCode::Dup, &[fd])
    }

    pub fn fstat(&mut self, k: &Kernel, fd: usize) -> (isize, Stat) {
        use dataview::PodMethods as _;

        let addr = self.alloc(size_of::<Stat>());
        let ret = self.syscall(k, SyscallCode::Fstat, &[fd, addr]);
        let bytes = self.read_user(addr, size_of::<Stat>());
        let mut stat = Stat::zeroed();
        stat.as_bytes_mut().copy_from_slice(&bytes);
        (ret, stat)
    }

    pub fn pipe(&mut self, k: &Kernel) -> (isize, usize, usize) {
        let addr = self.alloc(8);
        let ret = self.syscall(k, SyscallCode::Pipe, &[addr]);
        let bytes = self.read_user(addr, 8);
        let rfd = i32::from_ne_bytes(bytes[0..4].try_into().unwrap());
        let wfd = i32::from_ne_bytes(bytes[4..8].try_into().unwrap());
        (
            ret,
            usize::try_from(rfd).unwrap_or(usize::MAX),
            usize::try_from(wfd).unwrap_or(usize::MAX),
        )
    }

    pub fn shm_open(&mut self, k: &Kernel, name: &str) -> isize {
        let name = self.push_str(name);
        self.syscall(k, SyscallCode::ShmOpen, &[name])
    }

    pub fn shm_trunc(&mut self, k: &Kernel, handle: usize, size: usize) -> isize {
        self.syscall(k, SyscallCode::ShmTrunc, &[handle, size])
    }

    /// Returns the syscall result and the mapped base address.
    pub fn shm_map(&mut self, k: &Kernel, handle: usize, flags: OpenFlags) -> (isize, usize) {
        let out = self.alloc(size_of::<usize>());
        let ret = self.syscall(k, SyscallCode::ShmMap, &[handle, out, flags.bits()]);
        let bytes = self.read_user(out, size_of::<usize>());
        (ret, usize::from_ne_bytes(bytes.try_into().unwrap()))
    }

    pub fn shm_close(&mut self, k: &Kernel, handle: usize) -> isize {
        self.syscall(k, SyscallCode::ShmClose, &[handle])
    }
}
