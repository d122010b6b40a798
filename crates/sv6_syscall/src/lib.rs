//! The sv6 user/kernel ABI: syscall codes, open flags, and the `stat`
//! record, shared between the kernel and user programs.

#![cfg_attr(not(test), no_std)]

use bitflags::bitflags;
use dataview::Pod;
use strum::FromRepr;

bitflags! {
    /// `open` mode bits. `shm_map` reuses [`OpenFlags::READ_WRITE`] to
    /// request a writable mapping.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct OpenFlags: usize {
        const READ_ONLY = 0x000;
        const WRITE_ONLY = 0x001;
        const READ_WRITE = 0x002;
        const CREATE = 0x200;
    }
}

/// File metadata as returned by `fstat`.
#[derive(Debug, Clone, Pod)]
#[repr(C)]
pub struct Stat {
    /// Device holding the file.
    pub dev: i32,
    /// Inode number.
    pub ino: u32,
    /// File type, one of the `T_*` constants.
    pub ty: i16,
    /// Number of links to the file.
    pub nlink: i16,
    pub padding: [u8; 4],
    /// Size of the file in bytes.
    pub size: u64,
}

/// Syscall numbers.
///
/// The numbering is inherited from the lineage this kernel descends from;
/// calls owned by the process layer (fork, exit, wait, ...) keep their slots
/// reserved but are not dispatched here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(usize)]
pub enum SyscallCode {
    Pipe = 4,
    Read = 5,
    Exec = 7,
    Fstat = 8,
    Chdir = 9,
    Dup = 10,
    Open = 15,
    Write = 16,
    Mknod = 17,
    Unlink = 18,
    Link = 19,
    Mkdir = 20,
    Close = 21,
    ShmOpen = 22,
    ShmTrunc = 23,
    ShmMap = 24,
    ShmClose = 25,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_roundtrip() {
        assert_eq!(SyscallCode::from_repr(4), Some(SyscallCode::Pipe));
        assert_eq!(SyscallCode::from_repr(25), Some(SyscallCode::ShmClose));
        // Reserved process-layer slots do not decode.
        assert_eq!(SyscallCode::from_repr(1), None);
        assert_eq!(SyscallCode::from_repr(6), None);
        assert_eq!(SyscallCode::from_repr(26), None);
    }

    #[test]
    fn open_flags_writability() {
        assert!(!OpenFlags::READ_ONLY.intersects(OpenFlags::WRITE_ONLY | OpenFlags::READ_WRITE));
        assert!(OpenFlags::READ_WRITE.contains(OpenFlags::READ_WRITE));
    }
}
