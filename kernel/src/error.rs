use crate::memory::VirtAddr;

/// Every way a system call can fail.
///
/// The taxonomy is internal: at the trapframe boundary all of these collapse
/// to `-1`, as user programs expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    #[error("no free page found")]
    NoFreePage,
    #[error("too large virtual address: {0:#x}")]
    TooLargeVirtualAddress(usize),
    #[error("virtual address overflow")]
    VirtualAddressOverflow,
    #[error("page not mapped: {0}")]
    VirtualPageNotMapped(VirtAddr),
    #[error("inaccessible page: {0}")]
    InaccessiblePage(VirtAddr),
    #[error("bad file descriptor: {0}")]
    FileDescriptorNotFound(usize),
    #[error("file descriptor not readable")]
    FileDescriptorNotReadable,
    #[error("file descriptor not writable")]
    FileDescriptorNotWritable,
    #[error("string argument too long")]
    StringTooLong,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("file system entry not found")]
    FsEntryNotFound,
    #[error("non-directory component in path")]
    NonDirectoryPathComponent,
    #[error("directory not empty")]
    DirectoryNotEmpty,
    #[error("unlink of dot directories")]
    UnlinkDots,
    #[error("entry already exists")]
    AlreadyExists,
    #[error("link to a directory")]
    LinkToDirectory,
    #[error("link crosses devices")]
    LinkCrossDevices,
    #[error("open directory as writable")]
    OpenDirAsWritable,
    #[error("chdir to non-directory")]
    ChdirNotDir,
    #[error("write offset too large")]
    WriteOffsetTooLarge,
    #[error("short write")]
    ShortWrite,
    #[error("file too large")]
    FileTooLarge,
    #[error("storage out of blocks")]
    StorageOutOfBlocks,
    #[error("storage out of inodes")]
    StorageOutOfInodes,
    #[error("no free in-memory inode entry")]
    NoFreeInodeTableEntry,
    #[error("no free file table entry")]
    NoFreeFileTableEntry,
    #[error("no free file descriptor")]
    NoFreeFileDescriptorTableEntry,
    #[error("device not found: major {0}")]
    DeviceNotFound(i16),
    #[error("stat on a pipe")]
    StatOnPipe,
    #[error("broken pipe")]
    BrokenPipe,
    #[error("argument list too long")]
    ArgumentListTooLong,
    #[error("invalid executable")]
    InvalidExecutable,
    #[error("shared memory name too long")]
    ShmNameTooLong,
    #[error("no free shared memory slot")]
    NoFreeShmSlot,
    #[error("no free shared memory attachment")]
    NoFreeShmAttachment,
    #[error("bad shared memory handle: {0}")]
    ShmBadHandle(usize),
    #[error("shared memory object already sized")]
    ShmAlreadySized,
    #[error("shared memory object has no size")]
    ShmNotSized,
    #[error("shared memory object too large")]
    ShmTooLarge,
    #[error("shared memory object not attached")]
    ShmNotAttached,
    #[error("shared memory object already mapped")]
    ShmAlreadyMapped,
    #[error("no address space for shared memory mapping")]
    ShmAddressSpaceExhausted,
}
