/// Maximum major device number.
pub const NDEV: usize = 10;

/// Open files per process.
pub const NOFILE: usize = 16;

/// Open files per system.
pub const NFILE: usize = 100;

/// Maximum number of active inodes.
pub const NINODE: usize = 50;

/// Device number of the file system root disk.
pub const ROOT_DEV: u32 = 1;

/// Max exec arguments.
pub const MAX_ARG: usize = 32;

/// Max length of a path argument.
pub const MAX_PATH: usize = 128;

/// Max # of blocks any FS op writes.
pub const MAX_OP_BLOCKS: usize = 10;

/// Max journaled blocks in the in-memory log header.
pub const LOG_SIZE: usize = MAX_OP_BLOCKS * 3;

/// Size of the disk block cache.
pub const NBUF: usize = MAX_OP_BLOCKS * 3;

/// User stack pages.
pub const USER_STACK: usize = 1;

/// System-wide shared-memory object slots.
pub const NSHM: usize = 16;

/// Shared-memory attachments per process.
pub const NSHM_PROC: usize = 16;

/// Largest shared-memory object, in pages.
pub const SHM_MAX_PAGES: usize = 64;

/// Longest shared-memory object name, in bytes.
pub const SHM_NAME_MAX: usize = 100;
