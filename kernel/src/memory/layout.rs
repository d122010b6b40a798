use super::PAGE_SIZE;

/// First kernel address. User mappings live strictly below this.
pub const KERN_BASE: usize = 0x8000_0000;

/// Highest page a shared-memory segment may occupy. Segments are packed
/// downward from here, each new mapping placed below the lowest existing
/// one in the process.
pub const SHM_CEILING: usize = KERN_BASE - PAGE_SIZE;
