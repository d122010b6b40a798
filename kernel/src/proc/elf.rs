//! ELF executable format.

use dataview::Pod;

/// `"\x7fELF"` in little endian.
pub const ELF_MAGIC: u32 = 0x464C_457F;

/// A loadable program segment.
pub const ELF_PROG_LOAD: u32 = 1;

/// Segment flag bits.
pub const ELF_PROG_FLAG_EXEC: u32 = 1;
pub const ELF_PROG_FLAG_WRITE: u32 = 2;

/// ELF64 file header.
#[derive(Debug, Clone, Pod)]
#[repr(C)]
pub struct ElfHeader {
    pub magic: u32,
    pub elf: [u8; 12],
    pub ty: u16,
    pub machine: u16,
    pub version: u32,
    pub entry: u64,
    pub phoff: u64,
    pub shoff: u64,
    pub flags: u32,
    pub ehsize: u16,
    pub phentsize: u16,
    pub phnum: u16,
    pub shentsize: u16,
    pub shnum: u16,
    pub shstrndx: u16,
}

/// ELF64 program header.
#[derive(Debug, Clone, Pod)]
#[repr(C)]
pub struct ProgramHeader {
    pub ty: u32,
    pub flags: u32,
    pub off: u64,
    pub vaddr: u64,
    pub paddr: u64,
    pub filesz: u64,
    pub memsz: u64,
    pub align: u64,
}
