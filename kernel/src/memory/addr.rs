use derive_more::Display;

use crate::{error::KernelError, memory::layout::KERN_BASE};

/// Bytes per page.
pub const PAGE_SIZE: usize = 4096;

/// Page rounding helpers for raw sizes and addresses.
pub trait PageRound {
    #[must_use]
    fn page_roundup(self) -> Self;
    #[must_use]
    fn page_rounddown(self) -> Self;
    fn is_page_aligned(&self) -> bool;
}

impl PageRound for usize {
    fn page_roundup(self) -> Self {
        (self + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
    }

    fn page_rounddown(self) -> Self {
        self & !(PAGE_SIZE - 1)
    }

    fn is_page_aligned(&self) -> bool {
        self % PAGE_SIZE == 0
    }
}

/// A user virtual address.
///
/// User addresses live in `[0, KERN_BASE)`; the upper half belongs to the
/// kernel and is never mapped for user processes.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[display("{_0:#x}")]
pub struct VirtAddr(usize);

impl VirtAddr {
    pub const MIN: Self = Self(0);

    pub const fn new(addr: usize) -> Result<Self, KernelError> {
        if addr > KERN_BASE {
            return Err(KernelError::TooLargeVirtualAddress(addr));
        }
        Ok(Self(addr))
    }

    #[must_use]
    pub const fn addr(self) -> usize {
        self.0
    }

    pub fn byte_add(self, n: usize) -> Result<Self, KernelError> {
        let addr = self
            .0
            .checked_add(n)
            .ok_or(KernelError::VirtualAddressOverflow)?;
        Self::new(addr)
    }

    #[must_use]
    pub fn page_rounddown(self) -> Self {
        Self(self.0.page_rounddown())
    }

    #[must_use]
    pub fn page_offset(self) -> usize {
        self.0 % PAGE_SIZE
    }

    #[must_use]
    pub fn page_num(self) -> VirtPageNum {
        VirtPageNum(self.0 / PAGE_SIZE)
    }

    #[must_use]
    pub fn is_page_aligned(self) -> bool {
        self.0.is_page_aligned()
    }
}

/// A user virtual page number.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[display("{_0:#x}")]
pub struct VirtPageNum(usize);

impl VirtPageNum {
    #[must_use]
    pub const fn new(n: usize) -> Self {
        Self(n)
    }

    #[must_use]
    pub const fn value(self) -> usize {
        self.0
    }

    #[must_use]
    pub const fn addr(self) -> VirtAddr {
        VirtAddr(self.0 * PAGE_SIZE)
    }
}

/// A physical page frame number, an index into [`PhysMemory`].
///
/// [`PhysMemory`]: crate::memory::PhysMemory
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[display("{_0:#x}")]
pub struct PhysPageNum(usize);

impl PhysPageNum {
    #[must_use]
    pub const fn new(n: usize) -> Self {
        Self(n)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// One page-bounded piece of a virtual byte range.
#[derive(Debug, Clone, Copy)]
pub struct PageChunk {
    pub page: VirtAddr,
    pub offset: usize,
    pub len: usize,
}

/// Splits `[va, va + len)` into page-bounded chunks.
pub fn page_chunks(
    va: VirtAddr,
    len: usize,
) -> Result<impl Iterator<Item = PageChunk>, KernelError> {
    // Force a range check up front so iteration cannot overflow.
    let _ = va.byte_add(len)?;
    let mut addr = va.addr();
    let end = addr + len;
    Ok(core::iter::from_fn(move || {
        if addr >= end {
            return None;
        }
        let offset = addr % PAGE_SIZE;
        let len = usize::min(PAGE_SIZE - offset, end - addr);
        let chunk = PageChunk {
            page: VirtAddr(addr.page_rounddown()),
            offset,
            len,
        };
        addr += len;
        Some(chunk)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        assert_eq!(0_usize.page_roundup(), 0);
        assert_eq!(1_usize.page_roundup(), PAGE_SIZE);
        assert_eq!(PAGE_SIZE.page_roundup(), PAGE_SIZE);
        assert_eq!((PAGE_SIZE + 1).page_rounddown(), PAGE_SIZE);
    }

    #[test]
    fn chunking_spans_pages() {
        let va = VirtAddr::new(PAGE_SIZE - 16).unwrap();
        let chunks: Vec<_> = page_chunks(va, 32).unwrap().collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].offset, PAGE_SIZE - 16);
        assert_eq!(chunks[0].len, 16);
        assert_eq!(chunks[1].offset, 0);
        assert_eq!(chunks[1].len, 16);
    }

    #[test]
    fn address_bounds() {
        assert!(VirtAddr::new(KERN_BASE).is_ok());
        assert!(VirtAddr::new(KERN_BASE + 1).is_err());
        let va = VirtAddr::new(KERN_BASE - 8).unwrap();
        assert!(va.byte_add(8).is_ok());
        assert!(va.byte_add(16).is_err());
    }
}
