//! A process's user address space.

use alloc::sync::Arc;

use dataview::{Pod, PodMethods as _};

use super::{
    PAGE_SIZE, PageRound as _, PhysMemory, PhysPageNum, VirtAddr, VirtPageNum,
    addr::page_chunks,
    page_table::{PageTable, PtEntryFlags},
};
use crate::error::KernelError;

/// A user page table plus the size of the program image it maps.
///
/// The process image occupies `[0, size)` and its frames are owned by this
/// table: they are allocated by [`grow_to`] and freed by [`shrink_to`] and
/// `Drop`. Shared-memory segments are mapped above the image through
/// [`map_shared`]; their frames belong to the shared-memory registry and
/// are never freed here.
///
/// [`grow_to`]: UserPageTable::grow_to
/// [`shrink_to`]: UserPageTable::shrink_to
/// [`map_shared`]: UserPageTable::map_shared
pub struct UserPageTable {
    phys: Arc<PhysMemory>,
    pt: PageTable,
    size: usize,
}

impl UserPageTable {
    /// Creates an empty address space.
    #[must_use]
    pub fn new(phys: Arc<PhysMemory>) -> Self {
        Self {
            phys,
            pt: PageTable::new(),
            size: 0,
        }
    }

    /// Returns the program image size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Allocates frames and PTEs to grow the image to `new_size` bytes,
    /// which need not be page-aligned. The new pages are zeroed, user
    /// accessible, and carry `xperm` in addition.
    pub fn grow_to(&mut self, new_size: usize, xperm: PtEntryFlags) -> Result<(), KernelError> {
        if new_size <= self.size {
            return Ok(());
        }
        let old_size = self.size;

        let mut va = self.size.page_roundup();
        while va < new_size {
            let res = VirtAddr::new(va).and_then(|va| {
                let ppn = self.phys.alloc_zeroed()?;
                Ok((va, ppn))
            });
            let (page, ppn) = match res {
                Ok(v) => v,
                Err(e) => {
                    self.shrink_to(old_size);
                    return Err(e);
                }
            };
            self.pt.map_page(page, ppn, xperm | PtEntryFlags::U);
            self.size = va + PAGE_SIZE;
            va += PAGE_SIZE;
        }
        self.size = new_size;
        Ok(())
    }

    /// Frees frames and PTEs to shrink the image to `new_size` bytes.
    pub fn shrink_to(&mut self, new_size: usize) {
        if new_size >= self.size {
            return;
        }
        let start = VirtPageNum::new(new_size.page_roundup() / PAGE_SIZE);
        let end = VirtPageNum::new(self.size.page_roundup() / PAGE_SIZE);
        for vpn in start.value()..end.value() {
            let entry = self.pt.unmap_page(VirtPageNum::new(vpn).addr());
            self.phys.free(entry.ppn());
        }
        self.size = new_size;
    }

    /// Copies this image into `target`, allocating fresh frames.
    ///
    /// Only the program image is cloned; shared-memory mappings are
    /// re-established by the shared-memory registry on fork.
    pub fn try_clone_into(&self, target: &mut Self) -> Result<(), KernelError> {
        target.shrink_to(0);

        let res = (|| {
            let end = VirtPageNum::new(self.size.page_roundup() / PAGE_SIZE);
            for (vpn, entry) in self.pt.mappings_in(VirtPageNum::new(0), end) {
                let ppn = target.phys.alloc()?;
                let src = self.phys.frame(entry.ppn());
                target.phys.frame(ppn).copy_from_slice(&*src);
                drop(src);
                target.pt.map_page(vpn.addr(), ppn, entry.flags());
                target.size = vpn.addr().addr() + PAGE_SIZE;
            }
            target.size = self.size;
            Ok(())
        })();

        if res.is_err() {
            target.shrink_to(0);
        }
        res
    }

    /// Marks the page holding `va` inaccessible to user code.
    ///
    /// Used by exec for the stack guard page.
    pub fn forbid_user_access(&mut self, va: VirtAddr) {
        let entry = self.pt.entry(va.page_num()).expect("guard page unmapped");
        self.pt
            .update_flags(va.page_num(), entry.flags() - PtEntryFlags::U);
    }

    /// Maps `pages` starting at page-aligned `va`, on behalf of the
    /// shared-memory registry. The frames stay owned by the registry.
    pub fn map_shared(&mut self, va: VirtAddr, pages: &[PhysPageNum], flags: PtEntryFlags) {
        for (i, ppn) in pages.iter().enumerate() {
            let va = va.byte_add(i * PAGE_SIZE).unwrap();
            self.pt.map_page(va, *ppn, flags | PtEntryFlags::U);
        }
    }

    /// Removes `npages` mappings starting at `va` without freeing frames.
    pub fn unmap_shared(&mut self, va: VirtAddr, npages: usize) {
        for i in 0..npages {
            let va = va.byte_add(i * PAGE_SIZE).unwrap();
            self.pt.unmap_page(va);
        }
    }

    /// Returns the mapping for the page holding `va`, if present.
    #[must_use]
    pub fn mapped_page(&self, va: VirtAddr) -> Option<(PhysPageNum, PtEntryFlags)> {
        let entry = self.pt.entry(va.page_num())?;
        Some((entry.ppn(), entry.flags()))
    }

    /// Checks that `[va, va + len)` is user accessible, with write
    /// permission if `write` is set.
    pub fn validate(&self, va: VirtAddr, len: usize, write: bool) -> Result<(), KernelError> {
        let mut required = PtEntryFlags::U;
        if write {
            required |= PtEntryFlags::W;
        }
        for chunk in page_chunks(va, len)? {
            self.pt.translate(chunk.page, required)?;
        }
        Ok(())
    }

    /// Copies `src` into user memory at `va`.
    pub fn copy_out_bytes(&self, va: VirtAddr, src: &[u8]) -> Result<(), KernelError> {
        self.write_bytes(va, src, PtEntryFlags::U | PtEntryFlags::W)
    }

    /// Copies kernel bytes into a mapping regardless of user permissions.
    ///
    /// Exec uses this to fill freshly built images whose text pages are not
    /// user-writable.
    pub(crate) fn write_kernel(&self, va: VirtAddr, src: &[u8]) -> Result<(), KernelError> {
        self.write_bytes(va, src, PtEntryFlags::empty())
    }

    fn write_bytes(
        &self,
        va: VirtAddr,
        src: &[u8],
        required: PtEntryFlags,
    ) -> Result<(), KernelError> {
        let mut copied = 0;
        for chunk in page_chunks(va, src.len())? {
            let (ppn, _) = self.pt.translate(chunk.page, required)?;
            let mut frame = self.phys.frame(ppn);
            frame[chunk.offset..chunk.offset + chunk.len]
                .copy_from_slice(&src[copied..copied + chunk.len]);
            copied += chunk.len;
        }
        Ok(())
    }

    /// Copies user memory at `va` into `dst`.
    pub fn copy_in_bytes(&self, dst: &mut [u8], va: VirtAddr) -> Result<(), KernelError> {
        let mut copied = 0;
        for chunk in page_chunks(va, dst.len())? {
            let (ppn, _) = self.pt.translate(chunk.page, PtEntryFlags::U)?;
            let frame = self.phys.frame(ppn);
            dst[copied..copied + chunk.len]
                .copy_from_slice(&frame[chunk.offset..chunk.offset + chunk.len]);
            copied += chunk.len;
        }
        Ok(())
    }

    /// Copies a value into user memory at `va`.
    pub fn copy_out<T: Pod>(&self, va: VirtAddr, value: &T) -> Result<(), KernelError> {
        self.copy_out_bytes(va, value.as_bytes())
    }

    /// Copies a value out of user memory at `va`.
    pub fn copy_in<T: Pod>(&self, va: VirtAddr) -> Result<T, KernelError> {
        let mut value = T::zeroed();
        self.copy_in_bytes(value.as_bytes_mut(), va)?;
        Ok(value)
    }

    /// Fetches a NUL-terminated string starting at `va` into `buf`.
    ///
    /// Returns the string bytes without the terminator. Fails if the string
    /// does not terminate within `buf.len()` bytes or leaves the mapped
    /// user range.
    pub fn fetch_str<'buf>(
        &self,
        va: VirtAddr,
        buf: &'buf mut [u8],
    ) -> Result<&'buf [u8], KernelError> {
        let mut copied = 0;
        let max = usize::min(buf.len(), KERNEL_STR_SCAN_MAX);
        let mut addr = va;
        while copied < max {
            let (ppn, offset) = self.pt.translate(addr, PtEntryFlags::U)?;
            let frame = self.phys.frame(ppn);
            let avail = usize::min(PAGE_SIZE - offset, max - copied);
            let bytes = &frame[offset..offset + avail];
            if let Some(nul) = memchr::memchr(0, bytes) {
                buf[copied..copied + nul].copy_from_slice(&bytes[..nul]);
                copied += nul;
                return Ok(&buf[..copied]);
            }
            buf[copied..copied + avail].copy_from_slice(bytes);
            copied += avail;
            drop(frame);
            addr = addr.byte_add(avail)?;
        }
        Err(KernelError::StringTooLong)
    }
}

/// Upper bound on string scanning, defensive against huge caller buffers.
const KERNEL_STR_SCAN_MAX: usize = 4 * PAGE_SIZE;

impl Drop for UserPageTable {
    fn drop(&mut self) {
        self.shrink_to(0);
    }
}

/// Destination of a file read: user memory or a kernel buffer.
pub enum DataDst<'a> {
    User { pt: &'a UserPageTable, va: VirtAddr },
    Kernel(&'a mut [u8]),
}

impl DataDst<'_> {
    /// Writes `src` at byte `offset` from the destination start.
    pub fn write(&mut self, offset: usize, src: &[u8]) -> Result<(), KernelError> {
        match self {
            Self::User { pt, va } => pt.copy_out_bytes(va.byte_add(offset)?, src),
            Self::Kernel(buf) => {
                buf[offset..offset + src.len()].copy_from_slice(src);
                Ok(())
            }
        }
    }
}

/// Source of a file write: user memory or a kernel buffer.
pub enum DataSrc<'a> {
    User { pt: &'a UserPageTable, va: VirtAddr },
    Kernel(&'a [u8]),
}

impl DataSrc<'_> {
    /// Reads `dst.len()` bytes at byte `offset` from the source start.
    pub fn read(&self, offset: usize, dst: &mut [u8]) -> Result<(), KernelError> {
        match self {
            Self::User { pt, va } => pt.copy_in_bytes(dst, va.byte_add(offset)?),
            Self::Kernel(buf) => {
                dst.copy_from_slice(&buf[offset..offset + dst.len()]);
                Ok(())
            }
        }
    }
}
