//! The per-process page table.
//!
//! The table maps user virtual pages to physical frames with permission
//! bits, honoring the contract of a hardware walker (map, unmap, translate
//! with a required permission). The radix layout of a real MMU tree is not
//! modeled; an ordered map keeps the same observable behavior.

use alloc::collections::BTreeMap;

use bitflags::bitflags;

use super::{PhysPageNum, VirtAddr, VirtPageNum};
use crate::error::KernelError;

bitflags! {
    /// Page-table entry permission bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PtEntryFlags: u32 {
        /// Entry is present.
        const P = 1 << 0;
        /// Page is writable.
        const W = 1 << 1;
        /// Page is accessible to user code.
        const U = 1 << 2;
    }
}

/// One present page-table entry.
#[derive(Debug, Clone, Copy)]
pub struct PtEntry {
    ppn: PhysPageNum,
    flags: PtEntryFlags,
}

impl PtEntry {
    #[must_use]
    pub fn ppn(&self) -> PhysPageNum {
        self.ppn
    }

    #[must_use]
    pub fn flags(&self) -> PtEntryFlags {
        self.flags
    }
}

pub struct PageTable {
    entries: BTreeMap<VirtPageNum, PtEntry>,
}

impl PageTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Installs a mapping for the page holding `va`.
    ///
    /// # Panics
    ///
    /// Panics if `va` is not page-aligned or the page is already mapped;
    /// both indicate kernel bugs, not user errors.
    pub fn map_page(&mut self, va: VirtAddr, ppn: PhysPageNum, flags: PtEntryFlags) {
        assert!(va.is_page_aligned(), "map_page: unaligned va {va}");
        let prev = self.entries.insert(
            va.page_num(),
            PtEntry {
                ppn,
                flags: flags | PtEntryFlags::P,
            },
        );
        assert!(prev.is_none(), "map_page: remap of {va}");
    }

    /// Removes the mapping for the page holding `va`, returning it.
    ///
    /// # Panics
    ///
    /// Panics if the page is not mapped.
    pub fn unmap_page(&mut self, va: VirtAddr) -> PtEntry {
        self.entries
            .remove(&va.page_num())
            .unwrap_or_else(|| panic!("unmap_page: {va} not mapped"))
    }

    #[must_use]
    pub fn entry(&self, vpn: VirtPageNum) -> Option<PtEntry> {
        self.entries.get(&vpn).copied()
    }

    /// Resolves `va` to a frame and page offset, requiring every bit of
    /// `required` to be set on the entry.
    pub fn translate(
        &self,
        va: VirtAddr,
        required: PtEntryFlags,
    ) -> Result<(PhysPageNum, usize), KernelError> {
        let entry = self
            .entry(va.page_num())
            .ok_or(KernelError::VirtualPageNotMapped(va))?;
        if !entry.flags.contains(required) {
            return Err(KernelError::InaccessiblePage(va));
        }
        Ok((entry.ppn, va.page_offset()))
    }

    /// Replaces the flags of an existing entry.
    pub fn update_flags(&mut self, vpn: VirtPageNum, flags: PtEntryFlags) {
        let entry = self.entries.get_mut(&vpn).expect("update of unmapped page");
        entry.flags = flags | PtEntryFlags::P;
    }

    /// Iterates the present mappings in `[start, end)`, in address order.
    pub fn mappings_in(
        &self,
        start: VirtPageNum,
        end: VirtPageNum,
    ) -> impl Iterator<Item = (VirtPageNum, PtEntry)> + '_ {
        self.entries.range(start..end).map(|(vpn, e)| (*vpn, *e))
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}
