//! Named shared-memory objects.
//!
//! A shared-memory object is a named, page-granular, reference-counted
//! region of physical memory that multiple processes may map. The
//! system-wide table holds `NSHM` slots; each process records which
//! objects it has opened (and where each is mapped) in a fixed table of
//! `NSHM_PROC` attachments.
//!
//! One spin lock serializes every operation: it is held across all table
//! mutations and the page-table edits they imply. Nothing here touches
//! inodes or the journal, so no other lock is ever taken inside it
//! (frame allocation uses the allocator's own short-lived lock).
//!
//! Lifecycle: [`open`] attaches to a segment by name, creating it in a
//! free slot on first use; [`trunc`] gives a fresh segment its one-shot
//! size and zeroed backing pages; [`map`] installs the pages into the
//! caller's address space; [`close`] detaches, unmapping and, on the last
//! detach system-wide, freeing the backing pages and recycling the slot.
//! Fork inherits every live attachment via [`inherit`]; exit closes them
//! via [`close_all`].
//!
//! [`open`]: ShmTable::open
//! [`trunc`]: ShmTable::trunc
//! [`map`]: ShmTable::map
//! [`close`]: ShmTable::close
//! [`inherit`]: ShmTable::inherit
//! [`close_all`]: ShmTable::close_all

use alloc::sync::Arc;

use arrayvec::ArrayVec;
use sv6_syscall::OpenFlags;

use crate::{
    error::KernelError,
    memory::{
        PAGE_SIZE, PageRound as _, PhysMemory, PhysPageNum, PtEntryFlags, UserPageTable, VirtAddr,
        layout::SHM_CEILING,
    },
    param::{NSHM, NSHM_PROC, SHM_MAX_PAGES, SHM_NAME_MAX},
    sync::{SpinLock, SpinLockGuard},
};

/// One process's record of an opened shared-memory object.
#[derive(Debug, Clone)]
pub struct ShmAttachment {
    /// Index into the system-wide table.
    handle: usize,
    /// Base of the mapping, once [`ShmTable::map`] has run.
    va: Option<VirtAddr>,
    /// Flags the mapping was requested with.
    flags: OpenFlags,
}

/// A process's attachment table.
pub type ShmAttachments = [Option<ShmAttachment>; NSHM_PROC];

struct ShmObject {
    name: ArrayVec<u8, SHM_NAME_MAX>,
    /// Byte size, a multiple of the page size; 0 means unsized.
    size: usize,
    pages: ArrayVec<PhysPageNum, SHM_MAX_PAGES>,
    /// Number of attachments across all processes.
    process_count: usize,
}

impl ShmObject {
    const fn empty() -> Self {
        Self {
            name: ArrayVec::new_const(),
            size: 0,
            pages: ArrayVec::new_const(),
            process_count: 0,
        }
    }

    fn npages(&self) -> usize {
        self.size / PAGE_SIZE
    }
}

/// The system-wide shared-memory registry.
pub struct ShmTable {
    phys: Arc<PhysMemory>,
    slots: SpinLock<[ShmObject; NSHM]>,
}

impl ShmTable {
    #[must_use]
    pub fn new(phys: Arc<PhysMemory>) -> Self {
        Self {
            phys,
            slots: SpinLock::new([const { ShmObject::empty() }; NSHM]),
        }
    }

    fn check_handle(handle: usize) -> Result<(), KernelError> {
        if handle >= NSHM {
            return Err(KernelError::ShmBadHandle(handle));
        }
        Ok(())
    }

    /// Attaches the calling process to the object named `name`, creating
    /// it in a free slot if no object has that name.
    ///
    /// Attaching only reserves the handle; sizing and mapping are separate
    /// steps. A process may open the same name more than once; each open
    /// consumes an attachment entry and counts toward the object's
    /// process count.
    pub fn open(&self, oshm: &mut ShmAttachments, name: &[u8]) -> Result<usize, KernelError> {
        if name.is_empty() || name.len() >= SHM_NAME_MAX {
            return Err(KernelError::ShmNameTooLong);
        }

        let mut slots = self.slots.lock();

        let found = slots
            .iter()
            .position(|s| s.process_count > 0 && s.name.as_slice() == name);

        let Some(free) = oshm.iter().position(Option::is_none) else {
            return Err(KernelError::NoFreeShmAttachment);
        };

        let handle = match found {
            Some(handle) => handle,
            None => {
                let handle = slots
                    .iter()
                    .position(|s| s.process_count == 0)
                    .ok_or(KernelError::NoFreeShmSlot)?;
                let slot = &mut slots[handle];
                slot.name.clear();
                slot.name.try_extend_from_slice(name).unwrap();
                slot.size = 0;
                handle
            }
        };

        slots[handle].process_count += 1;
        oshm[free] = Some(ShmAttachment {
            handle,
            va: None,
            flags: OpenFlags::empty(),
        });
        Ok(handle)
    }

    /// Gives an unsized object its backing: `size` bytes rounded up to
    /// whole pages, zero-filled. Sizing is one-shot; a sized object
    /// cannot be truncated again.
    ///
    /// Returns the rounded size. A requested size of zero rounds to zero
    /// and allocates nothing.
    pub fn trunc(&self, handle: usize, size: usize) -> Result<usize, KernelError> {
        Self::check_handle(handle)?;

        let mut slots = self.slots.lock();
        let slot = &mut slots[handle];
        if slot.process_count == 0 {
            return Err(KernelError::ShmNotAttached);
        }
        if slot.size != 0 {
            return Err(KernelError::ShmAlreadySized);
        }

        let rounded = size.page_roundup();
        let npages = rounded / PAGE_SIZE;
        if npages > SHM_MAX_PAGES {
            return Err(KernelError::ShmTooLarge);
        }

        for _ in 0..npages {
            match self.phys.alloc_zeroed() {
                Ok(ppn) => slot.pages.push(ppn),
                Err(e) => {
                    for ppn in slot.pages.drain(..) {
                        self.phys.free(ppn);
                    }
                    return Err(e);
                }
            }
        }
        slot.size = rounded;
        Ok(rounded)
    }

    /// Maps an attached, sized object into the calling process.
    ///
    /// The segment is placed just below the lowest shared mapping the
    /// process already has (starting from the top of the user half), so
    /// segments pack downward deterministically. The mapping is user
    /// accessible, and writable iff `flags` requests read-write.
    ///
    /// Returns the chosen base address.
    pub fn map(
        &self,
        oshm: &mut ShmAttachments,
        pt: &mut UserPageTable,
        handle: usize,
        flags: OpenFlags,
    ) -> Result<VirtAddr, KernelError> {
        Self::check_handle(handle)?;

        let slots = self.slots.lock();
        let slot = &slots[handle];
        if slot.size == 0 {
            return Err(KernelError::ShmNotSized);
        }

        let entry_idx = oshm
            .iter()
            .position(|e| e.as_ref().is_some_and(|e| e.handle == handle))
            .ok_or(KernelError::ShmNotAttached)?;
        if oshm[entry_idx].as_ref().unwrap().va.is_some() {
            return Err(KernelError::ShmAlreadyMapped);
        }

        // Pack below the lowest existing shared mapping.
        let mut floor = SHM_CEILING;
        for entry in oshm.iter().flatten() {
            if let Some(va) = entry.va {
                floor = usize::min(floor, va.addr());
            }
        }
        let base = floor
            .checked_sub(slot.size)
            .ok_or(KernelError::ShmAddressSpaceExhausted)?
            .page_rounddown();
        if base < pt.size() {
            // Would overlap the program image.
            return Err(KernelError::ShmAddressSpaceExhausted);
        }
        let base = VirtAddr::new(base)?;

        let mut perm = PtEntryFlags::U;
        if flags.contains(OpenFlags::READ_WRITE) {
            perm |= PtEntryFlags::W;
        }
        pt.map_shared(base, &slot.pages, perm);

        let entry = oshm[entry_idx].as_mut().unwrap();
        entry.va = Some(base);
        entry.flags = flags;
        Ok(base)
    }

    /// Detaches the calling process's first attachment for `handle`,
    /// unmapping it if mapped. The last detach system-wide frees the
    /// backing pages and recycles the slot for a fresh name.
    pub fn close(
        &self,
        oshm: &mut ShmAttachments,
        pt: &mut UserPageTable,
        handle: usize,
    ) -> Result<(), KernelError> {
        Self::check_handle(handle)?;

        let mut slots = self.slots.lock();
        if slots[handle].process_count == 0 {
            return Err(KernelError::ShmNotAttached);
        }

        let entry_idx = oshm
            .iter()
            .position(|e| e.as_ref().is_some_and(|e| e.handle == handle))
            .ok_or(KernelError::ShmNotAttached)?;

        Self::close_entry(&self.phys, &mut slots, oshm, pt, entry_idx);
        Ok(())
    }

    fn close_entry(
        phys: &PhysMemory,
        slots: &mut SpinLockGuard<'_, [ShmObject; NSHM]>,
        oshm: &mut ShmAttachments,
        pt: &mut UserPageTable,
        entry_idx: usize,
    ) {
        let entry = oshm[entry_idx].take().unwrap();
        let slot = &mut slots[entry.handle];

        if let Some(va) = entry.va {
            pt.unmap_shared(va, slot.npages());
        }

        slot.process_count -= 1;
        if slot.process_count == 0 {
            for ppn in slot.pages.drain(..) {
                phys.free(ppn);
            }
            slot.size = 0;
            slot.name.clear();
        }
    }

    /// Copies every live attachment of a forking parent into its child:
    /// same handles, same addresses, same physical pages. The pages are
    /// shared, not copied.
    pub fn inherit(
        &self,
        parent: &ShmAttachments,
        child_oshm: &mut ShmAttachments,
        child_pt: &mut UserPageTable,
    ) {
        let mut slots = self.slots.lock();

        for (i, entry) in parent.iter().enumerate() {
            let Some(entry) = entry else { continue };
            let slot = &mut slots[entry.handle];
            slot.process_count += 1;

            if let Some(va) = entry.va {
                let mut perm = PtEntryFlags::U;
                if entry.flags.contains(OpenFlags::READ_WRITE) {
                    perm |= PtEntryFlags::W;
                }
                child_pt.map_shared(va, &slot.pages, perm);
            }
            child_oshm[i] = Some(entry.clone());
        }
    }

    /// Detaches everything; called when a process exits.
    pub fn close_all(&self, oshm: &mut ShmAttachments, pt: &mut UserPageTable) {
        let mut slots = self.slots.lock();
        for entry_idx in 0..NSHM_PROC {
            if oshm[entry_idx].is_some() {
                Self::close_entry(&self.phys, &mut slots, oshm, pt, entry_idx);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY: Option<ShmAttachment> = None;

    struct Fixture {
        shm: ShmTable,
        phys: Arc<PhysMemory>,
    }

    impl Fixture {
        fn new() -> Self {
            let phys = Arc::new(PhysMemory::new(64));
            Self {
                shm: ShmTable::new(Arc::clone(&phys)),
                phys,
            }
        }

        fn pt(&self) -> UserPageTable {
            UserPageTable::new(Arc::clone(&self.phys))
        }
    }

    fn attachment_count(shm: &ShmTable, handle: usize) -> usize {
        shm.slots.lock()[handle].process_count
    }

    #[test]
    fn open_creates_then_finds() {
        let f = Fixture::new();
        let mut oshm_a: ShmAttachments = [EMPTY; NSHM_PROC];
        let mut oshm_b: ShmAttachments = [EMPTY; NSHM_PROC];

        let h = f.shm.open(&mut oshm_a, b"segment").unwrap();
        assert_eq!(f.shm.open(&mut oshm_b, b"segment").unwrap(), h);
        assert_eq!(attachment_count(&f.shm, h), 2);

        // A different name lands in a different slot.
        let h2 = f.shm.open(&mut oshm_a, b"other").unwrap();
        assert_ne!(h, h2);
    }

    #[test]
    fn open_same_name_twice_same_process() {
        let f = Fixture::new();
        let mut oshm: ShmAttachments = [EMPTY; NSHM_PROC];

        let h1 = f.shm.open(&mut oshm, b"x").unwrap();
        let h2 = f.shm.open(&mut oshm, b"x").unwrap();
        assert_eq!(h1, h2);
        // Both attachments are recorded, and both count.
        assert_eq!(oshm.iter().flatten().count(), 2);
        assert_eq!(attachment_count(&f.shm, h1), 2);
    }

    #[test]
    fn attachment_table_exhaustion() {
        let f = Fixture::new();
        let mut oshm: ShmAttachments = [EMPTY; NSHM_PROC];
        for i in 0..NSHM_PROC {
            let name = [b'a' + u8::try_from(i).unwrap()];
            f.shm.open(&mut oshm, &name).unwrap();
        }
        assert_eq!(
            f.shm.open(&mut oshm, b"one-more").unwrap_err(),
            KernelError::NoFreeShmAttachment
        );
    }

    #[test]
    fn trunc_is_one_shot_and_rounds() {
        let f = Fixture::new();
        let mut oshm: ShmAttachments = [EMPTY; NSHM_PROC];
        let h = f.shm.open(&mut oshm, b"seg").unwrap();

        let free_before = f.phys.free_frames();
        assert_eq!(f.shm.trunc(h, 5000).unwrap(), 2 * PAGE_SIZE);
        assert_eq!(f.phys.free_frames(), free_before - 2);
        assert_eq!(
            f.shm.trunc(h, PAGE_SIZE).unwrap_err(),
            KernelError::ShmAlreadySized
        );
    }

    #[test]
    fn trunc_zero_allocates_nothing() {
        let f = Fixture::new();
        let mut oshm: ShmAttachments = [EMPTY; NSHM_PROC];
        let h = f.shm.open(&mut oshm, b"seg").unwrap();

        let free_before = f.phys.free_frames();
        assert_eq!(f.shm.trunc(h, 0).unwrap(), 0);
        assert_eq!(f.phys.free_frames(), free_before);
    }

    #[test]
    fn trunc_guards() {
        let f = Fixture::new();
        assert_eq!(
            f.shm.trunc(NSHM, 100).unwrap_err(),
            KernelError::ShmBadHandle(NSHM)
        );
        assert_eq!(f.shm.trunc(0, 100).unwrap_err(), KernelError::ShmNotAttached);

        let mut oshm: ShmAttachments = [EMPTY; NSHM_PROC];
        let h = f.shm.open(&mut oshm, b"seg").unwrap();
        assert_eq!(
            f.shm
                .trunc(h, (SHM_MAX_PAGES + 1) * PAGE_SIZE)
                .unwrap_err(),
            KernelError::ShmTooLarge
        );
    }

    #[test]
    fn map_packs_downward() {
        let f = Fixture::new();
        let mut oshm: ShmAttachments = [EMPTY; NSHM_PROC];
        let mut pt = f.pt();

        let h1 = f.shm.open(&mut oshm, b"a").unwrap();
        let h2 = f.shm.open(&mut oshm, b"b").unwrap();
        f.shm.trunc(h1, 2 * PAGE_SIZE).unwrap();
        f.shm.trunc(h2, PAGE_SIZE).unwrap();

        let va1 = f.shm.map(&mut oshm, &mut pt, h1, OpenFlags::READ_WRITE).unwrap();
        let va2 = f.shm.map(&mut oshm, &mut pt, h2, OpenFlags::READ_ONLY).unwrap();

        assert_eq!(va1.addr(), SHM_CEILING - 2 * PAGE_SIZE);
        assert_eq!(va2.addr(), va1.addr() - PAGE_SIZE);

        // Mapped with U always, W only for read-write.
        let (_, flags1) = pt.mapped_page(va1).unwrap();
        assert!(flags1.contains(PtEntryFlags::U | PtEntryFlags::W));
        let (_, flags2) = pt.mapped_page(va2).unwrap();
        assert!(flags2.contains(PtEntryFlags::U));
        assert!(!flags2.contains(PtEntryFlags::W));

        f.shm.close_all(&mut oshm, &mut pt);
    }

    #[test]
    fn map_requires_size_and_attachment() {
        let f = Fixture::new();
        let mut oshm: ShmAttachments = [EMPTY; NSHM_PROC];
        let mut other: ShmAttachments = [EMPTY; NSHM_PROC];
        let mut pt = f.pt();

        let h = f.shm.open(&mut oshm, b"seg").unwrap();
        assert_eq!(
            f.shm
                .map(&mut oshm, &mut pt, h, OpenFlags::READ_WRITE)
                .unwrap_err(),
            KernelError::ShmNotSized
        );

        f.shm.trunc(h, PAGE_SIZE).unwrap();
        // A process that never opened the segment cannot map it.
        assert_eq!(
            f.shm
                .map(&mut other, &mut pt, h, OpenFlags::READ_WRITE)
                .unwrap_err(),
            KernelError::ShmNotAttached
        );

        let va = f.shm.map(&mut oshm, &mut pt, h, OpenFlags::READ_WRITE).unwrap();
        assert_eq!(
            f.shm
                .map(&mut oshm, &mut pt, h, OpenFlags::READ_WRITE)
                .unwrap_err(),
            KernelError::ShmAlreadyMapped
        );

        f.shm.close(&mut oshm, &mut pt, h).unwrap();
        let _ = va;
    }

    #[test]
    fn close_frees_on_last_detach() {
        let f = Fixture::new();
        let mut oshm_a: ShmAttachments = [EMPTY; NSHM_PROC];
        let mut oshm_b: ShmAttachments = [EMPTY; NSHM_PROC];
        let mut pt_a = f.pt();
        let mut pt_b = f.pt();

        let h = f.shm.open(&mut oshm_a, b"seg").unwrap();
        f.shm.open(&mut oshm_b, b"seg").unwrap();
        f.shm.trunc(h, PAGE_SIZE).unwrap();
        let free_after_trunc = f.phys.free_frames();

        let va = f.shm.map(&mut oshm_a, &mut pt_a, h, OpenFlags::READ_WRITE).unwrap();

        f.shm.close(&mut oshm_a, &mut pt_a, h).unwrap();
        // The other process still holds it: pages stay.
        assert_eq!(f.phys.free_frames(), free_after_trunc);
        assert!(pt_a.mapped_page(va).is_none());

        f.shm.close(&mut oshm_b, &mut pt_b, h).unwrap();
        assert_eq!(f.phys.free_frames(), free_after_trunc + 1);

        // The slot is reusable under a different name.
        let h2 = f.shm.open(&mut oshm_a, b"fresh").unwrap();
        assert_eq!(h2, h);

        // Stale handles now fail.
        assert_eq!(
            f.shm.close(&mut oshm_b, &mut pt_b, h).unwrap_err(),
            KernelError::ShmNotAttached
        );
    }

    #[test]
    fn attachment_counts_match_process_count() {
        // The sum over all attachment tables of entries naming a slot
        // always equals the slot's process count.
        let f = Fixture::new();
        let mut tables: Vec<ShmAttachments> = vec![[EMPTY; NSHM_PROC]; 3];
        let mut pts: Vec<_> = (0..3).map(|_| f.pt()).collect();

        let mut h = 0;
        for t in &mut tables {
            h = f.shm.open(t, b"shared").unwrap();
        }
        let count = |tables: &[ShmAttachments]| {
            tables
                .iter()
                .flat_map(|t| t.iter().flatten())
                .filter(|e| e.handle == h)
                .count()
        };
        assert_eq!(count(&tables), attachment_count(&f.shm, h));

        f.shm.close(&mut tables[1], &mut pts[1], h).unwrap();
        assert_eq!(count(&tables), attachment_count(&f.shm, h));
        assert_eq!(attachment_count(&f.shm, h), 2);
    }

    #[test]
    fn inherit_shares_pages_and_counts() {
        let f = Fixture::new();
        let mut parent: ShmAttachments = [EMPTY; NSHM_PROC];
        let mut child: ShmAttachments = [EMPTY; NSHM_PROC];
        let mut parent_pt = f.pt();
        let mut child_pt = f.pt();

        let h = f.shm.open(&mut parent, b"seg").unwrap();
        f.shm.trunc(h, PAGE_SIZE).unwrap();
        let va = f
            .shm
            .map(&mut parent, &mut parent_pt, h, OpenFlags::READ_WRITE)
            .unwrap();

        f.shm.inherit(&parent, &mut child, &mut child_pt);
        assert_eq!(attachment_count(&f.shm, h), 2);

        // Same physical page at the same address.
        let (parent_ppn, _) = parent_pt.mapped_page(va).unwrap();
        let (child_ppn, _) = child_pt.mapped_page(va).unwrap();
        assert_eq!(parent_ppn, child_ppn);

        // Writes through one mapping are visible through the other.
        parent_pt.copy_out_bytes(va, b"42").unwrap();
        let mut buf = [0; 2];
        child_pt.copy_in_bytes(&mut buf, va).unwrap();
        assert_eq!(&buf, b"42");

        f.shm.close_all(&mut parent, &mut parent_pt);
        f.shm.close_all(&mut child, &mut child_pt);
        assert_eq!(attachment_count(&f.shm, h), 0);
    }
}
