//! Buffer cache for disk blocks.
//!
//! The cache holds a fixed pool of buffers. Each buffer caches the contents
//! of one disk block; a block cached here is held in exactly one buffer.
//! [`BlockCache::get`] hands out reference-counted handles; while any handle
//! to a block is live the buffer will not be recycled. Unreferenced buffers
//! are recycled least-recently-used first. A journal can [`pin`] a buffer to
//! keep its contents resident across transactions without holding a handle.
//!
//! The cache is generic over the block device and over the mutex family, so
//! a kernel can instantiate it with its own spin and sleep locks while the
//! crate tests itself with `std` mutexes.
//!
//! [`pin`]: BufHandle::pin

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::{boxed::Box, vec::Vec};
use core::{fmt, ops::DerefMut};

use dataview::{Pod, PodMethods as _};

#[cfg(any(test, feature = "std"))]
pub mod std_mutex;

/// A minimal lock interface the cache is generic over.
pub trait Mutex {
    /// The data the mutex protects.
    type Data;

    /// The guard returned by [`Mutex::lock`].
    type Guard<'a>: DerefMut<Target = Self::Data>
    where
        Self: 'a;

    fn new(data: Self::Data) -> Self;

    fn lock(&self) -> Self::Guard<'_>;
}

/// A device addressed in fixed-size blocks.
pub trait BlockDevice<const BLOCK_SIZE: usize> {
    type Error: fmt::Debug;

    fn read(&self, index: usize, data: &mut [u8; BLOCK_SIZE]) -> Result<(), Self::Error>;
    fn write(&self, index: usize, data: &[u8; BLOCK_SIZE]) -> Result<(), Self::Error>;
}

const NO_BLOCK: usize = usize::MAX;

struct Slot {
    /// Block held by this buffer, or [`NO_BLOCK`].
    index: usize,
    /// Live [`BufHandle`]s for this buffer.
    refcnt: usize,
    /// Journal pins; a pinned buffer is never recycled.
    pins: usize,
    /// Recency stamp for LRU recycling.
    last_use: u64,
}

/// Slot bookkeeping shared by every buffer; named so embedders can spell
/// the state-mutex type when instantiating the cache.
pub struct CacheState {
    slots: Vec<Slot>,
    ticks: u64,
}

/// Contents of one buffer.
pub struct BufData<const BLOCK_SIZE: usize> {
    index: usize,
    valid: bool,
    bytes: Box<[u8; BLOCK_SIZE]>,
}

/// A buffer cache over device `D`.
///
/// `SM` guards the slot table (briefly held, a spin lock in a kernel); `BM`
/// guards buffer contents and is held across device I/O (a sleep lock in a
/// kernel).
pub struct BlockCache<D, SM, BM> {
    device: D,
    state: SM,
    buffers: Box<[BM]>,
}

impl<D, SM, BM, const BLOCK_SIZE: usize> BlockCache<D, SM, BM>
where
    D: BlockDevice<BLOCK_SIZE>,
    SM: Mutex<Data = CacheState>,
    BM: Mutex<Data = BufData<BLOCK_SIZE>>,
{
    /// Creates a cache with `nbuf` buffers.
    ///
    /// # Panics
    ///
    /// Panics if `nbuf` is 0.
    pub fn new(device: D, nbuf: usize) -> Self {
        assert!(nbuf > 0);
        let slots = (0..nbuf)
            .map(|_| Slot {
                index: NO_BLOCK,
                refcnt: 0,
                pins: 0,
                last_use: 0,
            })
            .collect();
        let buffers = (0..nbuf)
            .map(|_| {
                BM::new(BufData {
                    index: NO_BLOCK,
                    valid: false,
                    bytes: Box::new([0; BLOCK_SIZE]),
                })
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            device,
            state: SM::new(CacheState { slots, ticks: 0 }),
            buffers,
        }
    }

    /// Returns a handle to the buffer for block `index`, without reading it.
    ///
    /// Recycles the least recently used unreferenced, unpinned buffer when
    /// the block is not cached. Returns `None` if every buffer is in use.
    pub fn try_get(&self, index: usize) -> Option<BufHandle<'_, D, SM, BM>> {
        let mut state = self.state.lock();

        if let Some((slot_no, slot)) = state
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.index == index)
        {
            slot.refcnt += 1;
            return Some(BufHandle {
                cache: self,
                slot: slot_no,
                index,
            });
        }

        // Not cached; recycle the stalest free buffer.
        let (slot_no, slot) = state
            .slots
            .iter_mut()
            .enumerate()
            .filter(|(_, s)| s.refcnt == 0 && s.pins == 0)
            .min_by_key(|(_, s)| s.last_use)?;
        slot.index = index;
        slot.refcnt = 1;

        Some(BufHandle {
            cache: self,
            slot: slot_no,
            index,
        })
    }

    /// Like [`BlockCache::try_get`].
    ///
    /// # Panics
    ///
    /// Panics if every buffer is referenced or pinned.
    pub fn get(&self, index: usize) -> BufHandle<'_, D, SM, BM> {
        match self.try_get(index) {
            Some(buf) => buf,
            None => panic!("block buffers exhausted"),
        }
    }
}

/// A reference-counted handle to one cached block.
pub struct BufHandle<'a, D, SM, BM>
where
    SM: Mutex<Data = CacheState>,
{
    cache: &'a BlockCache<D, SM, BM>,
    slot: usize,
    index: usize,
}

impl<D, SM, BM, const BLOCK_SIZE: usize> BufHandle<'_, D, SM, BM>
where
    D: BlockDevice<BLOCK_SIZE>,
    SM: Mutex<Data = CacheState>,
    BM: Mutex<Data = BufData<BLOCK_SIZE>>,
{
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Locks the buffer and returns its contents, reading the block from
    /// the device on first access.
    pub fn lock(&mut self) -> BufGuard<'_, D, SM, BM, BLOCK_SIZE> {
        let mut data = self.cache.buffers[self.slot].lock();
        if data.index != self.index {
            // The buffer was recycled while free; its contents are stale.
            data.index = self.index;
            data.valid = false;
        }
        if !data.valid {
            self.cache
                .device
                .read(self.index, &mut data.bytes)
                .expect("block device read failed");
            data.valid = true;
        }
        BufGuard {
            cache: self.cache,
            slot: self.slot,
            index: self.index,
            data,
        }
    }

    /// Keeps this buffer resident after the handle is dropped.
    pub fn pin(&self) {
        let mut state = self.cache.state.lock();
        state.slots[self.slot].pins += 1;
    }

    /// Releases one pin.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not pinned.
    pub fn unpin(&self) {
        let mut state = self.cache.state.lock();
        let slot = &mut state.slots[self.slot];
        assert!(slot.pins > 0, "unpin of unpinned buffer");
        slot.pins -= 1;
    }
}

impl<D, SM, BM> Drop for BufHandle<'_, D, SM, BM>
where
    SM: Mutex<Data = CacheState>,
{
    fn drop(&mut self) {
        let mut state = self.cache.state.lock();
        state.ticks += 1;
        let ticks = state.ticks;
        let slot = &mut state.slots[self.slot];
        assert!(slot.refcnt > 0);
        slot.refcnt -= 1;
        slot.last_use = ticks;
    }
}

/// Locked contents of one cached block.
pub struct BufGuard<'h, D, SM, BM, const BLOCK_SIZE: usize>
where
    SM: Mutex<Data = CacheState>,
    BM: Mutex<Data = BufData<BLOCK_SIZE>> + 'h,
{
    cache: &'h BlockCache<D, SM, BM>,
    slot: usize,
    index: usize,
    data: BM::Guard<'h>,
}

impl<'h, D, SM, BM, const BLOCK_SIZE: usize> BufGuard<'h, D, SM, BM, BLOCK_SIZE>
where
    D: BlockDevice<BLOCK_SIZE>,
    SM: Mutex<Data = CacheState>,
    BM: Mutex<Data = BufData<BLOCK_SIZE>> + 'h,
{
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.data.bytes
    }

    #[must_use]
    pub fn bytes_mut(&mut self) -> &mut [u8; BLOCK_SIZE] {
        &mut self.data.bytes
    }

    /// Views the block as a value of type `T`.
    #[must_use]
    pub fn data<T: Pod>(&self) -> &T {
        self.bytes().as_data_view().get(0)
    }

    /// Views the block as a mutable value of type `T`.
    #[must_use]
    pub fn data_mut<T: Pod>(&mut self) -> &mut T {
        self.bytes_mut().as_data_view_mut().get_mut(0)
    }

    pub fn fill_zero(&mut self) {
        self.data.bytes.fill(0);
    }

    /// Writes the buffer contents through to the device.
    ///
    /// Only the journal writes blocks directly; everything else goes through
    /// the journal so the write is covered by a transaction.
    pub fn write_through(&self) {
        self.cache
            .device
            .write(self.index, &self.data.bytes)
            .expect("block device write failed");
    }

    /// Keeps this buffer resident after its handle is dropped.
    pub fn pin(&self) {
        let mut state = self.cache.state.lock();
        state.slots[self.slot].pins += 1;
    }

    /// Releases one pin.
    pub fn unpin(&self) {
        let mut state = self.cache.state.lock();
        let slot = &mut state.slots[self.slot];
        assert!(slot.pins > 0, "unpin of unpinned buffer");
        slot.pins -= 1;
    }
}
