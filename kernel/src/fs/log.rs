//! Simple logging that allows concurrent FS system calls.
//!
//! A log transaction contains the updates of multiple FS system calls. The
//! logging system only commits when there are no FS system calls active, so
//! an uncommitted system call's data is never written to disk.
//!
//! A system call opens a [`Tx`](super::Tx) to mark its start and end.
//! Usually starting just increments the count of in-progress FS system
//! calls; if the log is close to running out, the caller waits until the
//! last outstanding operation commits.
//!
//! The log is a physical re-do log containing disk blocks. The on-disk
//! format is a header block containing block numbers for block A, B, C,
//! ..., followed by the blocks themselves.

use alloc::boxed::Box;

use dataview::PodMethods as _;
use sv6_fs_types::{LogHeader, SuperBlock};

use crate::{
    param::{LOG_SIZE, MAX_OP_BLOCKS},
    sync::{SpinLock, SpinLockCondVar},
};

use super::{BufGuard, DiskCache};

struct LogState {
    outstanding: usize,
    /// `None` while a commit is in flight.
    header: Option<Box<LogHeader>>,
}

pub(super) struct Log {
    state: SpinLock<LogState>,
    cond: SpinLockCondVar,
}

/// A commit (or recovery) in progress, working on a header detached from
/// the shared state so new operations can queue up meanwhile.
struct Commit<'a> {
    cache: &'a DiskCache,
    sb: &'a SuperBlock,
    head: &'a mut LogHeader,
}

impl Commit<'_> {
    fn recover(&mut self) {
        self.read_head();
        if !self.head.is_empty() {
            ::log::warn!("recovering {} journaled blocks", self.head.len());
        }
        self.install_trans(true); // if committed, copy from log to disk
        self.head.clear();
        self.write_head(); // clear the log
    }

    fn commit(&mut self) {
        if !self.head.is_empty() {
            self.write_body(); // write modified blocks from cache to log
            self.write_head(); // write header to disk -- the real commit
            self.install_trans(false); // now install writes to home locations
            self.head.clear();
            self.write_head(); // erase the transaction from the log
        }
    }

    /// Reads the log header from disk into the in-memory log header.
    fn read_head(&mut self) {
        let mut buf = self.cache.get(self.sb.log_header_block().as_index());
        let guard = buf.lock();
        self.head.copy_from(guard.data::<LogHeader>());
    }

    /// Writes the in-memory log header to disk.
    ///
    /// This is the true point at which the current transaction commits.
    fn write_head(&self) {
        let mut buf = self.cache.get(self.sb.log_header_block().as_index());
        let mut guard = buf.lock();
        guard.data_mut::<LogHeader>().copy_from(self.head);
        guard.write_through();
    }

    /// Copies modified blocks from the cache into the log body.
    fn write_body(&self) {
        for (tail, bn) in self.head.block_indices().iter().enumerate() {
            let mut from = self.cache.get(usize::try_from(*bn).unwrap());
            let from_guard = from.lock();
            let mut to = self.cache.get(self.sb.log_body_block(tail).as_index());
            let mut to_guard = to.lock();
            to_guard.bytes_mut().copy_from_slice(from_guard.bytes());
            to_guard.write_through();
        }
    }

    /// Copies committed blocks from the log to their home locations.
    fn install_trans(&self, recovering: bool) {
        for (tail, bn) in self.head.block_indices().iter().enumerate() {
            let mut from = self.cache.get(self.sb.log_body_block(tail).as_index());
            let from_guard = from.lock();
            let mut to = self.cache.get(usize::try_from(*bn).unwrap());
            let mut to_guard = to.lock();
            to_guard.bytes_mut().copy_from_slice(from_guard.bytes());
            to_guard.write_through();
            if !recovering {
                to_guard.unpin();
            }
        }
    }
}

impl Log {
    /// Builds the journal for a mounted disk, replaying a committed but
    /// uninstalled transaction if a crash left one behind.
    pub(super) fn recover(cache: &DiskCache, sb: &SuperBlock) -> Self {
        assert!(LOG_SIZE <= sb.max_log_len());

        let mut head = Box::new(LogHeader::zeroed());
        Commit {
            cache,
            sb,
            head: &mut head,
        }
        .recover();
        head.clear();

        Self {
            state: SpinLock::new(LogState {
                outstanding: 0,
                header: Some(head),
            }),
            cond: SpinLockCondVar::new(),
        }
    }

    /// Starts an FS transaction, waiting until log space is guaranteed.
    pub(super) fn begin_op(&self) {
        let mut state = self.state.lock();
        loop {
            let Some(header) = &state.header else {
                // committing
                state = self.cond.wait(state);
                continue;
            };
            if header.len() + (state.outstanding + 1) * MAX_OP_BLOCKS > LOG_SIZE {
                // this op might exhaust log space; wait for commit
                state = self.cond.wait(state);
                continue;
            }
            state.outstanding += 1;
            break;
        }
    }

    /// Ends an FS transaction, committing if this was the last outstanding
    /// operation.
    pub(super) fn end_op(&self, cache: &DiskCache, sb: &SuperBlock) {
        let mut to_commit = None;

        let mut state = self.state.lock();
        state.outstanding -= 1;
        assert!(state.header.is_some(), "end_op during commit");
        if state.outstanding == 0 {
            to_commit = state.header.take();
        } else {
            // A queued begin_op may be waiting for log space, and this op's
            // reservation has just been released.
            self.cond.notify();
        }
        drop(state);

        if let Some(mut head) = to_commit {
            // Commit without holding the state lock; block I/O may sleep.
            Commit {
                cache,
                sb,
                head: &mut head,
            }
            .commit();

            let mut state = self.state.lock();
            assert!(state.header.is_none());
            state.header = Some(head);
            self.cond.notify();
        }
    }

    /// Records a modified buffer in the current transaction.
    ///
    /// The buffer is pinned in the cache until the commit installs it.
    pub(super) fn write(&self, guard: &mut BufGuard<'_>) {
        let mut state = self.state.lock();
        assert!(state.outstanding > 0, "log write outside transaction");
        let header = state.header.as_mut().expect("log write during commit");
        assert!(header.len() < LOG_SIZE, "transaction too big");

        let bn = u32::try_from(guard.index()).unwrap();
        if header.block_indices().iter().all(|b| *b != bn) {
            // absorption: a block updated twice is journaled once
            guard.pin();
            header.push(bn);
        }
    }
}
