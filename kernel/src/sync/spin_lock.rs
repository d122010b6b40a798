use core::{
    cell::UnsafeCell,
    hint,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

struct RawSpinLock {
    locked: AtomicBool,
}

impl RawSpinLock {
    const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Acquires the lock.
    ///
    /// Loops (spins) until the lock is acquired.
    fn acquire(&self) {
        // `Ordering::Acquire` ensures that the critical section's memory
        // references happen strictly after the lock is acquired.
        while self.locked.swap(true, Ordering::Acquire) {
            hint::spin_loop();
        }
    }

    /// Releases the lock.
    fn release(&self) {
        // `Ordering::Release` ensures that all stores in the critical
        // section are visible to other CPUs before the lock is released.
        self.locked.store(false, Ordering::Release);
    }
}

/// A short-term lock. Critical sections must not block.
pub struct SpinLock<T> {
    lock: RawSpinLock,
    value: UnsafeCell<T>,
}

unsafe impl<T> Sync for SpinLock<T> where T: Send {}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            lock: RawSpinLock::new(),
            value: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.lock.acquire();
        SpinLockGuard { lock: self }
    }
}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<'a, T> SpinLockGuard<'a, T> {
    /// Releases the guard, returning the lock it came from.
    fn into_lock(self) -> &'a SpinLock<T> {
        let lock = self.lock;
        drop(self);
        lock
    }
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.lock.release();
    }
}

impl<T> block_cache::Mutex for SpinLock<T> {
    type Data = T;

    type Guard<'a>
        = SpinLockGuard<'a, T>
    where
        Self: 'a;

    fn new(data: Self::Data) -> Self {
        Self::new(data)
    }

    fn lock(&self) -> Self::Guard<'_> {
        self.lock()
    }
}

/// A condition variable for use with [`SpinLock`].
///
/// Waiters spin on an epoch counter rather than parking in a scheduler, so
/// waiting works wherever the embedder runs kernel code.
pub struct SpinLockCondVar {
    epoch: AtomicU64,
}

impl SpinLockCondVar {
    pub const fn new() -> Self {
        Self {
            epoch: AtomicU64::new(0),
        }
    }

    /// Releases `guard`, waits for a [`notify`](Self::notify), and
    /// reacquires the lock.
    ///
    /// As with any condition variable, the caller must re-check its
    /// predicate: wakeups are spurious by design.
    pub fn wait<'a, T>(&self, guard: SpinLockGuard<'a, T>) -> SpinLockGuard<'a, T> {
        // Sample the epoch while still holding the lock so a notification
        // between release and wait is not missed.
        let seen = self.epoch.load(Ordering::Acquire);
        let lock = guard.into_lock();
        while self.epoch.load(Ordering::Acquire) == seen {
            hint::spin_loop();
        }
        lock.lock()
    }

    /// Wakes all current waiters.
    pub fn notify(&self) {
        self.epoch.fetch_add(1, Ordering::Release);
    }
}

impl Default for SpinLockCondVar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn lock_excludes() {
        let counter = Arc::new(SpinLock::new(0_u64));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let counter = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    *counter.lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*counter.lock(), 4000);
    }

    #[test]
    fn condvar_wakes_waiter() {
        struct State {
            ready: SpinLock<bool>,
            cond: SpinLockCondVar,
        }
        let state = Arc::new(State {
            ready: SpinLock::new(false),
            cond: SpinLockCondVar::new(),
        });

        let waiter = {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                let mut ready = state.ready.lock();
                while !*ready {
                    ready = state.cond.wait(ready);
                }
            })
        };

        *state.ready.lock() = true;
        state.cond.notify();
        waiter.join().unwrap();
    }
}
