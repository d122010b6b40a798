use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
};

use super::{SpinLock, SpinLockCondVar};

/// A long-term lock that may be held across blocking I/O.
///
/// Contended acquirers wait on a condition variable instead of spinning on
/// the protected state itself.
pub struct SleepLock<T> {
    held: SpinLock<bool>,
    cond: SpinLockCondVar,
    value: UnsafeCell<T>,
}

unsafe impl<T> Sync for SleepLock<T> where T: Send {}

impl<T> SleepLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            held: SpinLock::new(false),
            cond: SpinLockCondVar::new(),
            value: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        let mut held = self.held.lock();
        while *held {
            held = self.cond.wait(held);
        }
        *held = true;
        SleepLockGuard { lock: self }
    }
}

pub struct SleepLockGuard<'a, T> {
    lock: &'a SleepLock<T>,
}

impl<T> Deref for SleepLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SleepLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SleepLockGuard<'_, T> {
    fn drop(&mut self) {
        let mut held = self.lock.held.lock();
        *held = false;
        self.lock.cond.notify();
    }
}

impl<T> block_cache::Mutex for SleepLock<T> {
    type Data = T;

    type Guard<'a>
        = SleepLockGuard<'a, T>
    where
        Self: 'a;

    fn new(data: Self::Data) -> Self {
        Self::new(data)
    }

    fn lock(&self) -> Self::Guard<'_> {
        self.lock()
    }
}
