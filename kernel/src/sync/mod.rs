mod sleep_lock;
mod spin_lock;

pub use self::{
    sleep_lock::{SleepLock, SleepLockGuard},
    spin_lock::{SpinLock, SpinLockCondVar, SpinLockGuard},
};
