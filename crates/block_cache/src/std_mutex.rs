//! [`Mutex`](crate::Mutex) backed by `std::sync::Mutex`, for tests and
//! hosted embedders.

extern crate std;

use core::ops::{Deref, DerefMut};

pub struct StdMutex<T>(std::sync::Mutex<T>);

pub struct StdMutexGuard<'a, T>(std::sync::MutexGuard<'a, T>);

impl<T> crate::Mutex for StdMutex<T> {
    type Data = T;

    type Guard<'a>
        = StdMutexGuard<'a, T>
    where
        Self: 'a;

    fn new(data: Self::Data) -> Self {
        Self(std::sync::Mutex::new(data))
    }

    fn lock(&self) -> Self::Guard<'_> {
        StdMutexGuard(self.0.lock().unwrap())
    }
}

impl<T> Deref for StdMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> DerefMut for StdMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
