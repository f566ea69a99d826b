use std::{
    cell::UnsafeCell,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
};

use crate::token::current_thread_token;

#[derive(Default)]
struct Owner {
    token: usize,
    depth: usize,
}

/// Mutex that the owning thread may re-lock without deadlocking.
///
/// Nested guards on the owning thread alias the same data; callers must not
/// hold a borrow from an outer guard while dereferencing an inner one.
pub struct ReentrantMutex<T> {
    state: Mutex<Owner>,
    cond: Condvar,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for ReentrantMutex<T> {}
unsafe impl<T: Send> Sync for ReentrantMutex<T> {}

impl<T> ReentrantMutex<T> {
    pub fn new(data: T) -> Self {
        Self { state: Mutex::new(Owner::default()), cond: Condvar::new(), data: UnsafeCell::new(data) }
    }

    fn owner(&self) -> MutexGuard<'_, Owner> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn lock(&self) -> ReentrantGuard<'_, T> {
        let me = current_thread_token();
        let mut owner = self.owner();
        if owner.token == me {
            owner.depth += 1;
        } else {
            while owner.token != 0 {
                owner = self.cond.wait(owner).unwrap_or_else(PoisonError::into_inner);
            }
            owner.token = me;
            owner.depth = 1;
        }
        ReentrantGuard { lock: self, _affine: PhantomData }
    }

    fn unlock(&self) {
        let mut owner = self.owner();
        owner.depth -= 1;
        if owner.depth == 0 {
            owner.token = 0;
            self.cond.notify_one();
        }
    }
}

/// Scoped hold on a [`ReentrantMutex`]. Releases one level on drop.
pub struct ReentrantGuard<'a, T> {
    lock: &'a ReentrantMutex<T>,
    _affine: PhantomData<*const ()>,
}

impl<T> Deref for ReentrantGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for ReentrantGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for ReentrantGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        thread,
        time::Duration,
    };

    use super::*;

    #[test]
    fn relock_on_same_thread() {
        let lock = ReentrantMutex::new(0);
        let mut a = lock.lock();
        *a += 1;
        {
            let mut b = lock.lock();
            *b += 1;
        }
        *a += 1;
        drop(a);
        assert_eq!(*lock.lock(), 3);
    }

    #[test]
    fn inner_drop_keeps_the_lock() {
        let lock = ReentrantMutex::new(());
        let outer = lock.lock();
        drop(lock.lock());
        let contended = AtomicBool::new(true);
        thread::scope(|s| {
            s.spawn(|| {
                let _g = lock.lock();
                contended.store(false, Ordering::SeqCst);
            });
            thread::sleep(Duration::from_millis(50));
            assert!(contended.load(Ordering::SeqCst), "inner guard released the outer hold");
            drop(outer);
        });
        assert!(!contended.load(Ordering::SeqCst));
    }

    #[test]
    fn excludes_other_threads() {
        let lock = ReentrantMutex::new(0);
        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..1_000 {
                        let mut g = lock.lock();
                        *g += 1;
                    }
                });
            }
        });
        assert_eq!(*lock.lock(), 4_000);
    }
}
