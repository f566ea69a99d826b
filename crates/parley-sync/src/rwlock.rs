use std::{
    cell::UnsafeCell,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
};

use crate::token::current_thread_token;

#[derive(Default)]
struct Shared {
    /// `(thread token, recursive hold count)` per reading thread.
    readers: Vec<(usize, usize)>,
    /// Token of the thread holding the write side, zero when free.
    writer: usize,
}

/// Multi-reader/single-writer lock with thread-affine reentrancy.
///
/// Beyond a plain RW lock:
/// - a thread holding the write side re-acquires read or write as a no-op;
/// - a thread holding the read side re-acquires read as a counted no-op
///   (releases are reference-counted per thread);
/// - a thread holding the read side may acquire the write side; its own read
///   registration does not block the upgrade, other readers do.
///
/// Fairness is reader-preferring: arriving readers only wait for an *active*
/// writer, never for queued ones, and a writer waits until no other thread
/// holds a read registration. Writer starvation is accepted.
///
/// A thread that upgrades sees the data mutably while its read guard is
/// still alive; callers must not keep borrows from the read guard across
/// the upgrade.
pub struct ReentrantRwLock<T> {
    state: Mutex<Shared>,
    cond: Condvar,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for ReentrantRwLock<T> {}
unsafe impl<T: Send + Sync> Sync for ReentrantRwLock<T> {}

impl<T> ReentrantRwLock<T> {
    pub fn new(data: T) -> Self {
        Self { state: Mutex::new(Shared::default()), cond: Condvar::new(), data: UnsafeCell::new(data) }
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquires the read side. Blocks only while another thread holds the
    /// write side.
    pub fn read(&self) -> ReadGuard<'_, T> {
        let me = current_thread_token();
        let mut shared = self.shared();
        if shared.writer == me {
            return ReadGuard { lock: self, registered: false, _affine: PhantomData };
        }
        // A registered reader can never coexist with a foreign writer, so a
        // recursive read only bumps its own count.
        if let Some(entry) = shared.readers.iter_mut().find(|(t, _)| *t == me) {
            entry.1 += 1;
            return ReadGuard { lock: self, registered: true, _affine: PhantomData };
        }
        while shared.writer != 0 {
            shared = self.cond.wait(shared).unwrap_or_else(PoisonError::into_inner);
        }
        shared.readers.push((me, 1));
        ReadGuard { lock: self, registered: true, _affine: PhantomData }
    }

    /// Acquires the write side. Blocks until no other thread holds either
    /// side; the caller's own read registrations do not block it.
    pub fn write(&self) -> WriteGuard<'_, T> {
        let me = current_thread_token();
        let mut shared = self.shared();
        if shared.writer == me {
            return WriteGuard { lock: self, owned: false, _affine: PhantomData };
        }
        while shared.writer != 0 || shared.readers.iter().any(|(t, _)| *t != me) {
            shared = self.cond.wait(shared).unwrap_or_else(PoisonError::into_inner);
        }
        shared.writer = me;
        WriteGuard { lock: self, owned: true, _affine: PhantomData }
    }

    fn release_read(&self) {
        let me = current_thread_token();
        let mut shared = self.shared();
        let Some(at) = shared.readers.iter().position(|(t, _)| *t == me) else { return };
        shared.readers[at].1 -= 1;
        if shared.readers[at].1 == 0 {
            shared.readers.swap_remove(at);
            // A writer may be waiting for everyone else's registrations.
            self.cond.notify_all();
        }
    }

    fn release_write(&self) {
        let mut shared = self.shared();
        shared.writer = 0;
        self.cond.notify_all();
    }
}

/// Scoped read hold. Releases on drop, on every exit path.
pub struct ReadGuard<'a, T> {
    lock: &'a ReentrantRwLock<T>,
    /// False when the owning thread already held the write side.
    registered: bool,
    _affine: PhantomData<*const ()>,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        if self.registered {
            self.lock.release_read();
        }
    }
}

/// Scoped write hold. The outermost guard fully releases on drop; guards
/// from reentrant acquisition release nothing.
pub struct WriteGuard<'a, T> {
    lock: &'a ReentrantRwLock<T>,
    owned: bool,
    _affine: PhantomData<*const ()>,
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        if self.owned {
            self.lock.release_write();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            mpsc,
        },
        thread,
        time::Duration,
    };

    use super::*;

    #[test]
    fn reentrant_write_is_a_noop() {
        let lock = ReentrantRwLock::new(0);
        let mut outer = lock.write();
        *outer += 1;
        {
            let mut inner = lock.write();
            *inner += 1;
        }
        // Inner drop must not have released the write side.
        *outer += 1;
        drop(outer);
        assert_eq!(*lock.read(), 3);
    }

    #[test]
    fn read_while_writing_same_thread() {
        let lock = ReentrantRwLock::new(7);
        let w = lock.write();
        assert_eq!(*lock.read(), 7);
        drop(w);
    }

    #[test]
    fn recursive_reads_are_counted() {
        let lock = ReentrantRwLock::new(());
        let a = lock.read();
        let b = lock.read();
        drop(b);
        // Still registered: a writer on another thread must wait for `a`.
        let blocked = AtomicBool::new(true);
        thread::scope(|s| {
            s.spawn(|| {
                let _w = lock.write();
                blocked.store(false, Ordering::SeqCst);
            });
            thread::sleep(Duration::from_millis(50));
            assert!(blocked.load(Ordering::SeqCst), "writer got in past a live reader");
            drop(a);
        });
        assert!(!blocked.load(Ordering::SeqCst));
    }

    #[test]
    fn upgrade_ignores_own_read_registration() {
        let lock = ReentrantRwLock::new(0);
        let r = lock.read();
        {
            let mut w = lock.write();
            *w = 5;
        }
        drop(r);
        assert_eq!(*lock.read(), 5);
    }

    #[test]
    fn upgrade_waits_for_other_readers() {
        let lock = ReentrantRwLock::new(0);
        let (other_ready, wait_ready) = mpsc::channel();
        let (release, wait_release) = mpsc::channel::<()>();
        let upgraded = AtomicBool::new(false);
        let lock = &lock;

        thread::scope(|s| {
            s.spawn(move || {
                let _r = lock.read();
                other_ready.send(()).unwrap();
                wait_release.recv().unwrap();
            });
            wait_ready.recv().unwrap();

            s.spawn(|| {
                let _own = lock.read();
                let mut w = lock.write();
                *w = 1;
                upgraded.store(true, Ordering::SeqCst);
            });
            thread::sleep(Duration::from_millis(50));
            assert!(!upgraded.load(Ordering::SeqCst), "upgrade ignored a foreign reader");
            release.send(()).unwrap();
        });
        assert!(upgraded.load(Ordering::SeqCst));
    }

    #[test]
    fn writer_excludes_readers_from_other_threads() {
        let lock = ReentrantRwLock::new(0);
        let entered = AtomicBool::new(false);
        thread::scope(|s| {
            let w = lock.write();
            s.spawn(|| {
                let _r = lock.read();
                entered.store(true, Ordering::SeqCst);
            });
            thread::sleep(Duration::from_millis(50));
            assert!(!entered.load(Ordering::SeqCst), "reader got in past an active writer");
            drop(w);
        });
        assert!(entered.load(Ordering::SeqCst));
    }

    #[test]
    fn readers_run_concurrently() {
        let lock = ReentrantRwLock::new(());
        let in_read = AtomicUsize::new(0);
        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let _r = lock.read();
                    in_read.fetch_add(1, Ordering::SeqCst);
                    while in_read.load(Ordering::SeqCst) < 4 {
                        thread::yield_now();
                    }
                });
            }
        });
        assert_eq!(in_read.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn writes_are_never_torn() {
        // The writer keeps two counters in lockstep; readers must never
        // observe them out of sync. Readers pace themselves so the
        // reader-preferring writer gets its zero-reader windows.
        let lock = ReentrantRwLock::new((0usize, 0usize));
        let done = AtomicBool::new(false);
        thread::scope(|s| {
            for _ in 0..3 {
                s.spawn(|| {
                    while !done.load(Ordering::Relaxed) {
                        {
                            let r = lock.read();
                            assert_eq!(r.0, r.1);
                        }
                        thread::sleep(Duration::from_millis(1));
                    }
                });
            }
            s.spawn(|| {
                for _ in 0..1_000 {
                    let mut w = lock.write();
                    w.0 += 1;
                    std::hint::black_box(&mut *w);
                    w.1 += 1;
                }
                done.store(true, Ordering::Relaxed);
            });
        });
        let r = lock.read();
        assert_eq!((r.0, r.1), (1_000, 1_000));
    }
}
