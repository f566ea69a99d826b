use std::sync::atomic::{AtomicUsize, Ordering};

/// Process-unique token for the calling thread, never zero.
///
/// `ThreadId` has no stable integer form, so hand out our own.
pub(crate) fn current_thread_token() -> usize {
    static NEXT: AtomicUsize = AtomicUsize::new(1);
    thread_local! {
        static TOKEN: usize = NEXT.fetch_add(1, Ordering::Relaxed);
    }
    TOKEN.with(|t| *t)
}
