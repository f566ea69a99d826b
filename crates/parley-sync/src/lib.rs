mod mutex;
mod rwlock;
mod token;

pub use mutex::{ReentrantGuard, ReentrantMutex};
pub use rwlock::{ReadGuard, ReentrantRwLock, WriteGuard};
