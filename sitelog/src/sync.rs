//! Mutex-guarded cells and thread-sharded replicas
//!
//! `Replicated` spreads independent copies of a structure across shards
//! indexed by the calling thread so that unrelated threads rarely contend
//! on the same mutex.

use std::sync::Mutex;
use std::thread::available_parallelism;

/// A value behind a mutex with closure-scoped access.
pub struct Synchronized<T> {
    inner: Mutex<T>,
}

impl<T> Synchronized<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Run `func` with the lock held.
    pub fn with<R>(&self, func: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.inner.lock().unwrap();
        func(&mut guard)
    }

    /// Run `func` without taking the lock; exclusive access is guaranteed
    /// by the `&mut self` borrow.
    pub fn unprotected<R>(&mut self, func: impl FnOnce(&mut T) -> R) -> R {
        func(self.inner.get_mut().unwrap())
    }
}

/// A vector of `Synchronized<T>` shards hashed by thread id.
pub struct Replicated<T> {
    shards: Vec<Synchronized<T>>,
}

/// Default shard count: twice the hardware concurrency.
pub fn default_shard_count() -> usize {
    2 * available_parallelism().map(|n| n.get()).unwrap_or(2)
}

impl<T> Replicated<T> {
    /// Build `count` shards from a per-index generator.
    pub fn new(count: usize, mut generator: impl FnMut(usize) -> T) -> Self {
        let shards = (0..count)
            .map(|index| Synchronized::new(generator(index)))
            .collect();
        Self { shards }
    }

    pub fn with_default_count(generator: impl FnMut(usize) -> T) -> Self {
        Self::new(default_shard_count(), generator)
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Index of the shard associated with the calling thread.
    pub fn shard_index(&self) -> usize {
        thread_id::get() % self.shards.len()
    }

    /// Access the calling thread's shard.
    pub fn with<R>(&self, func: impl FnOnce(&mut T) -> R) -> R {
        self.at(self.shard_index(), func)
    }

    /// Access a specific shard.
    pub fn at<R>(&self, index: usize, func: impl FnOnce(&mut T) -> R) -> R {
        self.shards[index % self.shards.len()].with(func)
    }

    /// Try to access a specific shard, skipping if its lock is contended.
    pub fn try_at<R>(&self, index: usize, func: impl FnOnce(&mut T) -> R) -> Option<R> {
        let shard = &self.shards[index % self.shards.len()];
        match shard.inner.try_lock() {
            Ok(mut guard) => Some(func(&mut guard)),
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn synchronized_scoped_access() {
        let cell = Synchronized::new(0_u32);
        cell.with(|value| *value += 1);
        assert_eq!(cell.with(|value| *value), 1);
    }

    #[test]
    fn unprotected_requires_exclusive_borrow() {
        let mut cell = Synchronized::new(String::from("a"));
        cell.unprotected(|value| value.push('b'));
        assert_eq!(cell.with(|value| value.clone()), "ab");
    }

    #[test]
    fn replicated_counts() {
        let replicated: Replicated<u32> = Replicated::new(4, |_| 0);
        assert_eq!(replicated.len(), 4);
        assert!(default_shard_count() >= 2);
    }

    #[test]
    fn replicated_shard_is_stable_per_thread() {
        let replicated: Replicated<u32> = Replicated::new(8, |_| 0);
        assert_eq!(replicated.shard_index(), replicated.shard_index());
    }

    #[test]
    fn replicated_concurrent_increments() {
        let replicated: Arc<Replicated<u64>> = Arc::new(Replicated::new(4, |_| 0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let replicated = replicated.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    replicated.with(|value| *value += 1);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        let total: u64 = (0..replicated.len())
            .map(|index| replicated.at(index, |value| *value))
            .sum();
        assert_eq!(total, 800);
    }

    #[test]
    fn try_at_skips_contended_shard() {
        let replicated: Arc<Replicated<u32>> = Arc::new(Replicated::new(1, |_| 0));
        let inner = replicated.clone();
        replicated.at(0, |_| {
            // shard 0 is locked here; try_at from this thread must not deadlock
            assert!(inner.try_at(0, |_| ()).is_none());
        });
    }
}
