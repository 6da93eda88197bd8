//! Recycled storage for message bodies
//!
//! A fixed-class cache of raw allocations, sharded across threads. Class
//! buffers are 16-byte aligned so heterogeneous bodies can be constructed
//! in place; requests the class cannot serve get an exact-layout ad-hoc
//! allocation that bypasses the cache entirely.

use crate::sync::Replicated;
use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::ptr::NonNull;
use std::sync::Arc;

/// Class buffer size in bytes.
pub const CLASS_CAPACITY: usize = 4096;
/// Cached buffers retained per shard; overflow is deallocated.
pub const SLOTS_PER_SHARD: usize = 128;
/// Alignment of class buffers.
pub const CLASS_ALIGN: usize = 16;

struct RawAlloc {
    ptr: NonNull<u8>,
    layout: Layout,
}

// Raw allocations carry no aliasing; ownership moves with the struct.
unsafe impl Send for RawAlloc {}

impl RawAlloc {
    fn new(layout: Layout) -> Self {
        let ptr = unsafe { alloc(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            handle_alloc_error(layout);
        };
        Self { ptr, layout }
    }

    fn release(self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

struct Shard {
    slots: Vec<RawAlloc>,
}

impl Drop for Shard {
    fn drop(&mut self) {
        for slot in self.slots.drain(..) {
            slot.release();
        }
    }
}

/// Thread-sharded recycler of fixed-capacity buffers.
pub struct BufferCache {
    shards: Replicated<Shard>,
    class_layout: Layout,
    slots_per_shard: usize,
}

impl BufferCache {
    pub fn new(capacity: usize, slots_per_shard: usize, shard_count: usize) -> Arc<Self> {
        let class_layout = Layout::from_size_align(capacity, CLASS_ALIGN).unwrap();
        Arc::new(Self {
            shards: Replicated::new(shard_count, |_| Shard { slots: Vec::new() }),
            class_layout,
            slots_per_shard,
        })
    }

    pub fn with_defaults(shard_count: usize) -> Arc<Self> {
        Self::new(CLASS_CAPACITY, SLOTS_PER_SHARD, shard_count)
    }

    /// True if the cache class can serve the layout.
    pub fn supports(&self, layout: Layout) -> bool {
        layout.size() <= self.class_layout.size() && layout.align() <= self.class_layout.align()
    }

    /// Get-or-create storage able to hold `layout`.
    ///
    /// Oversized or overaligned requests allocate ad hoc and never return
    /// to the cache.
    pub fn acquire(cache: &Arc<Self>, layout: Layout) -> MessageStorage {
        if !cache.supports(layout) {
            return MessageStorage {
                raw: Some(RawAlloc::new(layout)),
                origin: None,
            };
        }
        let shard = cache.shards.shard_index();
        let cached = cache.shards.at(shard, |state| state.slots.pop());
        let raw = cached.unwrap_or_else(|| RawAlloc::new(cache.class_layout));
        MessageStorage {
            raw: Some(raw),
            origin: Some((cache.clone(), shard)),
        }
    }

    fn reinsert(&self, shard: usize, raw: RawAlloc) {
        let rejected = self.shards.at(shard, |state| {
            if state.slots.len() < self.slots_per_shard {
                state.slots.push(raw);
                None
            } else {
                Some(raw)
            }
        });
        if let Some(raw) = rejected {
            raw.release();
        }
    }

    #[cfg(test)]
    fn cached_count(&self, shard: usize) -> usize {
        self.shards.at(shard, |state| state.slots.len())
    }
}

/// Raw backing storage for one message body.
///
/// Returns to its origin shard on drop; ad-hoc allocations are freed.
pub struct MessageStorage {
    raw: Option<RawAlloc>,
    origin: Option<(Arc<BufferCache>, usize)>,
}

impl MessageStorage {
    pub fn as_ptr(&self) -> *mut u8 {
        self.raw.as_ref().map(|raw| raw.ptr.as_ptr()).unwrap_or(std::ptr::null_mut())
    }

    pub fn capacity(&self) -> usize {
        self.raw.as_ref().map(|raw| raw.layout.size()).unwrap_or(0)
    }

    pub fn align(&self) -> usize {
        self.raw.as_ref().map(|raw| raw.layout.align()).unwrap_or(1)
    }

    /// True if a body with `layout` fits this storage.
    pub fn fits(&self, layout: Layout) -> bool {
        layout.size() <= self.capacity() && layout.align() <= self.align()
    }
}

impl Drop for MessageStorage {
    fn drop(&mut self) {
        let Some(raw) = self.raw.take() else {
            return;
        };
        match self.origin.take() {
            Some((cache, shard)) => cache.reinsert(shard, raw),
            None => raw.release(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_requests_recycle() {
        let cache = BufferCache::new(256, 4, 1);
        let layout = Layout::from_size_align(64, 8).unwrap();
        let first_ptr;
        {
            let storage = BufferCache::acquire(&cache, layout);
            first_ptr = storage.as_ptr();
            assert_eq!(storage.capacity(), 256);
        }
        assert_eq!(cache.cached_count(0), 1);
        let storage = BufferCache::acquire(&cache, layout);
        assert_eq!(storage.as_ptr(), first_ptr);
        assert_eq!(cache.cached_count(0), 0);
    }

    #[test]
    fn oversize_requests_bypass_cache() {
        let cache = BufferCache::new(64, 4, 1);
        let layout = Layout::from_size_align(1024, 8).unwrap();
        {
            let storage = BufferCache::acquire(&cache, layout);
            assert!(storage.capacity() >= 1024);
        }
        assert_eq!(cache.cached_count(0), 0);
    }

    #[test]
    fn overaligned_requests_bypass_cache() {
        let cache = BufferCache::new(256, 4, 1);
        let layout = Layout::from_size_align(32, 64).unwrap();
        let storage = BufferCache::acquire(&cache, layout);
        assert_eq!(storage.align(), 64);
        assert!(storage.as_ptr() as usize % 64 == 0);
    }

    #[test]
    fn shard_retention_limit() {
        let cache = BufferCache::new(64, 2, 1);
        let layout = Layout::from_size_align(16, 8).unwrap();
        let buffers: Vec<_> = (0..4).map(|_| BufferCache::acquire(&cache, layout)).collect();
        drop(buffers);
        assert_eq!(cache.cached_count(0), 2);
    }

    #[test]
    fn fits_checks_size_and_align() {
        let cache = BufferCache::new(256, 4, 1);
        let storage = BufferCache::acquire(&cache, Layout::from_size_align(16, 8).unwrap());
        assert!(storage.fits(Layout::from_size_align(256, 16).unwrap()));
        assert!(!storage.fits(Layout::from_size_align(257, 8).unwrap()));
        assert!(!storage.fits(Layout::from_size_align(16, 64).unwrap()));
    }
}
