//! Per-call-site descriptors and the fast-path filter
//!
//! A site is a static record describing one physical log statement. Its
//! mutable state is a thin atomic pointer to the emitter cell currently
//! configured for it (null = disabled) and a bitset of enabled levels,
//! both written only by the configuration manager and read with relaxed
//! ordering on the emit path.

use crate::emitters::Emitter;
use crate::levels::{Level, LevelSet};
use crate::message::Message;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

/// Stable, thin indirection to an emitter.
///
/// Sites store a raw pointer to one of these instead of a fat trait
/// object so the fast path is a single word load. Cells are owned by the
/// policy that installed them and outlive their installation: a policy
/// parks every cell it ever published until the policy itself is dropped,
/// and policy removal rewrites site pointers before that can happen.
pub struct EmitterCell(pub &'static dyn Emitter);

/// A site descriptor: immutable identity plus fast-path filter state.
pub struct SiteDescriptor {
    emitter: AtomicPtr<EmitterCell>,
    levels: AtomicU8,
    location: &'static str,
    context: &'static str,
    tag: &'static str,
}

impl SiteDescriptor {
    /// A disabled site (null emitter). Enabled levels default to all;
    /// policies replace the mask on adoption.
    pub const fn new(location: &'static str, context: &'static str, tag: &'static str) -> Self {
        Self {
            emitter: AtomicPtr::new(ptr::null_mut()),
            levels: AtomicU8::new(LevelSet::all().bits()),
            location,
            context,
            tag,
        }
    }

    /// A site born pointing at `cell` — used by the call-site macro with
    /// the bootstrap cell so first emission registers the site.
    pub const fn with_emitter(
        cell: &'static EmitterCell,
        location: &'static str,
        context: &'static str,
        tag: &'static str,
    ) -> Self {
        Self {
            emitter: AtomicPtr::new(cell as *const EmitterCell as *mut EmitterCell),
            levels: AtomicU8::new(LevelSet::all().bits()),
            location,
            context,
            tag,
        }
    }

    pub fn location(&self) -> &'static str {
        self.location
    }

    pub fn context(&self) -> &'static str {
        self.context
    }

    pub fn tag(&self) -> &'static str {
        self.tag
    }

    /// Fast conditional logging.
    ///
    /// When the site is disabled or the level bit is clear, the builder
    /// is never invoked and no arguments are evaluated. Relaxed ordering
    /// is sufficient: configuration updates may become visible with
    /// arbitrary delay, and every update eventually reaches every reader.
    #[inline(always)]
    pub fn log<F: FnOnce(&mut Message)>(&'static self, level: Level, builder: F) {
        let cell = self.emitter.load(Ordering::Relaxed);
        if !cell.is_null() && self.enabled(level) {
            let mut message = Message::new();
            builder(&mut message);
            let emitter = unsafe { (*cell).0 };
            emitter.emit(self, message);
        }
    }

    #[inline(always)]
    pub fn enabled(&self, level: Level) -> bool {
        LevelSet::from_bits(self.levels.load(Ordering::Relaxed)).contains(level)
    }

    /// Current emitter cell pointer (null when disabled).
    pub fn emitter_cell(&self) -> *mut EmitterCell {
        self.emitter.load(Ordering::Relaxed)
    }

    /// Install an emitter cell. Written by policies during `apply`.
    pub fn set_emitter(&self, cell: *mut EmitterCell) {
        self.emitter.store(cell, Ordering::Relaxed);
    }

    /// Replace the enabled-level mask wholesale.
    pub fn set_levels(&self, levels: LevelSet) {
        self.levels.store(levels.bits(), Ordering::Relaxed);
    }

    pub fn levels(&self) -> LevelSet {
        LevelSet::from_bits(self.levels.load(Ordering::Relaxed))
    }
}

impl fmt::Debug for SiteDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteDescriptor")
            .field("location", &self.location)
            .field("context", &self.context)
            .field("tag", &self.tag)
            .field("enabled", &!self.emitter.load(Ordering::Relaxed).is_null())
            .finish()
    }
}

/// Copyable handle identifying a registered site by address.
#[derive(Clone, Copy)]
pub struct SiteRef(pub &'static SiteDescriptor);

impl SiteRef {
    pub fn location(&self) -> &'static str {
        self.0.location()
    }

    pub fn context(&self) -> &'static str {
        self.0.context()
    }

    pub fn tag(&self) -> &'static str {
        self.0.tag()
    }
}

impl std::ops::Deref for SiteRef {
    type Target = SiteDescriptor;

    fn deref(&self) -> &SiteDescriptor {
        self.0
    }
}

impl PartialEq for SiteRef {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.0, other.0)
    }
}

impl Eq for SiteRef {}

impl Hash for SiteRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.0 as *const SiteDescriptor).hash(state);
    }
}

impl fmt::Debug for SiteRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SiteRef({} [{}])", self.location(), self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::CountingEmitter;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn disabled_site_skips_builder() {
        static SITE: SiteDescriptor = SiteDescriptor::new("here:1", "tests", "untagged");
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        SITE.log(Level::Info, |_| {
            CALLS.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(CALLS.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn level_gating_skips_builder() {
        static SITE: SiteDescriptor = SiteDescriptor::new("here:2", "tests", "untagged");
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let emitter: &'static CountingEmitter = Box::leak(Box::new(CountingEmitter::new()));
        let cell: &'static EmitterCell = Box::leak(Box::new(EmitterCell(emitter)));
        SITE.set_emitter(cell as *const EmitterCell as *mut EmitterCell);
        SITE.set_levels(LevelSet::only(Level::Error));

        SITE.log(Level::Info, |_| {
            CALLS.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(CALLS.load(Ordering::Relaxed), 0);
        assert_eq!(emitter.count(), 0);

        SITE.log(Level::Error, |message| {
            CALLS.fetch_add(1, Ordering::Relaxed);
            message.format(("boom",));
        });
        assert_eq!(CALLS.load(Ordering::Relaxed), 1);
        assert_eq!(emitter.count(), 1);
    }

    #[test]
    fn site_ref_identity_is_by_address() {
        static A: SiteDescriptor = SiteDescriptor::new("same:3", "tests", "t");
        static B: SiteDescriptor = SiteDescriptor::new("same:3", "tests", "t");
        assert_eq!(SiteRef(&A), SiteRef(&A));
        assert_ne!(SiteRef(&A), SiteRef(&B));
    }
}
