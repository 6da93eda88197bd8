//! Emitters and helpers for tests
//!
//! Kept in the library so integration tests and downstream crates can
//! assert on delivery without writing their own probes.

use crate::emitters::Emitter;
use crate::message::Message;
use crate::site::{SiteDescriptor, SiteRef};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Counts emissions.
#[derive(Default)]
pub struct CountingEmitter {
    count: AtomicUsize,
}

impl CountingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl Emitter for CountingEmitter {
    fn emit(&self, _site: &'static SiteDescriptor, _message: Message) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Collects serialized message text in arrival order.
#[derive(Default)]
pub struct CollectingEmitter {
    lines: Mutex<Vec<String>>,
}

impl CollectingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Emitter for CollectingEmitter {
    fn emit(&self, _site: &'static SiteDescriptor, message: Message) {
        self.lines.lock().unwrap().push(format!("{message}"));
    }
}

/// Leak a site descriptor so tests can mint `'static` sites at runtime.
pub fn leak_site(
    location: &'static str,
    context: &'static str,
    tag: &'static str,
) -> &'static SiteDescriptor {
    Box::leak(Box::new(SiteDescriptor::new(location, context, tag)))
}

/// Leak a site and wrap it in a registry handle.
pub fn leak_site_ref(tag: &'static str) -> SiteRef {
    SiteRef(leak_site("test:0", "test_utils", tag))
}
