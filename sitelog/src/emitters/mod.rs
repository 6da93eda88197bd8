//! Emitters route, absorb or terminate messages
//!
//! Fast-path filtering happens at the site level; emitters only see
//! messages that passed it. Emitters are invoked from the producing
//! thread (sync) or from a dispatcher worker (async) and must not call
//! back into the configuration manager.

mod handle;

pub use handle::{stderr, stdout, HandleEmitter};

use crate::message::Message;
use crate::site::SiteDescriptor;

pub trait Emitter: Send + Sync {
    /// Receive a message produced at `site`.
    fn emit(&self, site: &'static SiteDescriptor, message: Message);
}

/// Discards everything.
pub struct NoopEmitter;

impl Emitter for NoopEmitter {
    fn emit(&self, _site: &'static SiteDescriptor, _message: Message) {}
}

/// Shared no-op instance, used for flush sentinels and disabled targets.
pub static NOOP: NoopEmitter = NoopEmitter;

pub fn noop() -> &'static dyn Emitter {
    &NOOP
}
