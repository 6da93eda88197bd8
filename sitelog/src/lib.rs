//! sitelog
//!
//! A dynamic, structured logging runtime built around three ideas:
//!
//! - every physical log statement is a **site** with a wait-free fast
//!   path (one relaxed pointer load and a bitset test when disabled);
//! - filtering state is computed at configuration time by a
//!   priority-ordered **policy** registry, so the emit path never
//!   matches anything;
//! - asynchronous delivery rides a **latency-bounded queue** of rings
//!   swapped between producer caches and consumer depots, with a weak
//!   flush barrier.
//!
//! # Examples
//! ```
//! use sitelog::{sitelog, Level};
//!
//! // first emission registers the site with the global configuration;
//! // the default policy routes it to stdout with all levels enabled
//! sitelog!(Level::Info, "hello from ", module_path!());
//!
//! // arguments are captured lazily; a disabled site evaluates nothing
//! sitelog!(tag: "db", Level::Verbose, "rows=", 12_u64);
//! ```
//!
//! Policies reconfigure sites at runtime:
//! ```
//! use sitelog::config::policy;
//! use sitelog::{global, LevelSet, Level, SiteRef};
//!
//! let noisy = policy(
//!     Some(sitelog::emitters::stderr()),
//!     LevelSet::up_to(Level::Warning),
//!     |site: SiteRef| site.tag() == "db",
//! );
//! global::insert_policy(10, noisy).unwrap();
//! ```

// crate-specific lint exceptions:
#![allow(unsafe_code, clippy::missing_errors_doc, clippy::inline_always)]

pub mod buffer;
pub mod config;
pub mod dispatcher;
pub mod emitters;
pub mod errors;
pub mod flush;
pub mod global;
pub mod levels;
pub mod message;
pub mod queue;
pub mod ring;
pub mod site;
pub mod sync;
pub mod test_utils;

#[macro_use]
mod macros;

pub use errors::{Error, Result};
pub use levels::{Level, LevelSet};
pub use message::{ArgView, Capture, Message, Value};
pub use site::{EmitterCell, SiteDescriptor, SiteRef};

pub mod prelude {
    pub use crate::config::{match_all, policy, Policy, PredicatePolicy};
    pub use crate::dispatcher::{DeferredEmitter, Dispatcher};
    pub use crate::emitters::{noop, Emitter, HandleEmitter};
    pub use crate::flush::Flush;
    pub use crate::global::{
        insert_policy, remove_policy, rescan, set_default_emitter, set_default_levels, update,
        visit_all_sites,
    };
    pub use crate::levels::{Level, LevelSet};
    pub use crate::message::Message;
    pub use crate::site::{SiteDescriptor, SiteRef};
    pub use crate::sitelog;
}
