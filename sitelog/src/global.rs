//! Process-global configuration and the bootstrap path
//!
//! A single configuration manager, a match-all default policy at the
//! lowest priority, and the shared buffer cache live here as
//! initialized-on-first-use statics. Free functions mirror the manager's
//! surface for callers that don't want to thread the instance around.

use crate::buffer::BufferCache;
use crate::config::{match_all, Configuration, DefaultPolicy, Policy};
use crate::emitters::{self, Emitter};
use crate::errors::Result;
use crate::levels::LevelSet;
use crate::message::Message;
use crate::site::{EmitterCell, SiteDescriptor, SiteRef};
use crate::sync::default_shard_count;
use lazy_static::lazy_static;
use std::sync::Arc;

/// Priority of the default match-all policy.
pub const DEFAULT_PRIORITY: i32 = i32::MIN;

/// First-emission hook for macro-declared sites.
///
/// Every embedded site starts out pointing at this emitter. The first
/// message routed through it registers the site with the global
/// configuration, then re-dispatches through whatever emitter the
/// configuration assigned.
pub struct BootstrapEmitter;

impl Emitter for BootstrapEmitter {
    fn emit(&self, site: &'static SiteDescriptor, message: Message) {
        configuration().insert_site(SiteRef(site));
        let cell = site.emitter_cell();
        let bootstrap = &BOOTSTRAP_CELL as *const EmitterCell as *mut EmitterCell;
        // unmatched sites keep the bootstrap pointer; don't recurse
        if !cell.is_null() && cell != bootstrap {
            let emitter = unsafe { (*cell).0 };
            emitter.emit(site, message);
        }
    }
}

pub static BOOTSTRAP: BootstrapEmitter = BootstrapEmitter;

/// The cell embedded sites are born pointing at.
pub static BOOTSTRAP_CELL: EmitterCell = EmitterCell(&BOOTSTRAP);

lazy_static! {
    static ref DEFAULT_POLICY: Arc<DefaultPolicy> =
        match_all(Some(emitters::stdout()), LevelSet::all());
    static ref CONFIGURATION: Configuration = {
        let configuration = Configuration::new();
        configuration
            .insert_policy(DEFAULT_PRIORITY, DEFAULT_POLICY.clone())
            .expect("fresh configuration cannot have a priority conflict");
        configuration
    };
    static ref BUFFER_CACHE: Arc<BufferCache> =
        BufferCache::with_defaults(default_shard_count());
}

/// The process-global configuration manager.
pub fn configuration() -> &'static Configuration {
    &CONFIGURATION
}

/// The process-global default policy (priority `DEFAULT_PRIORITY`).
pub fn default_policy() -> &'static Arc<DefaultPolicy> {
    &DEFAULT_POLICY
}

/// The shared message-buffer cache.
pub fn buffer_cache() -> &'static Arc<BufferCache> {
    &BUFFER_CACHE
}

/// Route sites the default policy manages to `emitter` (None disables).
pub fn set_default_emitter(emitter: Option<&'static dyn Emitter>) {
    DEFAULT_POLICY.set_emitter(emitter);
    configuration()
        .update(DEFAULT_PRIORITY)
        .expect("the default policy is always registered");
}

/// Set the level mask the default policy projects onto its sites.
pub fn set_default_levels(levels: LevelSet) {
    DEFAULT_POLICY.set_levels(levels);
    configuration()
        .update(DEFAULT_PRIORITY)
        .expect("the default policy is always registered");
}

pub fn insert_policy(priority: i32, policy: Arc<dyn Policy>) -> Result<()> {
    configuration().insert_policy(priority, policy)
}

pub fn remove_policy(priority: i32, policy: &Arc<dyn Policy>) -> Result<()> {
    configuration().remove_policy(priority, policy)
}

pub fn rescan(priority: i32) -> Result<()> {
    configuration().rescan(priority)
}

pub fn update(priority: i32) -> Result<()> {
    configuration().update(priority)
}

pub fn visit_all_sites(visit: impl FnMut(SiteRef)) {
    configuration().visit_all_sites(visit);
}

/// Register a site explicitly (macro sites register themselves on first
/// emission).
pub fn register_site(site: &'static SiteDescriptor) -> bool {
    configuration().insert_site(SiteRef(site))
}

pub fn deregister_site(site: &'static SiteDescriptor) -> bool {
    configuration().remove_site(SiteRef(site))
}
