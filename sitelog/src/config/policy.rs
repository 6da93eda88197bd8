//! Policies project configuration onto the sites they match

use super::{ChangeSet, SiteSet};
use crate::emitters::Emitter;
use crate::levels::LevelSet;
use crate::site::{EmitterCell, SiteRef};
use std::ptr;
use std::sync::{Arc, Mutex};

/// A capability that selects sites and configures their filter state.
///
/// `select` must be a pure predicate over site identity. `apply` receives
/// the pending membership delta: it stamps configuration onto adopted and
/// steady-state sites and clears its claim on released ones.
pub trait Policy: Send + Sync {
    /// Append the subset of `candidates` this policy matches to `matches`.
    fn select(&self, candidates: &SiteSet, matches: &mut Vec<SiteRef>);

    /// Project configuration onto a membership delta.
    fn apply(&self, changes: &ChangeSet);
}

struct Config {
    // The live cell sites point at, plus every predecessor. Retired cells
    // must survive until the policy drops: sites only stop pointing at
    // them once an apply pass has rewritten their pointers.
    active: Option<Box<EmitterCell>>,
    retired: Vec<Box<EmitterCell>>,
    levels: LevelSet,
}

impl Config {
    fn cell_ptr(&self) -> *mut EmitterCell {
        match &self.active {
            Some(cell) => cell.as_ref() as *const EmitterCell as *mut EmitterCell,
            None => ptr::null_mut(),
        }
    }
}

/// Composes a unary site predicate with an `(emitter, levels)` tuple.
pub struct PredicatePolicy<P> {
    predicate: P,
    config: Mutex<Config>,
}

impl<P> PredicatePolicy<P>
where
    P: Fn(SiteRef) -> bool + Send + Sync,
{
    pub fn new(emitter: Option<&'static dyn Emitter>, levels: LevelSet, predicate: P) -> Self {
        Self {
            predicate,
            config: Mutex::new(Config {
                active: emitter.map(|emitter| Box::new(EmitterCell(emitter))),
                retired: Vec::new(),
                levels,
            }),
        }
    }

    /// Reconfigure the emitter. Call `update` on the owning priority to
    /// broadcast the change to managed sites.
    pub fn set_emitter(&self, emitter: Option<&'static dyn Emitter>) {
        let mut config = self.config.lock().unwrap();
        let previous = std::mem::replace(
            &mut config.active,
            emitter.map(|emitter| Box::new(EmitterCell(emitter))),
        );
        if let Some(cell) = previous {
            config.retired.push(cell);
        }
    }

    /// Reconfigure the enabled levels. Call `update` to broadcast.
    pub fn set_levels(&self, levels: LevelSet) {
        self.config.lock().unwrap().levels = levels;
    }

    pub fn levels(&self) -> LevelSet {
        self.config.lock().unwrap().levels
    }
}

impl<P> Policy for PredicatePolicy<P>
where
    P: Fn(SiteRef) -> bool + Send + Sync,
{
    fn select(&self, candidates: &SiteSet, matches: &mut Vec<SiteRef>) {
        for site in candidates {
            if (self.predicate)(*site) {
                matches.push(*site);
            }
        }
    }

    fn apply(&self, changes: &ChangeSet) {
        let config = self.config.lock().unwrap();
        let cell = config.cell_ptr();
        for site in changes.inserted.iter().chain(changes.managed.iter()) {
            site.set_levels(config.levels);
            site.set_emitter(cell);
        }
        for site in &changes.removed {
            site.set_emitter(ptr::null_mut());
        }
    }
}

/// The match-all predicate used for default policies.
pub type MatchAll = fn(SiteRef) -> bool;

/// A policy matching every site, typically installed at the lowest
/// priority so no site goes unmanaged.
pub type DefaultPolicy = PredicatePolicy<MatchAll>;

/// Helper to build a shared predicate policy.
pub fn policy<P>(
    emitter: Option<&'static dyn Emitter>,
    levels: LevelSet,
    predicate: P,
) -> Arc<PredicatePolicy<P>>
where
    P: Fn(SiteRef) -> bool + Send + Sync,
{
    Arc::new(PredicatePolicy::new(emitter, levels, predicate))
}

/// Helper to build a shared match-all policy.
pub fn match_all(emitter: Option<&'static dyn Emitter>, levels: LevelSet) -> Arc<DefaultPolicy> {
    Arc::new(PredicatePolicy::new(emitter, levels, (|_| true) as MatchAll))
}
