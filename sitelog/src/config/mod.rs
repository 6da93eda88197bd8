//! Configuration manager: a priority-ordered policy registry
//!
//! Sites are configured by the highest-priority policy that matches them.
//! Because the emit path must stay branch-light, all matching and state
//! propagation happens here, at configuration time:
//!
//!   - at site insertion/removal the one site is evaluated against the
//!     current policy set;
//!   - at policy insertion a new policy steals matching sites from lower
//!     priorities;
//!   - at policy removal lower priorities compete for the orphans;
//!   - at rescan a policy re-evaluates its own holdings (and lower
//!     priorities are re-evaluated against it, since its predicate may
//!     have changed).
//!
//! Ordering contract: a release pass (which nulls the losing policy's
//! claim on a site) always applies before the adoption pass that claims
//! it. A message emitted inside that window is dropped, never misrouted.

mod policy;

pub use policy::{match_all, policy, DefaultPolicy, MatchAll, Policy, PredicatePolicy};

use crate::errors::{Error, Result};
use crate::site::SiteRef;
use std::collections::{BTreeMap, HashSet};
use std::mem;
use std::sync::{Arc, Mutex};

pub type SiteSet = HashSet<SiteRef>;

/// Pending membership delta for one policy.
#[derive(Default)]
pub struct ChangeSet {
    /// Sites newly adopted this cycle.
    pub inserted: SiteSet,
    /// Sites released this cycle.
    pub removed: SiteSet,
    /// Steady-state holdings.
    pub managed: SiteSet,
}

impl ChangeSet {
    pub fn pending(&self) -> bool {
        !self.inserted.is_empty() || !self.removed.is_empty()
    }

    /// Collapse the delta after an apply: adoptions become steady state.
    fn fold(&mut self) {
        for site in self.inserted.drain() {
            self.managed.insert(site);
        }
        self.removed.clear();
    }
}

struct Node {
    policy: Arc<dyn Policy>,
    changes: ChangeSet,
}

impl Node {
    fn new(policy: Arc<dyn Policy>) -> Self {
        Self {
            policy,
            changes: ChangeSet::default(),
        }
    }

    /// Accept sites this policy matches, removing them from the offering.
    fn adopt(&mut self, offered: &mut SiteSet, scratch: &mut Vec<SiteRef>) {
        self.policy.select(offered, scratch);
        for site in scratch.drain(..) {
            offered.remove(&site);
            self.changes.inserted.insert(site);
        }
    }

    /// Steal managed sites this policy matches from another node.
    fn assume(&mut self, other: &mut Node, scratch: &mut Vec<SiteRef>) {
        self.policy.select(&other.changes.managed, scratch);
        for site in scratch.drain(..) {
            other.changes.managed.remove(&site);
            other.changes.removed.insert(site);
            self.changes.inserted.insert(site);
        }
    }

    /// Re-evaluate the managed set against the current predicate;
    /// unmatched sites move to `removed`.
    fn rescan(&mut self, scratch: &mut Vec<SiteRef>) {
        self.policy.select(&self.changes.managed, scratch);
        let previous = mem::take(&mut self.changes.managed);
        self.changes.removed.extend(previous);
        for site in scratch.drain(..) {
            self.changes.removed.remove(&site);
            self.changes.managed.insert(site);
        }
    }

    /// Apply pending changes (or re-broadcast current state when forced)
    /// and collapse the delta.
    fn update(&mut self, force: bool) {
        if force || self.changes.pending() {
            self.policy.apply(&self.changes);
            self.changes.fold();
        }
    }
}

/// Priority-ordered policy registry. Higher priorities win.
pub struct Configuration {
    state: Mutex<Registry>,
}

struct Registry {
    nodes: BTreeMap<i32, Node>,
    scratch: Vec<SiteRef>,
}

impl Configuration {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Registry {
                nodes: BTreeMap::new(),
                scratch: Vec::new(),
            }),
        }
    }

    /// Register a site, offering it to policies in descending priority.
    ///
    /// Returns true iff some policy matched (without a default policy a
    /// site can go unmatched).
    pub fn insert_site(&self, site: SiteRef) -> bool {
        let mut registry = self.state.lock().unwrap();
        let registry = &mut *registry;
        let mut offered: SiteSet = std::iter::once(site).collect();
        for node in registry.nodes.values_mut().rev() {
            node.adopt(&mut offered, &mut registry.scratch);
            if offered.is_empty() {
                node.update(false);
                return true;
            }
        }
        false
    }

    /// Deregister a site. Returns false if no policy manages it.
    pub fn remove_site(&self, site: SiteRef) -> bool {
        let mut registry = self.state.lock().unwrap();
        for node in registry.nodes.values_mut().rev() {
            if node.changes.managed.remove(&site) {
                node.changes.removed.insert(site);
                node.update(false);
                return true;
            }
        }
        false
    }

    /// Insert a policy, stealing matching sites from lower priorities.
    ///
    /// Release passes on the losing nodes apply before the new policy's
    /// adoption pass.
    pub fn insert_policy(&self, priority: i32, policy: Arc<dyn Policy>) -> Result<()> {
        let mut registry = self.state.lock().unwrap();
        let registry = &mut *registry;
        if registry.nodes.contains_key(&priority) {
            return Err(Error::PriorityOccupied(priority));
        }
        let mut node = Node::new(policy);
        for lower in registry.nodes.range_mut(..priority).rev() {
            node.assume(lower.1, &mut registry.scratch);
        }
        for lower in registry.nodes.range_mut(..priority).rev() {
            lower.1.update(false);
        }
        node.update(false);
        registry.nodes.insert(priority, node);
        Ok(())
    }

    /// Remove a policy, offering its sites to lower priorities.
    ///
    /// The removed policy's release pass applies first; residual orphans
    /// end up disabled.
    pub fn remove_policy(&self, priority: i32, policy: &Arc<dyn Policy>) -> Result<()> {
        let mut registry = self.state.lock().unwrap();
        let registry = &mut *registry;
        match registry.nodes.get(&priority) {
            None => return Err(Error::UnknownPriority(priority)),
            Some(node) if !Arc::ptr_eq(&node.policy, policy) => {
                return Err(Error::PolicyMismatch(priority));
            }
            Some(_) => {}
        }
        let mut node = registry.nodes.remove(&priority).unwrap();
        for lower in registry.nodes.range_mut(..priority).rev() {
            lower.1.assume(&mut node, &mut registry.scratch);
        }
        let residual = mem::take(&mut node.changes.managed);
        node.changes.removed.extend(residual);
        node.update(false);
        for lower in registry.nodes.range_mut(..priority).rev() {
            lower.1.update(false);
        }
        Ok(())
    }

    /// Re-evaluate matches for the policy at `priority`.
    ///
    /// Orphans are offered to lower priorities top-down; lower priorities
    /// are re-evaluated against the rescanned policy. All release passes
    /// apply before the rescanned node's own adoption pass.
    pub fn rescan(&self, priority: i32) -> Result<()> {
        let mut registry = self.state.lock().unwrap();
        let registry = &mut *registry;
        if !registry.nodes.contains_key(&priority) {
            return Err(Error::UnknownPriority(priority));
        }
        let mut node = registry.nodes.remove(&priority).unwrap();
        node.rescan(&mut registry.scratch);

        // Orphans compete down the priority order; adopted ones stay in
        // the rescanned node's removed set (its release pass runs first,
        // the adopter's pass claims them after).
        let mut orphans = node.changes.removed.clone();
        for lower in registry.nodes.range_mut(..priority).rev() {
            lower.1.adopt(&mut orphans, &mut registry.scratch);
            node.assume(lower.1, &mut registry.scratch);
        }

        // Releases first everywhere, the rescanned node's adoptions last.
        let delayed = mem::take(&mut node.changes.inserted);
        node.update(false);
        for lower in registry.nodes.range_mut(..priority).rev() {
            lower.1.update(false);
        }
        node.changes.inserted = delayed;
        node.update(true);
        registry.nodes.insert(priority, node);
        Ok(())
    }

    /// Re-broadcast current state to the sites managed at `priority`.
    ///
    /// Idempotent; used after mutating a policy's parameters in place.
    pub fn update(&self, priority: i32) -> Result<()> {
        let mut registry = self.state.lock().unwrap();
        match registry.nodes.get_mut(&priority) {
            Some(node) => {
                node.update(true);
                Ok(())
            }
            None => Err(Error::UnknownPriority(priority)),
        }
    }

    /// Visit every registered site under the manager lock.
    pub fn visit_all_sites(&self, mut visit: impl FnMut(SiteRef)) {
        let registry = self.state.lock().unwrap();
        for node in registry.nodes.values() {
            for site in &node.changes.managed {
                visit(*site);
            }
        }
    }

    /// Priority of the policy currently managing `site`, if any.
    pub fn managing_priority(&self, site: SiteRef) -> Option<i32> {
        let registry = self.state.lock().unwrap();
        registry
            .nodes
            .iter()
            .find(|(_, node)| node.changes.managed.contains(&site))
            .map(|(priority, _)| *priority)
    }

    pub fn policy_count(&self) -> usize {
        self.state.lock().unwrap().nodes.len()
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}
