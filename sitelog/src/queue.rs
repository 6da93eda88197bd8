//! Latency-bounded many-producer many-consumer handoff
//!
//! Producers append to a thread-associated cache ring; consumers drain
//! whole rings. A full producer ring is swapped against a spare at the
//! owning depot and queued for draining; otherwise rings sit until a
//! consumer's periodic sweep rotates them in, which bounds the visibility
//! latency of any accepted item to roughly the configured latency.
//!
//! Lock order is producer-cache lock, then depot lock — never the
//! reverse. Rings move by value; payload never gets copied.

use crate::ring::Ring;
use crate::sync::{default_shard_count, Replicated};
use std::collections::VecDeque;
use std::mem;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Ticket a producer parks on while the depot has no spare ring.
struct Ticket {
    granted: Mutex<bool>,
    condition: Condvar,
}

impl Ticket {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            granted: Mutex::new(false),
            condition: Condvar::new(),
        })
    }

    fn grant(&self) {
        let mut granted = self.granted.lock().unwrap();
        *granted = true;
        self.condition.notify_one();
    }

    fn consume_grant(&self) -> bool {
        let mut granted = self.granted.lock().unwrap();
        mem::take(&mut *granted)
    }

    /// Wait for a grant until `deadline`; false on timeout.
    fn wait_until(&self, deadline: Instant) -> bool {
        let mut granted = self.granted.lock().unwrap();
        while !*granted {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, result) = self
                .condition
                .wait_timeout(granted, deadline - now)
                .unwrap();
            granted = guard;
            if result.timed_out() && !*granted {
                return false;
            }
        }
        *granted = false;
        true
    }
}

/// Per-consumer cursor state inside a depot.
struct ReadHead<T> {
    drain: Ring<T>,
    deadline: Instant,
    occupied: bool,
}

struct DepotState<T> {
    /// Full rings awaiting a consumer, oldest first.
    ready: VecDeque<Ring<T>>,
    /// Empty rings available for swapping into producer caches.
    spare: Vec<Ring<T>>,
    heads: Vec<ReadHead<T>>,
    waiters: VecDeque<Arc<Ticket>>,
    ready_limit: usize,
}

impl<T> DepotState<T> {
    /// Hand a spare back and wake one parked producer.
    fn return_spare(&mut self, ring: Ring<T>) {
        // placeholder rings from mem::take never enter the pool
        if ring.capacity() == 0 {
            return;
        }
        self.spare.push(ring);
        if let Some(ticket) = self.waiters.pop_front() {
            ticket.grant();
        }
    }

    fn can_accept(&self) -> bool {
        !self.spare.is_empty() && self.ready.len() < self.ready_limit
    }
}

struct Depot<T> {
    state: Mutex<DepotState<T>>,
    consumers: Condvar,
}

/// Concurrent queue oriented on maintaining a maximum latency.
pub struct LatencyQueue<T> {
    caches: Replicated<Ring<T>>,
    depots: Vec<Depot<T>>,
    latency: Duration,
}

impl<T: Send> LatencyQueue<T> {
    /// Build a queue with `2 × available parallelism` producer caches.
    ///
    /// `capacity` is per cache ring, `partitions` is the depot count P,
    /// `heads` the consumer slots per depot H; `slots()` returns P·H.
    pub fn new(latency: Duration, capacity: usize, partitions: usize, heads: usize) -> Self {
        let caches = default_shard_count().max(partitions);
        Self::with_cache_count(latency, capacity, partitions, heads, caches)
    }

    pub fn with_cache_count(
        latency: Duration,
        capacity: usize,
        partitions: usize,
        heads: usize,
        caches: usize,
    ) -> Self {
        assert!(partitions > 0 && heads > 0 && capacity > 0);
        let caches = caches.max(partitions);
        let now = Instant::now();
        let depots = (0..partitions)
            .map(|index| {
                let owned = (caches - index).div_ceil(partitions);
                let spares = owned + heads;
                Depot {
                    state: Mutex::new(DepotState {
                        ready: VecDeque::with_capacity(spares),
                        spare: (0..spares).map(|_| Ring::new(capacity)).collect(),
                        heads: (0..heads)
                            .map(|_| ReadHead {
                                drain: Ring::default(),
                                deadline: now + latency,
                                occupied: false,
                            })
                            .collect(),
                        waiters: VecDeque::new(),
                        ready_limit: spares,
                    }),
                    consumers: Condvar::new(),
                }
            })
            .collect();
        Self {
            caches: Replicated::new(caches, |_| Ring::new(capacity)),
            depots,
            latency,
        }
    }

    /// Number of consumer slots; every slot must be serviced or latency
    /// is unbounded.
    pub fn slots(&self) -> usize {
        self.depots.len() * self.depots[0].state.lock().unwrap().heads.len()
    }

    pub fn cache_count(&self) -> usize {
        self.caches.len()
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }

    fn depot_of(&self, cache_index: usize) -> &Depot<T> {
        &self.depots[cache_index % self.depots.len()]
    }

    /// Insert into the calling thread's cache shard.
    ///
    /// Returns false when `timeout` elapses with the shard full and no
    /// spare ring available; the item is dropped without side effects.
    pub fn insert(&self, value: T, timeout: Duration) -> bool {
        self.insert_at(self.caches.shard_index(), value, timeout)
    }

    /// Insert into a specific cache shard (used by the flush barrier to
    /// plant one sentinel per cache).
    pub fn insert_at(&self, cache_index: usize, value: T, timeout: Duration) -> bool {
        let cache_index = cache_index % self.caches.len();
        let deadline = Instant::now() + timeout;
        let mut value = Some(value);
        loop {
            enum Outcome {
                Inserted,
                Parked(Arc<Ticket>),
            }
            let outcome = self.caches.at(cache_index, |ring| {
                if let Err(rejected) = ring.try_push(value.take().unwrap()) {
                    value = Some(rejected);
                } else {
                    return Outcome::Inserted;
                }
                // ring is full: try to hand it to the owning depot
                let depot = self.depot_of(cache_index);
                let mut state = depot.state.lock().unwrap();
                if state.can_accept() {
                    let spare = state.spare.pop().unwrap();
                    let full = mem::replace(ring, spare);
                    state.ready.push_back(full);
                    depot.consumers.notify_one();
                    ring.try_push(value.take().unwrap()).ok();
                    return Outcome::Inserted;
                }
                let ticket = Ticket::new();
                state.waiters.push_back(ticket.clone());
                Outcome::Parked(ticket)
            });
            match outcome {
                Outcome::Inserted => return true,
                Outcome::Parked(ticket) => {
                    if !ticket.wait_until(deadline) {
                        let depot = self.depot_of(cache_index);
                        let mut state = depot.state.lock().unwrap();
                        state.waiters.retain(|other| !Arc::ptr_eq(other, &ticket));
                        drop(state);
                        // a grant that raced the timeout is still honored
                        if !ticket.consume_grant() {
                            return false;
                        }
                    }
                }
            }
        }
    }

    /// Drain items for consumer slot `slot_index` until `stop` returns
    /// true. Returns false immediately if another consumer occupies the
    /// slot.
    pub fn remove(
        &self,
        slot_index: usize,
        mut stop: impl FnMut() -> bool,
        mut receive: impl FnMut(T),
    ) -> bool {
        let depot_index = slot_index % self.depots.len();
        let head_index = slot_index / self.depots.len();
        let depot = &self.depots[depot_index];

        let mut state = depot.state.lock().unwrap();
        if state.heads[head_index].occupied {
            return false;
        }
        state.heads[head_index].occupied = true;

        loop {
            let mut ring = mem::take(&mut state.heads[head_index].drain);
            if !ring.is_empty() {
                drop(state);
                let mut stopped = stop();
                while !stopped {
                    match ring.pop() {
                        Some(item) => {
                            receive(item);
                            stopped = stop();
                        }
                        None => break,
                    }
                }
                state = depot.state.lock().unwrap();
                if stopped {
                    // partial progress stays with the head for the next
                    // consumer
                    state.heads[head_index].drain = ring;
                    break;
                }
                state.return_spare(ring);
                continue;
            }

            // a put-back ring that drained exactly dry comes through here
            state.return_spare(ring);

            if stop() {
                break;
            }

            if state.ready.is_empty() {
                let deadline = state.heads[head_index].deadline;
                let now = Instant::now();
                if now < deadline {
                    let (guard, result) = depot
                        .consumers
                        .wait_timeout(state, deadline - now)
                        .unwrap();
                    state = guard;
                    if !result.timed_out() {
                        continue;
                    }
                }
                state.heads[head_index].deadline += self.latency;
                drop(state);
                self.sweep(depot_index);
                state = depot.state.lock().unwrap();
            }

            if let Some(full) = state.ready.pop_front() {
                let previous = mem::replace(&mut state.heads[head_index].drain, full);
                state.return_spare(previous);
            }
        }

        state.heads[head_index].occupied = false;
        true
    }

    /// Rotate non-empty producer rings owned by this depot into its
    /// ready list. Runs outside the depot lock; caches are try-locked so
    /// an active producer is simply skipped until the next period.
    fn sweep(&self, depot_index: usize) {
        let depot = &self.depots[depot_index];
        let mut cache_index = depot_index;
        while cache_index < self.caches.len() {
            self.caches.try_at(cache_index, |ring| {
                if ring.is_empty() {
                    return;
                }
                let mut state = depot.state.lock().unwrap();
                if state.can_accept() {
                    let spare = state.spare.pop().unwrap();
                    let full = mem::replace(ring, spare);
                    state.ready.push_back(full);
                }
            });
            cache_index += self.depots.len();
        }
    }
}
