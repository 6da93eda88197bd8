//! Asynchronous dispatch: worker threads draining the latency queue
//!
//! The dispatcher owns a latency queue and one worker thread per
//! consumer slot. A deferred emitter forwards `(destination, site,
//! message)` actions into the queue instead of invoking the destination;
//! workers replay them on their own threads.

use crate::emitters::{noop, Emitter};
use crate::flush::Flush;
use crate::message::Message;
use crate::queue::LatencyQueue;
use crate::site::SiteDescriptor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// A deferred emission: replay `message` from `site` into `emitter`.
pub struct Action {
    pub emitter: &'static dyn Emitter,
    pub site: &'static SiteDescriptor,
    pub message: Message,
}

struct Worker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

pub struct Dispatcher {
    queue: Arc<LatencyQueue<Action>>,
    workers: Mutex<Vec<Worker>>,
    producer_timeout: Duration,
}

/// Default producer-side insert timeout.
pub const DEFAULT_PRODUCER_TIMEOUT: Duration = Duration::from_millis(100);

// site used for flush sentinels; never registered, never enabled
static FLUSH_SITE: SiteDescriptor = SiteDescriptor::new("sitelog::flush", "sitelog", "flush");

impl Dispatcher {
    /// Build a dispatcher over a fresh queue.
    ///
    /// `latency` bounds item visibility, `capacity` sizes each producer
    /// ring, `partitions`/`heads` shape the consumer side (see
    /// [`LatencyQueue`]).
    pub fn new(latency: Duration, capacity: usize, partitions: usize, heads: usize) -> Self {
        Self {
            queue: Arc::new(LatencyQueue::new(latency, capacity, partitions, heads)),
            workers: Mutex::new(Vec::new()),
            producer_timeout: DEFAULT_PRODUCER_TIMEOUT,
        }
    }

    pub fn with_producer_timeout(mut self, timeout: Duration) -> Self {
        self.producer_timeout = timeout;
        self
    }

    pub fn slots(&self) -> usize {
        self.queue.slots()
    }

    /// Spawn one worker per consumer slot. Idempotent.
    pub fn run(&self) {
        let mut workers = self.workers.lock().unwrap();
        if !workers.is_empty() {
            return;
        }
        for slot in 0..self.queue.slots() {
            let stop = Arc::new(AtomicBool::new(false));
            let queue = self.queue.clone();
            let worker_stop = stop.clone();
            let handle = std::thread::Builder::new()
                .name(format!("sitelog-worker-{slot}"))
                .spawn(move || {
                    queue.remove(
                        slot,
                        || worker_stop.load(Ordering::Relaxed),
                        |action: Action| action.emitter.emit(action.site, action.message),
                    );
                })
                .expect("failed to spawn dispatcher worker");
            workers.push(Worker {
                stop,
                handle: Some(handle),
            });
        }
    }

    /// Queue a deferred emission.
    ///
    /// On queue-full timeout the message is dropped with one fallback
    /// line on stderr.
    pub fn insert(&self, site: &'static SiteDescriptor, emitter: &'static dyn Emitter, message: Message) {
        let action = Action {
            emitter,
            site,
            message,
        };
        if !self.queue.insert(action, self.producer_timeout) {
            eprintln!(
                "sitelog: async queue full, dropping message from {}",
                site.location()
            );
        }
    }

    /// Plant one flush sentinel in every producer cache.
    ///
    /// Returns true iff every sentinel was accepted; a refused sentinel
    /// (full cache past the timeout) acknowledges immediately when its
    /// token drops, so `flush.wait` still terminates.
    pub fn enqueue_flush(&self, flush: &Flush) -> bool {
        let mut complete = true;
        for cache in 0..self.queue.cache_count() {
            let mut message = Message::new();
            message.format((flush.token(),));
            let action = Action {
                emitter: noop(),
                site: &FLUSH_SITE,
                message,
            };
            complete &= self.queue.insert_at(cache, action, self.producer_timeout);
        }
        complete
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let mut workers = self.workers.lock().unwrap();
        for worker in workers.iter() {
            worker.stop.store(true, Ordering::Relaxed);
        }
        // the queue's latency deadline bounds how long a worker sleeps
        for worker in workers.iter_mut() {
            if let Some(handle) = worker.handle.take() {
                handle.join().expect("dispatcher worker panicked");
            }
        }
    }
}

/// Thin forwarder that moves messages into a dispatcher instead of
/// invoking the destination emitter inline.
pub struct DeferredEmitter {
    dispatcher: Arc<Dispatcher>,
    destination: &'static dyn Emitter,
}

impl DeferredEmitter {
    pub fn new(dispatcher: Arc<Dispatcher>, destination: &'static dyn Emitter) -> Self {
        Self {
            dispatcher,
            destination,
        }
    }
}

impl Emitter for DeferredEmitter {
    fn emit(&self, site: &'static SiteDescriptor, message: Message) {
        self.dispatcher.insert(site, self.destination, message);
    }
}
