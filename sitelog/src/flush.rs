//! Flush barrier over the async queue
//!
//! A flush is a shared counter of outstanding acknowledgements. The
//! dispatcher plants one sentinel per producer cache, each carrying a
//! token; draining a sentinel drops its token, and the last drop wakes
//! the waiters. The barrier is weak: it covers queue contents that
//! existed at enqueue time, nothing inserted afterwards.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

struct FlushState {
    pending: AtomicUsize,
    mutex: Mutex<()>,
    condition: Condvar,
}

#[derive(Clone)]
pub struct Flush {
    state: Arc<FlushState>,
}

impl Flush {
    pub fn new() -> Self {
        Self {
            state: Arc::new(FlushState {
                pending: AtomicUsize::new(0),
                mutex: Mutex::new(()),
                condition: Condvar::new(),
            }),
        }
    }

    /// Mint an acknowledgement token.
    pub fn token(&self) -> FlushToken {
        self.state.pending.fetch_add(1, Ordering::Relaxed);
        FlushToken {
            state: self.state.clone(),
        }
    }

    pub fn pending(&self) -> usize {
        self.state.pending.load(Ordering::Relaxed)
    }

    /// Block until every outstanding token has been dropped or `timeout`
    /// elapses. Returns true iff the barrier completed.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.state.mutex.lock().unwrap();
        while self.state.pending.load(Ordering::Relaxed) != 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self
                .state
                .condition
                .wait_timeout(guard, deadline - now)
                .unwrap();
            guard = next;
        }
        true
    }
}

impl Default for Flush {
    fn default() -> Self {
        Self::new()
    }
}

/// One outstanding acknowledgement. Travels inside a sentinel message;
/// dropping it (anywhere) acknowledges.
pub struct FlushToken {
    state: Arc<FlushState>,
}

impl Clone for FlushToken {
    fn clone(&self) -> Self {
        self.state.pending.fetch_add(1, Ordering::Relaxed);
        Self {
            state: self.state.clone(),
        }
    }
}

impl Drop for FlushToken {
    fn drop(&mut self) {
        if self.state.pending.fetch_sub(1, Ordering::Relaxed) == 1 {
            let _guard = self.state.mutex.lock().unwrap();
            self.state.condition.notify_all();
        }
    }
}

impl fmt::Display for FlushToken {
    fn fmt(&self, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // sentinels serialize to nothing
        Ok(())
    }
}
