//! Bounded LRU result cache with in-flight deduplication.
//!
//! Concurrent `get`s for the same key share one producer run. Only settled
//! successes are kept; a failure removes the entry so the next `get` retries.
//! Entries still in flight are never evicted, so while only in-flight
//! entries exist the cache may briefly hold more than `capacity` keys.
//!
//! Producers run on their own task. A fetch whose callers all gave up still
//! settles, so abandoned keys do not stay in flight forever.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, trace};

type SharedResult<V, E> = Shared<BoxFuture<'static, Result<V, Arc<E>>>>;

enum Entry<V, E> {
    Ready(V),
    InFlight(SharedResult<V, E>),
}

struct State<V, E> {
    entries: HashMap<String, Entry<V, E>>,
    /// Keys by recency, most recent first.
    recency: VecDeque<String>,
}

impl<V: Clone, E> State<V, E> {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.recency.iter().position(|k| k == key) {
            if pos == 0 {
                return;
            }
            if let Some(k) = self.recency.remove(pos) {
                self.recency.push_front(k);
            }
        } else {
            self.recency.push_front(key.to_string());
        }
    }

    fn forget(&mut self, key: &str) {
        self.entries.remove(key);
        self.recency.retain(|k| k != key);
    }

    /// Evict least recently used ready entries until there is room for one more.
    fn make_room(&mut self, capacity: usize) {
        while self.entries.len() >= capacity {
            let victim = self
                .recency
                .iter()
                .rev()
                .find(|k| matches!(self.entries.get(*k), Some(Entry::Ready(_))))
                .cloned();

            match victim {
                Some(key) => {
                    debug!("Evicting {} from result cache", key);
                    self.forget(&key);
                }
                None => break,
            }
        }
    }

    fn settle(&mut self, key: &str, result: &Result<V, Arc<E>>) {
        if !matches!(self.entries.get(key), Some(Entry::InFlight(_))) {
            return;
        }
        match result {
            Ok(value) => {
                self.entries.insert(key.to_string(), Entry::Ready(value.clone()));
            }
            Err(_) => {
                trace!("Producer for {} failed, not caching", key);
                self.forget(key);
            }
        }
    }
}

/// Keyed cache of producer results.
pub struct ResultCache<V, E> {
    capacity: usize,
    state: Arc<Mutex<State<V, E>>>,
}

impl<V, E> ResultCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// A cache holding at most `capacity` settled results (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Arc::new(Mutex::new(State {
                entries: HashMap::new(),
                recency: VecDeque::new(),
            })),
        }
    }

    /// Return the cached result for `key`, or start `producer` to make it.
    ///
    /// `producer` is only invoked on a miss. Callers arriving while it runs
    /// await the same result. Must be called from within a Tokio runtime.
    pub async fn get<F, Fut>(&self, key: &str, producer: F) -> Result<V, Arc<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let pending = {
            let mut state = self.state.lock();
            state.touch(key);

            match state.entries.get(key) {
                Some(Entry::Ready(value)) => {
                    trace!("Result cache hit for {}", key);
                    return Ok(value.clone());
                }
                Some(Entry::InFlight(shared)) => {
                    trace!("Joining in-flight producer for {}", key);
                    shared.clone()
                }
                None => {
                    state.make_room(self.capacity);
                    let shared = self.start(key, producer());
                    state
                        .entries
                        .insert(key.to_string(), Entry::InFlight(shared.clone()));
                    shared
                }
            }
        };

        pending.await
    }

    fn start<Fut>(&self, key: &str, produce: Fut) -> SharedResult<V, E>
    where
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let state: Weak<Mutex<State<V, E>>> = Arc::downgrade(&self.state);
        let key = key.to_string();

        let shared = async move {
            let result = produce.await.map_err(Arc::new);
            if let Some(state) = state.upgrade() {
                state.lock().settle(&key, &result);
            }
            result
        }
        .boxed()
        .shared();

        // Drive the producer even if every caller drops its `get`.
        tokio::spawn(shared.clone());
        shared
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries, ready or in flight.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a settled result is cached for `key`. Does not touch recency.
    pub fn contains(&self, key: &str) -> bool {
        matches!(self.state.lock().entries.get(key), Some(Entry::Ready(_)))
    }

    /// Drop every settled result. Producers in flight keep running.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let ready: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| matches!(entry, Entry::Ready(_)))
            .map(|(key, _)| key.clone())
            .collect();
        for key in ready {
            state.forget(&key);
        }
    }
}

impl<V, E> Clone for ResultCache<V, E> {
    fn clone(&self) -> Self {
        Self {
            capacity: self.capacity,
            state: self.state.clone(),
        }
    }
}
