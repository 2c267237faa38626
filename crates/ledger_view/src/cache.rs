//! Process-wide keyed store for query results.
//!
//! Entries are keyed by [`QueryKey`] (the serialized descriptor). Each entry
//! keeps the last known data even while it is stale, loading or failed, so a
//! reader can keep showing rows while a refetch is outstanding.
//!
//! At most one fetch per key is in flight: concurrent readers join the
//! outstanding fetch through a `watch` channel that flips to `true` when it
//! settles. If the fetching future is dropped before settling, its guard
//! releases the slot and wakes the joined readers, which then fetch
//! themselves.
//!
//! Entries that are observed (see [`QueryCache::observe`]) are refetched in
//! the background as soon as they are invalidated, and are never evicted.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use api_types::transaction::TransactionPage;
use serde_json::Value;
use tokio::sync::watch;

use crate::{
    client::LedgerApi,
    descriptor::{Invalidate, QueryDescriptor, QueryKey, TRANSACTIONS},
    error::ClientError,
};

/// Data held by an entry.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Transactions(TransactionPage),
    View(Value),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryStatus {
    Absent,
    Loading,
    Fresh,
    Stale,
    Error,
}

/// Point-in-time copy of an entry.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub status: EntryStatus,
    pub data: Option<Arc<Payload>>,
    pub error: Option<ClientError>,
    /// Invalidated (or expired) and not yet refetched. Can be true while
    /// `status` is `Loading` when the refetch is already running.
    pub stale: bool,
    pub fetched_at: Option<Instant>,
}

impl CacheEntry {
    fn absent() -> Self {
        Self {
            status: EntryStatus::Absent,
            data: None,
            error: None,
            stale: false,
            fetched_at: None,
        }
    }

    pub fn page(&self) -> Option<&TransactionPage> {
        match self.data.as_deref() {
            Some(Payload::Transactions(page)) => Some(page),
            _ => None,
        }
    }

    pub fn view(&self) -> Option<&Value> {
        match self.data.as_deref() {
            Some(Payload::View(value)) => Some(value),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.status == EntryStatus::Loading
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Network fetches started (retries not included).
    pub fetches: u64,
    /// Reads that joined an in-flight fetch instead of starting one.
    pub deduplicated: u64,
    pub retries: u64,
    /// Invalidation rounds, one per [`QueryCache::invalidate`] call.
    pub invalidations: u64,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CacheOptions {
    /// Maximum number of entries; least recently used ones are evicted.
    pub capacity: Option<usize>,
    /// Age after which a fresh entry is refetched on the next read.
    pub stale_after: Option<Duration>,
}

/// Pages rewritten by [`QueryCache::write_pages`], with the data each one
/// held before.
#[derive(Debug, Default)]
pub struct PageRollback {
    pages: Vec<RewrittenPage>,
}

impl PageRollback {
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

#[derive(Debug)]
struct RewrittenPage {
    descriptor: QueryDescriptor,
    previous: Payload,
    written: Arc<Payload>,
}

#[derive(Debug)]
struct Flight {
    id: u64,
    done: watch::Receiver<bool>,
}

#[derive(Debug)]
struct Slot {
    descriptor: QueryDescriptor,
    data: Option<Arc<Payload>>,
    error: Option<ClientError>,
    stale: bool,
    fetched_at: Option<Instant>,
    flight: Option<Flight>,
    generation: u64,
    observers: usize,
    last_used: u64,
}

impl Slot {
    fn new(descriptor: QueryDescriptor, tick: u64) -> Self {
        Self {
            descriptor,
            data: None,
            error: None,
            stale: false,
            fetched_at: None,
            flight: None,
            generation: 0,
            observers: 0,
            last_used: tick,
        }
    }

    fn expired(&self, stale_after: Option<Duration>) -> bool {
        match (stale_after, self.fetched_at) {
            (Some(max_age), Some(fetched_at)) => fetched_at.elapsed() >= max_age,
            _ => false,
        }
    }

    fn needs_fetch(&self, stale_after: Option<Duration>) -> bool {
        self.data.is_none() || self.error.is_some() || self.stale || self.expired(stale_after)
    }

    fn snapshot(&self, stale_after: Option<Duration>) -> CacheEntry {
        let stale = self.stale || self.expired(stale_after);
        let status = if self.flight.is_some() {
            EntryStatus::Loading
        } else if self.error.is_some() {
            EntryStatus::Error
        } else if self.data.is_none() {
            EntryStatus::Absent
        } else if stale {
            EntryStatus::Stale
        } else {
            EntryStatus::Fresh
        };

        CacheEntry {
            status,
            data: self.data.clone(),
            error: self.error.clone(),
            stale,
            fetched_at: self.fetched_at,
        }
    }
}

#[derive(Debug)]
struct Inner {
    slots: HashMap<QueryKey, Slot>,
    options: CacheOptions,
    tick: u64,
    next_flight: u64,
    /// Bumped by `clear`; observers from an older epoch no longer count.
    epoch: u64,
    stats: CacheStats,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn touch(&mut self, key: &QueryKey, descriptor: &QueryDescriptor) {
        self.tick += 1;
        let tick = self.tick;
        if let Some(slot) = self.slots.get_mut(key) {
            slot.last_used = tick;
            return;
        }
        self.make_room();
        self.slots
            .insert(key.clone(), Slot::new(descriptor.clone(), tick));
    }

    fn make_room(&mut self) {
        let Some(capacity) = self.options.capacity else {
            return;
        };
        while self.slots.len() >= capacity.max(1) {
            let victim = self
                .slots
                .iter()
                .filter(|(_, slot)| slot.flight.is_none() && slot.observers == 0)
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(key, _)| key.clone());
            let Some(victim) = victim else {
                break;
            };
            tracing::debug!(key = %victim, "evicting least recently used entry");
            self.slots.remove(&victim);
        }
    }

    fn begin(&mut self, key: &QueryKey, shared: &Arc<Mutex<Inner>>) -> Option<FlightGuard> {
        let slot = self.slots.get_mut(key)?;
        if slot.flight.is_some() {
            return None;
        }

        let id = self.next_flight;
        self.next_flight += 1;
        self.stats.fetches += 1;

        let (done_tx, done_rx) = watch::channel(false);
        slot.flight = Some(Flight { id, done: done_rx });
        Some(FlightGuard {
            inner: Arc::clone(shared),
            key: key.clone(),
            descriptor: slot.descriptor.clone(),
            id,
            generation: slot.generation,
            done: done_tx,
            settled: false,
        })
    }

    /// Stores a fetch result. Returns the descriptor to refetch when the entry
    /// was invalidated while the fetch was running and is still observed.
    fn settle(
        &mut self,
        key: &QueryKey,
        flight_id: u64,
        generation: u64,
        result: Result<Payload, ClientError>,
    ) -> Option<QueryDescriptor> {
        let slot = match self.slots.get_mut(key) {
            Some(slot) if slot.flight.as_ref().is_some_and(|f| f.id == flight_id) => slot,
            _ => {
                tracing::debug!(key = %key, "entry dropped while fetching, discarding result");
                return None;
            }
        };
        slot.flight = None;

        let invalidated = slot.generation != generation;
        match result {
            Ok(payload) => {
                slot.data = Some(Arc::new(payload));
                slot.error = None;
                slot.fetched_at = Some(Instant::now());
                slot.stale = invalidated;
            }
            Err(err) => {
                slot.error = Some(err);
            }
        }

        (invalidated && slot.observers > 0 && slot.error.is_none())
            .then(|| slot.descriptor.clone())
    }
}

/// Ownership of one in-flight fetch.
struct FlightGuard {
    inner: Arc<Mutex<Inner>>,
    key: QueryKey,
    descriptor: QueryDescriptor,
    id: u64,
    generation: u64,
    done: watch::Sender<bool>,
    settled: bool,
}

impl FlightGuard {
    fn settle(mut self, result: Result<Payload, ClientError>) -> Option<QueryDescriptor> {
        let refetch = lock(&self.inner).settle(&self.key, self.id, self.generation, result);
        self.settled = true;
        self.done.send_replace(true);
        refetch
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        {
            let mut inner = lock(&self.inner);
            if let Some(slot) = inner.slots.get_mut(&self.key)
                && slot.flight.as_ref().is_some_and(|f| f.id == self.id)
            {
                slot.flight = None;
            }
        }
        tracing::debug!(key = %self.key, "fetch abandoned before settling");
        self.done.send_replace(true);
    }
}

/// Keeps an entry mounted: it is refetched eagerly on invalidation and is
/// never evicted while the guard is alive.
#[derive(Debug)]
pub struct Observer {
    inner: Arc<Mutex<Inner>>,
    key: QueryKey,
    epoch: u64,
}

impl Observer {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        let mut inner = lock(&self.inner);
        if inner.epoch != self.epoch {
            return;
        }
        if let Some(slot) = inner.slots.get_mut(&self.key) {
            slot.observers = slot.observers.saturating_sub(1);
        }
    }
}

enum Step {
    Ready(CacheEntry),
    Join(watch::Receiver<bool>),
    Fetch(FlightGuard),
}

#[derive(Debug, Clone)]
pub struct QueryCache<A> {
    api: A,
    inner: Arc<Mutex<Inner>>,
}

impl<A: LedgerApi> QueryCache<A> {
    pub fn new(api: A, options: CacheOptions) -> Self {
        Self {
            api,
            inner: Arc::new(Mutex::new(Inner {
                slots: HashMap::new(),
                options,
                tick: 0,
                next_flight: 0,
                epoch: 0,
                stats: CacheStats::default(),
            })),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock(&self.inner)
    }

    /// Current entry, without fetching.
    pub fn peek(&self, descriptor: &QueryDescriptor) -> CacheEntry {
        let inner = self.lock();
        inner
            .slots
            .get(&descriptor.key())
            .map(|slot| slot.snapshot(inner.options.stale_after))
            .unwrap_or_else(CacheEntry::absent)
    }

    /// Returns the entry once it is usable. An absent, stale, expired or
    /// failed entry is fetched first; a fetch already running for the same
    /// key is joined instead of duplicated.
    ///
    /// Errors never escape: they are stored in the returned entry.
    pub async fn read(&self, descriptor: &QueryDescriptor) -> CacheEntry {
        let key = descriptor.key();
        loop {
            match self.next_step(&key, descriptor) {
                Step::Ready(entry) => return entry,
                Step::Join(mut done) => {
                    // An error means the fetching side was dropped, the
                    // entry is re-checked either way.
                    let _ = done.wait_for(|settled| *settled).await;
                    let entry = self.peek(descriptor);
                    if matches!(entry.status, EntryStatus::Fresh | EntryStatus::Error) {
                        return entry;
                    }
                }
                Step::Fetch(flight) => {
                    self.run(flight).await;
                    return self.peek(descriptor);
                }
            }
        }
    }

    fn next_step(&self, key: &QueryKey, descriptor: &QueryDescriptor) -> Step {
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.touch(key, descriptor);

        let stale_after = inner.options.stale_after;
        let Some(slot) = inner.slots.get(key) else {
            return Step::Ready(CacheEntry::absent());
        };
        if let Some(flight) = &slot.flight {
            let done = flight.done.clone();
            inner.stats.deduplicated += 1;
            tracing::debug!(key = %key, "joining in-flight fetch");
            return Step::Join(done);
        }
        if !slot.needs_fetch(stale_after) {
            return Step::Ready(slot.snapshot(stale_after));
        }

        match inner.begin(key, &self.inner) {
            Some(flight) => Step::Fetch(flight),
            None => Step::Ready(CacheEntry::absent()),
        }
    }

    /// Waits for the fetch currently running for `descriptor`, if any, and
    /// returns the settled entry.
    pub async fn settled(&self, descriptor: &QueryDescriptor) -> CacheEntry {
        let key = descriptor.key();
        loop {
            let done = self
                .lock()
                .slots
                .get(&key)
                .and_then(|slot| slot.flight.as_ref().map(|f| f.done.clone()));
            match done {
                Some(mut done) => {
                    let _ = done.wait_for(|settled| *settled).await;
                }
                None => return self.peek(descriptor),
            }
        }
    }

    async fn run(&self, flight: FlightGuard) {
        tracing::debug!(key = %flight.key, "fetching");
        let result = self.fetch_with_retry(&flight.descriptor).await;
        if let Err(err) = &result {
            tracing::debug!(key = %flight.key, "fetch failed: {err}");
        }
        if let Some(descriptor) = flight.settle(result) {
            self.spawn_refetch(descriptor);
        }
    }

    async fn fetch_with_retry(&self, descriptor: &QueryDescriptor) -> Result<Payload, ClientError> {
        match self.fetch(descriptor).await {
            Err(err) if err.is_transient() => {
                tracing::warn!(key = %descriptor.key(), "fetch failed, retrying once: {err}");
                self.lock().stats.retries += 1;
                self.fetch(descriptor).await
            }
            result => result,
        }
    }

    async fn fetch(&self, descriptor: &QueryDescriptor) -> Result<Payload, ClientError> {
        match descriptor {
            QueryDescriptor::Transactions(list) => self
                .api
                .list_transactions(list)
                .await
                .map(Payload::Transactions),
            QueryDescriptor::View(view) => self.api.derived_view(*view).await.map(Payload::View),
        }
    }

    /// Starts a background fetch for `descriptor` unless one is running.
    /// Without a Tokio runtime the refetch is left to the next read.
    fn spawn_refetch(&self, descriptor: QueryDescriptor) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(key = %descriptor.key(), "no runtime, refetch deferred to next read");
            return;
        };
        let key = descriptor.key();
        let flight = self.lock().begin(&key, &self.inner);
        let Some(flight) = flight else {
            return;
        };
        let cache = self.clone();
        runtime.spawn(async move { cache.run(flight).await });
    }

    /// Marks every matching entry stale, keeping its data. Observed entries
    /// are refetched in the background. Returns how many entries matched.
    pub fn invalidate(&self, targets: &[Invalidate]) -> usize {
        let (marked, refetch) = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            inner.stats.invalidations += 1;

            let mut marked = 0;
            let mut refetch = Vec::new();
            for (key, slot) in inner.slots.iter_mut() {
                if !targets.iter().any(|target| target.matches(key)) {
                    continue;
                }
                slot.stale = true;
                slot.generation += 1;
                marked += 1;
                if slot.observers > 0 && slot.flight.is_none() {
                    refetch.push(slot.descriptor.clone());
                }
            }
            (marked, refetch)
        };

        tracing::debug!(marked, observed = refetch.len(), "invalidated cache entries");
        for descriptor in refetch {
            self.spawn_refetch(descriptor);
        }
        marked
    }

    /// Stores `payload` as the entry's data, e.g. a row returned by a
    /// mutation. Staleness is left as it is.
    pub fn write(&self, descriptor: &QueryDescriptor, payload: Payload) {
        let key = descriptor.key();
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.touch(&key, descriptor);
        if let Some(slot) = inner.slots.get_mut(&key) {
            slot.data = Some(Arc::new(payload));
            slot.error = None;
            slot.fetched_at.get_or_insert_with(Instant::now);
        }
    }

    /// Rewrites every cached ledger page for which `edit` reports a change.
    /// The returned [`PageRollback`] undoes the rewrite with
    /// [`QueryCache::rollback`].
    pub fn write_pages<F>(&self, mut edit: F) -> PageRollback
    where
        F: FnMut(&mut TransactionPage) -> bool,
    {
        let mut rollback = PageRollback::default();
        let mut inner = self.lock();
        for (key, slot) in inner.slots.iter_mut() {
            if !key.has_prefix(TRANSACTIONS) {
                continue;
            }
            let Some(Payload::Transactions(page)) = slot.data.as_deref() else {
                continue;
            };
            let mut edited = page.clone();
            if !edit(&mut edited) {
                continue;
            }
            let previous = Payload::Transactions(page.clone());
            let written = Arc::new(Payload::Transactions(edited));
            slot.data = Some(Arc::clone(&written));
            rollback.pages.push(RewrittenPage {
                descriptor: slot.descriptor.clone(),
                previous,
                written,
            });
        }
        rollback
    }

    /// Puts back the payloads replaced by [`QueryCache::write_pages`].
    /// A page whose data changed since then (a refetch settled or another
    /// write landed) keeps the newer copy. Returns how many pages were
    /// restored.
    pub fn rollback(&self, rollback: PageRollback) -> usize {
        let mut inner = self.lock();
        let mut restored = 0;
        for page in rollback.pages {
            let Some(slot) = inner.slots.get_mut(&page.descriptor.key()) else {
                continue;
            };
            let untouched = slot
                .data
                .as_ref()
                .is_some_and(|data| Arc::ptr_eq(data, &page.written));
            if !untouched {
                tracing::debug!(key = %page.descriptor.key(), "page changed since the optimistic write, keeping it");
                continue;
            }
            slot.data = Some(Arc::new(page.previous));
            restored += 1;
        }
        restored
    }

    /// Registers a consumer of `descriptor`. The entry is created if needed.
    pub fn observe(&self, descriptor: &QueryDescriptor) -> Observer {
        let key = descriptor.key();
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.touch(&key, descriptor);
        if let Some(slot) = inner.slots.get_mut(&key) {
            slot.observers += 1;
        }
        Observer {
            inner: Arc::clone(&self.inner),
            key,
            epoch: inner.epoch,
        }
    }

    /// Drops every entry, e.g. on logout. Fetches still running are
    /// discarded when they settle, and existing observers stop counting:
    /// readers must be mounted again.
    pub fn clear(&self) {
        let mut inner = self.lock();
        let dropped = inner.slots.len();
        inner.slots.clear();
        inner.epoch += 1;
        tracing::info!(dropped, "query cache cleared");
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }
}
