//! The paginated ledger query and what the table renders from it.

use std::future::Future;

use api_types::transaction::{Transaction, TransactionId};

use crate::{
    cache::{CacheEntry, Observer, QueryCache},
    client::LedgerApi,
    descriptor::QueryDescriptor,
    error::{ClientError, FilterError},
    filters::{FilterChange, LedgerFilters},
};

/// Result of one fetch, tagged with the descriptor it was started for.
#[derive(Clone, Debug)]
pub struct PageLoad {
    pub descriptor: QueryDescriptor,
    pub entry: CacheEntry,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// The load belongs to the active descriptor.
    Current,
    /// The user moved on while the load was running; it was ignored.
    Superseded,
    /// The server reported fewer pages than the requested page number; the
    /// query moved to this page and needs another load.
    Clamped(u32),
}

/// What the ledger table displays.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LedgerSnapshot {
    pub items: Vec<Transaction>,
    pub total: u64,
    pub page: u32,
    pub pages: u32,
    /// A page for the active descriptor has been received at least once.
    pub loaded: bool,
    /// Nothing to show yet and a fetch is running.
    pub loading: bool,
    /// Rows are shown while a newer copy is being fetched.
    pub refreshing: bool,
    pub stale: bool,
    pub error: Option<ClientError>,
}

impl LedgerSnapshot {
    /// The query succeeded and matched nothing, as opposed to not having
    /// loaded yet or having failed.
    pub fn no_results(&self) -> bool {
        self.loaded && self.error.is_none() && self.items.is_empty()
    }

    pub fn ids(&self) -> Vec<TransactionId> {
        self.items.iter().map(|t| t.id).collect()
    }
}

/// Owns the filter state and keeps the active page mounted in the cache.
///
/// Only the most recent descriptor may update the view: [`LedgerQuery::load`]
/// tags its result with the descriptor it was started for, and
/// [`LedgerQuery::apply`] drops results for anything else. Since the cache is
/// keyed by descriptor, a late response still lands in its own entry and can
/// never overwrite the rows of another page.
#[derive(Debug)]
pub struct LedgerQuery<A: LedgerApi> {
    cache: QueryCache<A>,
    filters: LedgerFilters,
    active: QueryDescriptor,
    _observer: Observer,
    known_pages: Option<u32>,
}

impl<A: LedgerApi> LedgerQuery<A> {
    pub fn new(cache: QueryCache<A>, filters: LedgerFilters) -> Self {
        let active = filters.descriptor();
        let observer = cache.observe(&active);
        Self {
            cache,
            filters,
            active,
            _observer: observer,
            known_pages: None,
        }
    }

    pub fn filters(&self) -> &LedgerFilters {
        &self.filters
    }

    pub fn descriptor(&self) -> &QueryDescriptor {
        &self.active
    }

    /// Page count reported by the last page applied for these filters.
    pub fn known_pages(&self) -> Option<u32> {
        self.known_pages
    }

    /// Applies a filter edit. On error the state is unchanged. Returns whether
    /// the active descriptor changed.
    pub fn update(&mut self, change: FilterChange) -> Result<bool, FilterError> {
        let mut next = self.filters.clone();
        next.apply(change)?;
        if next == self.filters {
            return Ok(false);
        }
        self.filters = next;
        self.known_pages = None;
        Ok(self.retarget())
    }

    /// Moves to `page`, clamped to the last page known for these filters.
    pub fn set_page(&mut self, page: u32) -> Result<bool, FilterError> {
        if page == 0 {
            return Err(FilterError::InvalidPage);
        }
        let last = self.known_pages.map_or(u32::MAX, |pages| pages.max(1));
        self.filters.set_page(page.min(last))?;
        Ok(self.retarget())
    }

    pub fn next_page(&mut self) -> Result<bool, FilterError> {
        self.set_page(self.filters.page().saturating_add(1))
    }

    pub fn prev_page(&mut self) -> Result<bool, FilterError> {
        self.set_page(self.filters.page().saturating_sub(1).max(1))
    }

    fn retarget(&mut self) -> bool {
        let descriptor = self.filters.descriptor();
        if descriptor == self.active {
            return false;
        }
        tracing::debug!(from = %self.active.key(), to = %descriptor.key(), "ledger query changed");
        // Observe the new entry before releasing the old one.
        self._observer = self.cache.observe(&descriptor);
        self.active = descriptor;
        true
    }

    /// Fetch for the active descriptor. The future does not borrow the query,
    /// so the filters can keep changing while it runs.
    pub fn load(&self) -> impl Future<Output = PageLoad> + Send + use<A> {
        let cache = self.cache.clone();
        let descriptor = self.active.clone();
        async move {
            let entry = cache.read(&descriptor).await;
            PageLoad { descriptor, entry }
        }
    }

    pub fn apply(&mut self, load: PageLoad) -> Applied {
        if load.descriptor != self.active {
            tracing::debug!(key = %load.descriptor.key(), "discarding superseded ledger page");
            return Applied::Superseded;
        }
        let Some(page) = load.entry.page() else {
            return Applied::Current;
        };

        self.known_pages = Some(page.pages);
        if self.filters.clamp_page(page.pages) {
            let last = self.filters.page();
            tracing::debug!(
                requested = load.descriptor.page(),
                last,
                "requested page is past the end, clamping"
            );
            self.retarget();
            return Applied::Clamped(last);
        }
        Applied::Current
    }

    /// Loads the active page, following a clamp once.
    pub async fn refresh(&mut self) -> LedgerSnapshot {
        let mut load = self.load().await;
        if let Applied::Clamped(_) = self.apply(load) {
            load = self.load().await;
            self.apply(load);
        }
        self.snapshot()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let entry = self.cache.peek(&self.active);
        let page = entry.page();
        LedgerSnapshot {
            items: page.map(|p| p.items.clone()).unwrap_or_default(),
            total: page.map_or(0, |p| p.total),
            page: self.filters.page(),
            pages: page.map_or(0, |p| p.pages),
            loaded: page.is_some(),
            loading: entry.is_loading() && page.is_none(),
            refreshing: entry.is_loading() && page.is_some(),
            stale: entry.is_stale(),
            error: entry.error.clone(),
        }
    }
}
