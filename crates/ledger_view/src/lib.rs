//! Client-side controller for the transaction ledger.
//!
//! The backend owns every computation; this crate keeps a server-paginated
//! view of the ledger under filters, sorting and selection, performs single
//! and bulk writes, and keeps the cached derived reports (portfolio, history,
//! spending, evolution, smart-shopping summary) consistent by invalidating
//! them after each write.
//!
//! [`LedgerController`] ties the pieces together; they can also be used on
//! their own:
//!
//! - [`client`]: typed HTTP bindings ([`HttpClient`]) behind the
//!   [`LedgerApi`] trait.
//! - [`cache`]: the shared [`QueryCache`] with per-key request
//!   deduplication.
//! - [`query`]: the filtered, paginated ledger query.
//! - [`mutation`]: create/edit/delete, single and bulk.

use std::{future::Future, time::Duration};

use api_types::{
    analytics::DerivedView,
    transaction::{Transaction, TransactionId, TransactionNew, TransactionPatch},
};

pub use cache::{
    CacheEntry, CacheOptions, CacheStats, EntryStatus, PageRollback, Payload, QueryCache,
};
pub use client::{HttpClient, LedgerApi, Session};
pub use descriptor::{Invalidate, QueryDescriptor, QueryKey};
pub use error::{ClientError, FilterError, MutationError};
pub use filters::{DEFAULT_PAGE_SIZE, FilterChange, LedgerFilters, MAX_PAGE_SIZE};
pub use invalidation::{MutationKind, affected_views, invalidation_set};
pub use mutation::{BatchReport, EditOutcome, Mutations};
pub use query::{Applied, LedgerQuery, LedgerSnapshot, PageLoad};
pub use selection::Selection;
pub use views::{ViewReader, ViewSnapshot};

pub mod cache;
pub mod client;
pub mod descriptor;
mod error;
pub mod filters;
pub mod invalidation;
pub mod mutation;
pub mod query;
mod selection;
mod views;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LedgerSettings {
    pub page_size: u32,
    /// Maximum number of cached queries. Unbounded when `None`.
    pub cache_capacity: Option<usize>,
    /// Age after which cached data is refetched on the next read.
    pub stale_after: Option<Duration>,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache_capacity: None,
            stale_after: None,
        }
    }
}

/// The ledger screen: filters, the active page, the selection and the
/// writes, all over one shared [`QueryCache`].
#[derive(Debug)]
pub struct LedgerController<A: LedgerApi> {
    settings: LedgerSettings,
    cache: QueryCache<A>,
    query: LedgerQuery<A>,
    mutations: Mutations<A>,
    selection: Selection,
}

impl<A: LedgerApi> LedgerController<A> {
    /// Return a builder for `LedgerController`.
    pub fn builder() -> LedgerControllerBuilder<A> {
        LedgerControllerBuilder::default()
    }

    pub fn new(api: A, settings: LedgerSettings) -> Self {
        let cache = QueryCache::new(
            api,
            CacheOptions {
                capacity: settings.cache_capacity,
                stale_after: settings.stale_after,
            },
        );
        let query = LedgerQuery::new(cache.clone(), LedgerFilters::new(settings.page_size));
        Self {
            settings,
            mutations: Mutations::new(cache.clone()),
            cache,
            query,
            selection: Selection::default(),
        }
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    pub fn cache(&self) -> &QueryCache<A> {
        &self.cache
    }

    pub fn api(&self) -> &A {
        self.cache.api()
    }

    pub fn filters(&self) -> &LedgerFilters {
        self.query.filters()
    }

    pub fn descriptor(&self) -> &QueryDescriptor {
        self.query.descriptor()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.query.snapshot()
    }

    /// Loads the active page and returns what to display.
    pub async fn refresh(&mut self) -> LedgerSnapshot {
        let before = self.query.descriptor().clone();
        let snapshot = self.query.refresh().await;
        if self.query.descriptor() != &before {
            self.selection.clear();
        } else if snapshot.loaded {
            self.prune_selection(&snapshot);
        }
        snapshot
    }

    /// Starts a load without holding the controller; hand the result back to
    /// [`LedgerController::apply`]. Loads for a descriptor that is no longer
    /// active are ignored there.
    pub fn load(&self) -> impl Future<Output = PageLoad> + Send + use<A> {
        self.query.load()
    }

    pub fn apply(&mut self, load: PageLoad) -> Applied {
        let applied = self.query.apply(load);
        match applied {
            Applied::Clamped(_) => self.selection.clear(),
            Applied::Current => {
                let snapshot = self.query.snapshot();
                if snapshot.loaded {
                    self.prune_selection(&snapshot);
                }
            }
            Applied::Superseded => {}
        }
        applied
    }

    fn prune_selection(&mut self, snapshot: &LedgerSnapshot) {
        let pruned = self.selection.retain_visible(&snapshot.ids());
        if pruned > 0 {
            tracing::debug!(pruned, "dropped selected rows no longer on the page");
        }
    }

    pub fn filter(&mut self, change: FilterChange) -> Result<bool, FilterError> {
        let changed = self.query.update(change)?;
        Ok(self.moved(changed))
    }

    pub fn set_page(&mut self, page: u32) -> Result<bool, FilterError> {
        let changed = self.query.set_page(page)?;
        Ok(self.moved(changed))
    }

    pub fn next_page(&mut self) -> Result<bool, FilterError> {
        let changed = self.query.next_page()?;
        Ok(self.moved(changed))
    }

    pub fn prev_page(&mut self) -> Result<bool, FilterError> {
        let changed = self.query.prev_page()?;
        Ok(self.moved(changed))
    }

    /// The selection is scoped to the page it was made on.
    fn moved(&mut self, changed: bool) -> bool {
        if changed {
            self.selection.clear();
        }
        changed
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn toggle(&mut self, id: TransactionId) -> bool {
        self.selection.toggle(id)
    }

    /// Header checkbox over the rows currently displayed.
    pub fn toggle_all(&mut self) {
        let visible = self.query.snapshot().ids();
        self.selection.toggle_all(&visible);
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub async fn create(&mut self, payload: TransactionNew) -> Result<Transaction, MutationError> {
        self.mutations.create(payload).await
    }

    pub async fn edit(
        &mut self,
        id: TransactionId,
        patch: &TransactionPatch,
    ) -> Result<EditOutcome, MutationError> {
        self.mutations.edit(id, patch, &mut self.selection).await
    }

    pub async fn delete(&mut self, id: TransactionId) -> Result<(), MutationError> {
        self.mutations.delete(id, &mut self.selection).await
    }

    pub async fn bulk_edit(
        &mut self,
        ids: &[TransactionId],
        patch: &TransactionPatch,
    ) -> BatchReport {
        self.mutations
            .bulk_edit(ids, patch, &mut self.selection)
            .await
    }

    pub async fn bulk_delete(&mut self, ids: &[TransactionId]) -> BatchReport {
        self.mutations.bulk_delete(ids, &mut self.selection).await
    }

    /// [`LedgerController::bulk_edit`] over the current selection.
    pub async fn edit_selected(&mut self, patch: &TransactionPatch) -> BatchReport {
        let ids = self.selection.ids();
        self.bulk_edit(&ids, patch).await
    }

    /// [`LedgerController::bulk_delete`] over the current selection.
    pub async fn delete_selected(&mut self) -> BatchReport {
        let ids = self.selection.ids();
        self.bulk_delete(&ids).await
    }

    pub fn imported(&self) -> usize {
        self.mutations.imported()
    }

    pub fn mount_view(&self, view: DerivedView) -> ViewReader<A> {
        ViewReader::mount(self.cache.clone(), view)
    }

    /// Ends the session: every cached query and the selection are dropped and
    /// the filters go back to their defaults.
    pub fn sign_out(&mut self) {
        self.selection.clear();
        self.cache.clear();
        self.query = LedgerQuery::new(
            self.cache.clone(),
            LedgerFilters::new(self.settings.page_size),
        );
        tracing::info!("ledger session closed");
    }
}

#[derive(Debug)]
pub struct LedgerControllerBuilder<A> {
    api: Option<A>,
    settings: LedgerSettings,
}

impl<A> Default for LedgerControllerBuilder<A> {
    fn default() -> Self {
        Self {
            api: None,
            settings: LedgerSettings::default(),
        }
    }
}

impl<A: LedgerApi> LedgerControllerBuilder<A> {
    /// Pass the backend the controller talks to.
    pub fn api(mut self, api: A) -> Self {
        self.api = Some(api);
        self
    }

    pub fn settings(mut self, settings: LedgerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.settings.page_size = page_size;
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.settings.cache_capacity = Some(capacity);
        self
    }

    pub fn stale_after(mut self, max_age: Duration) -> Self {
        self.settings.stale_after = Some(max_age);
        self
    }

    /// Construct `LedgerController`
    pub fn build(self) -> Result<LedgerController<A>, ClientError> {
        let api = self
            .api
            .ok_or_else(|| ClientError::Config("missing backend".to_string()))?;
        if self.settings.page_size == 0 || self.settings.page_size > MAX_PAGE_SIZE {
            return Err(ClientError::Config(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(LedgerController::new(api, self.settings))
    }
}
