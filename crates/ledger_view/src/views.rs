use api_types::analytics::DerivedView;
use serde_json::Value;

use crate::{
    cache::{CacheEntry, Observer, QueryCache},
    client::LedgerApi,
    descriptor::QueryDescriptor,
    error::ClientError,
};

/// A mounted derived report. While the reader is alive the report is kept in
/// the cache and refetched in the background whenever a mutation invalidates
/// it.
#[derive(Debug)]
pub struct ViewReader<A> {
    cache: QueryCache<A>,
    view: DerivedView,
    descriptor: QueryDescriptor,
    _observer: Observer,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ViewSnapshot {
    pub data: Option<Value>,
    pub loading: bool,
    pub stale: bool,
    pub error: Option<ClientError>,
}

impl<A: LedgerApi> ViewReader<A> {
    pub fn mount(cache: QueryCache<A>, view: DerivedView) -> Self {
        let descriptor = QueryDescriptor::View(view);
        let observer = cache.observe(&descriptor);
        Self {
            cache,
            view,
            descriptor,
            _observer: observer,
        }
    }

    pub fn view(&self) -> DerivedView {
        self.view
    }

    pub async fn load(&self) -> ViewSnapshot {
        let entry = self.cache.read(&self.descriptor).await;
        snapshot(&entry)
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        snapshot(&self.cache.peek(&self.descriptor))
    }
}

fn snapshot(entry: &CacheEntry) -> ViewSnapshot {
    let data = entry.view().cloned();
    ViewSnapshot {
        loading: entry.is_loading() && data.is_none(),
        stale: entry.is_stale(),
        error: entry.error.clone(),
        data,
    }
}
