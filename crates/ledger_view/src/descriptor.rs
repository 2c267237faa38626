use std::fmt;

use api_types::{analytics::DerivedView, transaction::TransactionList};

/// Resource name of the ledger query space.
pub const TRANSACTIONS: &str = "transactions";

/// One parameterized query. Equal descriptors share one cache entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum QueryDescriptor {
    Transactions(TransactionList),
    View(DerivedView),
}

impl QueryDescriptor {
    pub fn resource(&self) -> &'static str {
        match self {
            Self::Transactions(_) => TRANSACTIONS,
            Self::View(view) => view.path(),
        }
    }

    pub fn params(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Transactions(list) => list.params(),
            Self::View(_) => Vec::new(),
        }
    }

    /// Serialized form, `resource?k=v&k=v`, used as the cache key.
    pub fn key(&self) -> QueryKey {
        let params = self.params();
        if params.is_empty() {
            return QueryKey(self.resource().to_string());
        }
        let query = params
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("&");
        QueryKey(format!("{}?{query}", self.resource()))
    }

    pub fn page(&self) -> Option<u32> {
        match self {
            Self::Transactions(list) => Some(list.page),
            Self::View(_) => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(String);

impl QueryKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix matching on resource boundaries: `transactions` matches
    /// `transactions?page=1` but `analytics/history` does not match
    /// `analytics/history-export`.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        match self.0.strip_prefix(prefix) {
            Some(rest) => {
                rest.is_empty() || rest.starts_with('?') || rest.starts_with('/')
            }
            None => false,
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Target of an invalidation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Invalidate {
    Prefix(&'static str),
    Exact(QueryKey),
}

impl Invalidate {
    pub fn matches(&self, key: &QueryKey) -> bool {
        match self {
            Self::Prefix(prefix) => key.has_prefix(prefix),
            Self::Exact(exact) => exact == key,
        }
    }
}
