//! Which cached queries each kind of write makes stale.
//!
//! The mapping is an exhaustive `match`: a new [`MutationKind`] does not
//! compile until its invalidation set is declared.

use api_types::analytics::DerivedView;

use crate::descriptor::{Invalidate, TRANSACTIONS};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MutationKind {
    CreateTransaction,
    UpdateTransaction,
    DeleteTransaction,
    /// A CSV/Excel import finished elsewhere.
    Import,
}

const LEDGER_AND_REPORTS: [&str; 6] = [
    TRANSACTIONS,
    DerivedView::Portfolio.path(),
    DerivedView::History.path(),
    DerivedView::Spending.path(),
    DerivedView::Evolution.path(),
    DerivedView::SmartShoppingSummary.path(),
];

pub fn invalidation_set(kind: MutationKind) -> Vec<Invalidate> {
    let prefixes: &[&'static str] = match kind {
        MutationKind::CreateTransaction
        | MutationKind::UpdateTransaction
        | MutationKind::DeleteTransaction
        | MutationKind::Import => &LEDGER_AND_REPORTS,
    };
    prefixes.iter().copied().map(Invalidate::Prefix).collect()
}

/// Derived views affected by `kind`.
pub fn affected_views(kind: MutationKind) -> Vec<DerivedView> {
    let set = invalidation_set(kind);
    DerivedView::ALL
        .into_iter()
        .filter(|view| set.contains(&Invalidate::Prefix(view.path())))
        .collect()
}
