//! Writes against the ledger.
//!
//! Every successful write invalidates the declared set for its
//! [`MutationKind`] exactly once. Single edits and deletes are applied to the
//! cached pages first and rolled back if the server rejects them. Bulk
//! writes run one request per id concurrently and report per-id outcomes:
//! there is no server-side transaction, so a batch may partially apply.

use std::collections::{HashMap, HashSet};

use api_types::transaction::{
    Transaction, TransactionId, TransactionNew, TransactionPage, TransactionPatch,
};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::{
    cache::{PageRollback, QueryCache},
    client::LedgerApi,
    error::{ClientError, MutationError},
    invalidation::{MutationKind, invalidation_set},
    selection::Selection,
};

#[derive(Clone, Debug, PartialEq)]
pub enum EditOutcome {
    /// The patch had no field set; nothing was sent.
    Skipped,
    Updated(Transaction),
}

/// Per-id outcome of a bulk write, in input order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub succeeded: Vec<TransactionId>,
    pub failed: Vec<(TransactionId, ClientError)>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_ids(&self) -> Vec<TransactionId> {
        self.failed.iter().map(|(id, _)| *id).collect()
    }

    /// All-or-nothing view of the batch.
    pub fn into_result(self) -> Result<Vec<TransactionId>, MutationError> {
        if self.failed.is_empty() {
            return Ok(self.succeeded);
        }
        Err(MutationError::PartialBatch {
            failed: self.failed.len(),
            total: self.total(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Mutations<A> {
    cache: QueryCache<A>,
}

impl<A: LedgerApi> Mutations<A> {
    pub fn new(cache: QueryCache<A>) -> Self {
        Self { cache }
    }

    fn api(&self) -> &A {
        self.cache.api()
    }

    /// Creates a transaction. A missing idempotency key is generated so the
    /// request can be retried safely by the caller.
    pub async fn create(&self, mut payload: TransactionNew) -> Result<Transaction, MutationError> {
        if payload.idempotency_key.is_none() {
            payload.idempotency_key = Some(Uuid::new_v4().to_string());
        }
        let created = self.api().create_transaction(&payload).await?;
        tracing::info!(id = created.id, "transaction created");
        self.invalidate(MutationKind::CreateTransaction);
        Ok(created)
    }

    pub async fn edit(
        &self,
        id: TransactionId,
        patch: &TransactionPatch,
        selection: &mut Selection,
    ) -> Result<EditOutcome, MutationError> {
        if patch.is_empty() {
            tracing::debug!(id, "empty patch, nothing to send");
            return Ok(EditOutcome::Skipped);
        }

        let previous = self.cache.write_pages(|page| patch_row(page, id, patch));
        match self.api().update_transaction(id, patch).await {
            Ok(updated) => {
                self.cache.write_pages(|page| replace_row(page, &updated));
                selection.remove(id);
                tracing::info!(id, "transaction updated");
                self.invalidate(MutationKind::UpdateTransaction);
                Ok(EditOutcome::Updated(updated))
            }
            Err(err) => {
                tracing::warn!(id, "update rejected, reverting: {err}");
                self.restore(previous);
                Err(err.into())
            }
        }
    }

    pub async fn delete(
        &self,
        id: TransactionId,
        selection: &mut Selection,
    ) -> Result<(), MutationError> {
        let previous = self.cache.write_pages(|page| remove_row(page, id));
        match self.api().delete_transaction(id).await {
            Ok(()) => {
                selection.remove(id);
                tracing::info!(id, "transaction deleted");
                self.invalidate(MutationKind::DeleteTransaction);
                Ok(())
            }
            Err(err) => {
                tracing::warn!(id, "delete rejected, reverting: {err}");
                self.restore(previous);
                Err(err.into())
            }
        }
    }

    /// Applies `patch` to every id. Succeeded ids leave the selection,
    /// failed ones stay selected for a retry.
    pub async fn bulk_edit(
        &self,
        ids: &[TransactionId],
        patch: &TransactionPatch,
        selection: &mut Selection,
    ) -> BatchReport {
        let ids = unique(ids);
        if ids.is_empty() || patch.is_empty() {
            return BatchReport::default();
        }

        let mut tasks = JoinSet::new();
        let mut owners = HashMap::new();
        for &id in &ids {
            let api = self.api().clone();
            let patch = patch.clone();
            let handle = tasks.spawn(async move {
                api.update_transaction(id, &patch).await.map(|_| ())
            });
            owners.insert(handle.id(), id);
        }

        let report = collect(&ids, tasks, owners).await;
        self.finish_batch(MutationKind::UpdateTransaction, &report, selection);
        report
    }

    pub async fn bulk_delete(
        &self,
        ids: &[TransactionId],
        selection: &mut Selection,
    ) -> BatchReport {
        let ids = unique(ids);
        if ids.is_empty() {
            return BatchReport::default();
        }

        let mut tasks = JoinSet::new();
        let mut owners = HashMap::new();
        for &id in &ids {
            let api = self.api().clone();
            let handle = tasks.spawn(async move { api.delete_transaction(id).await });
            owners.insert(handle.id(), id);
        }

        let report = collect(&ids, tasks, owners).await;
        self.finish_batch(MutationKind::DeleteTransaction, &report, selection);
        report
    }

    /// Broadcast after an import completed elsewhere.
    pub fn imported(&self) -> usize {
        self.invalidate(MutationKind::Import)
    }

    fn finish_batch(&self, kind: MutationKind, report: &BatchReport, selection: &mut Selection) {
        selection.remove_all(&report.succeeded);
        if report.is_complete() {
            tracing::info!(?kind, total = report.total(), "batch applied");
        } else {
            tracing::warn!(
                ?kind,
                failed = report.failed.len(),
                total = report.total(),
                "batch partially failed"
            );
        }
        // The ledger is refetched even when every request failed.
        self.invalidate(kind);
    }

    fn restore(&self, previous: PageRollback) {
        let restored = self.cache.rollback(previous);
        tracing::debug!(restored, "optimistic change reverted");
    }

    fn invalidate(&self, kind: MutationKind) -> usize {
        let marked = self.cache.invalidate(&invalidation_set(kind));
        tracing::debug!(?kind, marked, "invalidated after mutation");
        marked
    }
}

fn unique(ids: &[TransactionId]) -> Vec<TransactionId> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

async fn collect(
    ids: &[TransactionId],
    mut tasks: JoinSet<Result<(), ClientError>>,
    owners: HashMap<tokio::task::Id, TransactionId>,
) -> BatchReport {
    let mut outcomes = HashMap::with_capacity(ids.len());
    while let Some(joined) = tasks.join_next_with_id().await {
        let (task, outcome) = match joined {
            Ok((task, outcome)) => (task, outcome),
            Err(err) => (err.id(), Err(ClientError::Aborted(err.to_string()))),
        };
        if let Some(id) = owners.get(&task) {
            outcomes.insert(*id, outcome);
        }
    }

    let mut report = BatchReport::default();
    for &id in ids {
        match outcomes.remove(&id) {
            Some(Ok(())) => report.succeeded.push(id),
            Some(Err(err)) => report.failed.push((id, err)),
            None => report
                .failed
                .push((id, ClientError::Aborted("no outcome recorded".to_string()))),
        }
    }
    report
}

fn patch_row(page: &mut TransactionPage, id: TransactionId, patch: &TransactionPatch) -> bool {
    let Some(row) = page.items.iter_mut().find(|row| row.id == id) else {
        return false;
    };
    patch.apply_to(row);
    true
}

fn replace_row(page: &mut TransactionPage, updated: &Transaction) -> bool {
    match page.items.iter_mut().find(|row| row.id == updated.id) {
        Some(row) if row != updated => {
            *row = updated.clone();
            true
        }
        _ => false,
    }
}

fn remove_row(page: &mut TransactionPage, id: TransactionId) -> bool {
    let before = page.items.len();
    page.items.retain(|row| row.id != id);
    if page.items.len() == before {
        return false;
    }
    page.total = page.total.saturating_sub(1);
    true
}
