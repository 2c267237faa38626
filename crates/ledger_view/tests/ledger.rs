mod common;

use api_types::{
    Patch,
    analytics::DerivedView,
    transaction::{SortKey, TransactionNew, TransactionPatch},
};
use chrono::NaiveDate;
use common::FakeApi;
use ledger_view::{
    Applied, ClientError, EditOutcome, EntryStatus, FilterChange, FilterError, Invalidate,
    LedgerController, MutationError, descriptor::TRANSACTIONS,
};
use rust_decimal::Decimal;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn describe(text: &str) -> TransactionPatch {
    TransactionPatch {
        description: Some(text.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn filter_change_on_page_three_never_requests_filtered_page_three() {
    let api = FakeApi::with_rows(100);
    let mut ledger = api.controller();
    ledger.refresh().await;
    ledger.set_page(3).unwrap();
    let snapshot = ledger.refresh().await;
    assert_eq!((snapshot.page, snapshot.pages), (3, 5));

    assert!(ledger
        .filter(FilterChange::StartDate(Some(date(2024, 2, 1))))
        .unwrap());
    assert_eq!(ledger.descriptor().page(), Some(1));
    let snapshot = ledger.refresh().await;

    assert_eq!(snapshot.page, 1);
    let calls = api.list_calls();
    assert!(
        !calls
            .iter()
            .any(|call| call.start_date.is_some() && call.page == 3)
    );
    let last = calls.last().unwrap();
    assert_eq!(last.page, 1);
    assert_eq!(last.start_date, Some(date(2024, 2, 1)));
}

#[tokio::test]
async fn every_kind_of_filter_change_resets_to_first_page() {
    let api = FakeApi::with_rows(100);
    let mut ledger = api.controller();
    let changes = [
        FilterChange::Category(Some(3)),
        FilterChange::TransactionType(Some(1)),
        FilterChange::EndDate(Some(date(2024, 4, 1))),
        FilterChange::Sort(SortKey::AmountAsc),
        FilterChange::PageSize(10),
        FilterChange::Reset,
    ];

    for change in changes {
        ledger.set_page(2).unwrap();
        ledger.filter(change.clone()).unwrap();
        assert_eq!(ledger.descriptor().page(), Some(1), "{change:?}");
    }
}

#[tokio::test]
async fn invalid_filter_input_is_rejected() {
    let api = FakeApi::with_rows(10);
    let mut ledger = api.controller();
    ledger.set_page(2).unwrap();
    let before = ledger.descriptor().clone();

    let err = ledger
        .filter(FilterChange::DateRange {
            start: Some(date(2024, 5, 1)),
            end: Some(date(2024, 4, 1)),
        })
        .unwrap_err();
    assert!(matches!(err, FilterError::InvalidDateRange { .. }));
    assert_eq!(ledger.set_page(0), Err(FilterError::InvalidPage));
    assert_eq!(ledger.descriptor(), &before);
}

#[tokio::test]
async fn superseded_page_never_replaces_the_current_one() {
    let api = FakeApi::with_rows(100);
    let mut ledger = api.controller();
    ledger.refresh().await;

    let gate = api.hold_page(2);
    ledger.set_page(2).unwrap();
    let page_two = ledger.descriptor().clone();
    let slow = tokio::spawn(ledger.load());
    api.wait_for_list_calls(2).await;

    ledger.set_page(3).unwrap();
    let snapshot = ledger.refresh().await;
    assert_eq!(snapshot.page, 3);
    assert_eq!(snapshot.items.first().map(|t| t.id), Some(60));

    gate.open();
    let late = slow.await.unwrap();
    assert_eq!(late.descriptor, page_two);
    assert_eq!(ledger.apply(late), Applied::Superseded);

    let snapshot = ledger.snapshot();
    assert_eq!(snapshot.page, 3);
    assert_eq!(snapshot.items.first().map(|t| t.id), Some(60));
    // The late rows are kept under their own key.
    let cached = ledger.cache().peek(&page_two);
    assert_eq!(cached.page().unwrap().ids().first(), Some(&80));
}

#[tokio::test]
async fn hung_request_does_not_block_filter_changes() {
    let api = FakeApi::with_rows(40);
    let mut ledger = api.controller();
    ledger.refresh().await;

    let _gate = api.hold_page(2);
    ledger.set_page(2).unwrap();
    let hung = ledger.descriptor().clone();
    let _pending = tokio::spawn(ledger.load());
    api.wait_for_list_calls(2).await;

    let snapshot = ledger.snapshot();
    assert!(snapshot.loading);
    assert!(!snapshot.loaded);

    ledger.filter(FilterChange::Category(Some(3))).unwrap();
    let snapshot = ledger.refresh().await;
    assert!(snapshot.loaded);
    assert!(!snapshot.loading);
    assert_eq!(snapshot.items.len(), 20);
    assert_eq!(ledger.cache().peek(&hung).status, EntryStatus::Loading);
}

#[tokio::test]
async fn page_past_the_end_is_clamped_to_last_page() {
    let api = FakeApi::with_rows(100);
    let mut ledger = api.controller();
    ledger.refresh().await;
    ledger.set_page(5).unwrap();
    let snapshot = ledger.refresh().await;
    assert_eq!(snapshot.ids(), (1..=20).rev().collect::<Vec<_>>());

    api.remove_rows(1..=20);
    ledger.imported();
    let snapshot = ledger.refresh().await;

    assert_eq!((snapshot.page, snapshot.pages), (4, 4));
    assert_eq!(snapshot.total, 80);
    assert_eq!(snapshot.items.len(), 20);

    assert!(!ledger.next_page().unwrap());
    assert_eq!(ledger.descriptor().page(), Some(4));
}

#[tokio::test]
async fn query_without_matches_reports_no_results() {
    let api = FakeApi::with_rows(10);
    let mut ledger = api.controller();
    assert!(!ledger.snapshot().no_results());

    ledger
        .filter(FilterChange::TransactionType(Some(9)))
        .unwrap();
    let snapshot = ledger.refresh().await;

    assert!(snapshot.no_results());
    assert!(!snapshot.loading);
    assert_eq!((snapshot.total, snapshot.pages, snapshot.page), (0, 0, 1));
}

#[tokio::test]
async fn unauthorized_is_surfaced_not_retried() {
    let api = FakeApi::with_rows(10);
    let mut ledger = api.controller();
    api.fail_lists([ClientError::Unauthorized]);

    let snapshot = ledger.refresh().await;

    assert_eq!(snapshot.error, Some(ClientError::Unauthorized));
    assert!(!snapshot.loaded);
    assert!(!snapshot.no_results());
    assert_eq!(api.list_calls().len(), 1);
}

#[tokio::test]
async fn toggle_all_is_scoped_to_the_visible_page() {
    let api = FakeApi::with_rows(60);
    let mut ledger = api.controller();
    let snapshot = ledger.refresh().await;
    let visible = snapshot.ids();
    assert_eq!(visible.len(), 20);

    for id in visible.iter().step_by(4) {
        ledger.toggle(*id);
    }
    assert_eq!(ledger.selection().count(), 5);

    ledger.toggle_all();
    assert_eq!(ledger.selection().count(), 0);

    ledger.toggle_all();
    assert_eq!(ledger.selection().ids().len(), 20);
    assert!(visible.iter().all(|id| ledger.selection().is_selected(*id)));
}

#[tokio::test]
async fn changing_page_or_filters_clears_selection() {
    let api = FakeApi::with_rows(60);
    let mut ledger = api.controller();
    ledger.refresh().await;

    ledger.toggle_all();
    ledger.next_page().unwrap();
    assert!(ledger.selection().is_empty());

    ledger.refresh().await;
    ledger.toggle_all();
    ledger.filter(FilterChange::Sort(SortKey::AmountDesc)).unwrap();
    assert!(ledger.selection().is_empty());
}

#[tokio::test]
async fn delete_deselects_and_invalidates_ledger_and_reports() {
    let api = FakeApi::with_rows(60);
    let mut ledger = api.controller();
    ledger.refresh().await;
    ledger.set_page(2).unwrap();
    ledger.refresh().await;
    let page_two = ledger.descriptor().clone();
    ledger.set_page(1).unwrap();
    let snapshot = ledger.refresh().await;
    let page_one = ledger.descriptor().clone();
    assert!(snapshot.ids().contains(&42));

    let portfolio = ledger.mount_view(DerivedView::Portfolio);
    let evolution = ledger.mount_view(DerivedView::Evolution);
    assert!(portfolio.load().await.data.is_some());
    assert!(evolution.load().await.data.is_some());

    assert!(ledger.toggle(42));
    ledger.delete(42).await.unwrap();

    assert!(!ledger.selection().is_selected(42));
    assert_eq!(api.deletes(), vec![42]);
    assert!(ledger.cache().peek(&page_one).is_stale());
    assert!(ledger.cache().peek(&page_two).is_stale());
    assert!(portfolio.snapshot().stale);
    assert!(evolution.snapshot().stale);
    assert!(!ledger.snapshot().ids().contains(&42));

    let snapshot = ledger.refresh().await;
    assert_eq!(snapshot.total, 59);
    assert!(!snapshot.ids().contains(&42));
    assert_eq!(snapshot.items.len(), 20);
}

#[tokio::test]
async fn bulk_edit_reports_partial_failure() {
    let api = FakeApi::with_rows(30);
    let mut ledger = api.controller();
    ledger.filter(FilterChange::Sort(SortKey::DateAsc)).unwrap();
    ledger.refresh().await;
    for id in [1, 2, 3] {
        ledger.toggle(id);
    }
    api.fail_id(2, ClientError::Network("connection reset".to_string()));
    let invalidations = ledger.cache().stats().invalidations;

    let patch = TransactionPatch {
        category_id: Patch::Set(7),
        ..Default::default()
    };
    let report = ledger.edit_selected(&patch).await;

    assert_eq!(report.succeeded, vec![1, 3]);
    assert_eq!(report.failed_ids(), vec![2]);
    assert_eq!(ledger.selection().ids(), vec![2]);
    assert_eq!(ledger.cache().stats().invalidations, invalidations + 1);
    assert_eq!(api.updates().len(), 3);
    assert_eq!(api.stored(1).unwrap().category_id, Some(7));
    assert_eq!(api.stored(2).unwrap().category_id, Some(3));
    assert_eq!(api.stored(3).unwrap().category_id, Some(7));
    assert_eq!(
        report.into_result(),
        Err(MutationError::PartialBatch {
            failed: 1,
            total: 3
        })
    );

    let snapshot = ledger.refresh().await;
    assert_eq!(snapshot.items[0].category_id, Some(7));
    assert_eq!(snapshot.items[1].category_id, Some(3));
    assert_eq!(ledger.selection().ids(), vec![2]);
}

#[tokio::test]
async fn bulk_delete_removes_rows_and_clears_selection() {
    let api = FakeApi::with_rows(30);
    let mut ledger = api.controller();
    let snapshot = ledger.refresh().await;
    ledger.toggle_all();
    let invalidations = ledger.cache().stats().invalidations;

    let report = ledger.delete_selected().await;

    assert!(report.is_complete());
    assert_eq!(report.succeeded, snapshot.ids().into_iter().rev().collect::<Vec<_>>());
    assert!(ledger.selection().is_empty());
    assert_eq!(ledger.cache().stats().invalidations, invalidations + 1);
    let snapshot = ledger.refresh().await;
    assert_eq!(snapshot.total, 10);
}

#[tokio::test]
async fn bulk_delete_keeps_failed_ids_selected() {
    let api = FakeApi::with_rows(30);
    let mut ledger = api.controller();
    ledger.refresh().await;
    for id in [26, 27, 28] {
        ledger.toggle(id);
    }
    api.fail_id(27, ClientError::Network("connection reset".to_string()));
    let invalidations = ledger.cache().stats().invalidations;

    let report = ledger.delete_selected().await;

    assert_eq!(report.succeeded, vec![26, 28]);
    assert_eq!(report.failed_ids(), vec![27]);
    assert_eq!(ledger.selection().ids(), vec![27]);
    assert_eq!(ledger.cache().stats().invalidations, invalidations + 1);
    assert_eq!(api.deletes().len(), 3);
    assert!(api.stored(27).is_some());
    assert!(api.stored(26).is_none());

    let snapshot = ledger.refresh().await;
    assert_eq!(snapshot.total, 28);
    assert!(snapshot.ids().contains(&27));
    assert_eq!(ledger.selection().ids(), vec![27]);
}

#[tokio::test]
async fn bulk_with_nothing_to_do_sends_nothing() {
    let api = FakeApi::with_rows(10);
    let mut ledger = api.controller();
    let invalidations = ledger.cache().stats().invalidations;

    let report = ledger.bulk_delete(&[]).await;
    assert_eq!(report.total(), 0);
    let report = ledger.bulk_edit(&[1, 2], &TransactionPatch::default()).await;
    assert_eq!(report.total(), 0);

    assert!(api.updates().is_empty());
    assert!(api.deletes().is_empty());
    assert_eq!(ledger.cache().stats().invalidations, invalidations);
}

#[tokio::test]
async fn patch_changes_only_the_fields_it_sets() {
    let api = FakeApi::with_rows(10);
    let mut ledger = api.controller();
    let before = api.stored(5).unwrap();

    let outcome = ledger.edit(5, &describe("Coffee")).await.unwrap();

    let mut expected = before;
    expected.description = "Coffee".to_string();
    assert_eq!(outcome, EditOutcome::Updated(expected.clone()));
    assert_eq!(api.stored(5), Some(expected));
}

#[tokio::test]
async fn explicit_null_clears_category_only() {
    let api = FakeApi::with_rows(10);
    let mut ledger = api.controller();

    let patch = TransactionPatch {
        category_id: Patch::Clear,
        ..Default::default()
    };
    ledger.edit(4, &patch).await.unwrap();

    let stored = api.stored(4).unwrap();
    assert_eq!(stored.category_id, None);
    assert_eq!(stored.subcategory_id, Some(30));
    assert_eq!(stored.tag_ids, vec![1, 2]);
}

#[tokio::test]
async fn empty_patch_is_a_no_op() {
    let api = FakeApi::with_rows(10);
    let mut ledger = api.controller();
    ledger.toggle(3);
    let invalidations = ledger.cache().stats().invalidations;

    let outcome = ledger.edit(3, &TransactionPatch::default()).await.unwrap();

    assert_eq!(outcome, EditOutcome::Skipped);
    assert!(api.updates().is_empty());
    assert!(ledger.selection().is_selected(3));
    assert_eq!(ledger.cache().stats().invalidations, invalidations);
}

#[tokio::test]
async fn rejected_edit_restores_cached_row() {
    let api = FakeApi::with_rows(30);
    let mut ledger = api.controller();
    ledger.refresh().await;
    ledger.toggle(25);
    api.fail_id(
        25,
        ClientError::from_status(422, "Amount is required".to_string()),
    );
    let invalidations = ledger.cache().stats().invalidations;

    let err = ledger.edit(25, &describe("Groceries")).await.unwrap_err();

    assert_eq!(err.to_string(), "Amount is required");
    let row = ledger
        .snapshot()
        .items
        .into_iter()
        .find(|t| t.id == 25)
        .unwrap();
    assert_eq!(row.description, "Transaction 25");
    assert!(ledger.selection().is_selected(25));
    assert_eq!(ledger.cache().stats().invalidations, invalidations);
}

#[tokio::test]
async fn rejected_delete_restores_cached_row() {
    let api = FakeApi::with_rows(30);
    let mut ledger = api.controller();
    ledger.refresh().await;
    api.fail_id(25, ClientError::Forbidden);

    let err = ledger.delete(25).await.unwrap_err();

    assert_eq!(err, MutationError::Client(ClientError::Forbidden));
    let snapshot = ledger.snapshot();
    assert!(snapshot.ids().contains(&25));
    assert_eq!(snapshot.total, 30);
}

#[tokio::test]
async fn failed_delete_keeps_a_page_refetched_meanwhile() {
    let api = FakeApi::with_rows(30);
    let mut ledger = api.controller();
    ledger.refresh().await;
    api.remove_rows([30]);
    api.fail_id(25, ClientError::Forbidden);
    let gate = api.hold_id(25);
    let cache = ledger.cache().clone();
    let descriptor = ledger.descriptor().clone();

    let (result, ()) = tokio::join!(ledger.delete(25), async {
        api.wait_for_deletes(1).await;
        cache.invalidate(&[Invalidate::Prefix(TRANSACTIONS)]);
        let refetched = cache.read(&descriptor).await;
        assert!(!refetched.page().unwrap().ids().contains(&30));
        gate.open();
    });

    assert_eq!(result, Err(MutationError::Client(ClientError::Forbidden)));
    let entry = cache.peek(&descriptor);
    assert_eq!(entry.status, EntryStatus::Fresh);
    let ids = entry.page().unwrap().ids();
    assert!(!ids.contains(&30), "deleted row came back from the rollback");
    assert!(ids.contains(&25));
    assert_eq!(ledger.snapshot().total, 29);
}

#[tokio::test]
async fn paging_stays_within_known_pages_and_clears_selection() {
    let api = FakeApi::with_rows(30);
    let mut ledger = api.controller();
    ledger.refresh().await;
    ledger.toggle(30);

    assert!(ledger.next_page().unwrap());
    assert!(ledger.selection().is_empty());
    assert_eq!(ledger.refresh().await.page, 2);

    ledger.toggle(5);
    assert!(!ledger.next_page().unwrap());
    assert!(ledger.selection().is_selected(5));

    assert!(ledger.prev_page().unwrap());
    assert!(!ledger.prev_page().unwrap());
    assert_eq!(ledger.filters().page(), 1);
}

#[tokio::test]
async fn create_sends_an_idempotency_key() {
    let api = FakeApi::with_rows(3);
    let mut ledger = api.controller();
    ledger.refresh().await;

    let payload = TransactionNew {
        date: date(2024, 6, 1),
        description: "Rent".to_string(),
        amount: Decimal::new(-95000, 2),
        account_id: 1,
        transaction_type_id: 1,
        category_id: Some(4),
        subcategory_id: None,
        tag_ids: Vec::new(),
        symbol: None,
        quantity: None,
        price_per_unit: None,
        measurement_unit: None,
        idempotency_key: None,
    };
    let created = ledger.create(payload.clone()).await.unwrap();
    ledger
        .create(TransactionNew {
            idempotency_key: Some("retry-1".to_string()),
            ..payload
        })
        .await
        .unwrap();

    assert_eq!(created.id, 4);
    let creates = api.creates();
    assert_eq!(creates[0].idempotency_key.as_ref().map(String::len), Some(36));
    assert_eq!(creates[1].idempotency_key.as_deref(), Some("retry-1"));
    assert!(ledger.snapshot().stale);

    let snapshot = ledger.refresh().await;
    assert_eq!(snapshot.total, 5);
}

#[tokio::test]
async fn sign_out_drops_cached_queries_and_selection() {
    let api = FakeApi::with_rows(60);
    let mut ledger = api.controller();
    ledger.filter(FilterChange::Category(Some(3))).unwrap();
    ledger.refresh().await;
    ledger.toggle_all();

    ledger.sign_out();

    assert!(ledger.selection().is_empty());
    assert_eq!(ledger.filters().category_id(), None);
    assert_eq!(ledger.cache().len(), 1, "only the remounted first page");
    assert!(!ledger.snapshot().loaded);

    let snapshot = ledger.refresh().await;
    assert!(snapshot.loaded);
    assert_eq!(api.list_calls().len(), 2);
}

#[tokio::test]
async fn builder_requires_a_backend_and_valid_page_size() {
    assert!(LedgerController::<FakeApi>::builder().build().is_err());
    assert!(
        LedgerController::builder()
            .api(FakeApi::default())
            .page_size(0)
            .build()
            .is_err()
    );
}
