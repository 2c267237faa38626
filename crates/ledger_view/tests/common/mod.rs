#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use api_types::{
    analytics::DerivedView,
    transaction::{
        SortKey, Transaction, TransactionId, TransactionList, TransactionNew, TransactionPage,
        TransactionPatch,
    },
};
use chrono::{Days, NaiveDate};
use ledger_view::{ClientError, LedgerApi, LedgerController};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tokio::sync::watch;

/// In-memory backend with call recording, failure injection and gates that
/// hold list requests for a given page until opened.
#[derive(Clone, Default)]
pub struct FakeApi {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    rows: BTreeMap<TransactionId, Transaction>,
    next_id: TransactionId,
    list_calls: Vec<TransactionList>,
    view_calls: Vec<DerivedView>,
    updates: Vec<(TransactionId, TransactionPatch)>,
    deletes: Vec<TransactionId>,
    creates: Vec<TransactionNew>,
    failing_ids: HashMap<TransactionId, ClientError>,
    list_failures: VecDeque<ClientError>,
    gates: HashMap<u32, watch::Receiver<bool>>,
    write_gates: HashMap<TransactionId, watch::Receiver<bool>>,
}

pub struct Gate(watch::Sender<bool>);

impl Gate {
    pub fn open(&self) {
        self.0.send_replace(true);
    }
}

pub fn row(id: TransactionId) -> Transaction {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    Transaction {
        id,
        date: start.checked_add_days(Days::new(id as u64)).unwrap(),
        description: format!("Transaction {id}"),
        amount: Decimal::new(-(id * 100 + 50), 2),
        account_id: 1,
        transaction_type_id: if id % 2 == 0 { 1 } else { 2 },
        category_id: Some(3),
        subcategory_id: Some(30),
        tag_ids: vec![1, 2],
        symbol: None,
        quantity: None,
        price_per_unit: None,
        measurement_unit: None,
    }
}

impl FakeApi {
    /// Rows `1..=count`; each id is dated one day after the previous one.
    pub fn with_rows(count: i64) -> Self {
        let api = Self::default();
        {
            let mut state = api.state.lock().unwrap();
            for id in 1..=count {
                state.rows.insert(id, row(id));
            }
            state.next_id = count + 1;
        }
        api
    }

    pub fn controller(&self) -> LedgerController<FakeApi> {
        LedgerController::builder()
            .api(self.clone())
            .page_size(20)
            .build()
            .unwrap()
    }

    pub fn hold_page(&self, page: u32) -> Gate {
        let (tx, rx) = watch::channel(false);
        self.state.lock().unwrap().gates.insert(page, rx);
        Gate(tx)
    }

    /// Holds updates and deletes of `id` until the gate opens.
    pub fn hold_id(&self, id: TransactionId) -> Gate {
        let (tx, rx) = watch::channel(false);
        self.state.lock().unwrap().write_gates.insert(id, rx);
        Gate(tx)
    }

    pub fn fail_id(&self, id: TransactionId, err: ClientError) {
        self.state.lock().unwrap().failing_ids.insert(id, err);
    }

    /// The next list requests fail with `errors`, in order.
    pub fn fail_lists(&self, errors: impl IntoIterator<Item = ClientError>) {
        self.state.lock().unwrap().list_failures.extend(errors);
    }

    pub fn remove_rows(&self, ids: impl IntoIterator<Item = TransactionId>) {
        let mut state = self.state.lock().unwrap();
        for id in ids {
            state.rows.remove(&id);
        }
    }

    pub fn stored(&self, id: TransactionId) -> Option<Transaction> {
        self.state.lock().unwrap().rows.get(&id).cloned()
    }

    pub fn list_calls(&self) -> Vec<TransactionList> {
        self.state.lock().unwrap().list_calls.clone()
    }

    pub fn view_calls(&self) -> Vec<DerivedView> {
        self.state.lock().unwrap().view_calls.clone()
    }

    pub fn updates(&self) -> Vec<(TransactionId, TransactionPatch)> {
        self.state.lock().unwrap().updates.clone()
    }

    pub fn deletes(&self) -> Vec<TransactionId> {
        self.state.lock().unwrap().deletes.clone()
    }

    pub fn creates(&self) -> Vec<TransactionNew> {
        self.state.lock().unwrap().creates.clone()
    }

    /// Yields until `count` list requests have reached the backend.
    pub async fn wait_for_list_calls(&self, count: usize) {
        while self.list_calls().len() < count {
            tokio::task::yield_now().await;
        }
    }

    /// Yields until `count` delete requests have reached the backend.
    pub async fn wait_for_deletes(&self, count: usize) {
        while self.deletes().len() < count {
            tokio::task::yield_now().await;
        }
    }

    async fn pass_gate(&self, id: TransactionId) {
        let gate = self.state.lock().unwrap().write_gates.get(&id).cloned();
        if let Some(mut gate) = gate {
            let _ = gate.wait_for(|open| *open).await;
        }
    }

    fn page(&self, params: &TransactionList) -> TransactionPage {
        let state = self.state.lock().unwrap();
        let mut items: Vec<Transaction> = state
            .rows
            .values()
            .filter(|t| params.category_id.is_none_or(|c| t.category_id == Some(c)))
            .filter(|t| {
                params
                    .transaction_type_id
                    .is_none_or(|k| t.transaction_type_id == k)
            })
            .filter(|t| params.start_date.is_none_or(|d| t.date >= d))
            .filter(|t| params.end_date.is_none_or(|d| t.date <= d))
            .cloned()
            .collect();
        match params.sort_by {
            SortKey::DateAsc => items.sort_by_key(|t| (t.date, t.id)),
            SortKey::DateDesc => items.sort_by_key(|t| std::cmp::Reverse((t.date, t.id))),
            SortKey::AmountAsc => items.sort_by_key(|t| (t.amount, t.id)),
            SortKey::AmountDesc => items.sort_by_key(|t| std::cmp::Reverse((t.amount, t.id))),
        }

        let total = items.len() as u64;
        let size = params.size.max(1);
        let pages = total.div_ceil(u64::from(size)) as u32;
        let start = ((params.page.max(1) - 1) * size) as usize;
        let items = items.into_iter().skip(start).take(size as usize).collect();
        TransactionPage {
            items,
            total,
            page: params.page,
            size,
            pages,
        }
    }
}

impl LedgerApi for FakeApi {
    async fn list_transactions(
        &self,
        params: &TransactionList,
    ) -> Result<TransactionPage, ClientError> {
        let (failure, gate) = {
            let mut state = self.state.lock().unwrap();
            state.list_calls.push(params.clone());
            (
                state.list_failures.pop_front(),
                state.gates.get(&params.page).cloned(),
            )
        };
        if let Some(mut gate) = gate {
            let _ = gate.wait_for(|open| *open).await;
        }
        if let Some(err) = failure {
            return Err(err);
        }
        Ok(self.page(params))
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Transaction, ClientError> {
        self.stored(id).ok_or(ClientError::NotFound)
    }

    async fn create_transaction(
        &self,
        payload: &TransactionNew,
    ) -> Result<Transaction, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.creates.push(payload.clone());
        let id = state.next_id;
        state.next_id += 1;
        let created = Transaction {
            id,
            date: payload.date,
            description: payload.description.clone(),
            amount: payload.amount,
            account_id: payload.account_id,
            transaction_type_id: payload.transaction_type_id,
            category_id: payload.category_id,
            subcategory_id: payload.subcategory_id,
            tag_ids: payload.tag_ids.clone(),
            symbol: payload.symbol.clone(),
            quantity: payload.quantity,
            price_per_unit: payload.price_per_unit,
            measurement_unit: payload.measurement_unit.clone(),
        };
        state.rows.insert(id, created.clone());
        Ok(created)
    }

    async fn update_transaction(
        &self,
        id: TransactionId,
        patch: &TransactionPatch,
    ) -> Result<Transaction, ClientError> {
        self.state
            .lock()
            .unwrap()
            .updates
            .push((id, patch.clone()));
        self.pass_gate(id).await;
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.failing_ids.get(&id) {
            return Err(err.clone());
        }
        let row = state.rows.get_mut(&id).ok_or(ClientError::NotFound)?;
        patch.apply_to(row);
        Ok(row.clone())
    }

    async fn delete_transaction(&self, id: TransactionId) -> Result<(), ClientError> {
        self.state.lock().unwrap().deletes.push(id);
        self.pass_gate(id).await;
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.failing_ids.get(&id) {
            return Err(err.clone());
        }
        state.rows.remove(&id).map(|_| ()).ok_or(ClientError::NotFound)
    }

    async fn derived_view(&self, view: DerivedView) -> Result<Value, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.view_calls.push(view);
        Ok(json!({
            "view": view.path(),
            "transactions": state.rows.len(),
        }))
    }
}
