use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A field of a partial update.
///
/// `Unset` fields are omitted from the request body and left untouched by the
/// server, `Clear` is sent as an explicit `null` and `Set` carries the new
/// value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Patch<T> {
    #[default]
    Unset,
    Clear,
    Set(T),
}

impl<T> Patch<T> {
    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    /// Builds a patch from an optional value: `None` clears the field.
    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(value) => Self::Set(value),
            None => Self::Clear,
        }
    }
}

impl<T: Clone> Patch<T> {
    pub fn apply(&self, target: &mut Option<T>) {
        match self {
            Self::Unset => {}
            Self::Clear => *target = None,
            Self::Set(value) => *target = Some(value.clone()),
        }
    }
}

impl<T: Serialize> Serialize for Patch<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Set(value) => value.serialize(serializer),
            Self::Unset | Self::Clear => serializer.serialize_none(),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from_option(Option::<T>::deserialize(deserializer)?))
    }
}

pub mod transaction {
    use std::{fmt, str::FromStr};

    use super::*;

    pub type TransactionId = i64;

    /// Ordering of the ledger. The wire value is the `sort_by` query parameter.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum SortKey {
        DateAsc,
        #[default]
        DateDesc,
        AmountAsc,
        AmountDesc,
    }

    impl SortKey {
        pub const ALL: [SortKey; 4] = [
            Self::DateAsc,
            Self::DateDesc,
            Self::AmountAsc,
            Self::AmountDesc,
        ];

        pub fn as_str(self) -> &'static str {
            match self {
                Self::DateAsc => "date_asc",
                Self::DateDesc => "date_desc",
                Self::AmountAsc => "amount_asc",
                Self::AmountDesc => "amount_desc",
            }
        }
    }

    impl fmt::Display for SortKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    #[error("unknown sort key: {0}")]
    pub struct UnknownSortKey(pub String);

    impl FromStr for SortKey {
        type Err = UnknownSortKey;

        fn from_str(raw: &str) -> Result<Self, Self::Err> {
            Self::ALL
                .into_iter()
                .find(|key| key.as_str() == raw)
                .ok_or_else(|| UnknownSortKey(raw.to_string()))
        }
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct Transaction {
        pub id: TransactionId,
        pub date: NaiveDate,
        pub description: String,
        /// Signed amount; the sign convention belongs to the transaction type.
        pub amount: Decimal,
        pub account_id: i64,
        pub transaction_type_id: i64,
        pub category_id: Option<i64>,
        pub subcategory_id: Option<i64>,
        #[serde(default)]
        pub tag_ids: Vec<i64>,
        /// Investment ticker.
        pub symbol: Option<String>,
        /// Units bought or sold (investments) or purchased (smart shopping).
        pub quantity: Option<Decimal>,
        pub price_per_unit: Option<Decimal>,
        /// Smart-shopping measurement unit (`kg`, `l`, ...).
        pub measurement_unit: Option<String>,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct TransactionNew {
        pub date: NaiveDate,
        pub description: String,
        pub amount: Decimal,
        pub account_id: i64,
        pub transaction_type_id: i64,
        pub category_id: Option<i64>,
        pub subcategory_id: Option<i64>,
        #[serde(default)]
        pub tag_ids: Vec<i64>,
        pub symbol: Option<String>,
        pub quantity: Option<Decimal>,
        pub price_per_unit: Option<Decimal>,
        pub measurement_unit: Option<String>,
        /// Optional idempotency key for safely retrying the same create request.
        pub idempotency_key: Option<String>,
    }

    /// Body of `PATCH transactions/{id}`: only the fields that are present are
    /// overwritten server-side.
    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    pub struct TransactionPatch {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub date: Option<NaiveDate>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub description: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub amount: Option<Decimal>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub account_id: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub transaction_type_id: Option<i64>,
        #[serde(default, skip_serializing_if = "Patch::is_unset")]
        pub category_id: Patch<i64>,
        #[serde(default, skip_serializing_if = "Patch::is_unset")]
        pub subcategory_id: Patch<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub tag_ids: Option<Vec<i64>>,
        #[serde(default, skip_serializing_if = "Patch::is_unset")]
        pub symbol: Patch<String>,
        #[serde(default, skip_serializing_if = "Patch::is_unset")]
        pub quantity: Patch<Decimal>,
        #[serde(default, skip_serializing_if = "Patch::is_unset")]
        pub price_per_unit: Patch<Decimal>,
        #[serde(default, skip_serializing_if = "Patch::is_unset")]
        pub measurement_unit: Patch<String>,
    }

    impl TransactionPatch {
        /// True when no field would be sent.
        pub fn is_empty(&self) -> bool {
            self.date.is_none()
                && self.description.is_none()
                && self.amount.is_none()
                && self.account_id.is_none()
                && self.transaction_type_id.is_none()
                && self.category_id.is_unset()
                && self.subcategory_id.is_unset()
                && self.tag_ids.is_none()
                && self.symbol.is_unset()
                && self.quantity.is_unset()
                && self.price_per_unit.is_unset()
                && self.measurement_unit.is_unset()
        }

        /// Applies the patch the way the server does.
        pub fn apply_to(&self, tx: &mut Transaction) {
            if let Some(date) = self.date {
                tx.date = date;
            }
            if let Some(description) = &self.description {
                tx.description = description.clone();
            }
            if let Some(amount) = self.amount {
                tx.amount = amount;
            }
            if let Some(account_id) = self.account_id {
                tx.account_id = account_id;
            }
            if let Some(transaction_type_id) = self.transaction_type_id {
                tx.transaction_type_id = transaction_type_id;
            }
            self.category_id.apply(&mut tx.category_id);
            self.subcategory_id.apply(&mut tx.subcategory_id);
            if let Some(tag_ids) = &self.tag_ids {
                tx.tag_ids = tag_ids.clone();
            }
            self.symbol.apply(&mut tx.symbol);
            self.quantity.apply(&mut tx.quantity);
            self.price_per_unit.apply(&mut tx.price_per_unit);
            self.measurement_unit.apply(&mut tx.measurement_unit);
        }
    }

    /// Query parameters of `GET transactions`.
    #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct TransactionList {
        pub page: u32,
        pub size: u32,
        pub sort_by: SortKey,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub category_id: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub transaction_type_id: Option<i64>,
        /// Inclusive lower bound.
        #[serde(skip_serializing_if = "Option::is_none")]
        pub start_date: Option<NaiveDate>,
        /// Inclusive upper bound.
        #[serde(skip_serializing_if = "Option::is_none")]
        pub end_date: Option<NaiveDate>,
    }

    impl TransactionList {
        /// Parameters in their canonical order, absent filters omitted.
        pub fn params(&self) -> Vec<(&'static str, String)> {
            let mut params = vec![
                ("page", self.page.to_string()),
                ("size", self.size.to_string()),
                ("sort_by", self.sort_by.as_str().to_string()),
            ];
            if let Some(category_id) = self.category_id {
                params.push(("category_id", category_id.to_string()));
            }
            if let Some(transaction_type_id) = self.transaction_type_id {
                params.push(("transaction_type_id", transaction_type_id.to_string()));
            }
            if let Some(start_date) = self.start_date {
                params.push(("start_date", start_date.to_string()));
            }
            if let Some(end_date) = self.end_date {
                params.push(("end_date", end_date.to_string()));
            }
            params
        }
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct TransactionPage {
        pub items: Vec<Transaction>,
        pub total: u64,
        pub page: u32,
        pub size: u32,
        pub pages: u32,
    }

    impl TransactionPage {
        pub fn ids(&self) -> Vec<TransactionId> {
            self.items.iter().map(|tx| tx.id).collect()
        }
    }
}

pub mod analytics {
    use serde::{Deserialize, Serialize};

    /// Reports computed server-side from the same transactions as the ledger.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum DerivedView {
        Portfolio,
        History,
        Spending,
        Evolution,
        SmartShoppingSummary,
    }

    impl DerivedView {
        pub const ALL: [DerivedView; 5] = [
            Self::Portfolio,
            Self::History,
            Self::Spending,
            Self::Evolution,
            Self::SmartShoppingSummary,
        ];

        /// Endpoint path relative to the API base URL.
        pub const fn path(self) -> &'static str {
            match self {
                Self::Portfolio => "portfolio",
                Self::History => "analytics/history",
                Self::Spending => "analytics/spending",
                Self::Evolution => "analytics/evolution",
                Self::SmartShoppingSummary => "analytics/smart-shopping/summary",
            }
        }

        pub fn label(self) -> &'static str {
            match self {
                Self::Portfolio => "Portfolio",
                Self::History => "History",
                Self::Spending => "Spending",
                Self::Evolution => "Evolution",
                Self::SmartShoppingSummary => "Smart shopping",
            }
        }
    }
}
