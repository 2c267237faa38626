//! User-controlled parameters of the ledger query.
//!
//! Every change other than the page number itself moves back to page 1: the
//! result set under a new filter may have fewer pages than the one that was
//! displayed.

use api_types::transaction::{SortKey, TransactionList};
use chrono::NaiveDate;

use crate::{descriptor::QueryDescriptor, error::FilterError};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// One user edit of the filter state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterChange {
    Category(Option<i64>),
    TransactionType(Option<i64>),
    StartDate(Option<NaiveDate>),
    EndDate(Option<NaiveDate>),
    DateRange {
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    },
    Sort(SortKey),
    PageSize(u32),
    /// Drops every filter, keeps sort and page size.
    Reset,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerFilters {
    page: u32,
    size: u32,
    sort: SortKey,
    category_id: Option<i64>,
    transaction_type_id: Option<i64>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
}

impl Default for LedgerFilters {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl LedgerFilters {
    pub fn new(size: u32) -> Self {
        Self {
            page: 1,
            size: size.clamp(1, MAX_PAGE_SIZE),
            sort: SortKey::default(),
            category_id: None,
            transaction_type_id: None,
            start_date: None,
            end_date: None,
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn sort(&self) -> SortKey {
        self.sort
    }

    pub fn category_id(&self) -> Option<i64> {
        self.category_id
    }

    pub fn transaction_type_id(&self) -> Option<i64> {
        self.transaction_type_id
    }

    pub fn date_range(&self) -> (Option<NaiveDate>, Option<NaiveDate>) {
        (self.start_date, self.end_date)
    }

    pub fn set_category(&mut self, category_id: Option<i64>) {
        self.category_id = category_id;
        self.page = 1;
    }

    pub fn set_transaction_type(&mut self, transaction_type_id: Option<i64>) {
        self.transaction_type_id = transaction_type_id;
        self.page = 1;
    }

    pub fn set_start_date(&mut self, start: Option<NaiveDate>) -> Result<(), FilterError> {
        self.set_date_range(start, self.end_date)
    }

    pub fn set_end_date(&mut self, end: Option<NaiveDate>) -> Result<(), FilterError> {
        self.set_date_range(self.start_date, end)
    }

    /// Both bounds are inclusive; a start after the end is rejected and
    /// leaves the state untouched.
    pub fn set_date_range(
        &mut self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<(), FilterError> {
        if let (Some(start), Some(end)) = (start, end)
            && start > end
        {
            return Err(FilterError::InvalidDateRange { start, end });
        }
        self.start_date = start;
        self.end_date = end;
        self.page = 1;
        Ok(())
    }

    pub fn set_sort(&mut self, sort: SortKey) {
        self.sort = sort;
        self.page = 1;
    }

    /// Parses a wire sort key; unknown values are an error, never a default.
    pub fn set_sort_str(&mut self, raw: &str) -> Result<(), FilterError> {
        let sort = raw.parse::<SortKey>()?;
        self.set_sort(sort);
        Ok(())
    }

    pub fn set_page_size(&mut self, size: u32) -> Result<(), FilterError> {
        if size == 0 || size > MAX_PAGE_SIZE {
            return Err(FilterError::InvalidPageSize {
                size,
                max: MAX_PAGE_SIZE,
            });
        }
        self.size = size;
        self.page = 1;
        Ok(())
    }

    pub fn set_page(&mut self, page: u32) -> Result<(), FilterError> {
        if page == 0 {
            return Err(FilterError::InvalidPage);
        }
        self.page = page;
        Ok(())
    }

    /// Moves back to `last` when the current page is beyond it.
    pub fn clamp_page(&mut self, last: u32) -> bool {
        let last = last.max(1);
        if self.page <= last {
            return false;
        }
        self.page = last;
        true
    }

    pub fn clear(&mut self) {
        self.category_id = None;
        self.transaction_type_id = None;
        self.start_date = None;
        self.end_date = None;
        self.page = 1;
    }

    pub fn apply(&mut self, change: FilterChange) -> Result<(), FilterError> {
        match change {
            FilterChange::Category(id) => self.set_category(id),
            FilterChange::TransactionType(id) => self.set_transaction_type(id),
            FilterChange::StartDate(start) => self.set_start_date(start)?,
            FilterChange::EndDate(end) => self.set_end_date(end)?,
            FilterChange::DateRange { start, end } => self.set_date_range(start, end)?,
            FilterChange::Sort(sort) => self.set_sort(sort),
            FilterChange::PageSize(size) => self.set_page_size(size)?,
            FilterChange::Reset => self.clear(),
        }
        Ok(())
    }

    /// Same state, same descriptor.
    pub fn descriptor(&self) -> QueryDescriptor {
        QueryDescriptor::Transactions(TransactionList {
            page: self.page,
            size: self.size,
            sort_by: self.sort,
            category_id: self.category_id,
            transaction_type_id: self.transaction_type_id,
            start_date: self.start_date,
            end_date: self.end_date,
        })
    }
}
