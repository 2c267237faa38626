use api_types::{
    Patch,
    analytics::DerivedView,
    transaction::{SortKey, Transaction, TransactionId, TransactionNew, TransactionPatch},
};
use chrono::NaiveDate;
use clap::{Args, Subcommand, ValueEnum};
use ledger_view::{
    BatchReport, EditOutcome, FilterChange, LedgerApi, LedgerController, LedgerSnapshot,
};
use rust_decimal::Decimal;

use crate::error::Result;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List one page of transactions.
    List(ListArgs),
    /// Print one transaction as JSON.
    Show { id: TransactionId },
    /// Record a new transaction.
    Create(CreateArgs),
    /// Update the given fields of one transaction.
    Edit {
        id: TransactionId,
        #[command(flatten)]
        patch: PatchArgs,
    },
    Delete { id: TransactionId },
    /// Apply the same update to several transactions.
    BulkEdit {
        #[arg(long, required = true, value_delimiter = ',')]
        ids: Vec<TransactionId>,
        #[command(flatten)]
        patch: PatchArgs,
    },
    BulkDelete {
        #[arg(long, required = true, value_delimiter = ',')]
        ids: Vec<TransactionId>,
    },
    /// Print a derived report.
    View {
        #[arg(value_enum)]
        view: ViewArg,
    },
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long)]
    category: Option<i64>,
    #[arg(long = "type")]
    transaction_type: Option<i64>,
    /// First day included (YYYY-MM-DD).
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Last day included (YYYY-MM-DD).
    #[arg(long)]
    to: Option<NaiveDate>,
    /// date_asc, date_desc, amount_asc or amount_desc.
    #[arg(long)]
    pub sort: Option<SortKey>,
}

#[derive(Debug, Args)]
pub struct CreateArgs {
    /// Defaults to today.
    #[arg(long)]
    date: Option<NaiveDate>,
    #[arg(long)]
    description: String,
    #[arg(long, allow_hyphen_values = true)]
    amount: Decimal,
    #[arg(long)]
    account: i64,
    #[arg(long = "type")]
    transaction_type: i64,
    #[arg(long)]
    category: Option<i64>,
    #[arg(long)]
    subcategory: Option<i64>,
    #[arg(long, value_delimiter = ',')]
    tags: Vec<i64>,
}

#[derive(Debug, Default, Args)]
pub struct PatchArgs {
    #[arg(long)]
    date: Option<NaiveDate>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long, allow_hyphen_values = true)]
    amount: Option<Decimal>,
    #[arg(long)]
    account: Option<i64>,
    #[arg(long = "type")]
    transaction_type: Option<i64>,
    #[arg(long, conflicts_with = "clear_category")]
    category: Option<i64>,
    /// Remove the category (and sub-category) from the transaction.
    #[arg(long)]
    clear_category: bool,
    #[arg(long, value_delimiter = ',')]
    tags: Option<Vec<i64>>,
}

impl PatchArgs {
    fn into_patch(self) -> TransactionPatch {
        let (category_id, subcategory_id) = match (self.category, self.clear_category) {
            (_, true) => (Patch::Clear, Patch::Clear),
            (Some(category), false) => (Patch::Set(category), Patch::Unset),
            (None, false) => (Patch::Unset, Patch::Unset),
        };
        TransactionPatch {
            date: self.date,
            description: self.description,
            amount: self.amount,
            account_id: self.account,
            transaction_type_id: self.transaction_type,
            category_id,
            subcategory_id,
            tag_ids: self.tags,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ViewArg {
    Portfolio,
    History,
    Spending,
    Evolution,
    SmartShopping,
}

impl From<ViewArg> for DerivedView {
    fn from(view: ViewArg) -> Self {
        match view {
            ViewArg::Portfolio => DerivedView::Portfolio,
            ViewArg::History => DerivedView::History,
            ViewArg::Spending => DerivedView::Spending,
            ViewArg::Evolution => DerivedView::Evolution,
            ViewArg::SmartShopping => DerivedView::SmartShoppingSummary,
        }
    }
}

pub async fn run<A: LedgerApi>(command: Command, ledger: &mut LedgerController<A>) -> Result<()> {
    match command {
        Command::List(args) => list(args, ledger).await,
        Command::Show { id } => {
            let tx = ledger.api().get_transaction(id).await?;
            println!("{}", serde_json::to_string_pretty(&tx)?);
            Ok(())
        }
        Command::Create(args) => {
            let created = ledger.create(args.into_new()).await?;
            println!("created transaction {}", created.id);
            println!("{}", format_row(&created));
            Ok(())
        }
        Command::Edit { id, patch } => {
            match ledger.edit(id, &patch.into_patch()).await? {
                EditOutcome::Skipped => println!("nothing to update"),
                EditOutcome::Updated(tx) => println!("{}", format_row(&tx)),
            }
            Ok(())
        }
        Command::Delete { id } => {
            ledger.delete(id).await?;
            println!("deleted transaction {id}");
            Ok(())
        }
        Command::BulkEdit { ids, patch } => {
            let report = ledger.bulk_edit(&ids, &patch.into_patch()).await;
            print_report("updated", &report);
            report.into_result()?;
            Ok(())
        }
        Command::BulkDelete { ids } => {
            let report = ledger.bulk_delete(&ids).await;
            print_report("deleted", &report);
            report.into_result()?;
            Ok(())
        }
        Command::View { view } => {
            let reader = ledger.mount_view(view.into());
            let snapshot = reader.load().await;
            if let Some(err) = snapshot.error {
                return Err(err.into());
            }
            let data = snapshot.data.unwrap_or_default();
            println!("{}", serde_json::to_string_pretty(&data)?);
            Ok(())
        }
    }
}

impl CreateArgs {
    fn into_new(self) -> TransactionNew {
        TransactionNew {
            date: self
                .date
                .unwrap_or_else(|| chrono::Local::now().date_naive()),
            description: self.description,
            amount: self.amount,
            account_id: self.account,
            transaction_type_id: self.transaction_type,
            category_id: self.category,
            subcategory_id: self.subcategory,
            tag_ids: self.tags,
            symbol: None,
            quantity: None,
            price_per_unit: None,
            measurement_unit: None,
            idempotency_key: None,
        }
    }
}

async fn list<A: LedgerApi>(args: ListArgs, ledger: &mut LedgerController<A>) -> Result<()> {
    ledger.filter(FilterChange::Category(args.category))?;
    ledger.filter(FilterChange::TransactionType(args.transaction_type))?;
    ledger.filter(FilterChange::DateRange {
        start: args.from,
        end: args.to,
    })?;
    if let Some(sort) = args.sort {
        ledger.filter(FilterChange::Sort(sort))?;
    }
    ledger.set_page(args.page)?;

    let snapshot = ledger.refresh().await;
    if let Some(err) = snapshot.error.clone() {
        return Err(err.into());
    }
    print_page(&snapshot);
    Ok(())
}

fn format_row(tx: &Transaction) -> String {
    let category = tx
        .category_id
        .map_or_else(|| "-".to_string(), |id| id.to_string());
    format!(
        "{:>8}  {}  {:>12}  {:>5}  {}",
        tx.id, tx.date, tx.amount, category, tx.description
    )
}

fn print_page(snapshot: &LedgerSnapshot) {
    if snapshot.no_results() {
        println!("no transactions match these filters");
        return;
    }
    println!(
        "{:>8}  {:<10}  {:>12}  {:>5}  description",
        "id", "date", "amount", "cat"
    );
    for tx in &snapshot.items {
        println!("{}", format_row(tx));
    }
    println!(
        "page {} of {} ({} transactions)",
        snapshot.page, snapshot.pages, snapshot.total
    );
}

fn print_report(verb: &str, report: &BatchReport) {
    println!("{verb} {} of {}", report.succeeded.len(), report.total());
    for (id, err) in &report.failed {
        println!("  {id}: {err}");
    }
}
