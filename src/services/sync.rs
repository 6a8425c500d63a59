use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex};

use crate::db::Database;
use crate::errors::SyncResult;
use crate::models::{DealStage, Expense, SyncOutcome};
use crate::services::linking::{self, SalesDoc, SalesDocKind};
use crate::services::quickbooks::{Bill, Estimate, ExpenseLine, Invoice, Purchase, QuickBooks};
use crate::services::stages;
use crate::services::tokens::TokenManager;
use crate::utils::{default_window, now_rfc3339};

/// Purchases and bills move fast; invoices and estimates are longer-lived
/// artifacts and get the wider default window.
const EXPENSE_WINDOW_DAYS: i64 = 90;
const SALES_WINDOW_DAYS: i64 = 365;

pub const SOURCE_PURCHASE: &str = "quickbooks_purchase";
pub const SOURCE_BILL: &str = "quickbooks_bill";

/// Bills share a raw id space with nothing; purchases keep their raw id and
/// bills get this prefix so the two external id spaces cannot collide.
pub const BILL_ID_PREFIX: &str = "BILL-";

pub struct SyncEngine {
    db: Arc<Mutex<Database>>,
    tokens: Arc<TokenManager>,
    qb: Arc<QuickBooks>,
}

impl SyncEngine {
    pub fn new(db: Arc<Mutex<Database>>, tokens: Arc<TokenManager>, qb: Arc<QuickBooks>) -> Self {
        SyncEngine { db, tokens, qb }
    }

    pub async fn fetch_purchases(
        &self,
        start_date: Option<String>,
        end_date: Option<String>,
    ) -> SyncResult<Vec<Purchase>> {
        self.fetch("Purchase", start_date, end_date, EXPENSE_WINDOW_DAYS)
            .await
    }

    pub async fn fetch_bills(
        &self,
        start_date: Option<String>,
        end_date: Option<String>,
    ) -> SyncResult<Vec<Bill>> {
        self.fetch("Bill", start_date, end_date, EXPENSE_WINDOW_DAYS)
            .await
    }

    pub async fn fetch_invoices(
        &self,
        start_date: Option<String>,
        end_date: Option<String>,
    ) -> SyncResult<Vec<Invoice>> {
        self.fetch("Invoice", start_date, end_date, SALES_WINDOW_DAYS)
            .await
    }

    pub async fn fetch_estimates(
        &self,
        start_date: Option<String>,
        end_date: Option<String>,
    ) -> SyncResult<Vec<Estimate>> {
        self.fetch("Estimate", start_date, end_date, SALES_WINDOW_DAYS)
            .await
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        entity: &str,
        start_date: Option<String>,
        end_date: Option<String>,
        default_days: i64,
    ) -> SyncResult<Vec<T>> {
        let credential = self.tokens.get_valid_credential().await?;
        let (default_start, default_end) = default_window(default_days);
        let start = start_date.unwrap_or(default_start);
        let end = end_date.unwrap_or(default_end);
        let statement = QuickBooks::select_statement(
            entity,
            Some(&format!("TxnDate >= '{}' AND TxnDate <= '{}'", start, end)),
        );
        self.qb.query(&credential, entity, &statement).await
    }

    pub async fn sync_purchases(&self) -> SyncResult<SyncOutcome> {
        let purchases = self.fetch_purchases(None, None).await?;
        let db = self.db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
        Ok(apply_purchases(&db, &purchases))
    }

    pub async fn sync_bills(&self) -> SyncResult<SyncOutcome> {
        let bills = self.fetch_bills(None, None).await?;
        let db = self.db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
        Ok(apply_bills(&db, &bills))
    }

    pub async fn sync_invoices(&self) -> SyncResult<SyncOutcome> {
        let invoices = self.fetch_invoices(None, None).await?;
        let db = self.db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
        Ok(apply_invoices(&db, &invoices))
    }

    pub async fn sync_estimates(&self) -> SyncResult<SyncOutcome> {
        let estimates = self.fetch_estimates(None, None).await?;
        let db = self.db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
        Ok(apply_estimates(&db, &estimates))
    }
}

/// Ordered keyword heuristics over the line's account name. Order matters:
/// the first matching bucket wins.
pub fn categorize_account(account_name: &str) -> &'static str {
    let name = account_name.to_lowercase();
    if name.contains("travel") {
        "Travel"
    } else if name.contains("equipment") {
        "Equipment"
    } else if name.contains("labor") || name.contains("contractor") {
        "Labor"
    } else if name.contains("software") || name.contains("subscription") {
        "Software"
    } else if name.contains("office") || name.contains("supplies") {
        "Office Supplies"
    } else if name.contains("insurance") {
        "Insurance"
    } else {
        "Other"
    }
}

/// Document category = most frequent line category; ties resolved by which
/// category appeared first.
pub fn document_category(lines: &[ExpenseLine]) -> String {
    let mut ordered: Vec<(&'static str, usize)> = Vec::new();
    for line in lines {
        let account = line
            .account_based_expense_line_detail
            .as_ref()
            .and_then(|d| d.account_ref.as_ref())
            .and_then(|r| r.name.as_deref());
        let category = match account {
            Some(name) => categorize_account(name),
            None => continue,
        };
        match ordered.iter_mut().find(|(c, _)| *c == category) {
            Some(entry) => entry.1 += 1,
            None => ordered.push((category, 1)),
        }
    }
    let mut best: Option<(&'static str, usize)> = None;
    for (category, count) in ordered {
        match best {
            Some((_, best_count)) if count <= best_count => {}
            _ => best = Some((category, count)),
        }
    }
    best.map(|(category, _)| category.to_string())
        .unwrap_or_else(|| "Other".to_string())
}

pub fn apply_purchases(db: &Database, purchases: &[Purchase]) -> SyncOutcome {
    let mut synced = 0;
    let mut errors = Vec::new();
    for purchase in purchases {
        let result = upsert_expense(
            db,
            &purchase.id,
            SOURCE_PURCHASE,
            purchase.total_amt,
            purchase.txn_date.clone(),
            purchase
                .entity_ref
                .as_ref()
                .and_then(|r| r.name.clone())
                .unwrap_or_default(),
            &purchase.line,
        );
        match result {
            Ok(()) => synced += 1,
            Err(err) => {
                tracing::warn!(purchase_id = %purchase.id, error = %err, "purchase sync failed");
                errors.push(format!("purchase {}: {}", purchase.id, err));
            }
        }
    }
    SyncOutcome { synced, errors }
}

pub fn apply_bills(db: &Database, bills: &[Bill]) -> SyncOutcome {
    let mut synced = 0;
    let mut errors = Vec::new();
    for bill in bills {
        let external_id = format!("{}{}", BILL_ID_PREFIX, bill.id);
        let result = upsert_expense(
            db,
            &external_id,
            SOURCE_BILL,
            bill.total_amt,
            bill.txn_date.clone(),
            bill.vendor_ref
                .as_ref()
                .and_then(|r| r.name.clone())
                .unwrap_or_default(),
            &bill.line,
        );
        match result {
            Ok(()) => synced += 1,
            Err(err) => {
                tracing::warn!(bill_id = %bill.id, error = %err, "bill sync failed");
                errors.push(format!("bill {}: {}", bill.id, err));
            }
        }
    }
    SyncOutcome { synced, errors }
}

fn upsert_expense(
    db: &Database,
    external_id: &str,
    source: &str,
    amount: f64,
    expense_date: Option<String>,
    vendor_name: String,
    lines: &[ExpenseLine],
) -> Result<()> {
    let category = document_category(lines);
    let is_billable = lines.iter().any(|line| {
        line.account_based_expense_line_detail
            .as_ref()
            .and_then(|d| d.billable_status.as_deref())
            == Some("Billable")
    });
    let customer_id = lines.iter().find_map(|line| {
        line.account_based_expense_line_detail
            .as_ref()
            .and_then(|d| d.customer_ref.as_ref())
            .map(|r| r.value.clone())
    });
    let link = match customer_id {
        Some(customer_id) => linking::auto_link(db, &customer_id)?,
        None => None,
    };

    let existing = db.get_expense_by_external_id(external_id)?;
    match existing {
        Some(mut expense) => {
            expense.category = category;
            expense.amount = amount;
            expense.vendor_name = vendor_name;
            expense.is_billable = is_billable;
            expense.source = source.to_string();
            expense.expense_date = expense_date;
            expense.synced_at = now_rfc3339();
            // A recomputed link replaces the old one; no link keeps whatever
            // attribution the row already carried.
            if let Some((lead_id, project_id)) = link {
                expense.lead_id = Some(lead_id);
                expense.project_id = project_id;
            }
            db.update_expense(&expense)?;
        }
        None => {
            let (lead_id, project_id) = match link {
                Some((lead_id, project_id)) => (Some(lead_id), project_id),
                None => (None, None),
            };
            db.insert_expense(&Expense {
                id: uuid::Uuid::new_v4().to_string(),
                external_id: external_id.to_string(),
                lead_id,
                project_id,
                category,
                amount,
                vendor_name,
                is_billable,
                source: source.to_string(),
                expense_date,
                synced_at: now_rfc3339(),
            })?;
        }
    }
    Ok(())
}

pub fn apply_invoices(db: &Database, invoices: &[Invoice]) -> SyncOutcome {
    let mut synced = 0;
    let mut errors = Vec::new();
    for invoice in invoices {
        let doc = SalesDoc {
            external_id: invoice.id.clone(),
            amount: invoice.total_amt,
            customer_id: invoice.customer_ref.as_ref().map(|r| r.value.clone()),
            customer_name: invoice.customer_ref.as_ref().and_then(|r| r.name.clone()),
        };
        let result = linking::reconcile_sales_doc(db, &doc, SalesDocKind::Invoice, DealStage::ClosedWon)
            .and_then(|lead_id| {
                stages::ensure_project_for_lead(db, &lead_id)?;
                Ok(lead_id)
            });
        match result {
            Ok(_) => synced += 1,
            Err(err) => {
                tracing::warn!(invoice_id = %invoice.id, error = %err, "invoice sync failed");
                errors.push(format!("invoice {}: {}", invoice.id, err));
            }
        }
    }
    SyncOutcome { synced, errors }
}

pub fn apply_estimates(db: &Database, estimates: &[Estimate]) -> SyncOutcome {
    let mut synced = 0;
    let mut errors = Vec::new();
    for estimate in estimates {
        let target = stages::stage_for_estimate(estimate);
        let doc = SalesDoc {
            external_id: estimate.id.clone(),
            amount: estimate.total_amt,
            customer_id: estimate.customer_ref.as_ref().map(|r| r.value.clone()),
            customer_name: estimate.customer_ref.as_ref().and_then(|r| r.name.clone()),
        };
        let result = linking::reconcile_sales_doc(db, &doc, SalesDocKind::Estimate, target)
            .and_then(|lead_id| {
                if target == DealStage::ClosedWon {
                    stages::ensure_project_for_lead(db, &lead_id)?;
                }
                Ok(lead_id)
            });
        match result {
            Ok(_) => synced += 1,
            Err(err) => {
                tracing::warn!(estimate_id = %estimate.id, error = %err, "estimate sync failed");
                errors.push(format!("estimate {}: {}", estimate.id, err));
            }
        }
    }
    SyncOutcome { synced, errors }
}
