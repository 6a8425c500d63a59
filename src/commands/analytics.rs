use anyhow::anyhow;

use crate::errors::SyncResult;
use crate::models::{FinancialMetrics, JobCostingReport};
use crate::services::job_costing;
use crate::services::reports;
use crate::services::state::AppState;
use crate::utils::{month_start_ymd, now_rfc3339, today_ymd};

/// Job profitability and overhead rollup over the local mirror. Purely
/// local; no network.
pub fn job_costing(state: &AppState) -> SyncResult<JobCostingReport> {
    let db = state.db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
    Ok(job_costing::job_costing_report(&db)?)
}

/// Snapshot of cash position and month-to-date revenue straight from the
/// external reports.
pub async fn financial_metrics(state: &AppState) -> SyncResult<FinancialMetrics> {
    let tokens = state.token_manager()?;
    let qb = state.quickbooks()?;
    let credential = tokens.get_valid_credential().await?;

    let profit_and_loss = qb
        .profit_and_loss(&credential, &month_start_ymd(), &today_ymd())
        .await?;
    let revenue_mtd = reports::extract_income_total(&profit_and_loss);

    let balance_sheet = qb.balance_sheet(&credential).await?;
    let operating_cash = reports::extract_bank_total(&balance_sheet);

    Ok(FinancialMetrics {
        operating_cash,
        tax_reserve: revenue_mtd * state.settings.tax_reserve_rate,
        revenue_mtd,
        synced_at: now_rfc3339(),
    })
}
