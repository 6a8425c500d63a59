use crate::errors::SyncResult;
use crate::models::SyncOutcome;
use crate::services::state::AppState;
use crate::services::stages;

/// Mirrors purchases and bills into local expenses. Per-record failures are
/// carried in the outcome, not raised.
pub async fn sync_expenses(state: &AppState) -> SyncResult<SyncOutcome> {
    let engine = state.sync_engine()?;
    let purchases = engine.sync_purchases().await?;
    let bills = engine.sync_bills().await?;
    let outcome = purchases.merge(bills);
    tracing::info!(
        synced = outcome.synced,
        errors = outcome.errors.len(),
        "expense sync finished"
    );
    Ok(outcome)
}

/// Reconciles invoices and estimates against leads.
pub async fn sync_sales(state: &AppState) -> SyncResult<SyncOutcome> {
    let engine = state.sync_engine()?;
    let invoices = engine.sync_invoices().await?;
    let estimates = engine.sync_estimates().await?;
    let outcome = invoices.merge(estimates);
    tracing::info!(
        synced = outcome.synced,
        errors = outcome.errors.len(),
        "sales sync finished"
    );
    Ok(outcome)
}

/// Re-derives deal stages from current external estimate statuses.
pub async fn resync_stages(state: &AppState) -> SyncResult<SyncOutcome> {
    let tokens = state.token_manager()?;
    let qb = state.quickbooks()?;
    let outcome = stages::resync_statuses(&state.db, &tokens, &qb).await?;
    tracing::info!(
        synced = outcome.synced,
        errors = outcome.errors.len(),
        "stage resync finished"
    );
    Ok(outcome)
}
