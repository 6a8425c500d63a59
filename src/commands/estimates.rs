use anyhow::Context;
use std::path::Path;

use crate::errors::{SyncError, SyncResult};
use crate::models::QuoteLineItem;
use crate::services::state::AppState;

/// Pushes a quote (line items read from a JSON file) outward as a
/// QuickBooks estimate. Returns the external estimate id.
pub async fn push_estimate(
    state: &AppState,
    lead_id: &str,
    lines_path: &Path,
) -> SyncResult<String> {
    let raw = std::fs::read_to_string(lines_path)
        .with_context(|| format!("reading {}", lines_path.display()))
        .map_err(SyncError::Internal)?;
    let line_items: Vec<QuoteLineItem> = serde_json::from_str(&raw)
        .map_err(|e| SyncError::Validation(format!("line items file: {}", e)))?;

    let builder = state.estimate_builder()?;
    let estimate = builder.create_estimate_from_quote(lead_id, &line_items).await?;
    Ok(estimate.id)
}

/// Fetches the rendered PDF for an estimate and writes it to disk.
pub async fn download_estimate_pdf(
    state: &AppState,
    estimate_id: &str,
    out_path: &Path,
) -> SyncResult<()> {
    let builder = state.estimate_builder()?;
    let bytes = builder.estimate_pdf(estimate_id).await?;
    std::fs::write(out_path, bytes)
        .with_context(|| format!("writing {}", out_path.display()))
        .map_err(SyncError::Internal)?;
    Ok(())
}
