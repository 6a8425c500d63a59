use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::db::Database;
use crate::errors::SyncResult;
use crate::models::{DealStage, Project, SyncOutcome};
use crate::services::quickbooks::{Estimate, QuickBooks};
use crate::services::tokens::TokenManager;
use crate::utils::{default_window, now_rfc3339};

pub fn stage_probability(stage: DealStage) -> i64 {
    match stage {
        DealStage::ClosedWon => 100,
        DealStage::ClosedLost => 0,
        DealStage::Negotiation => 75,
        DealStage::Proposal => 50,
        DealStage::Contacted => 25,
        _ => 10,
    }
}

/// Maps an external estimate to the lead stage it implies. A downstream
/// linked invoice means the deal was won regardless of the estimate status.
pub fn stage_for_estimate(estimate: &Estimate) -> DealStage {
    let converted = estimate
        .linked_txn
        .iter()
        .any(|txn| txn.txn_type.as_deref() == Some("Invoice"));
    if converted {
        return DealStage::ClosedWon;
    }
    match estimate.txn_status.as_deref() {
        Some("Accepted") => DealStage::ClosedWon,
        Some("Rejected") | Some("Closed") => DealStage::ClosedLost,
        _ => DealStage::Proposal,
    }
}

/// Re-derives the stage of every lead that tracks an external estimate and
/// advances it where the target outranks the current stage. Regressions are
/// rejected inside the conditional UPDATE, so a stale fetch cannot move a
/// lead backwards.
pub async fn resync_statuses(
    db: &Arc<Mutex<Database>>,
    tokens: &TokenManager,
    qb: &QuickBooks,
) -> SyncResult<SyncOutcome> {
    let credential = tokens.get_valid_credential().await?;
    let (start, end) = default_window(365);
    let statement = QuickBooks::select_statement(
        "Estimate",
        Some(&format!("TxnDate >= '{}' AND TxnDate <= '{}'", start, end)),
    );
    let estimates: Vec<Estimate> = qb.query(&credential, "Estimate", &statement).await?;
    let by_id: HashMap<String, Estimate> = estimates
        .into_iter()
        .map(|e| (e.id.clone(), e))
        .collect();

    let db = db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
    Ok(apply_status_resync(&db, &by_id))
}

pub fn apply_status_resync(db: &Database, estimates: &HashMap<String, Estimate>) -> SyncOutcome {
    let leads = match db.get_leads_with_estimates() {
        Ok(leads) => leads,
        Err(err) => {
            return SyncOutcome {
                synced: 0,
                errors: vec![format!("loading tracked leads: {}", err)],
            }
        }
    };

    let mut synced = 0;
    let mut errors = Vec::new();
    for lead in leads {
        let estimate_id = match lead.qb_estimate_id.as_deref() {
            Some(id) => id,
            None => continue,
        };
        let estimate = match estimates.get(estimate_id) {
            Some(estimate) => estimate,
            None => continue,
        };
        let target = stage_for_estimate(estimate);
        let result = db
            .advance_lead_stage(&lead.id, target, stage_probability(target), &now_rfc3339())
            .map_err(anyhow::Error::from)
            .and_then(|moved| {
                if moved && target == DealStage::ClosedWon {
                    ensure_project_for_lead(db, &lead.id)?;
                }
                Ok(moved)
            });
        match result {
            Ok(true) => synced += 1,
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(lead_id = %lead.id, error = %err, "stage resync failed");
                errors.push(format!("lead {}: {}", lead.id, err));
            }
        }
    }

    SyncOutcome { synced, errors }
}

/// Creates the delivery project for a won lead exactly once, snapshotting
/// the latest quote at creation time.
pub fn ensure_project_for_lead(db: &Database, lead_id: &str) -> Result<Project> {
    if let Some(existing) = db.get_project_by_lead(lead_id)? {
        return Ok(existing);
    }
    let lead = db
        .get_lead_by_id(lead_id)?
        .ok_or_else(|| anyhow!("lead {} not found", lead_id))?;
    let quote = db.latest_quote_for_lead(lead_id)?;

    let project = Project {
        id: uuid::Uuid::new_v4().to_string(),
        lead_id: lead_id.to_string(),
        name: lead.client_name.clone(),
        quoted_price: quote.as_ref().map(|q| q.total).unwrap_or(lead.value),
        quoted_margin: quote.and_then(|q| q.margin_percent),
        created_at: now_rfc3339(),
    };
    db.insert_project(&project)?;
    Ok(project)
}
