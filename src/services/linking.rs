use anyhow::Result;
use std::cmp::Ordering;

use crate::db::Database;
use crate::models::{DealStage, Lead};
use crate::services::stages;
use crate::utils::now_rfc3339;

/// Relative value tolerance for matching a sales document to a lead.
const VALUE_TOLERANCE: f64 = 0.30;

/// Which external document field a reconciliation tracks on the lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SalesDocKind {
    Invoice,
    Estimate,
}

/// A sales document reduced to the fields reconciliation needs.
#[derive(Debug, Clone)]
pub struct SalesDoc {
    pub external_id: String,
    pub amount: f64,
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
}

/// Candidate ordering used everywhere a single lead must be chosen from
/// several: Closed-Won outranks everything, then most recently created, then
/// id as a final deterministic tie-break. Financial attribution must never
/// depend on storage return order.
pub fn compare_candidates(a: &Lead, b: &Lead) -> Ordering {
    let a_won = a.deal_stage == DealStage::ClosedWon;
    let b_won = b.deal_stage == DealStage::ClosedWon;
    b_won
        .cmp(&a_won)
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| b.id.cmp(&a.id))
}

pub fn pick_candidate(mut leads: Vec<Lead>) -> Option<Lead> {
    leads.sort_by(compare_candidates);
    leads.into_iter().next()
}

/// Tolerance test: `|lead.value - amount| / max(lead.value, amount, 1)`.
pub fn within_tolerance(lead_value: f64, amount: f64) -> bool {
    let base = lead_value.max(amount).max(1.0);
    ((lead_value - amount).abs() / base) <= VALUE_TOLERANCE
}

/// Resolves a mirrored expense document to at most one lead (and its
/// project). No match means the spend is overhead.
pub fn auto_link(
    db: &Database,
    qb_customer_id: &str,
) -> Result<Option<(String, Option<String>)>> {
    let candidates = db.get_leads_by_customer(qb_customer_id)?;
    let lead = match pick_candidate(candidates) {
        Some(lead) => lead,
        None => return Ok(None),
    };
    let project_id = db.get_project_by_lead(&lead.id)?.map(|p| p.id);
    Ok(Some((lead.id, project_id)))
}

/// Reconciles an invoice or estimate to exactly one lead, creating one when
/// nothing matches. Idempotent on the external document id: a lead already
/// tracking this document is updated in place.
pub fn reconcile_sales_doc(
    db: &Database,
    doc: &SalesDoc,
    kind: SalesDocKind,
    target_stage: DealStage,
) -> Result<String> {
    let tracked = match kind {
        SalesDocKind::Invoice => db.get_lead_by_invoice(&doc.external_id)?,
        SalesDocKind::Estimate => db.get_lead_by_estimate(&doc.external_id)?,
    };
    if let Some(lead) = tracked {
        return update_matched_lead(db, lead, doc, kind, target_stage);
    }

    let mut candidates = Vec::new();
    if let Some(customer_id) = doc.customer_id.as_deref() {
        candidates = eligible(db.get_leads_by_customer(customer_id)?, doc.amount);
    }
    if candidates.is_empty() {
        if let Some(name) = doc.customer_name.as_deref() {
            candidates = eligible(db.get_leads_by_client_name(name)?, doc.amount);
        }
    }

    match pick_candidate(candidates) {
        Some(lead) => update_matched_lead(db, lead, doc, kind, target_stage),
        None => create_imported_lead(db, doc, kind, target_stage),
    }
}

fn eligible(leads: Vec<Lead>, amount: f64) -> Vec<Lead> {
    leads
        .into_iter()
        .filter(|lead| lead.deal_stage != DealStage::ClosedWon)
        .filter(|lead| within_tolerance(lead.value, amount))
        .collect()
}

fn update_matched_lead(
    db: &Database,
    mut lead: Lead,
    doc: &SalesDoc,
    kind: SalesDocKind,
    target_stage: DealStage,
) -> Result<String> {
    lead.value = doc.amount;
    match kind {
        SalesDocKind::Invoice => lead.qb_invoice_id = Some(doc.external_id.clone()),
        SalesDocKind::Estimate => lead.qb_estimate_id = Some(doc.external_id.clone()),
    }
    if lead.qb_customer_id.is_none() {
        lead.qb_customer_id = doc.customer_id.clone();
    }
    lead.updated_at = now_rfc3339();
    // Full-row update keeps the stored stage; the stage itself only moves
    // through the conditional advance so it can never regress.
    db.update_lead(&lead)?;
    db.advance_lead_stage(
        &lead.id,
        target_stage,
        stages::stage_probability(target_stage),
        &now_rfc3339(),
    )?;
    Ok(lead.id)
}

fn create_imported_lead(
    db: &Database,
    doc: &SalesDoc,
    kind: SalesDocKind,
    target_stage: DealStage,
) -> Result<String> {
    let now = now_rfc3339();
    let lead = Lead {
        id: uuid::Uuid::new_v4().to_string(),
        client_name: doc
            .customer_name
            .clone()
            .unwrap_or_else(|| "Unknown client".to_string()),
        deal_stage: target_stage,
        probability: stages::stage_probability(target_stage),
        value: doc.amount,
        qb_customer_id: doc.customer_id.clone(),
        qb_estimate_id: match kind {
            SalesDocKind::Estimate => Some(doc.external_id.clone()),
            SalesDocKind::Invoice => None,
        },
        qb_invoice_id: match kind {
            SalesDocKind::Invoice => Some(doc.external_id.clone()),
            SalesDocKind::Estimate => None,
        },
        source: "quickbooks_import".to_string(),
        created_at: now.clone(),
        updated_at: now,
    };
    db.insert_lead(&lead)?;
    Ok(lead.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::DealStage;

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(dir.path().join("test.sqlite")).expect("db");
        (dir, db)
    }

    fn lead(id: &str, stage: DealStage, created_at: &str) -> Lead {
        Lead {
            id: id.to_string(),
            client_name: "Acme Corp".to_string(),
            deal_stage: stage,
            probability: 50,
            value: 5200.0,
            qb_customer_id: Some("C1".to_string()),
            qb_estimate_id: None,
            qb_invoice_id: None,
            source: "manual".to_string(),
            created_at: created_at.to_string(),
            updated_at: created_at.to_string(),
        }
    }

    #[test]
    fn closed_won_outranks_newer_leads_in_any_order() {
        let won = lead("won", DealStage::ClosedWon, "2026-01-01T00:00:00Z");
        let open = lead("open", DealStage::Proposal, "2026-06-01T00:00:00Z");

        let picked = pick_candidate(vec![open.clone(), won.clone()]).expect("pick");
        assert_eq!(picked.id, "won");
        let picked = pick_candidate(vec![won, open]).expect("pick");
        assert_eq!(picked.id, "won");
    }

    #[test]
    fn most_recent_wins_among_equal_stages() {
        let older = lead("older", DealStage::Proposal, "2026-01-01T00:00:00Z");
        let newer = lead("newer", DealStage::Proposal, "2026-03-01T00:00:00Z");
        let picked = pick_candidate(vec![older, newer]).expect("pick");
        assert_eq!(picked.id, "newer");
    }

    #[test]
    fn tolerance_accepts_small_relative_differences() {
        assert!(within_tolerance(5200.0, 5000.0));
        assert!(!within_tolerance(10_000.0, 5000.0));
        // Zero-valued leads compare against the 1.0 floor, not zero.
        assert!(within_tolerance(0.0, 0.2));
    }

    #[test]
    fn invoice_updates_matching_lead_without_duplicating() {
        let (_dir, db) = test_db();
        let mut proposal = lead("l1", DealStage::Proposal, "2026-01-01T00:00:00Z");
        proposal.value = 5200.0;
        db.insert_lead(&proposal).expect("lead");

        let doc = SalesDoc {
            external_id: "77".to_string(),
            amount: 5000.0,
            customer_id: Some("C1".to_string()),
            customer_name: Some("Acme Corp".to_string()),
        };
        let lead_id =
            reconcile_sales_doc(&db, &doc, SalesDocKind::Invoice, DealStage::ClosedWon)
                .expect("reconcile");
        assert_eq!(lead_id, "l1");

        let updated = db.get_lead_by_id("l1").expect("get").expect("exists");
        assert_eq!(updated.deal_stage, DealStage::ClosedWon);
        assert_eq!(updated.value, 5000.0);
        assert_eq!(updated.qb_invoice_id.as_deref(), Some("77"));
        assert_eq!(db.get_leads_by_customer("C1").expect("query").len(), 1);
    }

    #[test]
    fn unmatched_invoice_creates_imported_closed_won_lead() {
        let (_dir, db) = test_db();
        let doc = SalesDoc {
            external_id: "88".to_string(),
            amount: 750.0,
            customer_id: Some("C9".to_string()),
            customer_name: Some("New Client".to_string()),
        };
        let lead_id =
            reconcile_sales_doc(&db, &doc, SalesDocKind::Invoice, DealStage::ClosedWon)
                .expect("reconcile");

        let created = db.get_lead_by_id(&lead_id).expect("get").expect("exists");
        assert_eq!(created.deal_stage, DealStage::ClosedWon);
        assert_eq!(created.source, "quickbooks_import");
        assert_eq!(created.qb_invoice_id.as_deref(), Some("88"));
    }

    #[test]
    fn reconcile_is_idempotent_on_external_document_id() {
        let (_dir, db) = test_db();
        let doc = SalesDoc {
            external_id: "77".to_string(),
            amount: 5000.0,
            customer_id: Some("C1".to_string()),
            customer_name: Some("Acme Corp".to_string()),
        };
        let first = reconcile_sales_doc(&db, &doc, SalesDocKind::Invoice, DealStage::ClosedWon)
            .expect("first");
        let second = reconcile_sales_doc(&db, &doc, SalesDocKind::Invoice, DealStage::ClosedWon)
            .expect("second");
        assert_eq!(first, second);
        assert_eq!(db.get_leads_by_customer("C1").expect("query").len(), 1);
    }

    #[test]
    fn closed_won_leads_are_not_reconciliation_candidates() {
        let (_dir, db) = test_db();
        db.insert_lead(&lead("won", DealStage::ClosedWon, "2026-01-01T00:00:00Z"))
            .expect("lead");

        let doc = SalesDoc {
            external_id: "99".to_string(),
            amount: 5200.0,
            customer_id: Some("C1".to_string()),
            customer_name: Some("Acme Corp".to_string()),
        };
        let lead_id =
            reconcile_sales_doc(&db, &doc, SalesDocKind::Invoice, DealStage::ClosedWon)
                .expect("reconcile");
        assert_ne!(lead_id, "won");
    }
}
