use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a sales opportunity. The declaration order is the stage
/// order; automated transitions only ever move to a higher rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealStage {
    Lead,
    Contacted,
    Proposal,
    Negotiation,
    OnHold,
    ClosedWon,
    ClosedLost,
}

impl DealStage {
    pub fn rank(self) -> i64 {
        match self {
            DealStage::Lead => 0,
            DealStage::Contacted => 1,
            DealStage::Proposal => 2,
            DealStage::Negotiation => 3,
            DealStage::OnHold => 4,
            DealStage::ClosedWon => 5,
            DealStage::ClosedLost => 6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DealStage::Lead => "lead",
            DealStage::Contacted => "contacted",
            DealStage::Proposal => "proposal",
            DealStage::Negotiation => "negotiation",
            DealStage::OnHold => "on_hold",
            DealStage::ClosedWon => "closed_won",
            DealStage::ClosedLost => "closed_lost",
        }
    }

    /// Stored values are produced by `as_str`; anything else (hand-edited
    /// rows, older schemas) falls back to the lowest stage.
    pub fn from_db(value: &str) -> Self {
        match value {
            "contacted" => DealStage::Contacted,
            "proposal" => DealStage::Proposal,
            "negotiation" => DealStage::Negotiation,
            "on_hold" => DealStage::OnHold,
            "closed_won" => DealStage::ClosedWon,
            "closed_lost" => DealStage::ClosedLost,
            _ => DealStage::Lead,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: String,
    pub client_name: String,
    pub deal_stage: DealStage,
    pub probability: i64,
    pub value: f64,
    pub qb_customer_id: Option<String>,
    pub qb_estimate_id: Option<String>,
    pub qb_invoice_id: Option<String>,
    pub source: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub lead_id: String,
    pub name: String,
    pub quoted_price: f64,
    pub quoted_margin: Option<f64>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub id: String,
    pub lead_id: String,
    pub total: f64,
    pub margin_percent: Option<f64>,
    pub created_at: String,
}

/// One line of a quote, pushed outward as a QuickBooks estimate line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteLineItem {
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub product_code: Option<String>,
    pub discipline: Option<String>,
}

/// Local mirror of an external financial document. `external_id` is
/// namespaced per source document type so the two external id spaces cannot
/// collide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expense {
    pub id: String,
    pub external_id: String,
    pub lead_id: Option<String>,
    pub project_id: Option<String>,
    pub category: String,
    pub amount: f64,
    pub vendor_name: String,
    pub is_billable: bool,
    pub source: String,
    pub expense_date: Option<String>,
    pub synced_at: String,
}

/// The single OAuth credential for the connected realm. Tokens are stored
/// encrypted; this struct carries them decrypted in memory only.
#[derive(Debug, Clone)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub realm_id: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub synced: usize,
    pub errors: Vec<String>,
}

impl SyncOutcome {
    pub fn merge(mut self, other: SyncOutcome) -> SyncOutcome {
        self.synced += other.synced;
        self.errors.extend(other.errors);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobCost {
    pub lead_id: String,
    pub client_name: String,
    pub actual_revenue: f64,
    pub actual_costs: f64,
    pub actual_profit: f64,
    pub actual_margin: f64,
    pub quoted_margin: f64,
    pub has_quoted_margin: bool,
    pub margin_variance: f64,
    pub has_margin_variance: bool,
    pub costs_by_category: Vec<CategoryTotal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryTotal {
    pub category: String,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthTotal {
    pub month: String,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverheadSummary {
    pub total: f64,
    pub by_category: Vec<CategoryTotal>,
    pub by_month: Vec<MonthTotal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobCostingReport {
    pub jobs: Vec<JobCost>,
    pub overhead: OverheadSummary,
    pub total_revenue: f64,
    pub total_direct_costs: f64,
    pub gross_profit: f64,
    pub net_profit: f64,
    pub average_job_margin: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinancialMetrics {
    pub operating_cash: f64,
    pub tax_reserve: f64,
    pub revenue_mtd: f64,
    pub synced_at: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub environment: String,
    pub tax_reserve_rate: f64,
}
