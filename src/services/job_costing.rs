use anyhow::Result;
use std::collections::BTreeMap;

use crate::db::Database;
use crate::models::{
    CategoryTotal, DealStage, Expense, JobCost, JobCostingReport, Lead, MonthTotal,
    OverheadSummary, Project,
};
use crate::utils::year_month;

/// Loads everything the rollup needs and builds the report. The arithmetic
/// itself lives in `build_report` so it can be tested without a database.
pub fn job_costing_report(db: &Database) -> Result<JobCostingReport> {
    let leads = db.get_leads_by_stage(DealStage::ClosedWon)?;
    let mut projects = Vec::new();
    for lead in &leads {
        if let Some(project) = db.get_project_by_lead(&lead.id)? {
            projects.push(project);
        }
    }
    let expenses = db.get_expenses()?;
    Ok(build_report(&leads, &projects, &expenses))
}

pub fn build_report(
    won_leads: &[Lead],
    projects: &[Project],
    expenses: &[Expense],
) -> JobCostingReport {
    let mut jobs = Vec::new();
    for lead in won_leads {
        let project = projects.iter().find(|p| p.lead_id == lead.id);
        let attributed: Vec<&Expense> = expenses
            .iter()
            .filter(|e| e.lead_id.as_deref() == Some(lead.id.as_str()))
            .collect();
        jobs.push(job_cost(lead, project, &attributed));
    }

    let overhead = overhead_summary(expenses);

    let total_revenue: f64 = jobs.iter().map(|j| j.actual_revenue).sum();
    let total_direct_costs: f64 = jobs.iter().map(|j| j.actual_costs).sum();
    let gross_profit = total_revenue - total_direct_costs;
    let net_profit = gross_profit - overhead.total;
    let average_job_margin = if jobs.is_empty() {
        0.0
    } else {
        jobs.iter().map(|j| j.actual_margin).sum::<f64>() / jobs.len() as f64
    };

    JobCostingReport {
        jobs,
        overhead,
        total_revenue,
        total_direct_costs,
        gross_profit,
        net_profit,
        average_job_margin,
    }
}

fn job_cost(lead: &Lead, project: Option<&Project>, attributed: &[&Expense]) -> JobCost {
    let actual_revenue = project.map(|p| p.quoted_price).unwrap_or(lead.value);
    let actual_costs: f64 = attributed.iter().map(|e| e.amount).sum();
    let actual_profit = actual_revenue - actual_costs;
    let actual_margin = if actual_revenue > 0.0 {
        actual_profit / actual_revenue * 100.0
    } else {
        0.0
    };

    // "No quoted margin" and "zero variance" must stay distinguishable, so
    // the variance only exists when a baseline was explicitly recorded.
    let quoted = project.and_then(|p| p.quoted_margin);
    let (quoted_margin, has_quoted_margin) = match quoted {
        Some(value) => (value, true),
        None => (0.0, false),
    };
    let (margin_variance, has_margin_variance) = if has_quoted_margin {
        (actual_margin - quoted_margin, true)
    } else {
        (0.0, false)
    };

    JobCost {
        lead_id: lead.id.clone(),
        client_name: lead.client_name.clone(),
        actual_revenue,
        actual_costs,
        actual_profit,
        actual_margin,
        quoted_margin,
        has_quoted_margin,
        margin_variance,
        has_margin_variance,
        costs_by_category: category_totals(attributed),
    }
}

fn overhead_summary(expenses: &[Expense]) -> OverheadSummary {
    let overhead: Vec<&Expense> = expenses.iter().filter(|e| e.lead_id.is_none()).collect();
    let total = overhead.iter().map(|e| e.amount).sum();

    let mut by_month: BTreeMap<String, f64> = BTreeMap::new();
    for expense in &overhead {
        let month = expense
            .expense_date
            .as_deref()
            .map(year_month)
            .unwrap_or_else(|| "unknown".to_string());
        *by_month.entry(month).or_insert(0.0) += expense.amount;
    }

    OverheadSummary {
        total,
        by_category: category_totals(&overhead),
        by_month: by_month
            .into_iter()
            .map(|(month, total)| MonthTotal { month, total })
            .collect(),
    }
}

fn category_totals(expenses: &[&Expense]) -> Vec<CategoryTotal> {
    let mut totals: BTreeMap<String, f64> = BTreeMap::new();
    for expense in expenses {
        *totals.entry(expense.category.clone()).or_insert(0.0) += expense.amount;
    }
    totals
        .into_iter()
        .map(|(category, total)| CategoryTotal { category, total })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn won_lead(id: &str, value: f64) -> Lead {
        Lead {
            id: id.to_string(),
            client_name: "Acme Corp".to_string(),
            deal_stage: DealStage::ClosedWon,
            probability: 100,
            value,
            qb_customer_id: None,
            qb_estimate_id: None,
            qb_invoice_id: None,
            source: "manual".to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    fn project(lead_id: &str, price: f64, margin: Option<f64>) -> Project {
        Project {
            id: format!("proj-{}", lead_id),
            lead_id: lead_id.to_string(),
            name: "Acme Corp".to_string(),
            quoted_price: price,
            quoted_margin: margin,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    fn expense(lead_id: Option<&str>, category: &str, amount: f64, date: &str) -> Expense {
        Expense {
            id: uuid::Uuid::new_v4().to_string(),
            external_id: uuid::Uuid::new_v4().to_string(),
            lead_id: lead_id.map(String::from),
            project_id: None,
            category: category.to_string(),
            amount,
            vendor_name: "Vendor".to_string(),
            is_billable: false,
            source: "quickbooks_purchase".to_string(),
            expense_date: Some(date.to_string()),
            synced_at: "2026-02-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn absent_quoted_margin_yields_no_variance_and_no_division_error() {
        let leads = vec![won_lead("l1", 10_000.0)];
        let projects = vec![project("l1", 10_000.0, None)];
        let expenses = vec![expense(Some("l1"), "Travel", 2000.0, "2026-01-10")];

        let report = build_report(&leads, &projects, &expenses);
        let job = &report.jobs[0];
        assert!(!job.has_quoted_margin);
        assert!(!job.has_margin_variance);
        assert_eq!(job.margin_variance, 0.0);
        assert_eq!(job.actual_margin, 80.0);
    }

    #[test]
    fn explicit_quoted_margin_produces_variance() {
        let leads = vec![won_lead("l1", 10_000.0)];
        let projects = vec![project("l1", 10_000.0, Some(70.0))];
        let expenses = vec![expense(Some("l1"), "Labor", 2000.0, "2026-01-10")];

        let report = build_report(&leads, &projects, &expenses);
        let job = &report.jobs[0];
        assert!(job.has_margin_variance);
        assert!((job.margin_variance - 10.0).abs() < 1e-9);
    }

    #[test]
    fn zero_revenue_job_reports_zero_margin() {
        let leads = vec![won_lead("l1", 0.0)];
        let report = build_report(&leads, &[], &[expense(Some("l1"), "Travel", 50.0, "2026-01-10")]);
        assert_eq!(report.jobs[0].actual_margin, 0.0);
    }

    #[test]
    fn project_price_overrides_lead_value_as_revenue() {
        let leads = vec![won_lead("l1", 8000.0)];
        let projects = vec![project("l1", 9500.0, None)];
        let report = build_report(&leads, &projects, &[]);
        assert_eq!(report.jobs[0].actual_revenue, 9500.0);
        assert_eq!(report.total_revenue, 9500.0);
    }

    #[test]
    fn unattributed_spend_rolls_up_as_monthly_overhead() {
        let expenses = vec![
            expense(None, "Software", 100.0, "2026-01-05"),
            expense(None, "Software", 50.0, "2026-01-20"),
            expense(None, "Insurance", 200.0, "2026-02-01"),
            expense(Some("l1"), "Travel", 400.0, "2026-02-01"),
        ];
        let report = build_report(&[], &[], &expenses);

        assert_eq!(report.overhead.total, 350.0);
        assert_eq!(report.overhead.by_month.len(), 2);
        assert_eq!(report.overhead.by_month[0].month, "2026-01");
        assert_eq!(report.overhead.by_month[0].total, 150.0);
        assert_eq!(report.overhead.by_month[1].month, "2026-02");
        assert_eq!(report.overhead.by_month[1].total, 200.0);

        let software = report
            .overhead
            .by_category
            .iter()
            .find(|c| c.category == "Software")
            .expect("software bucket");
        assert_eq!(software.total, 150.0);
    }

    #[test]
    fn net_profit_subtracts_overhead_and_average_margin_is_unweighted() {
        let leads = vec![won_lead("l1", 10_000.0), won_lead("l2", 1000.0)];
        let expenses = vec![
            expense(Some("l1"), "Labor", 5000.0, "2026-01-10"),
            expense(Some("l2"), "Travel", 250.0, "2026-01-12"),
            expense(None, "Software", 100.0, "2026-01-15"),
        ];
        let report = build_report(&leads, &[], &expenses);

        assert_eq!(report.total_revenue, 11_000.0);
        assert_eq!(report.total_direct_costs, 5250.0);
        assert_eq!(report.gross_profit, 5750.0);
        assert_eq!(report.net_profit, 5650.0);
        // (50% + 75%) / 2, not weighted by revenue.
        assert!((report.average_job_margin - 62.5).abs() < 1e-9);
    }
}
