use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::PathBuf;

use crate::models::{Credential, DealStage, Expense, Lead, Project, Quote};

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn new(db_path: PathBuf) -> SqlResult<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let mut db = Database { conn };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&mut self) -> SqlResult<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL
            );",
        )?;

        let migrations = vec![
            (
                "001_create_leads_and_projects.sql",
                include_str!(concat!(
                    env!("CARGO_MANIFEST_DIR"),
                    "/migrations/001_create_leads_and_projects.sql"
                )),
            ),
            (
                "002_create_expenses.sql",
                include_str!(concat!(
                    env!("CARGO_MANIFEST_DIR"),
                    "/migrations/002_create_expenses.sql"
                )),
            ),
            (
                "003_create_credentials_and_settings.sql",
                include_str!(concat!(
                    env!("CARGO_MANIFEST_DIR"),
                    "/migrations/003_create_credentials_and_settings.sql"
                )),
            ),
        ];

        for (name, sql) in migrations {
            let applied: Option<String> = self
                .conn
                .query_row(
                    "SELECT name FROM schema_migrations WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;

            if applied.is_none() {
                let tx = self.conn.transaction()?;
                tx.execute_batch(sql)?;
                tx.execute(
                    "INSERT INTO schema_migrations (name, applied_at) VALUES (?1, datetime('now'))",
                    params![name],
                )?;
                tx.commit()?;
            }
        }

        Ok(())
    }

    // --- leads ---

    pub fn insert_lead(&self, lead: &Lead) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO leads (
                id, client_name, deal_stage, probability, value, qb_customer_id,
                qb_estimate_id, qb_invoice_id, source, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                lead.id,
                lead.client_name,
                lead.deal_stage.as_str(),
                lead.probability,
                lead.value,
                lead.qb_customer_id,
                lead.qb_estimate_id,
                lead.qb_invoice_id,
                lead.source,
                lead.created_at,
                lead.updated_at
            ],
        )?;
        Ok(())
    }

    pub fn update_lead(&self, lead: &Lead) -> SqlResult<()> {
        self.conn.execute(
            "UPDATE leads SET
                client_name = ?2, deal_stage = ?3, probability = ?4, value = ?5,
                qb_customer_id = ?6, qb_estimate_id = ?7, qb_invoice_id = ?8,
                source = ?9, updated_at = ?10
             WHERE id = ?1",
            params![
                lead.id,
                lead.client_name,
                lead.deal_stage.as_str(),
                lead.probability,
                lead.value,
                lead.qb_customer_id,
                lead.qb_estimate_id,
                lead.qb_invoice_id,
                lead.source,
                lead.updated_at
            ],
        )?;
        Ok(())
    }

    /// Conditional stage advance. The rank comparison happens inside the
    /// UPDATE so two racing resyncs cannot regress a lead between a read and
    /// a write. Returns true when the row actually moved.
    pub fn advance_lead_stage(
        &self,
        lead_id: &str,
        target: DealStage,
        probability: i64,
        updated_at: &str,
    ) -> SqlResult<bool> {
        let changed = self.conn.execute(
            "UPDATE leads SET deal_stage = ?1, probability = ?2, updated_at = ?3
             WHERE id = ?4
               AND (CASE deal_stage
                        WHEN 'lead' THEN 0
                        WHEN 'contacted' THEN 1
                        WHEN 'proposal' THEN 2
                        WHEN 'negotiation' THEN 3
                        WHEN 'on_hold' THEN 4
                        WHEN 'closed_won' THEN 5
                        WHEN 'closed_lost' THEN 6
                        ELSE 0
                    END) < ?5",
            params![
                target.as_str(),
                probability,
                updated_at,
                lead_id,
                target.rank()
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn get_lead_by_id(&self, id: &str) -> SqlResult<Option<Lead>> {
        let mut stmt = self.conn.prepare(&lead_select("id = ?1"))?;
        stmt.query_row(params![id], lead_from_row).optional()
    }

    pub fn get_leads_by_customer(&self, qb_customer_id: &str) -> SqlResult<Vec<Lead>> {
        let mut stmt = self.conn.prepare(&lead_select("qb_customer_id = ?1"))?;
        let rows = stmt.query_map(params![qb_customer_id], lead_from_row)?;
        rows.collect()
    }

    pub fn get_leads_by_client_name(&self, client_name: &str) -> SqlResult<Vec<Lead>> {
        let mut stmt = self.conn.prepare(&lead_select("client_name = ?1"))?;
        let rows = stmt.query_map(params![client_name], lead_from_row)?;
        rows.collect()
    }

    pub fn get_lead_by_invoice(&self, qb_invoice_id: &str) -> SqlResult<Option<Lead>> {
        let mut stmt = self.conn.prepare(&lead_select("qb_invoice_id = ?1"))?;
        stmt.query_row(params![qb_invoice_id], lead_from_row)
            .optional()
    }

    pub fn get_lead_by_estimate(&self, qb_estimate_id: &str) -> SqlResult<Option<Lead>> {
        let mut stmt = self.conn.prepare(&lead_select("qb_estimate_id = ?1"))?;
        stmt.query_row(params![qb_estimate_id], lead_from_row)
            .optional()
    }

    pub fn get_leads_with_estimates(&self) -> SqlResult<Vec<Lead>> {
        let mut stmt = self
            .conn
            .prepare(&lead_select("qb_estimate_id IS NOT NULL"))?;
        let rows = stmt.query_map([], lead_from_row)?;
        rows.collect()
    }

    pub fn get_leads_by_stage(&self, stage: DealStage) -> SqlResult<Vec<Lead>> {
        let mut stmt = self.conn.prepare(&lead_select("deal_stage = ?1"))?;
        let rows = stmt.query_map(params![stage.as_str()], lead_from_row)?;
        rows.collect()
    }

    // --- projects ---

    pub fn insert_project(&self, project: &Project) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO projects (id, lead_id, name, quoted_price, quoted_margin, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                project.id,
                project.lead_id,
                project.name,
                project.quoted_price,
                project.quoted_margin,
                project.created_at
            ],
        )?;
        Ok(())
    }

    pub fn get_project_by_lead(&self, lead_id: &str) -> SqlResult<Option<Project>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, lead_id, name, quoted_price, quoted_margin, created_at
             FROM projects WHERE lead_id = ?1",
        )?;
        stmt.query_row(params![lead_id], |row| {
            Ok(Project {
                id: row.get(0)?,
                lead_id: row.get(1)?,
                name: row.get(2)?,
                quoted_price: row.get(3)?,
                quoted_margin: row.get(4)?,
                created_at: row.get(5)?,
            })
        })
        .optional()
    }

    // --- quotes ---

    pub fn insert_quote(&self, quote: &Quote) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO quotes (id, lead_id, total, margin_percent, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                quote.id,
                quote.lead_id,
                quote.total,
                quote.margin_percent,
                quote.created_at
            ],
        )?;
        Ok(())
    }

    pub fn latest_quote_for_lead(&self, lead_id: &str) -> SqlResult<Option<Quote>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, lead_id, total, margin_percent, created_at
             FROM quotes WHERE lead_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT 1",
        )?;
        stmt.query_row(params![lead_id], |row| {
            Ok(Quote {
                id: row.get(0)?,
                lead_id: row.get(1)?,
                total: row.get(2)?,
                margin_percent: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()
    }

    // --- expenses ---

    pub fn insert_expense(&self, expense: &Expense) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO expenses (
                id, external_id, lead_id, project_id, category, amount,
                vendor_name, is_billable, source, expense_date, synced_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                expense.id,
                expense.external_id,
                expense.lead_id,
                expense.project_id,
                expense.category,
                expense.amount,
                expense.vendor_name,
                expense.is_billable,
                expense.source,
                expense.expense_date,
                expense.synced_at
            ],
        )?;
        Ok(())
    }

    pub fn update_expense(&self, expense: &Expense) -> SqlResult<()> {
        self.conn.execute(
            "UPDATE expenses SET
                lead_id = ?2, project_id = ?3, category = ?4, amount = ?5,
                vendor_name = ?6, is_billable = ?7, source = ?8,
                expense_date = ?9, synced_at = ?10
             WHERE external_id = ?1",
            params![
                expense.external_id,
                expense.lead_id,
                expense.project_id,
                expense.category,
                expense.amount,
                expense.vendor_name,
                expense.is_billable,
                expense.source,
                expense.expense_date,
                expense.synced_at
            ],
        )?;
        Ok(())
    }

    pub fn get_expense_by_external_id(&self, external_id: &str) -> SqlResult<Option<Expense>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, external_id, lead_id, project_id, category, amount,
                    vendor_name, is_billable, source, expense_date, synced_at
             FROM expenses WHERE external_id = ?1",
        )?;
        stmt.query_row(params![external_id], expense_from_row)
            .optional()
    }

    pub fn get_expenses(&self) -> SqlResult<Vec<Expense>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, external_id, lead_id, project_id, category, amount,
                    vendor_name, is_billable, source, expense_date, synced_at
             FROM expenses ORDER BY expense_date DESC",
        )?;
        let rows = stmt.query_map([], expense_from_row)?;
        rows.collect()
    }

    pub fn count_expenses(&self) -> SqlResult<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM expenses", [], |row| row.get(0))
    }

    // --- credential ---

    /// Single-row table; a save replaces whatever credential was there.
    pub fn save_credential(&self, credential: &Credential, updated_at: &str) -> SqlResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO qb_credentials (
                id, access_token, refresh_token, realm_id,
                expires_at, refresh_expires_at, updated_at
            ) VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                credential.access_token,
                credential.refresh_token,
                credential.realm_id,
                credential.expires_at.to_rfc3339(),
                credential.refresh_expires_at.to_rfc3339(),
                updated_at
            ],
        )?;
        Ok(())
    }

    pub fn get_credential(&self) -> SqlResult<Option<Credential>> {
        let mut stmt = self.conn.prepare(
            "SELECT access_token, refresh_token, realm_id, expires_at, refresh_expires_at
             FROM qb_credentials WHERE id = 1",
        )?;
        stmt.query_row([], |row| {
            Ok(Credential {
                access_token: row.get(0)?,
                refresh_token: row.get(1)?,
                realm_id: row.get(2)?,
                expires_at: parse_timestamp(row, 3)?,
                refresh_expires_at: parse_timestamp(row, 4)?,
            })
        })
        .optional()
    }

    pub fn delete_credential(&self) -> SqlResult<()> {
        self.conn
            .execute("DELETE FROM qb_credentials WHERE id = 1", [])?;
        Ok(())
    }

    // --- settings ---

    pub fn set_setting(&self, key: &str, value: &str) -> SqlResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?1, ?2, datetime('now'))",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> SqlResult<Option<String>> {
        let mut stmt = self.conn.prepare("SELECT value FROM settings WHERE key = ?1")?;
        stmt.query_row(params![key], |row| row.get(0)).optional()
    }
}

fn lead_select(filter: &str) -> String {
    format!(
        "SELECT id, client_name, deal_stage, probability, value, qb_customer_id,
                qb_estimate_id, qb_invoice_id, source, created_at, updated_at
         FROM leads WHERE {}",
        filter
    )
}

fn lead_from_row(row: &Row<'_>) -> SqlResult<Lead> {
    let stage: String = row.get(2)?;
    Ok(Lead {
        id: row.get(0)?,
        client_name: row.get(1)?,
        deal_stage: DealStage::from_db(&stage),
        probability: row.get(3)?,
        value: row.get(4)?,
        qb_customer_id: row.get(5)?,
        qb_estimate_id: row.get(6)?,
        qb_invoice_id: row.get(7)?,
        source: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn expense_from_row(row: &Row<'_>) -> SqlResult<Expense> {
    Ok(Expense {
        id: row.get(0)?,
        external_id: row.get(1)?,
        lead_id: row.get(2)?,
        project_id: row.get(3)?,
        category: row.get(4)?,
        amount: row.get(5)?,
        vendor_name: row.get(6)?,
        is_billable: row.get(7)?,
        source: row.get(8)?,
        expense_date: row.get(9)?,
        synced_at: row.get(10)?,
    })
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> SqlResult<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::Database;
    use crate::models::{Credential, DealStage, Expense, Lead};
    use chrono::{Duration, Utc};

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(dir.path().join("test.sqlite")).expect("db");
        (dir, db)
    }

    fn sample_lead(id: &str, stage: DealStage) -> Lead {
        Lead {
            id: id.to_string(),
            client_name: "Acme Corp".to_string(),
            deal_stage: stage,
            probability: 50,
            value: 1000.0,
            qb_customer_id: Some("C1".to_string()),
            qb_estimate_id: None,
            qb_invoice_id: None,
            source: "manual".to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    fn sample_expense(external_id: &str, source: &str) -> Expense {
        Expense {
            id: uuid::Uuid::new_v4().to_string(),
            external_id: external_id.to_string(),
            lead_id: None,
            project_id: None,
            category: "Travel".to_string(),
            amount: 42.5,
            vendor_name: "Delta".to_string(),
            is_billable: false,
            source: source.to_string(),
            expense_date: Some("2026-02-03".to_string()),
            synced_at: "2026-02-04T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn expense_external_ids_are_unique() {
        let (_dir, db) = test_db();
        db.insert_expense(&sample_expense("123", "quickbooks_purchase"))
            .expect("insert");
        let dup = db.insert_expense(&sample_expense("123", "quickbooks_purchase"));
        assert!(dup.is_err());
    }

    #[test]
    fn purchase_and_bill_ids_live_in_separate_namespaces() {
        let (_dir, db) = test_db();
        db.insert_expense(&sample_expense("55", "quickbooks_purchase"))
            .expect("purchase");
        db.insert_expense(&sample_expense("BILL-55", "quickbooks_bill"))
            .expect("bill");
        assert_eq!(db.count_expenses().expect("count"), 2);
    }

    #[test]
    fn advance_lead_stage_never_regresses() {
        let (_dir, db) = test_db();
        db.insert_lead(&sample_lead("l1", DealStage::ClosedWon))
            .expect("insert");

        let moved = db
            .advance_lead_stage("l1", DealStage::Proposal, 50, "2026-01-02T00:00:00Z")
            .expect("update");
        assert!(!moved);
        let lead = db.get_lead_by_id("l1").expect("get").expect("exists");
        assert_eq!(lead.deal_stage, DealStage::ClosedWon);
    }

    #[test]
    fn advance_lead_stage_moves_forward() {
        let (_dir, db) = test_db();
        db.insert_lead(&sample_lead("l1", DealStage::Proposal))
            .expect("insert");

        let moved = db
            .advance_lead_stage("l1", DealStage::ClosedWon, 100, "2026-01-02T00:00:00Z")
            .expect("update");
        assert!(moved);
        let lead = db.get_lead_by_id("l1").expect("get").expect("exists");
        assert_eq!(lead.deal_stage, DealStage::ClosedWon);
        assert_eq!(lead.probability, 100);
    }

    #[test]
    fn credential_row_is_replaced_on_save() {
        let (_dir, db) = test_db();
        let now = Utc::now();
        let first = Credential {
            access_token: "a1".to_string(),
            refresh_token: "r1".to_string(),
            realm_id: "realm".to_string(),
            expires_at: now + Duration::hours(1),
            refresh_expires_at: now + Duration::days(100),
        };
        db.save_credential(&first, "2026-01-01T00:00:00Z").expect("save");

        let second = Credential {
            access_token: "a2".to_string(),
            refresh_token: "r2".to_string(),
            ..first
        };
        db.save_credential(&second, "2026-01-01T01:00:00Z").expect("save");

        let current = db.get_credential().expect("get").expect("exists");
        assert_eq!(current.access_token, "a2");
        assert_eq!(current.refresh_token, "r2");

        db.delete_credential().expect("delete");
        assert!(db.get_credential().expect("get").is_none());
    }

    #[test]
    fn latest_quote_wins_by_created_at() {
        let (_dir, db) = test_db();
        db.insert_lead(&sample_lead("l1", DealStage::Proposal))
            .expect("lead");
        db.insert_quote(&crate::models::Quote {
            id: "q1".to_string(),
            lead_id: "l1".to_string(),
            total: 900.0,
            margin_percent: Some(20.0),
            created_at: "2026-01-01T00:00:00Z".to_string(),
        })
        .expect("q1");
        db.insert_quote(&crate::models::Quote {
            id: "q2".to_string(),
            lead_id: "l1".to_string(),
            total: 1100.0,
            margin_percent: None,
            created_at: "2026-02-01T00:00:00Z".to_string(),
        })
        .expect("q2");

        let latest = db.latest_quote_for_lead("l1").expect("query").expect("some");
        assert_eq!(latest.id, "q2");
    }
}
