use anyhow::anyhow;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use crate::db::Database;
use crate::errors::{SyncError, SyncResult};
use crate::models::QuoteLineItem;
use crate::services::quickbooks::{Customer, Estimate, Item, QuickBooks};
use crate::services::tokens::TokenManager;
use crate::utils::now_rfc3339;

/// Discipline names used on internal quotes mapped to the catalog service
/// they bill under.
const DISCIPLINE_SERVICES: &[(&str, &str)] = &[
    ("architecture", "Architectural Design"),
    ("engineering", "Engineering Services"),
    ("interior design", "Interior Design"),
    ("landscape", "Landscape Design"),
    ("construction", "Construction Management"),
    ("consulting", "Consulting Services"),
];

pub struct EstimateBuilder {
    db: Arc<Mutex<Database>>,
    tokens: Arc<TokenManager>,
    qb: Arc<QuickBooks>,
}

impl EstimateBuilder {
    pub fn new(db: Arc<Mutex<Database>>, tokens: Arc<TokenManager>, qb: Arc<QuickBooks>) -> Self {
        EstimateBuilder { db, tokens, qb }
    }

    /// Pushes an internal quote outward as a QuickBooks estimate. The lead
    /// gains the customer and estimate ids it did not have before.
    pub async fn create_estimate_from_quote(
        &self,
        lead_id: &str,
        line_items: &[QuoteLineItem],
    ) -> SyncResult<Estimate> {
        if line_items.is_empty() {
            return Err(SyncError::Validation(
                "estimate needs at least one line item".into(),
            ));
        }

        let mut lead = {
            let db = self.db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
            db.get_lead_by_id(lead_id)?
                .ok_or_else(|| SyncError::Validation(format!("lead {} not found", lead_id)))?
        };

        let credential = self.tokens.get_valid_credential().await?;
        let customer_id = match lead.qb_customer_id.clone() {
            Some(id) => id,
            None => {
                let customer = self
                    .resolve_or_create_customer(&credential, &lead.client_name)
                    .await?;
                lead.qb_customer_id = Some(customer.id.clone());
                customer.id
            }
        };

        let items: Vec<Item> = self
            .qb
            .query(
                &credential,
                "Item",
                &QuickBooks::select_statement("Item", None),
            )
            .await?;

        let doc_number = doc_number(&lead.id, Utc::now().timestamp());
        let body = build_estimate_body(&customer_id, &doc_number, &lead.id, line_items, &items);
        let created = self.qb.create_estimate(&credential, &body).await?;
        tracing::info!(lead_id = %lead.id, estimate_id = %created.id, "estimate created");

        lead.qb_estimate_id = Some(created.id.clone());
        lead.updated_at = now_rfc3339();
        {
            let db = self.db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
            db.update_lead(&lead)?;
        }
        Ok(created)
    }

    pub async fn estimate_pdf(&self, estimate_id: &str) -> SyncResult<Vec<u8>> {
        let credential = self.tokens.get_valid_credential().await?;
        self.qb.estimate_pdf(&credential, estimate_id).await
    }

    /// Display-name search, then create. The external platform does not
    /// enforce display-name uniqueness; two concurrent creates with a novel
    /// name can still duplicate (accepted, see DESIGN.md).
    async fn resolve_or_create_customer(
        &self,
        credential: &crate::models::Credential,
        display_name: &str,
    ) -> SyncResult<Customer> {
        let escaped = display_name.replace('\'', "\\'");
        let statement = QuickBooks::select_statement(
            "Customer",
            Some(&format!("DisplayName = '{}'", escaped)),
        );
        let found: Vec<Customer> = self.qb.query(credential, "Customer", &statement).await?;
        if let Some(customer) = found.into_iter().next() {
            return Ok(customer);
        }
        self.qb.create_customer(credential, display_name).await
    }
}

/// Lead-id prefix plus an epoch-seconds suffix. Collision-unlikely without a
/// centralized sequence; QuickBooks caps DocNumber at 21 characters.
pub fn doc_number(lead_id: &str, epoch_secs: i64) -> String {
    let prefix: String = lead_id.chars().filter(|c| *c != '-').take(8).collect();
    format!("{}-{}", prefix.to_uppercase(), epoch_secs)
}

/// Catalog resolution priority: explicit product code, then the discipline
/// map, then a keyword match on the description. None means the line posts
/// as description-only.
pub fn resolve_item<'a>(items: &'a [Item], line: &QuoteLineItem) -> Option<&'a Item> {
    if let Some(code) = line.product_code.as_deref() {
        if let Some(item) = items
            .iter()
            .find(|i| i.name.as_deref().map(|n| n.eq_ignore_ascii_case(code)) == Some(true))
        {
            return Some(item);
        }
    }

    if let Some(discipline) = line.discipline.as_deref() {
        let discipline = discipline.to_lowercase();
        if let Some((_, service)) = DISCIPLINE_SERVICES
            .iter()
            .find(|(key, _)| discipline.contains(key))
        {
            if let Some(item) = items
                .iter()
                .find(|i| i.name.as_deref().map(|n| n.eq_ignore_ascii_case(service)) == Some(true))
            {
                return Some(item);
            }
        }
    }

    let description = line.description.to_lowercase();
    items.iter().find(|item| {
        item.name
            .as_deref()
            .map(|name| description.contains(&name.to_lowercase()))
            .unwrap_or(false)
    })
}

pub fn build_estimate_body(
    customer_id: &str,
    doc_number: &str,
    lead_id: &str,
    line_items: &[QuoteLineItem],
    items: &[Item],
) -> Value {
    let lines: Vec<Value> = line_items
        .iter()
        .map(|line| {
            let amount = line.quantity * line.unit_price;
            match resolve_item(items, line) {
                Some(item) => json!({
                    "DetailType": "SalesItemLineDetail",
                    "Amount": amount,
                    "Description": line.description,
                    "SalesItemLineDetail": {
                        "ItemRef": { "value": item.id, "name": item.name },
                        "Qty": line.quantity,
                        "UnitPrice": line.unit_price
                    }
                }),
                None => json!({
                    "DetailType": "DescriptionOnly",
                    "Description": format!("{} ({} x {:.2})", line.description, line.quantity, line.unit_price),
                    "DescriptionLineDetail": {}
                }),
            }
        })
        .collect();

    json!({
        "CustomerRef": { "value": customer_id },
        "DocNumber": doc_number,
        "PrivateNote": format!("costlink lead {}", lead_id),
        "Line": lines
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, name: &str) -> Item {
        serde_json::from_value(serde_json::json!({ "Id": id, "Name": name })).expect("item")
    }

    fn line(description: &str, code: Option<&str>, discipline: Option<&str>) -> QuoteLineItem {
        QuoteLineItem {
            description: description.to_string(),
            quantity: 2.0,
            unit_price: 100.0,
            product_code: code.map(String::from),
            discipline: discipline.map(String::from),
        }
    }

    fn catalog() -> Vec<Item> {
        vec![
            item("1", "Architectural Design"),
            item("2", "Consulting Services"),
            item("3", "SURVEY-01"),
        ]
    }

    #[test]
    fn explicit_product_code_wins_over_discipline() {
        let items = catalog();
        let resolved = resolve_item(
            &items,
            &line("site survey", Some("SURVEY-01"), Some("architecture")),
        )
        .expect("resolved");
        assert_eq!(resolved.id, "3");
    }

    #[test]
    fn discipline_map_resolves_when_no_code_given() {
        let items = catalog();
        let resolved =
            resolve_item(&items, &line("concept sketches", None, Some("Architecture")))
                .expect("resolved");
        assert_eq!(resolved.id, "1");
    }

    #[test]
    fn description_keywords_are_the_last_resort() {
        let items = catalog();
        let resolved = resolve_item(
            &items,
            &line("initial consulting services package", None, None),
        )
        .expect("resolved");
        assert_eq!(resolved.id, "2");
    }

    #[test]
    fn unresolved_lines_post_description_only() {
        let items = catalog();
        assert!(resolve_item(&items, &line("mystery work", None, None)).is_none());

        let body = build_estimate_body("C1", "ABC-123", "lead-1", &[line("mystery work", None, None)], &items);
        let lines = body["Line"].as_array().expect("lines");
        assert_eq!(lines[0]["DetailType"], "DescriptionOnly");
    }

    #[test]
    fn doc_number_derives_from_lead_id_and_timestamp() {
        let number = doc_number("a1b2c3d4-e5f6-7890-abcd-ef0123456789", 1_700_000_000);
        assert_eq!(number, "A1B2C3D4-1700000000");
        assert!(number.len() <= 21);
    }

    #[test]
    fn estimate_body_carries_all_lines_and_provenance() {
        let items = catalog();
        let body = build_estimate_body(
            "C1",
            "ABC-123",
            "lead-1",
            &[
                line("concept sketches", None, Some("architecture")),
                line("mystery work", None, None),
            ],
            &items,
        );
        assert_eq!(body["CustomerRef"]["value"], "C1");
        assert_eq!(body["Line"].as_array().expect("lines").len(), 2);
        assert_eq!(body["PrivateNote"], "costlink lead lead-1");
        assert_eq!(body["Line"][0]["SalesItemLineDetail"]["ItemRef"]["value"], "1");
    }
}
