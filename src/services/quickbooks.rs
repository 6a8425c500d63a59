use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::errors::{SyncError, SyncResult};
use crate::models::Credential;

const MINOR_VERSION: &str = "65";
const MAX_QUERY_RESULTS: usize = 1000;
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRef {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccountExpenseDetail {
    #[serde(default)]
    pub account_ref: Option<EntityRef>,
    #[serde(default)]
    pub customer_ref: Option<EntityRef>,
    #[serde(default)]
    pub billable_status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExpenseLine {
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub account_based_expense_line_detail: Option<AccountExpenseDetail>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Purchase {
    pub id: String,
    #[serde(default)]
    pub total_amt: f64,
    #[serde(default)]
    pub txn_date: Option<String>,
    #[serde(default)]
    pub entity_ref: Option<EntityRef>,
    #[serde(default)]
    pub line: Vec<ExpenseLine>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Bill {
    pub id: String,
    #[serde(default)]
    pub total_amt: f64,
    #[serde(default)]
    pub txn_date: Option<String>,
    #[serde(default)]
    pub vendor_ref: Option<EntityRef>,
    #[serde(default)]
    pub line: Vec<ExpenseLine>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LinkedTxn {
    #[serde(default)]
    pub txn_id: Option<String>,
    #[serde(default)]
    pub txn_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Invoice {
    pub id: String,
    #[serde(default)]
    pub total_amt: f64,
    #[serde(default)]
    pub txn_date: Option<String>,
    #[serde(default)]
    pub customer_ref: Option<EntityRef>,
    #[serde(default)]
    pub linked_txn: Vec<LinkedTxn>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Estimate {
    pub id: String,
    #[serde(default)]
    pub total_amt: f64,
    #[serde(default)]
    pub txn_date: Option<String>,
    #[serde(default)]
    pub txn_status: Option<String>,
    #[serde(default)]
    pub customer_ref: Option<EntityRef>,
    #[serde(default)]
    pub linked_txn: Vec<LinkedTxn>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Customer {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Item {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Thin client over the QuickBooks Online v3 API. Auth is caller-supplied;
/// every method takes the credential issued by the token manager.
pub struct QuickBooks {
    http: reqwest::Client,
    base_url: String,
}

impl QuickBooks {
    pub fn new(environment: &str) -> SyncResult<Self> {
        let base_url = match environment {
            "production" => "https://quickbooks.api.intuit.com".to_string(),
            _ => "https://sandbox-quickbooks.api.intuit.com".to_string(),
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(QuickBooks { http, base_url })
    }

    /// Runs a SQL-like query and unwraps the entity array keyed by
    /// `entity_key` inside QueryResponse. A missing key means zero rows.
    pub async fn query<T: DeserializeOwned>(
        &self,
        credential: &Credential,
        entity_key: &str,
        statement: &str,
    ) -> SyncResult<Vec<T>> {
        let url = format!(
            "{}/v3/company/{}/query",
            self.base_url, credential.realm_id
        );
        let body = self
            .get_json(
                credential,
                &url,
                &[("query", statement), ("minorversion", MINOR_VERSION)],
            )
            .await?;

        let rows = body
            .get("QueryResponse")
            .and_then(|q| q.get(entity_key))
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(rows)
            .map_err(|e| SyncError::Network(format!("Malformed {} response: {}", entity_key, e)))
    }

    pub fn select_statement(entity: &str, filter: Option<&str>) -> String {
        match filter {
            Some(filter) => format!(
                "SELECT * FROM {} WHERE {} MAXRESULTS {}",
                entity, filter, MAX_QUERY_RESULTS
            ),
            None => format!("SELECT * FROM {} MAXRESULTS {}", entity, MAX_QUERY_RESULTS),
        }
    }

    pub async fn profit_and_loss(
        &self,
        credential: &Credential,
        start_date: &str,
        end_date: &str,
    ) -> SyncResult<Value> {
        let url = format!(
            "{}/v3/company/{}/reports/ProfitAndLoss",
            self.base_url, credential.realm_id
        );
        self.get_json(
            credential,
            &url,
            &[
                ("start_date", start_date),
                ("end_date", end_date),
                ("minorversion", MINOR_VERSION),
            ],
        )
        .await
    }

    pub async fn balance_sheet(&self, credential: &Credential) -> SyncResult<Value> {
        let url = format!(
            "{}/v3/company/{}/reports/BalanceSheet",
            self.base_url, credential.realm_id
        );
        self.get_json(credential, &url, &[("minorversion", MINOR_VERSION)])
            .await
    }

    pub async fn create_customer(
        &self,
        credential: &Credential,
        display_name: &str,
    ) -> SyncResult<Customer> {
        let url = format!(
            "{}/v3/company/{}/customer",
            self.base_url, credential.realm_id
        );
        let body = self
            .post_json(
                credential,
                &url,
                &serde_json::json!({ "DisplayName": display_name }),
            )
            .await?;
        let customer = body
            .get("Customer")
            .cloned()
            .ok_or_else(|| SyncError::Network("Customer missing from create response".into()))?;
        serde_json::from_value(customer)
            .map_err(|e| SyncError::Network(format!("Malformed Customer response: {}", e)))
    }

    pub async fn create_estimate(
        &self,
        credential: &Credential,
        estimate: &Value,
    ) -> SyncResult<Estimate> {
        let url = format!(
            "{}/v3/company/{}/estimate",
            self.base_url, credential.realm_id
        );
        let body = self.post_json(credential, &url, estimate).await?;
        let estimate = body
            .get("Estimate")
            .cloned()
            .ok_or_else(|| SyncError::Network("Estimate missing from create response".into()))?;
        serde_json::from_value(estimate)
            .map_err(|e| SyncError::Network(format!("Malformed Estimate response: {}", e)))
    }

    pub async fn estimate_pdf(
        &self,
        credential: &Credential,
        estimate_id: &str,
    ) -> SyncResult<Vec<u8>> {
        let url = format!(
            "{}/v3/company/{}/estimate/{}/pdf",
            self.base_url, credential.realm_id, estimate_id
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(&credential.access_token)
            .header("Accept", "application/pdf")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Network(format!("{}: {}", status, body)));
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn get_json(
        &self,
        credential: &Credential,
        url: &str,
        query: &[(&str, &str)],
    ) -> SyncResult<Value> {
        let response = self
            .http
            .get(url)
            .query(query)
            .bearer_auth(&credential.access_token)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Network(format!("{}: {}", status, body)));
        }
        Ok(response.json().await?)
    }

    async fn post_json(
        &self,
        credential: &Credential,
        url: &str,
        body: &Value,
    ) -> SyncResult<Value> {
        let response = self
            .http
            .post(url)
            .query(&[("minorversion", MINOR_VERSION)])
            .bearer_auth(&credential.access_token)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Network(format!("{}: {}", status, body)));
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_statement_caps_results() {
        let stmt = QuickBooks::select_statement("Purchase", Some("TxnDate >= '2026-01-01'"));
        assert_eq!(
            stmt,
            "SELECT * FROM Purchase WHERE TxnDate >= '2026-01-01' MAXRESULTS 1000"
        );
        assert_eq!(
            QuickBooks::select_statement("Item", None),
            "SELECT * FROM Item MAXRESULTS 1000"
        );
    }

    #[test]
    fn purchase_parses_from_qbo_shape() {
        let raw = serde_json::json!({
            "Id": "145",
            "TotalAmt": 250.0,
            "TxnDate": "2026-02-01",
            "EntityRef": { "value": "42", "name": "Delta Air" },
            "Line": [{
                "Amount": 250.0,
                "AccountBasedExpenseLineDetail": {
                    "AccountRef": { "value": "80", "name": "Travel Expenses" },
                    "BillableStatus": "Billable"
                }
            }]
        });
        let purchase: Purchase = serde_json::from_value(raw).expect("parse");
        assert_eq!(purchase.id, "145");
        assert_eq!(purchase.line.len(), 1);
        let detail = purchase.line[0]
            .account_based_expense_line_detail
            .as_ref()
            .expect("detail");
        assert_eq!(detail.account_ref.as_ref().expect("ref").name.as_deref(), Some("Travel Expenses"));
    }

    #[test]
    fn estimate_tolerates_missing_fields() {
        let raw = serde_json::json!({ "Id": "9" });
        let estimate: Estimate = serde_json::from_value(raw).expect("parse");
        assert!(estimate.txn_status.is_none());
        assert!(estimate.linked_txn.is_empty());
    }
}
