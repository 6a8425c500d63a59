use serde_json::Value;

/// A profit-and-loss or balance-sheet report reduced to the parts extraction
/// cares about. The external payload is loosely shaped; everything here is
/// optional and building the tree never fails.
#[derive(Debug, Clone)]
pub enum ReportRow {
    Section {
        group: Option<String>,
        header: Vec<String>,
        summary: Vec<String>,
        children: Vec<ReportRow>,
    },
    Leaf {
        cols: Vec<String>,
    },
}

pub fn parse_report(report: &Value) -> Vec<ReportRow> {
    rows_of(report)
}

fn rows_of(node: &Value) -> Vec<ReportRow> {
    node.get("Rows")
        .and_then(|r| r.get("Row"))
        .and_then(Value::as_array)
        .map(|rows| rows.iter().map(parse_row).collect())
        .unwrap_or_default()
}

fn parse_row(row: &Value) -> ReportRow {
    let is_section = row.get("Rows").is_some()
        || row.get("Summary").is_some()
        || row.get("type").and_then(Value::as_str) == Some("Section");
    if is_section {
        ReportRow::Section {
            group: row
                .get("group")
                .and_then(Value::as_str)
                .map(String::from),
            header: col_values(row.get("Header")),
            summary: col_values(row.get("Summary")),
            children: rows_of(row),
        }
    } else {
        ReportRow::Leaf {
            cols: col_values(Some(row)),
        }
    }
}

fn col_values(node: Option<&Value>) -> Vec<String> {
    node.and_then(|n| n.get("ColData"))
        .and_then(Value::as_array)
        .map(|cols| {
            cols.iter()
                .map(|c| {
                    c.get("value")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Total income from a profit-and-loss report. Strategies in order: the
/// Income section's own summary row, then a "Total Income" labeled row
/// anywhere inside Income-tagged subtrees. Unrecognized shapes yield 0.
pub fn extract_income_total(report: &Value) -> f64 {
    extract_group_total(report, "Income", "Total Income")
}

/// Bank-account total from a balance sheet, same strategy order.
pub fn extract_bank_total(report: &Value) -> f64 {
    extract_group_total(report, "BankAccounts", "Total Bank Accounts")
}

pub fn extract_group_total(report: &Value, group: &str, total_label: &str) -> f64 {
    let tree = parse_report(report);
    let mut sections = Vec::new();
    collect_sections(&tree, group, &mut sections);

    for section in &sections {
        if let ReportRow::Section { summary, .. } = section {
            if let Some(total) = last_numeric(summary) {
                return total;
            }
        }
    }
    for section in &sections {
        if let Some(total) = find_labeled_total(std::slice::from_ref(*section), total_label, false)
        {
            return total;
        }
    }
    0.0
}

fn collect_sections<'a>(rows: &'a [ReportRow], group: &str, out: &mut Vec<&'a ReportRow>) {
    for row in rows {
        if let ReportRow::Section {
            group: tag,
            children,
            ..
        } = row
        {
            if tag.as_deref() == Some(group) {
                out.push(row);
            }
            collect_sections(children, group, out);
        }
    }
}

/// Depth-first search for a row whose first column contains `label`,
/// reading the trailing numeric column of that row. `inside` tracks whether
/// we are already below the matched section so sibling groups are skipped.
fn find_labeled_total(rows: &[ReportRow], label: &str, inside: bool) -> Option<f64> {
    for row in rows {
        match row {
            ReportRow::Leaf { cols } => {
                if inside && cols.first().map(|c| c.contains(label)).unwrap_or(false) {
                    if let Some(total) = last_numeric(cols) {
                        return Some(total);
                    }
                }
            }
            ReportRow::Section {
                header,
                summary,
                children,
                ..
            } => {
                for cols in [header, summary] {
                    if inside && cols.first().map(|c| c.contains(label)).unwrap_or(false) {
                        if let Some(total) = last_numeric(cols) {
                            return Some(total);
                        }
                    }
                }
                if let Some(total) = find_labeled_total(children, label, true) {
                    return Some(total);
                }
            }
        }
    }
    None
}

fn last_numeric(cols: &[String]) -> Option<f64> {
    cols.iter().rev().find_map(|c| parse_amount(c))
}

fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned = raw.replace([',', '$', '%'], "");
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn income_total_from_section_summary() {
        let report = json!({
            "Rows": { "Row": [{
                "type": "Section",
                "group": "Income",
                "Header": { "ColData": [{ "value": "Income" }] },
                "Rows": { "Row": [
                    { "ColData": [{ "value": "Design services" }, { "value": "12,500.00" }] }
                ]},
                "Summary": { "ColData": [{ "value": "Total Income" }, { "value": "12,500.00" }] }
            }]}
        });
        assert_eq!(extract_income_total(&report), 12_500.0);
    }

    #[test]
    fn income_total_from_labeled_child_row_when_summary_is_missing() {
        let report = json!({
            "Rows": { "Row": [{
                "type": "Section",
                "group": "Income",
                "Rows": { "Row": [
                    { "ColData": [{ "value": "Consulting" }, { "value": "9,000.00" }] },
                    { "ColData": [{ "value": "Total Income" }, { "value": "9,750.50" }] }
                ]}
            }]}
        });
        assert_eq!(extract_income_total(&report), 9750.5);
    }

    #[test]
    fn income_section_nested_below_root_is_still_found() {
        let report = json!({
            "Rows": { "Row": [{
                "type": "Section",
                "Rows": { "Row": [{
                    "type": "Section",
                    "group": "Income",
                    "Summary": { "ColData": [{ "value": "Total Income" }, { "value": "300.00" }] }
                }]}
            }]}
        });
        assert_eq!(extract_income_total(&report), 300.0);
    }

    #[test]
    fn missing_income_section_yields_zero() {
        let report = json!({
            "Rows": { "Row": [{
                "type": "Section",
                "group": "Expenses",
                "Summary": { "ColData": [{ "value": "Total Expenses" }, { "value": "100.00" }] }
            }]}
        });
        assert_eq!(extract_income_total(&report), 0.0);
        assert_eq!(extract_income_total(&json!({})), 0.0);
        assert_eq!(extract_income_total(&json!({ "Rows": "garbage" })), 0.0);
    }

    #[test]
    fn summary_with_no_numeric_column_falls_back_to_children() {
        let report = json!({
            "Rows": { "Row": [{
                "type": "Section",
                "group": "Income",
                "Summary": { "ColData": [{ "value": "Total Income" }, { "value": "" }] },
                "Rows": { "Row": [
                    { "ColData": [{ "value": "Total Income" }, { "value": "42.00" }] }
                ]}
            }]}
        });
        assert_eq!(extract_income_total(&report), 42.0);
    }
}
