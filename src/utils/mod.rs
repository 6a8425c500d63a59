use chrono::{Duration, NaiveDate, Utc};

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub fn today_ymd() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// Inclusive date window ending today, `days` long, both ends as YYYY-MM-DD.
pub fn default_window(days: i64) -> (String, String) {
    let end = Utc::now().date_naive();
    let start = end - Duration::days(days);
    (
        start.format("%Y-%m-%d").to_string(),
        end.format("%Y-%m-%d").to_string(),
    )
}

pub fn month_start_ymd() -> String {
    Utc::now().format("%Y-%m-01").to_string()
}

/// Calendar-month bucket (YYYY-MM) of a date string. Dates that do not parse
/// land in a literal "unknown" bucket rather than poisoning the rollup.
pub fn year_month(date: &str) -> String {
    match NaiveDate::parse_from_str(date, "%Y-%m-%d") {
        Ok(parsed) => parsed.format("%Y-%m").to_string(),
        Err(_) => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_month_buckets_valid_dates() {
        assert_eq!(year_month("2026-03-15"), "2026-03");
    }

    #[test]
    fn year_month_tolerates_garbage() {
        assert_eq!(year_month("not-a-date"), "unknown");
        assert_eq!(year_month(""), "unknown");
    }

    #[test]
    fn year_month_normalizes_short_date_forms() {
        // chrono accepts unpadded %Y-%m-%d input shorter than ten bytes
        assert_eq!(year_month("1-1-1"), "0001-01");
        assert_eq!(year_month("2026-3-5"), "2026-03");
    }

    #[test]
    fn default_window_spans_requested_days() {
        let (start, end) = default_window(90);
        let s = NaiveDate::parse_from_str(&start, "%Y-%m-%d").expect("start");
        let e = NaiveDate::parse_from_str(&end, "%Y-%m-%d").expect("end");
        assert_eq!((e - s).num_days(), 90);
    }
}
