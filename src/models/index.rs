use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Daily index names look like `<prefix>-<year>.<month>.<day>`
static INDEX_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+)-(\d+)\.(\d+)\.(\d+)$").expect("valid index name pattern"));

/// A daily index name with its parsed calendar date
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedIndex {
    /// The full index name as observed on the cluster
    pub name: String,

    /// Everything before the date suffix
    pub prefix: String,

    /// Calendar date parsed from the numeric suffix
    pub date: NaiveDate,

    /// The month bucket key this index belongs to (prefix-inclusive)
    pub month_key: String,
}

impl ParsedIndex {
    /// Parse an index name. Names without a valid `<prefix>-<y>.<m>.<d>`
    /// suffix (or with an impossible date such as month 13) return None and
    /// are simply excluded from consolidation.
    pub fn parse(name: &str) -> Option<Self> {
        let caps = INDEX_NAME_RE.captures(name)?;

        let prefix = caps.get(1)?.as_str();
        let year_raw = caps.get(2)?.as_str();
        let month_raw = caps.get(3)?.as_str();
        let day_raw = caps.get(4)?.as_str();

        let year: i32 = year_raw.parse().ok()?;
        let month: u32 = month_raw.parse().ok()?;
        let day: u32 = day_raw.parse().ok()?;

        let date = NaiveDate::from_ymd_opt(year, month, day)?;

        // Keep the raw year/month text so the bucket key matches the naming
        // convention actually used on the cluster (zero-padded or not).
        let month_key = format!("{}-{}.{}", prefix, year_raw, month_raw);

        Some(Self {
            name: name.to_string(),
            prefix: prefix.to_string(),
            date,
            month_key,
        })
    }

    /// Age in whole days relative to `today`
    pub fn age_days(&self, today: NaiveDate) -> i64 {
        (today - self.date).num_days()
    }
}

/// One monthly consolidation target and its ordered daily source indices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthBucket {
    /// Bucket key = destination index name (`<prefix>-<year>.<month>`)
    pub key: String,

    /// Member daily indices, ascending by date (insertion order of a
    /// lexicographically sorted discovery pass)
    pub members: Vec<String>,
}

impl MonthBucket {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            members: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_name() {
        let parsed = ParsedIndex::parse("logs-2024.01.02").unwrap();
        assert_eq!(parsed.prefix, "logs");
        assert_eq!(parsed.date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(parsed.month_key, "logs-2024.01");
    }

    #[test]
    fn test_parse_prefix_with_dashes() {
        let parsed = ParsedIndex::parse("app-access-logs-2023.12.31").unwrap();
        assert_eq!(parsed.prefix, "app-access-logs");
        assert_eq!(parsed.month_key, "app-access-logs-2023.12");
    }

    #[test]
    fn test_parse_preserves_unpadded_month() {
        let parsed = ParsedIndex::parse("metrics-2024.1.2").unwrap();
        assert_eq!(parsed.month_key, "metrics-2024.1");
    }

    #[test]
    fn test_parse_rejects_non_date_names() {
        assert!(ParsedIndex::parse(".kibana").is_none());
        assert!(ParsedIndex::parse("logs-2024.01").is_none());
        assert!(ParsedIndex::parse("logs").is_none());
        // Month 13 does not exist
        assert!(ParsedIndex::parse("logs-2024.13.01").is_none());
    }

    #[test]
    fn test_age_days() {
        let parsed = ParsedIndex::parse("logs-2024.01.01").unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        assert_eq!(parsed.age_days(today), 9);
    }
}
