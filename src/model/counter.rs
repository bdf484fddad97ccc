use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// Period bucket of the current UTC date a counter is keyed on, per §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Year,
    Month,
    Week,
    Day,
}

impl Period {
    pub const ALL: [Period; 4] = [Period::Year, Period::Month, Period::Week, Period::Day];

    /// Stable string bucket for `(subject, period)` uniqueness, e.g.
    /// `"2026-W31"` for a week bucket on 2026-08-01.
    pub fn bucket(self, at: DateTime<Utc>) -> String {
        match self {
            Period::Year => format!("{}", at.year()),
            Period::Month => format!("{}-{:02}", at.year(), at.month()),
            Period::Week => {
                let iso = at.iso_week();
                format!("{}-W{:02}", iso.year(), iso.week())
            }
            Period::Day => at.format("%Y-%m-%d").to_string(),
        }
    }
}

/// Advisory aggregate — counters are best-effort, last-writer-wins (§5), never
/// authoritative.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Counter {
    pub subject: String,
    pub period: Period,
    pub bucket: String,
    pub value: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_shapes() {
        let at = DateTime::parse_from_rfc3339("2026-08-01T00:00:00Z").unwrap().with_timezone(&Utc);
        assert_eq!(Period::Year.bucket(at), "2026");
        assert_eq!(Period::Month.bucket(at), "2026-08");
        assert_eq!(Period::Day.bucket(at), "2026-08-01");
    }
}
