use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// The wire type that crosses the edge→forge boundary.
///
/// Immutable after construction. Serialized as one UTF-8 JSON object per line
/// on the pipe, in failover journals, and inside dead-letter batches. Readers
/// tolerate unknown fields so the two processes can be upgraded independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub company: String,
    pub pixel: String,
    pub ip: String,
    pub path: String,
    pub query: String,
    /// Whitelisted request headers, pre-escaped into a JSON object string.
    pub headers: String,
    pub ua: String,
    pub referer: String,
    pub received_at: DateTime<Utc>,
}

impl CaptureRecord {
    /// Serialize to a single JSON line (no trailing newline).
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse one line of pipe or journal input.
    pub fn from_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }

    /// Replace the query string, consuming the record. Used once, when the
    /// enrichment buffer is folded back in before the bulk write.
    pub fn with_query(mut self, query: String) -> Self {
        self.query = query;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record() -> CaptureRecord {
        CaptureRecord {
            company: "ACME".into(),
            pixel: "spring".into(),
            ip: "8.8.8.8".into(),
            path: "/ACME/spring_SMART.GIF".into(),
            query: "sw=1920&sh=1080".into(),
            headers: r#"{"Accept-Language":"en-US"}"#.into(),
            ua: "Mozilla/5.0".into(),
            referer: "https://example.com/".into(),
            received_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn line_round_trip_is_identical() {
        let original = record();
        let line = original.to_line().unwrap();
        assert!(!line.contains('\n'));
        let parsed = CaptureRecord::from_line(&line).unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn reader_tolerates_unknown_fields() {
        let mut value: serde_json::Value =
            serde_json::from_str(&record().to_line().unwrap()).unwrap();
        value["some_future_field"] = serde_json::json!(42);
        let parsed = CaptureRecord::from_line(&value.to_string()).unwrap();
        assert_eq!(parsed, record());
    }
}
