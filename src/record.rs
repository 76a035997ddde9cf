//! The JSON envelope published for every received line

use chrono::Local;
use serde::Serialize;

/// Source tag carried by every record
pub const SOURCE_TAG: &str = "UART";

/// ISO-8601 local datetime without offset, microsecond precision
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// One line of serial input on its way to the broker.
///
/// A record only exists for lines that are non-empty after stripping
/// surrounding whitespace; see [`Record::from_line`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub data: String,
    pub timestamp: String,
    pub source: &'static str,
}

impl Record {
    /// Build a record stamped with the current local time.
    ///
    /// Returns `None` for empty or whitespace-only lines.
    pub fn from_line(line: &str) -> Option<Self> {
        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        Self::with_timestamp(line, timestamp)
    }

    /// Build a record with an explicit timestamp
    pub fn with_timestamp(line: &str, timestamp: String) -> Option<Self> {
        let data = line.trim();
        if data.is_empty() {
            return None;
        }

        Some(Self {
            data: data.to_string(),
            timestamp,
            source: SOURCE_TAG,
        })
    }

    /// Serialize to the JSON payload sent over MQTT
    pub fn to_payload(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use serde_json::Value;

    #[test]
    fn test_empty_lines_produce_no_record() {
        assert!(Record::from_line("").is_none());
        assert!(Record::from_line("\n").is_none());
        assert!(Record::from_line("  \r\n").is_none());
        assert!(Record::from_line("\t ").is_none());
    }

    #[test]
    fn test_line_is_stripped() {
        let record = Record::from_line("  23.5\r\n").unwrap();
        assert_eq!(record.data, "23.5");
        assert_eq!(record.source, "UART");
    }

    #[test]
    fn test_inner_whitespace_kept() {
        let record = Record::from_line("temp = 23.5 C\n").unwrap();
        assert_eq!(record.data, "temp = 23.5 C");
    }

    #[test]
    fn test_timestamp_is_iso8601() {
        let record = Record::from_line("x").unwrap();
        assert!(NaiveDateTime::parse_from_str(&record.timestamp, TIMESTAMP_FORMAT).is_ok());
        assert!(record.timestamp.contains('T'));
    }

    #[test]
    fn test_payload_shape() {
        let record = Record::with_timestamp("23.5\n", "2024-05-01T12:00:00.000000".into()).unwrap();
        let payload = record.to_payload().unwrap();

        assert_eq!(
            payload,
            r#"{"data":"23.5","timestamp":"2024-05-01T12:00:00.000000","source":"UART"}"#
        );

        let value: Value = serde_json::from_str(&payload).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 3);
        assert_eq!(object["source"], "UART");
    }

    #[test]
    fn test_payload_escapes_quotes() {
        let record = Record::with_timestamp(r#"say "hi""#, "t".into()).unwrap();
        let value: Value = serde_json::from_str(&record.to_payload().unwrap()).unwrap();
        assert_eq!(value["data"], r#"say "hi""#);
    }
}
