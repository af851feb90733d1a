use crate::error::StoreError;

/// Parse a JSON string column, returning CorruptRow on parse failure.
pub fn parse_json<T: serde::de::DeserializeOwned>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid JSON: {e}"),
    })
}

/// Parse an RFC 3339 timestamp column.
pub fn parse_timestamp(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<chrono::DateTime<chrono::Utc>, StoreError> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&chrono::Utc))
        .map_err(|e| StoreError::CorruptRow {
            table,
            column,
            detail: format!("invalid timestamp: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_json_success() {
        let result: serde_json::Value = parse_json(r#"{"key": "value"}"#, "events", "payload").unwrap();
        assert_eq!(result["key"], "value");
    }

    #[test]
    fn parse_json_failure() {
        let result: Result<serde_json::Value, _> = parse_json("not valid json", "events", "payload");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "events", column: "payload", .. })
        ));
    }

    #[test]
    fn parse_timestamp_roundtrip() {
        let ts = parse_timestamp("2026-08-01T12:00:00.123456789Z", "events", "timestamp").unwrap();
        assert_eq!(ts.timestamp_subsec_nanos(), 123_456_789);
    }

    #[test]
    fn parse_timestamp_failure() {
        assert!(parse_timestamp("yesterday", "events", "timestamp").is_err());
    }
}
