use std::time::{SystemTime, UNIX_EPOCH};

use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

pub fn uuid_v7_without_dashes() -> String {
    Uuid::now_v7().simple().to_string()
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

pub fn format_ms_rfc3339(epoch_ms: i64) -> String {
    let value = OffsetDateTime::from_unix_timestamp_nanos(epoch_ms as i128 * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);
    value
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_ms_rfc3339_epoch() {
        assert_eq!(format_ms_rfc3339(0), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn format_ms_rfc3339_subsecond() {
        assert_eq!(format_ms_rfc3339(1_500), "1970-01-01T00:00:01.5Z");
    }

    #[test]
    fn uuid_v7_without_dashes_is_32_hex_chars() {
        let id = uuid_v7_without_dashes();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|ch| ch.is_ascii_hexdigit()));
    }
}
