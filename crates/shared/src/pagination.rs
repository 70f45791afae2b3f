//! Keyset cursors for newest-first listings.
//!
//! A cursor names the last row of the previous page by `(created_at, id)`.
//! The id orders rows created in the same microsecond.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use uuid::Uuid;

const SEPARATOR: char = '|';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CursorError {
    #[error("Cursor is not valid base64")]
    Encoding,
    #[error("Cursor is malformed")]
    Malformed,
}

/// Position after which the next page starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl PageCursor {
    pub fn new(created_at: DateTime<Utc>, id: Uuid) -> Self {
        Self { created_at, id }
    }

    /// Opaque, URL-safe form handed to clients.
    pub fn encode(&self) -> String {
        let raw = format!(
            "{}{}{}",
            self.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            SEPARATOR,
            self.id
        );
        URL_SAFE_NO_PAD.encode(raw)
    }

    pub fn decode(cursor: &str) -> Result<Self, CursorError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(cursor.trim())
            .map_err(|_| CursorError::Encoding)?;
        let raw = std::str::from_utf8(&bytes).map_err(|_| CursorError::Malformed)?;
        let (at, id) = raw.split_once(SEPARATOR).ok_or(CursorError::Malformed)?;

        let created_at = DateTime::parse_from_rfc3339(at)
            .map_err(|_| CursorError::Malformed)?
            .with_timezone(&Utc);
        let id = Uuid::parse_str(id).map_err(|_| CursorError::Malformed)?;
        Ok(Self { created_at, id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_cursor_keeps_microsecond_precision() {
        let at = Utc
            .with_ymd_and_hms(2025, 9, 1, 8, 0, 0)
            .unwrap()
            .with_nanosecond(987_654_000)
            .unwrap();
        let cursor = PageCursor::new(at, Uuid::new_v4());

        let decoded = PageCursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn test_cursor_is_url_safe() {
        let encoded = PageCursor::new(Utc::now(), Uuid::new_v4()).encode();
        assert!(encoded
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_rejects_garbage() {
        assert_eq!(PageCursor::decode("%%%"), Err(CursorError::Encoding));

        let no_separator = URL_SAFE_NO_PAD.encode("2025-09-01T08:00:00Z");
        assert_eq!(PageCursor::decode(&no_separator), Err(CursorError::Malformed));

        let bad_id = URL_SAFE_NO_PAD.encode("2025-09-01T08:00:00Z|nope");
        assert_eq!(PageCursor::decode(&bad_id), Err(CursorError::Malformed));

        let bad_time = URL_SAFE_NO_PAD.encode(format!("yesterday|{}", Uuid::new_v4()));
        assert_eq!(PageCursor::decode(&bad_time), Err(CursorError::Malformed));
    }
}
