use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

/// Remote attribute carrying the last modification date.
pub const UPDATED_AT: &str = "updated_at";

const BACKEND_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse a backend timestamp. Accepts `YYYY-MM-DD HH:MM:SS` (taken as UTC) and
/// RFC 3339. Empty or unparseable values yield `None`.
pub fn parse_backend_date(value: &Value) -> Option<DateTime<Utc>> {
	let text = value.as_str()?.trim();
	if text.is_empty() {
		return None;
	}
	if let Ok(naive) = NaiveDateTime::parse_from_str(text, BACKEND_DATE_FORMAT) {
		return Some(naive.and_utc());
	}
	DateTime::parse_from_rfc3339(text)
		.ok()
		.map(|dt| dt.with_timezone(&Utc))
}

/// Render a timestamp the way the backend writes them.
pub fn format_backend_date(at: DateTime<Utc>) -> String {
	at.format(BACKEND_DATE_FORMAT).to_string()
}

/// Whether the remote copy changed after the last synchronization.
pub fn is_stale(sync_date: DateTime<Utc>, remote_updated: Option<DateTime<Utc>>) -> bool {
	remote_updated.is_some_and(|updated| sync_date < updated)
}
