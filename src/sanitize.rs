use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use crate::redact::{redact_pii, sanitize_path, sanitize_query, truncate_text, DEFAULT_TEXT_LIMIT};
use crate::schema::{FieldValue, RawRecord, SanitizedRecord};

pub const DEFAULT_ROW_LIMIT: usize = 50;

const SENSITIVE_KEYS: &[&str] = &[
    "user",
    "userid",
    "user_id",
    "clientid",
    "client_id",
    "session",
    "sessionid",
    "session_id",
    "email",
    "phone",
    "ip",
    "ipaddress",
    "cookie",
    "cookies",
    "token",
    "auth",
    "authorization",
    "password",
    "passwd",
    "referrer",
    "full_referrer",
];

static SENSITIVE_KEYS_NORMALIZED: Lazy<HashSet<String>> =
    Lazy::new(|| SENSITIVE_KEYS.iter().map(|key| strip_punctuation(key)).collect());

fn strip_punctuation(key: &str) -> String {
    key.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

fn is_sensitive_key(key: &str) -> bool {
    let lowered = key.trim().to_lowercase();
    SENSITIVE_KEYS.contains(&lowered.as_str())
        || SENSITIVE_KEYS_NORMALIZED.contains(&strip_punctuation(&lowered))
}

fn is_path_key(key_lower: &str) -> bool {
    matches!(key_lower, "path" | "page" | "url")
        || key_lower.contains("page")
        || key_lower.ends_with("path")
}

/// Applies the per-key text policy. `None` means the field is dropped.
fn sanitize_text(key_lower: &str, value: &str) -> Option<String> {
    let cleaned = if key_lower.contains("query") {
        sanitize_query(value, DEFAULT_TEXT_LIMIT)
    } else if is_path_key(key_lower) {
        sanitize_path(value)
    } else if key_lower.contains("referrer") {
        // Referrers are excluded outright, even once redacted.
        return None;
    } else {
        truncate_text(&redact_pii(value), DEFAULT_TEXT_LIMIT)
    };

    (!cleaned.is_empty()).then_some(cleaned)
}

/// Sanitizes one row: sensitive keys, nulls and nested values are dropped,
/// strings are redacted per key, and the result is keyed in sorted order.
pub fn sanitize_row(row: &RawRecord) -> SanitizedRecord {
    let mut fields = BTreeMap::new();

    for (key, value) in row {
        if is_sensitive_key(key) {
            continue;
        }

        let kept = match value {
            Value::Null => None,
            Value::Bool(b) => Some(FieldValue::Bool(*b)),
            Value::Number(n) => Some(FieldValue::Number(n.clone())),
            Value::String(s) => sanitize_text(&key.to_lowercase(), s).map(FieldValue::Text),
            // Output stays flat so stored files keep a stable shape.
            Value::Array(_) | Value::Object(_) => None,
        };

        if let Some(value) = kept {
            fields.insert(key.clone(), value);
        }
    }

    SanitizedRecord::from_fields(fields)
}

/// Sanitizes rows in order, skipping empties and exact duplicates, and stops
/// once `limit` rows are kept.
///
/// Input past the limit is never looked at, so callers wanting "top N" must
/// sort by priority first.
pub fn sanitize_rows<'a, I>(rows: I, limit: usize) -> Vec<SanitizedRecord>
where
    I: IntoIterator<Item = &'a RawRecord>,
{
    let mut cleaned = Vec::new();
    let mut seen = HashSet::new();

    if limit == 0 {
        return cleaned;
    }

    let mut dropped = 0usize;
    for row in rows {
        let item = sanitize_row(row);
        if item.is_empty() || !seen.insert(item.fingerprint()) {
            dropped += 1;
            continue;
        }
        cleaned.push(item);
        if cleaned.len() >= limit {
            break;
        }
    }

    debug!(
        action = "complete",
        component = "row_sanitizer",
        kept = cleaned.len(),
        dropped,
        limit,
        "Sanitized row batch"
    );
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn raw(value: Value) -> RawRecord {
        value.as_object().cloned().unwrap()
    }

    fn text(record: &SanitizedRecord, key: &str) -> String {
        match record.get(key) {
            Some(FieldValue::Text(s)) => s.clone(),
            other => panic!("expected text at {key}, got {other:?}"),
        }
    }

    #[test]
    fn drops_sensitive_fields_and_canonicalizes_page() {
        let row = sanitize_row(&raw(json!({
            "page": "https://example.com/en/blog/post?utm=1",
            "query": "best cafes in kadikoy",
            "email": "user@example.com",
            "ip_address": "1.1.1.1",
            "clicks": 12
        })));
        assert_eq!(text(&row, "page"), "/en/blog/post");
        assert_eq!(text(&row, "query"), "best cafes in kadikoy");
        assert!(!row.contains_key("email"));
        assert!(!row.contains_key("ip_address"));
        assert_eq!(row.get("clicks"), Some(&FieldValue::Number(12.into())));
    }

    #[test]
    fn sensitive_keys_match_any_casing_or_punctuation() {
        let row = sanitize_row(&raw(json!({
            "E-Mail": "x",
            "Client_ID": "abc",
            " Session-Id ": "s1",
            "IP.Address": "1.2.3.4",
            "Authorization": "Bearer t",
            "kind": "daily"
        })));
        assert_eq!(row.len(), 1);
        assert_eq!(text(&row, "kind"), "daily");
    }

    #[test]
    fn referrer_fields_are_dropped_not_redacted() {
        let row = sanitize_row(&raw(json!({
            "pageReferrer": "https://ref.example.com/a",
            "referrer_host": "ref.example.com",
            "sessions": 3
        })));
        // "pageReferrer" hits the page rule first and is kept as a path.
        assert_eq!(text(&row, "pageReferrer"), "/a");
        assert!(!row.contains_key("referrer_host"));
    }

    #[test]
    fn nulls_nested_values_and_empty_strings_are_dropped() {
        let row = sanitize_row(&raw(json!({
            "a": null,
            "b": {"nested": 1},
            "c": [1, 2],
            "d": "   ",
            "flag": false
        })));
        assert_eq!(row.len(), 1);
        assert_eq!(row.get("flag"), Some(&FieldValue::Bool(false)));
    }

    #[test]
    fn generic_text_is_redacted_and_truncated() {
        let long = format!("contact me at someone@example.org {}", "y".repeat(300));
        let row = sanitize_row(&raw(json!({ "title": long })));
        let title = text(&row, "title");
        assert!(title.starts_with("contact me at [redacted-email]"));
        assert_eq!(title.chars().count(), DEFAULT_TEXT_LIMIT);
    }

    #[test]
    fn keys_come_out_sorted() {
        let row = sanitize_row(&raw(json!({"z": 1, "a": 2, "m": 3})));
        let keys: Vec<&String> = row.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "m", "z"]);
    }

    #[test]
    fn sanitize_row_is_idempotent() {
        let original = raw(json!({
            "landingPage": "//example.com//tr/?x=1",
            "searchQuery": "call +90 532 111 22 33 now",
            "note": "  spaced   out  ",
            "requests": 1.5,
            "ok": true
        }));
        let once = sanitize_row(&original);
        let twice = sanitize_row(&once.to_raw());
        assert_eq!(once, twice);
    }

    #[test]
    fn deduplicates_and_limits() {
        let rows = vec![
            raw(json!({"page": "/a"})),
            raw(json!({"page": "/a"})),
            raw(json!({"page": "/b"})),
        ];

        let one = sanitize_rows(&rows, 1);
        assert_eq!(one, vec![sanitize_row(&raw(json!({"page": "/a"})))]);

        let two = sanitize_rows(&rows, 2);
        assert_eq!(
            two,
            vec![
                sanitize_row(&raw(json!({"page": "/a"}))),
                sanitize_row(&raw(json!({"page": "/b"}))),
            ]
        );
    }

    #[test]
    fn duplicates_are_judged_after_sanitizing() {
        let rows = vec![
            raw(json!({"page": "https://example.com/en/a?utm=1", "sessions": 10})),
            raw(json!({"sessions": 10, "page": "/en//a"})),
            raw(json!({"email": "only@sensitive.io"})),
            raw(json!({"page": "/en/b", "sessions": 9})),
        ];
        let cleaned = sanitize_rows(&rows, DEFAULT_ROW_LIMIT);
        assert_eq!(cleaned.len(), 2);
        assert_eq!(text(&cleaned[0], "page"), "/en/a");
        assert_eq!(text(&cleaned[1], "page"), "/en/b");
    }

    #[test]
    fn zero_limit_keeps_nothing() {
        let rows = vec![raw(json!({"page": "/a"}))];
        assert!(sanitize_rows(&rows, 0).is_empty());
    }
}
