use once_cell::sync::Lazy;
use regex::Regex;

pub const EMAIL_PLACEHOLDER: &str = "[redacted-email]";
pub const PHONE_PLACEHOLDER: &str = "[redacted-phone]";
pub const DEFAULT_TEXT_LIMIT: usize = 120;

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}\b").expect("valid email pattern")
});
static PHONE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\+?\d[\d().\-\s]{7,}\d)\b").expect("valid phone pattern"));
static REPEATED_SLASHES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/{2,}").expect("valid slash pattern"));
static SCHEME_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:").expect("valid scheme pattern"));

/// Replaces email addresses, then phone numbers, with fixed placeholders.
///
/// Emails go first so the phone pattern never sees the digits of an address.
pub fn redact_pii(text: &str) -> String {
    let without_email = EMAIL_PATTERN.replace_all(text, EMAIL_PLACEHOLDER);
    PHONE_PATTERN
        .replace_all(&without_email, PHONE_PLACEHOLDER)
        .into_owned()
}

/// Collapses whitespace runs and hard-cuts to `limit` characters.
pub fn truncate_text(text: &str, limit: usize) -> String {
    let compact = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if compact.chars().count() <= limit {
        return compact;
    }

    let cut: String = compact.chars().take(limit).collect();
    cut.trim_end().to_string()
}

pub fn sanitize_query(text: &str, limit: usize) -> String {
    truncate_text(&redact_pii(text), limit)
}

/// Reduces a URL or path-ish string to a canonical absolute path.
///
/// A leading scheme and `//authority` are dropped without validating them,
/// then the query string and fragment. The path itself is kept byte-for-byte
/// apart from collapsing runs of `/`.
pub fn sanitize_path(text: &str) -> String {
    if text.is_empty() {
        return "/".to_string();
    }

    let path = strip_query_and_fragment(strip_scheme_and_authority(text));
    if path.is_empty() {
        return "/".to_string();
    }

    let rooted = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };

    REPEATED_SLASHES.replace_all(&rooted, "/").into_owned()
}

fn strip_scheme_and_authority(text: &str) -> &str {
    let rest = match SCHEME_PREFIX.find(text) {
        Some(scheme) => &text[scheme.end()..],
        None => text,
    };
    match rest.strip_prefix("//") {
        Some(authority) => {
            let end = authority.find(['/', '?', '#']).unwrap_or(authority.len());
            &authority[end..]
        }
        None => rest,
    }
}

fn strip_query_and_fragment(text: &str) -> &str {
    let end = text.find(['?', '#']).unwrap_or(text.len());
    &text[..end]
}
