//! Sensitive data scrubbing
//!
//! Every error message, metadata value and log field that leaves the core
//! goes through [`sanitize_string`] exactly once. The rewrite is pure and
//! idempotent: markers produced by one pass never match any pattern again.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Marker substituted for credential material.
pub const REDACTED: &str = "[REDACTED]";

/// Marker substituted for a user home directory prefix.
pub const HOME_MARKER: &str = "~";

/// Home directory of the current user, matched literally.
static CURRENT_HOME: Lazy<Option<Regex>> = Lazy::new(|| {
    let home = dirs::home_dir()?;
    let home = home.to_str()?.trim_end_matches(['/', '\\']);
    // "/" or an empty home would swallow every absolute path
    if home.len() <= 1 {
        return None;
    }
    Regex::new(&format!(r"{}\b", regex::escape(home))).ok()
});

/// Well-known home directory layouts
static HOME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // Unix
        Regex::new(r"/home/[A-Za-z0-9_.-]+").unwrap(),
        // macOS
        Regex::new(r"/Users/[A-Za-z0-9_.-]+").unwrap(),
        // Windows
        Regex::new(r"(?i)[A-Z]:\\Users\\[A-Za-z0-9_.-]+").unwrap(),
    ]
});

/// Credential patterns; capture group 1 is the prefix that stays visible.
static CREDENTIAL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // Anthropic / OpenAI style API keys
        Regex::new(r"\b(sk-ant-|sk-)[A-Za-z0-9_-]{16,}").unwrap(),
        // AWS access key ids
        Regex::new(r"\b(AKIA)[A-Z0-9]{16}\b").unwrap(),
        // Authorization headers
        Regex::new(r"(?i)\b(bearer\s+)[A-Za-z0-9._~+/-]{8,}=*").unwrap(),
    ]
});

/// `key=value` / `key: value` secrets; the whole value is replaced.
static KEY_VALUE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\b(api[_-]?key|access[_-]?token|auth[_-]?token|token|secret|password|passwd)\s*[:=]\s*[^\s,;"']+"#,
    )
    .unwrap()
});

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap()
});

/// Field names whose values are always redacted wholesale
const SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "secret",
    "token",
    "api_key",
    "apikey",
    "auth",
    "credential",
    "authorization",
];

/// Scrub credentials, e-mail addresses and home paths from a string.
///
/// Never fails; input without any match is returned unchanged.
pub fn sanitize_string(s: &str) -> String {
    let mut result = match CURRENT_HOME.as_ref() {
        Some(home) => home.replace_all(s, HOME_MARKER).into_owned(),
        None => s.to_string(),
    };

    for pattern in HOME_PATTERNS.iter() {
        result = pattern.replace_all(&result, HOME_MARKER).into_owned();
    }

    for pattern in CREDENTIAL_PATTERNS.iter() {
        result = pattern
            .replace_all(&result, format!("${{1}}{}", REDACTED).as_str())
            .into_owned();
    }

    result = KEY_VALUE_PATTERN
        .replace_all(&result, format!("${{1}}={}", REDACTED).as_str())
        .into_owned();

    EMAIL_PATTERN.replace_all(&result, REDACTED).into_owned()
}

/// Check whether a field name denotes secret material
pub fn is_sensitive_field(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_FIELDS.iter().any(|f| lower.contains(f))
}

/// Recursively scrub a JSON value
pub fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_string(s)),
        Value::Array(arr) => Value::Array(arr.iter().map(sanitize_value).collect()),
        Value::Object(obj) => {
            let mut result = serde_json::Map::new();
            for (key, val) in obj {
                if is_sensitive_field(key) {
                    result.insert(key.clone(), Value::String(REDACTED.to_string()));
                } else {
                    result.insert(key.clone(), sanitize_value(val));
                }
            }
            Value::Object(result)
        }
        other => other.clone(),
    }
}

/// Scrub an ordered string map, keeping key order
pub fn sanitize_map(map: &IndexMap<String, String>) -> IndexMap<String, String> {
    map.iter()
        .map(|(k, v)| {
            if is_sensitive_field(k) {
                (k.clone(), REDACTED.to_string())
            } else {
                (k.clone(), sanitize_string(v))
            }
        })
        .collect()
}
