//! PII redaction
//!
//! Replaces PII-shaped substrings with fixed sentinel tokens before audit
//! persistence. Redaction is heuristic and pattern-based; it is not a
//! guarantee of completeness (a documented limitation, not a bug). It is
//! total: no input value can make it fail, and unsupported scalar types
//! pass through unchanged.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Pattern passes applied in a fixed order: email, then phone, then
/// card-number-shaped sequences.
static PII_PATTERNS: Lazy<[(Regex, &'static str); 3]> = Lazy::new(|| {
    [
        (
            Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap(),
            "[EMAIL_REDACTED]",
        ),
        (
            Regex::new(r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b").unwrap(),
            "[PHONE_REDACTED]",
        ),
        (
            Regex::new(r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b").unwrap(),
            "[CARD_REDACTED]",
        ),
    ]
});

/// Redact PII-shaped substrings from text.
pub fn redact(text: &str) -> String {
    let mut result = text.to_string();
    for (pattern, replacement) in PII_PATTERNS.iter() {
        result = pattern.replace_all(&result, *replacement).into_owned();
    }
    result
}

/// Recursively redact a JSON value, returning a new value.
///
/// Strings are redacted, object values are recursed (keys untouched),
/// array elements are recursed, all other scalars are cloned unchanged.
/// The input is never mutated; the raw structure stays intact for the
/// non-redacted audit fields.
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(redact(s)),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), redact_value(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_redact_email() {
        let out = redact("contact me at a@b.com");
        assert!(out.contains("[EMAIL_REDACTED]"));
        assert!(!out.contains("a@b.com"));
    }

    #[test]
    fn test_redact_phone() {
        assert_eq!(redact("call 555-123-4567"), "call [PHONE_REDACTED]");
        assert_eq!(redact("call 555.123.4567"), "call [PHONE_REDACTED]");
    }

    #[test]
    fn test_redact_card() {
        assert_eq!(
            redact("card 4111 1111 1111 1111 on file"),
            "card [CARD_REDACTED] on file"
        );
    }

    #[test]
    fn test_redact_leaves_clean_text_alone() {
        assert_eq!(redact("revenue by region for Q3"), "revenue by region for Q3");
    }

    #[test]
    fn test_redact_value_nested() {
        let raw = json!({
            "k": "call 555-123-4567",
            "nested": {"email": "a@b.com", "count": 3},
            "list": ["x@y.org", 42, true],
        });

        let redacted = redact_value(&raw);

        assert_eq!(
            redacted,
            json!({
                "k": "call [PHONE_REDACTED]",
                "nested": {"email": "[EMAIL_REDACTED]", "count": 3},
                "list": ["[EMAIL_REDACTED]", 42, true],
            })
        );
        // The input structure must remain untouched.
        assert_eq!(raw["k"], "call 555-123-4567");
    }

    #[test]
    fn test_redact_value_keys_untouched() {
        let raw = json!({"a@b.com": "a@b.com"});
        let redacted = redact_value(&raw);
        assert_eq!(redacted, json!({"a@b.com": "[EMAIL_REDACTED]"}));
    }

    #[test]
    fn test_redact_value_scalars_pass_through() {
        assert_eq!(redact_value(&json!(null)), json!(null));
        assert_eq!(redact_value(&json!(12.5)), json!(12.5));
        assert_eq!(redact_value(&json!(false)), json!(false));
    }
}
