use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;

const REDACTED: &str = "[REDACTED]";
const TRUNCATED_SUFFIX: &str = "...[TRUNCATED]";
const DEFAULT_MAX_LENGTH: usize = 1000;

/// Field names whose values are always replaced wholesale, regardless of
/// content (§4.10). Matched case-insensitively.
fn default_fields() -> HashSet<String> {
    [
        "password",
        "passwd",
        "api_key",
        "apikey",
        "token",
        "secret",
        "access_token",
        "refresh_token",
        "authorization",
        "private_key",
        "client_secret",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// A compiled `(kind, pattern)` pair; values matching `pattern` are replaced
/// with `[REDACTED-<KIND>]` rather than the raw field-name replacement.
struct CompiledPattern {
    kind: &'static str,
    regex: Regex,
}

fn default_patterns() -> Vec<CompiledPattern> {
    let specs: &[(&str, &str)] = &[
        ("JWT", r"\beyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\b"),
        ("ANTHROPIC-KEY", r"\bsk-ant-[A-Za-z0-9_-]{20,}\b"),
        ("OPENAI-KEY", r"\bsk-[A-Za-z0-9]{20,}\b"),
        ("GITHUB-TOKEN", r"\bgh[pousr]_[A-Za-z0-9]{20,}\b"),
        ("SSN", r"\b\d{3}-\d{2}-\d{4}\b"),
        ("CREDIT-CARD", r"\b\d{4}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}\b"),
        ("EMAIL", r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b"),
        ("PHONE", r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b"),
    ];
    specs
        .iter()
        .filter_map(|(kind, pattern)| match Regex::new(pattern) {
            Ok(regex) => Some(CompiledPattern { kind, regex }),
            Err(e) => {
                tracing::warn!(pattern = pattern, error = %e, "dropping invalid built-in redaction pattern");
                None
            }
        })
        .collect()
}

/// Configuration for a `Redactor`: which field names are redacted wholesale,
/// whether pattern-based scanning is enabled, and the string-truncation
/// ceiling (§4.10).
pub struct RedactionConfig {
    pub fields: HashSet<String>,
    pub pattern_scanning: bool,
    pub max_length: usize,
    pub extra_patterns: Vec<(String, String)>,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            fields: default_fields(),
            pattern_scanning: true,
            max_length: DEFAULT_MAX_LENGTH,
            extra_patterns: Vec::new(),
        }
    }
}

impl RedactionConfig {
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.fields.extend(fields.into_iter().map(|f| f.into().to_lowercase()));
        self
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    /// Adds a caller-supplied `(kind, regex)` pattern. Invalid regexes are
    /// dropped with a warning at `Redactor::new` time, not here, so callers
    /// never have to handle a `Result` for this.
    pub fn with_pattern(mut self, kind: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.extra_patterns.push((kind.into(), pattern.into()));
        self
    }
}

/// Recursively strips PII and secrets from `serde_json::Value` trees before
/// they're serialized into an audit event or log line (§4.10). Redaction is
/// one-way: nothing decodes or re-emits the original value, so a redacted
/// payload can never resurrect a secret.
pub struct Redactor {
    fields: HashSet<String>,
    patterns: Vec<CompiledPattern>,
    max_length: usize,
}

impl Redactor {
    pub fn new(config: RedactionConfig) -> Self {
        let mut patterns = if config.pattern_scanning { default_patterns() } else { Vec::new() };
        if config.pattern_scanning {
            for (kind, pattern) in &config.extra_patterns {
                match Regex::new(pattern) {
                    Ok(regex) => patterns.push(CompiledPattern { kind: Box::leak(kind.clone().into_boxed_str()), regex }),
                    Err(e) => tracing::warn!(pattern = %pattern, error = %e, "dropping invalid custom redaction pattern"),
                }
            }
        }
        Self {
            fields: config.fields.into_iter().map(|f| f.to_lowercase()).collect(),
            patterns,
            max_length: config.max_length,
        }
    }

    pub fn disabled() -> Self {
        Self { fields: HashSet::new(), patterns: Vec::new(), max_length: usize::MAX }
    }

    /// Redacts a single string: pattern substitution, then length
    /// truncation. Order matters — truncating first could cut a pattern in
    /// half and leave half a secret visible.
    pub fn redact_string(&self, input: &str) -> String {
        let mut out = input.to_string();
        for p in &self.patterns {
            if p.regex.is_match(&out) {
                let replacement = format!("[REDACTED-{}]", p.kind);
                out = p.regex.replace_all(&out, replacement.as_str()).into_owned();
            }
        }
        if out.chars().count() > self.max_length {
            let truncated: String = out.chars().take(self.max_length).collect();
            out = format!("{truncated}{TRUNCATED_SUFFIX}");
        }
        out
    }

    /// Recursively redacts a JSON value in place: object keys matching a
    /// configured field name are replaced wholesale (including inside lists
    /// of objects); every remaining string is pattern-scanned and
    /// truncated. Redacting a value twice is a no-op beyond the first pass
    /// (monotonic — §8).
    pub fn redact_value(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    if self.fields.contains(&k.to_lowercase()) {
                        out.insert(k.clone(), Value::String(REDACTED.to_string()));
                    } else {
                        out.insert(k.clone(), self.redact_value(v));
                    }
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact_value(v)).collect()),
            Value::String(s) => Value::String(self.redact_string(s)),
            other => other.clone(),
        }
    }
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new(RedactionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_names_are_redacted_recursively_including_inside_lists() {
        let redactor = Redactor::default();
        let input = json!({
            "user": "alice",
            "credentials": [{ "api_key": "sk-abcdefghijklmnopqrstuvwxyz" }],
        });
        let out = redactor.redact_value(&input);
        assert_eq!(out["credentials"][0]["api_key"], json!("[REDACTED]"));
        assert_eq!(out["user"], json!("alice"));
    }

    #[test]
    fn openai_style_key_in_free_text_is_pattern_redacted() {
        let redactor = Redactor::default();
        let out = redactor.redact_string("here is my key sk-abcdefghijklmnopqrstuvwxyz123");
        assert!(out.contains("[REDACTED-OPENAI-KEY]"));
        assert!(!out.contains("sk-abcdefghijklmnopqrstuvwxyz123"));
    }

    #[test]
    fn ssn_pattern_is_redacted() {
        let redactor = Redactor::default();
        let out = redactor.redact_string("ssn is 123-45-6789 on file");
        assert_eq!(out, "ssn is [REDACTED-SSN] on file");
    }

    #[test]
    fn long_strings_are_truncated_with_suffix() {
        let redactor = Redactor::new(RedactionConfig::default().with_max_length(10));
        let out = redactor.redact_string(&"a".repeat(50));
        assert!(out.ends_with("...[TRUNCATED]"));
        assert_eq!(out.len(), 10 + "...[TRUNCATED]".len());
    }

    #[test]
    fn redaction_is_monotonic() {
        let redactor = Redactor::default();
        let input = json!({ "password": "hunter2", "text": "email me at a@b.com" });
        let once = redactor.redact_value(&input);
        let twice = redactor.redact_value(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn invalid_custom_pattern_is_dropped_not_fatal() {
        let redactor = Redactor::new(RedactionConfig::default().with_pattern("BAD", "("));
        // Must not panic; built-in patterns still work.
        let out = redactor.redact_string("123-45-6789");
        assert!(out.contains("[REDACTED-SSN]"));
    }

    #[test]
    fn disabled_redactor_passes_values_through() {
        let redactor = Redactor::disabled();
        let input = json!({ "password": "hunter2" });
        assert_eq!(redactor.redact_value(&input), input);
    }
}
