use std::fmt;

/// Short opaque token carried per in-flight request and propagated into
/// every audit event and log line (§3). Preserved if the client supplied
/// one; otherwise minted as `req-<12 hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn generate() -> Self {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("req-{}", &hex[..12]))
    }

    /// Wraps a client-supplied value verbatim — never re-derived, so
    /// traces from upstream services stay intact end to end.
    pub fn from_header(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_have_the_req_prefix_and_length() {
        let id = CorrelationId::generate();
        assert!(id.as_str().starts_with("req-"));
        assert_eq!(id.as_str().len(), "req-".len() + 12);
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(CorrelationId::generate(), CorrelationId::generate());
    }

    #[test]
    fn supplied_header_value_is_preserved_verbatim() {
        let id = CorrelationId::from_header("client-supplied-123");
        assert_eq!(id.as_str(), "client-supplied-123");
    }
}
