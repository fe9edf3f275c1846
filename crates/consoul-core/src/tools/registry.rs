use super::tool::{RiskLevel, Tool, ToolCategory, ToolDef};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A catalog entry: the callable `Tool` plus the metadata the approval
/// pipeline (§4.3) needs — risk level, categories, enabled/tags.
#[derive(Clone)]
pub struct ToolRegistration {
    pub tool: Arc<dyn Tool>,
    pub risk_level: RiskLevel,
    pub categories: HashSet<ToolCategory>,
    pub enabled: bool,
    pub tags: Vec<String>,
}

impl ToolRegistration {
    pub fn new(tool: Arc<dyn Tool>, risk_level: RiskLevel) -> Self {
        Self {
            tool,
            risk_level,
            categories: HashSet::new(),
            enabled: true,
            tags: Vec::new(),
        }
    }

    pub fn with_categories(mut self, categories: impl IntoIterator<Item = ToolCategory>) -> Self {
        self.categories = categories.into_iter().collect();
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Session-scoped view into the registry. Precedence: `deny` beats
/// everything; `allow` is a whitelist (unmentioned tools rejected); then the
/// risk ceiling; then the category set. `allow` and `deny` overlapping is a
/// caller-visible warning condition — `deny` wins (§4.3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolFilter {
    pub allow: Option<HashSet<String>>,
    pub deny: HashSet<String>,
    pub risk_level_max: Option<RiskLevel>,
    pub categories: Option<HashSet<ToolCategory>>,
}

impl ToolFilter {
    /// Returns `(permitted, overlap_warning)` — `overlap_warning` is set when
    /// the tool appears in both `allow` and `deny`.
    fn permits(&self, name: &str, risk: RiskLevel, categories: &HashSet<ToolCategory>) -> (bool, bool) {
        let in_allow = self.allow.as_ref().is_some_and(|a| a.contains(name));
        let in_deny = self.deny.contains(name);
        let overlap = in_allow && in_deny;

        if in_deny {
            return (false, overlap);
        }
        if let Some(allow) = &self.allow {
            if !allow.contains(name) {
                return (false, overlap);
            }
        }
        if let Some(max) = self.risk_level_max {
            if risk > max {
                return (false, overlap);
            }
        }
        if let Some(cats) = &self.categories {
            if !categories.is_empty() && cats.is_disjoint(categories) {
                return (false, overlap);
            }
        }
        (true, overlap)
    }
}

/// Process-wide, read-mostly catalog of tools. Registration/deregistration
/// is the only mutating path and is expected to be rare (§5: "writes require
/// a registry lock" — callers wrap a `ToolRegistry` in a `RwLock` at the
/// point it is shared across tasks).
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolRegistration>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, registration: ToolRegistration) {
        let name = registration.tool.name().to_string();
        self.tools.insert(name, registration);
    }

    pub fn deregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|r| r.tool.clone())
    }

    pub fn registration(&self, name: &str) -> Option<&ToolRegistration> {
        self.tools.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tool definitions visible to a provider after applying `filter`, in
    /// deterministic (sorted-by-name) order.
    pub fn tool_defs(&self, filter: &ToolFilter) -> Vec<ToolDef> {
        let mut defs: Vec<ToolDef> = self
            .tools
            .values()
            .filter(|r| r.enabled && r.risk_level != RiskLevel::Blocked)
            .filter(|r| filter.permits(r.tool.name(), r.risk_level, &r.categories).0)
            .map(|r| ToolDef {
                name: r.tool.name().to_string(),
                description: r.tool.description().to_string(),
                parameters: r.tool.parameters(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Whether `name` passes `filter`, independent of the `enabled` flag —
    /// used by `needs_approval` which must still reason about disabled or
    /// BLOCKED tools to produce a denial rather than silently dropping them.
    pub fn filter_permits(&self, name: &str, filter: &ToolFilter) -> Option<bool> {
        let reg = self.tools.get(name)?;
        Some(filter.permits(name, reg.risk_level, &reg.categories).0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tool::ToolResult;
    use async_trait::async_trait;

    struct Stub(&'static str);

    #[async_trait]
    impl Tool for Stub {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "stub"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({})
        }
        async fn call(&self, _args: serde_json::Value) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::ok(""))
        }
    }

    #[test]
    fn deny_beats_allow() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolRegistration::new(Arc::new(Stub("bash")), RiskLevel::Caution));

        let filter = ToolFilter {
            allow: Some(["bash".to_string()].into_iter().collect()),
            deny: ["bash".to_string()].into_iter().collect(),
            ..Default::default()
        };

        assert_eq!(registry.filter_permits("bash", &filter), Some(false));
    }

    #[test]
    fn risk_ceiling_excludes_dangerous_tools() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolRegistration::new(Arc::new(Stub("rm")), RiskLevel::Dangerous));

        let filter = ToolFilter {
            risk_level_max: Some(RiskLevel::Caution),
            ..Default::default()
        };

        assert_eq!(registry.filter_permits("rm", &filter), Some(false));
    }

    #[test]
    fn blocked_tools_never_appear_in_defs() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolRegistration::new(Arc::new(Stub("sudo")), RiskLevel::Blocked));
        let defs = registry.tool_defs(&ToolFilter::default());
        assert!(defs.is_empty());
    }
}
