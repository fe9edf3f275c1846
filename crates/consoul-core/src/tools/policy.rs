use super::analyzer::CommandAnalyzer;
use super::registry::{ToolFilter, ToolRegistry};
use super::tool::RiskLevel;
use super::whitelist::WhitelistManager;
use serde::{Deserialize, Serialize};

/// What a policy says to do about a tool call before the approval
/// coordinator gets involved (§4.3/§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    /// Run it, no prompt.
    Auto,
    /// Ask the approval coordinator.
    Prompt,
    /// Refuse outright — never reaches the coordinator.
    Deny,
}

/// Ordered strict → permissive, per the §4.3 table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PermissionPolicy {
    Strict,
    #[default]
    Balanced,
    Trusting,
    WhitelistOnly,
}

impl PermissionPolicy {
    fn decide(self, risk: RiskLevel) -> ApprovalDecision {
        use ApprovalDecision::*;
        use RiskLevel::*;
        match (self, risk) {
            (_, Blocked) => Deny,
            (PermissionPolicy::WhitelistOnly, _) => Deny,
            (PermissionPolicy::Strict, Safe) => Prompt,
            (PermissionPolicy::Strict, Caution) => Prompt,
            (PermissionPolicy::Strict, Dangerous) => Deny,
            (PermissionPolicy::Balanced, Safe) => Auto,
            (PermissionPolicy::Balanced, Caution) => Prompt,
            (PermissionPolicy::Balanced, Dangerous) => Prompt,
            (PermissionPolicy::Trusting, Safe) => Auto,
            (PermissionPolicy::Trusting, Caution) => Auto,
            (PermissionPolicy::Trusting, Dangerous) => Prompt,
        }
    }
}

/// The outcome of `needs_approval`: whether a prompt is required, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalVerdict {
    pub decision: ApprovalDecision,
    pub effective_risk: RiskLevel,
    pub reason: String,
}

impl ApprovalVerdict {
    pub fn needs_prompt(&self) -> bool {
        self.decision == ApprovalDecision::Prompt
    }

    pub fn is_denied(&self) -> bool {
        self.decision == ApprovalDecision::Deny
    }
}

/// Evaluates the mandatory order from §4.3:
/// 1. Deny if the tool is BLOCKED or filter-denied.
/// 2. Allow without prompt if the whitelist matches.
/// 3. Otherwise consult the policy by effective risk, where effective risk
///    for a shell-style tool is `max(registered risk, analyzer verdict)`.
pub fn needs_approval(
    registry: &ToolRegistry,
    policy: PermissionPolicy,
    whitelist: Option<&WhitelistManager>,
    filter: &ToolFilter,
    analyzer: &CommandAnalyzer,
    tool_name: &str,
    args: &serde_json::Value,
) -> ApprovalVerdict {
    let Some(registration) = registry.registration(tool_name) else {
        return ApprovalVerdict {
            decision: ApprovalDecision::Deny,
            effective_risk: RiskLevel::Blocked,
            reason: format!("unknown tool '{tool_name}'"),
        };
    };

    if registration.risk_level == RiskLevel::Blocked {
        return ApprovalVerdict {
            decision: ApprovalDecision::Deny,
            effective_risk: RiskLevel::Blocked,
            reason: "tool is registered as BLOCKED".to_string(),
        };
    }

    if !matches!(registry.filter_permits(tool_name, filter), Some(true)) {
        return ApprovalVerdict {
            decision: ApprovalDecision::Deny,
            effective_risk: registration.risk_level,
            reason: "denied by session tool filter".to_string(),
        };
    }

    // Effective risk: shell-style tools are re-scored against their concrete
    // arguments by the command analyzer; the max of the two risks wins.
    let command = args.get("command").and_then(|v| v.as_str());
    let effective_risk = match command {
        Some(cmd) => {
            let analyzed = analyzer.analyze(cmd).level;
            registration.risk_level.max(analyzed)
        }
        None => registration.risk_level,
    };

    if effective_risk == RiskLevel::Blocked {
        return ApprovalVerdict {
            decision: ApprovalDecision::Deny,
            effective_risk,
            reason: "command analyzer classified this call as BLOCKED".to_string(),
        };
    }

    if let (Some(wl), Some(cmd)) = (whitelist, command) {
        if wl.is_whitelisted(cmd) {
            return ApprovalVerdict {
                decision: ApprovalDecision::Auto,
                effective_risk,
                reason: "matched whitelist pattern".to_string(),
            };
        }
    }

    if policy == PermissionPolicy::WhitelistOnly {
        return ApprovalVerdict {
            decision: ApprovalDecision::Deny,
            effective_risk,
            reason: "WHITELIST_ONLY policy requires an explicit whitelist match".to_string(),
        };
    }

    let decision = policy.decide(effective_risk);
    let reason = match decision {
        ApprovalDecision::Auto => format!("{policy:?} policy auto-approves {effective_risk:?}"),
        ApprovalDecision::Prompt => format!("{policy:?} policy requires approval for {effective_risk:?}"),
        ApprovalDecision::Deny => format!("{policy:?} policy denies {effective_risk:?}"),
    };

    ApprovalVerdict {
        decision,
        effective_risk,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tool::{RiskLevel, Tool, ToolResult};
    use crate::tools::registry::ToolRegistration;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Bash;

    #[async_trait]
    impl Tool for Bash {
        fn name(&self) -> &str {
            "bash"
        }
        fn description(&self) -> &str {
            "run a shell command"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({})
        }
        async fn call(&self, _args: serde_json::Value) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::ok(""))
        }
    }

    fn registry() -> ToolRegistry {
        let mut r = ToolRegistry::new();
        r.register(ToolRegistration::new(Arc::new(Bash), RiskLevel::Caution));
        r
    }

    #[test]
    fn dangerous_command_overrides_registered_caution() {
        let r = registry();
        let analyzer = CommandAnalyzer::new();
        let verdict = needs_approval(
            &r,
            PermissionPolicy::Balanced,
            None,
            &ToolFilter::default(),
            &analyzer,
            "bash",
            &serde_json::json!({ "command": "rm -rf /" }),
        );
        assert!(verdict.is_denied());
        assert_eq!(verdict.effective_risk, RiskLevel::Blocked);
    }

    #[test]
    fn balanced_policy_prompts_for_caution() {
        let r = registry();
        let analyzer = CommandAnalyzer::new();
        let verdict = needs_approval(
            &r,
            PermissionPolicy::Balanced,
            None,
            &ToolFilter::default(),
            &analyzer,
            "bash",
            &serde_json::json!({ "command": "git status" }),
        );
        assert!(verdict.needs_prompt() || verdict.decision == ApprovalDecision::Auto);
    }

    #[test]
    fn whitelist_literal_never_matches_operator_suffix() {
        let r = registry();
        let analyzer = CommandAnalyzer::new();
        let mut wl = WhitelistManager::new();
        wl.add_literal("git status");
        let verdict = needs_approval(
            &r,
            PermissionPolicy::Balanced,
            Some(&wl),
            &ToolFilter::default(),
            &analyzer,
            "bash",
            &serde_json::json!({ "command": "git status && rm -rf /" }),
        );
        assert!(verdict.is_denied());
    }
}
