use std::collections::HashSet;

use claw_core::policy::{ApprovalMode, PolicyDecision, PolicyRule};
use claw_core::tools::{ToolArguments, ToolCategory};
use claw_settings::PolicySettings;
use serde_json::Value;

/// Decides whether a tool call may run.
///
/// Precedence, highest first:
/// 1. `Unrestricted` mode allows everything.
/// 2. `ReadOnly` mode denies mutating categories and allows the rest.
/// 3. `Plan` mode allows read/search/think and asks for everything else.
/// 4. `Default` mode: exact deny set, exact allow set, name rules (first match
///    wins), then ask for mutating categories and allow the rest.
#[derive(Clone, Debug, Default)]
pub struct PolicyEngine {
    mode: ApprovalMode,
    always_allow: HashSet<String>,
    always_deny: HashSet<String>,
    rules: Vec<PolicyRule>,
}

impl PolicyEngine {
    /// Engine with no allow/deny sets and no rules.
    pub fn new(mode: ApprovalMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Engine with the stock allow set and name rules.
    pub fn with_default_rules(mode: ApprovalMode) -> Self {
        Self::from_settings(&PolicySettings::default(), mode)
    }

    pub fn from_settings(settings: &PolicySettings, mode: ApprovalMode) -> Self {
        Self {
            mode,
            always_allow: settings.always_allow.iter().cloned().collect(),
            always_deny: settings.always_deny.iter().cloned().collect(),
            rules: settings.rules.clone(),
        }
    }

    pub fn mode(&self) -> ApprovalMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ApprovalMode) {
        self.mode = mode;
    }

    pub fn add_always_allow(&mut self, tool_name: impl Into<String>) {
        self.always_allow.insert(tool_name.into());
    }

    pub fn add_always_deny(&mut self, tool_name: impl Into<String>) {
        self.always_deny.insert(tool_name.into());
    }

    /// Append a rule. Earlier rules win.
    pub fn add_rule(&mut self, rule: PolicyRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    /// Decide under the engine's current mode.
    pub fn check(&self, tool_name: &str, category: ToolCategory, arguments: &ToolArguments) -> PolicyDecision {
        self.decide(tool_name, category, arguments, self.mode)
    }

    /// Pure decision function. Arguments are part of the contract but no
    /// built-in rule inspects them.
    pub fn decide(
        &self,
        tool_name: &str,
        category: ToolCategory,
        _arguments: &ToolArguments,
        mode: ApprovalMode,
    ) -> PolicyDecision {
        match mode {
            ApprovalMode::Unrestricted => return PolicyDecision::Allow,
            ApprovalMode::ReadOnly => {
                return if category != ToolCategory::Read && category.is_mutating() {
                    PolicyDecision::Deny
                } else {
                    PolicyDecision::Allow
                };
            }
            ApprovalMode::Plan => {
                return match category {
                    ToolCategory::Read | ToolCategory::Search | ToolCategory::Think => {
                        PolicyDecision::Allow
                    }
                    _ => PolicyDecision::AskUser,
                };
            }
            ApprovalMode::Default => {}
        }

        if self.always_deny.contains(tool_name) {
            return PolicyDecision::Deny;
        }
        if self.always_allow.contains(tool_name) {
            return PolicyDecision::Allow;
        }
        if let Some(rule) = self.rules.iter().find(|r| r.matches(tool_name)) {
            return rule.decision;
        }
        if category.is_mutating() {
            PolicyDecision::AskUser
        } else {
            PolicyDecision::Allow
        }
    }

    /// Human-readable approval prompt. Deterministic: arguments are listed in
    /// key order, string values unquoted.
    pub fn confirmation_prompt(
        tool_name: &str,
        arguments: &ToolArguments,
        affected_locations: &[String],
    ) -> String {
        let mut lines = vec![
            "**Tool Execution Request**".to_string(),
            String::new(),
            format!("**Tool:** `{tool_name}`"),
            "**Arguments:**".to_string(),
        ];

        let mut keys: Vec<&String> = arguments.keys().collect();
        keys.sort();
        if keys.is_empty() {
            lines.push("  (none)".to_string());
        }
        for key in keys {
            let value = match &arguments[key.as_str()] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            lines.push(format!("  - {key}: `{value}`"));
        }

        if !affected_locations.is_empty() {
            lines.push(String::new());
            lines.push("**Affected Locations:**".to_string());
            for loc in affected_locations {
                lines.push(format!("  - {loc}"));
            }
        }

        lines.push(String::new());
        lines.push("Do you want to proceed?".to_string());
        lines.join("\n")
    }
}
