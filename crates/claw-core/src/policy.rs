use std::fmt;

use serde::{Deserialize, Serialize};

/// How much the agent may do without asking.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    #[default]
    Default,
    Plan,
    #[serde(alias = "yolo")]
    Unrestricted,
    #[serde(alias = "readonly")]
    ReadOnly,
}

impl ApprovalMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Plan => "plan",
            Self::Unrestricted => "unrestricted",
            Self::ReadOnly => "read_only",
        }
    }
}

impl fmt::Display for ApprovalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    Allow,
    Deny,
    AskUser,
}

impl PolicyDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::AskUser => "ask_user",
        }
    }
}

/// Name rule. A pattern ending in `*` matches by prefix, anything else must
/// match exactly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub pattern: String,
    pub decision: PolicyDecision,
}

impl PolicyRule {
    pub fn new(pattern: impl Into<String>, decision: PolicyDecision) -> Self {
        Self {
            pattern: pattern.into(),
            decision,
        }
    }

    pub fn matches(&self, tool_name: &str) -> bool {
        match self.pattern.strip_suffix('*') {
            Some(prefix) => tool_name.starts_with(prefix),
            None => self.pattern == tool_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yolo_alias() {
        let mode: ApprovalMode = serde_json::from_str(r#""yolo""#).unwrap();
        assert_eq!(mode, ApprovalMode::Unrestricted);
        let mode: ApprovalMode = serde_json::from_str(r#""read_only""#).unwrap();
        assert_eq!(mode, ApprovalMode::ReadOnly);
        assert_eq!(ApprovalMode::default(), ApprovalMode::Default);
    }

    #[test]
    fn rule_prefix_and_exact() {
        let prefix = PolicyRule::new("write_*", PolicyDecision::AskUser);
        assert!(prefix.matches("write_file"));
        assert!(prefix.matches("write_"));
        assert!(!prefix.matches("rewrite_file"));

        let exact = PolicyRule::new("shell", PolicyDecision::AskUser);
        assert!(exact.matches("shell"));
        assert!(!exact.matches("shell_exec"));

        let all = PolicyRule::new("*", PolicyDecision::Deny);
        assert!(all.matches("anything"));
    }

    #[test]
    fn decision_serde() {
        assert_eq!(
            serde_json::to_string(&PolicyDecision::AskUser).unwrap(),
            r#""ask_user""#
        );
    }
}
