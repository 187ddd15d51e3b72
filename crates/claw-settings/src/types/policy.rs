//! Tool approval settings.

use claw_core::policy::{PolicyDecision, PolicyRule};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicySettings {
    /// Tools that never need approval.
    pub always_allow: Vec<String>,
    /// Tools that are never executed.
    pub always_deny: Vec<String>,
    /// Ordered name rules; first match wins.
    pub rules: Vec<PolicyRule>,
    /// Ask before running calls the risk assessor rates high, even when the
    /// policy would allow them.
    pub escalate_high_risk: bool,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            always_allow: vec!["read_file".into(), "glob".into(), "grep".into()],
            always_deny: Vec::new(),
            rules: vec![
                PolicyRule::new("read_*", PolicyDecision::Allow),
                PolicyRule::new("write_*", PolicyDecision::AskUser),
                PolicyRule::new("delete_*", PolicyDecision::AskUser),
                PolicyRule::new("shell", PolicyDecision::AskUser),
                PolicyRule::new("execute_*", PolicyDecision::AskUser),
            ],
            escalate_high_risk: false,
        }
    }
}
