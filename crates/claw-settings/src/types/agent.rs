//! Turn loop and compressor settings.

use claw_core::policy::ApprovalMode;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    /// Base system prompt. `None` uses the built-in one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub max_turns: u32,
    pub temperature: f64,
    pub enable_compression: bool,
    pub approval_mode: ApprovalMode,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_turns: 50,
            temperature: 0.7,
            enable_compression: true,
            approval_mode: ApprovalMode::Default,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompressorSettings {
    pub max_messages: usize,
    pub max_tokens: usize,
    pub keep_recent: usize,
    pub chars_per_token: usize,
    pub summary_temperature: f64,
}

impl Default for CompressorSettings {
    fn default() -> Self {
        Self {
            max_messages: 50,
            max_tokens: 10_000,
            keep_recent: 10,
            chars_per_token: 4,
            summary_temperature: 0.3,
        }
    }
}
