//! Settings type definitions.
//!
//! Every struct uses `#[serde(rename_all = "camelCase", default)]` so a user
//! file may specify any subset of fields.

mod agent;
mod policy;
mod runtime;

pub use agent::{AgentSettings, CompressorSettings};
pub use policy::PolicySettings;
pub use runtime::{ConfirmationSettings, TelemetrySettings, ToolSettings};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object, mirrors `~/.claw/settings.json`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClawSettings {
    pub agent: AgentSettings,
    pub compressor: CompressorSettings,
    pub tools: ToolSettings,
    pub confirmation: ConfirmationSettings,
    pub policy: PolicySettings,
    pub telemetry: TelemetrySettings,
}

impl ClawSettings {
    /// Reject combinations the runtime cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.agent.max_turns == 0 {
            return Err(SettingsError::InvalidValue("agent.maxTurns must be at least 1".into()));
        }
        if !(0.0..=2.0).contains(&self.agent.temperature) {
            return Err(SettingsError::InvalidValue(format!(
                "agent.temperature {} outside 0.0..=2.0",
                self.agent.temperature
            )));
        }
        if self.compressor.chars_per_token == 0 {
            return Err(SettingsError::InvalidValue(
                "compressor.charsPerToken must be at least 1".into(),
            ));
        }
        if self.compressor.keep_recent >= self.compressor.max_messages {
            return Err(SettingsError::InvalidValue(format!(
                "compressor.keepRecent ({}) must be below compressor.maxMessages ({})",
                self.compressor.keep_recent, self.compressor.max_messages
            )));
        }
        if self.tools.max_concurrent == 0 {
            return Err(SettingsError::InvalidValue("tools.maxConcurrent must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ClawSettings::default().validate().unwrap();
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(ClawSettings::default()).unwrap();
        assert_eq!(json["agent"]["maxTurns"], 50);
        assert_eq!(json["compressor"]["keepRecent"], 10);
        assert_eq!(json["tools"]["maxConcurrent"], 3);
        assert_eq!(json["confirmation"]["timeoutSecs"], 300);
        assert_eq!(json["policy"]["alwaysAllow"][0], "read_file");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: ClawSettings =
            serde_json::from_str(r#"{"agent": {"maxTurns": 5}}"#).unwrap();
        assert_eq!(settings.agent.max_turns, 5);
        assert!(settings.agent.enable_compression);
        assert_eq!(settings.compressor.max_messages, 50);
    }

    #[test]
    fn keep_recent_must_fit() {
        let mut settings = ClawSettings::default();
        settings.compressor.keep_recent = 50;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("keepRecent"));
    }

    #[test]
    fn zero_concurrency_rejected() {
        let mut settings = ClawSettings::default();
        settings.tools.max_concurrent = 0;
        assert!(matches!(settings.validate(), Err(SettingsError::InvalidValue(_))));
    }
}
