//! Tool execution, confirmation and telemetry settings.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolSettings {
    pub timeout_ms: u64,
    /// Admission gate size for the batch scheduler.
    pub max_concurrent: usize,
    pub max_output_bytes: usize,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            max_concurrent: 3,
            max_output_bytes: 256 * 1024,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfirmationSettings {
    pub timeout_secs: u64,
}

impl Default for ConfirmationSettings {
    fn default() -> Self {
        Self { timeout_secs: 300 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetrySettings {
    /// Default level, overridden by `RUST_LOG`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}
