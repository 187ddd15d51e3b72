//! # claw-settings
//!
//! Layered configuration for the claw agent runtime.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ClawSettings::default()`]
//! 2. **User file**: `~/.claw/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `CLAW_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<ClawSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// Loaded on first call; falls back to compiled defaults if loading fails.
pub fn get_settings() -> &'static ClawSettings {
    SETTINGS.get_or_init(|| match load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            ClawSettings::default()
        }
    })
}

/// Initialize the global settings with a specific value.
///
/// Returns the settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: ClawSettings) -> std::result::Result<(), ClawSettings> {
    SETTINGS.set(settings)
}
