mod metrics;

pub use metrics::{HistogramSummary, MetricSample, MetricType, MetricsRecorder};

use std::str::FromStr;
use std::sync::Arc;

use claw_settings::TelemetrySettings;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "claw_engine" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines instead of human-readable output.
    pub json: bool,
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
            metrics_enabled: true,
        }
    }
}

impl TelemetryConfig {
    /// Unknown level names fall back to INFO.
    pub fn from_settings(settings: &TelemetrySettings) -> Self {
        Self {
            log_level: Level::from_str(&settings.level).unwrap_or(Level::INFO),
            json: settings.json,
            ..Self::default()
        }
    }

    /// Filter directives in `EnvFilter` syntax.
    pub fn filter_directives(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter
    }
}

/// Handle returned by [`init_telemetry`]. Owns the metrics recorder.
pub struct TelemetryGuard {
    metrics_recorder: Option<Arc<MetricsRecorder>>,
}

impl TelemetryGuard {
    /// Shared handle for components that record metrics.
    pub fn metrics(&self) -> Option<Arc<MetricsRecorder>> {
        self.metrics_recorder.clone()
    }
}

/// Install the global tracing subscriber. Call once at startup; a second call
/// leaves the first subscriber in place.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };

    if let Err(e) = tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()
    {
        tracing::debug!(error = %e, "tracing subscriber already installed");
    }

    TelemetryGuard {
        metrics_recorder: config
            .metrics_enabled
            .then(|| Arc::new(MetricsRecorder::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_include_module_levels() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![("claw_engine".into(), Level::DEBUG)],
            ..TelemetryConfig::default()
        };
        assert_eq!(config.filter_directives(), "warn,claw_engine=debug");
    }

    #[test]
    fn from_settings_parses_level() {
        let settings = TelemetrySettings {
            level: "debug".into(),
            json: true,
        };
        let config = TelemetryConfig::from_settings(&settings);
        assert_eq!(config.log_level, Level::DEBUG);
        assert!(config.json);

        let bad = TelemetrySettings {
            level: "loud".into(),
            json: false,
        };
        assert_eq!(TelemetryConfig::from_settings(&bad).log_level, Level::INFO);
    }

    #[test]
    fn init_twice_does_not_panic() {
        let first = init_telemetry(TelemetryConfig::default());
        let second = init_telemetry(TelemetryConfig {
            metrics_enabled: false,
            ..TelemetryConfig::default()
        });
        assert!(first.metrics().is_some());
        assert!(second.metrics().is_none());
    }
}
