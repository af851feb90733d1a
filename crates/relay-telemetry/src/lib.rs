use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Telemetry configuration. RUST_LOG overrides the configured level.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    pub log_level: Level,
    /// Per-module level overrides (e.g. "relay_proxy" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

/// Initialize the tracing subscriber. Call once at startup from the
/// binary; library crates only emit events.
pub fn init_telemetry(config: TelemetryConfig) {
    let mut filter = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        filter.push_str(&format!(",{module}={}", level.to_string().to_lowercase()));
    }
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter));

    if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.log_level, Level::INFO);
        assert!(config.module_levels.is_empty());
        assert!(!config.json);
    }

    #[test]
    fn init_is_idempotent() {
        init_telemetry(TelemetryConfig::default());
        // A second init must not panic even though a subscriber exists.
        init_telemetry(TelemetryConfig {
            log_level: Level::DEBUG,
            module_levels: vec![("relay_store".into(), Level::WARN)],
            json: true,
        });
    }
}
