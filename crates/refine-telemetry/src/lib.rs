use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Layer, Registry};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "refine_retrieval" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit one JSON object per event instead of human-readable lines.
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

impl TelemetryConfig {
    /// Build from string levels as they appear in settings files. Unknown
    /// level names fall back to INFO for the default and are dropped for
    /// module overrides.
    pub fn from_strings<'a>(
        level: &str,
        module_levels: impl IntoIterator<Item = (&'a str, &'a str)>,
        json: bool,
    ) -> Self {
        Self {
            log_level: Level::from_str(level).unwrap_or(Level::INFO),
            module_levels: module_levels
                .into_iter()
                .filter_map(|(m, l)| Level::from_str(l).ok().map(|l| (m.to_string(), l)))
                .collect(),
            json,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("subscriber already installed: {0}")]
    AlreadyInitialized(String),
    #[error("filter reload failed: {0}")]
    Reload(String),
}

/// Handle returned by [`init_telemetry`]; keeps the filter reloadable.
pub struct TelemetryGuard {
    default_level: Level,
    level_filter: Arc<RwLock<Vec<(String, Level)>>>,
    reload_handle: reload::Handle<EnvFilter, Registry>,
}

impl TelemetryGuard {
    /// Change the log level for a specific module at runtime. Replaces any
    /// RUST_LOG directives with the configured ones.
    pub fn set_module_level(&self, module: &str, level: Level) -> Result<(), TelemetryError> {
        let directives = {
            let mut levels = self.level_filter.write();
            if let Some(entry) = levels.iter_mut().find(|(m, _)| m == module) {
                entry.1 = level;
            } else {
                levels.push((module.to_string(), level));
            }
            filter_directives(self.default_level, &levels)
        };
        self.reload_handle
            .reload(EnvFilter::new(directives))
            .map_err(|e| TelemetryError::Reload(e.to_string()))
    }

    /// Get current per-module log level overrides.
    pub fn module_levels(&self) -> Vec<(String, Level)> {
        self.level_filter.read().clone()
    }
}

/// Initialize the telemetry subsystem. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let filter_str = filter_directives(config.log_level, &config.module_levels);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));
    let (filter_layer, reload_handle) = reload::Layer::new(env_filter);

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;

    Ok(TelemetryGuard {
        default_level: config.log_level,
        level_filter: Arc::new(RwLock::new(config.module_levels)),
        reload_handle,
    })
}

/// `EnvFilter` directive string: the default level followed by per-module
/// overrides.
pub fn filter_directives(level: Level, module_levels: &[(String, Level)]) -> String {
    let mut filter_str = level.to_string().to_lowercase();
    for (module, level) in module_levels {
        filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter_str
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_include_module_overrides() {
        let s = filter_directives(
            Level::INFO,
            &[("refine_retrieval".into(), Level::DEBUG), ("refine_llm".into(), Level::WARN)],
        );
        assert_eq!(s, "info,refine_retrieval=debug,refine_llm=warn");
    }

    #[test]
    fn from_strings_drops_unknown_levels() {
        let cfg = TelemetryConfig::from_strings(
            "verbose",
            [("refine_engine", "trace"), ("refine_store", "loud")],
            true,
        );
        assert_eq!(cfg.log_level, Level::INFO);
        assert_eq!(cfg.module_levels, vec![("refine_engine".to_string(), Level::TRACE)]);
        assert!(cfg.json);
    }

    #[test]
    fn init_is_single_shot() {
        let guard = init_telemetry(TelemetryConfig::default());
        // Another test binary thread may have installed a subscriber first;
        // either way a second install must fail.
        let second = init_telemetry(TelemetryConfig::default());
        assert!(second.is_err());
        if let Ok(guard) = guard {
            guard.set_module_level("refine_engine", Level::DEBUG).unwrap();
            guard.set_module_level("refine_engine", Level::TRACE).unwrap();
            assert_eq!(guard.module_levels(), vec![("refine_engine".to_string(), Level::TRACE)]);
        }
    }
}
