use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LOG_FILTER: &str = "cadence=info";
pub const CONFIG_ENV_PREFIX: &str = "CADENCE_";

/// Top-level config (cadence.toml + CADENCE_* env overrides).
///
/// Nested keys use a double underscore in the environment, e.g.
/// `CADENCE_SCHEDULER__TRAILING_INTERVAL_WAIT=false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// What happens to a live execution line when its job id is scheduled again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SupersedePolicy {
    /// Cancel the previous line before the new record replaces it.
    #[default]
    CancelPrevious,
    /// Leave the previous line running detached from the registry.
    KeepRunning,
}

/// Behavioural knobs of the scheduling driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default)]
    pub supersede: SupersedePolicy,
    /// Repeat jobs wait `interval` after their final execution too, so the
    /// job only reaches COMPLETED once that wait has elapsed.
    #[serde(default = "bool_true")]
    pub trailing_interval_wait: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            supersede: SupersedePolicy::default(),
            trailing_interval_wait: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins when set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn bool_true() -> bool {
    true
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

impl CadenceConfig {
    /// Load config from a TOML file with CADENCE_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.cadence/cadence.toml
    ///
    /// A missing file is not an error: defaults fill every absent key.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        tracing::debug!(%path, "loading configuration");

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::CadenceError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::from(Serialized::defaults(CadenceConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(CONFIG_ENV_PREFIX).split("__"))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_file(name: &str, contents: &str) -> String {
        let path = std::env::temp_dir().join(format!(
            "cadence-config-{}-{}.toml",
            name,
            std::process::id()
        ));
        std::fs::write(&path, contents).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn defaults_preserve_trailing_wait_and_cancel_superseded() {
        let config = CadenceConfig::default();
        assert!(config.scheduler.trailing_interval_wait);
        assert_eq!(config.scheduler.supersede, SupersedePolicy::CancelPrevious);
        assert_eq!(config.logging.filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = CadenceConfig::load(Some("/nonexistent/cadence.toml")).unwrap();
        assert_eq!(config.scheduler, SchedulerSettings::default());
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let path = scratch_file(
            "override",
            r#"
            [scheduler]
            supersede = "keep-running"
            trailing_interval_wait = false

            [logging]
            filter = "cadence=debug"
            "#,
        );
        let config = CadenceConfig::load(Some(&path)).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(config.scheduler.supersede, SupersedePolicy::KeepRunning);
        assert!(!config.scheduler.trailing_interval_wait);
        assert_eq!(config.logging.filter, "cadence=debug");
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let path = scratch_file("bad", "[scheduler]\nsupersede = \"sometimes\"\n");
        let err = CadenceConfig::load(Some(&path)).unwrap_err();
        let _ = std::fs::remove_file(&path);

        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
