//! Environment variable configuration
//!
//! Provides environment variable overrides for runner options.

#![allow(dead_code)]

use std::env;

/// Environment variable prefix
const ENV_PREFIX: &str = "CANOPY";

/// Runner overrides read from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Include patterns from CANOPY_FILTER
    pub filter: Option<String>,
    /// Exclude patterns from CANOPY_EXCLUDE
    pub exclude: Option<String>,
    /// Concurrent default from CANOPY_CONCURRENT
    pub concurrent: Option<bool>,
    /// Fail-fast threshold from CANOPY_FAIL_FAST
    pub fail_fast: Option<usize>,
    /// Log level from CANOPY_LOG_LEVEL
    pub log_level: Option<String>,
    /// Profile name from CANOPY_PROFILE
    pub profile: Option<String>,
    /// Config file path from CANOPY_CONFIG
    pub config_file: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            filter: get_env("FILTER"),
            exclude: get_env("EXCLUDE"),
            concurrent: get_env_bool("CONCURRENT"),
            fail_fast: get_env_parse("FAIL_FAST"),
            log_level: get_env("LOG_LEVEL"),
            profile: get_env("PROFILE"),
            config_file: get_env("CONFIG"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.filter.is_some()
            || self.exclude.is_some()
            || self.concurrent.is_some()
            || self.fail_fast.is_some()
            || self.log_level.is_some()
            || self.profile.is_some()
            || self.config_file.is_some()
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Builder for setting environment variables (useful for testing)
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

impl EnvBuilder {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_FILTER"), filter.into()));
        self
    }

    pub fn exclude(mut self, exclude: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_EXCLUDE"), exclude.into()));
        self
    }

    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.vars
            .push((format!("{ENV_PREFIX}_CONCURRENT"), concurrent.to_string()));
        self
    }

    pub fn fail_fast(mut self, threshold: usize) -> Self {
        self.vars
            .push((format!("{ENV_PREFIX}_FAIL_FAST"), threshold.to_string()));
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.vars
            .push((format!("{ENV_PREFIX}_LOG_LEVEL"), level.into()));
        self
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_PROFILE"), profile.into()));
        self
    }

    /// Apply environment variables
    pub fn apply(self) {
        for (key, value) in self.vars {
            env::set_var(key, value);
        }
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        self.apply();

        EnvGuard { previous }
    }
}

impl Default for EnvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that restores environment variables on drop
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_config_default() {
        let config = EnvConfig::default();
        assert!(config.filter.is_none());
        assert!(!config.has_any());
    }

    #[test]
    fn test_env_builder() {
        let _guard = EnvBuilder::new()
            .filter("suite1|*")
            .concurrent(true)
            .fail_fast(5)
            .apply_scoped();

        let config = EnvConfig::load();
        assert_eq!(config.filter, Some("suite1|*".to_string()));
        assert_eq!(config.concurrent, Some(true));
        assert_eq!(config.fail_fast, Some(5));
        assert!(config.has_any());
    }

    #[test]
    fn test_env_bool_parsing() {
        let _guard = EnvBuilder::new().concurrent(false).apply_scoped();
        let config = EnvConfig::load();
        assert_eq!(config.concurrent, Some(false));
    }
}
