//! Runner argument parsing
//!
//! Defines the command-line-style input surface using clap. Host runners
//! parse their test-binary arguments with [`RunnerArgs`] and resolve them,
//! together with environment overrides and the optional profile file, into
//! [`RunnerOptions`] for a session.

use anyhow::{anyhow, Context, Result};
use clap::Parser;

use super::chain::{InvocationMode, TestConfig};
use super::env::EnvConfig;
use super::profile::{ProfileFile, RunProfile};
use crate::select::Selection;
use crate::util::LogLevel;

/// Hierarchical async test execution
#[derive(Parser, Debug, Default)]
#[command(name = "canopy")]
#[command(about = "Run a canopy test session")]
#[command(long_about = None)]
pub struct RunnerArgs {
    /// Include patterns, comma separated (e.g. "suite1|sub1|*")
    #[arg(short, long)]
    pub filter: Option<String>,

    /// Exclude patterns, comma separated
    #[arg(short = 'x', long)]
    pub exclude: Option<String>,

    /// Run suite children concurrently unless configured otherwise
    #[arg(short, long)]
    pub concurrent: bool,

    /// Abort the run after this many test failures
    #[arg(long)]
    pub fail_fast: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Named profile from the profile file
    #[arg(short, long)]
    pub profile: Option<String>,
}

/// Fully resolved input for one run.
pub struct RunnerOptions {
    pub selection: Selection,
    /// Session-level configuration derived from the inputs (invocation
    /// mode, fail-fast threshold).
    pub session_config: TestConfig,
    pub log_level: LogLevel,
}

impl RunnerArgs {
    /// Resolve arguments against environment overrides and the profile
    /// file. Precedence: profile file, then environment, then arguments.
    pub fn into_options(self) -> Result<RunnerOptions> {
        self.resolve(&EnvConfig::load())
    }

    fn resolve(self, env: &EnvConfig) -> Result<RunnerOptions> {
        let profile = self.lookup_profile(env)?;
        let from_profile = |get: fn(&RunProfile) -> Option<String>| {
            profile.as_ref().and_then(get)
        };

        let filter = self
            .filter
            .or_else(|| env.filter.clone())
            .or_else(|| from_profile(|p| p.filter.clone()));
        let exclude = self
            .exclude
            .or_else(|| env.exclude.clone())
            .or_else(|| from_profile(|p| p.exclude.clone()));
        let selection = Selection::parse(filter.as_deref(), exclude.as_deref())
            .context("invalid selection pattern")?;

        let concurrent = if self.concurrent {
            true
        } else {
            env.concurrent
                .or_else(|| profile.as_ref().and_then(|p| p.concurrent))
                .unwrap_or(false)
        };
        let fail_fast = self
            .fail_fast
            .or(env.fail_fast)
            .or_else(|| profile.as_ref().and_then(|p| p.fail_fast));

        let mut session_config = TestConfig::new();
        if concurrent {
            session_config = session_config.chain(TestConfig::invocation(InvocationMode::Concurrent));
        }
        if let Some(threshold) = fail_fast {
            session_config = session_config.chain(TestConfig::fail_fast(threshold));
        }

        let level_name = self
            .log_level
            .or_else(|| env.log_level.clone())
            .or_else(|| from_profile(|p| p.log_level.clone()))
            .unwrap_or_else(|| "info".to_string());
        let log_level = LogLevel::from_str(&level_name)
            .ok_or_else(|| anyhow!("unknown log level: {level_name}"))?;

        Ok(RunnerOptions {
            selection,
            session_config,
            log_level,
        })
    }

    fn lookup_profile(&self, env: &EnvConfig) -> Result<Option<RunProfile>> {
        let name = self.profile.clone().or_else(|| env.profile.clone());
        let Some(name) = name else {
            return Ok(None);
        };
        let file = match &env.config_file {
            Some(path) => ProfileFile::load(path)?,
            None => ProfileFile::load_default()?,
        };
        file.profile(&name)
            .cloned()
            .map(Some)
            .ok_or_else(|| anyhow!("no profile named \"{name}\" in profile file"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = RunnerArgs::default().resolve(&EnvConfig::default()).unwrap();
        assert!(options.selection.is_unrestricted());
        assert_eq!(options.log_level, LogLevel::Info);
    }

    #[test]
    fn test_args_parse() {
        let args = RunnerArgs::parse_from([
            "canopy",
            "--filter",
            "suite1|*",
            "--concurrent",
            "--fail-fast",
            "3",
            "--log-level",
            "debug",
        ]);
        assert_eq!(args.filter.as_deref(), Some("suite1|*"));
        assert!(args.concurrent);
        assert_eq!(args.fail_fast, Some(3));

        let options = args.resolve(&EnvConfig::default()).unwrap();
        assert_eq!(options.log_level, LogLevel::Debug);
        assert!(!options.selection.is_unrestricted());
    }

    #[test]
    fn test_env_fills_gaps() {
        let env = EnvConfig {
            filter: Some("a|*".to_string()),
            log_level: Some("warn".to_string()),
            ..Default::default()
        };
        let options = RunnerArgs::default().resolve(&env).unwrap();
        assert!(!options.selection.is_unrestricted());
        assert_eq!(options.log_level, LogLevel::Warn);
    }

    #[test]
    fn test_args_win_over_env() {
        let env = EnvConfig {
            log_level: Some("error".to_string()),
            ..Default::default()
        };
        let args = RunnerArgs {
            log_level: Some("trace".to_string()),
            ..Default::default()
        };
        let options = args.resolve(&env).unwrap();
        assert_eq!(options.log_level, LogLevel::Trace);
    }

    #[test]
    fn test_unknown_log_level() {
        let args = RunnerArgs {
            log_level: Some("loud".to_string()),
            ..Default::default()
        };
        assert!(args.resolve(&EnvConfig::default()).is_err());
    }
}
