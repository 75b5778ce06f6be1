//! Run profiles
//!
//! Handles finding, loading, and validating the YAML profile file that
//! predefines selection and runner settings for named runs.

#![allow(dead_code)]

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Profile file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./canopy.yaml",
    "./canopy.yml",
    "./.canopy.yaml",
    "./.canopy/config.yaml",
];

/// Full profile file structure
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProfileFile {
    /// Version of the file format
    #[serde(default = "default_version")]
    pub version: String,

    /// Named run profiles
    #[serde(default)]
    pub profiles: Vec<RunProfile>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for ProfileFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            profiles: Vec::new(),
        }
    }
}

impl ProfileFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find a profile file in standard locations
    pub fn find() -> Option<PathBuf> {
        CONFIG_LOCATIONS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }

    /// Load from an explicit path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read profile file {}", path.display()))?;
        let file: ProfileFile = serde_yaml::from_str(&text)
            .with_context(|| format!("failed to parse profile file {}", path.display()))?;
        Ok(file)
    }

    /// Load from the standard locations, or defaults when absent
    pub fn load_default() -> Result<Self> {
        match Self::find() {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Look up a profile by name
    pub fn profile(&self, name: &str) -> Option<&RunProfile> {
        self.profiles.iter().find(|profile| profile.name == name)
    }
}

/// One named run profile
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunProfile {
    /// Profile name
    pub name: String,
    /// Include patterns, comma separated
    #[serde(default)]
    pub filter: Option<String>,
    /// Exclude patterns, comma separated
    #[serde(default)]
    pub exclude: Option<String>,
    /// Run suite children concurrently by default
    #[serde(default)]
    pub concurrent: Option<bool>,
    /// Fail-fast threshold
    #[serde(default)]
    pub fail_fast: Option<usize>,
    /// Log level
    #[serde(default)]
    pub log_level: Option<String>,
}

impl RunProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filter: None,
            exclude: None,
            concurrent: None,
            fail_fast: None,
            log_level: None,
        }
    }
}
