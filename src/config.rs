//! Engine configuration
//!
//! Loaded from a `cadence.toml` next to the working directory (or an
//! explicit path), with every field optional. Hosts embedding the library
//! can also build a [`Config`] directly and skip the file entirely.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::engine::DEFAULT_MAX_FRAMES;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Phase steps one `run` call may spend before yielding.
    pub step_budget: usize,
    /// Frame-depth ceiling per process.
    pub max_frames: usize,
    /// Default tracing filter, overridable by `RUST_LOG`.
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            step_budget: 1_000,
            max_frames: DEFAULT_MAX_FRAMES,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Load from an explicit path, or from `cadence.toml` in the current
    /// directory when present; defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = Path::new("cadence.toml");
                if !default.exists() {
                    return Ok(Config::default());
                }
                default.to_path_buf()
            }
        };
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}
