//! Configuration context shared by the orchestrator, the cache and the
//! evaluator boundary.
//!
//! Values set in code always win over the environment. Environment lookups
//! happen at resolution time, so a config built once keeps following
//! `KILN_CACHE_FILE` / `KILN_EVALUATOR_BIN` until an explicit value is set.

use std::path::PathBuf;

/// Cache file used when neither an explicit path nor `KILN_CACHE_FILE` is set.
pub const DEFAULT_CACHE_FILE: &str = ".kiln.cache";

/// Evaluator binary used when neither an explicit path nor `KILN_EVALUATOR_BIN` is set.
pub const DEFAULT_EVALUATOR_BIN: &str = "pkl";

/// Environment variable naming the cache file.
pub const CACHE_FILE_ENV: &str = "KILN_CACHE_FILE";

/// Environment variable naming the evaluator binary.
pub const EVALUATOR_BIN_ENV: &str = "KILN_EVALUATOR_BIN";

/// Environment variable disabling the cache ("1" or "true").
pub const CACHE_DISABLED_ENV: &str = "KILN_CACHE_DISABLED";

/// Configuration for one KILN context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KilnConfig {
    /// Explicit cache file, takes precedence over the environment.
    cache_file: Option<PathBuf>,
    /// Explicit evaluator binary, takes precedence over the environment.
    evaluator_bin: Option<PathBuf>,
    /// Whether evaluation results are cached.
    pub cache_enabled: bool,
}

impl Default for KilnConfig {
    fn default() -> Self {
        Self {
            cache_file: None,
            evaluator_bin: None,
            cache_enabled: true,
        }
    }
}

impl KilnConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config honoring `KILN_CACHE_DISABLED`.
    ///
    /// Environment variables:
    /// - `KILN_CACHE_FILE`: cache file location (default: `.kiln.cache`)
    /// - `KILN_EVALUATOR_BIN`: evaluator binary (default: `pkl`)
    /// - `KILN_CACHE_DISABLED`: "1" or "true" disables caching
    pub fn from_env() -> Self {
        let cache_enabled = std::env::var(CACHE_DISABLED_ENV)
            .map(|s| {
                let s = s.to_lowercase();
                s != "1" && s != "true"
            })
            .unwrap_or(true);

        Self {
            cache_enabled,
            ..Self::default()
        }
    }

    /// Resolve the cache file: explicit, then `KILN_CACHE_FILE`, then the default.
    pub fn cache_file(&self) -> PathBuf {
        self.cache_file
            .clone()
            .or_else(|| env_path(CACHE_FILE_ENV))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_FILE))
    }

    /// Resolve the evaluator binary: explicit, then `KILN_EVALUATOR_BIN`, then `pkl`.
    pub fn evaluator_bin(&self) -> PathBuf {
        self.evaluator_bin
            .clone()
            .or_else(|| env_path(EVALUATOR_BIN_ENV))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_EVALUATOR_BIN))
    }

    /// Set an explicit cache file.
    pub fn set_cache_file(&mut self, path: impl Into<PathBuf>) {
        self.cache_file = Some(path.into());
    }

    /// Set the cache file.
    pub fn with_cache_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.set_cache_file(path);
        self
    }

    /// Set the evaluator binary.
    pub fn with_evaluator_bin(mut self, path: impl Into<PathBuf>) -> Self {
        self.evaluator_bin = Some(path.into());
        self
    }

    /// Enable or disable caching.
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var_os(name)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
