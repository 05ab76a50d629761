//! Configuration System
//!
//! Hierarchical configuration loading from:
//! - tensorloom.toml (default configuration)
//! - tensorloom.local.toml (git-ignored local overrides)
//! - Environment variables (TENSORLOOM_* prefix, `__` for nesting)
//!
//! ## Example
//!
//! ```toml
//! # tensorloom.toml
//! [optimize]
//! max_iterations = 10
//!
//! [search]
//! population = 64
//!
//! [logging]
//! level = "debug"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! TENSORLOOM_OPTIMIZE__MAX_ITERATIONS=4
//! TENSORLOOM_LOGGING__LEVEL=trace
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub optimize: OptimizeConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Fixpoint budgets for the rewriting passes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizeConfig {
    /// Maximum simplification rounds before giving up on a fixpoint
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        OptimizeConfig {
            max_iterations: default_max_iterations(),
        }
    }
}

/// Evolutionary search knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Candidates kept alive between rounds
    #[serde(default = "default_population")]
    pub population: usize,

    /// Share of a round produced by annotation mutation
    #[serde(default = "default_mutation_ratio")]
    pub mutation_ratio: f64,

    /// Share of a round produced by crossover
    #[serde(default = "default_crossover_ratio")]
    pub crossover_ratio: f64,

    /// Worker threads for feature extraction (0 = all cores)
    #[serde(default)]
    pub feature_threads: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            population: default_population(),
            mutation_ratio: default_mutation_ratio(),
            crossover_ratio: default_crossover_ratio(),
            feature_threads: 0,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive for the subscriber, e.g. "info" or
    /// "tensorloom=debug"
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

fn default_max_iterations() -> usize {
    10
}

fn default_population() -> usize {
    64
}

fn default_mutation_ratio() -> f64 {
    0.6
}

fn default_crossover_ratio() -> f64 {
    0.3
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from files and environment.
    pub fn load() -> Result<Self> {
        Figment::new()
            .merge(Toml::file("tensorloom.toml"))
            .merge(Toml::file("tensorloom.local.toml"))
            .merge(Env::prefixed("TENSORLOOM_").split("__"))
            .extract()
            .map_err(|e| Error::InvalidProgram {
                message: format!("invalid configuration: {e}"),
            })
    }

    /// Number of rayon threads the search should use.
    pub fn effective_feature_threads(&self) -> usize {
        if self.search.feature_threads == 0 {
            num_cpus::get()
        } else {
            self.search.feature_threads
        }
    }
}

/// Install a `tracing` subscriber honoring the configured filter. Later
/// calls are no-ops, so tests may call this freely.
pub fn init_tracing(config: &LoggingConfig) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
