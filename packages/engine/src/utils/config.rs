// packages/engine/src/utils/config.rs
//! Engine configuration
//!
//! Settings are layered with the `config` crate, later sources winning:
//!
//! 1. built-in defaults (`#[serde(default)]`)
//! 2. `config/engine.{toml,yaml,json}` in the working directory, if present
//! 3. an explicit file passed to [`EngineConfig::load_from`]
//! 4. `DOMAIN_ENGINE__<SECTION>__<KEY>` environment variables

use crate::utils::errors::{EngineError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default worker count when threading is requested with `num_threads = 0`
pub const DEFAULT_NUM_THREADS: usize = 4;

/// Default queue slots per worker thread
pub const DEFAULT_QUEUE_CAPACITY_PER_THREAD: usize = 100;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker pool settings
    pub threading: ThreadingConfig,

    /// Mesh decomposition used by the driver
    pub decomposition: DecompositionConfig,

    /// Log output settings
    pub logging: LoggingConfig,
}

/// Worker pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadingConfig {
    /// Run scheduled work on a thread pool (false = inline, serial)
    pub enabled: bool,

    /// Number of worker threads (0 = use the default of 4)
    pub num_threads: usize,

    /// Queue capacity per worker (capacity = num_threads * this)
    pub queue_capacity_per_thread: usize,
}

impl Default for ThreadingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            num_threads: 0,
            queue_capacity_per_thread: DEFAULT_QUEUE_CAPACITY_PER_THREAD,
        }
    }
}

/// Shape of the regular block decomposition the driver builds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecompositionConfig {
    /// Spatial dimension of each domain box
    pub dimensions: usize,

    /// Blocks along each axis (total domains = domains_per_axis^dimensions)
    pub domains_per_axis: usize,

    /// Simulated ranks taking part in the distributed index build
    pub ranks: usize,
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self {
            dimensions: 3,
            domains_per_axis: 4,
            ranks: 2,
        }
    }
}

impl DecompositionConfig {
    /// Total number of domains, if it fits in `usize`
    pub fn num_domains(&self) -> Option<usize> {
        let exp = u32::try_from(self.dimensions).ok()?;
        self.domains_per_axis.checked_pow(exp)
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (overridden by `RUST_LOG`)
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default file location and the environment
    pub fn load() -> Result<Self> {
        Self::build(None)
    }

    /// Load configuration with an explicit file layered on top of the defaults
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        Self::build(Some(path.as_ref()))
    }

    fn build(explicit: Option<&Path>) -> Result<Self> {
        let mut builder =
            Config::builder().add_source(File::with_name("config/engine").required(false));

        if let Some(path) = explicit {
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix("DOMAIN_ENGINE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.threading.queue_capacity_per_thread == 0 {
            return Err(EngineError::ConfigError(
                "threading.queue_capacity_per_thread must be at least 1".to_string(),
            ));
        }

        let decomposition = &self.decomposition;
        if decomposition.dimensions == 0 || decomposition.dimensions > 32 {
            return Err(EngineError::ConfigError(format!(
                "decomposition.dimensions must be between 1 and 32, got {}",
                decomposition.dimensions
            )));
        }
        if decomposition.domains_per_axis == 0 {
            return Err(EngineError::ConfigError(
                "decomposition.domains_per_axis must be at least 1".to_string(),
            ));
        }
        if decomposition.ranks == 0 {
            return Err(EngineError::ConfigError(
                "decomposition.ranks must be at least 1".to_string(),
            ));
        }
        match decomposition.num_domains() {
            Some(n) if n <= 1_000_000 => {}
            _ => {
                return Err(EngineError::ConfigError(
                    "decomposition is too large (more than 1,000,000 domains)".to_string(),
                ))
            }
        }

        if !["trace", "debug", "info", "warn", "error"]
            .contains(&self.logging.level.to_ascii_lowercase().as_str())
        {
            return Err(EngineError::ConfigError(format!(
                "logging.level must be one of trace/debug/info/warn/error, got {}",
                self.logging.level
            )));
        }

        Ok(())
    }
}
