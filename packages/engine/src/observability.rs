// packages/engine/src/observability.rs
//! Logging and metrics setup
//!
//! Structured logs go through `tracing`. Counters are recorded with the
//! `metrics` facade; they are no-ops until the embedding application installs
//! a recorder.

use crate::utils::config::LoggingConfig;
use crate::utils::errors::{EngineError, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Counter names emitted by the engine
pub mod metric_names {
    pub const JOBS_QUEUED: &str = "thread_pool_jobs_queued_total";
    pub const JOBS_REJECTED: &str = "thread_pool_jobs_rejected_total";
    pub const JOBS_COMPLETED: &str = "thread_pool_jobs_completed_total";
    pub const INLINE_JOBS: &str = "execution_manager_inline_jobs_total";
    pub const TREE_BUILDS: &str = "interval_tree_builds_total";
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| EngineError::ConfigError(format!("invalid log filter: {}", e)))?;

    let builder = fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_target(false);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| EngineError::ConfigError(format!("tracing already initialised: {}", e)))
}

/// Register descriptions for the engine's counters
pub fn describe_metrics() {
    metrics::describe_counter!(metric_names::JOBS_QUEUED, "Jobs accepted by a thread pool");
    metrics::describe_counter!(
        metric_names::JOBS_REJECTED,
        "Jobs refused by admission control (queue full or closing)"
    );
    metrics::describe_counter!(metric_names::JOBS_COMPLETED, "Jobs finished by pool workers");
    metrics::describe_counter!(
        metric_names::INLINE_JOBS,
        "Jobs run inline because no thread pool is configured"
    );
    metrics::describe_counter!(metric_names::TREE_BUILDS, "Interval trees calculated");
}
