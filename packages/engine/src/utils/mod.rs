// packages/engine/src/utils/mod.rs
//! Shared configuration and error types

pub mod config;
pub mod errors;

pub use self::config::{DecompositionConfig, EngineConfig, LoggingConfig, ThreadingConfig};
pub use errors::{EngineError, Result};
