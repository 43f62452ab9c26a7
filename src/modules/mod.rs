//! Built-in modules
//!
//! - [`rate_limiter`]: per-tenant token buckets (Policy)
//! - [`logger`]: JSON-lines audit sink (Sink)
//! - [`redaction`]: PII scrubbing shared by sinks

pub mod logger;
pub mod rate_limiter;
pub mod redaction;

pub use logger::{AuditRecord, Destination, LoggerModule, LoggerOptions};
pub use rate_limiter::{LimitKey, RateLimiterModule, RateLimiterOptions};
pub use redaction::Redactor;

use crate::error::{Error, Result};
use crate::module::{Module, ModuleConfig};
use std::sync::Arc;

/// Builds module instances from configuration records
pub trait ModuleFactory: Send + Sync {
    /// Instantiate the implementation named by `config.implementation()`
    fn create(&self, config: &ModuleConfig) -> Result<Arc<dyn Module>>;

    /// Implementation ids this factory knows
    fn implementations(&self) -> Vec<&'static str>;
}

/// Factory for the modules shipped with modhost
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinFactory;

impl ModuleFactory for BuiltinFactory {
    fn create(&self, config: &ModuleConfig) -> Result<Arc<dyn Module>> {
        match config.implementation() {
            rate_limiter::IMPLEMENTATION => Ok(Arc::new(RateLimiterModule::new(&config.name))),
            logger::IMPLEMENTATION => Ok(Arc::new(LoggerModule::new(&config.name))),
            other => Err(Error::Config(format!(
                "module '{}': unknown implementation '{}' (known: {})",
                config.name,
                other,
                self.implementations().join(", ")
            ))),
        }
    }

    fn implementations(&self) -> Vec<&'static str> {
        vec![rate_limiter::IMPLEMENTATION, logger::IMPLEMENTATION]
    }
}
