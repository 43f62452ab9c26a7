//! modhost error types

use thiserror::Error;

/// modhost error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (invalid/missing fields, failed `validate_config`)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unresolved or cyclic module dependency
    #[error("Dependency error: {0}")]
    Dependency(String),

    /// Module lifecycle transition failed
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// Module not registered
    #[error("Module '{0}' not found")]
    NotFound(String),

    /// Module name already taken
    #[error("Module '{0}' is already registered")]
    AlreadyRegistered(String),

    /// Error raised by a module through its contract
    #[error(transparent)]
    Module(#[from] ModuleError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code used in HTTP error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Dependency(_) => "DEPENDENCY_ERROR",
            Error::Lifecycle(_) => "LIFECYCLE_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::AlreadyRegistered(_) => "ALREADY_REGISTERED",
            Error::Module(ModuleError::InvalidConfig { .. }) => "CONFIG_ERROR",
            Error::Module(_) => "MODULE_ERROR",
            Error::Io(_) | Error::Internal(_) => "INTERNAL_ERROR",
            Error::Serialization(_) | Error::Toml(_) => "INVALID_INPUT",
        }
    }
}

/// Errors a module reports through the module contract.
///
/// The pipeline never propagates these to callers; it folds them into the
/// module's fail-open/fail-closed rule.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModuleError {
    /// Configuration rejected by `validate_config` / `update_config`
    #[error("Module '{module}' rejected configuration: {reason}")]
    InvalidConfig {
        /// Module name
        module: String,
        /// Why the configuration is invalid
        reason: String,
    },

    /// Processing method called outside the Running state
    #[error("Module '{module}' called while {state}")]
    NotRunning {
        /// Module name
        module: String,
        /// State the module was in
        state: String,
    },

    /// Runtime failure while processing a request or response
    #[error("Module '{module}' failed: {reason}")]
    Processing {
        /// Module name
        module: String,
        /// Failure reason
        reason: String,
    },

    /// A sink destination could not be written
    #[error("Destination '{destination}' failed: {reason}")]
    Destination {
        /// Destination label
        destination: String,
        /// Failure reason
        reason: String,
    },

    /// Initialize/Start/Stop/Shutdown failure
    #[error("Module '{module}' lifecycle failure: {reason}")]
    Lifecycle {
        /// Module name
        module: String,
        /// Failure reason
        reason: String,
    },
}

impl ModuleError {
    /// Shorthand for an `InvalidConfig` error
    pub fn invalid_config(module: impl Into<String>, reason: impl Into<String>) -> Self {
        ModuleError::InvalidConfig {
            module: module.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a `Processing` error
    pub fn processing(module: impl Into<String>, reason: impl Into<String>) -> Self {
        ModuleError::Processing {
            module: module.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for modhost operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for module contract methods
pub type ModuleResult<T> = std::result::Result<T, ModuleError>;

/// Serialize a value to JSON, falling back to `null` on failure
pub fn to_json<T: serde::Serialize>(value: T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}
