//! modhost - policy pipeline module host for an LLM security gateway
//!
//! A reverse proxy calls out to modhost for every request and response it
//! forwards to an LLM provider. modhost runs the exchange through an ordered
//! pipeline of independently developed modules and answers `CONTINUE` or
//! `BLOCK`.
//!
//! ## Architecture
//!
//! ```text
//!   reverse proxy ──► ProxyAdapter ──► Pipeline ──► [module] ─► [module] ─► ...
//!                        │  deadline,      │  priority order, conditions,
//!                        │  fail safe      │  timeouts, fail-open/closed
//!                        ▼                 ▼
//!                   CONTINUE/BLOCK    ModuleRegistry (lifecycle, reload, health)
//! ```
//!
//! ## Modules
//!
//! - [`module`]: the module contract and shared types
//! - [`registry`]: registration, lifecycle, reload and health aggregation
//! - [`pipeline`]: ordered execution and verdict folding
//! - [`modules`]: built-in rate limiter and audit logger
//! - [`adapter`]: proxy-facing contract
//! - [`host`]: process object and HTTP handlers
//! - [`config`]: configuration file

pub mod adapter;
pub mod api;
pub mod config;
pub mod error;
pub mod host;
pub mod metrics;
pub mod module;
pub mod modules;
pub mod pipeline;
pub mod registry;

pub use config::HostConfig;
pub use error::{Error, Result};
pub use host::{ModuleHost, ModuleHostBuilder};
