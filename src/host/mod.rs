//! Module host process
//!
//! Owns the registry, pipeline and proxy adapter for one process and
//! exposes them over HTTP.

mod handler;
mod server;

pub use handler::{host_router, ApiError, ApiErrorDetail};
pub use server::{dry_run, HostState, HostStatus, ModuleHost, ModuleHostBuilder};
