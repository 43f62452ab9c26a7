//! Unified HTTP application for modhost
//!
//! Wraps the host router with CORS and request tracing.
//!
//! ## Endpoint Map
//!
//! | Path                         | Description                         |
//! |------------------------------|-------------------------------------|
//! | `/process`                   | Run the request pipeline            |
//! | `/process/response`          | Run the response pipeline           |
//! | `/health`, `/ready`          | Health and readiness probes         |
//! | `/modules`, `/modules/:name` | Registered modules, reload          |
//! | `/metrics`                   | OpenMetrics exposition              |
//! | `/ext/v1/*`                  | Proxy external-processing contract  |

use crate::host::{host_router, ModuleHost};
use axum::{
    http::{header, HeaderValue, Method},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the complete modhost HTTP application
pub fn build_app(host: Arc<ModuleHost>, cors_origins: &[String]) -> Router {
    host_router(host)
        .layer(TraceLayer::new_for_http())
        .layer(build_cors(cors_origins))
}

fn build_cors(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors.allow_origin(parsed)
    }
}
