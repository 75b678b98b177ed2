//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: event store, dispatcher, allocator, ledger, workflow
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router over already assembled services.
pub fn router(services: Arc<AppServices>) -> Router {
    // Tenant-scoped routes: require `x-tenant-id`.
    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn(middleware::context_middleware));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new())
}

pub use services::AppServices;
