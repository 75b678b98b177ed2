use axum::Router;

pub mod common;
pub mod credits;
pub mod documents;
pub mod ranges;
pub mod system;

/// Router for all tenant-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/ranges", ranges::router())
        .nest("/credits", credits::router())
        .nest("/applications", credits::applications_router())
        .nest("/documents", documents::router())
}
