use axum::{Router, routing::get};

pub mod common;
pub mod consignments;
pub mod products;
pub mod system;
pub mod tenants;

/// Router for all authenticated (tenant-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/tenant", tenants::router())
        .nest("/products", products::router())
        .nest("/consignments", consignments::router())
}
