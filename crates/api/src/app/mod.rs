//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: infrastructure wiring (event store, bus, read models, dispatcher)
//! - `routes/`: HTTP routes + handlers (one file per domain area)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, http::HeaderValue, routing::get};
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use verdant_infra::config::AppConfig;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, ServiceError};

/// Build the full HTTP router (public entrypoint used by `main.rs` and the tests).
pub async fn build_app(config: &AppConfig) -> Result<Router, ServiceError> {
    let services = Arc::new(services::build_services(config).await?);
    Ok(router_with_services(services, config.jwt_secret.as_bytes()))
}

/// Router over already-wired services.
pub fn router_with_services(services: Arc<AppServices>, jwt_secret: &[u8]) -> Router {
    let jwt = Arc::new(verdant_auth::Hs256JwtValidator::new(jwt_secret));
    let auth_state = middleware::AuthState { jwt };

    // Protected routes: require auth + tenant context.
    let protected = routes::router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::auth_middleware,
    ));

    let mut app = Router::new()
        .route("/health", get(routes::system::health))
        .route("/health/ready", get(routes::system::ready))
        .merge(protected)
        .layer(Extension(services));

    for (name, value) in middleware::SECURITY_HEADERS {
        app = app.layer(SetResponseHeaderLayer::if_not_present(
            name,
            HeaderValue::from_static(value),
        ));
    }

    app.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CatchPanicLayer::custom(middleware::panic_response)),
    )
}
