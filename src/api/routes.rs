//! Route tables for the gateway and template-service binaries.
//!
//! Generalized from the donor's `create_router` (CORS + trace layers
//! wrapping a nested route tree, auth applied per-group via
//! `middleware::from_fn_with_state`) onto the two HTTP surfaces named in
//! §6: the gateway's `/auth/*`, `/notifications/*`, `/health*`, and the
//! template service's `/templates*`.

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::middleware::{auth_middleware, rate_limit_middleware};
use super::state::{GatewayState, TemplateServiceState};
use super::template_handlers;

/// `/auth/*`, `/notifications/*`, `/health*`.
pub fn gateway_router(state: Arc<GatewayState>) -> Router {
    let public = Router::new()
        .route("/auth/login", post(handlers::login))
        .route("/auth/refresh", post(handlers::refresh))
        .route("/auth/validate", post(handlers::validate))
        .route("/health", get(handlers::health))
        .route("/health/services", get(handlers::health_services));

    let authenticated = Router::new()
        .route("/auth/logout", post(handlers::logout))
        .route("/notifications/send", post(handlers::send_notification))
        .route(
            "/notifications/status/:id",
            get(handlers::get_notification_status),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public)
        .merge(authenticated)
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// `/templates*`.
pub fn template_router(state: Arc<TemplateServiceState>) -> Router {
    Router::new()
        .route(
            "/templates",
            get(template_handlers::list_templates).post(template_handlers::create_template),
        )
        .route(
            "/templates/:code",
            get(template_handlers::get_template)
                .put(template_handlers::update_template)
                .delete(template_handlers::delete_template),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

