//! Multi-tenant stock ledger service.
//!
//! Tracks per-location inventory balances, applies IN/OUT/ADJUSTMENT
//! movements transactionally, keeps the denormalized per-product total in
//! sync, and serves a filterable movement feed over HTTP.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{http::HeaderValue, middleware, routing::get, Router};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tenant;
pub mod tracing;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::movements::MovementService;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: AppConfig,
    pub event_sender: EventSender,
    pub movement_service: MovementService,
}

impl AppState {
    pub fn new(db: Arc<DbPool>, config: AppConfig, event_sender: EventSender) -> Self {
        let movement_service = MovementService::new(db.clone(), event_sender.clone());
        Self {
            db,
            config,
            event_sender,
            movement_service,
        }
    }
}

async fn root() -> &'static str {
    "Stock Ledger API"
}

/// Assembles the full application router with middleware. Tests drive this
/// router directly; `main` binds it to a listener.
pub fn app_router(state: Arc<AppState>) -> Router {
    let cors = build_cors_layer(&state.config);

    Router::new()
        .route("/", get(root))
        .merge(handlers::health::health_router())
        .nest("/movements", handlers::movements::movements_router())
        .merge(openapi::swagger_ui())
        .layer(crate::tracing::configure_http_tracing())
        .layer(middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(cors)
        .with_state(state)
}

/// CORS policy from configuration: permissive in development or on explicit
/// opt-in, otherwise restricted to the configured origin list.
pub fn build_cors_layer(config: &AppConfig) -> CorsLayer {
    if config.should_allow_permissive_cors() && config.cors_allowed_origins.is_none() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .as_deref()
        .unwrap_or("")
        .split(',')
        .filter_map(|origin| origin.trim().parse().ok())
        .collect();

    let mut layer = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderName::from_static(tenant::TENANT_ID_HEADER),
            axum::http::HeaderName::from_static(tenant::USER_ID_HEADER),
            axum::http::HeaderName::from_static("x-request-id"),
        ]);

    if config.cors_allow_credentials {
        layer = layer.allow_credentials(true);
    }

    layer
}
