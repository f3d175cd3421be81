pub mod config;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod keyed_lock;
pub mod models;
pub mod openapi;
pub mod outbound;
pub mod repositories;
pub mod services;
pub mod webhooks;

use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::AppConfig;
use crate::events::EventSender;
use crate::outbound::MessageTransport;
use crate::repositories::InMemoryStore;
use crate::services::catalog::Catalog;
use crate::services::dispatcher::Dispatcher;
use crate::services::distance::DistanceResolver;
use crate::services::ledger::PaymentLedger;
use crate::services::orders::OrderService;
use crate::services::quoting::FeeQuoteEngine;
use crate::services::sessions::SessionStore;

/// Shared application state handed to every handler.
pub struct AppState {
    pub config: AppConfig,
    pub dispatcher: Arc<Dispatcher>,
    pub orders: Arc<OrderService>,
    pub ledger: Arc<PaymentLedger>,
    pub transport: Arc<dyn MessageTransport>,
    pub event_sender: Option<Arc<EventSender>>,
}

impl AppState {
    /// Wires the full service graph on top of one in-memory store. Reference
    /// data (catalog, street dataset) is loaded here, once, at startup.
    pub fn new(
        config: AppConfig,
        event_sender: Option<Arc<EventSender>>,
        transport: Arc<dyn MessageTransport>,
    ) -> Self {
        let store = Arc::new(InMemoryStore::new());

        let catalog = Arc::new(Catalog::load(config.catalog_path.as_deref()));
        let resolver = Arc::new(DistanceResolver::load(
            config.street_dataset_path.as_deref(),
            (config.origin_lat, config.origin_lng),
            config.default_distance_km,
        ));
        let quoting = Arc::new(FeeQuoteEngine::new(config.quote.clone()));

        let orders = Arc::new(OrderService::new(store.clone(), event_sender.clone()));
        let ledger = Arc::new(PaymentLedger::new(
            store.clone(),
            store.clone(),
            event_sender.clone(),
        ));

        let dispatcher = Arc::new(Dispatcher::new(
            SessionStore::new(store),
            catalog,
            resolver,
            quoting,
            orders.clone(),
            ledger.clone(),
            event_sender.clone(),
            config.business_name.clone(),
            config.payment_instructions.clone(),
            config.menu_page_size,
        ));

        Self {
            config,
            dispatcher,
            orders,
            ledger,
            transport,
            event_sender,
        }
    }
}

/// Builds the HTTP router: webhook endpoints, the read-only admin API, and
/// the OpenAPI document.
pub fn app_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route(
            "/webhooks/whatsapp",
            get(handlers::whatsapp::verify_webhook).post(handlers::whatsapp::receive_webhook),
        )
        .route(
            "/webhooks/payments",
            post(handlers::payment_webhooks::receive_callback),
        )
        .route("/api/v1/orders", get(handlers::orders::list_orders))
        .route("/api/v1/orders/:order_id", get(handlers::orders::get_order))
        .route("/api-docs/openapi.json", get(openapi::serve_openapi))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// CORS only matters for the admin API; webhook callers are servers. Explicit
/// origins when configured, permissive only in development or when opted in.
fn cors_layer(config: &AppConfig) -> CorsLayer {
    let methods = [Method::GET, Method::POST];
    let headers = [header::CONTENT_TYPE, header::AUTHORIZATION];

    if let Some(origins) = &config.cors_allowed_origins {
        let parsed: Vec<HeaderValue> = origins
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse().ok())
            .collect();
        if !parsed.is_empty() {
            return CorsLayer::new()
                .allow_origin(AllowOrigin::list(parsed))
                .allow_methods(methods)
                .allow_headers(headers);
        }
        warn!("cors_allowed_origins contained no usable origins");
    }

    if config.should_allow_permissive_cors() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(headers)
    } else {
        CorsLayer::new()
    }
}
