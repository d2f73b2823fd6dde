//! HTTP API for the order service.
//!
//! Exposes checkout, order queries, status administration, cancellation and
//! the payment gateway callbacks, with structured logging (tracing) and
//! Prometheus metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post};
use checkout::{CallbackUrls, Checkout, Notifier};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::OrderStore;
use payments::{GatewayError, GatewayRegistry, MomoGateway, VnpayGateway};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::orders::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: OrderStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/orders",
            post(routes::orders::create::<S>).get(routes::orders::list::<S>),
        )
        .route("/orders/user/me", get(routes::orders::mine::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/status", patch(routes::orders::update_status::<S>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S>))
        .route("/orders/{id}/repayment", post(routes::orders::repay::<S>))
        .route(
            "/orders/payment/{gateway}/return",
            get(routes::payments::return_redirect::<S>),
        )
        .route(
            "/orders/payment/{gateway}/ipn",
            get(routes::payments::ipn_query::<S>).post(routes::payments::ipn_body::<S>),
        )
        .route(
            "/orders/payment/{gateway}/refund",
            post(routes::payments::refund::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Builds the MoMo and VNPay adapters from configuration.
pub fn build_gateways(config: &Config) -> Result<GatewayRegistry, GatewayError> {
    Ok(GatewayRegistry::new()
        .register(Arc::new(MomoGateway::new(config.momo.clone())?))
        .register(Arc::new(VnpayGateway::new(config.vnpay.clone())?)))
}

/// Wires the checkout services over `store` into the shared handler state.
pub fn create_state<S: OrderStore + Clone + 'static>(
    store: S,
    gateways: GatewayRegistry,
    notifier: Arc<dyn Notifier>,
    config: &Config,
) -> Arc<AppState<S>> {
    let urls = CallbackUrls::new(config.public_base_url.clone());
    Arc::new(AppState {
        checkout: Checkout::new(store, gateways, notifier, urls),
        storefront: config.storefront.clone(),
    })
}
