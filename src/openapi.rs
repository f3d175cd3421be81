use axum::Json;
use utoipa::OpenApi;

use crate::errors::ErrorResponse;
use crate::handlers;
use crate::models::order::{
    DeliveryQuote, Fulfillment, LedgerState, Order, PaymentProof, PaymentStatus, ProofKind,
    QuoteSource,
};
use crate::models::session::CartItem;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Dukabot API",
        description = "WhatsApp shop bot: conversation webhooks, payment callbacks, and a read-only order API",
        license(name = "MIT")
    ),
    paths(
        handlers::health::health_check,
        handlers::whatsapp::verify_webhook,
        handlers::whatsapp::receive_webhook,
        handlers::payment_webhooks::receive_callback,
        handlers::orders::list_orders,
        handlers::orders::get_order,
    ),
    components(schemas(
        handlers::health::HealthResponse,
        handlers::orders::OrderSummary,
        handlers::orders::OrderDetail,
        handlers::orders::OrderListResponse,
        Order,
        CartItem,
        Fulfillment,
        DeliveryQuote,
        QuoteSource,
        LedgerState,
        PaymentStatus,
        PaymentProof,
        ProofKind,
        ErrorResponse,
    )),
    tags(
        (name = "health", description = "Liveness"),
        (name = "webhooks", description = "WhatsApp and PSP callback endpoints"),
        (name = "orders", description = "Read-only admin order API"),
    )
)]
pub struct ApiDoc;

pub async fn serve_openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_builds_and_lists_paths() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        assert!(paths.iter().any(|p| p.as_str() == "/webhooks/whatsapp"));
        assert!(paths.iter().any(|p| p.as_str() == "/webhooks/payments"));
        assert!(paths.iter().any(|p| p.as_str() == "/api/v1/orders"));
    }

    #[test]
    fn webhook_posts_document_their_request_bodies() {
        // The raw-bytes extractors carry no schema of their own; the path
        // annotations must declare the body explicitly.
        let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();
        for path in ["/webhooks/whatsapp", "/webhooks/payments"] {
            assert!(
                doc["paths"][path]["post"]["requestBody"].is_object(),
                "missing request body on {}",
                path
            );
        }
    }
}
