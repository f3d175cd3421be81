use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;

use dukabot_api::config::AppConfig;
use dukabot_api::outbound::LoggingTransport;
use dukabot_api::{app_router, AppState};

fn test_app() -> Router {
    let config = AppConfig::for_tests();
    let state = Arc::new(AppState::new(config, None, Arc::new(LoggingTransport)));
    app_router(state)
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let response = test_app()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.contains("\"ok\""));
}

#[tokio::test]
async fn subscription_handshake_echoes_challenge() {
    let response = test_app()
        .oneshot(
            Request::get(
                "/webhooks/whatsapp?hub.mode=subscribe&hub.verify_token=test-verify-token&hub.challenge=424242",
            )
            .body(Body::empty())
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "424242");
}

#[tokio::test]
async fn subscription_handshake_rejects_wrong_token() {
    let response = test_app()
        .oneshot(
            Request::get(
                "/webhooks/whatsapp?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=424242",
            )
            .body(Body::empty())
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unsigned_message_batch_is_acked_but_discarded() {
    let app = test_app();
    let body = serde_json::to_vec(&json!({
        "entry": [{"changes": [{"value": {"messages": [
            {"id": "wamid.x", "from": "255712000001", "type": "interactive",
             "interactive": {"type": "list_reply", "list_reply": {"id": "shop", "title": "shop"}}}
        ]}}]}]
    }))
    .unwrap();

    // No signature header at all, then a wrong one.
    for signature in [None, Some("sha256=deadbeef")] {
        let mut request = Request::post("/webhooks/whatsapp").header("content-type", "application/json");
        if let Some(signature) = signature {
            request = request.header("x-hub-signature-256", signature);
        }
        let response = app
            .clone()
            .oneshot(request.body(Body::from(body.clone())).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    // Nothing was processed, so no orders can ever come out of it; the store
    // also has no session, which we can only observe indirectly: the admin
    // list stays empty.
    let response = app
        .oneshot(Request::get("/api/v1/orders").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(body_string(response).await.contains("\"total\":0"));
}

#[tokio::test]
async fn malformed_json_batch_is_acked() {
    let response = test_app()
        .oneshot(
            Request::post("/webhooks/payments")
                .header("content-type", "application/json")
                .body(Body::from("this is not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn openapi_document_is_served() {
    let response = test_app()
        .oneshot(
            Request::get("/api-docs/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("/webhooks/whatsapp"));
    assert!(body.contains("/api/v1/orders"));
}
