//! Payment service provider callback endpoint. Callbacks arrive with
//! at-least-once delivery and either a field-level checksum or a signature
//! header; every outcome other than a verification failure feeds the ledger,
//! and the endpoint always acks 200 so the PSP stops retrying.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::errors::ServiceError;
use crate::events::Event;
use crate::models::order::{PaymentEvent, PaymentMethod};
use crate::webhooks;
use crate::AppState;

const SIGNATURE_HEADER: &str = "x-callback-signature";

#[derive(Debug, Deserialize)]
struct PspCallback {
    #[serde(default)]
    event: String,
    data: PspData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PspData {
    order_reference: String,
    amount: serde_json::Value,
    #[serde(default)]
    status: String,
    transaction_id: Option<String>,
    #[serde(default)]
    channel: Option<String>,
}

/// PSP payment callback.
#[utoipa::path(
    post,
    path = "/webhooks/payments",
    tag = "webhooks",
    request_body(content = String, description = "PSP callback payload, verified against its raw bytes"),
    responses(
        (status = 200, description = "Callback accepted (including discarded callbacks)")
    )
)]
#[instrument(skip_all)]
pub async fn receive_callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(secret) = &state.config.psp_webhook_secret {
        if !verify_callback(secret, &headers, &body) {
            warn!("discarding PSP callback with failed verification");
            return StatusCode::OK;
        }
    }

    let callback: PspCallback = match serde_json::from_slice(&body) {
        Ok(callback) => callback,
        Err(err) => {
            warn!(error = %err, "discarding unparseable PSP callback");
            return StatusCode::OK;
        }
    };

    if !is_success(&callback) {
        debug!(
            event = %callback.event,
            status = %callback.data.status,
            order_reference = %callback.data.order_reference,
            "ignoring non-success PSP callback"
        );
        return StatusCode::OK;
    }

    let Some(amount_tzs) = parse_amount(&callback.data.amount) else {
        warn!(
            order_reference = %callback.data.order_reference,
            "discarding PSP callback with unusable amount"
        );
        return StatusCode::OK;
    };

    let order_reference = callback.data.order_reference.trim().to_uppercase();
    let event = PaymentEvent {
        id: event_id(&callback, &order_reference, amount_tzs),
        order_id: order_reference.clone(),
        amount_tzs,
        method: payment_method(&callback),
        timestamp: chrono::Utc::now(),
    };

    match state.ledger.apply(event).await {
        Ok(ledger_state) => {
            info!(
                %order_reference,
                amount_tzs,
                paid_tzs = ledger_state.paid_tzs,
                status = ?ledger_state.status,
                "PSP payment applied"
            );
        }
        Err(ServiceError::NotFound(_)) => {
            // Money arrived for an order we cannot match; keep it visible
            // instead of dropping it on the floor.
            warn!(%order_reference, amount_tzs, "PSP payment references unknown order");
            if let Some(events) = &state.event_sender {
                let _ = events
                    .send(Event::PaymentOrphaned {
                        order_reference,
                        amount_tzs,
                    })
                    .await;
            }
        }
        Err(err) => {
            error!(%order_reference, error = %err, "failed to apply PSP payment");
        }
    }

    StatusCode::OK
}

/// Accepts either form the PSP sends: a signature header over the raw body,
/// or a `checksum` field inside `data`.
fn verify_callback(secret: &str, headers: &HeaderMap, body: &[u8]) -> bool {
    if let Some(header) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) {
        return webhooks::verify_header_hmac(secret, header, body);
    }

    let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) else {
        return false;
    };
    let Some(data) = value.get("data").and_then(|d| d.as_object()) else {
        return false;
    };
    let Some(checksum) = data.get("checksum").and_then(|c| c.as_str()) else {
        return false;
    };
    webhooks::verify_checksum_fields(secret, data, checksum)
}

fn is_success(callback: &PspCallback) -> bool {
    matches!(
        callback.data.status.to_uppercase().as_str(),
        "SUCCESS" | "SUCCESSFUL" | "COMPLETED" | "PAID"
    ) || matches!(
        callback.event.as_str(),
        "payment.success" | "charge.completed"
    )
}

/// PSPs format TZS amounts inconsistently: bare integers, integer strings,
/// or decimal strings like "3200.00". Whole-shilling values are accepted in
/// any of those shapes; a non-zero fraction is rejected.
fn parse_amount(amount: &serde_json::Value) -> Option<i64> {
    let value = match amount {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| {
            let f = n.as_f64()?;
            (f.fract() == 0.0).then_some(f as i64)
        })?,
        serde_json::Value::String(s) => parse_whole_amount(s.trim())?,
        _ => return None,
    };
    (value > 0).then_some(value)
}

fn parse_whole_amount(s: &str) -> Option<i64> {
    match s.split_once('.') {
        None => s.parse().ok(),
        Some((whole, frac)) if !frac.is_empty() && frac.bytes().all(|b| b == b'0') => {
            whole.parse().ok()
        }
        Some(_) => None,
    }
}

/// Stable idempotency key: the PSP transaction id when present, otherwise a
/// digest of the identifying fields so a retried callback maps to the same
/// event.
fn event_id(callback: &PspCallback, order_reference: &str, amount_tzs: i64) -> String {
    match &callback.data.transaction_id {
        Some(id) if !id.trim().is_empty() => format!("psp:{}", id.trim()),
        _ => format!(
            "psp:{}:{}:{}",
            order_reference,
            callback.data.status.to_uppercase(),
            amount_tzs
        ),
    }
}

fn payment_method(callback: &PspCallback) -> PaymentMethod {
    let channel = callback.data.channel.as_deref().unwrap_or(&callback.event);
    if channel.to_lowercase().contains("ussd") {
        PaymentMethod::PspUssd
    } else {
        PaymentMethod::PspCheckout
    }
}
