//! WhatsApp Cloud API webhook endpoints: the GET subscription handshake and
//! the POST message feed. The POST path always acks 200 once the signature is
//! settled; retrying a batch because one message failed would only produce
//! duplicates, which the dispatcher absorbs anyway.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

use crate::models::message::{InboundKind, InboundMessage};
use crate::outbound;
use crate::AppState;

const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Meta's subscription handshake: echo `hub.challenge` when the verify token
/// matches.
#[utoipa::path(
    get,
    path = "/webhooks/whatsapp",
    tag = "webhooks",
    params(
        ("hub.mode" = String, Query, description = "Always 'subscribe'"),
        ("hub.verify_token" = String, Query, description = "Token configured in the Meta app"),
        ("hub.challenge" = String, Query, description = "Challenge to echo back")
    ),
    responses(
        (status = 200, description = "Token matched, challenge echoed"),
        (status = 403, description = "Token mismatch")
    )
)]
pub async fn verify_webhook(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<String, StatusCode> {
    let mode = params.get("hub.mode").map(String::as_str);
    let token = params.get("hub.verify_token").map(String::as_str);
    let challenge = params.get("hub.challenge");

    if mode == Some("subscribe") && token == Some(state.config.whatsapp_verify_token.as_str()) {
        if let Some(challenge) = challenge {
            debug!("webhook subscription handshake accepted");
            return Ok(challenge.clone());
        }
    }
    warn!("webhook subscription handshake rejected");
    Err(StatusCode::FORBIDDEN)
}

/// Inbound message feed. Verification failures and per-message errors are
/// logged and acked; a non-200 here only makes Meta redeliver the batch.
#[utoipa::path(
    post,
    path = "/webhooks/whatsapp",
    tag = "webhooks",
    request_body(content = String, description = "Cloud API notification envelope, verified against its raw bytes"),
    responses(
        (status = 200, description = "Batch accepted (including discarded batches)")
    )
)]
#[instrument(skip_all)]
pub async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(secret) = &state.config.whatsapp_app_secret {
        let header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !crate::webhooks::verify_hub_signature(secret, header, &body) {
            warn!("discarding webhook batch with invalid signature");
            return StatusCode::OK;
        }
    }

    let envelope: Envelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(error = %err, "discarding unparseable webhook batch");
            return StatusCode::OK;
        }
    };

    for message in envelope.into_messages() {
        let from = message.from.clone();
        match state.dispatcher.dispatch(message).await {
            Ok(replies) => {
                outbound::notify(
                    state.transport.clone(),
                    state.event_sender.clone(),
                    replies,
                );
            }
            Err(err) => {
                // One bad message must not poison the rest of the batch.
                error!(%from, error = %err, "failed to process inbound message");
            }
        }
    }

    StatusCode::OK
}

// ---- Cloud API envelope, trimmed to the fields we read ----

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
struct Change {
    value: ChangeValue,
}

#[derive(Debug, Deserialize)]
struct ChangeValue {
    metadata: Option<Metadata>,
    #[serde(default)]
    messages: Vec<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    phone_number_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    id: String,
    from: String,
    #[serde(rename = "type")]
    kind: String,
    text: Option<RawText>,
    interactive: Option<RawInteractive>,
    location: Option<RawLocation>,
    image: Option<RawImage>,
}

#[derive(Debug, Deserialize)]
struct RawText {
    body: String,
}

#[derive(Debug, Deserialize)]
struct RawInteractive {
    list_reply: Option<RawReply>,
    button_reply: Option<RawReply>,
}

#[derive(Debug, Deserialize)]
struct RawReply {
    id: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct RawLocation {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct RawImage {
    id: String,
    caption: Option<String>,
}

impl Envelope {
    /// Flattens the nested batch into normalized messages, skipping kinds the
    /// bot does not handle (reactions, stickers, status updates).
    fn into_messages(self) -> Vec<InboundMessage> {
        let mut out = Vec::new();
        for entry in self.entry {
            for change in entry.changes {
                let phone_number_id = change
                    .value
                    .metadata
                    .as_ref()
                    .and_then(|m| m.phone_number_id.clone());
                for raw in change.value.messages {
                    let kind = match raw.kind.as_str() {
                        "text" => raw.text.map(|t| InboundKind::Text { body: t.body }),
                        "interactive" => raw.interactive.and_then(|i| {
                            i.list_reply.or(i.button_reply).map(|r| {
                                InboundKind::Interactive {
                                    id: r.id,
                                    title: r.title,
                                }
                            })
                        }),
                        "location" => raw.location.map(|l| InboundKind::Location {
                            lat: l.latitude,
                            lng: l.longitude,
                        }),
                        "image" => raw.image.map(|i| InboundKind::Image {
                            media_id: i.id,
                            caption: i.caption,
                        }),
                        other => {
                            debug!(kind = other, "skipping unsupported message kind");
                            None
                        }
                    };
                    if let Some(kind) = kind {
                        out.push(InboundMessage {
                            id: raw.id,
                            from: raw.from,
                            phone_number_id: phone_number_id.clone(),
                            kind,
                        });
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(json: &str) -> Envelope {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn parses_text_message_batch() {
        let messages = envelope(
            r#"{
                "object": "whatsapp_business_account",
                "entry": [{
                    "id": "1",
                    "changes": [{
                        "field": "messages",
                        "value": {
                            "metadata": {"display_phone_number": "255700000000", "phone_number_id": "pn-1"},
                            "messages": [
                                {"id": "wamid.1", "from": "255700000001", "type": "text", "text": {"body": "habari"}}
                            ]
                        }
                    }]
                }]
            }"#,
        )
        .into_messages();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "wamid.1");
        assert_eq!(messages[0].phone_number_id.as_deref(), Some("pn-1"));
        assert_eq!(
            messages[0].kind,
            InboundKind::Text {
                body: "habari".to_string()
            }
        );
    }

    #[test]
    fn parses_list_reply_and_location() {
        let messages = envelope(
            r#"{
                "entry": [{
                    "changes": [{
                        "value": {
                            "messages": [
                                {"id": "wamid.2", "from": "255700000001", "type": "interactive",
                                 "interactive": {"type": "list_reply", "list_reply": {"id": "prod:rice-5kg", "title": "Mchele 5kg"}}},
                                {"id": "wamid.3", "from": "255700000001", "type": "location",
                                 "location": {"latitude": -6.77, "longitude": 39.26}}
                            ]
                        }
                    }]
                }]
            }"#,
        )
        .into_messages();

        assert_eq!(messages.len(), 2);
        assert!(matches!(&messages[0].kind, InboundKind::Interactive { id, .. } if id == "prod:rice-5kg"));
        assert!(matches!(messages[1].kind, InboundKind::Location { .. }));
    }

    #[test]
    fn unsupported_kinds_are_skipped() {
        let messages = envelope(
            r#"{
                "entry": [{
                    "changes": [{
                        "value": {
                            "messages": [
                                {"id": "wamid.4", "from": "255700000001", "type": "sticker"}
                            ]
                        }
                    }]
                }]
            }"#,
        )
        .into_messages();
        assert!(messages.is_empty());
    }

    #[test]
    fn status_only_batches_yield_no_messages() {
        let messages = envelope(
            r#"{"entry": [{"changes": [{"value": {"statuses": [{"id": "wamid.5"}]}}]}]}"#,
        )
        .into_messages();
        assert!(messages.is_empty());
    }
}
