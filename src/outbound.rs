use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::message::OutboundMessage;

/// Boundary to the WhatsApp Cloud API client. The core only emits intents;
/// implementations own the HTTP call.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn deliver(&self, message: &OutboundMessage) -> Result<(), ServiceError>;
}

/// Stand-in transport that logs each intent. Used in development and tests,
/// and as the default until a Graph API client is wired in.
#[derive(Debug, Default)]
pub struct LoggingTransport;

#[async_trait]
impl MessageTransport for LoggingTransport {
    async fn deliver(&self, message: &OutboundMessage) -> Result<(), ServiceError> {
        debug!(to = %message.to(), body = %message.body(), "outbound intent");
        Ok(())
    }
}

/// Delivers a batch of intents fire-and-forget. A send failure is surfaced as
/// a `DeliveryFailed` event for the admin layer; it never rolls back the
/// state transition that produced the intent.
pub fn notify(
    transport: Arc<dyn MessageTransport>,
    events: Option<Arc<EventSender>>,
    messages: Vec<OutboundMessage>,
) {
    if messages.is_empty() {
        return;
    }
    tokio::spawn(async move {
        for message in messages {
            if let Err(err) = transport.deliver(&message).await {
                warn!(to = %message.to(), error = %err, "failed to deliver outbound message");
                if let Some(events) = &events {
                    let _ = events
                        .send(Event::DeliveryFailed {
                            to: message.to().to_string(),
                            detail: err.to_string(),
                        })
                        .await;
                }
            }
        }
    });
}
