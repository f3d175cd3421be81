use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::models::order::PaymentStatus;

/// Internal events raised by the conversation core. The processor surfaces
/// them to the admin layer; raising an event never blocks or rolls back the
/// state transition that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: String,
        customer_id: String,
        total_tzs: i64,
    },
    PaymentApplied {
        order_id: String,
        event_id: String,
        amount_tzs: i64,
        paid_tzs: i64,
        status: PaymentStatus,
    },
    DuplicatePaymentIgnored {
        order_id: String,
        event_id: String,
    },
    /// A PSP callback referenced an order we do not know; kept visible for
    /// manual reconciliation.
    PaymentOrphaned {
        order_reference: String,
        amount_tzs: i64,
    },
    PaymentProofAttached {
        order_id: String,
        customer_id: String,
        reference: String,
    },
    AgentHandoffRequested {
        customer_id: String,
        message: String,
    },
    UssdPushRequested {
        order_id: String,
        phone: String,
        amount_tzs: i64,
    },
    /// Outbound transport failed to deliver a message intent.
    DeliveryFailed {
        to: String,
        detail: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Creates a channel pair sized for a low-volume bot.
pub fn channel() -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(1024);
    (EventSender::new(tx), rx)
}

/// Drains the event channel, logging each event for the admin-facing layer.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated {
                order_id,
                customer_id,
                total_tzs,
            } => {
                info!(%order_id, %customer_id, total_tzs, "order created");
            }
            Event::PaymentApplied {
                order_id,
                event_id,
                amount_tzs,
                paid_tzs,
                status,
            } => {
                info!(%order_id, %event_id, amount_tzs, paid_tzs, ?status, "payment applied");
            }
            Event::DuplicatePaymentIgnored { order_id, event_id } => {
                info!(%order_id, %event_id, "duplicate payment event ignored");
            }
            Event::PaymentOrphaned {
                order_reference,
                amount_tzs,
            } => {
                warn!(%order_reference, amount_tzs, "payment received for unknown order");
            }
            Event::PaymentProofAttached {
                order_id,
                customer_id,
                reference,
            } => {
                info!(%order_id, %customer_id, %reference, "payment proof attached");
            }
            Event::AgentHandoffRequested {
                customer_id,
                message,
            } => {
                info!(%customer_id, %message, "agent handoff requested");
            }
            Event::UssdPushRequested {
                order_id,
                phone,
                amount_tzs,
            } => {
                info!(%order_id, %phone, amount_tzs, "USSD push requested");
            }
            Event::DeliveryFailed { to, detail } => {
                warn!(%to, %detail, "outbound delivery failed");
            }
        }
    }
}
