use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::keyed_lock::KeyedLocks;
use crate::models::order::{LedgerState, Order, PaymentEvent};
use crate::repositories::{OrderRepository, PaymentRepository};

/// Accumulates payment events against orders. Safe under at-least-once
/// delivery: event ids are the idempotency key, application is serialized per
/// order (PSP callbacks arrive outside any session, so the ledger carries its
/// own lock scope), and status is recomputed from the events on every apply.
pub struct PaymentLedger {
    orders: Arc<dyn OrderRepository>,
    payments: Arc<dyn PaymentRepository>,
    locks: KeyedLocks,
    event_sender: Option<Arc<EventSender>>,
}

impl PaymentLedger {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        payments: Arc<dyn PaymentRepository>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            orders,
            payments,
            locks: KeyedLocks::new(),
            event_sender,
        }
    }

    /// Applies one payment event. Re-applying a known event id is a no-op
    /// returning the current totals. Overpayment is recorded as paid with the
    /// excess visible for manual reconciliation.
    #[instrument(skip(self, event), fields(order_id = %event.order_id, event_id = %event.id))]
    pub async fn apply(&self, event: PaymentEvent) -> Result<LedgerState, ServiceError> {
        if event.amount_tzs <= 0 {
            return Err(ServiceError::ValidationError(
                "payment amount must be positive".to_string(),
            ));
        }

        let _guard = self.locks.acquire(&event.order_id).await;

        let order = self
            .orders
            .get_order(&event.order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", event.order_id)))?;

        let applied = self.payments.append_payment_event(&event).await?;
        let paid = self.payments.get_paid_so_far(&event.order_id).await?;
        let state = LedgerState::derive(paid, order.total_tzs);

        if applied {
            info!(
                amount_tzs = event.amount_tzs,
                paid_tzs = state.paid_tzs,
                status = ?state.status,
                "payment applied"
            );
            if let Some(events) = &self.event_sender {
                if let Err(e) = events
                    .send(Event::PaymentApplied {
                        order_id: event.order_id.clone(),
                        event_id: event.id.clone(),
                        amount_tzs: event.amount_tzs,
                        paid_tzs: state.paid_tzs,
                        status: state.status,
                    })
                    .await
                {
                    warn!(error = %e, "failed to send payment applied event");
                }
            }
        } else {
            debug!("duplicate payment event absorbed");
            if let Some(events) = &self.event_sender {
                let _ = events
                    .send(Event::DuplicatePaymentIgnored {
                        order_id: event.order_id.clone(),
                        event_id: event.id.clone(),
                    })
                    .await;
            }
        }

        Ok(state)
    }

    /// Current derived totals for an order.
    pub async fn state_for(&self, order: &Order) -> Result<LedgerState, ServiceError> {
        let paid = self.payments.get_paid_so_far(&order.order_id).await?;
        Ok(LedgerState::derive(paid, order.total_tzs))
    }
}
