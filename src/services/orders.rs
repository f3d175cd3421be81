use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::order::{
    DeliveryQuote, Fulfillment, Order, OrderDraft, PaymentProof,
};
use crate::models::session::Cart;
use crate::repositories::OrderRepository;

/// Turns a session's cart into an immutable order and tracks payment proof
/// evidence for the admin side.
#[derive(Clone)]
pub struct OrderService {
    repo: Arc<dyn OrderRepository>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(repo: Arc<dyn OrderRepository>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self { repo, event_sender }
    }

    /// Creates an order from a cart snapshot. The items are copied, not
    /// aliased, so later cart mutations cannot touch the order; the total is
    /// fixed at creation time regardless of later catalog price changes.
    #[instrument(skip(self, cart, delivery_quote), fields(customer_id = %customer_id))]
    pub async fn create_from_cart(
        &self,
        customer_id: &str,
        customer_name: &str,
        contact_phone: &str,
        cart: &Cart,
        fulfillment: Fulfillment,
        delivery_quote: Option<DeliveryQuote>,
    ) -> Result<Order, ServiceError> {
        if cart.is_empty() {
            return Err(ServiceError::InvalidOperation(
                "cannot create an order from an empty cart".to_string(),
            ));
        }
        if fulfillment == Fulfillment::Delivery && delivery_quote.is_none() {
            return Err(ServiceError::InvalidOperation(
                "delivery order requires a delivery quote".to_string(),
            ));
        }
        if fulfillment == Fulfillment::Pickup && delivery_quote.is_some() {
            return Err(ServiceError::InvalidOperation(
                "pickup order must not carry a delivery quote".to_string(),
            ));
        }

        let draft = OrderDraft {
            customer_id: customer_id.to_string(),
            customer_name: customer_name.to_string(),
            contact_phone: contact_phone.to_string(),
            items: cart.items.clone(),
            total_tzs: cart.total_tzs(),
            fulfillment,
            delivery_quote,
        };
        let order = self.repo.create_order(draft).await?;
        info!(order_id = %order.order_id, total_tzs = order.total_tzs, "order created");

        if let Some(events) = &self.event_sender {
            if let Err(e) = events
                .send(Event::OrderCreated {
                    order_id: order.order_id.clone(),
                    customer_id: customer_id.to_string(),
                    total_tzs: order.total_tzs,
                })
                .await
            {
                warn!(order_id = %order.order_id, error = %e, "failed to send order created event");
            }
        }

        Ok(order)
    }

    pub async fn get_order(&self, order_id: &str) -> Result<Option<Order>, ServiceError> {
        self.repo.get_order(order_id).await
    }

    pub async fn list_orders(&self) -> Result<Vec<Order>, ServiceError> {
        self.repo.list_orders().await
    }

    /// Attaches payment evidence and notifies the admin side. Does not touch
    /// the ledger; status only moves through payment events.
    #[instrument(skip(self, proof), fields(order_id = %order_id))]
    pub async fn attach_proof(
        &self,
        order_id: &str,
        customer_id: &str,
        proof: PaymentProof,
    ) -> Result<(), ServiceError> {
        let reference = proof.reference.clone();
        self.repo.attach_proof(order_id, proof).await?;

        if let Some(events) = &self.event_sender {
            if let Err(e) = events
                .send(Event::PaymentProofAttached {
                    order_id: order_id.to_string(),
                    customer_id: customer_id.to_string(),
                    reference,
                })
                .await
            {
                warn!(order_id = %order_id, error = %e, "failed to send payment proof event");
            }
        }
        Ok(())
    }

    pub async fn list_proofs(&self, order_id: &str) -> Result<Vec<PaymentProof>, ServiceError> {
        self.repo.list_proofs(order_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::order::QuoteSource;
    use crate::repositories::InMemoryStore;

    fn service() -> OrderService {
        OrderService::new(Arc::new(InMemoryStore::new()), None)
    }

    fn cart() -> Cart {
        let mut cart = Cart::default();
        cart.add("a", "Bidhaa A", 1000, 2);
        cart.add("b", "Bidhaa B", 2500, 1);
        cart
    }

    #[tokio::test]
    async fn order_total_and_items_snapshot() {
        let service = service();
        let cart = cart();
        let order = service
            .create_from_cart("255700000001", "Asha", "255700000001", &cart, Fulfillment::Pickup, None)
            .await
            .unwrap();

        assert_eq!(order.total_tzs, 4500);
        assert_eq!(order.items.len(), 2);
    }

    #[tokio::test]
    async fn order_does_not_alias_the_live_cart() {
        let service = service();
        let mut cart = cart();
        let order = service
            .create_from_cart("255700000001", "Asha", "255700000001", &cart, Fulfillment::Pickup, None)
            .await
            .unwrap();

        cart.add("a", "Bidhaa A", 1000, 10);
        cart.items[1].unit_price_tzs = 99999;

        let stored = service.get_order(&order.order_id).await.unwrap().unwrap();
        assert_eq!(stored.total_tzs, 4500);
        assert_eq!(stored.items[0].quantity, 2);
        assert_eq!(stored.items[1].unit_price_tzs, 2500);
    }

    #[tokio::test]
    async fn empty_cart_is_rejected() {
        let service = service();
        let result = service
            .create_from_cart(
                "255700000001",
                "Asha",
                "255700000001",
                &Cart::default(),
                Fulfillment::Pickup,
                None,
            )
            .await;
        assert!(matches!(result, Err(ServiceError::InvalidOperation(_))));
    }

    #[tokio::test]
    async fn delivery_requires_quote() {
        let service = service();
        let result = service
            .create_from_cart(
                "255700000001",
                "Asha",
                "255700000001",
                &cart(),
                Fulfillment::Delivery,
                None,
            )
            .await;
        assert!(result.is_err());

        let quote = DeliveryQuote {
            source: QuoteSource::ExactStreet,
            district: Some("Kinondoni".to_string()),
            ward: Some("Mikocheni".to_string()),
            street: Some("Haile Selassie".to_string()),
            distance_km: 6.2,
            fee_tzs: 4500,
            out_of_service: false,
        };
        let order = service
            .create_from_cart(
                "255700000001",
                "Asha",
                "255700000001",
                &cart(),
                Fulfillment::Delivery,
                Some(quote.clone()),
            )
            .await
            .unwrap();
        assert_eq!(order.delivery_quote, Some(quote));
    }
}
