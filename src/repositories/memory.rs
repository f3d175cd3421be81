use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::errors::ServiceError;
use crate::models::order::{Order, OrderDraft, PaymentEvent, PaymentProof};
use crate::models::session::Session;
use crate::repositories::{OrderRepository, PaymentRepository, SessionRepository};

const ORDER_CODE_PREFIX: &str = "DK";
const ORDER_CODE_SEED: u64 = 1000;

/// In-process store backing all three repositories. Concurrency control is
/// the caller's job (the keyed locks); the maps themselves only need to be
/// thread-safe.
#[derive(Debug)]
pub struct InMemoryStore {
    sessions: DashMap<String, Session>,
    orders: DashMap<String, Order>,
    proofs: DashMap<String, Vec<PaymentProof>>,
    payments: DashMap<String, Vec<PaymentEvent>>,
    applied_event_ids: DashMap<String, HashSet<String>>,
    order_seq: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            orders: DashMap::new(),
            proofs: DashMap::new(),
            payments: DashMap::new(),
            applied_event_ids: DashMap::new(),
            order_seq: AtomicU64::new(ORDER_CODE_SEED),
        }
    }

    fn next_order_code(&self) -> String {
        let seq = self.order_seq.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{}", ORDER_CODE_PREFIX, seq)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionRepository for InMemoryStore {
    async fn load_session(&self, customer_id: &str) -> Result<Option<Session>, ServiceError> {
        Ok(self.sessions.get(customer_id).map(|s| s.clone()))
    }

    async fn save_session(
        &self,
        customer_id: &str,
        session: &Session,
    ) -> Result<(), ServiceError> {
        self.sessions
            .insert(customer_id.to_string(), session.clone());
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for InMemoryStore {
    async fn create_order(&self, draft: OrderDraft) -> Result<Order, ServiceError> {
        let order = Order {
            order_id: self.next_order_code(),
            customer_id: draft.customer_id,
            customer_name: draft.customer_name,
            contact_phone: draft.contact_phone,
            items: draft.items,
            total_tzs: draft.total_tzs,
            fulfillment: draft.fulfillment,
            delivery_quote: draft.delivery_quote,
            created_at: Utc::now(),
        };
        self.orders.insert(order.order_id.clone(), order.clone());
        Ok(order)
    }

    async fn get_order(&self, order_id: &str) -> Result<Option<Order>, ServiceError> {
        Ok(self.orders.get(order_id).map(|o| o.clone()))
    }

    async fn list_orders(&self) -> Result<Vec<Order>, ServiceError> {
        let mut orders: Vec<Order> = self.orders.iter().map(|o| o.clone()).collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn attach_proof(
        &self,
        order_id: &str,
        proof: PaymentProof,
    ) -> Result<(), ServiceError> {
        if !self.orders.contains_key(order_id) {
            return Err(ServiceError::NotFound(format!(
                "Order {} not found",
                order_id
            )));
        }
        self.proofs
            .entry(order_id.to_string())
            .or_default()
            .push(proof);
        Ok(())
    }

    async fn list_proofs(&self, order_id: &str) -> Result<Vec<PaymentProof>, ServiceError> {
        Ok(self
            .proofs
            .get(order_id)
            .map(|p| p.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl PaymentRepository for InMemoryStore {
    async fn append_payment_event(&self, event: &PaymentEvent) -> Result<bool, ServiceError> {
        let mut applied = self
            .applied_event_ids
            .entry(event.order_id.clone())
            .or_default();
        if !applied.insert(event.id.clone()) {
            return Ok(false);
        }
        self.payments
            .entry(event.order_id.clone())
            .or_default()
            .push(event.clone());
        Ok(true)
    }

    async fn get_paid_so_far(&self, order_id: &str) -> Result<i64, ServiceError> {
        Ok(self
            .payments
            .get(order_id)
            .map(|events| events.iter().map(|e| e.amount_tzs).sum())
            .unwrap_or(0))
    }

    async fn list_payment_events(
        &self,
        order_id: &str,
    ) -> Result<Vec<PaymentEvent>, ServiceError> {
        Ok(self
            .payments
            .get(order_id)
            .map(|e| e.clone())
            .unwrap_or_default())
    }
}
