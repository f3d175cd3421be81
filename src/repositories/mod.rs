//! Narrow persistence boundary for session, order, and payment records. The
//! core never assumes a specific storage engine; the in-memory implementation
//! mirrors what this system actually runs on today (a process restart loses
//! in-flight conversations and unpaid orders, a tradeoff accepted for a
//! low-volume bot).

use async_trait::async_trait;

use crate::errors::ServiceError;
use crate::models::order::{Order, OrderDraft, PaymentEvent, PaymentProof};
use crate::models::session::Session;

pub mod memory;

pub use memory::InMemoryStore;

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn load_session(&self, customer_id: &str) -> Result<Option<Session>, ServiceError>;
    async fn save_session(&self, customer_id: &str, session: &Session)
        -> Result<(), ServiceError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Persists a draft, assigning the next human-readable order code.
    async fn create_order(&self, draft: OrderDraft) -> Result<Order, ServiceError>;
    async fn get_order(&self, order_id: &str) -> Result<Option<Order>, ServiceError>;
    async fn list_orders(&self) -> Result<Vec<Order>, ServiceError>;
    async fn attach_proof(&self, order_id: &str, proof: PaymentProof)
        -> Result<(), ServiceError>;
    async fn list_proofs(&self, order_id: &str) -> Result<Vec<PaymentProof>, ServiceError>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Records a payment event. Returns `false` when the event id was already
    /// recorded for this order (idempotent upsert keyed by event id).
    async fn append_payment_event(&self, event: &PaymentEvent) -> Result<bool, ServiceError>;
    async fn get_paid_so_far(&self, order_id: &str) -> Result<i64, ServiceError>;
    async fn list_payment_events(&self, order_id: &str)
        -> Result<Vec<PaymentEvent>, ServiceError>;
}
