use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::session::CartItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Fulfillment {
    Pickup,
    Delivery,
}

/// Which tier of the distance hierarchy produced a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum QuoteSource {
    Gps,
    ExactStreet,
    WardMedian,
    DistrictAverage,
    Default,
}

/// A frozen delivery quote. Computed once per checkout and reused afterwards,
/// so the price shown always matches the price charged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DeliveryQuote {
    pub source: QuoteSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ward: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    pub distance_km: f64,
    pub fee_tzs: i64,
    /// Set when the distance exceeds the configured service radius. The
    /// dispatcher decides whether to reject the order.
    pub out_of_service: bool,
}

/// Immutable snapshot of a cart at checkout time. Only the derived payment
/// status (kept in the ledger, not here) changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub order_id: String,
    pub customer_id: String,
    pub customer_name: String,
    pub contact_phone: String,
    pub items: Vec<CartItem>,
    pub total_tzs: i64,
    pub fulfillment: Fulfillment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_quote: Option<DeliveryQuote>,
    pub created_at: DateTime<Utc>,
}

/// Fields the caller supplies when creating an order; the repository assigns
/// the order code and timestamp.
#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub customer_id: String,
    pub customer_name: String,
    pub contact_phone: String,
    pub items: Vec<CartItem>,
    pub total_tzs: i64,
    pub fulfillment: Fulfillment,
    pub delivery_quote: Option<DeliveryQuote>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Manual,
    PspUssd,
    PspCheckout,
}

/// One discrete payment signal applied to an order's ledger. The id is the
/// idempotency key: applying the same id twice must not double-count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PaymentEvent {
    pub id: String,
    pub order_id: String,
    pub amount_tzs: i64,
    pub method: PaymentMethod,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Awaiting,
    Partial,
    Paid,
}

/// Derived ledger totals for one order. Never stored; recomputed from the
/// payment events on every read so it cannot drift.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LedgerState {
    pub paid_tzs: i64,
    pub status: PaymentStatus,
}

impl LedgerState {
    pub fn derive(paid_tzs: i64, total_tzs: i64) -> Self {
        let paid_tzs = paid_tzs.max(0);
        let status = if paid_tzs == 0 {
            PaymentStatus::Awaiting
        } else if paid_tzs < total_tzs {
            PaymentStatus::Partial
        } else {
            PaymentStatus::Paid
        };
        Self { paid_tzs, status }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProofKind {
    TextReference,
    ImageScreenshot,
}

/// Evidence of a manual payment, attached to an order for the admin to
/// reconcile. Attaching proof does not change the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PaymentProof {
    pub kind: ProofKind,
    pub reference: String,
    pub received_at: DateTime<Utc>,
}
