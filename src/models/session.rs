use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::order::DeliveryQuote;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Swahili,
    English,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CartItem {
    pub product_id: String,
    pub title: String,
    pub unit_price_tzs: i64,
    pub quantity: u32,
}

impl CartItem {
    pub fn subtotal_tzs(&self) -> i64 {
        self.unit_price_tzs * i64::from(self.quantity)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    pub items: Vec<CartItem>,
}

impl Cart {
    /// Adds a line item, merging quantity into an existing line with the same
    /// product id rather than duplicating it.
    pub fn add(&mut self, product_id: &str, title: &str, unit_price_tzs: i64, quantity: u32) {
        if let Some(item) = self.items.iter_mut().find(|i| i.product_id == product_id) {
            item.quantity += quantity;
        } else {
            self.items.push(CartItem {
                product_id: product_id.to_string(),
                title: title.to_string(),
                unit_price_tzs,
                quantity,
            });
        }
    }

    pub fn total_tzs(&self) -> i64 {
        self.items.iter().map(CartItem::subtotal_tzs).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// Where the district/ward/street narrowing currently stands, including the
/// page index for the interactive list menus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationCursor {
    pub district: Option<String>,
    pub ward: Option<String>,
    pub page: usize,
}

/// The delivery destination a customer settled on, before any quote is
/// computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryLocation {
    Pin { lat: f64, lng: f64 },
    Address {
        district: String,
        ward: String,
        street: Option<String>,
    },
}

/// Checkout data accumulated by the time fulfillment is settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FulfillmentChoice {
    Pickup { phone: String },
    Delivery { location: DeliveryLocation },
}

/// Checkout record at the quote/payment stage. `quote` is frozen on entry and
/// never recomputed; `order_id` is set the first time an order is created so
/// re-entry cannot create a second one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutQuote {
    pub fulfillment: FulfillmentChoice,
    pub customer_name: String,
    pub quote: Option<DeliveryQuote>,
    pub order_id: Option<String>,
}

/// Conversation state as a tagged union: each variant carries only the fields
/// valid for that state, so a field cannot be set while the state does not
/// expect it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    CollectingCart,
    AskFulfillment,
    AskPickupPhone,
    AskDeliveryLocation { cursor: LocationCursor },
    AskDeliveryConfirm { location: DeliveryLocation },
    AskCustomerName { fulfillment: FulfillmentChoice },
    ShowQuoteAndPaymentOptions { checkout: CheckoutQuote },
    WaitPaymentProof { order_id: String },
    AskAgentHandoff,
    TrackOrderById,
}

/// Per-customer conversation record. Created lazily on first contact, mutated
/// only by the dispatcher under the per-customer lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub state: SessionState,
    pub language: Language,
    pub cart: Cart,
    pub last_gps: Option<(f64, f64)>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            language: Language::Swahili,
            cart: Cart::default(),
            last_gps: None,
            updated_at: Utc::now(),
        }
    }

    /// Menu/reset: abandon any in-progress checkout but keep the cart.
    pub fn reset_to_menu(&mut self) {
        self.state = SessionState::Idle;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cart_merges_identical_product_ids() {
        let mut cart = Cart::default();
        cart.add("rice-5kg", "Mchele 5kg", 18000, 1);
        cart.add("sugar-1kg", "Sukari 1kg", 3200, 2);
        cart.add("rice-5kg", "Mchele 5kg", 18000, 1);

        assert_eq!(cart.items.len(), 2);
        assert_eq!(cart.items[0].quantity, 2);
        assert_eq!(cart.total_tzs(), 18000 * 2 + 3200 * 2);
    }

    #[test]
    fn reset_keeps_cart() {
        let mut session = Session::new();
        session.cart.add("rice-5kg", "Mchele 5kg", 18000, 1);
        session.state = SessionState::AskFulfillment;

        session.reset_to_menu();
        assert_eq!(session.state, SessionState::Idle);
        assert!(!session.cart.is_empty());
    }
}
