use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::keyed_lock::KeyedLocks;
use crate::models::message::{InboundKind, InboundMessage, MenuRow, OutboundMessage};
use crate::models::order::{DeliveryQuote, Fulfillment, PaymentProof, ProofKind};
use crate::models::session::{
    CheckoutQuote, DeliveryLocation, FulfillmentChoice, Language, LocationCursor, Session,
    SessionState,
};
use crate::services::catalog::Catalog;
use crate::services::copy;
use crate::services::distance::{match_name, normalize, DistanceResolver};
use crate::services::ledger::PaymentLedger;
use crate::services::orders::OrderService;
use crate::services::quoting::FeeQuoteEngine;
use crate::services::sessions::SessionStore;

/// Most recent inbound message ids kept for redelivery detection.
const SEEN_MESSAGE_CAP: usize = 10_000;

/// Consumes normalized inbound messages and advances the per-customer state
/// machine, emitting outbound message intents and order/ledger side effects.
///
/// All session mutation happens here, under the per-customer lock, so two
/// concurrent events for one customer cannot interleave their
/// read-modify-write cycles. Message ids are remembered to absorb webhook
/// redelivery.
pub struct Dispatcher {
    sessions: SessionStore,
    locks: KeyedLocks,
    catalog: Arc<Catalog>,
    resolver: Arc<DistanceResolver>,
    quoting: Arc<FeeQuoteEngine>,
    orders: Arc<OrderService>,
    ledger: Arc<PaymentLedger>,
    event_sender: Option<Arc<EventSender>>,
    seen_messages: DashMap<String, ()>,
    seen_order: Mutex<VecDeque<String>>,
    business_name: String,
    payment_instructions: String,
    menu_page_size: usize,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: SessionStore,
        catalog: Arc<Catalog>,
        resolver: Arc<DistanceResolver>,
        quoting: Arc<FeeQuoteEngine>,
        orders: Arc<OrderService>,
        ledger: Arc<PaymentLedger>,
        event_sender: Option<Arc<EventSender>>,
        business_name: String,
        payment_instructions: String,
        menu_page_size: usize,
    ) -> Self {
        Self {
            sessions,
            locks: KeyedLocks::new(),
            catalog,
            resolver,
            quoting,
            orders,
            ledger,
            event_sender,
            seen_messages: DashMap::new(),
            seen_order: Mutex::new(VecDeque::new()),
            business_name,
            payment_instructions,
            menu_page_size,
        }
    }

    /// Processes one inbound message end to end: lock the customer, load the
    /// session, transition, save. Returns the outbound intents to deliver.
    #[instrument(skip(self, msg), fields(message_id = %msg.id, from = %msg.from))]
    pub async fn dispatch(
        &self,
        msg: InboundMessage,
    ) -> Result<Vec<OutboundMessage>, ServiceError> {
        let _guard = self.locks.acquire(&msg.from).await;

        // Checked under the customer lock: two concurrent deliveries of one
        // id serialize here, and the loser sees the winner's mark. The mark
        // is written only after a successful save, so a failed attempt is
        // still retryable.
        if self.seen_messages.contains_key(&msg.id) {
            debug!("duplicate inbound message absorbed");
            return Ok(Vec::new());
        }

        let mut session = self.sessions.get(&msg.from).await?;
        let replies = self.transition(&mut session, &msg).await?;
        session.updated_at = chrono::Utc::now();
        self.sessions.save(&msg.from, &session).await?;

        self.remember_message_id(&msg.id).await;
        Ok(replies)
    }

    /// Records a processed message id, evicting the oldest entries once the
    /// window exceeds its cap so a long-running process does not accumulate
    /// ids without bound. The window only needs to outlast the webhook
    /// redelivery horizon.
    async fn remember_message_id(&self, id: &str) {
        if self.seen_messages.insert(id.to_string(), ()).is_some() {
            return;
        }
        let mut order = self.seen_order.lock().await;
        order.push_back(id.to_string());
        while order.len() > SEEN_MESSAGE_CAP {
            if let Some(evicted) = order.pop_front() {
                self.seen_messages.remove(&evicted);
            }
        }
    }

    async fn transition(
        &self,
        session: &mut Session,
        msg: &InboundMessage,
    ) -> Result<Vec<OutboundMessage>, ServiceError> {
        let to = msg.from.clone();
        let lang = session.language;

        // Global commands work from any state.
        if let InboundKind::Text { body } = &msg.kind {
            match normalize(body).as_str() {
                "menu" | "anza" | "mwanzo" | "reset" | "0" => {
                    session.reset_to_menu();
                    return Ok(self.main_menu(session, &to));
                }
                "english" => {
                    session.language = Language::English;
                    return Ok(self.prompt_for_state(session, &to));
                }
                "swahili" | "kiswahili" => {
                    session.language = Language::Swahili;
                    return Ok(self.prompt_for_state(session, &to));
                }
                _ => {}
            }
        }

        let state = session.state.clone();
        match state {
            SessionState::Idle => Ok(self.on_idle(session, msg, &to)),

            SessionState::CollectingCart => Ok(self.on_collecting_cart(session, msg, &to)),

            SessionState::AskFulfillment => match &msg.kind {
                InboundKind::Interactive { id, .. } if id == "pickup" => {
                    session.state = SessionState::AskPickupPhone;
                    Ok(vec![self.text(&to, copy::ask_pickup_phone(lang))])
                }
                InboundKind::Interactive { id, .. } if id == "delivery" => {
                    session.state = SessionState::AskDeliveryLocation {
                        cursor: LocationCursor::default(),
                    };
                    Ok(self.delivery_location_prompt(session, &to))
                }
                _ => Ok(self.prompt_for_state(session, &to)),
            },

            SessionState::AskPickupPhone => match &msg.kind {
                InboundKind::Text { body } => {
                    match sanitize_phone(body) {
                        Some(phone) => {
                            session.state = SessionState::AskCustomerName {
                                fulfillment: FulfillmentChoice::Pickup { phone },
                            };
                            Ok(vec![self.text(&to, copy::ask_customer_name(lang))])
                        }
                        None => Ok(vec![self.text(&to, copy::invalid_phone(lang))]),
                    }
                }
                _ => Ok(self.prompt_for_state(session, &to)),
            },

            SessionState::AskDeliveryLocation { cursor } => {
                Ok(self.on_delivery_location(session, msg, &to, cursor))
            }

            SessionState::AskDeliveryConfirm { location } => match &msg.kind {
                InboundKind::Interactive { id, .. } if id == "confirm" => {
                    session.state = SessionState::AskCustomerName {
                        fulfillment: FulfillmentChoice::Delivery { location },
                    };
                    Ok(vec![self.text(&to, copy::ask_customer_name(lang))])
                }
                InboundKind::Interactive { id, .. } if id == "change" => {
                    session.state = SessionState::AskDeliveryLocation {
                        cursor: LocationCursor::default(),
                    };
                    Ok(self.delivery_location_prompt(session, &to))
                }
                InboundKind::Location { lat, lng } => {
                    session.last_gps = Some((*lat, *lng));
                    session.state = SessionState::AskDeliveryConfirm {
                        location: DeliveryLocation::Pin {
                            lat: *lat,
                            lng: *lng,
                        },
                    };
                    Ok(vec![self.confirm_prompt(session, &to)])
                }
                _ => Ok(self.prompt_for_state(session, &to)),
            },

            SessionState::AskCustomerName { fulfillment } => match &msg.kind {
                InboundKind::Text { body } if !body.trim().is_empty() => {
                    self.enter_quote_stage(session, &to, fulfillment, body.trim())
                        .await
                }
                _ => Ok(self.prompt_for_state(session, &to)),
            },

            SessionState::ShowQuoteAndPaymentOptions { checkout } => {
                self.on_payment_options(session, msg, &to, checkout).await
            }

            SessionState::WaitPaymentProof { order_id } => {
                self.on_payment_proof(session, msg, &to, &order_id).await
            }

            SessionState::TrackOrderById => match &msg.kind {
                InboundKind::Text { body } => {
                    let code = body.trim().to_uppercase();
                    match self.orders.get_order(&code).await? {
                        Some(order) => {
                            let state = self.ledger.state_for(&order).await?;
                            session.state = SessionState::Idle;
                            Ok(vec![self.text(
                                &to,
                                &copy::order_status(
                                    lang,
                                    &order.order_id,
                                    order.total_tzs,
                                    state.paid_tzs,
                                    copy::status_label(lang, state.status),
                                ),
                            )])
                        }
                        None => Ok(vec![self.text(&to, copy::order_not_found(lang))]),
                    }
                }
                _ => Ok(self.prompt_for_state(session, &to)),
            },

            SessionState::AskAgentHandoff => match &msg.kind {
                InboundKind::Text { body } => {
                    self.emit(Event::AgentHandoffRequested {
                        customer_id: to.clone(),
                        message: body.trim().to_string(),
                    })
                    .await;
                    session.state = SessionState::Idle;
                    Ok(vec![self.text(&to, copy::agent_notified(lang))])
                }
                _ => Ok(self.prompt_for_state(session, &to)),
            },
        }
    }

    fn on_idle(
        &self,
        session: &mut Session,
        msg: &InboundMessage,
        to: &str,
    ) -> Vec<OutboundMessage> {
        let lang = session.language;
        match &msg.kind {
            InboundKind::Interactive { id, .. } => match id.as_str() {
                "shop" => {
                    session.state = SessionState::CollectingCart;
                    vec![self.product_list(lang, to)]
                }
                "track" => {
                    session.state = SessionState::TrackOrderById;
                    vec![self.text(to, copy::ask_order_code(lang))]
                }
                "agent" => {
                    session.state = SessionState::AskAgentHandoff;
                    vec![self.text(to, copy::ask_agent_message(lang))]
                }
                _ => self.main_menu(session, to),
            },
            _ => self.main_menu(session, to),
        }
    }

    fn on_collecting_cart(
        &self,
        session: &mut Session,
        msg: &InboundMessage,
        to: &str,
    ) -> Vec<OutboundMessage> {
        let lang = session.language;
        match &msg.kind {
            InboundKind::Interactive { id, .. } => {
                if let Some(product_id) = id.strip_prefix("prod:") {
                    return match self.catalog.get(product_id) {
                        Some(product) => {
                            session.cart.add(
                                &product.id,
                                &product.title,
                                product.unit_price_tzs,
                                1,
                            );
                            self.cart_view(session, to)
                        }
                        None => {
                            // Lookup miss: user-facing fallback, no state change.
                            vec![self.text(to, copy::product_not_found(lang))]
                        }
                    };
                }
                match id.as_str() {
                    "checkout" => {
                        if session.cart.is_empty() {
                            vec![
                                self.text(to, copy::cart_is_empty(lang)),
                                self.product_list(lang, to),
                            ]
                        } else {
                            session.state = SessionState::AskFulfillment;
                            vec![self.fulfillment_buttons(lang, to)]
                        }
                    }
                    "more" => vec![self.product_list(lang, to)],
                    "menu" => {
                        session.reset_to_menu();
                        self.main_menu(session, to)
                    }
                    _ => vec![self.product_list(lang, to)],
                }
            }
            _ => vec![self.product_list(lang, to)],
        }
    }

    fn on_delivery_location(
        &self,
        session: &mut Session,
        msg: &InboundMessage,
        to: &str,
        cursor: LocationCursor,
    ) -> Vec<OutboundMessage> {
        let lang = session.language;
        match &msg.kind {
            // A location pin short-circuits the narrowing flow entirely.
            InboundKind::Location { lat, lng } => {
                session.last_gps = Some((*lat, *lng));
                session.state = SessionState::AskDeliveryConfirm {
                    location: DeliveryLocation::Pin {
                        lat: *lat,
                        lng: *lng,
                    },
                };
                vec![self.confirm_prompt(session, to)]
            }
            InboundKind::Interactive { id, .. } => {
                if let Some(name) = id.strip_prefix("d:") {
                    let cursor = LocationCursor {
                        district: Some(name.to_string()),
                        ward: None,
                        page: 0,
                    };
                    let menu = self.location_menu(lang, to, &cursor);
                    session.state = SessionState::AskDeliveryLocation { cursor };
                    return menu;
                }
                if id == "s:-" {
                    return self.finish_address(session, to, cursor, None);
                }
                if let Some(name) = id.strip_prefix("s:") {
                    return self.finish_address(session, to, cursor, Some(name.to_string()));
                }
                if let Some(name) = id.strip_prefix("w:") {
                    let cursor = LocationCursor {
                        district: cursor.district,
                        ward: Some(name.to_string()),
                        page: 0,
                    };
                    let menu = self.location_menu(lang, to, &cursor);
                    session.state = SessionState::AskDeliveryLocation { cursor };
                    return menu;
                }
                if id == "page:next" {
                    let cursor = LocationCursor {
                        page: cursor.page + 1,
                        ..cursor
                    };
                    let menu = self.location_menu(lang, to, &cursor);
                    session.state = SessionState::AskDeliveryLocation { cursor };
                    return menu;
                }
                self.delivery_location_prompt(session, to)
            }
            InboundKind::Text { body } => {
                let input = body.trim();
                if !self.resolver.has_dataset() {
                    // No reference data: accept the free-text description and
                    // let the resolver fall through to the default tier.
                    return self.finish_free_text(session, to, input);
                }
                match (&cursor.district, &cursor.ward) {
                    (None, _) => match self.resolver.match_district(input) {
                        Some(district) => {
                            let cursor = LocationCursor {
                                district: Some(district),
                                ward: None,
                                page: 0,
                            };
                            let menu = self.location_menu(lang, to, &cursor);
                            session.state = SessionState::AskDeliveryLocation { cursor };
                            menu
                        }
                        None => {
                            let mut replies =
                                vec![self.text(to, copy::district_not_matched(lang))];
                            replies.extend(self.location_menu(lang, to, &cursor));
                            replies
                        }
                    },
                    (Some(district), None) => {
                        let wards = self.resolver.wards(district);
                        match match_name(&wards, input) {
                            Some(ward) => {
                                let cursor = LocationCursor {
                                    district: Some(district.clone()),
                                    ward: Some(ward),
                                    page: 0,
                                };
                                let menu = self.location_menu(lang, to, &cursor);
                                session.state = SessionState::AskDeliveryLocation { cursor };
                                menu
                            }
                            None => self.location_menu(lang, to, &cursor),
                        }
                    }
                    (Some(_), Some(_)) => {
                        // District and ward are settled; free text is the street.
                        self.finish_address(session, to, cursor, Some(input.to_string()))
                    }
                }
            }
            _ => self.delivery_location_prompt(session, to),
        }
    }

    fn finish_address(
        &self,
        session: &mut Session,
        to: &str,
        cursor: LocationCursor,
        street: Option<String>,
    ) -> Vec<OutboundMessage> {
        let lang = session.language;
        let (district, ward) = match (cursor.district, cursor.ward) {
            (Some(d), Some(w)) => (d, w),
            (Some(d), None) => (d, String::new()),
            _ => {
                return self.delivery_location_prompt(session, to);
            }
        };
        let place = match &street {
            Some(street) => format!("{}, {}, {}", street, ward, district),
            None => format!("{}, {}", ward, district),
        };
        session.state = SessionState::AskDeliveryConfirm {
            location: DeliveryLocation::Address {
                district,
                ward,
                street,
            },
        };
        vec![self.buttons(
            to,
            &copy::confirm_address(lang, &place),
            vec![
                MenuRow::new("confirm", copy::btn_confirm(lang)),
                MenuRow::new("change", copy::btn_change(lang)),
            ],
        )]
    }

    fn finish_free_text(
        &self,
        session: &mut Session,
        to: &str,
        input: &str,
    ) -> Vec<OutboundMessage> {
        let lang = session.language;
        if input.is_empty() {
            return self.delivery_location_prompt(session, to);
        }
        session.state = SessionState::AskDeliveryConfirm {
            location: DeliveryLocation::Address {
                district: input.to_string(),
                ward: String::new(),
                street: None,
            },
        };
        vec![self.buttons(
            to,
            &copy::confirm_address(lang, input),
            vec![
                MenuRow::new("confirm", copy::btn_confirm(lang)),
                MenuRow::new("change", copy::btn_change(lang)),
            ],
        )]
    }

    /// Entry into the quote stage: the only place the distance resolver and
    /// fee engine run. The result is frozen onto the checkout record and
    /// reused by every later transition, so the price shown is the price
    /// charged.
    async fn enter_quote_stage(
        &self,
        session: &mut Session,
        to: &str,
        fulfillment: FulfillmentChoice,
        customer_name: &str,
    ) -> Result<Vec<OutboundMessage>, ServiceError> {
        let lang = session.language;

        let quote = match &fulfillment {
            FulfillmentChoice::Pickup { .. } => None,
            FulfillmentChoice::Delivery { location } => {
                let (resolved, district, ward, street) = match location {
                    DeliveryLocation::Pin { lat, lng } => (
                        self.resolver.resolve(None, None, None, Some((*lat, *lng))),
                        None,
                        None,
                        None,
                    ),
                    DeliveryLocation::Address {
                        district,
                        ward,
                        street,
                    } => (
                        self.resolver.resolve(
                            Some(district),
                            Some(ward).filter(|w| !w.is_empty()).map(String::as_str),
                            street.as_deref(),
                            None,
                        ),
                        Some(district.clone()),
                        Some(ward.clone()).filter(|w| !w.is_empty()),
                        street.clone(),
                    ),
                };
                let fee = self.quoting.quote(resolved.distance_km);
                let out_of_service = self.quoting.out_of_service(resolved.distance_km);

                if out_of_service {
                    // The engine only flags; rejecting is this dispatcher's call.
                    session.state = SessionState::AskDeliveryLocation {
                        cursor: LocationCursor::default(),
                    };
                    let mut replies = vec![self.text(to, copy::out_of_service(lang))];
                    replies.extend(self.delivery_location_prompt(session, to));
                    return Ok(replies);
                }

                Some(DeliveryQuote {
                    source: resolved.source,
                    district,
                    ward,
                    street,
                    distance_km: resolved.distance_km,
                    fee_tzs: fee,
                    out_of_service,
                })
            }
        };

        let checkout = CheckoutQuote {
            fulfillment,
            customer_name: customer_name.to_string(),
            quote,
            order_id: None,
        };
        let summary = self.quote_summary_message(session, to, &checkout);
        session.state = SessionState::ShowQuoteAndPaymentOptions { checkout };
        Ok(vec![summary])
    }

    async fn on_payment_options(
        &self,
        session: &mut Session,
        msg: &InboundMessage,
        to: &str,
        mut checkout: CheckoutQuote,
    ) -> Result<Vec<OutboundMessage>, ServiceError> {
        let lang = session.language;
        let choice = match &msg.kind {
            InboundKind::Interactive { id, .. }
                if id == "pay_ussd" || id == "pay_manual" =>
            {
                id.clone()
            }
            _ => {
                // Restate using the frozen quote; never recompute it.
                let summary = self.quote_summary_message(session, to, &checkout);
                session.state = SessionState::ShowQuoteAndPaymentOptions { checkout };
                return Ok(vec![summary]);
            }
        };

        // Exactly one order per checkout, however many times this state is
        // re-entered.
        let order_id = match &checkout.order_id {
            Some(id) => id.clone(),
            None => {
                let (fulfillment, contact_phone) = match &checkout.fulfillment {
                    FulfillmentChoice::Pickup { phone } => (Fulfillment::Pickup, phone.clone()),
                    FulfillmentChoice::Delivery { .. } => (Fulfillment::Delivery, to.to_string()),
                };
                let order = self
                    .orders
                    .create_from_cart(
                        to,
                        &checkout.customer_name,
                        &contact_phone,
                        &session.cart,
                        fulfillment,
                        checkout.quote.clone(),
                    )
                    .await?;
                checkout.order_id = Some(order.order_id.clone());
                order.order_id
            }
        };

        let fee = checkout.quote.as_ref().map(|q| q.fee_tzs).unwrap_or(0);
        let amount_due = session.cart.total_tzs() + fee;

        let reply = if choice == "pay_ussd" {
            let phone = match &checkout.fulfillment {
                FulfillmentChoice::Pickup { phone } => phone.clone(),
                FulfillmentChoice::Delivery { .. } => to.to_string(),
            };
            self.emit(Event::UssdPushRequested {
                order_id: order_id.clone(),
                phone,
                amount_tzs: amount_due,
            })
            .await;
            self.text(to, &copy::ussd_push_sent(lang, &order_id))
        } else {
            self.text(
                to,
                &copy::manual_payment(lang, &order_id, &self.payment_instructions),
            )
        };

        session.cart.clear();
        session.state = SessionState::WaitPaymentProof { order_id };
        Ok(vec![reply])
    }

    async fn on_payment_proof(
        &self,
        session: &mut Session,
        msg: &InboundMessage,
        to: &str,
        order_id: &str,
    ) -> Result<Vec<OutboundMessage>, ServiceError> {
        let lang = session.language;
        let proof = match &msg.kind {
            InboundKind::Text { body } if !body.trim().is_empty() => PaymentProof {
                kind: ProofKind::TextReference,
                reference: body.trim().to_string(),
                received_at: chrono::Utc::now(),
            },
            InboundKind::Image { media_id, .. } => PaymentProof {
                kind: ProofKind::ImageScreenshot,
                reference: media_id.clone(),
                received_at: chrono::Utc::now(),
            },
            _ => {
                return Ok(vec![self.text(to, copy::wait_payment_proof(lang))]);
            }
        };

        self.orders.attach_proof(order_id, to, proof).await?;
        session.state = SessionState::Idle;
        Ok(vec![self.text(to, copy::proof_received(lang))])
    }

    async fn emit(&self, event: Event) {
        if let Some(events) = &self.event_sender {
            if let Err(e) = events.send(event).await {
                warn!(error = %e, "failed to emit event");
            }
        }
    }

    // ----- outbound intent builders -----

    fn text(&self, to: &str, body: &str) -> OutboundMessage {
        OutboundMessage::Text {
            to: to.to_string(),
            body: body.to_string(),
        }
    }

    fn buttons(&self, to: &str, body: &str, buttons: Vec<MenuRow>) -> OutboundMessage {
        OutboundMessage::Buttons {
            to: to.to_string(),
            body: body.to_string(),
            buttons,
        }
    }

    fn main_menu(&self, session: &Session, to: &str) -> Vec<OutboundMessage> {
        let lang = session.language;
        vec![self.buttons(
            to,
            &copy::main_menu_body(lang, &self.business_name),
            vec![
                MenuRow::new("shop", copy::menu_shop(lang)),
                MenuRow::new("track", copy::menu_track(lang)),
                MenuRow::new("agent", copy::menu_agent(lang)),
            ],
        )]
    }

    fn product_list(&self, lang: Language, to: &str) -> OutboundMessage {
        let rows = self
            .catalog
            .products()
            .iter()
            .map(|p| {
                MenuRow::new(format!("prod:{}", p.id), p.title.clone())
                    .with_description(copy::fmt_tzs(p.unit_price_tzs))
            })
            .collect();
        OutboundMessage::List {
            to: to.to_string(),
            header: copy::product_list_header(lang).to_string(),
            body: copy::product_list_body(lang).to_string(),
            button: copy::list_button(lang).to_string(),
            rows,
        }
    }

    fn cart_view(&self, session: &Session, to: &str) -> Vec<OutboundMessage> {
        let lang = session.language;
        vec![self.buttons(
            to,
            &copy::cart_summary(lang, &session.cart),
            vec![
                MenuRow::new("checkout", copy::btn_checkout(lang)),
                MenuRow::new("more", copy::btn_add_more(lang)),
                MenuRow::new("menu", copy::btn_menu(lang)),
            ],
        )]
    }

    fn fulfillment_buttons(&self, lang: Language, to: &str) -> OutboundMessage {
        self.buttons(
            to,
            copy::ask_fulfillment(lang),
            vec![
                MenuRow::new("pickup", copy::btn_pickup(lang)),
                MenuRow::new("delivery", copy::btn_delivery(lang)),
            ],
        )
    }

    fn delivery_location_prompt(&self, session: &Session, to: &str) -> Vec<OutboundMessage> {
        let lang = session.language;
        let mut replies = vec![self.text(to, copy::ask_delivery_location(lang))];
        if self.resolver.has_dataset() {
            replies.extend(self.location_menu(lang, to, &LocationCursor::default()));
        }
        replies
    }

    /// Renders the narrowing menu for the cursor's current level, paginated.
    fn location_menu(
        &self,
        lang: Language,
        to: &str,
        cursor: &LocationCursor,
    ) -> Vec<OutboundMessage> {
        let (header, body, mut rows) = match (&cursor.district, &cursor.ward) {
            (None, _) => (
                copy::pick_district(lang).to_string(),
                copy::pick_district(lang).to_string(),
                self.resolver
                    .districts()
                    .into_iter()
                    .map(|d| MenuRow::new(format!("d:{}", d), d))
                    .collect::<Vec<_>>(),
            ),
            (Some(district), None) => (
                copy::pick_district(lang).to_string(),
                copy::pick_ward(lang, district),
                self.resolver
                    .wards(district)
                    .into_iter()
                    .map(|w| MenuRow::new(format!("w:{}", w), w))
                    .collect(),
            ),
            (Some(district), Some(ward)) => {
                let mut rows: Vec<MenuRow> = self
                    .resolver
                    .streets(district, ward)
                    .into_iter()
                    .map(|s| MenuRow::new(format!("s:{}", s), s))
                    .collect();
                rows.push(MenuRow::new("s:-", copy::street_not_listed(lang)));
                (
                    copy::pick_district(lang).to_string(),
                    copy::pick_street(lang, ward),
                    rows,
                )
            }
        };

        if rows.is_empty() {
            return vec![self.text(to, copy::ask_delivery_location(lang))];
        }

        let page_size = self.menu_page_size;
        let pages = rows.len().div_ceil(page_size);
        let page = cursor.page % pages;
        rows = rows
            .into_iter()
            .skip(page * page_size)
            .take(page_size)
            .collect();
        if pages > 1 {
            rows.push(MenuRow::new("page:next", copy::next_page(lang)));
        }

        vec![OutboundMessage::List {
            to: to.to_string(),
            header,
            body,
            button: copy::list_button(lang).to_string(),
            rows,
        }]
    }

    fn confirm_prompt(&self, session: &Session, to: &str) -> OutboundMessage {
        let lang = session.language;
        let body = match &session.state {
            SessionState::AskDeliveryConfirm {
                location: DeliveryLocation::Pin { .. },
            } => copy::confirm_pin(lang).to_string(),
            SessionState::AskDeliveryConfirm {
                location:
                    DeliveryLocation::Address {
                        district,
                        ward,
                        street,
                    },
            } => {
                let place = match street {
                    Some(street) => format!("{}, {}, {}", street, ward, district),
                    None => format!("{}, {}", ward, district),
                };
                copy::confirm_address(lang, &place)
            }
            _ => copy::ask_delivery_location(lang).to_string(),
        };
        self.buttons(
            to,
            &body,
            vec![
                MenuRow::new("confirm", copy::btn_confirm(lang)),
                MenuRow::new("change", copy::btn_change(lang)),
            ],
        )
    }

    fn quote_summary_message(
        &self,
        session: &Session,
        to: &str,
        checkout: &CheckoutQuote,
    ) -> OutboundMessage {
        let lang = session.language;
        let cart_total = session.cart.total_tzs();
        let fee = checkout.quote.as_ref().map(|q| q.fee_tzs);
        let amount_due = cart_total + fee.unwrap_or(0);
        self.buttons(
            to,
            &copy::quote_summary(lang, cart_total, fee, amount_due),
            vec![
                MenuRow::new("pay_ussd", copy::btn_pay_ussd(lang)),
                MenuRow::new("pay_manual", copy::btn_pay_manual(lang)),
            ],
        )
    }

    /// Restates the prompt for the current state. Used when an event matches
    /// no transition: never silently dropped, never a crash.
    fn prompt_for_state(&self, session: &Session, to: &str) -> Vec<OutboundMessage> {
        let lang = session.language;
        match &session.state {
            SessionState::Idle => self.main_menu(session, to),
            SessionState::CollectingCart => vec![self.product_list(lang, to)],
            SessionState::AskFulfillment => vec![self.fulfillment_buttons(lang, to)],
            SessionState::AskPickupPhone => vec![self.text(to, copy::ask_pickup_phone(lang))],
            SessionState::AskDeliveryLocation { cursor } => {
                let mut replies = vec![self.text(to, copy::ask_delivery_location(lang))];
                if self.resolver.has_dataset() {
                    replies.extend(self.location_menu(lang, to, cursor));
                }
                replies
            }
            SessionState::AskDeliveryConfirm { .. } => vec![self.confirm_prompt(session, to)],
            SessionState::AskCustomerName { .. } => {
                vec![self.text(to, copy::ask_customer_name(lang))]
            }
            SessionState::ShowQuoteAndPaymentOptions { checkout } => {
                vec![self.quote_summary_message(session, to, checkout)]
            }
            SessionState::WaitPaymentProof { .. } => {
                vec![self.text(to, copy::wait_payment_proof(lang))]
            }
            SessionState::TrackOrderById => vec![self.text(to, copy::ask_order_code(lang))],
            SessionState::AskAgentHandoff => vec![self.text(to, copy::ask_agent_message(lang))],
        }
    }
}

/// Accepts digits with common separators; requires at least nine digits.
fn sanitize_phone(input: &str) -> Option<String> {
    let digits: String = input
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    let separators_only = input
        .chars()
        .all(|c| c.is_ascii_digit() || c.is_whitespace() || matches!(c, '+' | '-' | '(' | ')'));
    if separators_only && digits.len() >= 9 {
        Some(digits)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuoteConfig;
    use crate::models::order::QuoteSource;
    use crate::repositories::InMemoryStore;
    use crate::services::distance::StreetRow;

    fn row(district: &str, ward: &str, street: &str, km: f64) -> StreetRow {
        StreetRow {
            region: "Dar es Salaam".to_string(),
            district: district.to_string(),
            ward: ward.to_string(),
            street: street.to_string(),
            distance_km: km,
        }
    }

    fn dispatcher() -> (Dispatcher, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let resolver = Arc::new(DistanceResolver::new(
            vec![
                row("Kinondoni", "Mikocheni", "Haile Selassie", 6.2),
                row("Kinondoni", "Mikocheni", "Rose Garden", 6.8),
                row("Ilala", "Kariakoo", "Msimbazi", 1.2),
            ],
            (-6.8235, 39.2695),
            12.0,
        ));
        let orders = Arc::new(OrderService::new(store.clone(), None));
        let ledger = Arc::new(PaymentLedger::new(store.clone(), store.clone(), None));
        let dispatcher = Dispatcher::new(
            SessionStore::new(store.clone()),
            Arc::new(Catalog::load(None)),
            resolver,
            Arc::new(FeeQuoteEngine::new(QuoteConfig::default())),
            orders,
            ledger,
            None,
            "Duka Bot".to_string(),
            "Lipa kwa M-Pesa: 555222".to_string(),
            8,
        );
        (dispatcher, store)
    }

    fn msg_counter() -> impl FnMut() -> String {
        let mut n = 0;
        move || {
            n += 1;
            format!("wamid.{}", n)
        }
    }

    const CUSTOMER: &str = "255700000001";

    async fn drive(
        d: &Dispatcher,
        next_id: &mut impl FnMut() -> String,
        kind_of: InboundKind,
    ) -> Vec<OutboundMessage> {
        let msg = InboundMessage {
            id: next_id(),
            from: CUSTOMER.to_string(),
            phone_number_id: None,
            kind: kind_of,
        };
        d.dispatch(msg).await.unwrap()
    }

    fn tap(id: &str) -> InboundKind {
        InboundKind::Interactive {
            id: id.to_string(),
            title: id.to_string(),
        }
    }

    fn say(body: &str) -> InboundKind {
        InboundKind::Text {
            body: body.to_string(),
        }
    }

    async fn session_of(store: &InMemoryStore, customer: &str) -> Session {
        crate::repositories::SessionRepository::load_session(store, customer)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn first_contact_gets_main_menu() {
        let (d, _store) = dispatcher();
        let mut id = msg_counter();
        let replies = drive(&d, &mut id, say("habari")).await;
        assert_eq!(replies.len(), 1);
        assert!(matches!(replies[0], OutboundMessage::Buttons { .. }));
    }

    #[tokio::test]
    async fn duplicate_message_id_is_absorbed() {
        let (d, store) = dispatcher();
        let mut id = msg_counter();
        drive(&d, &mut id, tap("shop")).await;

        let msg = InboundMessage::interactive("wamid.dup", CUSTOMER, "prod:rice-5kg", "Mchele");
        d.dispatch(msg.clone()).await.unwrap();
        let second = d.dispatch(msg).await.unwrap();
        assert!(second.is_empty());

        let session = session_of(&store, CUSTOMER).await;
        assert_eq!(session.cart.items[0].quantity, 1);
    }

    #[tokio::test]
    async fn concurrent_deliveries_of_one_message_id_apply_once() {
        // Redelivery can land while the first delivery is still in flight;
        // the two must not both add the cart line.
        for _ in 0..50 {
            let (d, store) = dispatcher();
            let mut id = msg_counter();
            drive(&d, &mut id, tap("shop")).await;

            let d = Arc::new(d);
            let msg =
                InboundMessage::interactive("wamid.dup", CUSTOMER, "prod:rice-5kg", "Mchele");
            let first = tokio::spawn({
                let d = d.clone();
                let msg = msg.clone();
                async move { d.dispatch(msg).await }
            });
            let second = tokio::spawn({
                let d = d.clone();
                async move { d.dispatch(msg).await }
            });
            first.await.unwrap().unwrap();
            second.await.unwrap().unwrap();

            let session = session_of(&store, CUSTOMER).await;
            assert_eq!(session.cart.items.len(), 1);
            assert_eq!(session.cart.items[0].quantity, 1);
        }
    }

    #[tokio::test]
    async fn seen_message_window_is_bounded() {
        let (d, _store) = dispatcher();
        for n in 0..SEEN_MESSAGE_CAP + 10 {
            d.remember_message_id(&format!("wamid.{}", n)).await;
        }
        assert_eq!(d.seen_messages.len(), SEEN_MESSAGE_CAP);
        assert!(!d.seen_messages.contains_key("wamid.0"));
        assert!(d
            .seen_messages
            .contains_key(&format!("wamid.{}", SEEN_MESSAGE_CAP + 9)));
    }

    #[tokio::test]
    async fn menu_reset_discards_checkout_but_keeps_cart() {
        let (d, store) = dispatcher();
        let mut id = msg_counter();
        drive(&d, &mut id, tap("shop")).await;
        drive(&d, &mut id, tap("prod:rice-5kg")).await;
        drive(&d, &mut id, tap("checkout")).await;

        let session = session_of(&store, CUSTOMER).await;
        assert_eq!(session.state, SessionState::AskFulfillment);

        drive(&d, &mut id, say("menu")).await;
        let session = session_of(&store, CUSTOMER).await;
        assert_eq!(session.state, SessionState::Idle);
        assert_eq!(session.cart.items.len(), 1);
    }

    #[tokio::test]
    async fn unknown_product_id_is_rejected_without_state_change() {
        let (d, store) = dispatcher();
        let mut id = msg_counter();
        drive(&d, &mut id, tap("shop")).await;
        let replies = drive(&d, &mut id, tap("prod:no-such-thing")).await;

        assert!(replies[0].body().contains("haipatikani"));
        let session = session_of(&store, CUSTOMER).await;
        assert_eq!(session.state, SessionState::CollectingCart);
        assert!(session.cart.is_empty());
    }

    #[tokio::test]
    async fn unmatched_event_restates_prompt() {
        let (d, store) = dispatcher();
        let mut id = msg_counter();
        drive(&d, &mut id, tap("shop")).await;
        drive(&d, &mut id, tap("prod:rice-5kg")).await;
        drive(&d, &mut id, tap("checkout")).await;

        // A location pin makes no sense while choosing fulfillment.
        let replies = drive(&d, &mut id, InboundKind::Location { lat: -6.8, lng: 39.28 }).await;
        assert!(!replies.is_empty());
        let session = session_of(&store, CUSTOMER).await;
        assert_eq!(session.state, SessionState::AskFulfillment);
    }

    async fn checkout_to_quote(
        d: &Dispatcher,
        id: &mut impl FnMut() -> String,
    ) {
        drive(d, id, tap("shop")).await;
        drive(d, id, tap("prod:rice-5kg")).await;
        drive(d, id, tap("checkout")).await;
        drive(d, id, tap("delivery")).await;
        drive(d, id, say("Kinondoni")).await;
        drive(d, id, tap("w:Mikocheni")).await;
        drive(d, id, tap("s:Haile Selassie")).await;
        drive(d, id, tap("confirm")).await;
        drive(d, id, say("Asha Juma")).await;
    }

    #[tokio::test]
    async fn delivery_flow_freezes_quote_from_exact_street() {
        let (d, store) = dispatcher();
        let mut id = msg_counter();
        checkout_to_quote(&d, &mut id).await;

        let session = session_of(&store, CUSTOMER).await;
        match &session.state {
            SessionState::ShowQuoteAndPaymentOptions { checkout } => {
                let quote = checkout.quote.as_ref().unwrap();
                assert_eq!(quote.source, QuoteSource::ExactStreet);
                assert!((quote.distance_km - 6.2).abs() < 1e-9);
                assert_eq!(quote.fee_tzs % 500, 0);
                assert!(checkout.order_id.is_none());
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[tokio::test]
    async fn reentering_quote_state_reuses_frozen_quote_and_creates_one_order() {
        let (d, store) = dispatcher();
        let mut id = msg_counter();
        checkout_to_quote(&d, &mut id).await;

        // An unrecognized tap restates the summary without recomputing.
        let restated = drive(&d, &mut id, tap("bogus")).await;
        assert!(matches!(restated[0], OutboundMessage::Buttons { .. }));

        drive(&d, &mut id, tap("pay_manual")).await;
        let orders = crate::repositories::OrderRepository::list_orders(&*store)
            .await
            .unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].total_tzs, 18000);
        let quote = orders[0].delivery_quote.as_ref().unwrap();
        assert_eq!(quote.source, QuoteSource::ExactStreet);

        let session = session_of(&store, CUSTOMER).await;
        assert_eq!(
            session.state,
            SessionState::WaitPaymentProof {
                order_id: orders[0].order_id.clone()
            }
        );
        assert!(session.cart.is_empty());
    }

    #[tokio::test]
    async fn payment_proof_attaches_and_returns_to_idle() {
        let (d, store) = dispatcher();
        let mut id = msg_counter();
        checkout_to_quote(&d, &mut id).await;
        drive(&d, &mut id, tap("pay_manual")).await;

        let replies = drive(&d, &mut id, say("TXN123456")).await;
        assert!(matches!(replies[0], OutboundMessage::Text { .. }));

        let session = session_of(&store, CUSTOMER).await;
        assert_eq!(session.state, SessionState::Idle);

        let orders = crate::repositories::OrderRepository::list_orders(&*store)
            .await
            .unwrap();
        let proofs = crate::repositories::OrderRepository::list_proofs(&*store, &orders[0].order_id)
            .await
            .unwrap();
        assert_eq!(proofs.len(), 1);
        assert_eq!(proofs[0].reference, "TXN123456");
    }

    #[tokio::test]
    async fn location_pin_short_circuits_narrowing() {
        let (d, store) = dispatcher();
        let mut id = msg_counter();
        drive(&d, &mut id, tap("shop")).await;
        drive(&d, &mut id, tap("prod:sugar-1kg")).await;
        drive(&d, &mut id, tap("checkout")).await;
        drive(&d, &mut id, tap("delivery")).await;
        drive(
            &d,
            &mut id,
            InboundKind::Location {
                lat: -6.7735,
                lng: 39.2627,
            },
        )
        .await;
        drive(&d, &mut id, tap("confirm")).await;
        drive(&d, &mut id, say("Asha Juma")).await;

        let session = session_of(&store, CUSTOMER).await;
        match &session.state {
            SessionState::ShowQuoteAndPaymentOptions { checkout } => {
                let quote = checkout.quote.as_ref().unwrap();
                assert_eq!(quote.source, QuoteSource::Gps);
                // Rounded up to 100 m
                let tenths = quote.distance_km * 10.0;
                assert!((tenths - tenths.round()).abs() < 1e-9);
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[tokio::test]
    async fn pickup_flow_carries_no_quote() {
        let (d, store) = dispatcher();
        let mut id = msg_counter();
        drive(&d, &mut id, tap("shop")).await;
        drive(&d, &mut id, tap("prod:sugar-1kg")).await;
        drive(&d, &mut id, tap("checkout")).await;
        drive(&d, &mut id, tap("pickup")).await;
        drive(&d, &mut id, say("0712 345 678")).await;
        drive(&d, &mut id, say("Asha Juma")).await;
        drive(&d, &mut id, tap("pay_ussd")).await;

        let orders = crate::repositories::OrderRepository::list_orders(&*store)
            .await
            .unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].fulfillment, Fulfillment::Pickup);
        assert!(orders[0].delivery_quote.is_none());
        assert_eq!(orders[0].contact_phone, "0712345678");
    }

    #[tokio::test]
    async fn invalid_pickup_phone_is_rejected() {
        let (d, store) = dispatcher();
        let mut id = msg_counter();
        drive(&d, &mut id, tap("shop")).await;
        drive(&d, &mut id, tap("prod:sugar-1kg")).await;
        drive(&d, &mut id, tap("checkout")).await;
        drive(&d, &mut id, tap("pickup")).await;
        drive(&d, &mut id, say("call me maybe")).await;

        let session = session_of(&store, CUSTOMER).await;
        assert_eq!(session.state, SessionState::AskPickupPhone);
    }

    #[tokio::test]
    async fn track_order_reports_ledger_status() {
        let (d, store) = dispatcher();
        let mut id = msg_counter();
        checkout_to_quote(&d, &mut id).await;
        drive(&d, &mut id, tap("pay_manual")).await;
        drive(&d, &mut id, say("TXN1")).await;

        let orders = crate::repositories::OrderRepository::list_orders(&*store)
            .await
            .unwrap();
        let code = orders[0].order_id.clone();

        drive(&d, &mut id, tap("track")).await;
        let replies = drive(&d, &mut id, say(&code.to_lowercase())).await;
        assert!(replies[0].body().contains(&code));

        let session = session_of(&store, CUSTOMER).await;
        assert_eq!(session.state, SessionState::Idle);
    }

    #[tokio::test]
    async fn track_unknown_order_stays_in_state() {
        let (d, store) = dispatcher();
        let mut id = msg_counter();
        drive(&d, &mut id, tap("track")).await;
        let replies = drive(&d, &mut id, say("DK-9999")).await;
        assert!(matches!(replies[0], OutboundMessage::Text { .. }));
        let session = session_of(&store, CUSTOMER).await;
        assert_eq!(session.state, SessionState::TrackOrderById);
    }

    #[tokio::test]
    async fn language_switch_re_prompts_current_state() {
        let (d, store) = dispatcher();
        let mut id = msg_counter();
        drive(&d, &mut id, tap("shop")).await;
        let replies = drive(&d, &mut id, say("english")).await;
        assert!(matches!(replies[0], OutboundMessage::List { .. }));

        let session = session_of(&store, CUSTOMER).await;
        assert_eq!(session.language, Language::English);
        assert_eq!(session.state, SessionState::CollectingCart);
    }

    #[test]
    fn phone_sanitization() {
        assert_eq!(
            sanitize_phone("+255 712 345 678").as_deref(),
            Some("255712345678")
        );
        assert_eq!(sanitize_phone("0712-345-678").as_deref(), Some("0712345678"));
        assert_eq!(sanitize_phone("12345"), None);
        assert_eq!(sanitize_phone("call me maybe"), None);
    }
}
