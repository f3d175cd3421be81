//! Customer-facing message copy, Swahili first with an English fallback.
//! Catalog titles come from configuration; everything else lives here.

use crate::models::session::{Cart, Language};

pub fn fmt_tzs(amount: i64) -> String {
    let negative = amount < 0;
    let digits = amount.unsigned_abs().to_string();
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if negative {
        format!("TZS -{}", out)
    } else {
        format!("TZS {}", out)
    }
}

pub fn main_menu_body(lang: Language, business_name: &str) -> String {
    match lang {
        Language::Swahili => format!(
            "Karibu {}! Chagua huduma unayotaka.",
            business_name
        ),
        Language::English => format!("Welcome to {}! Choose an option.", business_name),
    }
}

pub fn menu_shop(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Angalia bidhaa",
        Language::English => "Browse products",
    }
}

pub fn menu_track(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Fuatilia oda",
        Language::English => "Track order",
    }
}

pub fn menu_agent(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Ongea na mhudumu",
        Language::English => "Talk to an agent",
    }
}

pub fn product_list_header(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Bidhaa zetu",
        Language::English => "Our products",
    }
}

pub fn product_list_body(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Chagua bidhaa kuiweka kwenye kikapu.",
        Language::English => "Pick a product to add it to your cart.",
    }
}

pub fn list_button(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Chagua",
        Language::English => "Select",
    }
}

pub fn cart_summary(lang: Language, cart: &Cart) -> String {
    let mut lines: Vec<String> = cart
        .items
        .iter()
        .map(|i| format!("{} x{} — {}", i.title, i.quantity, fmt_tzs(i.subtotal_tzs())))
        .collect();
    let total = fmt_tzs(cart.total_tzs());
    match lang {
        Language::Swahili => {
            lines.push(format!("Jumla: {}", total));
            format!("Kikapu chako:\n{}", lines.join("\n"))
        }
        Language::English => {
            lines.push(format!("Total: {}", total));
            format!("Your cart:\n{}", lines.join("\n"))
        }
    }
}

pub fn btn_checkout(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Maliza oda",
        Language::English => "Checkout",
    }
}

pub fn btn_add_more(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Ongeza bidhaa",
        Language::English => "Add more",
    }
}

pub fn btn_menu(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Menyu",
        Language::English => "Menu",
    }
}

pub fn product_not_found(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Samahani, bidhaa hiyo haipatikani. Chagua kutoka kwenye orodha.",
        Language::English => "Sorry, that product was not found. Please pick from the list.",
    }
}

pub fn cart_is_empty(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Kikapu chako ni tupu. Chagua bidhaa kwanza.",
        Language::English => "Your cart is empty. Add a product first.",
    }
}

pub fn ask_fulfillment(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Ungependa kuchukua mwenyewe au tukuletee?",
        Language::English => "Would you like pickup or delivery?",
    }
}

pub fn btn_pickup(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Nitachukua",
        Language::English => "Pickup",
    }
}

pub fn btn_delivery(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Niletewe",
        Language::English => "Delivery",
    }
}

pub fn ask_pickup_phone(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Tuma namba ya simu tutakayotumia siku ya kuchukua.",
        Language::English => "Send the phone number we should use for pickup.",
    }
}

pub fn invalid_phone(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Namba hiyo haieleweki. Tuma namba kamili, mfano 0712 345 678.",
        Language::English => "That number does not look right. Send a full number, e.g. 0712 345 678.",
    }
}

pub fn ask_delivery_location(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Tuma location pin yako, au andika jina la wilaya yako.",
        Language::English => "Share your location pin, or type your district name.",
    }
}

pub fn pick_district(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Chagua wilaya yako.",
        Language::English => "Pick your district.",
    }
}

pub fn pick_ward(lang: Language, district: &str) -> String {
    match lang {
        Language::Swahili => format!("Chagua kata yako ndani ya {}.", district),
        Language::English => format!("Pick your ward in {}.", district),
    }
}

pub fn pick_street(lang: Language, ward: &str) -> String {
    match lang {
        Language::Swahili => format!("Chagua mtaa wako ndani ya {}.", ward),
        Language::English => format!("Pick your street in {}.", ward),
    }
}

pub fn street_not_listed(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Mtaa wangu haupo",
        Language::English => "My street is not listed",
    }
}

pub fn next_page(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Zaidi...",
        Language::English => "More...",
    }
}

pub fn district_not_matched(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Hatukupata wilaya hiyo. Jaribu tena au tuma location pin.",
        Language::English => "We could not match that district. Try again or share a location pin.",
    }
}

pub fn confirm_address(lang: Language, place: &str) -> String {
    match lang {
        Language::Swahili => format!("Tukuletee hapa: {}?", place),
        Language::English => format!("Deliver here: {}?", place),
    }
}

pub fn confirm_pin(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Tukuletee kwenye location pin uliyotuma?",
        Language::English => "Deliver to the location pin you shared?",
    }
}

pub fn btn_confirm(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Ndiyo",
        Language::English => "Confirm",
    }
}

pub fn btn_change(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Badilisha",
        Language::English => "Change",
    }
}

pub fn ask_customer_name(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Andika jina lako kamili.",
        Language::English => "Please type your full name.",
    }
}

pub fn quote_summary(
    lang: Language,
    cart_total: i64,
    delivery_fee: Option<i64>,
    amount_due: i64,
) -> String {
    match lang {
        Language::Swahili => {
            let mut body = format!("Bidhaa: {}", fmt_tzs(cart_total));
            if let Some(fee) = delivery_fee {
                body.push_str(&format!("\nUsafirishaji: {}", fmt_tzs(fee)));
            }
            body.push_str(&format!(
                "\nJumla ya kulipa: {}\nChagua njia ya malipo.",
                fmt_tzs(amount_due)
            ));
            body
        }
        Language::English => {
            let mut body = format!("Items: {}", fmt_tzs(cart_total));
            if let Some(fee) = delivery_fee {
                body.push_str(&format!("\nDelivery: {}", fmt_tzs(fee)));
            }
            body.push_str(&format!(
                "\nAmount due: {}\nChoose how to pay.",
                fmt_tzs(amount_due)
            ));
            body
        }
    }
}

pub fn btn_pay_ussd(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Lipa kwa simu (USSD)",
        Language::English => "Pay by phone (USSD)",
    }
}

pub fn btn_pay_manual(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Lipa benki/M-Pesa",
        Language::English => "Bank / mobile money",
    }
}

pub fn out_of_service(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Samahani, eneo hilo liko nje ya huduma yetu ya usafirishaji. Tuma eneo jingine au chagua kuchukua mwenyewe.",
        Language::English => "Sorry, that area is outside our delivery range. Send another location or choose pickup.",
    }
}

pub fn ussd_push_sent(lang: Language, order_id: &str) -> String {
    match lang {
        Language::Swahili => format!(
            "Oda yako ni {}. Utapokea ombi la malipo kwenye simu yako sasa hivi. Ukishalipa, tuma kumbukumbu ya muamala hapa.",
            order_id
        ),
        Language::English => format!(
            "Your order is {}. A payment prompt is on its way to your phone. Once paid, send the transaction reference here.",
            order_id
        ),
    }
}

pub fn manual_payment(lang: Language, order_id: &str, instructions: &str) -> String {
    match lang {
        Language::Swahili => format!(
            "Oda yako ni {}. {}\nUkishalipa, tuma kumbukumbu ya muamala au picha ya risiti hapa.",
            order_id, instructions
        ),
        Language::English => format!(
            "Your order is {}. {}\nOnce paid, send the transaction reference or a screenshot here.",
            order_id, instructions
        ),
    }
}

pub fn proof_received(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Asante! Tumepokea uthibitisho wako, tutakujulisha baada ya kukagua malipo.",
        Language::English => "Thank you! We received your proof and will confirm the payment shortly.",
    }
}

pub fn wait_payment_proof(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Tuma kumbukumbu ya muamala au picha ya risiti ya malipo.",
        Language::English => "Send the transaction reference or a screenshot of your payment.",
    }
}

pub fn ask_order_code(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Andika namba ya oda yako, mfano DK-1004.",
        Language::English => "Type your order code, e.g. DK-1004.",
    }
}

pub fn order_status(
    lang: Language,
    order_id: &str,
    total: i64,
    paid: i64,
    status: &str,
) -> String {
    match lang {
        Language::Swahili => format!(
            "Oda {}: jumla {}, imelipwa {}. Hali: {}.",
            order_id,
            fmt_tzs(total),
            fmt_tzs(paid),
            status
        ),
        Language::English => format!(
            "Order {}: total {}, paid {}. Status: {}.",
            order_id,
            fmt_tzs(total),
            fmt_tzs(paid),
            status
        ),
    }
}

pub fn order_not_found(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Hatukupata oda hiyo. Hakikisha namba, au andika 'menu' kurudi mwanzo.",
        Language::English => "We could not find that order. Check the code, or type 'menu' to start over.",
    }
}

pub fn ask_agent_message(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Andika ujumbe wako, mhudumu wetu atakujibu hapa.",
        Language::English => "Type your message and one of our agents will reply here.",
    }
}

pub fn agent_notified(lang: Language) -> &'static str {
    match lang {
        Language::Swahili => "Tumempa mhudumu ujumbe wako, atakujibu hivi punde.",
        Language::English => "An agent has been notified and will get back to you shortly.",
    }
}

pub fn status_label(lang: Language, status: crate::models::order::PaymentStatus) -> &'static str {
    use crate::models::order::PaymentStatus;
    match (lang, status) {
        (Language::Swahili, PaymentStatus::Awaiting) => "inasubiri malipo",
        (Language::Swahili, PaymentStatus::Partial) => "imelipwa sehemu",
        (Language::Swahili, PaymentStatus::Paid) => "imelipwa",
        (Language::English, PaymentStatus::Awaiting) => "awaiting payment",
        (Language::English, PaymentStatus::Partial) => "partially paid",
        (Language::English, PaymentStatus::Paid) => "paid",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tzs_formatting() {
        assert_eq!(fmt_tzs(0), "TZS 0");
        assert_eq!(fmt_tzs(500), "TZS 500");
        assert_eq!(fmt_tzs(4500), "TZS 4,500");
        assert_eq!(fmt_tzs(1234567), "TZS 1,234,567");
    }

    #[test]
    fn quote_summary_includes_fee_only_for_delivery() {
        let sw = quote_summary(Language::Swahili, 4500, Some(4000), 8500);
        assert!(sw.contains("4,500"));
        assert!(sw.contains("4,000"));
        assert!(sw.contains("8,500"));

        let pickup = quote_summary(Language::English, 4500, None, 4500);
        assert!(!pickup.contains("Delivery"));
    }
}
