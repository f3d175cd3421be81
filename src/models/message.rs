use serde::{Deserialize, Serialize};

/// One inbound message, normalized from the WhatsApp webhook envelope. The
/// message id is the idempotency key under at-least-once delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    /// Customer identifier (WhatsApp id / phone)
    pub from: String,
    /// Routing identifier of the receiving business number, passed through
    /// untouched
    pub phone_number_id: Option<String>,
    pub kind: InboundKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundKind {
    Text { body: String },
    /// A list or button reply; `id` is the row/button id we assigned
    Interactive { id: String, title: String },
    Location { lat: f64, lng: f64 },
    Image { media_id: String, caption: Option<String> },
}

impl InboundMessage {
    pub fn text(id: &str, from: &str, body: &str) -> Self {
        Self {
            id: id.to_string(),
            from: from.to_string(),
            phone_number_id: None,
            kind: InboundKind::Text {
                body: body.to_string(),
            },
        }
    }

    pub fn interactive(id: &str, from: &str, reply_id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            from: from.to_string(),
            phone_number_id: None,
            kind: InboundKind::Interactive {
                id: reply_id.to_string(),
                title: title.to_string(),
            },
        }
    }

    pub fn location(id: &str, from: &str, lat: f64, lng: f64) -> Self {
        Self {
            id: id.to_string(),
            from: from.to_string(),
            phone_number_id: None,
            kind: InboundKind::Location { lat, lng },
        }
    }

    pub fn image(id: &str, from: &str, media_id: &str, caption: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            from: from.to_string(),
            phone_number_id: None,
            kind: InboundKind::Image {
                media_id: media_id.to_string(),
                caption: caption.map(str::to_string),
            },
        }
    }
}

/// One row of an interactive list or one reply button.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuRow {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl MenuRow {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// An outbound message intent. The dispatcher only emits these; the transport
/// collaborator turns them into Graph API calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Text {
        to: String,
        body: String,
    },
    List {
        to: String,
        header: String,
        body: String,
        button: String,
        rows: Vec<MenuRow>,
    },
    Buttons {
        to: String,
        body: String,
        buttons: Vec<MenuRow>,
    },
}

impl OutboundMessage {
    pub fn to(&self) -> &str {
        match self {
            Self::Text { to, .. } | Self::List { to, .. } | Self::Buttons { to, .. } => to,
        }
    }

    /// The main text of the intent, used by tests and logging.
    pub fn body(&self) -> &str {
        match self {
            Self::Text { body, .. } | Self::List { body, .. } | Self::Buttons { body, .. } => body,
        }
    }
}
