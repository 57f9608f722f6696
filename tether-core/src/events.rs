//! Inbound broker events and their payload types

use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// A message delivered by the broker on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Topic the message arrived on.
    pub topic: String,
    /// Raw payload bytes. UTF-8 text for most applications, but nothing
    /// here assumes it.
    pub payload: Vec<u8>,
}

impl InboundMessage {
    /// Create a message from a topic and payload.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Payload decoded as UTF-8 for logging; invalid bytes are replaced.
    #[must_use]
    pub fn payload_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Opaque identifier for a delivery the transport finished handing off.
///
/// Token values are transport-defined; they are only meaningful for
/// correlating `DeliveryComplete` notifications within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryToken(pub u64);

impl std::fmt::Display for DeliveryToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Events originated by the transport and routed to application handlers.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// A message arrived on a subscribed topic.
    MessageArrived(InboundMessage),
    /// The connection dropped outside an application `close`.
    ConnectionLost(TransportError),
    /// The transport finished handing off a published message.
    DeliveryComplete(DeliveryToken),
}

impl InboundEvent {
    /// Short name used in log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageArrived(_) => "message_arrived",
            Self::ConnectionLost(_) => "connection_lost",
            Self::DeliveryComplete(_) => "delivery_complete",
        }
    }
}
