//! # Wire Envelope
//!
//! Events cross the fabric wrapped in a [`VicinityMessage`]: a small routing header
//! readable without decoding the event, plus the event itself as a JSON string.
//! The same envelope is what the acknowledgement ledger stores.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::VicinityError;
use crate::event::Event;

const CHANNEL_PREFIX: &str = "channel: ";

/// Channel an actor or group listens on.
pub fn channel_for(target: &str) -> String {
    format!("{CHANNEL_PREFIX}{target}")
}

/// Target a channel was opened for.
pub fn target_of(channel: &str) -> &str {
    channel.strip_prefix(CHANNEL_PREFIX).unwrap_or(channel)
}

/// Routing header of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VicinityHeader {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub event_type: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

/// An event as carried on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VicinityMessage {
    pub header: VicinityHeader,
    pub json_payload: String,
}

impl VicinityMessage {
    /// Wraps `event` for delivery to `to`.
    pub fn from_event(event: &Event, to: &str) -> Result<Self, VicinityError> {
        Ok(Self {
            header: VicinityHeader {
                from: event.from().to_string(),
                to: to.to_string(),
                subject: event.subject().to_string(),
                event_type: event.event_type().to_string(),
                token: event.access_token().map(str::to_string),
                attributes: event.header().clone(),
            },
            json_payload: serde_json::to_string(event)?,
        })
    }

    pub fn to_event(&self) -> Result<Event, VicinityError> {
        Ok(serde_json::from_str(&self.json_payload)?)
    }

    pub fn encode(&self) -> Result<String, VicinityError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self, VicinityError> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_describes_event() {
        let event = Event::new("RequestPaymentEvent", "Customer.default.1.0.0.a")
            .to("Cashier.default.1.0.0.b")
            .with_access_token("t")
            .with_header("boa-project", "default");
        let message = VicinityMessage::from_event(&event, "Cashier.default.1.0.0.b").unwrap();

        assert_eq!(message.header.subject, "RequestPayment");
        assert_eq!(message.header.token.as_deref(), Some("t"));
        assert_eq!(message.header.attributes["boa-project"], "default");

        let decoded = VicinityMessage::decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded.to_event().unwrap(), event);
    }

    #[test]
    fn test_garbage_is_a_codec_error() {
        let err = VicinityMessage::decode("not json").unwrap_err();
        assert_eq!(err.code(), "CODEC_ERROR");
    }

    #[test]
    fn test_channel_naming() {
        assert_eq!(channel_for("Merchant"), "channel: Merchant");
    }
}
