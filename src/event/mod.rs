//! # Events
//!
//! The [`Event`] is the unit of communication between actors. Its identity fields
//! (type, sender, targets, request id, index, token) are fixed once the runtime has
//! sent it; business code builds events with the `with_*` methods and reads them with
//! the accessors. Header and payload are free-form JSON maps.
//!
//! # Architecture Note
//! An event never points back at an actor. Handlers receive the actor they run on
//! through a [`Handling`](crate::actor::Handling) context passed next to the event,
//! so events stay plain data that can be cloned, serialized and stored in the ledgers.

pub mod kinds;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use kinds::subject_of;

/// Header key carrying the sender's project.
pub const HEADER_PROJECT: &str = "boa-project";
/// Header key mirroring the access token for transports that only read headers.
pub const HEADER_TOKEN: &str = "jwtToken";
/// Payload key holding a human readable message on error events.
pub const PAYLOAD_MESSAGE: &str = "message";

pub const DEFAULT_AWAIT_TIMEOUT_SECONDS: u64 = 30;

/// Delivery flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFlags {
    pub local: bool,
    pub announcement: bool,
    pub reply: bool,
    pub requires_acknowledgement: bool,
    pub await_response: bool,
    pub await_timeout_seconds: u64,
    pub to_do_task: bool,
    pub pipeline: bool,
    pub propagated_from_vicinity: bool,
    pub handled: bool,
    pub process_later_if_no_actor_found: bool,
    pub anonymous_ok: bool,
}

impl Default for EventFlags {
    fn default() -> Self {
        Self {
            local: false,
            announcement: false,
            reply: false,
            requires_acknowledgement: false,
            await_response: false,
            await_timeout_seconds: DEFAULT_AWAIT_TIMEOUT_SECONDS,
            to_do_task: false,
            pipeline: false,
            propagated_from_vicinity: false,
            handled: false,
            process_later_if_no_actor_found: true,
            anonymous_ok: false,
        }
    }
}

/// A typed, correlated message between actors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    event_type: String,
    from: String,
    to: Vec<String>,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    original_event_type: Option<String>,
    #[serde(default)]
    index: u64,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    header: BTreeMap<String, Value>,
    #[serde(default)]
    payload: BTreeMap<String, Value>,
    #[serde(default)]
    flags: EventFlags,
    #[serde(default)]
    to_do_link: Option<String>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            from: from.into(),
            to: Vec::new(),
            request_id: None,
            original_event_type: None,
            index: 0,
            access_token: None,
            header: BTreeMap::new(),
            payload: BTreeMap::new(),
            flags: EventFlags::default(),
            to_do_link: None,
        }
    }

    /// Builds a reply: same type and request, reversed direction, payload copied.
    pub fn reply_to(original: &Event, from: impl Into<String>) -> Self {
        let mut reply = Self::correlated(original.event_type.clone(), original, from);
        reply.payload = original.payload.clone();
        reply
    }

    /// Builds an event of another type that belongs to `original`'s conversation.
    ///
    /// It is addressed to the original sender and keeps the request id and original
    /// type, so the sender's callbacks fire when it arrives.
    pub fn correlated(event_type: impl Into<String>, original: &Event, from: impl Into<String>) -> Self {
        let mut event = Self::new(event_type, from);
        event.to = vec![original.from.clone()];
        event.request_id = original.request_id.clone();
        event.original_event_type = Some(original.original_type().to_string());
        event.access_token = original.access_token.clone();
        if let Some(project) = original.header.get(HEADER_PROJECT) {
            event.header.insert(HEADER_PROJECT.to_string(), project.clone());
        }
        event.flags.reply = true;
        event.flags.local = original.flags.local;
        event.flags.anonymous_ok = original.flags.anonymous_ok;
        event
    }

    // --- Builders ---

    pub fn to(mut self, target: impl Into<String>) -> Self {
        self.to.push(target.into());
        self
    }

    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.to = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.header.insert(key.into(), value.into());
        self
    }

    pub fn with_message(self, message: impl Into<String>) -> Self {
        self.with_payload(PAYLOAD_MESSAGE, Value::String(message.into()))
    }

    pub fn requiring_acknowledgement(mut self) -> Self {
        self.flags.requires_acknowledgement = true;
        self
    }

    /// Blocks `say` until a correlated reply completes, for at most `seconds`.
    pub fn awaiting_response(mut self, seconds: u64) -> Self {
        self.flags.await_response = true;
        self.flags.await_timeout_seconds = seconds;
        self
    }

    pub fn anonymous(mut self) -> Self {
        self.flags.anonymous_ok = true;
        self
    }

    pub fn as_pipeline(mut self) -> Self {
        self.flags.pipeline = true;
        self
    }

    pub fn process_later_if_no_actor_found(mut self, enabled: bool) -> Self {
        self.flags.process_later_if_no_actor_found = enabled;
        self
    }

    // --- Accessors ---

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// The type with a trailing `Event` removed; the behavior registry key.
    pub fn subject(&self) -> &str {
        subject_of(&self.event_type)
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn targets(&self) -> &[String] {
        &self.to
    }

    pub fn to_first(&self) -> &str {
        self.to.first().map(String::as_str).unwrap_or_default()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// The type that opened the conversation, or this event's type.
    pub fn original_type(&self) -> &str {
        self.original_event_type.as_deref().unwrap_or(&self.event_type)
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn header(&self) -> &BTreeMap<String, Value> {
        &self.header
    }

    pub fn header_str(&self, key: &str) -> Option<&str> {
        self.header.get(key).and_then(Value::as_str)
    }

    pub fn payload(&self) -> &BTreeMap<String, Value> {
        &self.payload
    }

    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn payload_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.payload
    }

    pub fn message(&self) -> Option<&str> {
        self.payload_str(PAYLOAD_MESSAGE)
    }

    pub fn flags(&self) -> &EventFlags {
        &self.flags
    }

    pub fn to_do_link(&self) -> Option<&str> {
        self.to_do_link.as_deref()
    }

    pub fn is_local(&self) -> bool {
        self.flags.local
    }

    pub fn is_announcement(&self) -> bool {
        self.flags.announcement
    }

    pub fn is_reply(&self) -> bool {
        self.flags.reply
    }

    pub fn requires_acknowledgement(&self) -> bool {
        self.flags.requires_acknowledgement
    }

    pub fn awaits_response(&self) -> bool {
        self.flags.await_response
    }

    pub fn is_to_do_task(&self) -> bool {
        self.flags.to_do_task
    }

    pub fn is_pipeline(&self) -> bool {
        self.flags.pipeline
    }

    pub fn is_propagated_from_vicinity(&self) -> bool {
        self.flags.propagated_from_vicinity
    }

    pub fn is_handled(&self) -> bool {
        self.flags.handled
    }

    pub fn is_error(&self) -> bool {
        kinds::is_error_kind(self.subject())
    }

    pub fn is_acknowledgement(&self) -> bool {
        self.subject() == kinds::ACKNOWLEDGEMENT
    }

    pub fn is_checkup(&self) -> bool {
        self.subject() == kinds::SELF_VICINITY_CHECKUP
    }

    /// Events that may travel without a bearer token.
    pub fn is_anonymous_ok(&self) -> bool {
        self.flags.anonymous_ok
            || self.is_error()
            || self.is_acknowledgement()
            || self.is_checkup()
            || self.subject() == kinds::ACTOR_DID_NOT_UNDERSTAND
            || kinds::ACCESS_REQUEST_KINDS.contains(&self.subject())
    }

    /// Correlation key shared by a request and every reply to it.
    pub fn callback_key(&self) -> String {
        format!(
            "{}/{}",
            self.request_id.as_deref().unwrap_or_default(),
            self.original_type()
        )
    }

    // --- Runtime mutation ---

    pub(crate) fn set_from(&mut self, from: impl Into<String>) {
        self.from = from.into();
    }

    pub(crate) fn set_targets(&mut self, to: Vec<String>) {
        self.to = to;
    }

    pub(crate) fn set_request_id(&mut self, request_id: impl Into<String>) {
        self.request_id = Some(request_id.into());
    }

    pub(crate) fn set_original_event_type(&mut self, event_type: impl Into<String>) {
        self.original_event_type = Some(event_type.into());
    }

    pub(crate) fn set_index(&mut self, index: u64) {
        self.index = index;
    }

    pub(crate) fn set_access_token(&mut self, token: impl Into<String>) {
        self.access_token = Some(token.into());
    }

    pub(crate) fn set_to_do_link(&mut self, link: Option<String>) {
        self.to_do_link = link;
    }

    pub(crate) fn flags_mut(&mut self) -> &mut EventFlags {
        &mut self.flags
    }

    pub(crate) fn header_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.header
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_reverses_direction_and_keeps_correlation() {
        let request = Event::new("RequestPaymentEvent", "Customer.default.1.0.0.a")
            .to("Cashier.default.1.0.0.b")
            .with_request_id("R1")
            .with_access_token("t")
            .with_payload("amount", 12);

        let reply = Event::reply_to(&request, "Cashier.default.1.0.0.b");
        assert_eq!(reply.targets(), ["Customer.default.1.0.0.a".to_string()]);
        assert_eq!(reply.request_id(), Some("R1"));
        assert_eq!(reply.original_type(), "RequestPaymentEvent");
        assert_eq!(reply.payload().get("amount"), Some(&Value::from(12)));
        assert_eq!(reply.access_token(), Some("t"));
        assert!(reply.is_reply());
        assert_eq!(reply.callback_key(), request.callback_key());
    }

    #[test]
    fn test_correlated_error_shares_callback_key() {
        let request = Event::new("RequestPayment", "Customer.default.1.0.0.a").with_request_id("R2");
        let error = Event::correlated(kinds::ACTOR_PROCESSING_ERROR, &request, "Cashier.default.1.0.0.b");
        assert!(error.is_error());
        assert!(error.payload().is_empty());
        assert_eq!(error.callback_key(), "R2/RequestPayment");
    }

    #[test]
    fn test_anonymous_rules() {
        assert!(Event::new("ActorNotFoundEvent", "x").is_anonymous_ok());
        assert!(Event::new("Acknowledgement", "x").is_anonymous_ok());
        assert!(Event::new("SelfVicinityCheckup", "x").is_anonymous_ok());
        assert!(!Event::new("RequestPayment", "x").is_anonymous_ok());
        assert!(Event::new("RequestPayment", "x").anonymous().is_anonymous_ok());
    }

    #[test]
    fn test_wire_form_is_camel_case() {
        let event = Event::new("RequestPayment", "a").to("b").requiring_acknowledgement();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventType"], "RequestPayment");
        assert_eq!(json["flags"]["requiresAcknowledgement"], true);
        assert_eq!(json["flags"]["awaitTimeoutSeconds"], 30);
    }
}
