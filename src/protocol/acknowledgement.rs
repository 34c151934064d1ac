//! # Acknowledgement Ledger
//!
//! Each request owns two hashes, `<requestId>/UnAck` and `<requestId>/Ack`, both
//! mapping a sequence index to the serialized event. Sending an event that requires
//! acknowledgement records it as unacknowledged under a fresh index (the `index`
//! field of the UnAck hash is the counter). When the receiver handles it, the index
//! moves to Ack and an `Acknowledgement` event travels back to the sender.
//!
//! # Architecture Note
//! The write to Ack and the delete from UnAck are separate operations. A crash
//! between them leaves the event in both sets; the Ack check at the top of
//! [`AcknowledgementLedger::record_acknowledgement`] makes a retry a no-op, so
//! redelivery is tolerated rather than prevented.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::VicinityError;
use crate::event::{kinds, Event};
use crate::fabric::Fabric;
use crate::transport::message::{channel_for, VicinityMessage};

const INDEX_FIELD: &str = "index";
/// Header recording who the event was first addressed to.
pub const HEADER_ORIGINAL_ACTOR: &str = "originalActorName";
/// Payload keys of an `Acknowledgement` event.
pub const ACKNOWLEDGED_EVENT_TYPE: &str = "acknowledgedEventType";
pub const ACKNOWLEDGED_INDEX: &str = "acknowledgedIndex";
pub const ACKNOWLEDGED_TARGET: &str = "acknowledgedTarget";

/// Outcome of [`AcknowledgementLedger::record_acknowledgement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Newly acknowledged; the sender was notified.
    Recorded(u64),
    /// The index was acknowledged before.
    AlreadyAcknowledged(u64),
    /// Protocol traffic, or an event that never asked for acknowledgement.
    Exempt,
    Disabled,
}

/// Acknowledgement ledger over the fabric.
#[derive(Clone)]
pub struct AcknowledgementLedger {
    fabric: Arc<dyn Fabric>,
    ttl: Duration,
    enabled: bool,
}

impl AcknowledgementLedger {
    pub fn new(fabric: Arc<dyn Fabric>, ttl: Duration, enabled: bool) -> Self {
        Self { fabric, ttl, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn unacknowledged_key(request_id: &str) -> String {
        format!("{request_id}/UnAck")
    }

    fn acknowledged_key(request_id: &str) -> String {
        format!("{request_id}/Ack")
    }

    /// Assigns `event` the next index of its request and stores it as unacknowledged.
    ///
    /// Returns the index, or `None` when the event is exempt or the ledger disabled.
    pub async fn record_unacknowledged(&self, event: &mut Event) -> Result<Option<u64>, VicinityError> {
        if !self.enabled || kinds::is_protocol_exempt(event.subject()) {
            return Ok(None);
        }
        let Some(request_id) = event.request_id().map(str::to_string) else {
            warn!(event_type = event.event_type(), "Cannot track an event without request id");
            return Ok(None);
        };

        let key = Self::unacknowledged_key(&request_id);
        let next = self.fabric.hincr_by(&key, INDEX_FIELD, 1).await?;
        let index = u64::try_from(next).unwrap_or_default();
        event.set_index(index);
        let original_actor = event.to_first().to_string();
        event
            .header_mut()
            .insert(HEADER_ORIGINAL_ACTOR.to_string(), Value::String(original_actor.clone()));

        let message = VicinityMessage::from_event(event, &original_actor)?;
        self.fabric
            .hset(&key, &index.to_string(), message.encode()?)
            .await?;
        self.fabric.expire(&key, self.ttl).await?;
        debug!(request_id, index, event_type = event.event_type(), "Recorded unacknowledged");
        Ok(Some(index))
    }

    /// Marks `event` acknowledged and notifies its sender. Idempotent per index.
    pub async fn record_acknowledgement(&self, event: &Event) -> Result<AckOutcome, VicinityError> {
        if !self.enabled {
            return Ok(AckOutcome::Disabled);
        }
        if kinds::is_protocol_exempt(event.subject())
            || !(event.requires_acknowledgement() || event.is_to_do_task())
        {
            return Ok(AckOutcome::Exempt);
        }
        let Some(request_id) = event.request_id() else {
            return Ok(AckOutcome::Exempt);
        };

        let index = event.index();
        let field = index.to_string();
        let ack_key = Self::acknowledged_key(request_id);
        if self.fabric.hexists(&ack_key, &field).await? {
            debug!(request_id, index, "Already acknowledged");
            return Ok(AckOutcome::AlreadyAcknowledged(index));
        }

        let message = VicinityMessage::from_event(event, event.to_first())?;
        self.fabric.hset(&ack_key, &field, message.encode()?).await?;
        self.fabric.expire(&ack_key, self.ttl).await?;
        self.fabric
            .hdel(&Self::unacknowledged_key(request_id), &field)
            .await?;

        let ack = Self::acknowledgement_for(event);
        let ack_message = VicinityMessage::from_event(&ack, ack.to_first())?;
        self.fabric
            .publish(&channel_for(ack.to_first()), ack_message.encode()?)
            .await?;
        debug!(request_id, index, to = ack.to_first(), "Acknowledged");
        Ok(AckOutcome::Recorded(index))
    }

    /// The reversed-direction notice for an acknowledged event.
    pub fn acknowledgement_for(event: &Event) -> Event {
        let mut ack = Event::correlated(kinds::ACKNOWLEDGEMENT, event, event.to_first())
            .with_payload(ACKNOWLEDGED_EVENT_TYPE, event.event_type())
            .with_payload(ACKNOWLEDGED_INDEX, event.index())
            .with_payload(ACKNOWLEDGED_TARGET, event.to_first());
        ack.set_index(event.index());
        let flags = ack.flags_mut();
        flags.reply = false;
        flags.requires_acknowledgement = event.requires_acknowledgement();
        ack
    }

    pub async fn get_unacknowledged(&self, request_id: &str, index: u64) -> Result<Option<Event>, VicinityError> {
        let raw = self
            .fabric
            .hget(&Self::unacknowledged_key(request_id), &index.to_string())
            .await?;
        match raw {
            Some(raw) => Ok(Some(VicinityMessage::decode(&raw)?.to_event()?)),
            None => Ok(None),
        }
    }

    pub async fn remove_unacknowledged(&self, request_id: &str, index: u64) -> Result<bool, VicinityError> {
        Ok(self
            .fabric
            .hdel(&Self::unacknowledged_key(request_id), &index.to_string())
            .await?)
    }

    pub async fn is_acknowledged(&self, request_id: &str, index: u64) -> Result<bool, VicinityError> {
        Ok(self
            .fabric
            .hexists(&Self::acknowledged_key(request_id), &index.to_string())
            .await?)
    }
}
