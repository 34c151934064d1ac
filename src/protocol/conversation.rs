//! # Conversation Log
//!
//! Audit trail of delivery transitions for one request. Each request owns the hash
//! `<requestId>/Convo`; the field is the JSON [`ConversationEntry`] (subject, from,
//! to, index) and the value the latest [`ConversationStatus`] for it. Because the
//! status overwrites in place, the last write is authoritative.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::event::{kinds, Event};
use crate::fabric::{Fabric, FabricResult};
use crate::identity::VICINITY_MONITOR;

/// Delivery transitions of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationStatus {
    Starting,
    Replying,
    SendingViaFabric,
    ReceivedInFabric,
    ReceivedByActor,
    AcknowledgedByActor,
    ErrorAfterReceivedByActor,
}

impl ConversationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversationStatus::Starting => "Starting",
            ConversationStatus::Replying => "Replying",
            ConversationStatus::SendingViaFabric => "SendingViaFabric",
            ConversationStatus::ReceivedInFabric => "ReceivedInFabric",
            ConversationStatus::ReceivedByActor => "ReceivedByActor",
            ConversationStatus::AcknowledgedByActor => "AcknowledgedByActor",
            ConversationStatus::ErrorAfterReceivedByActor => "ErrorAfterReceivedByActor",
        }
    }
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Starting" => ConversationStatus::Starting,
            "Replying" => ConversationStatus::Replying,
            "SendingViaFabric" => ConversationStatus::SendingViaFabric,
            "ReceivedInFabric" => ConversationStatus::ReceivedInFabric,
            "ReceivedByActor" => ConversationStatus::ReceivedByActor,
            "AcknowledgedByActor" => ConversationStatus::AcknowledgedByActor,
            "ErrorAfterReceivedByActor" => ConversationStatus::ErrorAfterReceivedByActor,
            other => return Err(format!("unknown conversation status {other}")),
        })
    }
}

/// Identifies one leg of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub subject: String,
    pub from: String,
    pub to: String,
    pub index: u64,
}

impl ConversationEntry {
    pub fn of(event: &Event) -> Self {
        Self {
            subject: event.event_type().to_string(),
            from: event.from().to_string(),
            to: event.to_first().to_string(),
            index: event.index(),
        }
    }
}

/// Outcome of [`Conversation::record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Entry(ConversationEntry),
    /// Protocol traffic and monitor reports are not logged.
    Ignored,
}

/// Conversation log over the fabric.
#[derive(Clone)]
pub struct Conversation {
    fabric: Arc<dyn Fabric>,
    ttl: Duration,
}

impl Conversation {
    pub fn new(fabric: Arc<dyn Fabric>, ttl: Duration) -> Self {
        Self { fabric, ttl }
    }

    fn key(request_id: &str) -> String {
        format!("{request_id}/Convo")
    }

    /// Writes `status` for `event`'s leg of its conversation.
    pub async fn record(&self, event: &Event, status: ConversationStatus) -> FabricResult<Recorded> {
        let Some(request_id) = event.request_id() else {
            return Ok(Recorded::Ignored);
        };
        if kinds::is_protocol_exempt(event.subject()) || event.to_first() == VICINITY_MONITOR {
            return Ok(Recorded::Ignored);
        }

        let entry = ConversationEntry::of(event);
        let key = Self::key(request_id);
        self.fabric
            .hset(&key, &serde_json::to_string(&entry)?, status.to_string())
            .await?;
        self.fabric.expire(&key, self.ttl).await?;
        trace!(request_id, subject = %entry.subject, %status, "Conversation recorded");
        Ok(Recorded::Entry(entry))
    }

    /// All legs of a request with their latest status.
    pub async fn entries(&self, request_id: &str) -> FabricResult<Vec<(ConversationEntry, ConversationStatus)>> {
        let raw = self.fabric.hgetall(&Self::key(request_id)).await?;
        Ok(raw
            .into_iter()
            .filter_map(|(field, status)| {
                let entry = serde_json::from_str::<ConversationEntry>(&field).ok()?;
                let status = status.parse().ok()?;
                Some((entry, status))
            })
            .collect())
    }

    /// Whether the receiver of `event_type` from `from` to `to` acknowledged it.
    pub async fn has_acknowledged(
        &self,
        request_id: &str,
        event_type: &str,
        from: &str,
        to: &str,
    ) -> FabricResult<bool> {
        Ok(self.entries(request_id).await?.iter().any(|(entry, status)| {
            *status == ConversationStatus::AcknowledgedByActor
                && entry.subject == event_type
                && entry.from == from
                && entry.to == to
        }))
    }
}
