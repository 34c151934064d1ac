//! # To-Do Ledger
//!
//! Work whose target vanished is parked per group in the hash `ToDo:<group>`. The
//! field is a JSON [`TaskEntry`] pointing at an unacknowledged event
//! (group, request id, index, owner) and the value its [`TaskStatus`]. Any live
//! instance of the group can later claim a Pending entry and replay the event.
//!
//! # Architecture Note
//! Claiming rewrites the field (the owner is part of it), which takes a delete and
//! an insert. Whoever's delete actually removes the Pending field wins the claim;
//! a requestor whose delete finds nothing backs off, so one entry is never handed
//! to two requestors. A crash between the delete and the insert still loses the
//! entry until the unacknowledged event is parked again.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::VicinityError;
use crate::event::Event;
use crate::fabric::Fabric;
use crate::identity;
use crate::protocol::acknowledgement::{AckOutcome, AcknowledgementLedger, HEADER_ORIGINAL_ACTOR};
use crate::transport::presence::Presence;

/// Work item status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::InProgress => "InProgress",
            TaskStatus::Completed => "Completed",
            TaskStatus::Failed => "Failed",
        };
        f.write_str(text)
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(TaskStatus::Pending),
            "InProgress" => Ok(TaskStatus::InProgress),
            "Completed" => Ok(TaskStatus::Completed),
            "Failed" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status {other}")),
        }
    }
}

/// Reference to parked work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEntry {
    pub group: String,
    pub key: String,
    pub index: u64,
    #[serde(default)]
    pub owner: Option<String>,
}

impl TaskEntry {
    pub fn to_json(&self) -> Result<String, VicinityError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// To-do ledger over the fabric.
#[derive(Clone)]
pub struct ToDoList {
    fabric: Arc<dyn Fabric>,
    ack: AcknowledgementLedger,
    presence: Presence,
    enabled: bool,
}

impl ToDoList {
    pub fn new(fabric: Arc<dyn Fabric>, ack: AcknowledgementLedger, presence: Presence, enabled: bool) -> Self {
        Self {
            fabric,
            ack,
            presence,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn key(group: &str) -> String {
        format!("ToDo:{group}")
    }

    /// Parks `event` (already recorded as unacknowledged) for its target's group.
    ///
    /// Marks the event as a to-do task and links it to the entry. Returns the entry,
    /// or `None` when the ledger is disabled or the event has no request id.
    pub async fn add_task(&self, event: &mut Event) -> Result<Option<TaskEntry>, VicinityError> {
        if !self.enabled {
            return Ok(None);
        }
        let Some(request_id) = event.request_id().map(str::to_string) else {
            return Ok(None);
        };
        let group = identity::group_of(event.to_first()).to_string();
        let entry = TaskEntry {
            group: group.clone(),
            key: request_id,
            index: event.index(),
            owner: None,
        };
        let link = entry.to_json()?;
        event.flags_mut().to_do_task = true;
        event.set_to_do_link(Some(link.clone()));
        self.fabric
            .hset(&Self::key(&group), &link, TaskStatus::Pending.to_string())
            .await?;
        info!(%group, request_id = %entry.key, index = entry.index, "Task added");
        Ok(Some(entry))
    }

    /// All entries of a group with their status.
    pub async fn tasks(&self, group: &str) -> Result<Vec<(TaskEntry, TaskStatus)>, VicinityError> {
        let raw = self.fabric.hgetall(&Self::key(group)).await?;
        Ok(raw
            .into_iter()
            .filter_map(|(field, status)| {
                Some((serde_json::from_str(&field).ok()?, status.parse().ok()?))
            })
            .collect())
    }

    /// Claims the first Pending entry of `group` for `requestor` and returns its event.
    ///
    /// While scanning, entries without an owner or with an owner that is no longer
    /// present are put back to Pending if their event is still unacknowledged, or
    /// closed if it expired.
    pub async fn acquire_available_task(&self, group: &str, requestor: &str) -> Result<Option<Event>, VicinityError> {
        if !self.enabled {
            return Ok(None);
        }
        let key = Self::key(group);
        let mut selected: Option<TaskEntry> = None;

        for (entry, status) in self.tasks(group).await? {
            if selected.is_none() && status == TaskStatus::Pending {
                selected = Some(entry);
                continue;
            }
            let orphaned = match &entry.owner {
                None => true,
                Some(owner) => !self.presence.actor_is_available(owner).await?,
            };
            if !orphaned || status == TaskStatus::Pending {
                continue;
            }
            if self.ack.get_unacknowledged(&entry.key, entry.index).await?.is_some() {
                self.reassign_task(group, &entry).await?;
            } else {
                self.close_task(group, &entry).await?;
            }
        }

        let Some(entry) = selected else {
            return Ok(None);
        };
        let Some(mut event) = self.ack.get_unacknowledged(&entry.key, entry.index).await? else {
            self.close_task(group, &entry).await?;
            return Ok(None);
        };

        if !self.fabric.hdel(&key, &entry.to_json()?).await? {
            debug!(group, requestor, request_id = %entry.key, "Task claimed elsewhere");
            return Ok(None);
        }
        let claimed = TaskEntry {
            owner: Some(requestor.to_string()),
            ..entry
        };
        let link = claimed.to_json()?;
        self.fabric
            .hset(&key, &link, TaskStatus::InProgress.to_string())
            .await?;

        let previous = event.to_first().to_string();
        event
            .header_mut()
            .insert(HEADER_ORIGINAL_ACTOR.to_string(), serde_json::Value::String(previous));
        event.set_targets(vec![requestor.to_string()]);
        event.set_to_do_link(Some(link));
        let flags = event.flags_mut();
        flags.to_do_task = true;
        flags.await_response = false;
        info!(group, requestor, request_id = %claimed.key, index = claimed.index, "Task acquired");
        Ok(Some(event))
    }

    /// Acknowledges the task's event and removes its entry.
    pub async fn complete_task(&self, event: &Event) -> Result<AckOutcome, VicinityError> {
        let outcome = self.ack.record_acknowledgement(event).await?;
        if let Some(link) = event.to_do_link() {
            let group = identity::group_of(event.to_first());
            self.fabric.hdel(&Self::key(group), link).await?;
            debug!(group, "Task completed");
        }
        Ok(outcome)
    }

    /// Leaves the task for a retry once its owner is gone.
    pub async fn fail_task(&self, event: &Event) -> Result<(), VicinityError> {
        if let Some(link) = event.to_do_link() {
            let group = identity::group_of(event.to_first());
            self.fabric
                .hset(&Self::key(group), link, TaskStatus::Failed.to_string())
                .await?;
            info!(group, "Task failed");
        }
        Ok(())
    }

    pub async fn reassign_task(&self, group: &str, entry: &TaskEntry) -> Result<(), VicinityError> {
        self.fabric
            .hset(&Self::key(group), &entry.to_json()?, TaskStatus::Pending.to_string())
            .await?;
        debug!(group, request_id = %entry.key, "Task reassigned");
        Ok(())
    }

    pub async fn close_task(&self, group: &str, entry: &TaskEntry) -> Result<(), VicinityError> {
        self.fabric.hdel(&Self::key(group), &entry.to_json()?).await?;
        debug!(group, request_id = %entry.key, "Task closed");
        Ok(())
    }
}
