//! # Tasklist
//!
//! Workflow tracker for multi-step use cases. Each request gets a hash
//! `<request id>/Tasklist:<use case>` holding one JSON [`TasklistEntry`] per task
//! plus bookkeeping fields (status, current task, counters). Running tasklists are
//! listed on the daily board topic `Tasklists/Active` and move to `Tasklists/Completed`
//! or `Tasklists/Failed` once [`Tasklist::handle_finished_tasks`] sees them finish.
//!
//! A use case may have a [`TasklistDefinition`] in the `TasklistDefinitions` hash;
//! with one, a tasklist is complete as soon as every defined task has completed.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::coordination::board::daily_topic;
use crate::error::VicinityError;
use crate::fabric::Fabric;

pub const TASKLIST_DEFINITIONS: &str = "TasklistDefinitions";
pub const STATUS: &str = "status";
pub const CURRENT_TASK: &str = "currentTask";
pub const LAST_COMPLETED_TASK: &str = "lastCompletedTask";
pub const NUM_TASKS_COMPLETED: &str = "numTasksCompleted";
pub const NUM_TASKS_FAILED: &str = "numTasksFailed";
pub const MESSAGE: &str = "message";

pub const ACTIVE_TOPIC: &str = "Tasklists/Active";
pub const COMPLETED_TOPIC: &str = "Tasklists/Completed";
pub const FAILED_TOPIC: &str = "Tasklists/Failed";

const HEALTH_ENTRY: &str = "environment/health/tasklist";
const ENTRY_TTL: Duration = Duration::from_secs(3600);
const DEFINITIONS_TTL: Duration = Duration::from_secs(86_400);
const RUNNING: &str = "running";

/// Overall state of a tasklist, stored in its `status` field.
pub const IN_PROGRESS: &str = "InProgress";
pub const COMPLETED: &str = "Completed";
pub const FAILED: &str = "Failed";

/// State of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TasklistStatus {
    Pending,
    InProgress,
    Complete,
    Failed,
    Gone,
}

impl fmt::Display for TasklistStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TasklistStatus::Pending => "Pending",
            TasklistStatus::InProgress => "InProgress",
            TasklistStatus::Complete => "Complete",
            TasklistStatus::Failed => "Failed",
            TasklistStatus::Gone => "Gone",
        };
        f.write_str(text)
    }
}

/// One task's record inside a tasklist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TasklistEntry {
    pub status: TasklistStatus,
    pub message: String,
    pub time_stamp: DateTime<Utc>,
}

impl TasklistEntry {
    pub fn new(status: TasklistStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            time_stamp: Utc::now(),
        }
    }

    pub fn to_json(&self) -> Result<String, VicinityError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}

/// The expected tasks of a use case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TasklistDefinition {
    pub name: String,
    pub tasks: Vec<String>,
}

/// Workflow tracker over the fabric.
#[derive(Clone)]
pub struct Tasklist {
    fabric: Arc<dyn Fabric>,
}

impl Tasklist {
    pub fn new(fabric: Arc<dyn Fabric>) -> Self {
        Self { fabric }
    }

    /// Hash key of a request's tasklist for `usecase`.
    pub fn signature(request_id: &str, usecase: &str) -> String {
        format!("{request_id}/Tasklist:{usecase}")
    }

    /// Registers the expected tasks of `usecase`.
    pub async fn define(&self, usecase: &str, definition: &TasklistDefinition) -> Result<(), VicinityError> {
        self.fabric
            .hset(TASKLIST_DEFINITIONS, usecase, serde_json::to_string(definition)?)
            .await?;
        self.fabric.expire(TASKLIST_DEFINITIONS, DEFINITIONS_TTL).await?;
        info!(usecase, tasks = definition.tasks.len(), "Tasklist defined");
        Ok(())
    }

    pub async fn definition(&self, usecase: &str) -> Result<Option<TasklistDefinition>, VicinityError> {
        let Some(raw) = self.fabric.hget(TASKLIST_DEFINITIONS, usecase).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(definition) => Ok(Some(definition)),
            Err(e) => {
                warn!(usecase, error = %e, "Unreadable tasklist definition");
                Ok(None)
            }
        }
    }

    /// Records `task`'s entry and marks the tasklist in progress.
    pub async fn post_entry(
        &self,
        request_id: &str,
        usecase: &str,
        task: &str,
        entry: &TasklistEntry,
    ) -> Result<(), VicinityError> {
        let key = Self::signature(request_id, usecase);
        self.fabric.hset(&key, STATUS, IN_PROGRESS.to_string()).await?;
        self.fabric.expire(&key, ENTRY_TTL).await?;
        self.post_board(ACTIVE_TOPIC, &key).await?;
        self.fabric.hset(&key, CURRENT_TASK, task.to_string()).await?;
        self.fabric.hset(&key, task, entry.to_json()?).await?;
        debug!(request_id, usecase, task, status = %entry.status, "Tasklist entry posted");
        Ok(())
    }

    /// All fields of a request's tasklist.
    pub async fn read_entries(&self, request_id: &str, usecase: &str) -> Result<BTreeMap<String, String>, VicinityError> {
        Ok(self.fabric.hgetall(&Self::signature(request_id, usecase)).await?)
    }

    pub async fn read_entry(
        &self,
        request_id: &str,
        usecase: &str,
        task: &str,
    ) -> Result<Option<TasklistEntry>, VicinityError> {
        let raw = self.fabric.hget(&Self::signature(request_id, usecase), task).await?;
        Ok(raw.as_deref().and_then(TasklistEntry::from_json))
    }

    pub async fn record_completion(&self, request_id: &str, usecase: &str, task: &str) -> Result<(), VicinityError> {
        let key = Self::signature(request_id, usecase);
        self.fabric.hincr_by(&key, NUM_TASKS_COMPLETED, 1).await?;
        self.fabric.hdel(&key, CURRENT_TASK).await?;
        self.fabric.hset(&key, LAST_COMPLETED_TASK, task.to_string()).await?;
        Ok(())
    }

    /// Fails the whole tasklist because `task` failed.
    pub async fn record_failure(
        &self,
        request_id: &str,
        usecase: &str,
        task: &str,
        message: &str,
    ) -> Result<(), VicinityError> {
        let key = Self::signature(request_id, usecase);
        self.fabric.hset(&key, STATUS, FAILED.to_string()).await?;
        self.fabric.hincr_by(&key, NUM_TASKS_FAILED, 1).await?;
        self.fabric.hdel(&key, CURRENT_TASK).await?;
        self.fabric.hset(&key, LAST_COMPLETED_TASK, task.to_string()).await?;
        self.fabric.hset(&key, MESSAGE, message.to_string()).await?;
        warn!(request_id, usecase, task, message, "Tasklist failed");
        Ok(())
    }

    /// Moves a finished tasklist off the Active board.
    ///
    /// Returns whether the tasklist is finished, either by an explicit status or by
    /// having completed every task of its definition.
    pub async fn handle_finished_tasks(&self, request_id: &str, usecase: &str) -> Result<bool, VicinityError> {
        let key = Self::signature(request_id, usecase);
        match self.fabric.hget(&key, STATUS).await?.as_deref() {
            Some(FAILED) => {
                self.move_board(&key, FAILED_TOPIC).await?;
                return Ok(true);
            }
            Some(COMPLETED) => {
                self.move_board(&key, COMPLETED_TOPIC).await?;
                return Ok(true);
            }
            _ => {}
        }

        let Some(definition) = self.definition(usecase).await? else {
            return Ok(false);
        };
        let completed = self
            .fabric
            .hget(&key, NUM_TASKS_COMPLETED)
            .await?
            .and_then(|raw| raw.parse::<usize>().ok())
            .unwrap_or(0);
        if completed < definition.tasks.len() {
            return Ok(false);
        }
        self.fabric.hset(&key, STATUS, COMPLETED.to_string()).await?;
        self.move_board(&key, COMPLETED_TOPIC).await?;
        info!(request_id, usecase, tasks = completed, "Tasklist completed");
        Ok(true)
    }

    pub async fn has_completed_task(&self, request_id: &str, usecase: &str, task: &str) -> Result<bool, VicinityError> {
        Ok(matches!(
            self.read_entry(request_id, usecase, task).await?,
            Some(TasklistEntry { status: TasklistStatus::Complete, .. })
        ))
    }

    /// Marks `task` in progress for `actor`.
    pub async fn begin_task(&self, request_id: &str, usecase: &str, task: &str, actor: &str) -> Result<(), VicinityError> {
        let entry = TasklistEntry::new(TasklistStatus::InProgress, actor);
        self.post_entry(request_id, usecase, task, &entry).await
    }

    /// Marks `task` complete and returns whether the whole tasklist finished.
    pub async fn end_task(&self, request_id: &str, usecase: &str, task: &str, actor: &str) -> Result<bool, VicinityError> {
        let entry = TasklistEntry::new(TasklistStatus::Complete, actor);
        self.post_entry(request_id, usecase, task, &entry).await?;
        self.record_completion(request_id, usecase, task).await?;
        self.handle_finished_tasks(request_id, usecase).await
    }

    /// Names of the tasklists on today's Active board.
    pub async fn active(&self) -> Result<Vec<String>, VicinityError> {
        Ok(self.fabric.hgetall(&daily_topic(ACTIVE_TOPIC)).await?.into_keys().collect())
    }

    pub async fn is_ok(&self) -> bool {
        let stamp = Utc::now().to_rfc3339();
        if self.fabric.hset(HEALTH_ENTRY, STATUS, stamp.clone()).await.is_err() {
            return false;
        }
        matches!(self.fabric.hget(HEALTH_ENTRY, STATUS).await, Ok(Some(value)) if value == stamp)
    }

    async fn post_board(&self, topic: &str, name: &str) -> Result<(), VicinityError> {
        let key = daily_topic(topic);
        self.fabric.hset(&key, name, RUNNING.to_string()).await?;
        self.fabric.expire(&key, DEFINITIONS_TTL).await?;
        Ok(())
    }

    async fn move_board(&self, name: &str, to: &str) -> Result<(), VicinityError> {
        self.fabric.hdel(&daily_topic(ACTIVE_TOPIC), name).await?;
        self.post_board(to, name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::InMemoryFabric;

    fn tasklist() -> (Arc<dyn Fabric>, Tasklist) {
        let fabric: Arc<dyn Fabric> = Arc::new(InMemoryFabric::new());
        (fabric.clone(), Tasklist::new(fabric))
    }

    fn checkout() -> TasklistDefinition {
        TasklistDefinition {
            name: "Checkout".into(),
            tasks: vec!["ReserveStock".into(), "ChargeCard".into()],
        }
    }

    #[tokio::test]
    async fn test_defined_tasklist_completes_after_every_task() {
        let (fabric, tasklist) = tasklist();
        tasklist.define("Checkout", &checkout()).await.unwrap();

        tasklist.begin_task("R1", "Checkout", "ReserveStock", "Merchant.a").await.unwrap();
        assert_eq!(tasklist.active().await.unwrap(), vec![Tasklist::signature("R1", "Checkout")]);
        assert!(!tasklist.end_task("R1", "Checkout", "ReserveStock", "Merchant.a").await.unwrap());
        assert!(tasklist.has_completed_task("R1", "Checkout", "ReserveStock").await.unwrap());
        assert!(!tasklist.has_completed_task("R1", "Checkout", "ChargeCard").await.unwrap());

        tasklist.begin_task("R1", "Checkout", "ChargeCard", "Cashier.b").await.unwrap();
        assert!(tasklist.end_task("R1", "Checkout", "ChargeCard", "Cashier.b").await.unwrap());

        let entries = tasklist.read_entries("R1", "Checkout").await.unwrap();
        assert_eq!(entries.get(STATUS).map(String::as_str), Some(COMPLETED));
        assert_eq!(entries.get(NUM_TASKS_COMPLETED).map(String::as_str), Some("2"));
        assert_eq!(entries.get(LAST_COMPLETED_TASK).map(String::as_str), Some("ChargeCard"));
        assert!(!entries.contains_key(CURRENT_TASK));

        assert!(tasklist.active().await.unwrap().is_empty());
        let completed = fabric.hgetall(&daily_topic(COMPLETED_TOPIC)).await.unwrap();
        assert!(completed.contains_key(&Tasklist::signature("R1", "Checkout")));
    }

    #[tokio::test]
    async fn test_failure_moves_tasklist_to_failed_board() {
        let (fabric, tasklist) = tasklist();
        tasklist.begin_task("R2", "Checkout", "ChargeCard", "Cashier.b").await.unwrap();
        tasklist
            .record_failure("R2", "Checkout", "ChargeCard", "card declined")
            .await
            .unwrap();

        assert!(tasklist.handle_finished_tasks("R2", "Checkout").await.unwrap());
        let entries = tasklist.read_entries("R2", "Checkout").await.unwrap();
        assert_eq!(entries.get(STATUS).map(String::as_str), Some(FAILED));
        assert_eq!(entries.get(NUM_TASKS_FAILED).map(String::as_str), Some("1"));
        assert_eq!(entries.get(MESSAGE).map(String::as_str), Some("card declined"));

        let failed = fabric.hgetall(&daily_topic(FAILED_TOPIC)).await.unwrap();
        assert!(failed.contains_key(&Tasklist::signature("R2", "Checkout")));
        assert!(tasklist.active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_undefined_tasklist_stays_open() {
        let (_, tasklist) = tasklist();
        assert!(!tasklist.end_task("R3", "Browse", "ShowProducts", "Merchant.a").await.unwrap());
        assert_eq!(tasklist.active().await.unwrap().len(), 1);
        assert!(tasklist.is_ok().await);
    }
}
