//! # Bulletin Board
//!
//! Shared notice board over the fabric. Plain entries are single keys; *topics* are
//! hashes bucketed per UTC day (`BulletinBoard:topic/<topic>:<yyyy-mm-dd>`).
//!
//! Status topics split each day bucket into `/Active`, `/Away` and `/Gone` hashes.
//! An actor's entry lives in exactly one of them; [`BulletinBoard::post_status_topic`]
//! moves it and opportunistically evicts Active entries that have not been touched
//! within the freshness window. The presence roster used for target discovery is the
//! status topic `VicinityStatus/<group>`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::fabric::{Fabric, FabricResult};

pub const BOARD_PREFIX: &str = "BulletinBoard:";
pub const TOPIC_PREFIX: &str = "BulletinBoard:topic/";
const HEALTH_ENTRY: &str = "environment/health/bulletinboard";
/// Message an actor posts on every healthy heartbeat.
pub const RUNNING: &str = "running";

/// Presence state of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PresenceStatus {
    Active,
    Missing,
    Away,
    Gone,
}

impl PresenceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PresenceStatus::Active => "Active",
            PresenceStatus::Missing => "Missing",
            PresenceStatus::Away => "Away",
            PresenceStatus::Gone => "Gone",
        }
    }
}

/// The value stored for one actor in a status topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardStatus {
    pub status: PresenceStatus,
    pub subject: String,
    pub message: String,
    pub timestamp: String,
}

impl BoardStatus {
    pub fn new(status: PresenceStatus, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            subject: subject.into(),
            message: message.into(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Refreshes the timestamp to now.
    pub fn touch(&mut self) {
        self.timestamp = Utc::now().to_rfc3339();
    }

    /// Parsed timestamp. An unreadable one is treated as three minutes old.
    pub fn touched_at(&self) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now() - chrono::Duration::minutes(3))
    }

    pub fn is_stale(&self, freshness: chrono::Duration) -> bool {
        Utc::now() - self.touched_at() > freshness
    }

    pub fn is_running(&self) -> bool {
        self.message == RUNNING
    }

    pub fn to_json(&self) -> FabricResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}

/// Key of a topic's bucket for today.
pub fn daily_topic(topic: &str) -> String {
    format!("{TOPIC_PREFIX}{topic}:{}", Utc::now().format("%Y-%m-%d"))
}

/// Key of one status hash of a topic for today.
pub fn status_key(topic: &str, status: PresenceStatus) -> String {
    format!("{}/{}", daily_topic(topic), status.as_str())
}

/// Shared notice board.
#[derive(Clone)]
pub struct BulletinBoard {
    fabric: Arc<dyn Fabric>,
    ttl: Duration,
    freshness: chrono::Duration,
}

impl BulletinBoard {
    pub fn new(fabric: Arc<dyn Fabric>, ttl: Duration, freshness: chrono::Duration) -> Self {
        Self { fabric, ttl, freshness }
    }

    pub async fn post(&self, name: &str, value: impl Into<String>) -> FabricResult<()> {
        self.fabric
            .set(&format!("{BOARD_PREFIX}{name}"), value.into(), Some(self.ttl))
            .await
    }

    pub async fn read(&self, name: &str) -> FabricResult<Option<String>> {
        self.fabric.get(&format!("{BOARD_PREFIX}{name}")).await
    }

    /// Writes `name = value` into today's bucket of `topic`.
    pub async fn post_topic(&self, topic: &str, name: &str, value: impl Into<String>) -> FabricResult<()> {
        let key = daily_topic(topic);
        self.fabric.hset(&key, name, value.into()).await?;
        self.fabric.expire(&key, self.ttl).await?;
        Ok(())
    }

    pub async fn read_topic_entry(&self, topic: &str, name: &str) -> FabricResult<Option<String>> {
        self.fabric.hget(&daily_topic(topic), name).await
    }

    pub async fn read_topic_entries(&self, topic: &str) -> FabricResult<BTreeMap<String, String>> {
        self.fabric.hgetall(&daily_topic(topic)).await
    }

    pub async fn read_random_topic_entry(&self, topic: &str) -> FabricResult<Option<(String, String)>> {
        let key = daily_topic(topic);
        let Some(name) = self.fabric.hrandfield(&key).await? else {
            return Ok(None);
        };
        Ok(self.fabric.hget(&key, &name).await?.map(|value| (name, value)))
    }

    /// Records `name`'s status, keeping it in exactly one of Active/Away/Gone.
    pub async fn post_status_topic(&self, topic: &str, name: &str, status: &BoardStatus) -> FabricResult<()> {
        let json = status.to_json()?;
        let active = status_key(topic, PresenceStatus::Active);
        let away = status_key(topic, PresenceStatus::Away);
        let gone = status_key(topic, PresenceStatus::Gone);

        match status.status {
            PresenceStatus::Gone => {
                self.fabric.hdel(&active, name).await?;
                self.fabric.hdel(&away, name).await?;
                self.fabric.hset(&gone, name, json).await?;
                self.fabric.expire(&gone, self.ttl).await?;
            }
            PresenceStatus::Away => {
                self.fabric.hdel(&active, name).await?;
                self.fabric.hdel(&gone, name).await?;
                self.fabric.hset(&away, name, json).await?;
                self.fabric.expire(&away, self.ttl).await?;
            }
            PresenceStatus::Active | PresenceStatus::Missing => {
                self.fabric.hdel(&away, name).await?;
                self.fabric.hdel(&gone, name).await?;
                self.fabric.hset(&active, name, json).await?;
                self.fabric.expire(&active, self.ttl).await?;
                self.clear_idle_topic_entries(topic).await?;
            }
        }
        Ok(())
    }

    /// Moves Active entries older than the freshness window to Away.
    ///
    /// Returns the names that were moved.
    pub async fn clear_idle_topic_entries(&self, topic: &str) -> FabricResult<Vec<String>> {
        let active = status_key(topic, PresenceStatus::Active);
        let away = status_key(topic, PresenceStatus::Away);
        let mut moved = Vec::new();

        for (name, raw) in self.fabric.hgetall(&active).await? {
            let mut status = match BoardStatus::from_json(&raw) {
                Some(status) if !status.is_stale(self.freshness) => continue,
                Some(status) => status,
                None => BoardStatus::new(PresenceStatus::Away, "status", "unreadable"),
            };
            status.status = PresenceStatus::Away;
            self.fabric.hdel(&active, &name).await?;
            self.fabric.hset(&away, &name, status.to_json()?).await?;
            debug!(topic, %name, "Idle entry moved to Away");
            moved.push(name);
        }
        if !moved.is_empty() {
            self.fabric.expire(&away, self.ttl).await?;
        }
        Ok(moved)
    }

    /// Names currently in a status hash of `topic`.
    pub async fn members(&self, topic: &str, status: PresenceStatus) -> FabricResult<BTreeMap<String, BoardStatus>> {
        let entries = self.fabric.hgetall(&status_key(topic, status)).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(name, raw)| BoardStatus::from_json(&raw).map(|s| (name, s)))
            .collect())
    }

    /// A pseudo-random Active member of `topic`, if any.
    pub async fn whos_turn_is_it(&self, topic: &str) -> FabricResult<Option<String>> {
        self.fabric
            .hrandfield(&status_key(topic, PresenceStatus::Active))
            .await
    }

    /// Round-trips a timestamp entry through the store.
    pub async fn is_ok(&self) -> bool {
        let stamp = Utc::now().to_rfc3339();
        if self.post(HEALTH_ENTRY, stamp.clone()).await.is_err() {
            return false;
        }
        matches!(self.read(HEALTH_ENTRY).await, Ok(Some(value)) if value == stamp)
    }
}
