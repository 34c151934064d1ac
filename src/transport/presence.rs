//! # Presence Discovery
//!
//! Each group's roster is the status topic `VicinityStatus/<group>` on the bulletin
//! board. Discovery reads today's Active hash, keeps instances that report
//! `running` within the freshness window and belong to the requested project, and
//! hands them out round-robin.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::coordination::board::{status_key, BoardStatus, BulletinBoard, PresenceStatus};
use crate::fabric::{Fabric, FabricResult};
use crate::identity::{self, DEFAULT_PROJECT};

/// Roster topic of a group.
pub fn roster_topic(group: &str) -> String {
    format!("VicinityStatus/{group}")
}

/// Read side of the presence registry.
#[derive(Clone)]
pub struct Presence {
    fabric: Arc<dyn Fabric>,
    board: BulletinBoard,
    freshness: chrono::Duration,
    cursors: Arc<Mutex<HashMap<String, usize>>>,
}

impl Presence {
    pub fn new(fabric: Arc<dyn Fabric>, board: BulletinBoard, freshness: chrono::Duration) -> Self {
        Self {
            fabric,
            board,
            freshness,
            cursors: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn board(&self) -> &BulletinBoard {
        &self.board
    }

    /// Posts `name`'s status into its group's roster.
    pub async fn post(&self, group: &str, name: &str, status: &BoardStatus) -> FabricResult<()> {
        self.board
            .post_status_topic(&roster_topic(group), name, status)
            .await
    }

    /// A live instance of `group`, preferring `project` and falling back to the default project.
    pub async fn find_actor(&self, group: &str, project: &str) -> FabricResult<Option<String>> {
        if project == DEFAULT_PROJECT {
            return self.find_active_actor(group, DEFAULT_PROJECT).await;
        }
        match self.find_active_actor(group, project).await? {
            Some(name) => Ok(Some(name)),
            None => self.find_active_actor(group, DEFAULT_PROJECT).await,
        }
    }

    async fn find_active_actor(&self, group: &str, project: &str) -> FabricResult<Option<String>> {
        let roster = status_key(&roster_topic(group), PresenceStatus::Active);
        let mut candidates = Vec::new();

        for (name, raw) in self.fabric.hgetall(&roster).await? {
            match BoardStatus::from_json(&raw) {
                Some(status) if status.is_running() => {
                    if identity::project_of(&name) == Some(project) && !status.is_stale(self.freshness) {
                        candidates.push(name);
                    }
                }
                _ => {
                    debug!(group, %name, "Pruning roster entry that is not running");
                    self.fabric.hdel(&roster, &name).await?;
                }
            }
        }

        if candidates.is_empty() {
            return Ok(None);
        }
        let slot = {
            let mut cursors = self.cursors.lock();
            let cursor = cursors.entry(format!("{group}.{project}")).or_insert(0);
            let slot = *cursor % candidates.len();
            *cursor = cursor.wrapping_add(1);
            slot
        };
        Ok(candidates.into_iter().nth(slot))
    }

    /// Whether `name` is in its group's Active roster today.
    pub async fn actor_is_available(&self, name: &str) -> FabricResult<bool> {
        let roster = status_key(&roster_topic(identity::group_of(name)), PresenceStatus::Active);
        self.fabric.hexists(&roster, name).await
    }
}
