//! # Heartbeat
//!
//! One task per actor ticks every `tick_seconds` and drives the role's periodic
//! hooks. Each tick, in order:
//!
//! 1. `do_once` on the first tick, then the 30/60-minute and 12/24-hour hooks
//! 2. health check (role, fabric, board, tasklist, last self checkup, listeners)
//! 3. presence post and a new self checkup
//! 4. `on_think`, and `do_my_work` when this instance is picked from the roster
//! 5. unacknowledged events this actor sent
//! 6. one parked task from the group's to-do ledger
//! 7. expired local memory and unanswered callbacks
//!
//! A failed health check terminates the actor and ends the task.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{Actor, ACK_MARKER_KIND, ACK_MARKER_PREFIX, STANDING_DOWN, WAITING_PREFIX};
use crate::coordination::board::{PresenceStatus, RUNNING};
use crate::error::VicinityError;
use crate::event::{kinds, Event};
use crate::security::generate_request_id;
use crate::transport::message::target_of;
use crate::transport::roster_topic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Hook {
    ThirtyMinutes,
    SixtyMinutes,
    TwelveHours,
    TwentyFourHours,
}

/// Counts ticks as minutes and reports which periodic hooks are due.
#[derive(Debug, Default)]
pub(super) struct Clock {
    minutes: u32,
    hours: u32,
    ticks: u64,
}

impl Clock {
    pub(super) fn is_first_tick(&self) -> bool {
        self.ticks == 0
    }

    pub(super) fn advance(&mut self) -> Vec<Hook> {
        self.ticks += 1;
        self.minutes += 1;
        let mut due = Vec::new();

        if self.minutes == 30 {
            due.push(Hook::ThirtyMinutes);
        }
        if self.minutes == 60 {
            due.push(Hook::ThirtyMinutes);
            due.push(Hook::SixtyMinutes);
            self.minutes = 0;
            self.hours += 1;

            if self.hours == 12 {
                due.push(Hook::TwelveHours);
            }
            if self.hours == 24 {
                due.push(Hook::TwelveHours);
                due.push(Hook::TwentyFourHours);
                self.hours = 0;
            }
        }
        due
    }
}

pub(super) fn start(actor: &Actor) -> JoinHandle<()> {
    let weak = Arc::downgrade(&actor.inner);
    let stopping = actor.inner.stopping.clone();
    let tick = actor.inner.vicinity.config().tick();
    let name = actor.name().to_string();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + tick, tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut clock = Clock::default();

        loop {
            tokio::select! {
                _ = stopping.cancelled() => break,
                _ = interval.tick() => {}
            }
            let Some(inner) = weak.upgrade() else {
                break;
            };
            let actor = Actor { inner };
            if actor.is_terminated() || !on_tick(&actor, &mut clock).await {
                break;
            }
        }
        debug!(actor = %name, "Heartbeat stopped");
    })
}

/// Runs one tick. Returns `false` once the actor has been terminated.
async fn on_tick(actor: &Actor, clock: &mut Clock) -> bool {
    let role = actor.inner.role.clone();
    if clock.is_first_tick() {
        role.do_once(actor).await;
    }
    for hook in clock.advance() {
        match hook {
            Hook::ThirtyMinutes => role.on_30min(actor).await,
            Hook::SixtyMinutes => {
                role.on_60min(actor).await;
                if let Err(e) = actor.write_notes().await {
                    warn!(actor = actor.name(), error = %e, "Notes not written");
                }
            }
            Hook::TwelveHours => role.on_12hours(actor).await,
            Hook::TwentyFourHours => {
                role.on_24hours(actor).await;
                actor.inner.vicinity.security().renew();
            }
        }
    }

    if !check_health(actor).await {
        actor.terminate("unhealthy").await;
        return false;
    }

    let status = actor.status();
    let message = if status == PresenceStatus::Away { STANDING_DOWN } else { RUNNING };
    if let Err(e) = actor.give_status(status, message).await {
        warn!(actor = actor.name(), error = %e, "Presence not posted");
    }
    send_checkup(actor).await;

    role.on_think(actor).await;
    if is_my_turn(actor).await {
        role.do_my_work(actor).await;
    }

    handle_unacknowledged_events(actor).await;
    look_for_work(actor).await;

    let swept = actor.memory().sweep();
    if swept > 0 {
        debug!(actor = actor.name(), swept, "Expired facts dropped");
    }
    let expired = actor.inner.callbacks.expire(actor.inner.vicinity.config().ledger_ttl());
    if expired > 0 {
        debug!(actor = actor.name(), expired, "Unanswered callbacks dropped");
    }
    true
}

async fn check_health(actor: &Actor) -> bool {
    let inner = &actor.inner;
    if !inner.role.is_healthy(actor).await {
        warn!(actor = actor.name(), "Role reports unhealthy environment");
        return false;
    }
    if !inner.vicinity.connections_ok().await {
        warn!(actor = actor.name(), "Fabric does not answer");
        return false;
    }
    if !inner.vicinity.bulletin_board().is_ok().await {
        warn!(actor = actor.name(), "Bulletin board does not answer");
        return false;
    }
    if !inner.vicinity.tasklist().is_ok().await {
        warn!(actor = actor.name(), "Tasklist does not answer");
        return false;
    }

    let limit = Duration::from_secs(inner.vicinity.config().health_check_seconds);
    let overdue = inner
        .state
        .lock()
        .pending_checkup
        .is_some_and(|sent| sent.elapsed() > limit);
    if overdue {
        warn!(actor = actor.name(), "Self checkup not answered");
        return false;
    }

    let dead: Vec<String> = inner
        .state
        .lock()
        .listeners
        .iter()
        .filter(|listener| !listener.is_alive())
        .map(|listener| target_of(listener.channel()).to_string())
        .collect();
    for target in dead {
        if let Err(e) = actor.listen(&target).await {
            warn!(actor = actor.name(), %target, error = %e, "Listener could not be restarted");
            return false;
        }
        info!(actor = actor.name(), %target, "Listener restarted");
    }
    true
}

/// Sends a checkup to this actor's own channel; the answer clears the pending mark.
async fn send_checkup(actor: &Actor) {
    let name = actor.name();
    let checkup = Event::new(kinds::SELF_VICINITY_CHECKUP, name)
        .to(name)
        .with_request_id(generate_request_id())
        .anonymous();
    {
        let mut state = actor.inner.state.lock();
        if state.pending_checkup.is_none() {
            state.pending_checkup = Some(Instant::now());
        }
    }
    if let Err(e) = actor.inner.vicinity.publish_event(&checkup, name).await {
        warn!(actor = name, error = %e, "Self checkup not sent");
    }
}

async fn is_my_turn(actor: &Actor) -> bool {
    match actor.bulletin_board().whos_turn_is_it(&roster_topic(actor.group())).await {
        Ok(Some(picked)) => picked == actor.name(),
        Ok(None) => false,
        Err(e) => {
            warn!(actor = actor.name(), error = %e, "Roster not readable");
            false
        }
    }
}

/// A waiting acknowledgement marker, `requiresAck:<rid>/<type>/<from>/<to>` = `Waiting:<index>`.
#[derive(Debug, PartialEq, Eq)]
pub(super) struct Marker {
    request_id: String,
    event_type: String,
    from: String,
    to: String,
    index: u64,
}

impl Marker {
    pub(super) fn parse(key: &str, value: &Value) -> Option<Self> {
        let mut parts = key.strip_prefix(ACK_MARKER_PREFIX)?.splitn(4, '/');
        let request_id = parts.next()?.to_string();
        let event_type = parts.next()?.to_string();
        let from = parts.next()?.to_string();
        let to = parts.next()?.to_string();
        let index = value.as_str()?.strip_prefix(WAITING_PREFIX)?.parse().ok()?;
        Some(Self {
            request_id,
            event_type,
            from,
            to,
            index,
        })
    }
}

async fn handle_unacknowledged_events(actor: &Actor) {
    let markers = actor.memory().recall_matching(ACK_MARKER_KIND, |_, value| {
        value.as_str().is_some_and(|v| v.starts_with(WAITING_PREFIX))
    });
    for (key, value) in markers {
        if let Err(e) = follow_up(actor, &key, &value).await {
            warn!(actor = actor.name(), %key, error = %e, "Unacknowledged event not followed up");
        }
    }
}

async fn follow_up(actor: &Actor, key: &str, value: &Value) -> Result<(), VicinityError> {
    let Some(marker) = Marker::parse(key, value) else {
        actor.memory().forget(ACK_MARKER_KIND, key);
        return Ok(());
    };
    let vicinity = actor.vicinity();

    let acknowledged = vicinity
        .conversation()
        .has_acknowledged(&marker.request_id, &marker.event_type, &marker.from, &marker.to)
        .await?;
    if acknowledged {
        actor.memory().forget(ACK_MARKER_KIND, key);
        return Ok(());
    }
    let Some(event) = vicinity
        .acknowledgements()
        .get_unacknowledged(&marker.request_id, marker.index)
        .await?
    else {
        actor.memory().forget(ACK_MARKER_KIND, key);
        return Ok(());
    };

    let role = actor.inner.role.clone();
    if role.on_unacknowledged_event(actor, &event).await {
        return Ok(());
    }
    if vicinity.actor_is_available(&marker.to).await? {
        return Ok(());
    }
    info!(actor = actor.name(), to = %marker.to, event_type = %marker.event_type, "Target gone, parking event");
    actor.park(event).await;
    Ok(())
}

async fn look_for_work(actor: &Actor) {
    let todo = actor.todo();
    if !todo.is_enabled() {
        return;
    }
    match todo.acquire_available_task(actor.group(), actor.name()).await {
        Ok(Some(task)) => {
            info!(actor = actor.name(), event_type = task.event_type(), "Working on parked task");
            actor.hear(task).await;
        }
        Ok(None) => {}
        Err(e) => warn!(actor = actor.name(), error = %e, "To-do ledger not readable"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_schedules_hooks() {
        let mut clock = Clock::default();
        assert!(clock.is_first_tick());

        let mut fired = Vec::new();
        for _ in 0..(24 * 60) {
            fired.extend(clock.advance());
        }
        let count = |hook| fired.iter().filter(|h| **h == hook).count();
        assert_eq!(count(Hook::ThirtyMinutes), 48);
        assert_eq!(count(Hook::SixtyMinutes), 24);
        assert_eq!(count(Hook::TwelveHours), 2);
        assert_eq!(count(Hook::TwentyFourHours), 1);
        assert!(!clock.is_first_tick());
    }

    #[test]
    fn test_marker_parsing() {
        let key = "requiresAck:R1/RequestPayment/Customer.default.1.0.0.a/Cashier.default.1.0.0.b";
        let marker = Marker::parse(key, &Value::from("Waiting:3")).unwrap();
        assert_eq!(marker.request_id, "R1");
        assert_eq!(marker.to, "Cashier.default.1.0.0.b");
        assert_eq!(marker.index, 3);

        assert!(Marker::parse(key, &Value::from("Done")).is_none());
        assert!(Marker::parse("R1/RequestPayment", &Value::from("Waiting:1")).is_none());
    }
}
