//! Behaviors every actor starts with.
//!
//! Registered before [`ActorRole::init`](super::ActorRole::init), so a role can
//! replace any of them by registering the same subject.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{behavior, Actor, ACK_MARKER_KIND, PAYLOAD_CHANNEL};
use crate::coordination::board::PresenceStatus;
use crate::error::VicinityError;
use crate::event::kinds;
use crate::protocol::acknowledgement::ACKNOWLEDGED_EVENT_TYPE;
use crate::transport::message::target_of;

const RECONNECT_ATTEMPTS: u32 = 5;
const RECONNECT_FIRST_DELAY: Duration = Duration::from_millis(500);

pub(super) fn register(actor: &Actor) {
    actor.register_behavior(
        kinds::ACKNOWLEDGEMENT,
        behavior(|event, handling| async move {
            let Some(acknowledged) = event.payload_str(ACKNOWLEDGED_EVENT_TYPE) else {
                return Ok(());
            };
            let key = Actor::ack_marker_key(
                event.request_id().unwrap_or_default(),
                acknowledged,
                event.to_first(),
                event.from(),
            );
            if handling.actor().memory().forget(ACK_MARKER_KIND, &key) {
                debug!(actor = handling.actor().name(), %key, "Acknowledgement received");
            }
            Ok(())
        }),
    );

    actor.register_behavior(
        kinds::ACTOR_DID_NOT_UNDERSTAND,
        behavior(|event, handling| async move {
            warn!(
                actor = handling.actor().name(),
                from = event.from(),
                detail = event.message().unwrap_or_default(),
                "Event not understood"
            );
            Ok(())
        }),
    );

    for kind in kinds::ERROR_KINDS {
        actor.register_behavior(
            kind,
            behavior(|event, handling| async move {
                warn!(
                    actor = handling.actor().name(),
                    event_type = event.event_type(),
                    from = event.from(),
                    detail = event.message().unwrap_or_default(),
                    "Error event received"
                );
                Ok(())
            }),
        );
    }

    actor.register_behavior(
        kinds::BEGIN_TERMINATION,
        behavior(|event, handling| async move {
            info!(
                actor = handling.actor().name(),
                reason = event.message().unwrap_or_default(),
                "Termination begun"
            );
            Ok(())
        }),
    );

    actor.register_behavior(
        kinds::VICINITY_CONNECTION_BROKEN,
        behavior(|event, handling| async move {
            let actor = handling.actor();
            let Some(channel) = event.payload_str(PAYLOAD_CHANNEL) else {
                return Ok(());
            };
            let target = target_of(channel);
            let mut delay = RECONNECT_FIRST_DELAY;
            for attempt in 1..=RECONNECT_ATTEMPTS {
                if actor.is_terminated() {
                    return Ok(());
                }
                match actor.listen(target).await {
                    Ok(()) => {
                        info!(actor = actor.name(), %channel, attempt, "Reconnected");
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(actor = actor.name(), %channel, attempt, error = %e, "Reconnect failed");
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
            Err(VicinityError::ConnectionBroken(channel.to_string()).into())
        }),
    );

    actor.register_behavior(
        kinds::SELF_VICINITY_CHECKUP,
        behavior(|_, handling| async move {
            let mut state = handling.actor().inner.state.lock();
            state.pending_checkup = None;
            state.last_checkup = Some(Instant::now());
            Ok(())
        }),
    );

    actor.register_behavior(
        kinds::ACTOR_ENTERED,
        behavior(|event, handling| async move {
            let actor = handling.actor();
            if actor.carries_override(&event) {
                warn!(actor = actor.name(), from = event.from(), "Override requested");
                actor.stand_down().await?;
            }
            Ok(())
        }),
    );

    actor.register_behavior(
        kinds::ACTOR_RESUME,
        behavior(|event, handling| async move {
            let actor = handling.actor();
            if actor.carries_override(&event) && actor.status() == PresenceStatus::Away {
                actor.resume().await?;
            }
            Ok(())
        }),
    );
}
