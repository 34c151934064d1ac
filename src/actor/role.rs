//! # ActorRole Trait
//!
//! The `ActorRole` trait is what a business actor implements: it names the group the
//! actor belongs to and supplies lifecycle hooks. The runtime ([`Actor`]) owns
//! identity, subscriptions, callbacks and the heartbeat; the role only reacts.
//!
//! # Architecture Note
//! Behaviors are registered in [`ActorRole::init`] rather than declared on the trait,
//! so a role can decide at start-up which event subjects it answers. Every other
//! hook is a **provided method** with a default that does nothing, so a minimal role
//! is just `group()` plus `init()`.
//!
//! # Hook schedule
//! With the default one-minute tick:
//! - [`ActorRole::on_think`] every tick,
//! - [`ActorRole::on_30min`] at minutes 30 and 60,
//! - [`ActorRole::on_60min`] at minute 60,
//! - [`ActorRole::on_12hours`] at hours 12 and 24,
//! - [`ActorRole::on_24hours`] at hour 24.

use async_trait::async_trait;

use crate::actor::Actor;
use crate::error::{BehaviorError, VicinityError};
use crate::event::Event;

#[async_trait]
pub trait ActorRole: Send + Sync + 'static {
    /// Group (role class) used for routing, e.g. `Merchant`.
    fn group(&self) -> &str;

    /// Called once before the actor subscribes. Register behaviors here.
    async fn init(&self, _actor: &Actor) -> Result<(), BehaviorError> {
        Ok(())
    }

    /// Called once when the actor begins termination.
    async fn on_terminate(&self, _actor: &Actor, _reason: &str) {}

    /// Called on the first heartbeat tick.
    async fn do_once(&self, _actor: &Actor) {}

    async fn on_think(&self, _actor: &Actor) {}

    async fn on_30min(&self, _actor: &Actor) {}

    async fn on_60min(&self, _actor: &Actor) {}

    async fn on_12hours(&self, _actor: &Actor) {}

    async fn on_24hours(&self, _actor: &Actor) {}

    /// Called on ticks where this instance was picked from its group's Active roster.
    async fn do_my_work(&self, _actor: &Actor) {}

    /// Environment check run on every tick. Returning `false` terminates the actor.
    async fn is_healthy(&self, _actor: &Actor) -> bool {
        true
    }

    /// An event this actor sent is still unacknowledged.
    ///
    /// Return `true` if the role resent or otherwise dealt with it. The default
    /// leaves it to the to-do ledger.
    async fn on_unacknowledged_event(&self, _actor: &Actor, _event: &Event) -> bool {
        false
    }

    /// A behavior failed. Called after the failure has been reported.
    async fn on_exception(&self, _actor: &Actor, _event: &Event, _error: &VicinityError) {}
}
