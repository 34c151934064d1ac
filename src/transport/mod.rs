//! # Messaging & Presence Transport
//!
//! The [`Vicinity`] is the process-wide view of the fabric. It owns the shared
//! subsystems (presence, board, lock, queue, ledgers, to-do list, tasklist, ticket
//! numbers, vault)
//! and moves events between actors: [`Vicinity::publish_event`] wraps an event for
//! one target channel, and [`Vicinity::subscribe`] opens a listener task that
//! decodes inbound messages and hands them to an [`EventSink`] through the
//! subscriber's own [`Dispatcher`].
//!
//! # Architecture Note
//! A listener holds only a weak reference to its sink. Dropping the last handle of
//! an actor therefore stops its listeners on their next message instead of keeping
//! the actor alive forever. When the subscription stream ends the listener calls
//! [`EventSink::disconnected`] once and exits; the sink decides whether to subscribe
//! again.

pub mod dispatch;
pub mod message;
pub mod presence;

use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::VicinityConfig;
use crate::coordination::board::BulletinBoard;
use crate::coordination::lock::Lock;
use crate::coordination::queue::Queue;
use crate::coordination::tasklist::Tasklist;
use crate::coordination::ticket::TicketNumber;
use crate::coordination::todo::ToDoList;
use crate::coordination::vault::Vault;
use crate::error::VicinityError;
use crate::event::Event;
use crate::fabric::{Fabric, Subscription};
use crate::identity::VICINITY_MONITOR;
use crate::protocol::acknowledgement::AcknowledgementLedger;
use crate::protocol::conversation::{Conversation, ConversationStatus};
use crate::security::SecurityContext;

pub use dispatch::{Dispatched, Dispatcher};
pub use message::{channel_for, VicinityMessage};
pub use presence::{roster_topic, Presence};

/// Receiver side of a subscription.
pub trait EventSink: Send + Sync + 'static {
    /// Handles one decoded inbound event.
    fn receive(self: Arc<Self>, event: Event) -> BoxFuture<'static, ()>;

    /// The subscription on `channel` ended.
    fn disconnected(self: Arc<Self>, channel: String) -> BoxFuture<'static, ()>;
}

/// A running channel listener.
#[derive(Debug)]
pub struct Listener {
    channel: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Listener {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_alive(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops the listener without reporting a broken connection.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Shared fabric services for every actor of a process.
#[derive(Clone)]
pub struct Vicinity {
    fabric: Arc<dyn Fabric>,
    config: Arc<VicinityConfig>,
    security: Arc<SecurityContext>,
    presence: Presence,
    lock: Lock,
    queue: Queue,
    conversation: Conversation,
    acknowledgements: AcknowledgementLedger,
    todo: ToDoList,
    tasklist: Tasklist,
    tickets: TicketNumber,
    vault: Vault,
}

impl Vicinity {
    pub fn new(fabric: Arc<dyn Fabric>, config: VicinityConfig, security: SecurityContext) -> Self {
        let config = config.normalized();
        let board = BulletinBoard::new(fabric.clone(), config.ledger_ttl(), config.freshness());
        let presence = Presence::new(fabric.clone(), board, config.freshness());
        let acknowledgements =
            AcknowledgementLedger::new(fabric.clone(), config.ledger_ttl(), config.acknowledgement_enabled);
        let todo = ToDoList::new(
            fabric.clone(),
            acknowledgements.clone(),
            presence.clone(),
            config.todo_enabled,
        );

        Self {
            lock: Lock::new(fabric.clone(), config.lock_ttl()),
            queue: Queue::new(fabric.clone()),
            tasklist: Tasklist::new(fabric.clone()),
            tickets: TicketNumber::new(fabric.clone()),
            vault: Vault::new(fabric.clone()),
            conversation: Conversation::new(fabric.clone(), config.ledger_ttl()),
            security: Arc::new(security),
            config: Arc::new(config),
            fabric,
            presence,
            acknowledgements,
            todo,
        }
    }

    pub fn fabric(&self) -> &Arc<dyn Fabric> {
        &self.fabric
    }

    pub fn config(&self) -> &VicinityConfig {
        &self.config
    }

    pub fn security(&self) -> &SecurityContext {
        &self.security
    }

    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    pub fn bulletin_board(&self) -> &BulletinBoard {
        self.presence.board()
    }

    pub fn lock(&self) -> &Lock {
        &self.lock
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn acknowledgements(&self) -> &AcknowledgementLedger {
        &self.acknowledgements
    }

    pub fn todo(&self) -> &ToDoList {
        &self.todo
    }

    pub fn tasklist(&self) -> &Tasklist {
        &self.tasklist
    }

    pub fn tickets(&self) -> &TicketNumber {
        &self.tickets
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    /// Publishes `event` on `target`'s channel.
    ///
    /// Error events are copied to the monitoring group. Returns how many listeners
    /// received the event on the target channel.
    pub async fn publish_event(&self, event: &Event, target: &str) -> Result<usize, VicinityError> {
        if let Err(e) = self
            .conversation
            .record(event, ConversationStatus::SendingViaFabric)
            .await
        {
            warn!(event_type = event.event_type(), error = %e, "Conversation not recorded");
        }

        let message = VicinityMessage::from_event(event, target)?;
        let receivers = self
            .fabric
            .publish(&channel_for(target), message.encode()?)
            .await?;
        debug!(event_type = event.event_type(), to = target, receivers, "Published");

        if event.is_error() && target != VICINITY_MONITOR {
            let copy = VicinityMessage::from_event(event, VICINITY_MONITOR)?;
            self.fabric
                .publish(&channel_for(VICINITY_MONITOR), copy.encode()?)
                .await?;
        }
        Ok(receivers)
    }

    /// Opens a listener on `target`'s channel delivering into `sink` through `dispatcher`.
    pub async fn subscribe(
        &self,
        sink: Weak<dyn EventSink>,
        target: &str,
        dispatcher: &Dispatcher,
    ) -> Result<Listener, VicinityError> {
        let channel = channel_for(target);
        let subscription = self.fabric.subscribe(&channel).await?;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(listen(
            self.clone(),
            subscription,
            sink,
            dispatcher.clone(),
            cancel.clone(),
        ));
        info!(%channel, "Subscribed");
        Ok(Listener { channel, cancel, task })
    }

    /// Whether the fabric answers.
    pub async fn connections_ok(&self) -> bool {
        self.fabric.ping().await.is_ok()
    }

    pub async fn find_actor(&self, group: &str, project: &str) -> Result<Option<String>, VicinityError> {
        Ok(self.presence.find_actor(group, project).await?)
    }

    pub async fn actor_is_available(&self, name: &str) -> Result<bool, VicinityError> {
        Ok(self.presence.actor_is_available(name).await?)
    }
}

async fn listen(
    vicinity: Vicinity,
    mut subscription: Subscription,
    sink: Weak<dyn EventSink>,
    dispatcher: Dispatcher,
    cancel: CancellationToken,
) {
    let channel = subscription.channel().to_string();
    loop {
        let raw = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(%channel, "Listener stopped");
                return;
            }
            raw = subscription.next_message() => raw,
        };

        let Some(raw) = raw else {
            warn!(%channel, "Subscription ended");
            if let Some(sink) = sink.upgrade() {
                sink.disconnected(channel).await;
            }
            return;
        };
        let Some(target) = sink.upgrade() else {
            debug!(%channel, "Owner dropped, listener exiting");
            return;
        };

        let mut event = match VicinityMessage::decode(&raw).and_then(|m| m.to_event()) {
            Ok(event) => event,
            Err(e) => {
                warn!(%channel, error = %e, "Dropping undecodable message");
                continue;
            }
        };
        event.flags_mut().propagated_from_vicinity = true;
        if let Err(e) = vicinity
            .conversation
            .record(&event, ConversationStatus::ReceivedInFabric)
            .await
        {
            warn!(event_type = event.event_type(), error = %e, "Conversation not recorded");
        }
        dispatcher.dispatch(target.receive(event)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::InMemoryFabric;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    struct Recorder {
        events: mpsc::UnboundedSender<Event>,
        broken: Mutex<Vec<String>>,
    }

    impl EventSink for Recorder {
        fn receive(self: Arc<Self>, event: Event) -> BoxFuture<'static, ()> {
            Box::pin(async move {
                let _ = self.events.send(event);
            })
        }

        fn disconnected(self: Arc<Self>, channel: String) -> BoxFuture<'static, ()> {
            Box::pin(async move {
                self.broken.lock().push(channel);
            })
        }
    }

    fn vicinity() -> (Arc<InMemoryFabric>, Vicinity) {
        let fabric = Arc::new(InMemoryFabric::new());
        let vicinity = Vicinity::new(fabric.clone(), VicinityConfig::default(), SecurityContext::default());
        (fabric, vicinity)
    }

    #[tokio::test]
    async fn test_published_events_reach_listener() {
        let (_, vicinity) = vicinity();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(Recorder {
            events: tx,
            broken: Mutex::new(Vec::new()),
        });
        let sink: Arc<dyn EventSink> = recorder.clone();
        let listener = vicinity
            .subscribe(Arc::downgrade(&sink), "Cashier.default.1.0.0.b", &Dispatcher::new(2, 2))
            .await
            .unwrap();
        assert!(listener.is_alive());

        let event = Event::new("RequestPayment", "Customer.default.1.0.0.a")
            .to("Cashier.default.1.0.0.b")
            .with_request_id("R1");
        let receivers = vicinity
            .publish_event(&event, "Cashier.default.1.0.0.b")
            .await
            .unwrap();
        assert_eq!(receivers, 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type(), "RequestPayment");
        assert!(received.is_propagated_from_vicinity());

        let legs = vicinity.conversation().entries("R1").await.unwrap();
        assert_eq!(legs.len(), 1);
        assert_eq!(legs[0].1, ConversationStatus::ReceivedInFabric);
    }

    #[tokio::test]
    async fn test_severed_subscription_reports_once() {
        let (fabric, vicinity) = vicinity();
        let (tx, _rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(Recorder {
            events: tx,
            broken: Mutex::new(Vec::new()),
        });
        let sink: Arc<dyn EventSink> = recorder.clone();
        let listener = vicinity
            .subscribe(Arc::downgrade(&sink), "Merchant", &Dispatcher::new(2, 2))
            .await
            .unwrap();

        fabric.sever_subscriptions();
        for _ in 0..50 {
            if !listener.is_alive() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(!listener.is_alive());
        assert_eq!(*recorder.broken.lock(), vec!["channel: Merchant".to_string()]);
    }

    #[tokio::test]
    async fn test_error_events_are_copied_to_monitor() {
        let (fabric, vicinity) = vicinity();
        let mut monitor = fabric.subscribe(&channel_for(VICINITY_MONITOR)).await.unwrap();
        let error = Event::new("ActorProcessingError", "Cashier.default.1.0.0.b").to("Customer.default.1.0.0.a");
        vicinity
            .publish_event(&error, "Customer.default.1.0.0.a")
            .await
            .unwrap();
        let copy = VicinityMessage::decode(&monitor.next_message().await.unwrap()).unwrap();
        assert_eq!(copy.header.to, VICINITY_MONITOR);
    }
}
