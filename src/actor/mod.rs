//! # Actor Runtime
//!
//! An [`Actor`] is a running instance of an [`ActorRole`]. The runtime owns the
//! instance's identity, its behavior registry, pending reply callbacks, local memory
//! and its listeners, and drives the role through a heartbeat.
//!
//! ## Outbound
//! - [`Actor::say`]: targeted delivery, optionally blocking until a correlated reply
//!   completes or the await deadline passes.
//! - [`Actor::whisper`]: like `say`, but the event never leaves the process.
//! - [`Actor::announce`]: fire-and-forget broadcast to a group or `all`.
//! - [`Actor::reply`]: a correlated reply to a received event, sent with `say`.
//!
//! ## Inbound
//! Listeners decode fabric messages and call `receive`, which filters by target and
//! token before [`Actor::hear`]. `hear` acknowledges the event, runs the registered
//! behavior, and then runs any callback waiting on the event's correlation key.
//!
//! # Architecture Note
//! Behaviors never receive the actor through the event. They get a [`Handling`]
//! context next to it, so the event stays plain data. A behavior that fails (or
//! panics) is reported as an `ActorProcessingError` to its sender or to the
//! `VicinityMonitor` group; `hear` itself never fails.

pub mod behavior;
mod builtin;
pub mod callbacks;
mod heartbeat;
pub mod role;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordination::board::{BoardStatus, BulletinBoard, PresenceStatus, RUNNING};
use crate::coordination::lock::Lock;
use crate::coordination::queue::Queue;
use crate::coordination::tasklist::Tasklist;
use crate::coordination::ticket::TicketNumber;
use crate::coordination::todo::ToDoList;
use crate::coordination::vault::Vault;
use crate::error::{BehaviorError, MemoryError, VicinityError};
use crate::event::{kinds, Event, HEADER_PROJECT};
use crate::identity::{self, ActorIdentity, ALL_PARTICIPANTS, VICINITY_MONITOR};
use crate::memory::{LocalMemory, Notes};
use crate::protocol::acknowledgement::AckOutcome;
use crate::protocol::conversation::ConversationStatus;
use crate::security::generate_request_id;
use crate::transport::{Dispatcher, EventSink, Listener, Vicinity};

pub use behavior::{behavior, ExternalBehavior, Handler};
pub use callbacks::{ErrorHandler, ReplyHandler};
pub use role::ActorRole;

use behavior::BehaviorRegistry;
use callbacks::{Callbacks, Release};

/// Local memory kind holding "still waiting on acknowledgement" markers.
pub const ACK_MARKER_KIND: &str = "AcknowledgementMarker";
const ACK_MARKER_PREFIX: &str = "requiresAck:";
const WAITING_PREFIX: &str = "Waiting:";

/// Reply payload key carrying the value returned by an external behavior.
pub const PAYLOAD_RESULTS: &str = "results";
/// Payload key naming the target that could not be found.
pub const PAYLOAD_PARTICIPANT: &str = "participant";
/// Payload keys of the tokens carried by `ActorEntered` / `ActorResume`.
pub const PAYLOAD_JOIN_TOKEN: &str = "joinToken";
pub const PAYLOAD_OVERRIDE_TOKEN: &str = "overrideToken";
const PAYLOAD_CHANNEL: &str = "channel";
const PAYLOAD_UNANSWERED_EVENT: &str = "unansweredEvent";

const STANDING_DOWN: &str = "standing down";

/// What happened to a `say`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Published without waiting for a reply.
    Sent,
    /// A correlated reply completed the exchange.
    Completed,
    /// An error event ended the exchange.
    Failed,
    /// No reply before the await deadline.
    TimedOut,
    /// No target could be reached.
    NotDelivered,
}

/// Result of an outbound call.
#[derive(Debug, Clone)]
pub struct Said {
    /// The event as last sent, with request id, index and resolved target.
    pub event: Event,
    pub delivery: Delivery,
    /// Number of targets the event was sent to.
    pub reached: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Say,
    Whisper,
    Announce,
}

/// Context handed to a behavior next to the event it handles.
#[derive(Clone)]
pub struct Handling {
    actor: Actor,
}

impl Handling {
    pub fn actor(&self) -> &Actor {
        &self.actor
    }
}

struct RuntimeState {
    listeners: Vec<Listener>,
    status: PresenceStatus,
    terminating: bool,
    terminated: bool,
    pending_checkup: Option<Instant>,
    last_checkup: Option<Instant>,
}

pub(crate) struct ActorInner {
    identity: ActorIdentity,
    name: String,
    role: Arc<dyn ActorRole>,
    vicinity: Vicinity,
    behaviors: BehaviorRegistry,
    callbacks: Callbacks,
    memory: LocalMemory,
    external: Option<Arc<dyn ExternalBehavior>>,
    dispatcher: Dispatcher,
    state: Mutex<RuntimeState>,
    stopping: CancellationToken,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a running actor. Cheap to clone.
#[derive(Clone)]
pub struct Actor {
    inner: Arc<ActorInner>,
}

impl fmt::Debug for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor").field("name", &self.inner.name).finish()
    }
}

/// Configures and starts an [`Actor`].
pub struct ActorBuilder {
    role: Arc<dyn ActorRole>,
    vicinity: Vicinity,
    instance_id: Option<String>,
    external: Option<Arc<dyn ExternalBehavior>>,
    heartbeat: bool,
}

impl ActorBuilder {
    /// Uses a fixed instance id instead of a random one.
    pub fn instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn external_behavior(mut self, external: Arc<dyn ExternalBehavior>) -> Self {
        self.external = Some(external);
        self
    }

    /// Starts without the periodic heartbeat. Hooks then only run when called.
    pub fn without_heartbeat(mut self) -> Self {
        self.heartbeat = false;
        self
    }

    /// Registers behaviors, subscribes, posts Active presence, loads notes and
    /// starts the heartbeat.
    pub async fn start(self) -> Result<Actor, VicinityError> {
        let config = self.vicinity.config();
        let group = self.role.group().to_string();
        let identity = match self.instance_id {
            Some(id) => ActorIdentity::with_instance(&group, &config.project, &config.generation, id),
            None => ActorIdentity::generate(&group, &config.project, &config.generation),
        };
        let name = identity.name();
        let memory = LocalMemory::new(config.memory_capacity, config.memory_ttl());
        let dispatcher = Dispatcher::new(config.dispatch_workers, config.dispatch_queue);

        let actor = Actor {
            inner: Arc::new(ActorInner {
                identity,
                name: name.clone(),
                role: self.role,
                vicinity: self.vicinity,
                behaviors: BehaviorRegistry::default(),
                callbacks: Callbacks::default(),
                memory,
                external: self.external,
                dispatcher,
                state: Mutex::new(RuntimeState {
                    listeners: Vec::new(),
                    status: PresenceStatus::Active,
                    terminating: false,
                    terminated: false,
                    pending_checkup: None,
                    last_checkup: None,
                }),
                stopping: CancellationToken::new(),
                heartbeat: Mutex::new(None),
            }),
        };

        builtin::register(&actor);
        let role = actor.inner.role.clone();
        role.init(&actor)
            .await
            .map_err(|e| VicinityError::ActorProcessing {
                actor: name.clone(),
                event_type: "init".to_string(),
                message: e.to_string(),
            })?;
        actor.register_external_behaviors();

        for target in [name.as_str(), group.as_str(), ALL_PARTICIPANTS] {
            actor.listen(target).await?;
        }
        actor.give_status(PresenceStatus::Active, RUNNING).await?;
        actor.load_notes().await;
        actor.announce_override(kinds::ACTOR_ENTERED).await;

        if self.heartbeat {
            let handle = heartbeat::start(&actor);
            *actor.inner.heartbeat.lock() = Some(handle);
        }
        info!(actor = %name, "Actor started");
        Ok(actor)
    }
}

impl Actor {
    pub fn builder(role: Arc<dyn ActorRole>, vicinity: Vicinity) -> ActorBuilder {
        ActorBuilder {
            role,
            vicinity,
            instance_id: None,
            external: None,
            heartbeat: true,
        }
    }

    /// Starts `role` with a random instance id and the heartbeat running.
    pub async fn start(role: Arc<dyn ActorRole>, vicinity: Vicinity) -> Result<Actor, VicinityError> {
        Self::builder(role, vicinity).start().await
    }

    // --- Identity & collaborators ---

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn group(&self) -> &str {
        self.inner.identity.group()
    }

    pub fn identity(&self) -> &ActorIdentity {
        &self.inner.identity
    }

    pub fn vicinity(&self) -> &Vicinity {
        &self.inner.vicinity
    }

    pub fn lock(&self) -> &Lock {
        self.inner.vicinity.lock()
    }

    pub fn queue(&self) -> &Queue {
        self.inner.vicinity.queue()
    }

    pub fn bulletin_board(&self) -> &BulletinBoard {
        self.inner.vicinity.bulletin_board()
    }

    pub fn todo(&self) -> &ToDoList {
        self.inner.vicinity.todo()
    }

    pub fn tasklist(&self) -> &Tasklist {
        self.inner.vicinity.tasklist()
    }

    pub fn tickets(&self) -> &TicketNumber {
        self.inner.vicinity.tickets()
    }

    pub fn vault(&self) -> &Vault {
        self.inner.vicinity.vault()
    }

    pub fn memory(&self) -> &LocalMemory {
        &self.inner.memory
    }

    pub fn remember<T: Serialize>(&self, name: &str, value: &T) -> Result<(), MemoryError> {
        self.inner.memory.remember(name, value)
    }

    pub fn recall<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, MemoryError> {
        self.inner.memory.recall(name)
    }

    pub fn status(&self) -> PresenceStatus {
        self.inner.state.lock().status
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.state.lock().terminated
    }

    /// Number of exchanges still waiting for a reply.
    pub fn pending_callbacks(&self) -> usize {
        self.inner.callbacks.len()
    }

    // --- Behaviors ---

    /// Maps an event subject to `handler`. The last registration for a subject wins.
    pub fn register_behavior(&self, name: &str, handler: Handler) -> &Self {
        if self.inner.behaviors.register(name, handler) {
            debug!(actor = %self.inner.name, behavior = name, "Behavior replaced");
        }
        self
    }

    pub fn handles(&self, event_type: &str) -> bool {
        self.inner.behaviors.contains(crate::event::subject_of(event_type))
    }

    fn register_external_behaviors(&self) {
        let Some(external) = self.inner.external.clone() else {
            return;
        };
        for name in external.names(self.group()) {
            let executor = external.clone();
            self.register_behavior(
                &name,
                behavior(move |event, handling| {
                    let executor = executor.clone();
                    async move { handling.actor().run_external(executor.as_ref(), &event).await }
                }),
            );
        }
    }

    async fn run_external(&self, external: &dyn ExternalBehavior, event: &Event) -> Result<(), BehaviorError> {
        if let Some(results) = external.perform(event).await? {
            self.reply_with(event, |reply| reply.with_payload(PAYLOAD_RESULTS, results))
                .await?;
        }
        Ok(())
    }

    // --- Outbound ---

    pub async fn say(&self, event: Event) -> Result<Said, VicinityError> {
        self.send(event, None, None, Mode::Say).await
    }

    /// `say` with callbacks for correlated replies and failures.
    pub async fn say_with(
        &self,
        event: Event,
        on_reply: Option<ReplyHandler>,
        on_error: Option<ErrorHandler>,
    ) -> Result<Said, VicinityError> {
        self.send(event, on_reply, on_error, Mode::Say).await
    }

    pub async fn whisper(&self, event: Event) -> Result<Said, VicinityError> {
        self.send(event, None, None, Mode::Whisper).await
    }

    pub async fn whisper_with(
        &self,
        event: Event,
        on_reply: Option<ReplyHandler>,
        on_error: Option<ErrorHandler>,
    ) -> Result<Said, VicinityError> {
        self.send(event, on_reply, on_error, Mode::Whisper).await
    }

    pub async fn announce(&self, event: Event) -> Result<Said, VicinityError> {
        self.send(event, None, None, Mode::Announce).await
    }

    /// Replies to `original` with its payload copied.
    pub async fn reply(&self, original: &Event) -> Result<Said, VicinityError> {
        self.reply_with(original, |reply| reply).await
    }

    /// Replies to `original`, letting `customize` adjust the reply first.
    pub async fn reply_with<F>(&self, original: &Event, customize: F) -> Result<Said, VicinityError>
    where
        F: FnOnce(Event) -> Event + Send,
    {
        let reply = customize(Event::reply_to(original, self.name()));
        self.say(reply).await
    }

    async fn send(
        &self,
        mut event: Event,
        on_reply: Option<ReplyHandler>,
        on_error: Option<ErrorHandler>,
        mode: Mode,
    ) -> Result<Said, VicinityError> {
        if self.is_terminated() {
            return Err(VicinityError::Terminated(self.inner.name.clone()));
        }
        if event.from().is_empty() {
            event.set_from(self.name());
        }
        self.set_request_info(&mut event)?;
        match mode {
            Mode::Whisper => {
                event.set_targets(vec![self.inner.name.clone()]);
                let flags = event.flags_mut();
                flags.local = true;
                flags.process_later_if_no_actor_found = false;
            }
            Mode::Announce => {
                let flags = event.flags_mut();
                flags.announcement = true;
                flags.await_response = false;
            }
            Mode::Say => {}
        }

        let key = event.callback_key();
        self.inner.callbacks.register(&key, on_reply, on_error);
        let awaiting = event.awaits_response() && !event.is_reply() && !event.is_propagated_from_vicinity();
        let waiter = awaiting.then(|| self.inner.callbacks.arm(&key));

        let (reached, sent) = match self.deliver(&event, mode).await {
            Ok(delivered) => delivered,
            Err(e) => {
                self.inner.callbacks.remove(&key);
                return Err(e);
            }
        };

        let delivery = match waiter {
            Some(waiter) if reached > 0 => self.await_reply(&key, waiter, &event, sent.as_ref()).await,
            _ if reached == 0 => {
                self.inner.callbacks.remove(&key);
                Delivery::NotDelivered
            }
            _ => Delivery::Sent,
        };
        Ok(Said {
            event: sent.unwrap_or(event),
            delivery,
            reached,
        })
    }

    /// Assigns a request id and the internal token where missing.
    fn set_request_info(&self, event: &mut Event) -> Result<(), VicinityError> {
        if event.request_id().is_none() {
            let event_type = event.event_type().to_string();
            event.set_request_id(generate_request_id());
            event.set_original_event_type(event_type);
        }
        if !event.header().contains_key(HEADER_PROJECT) {
            event.header_mut().insert(
                HEADER_PROJECT.to_string(),
                serde_json::Value::String(self.inner.identity.project().to_string()),
            );
        }
        if !event.is_anonymous_ok() && event.access_token().is_none() {
            match self.inner.vicinity.security().internal_token() {
                Some(token) => event.set_access_token(token),
                None => return Err(VicinityError::AccessDenied(event.event_type().to_string())),
            }
        }
        Ok(())
    }

    async fn deliver(&self, event: &Event, mode: Mode) -> Result<(usize, Option<Event>), VicinityError> {
        let mut reached = 0;
        let mut sent = None;

        for target in event.targets().to_vec() {
            let resolved = if event.is_local() {
                self.inner.name.clone()
            } else {
                match self.resolve(event, &target, mode).await? {
                    Some(resolved) => resolved,
                    None => continue,
                }
            };

            let mut outbound = event.clone();
            outbound.set_targets(vec![resolved.clone()]);
            let status = if outbound.is_reply() {
                ConversationStatus::Replying
            } else {
                ConversationStatus::Starting
            };
            self.record(&outbound, status).await;

            if outbound.requires_acknowledgement() && !outbound.is_to_do_task() && mode != Mode::Announce {
                let ledger = self.inner.vicinity.acknowledgements();
                if let Some(index) = ledger.record_unacknowledged(&mut outbound).await? {
                    self.remember_ack_marker(&outbound, index);
                }
            }

            if outbound.is_local() {
                self.hear(outbound.clone()).await;
            } else {
                self.inner.vicinity.publish_event(&outbound, &resolved).await?;
            }
            reached += 1;
            sent = Some(outbound);
        }
        Ok((reached, sent))
    }

    /// Picks the concrete channel for one target, or reports it missing.
    async fn resolve(&self, event: &Event, target: &str, mode: Mode) -> Result<Option<String>, VicinityError> {
        if target.eq_ignore_ascii_case(ALL_PARTICIPANTS) {
            return Ok(Some(ALL_PARTICIPANTS.to_string()));
        }
        if mode == Mode::Announce {
            return Ok(Some(target.to_string()));
        }

        let vicinity = &self.inner.vicinity;
        let project = event
            .header_str(HEADER_PROJECT)
            .unwrap_or(self.inner.identity.project())
            .to_string();

        let group = if identity::is_bare_group(target) {
            target
        } else {
            if vicinity.actor_is_available(target).await? {
                return Ok(Some(target.to_string()));
            }
            identity::group_of(target)
        };

        match vicinity.find_actor(group, &project).await? {
            Some(found) => {
                if found != target {
                    debug!(actor = %self.inner.name, target, found = %found, "Target resolved");
                }
                Ok(Some(found))
            }
            None => {
                self.actor_not_found(event, group, mode).await;
                Ok(None)
            }
        }
    }

    async fn actor_not_found(&self, event: &Event, group: &str, mode: Mode) {
        warn!(actor = %self.inner.name, group, event_type = event.event_type(), "Actor not found");

        let mut notice = Event::new(kinds::ACTOR_NOT_FOUND, self.name())
            .with_payload(PAYLOAD_PARTICIPANT, group)
            .with_payload(PAYLOAD_UNANSWERED_EVENT, event.event_type())
            .with_message(format!("ACTOR_NOT_FOUND: {group}"));
        if let Some(request_id) = event.request_id() {
            notice.set_request_id(request_id);
            notice.set_original_event_type(event.original_type());
        }
        self.report_to_monitor(notice).await;

        if mode == Mode::Say
            && event.flags().process_later_if_no_actor_found
            && !event.is_to_do_task()
            && !event.is_reply()
        {
            let mut parked = event.clone();
            parked.set_targets(vec![group.to_string()]);
            self.park(parked).await;
        }

        self.inner
            .callbacks
            .fail(&event.callback_key(), &VicinityError::ActorNotFound(group.to_string()));
    }

    async fn await_reply(
        &self,
        key: &str,
        mut waiter: oneshot::Receiver<Release>,
        event: &Event,
        sent: Option<&Event>,
    ) -> Delivery {
        let seconds = match event.flags().await_timeout_seconds {
            0 => self.inner.vicinity.config().await_timeout_seconds,
            seconds => seconds,
        };
        debug!(actor = %self.inner.name, key, seconds, "Awaiting reply");

        match tokio::time::timeout(Duration::from_secs(seconds), &mut waiter).await {
            Ok(Ok(Release::Completed)) | Ok(Err(_)) => Delivery::Completed,
            Ok(Ok(Release::Failed(_))) => Delivery::Failed,
            Err(_) => {
                let error = VicinityError::AwaitTimedOut {
                    request_id: event.request_id().unwrap_or_default().to_string(),
                    seconds,
                };
                if !self.inner.callbacks.time_out(key, &error) {
                    // A reply took the entry between the deadline and here and has
                    // already released the waiter.
                    return match tokio::time::timeout(Duration::from_secs(1), waiter).await {
                        Ok(Ok(Release::Failed(_))) => Delivery::Failed,
                        Ok(_) => Delivery::Completed,
                        Err(_) => Delivery::TimedOut,
                    };
                }
                warn!(actor = %self.inner.name, key, seconds, "Await timed out");
                if let Some(sent) = sent {
                    self.record(sent, ConversationStatus::ErrorAfterReceivedByActor).await;
                    if sent.flags().process_later_if_no_actor_found && !sent.is_to_do_task() && !sent.is_local() {
                        self.park(sent.clone()).await;
                    }
                }
                Delivery::TimedOut
            }
        }
    }

    /// Hands `event` to the to-do ledger of its target's group.
    async fn park(&self, mut event: Event) {
        let vicinity = &self.inner.vicinity;
        if !vicinity.todo().is_enabled() {
            return;
        }
        let result: Result<(), VicinityError> = async {
            let tracked = event.requires_acknowledgement() && event.index() > 0;
            if !tracked
                && vicinity
                    .acknowledgements()
                    .record_unacknowledged(&mut event)
                    .await?
                    .is_none()
            {
                return Ok(());
            }
            if vicinity.todo().add_task(&mut event).await?.is_some() {
                self.forget_ack_marker(&event);
            }
            Ok(())
        }
        .await;
        if let Err(e) = result {
            warn!(actor = %self.inner.name, event_type = event.event_type(), error = %e, "Could not park event");
        }
    }

    /// Publishes a notice straight to the monitoring group.
    async fn report_to_monitor(&self, mut notice: Event) {
        notice.set_targets(vec![VICINITY_MONITOR.to_string()]);
        notice.flags_mut().announcement = true;
        if let Err(e) = self.inner.vicinity.publish_event(&notice, VICINITY_MONITOR).await {
            warn!(actor = %self.inner.name, error = %e, "Monitor report failed");
        }
    }

    // --- Inbound ---

    /// Entry point for an inbound event. Never fails; problems are reported.
    pub fn hear(&self, mut event: Event) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.record(&event, ConversationStatus::ReceivedByActor).await;
            let key = event.callback_key();
            // An answer to our own request goes to the callbacks only; the request's
            // behavior would otherwise answer it again.
            let own_answer = event.is_reply()
                && event.from() == self.name()
                && event.original_type() == event.event_type();
            let handler = if own_answer {
                None
            } else {
                self.inner.behaviors.get(event.subject())
            };

            if handler.is_some() || (event.is_pipeline() && !own_answer) {
                event.flags_mut().handled = true;
                self.acknowledge(&event).await;
                self.record(&event, ConversationStatus::AcknowledgedByActor).await;
                self.perform(handler, &event).await;
            } else if event.is_reply() {
                debug!(actor = %self.inner.name, event_type = event.event_type(), "Reply without behavior");
            } else {
                self.did_not_understand(&event).await;
            }

            if !event.is_acknowledgement() && (event.is_reply() || event.is_error()) {
                let failure = failure_of(&event);
                self.inner.callbacks.on_event(&key, &event, failure);
                if event.is_error() && event.is_to_do_task() {
                    if let Err(e) = self.inner.vicinity.todo().fail_task(&event).await {
                        warn!(actor = %self.inner.name, error = %e, "Could not fail task");
                    }
                }
            }
        })
    }

    async fn receive(&self, event: Event) {
        if event.is_announcement() && event.from() == self.name() {
            return;
        }
        if !self.is_addressed_to_me(&event) {
            return;
        }
        if !self.inner.vicinity.security().is_ok_to_proceed(&event) {
            self.security_incident(&event).await;
            return;
        }
        self.hear(event).await;
    }

    fn is_addressed_to_me(&self, event: &Event) -> bool {
        event.targets().iter().any(|target| {
            target.eq_ignore_ascii_case(self.name())
                || target.eq_ignore_ascii_case(self.group())
                || target.eq_ignore_ascii_case(ALL_PARTICIPANTS)
        })
    }

    async fn acknowledge(&self, event: &Event) {
        let vicinity = &self.inner.vicinity;
        let outcome = if event.is_to_do_task() {
            vicinity.todo().complete_task(event).await
        } else {
            vicinity.acknowledgements().record_acknowledgement(event).await
        };
        match outcome {
            Ok(AckOutcome::Recorded(index)) => {
                debug!(actor = %self.inner.name, event_type = event.event_type(), index, "Acknowledged");
            }
            Ok(_) => {}
            Err(e) => warn!(actor = %self.inner.name, error = %e, "Acknowledgement failed"),
        }
    }

    async fn perform(&self, handler: Option<Handler>, event: &Event) {
        let outcome = match handler {
            Some(handler) => {
                let handling = Handling { actor: self.clone() };
                let task = tokio::spawn(handler.as_ref()(event.clone(), handling));
                match task.await {
                    Ok(outcome) => outcome,
                    Err(e) => Err(format!("behavior panicked: {e}").into()),
                }
            }
            None => match self.inner.external.clone() {
                Some(external) => self.run_external(external.as_ref(), event).await,
                None => Ok(()),
            },
        };
        if let Err(e) = outcome {
            self.on_exception(event, e.to_string()).await;
        }
    }

    async fn did_not_understand(&self, event: &Event) {
        warn!(actor = %self.inner.name, event_type = event.event_type(), from = event.from(), "Did not understand");
        let notice = Event::correlated(kinds::ACTOR_DID_NOT_UNDERSTAND, event, self.name())
            .with_payload(PAYLOAD_UNANSWERED_EVENT, event.event_type())
            .with_message(format!(
                "Actor {} did not respond to event {}",
                event.to_first(),
                event.event_type()
            ));
        if event.is_to_do_task() {
            if let Err(e) = self.inner.vicinity.todo().fail_task(event).await {
                warn!(actor = %self.inner.name, error = %e, "Could not fail task");
            }
        }
        if !event.from().is_empty() {
            if let Err(e) = self.say(notice.clone()).await {
                warn!(actor = %self.inner.name, error = %e, "Could not notify sender");
            }
        }
        self.report_to_monitor(notice).await;
    }

    async fn on_exception(&self, event: &Event, message: String) {
        let error = VicinityError::ActorProcessing {
            actor: self.inner.name.clone(),
            event_type: event.event_type().to_string(),
            message,
        };
        warn!(actor = %self.inner.name, event_type = event.event_type(), error = %error, "Behavior failed");
        if let Err(e) = self
            .inner
            .memory
            .remember_as("Exception", "exception occurred", &error.to_string())
        {
            debug!(error = %e, "Exception not remembered");
        }

        let report = Event::correlated(kinds::ACTOR_PROCESSING_ERROR, event, self.name())
            .with_message(error.to_string());
        if event.to_first() == self.name() && !event.from().is_empty() {
            self.record(event, ConversationStatus::ErrorAfterReceivedByActor).await;
            if let Err(e) = self.say(report).await {
                warn!(actor = %self.inner.name, error = %e, "Could not report failure to sender");
            }
        } else {
            self.report_to_monitor(report).await;
        }

        let role = self.inner.role.clone();
        role.on_exception(self, event, &error).await;
    }

    async fn security_incident(&self, event: &Event) {
        warn!(actor = %self.inner.name, event_type = event.event_type(), from = event.from(), "Invalid token");
        let incident = Event::correlated(kinds::SECURITY_INCIDENT, event, self.name())
            .with_message(format!("Invalid token on {} from {}", event.event_type(), event.from()));
        if let Err(e) = self.inner.vicinity.publish_event(&incident, event.from()).await {
            warn!(actor = %self.inner.name, error = %e, "Could not report security incident");
        }
    }

    async fn connection_broken(&self, channel: String) {
        if self.inner.state.lock().terminating {
            return;
        }
        let mut notice = Event::new(kinds::VICINITY_CONNECTION_BROKEN, self.name())
            .to(self.name())
            .with_payload(PAYLOAD_CHANNEL, channel)
            .anonymous();
        notice.flags_mut().local = true;
        self.hear(notice).await;
    }

    // --- Presence & lifecycle ---

    /// Opens (or reopens) the listener for `target`.
    pub(crate) async fn listen(&self, target: &str) -> Result<(), VicinityError> {
        let sink: Arc<dyn EventSink> = self.inner.clone();
        let listener = self
            .inner
            .vicinity
            .subscribe(Arc::downgrade(&sink), target, &self.inner.dispatcher)
            .await?;
        let mut state = self.inner.state.lock();
        state.listeners.retain(|existing| existing.channel() != listener.channel());
        state.listeners.push(listener);
        Ok(())
    }

    /// Posts this actor's presence status to its group roster.
    pub async fn give_status(&self, status: PresenceStatus, message: &str) -> Result<(), VicinityError> {
        self.inner.state.lock().status = status;
        let entry = BoardStatus::new(status, "status", message);
        self.inner
            .vicinity
            .presence()
            .post(self.group(), self.name(), &entry)
            .await?;
        Ok(())
    }

    async fn stand_down(&self) -> Result<(), VicinityError> {
        info!(actor = %self.inner.name, "Standing down");
        self.give_status(PresenceStatus::Away, STANDING_DOWN).await
    }

    async fn resume(&self) -> Result<(), VicinityError> {
        info!(actor = %self.inner.name, "Resuming");
        self.give_status(PresenceStatus::Active, RUNNING).await
    }

    /// With an override token configured, tells the rest of the group to stand
    /// down on entry and to resume on exit.
    async fn announce_override(&self, kind: &str) {
        let config = self.inner.vicinity.config();
        let (Some(join), Some(over)) = (config.join_token.clone(), config.override_token.clone()) else {
            return;
        };
        if kind == kinds::ACTOR_ENTERED {
            warn!(actor = %self.inner.name, group = self.group(), "Overriding group members");
        }
        let notice = Event::new(kind, self.name())
            .to(self.group())
            .with_payload(PAYLOAD_JOIN_TOKEN, join)
            .with_payload(PAYLOAD_OVERRIDE_TOKEN, over)
            .anonymous();
        if let Err(e) = self.announce(notice).await {
            warn!(actor = %self.inner.name, error = %e, "Override notice not sent");
        }
    }

    /// Whether `event` carries this vicinity's join and override tokens.
    fn carries_override(&self, event: &Event) -> bool {
        let config = self.inner.vicinity.config();
        matches!(
            (&config.join_token, &config.override_token),
            (Some(join), Some(over))
                if event.payload_str(PAYLOAD_JOIN_TOKEN) == Some(join.as_str())
                    && event.payload_str(PAYLOAD_OVERRIDE_TOKEN) == Some(over.as_str())
        )
    }

    async fn load_notes(&self) {
        let topic = Notes::topic(self.group());
        match self.bulletin_board().read_random_topic_entry(&topic).await {
            Ok(Some((author, raw))) => match serde_json::from_str::<Notes>(&raw) {
                Ok(notes) => {
                    let loaded = self.inner.memory.load(&notes);
                    debug!(actor = %self.inner.name, %author, loaded, "Notes loaded");
                }
                Err(e) => warn!(actor = %self.inner.name, %author, error = %e, "Unreadable notes"),
            },
            Ok(None) => {}
            Err(e) => warn!(actor = %self.inner.name, error = %e, "Could not read notes"),
        }
    }

    /// Writes local memory to the group's notes topic.
    pub async fn write_notes(&self) -> Result<(), VicinityError> {
        let mut entries = self.inner.memory.dump();
        entries.remove(ACK_MARKER_KIND);
        let notes = Notes::new(self.name(), entries);
        if notes.is_empty() {
            return Ok(());
        }
        self.bulletin_board()
            .post_topic(&Notes::topic(self.group()), self.name(), serde_json::to_string(&notes)?)
            .await?;
        debug!(actor = %self.inner.name, "Notes written");
        Ok(())
    }

    /// Begins graceful termination: runs `on_terminate`, announces it locally,
    /// posts Gone, closes listeners and stops the heartbeat. Idempotent.
    pub async fn terminate(&self, reason: &str) {
        {
            let mut state = self.inner.state.lock();
            if state.terminating {
                return;
            }
            state.terminating = true;
        }
        info!(actor = %self.inner.name, reason, "Beginning termination");

        let role = self.inner.role.clone();
        role.on_terminate(self, reason).await;

        let mut notice = Event::new(kinds::BEGIN_TERMINATION, self.name())
            .to(self.name())
            .with_message(reason)
            .anonymous();
        notice.flags_mut().local = true;
        self.hear(notice).await;

        self.announce_override(kinds::ACTOR_RESUME).await;
        if let Err(e) = self.give_status(PresenceStatus::Gone, reason).await {
            warn!(actor = %self.inner.name, error = %e, "Could not post Gone");
        }
        {
            let mut state = self.inner.state.lock();
            state.terminated = true;
            state.listeners.clear();
        }
        self.inner.stopping.cancel();
        info!(actor = %self.inner.name, "Actor terminated");
    }

    /// Terminates and waits for the heartbeat task to finish.
    pub async fn shutdown(&self, reason: &str) -> Result<(), VicinityError> {
        self.terminate(reason).await;
        let handle = self.inner.heartbeat.lock().take();
        if let Some(handle) = handle {
            handle.await.map_err(|e| VicinityError::ActorProcessing {
                actor: self.inner.name.clone(),
                event_type: "Heartbeat".to_string(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    // --- Acknowledgement markers ---

    fn ack_marker_key(request_id: &str, event_type: &str, from: &str, to: &str) -> String {
        format!("{ACK_MARKER_PREFIX}{request_id}/{event_type}/{from}/{to}")
    }

    fn remember_ack_marker(&self, event: &Event, index: u64) {
        let key = Self::ack_marker_key(
            event.request_id().unwrap_or_default(),
            event.event_type(),
            event.from(),
            event.to_first(),
        );
        if let Err(e) = self
            .inner
            .memory
            .remember_as(ACK_MARKER_KIND, &key, &format!("{WAITING_PREFIX}{index}"))
        {
            warn!(actor = %self.inner.name, error = %e, "Could not remember acknowledgement marker");
        }
    }

    fn forget_ack_marker(&self, event: &Event) {
        let key = Self::ack_marker_key(
            event.request_id().unwrap_or_default(),
            event.event_type(),
            event.from(),
            event.to_first(),
        );
        self.inner.memory.forget(ACK_MARKER_KIND, &key);
    }

    async fn record(&self, event: &Event, status: ConversationStatus) {
        if let Err(e) = self.inner.vicinity.conversation().record(event, status).await {
            warn!(actor = %self.inner.name, event_type = event.event_type(), error = %e, "Conversation not recorded");
        }
    }
}

/// The error an inbound event reports to the sender's callbacks, if any.
fn failure_of(event: &Event) -> Option<VicinityError> {
    if event.is_error() || event.subject() == kinds::ACTOR_DID_NOT_UNDERSTAND {
        Some(VicinityError::Reported {
            event_type: event.event_type().to_string(),
            from: event.from().to_string(),
            message: event.message().unwrap_or_default().to_string(),
        })
    } else {
        None
    }
}

impl EventSink for ActorInner {
    fn receive(self: Arc<Self>, event: Event) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let actor = Actor { inner: self };
            actor.receive(event).await;
        })
    }

    fn disconnected(self: Arc<Self>, channel: String) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let actor = Actor { inner: self };
            actor.connection_broken(channel).await;
        })
    }
}
