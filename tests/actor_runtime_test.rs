use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use vicinity::actor::{
    behavior, Actor, ActorRole, Delivery, ErrorHandler, ExternalBehavior, ReplyHandler, ACK_MARKER_KIND,
};
use vicinity::config::VicinityConfig;
use vicinity::coordination::board::RUNNING;
use vicinity::coordination::{BoardStatus, PresenceStatus};
use vicinity::error::{BehaviorError, FabricError, VicinityError};
use vicinity::event::Event;
use vicinity::fabric::mock::MockFabric;
use vicinity::fabric::InMemoryFabric;
use vicinity::protocol::ConversationStatus;
use vicinity::security::{SecurityContext, StaticTokenValidator};
use vicinity::transport::{channel_for, roster_topic, Vicinity};

/// Answers `Ping` with `pong`, fails on `Explode`.
#[derive(Default)]
struct Echo {
    pings: Arc<AtomicUsize>,
}

#[async_trait]
impl ActorRole for Echo {
    fn group(&self) -> &str {
        "Echo"
    }

    async fn init(&self, actor: &Actor) -> Result<(), BehaviorError> {
        let pings = self.pings.clone();
        actor.register_behavior(
            "Ping",
            behavior(move |event, handling| {
                let pings = pings.clone();
                async move {
                    pings.fetch_add(1, Ordering::SeqCst);
                    handling
                        .actor()
                        .reply_with(&event, |reply| reply.with_payload("pong", true))
                        .await?;
                    Ok(())
                }
            }),
        );
        actor.register_behavior(
            "Explode",
            behavior(|_, _| async { Err("boom".into()) }),
        );
        Ok(())
    }
}

/// Sends things; understands nothing beyond the built-ins.
struct Caller;

#[async_trait]
impl ActorRole for Caller {
    fn group(&self) -> &str {
        "Caller"
    }
}

fn security() -> SecurityContext {
    SecurityContext::new(Arc::new(StaticTokenValidator::new(["internal"]))).with_internal_token("internal")
}

fn vicinity_over(fabric: Arc<InMemoryFabric>) -> Vicinity {
    Vicinity::new(fabric, VicinityConfig::default(), security())
}

async fn start(role: Arc<dyn ActorRole>, vicinity: &Vicinity) -> Actor {
    Actor::builder(role, vicinity.clone())
        .without_heartbeat()
        .start()
        .await
        .expect("actor should start")
}

type Outcomes = Arc<Mutex<Vec<Result<Event, VicinityError>>>>;

fn recording_handlers() -> (Outcomes, ReplyHandler, ErrorHandler) {
    let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));
    let replies = outcomes.clone();
    let errors = outcomes.clone();
    let on_reply: ReplyHandler = Box::new(move |reply| {
        replies.lock().push(Ok(reply.clone()));
        true
    });
    let on_error: ErrorHandler = Box::new(move |error| {
        errors.lock().push(Err(error.clone()));
        true
    });
    (outcomes, on_reply, on_error)
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..50 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[tokio::test]
async fn test_say_to_group_awaits_correlated_reply() {
    let vicinity = vicinity_over(Arc::new(InMemoryFabric::new()));
    let echo = Arc::new(Echo::default());
    let _responder = start(echo.clone(), &vicinity).await;
    let caller = start(Arc::new(Caller), &vicinity).await;

    let (outcomes, on_reply, on_error) = recording_handlers();
    let said = caller
        .say_with(
            Event::new("Ping", caller.name()).to("Echo").awaiting_response(5),
            Some(on_reply),
            Some(on_error),
        )
        .await
        .unwrap();

    assert_eq!(said.delivery, Delivery::Completed);
    assert_eq!(said.reached, 1);
    assert_eq!(echo.pings.load(Ordering::SeqCst), 1);
    let outcomes = outcomes.lock();
    assert_eq!(outcomes.len(), 1);
    let reply = outcomes[0].as_ref().unwrap();
    assert!(reply.is_reply());
    assert_eq!(reply.payload().get("pong"), Some(&serde_json::Value::Bool(true)));
    assert_eq!(caller.pending_callbacks(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_await_timeout_fires_error_handler_once() {
    let fabric = Arc::new(InMemoryFabric::new());
    let vicinity = vicinity_over(fabric);
    // Present on the roster but nobody listens on its channel.
    let ghost = "Echo.default.1.0.0.ghost";
    vicinity
        .presence()
        .post("Echo", ghost, &BoardStatus::new(PresenceStatus::Active, "status", RUNNING))
        .await
        .unwrap();
    let caller = start(Arc::new(Caller), &vicinity).await;

    let (outcomes, on_reply, on_error) = recording_handlers();
    let started = tokio::time::Instant::now();
    let said = caller
        .say_with(
            Event::new("Ping", caller.name())
                .to(ghost)
                .awaiting_response(2)
                .process_later_if_no_actor_found(false),
            Some(on_reply),
            Some(on_error),
        )
        .await
        .unwrap();

    assert_eq!(said.delivery, Delivery::TimedOut);
    assert!(started.elapsed() >= Duration::from_secs(2));
    let outcomes = outcomes.lock();
    assert_eq!(outcomes.len(), 1);
    match &outcomes[0] {
        Err(error) => assert_eq!(error.code(), "AWAIT_TIMED_OUT"),
        Ok(event) => panic!("unexpected reply {event:?}"),
    }

    let legs = vicinity
        .conversation()
        .entries(said.event.request_id().unwrap())
        .await
        .unwrap();
    assert!(legs
        .iter()
        .any(|(_, status)| *status == ConversationStatus::ErrorAfterReceivedByActor));
}

#[tokio::test]
async fn test_acknowledgement_clears_ledger_and_marker() {
    let vicinity = vicinity_over(Arc::new(InMemoryFabric::new()));
    let _responder = start(Arc::new(Echo::default()), &vicinity).await;
    let caller = start(Arc::new(Caller), &vicinity).await;

    let said = caller
        .say(
            Event::new("Ping", caller.name())
                .to("Echo")
                .requiring_acknowledgement()
                .awaiting_response(5),
        )
        .await
        .unwrap();
    assert_eq!(said.delivery, Delivery::Completed);
    assert_eq!(said.event.index(), 1);

    let request_id = said.event.request_id().unwrap().to_string();
    let ledger = vicinity.acknowledgements();
    assert!(ledger.is_acknowledged(&request_id, 1).await.unwrap());
    assert!(ledger.get_unacknowledged(&request_id, 1).await.unwrap().is_none());

    let memory = caller.memory();
    assert!(
        eventually(|| memory.recall_matching(ACK_MARKER_KIND, |_, _| true).is_empty()).await,
        "acknowledgement should clear the waiting marker"
    );
}

#[tokio::test]
async fn test_unknown_event_is_not_understood() {
    let vicinity = vicinity_over(Arc::new(InMemoryFabric::new()));
    let _responder = start(Arc::new(Echo::default()), &vicinity).await;
    let caller = start(Arc::new(Caller), &vicinity).await;

    let (outcomes, on_reply, on_error) = recording_handlers();
    let said = caller
        .say_with(
            Event::new("Juggle", caller.name()).to("Echo").awaiting_response(5),
            Some(on_reply),
            Some(on_error),
        )
        .await
        .unwrap();

    assert_eq!(said.delivery, Delivery::Failed);
    match &outcomes.lock()[0] {
        Err(VicinityError::Reported { event_type, .. }) => assert_eq!(event_type, "ActorDidNotUnderstand"),
        other => panic!("unexpected outcome {other:?}"),
    };
}

#[tokio::test]
async fn test_failing_behavior_reports_processing_error() {
    let vicinity = vicinity_over(Arc::new(InMemoryFabric::new()));
    let responder = start(Arc::new(Echo::default()), &vicinity).await;
    let caller = start(Arc::new(Caller), &vicinity).await;

    let (outcomes, on_reply, on_error) = recording_handlers();
    let said = caller
        .say_with(
            Event::new("Explode", caller.name())
                .to(responder.name())
                .awaiting_response(5),
            Some(on_reply),
            Some(on_error),
        )
        .await
        .unwrap();

    assert_eq!(said.delivery, Delivery::Failed);
    match &outcomes.lock()[0] {
        Err(VicinityError::Reported { event_type, message, .. }) => {
            assert_eq!(event_type, "ActorProcessingError");
            assert!(message.contains("boom"));
        }
        other => panic!("unexpected outcome {other:?}"),
    };
}

#[tokio::test]
async fn test_forged_token_triggers_security_incident() {
    let vicinity = vicinity_over(Arc::new(InMemoryFabric::new()));
    let echo = Arc::new(Echo::default());
    let _responder = start(echo.clone(), &vicinity).await;
    let caller = start(Arc::new(Caller), &vicinity).await;

    let (outcomes, on_reply, on_error) = recording_handlers();
    let said = caller
        .say_with(
            Event::new("Ping", caller.name())
                .to("Echo")
                .with_access_token("forged")
                .awaiting_response(5),
            Some(on_reply),
            Some(on_error),
        )
        .await
        .unwrap();

    assert_eq!(said.delivery, Delivery::Failed);
    assert_eq!(echo.pings.load(Ordering::SeqCst), 0);
    match &outcomes.lock()[0] {
        Err(VicinityError::Reported { event_type, .. }) => assert_eq!(event_type, "SecurityIncident"),
        other => panic!("unexpected outcome {other:?}"),
    };
}

#[tokio::test]
async fn test_whisper_stays_in_process() {
    let fabric = Arc::new(InMemoryFabric::new());
    let vicinity = vicinity_over(fabric);
    let echo = Arc::new(Echo::default());
    let actor = start(echo.clone(), &vicinity).await;

    let said = actor
        .whisper(Event::new("Ping", actor.name()).awaiting_response(5))
        .await
        .unwrap();

    assert_eq!(said.delivery, Delivery::Completed);
    assert!(said.event.is_local());
    assert_eq!(said.event.targets(), [actor.name().to_string()]);
    assert_eq!(echo.pings.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_listeners_reconnect_after_connection_loss() {
    let fabric = Arc::new(InMemoryFabric::new());
    let vicinity = vicinity_over(fabric.clone());
    let responder = start(Arc::new(Echo::default()), &vicinity).await;
    let caller = start(Arc::new(Caller), &vicinity).await;

    fabric.sever_subscriptions();
    let channel = channel_for(responder.name());
    assert!(
        eventually(|| fabric.subscriber_count(&channel) == 1).await,
        "responder should subscribe again"
    );
    let caller_channel = channel_for(caller.name());
    assert!(eventually(|| fabric.subscriber_count(&caller_channel) == 1).await);

    let said = caller
        .say(Event::new("Ping", caller.name()).to("Echo").awaiting_response(5))
        .await
        .unwrap();
    assert_eq!(said.delivery, Delivery::Completed);
}

#[tokio::test]
async fn test_closed_subscription_at_start_is_reopened() {
    let fabric = Arc::new(InMemoryFabric::new());
    let mock = Arc::new(MockFabric::new(fabric.clone()));
    mock.expect_subscribe().return_closed();
    let vicinity = Vicinity::new(mock.clone(), VicinityConfig::default(), security());

    let actor = Actor::builder(Arc::new(Echo::default()), vicinity)
        .instance_id("flaky")
        .without_heartbeat()
        .start()
        .await
        .unwrap();

    let channel = channel_for(actor.name());
    assert!(eventually(|| fabric.subscriber_count(&channel) == 1).await);
    mock.verify();
}

#[tokio::test]
async fn test_publish_failure_surfaces_to_caller() {
    let fabric = Arc::new(InMemoryFabric::new());
    let mock = Arc::new(MockFabric::new(fabric));
    let vicinity = Vicinity::new(mock.clone(), VicinityConfig::default(), security());
    let _responder = start(Arc::new(Echo::default()), &vicinity).await;
    let caller = start(Arc::new(Caller), &vicinity).await;

    mock.expect_publish()
        .return_err(FabricError::Unavailable("connection reset".into()));
    let result = caller
        .say(Event::new("Ping", caller.name()).to("Echo").awaiting_response(5))
        .await;

    assert!(matches!(result, Err(VicinityError::Fabric(FabricError::Unavailable(_)))));
    assert_eq!(caller.pending_callbacks(), 0);
    mock.verify();
}

#[tokio::test]
async fn test_terminate_posts_gone_and_refuses_work() {
    let vicinity = vicinity_over(Arc::new(InMemoryFabric::new()));
    let actor = start(Arc::new(Echo::default()), &vicinity).await;
    assert_eq!(
        vicinity.find_actor("Echo", "default").await.unwrap().as_deref(),
        Some(actor.name())
    );

    actor.shutdown("maintenance").await.unwrap();

    assert!(actor.is_terminated());
    assert_eq!(actor.status(), PresenceStatus::Gone);
    let gone = vicinity
        .bulletin_board()
        .members(&roster_topic("Echo"), PresenceStatus::Gone)
        .await
        .unwrap();
    assert_eq!(gone.get(actor.name()).map(|s| s.message.as_str()), Some("maintenance"));
    assert_eq!(vicinity.find_actor("Echo", "default").await.unwrap(), None);

    let refused = actor.say(Event::new("Ping", actor.name()).to("Echo")).await;
    assert!(matches!(refused, Err(VicinityError::Terminated(_))));
}

#[tokio::test]
async fn test_missing_group_is_reported_and_parked() {
    let vicinity = vicinity_over(Arc::new(InMemoryFabric::new()));
    let caller = start(Arc::new(Caller), &vicinity).await;

    let (outcomes, on_reply, on_error) = recording_handlers();
    let said = caller
        .say_with(
            Event::new("Ping", caller.name()).to("Echo").awaiting_response(5),
            Some(on_reply),
            Some(on_error),
        )
        .await
        .unwrap();

    assert_eq!(said.delivery, Delivery::NotDelivered);
    assert_eq!(said.reached, 0);
    assert!(matches!(&outcomes.lock()[0], Err(VicinityError::ActorNotFound(group)) if group == "Echo"));

    let tasks = vicinity.todo().tasks("Echo").await.unwrap();
    assert_eq!(tasks.len(), 1);
    let (entry, _) = &tasks[0];
    assert_eq!(entry.index, 1);

    // A later instance claims the parked work.
    let echo = Arc::new(Echo::default());
    let late = start(echo.clone(), &vicinity).await;
    let task = vicinity
        .todo()
        .acquire_available_task("Echo", late.name())
        .await
        .unwrap()
        .expect("parked task");
    assert!(task.is_to_do_task());
    late.hear(task).await;
    assert_eq!(echo.pings.load(Ordering::SeqCst), 1);
    assert!(vicinity.todo().tasks("Echo").await.unwrap().is_empty());
}

fn vicinity_with(fabric: Arc<InMemoryFabric>, config: VicinityConfig) -> Vicinity {
    Vicinity::new(fabric, config, security())
}

fn ticking() -> VicinityConfig {
    VicinityConfig {
        tick_seconds: 1,
        ..VicinityConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_actor_can_ask_its_own_group() {
    let vicinity = vicinity_over(Arc::new(InMemoryFabric::new()));
    let echo = Arc::new(Echo::default());
    let actor = start(echo.clone(), &vicinity).await;

    let said = actor
        .say(Event::new("Ping", actor.name()).to("Echo").awaiting_response(2))
        .await
        .unwrap();
    assert_eq!(said.delivery, Delivery::Completed);
    assert_eq!(said.reached, 1);
    assert_eq!(said.event.to_first(), actor.name());
    // Answering its own reply would ping again.
    assert_eq!(echo.pings.load(Ordering::SeqCst), 1);

    let unknown = actor
        .say(Event::new("Juggle", actor.name()).to("Echo").awaiting_response(2))
        .await
        .unwrap();
    assert_eq!(unknown.delivery, Delivery::Failed);
    assert_eq!(actor.pending_callbacks(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_partial_reply_handler_still_times_out() {
    let vicinity = vicinity_over(Arc::new(InMemoryFabric::new()));
    let _responder = start(Arc::new(Echo::default()), &vicinity).await;
    let caller = start(Arc::new(Caller), &vicinity).await;

    let errors = Arc::new(AtomicUsize::new(0));
    let counter = errors.clone();
    let on_reply: ReplyHandler = Box::new(|_| {
        std::thread::sleep(Duration::from_millis(1500));
        false
    });
    let on_error: ErrorHandler = Box::new(move |error| {
        assert_eq!(error.code(), "AWAIT_TIMED_OUT");
        counter.fetch_add(1, Ordering::SeqCst);
        true
    });

    let said = tokio::time::timeout(
        Duration::from_secs(10),
        caller.say_with(
            Event::new("Ping", caller.name()).to("Echo").awaiting_response(1),
            Some(on_reply),
            Some(on_error),
        ),
    )
    .await
    .expect("say should return once the await deadline passes")
    .unwrap();

    assert_eq!(said.delivery, Delivery::TimedOut);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(caller.pending_callbacks(), 0);
}

/// Leaves acknowledgement markers to the heartbeat sweep.
struct ForgetfulCaller;

#[async_trait]
impl ActorRole for ForgetfulCaller {
    fn group(&self) -> &str {
        "Caller"
    }

    async fn init(&self, actor: &Actor) -> Result<(), BehaviorError> {
        actor.register_behavior("Acknowledgement", behavior(|_, _| async { Ok(()) }));
        Ok(())
    }
}

fn waiting_markers(actor: &Actor) -> usize {
    actor.memory().recall_matching(ACK_MARKER_KIND, |_, _| true).len()
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_clears_marker_once_conversation_shows_acknowledgement() {
    let vicinity = vicinity_with(Arc::new(InMemoryFabric::new()), ticking());
    let _responder = start(Arc::new(Echo::default()), &vicinity).await;
    let caller = Actor::start(Arc::new(ForgetfulCaller), vicinity.clone()).await.unwrap();

    let said = caller
        .say(
            Event::new("Ping", caller.name())
                .to("Echo")
                .requiring_acknowledgement()
                .awaiting_response(5),
        )
        .await
        .unwrap();
    assert_eq!(said.delivery, Delivery::Completed);
    assert_eq!(waiting_markers(&caller), 1);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(waiting_markers(&caller), 0);
    assert!(vicinity.todo().tasks("Echo").await.unwrap().is_empty());
    caller.shutdown("test over").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_parks_event_whose_target_left() {
    let vicinity = vicinity_with(Arc::new(InMemoryFabric::new()), ticking());
    let ghost = "Echo.default.1.0.0.ghost";
    let presence = vicinity.presence();
    presence
        .post("Echo", ghost, &BoardStatus::new(PresenceStatus::Active, "status", RUNNING))
        .await
        .unwrap();
    let caller = Actor::start(Arc::new(Caller), vicinity.clone()).await.unwrap();

    let said = caller
        .say(Event::new("Ping", caller.name()).to(ghost).requiring_acknowledgement())
        .await
        .unwrap();
    assert_eq!(said.delivery, Delivery::Sent);
    assert_eq!(waiting_markers(&caller), 1);

    presence
        .post("Echo", ghost, &BoardStatus::new(PresenceStatus::Gone, "status", "crashed"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    let tasks = vicinity.todo().tasks("Echo").await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].0.key, said.event.request_id().unwrap());
    assert_eq!(waiting_markers(&caller), 0);
    caller.shutdown("test over").await.unwrap();
}

#[tokio::test]
async fn test_override_token_stands_group_down_until_exit() {
    let fabric = Arc::new(InMemoryFabric::new());
    let tokens = |join: &str, over: &str| VicinityConfig {
        join_token: Some(join.to_string()),
        override_token: Some(over.to_string()),
        ..VicinityConfig::default()
    };
    let vicinity = vicinity_with(fabric.clone(), tokens("join", "override"));
    let resident = start(Arc::new(Echo::default()), &vicinity).await;

    // Wrong override token: ignored.
    let stranger = start(Arc::new(Echo::default()), &vicinity_with(fabric.clone(), tokens("join", "other"))).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(resident.status(), PresenceStatus::Active);
    stranger.shutdown("test over").await.unwrap();

    let overrider = start(Arc::new(Echo::default()), &vicinity).await;
    assert!(
        eventually(|| resident.status() == PresenceStatus::Away).await,
        "resident should stand down"
    );
    assert_eq!(overrider.status(), PresenceStatus::Active);
    assert_eq!(
        vicinity.find_actor("Echo", "default").await.unwrap().as_deref(),
        Some(overrider.name())
    );

    overrider.shutdown("override over").await.unwrap();
    assert!(
        eventually(|| resident.status() == PresenceStatus::Active).await,
        "resident should resume"
    );
}

/// Serves `LookupPrice` for the Echo group and answers every pipeline event.
struct PriceBook;

#[async_trait]
impl ExternalBehavior for PriceBook {
    fn names(&self, group: &str) -> Vec<String> {
        if group == "Echo" {
            vec!["LookupPrice".to_string()]
        } else {
            Vec::new()
        }
    }

    async fn perform(&self, event: &Event) -> Result<Option<serde_json::Value>, BehaviorError> {
        match event.event_type() {
            "LookupPrice" => Ok(Some(serde_json::json!({ "price": 42 }))),
            "Refund" => Err("refunds are closed".into()),
            other => Ok(Some(serde_json::Value::String(format!("piped {other}")))),
        }
    }
}

#[tokio::test]
async fn test_external_behavior_answers_named_and_pipeline_events() {
    let vicinity = vicinity_over(Arc::new(InMemoryFabric::new()));
    let responder = Actor::builder(Arc::new(Echo::default()), vicinity.clone())
        .external_behavior(Arc::new(PriceBook))
        .without_heartbeat()
        .start()
        .await
        .unwrap();
    assert!(responder.handles("LookupPrice"));
    let caller = start(Arc::new(Caller), &vicinity).await;

    let (outcomes, on_reply, on_error) = recording_handlers();
    let said = caller
        .say_with(
            Event::new("LookupPrice", caller.name()).to("Echo").awaiting_response(5),
            Some(on_reply),
            Some(on_error),
        )
        .await
        .unwrap();
    assert_eq!(said.delivery, Delivery::Completed);
    let reply = outcomes.lock()[0].clone().unwrap();
    assert_eq!(reply.payload().get("results"), Some(&serde_json::json!({ "price": 42 })));

    let (outcomes, on_reply, on_error) = recording_handlers();
    let said = caller
        .say_with(
            Event::new("Transform", caller.name())
                .to("Echo")
                .as_pipeline()
                .awaiting_response(5),
            Some(on_reply),
            Some(on_error),
        )
        .await
        .unwrap();
    assert_eq!(said.delivery, Delivery::Completed);
    let reply = outcomes.lock()[0].clone().unwrap();
    assert_eq!(reply.payload().get("results"), Some(&serde_json::json!("piped Transform")));

    let failed = caller
        .say(
            Event::new("Refund", caller.name())
                .to("Echo")
                .as_pipeline()
                .awaiting_response(5),
        )
        .await
        .unwrap();
    assert_eq!(failed.delivery, Delivery::Failed);
}

/// Reports an unhealthy environment and remembers why it was stopped.
#[derive(Default)]
struct Sickly {
    reason: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl ActorRole for Sickly {
    fn group(&self) -> &str {
        "Sickly"
    }

    async fn is_healthy(&self, _actor: &Actor) -> bool {
        false
    }

    async fn on_terminate(&self, _actor: &Actor, reason: &str) {
        *self.reason.lock() = Some(reason.to_string());
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_health_check_terminates_actor() {
    let vicinity = vicinity_with(Arc::new(InMemoryFabric::new()), ticking());
    let sickly = Arc::new(Sickly::default());
    let actor = Actor::start(sickly.clone(), vicinity.clone()).await.unwrap();
    assert!(!actor.is_terminated());

    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(actor.is_terminated());
    assert_eq!(actor.status(), PresenceStatus::Gone);
    assert_eq!(sickly.reason.lock().as_deref(), Some("unhealthy"));
    assert_eq!(vicinity.find_actor("Sickly", "default").await.unwrap(), None);
    actor.shutdown("already gone").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_hourly_notes_reach_next_instance() {
    let vicinity = vicinity_with(Arc::new(InMemoryFabric::new()), ticking());
    let first = Actor::start(Arc::new(Echo::default()), vicinity.clone()).await.unwrap();
    first.remember("favoriteDrink", &"tea".to_string()).unwrap();

    // Sixty ticks make an hour on the heartbeat clock.
    tokio::time::sleep(Duration::from_secs(61)).await;
    first.shutdown("rotated").await.unwrap();

    let second = start(Arc::new(Echo::default()), &vicinity).await;
    assert_eq!(second.recall::<String>("favoriteDrink").unwrap().as_deref(), Some("tea"));
}

/// Holds every `Stall` until released.
struct Staller {
    gate: Arc<tokio::sync::Semaphore>,
    stalled: Arc<AtomicUsize>,
}

#[async_trait]
impl ActorRole for Staller {
    fn group(&self) -> &str {
        "Staller"
    }

    async fn init(&self, actor: &Actor) -> Result<(), BehaviorError> {
        let gate = self.gate.clone();
        let stalled = self.stalled.clone();
        actor.register_behavior(
            "Stall",
            behavior(move |_, _| {
                let gate = gate.clone();
                let stalled = stalled.clone();
                async move {
                    stalled.fetch_add(1, Ordering::SeqCst);
                    let _permit = gate.acquire().await?;
                    Ok(())
                }
            }),
        );
        Ok(())
    }
}

#[tokio::test]
async fn test_busy_actor_does_not_starve_its_neighbours() {
    let config = VicinityConfig {
        dispatch_workers: 2,
        dispatch_queue: 10,
        ..VicinityConfig::default()
    };
    let vicinity = vicinity_with(Arc::new(InMemoryFabric::new()), config);
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let stalled = Arc::new(AtomicUsize::new(0));
    let _staller = start(
        Arc::new(Staller {
            gate: gate.clone(),
            stalled: stalled.clone(),
        }),
        &vicinity,
    )
    .await;
    let _responder = start(Arc::new(Echo::default()), &vicinity).await;
    let caller = start(Arc::new(Caller), &vicinity).await;

    for _ in 0..2 {
        caller
            .say(Event::new("Stall", caller.name()).to("Staller"))
            .await
            .unwrap();
    }
    assert!(eventually(|| stalled.load(Ordering::SeqCst) == 2).await);

    let said = caller
        .say(Event::new("Ping", caller.name()).to("Echo").awaiting_response(2))
        .await
        .unwrap();
    assert_eq!(said.delivery, Delivery::Completed);
    gate.add_permits(2);
}
