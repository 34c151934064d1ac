//! Behavior registry.
//!
//! Behaviors are keyed by event *subject* (the type with a trailing `Event`
//! removed), so a handler registered for `RequestPayment` also receives
//! `RequestPaymentEvent`. The last registration for a subject wins.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;

use crate::actor::Handling;
use crate::error::BehaviorError;
use crate::event::{subject_of, Event};

/// A registered event handler.
pub type Handler = Arc<dyn Fn(Event, Handling) -> BoxFuture<'static, Result<(), BehaviorError>> + Send + Sync>;

/// Wraps an async closure as a [`Handler`].
///
/// ```rust,ignore
/// actor.register_behavior("RequestPayment", behavior(|event, handling| async move {
///     handling.actor().reply(&event).await?;
///     Ok(())
/// }));
/// ```
pub fn behavior<F, Fut>(f: F) -> Handler
where
    F: Fn(Event, Handling) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BehaviorError>> + Send + 'static,
{
    Arc::new(move |event, handling| Box::pin(f(event, handling)))
}

#[derive(Default)]
pub(crate) struct BehaviorRegistry {
    handlers: RwLock<HashMap<String, Handler>>,
}

impl BehaviorRegistry {
    /// Returns `true` when a previous handler was replaced.
    pub(crate) fn register(&self, name: &str, handler: Handler) -> bool {
        self.handlers
            .write()
            .insert(subject_of(name).to_string(), handler)
            .is_some()
    }

    pub(crate) fn get(&self, subject: &str) -> Option<Handler> {
        self.handlers.read().get(subject).cloned()
    }

    pub(crate) fn contains(&self, subject: &str) -> bool {
        self.handlers.read().contains_key(subject)
    }
}

/// Executor for behaviors defined outside the code, such as per-group JSON call
/// definitions.
///
/// On start the actor registers every name returned by [`ExternalBehavior::names`]
/// for its group. Matching events, and pipeline events nobody else handles, are
/// passed to [`ExternalBehavior::perform`]; a returned value is sent back to the
/// sender in the reply payload under `results`.
#[async_trait]
pub trait ExternalBehavior: Send + Sync + 'static {
    fn names(&self, group: &str) -> Vec<String>;

    async fn perform(&self, event: &Event) -> Result<Option<Value>, BehaviorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_registration_wins_and_suffix_is_ignored() {
        let registry = BehaviorRegistry::default();
        let first = behavior(|_, _| async { Ok(()) });
        let second = behavior(|_, _| async { Err("second".into()) });

        assert!(!registry.register("RequestPaymentEvent", first));
        assert!(registry.register("RequestPayment", second));
        assert!(registry.contains("RequestPayment"));
        assert!(!registry.contains("RequestPaymentEvent"));
    }
}
