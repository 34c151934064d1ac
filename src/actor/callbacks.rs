//! Pending reply callbacks and await waiters.
//!
//! Keyed by [`Event::callback_key`]. A waiter is released exactly once: whoever
//! removes the entry from the map (a completing reply, an error, or the await
//! timeout) owns the release, and the other side finds nothing to do. The entry
//! stays in the map while a handler runs, so a timeout can still claim it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::VicinityError;
use crate::event::Event;

/// Called with each correlated reply. Returns `true` when the exchange is complete.
pub type ReplyHandler = Box<dyn FnMut(&Event) -> bool + Send>;

/// Called when the exchange fails. Returns `true` when the exchange is complete.
pub type ErrorHandler = Box<dyn FnMut(&VicinityError) -> bool + Send>;

type Shared<T> = Arc<Mutex<T>>;

/// How a waiter was released.
#[derive(Debug, Clone)]
pub(crate) enum Release {
    Completed,
    Failed(VicinityError),
}

struct Pending {
    on_reply: Option<Shared<ReplyHandler>>,
    on_error: Option<Shared<ErrorHandler>>,
    waiter: Option<oneshot::Sender<Release>>,
    registered: Instant,
}

impl Pending {
    fn new() -> Self {
        Self {
            on_reply: None,
            on_error: None,
            waiter: None,
            registered: Instant::now(),
        }
    }

    fn release(mut self, release: Release) {
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.send(release);
        }
    }

    /// Nobody awaits this exchange any more.
    fn is_unwatched(&self) -> bool {
        self.waiter.as_ref().map_or(true, oneshot::Sender::is_closed)
    }
}

#[derive(Default)]
pub(crate) struct Callbacks {
    pending: Mutex<HashMap<String, Pending>>,
}

impl Callbacks {
    pub(crate) fn register(&self, key: &str, on_reply: Option<ReplyHandler>, on_error: Option<ErrorHandler>) {
        if on_reply.is_none() && on_error.is_none() {
            return;
        }
        let mut pending = self.pending.lock();
        let entry = pending.entry(key.to_string()).or_insert_with(Pending::new);
        if let Some(handler) = on_reply {
            entry.on_reply = Some(Arc::new(Mutex::new(handler)));
        }
        if let Some(handler) = on_error {
            entry.on_error = Some(Arc::new(Mutex::new(handler)));
        }
    }

    /// Installs a waiter for `key` and returns its receiving end.
    pub(crate) fn arm(&self, key: &str) -> oneshot::Receiver<Release> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .entry(key.to_string())
            .or_insert_with(Pending::new)
            .waiter = Some(tx);
        rx
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.pending.lock().contains_key(key)
    }

    /// Runs the callbacks for an inbound correlated event.
    ///
    /// `failure` carries the error when the event reports one. Returns `false` if
    /// nothing was registered for `key`.
    pub(crate) fn on_event(&self, key: &str, event: &Event, failure: Option<VicinityError>) -> bool {
        let (on_reply, on_error) = {
            let pending = self.pending.lock();
            let Some(entry) = pending.get(key) else {
                return false;
            };
            (entry.on_reply.clone(), entry.on_error.clone())
        };

        let complete = match &failure {
            Some(error) => on_error.map_or(true, |handler| {
                let mut handler = handler.lock();
                (*handler)(error)
            }),
            None => on_reply.map_or(true, |handler| {
                let mut handler = handler.lock();
                (*handler)(event)
            }),
        };

        if complete {
            // Gone already if the await timed out while the handler ran.
            let claimed = self.pending.lock().remove(key);
            if let Some(pending) = claimed {
                pending.release(failure.map_or(Release::Completed, Release::Failed));
            }
        }
        true
    }

    /// Reports a failure that does not end the exchange, such as one unreachable target.
    ///
    /// The error handler is used at most once and then dropped.
    pub(crate) fn fail(&self, key: &str, error: &VicinityError) {
        let handler = self
            .pending
            .lock()
            .get_mut(key)
            .and_then(|pending| pending.on_error.take());
        if let Some(handler) = handler {
            (*handler.lock())(error);
        }
    }

    /// Ends the exchange on timeout.
    ///
    /// Returns `true` if the entry was still pending; the error handler has then run
    /// once. `false` means a reply released it first.
    pub(crate) fn time_out(&self, key: &str, error: &VicinityError) -> bool {
        let Some(mut pending) = self.pending.lock().remove(key) else {
            return false;
        };
        if let Some(handler) = pending.on_error.take() {
            (*handler.lock())(error);
        }
        pending.waiter = None;
        true
    }

    /// Drops callbacks nobody awaits that are older than `ttl`.
    ///
    /// Covers `say_with` calls that do not block and never get a reply.
    pub(crate) fn expire(&self, ttl: Duration) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|_, entry| !entry.is_unwatched() || entry.registered.elapsed() < ttl);
        before - pending.len()
    }

    pub(crate) fn remove(&self, key: &str) {
        self.pending.lock().remove(key);
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.lock().len()
    }
}
