//! # Vicinity Errors
//!
//! This module defines the error types used throughout the substrate.
//! Each layer owns a narrow enum ([`FabricError`], [`MemoryError`]) and the
//! runtime folds them into [`VicinityError`], which is what business actors see
//! through their error handlers and the `Result`s returned by `say`.
//!
//! # Architecture Note
//! Delivery failures are *values*, not panics. A missing target, an expired await or a
//! rejected token is reported through the caller's error handler and, where it makes
//! sense, to the `VicinityMonitor` group. Only health-check failures end an actor, and
//! even then through a graceful termination.

/// Error type returned by registered behaviors.
///
/// Handlers are business code, so the framework accepts any error and reports it
/// as an `ActorProcessingError` instead of forcing a framework-specific type.
pub type BehaviorError = Box<dyn std::error::Error + Send + Sync>;

/// Failures of the shared fabric store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FabricError {
    #[error("Fabric unavailable: {0}")]
    Unavailable(String),
    #[error("Key {0} holds a value of another type")]
    WrongType(String),
    #[error("Fabric codec error: {0}")]
    Codec(String),
}

impl From<serde_json::Error> for FabricError {
    fn from(e: serde_json::Error) -> Self {
        FabricError::Codec(e.to_string())
    }
}

/// Failures of the per-actor local memory.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    #[error("Unable to store {name}: {reason}")]
    Store { name: String, reason: String },
    #[error("Unable to recall {name}: {reason}")]
    Recall { name: String, reason: String },
}

/// Errors surfaced by the actor runtime and its subsystems.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VicinityError {
    /// No live instance could be found for a target.
    #[error("Actor not found: {0}")]
    ActorNotFound(String),

    /// A reply was not received before the await deadline.
    #[error("Await timed out after {seconds}s for request {request_id}")]
    AwaitTimedOut { request_id: String, seconds: u64 },

    /// A handler on the receiving side failed.
    #[error("Actor {actor} failed to process {event_type}: {message}")]
    ActorProcessing {
        actor: String,
        event_type: String,
        message: String,
    },

    /// A subscription to the fabric was dropped.
    #[error("Vicinity connection broken for {0}")]
    ConnectionBroken(String),

    /// An event carried a token that did not validate.
    #[error("Invalid token on {event_type} from {from}")]
    InvalidToken { event_type: String, from: String },

    /// An event that requires a token was about to be sent without one.
    #[error("Access token required for {0}")]
    AccessDenied(String),

    /// A remote actor answered with an error event.
    #[error("{event_type} received from {from}: {message}")]
    Reported {
        event_type: String,
        from: String,
        message: String,
    },

    /// The actor is shutting down and no longer accepts work.
    #[error("Actor {0} is terminating")]
    Terminated(String),

    #[error(transparent)]
    Fabric(#[from] FabricError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("Codec error: {0}")]
    Codec(String),
}

impl VicinityError {
    /// Stable condition code, matching the strings monitoring tools key on.
    pub fn code(&self) -> &'static str {
        match self {
            VicinityError::ActorNotFound(_) => "ACTOR_NOT_FOUND",
            VicinityError::AwaitTimedOut { .. } => "AWAIT_TIMED_OUT",
            VicinityError::ActorProcessing { .. } => "ACTOR_PROCESSING_ERROR",
            VicinityError::ConnectionBroken(_) => "VICINITY_CONNECTION_BROKEN",
            VicinityError::InvalidToken { .. } => "INVALID_TOKEN",
            VicinityError::AccessDenied(_) => "ACCESS_DENIED",
            VicinityError::Reported { .. } => "ERROR_EVENT_RECEIVED",
            VicinityError::Terminated(_) => "ACTOR_TERMINATED",
            VicinityError::Fabric(_) => "FABRIC_ERROR",
            VicinityError::Memory(_) => "MEMORY_ERROR",
            VicinityError::Codec(_) => "CODEC_ERROR",
        }
    }
}

impl From<serde_json::Error> for VicinityError {
    fn from(e: serde_json::Error) -> Self {
        VicinityError::Codec(e.to_string())
    }
}
