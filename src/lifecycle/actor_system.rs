use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info};

use crate::actor::{Actor, ActorRole};
use crate::config::VicinityConfig;
use crate::error::VicinityError;
use crate::fabric::Fabric;
use crate::security::SecurityContext;
use crate::transport::Vicinity;

/// Starts actors over one shared [`Vicinity`] and shuts them down together.
///
/// `ActorSystem` is responsible for:
/// - **Shared services**: one fabric connection, config and security context per process
/// - **Lifecycle Management**: starting roles as actors and terminating them
/// - **Shutdown reporting**: surfacing heartbeats that ended abnormally
///
/// # Example
///
/// ```ignore
/// let system = ActorSystem::new(fabric, VicinityConfig::default(), security);
/// let merchant = system.spawn(Arc::new(Merchant::default())).await?;
///
/// // ... actors talk through the fabric ...
///
/// system.shutdown().await?;
/// ```
pub struct ActorSystem {
    vicinity: Vicinity,

    /// Started actors, in start order
    actors: Mutex<Vec<Actor>>,
}

impl ActorSystem {
    pub fn new(fabric: Arc<dyn Fabric>, config: VicinityConfig, security: SecurityContext) -> Self {
        Self {
            vicinity: Vicinity::new(fabric, config, security),
            actors: Mutex::new(Vec::new()),
        }
    }

    pub fn vicinity(&self) -> &Vicinity {
        &self.vicinity
    }

    /// Starts `role` with a random instance id and keeps it for shutdown.
    pub async fn spawn(&self, role: Arc<dyn ActorRole>) -> Result<Actor, VicinityError> {
        let actor = Actor::start(role, self.vicinity.clone()).await?;
        self.actors.lock().push(actor.clone());
        Ok(actor)
    }

    /// Adds an actor started elsewhere (for example through [`Actor::builder`]).
    pub fn adopt(&self, actor: Actor) {
        self.actors.lock().push(actor);
    }

    /// Handles of every actor still running.
    pub fn actors(&self) -> Vec<Actor> {
        self.actors
            .lock()
            .iter()
            .filter(|actor| !actor.is_terminated())
            .cloned()
            .collect()
    }

    /// The running actors of `group`.
    pub fn members(&self, group: &str) -> Vec<Actor> {
        self.actors()
            .into_iter()
            .filter(|actor| actor.group() == group)
            .collect()
    }

    /// Gracefully shuts down every actor, most recently started first.
    ///
    /// # Returns
    ///
    /// - `Ok(())` if all actors shut down cleanly
    /// - `Err(String)` naming the first actor whose heartbeat failed
    pub async fn shutdown(self) -> Result<(), String> {
        info!("Shutting down system...");
        let actors = self.actors.into_inner();

        let mut failure = None;
        for actor in actors.into_iter().rev() {
            if let Err(e) = actor.shutdown("system shutdown").await {
                error!(actor = actor.name(), error = %e, "Actor did not stop cleanly");
                failure.get_or_insert_with(|| format!("Actor {} failed: {e}", actor.name()));
            }
        }

        match failure {
            Some(failure) => Err(failure),
            None => {
                info!("System shutdown complete.");
                Ok(())
            }
        }
    }
}
