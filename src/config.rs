//! Runtime configuration.
//!
//! Every knob has a default that matches a production deployment; [`VicinityConfig::from_env`]
//! overrides them from `VICINITY_*` variables. Tests usually start from
//! [`VicinityConfig::default`] and shorten the timers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration could not be read from the environment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{name} {reason}")]
pub struct ConfigError {
    pub name: String,
    pub reason: String,
}

/// Settings shared by every actor started against one fabric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VicinityConfig {
    /// Deployment partition written into every actor name.
    pub project: String,
    /// Version string written into every actor name.
    pub generation: String,
    /// Track acknowledgements for events that require them.
    pub acknowledgement_enabled: bool,
    /// Park undeliverable work in the to-do ledger.
    pub todo_enabled: bool,
    /// Heartbeat period.
    pub tick_seconds: u64,
    /// Await deadline used when an event does not carry its own.
    pub await_timeout_seconds: u64,
    /// Maximum concurrent dispatch workers per vicinity (2..=10).
    pub dispatch_workers: usize,
    /// Events allowed to wait for a worker before the listener runs them itself.
    pub dispatch_queue: usize,
    /// Lease used by `attempt_lock` when the caller passes none.
    pub lock_ttl_seconds: u64,
    /// Lifetime of conversation, acknowledgement and board entries.
    pub ledger_ttl_seconds: u64,
    /// Facts kept per kind in local memory.
    pub memory_capacity: usize,
    /// Facts not read for this long are dropped.
    pub memory_ttl_minutes: u64,
    /// Presence entries older than this are considered stale.
    pub freshness_seconds: u64,
    /// A self checkup slower than this marks the fabric unhealthy.
    pub health_check_seconds: u64,
    /// Token that puts an actor into the Away state on `ActorEntered`.
    pub join_token: Option<String>,
    /// Token that brings an actor back on `ActorResume`.
    pub override_token: Option<String>,
}

impl Default for VicinityConfig {
    fn default() -> Self {
        Self {
            project: crate::identity::DEFAULT_PROJECT.to_string(),
            generation: crate::identity::DEFAULT_GENERATION.to_string(),
            acknowledgement_enabled: true,
            todo_enabled: true,
            tick_seconds: 60,
            await_timeout_seconds: 30,
            dispatch_workers: 10,
            dispatch_queue: 10,
            lock_ttl_seconds: 300,
            ledger_ttl_seconds: 3600,
            memory_capacity: 200,
            memory_ttl_minutes: 120,
            freshness_seconds: 120,
            health_check_seconds: 10,
            join_token: None,
            override_token: None,
        }
    }
}

impl VicinityConfig {
    /// Loads configuration from the environment on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if any variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(project) = env_string("VICINITY_PROJECT").or_else(|| env_string("PROJECT")) {
            config.project = project;
        }
        if let Some(generation) = env_string("VICINITY_GENERATION") {
            config.generation = generation;
        }
        if let Some(enabled) = env_bool("VICINITY_ACKNOWLEDGEMENT")? {
            config.acknowledgement_enabled = enabled;
        }
        if let Some(enabled) = env_bool("VICINITY_TODO")? {
            config.todo_enabled = enabled;
        }
        if let Some(v) = env_u64("VICINITY_TICK_SECONDS")? {
            config.tick_seconds = v;
        }
        if let Some(v) = env_u64("VICINITY_AWAIT_TIMEOUT_SECONDS")? {
            config.await_timeout_seconds = v;
        }
        if let Some(v) = env_usize("VICINITY_DISPATCH_WORKERS")? {
            config.dispatch_workers = v;
        }
        if let Some(v) = env_usize("VICINITY_DISPATCH_QUEUE")? {
            config.dispatch_queue = v;
        }
        if let Some(v) = env_u64("VICINITY_LOCK_TTL_SECONDS")? {
            config.lock_ttl_seconds = v;
        }
        if let Some(v) = env_u64("VICINITY_LEDGER_TTL_SECONDS")? {
            config.ledger_ttl_seconds = v;
        }
        if let Some(v) = env_usize("VICINITY_MEMORY_CAPACITY")? {
            config.memory_capacity = v;
        }
        if let Some(v) = env_u64("VICINITY_MEMORY_TTL_MINUTES")? {
            config.memory_ttl_minutes = v;
        }
        if let Some(v) = env_u64("VICINITY_FRESHNESS_SECONDS")? {
            config.freshness_seconds = v;
        }
        if let Some(v) = env_u64("VICINITY_HEALTH_CHECK_SECONDS")? {
            config.health_check_seconds = v;
        }
        config.join_token = env_string("VICINITY_JOIN_TOKEN");
        config.override_token = env_string("VICINITY_OVERRIDE_TOKEN");

        Ok(config.normalized())
    }

    /// Clamps values into the ranges the runtime supports.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.dispatch_workers = self.dispatch_workers.clamp(2, 10);
        self.tick_seconds = self.tick_seconds.max(1);
        self
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_seconds)
    }

    pub fn ledger_ttl(&self) -> Duration {
        Duration::from_secs(self.ledger_ttl_seconds)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_seconds)
    }

    /// Saturates at the largest representable window.
    pub fn freshness(&self) -> chrono::Duration {
        i64::try_from(self.freshness_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn memory_ttl(&self) -> Duration {
        Duration::from_secs(self.memory_ttl_minutes.saturating_mul(60))
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u64>().map(Some).map_err(|e| ConfigError {
        name: name.to_string(),
        reason: format!("must be a u64: {e}"),
    })
}

fn env_usize(name: &str) -> Result<Option<usize>, ConfigError> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<usize>().map(Some).map_err(|e| ConfigError {
        name: name.to_string(),
        reason: format!("must be a usize: {e}"),
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "true" | "1" | "yes" | "enabled" => Ok(true),
        "false" | "0" | "no" | "disabled" => Ok(false),
        _ => Err(ConfigError {
            name: name.to_string(),
            reason: "must be enabled/disabled or a boolean".to_string(),
        }),
    }
}

fn env_bool(name: &str) -> Result<Option<bool>, ConfigError> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    parse_bool(name, &v).map(Some)
}
