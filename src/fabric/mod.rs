//! # Shared Fabric Store
//!
//! The fabric is the only state shared between actor instances: channels for
//! publish/subscribe, plain keys, hashes and lists, all with key-level TTL.
//! Every coordination protocol in this crate (presence, locks, acknowledgements,
//! to-do claims) is written against the [`Fabric`] trait using single-key atomic
//! operations only.
//!
//! # Architecture Note
//! The trait mirrors the command set of a Redis-class store so an adapter for a real
//! server is a thin mapping. [`InMemoryFabric`] implements it for single-process
//! deployments and tests; [`mock::MockFabric`] wraps any fabric to inject faults.

pub mod memory;
pub mod mock;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::FabricError;

pub use memory::InMemoryFabric;

pub type FabricResult<T> = Result<T, FabricError>;

/// An open subscription to one channel.
///
/// The stream ending means the connection was dropped; the listener reports it as
/// a broken connection so the owning actor can subscribe again.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    receiver: mpsc::UnboundedReceiver<String>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, receiver: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            channel: channel.into(),
            receiver,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next raw message, or `None` once the connection is gone.
    pub async fn next_message(&mut self) -> Option<String> {
        self.receiver.recv().await
    }
}

/// Command set of the shared store.
#[async_trait]
pub trait Fabric: Send + Sync + 'static {
    // --- Channels ---

    /// Publishes a message; returns the number of subscribers that received it.
    async fn publish(&self, channel: &str, message: String) -> FabricResult<usize>;

    async fn subscribe(&self, channel: &str) -> FabricResult<Subscription>;

    // --- Keys ---

    async fn get(&self, key: &str) -> FabricResult<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> FabricResult<()>;

    /// Creates the key only if it does not exist. Returns `true` when created.
    async fn set_if_absent(&self, key: &str, value: String, ttl: Option<Duration>) -> FabricResult<bool>;

    async fn del(&self, key: &str) -> FabricResult<bool>;

    async fn exists(&self, key: &str) -> FabricResult<bool>;

    /// Sets the TTL of an existing key. Returns `false` if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> FabricResult<bool>;

    // --- Hashes ---

    /// Sets a field. Returns `true` if the field is new.
    async fn hset(&self, key: &str, field: &str, value: String) -> FabricResult<bool>;

    async fn hget(&self, key: &str, field: &str) -> FabricResult<Option<String>>;

    /// Removes a field. Returns `true` if it existed.
    async fn hdel(&self, key: &str, field: &str) -> FabricResult<bool>;

    async fn hexists(&self, key: &str, field: &str) -> FabricResult<bool>;

    async fn hgetall(&self, key: &str) -> FabricResult<BTreeMap<String, String>>;

    /// Atomically adds `delta` to an integer field and returns the new value.
    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> FabricResult<i64>;

    /// A pseudo-random field of the hash.
    async fn hrandfield(&self, key: &str) -> FabricResult<Option<String>>;

    // --- Lists ---

    /// Appends to the tail. Returns the new length.
    async fn rpush(&self, key: &str, value: String) -> FabricResult<usize>;

    async fn lpop(&self, key: &str) -> FabricResult<Option<String>>;

    /// Pops the head, waiting up to `timeout` for a value to arrive.
    async fn blpop(&self, key: &str, timeout: Duration) -> FabricResult<Option<String>>;

    async fn llen(&self, key: &str) -> FabricResult<usize>;

    // --- Health ---

    async fn ping(&self) -> FabricResult<()>;
}
