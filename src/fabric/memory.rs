//! In-process fabric store.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::seq::IteratorRandom;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use super::{Fabric, FabricResult, Subscription};
use crate::error::FabricError;

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Hash(BTreeMap<String, String>),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// A fabric kept in process memory.
///
/// Keys expire lazily on access using tokio's clock, so tests running with a paused
/// clock observe TTLs deterministically. Suitable for tests and single-process
/// deployments; every instance is an isolated store.
#[derive(Debug, Default)]
pub struct InMemoryFabric {
    entries: Mutex<HashMap<String, Entry>>,
    channels: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<String>>>>,
    pushed: Notify,
}

impl InMemoryFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every open subscription, as a lost server connection would.
    pub fn sever_subscriptions(&self) {
        self.channels.lock().clear();
    }

    /// Number of live subscribers on a channel.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .get(channel)
            .map_or(0, |senders| senders.iter().filter(|s| !s.is_closed()).count())
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `f` on the live entry for `key`, dropping it first if it expired.
    fn with_entry<R>(&self, key: &str, f: impl FnOnce(Option<&mut Entry>) -> R) -> R {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
        f(entries.get_mut(key))
    }

    fn with_hash<R>(
        &self,
        key: &str,
        create: bool,
        f: impl FnOnce(&mut BTreeMap<String, String>) -> R,
    ) -> FabricResult<Option<R>> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
        if create {
            entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Hash(BTreeMap::new()),
                expires_at: None,
            });
        }
        let Some(entry) = entries.get_mut(key) else {
            return Ok(None);
        };
        let result = match &mut entry.value {
            Value::Hash(hash) => f(hash),
            _ => return Err(FabricError::WrongType(key.to_string())),
        };
        if matches!(&entry.value, Value::Hash(h) if h.is_empty()) {
            entries.remove(key);
        }
        Ok(Some(result))
    }

    fn with_list<R>(
        &self,
        key: &str,
        create: bool,
        f: impl FnOnce(&mut VecDeque<String>) -> R,
    ) -> FabricResult<Option<R>> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
        if create {
            entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::List(VecDeque::new()),
                expires_at: None,
            });
        }
        let Some(entry) = entries.get_mut(key) else {
            return Ok(None);
        };
        let result = match &mut entry.value {
            Value::List(list) => f(list),
            _ => return Err(FabricError::WrongType(key.to_string())),
        };
        if matches!(&entry.value, Value::List(l) if l.is_empty()) {
            entries.remove(key);
        }
        Ok(Some(result))
    }
}

#[async_trait]
impl Fabric for InMemoryFabric {
    async fn publish(&self, channel: &str, message: String) -> FabricResult<usize> {
        let mut channels = self.channels.lock();
        let Some(senders) = channels.get_mut(channel) else {
            return Ok(0);
        };
        senders.retain(|sender| sender.send(message.clone()).is_ok());
        Ok(senders.len())
    }

    async fn subscribe(&self, channel: &str) -> FabricResult<Subscription> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.channels
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(sender);
        Ok(Subscription::new(channel, receiver))
    }

    async fn get(&self, key: &str) -> FabricResult<Option<String>> {
        self.with_entry(key, |entry| match entry {
            None => Ok(None),
            Some(Entry {
                value: Value::Text(text),
                ..
            }) => Ok(Some(text.clone())),
            Some(_) => Err(FabricError::WrongType(key.to_string())),
        })
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> FabricResult<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: Value::Text(value),
                expires_at,
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: String, ttl: Option<Duration>) -> FabricResult<bool> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value),
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> FabricResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .remove(key)
            .is_some_and(|e| e.is_live(now)))
    }

    async fn exists(&self, key: &str) -> FabricResult<bool> {
        Ok(self.with_entry(key, |entry| entry.is_some()))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> FabricResult<bool> {
        Ok(self.with_entry(key, |entry| match entry {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        }))
    }

    async fn hset(&self, key: &str, field: &str, value: String) -> FabricResult<bool> {
        let created = self.with_hash(key, true, |hash| hash.insert(field.to_string(), value).is_none())?;
        Ok(created.unwrap_or(false))
    }

    async fn hget(&self, key: &str, field: &str) -> FabricResult<Option<String>> {
        Ok(self.with_hash(key, false, |hash| hash.get(field).cloned())?.flatten())
    }

    async fn hdel(&self, key: &str, field: &str) -> FabricResult<bool> {
        Ok(self
            .with_hash(key, false, |hash| hash.remove(field).is_some())?
            .unwrap_or(false))
    }

    async fn hexists(&self, key: &str, field: &str) -> FabricResult<bool> {
        Ok(self
            .with_hash(key, false, |hash| hash.contains_key(field))?
            .unwrap_or(false))
    }

    async fn hgetall(&self, key: &str) -> FabricResult<BTreeMap<String, String>> {
        Ok(self.with_hash(key, false, |hash| hash.clone())?.unwrap_or_default())
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> FabricResult<i64> {
        let outcome = self.with_hash(key, true, |hash| {
            let current = match hash.get(field) {
                Some(raw) => raw
                    .parse::<i64>()
                    .map_err(|_| FabricError::WrongType(format!("{key}:{field}")))?,
                None => 0,
            };
            let next = current + delta;
            hash.insert(field.to_string(), next.to_string());
            Ok(next)
        })?;
        outcome.unwrap_or(Ok(delta))
    }

    async fn hrandfield(&self, key: &str) -> FabricResult<Option<String>> {
        Ok(self
            .with_hash(key, false, |hash| {
                hash.keys().choose(&mut rand::thread_rng()).cloned()
            })?
            .flatten())
    }

    async fn rpush(&self, key: &str, value: String) -> FabricResult<usize> {
        let len = self.with_list(key, true, |list| {
            list.push_back(value);
            list.len()
        })?;
        self.pushed.notify_waiters();
        Ok(len.unwrap_or(0))
    }

    async fn lpop(&self, key: &str) -> FabricResult<Option<String>> {
        Ok(self.with_list(key, false, VecDeque::pop_front)?.flatten())
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> FabricResult<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Registered before the check so a push in between still wakes us.
            let pushed = self.pushed.notified();
            if let Some(value) = self.lpop(key).await? {
                return Ok(Some(value));
            }
            if tokio::time::timeout_at(deadline, pushed).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn llen(&self, key: &str) -> FabricResult<usize> {
        Ok(self.with_list(key, false, |list| list.len())?.unwrap_or(0))
    }

    async fn ping(&self) -> FabricResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_keys_expire_with_ttl() {
        let fabric = InMemoryFabric::new();
        fabric
            .set("k", "v".into(), Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(fabric.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(fabric.get("k").await.unwrap(), None);
        assert!(!fabric.exists("k").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_if_absent_respects_expiry() {
        let fabric = InMemoryFabric::new();
        let ttl = Some(Duration::from_secs(10));
        assert!(fabric.set_if_absent("lock", "a".into(), ttl).await.unwrap());
        assert!(!fabric.set_if_absent("lock", "b".into(), ttl).await.unwrap());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(fabric.set_if_absent("lock", "b".into(), ttl).await.unwrap());
        assert_eq!(fabric.get("lock").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_hash_operations() {
        let fabric = InMemoryFabric::new();
        assert!(fabric.hset("h", "a", "1".into()).await.unwrap());
        assert!(!fabric.hset("h", "a", "2".into()).await.unwrap());
        assert_eq!(fabric.hget("h", "a").await.unwrap().as_deref(), Some("2"));
        assert_eq!(fabric.hincr_by("h", "n", 1).await.unwrap(), 1);
        assert_eq!(fabric.hincr_by("h", "n", 1).await.unwrap(), 2);
        assert_eq!(fabric.hgetall("h").await.unwrap().len(), 2);
        assert!(fabric.hrandfield("h").await.unwrap().is_some());
        assert!(fabric.hdel("h", "a").await.unwrap());
        assert!(!fabric.hdel("h", "a").await.unwrap());
        assert!(fabric.hdel("h", "n").await.unwrap());
        // An emptied hash disappears.
        assert!(!fabric.exists("h").await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_type_is_reported() {
        let fabric = InMemoryFabric::new();
        fabric.set("k", "v".into(), None).await.unwrap();
        let err = fabric.hset("k", "f", "v".into()).await.unwrap_err();
        assert_eq!(err, FabricError::WrongType("k".into()));
    }

    #[tokio::test]
    async fn test_blpop_wakes_on_push() {
        let fabric = Arc::new(InMemoryFabric::new());
        let waiter = {
            let fabric = fabric.clone();
            tokio::spawn(async move { fabric.blpop("q", Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        fabric.rpush("q", "job".into()).await.unwrap();
        assert_eq!(waiter.await.unwrap().unwrap().as_deref(), Some("job"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blpop_times_out_empty() {
        let fabric = InMemoryFabric::new();
        let popped = fabric.blpop("q", Duration::from_secs(2)).await.unwrap();
        assert_eq!(popped, None);
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers_until_severed() {
        let fabric = InMemoryFabric::new();
        let mut first = fabric.subscribe("channel: a").await.unwrap();
        let mut second = fabric.subscribe("channel: a").await.unwrap();

        assert_eq!(fabric.publish("channel: a", "hi".into()).await.unwrap(), 2);
        assert_eq!(first.next_message().await.as_deref(), Some("hi"));
        assert_eq!(second.next_message().await.as_deref(), Some("hi"));

        fabric.sever_subscriptions();
        assert_eq!(first.next_message().await, None);
        assert_eq!(fabric.publish("channel: a", "lost".into()).await.unwrap(), 0);
    }
}
