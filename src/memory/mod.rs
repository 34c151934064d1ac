//! # Local Memory
//!
//! Per-actor cache of small facts, never shared through the fabric. Facts are
//! grouped by *kind* (by default the short name of the stored type) and kept as JSON
//! values. Each kind holds at most `capacity` facts; a fact not read for `ttl` is
//! dropped. Once an hour the actor writes its memory out as [`Notes`], and a new
//! instance of the group reads a note back on start.

mod notes;

pub use notes::Notes;

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::error::MemoryError;

#[derive(Debug, Clone)]
struct Fact {
    value: Value,
    last_access: Instant,
}

/// Short type name used as the default kind: `String`, `Order`, ...
pub fn kind_of<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// TTL and size bounded fact cache.
#[derive(Debug)]
pub struct LocalMemory {
    shelves: Mutex<HashMap<String, HashMap<String, Fact>>>,
    capacity: usize,
    ttl: Duration,
}

impl LocalMemory {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            shelves: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn remember<T: Serialize>(&self, name: &str, value: &T) -> Result<(), MemoryError> {
        self.remember_as(kind_of::<T>(), name, value)
    }

    /// Stores `value` under an explicit kind.
    pub fn remember_as<T: Serialize + ?Sized>(&self, kind: &str, name: &str, value: &T) -> Result<(), MemoryError> {
        let value = serde_json::to_value(value).map_err(|e| MemoryError::Store {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        self.put(kind, name, value);
        Ok(())
    }

    /// Appends `value` to the list stored under `name`.
    pub fn remember_occurrence<T: Serialize>(&self, name: &str, value: &T) -> Result<usize, MemoryError> {
        let kind = format!("Vec<{}>", kind_of::<T>());
        let value = serde_json::to_value(value).map_err(|e| MemoryError::Store {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        let mut list = match self.get(&kind, name) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        list.push(value);
        let len = list.len();
        self.put(&kind, name, Value::Array(list));
        Ok(len)
    }

    /// Occurrences stored with [`LocalMemory::remember_occurrence`].
    pub fn recall_occurrences<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>, MemoryError> {
        let kind = format!("Vec<{}>", kind_of::<T>());
        match self.get(&kind, name) {
            Some(value) => decode(name, value),
            None => Ok(Vec::new()),
        }
    }

    pub fn recall<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, MemoryError> {
        self.recall_as(kind_of::<T>(), name)
    }

    /// Reads a fact of an explicit kind. A fact of the wrong shape is an error.
    pub fn recall_as<T: DeserializeOwned>(&self, kind: &str, name: &str) -> Result<Option<T>, MemoryError> {
        self.get(kind, name).map(|value| decode(name, value)).transpose()
    }

    /// Looks `name` up in every kind.
    pub fn recall_any(&self, name: &str) -> Option<(String, Value)> {
        let kinds: Vec<String> = self.shelves.lock().keys().cloned().collect();
        kinds
            .into_iter()
            .find_map(|kind| self.get(&kind, name).map(|value| (kind, value)))
    }

    /// Facts of `kind` accepted by `filter`.
    pub fn recall_matching(&self, kind: &str, filter: impl Fn(&str, &Value) -> bool) -> Vec<(String, Value)> {
        let now = Instant::now();
        let mut shelves = self.shelves.lock();
        let Some(shelf) = shelves.get_mut(kind) else {
            return Vec::new();
        };
        shelf.retain(|_, fact| now.duration_since(fact.last_access) < self.ttl);
        shelf
            .iter_mut()
            .filter(|(name, fact)| filter(name, &fact.value))
            .map(|(name, fact)| {
                fact.last_access = now;
                (name.clone(), fact.value.clone())
            })
            .collect()
    }

    pub fn forget(&self, kind: &str, name: &str) -> bool {
        self.shelves
            .lock()
            .get_mut(kind)
            .is_some_and(|shelf| shelf.remove(name).is_some())
    }

    pub fn forget_typed<T>(&self, name: &str) -> bool {
        self.forget(kind_of::<T>(), name)
    }

    /// Every live fact, by kind.
    pub fn dump(&self) -> BTreeMap<String, BTreeMap<String, Value>> {
        self.sweep();
        self.shelves
            .lock()
            .iter()
            .filter(|(_, shelf)| !shelf.is_empty())
            .map(|(kind, shelf)| {
                let facts = shelf
                    .iter()
                    .map(|(name, fact)| (name.clone(), fact.value.clone()))
                    .collect();
                (kind.clone(), facts)
            })
            .collect()
    }

    /// Loads facts from notes, keeping newer local facts of the same name.
    pub fn load(&self, notes: &Notes) -> usize {
        let mut loaded = 0;
        for (kind, facts) in &notes.entries {
            for (name, value) in facts {
                if self.get(kind, name).is_none() {
                    self.put(kind, name, value.clone());
                    loaded += 1;
                }
            }
        }
        loaded
    }

    /// Drops facts not read within the TTL. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut dropped = 0;
        for shelf in self.shelves.lock().values_mut() {
            let before = shelf.len();
            shelf.retain(|_, fact| now.duration_since(fact.last_access) < self.ttl);
            dropped += before - shelf.len();
        }
        dropped
    }

    fn get(&self, kind: &str, name: &str) -> Option<Value> {
        let now = Instant::now();
        let mut shelves = self.shelves.lock();
        let shelf = shelves.get_mut(kind)?;
        match shelf.get_mut(name) {
            Some(fact) if now.duration_since(fact.last_access) < self.ttl => {
                fact.last_access = now;
                Some(fact.value.clone())
            }
            Some(_) => {
                shelf.remove(name);
                None
            }
            None => None,
        }
    }

    fn put(&self, kind: &str, name: &str, value: Value) {
        let now = Instant::now();
        let mut shelves = self.shelves.lock();
        let shelf = shelves.entry(kind.to_string()).or_default();
        if !shelf.contains_key(name) && shelf.len() >= self.capacity {
            let oldest = shelf
                .iter()
                .min_by_key(|(_, fact)| fact.last_access)
                .map(|(name, _)| name.clone());
            if let Some(oldest) = oldest {
                shelf.remove(&oldest);
            }
        }
        shelf.insert(
            name.to_string(),
            Fact {
                value,
                last_access: now,
            },
        );
    }
}

fn decode<T: DeserializeOwned>(name: &str, value: Value) -> Result<T, MemoryError> {
    serde_json::from_value(value).map_err(|e| MemoryError::Recall {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Basket {
        items: u32,
    }

    fn memory() -> LocalMemory {
        LocalMemory::new(3, Duration::from_secs(120 * 60))
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(kind_of::<String>(), "String");
        assert_eq!(kind_of::<Basket>(), "Basket");
        assert_eq!(kind_of::<Vec<String>>(), "Vec");
    }

    #[test]
    fn test_typed_round_trip_and_wrong_shape() {
        let memory = memory();
        memory.remember("basket", &Basket { items: 2 }).unwrap();
        assert_eq!(memory.recall::<Basket>("basket").unwrap(), Some(Basket { items: 2 }));
        assert_eq!(memory.recall::<Basket>("missing").unwrap(), None);

        memory.remember_as("Basket", "broken", &"not a basket").unwrap();
        let err = memory.recall::<Basket>("broken").unwrap_err();
        assert!(matches!(err, MemoryError::Recall { .. }));
    }

    #[test]
    fn test_capacity_evicts_least_recently_read() {
        let memory = memory();
        for name in ["a", "b", "c"] {
            memory.remember(name, &name.to_string()).unwrap();
        }
        // Touch "a" so "b" becomes the oldest.
        std::thread::sleep(Duration::from_millis(2));
        memory.recall::<String>("a").unwrap();
        memory.remember("d", &"d".to_string()).unwrap();

        assert!(memory.recall::<String>("a").unwrap().is_some());
        assert!(memory.recall::<String>("b").unwrap().is_none());
        assert!(memory.recall::<String>("d").unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_facts_expire_after_access_window() {
        let memory = LocalMemory::new(10, Duration::from_secs(60));
        memory.remember("k", &"v".to_string()).unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(memory.recall::<String>("k").unwrap().is_some());
        tokio::time::advance(Duration::from_secs(45)).await;
        assert!(memory.recall::<String>("k").unwrap().is_some());
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(memory.recall::<String>("k").unwrap().is_none());
    }

    #[test]
    fn test_occurrences_matching_and_forget() {
        let memory = memory();
        memory.remember_occurrence("visits", &1).unwrap();
        assert_eq!(memory.remember_occurrence("visits", &2).unwrap(), 2);
        assert_eq!(memory.recall_occurrences::<i32>("visits").unwrap(), vec![1, 2]);

        memory.remember_as("markers", "requiresAck:R1", &"Waiting:1").unwrap();
        memory.remember_as("markers", "other", &"Done").unwrap();
        let waiting = memory.recall_matching("markers", |_, v| {
            v.as_str().is_some_and(|s| s.starts_with("Waiting:"))
        });
        assert_eq!(waiting.len(), 1);

        assert!(memory.forget("markers", "requiresAck:R1"));
        assert!(!memory.forget("markers", "requiresAck:R1"));
        assert!(memory.recall_any("other").is_some());
    }
}
