use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A snapshot of an actor's local memory, shared with its group through the board.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notes {
    pub author: String,
    pub entries: BTreeMap<String, BTreeMap<String, Value>>,
}

impl Notes {
    pub fn new(author: impl Into<String>, entries: BTreeMap<String, BTreeMap<String, Value>>) -> Self {
        Self {
            author: author.into(),
            entries,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(BTreeMap::is_empty)
    }

    /// Board topic holding a group's notes.
    pub fn topic(group: &str) -> String {
        format!("ActorNotes:{group}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::LocalMemory;
    use std::time::Duration;

    #[test]
    fn test_notes_carry_memory_between_instances() {
        let first = LocalMemory::new(10, Duration::from_secs(600));
        first.remember("greeting", &"hello".to_string()).unwrap();
        let notes = Notes::new("Merchant.default.1.0.0.a", first.dump());
        let json = serde_json::to_string(&notes).unwrap();

        let second = LocalMemory::new(10, Duration::from_secs(600));
        let restored: Notes = serde_json::from_str(&json).unwrap();
        assert_eq!(second.load(&restored), 1);
        assert_eq!(second.recall::<String>("greeting").unwrap().as_deref(), Some("hello"));
        assert_eq!(Notes::topic("Merchant"), "ActorNotes:Merchant");
    }
}
