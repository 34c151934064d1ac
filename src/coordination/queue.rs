//! FIFO lists for point-to-point hand-off.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::fabric::{Fabric, FabricResult};

pub const DEFAULT_BLOCKING_WAIT: Duration = Duration::from_secs(60);

/// Durable FIFO queues keyed by signature.
#[derive(Clone)]
pub struct Queue {
    fabric: Arc<dyn Fabric>,
}

impl Queue {
    pub fn new(fabric: Arc<dyn Fabric>) -> Self {
        Self { fabric }
    }

    /// Gives an existing queue a lifetime. Returns `false` if the queue is empty.
    pub async fn create(&self, signature: &str, ttl: Duration) -> FabricResult<bool> {
        self.fabric.expire(signature, ttl).await
    }

    pub async fn push(&self, signature: &str, value: impl Into<String>) -> FabricResult<usize> {
        self.fabric.rpush(signature, value.into()).await
    }

    pub async fn push_json<T: Serialize>(&self, signature: &str, value: &T) -> FabricResult<usize> {
        self.push(signature, serde_json::to_string(value)?).await
    }

    pub async fn pop(&self, signature: &str) -> FabricResult<Option<String>> {
        self.fabric.lpop(signature).await
    }

    /// Pops the head, waiting up to `wait` (or a minute) for something to arrive.
    pub async fn pop_blocking(&self, signature: &str, wait: Option<Duration>) -> FabricResult<Option<String>> {
        self.fabric
            .blpop(signature, wait.unwrap_or(DEFAULT_BLOCKING_WAIT))
            .await
    }

    pub async fn pop_json<T: DeserializeOwned>(&self, signature: &str) -> FabricResult<Option<T>> {
        match self.pop(signature).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn size(&self, signature: &str) -> FabricResult<usize> {
        self.fabric.llen(signature).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::InMemoryFabric;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Delivery {
        order: String,
        items: u32,
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = Queue::new(Arc::new(InMemoryFabric::new()));
        queue.push("deliveries", "first").await.unwrap();
        queue.push("deliveries", "second").await.unwrap();
        assert_eq!(queue.size("deliveries").await.unwrap(), 2);
        assert_eq!(queue.pop("deliveries").await.unwrap().as_deref(), Some("first"));
        assert_eq!(queue.pop("deliveries").await.unwrap().as_deref(), Some("second"));
        assert_eq!(queue.pop("deliveries").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_typed_values() {
        let queue = Queue::new(Arc::new(InMemoryFabric::new()));
        let delivery = Delivery {
            order: "o-1".into(),
            items: 3,
        };
        queue.push_json("deliveries", &delivery).await.unwrap();
        let popped: Option<Delivery> = queue.pop_json("deliveries").await.unwrap();
        assert_eq!(popped, Some(delivery));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_pop_gives_up() {
        let queue = Queue::new(Arc::new(InMemoryFabric::new()));
        let popped = queue
            .pop_blocking("empty", Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(popped, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_created_queue_expires() {
        let queue = Queue::new(Arc::new(InMemoryFabric::new()));
        queue.push("batch", "x").await.unwrap();
        assert!(queue.create("batch", Duration::from_secs(10)).await.unwrap());
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(queue.size("batch").await.unwrap(), 0);
    }
}
