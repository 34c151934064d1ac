//! # Fault-Injecting Fabric
//!
//! [`MockFabric`] wraps a real fabric (usually an [`InMemoryFabric`](super::InMemoryFabric))
//! and lets a test script failures for specific operations. Calls without a matching
//! expectation go straight to the wrapped store, so an actor can run normally until
//! the scripted fault hits.
//!
//! | Scenario | Expectation |
//! |----------|-------------|
//! | Store unreachable | `expect_ping().return_err(..)` |
//! | Publish lost | `expect_publish().return_err(..)` |
//! | Connection dropped right after subscribe | `expect_subscribe().return_closed()` |
//!
//! ```rust
//! use std::sync::Arc;
//! use vicinity::error::FabricError;
//! use vicinity::fabric::{mock::MockFabric, Fabric, InMemoryFabric};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mock = MockFabric::new(Arc::new(InMemoryFabric::new()));
//!     mock.expect_ping()
//!         .return_err(FabricError::Unavailable("maintenance".into()));
//!
//!     assert!(mock.ping().await.is_err());
//!     assert!(mock.ping().await.is_ok());
//!     mock.verify();
//! }
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Fabric, FabricResult, Subscription};
use crate::error::FabricError;

/// Fabric operations a fault can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Publish,
    Subscribe,
    Get,
    Set,
    SetIfAbsent,
    Del,
    Hset,
    Hget,
    Hdel,
    Hgetall,
    HincrBy,
    Rpush,
    Lpop,
    Ping,
}

#[derive(Debug)]
enum Outcome {
    Fail(FabricError),
    ClosedSubscription,
}

#[derive(Debug)]
struct Expectation {
    operation: Operation,
    outcome: Outcome,
}

type Expectations = Arc<Mutex<VecDeque<Expectation>>>;

/// A fabric with scripted faults.
pub struct MockFabric {
    inner: Arc<dyn Fabric>,
    expectations: Expectations,
}

impl MockFabric {
    pub fn new(inner: Arc<dyn Fabric>) -> Self {
        Self {
            inner,
            expectations: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Scripts the next call of `operation`.
    pub fn expect(&self, operation: Operation) -> FaultBuilder {
        FaultBuilder {
            operation,
            expectations: self.expectations.clone(),
        }
    }

    pub fn expect_publish(&self) -> FaultBuilder {
        self.expect(Operation::Publish)
    }

    pub fn expect_subscribe(&self) -> FaultBuilder {
        self.expect(Operation::Subscribe)
    }

    pub fn expect_ping(&self) -> FaultBuilder {
        self.expect(Operation::Ping)
    }

    pub fn expect_hset(&self) -> FaultBuilder {
        self.expect(Operation::Hset)
    }

    /// Panics if any scripted fault was never triggered.
    pub fn verify(&self) {
        let remaining = self.expectations.lock().len();
        if remaining > 0 {
            panic!("Not all expectations were met. {remaining} remaining");
        }
    }

    fn take(&self, operation: Operation) -> Option<Outcome> {
        let mut expectations = self.expectations.lock();
        let position = expectations.iter().position(|e| e.operation == operation)?;
        expectations.remove(position).map(|e| e.outcome)
    }

    fn fault(&self, operation: Operation) -> FabricResult<()> {
        match self.take(operation) {
            Some(Outcome::Fail(error)) => Err(error),
            _ => Ok(()),
        }
    }
}

/// Builder for one scripted fault.
pub struct FaultBuilder {
    operation: Operation,
    expectations: Expectations,
}

impl FaultBuilder {
    /// The call fails with `error`.
    pub fn return_err(self, error: FabricError) {
        self.expectations.lock().push_back(Expectation {
            operation: self.operation,
            outcome: Outcome::Fail(error),
        });
    }

    /// The subscription succeeds but its stream ends immediately.
    pub fn return_closed(self) {
        self.expectations.lock().push_back(Expectation {
            operation: self.operation,
            outcome: Outcome::ClosedSubscription,
        });
    }
}

#[async_trait]
impl Fabric for MockFabric {
    async fn publish(&self, channel: &str, message: String) -> FabricResult<usize> {
        self.fault(Operation::Publish)?;
        self.inner.publish(channel, message).await
    }

    async fn subscribe(&self, channel: &str) -> FabricResult<Subscription> {
        match self.take(Operation::Subscribe) {
            Some(Outcome::Fail(error)) => Err(error),
            Some(Outcome::ClosedSubscription) => {
                let (_, receiver) = mpsc::unbounded_channel();
                Ok(Subscription::new(channel, receiver))
            }
            None => self.inner.subscribe(channel).await,
        }
    }

    async fn get(&self, key: &str) -> FabricResult<Option<String>> {
        self.fault(Operation::Get)?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> FabricResult<()> {
        self.fault(Operation::Set)?;
        self.inner.set(key, value, ttl).await
    }

    async fn set_if_absent(&self, key: &str, value: String, ttl: Option<Duration>) -> FabricResult<bool> {
        self.fault(Operation::SetIfAbsent)?;
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn del(&self, key: &str) -> FabricResult<bool> {
        self.fault(Operation::Del)?;
        self.inner.del(key).await
    }

    async fn exists(&self, key: &str) -> FabricResult<bool> {
        self.inner.exists(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> FabricResult<bool> {
        self.inner.expire(key, ttl).await
    }

    async fn hset(&self, key: &str, field: &str, value: String) -> FabricResult<bool> {
        self.fault(Operation::Hset)?;
        self.inner.hset(key, field, value).await
    }

    async fn hget(&self, key: &str, field: &str) -> FabricResult<Option<String>> {
        self.fault(Operation::Hget)?;
        self.inner.hget(key, field).await
    }

    async fn hdel(&self, key: &str, field: &str) -> FabricResult<bool> {
        self.fault(Operation::Hdel)?;
        self.inner.hdel(key, field).await
    }

    async fn hexists(&self, key: &str, field: &str) -> FabricResult<bool> {
        self.inner.hexists(key, field).await
    }

    async fn hgetall(&self, key: &str) -> FabricResult<BTreeMap<String, String>> {
        self.fault(Operation::Hgetall)?;
        self.inner.hgetall(key).await
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> FabricResult<i64> {
        self.fault(Operation::HincrBy)?;
        self.inner.hincr_by(key, field, delta).await
    }

    async fn hrandfield(&self, key: &str) -> FabricResult<Option<String>> {
        self.inner.hrandfield(key).await
    }

    async fn rpush(&self, key: &str, value: String) -> FabricResult<usize> {
        self.fault(Operation::Rpush)?;
        self.inner.rpush(key, value).await
    }

    async fn lpop(&self, key: &str) -> FabricResult<Option<String>> {
        self.fault(Operation::Lpop)?;
        self.inner.lpop(key).await
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> FabricResult<Option<String>> {
        self.fault(Operation::Lpop)?;
        self.inner.blpop(key, timeout).await
    }

    async fn llen(&self, key: &str) -> FabricResult<usize> {
        self.inner.llen(key).await
    }

    async fn ping(&self) -> FabricResult<()> {
        self.fault(Operation::Ping)?;
        self.inner.ping().await
    }
}
