//! Coordination primitives over the fabric.
//!
//! - [`lock`]: TTL-bounded mutual exclusion leases.
//! - [`queue`]: FIFO lists for point-to-point handoff.
//! - [`board`]: bulletin board and daily status topics.
//! - [`todo`]: the reassignment ledger for work whose owner vanished.
//! - [`tasklist`]: per-request workflow tracking against use case definitions.
//! - [`ticket`]: shared numeric sequences.
//! - [`vault`]: shared secret store.

pub mod board;
pub mod lock;
pub mod queue;
pub mod tasklist;
pub mod ticket;
pub mod todo;
pub mod vault;

pub use board::{BoardStatus, BulletinBoard, PresenceStatus};
pub use lock::{Lock, LockAttempt, Unlock};
pub use queue::Queue;
pub use tasklist::{Tasklist, TasklistDefinition, TasklistEntry, TasklistStatus};
pub use ticket::TicketNumber;
pub use todo::{TaskEntry, TaskStatus, ToDoList};
pub use vault::Vault;
