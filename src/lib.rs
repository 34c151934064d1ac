#![doc(html_logo_url = "https://www.rust-lang.org/logos/rust-logo-128x128.png")]
#![doc(html_favicon_url = "https://www.rust-lang.org/favicon.ico")]
//! # Vicinity
//!
//! > **Distributed actors over a shared key-value and pub/sub fabric.**
//!
//! Actors in separate processes find each other through a presence roster, exchange
//! typed [`Event`](event::Event)s over per-actor channels, and coordinate through
//! fabric-backed primitives: a lock, FIFO queues, a bulletin board and a to-do ledger
//! for work nobody could take.
//!
//! ## 🏗️ Design Philosophy
//!
//! ### Why a shared fabric?
//!
//! Every piece of cross-process state (presence, acknowledgements, conversations,
//! locks, parked work) lives in one store behind the [`Fabric`](fabric::Fabric)
//! trait. An actor process holds nothing another instance could not rebuild, so
//! instances of a group can come and go:
//! - **Discovery**: a bare group name resolves to a live instance in round robin.
//! - **Hand-off**: an event whose target vanished is parked and claimed by a peer.
//! - **Traceability**: every delivery step is logged per request in the conversation ledger.
//!
//! ## 🚀 Core Concepts
//!
//! ### Roles and Actors
//! A business actor implements [`ActorRole`](actor::ActorRole): a group name, an
//! `init` that registers behaviors, and optional periodic hooks. The runtime wraps it
//! in an [`Actor`](actor::Actor) that owns identity, listeners, callbacks, local memory
//! and the heartbeat.
//!
//! ### say / whisper / announce
//! `say` delivers to named or group targets and can block until a correlated reply
//! completes. `whisper` stays in-process. `announce` broadcasts without waiting.
//!
//! ### Testing without a cluster
//! [`InMemoryFabric`](fabric::InMemoryFabric) implements the whole fabric contract in
//! process, and [`MockFabric`](fabric::mock::MockFabric) injects store failures and
//! dropped subscriptions.
//!
//! ## 👩‍💻 Architecture Notes
//!
//! ### 1. Type-Safe Error Handling
//! Each layer has its own `thiserror` enum, folded into [`VicinityError`](error::VicinityError).
//! Delivery failures reach the caller's error handler; they never panic the actor.
//!
//! ### 2. Events stay data
//! Behaviors receive the event plus a [`Handling`](actor::Handling) context. Events
//! never point back at an actor, so they serialize into the ledgers unchanged.
//!
//! ### 3. Concurrency Model
//! Each subscription runs in its own Tokio task; inbound events go through a bounded
//! dispatch pool, and each actor has one heartbeat task.
//!
//! ### 4. Observability
//! `tracing` everywhere, with the acting instance as a structured field. See
//! [`lifecycle::tracing`].
//!
//! ## 🗺️ Module Tour
//!
//! ### 1. The Runtime ([`actor`])
//! - **Key items**: [`Actor`](actor::Actor), [`ActorRole`](actor::ActorRole),
//!   [`behavior`](actor::behavior), [`Said`](actor::Said).
//!
//! ### 2. The Transport ([`transport`], [`event`], [`identity`], [`security`])
//! - **Role**: names, events, the wire envelope, channels, presence lookup and token checks.
//! - **Key items**: [`Vicinity`](transport::Vicinity), [`ActorIdentity`](identity::ActorIdentity).
//!
//! ### 3. Reliability ([`protocol`])
//! - **Role**: acknowledgement ledger and per-request conversation log.
//!
//! ### 4. Coordination ([`coordination`], [`memory`])
//! - **Key items**: [`Lock`](coordination::Lock), [`Queue`](coordination::Queue),
//!   [`BulletinBoard`](coordination::BulletinBoard), [`ToDoList`](coordination::ToDoList),
//!   [`Tasklist`](coordination::Tasklist), [`TicketNumber`](coordination::TicketNumber),
//!   [`Vault`](coordination::Vault), [`LocalMemory`](memory::LocalMemory).
//!
//! ### 5. The Orchestrator ([`lifecycle`], [`config`])
//! - **Key items**: [`ActorSystem`](lifecycle::ActorSystem), [`VicinityConfig`](config::VicinityConfig).
//!
//! ## 🚀 Quick Start
//!
//! ```bash
//! # Run the retail sample with info logs
//! RUST_LOG=info cargo run -p vicinity-retail
//! ```
//!
//! ### Running Tests
//!
//! ```bash
//! cargo test --workspace
//! ```

pub mod actor;
pub mod config;
pub mod coordination;
pub mod error;
pub mod event;
pub mod fabric;
pub mod identity;
pub mod lifecycle;
pub mod memory;
pub mod protocol;
pub mod security;
pub mod transport;
