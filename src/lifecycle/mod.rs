//! # System Lifecycle & Orchestration
//!
//! Individual actors are simple; starting several of them over one fabric and
//! taking them down cleanly is where the wiring lives. This module provides that
//! conductor.
//!
//! **Key Responsibilities:**
//! 1. **Shared services** - Build one [`Vicinity`](crate::transport::Vicinity) per process
//! 2. **Actor start-up** - Start each role as an [`Actor`](crate::actor::Actor)
//! 3. **Graceful shutdown** - Terminate every actor and wait for its heartbeat
//! 4. **Observability setup** - Initialize tracing and logging
//!
//! ## The ActorSystem Pattern
//!
//! ```rust,ignore
//! let system = ActorSystem::new(fabric, VicinityConfig::from_env()?, security);
//! let cashier = system.spawn(Arc::new(Cashier::default())).await?;
//! let customer = system.spawn(Arc::new(Customer::default())).await?;
//!
//! customer.say(Event::new("RequestPayment", customer.name()).to("Cashier")).await?;
//!
//! system.shutdown().await?;
//! ```
//!
//! ## Graceful Shutdown
//!
//! 1. **Terminate** - Each actor runs `on_terminate`, posts Gone and closes its listeners
//! 2. **Await heartbeats** - The system waits for every heartbeat task to finish
//! 3. **Report** - A heartbeat that panicked turns into an error
//!
//! Actors started later are stopped first, so a client role does not outlive
//! the services it talks to by more than one step.

pub mod actor_system;
pub mod tracing;

pub use actor_system::ActorSystem;
pub use self::tracing::setup_tracing;
