//! # Observability & Tracing
//!
//! The [`setup_tracing`] function initializes structured logging for every actor in
//! the process.
//!
//! ## Configuration
//!
//! Compact format without the crate/module prefix (`with_target(false)`). Levels come
//! from `RUST_LOG`:
//!
//! ```bash
//! # Lifecycle, presence and failures
//! RUST_LOG=info cargo run -p vicinity-retail
//!
//! # Every publish, acknowledgement and conversation leg
//! RUST_LOG=debug cargo run -p vicinity-retail
//!
//! # Only the runtime
//! RUST_LOG=vicinity::actor=debug cargo run -p vicinity-retail
//! ```
//!
//! ## What Gets Traced
//!
//! Log lines carry the acting instance as `actor` plus the event's `event_type`,
//! `from`, `to` and `request_id` where they apply:
//!
//! ```text
//! INFO Actor started actor=Cashier.default.1.0.0.5f0c...
//! DEBUG Published event_type="RequestPayment" to="Cashier.default.1.0.0.5f0c..." receivers=1
//! DEBUG Acknowledged request_id="Xq8..." index=1 to="Customer.default.1.0.0.91ab..."
//! WARN Await timed out actor=Customer.default.1.0.0.91ab... key="Xq8.../RequestPayment" seconds=30
//! ```
//!
//! Failures that reach the `VicinityMonitor` group are also logged at `warn` by the
//! actor that reported them.
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}
