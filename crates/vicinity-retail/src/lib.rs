//! # Vicinity Retail
//!
//! Sample business actors riding on the vicinity substrate. Business records stay in
//! in-process maps; what matters here is how the roles talk:
//!
//! - [`Customer`](roles::Customer) places orders and pays, awaiting each reply.
//! - [`Merchant`](roles::Merchant) reserves stock and, every 30 minutes, reviews
//!   inventory under the `ReviewInventory` lock so only one instance does it.
//! - [`Cashier`](roles::Cashier) records payments and issues receipts.

pub mod error;
pub mod lifecycle;
pub mod model;
pub mod roles;
