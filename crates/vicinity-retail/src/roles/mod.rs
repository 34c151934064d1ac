mod cashier;
mod customer;
mod merchant;

pub use cashier::Cashier;
pub use customer::{ask, Customer, PURCHASE};
pub use merchant::Merchant;

pub const CUSTOMER: &str = "Customer";
pub const MERCHANT: &str = "Merchant";
pub const CASHIER: &str = "Cashier";
