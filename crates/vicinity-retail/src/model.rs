//! Event names, payload keys and the small records the roles exchange.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use vicinity::event::Event;

use crate::error::RetailError;

pub const PLACE_ORDER: &str = "PlaceOrder";
pub const REQUEST_PAYMENT: &str = "RequestPayment";

/// Lock resource guarding the periodic inventory review.
pub const REVIEW_INVENTORY: &str = "ReviewInventory";
/// Board topic where reviews are posted.
pub const INVENTORY_TOPIC: &str = "InventoryReview";

pub const PRODUCT: &str = "product";
pub const QUANTITY: &str = "quantity";
pub const AMOUNT: &str = "amount";
pub const TOTAL: &str = "total";
pub const RECEIPT: &str = "receipt";
/// Ticket sequence receipts are numbered from, shared by every cashier.
pub const RECEIPT_SEQUENCE: &str = "Receipt";

/// Stock keeping record held by a merchant instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItem {
    /// Unit price in cents.
    pub price: u64,
    pub quantity: u32,
}

/// A payment taken by a cashier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub receipt: String,
    pub customer: String,
    pub amount: u64,
}

/// What a customer gets back from a completed purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub product: String,
    pub quantity: u32,
    pub total: u64,
    pub receipt: String,
    /// Request id shared by the order and the payment.
    pub request_id: String,
}

/// Outcome of one `ReviewInventory` attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InventoryReview {
    /// This instance held the lock and reviewed its stock.
    Completed { low_stock: Vec<String> },
    /// Another instance holds the lock; the job is skipped this tick.
    Skipped { holder: Option<String> },
}

pub(crate) fn payload_str<'a>(event: &'a Event, field: &'static str) -> Result<&'a str, RetailError> {
    event.payload_str(field).ok_or_else(|| missing(event, field))
}

pub(crate) fn payload_u64(event: &Event, field: &'static str) -> Result<u64, RetailError> {
    event
        .payload()
        .get(field)
        .and_then(Value::as_u64)
        .ok_or_else(|| missing(event, field))
}

fn missing(event: &Event, field: &'static str) -> RetailError {
    RetailError::MissingField {
        event_type: event.event_type().to_string(),
        field,
    }
}
