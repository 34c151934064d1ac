//! Delivery reliability: the acknowledgement ledger and the conversation log.

pub mod acknowledgement;
pub mod conversation;

pub use acknowledgement::{AckOutcome, AcknowledgementLedger};
pub use conversation::{Conversation, ConversationEntry, ConversationStatus};
