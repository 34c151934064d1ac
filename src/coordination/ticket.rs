//! Shared numeric sequences kept in the `TicketNumbers` hash, one field per sequence.

use std::sync::Arc;

use tracing::info;

use crate::error::VicinityError;
use crate::fabric::Fabric;

pub const TICKET_NUMBERS: &str = "TicketNumbers";

#[derive(Clone)]
pub struct TicketNumber {
    fabric: Arc<dyn Fabric>,
}

impl TicketNumber {
    pub fn new(fabric: Arc<dyn Fabric>) -> Self {
        Self { fabric }
    }

    /// Resets sequence `name` so the next ticket is `value + 1`.
    pub async fn set(&self, name: &str, value: i64) -> Result<(), VicinityError> {
        self.fabric.hset(TICKET_NUMBERS, name, value.to_string()).await?;
        Ok(())
    }

    /// Next ticket of sequence `name`.
    ///
    /// A sequence that does not exist yet starts after the value `setup` returns for
    /// it, e.g. the highest id already stored elsewhere. Two requestors starting the
    /// same sequence at the same moment can both receive the first ticket.
    pub async fn next<F>(&self, name: &str, setup: F) -> Result<i64, VicinityError>
    where
        F: FnOnce(&str) -> i64,
    {
        if self.fabric.hexists(TICKET_NUMBERS, name).await? {
            return Ok(self.fabric.hincr_by(TICKET_NUMBERS, name, 1).await?);
        }
        let start = setup(name) + 1;
        self.fabric.hset(TICKET_NUMBERS, name, start.to_string()).await?;
        info!(sequence = name, start, "Ticket sequence started");
        Ok(start)
    }
}
