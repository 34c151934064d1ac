use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;
use vicinity::actor::{behavior, Actor, ActorRole};
use vicinity::error::BehaviorError;

use super::CASHIER;
use crate::error::RetailError;
use crate::model::{payload_u64, Payment, AMOUNT, RECEIPT, RECEIPT_SEQUENCE, REQUEST_PAYMENT};

/// Takes payments and hands out receipts.
#[derive(Default)]
pub struct Cashier {
    payments: Arc<Mutex<Vec<Payment>>>,
}

impl Cashier {
    /// Payments taken by this instance, oldest first.
    pub fn payments(&self) -> Vec<Payment> {
        self.payments.lock().clone()
    }
}

#[async_trait]
impl ActorRole for Cashier {
    fn group(&self) -> &str {
        CASHIER
    }

    async fn init(&self, actor: &Actor) -> Result<(), BehaviorError> {
        let payments = self.payments.clone();
        actor.register_behavior(
            REQUEST_PAYMENT,
            behavior(move |event, handling| {
                let payments = payments.clone();
                async move {
                    let amount = payload_u64(&event, AMOUNT)?;
                    if amount == 0 {
                        return Err(RetailError::InvalidAmount(amount).into());
                    }
                    let actor = handling.actor();
                    let number = actor.tickets().next(RECEIPT_SEQUENCE, |_| 0).await?;
                    let payment = Payment {
                        receipt: format!("R-{number:06}"),
                        customer: event.from().to_string(),
                        amount,
                    };
                    payments.lock().push(payment.clone());
                    actor.memory().remember_occurrence("payment", &payment)?;
                    info!(actor = actor.name(), receipt = %payment.receipt, amount, "Payment taken");

                    actor
                        .reply_with(&event, |reply| reply.with_payload(RECEIPT, payment.receipt.clone()))
                        .await?;
                    Ok(())
                }
            }),
        );
        Ok(())
    }
}
