use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;
use vicinity::actor::{Actor, ActorRole, ErrorHandler, ReplyHandler};
use vicinity::coordination::TasklistDefinition;
use vicinity::error::BehaviorError;
use vicinity::event::Event;
use vicinity::security::generate_request_id;

use super::{CASHIER, CUSTOMER, MERCHANT};
use crate::error::RetailError;
use crate::model::{payload_str, payload_u64, Receipt, AMOUNT, PLACE_ORDER, PRODUCT, QUANTITY, RECEIPT, REQUEST_PAYMENT, TOTAL};

/// Seconds a customer waits for each step of a purchase.
pub const PATIENCE_SECONDS: u64 = 10;

/// Tasklist use case every purchase is tracked under.
pub const PURCHASE: &str = "Purchase";

/// Buys things. Has no behaviors of its own beyond the built-in ones.
#[derive(Default)]
pub struct Customer;

impl Customer {
    /// Orders `quantity` of `product` from any merchant, then pays any cashier.
    ///
    /// Both steps share one request id and are recorded on its `Purchase` tasklist.
    pub async fn purchase(actor: &Actor, product: &str, quantity: u32) -> Result<Receipt, RetailError> {
        let request_id = generate_request_id();
        let order = Event::new(PLACE_ORDER, actor.name())
            .with_request_id(&request_id)
            .to(MERCHANT)
            .with_payload(PRODUCT, product)
            .with_payload(QUANTITY, quantity)
            .requiring_acknowledgement()
            .awaiting_response(PATIENCE_SECONDS);
        let reserved = track(actor, &request_id, order).await?;
        let total = payload_u64(&reserved, TOTAL)?;

        let payment = Event::new(REQUEST_PAYMENT, actor.name())
            .with_request_id(&request_id)
            .to(CASHIER)
            .with_payload(AMOUNT, total)
            .requiring_acknowledgement()
            .awaiting_response(PATIENCE_SECONDS);
        let paid = track(actor, &request_id, payment).await?;
        let receipt = payload_str(&paid, RECEIPT)?.to_string();

        info!(actor = actor.name(), product, quantity, total, %receipt, "Purchase complete");
        Ok(Receipt {
            product: product.to_string(),
            quantity,
            total,
            receipt,
            request_id,
        })
    }
}

/// `ask`, recorded as one task of the request's purchase tasklist.
async fn track(actor: &Actor, request_id: &str, event: Event) -> Result<Event, RetailError> {
    let task = event.event_type().to_string();
    let tasklist = actor.tasklist();
    tasklist.begin_task(request_id, PURCHASE, &task, actor.name()).await?;
    match ask(actor, event).await {
        Ok(reply) => {
            tasklist.end_task(request_id, PURCHASE, &task, actor.name()).await?;
            Ok(reply)
        }
        Err(e) => {
            tasklist
                .record_failure(request_id, PURCHASE, &task, &e.to_string())
                .await?;
            tasklist.handle_finished_tasks(request_id, PURCHASE).await?;
            Err(e)
        }
    }
}

/// Says `event` and returns the correlated reply.
pub async fn ask(actor: &Actor, event: Event) -> Result<Event, RetailError> {
    let event_type = event.event_type().to_string();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let replies = tx.clone();
    let on_reply: ReplyHandler = Box::new(move |reply| {
        let _ = replies.send(Ok(reply.clone()));
        true
    });
    let on_error: ErrorHandler = Box::new(move |error| {
        let _ = tx.send(Err(error.clone()));
        true
    });

    let said = actor.say_with(event, Some(on_reply), Some(on_error)).await?;
    match rx.try_recv() {
        Ok(outcome) => Ok(outcome?),
        Err(_) => Err(RetailError::NoAnswer(format!("{event_type} ({:?})", said.delivery))),
    }
}

#[async_trait]
impl ActorRole for Customer {
    fn group(&self) -> &str {
        CUSTOMER
    }

    async fn init(&self, actor: &Actor) -> Result<(), BehaviorError> {
        let purchase = TasklistDefinition {
            name: PURCHASE.to_string(),
            tasks: vec![PLACE_ORDER.to_string(), REQUEST_PAYMENT.to_string()],
        };
        actor.tasklist().define(PURCHASE, &purchase).await?;
        Ok(())
    }
}
