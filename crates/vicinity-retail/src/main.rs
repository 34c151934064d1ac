//! # Vicinity Retail Demo
//!
//! Runs a Merchant, a Cashier and a Customer over an in-process fabric:
//! 1. the Customer orders from whichever Merchant is present and waits for the total,
//! 2. pays whichever Cashier is present and waits for the receipt,
//! 3. the system shuts down, posting Gone for every actor.
//!
//! Configuration comes from the `VICINITY_*` environment variables.

use std::sync::Arc;

use tracing::{error, info, Instrument};
use vicinity::config::VicinityConfig;
use vicinity::fabric::InMemoryFabric;
use vicinity::lifecycle::setup_tracing;
use vicinity::security::{SecurityContext, StaticTokenValidator};
use vicinity_retail::lifecycle::RetailSystem;
use vicinity_retail::model::StockItem;
use vicinity_retail::roles::Customer;

const INTERNAL_TOKEN: &str = "retail-internal";

#[tokio::main]
async fn main() -> Result<(), String> {
    setup_tracing();

    let config = VicinityConfig::from_env().map_err(|e| e.to_string())?;
    let security = SecurityContext::new(Arc::new(StaticTokenValidator::new([INTERNAL_TOKEN])))
        .with_internal_token(INTERNAL_TOKEN);

    info!(project = %config.project, "Starting retail vicinity");
    let retail = RetailSystem::start(
        Arc::new(InMemoryFabric::new()),
        config,
        security,
        [
            ("apples", StockItem { price: 120, quantity: 10 }),
            ("pears", StockItem { price: 95, quantity: 2 }),
        ],
    )
    .await
    .map_err(|e| e.to_string())?;

    let span = tracing::info_span!("purchase");
    let outcome = async {
        info!("Buying apples");
        Customer::purchase(&retail.customer, "apples", 3).await
    }
    .instrument(span)
    .await;

    match outcome {
        Ok(receipt) => info!(receipt = %receipt.receipt, total = receipt.total, "Purchase succeeded"),
        Err(e) => error!(error = %e, "Purchase failed"),
    }
    info!(
        apples_left = retail.merchant.quantity_of("apples"),
        payments = retail.cashier.payments().len(),
        "Books after purchase"
    );

    retail.shutdown().await?;
    info!("Retail vicinity stopped");
    Ok(())
}
