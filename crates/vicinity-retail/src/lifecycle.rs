//! # Retail System
//!
//! Starts one Merchant, one Cashier and one Customer over a shared fabric and keeps
//! the role handles around so callers can inspect stock and payments.

use std::sync::Arc;

use vicinity::actor::Actor;
use vicinity::config::VicinityConfig;
use vicinity::error::VicinityError;
use vicinity::fabric::Fabric;
use vicinity::lifecycle::ActorSystem;
use vicinity::security::SecurityContext;

use crate::model::StockItem;
use crate::roles::{Cashier, Customer, Merchant};

pub struct RetailSystem {
    pub merchant: Arc<Merchant>,
    pub cashier: Arc<Cashier>,

    /// Actor handle of the customer instance
    pub customer: Actor,

    system: ActorSystem,
}

impl RetailSystem {
    /// Starts the three roles, services first.
    pub async fn start<I, S>(
        fabric: Arc<dyn Fabric>,
        config: VicinityConfig,
        security: SecurityContext,
        stock: I,
    ) -> Result<Self, VicinityError>
    where
        I: IntoIterator<Item = (S, StockItem)>,
        S: Into<String>,
    {
        let system = ActorSystem::new(fabric, config, security);
        let merchant = Arc::new(Merchant::with_stock(stock));
        let cashier = Arc::new(Cashier::default());

        system.spawn(merchant.clone()).await?;
        system.spawn(cashier.clone()).await?;
        let customer = system.spawn(Arc::new(Customer)).await?;

        Ok(Self {
            merchant,
            cashier,
            customer,
            system,
        })
    }

    pub fn system(&self) -> &ActorSystem {
        &self.system
    }

    pub async fn shutdown(self) -> Result<(), String> {
        self.system.shutdown().await
    }
}
