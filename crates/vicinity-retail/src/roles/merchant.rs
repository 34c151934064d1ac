use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use vicinity::actor::{behavior, Actor, ActorRole};
use vicinity::coordination::{LockAttempt, Unlock};
use vicinity::error::BehaviorError;

use super::MERCHANT;
use crate::error::RetailError;
use crate::model::{
    payload_str, payload_u64, InventoryReview, StockItem, INVENTORY_TOPIC, PLACE_ORDER, PRODUCT, QUANTITY,
    REVIEW_INVENTORY, TOTAL,
};

/// Items at or below this quantity are reported by the inventory review.
pub const LOW_STOCK: u32 = 2;

/// Sells from an in-process stock list.
#[derive(Default)]
pub struct Merchant {
    stock: Arc<Mutex<HashMap<String, StockItem>>>,
}

impl Merchant {
    pub fn with_stock<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = (S, StockItem)>,
        S: Into<String>,
    {
        let stock = items.into_iter().map(|(name, item)| (name.into(), item)).collect();
        Self {
            stock: Arc::new(Mutex::new(stock)),
        }
    }

    pub fn quantity_of(&self, product: &str) -> Option<u32> {
        self.stock.lock().get(product).map(|item| item.quantity)
    }

    /// Runs the inventory review if this instance wins the `ReviewInventory` lock.
    pub async fn review_inventory(&self, actor: &Actor) -> Result<InventoryReview, RetailError> {
        let attempt = actor
            .lock()
            .attempt_lock(REVIEW_INVENTORY, actor.name(), None)
            .await?;
        if let LockAttempt::Failed = attempt {
            let holder = actor.lock().holder(REVIEW_INVENTORY).await?;
            debug!(actor = actor.name(), ?holder, "Inventory review skipped");
            return Ok(InventoryReview::Skipped { holder });
        }

        let mut low_stock: Vec<String> = self
            .stock
            .lock()
            .iter()
            .filter(|(_, item)| item.quantity <= LOW_STOCK)
            .map(|(name, _)| name.clone())
            .collect();
        low_stock.sort();
        info!(actor = actor.name(), low = low_stock.len(), "Inventory reviewed");

        let posted = async {
            actor.remember("lastReview", &low_stock)?;
            let summary = serde_json::to_string(&low_stock)?;
            actor
                .bulletin_board()
                .post_topic(INVENTORY_TOPIC, actor.name(), summary)
                .await?;
            Ok::<_, RetailError>(())
        }
        .await;

        match actor.lock().unlock(REVIEW_INVENTORY, actor.name()).await {
            Ok(Unlock::Released(_)) => {}
            Ok(other) => warn!(actor = actor.name(), ?other, "Review lock not released"),
            Err(e) => warn!(actor = actor.name(), error = %e, "Review lock not released"),
        }
        posted?;
        Ok(InventoryReview::Completed { low_stock })
    }
}

/// Reserves `quantity` of `product` and returns the order total in cents.
fn reserve(stock: &Mutex<HashMap<String, StockItem>>, product: &str, quantity: u32) -> Result<u64, RetailError> {
    let mut stock = stock.lock();
    let item = stock
        .get_mut(product)
        .ok_or_else(|| RetailError::UnknownProduct(product.to_string()))?;
    if item.quantity < quantity {
        return Err(RetailError::InsufficientStock {
            product: product.to_string(),
            available: item.quantity,
            requested: quantity,
        });
    }
    item.quantity -= quantity;
    Ok(item.price * u64::from(quantity))
}

#[async_trait]
impl ActorRole for Merchant {
    fn group(&self) -> &str {
        MERCHANT
    }

    async fn init(&self, actor: &Actor) -> Result<(), BehaviorError> {
        let stock = self.stock.clone();
        actor.register_behavior(
            PLACE_ORDER,
            behavior(move |event, handling| {
                let stock = stock.clone();
                async move {
                    let product = payload_str(&event, PRODUCT)?.to_string();
                    let quantity = u32::try_from(payload_u64(&event, QUANTITY)?).unwrap_or(u32::MAX);
                    let total = reserve(&stock, &product, quantity)?;
                    info!(actor = handling.actor().name(), %product, quantity, total, "Order reserved");
                    handling
                        .actor()
                        .reply_with(&event, |reply| reply.with_payload(TOTAL, total))
                        .await?;
                    Ok(())
                }
            }),
        );
        Ok(())
    }

    async fn on_30min(&self, actor: &Actor) {
        if let Err(e) = self.review_inventory(actor).await {
            warn!(actor = actor.name(), error = %e, "Inventory review failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_checks_stock() {
        let stock = Mutex::new(HashMap::from([(
            "apples".to_string(),
            StockItem {
                price: 120,
                quantity: 3,
            },
        )]));
        assert_eq!(reserve(&stock, "apples", 2).unwrap(), 240);
        assert!(matches!(
            reserve(&stock, "apples", 2),
            Err(RetailError::InsufficientStock { available: 1, .. })
        ));
        assert!(matches!(reserve(&stock, "pears", 1), Err(RetailError::UnknownProduct(_))));
    }
}
