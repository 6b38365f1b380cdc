//! Operator requeue: send a failed item back to its stage's input status.
//!
//! This is the only backward edge in the graph and no agent may take it.
//! The item's attempt counter for that stage is reset, so it gets the full
//! retry budget again.

use std::sync::Arc;

use anyhow::{bail, Result};
use radio_cortex_core::clock::Clock;
use radio_cortex_core::models::Item;
use radio_cortex_core::pipeline;
use radio_cortex_core::store::{CatalogStore, LeaseGuard, Transition};
use tracing::info;

pub async fn requeue_item(
    store: &dyn CatalogStore,
    clock: Arc<dyn Clock>,
    id: &str,
) -> Result<Item> {
    let item = store.get(id).await?;
    let Some(target) = pipeline::requeue_target(item.status) else {
        bail!(
            "item {} is '{}'; only *_failed items can be requeued",
            id,
            item.status
        );
    };
    let Some(capability) = pipeline::owning_capability(target) else {
        bail!("no capability consumes '{}'", target);
    };

    let updated = store
        .compare_and_transition(
            id,
            item.status,
            &LeaseGuard::Unleased,
            &Transition::requeue(target, capability),
            clock.now_millis(),
        )
        .await?;
    info!(item_id = id, from = %item.status, to = %updated.status, "requeued");
    Ok(updated)
}

/// `cortex requeue <id>`
pub async fn run_requeue(store: &dyn CatalogStore, clock: Arc<dyn Clock>, id: &str) -> Result<()> {
    let item = requeue_item(store, clock, id).await?;
    println!("requeued {} -> {}", item.id, item.status);
    Ok(())
}
