//! Lease manager: exclusive, time-bounded claims over items.
//!
//! A lease is nothing more than the `lease_*` fields on an item, written
//! through [`ItemStore::compare_and_transition`]. Two runners that pick
//! the same candidate race on that single guarded write and exactly one
//! wins; the loser skips the item silently.

use std::sync::Arc;
use std::time::Duration;

use radio_cortex_core::clock::{duration_millis, Clock};
use radio_cortex_core::error::StoreError;
use radio_cortex_core::models::{Capability, Item, Lease, Status};
use radio_cortex_core::pipeline;
use radio_cortex_core::store::{CatalogStore, LeaseGuard, Transition};
use tracing::{debug, info};

pub struct LeaseManager {
    store: Arc<dyn CatalogStore>,
    clock: Arc<dyn Clock>,
    owner: String,
}

impl LeaseManager {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        clock: Arc<dyn Clock>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            owner: owner.into(),
        }
    }

    /// Identity written into `lease_owner` for every claim this manager makes.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Claim up to `batch_size` items in `status`, oldest first.
    ///
    /// Fails with `Capability` before touching the store when `capability`
    /// may not consume `status`. Candidates lost to another runner between
    /// selection and claim are skipped, so fewer than `batch_size` leases
    /// can come back even when more items are waiting.
    pub async fn acquire(
        &self,
        capability: Capability,
        status: Status,
        batch_size: usize,
        lease_duration: Duration,
    ) -> Result<Vec<Lease>, StoreError> {
        pipeline::authorize(capability, status)?;
        if batch_size == 0 {
            return Ok(Vec::new());
        }

        let now = self.clock.now_millis();
        // Over-select a little so a few lost races still fill the batch.
        let candidates = self
            .store
            .claimable(status, now, batch_size.saturating_mul(2))
            .await?;

        let expires_at = now.saturating_add(duration_millis(lease_duration));
        let claim = Transition::claim(status, &self.owner, now, expires_at);
        let mut leases = Vec::with_capacity(batch_size);

        for candidate in candidates {
            if leases.len() == batch_size {
                break;
            }
            match self
                .store
                .compare_and_transition(&candidate.id, status, &LeaseGuard::Claimable, &claim, now)
                .await
            {
                Ok(item) => leases.push(Lease {
                    item,
                    owner: self.owner.clone(),
                    acquired_at: now,
                    expires_at,
                }),
                Err(e) if e.is_lost_item() => {
                    debug!(
                        item_id = %candidate.id,
                        owner = %self.owner,
                        "claim lost to another runner"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Ok(leases)
    }

    /// Give a lease back without changing the item's status.
    pub async fn release(&self, lease: &Lease) -> Result<(), StoreError> {
        self.store.release_lease(lease.item_id(), &lease.owner).await
    }

    /// Clear every lease past its expiry. Returns how many were cleared.
    pub async fn expire_sweep(&self) -> Result<u64, StoreError> {
        let cleared = self
            .store
            .clear_expired_leases(self.clock.now_millis())
            .await?;
        if cleared > 0 {
            info!(cleared, "expired leases cleared");
        }
        Ok(cleared)
    }

    /// Apply the final transition for a leased item, guarded by ownership.
    /// The lease is cleared by the same atomic write.
    pub async fn commit(
        &self,
        capability: Capability,
        lease: &Lease,
        transition: &Transition,
    ) -> Result<Item, StoreError> {
        let from = lease.item.status;
        pipeline::authorize_edge(capability, from, transition.to)?;
        self.store
            .compare_and_transition(
                lease.item_id(),
                from,
                &LeaseGuard::HeldBy(lease.owner.clone()),
                transition,
                self.clock.now_millis(),
            )
            .await
    }
}

/// `cortex sweep`
pub async fn run_sweep(store: Arc<dyn CatalogStore>, clock: Arc<dyn Clock>) -> anyhow::Result<()> {
    let cleared = LeaseManager::new(store, clock, "sweeper").expire_sweep().await?;
    println!("cleared {} expired lease(s)", cleared);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use radio_cortex_core::clock::ManualClock;
    use radio_cortex_core::license::LicenseKind;
    use radio_cortex_core::models::{ItemPatch, NewItem};
    use radio_cortex_core::store::memory::InMemoryStore;
    use radio_cortex_core::store::ItemStore;

    fn candidate(n: usize) -> NewItem {
        NewItem {
            source: "test".into(),
            source_id: n.to_string(),
            title: format!("track {n}"),
            artist: None,
            album: None,
            duration_secs: Some(120),
            license_raw: None,
            license_kind: LicenseKind::CcBy,
            source_url: format!("https://example.org/{n}"),
            media_url: None,
            collected_by: "test".into(),
        }
    }

    async fn seeded(n: usize) -> (Arc<InMemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(InMemoryStore::new(4));
        for i in 0..n {
            store.insert(candidate(i), i as i64).await.unwrap();
        }
        (store, ManualClock::new(1_000))
    }

    #[tokio::test]
    async fn test_acquire_rejects_unowned_status() {
        let (store, clock) = seeded(1).await;
        let leases = LeaseManager::new(store, clock, "w1");
        let err = leases
            .acquire(Capability::Enrich, Status::Discovered, 5, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Capability { .. }));
    }

    #[tokio::test]
    async fn test_acquire_is_oldest_first_and_bounded() {
        let (store, clock) = seeded(5).await;
        let leases = LeaseManager::new(store, clock, "w1");
        let got = leases
            .acquire(Capability::Collect, Status::Discovered, 3, Duration::from_secs(60))
            .await
            .unwrap();
        let titles: Vec<_> = got.iter().map(|l| l.item.title.as_str()).collect();
        assert_eq!(titles, ["track 0", "track 1", "track 2"]);
        assert!(got.iter().all(|l| l.expires_at == 61_000));
    }

    #[tokio::test]
    async fn test_two_managers_never_share_an_item() {
        let (store, clock) = seeded(4).await;
        let a = LeaseManager::new(store.clone(), clock.clone(), "a");
        let b = LeaseManager::new(store.clone(), clock.clone(), "b");
        let ttl = Duration::from_secs(60);

        let (got_a, got_b) = tokio::join!(
            a.acquire(Capability::Collect, Status::Discovered, 4, ttl),
            b.acquire(Capability::Collect, Status::Discovered, 4, ttl)
        );
        let mut ids: Vec<_> = got_a
            .unwrap()
            .into_iter()
            .chain(got_b.unwrap())
            .map(|l| l.item.id)
            .collect();
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(total, 4);
        assert_eq!(ids.len(), 4);
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_reclaimed_after_sweep() {
        let (store, clock) = seeded(1).await;
        let a = LeaseManager::new(store.clone(), clock.clone(), "a");
        let b = LeaseManager::new(store.clone(), clock.clone(), "b");
        let ttl = Duration::from_secs(30);

        let first = a.acquire(Capability::Collect, Status::Discovered, 1, ttl).await.unwrap();
        assert_eq!(first.len(), 1);
        let second = b.acquire(Capability::Collect, Status::Discovered, 1, ttl).await.unwrap();
        assert!(second.is_empty());

        clock.advance(Duration::from_secs(31));
        assert_eq!(b.expire_sweep().await.unwrap(), 1);
        let got = b.acquire(Capability::Collect, Status::Discovered, 1, ttl).await.unwrap();
        assert_eq!(got[0].owner, "b");
    }

    #[tokio::test]
    async fn test_commit_after_losing_lease_is_conflict() {
        let (store, clock) = seeded(1).await;
        let a = LeaseManager::new(store.clone(), clock.clone(), "a");
        let b = LeaseManager::new(store.clone(), clock.clone(), "b");
        let ttl = Duration::from_secs(30);

        let lease_a = a
            .acquire(Capability::Collect, Status::Discovered, 1, ttl)
            .await
            .unwrap()
            .remove(0);
        clock.advance(Duration::from_secs(31));
        b.expire_sweep().await.unwrap();
        let lease_b = b
            .acquire(Capability::Collect, Status::Discovered, 1, ttl)
            .await
            .unwrap()
            .remove(0);

        let advance = Transition::advance(
            Status::PendingEnrichment,
            Capability::Collect,
            ItemPatch::default(),
        );
        let err = a.commit(Capability::Collect, &lease_a, &advance).await.unwrap_err();
        assert!(err.is_lost_item());

        let item = b.commit(Capability::Collect, &lease_b, &advance).await.unwrap();
        assert_eq!(item.status, Status::PendingEnrichment);
        assert!(item.lease_owner.is_none());
    }

    #[tokio::test]
    async fn test_commit_checks_capability_edge() {
        let (store, clock) = seeded(1).await;
        let a = LeaseManager::new(store, clock, "a");
        let lease = a
            .acquire(Capability::Collect, Status::Discovered, 1, Duration::from_secs(30))
            .await
            .unwrap()
            .remove(0);
        let skip = Transition::advance(Status::Approved, Capability::Collect, ItemPatch::default());
        assert!(matches!(
            a.commit(Capability::Collect, &lease, &skip).await,
            Err(StoreError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_release_returns_item_to_pool() {
        let (store, clock) = seeded(1).await;
        let a = LeaseManager::new(store.clone(), clock, "a");
        let lease = a
            .acquire(Capability::Collect, Status::Discovered, 1, Duration::from_secs(30))
            .await
            .unwrap()
            .remove(0);
        a.release(&lease).await.unwrap();
        assert!(store.get(lease.item_id()).await.unwrap().lease_owner.is_none());
    }
}
