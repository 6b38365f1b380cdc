//! Storage abstraction for Radio Cortex.
//!
//! [`ItemStore`] is the durable record of every item and the single source
//! of truth for its status. [`VectorIndex`] holds one embedding per item.
//! Both are implemented by the SQLite store in the app crate and by
//! [`memory::InMemoryStore`] here.
//!
//! # The transition contract
//!
//! [`ItemStore::compare_and_transition`] is the only way status and lease
//! fields change. An implementation must apply it atomically:
//!
//! 1. The edge `expected -> transition.to` must be in the status graph,
//!    otherwise [`StoreError::InvalidTransition`].
//! 2. The item must exist, otherwise [`StoreError::NotFound`].
//! 3. The item must still be in `expected` and satisfy the [`LeaseGuard`],
//!    otherwise [`StoreError::Conflict`] and nothing is written.
//! 4. Status, lease, attempts, not-before, last error, the field patch and
//!    (for an embedding patch) the vector are written together, and
//!    `updated_at` is set to `now`.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Capability, Item, ItemPatch, NewItem, Status};
use crate::search::SimilarityHit;

/// Lease precondition checked by [`ItemStore::compare_and_transition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseGuard {
    /// No active lease and the not-before window has passed. Used to claim.
    Claimable,
    /// No active lease, regardless of not-before. Used by operator requeue.
    Unleased,
    /// The lease is held by this owner.
    HeldBy(String),
}

impl LeaseGuard {
    /// Evaluate the guard against an item's current lease fields.
    pub fn admits(&self, item: &Item, now: i64) -> bool {
        match self {
            LeaseGuard::Claimable => !item.has_active_lease(now) && item.is_eligible(now),
            LeaseGuard::Unleased => !item.has_active_lease(now),
            LeaseGuard::HeldBy(owner) => item.lease_owner.as_deref() == Some(owner.as_str()),
        }
    }
}

/// What a transition does to the lease fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseChange {
    Keep,
    Grant {
        owner: String,
        acquired_at: i64,
        expires_at: i64,
    },
    Clear,
}

/// What a transition does to the per-stage attempt counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptChange {
    Keep,
    Increment(Capability),
    Reset(Capability),
}

/// A status change plus everything that must be written with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub to: Status,
    pub lease: LeaseChange,
    pub attempts: AttemptChange,
    /// Always written; `None` clears any backoff.
    pub not_before: Option<i64>,
    /// `Some` replaces the stored error, `None` leaves it.
    pub last_error: Option<String>,
    pub patch: ItemPatch,
}

impl Transition {
    /// Claim an item in place: same status, lease granted.
    pub fn claim(status: Status, owner: &str, acquired_at: i64, expires_at: i64) -> Self {
        Self {
            to: status,
            lease: LeaseChange::Grant {
                owner: owner.to_string(),
                acquired_at,
                expires_at,
            },
            attempts: AttemptChange::Keep,
            not_before: None,
            last_error: None,
            patch: ItemPatch::default(),
        }
    }

    /// Move forward on success, resetting the stage's attempt count.
    pub fn advance(to: Status, capability: Capability, patch: ItemPatch) -> Self {
        Self {
            to,
            lease: LeaseChange::Clear,
            attempts: AttemptChange::Reset(capability),
            not_before: None,
            last_error: None,
            patch,
        }
    }

    /// Return to the input status after a retryable failure.
    pub fn retry(status: Status, capability: Capability, not_before: i64, error: String) -> Self {
        Self {
            to: status,
            lease: LeaseChange::Clear,
            attempts: AttemptChange::Increment(capability),
            not_before: Some(not_before),
            last_error: Some(error),
            patch: ItemPatch::default(),
        }
    }

    /// Move to the stage's failed status.
    pub fn fail(to: Status, capability: Capability, error: String) -> Self {
        Self {
            to,
            lease: LeaseChange::Clear,
            attempts: AttemptChange::Increment(capability),
            not_before: None,
            last_error: Some(error),
            patch: ItemPatch::default(),
        }
    }

    /// Move to `rejected` with the reason recorded as the last error.
    pub fn reject(reason: String) -> Self {
        Self {
            to: Status::Rejected,
            lease: LeaseChange::Clear,
            attempts: AttemptChange::Keep,
            not_before: None,
            last_error: Some(reason),
            patch: ItemPatch::default(),
        }
    }

    /// Operator requeue out of a failed status, with a fresh attempt budget.
    pub fn requeue(to: Status, capability: Capability) -> Self {
        Self {
            to,
            lease: LeaseChange::Clear,
            attempts: AttemptChange::Reset(capability),
            not_before: None,
            last_error: None,
            patch: ItemPatch::default(),
        }
    }

    /// Apply every field of the transition to an in-memory item.
    ///
    /// Guards are not checked here; callers do that first.
    pub fn apply_to(&self, item: &mut Item, now: i64) {
        item.status = self.to;
        match &self.lease {
            LeaseChange::Keep => {}
            LeaseChange::Grant {
                owner,
                acquired_at,
                expires_at,
            } => {
                item.lease_owner = Some(owner.clone());
                item.lease_acquired_at = Some(*acquired_at);
                item.lease_expires_at = Some(*expires_at);
            }
            LeaseChange::Clear => {
                item.lease_owner = None;
                item.lease_acquired_at = None;
                item.lease_expires_at = None;
            }
        }
        match self.attempts {
            AttemptChange::Keep => {}
            AttemptChange::Increment(cap) => {
                *item.attempts.entry(cap).or_insert(0) += 1;
            }
            AttemptChange::Reset(cap) => {
                item.attempts.remove(&cap);
            }
        }
        item.not_before = self.not_before;
        if let Some(err) = &self.last_error {
            item.last_error = Some(err.clone());
        }
        self.patch.apply_to(item);
        item.updated_at = now;
    }
}

/// Durable item records and the atomic transition primitive.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Insert a new item in `discovered`. Fails with `Duplicate` when the
    /// fingerprint is already stored.
    async fn insert(&self, new: NewItem, now: i64) -> Result<Item, StoreError>;

    async fn get(&self, id: &str) -> Result<Item, StoreError>;

    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Item>, StoreError>;

    /// Items in `status`, oldest `updated_at` first.
    async fn list_by_status(&self, status: Status, limit: usize) -> Result<Vec<Item>, StoreError>;

    /// Items in any status, most recently updated first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<Item>, StoreError>;

    async fn count_by_status(&self) -> Result<BTreeMap<Status, u64>, StoreError>;

    async fn count_active_leases(&self, now: i64) -> Result<u64, StoreError>;

    /// Claim candidates: in `status`, no active lease, not-before passed,
    /// oldest `updated_at` first.
    async fn claimable(&self, status: Status, now: i64, limit: usize)
        -> Result<Vec<Item>, StoreError>;

    /// See the module docs for the full contract.
    async fn compare_and_transition(
        &self,
        id: &str,
        expected: Status,
        guard: &LeaseGuard,
        transition: &Transition,
        now: i64,
    ) -> Result<Item, StoreError>;

    /// Clear a lease early without changing status. `Conflict` unless
    /// `owner` holds it.
    async fn release_lease(&self, id: &str, owner: &str) -> Result<(), StoreError>;

    /// Clear every lease whose expiry is at or before `now`.
    async fn clear_expired_leases(&self, now: i64) -> Result<u64, StoreError>;
}

/// One fixed-dimension embedding per item, queried by cosine similarity.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn dims(&self) -> usize;

    /// Replace the item's vector. Returns the new version (1 on first write).
    async fn upsert_vector(
        &self,
        item_id: &str,
        vector: &[f32],
        model: &str,
        now: i64,
    ) -> Result<u64, StoreError>;

    /// Returns `false` when the item had no vector.
    async fn remove_vector(&self, item_id: &str) -> Result<bool, StoreError>;

    async fn vector_version(&self, item_id: &str) -> Result<Option<u64>, StoreError>;

    async fn vector_count(&self) -> Result<u64, StoreError>;

    /// Top-`k` approved items by cosine similarity to `vector`.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SimilarityHit>, StoreError>;
}

/// A store that is both the item record and the vector index.
pub trait CatalogStore: ItemStore + VectorIndex {
    fn as_item_store(&self) -> &dyn ItemStore;
}

impl<T: ItemStore + VectorIndex> CatalogStore for T {
    fn as_item_store(&self) -> &dyn ItemStore {
        self
    }
}
