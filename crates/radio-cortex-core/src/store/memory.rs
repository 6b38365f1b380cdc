//! In-memory [`ItemStore`] and [`VectorIndex`] for tests.
//!
//! All state sits behind one `std::sync::RwLock`, so every
//! compare-and-transition runs under a single write lock and is atomic
//! with respect to every other call. Vector queries are a brute-force
//! cosine scan.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Item, NewItem, Status};
use crate::pipeline::is_valid_edge;
use crate::search::{check_dims, cosine_similarity, rank_hits, SimilarityHit};

use super::{ItemStore, LeaseGuard, Transition, VectorIndex};

struct StoredVector {
    vector: Vec<f32>,
    _model: String,
    version: u64,
}

#[derive(Default)]
struct State {
    items: HashMap<String, Item>,
    by_fingerprint: HashMap<String, String>,
    vectors: HashMap<String, StoredVector>,
}

impl State {
    fn write_vector(&mut self, item_id: &str, vector: &[f32], model: &str) -> u64 {
        let version = self.vectors.get(item_id).map(|v| v.version + 1).unwrap_or(1);
        self.vectors.insert(
            item_id.to_string(),
            StoredVector {
                vector: vector.to_vec(),
                _model: model.to_string(),
                version,
            },
        );
        version
    }
}

/// In-memory store for tests.
pub struct InMemoryStore {
    dims: usize,
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            state: RwLock::new(State::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("in-memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("in-memory store lock poisoned".into()))
    }
}

fn oldest_first(a: &Item, b: &Item) -> std::cmp::Ordering {
    a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id))
}

#[async_trait]
impl ItemStore for InMemoryStore {
    async fn insert(&self, new: NewItem, now: i64) -> Result<Item, StoreError> {
        let mut state = self.write()?;
        let fingerprint = new.fingerprint();
        if state.by_fingerprint.contains_key(&fingerprint) {
            return Err(StoreError::Duplicate(fingerprint));
        }
        let item = Item::from_new(uuid::Uuid::new_v4().to_string(), new, now);
        state
            .by_fingerprint
            .insert(fingerprint, item.id.clone());
        state.items.insert(item.id.clone(), item.clone());
        Ok(item)
    }

    async fn get(&self, id: &str) -> Result<Item, StoreError> {
        self.read()?
            .items
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Item>, StoreError> {
        let state = self.read()?;
        Ok(state
            .by_fingerprint
            .get(fingerprint)
            .and_then(|id| state.items.get(id))
            .cloned())
    }

    async fn list_by_status(&self, status: Status, limit: usize) -> Result<Vec<Item>, StoreError> {
        let state = self.read()?;
        let mut items: Vec<Item> = state
            .items
            .values()
            .filter(|item| item.status == status)
            .cloned()
            .collect();
        items.sort_by(oldest_first);
        items.truncate(limit);
        Ok(items)
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Item>, StoreError> {
        let state = self.read()?;
        let mut items: Vec<Item> = state.items.values().cloned().collect();
        items.sort_by(|a, b| oldest_first(b, a));
        items.truncate(limit);
        Ok(items)
    }

    async fn count_by_status(&self) -> Result<BTreeMap<Status, u64>, StoreError> {
        let state = self.read()?;
        let mut counts = BTreeMap::new();
        for item in state.items.values() {
            *counts.entry(item.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn count_active_leases(&self, now: i64) -> Result<u64, StoreError> {
        let state = self.read()?;
        Ok(state
            .items
            .values()
            .filter(|item| item.has_active_lease(now))
            .count() as u64)
    }

    async fn claimable(
        &self,
        status: Status,
        now: i64,
        limit: usize,
    ) -> Result<Vec<Item>, StoreError> {
        let state = self.read()?;
        let mut items: Vec<Item> = state
            .items
            .values()
            .filter(|item| item.status == status && LeaseGuard::Claimable.admits(item, now))
            .cloned()
            .collect();
        items.sort_by(oldest_first);
        items.truncate(limit);
        Ok(items)
    }

    async fn compare_and_transition(
        &self,
        id: &str,
        expected: Status,
        guard: &LeaseGuard,
        transition: &Transition,
        now: i64,
    ) -> Result<Item, StoreError> {
        if !is_valid_edge(expected, transition.to) {
            return Err(StoreError::InvalidTransition {
                from: expected,
                to: transition.to,
            });
        }
        if let Some(embedding) = &transition.patch.embedding {
            check_dims(self.dims, &embedding.vector)?;
        }

        let mut state = self.write()?;
        let item = state
            .items
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if item.status != expected || !guard.admits(item, now) {
            return Err(StoreError::Conflict {
                id: id.to_string(),
                expected,
            });
        }
        transition.apply_to(item, now);
        let updated = item.clone();

        if let Some(embedding) = &transition.patch.embedding {
            state.write_vector(id, &embedding.vector, &embedding.model);
        }
        Ok(updated)
    }

    async fn release_lease(&self, id: &str, owner: &str) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let item = state
            .items
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if item.lease_owner.as_deref() != Some(owner) {
            return Err(StoreError::Conflict {
                id: id.to_string(),
                expected: item.status,
            });
        }
        item.lease_owner = None;
        item.lease_acquired_at = None;
        item.lease_expires_at = None;
        Ok(())
    }

    async fn clear_expired_leases(&self, now: i64) -> Result<u64, StoreError> {
        let mut state = self.write()?;
        let mut cleared = 0;
        for item in state.items.values_mut() {
            let expired = item.lease_owner.is_some()
                && item.lease_expires_at.map(|e| e <= now).unwrap_or(false);
            if expired {
                item.lease_owner = None;
                item.lease_acquired_at = None;
                item.lease_expires_at = None;
                cleared += 1;
            }
        }
        Ok(cleared)
    }
}

#[async_trait]
impl VectorIndex for InMemoryStore {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn upsert_vector(
        &self,
        item_id: &str,
        vector: &[f32],
        model: &str,
        now: i64,
    ) -> Result<u64, StoreError> {
        check_dims(self.dims, vector)?;
        let mut state = self.write()?;
        let item = state
            .items
            .get_mut(item_id)
            .ok_or_else(|| StoreError::NotFound(item_id.to_string()))?;
        item.embedding = Some(vector.to_vec());
        item.updated_at = now;
        Ok(state.write_vector(item_id, vector, model))
    }

    async fn remove_vector(&self, item_id: &str) -> Result<bool, StoreError> {
        let mut state = self.write()?;
        if let Some(item) = state.items.get_mut(item_id) {
            item.embedding = None;
        }
        Ok(state.vectors.remove(item_id).is_some())
    }

    async fn vector_version(&self, item_id: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.read()?.vectors.get(item_id).map(|v| v.version))
    }

    async fn vector_count(&self) -> Result<u64, StoreError> {
        Ok(self.read()?.vectors.len() as u64)
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SimilarityHit>, StoreError> {
        check_dims(self.dims, vector)?;
        let state = self.read()?;
        let hits = state
            .vectors
            .iter()
            .filter_map(|(id, stored)| {
                let item = state.items.get(id)?;
                item.status.is_searchable().then(|| SimilarityHit {
                    item_id: id.clone(),
                    score: cosine_similarity(vector, &stored.vector),
                    updated_at: item.updated_at,
                })
            })
            .collect();
        Ok(rank_hits(hits, k))
    }
}
