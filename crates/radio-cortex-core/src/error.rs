//! Error taxonomy shared by every store and by the lease protocol.
//!
//! Callers branch on these variants: `Duplicate` is a skip signal at
//! collection time, `Conflict` and `NotFound` mean "someone else handled
//! it, move on", `Schema` is a configuration bug and is never retried.
//! [`CollaboratorError`] is the narrower vocabulary external services use
//! to tell the agent runner whether a failure is worth retrying.

use thiserror::Error;

use crate::models::{Capability, Status};

/// Errors surfaced by [`ItemStore`](crate::store::ItemStore) and
/// [`VectorIndex`](crate::store::VectorIndex) implementations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    /// An item with the same fingerprint is already stored.
    #[error("duplicate item: fingerprint {0} already stored")]
    Duplicate(String),

    /// The item was not in the expected status or lease state.
    #[error("conflict on item {id}: expected status {expected} no longer holds")]
    Conflict { id: String, expected: Status },

    /// The referenced item does not exist.
    #[error("item not found: {0}")]
    NotFound(String),

    /// Vector dimensionality does not match the index.
    #[error("schema error: expected {expected}-dimensional vector, got {actual}")]
    Schema { expected: usize, actual: usize },

    /// The requested edge is not part of the status graph.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: Status, to: Status },

    /// A capability tried to consume a status it does not own.
    #[error("capability '{capability}' is not authorized to consume status '{status}'")]
    Capability { capability: Capability, status: Status },

    /// Underlying storage failure (I/O, SQL, lock poisoning).
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// True for the two outcomes a runner treats as "lost the item".
    pub fn is_lost_item(&self) -> bool {
        matches!(self, StoreError::Conflict { .. } | StoreError::NotFound(_))
    }
}

/// Failure reported by an external collaborator (fetcher, classifier,
/// embedder). The variant decides whether the runner retries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// Rate limit, server error, timeout, network blip.
    #[error("{0}")]
    Retryable(String),
    /// Bad input or a permanent refusal; retrying cannot help.
    #[error("{0}")]
    Terminal(String),
}

impl CollaboratorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CollaboratorError::Retryable(_))
    }
}

/// Returned when parsing an enum from its wire name fails.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("unknown {kind}: '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}
