//! Agents: the per-capability work done on a leased item.
//!
//! An [`Agent`] sees one item at a time and reports an [`Outcome`]. It
//! never touches status or leases itself; the
//! [`AgentRunner`](crate::runner::AgentRunner) turns the outcome into the
//! right transition and commits it.
//!
//! ```text
//!   discovered ──collect──▶ pending_enrichment ──enrich──▶ pending_compliance
//!        │                          │                          │      │
//!        ▼                          ▼                          ▼      ▼
//!  discovered_failed   pending_enrichment_failed   approved  rejected / *_failed
//! ```
//!
//! | Capability | Agent                         | Collaborators                     |
//! |------------|-------------------------------|-----------------------------------|
//! | `collect`  | [`collector::CollectorAgent`] | [`collector::MediaFetcher`]       |
//! | `enrich`   | [`enricher::EnricherAgent`]   | [`Classifier`], [`Embedder`]      |
//! | `validate` | [`validator::ValidatorAgent`] | compliance policy from config     |
//!
//! [`Classifier`]: crate::classify::Classifier
//! [`Embedder`]: crate::embedding::Embedder

pub mod collector;
pub mod enricher;
pub mod validator;

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use radio_cortex_core::error::CollaboratorError;
use radio_cortex_core::models::{Capability, Item, ItemPatch};

use crate::classify::create_classifier;
use crate::config::Config;
use crate::embedding::create_embedder;

/// What processing one item produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Advance to the capability's next status with these field changes.
    Success(ItemPatch),
    /// Policy refusal. Only meaningful for `validate`; other capabilities
    /// treat it as terminal.
    Rejected(String),
    /// Worth another attempt after backoff.
    Retryable(String),
    /// Give up on this stage.
    Terminal(String),
}

impl From<CollaboratorError> for Outcome {
    fn from(err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::Retryable(msg) => Outcome::Retryable(msg),
            CollaboratorError::Terminal(msg) => Outcome::Terminal(msg),
        }
    }
}

/// Work performed on a leased item for one capability.
#[async_trait]
pub trait Agent: Send + Sync {
    fn capability(&self) -> Capability;

    /// Process one item. Must not persist anything; the runner commits.
    async fn process(&self, item: &Item) -> Outcome;
}

/// Build the agent for `capability` from configuration.
///
/// `vector_dims` is the dimensionality of the vector index; an enricher
/// whose embedder disagrees is refused here rather than failing every
/// item later.
pub fn create_agent(
    config: &Config,
    capability: Capability,
    vector_dims: usize,
) -> Result<Arc<dyn Agent>> {
    let agent: Arc<dyn Agent> = match capability {
        Capability::Collect => Arc::new(collector::CollectorAgent::new(
            collector::create_fetcher(&config.fetcher)?,
        )),
        Capability::Enrich => {
            let embedder = create_embedder(&config.embedding)?;
            if embedder.dims() != vector_dims {
                bail!(
                    "embedder '{}' produces {}-dimensional vectors but the index holds {}",
                    embedder.model_name(),
                    embedder.dims(),
                    vector_dims
                );
            }
            Arc::new(enricher::EnricherAgent::new(
                create_classifier(&config.classifier)?,
                embedder,
            ))
        }
        Capability::Validate => Arc::new(validator::ValidatorAgent::new(config.compliance.clone())),
    };
    Ok(agent)
}
