//! The status graph and the capability authorized to walk each edge.
//!
//! ```text
//!  discovered ──collect──▶ pending_enrichment ──enrich──▶ pending_compliance ──validate──▶ approved
//!      │                         │                              │    └──────validate──────▶ rejected
//!      ▼                         ▼                              ▼
//!  discovered_failed   pending_enrichment_failed   pending_compliance_failed
//! ```
//!
//! Every non-terminal status also has a self-edge owned by its capability;
//! claims and requeue-on-failure travel along it. The only backward edges
//! are operator requeues out of a `*_failed` status, which no agent may
//! execute.

use crate::error::StoreError;
use crate::models::{Capability, Status};

/// Who may execute an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Agent(Capability),
    Operator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub from: Status,
    pub to: Status,
    pub actor: Actor,
}

const fn agent(from: Status, to: Status, cap: Capability) -> Edge {
    Edge {
        from,
        to,
        actor: Actor::Agent(cap),
    }
}

const fn operator(from: Status, to: Status) -> Edge {
    Edge {
        from,
        to,
        actor: Actor::Operator,
    }
}

const EDGES: &[Edge] = &[
    agent(Status::Discovered, Status::Discovered, Capability::Collect),
    agent(Status::Discovered, Status::PendingEnrichment, Capability::Collect),
    agent(Status::Discovered, Status::DiscoveredFailed, Capability::Collect),
    agent(Status::PendingEnrichment, Status::PendingEnrichment, Capability::Enrich),
    agent(Status::PendingEnrichment, Status::PendingCompliance, Capability::Enrich),
    agent(Status::PendingEnrichment, Status::PendingEnrichmentFailed, Capability::Enrich),
    agent(Status::PendingCompliance, Status::PendingCompliance, Capability::Validate),
    agent(Status::PendingCompliance, Status::Approved, Capability::Validate),
    agent(Status::PendingCompliance, Status::Rejected, Capability::Validate),
    agent(Status::PendingCompliance, Status::PendingComplianceFailed, Capability::Validate),
    operator(Status::DiscoveredFailed, Status::Discovered),
    operator(Status::PendingEnrichmentFailed, Status::PendingEnrichment),
    operator(Status::PendingComplianceFailed, Status::PendingCompliance),
];

/// All edges of the graph.
pub fn edges() -> &'static [Edge] {
    EDGES
}

/// True when `from -> to` is an edge of the graph.
pub fn is_valid_edge(from: Status, to: Status) -> bool {
    EDGES.iter().any(|e| e.from == from && e.to == to)
}

/// The status a capability consumes.
pub fn input_status(capability: Capability) -> Status {
    match capability {
        Capability::Collect => Status::Discovered,
        Capability::Enrich => Status::PendingEnrichment,
        Capability::Validate => Status::PendingCompliance,
    }
}

/// Where a successful run of the capability moves an item.
pub fn success_status(capability: Capability) -> Status {
    match capability {
        Capability::Collect => Status::PendingEnrichment,
        Capability::Enrich => Status::PendingCompliance,
        Capability::Validate => Status::Approved,
    }
}

/// The stage's terminal failure status.
pub fn failed_status(capability: Capability) -> Status {
    match capability {
        Capability::Collect => Status::DiscoveredFailed,
        Capability::Enrich => Status::PendingEnrichmentFailed,
        Capability::Validate => Status::PendingComplianceFailed,
    }
}

/// The stage's rejection status, if it has one.
pub fn rejected_status(capability: Capability) -> Option<Status> {
    match capability {
        Capability::Validate => Some(Status::Rejected),
        _ => None,
    }
}

/// The capability whose edges leave `status`, if any.
pub fn owning_capability(status: Status) -> Option<Capability> {
    EDGES.iter().find_map(|e| match e.actor {
        Actor::Agent(cap) if e.from == status => Some(cap),
        _ => None,
    })
}

/// Fail fast unless `capability` owns an edge out of `status`.
pub fn authorize(capability: Capability, status: Status) -> Result<(), StoreError> {
    let owned = EDGES
        .iter()
        .any(|e| e.from == status && e.actor == Actor::Agent(capability));
    if owned {
        Ok(())
    } else {
        Err(StoreError::Capability { capability, status })
    }
}

/// Fail unless `capability` may execute `from -> to`.
pub fn authorize_edge(capability: Capability, from: Status, to: Status) -> Result<(), StoreError> {
    let edge = EDGES.iter().find(|e| e.from == from && e.to == to);
    match edge {
        Some(e) if e.actor == Actor::Agent(capability) => Ok(()),
        Some(_) => Err(StoreError::Capability {
            capability,
            status: from,
        }),
        None => Err(StoreError::InvalidTransition { from, to }),
    }
}

/// The status an operator requeue returns a failed item to.
pub fn requeue_target(failed: Status) -> Option<Status> {
    EDGES
        .iter()
        .find(|e| e.from == failed && e.actor == Actor::Operator)
        .map(|e| e.to)
}
