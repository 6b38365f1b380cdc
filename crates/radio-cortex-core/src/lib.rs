//! # Radio Cortex Core
//!
//! Runtime-agnostic logic for Radio Cortex: the item model, the status
//! graph that every agent follows, the store and vector-index traits,
//! fingerprinting for dedup, license parsing, and similarity ranking.
//!
//! This crate contains no tokio, sqlx, network, or filesystem
//! dependencies. The SQLite store, the agent runner, and all external
//! collaborators live in the `radio-cortex` app crate.

pub mod clock;
pub mod dedup;
pub mod error;
pub mod license;
pub mod models;
pub mod pipeline;
pub mod search;
pub mod store;
