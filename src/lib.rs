//! # Radio Cortex
//!
//! A leased multi-agent pipeline for a catalog of openly licensed music.
//!
//! Candidates come in from configured sources, then independent agent
//! processes claim them with time-bounded leases and move each one through
//! the status graph defined in [`radio_cortex_core::pipeline`]. Approved
//! items carry an embedding and are searchable by similarity.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────────────────────┐   ┌──────────┐
//! │ Sources  │──▶│ discovered → pending_* → ...  │──▶│  SQLite  │
//! │ (JSONL)  │   │  collect · enrich · validate  │   │ items +  │
//! └──────────┘   │  (leases, CAS commits)        │   │ vectors  │
//!                └───────────────────────────────┘   └────┬─────┘
//!                                                         │
//!                                    ┌────────────────────┤
//!                                    ▼                    ▼
//!                               ┌──────────┐        ┌──────────┐
//!                               │   CLI    │        │   HTTP   │
//!                               │ (cortex) │        │ (axum)   │
//!                               └──────────┘        └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the store traits |
//! | [`lease`] | Claim, release, commit and sweep for one owner |
//! | [`runner`] | The claim → process → commit loop |
//! | [`agents`] | Collect, enrich and validate agents |
//! | [`classify`] | Category and mood classifiers |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`http`] | Shared HTTP client helpers for collaborators |
//! | [`collect`] | Source intake and normalization |
//! | [`requeue`] | Operator repair of failed items |
//! | [`get`] | Item lookup and listing |
//! | [`search`] | Similarity search |
//! | [`stats`] | Catalog statistics |
//! | [`server`] | Read-only HTTP API |

pub mod agents;
pub mod classify;
pub mod collect;
pub mod config;
pub mod db;
pub mod embedding;
pub mod get;
pub mod http;
pub mod lease;
pub mod migrate;
pub mod requeue;
pub mod runner;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod stats;
