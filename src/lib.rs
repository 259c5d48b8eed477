//! # delta-harvest
//!
//! An incremental harvester for community discussion content (posts and
//! threaded comments) backed by SQLite.
//!
//! The core is a checkpoint/delta engine: per community it decides whether
//! to walk history or resume from a saved position, merges fetched items
//! without duplication, and persists progress so interrupted or repeated
//! runs never redo completed work.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────┐
//! │ ContentSource │──▶│ Fetch Cursor │──▶│  SQLite   │
//! │ (Reddit API)  │   │ + Checkpoint │   │  store    │
//! └──────────────┘   └─────────────┘   └──────────┘
//!                           ▲
//!                    ┌──────┴──────┐
//!                    │ Orchestrator│  per-community state machine
//!                    └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dh init                          # create database
//! dh harvest rust programming      # bounded first harvest
//! dh harvest rust                  # fast delta update
//! dh stats                         # what's in the store
//! dh reset-checkpoint rust         # force first-time behavior
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and env credentials |
//! | [`models`] | Core data types and watermark ordering |
//! | [`source`] | Upstream-source trait and error taxonomy |
//! | [`reddit`] | Reddit OAuth implementation of the source |
//! | [`cursor`] | Newest-first paginated walk with stop conditions |
//! | [`checkpoint`] | Harvest planning, commit, reset |
//! | [`store`] | Atomic upserts and checkpoint rows |
//! | [`harvest`] | Per-community orchestration |
//! | [`stats`] | Store statistics reporting |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |

pub mod checkpoint;
pub mod config;
pub mod cursor;
pub mod db;
pub mod harvest;
pub mod migrate;
pub mod models;
pub mod reddit;
pub mod source;
pub mod stats;
pub mod store;
pub mod telemetry;
