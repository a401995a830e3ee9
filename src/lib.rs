//! # vecsync
//!
//! Keeps a vector index consistent with a folder of documents.
//!
//! Files are loaded, fingerprinted, split into overlapping token-bounded
//! chunks, embedded, and written to a pluggable vector store. A JSON ledger
//! remembers which content each path currently holds, so re-ingesting an
//! unchanged file is a no-op, an edited file replaces its chunks, a
//! deleted file retracts every vector, and identical content under a
//! second path is recognized as a duplicate.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────────┐   ┌──────────────┐
//! │ Watch loop  │──▶│ Pipeline                 │──▶│ Vector store │
//! │ notify+scan │   │ load→hash→chunk→embed    │   │ mem/flat/    │
//! └─────────────┘   └────────────┬─────────────┘   │ sqlite/pcone │
//!        ▲                       ▼                 └──────────────┘
//!   ┌────┴────┐            ┌──────────┐
//!   │   CLI   │            │  Ledger  │
//!   └─────────┘            └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`error`] | Per-document failure taxonomy |
//! | [`extract`] | PDF / OOXML text extraction |
//! | [`loader`] | File → text |
//! | [`ledger`] | Durable path → document identity map |
//! | [`embedding`] | Embedding providers |
//! | [`store`] | Vector store backends |
//! | [`pipeline`] | Ingest / delete / query orchestration |
//! | [`watcher`] | Folder watch loop |
//!
//! The chunker and data models live in the runtime-free `vecsync-core`
//! crate and are re-exported here as [`chunk`] and [`models`].

pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ledger;
pub mod loader;
pub mod logging;
pub mod pipeline;
pub mod store;
pub mod watcher;

pub use vecsync_core::{chunk, models};
