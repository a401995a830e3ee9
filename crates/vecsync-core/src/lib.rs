//! # vecsync core
//!
//! Runtime-free building blocks for vecsync: data models, content
//! fingerprinting, the sentence-aware chunker, the [`embedding::Embedder`]
//! port, and the [`store::VectorStore`] port with an in-memory backend.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. Backends
//! that need those live in the `vecsync` app crate.

pub mod chunk;
pub mod embedding;
pub mod models;
pub mod store;
