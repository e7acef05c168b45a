#![deny(missing_docs)]

//! Core library for the docvec ingestion and retrieval server.

/// Access-control rules for chunk visibility and document-level checks.
pub mod access;
/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Document type detection, extraction, and chunk splitting.
pub mod extract;
/// Vector index contract and backend adapters.
pub mod index;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion and search metrics helpers.
pub mod metrics;
/// Document ingestion pipeline driving the lifecycle state machine.
pub mod pipeline;
/// Retrieval façade combining embedder, index, and access filtering.
pub mod service;
/// In-memory document registry and lifecycle state machine.
pub mod store;
